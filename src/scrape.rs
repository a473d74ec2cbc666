use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Stage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub body: String,
    pub author: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub subreddit: String,
    pub score: i64,
    pub comments: Vec<CommentRecord>,
}

/// Fetch a Reddit post and its comment tree through the public JSON listing
/// endpoint. Deleted authors come back as "[deleted]"; comments that fail to
/// parse are skipped rather than failing the whole fetch.
pub fn fetch_post(
    http: &reqwest::blocking::Client,
    post_url: &str,
    user_agent: &str,
) -> Result<PostRecord> {
    if user_agent.trim().is_empty() {
        return Err(PipelineError::MissingCredentials.into());
    }

    let json_url = listing_url(post_url);
    log::info!("Fetching post from {json_url}");

    let response = http
        .get(&json_url)
        .header(reqwest::header::USER_AGENT, user_agent)
        .send()
        .context("Reddit request failed")?;

    if !response.status().is_success() {
        return Err(PipelineError::Download {
            stage: Stage::Scrape,
            url: json_url,
            status: response.status().as_u16(),
        }
        .into());
    }

    let listing: Value = response.json().context("Reddit response was not JSON")?;
    parse_listing(&listing)
}

/// The listing endpoint is the post URL with a `.json` suffix.
fn listing_url(post_url: &str) -> String {
    let trimmed = post_url.trim_end_matches('/');
    if trimmed.ends_with(".json") {
        trimmed.to_string()
    } else {
        format!("{trimmed}.json")
    }
}

/// A post listing is a two-element array: the submission, then the comment
/// tree. Only the fixed record shape the pipeline consumes is extracted.
fn parse_listing(listing: &Value) -> Result<PostRecord> {
    let post = listing
        .get(0)
        .and_then(|l| l.pointer("/data/children/0/data"))
        .context("Listing did not contain a post")?;

    let mut record = PostRecord {
        title: str_field(post, "title"),
        selftext: str_field(post, "selftext"),
        author: author_field(post),
        subreddit: str_field(post, "subreddit"),
        score: post.get("score").and_then(Value::as_i64).unwrap_or(0),
        comments: Vec::new(),
    };

    if let Some(children) = listing
        .get(1)
        .and_then(|l| l.pointer("/data/children"))
        .and_then(Value::as_array)
    {
        collect_comments(children, &mut record.comments);
    }

    log::info!(
        "Fetched post \"{}\" by {} ({} comments)",
        record.title,
        record.author,
        record.comments.len()
    );

    Ok(record)
}

fn collect_comments(children: &[Value], out: &mut Vec<CommentRecord>) {
    for child in children {
        // "more" stubs carry no comment body
        if child.get("kind").and_then(Value::as_str) == Some("more") {
            continue;
        }
        let Some(data) = child.get("data") else { continue };

        let body = str_field(data, "body");
        if !body.is_empty() {
            out.push(CommentRecord {
                body,
                author: author_field(data),
                score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
            });
        }

        // Replies nest a full listing under the comment
        if let Some(replies) = data
            .pointer("/replies/data/children")
            .and_then(Value::as_array)
        {
            collect_comments(replies, out);
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn author_field(value: &Value) -> String {
    match value.get("author").and_then(Value::as_str) {
        Some(a) if !a.is_empty() => a.to_string(),
        _ => "[deleted]".to_string(),
    }
}
