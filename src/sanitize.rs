use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::scrape::PostRecord;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"http\S+|www\S+|https\S+").expect("valid regex"));
static BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.*?\]|\(.*?\)").expect("valid regex"));
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(?:amp|lt|gt|#\d+|[a-zA-Z]+);").expect("valid regex"));
static SPECIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^a-z0-9\s.,!?'"-]"#).expect("valid regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static REPEAT_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.{2,}|,{2,}|!{2,}|\?{2,}").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedComment {
    pub text: String,
    pub author: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub title: String,
    pub main_text: String,
    pub author: String,
    pub subreddit: String,
    pub comments: Vec<CleanedComment>,
}

/// Normalize a scraped record: clean the text fields, drop downvoted
/// comments, and sort the rest by score descending. Deterministic.
pub fn clean_record(record: &PostRecord) -> CleanedRecord {
    let mut comments: Vec<CleanedComment> = record
        .comments
        .iter()
        .filter(|c| c.score > 0)
        .map(|c| CleanedComment {
            text: clean_string(&c.body),
            author: c.author.clone(),
            score: c.score,
        })
        .collect();
    comments.sort_by(|a, b| b.score.cmp(&a.score));

    CleanedRecord {
        title: clean_string(&record.title),
        main_text: clean_string(&record.selftext),
        author: record.author.clone(),
        subreddit: record.subreddit.clone(),
        comments,
    }
}

/// Lowercase, strip URLs / bracketed spans / HTML entities / stray
/// characters, collapse whitespace and repeated punctuation. The pass order
/// is load-bearing: whitespace is collapsed before punctuation runs.
pub fn clean_string(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.to_lowercase();
    let text = URL_RE.replace_all(&text, "");
    let text = BRACKET_RE.replace_all(&text, "");
    let text = ENTITY_RE.replace_all(&text, " ");
    let text = SPECIAL_RE.replace_all(&text, "");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    let text = text.trim();
    REPEAT_PUNCT_RE
        .replace_all(text, |caps: &Captures| caps[0][..1].to_string())
        .into_owned()
}

/// Restrict a string to filesystem-safe characters for artifact names.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
