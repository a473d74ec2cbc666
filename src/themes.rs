use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sanitize::CleanedRecord;

/// Themes a diss track commonly leans on; the classifier scores content
/// against these labels zero-shot.
const CANDIDATE_THEMES: [&str; 10] = [
    "wealth/money",
    "success/achievements",
    "skills/talent",
    "authenticity/realness",
    "street credibility",
    "relationships/loyalty",
    "competition/rivalry",
    "past conflicts",
    "personal style",
    "geographic location",
];

/// Keep only labels the classifier is reasonably confident about.
const CONFIDENCE_FLOOR: f64 = 0.3;

/// How many top comments get their own classification pass.
const TOP_COMMENTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeScore {
    pub theme: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentThemes {
    pub author: String,
    pub themes: Vec<ThemeScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemesRecord {
    pub main_themes: Vec<ThemeScore>,
    pub comment_themes: Vec<CommentThemes>,
    pub target: String,
    pub context: String,
}

/// Classify the cleaned content against the candidate themes.
///
/// The classifier is an external collaborator: if it is unreachable the
/// record degrades to empty theme lists and the pipeline continues.
pub fn extract_themes(
    http: &reqwest::blocking::Client,
    endpoint: &str,
    record: &CleanedRecord,
) -> ThemesRecord {
    let main_content = format!("{} {}", record.title, record.main_text);
    let main_themes = classify_or_empty(http, endpoint, &main_content);

    let comment_themes = record
        .comments
        .iter()
        .take(TOP_COMMENTS)
        .map(|c| CommentThemes {
            author: c.author.clone(),
            themes: classify_or_empty(http, endpoint, &c.text),
        })
        .collect();

    ThemesRecord {
        main_themes,
        comment_themes,
        target: record.author.clone(),
        context: record.subreddit.clone(),
    }
}

fn classify_or_empty(
    http: &reqwest::blocking::Client,
    endpoint: &str,
    text: &str,
) -> Vec<ThemeScore> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    match classify(http, endpoint, text) {
        Ok(themes) => themes,
        Err(err) => {
            log::warn!("Theme classification failed, continuing without themes: {err:#}");
            Vec::new()
        }
    }
}

fn classify(
    http: &reqwest::blocking::Client,
    endpoint: &str,
    text: &str,
) -> Result<Vec<ThemeScore>> {
    let request = json!({
        "inputs": text,
        "parameters": {
            "candidate_labels": CANDIDATE_THEMES,
            "multi_label": true,
        }
    });

    let response = http
        .post(endpoint)
        .json(&request)
        .send()
        .with_context(|| format!("Classifier request to {endpoint} failed"))?
        .error_for_status()
        .context("Classifier returned an error status")?;

    let body: Value = response.json().context("Classifier response was not JSON")?;
    Ok(ranked_themes(&body))
}

/// Pair labels with scores, drop low-confidence ones, sort descending.
fn ranked_themes(body: &Value) -> Vec<ThemeScore> {
    let labels = body.get("labels").and_then(Value::as_array);
    let scores = body.get("scores").and_then(Value::as_array);

    let (Some(labels), Some(scores)) = (labels, scores) else {
        return Vec::new();
    };

    let mut themes: Vec<ThemeScore> = labels
        .iter()
        .zip(scores.iter())
        .filter_map(|(label, score)| {
            let theme = label.as_str()?.to_string();
            let confidence = score.as_f64()?;
            (confidence > CONFIDENCE_FLOOR).then_some(ThemeScore { theme, confidence })
        })
        .collect();

    themes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    themes
}
