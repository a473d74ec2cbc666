use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

#[derive(Debug, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_engine")]
    pub engine: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default = "default_tts_rate")]
    pub rate_wpm: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: default_tts_engine(),
            voice: default_tts_voice(),
            rate_wpm: default_tts_rate(),
        }
    }
}

fn default_user_agent() -> String {
    "dissforge/0.1".into()
}
fn default_llm_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".into()
}
fn default_llm_model() -> String {
    "llama3.3:latest".into()
}
fn default_classifier_endpoint() -> String {
    "https://api-inference.huggingface.co/models/facebook/bart-large-mnli".into()
}
fn default_tts_engine() -> String {
    if cfg!(target_os = "macos") {
        "say".into()
    } else {
        "espeak".into()
    }
}
fn default_tts_voice() -> String {
    if cfg!(target_os = "macos") {
        "Daniel".into()
    } else {
        "en-gb".into()
    }
}
fn default_tts_rate() -> u32 {
    220
}

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}
