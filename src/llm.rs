use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

/// Minimal client for an OpenAI-compatible chat-completions endpoint
/// (local Ollama by default). Lyric generation and flow refinement share it.
pub struct ChatClient<'a> {
    http: &'a reqwest::blocking::Client,
    endpoint: &'a str,
    model: &'a str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

impl<'a> ChatClient<'a> {
    pub fn new(http: &'a reqwest::blocking::Client, endpoint: &'a str, model: &'a str) -> Self {
        Self {
            http,
            endpoint,
            model,
        }
    }

    /// One system + user exchange; returns the assistant message content.
    pub fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        };

        let response = self
            .http
            .post(self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("Chat request to {} failed", self.endpoint))?
            .error_for_status()
            .context("Chat endpoint returned an error status")?;

        let body: Value = response.json().context("Chat response was not JSON")?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .context("Chat response had no message content")?;

        Ok(content.trim().to_string())
    }
}
