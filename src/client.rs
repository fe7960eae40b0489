//! Client for the external completion endpoint.
//!
//! One prompt in, one raw response text out. No retries: a failed call is the
//! caller's per-item failure to record, not something to paper over here.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::util::truncate;

/// Maximum length for endpoint error content surfaced in error messages.
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Fixed decoding parameters. Deterministic-leaning sampling with a large
/// output bound, since the reasoning segment alone can run to thousands of
/// tokens.
const MAX_COMPLETION_TOKENS: u32 = 32_768;
const TEMPERATURE: f64 = 0.6;
const TOP_P: f64 = 1.0;
const TOP_K: u32 = 40;

/// Seam between the orchestrator and the completion endpoint. Tests swap in
/// stub backends with canned or misbehaving responses.
pub trait CompletionBackend: Send + Sync {
    /// Send one rendered prompt, return the raw response text.
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    top_p: f64,
    top_k: u32,
    presence_penalty: f64,
    frequency_penalty: f64,
    temperature: f64,
    response_format: ResponseFormat,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Content can be null in some API responses.
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for the chat-completions endpoint.
pub struct CompletionClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl CompletionClient {
    /// Build a client from resolved configuration. The request timeout bounds
    /// how long a single hung call can stall its batch.
    pub fn new(config: &Config, timeout: Duration) -> anyhow::Result<Self> {
        let api_key = config.api_key().context(
            "No API key configured. Set SINKSCAN_API_KEY or add api_key to the config file.",
        )?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base(),
            api_key,
            model: config.model(),
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens: MAX_COMPLETION_TOKENS,
            top_p: TOP_P,
            top_k: TOP_K,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            temperature: TEMPERATURE,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        }
    }

    async fn send(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .post(&self.api_base)
            .header("Accept", "application/json")
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .context("Completion request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read completion response body")?;

        if !status.is_success() {
            anyhow::bail!(
                "Completion endpoint returned {}: {}",
                status,
                truncate(&text, MAX_ERROR_CONTENT_LEN)
            );
        }

        let parsed: ChatResponse = serde_json::from_str(&text).with_context(|| {
            format!(
                "Malformed completion response envelope: {}",
                truncate(&text, MAX_ERROR_CONTENT_LEN)
            )
        })?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.is_empty() {
            anyhow::bail!("Completion response contained no content");
        }
        Ok(content)
    }
}

impl CompletionBackend for CompletionClient {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(self.send(prompt))
    }
}
