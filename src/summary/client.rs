use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::prompt::SYSTEM_PROMPT;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const TEMPERATURE: f64 = 0.2;
const MAX_TOKENS: u32 = 350;
const MAX_RETRIES: u32 = 2;
const MAX_RESPONSE_SIZE: usize = 1024 * 1024; // 1MB

#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("Summarization service is not configured")]
    Unconfigured,
    #[error("Summarization timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Summarization service returned no text")]
    EmptyResponse,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl SummarizationError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            SummarizationError::Timeout | SummarizationError::Network(_) => true,
            SummarizationError::HttpStatus(status) => *status >= 500 || *status == 429,
            SummarizationError::Unconfigured
            | SummarizationError::EmptyResponse
            | SummarizationError::InvalidResponse(_)
            | SummarizationError::InsecureBaseUrl => false,
        }
    }
}

/// External text-summarization service.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarizes one prompt. Callers apply their own timeout.
    async fn summarize(&self, prompt: &str) -> Result<String, SummarizationError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Used when no API key is configured: every call fails fast with
/// [`SummarizationError::Unconfigured`], so every article gets the fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _prompt: &str) -> Result<String, SummarizationError> {
        Err(SummarizationError::Unconfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for OpenAiSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSummarizer")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiSummarizer {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// [`SummarizationError::InsecureBaseUrl`] if `base_url` is not HTTPS.
    /// Plain HTTP is accepted only for localhost (test servers).
    pub fn new(
        client: reqwest::Client,
        api_key: SecretString,
        base_url: Option<&str>,
        model: Option<&str>,
    ) -> Result<Self, SummarizationError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');

        // SEC-002: Enforce HTTPS for base URL to prevent API key exposure
        if !base.starts_with("https://") {
            let is_localhost =
                base.starts_with("http://127.0.0.1") || base.starts_with("http://localhost");
            if !is_localhost {
                tracing::error!(base_url = %base, "Rejecting non-HTTPS base URL (HTTPS required except for localhost)");
                return Err(SummarizationError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base, "Using non-HTTPS summarization base URL (localhost only)");
        }

        if base_url.is_some() {
            tracing::info!(base_url = %base, "Using custom summarization API base URL");
        }

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{base}/v1/chat/completions"),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        })
    }

    async fn request_once(&self, prompt: &str) -> Result<String, SummarizationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SummarizationError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        let parsed: ChatResponse = serde_json::from_slice(&bytes)
            .map_err(|e| SummarizationError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.and_then(|m| m.content))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(SummarizationError::EmptyResponse)
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    /// Sends the prompt, retrying transient failures with backoff (500ms, 1s).
    async fn summarize(&self, prompt: &str) -> Result<String, SummarizationError> {
        let mut retry_count = 0;

        loop {
            match self.request_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    let delay = Duration::from_millis(500 << retry_count);
                    tracing::debug!(
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying summarization after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SummarizationError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(SummarizationError::InvalidResponse(format!(
                "response exceeds {limit} bytes"
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        // SEC-003: Use saturating_add to prevent integer overflow in size check
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SummarizationError::InvalidResponse(format!(
                "response exceeds {limit} bytes"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
