//! Model provider adapters
//!
//! Each adapter translates the canonical [`ConversationState`] into one
//! provider's wire format and the provider's reply back into an
//! [`AssistantReply`]. Nothing outside this module branches on provider.

mod anthropic;
mod gemini;
mod ollama;
mod openai;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use retry::{RetryPolicy, RetryingProvider};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::conversation::{ConversationState, ToolCallRequest};
use crate::error::ProviderError;
use crate::tools::ToolDescriptor;

// ============================================================================
// Provider Trait
// ============================================================================

/// Per-request generation parameters
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Sent out-of-band; never stored as a turn
    pub system_prompt: Option<String>,
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: Some(4096),
            system_prompt: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl GenerationConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            temperature: settings.llm.temperature,
            max_tokens: settings.llm.max_tokens,
            system_prompt: settings.agent.system_prompt.clone(),
            timeout: Duration::from_secs(settings.llm.timeout_secs),
        }
    }
}

/// Token accounting, when the provider reports it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One model reply in canonical form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send the conversation and available tools, get one reply
    async fn send(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError>;

    /// Provider name as used in configuration
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Upper bound on one `send`, given the per-request model timeout
    fn deadline(&self, per_request: Duration) -> Duration {
        per_request
    }
}

// ============================================================================
// Provider Selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
            Self::Gemini => "gemini-2.0-flash",
            Self::Ollama => "qwen3-coder:30b",
        }
    }

    /// Local Ollama needs no credentials
    pub fn requires_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => anyhow::bail!(
                "Unsupported model provider: {} (expected anthropic, openai, gemini or ollama)",
                other
            ),
        }
    }
}

/// Build a provider for `kind`, wrapped in the default retry policy
pub fn create_provider(
    kind: ProviderKind,
    model: Option<&str>,
    settings: &Settings,
) -> Result<Arc<dyn ModelProvider>> {
    let model = model
        .map(str::to_string)
        .unwrap_or_else(|| settings.model_for(kind));
    let timeout = Duration::from_secs(settings.llm.timeout_secs);

    let key = || {
        settings
            .api_key(kind)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("No API key configured for {}", kind))
    };

    tracing::info!("Using {} model {}", kind, model);
    let provider: Arc<dyn ModelProvider> = match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(&key()?, &model, timeout)?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(&key()?, &model, timeout)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(&key()?, &model, timeout)?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(&settings.llm.ollama_url, &model, timeout)?),
    };

    Ok(Arc::new(RetryingProvider::new(provider, RetryPolicy::default())))
}

// ============================================================================
// Shared HTTP helpers
// ============================================================================

/// Build the HTTP client used by every adapter
pub(crate) fn http_client(timeout: Duration, headers: HeaderMap) -> Result<reqwest::Client> {
    use anyhow::Context;

    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

/// Map a non-2xx status to a provider error
pub fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
    let message = error_message(body).unwrap_or_else(|| format!("HTTP {}: {}", status, truncate(body, 300)));

    match status {
        401 | 403 => ProviderError::Auth(message),
        429 => ProviderError::RateLimit {
            message,
            retry_after,
        },
        // Gemini reports a bad key as a 400
        400 if body.contains("API_KEY_INVALID") => ProviderError::Auth(message),
        400 | 404 | 422 => ProviderError::MalformedRequest(message),
        _ => ProviderError::Transport(message),
    }
}

/// Pull the human-readable message out of an error body
///
/// Handles `{"error": {"message": ..}}` (Anthropic, OpenAI, Gemini) and
/// `{"error": ".."}` (Ollama).
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(msg) => Some(msg.clone()),
        Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && (0.0..=3600.0).contains(secs))
        .map(Duration::from_secs_f64)
}

/// Send a request and decode a JSON body, classifying failures
pub(crate) async fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await?;

    if !status.is_success() {
        return Err(classify_status(status.as_u16(), &body, retry_after));
    }

    tracing::debug!("Provider response: {} bytes", body.len());
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::Transport(format!("failed to decode response: {}", e)))
}

/// Trailing whitespace is rejected by some providers on assistant turns
pub(crate) fn clean_text(text: &str) -> String {
    text.trim_end().to_string()
}

/// Id for providers that do not assign tool call ids
pub fn synthesize_call_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &id[..12])
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
