//! Error types shared across the agent
//!
//! Provider, tool, registry and session failures are kept as separate enums so
//! each layer can decide what is retryable and what becomes part of the
//! transcript.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Provider Errors
// ============================================================================

/// Failure reported by a model provider adapter
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Credentials missing, invalid or rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider asked us to slow down
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Request rejected as malformed (bad schema, unknown model, ...)
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Network failure, timeout, 5xx or undecodable response
    #[error("transport error: {0}")]
    Transport(String),
}

/// Coarse classification of a [`ProviderError`], used in session logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    MalformedRequest,
    Transport,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::MalformedRequest => "malformed_request",
            Self::Transport => "transport",
        };
        f.write_str(s)
    }
}

impl ProviderError {
    /// Only rate limits and transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Transport(_))
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Auth(_) => ProviderErrorKind::Auth,
            Self::RateLimit { .. } => ProviderErrorKind::RateLimit,
            Self::MalformedRequest(_) => ProviderErrorKind::MalformedRequest,
            Self::Transport(_) => ProviderErrorKind::Transport,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // request URLs can carry credentials
        let err = err.without_url();
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            Self::Transport(format!("failed to decode response: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

// ============================================================================
// Tool Errors
// ============================================================================

/// Failure while resolving or running a tool
///
/// These never abort a session: the agent loop converts them into failed
/// tool results so the model can see what went wrong.
#[derive(Debug, Clone, Error)]
pub enum ToolExecutionError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool '{tool}' failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
}

impl ToolExecutionError {
    pub fn invalid(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable label stored in result metadata
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Timeout { .. } => "timeout",
        }
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateName(String),

    #[error("no tool named '{0}' is registered")]
    UnknownTool(String),
}

impl From<RegistryError> for ToolExecutionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTool(name) => Self::UnknownTool(name),
            RegistryError::DuplicateName(name) => Self::ExecutionFailed {
                reason: format!("duplicate registration for '{}'", name),
                tool: name,
            },
        }
    }
}

// ============================================================================
// Session Errors
// ============================================================================

/// Terminal failure of one `chat` call
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("agent reached maximum rounds ({0}) without a final answer")]
    MaxRoundsExceeded(usize),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Label recorded alongside the failure in the session log
    pub fn label(&self) -> String {
        match self {
            Self::MaxRoundsExceeded(_) => "max_rounds_exceeded".to_string(),
            Self::Provider(e) => format!("provider:{}", e.kind()),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}
