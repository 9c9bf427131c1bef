//! Agent events for real-time visibility
//!
//! Emitted while the agent works through a request. The CLI prints them;
//! any other subscriber can consume the same channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

// ============================================================================
// Agent Events
// ============================================================================

/// Events emitted by the agent during execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent is starting to process a message
    ProcessingStart { message: String },

    /// A model round produced tool calls
    Iteration {
        /// Round number, starting at 1
        number: usize,
        /// Number of tool calls in this round
        tool_calls: usize,
    },

    /// Tool execution is starting
    ToolStart {
        call_id: String,
        name: String,
        arguments: Value,
    },

    /// Tool execution completed
    ToolComplete {
        call_id: String,
        name: String,
        /// Text returned to the model (may be truncated for display)
        result: String,
        #[serde(with = "duration_millis")]
        duration: Duration,
        is_error: bool,
    },

    /// Final response ready
    ResponseComplete {
        content: String,
        rounds: usize,
        #[serde(with = "duration_millis")]
        total_duration: Duration,
    },

    /// The request failed
    Error { kind: String, message: String },
}

/// Serialize Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// ============================================================================
// Event Channel
// ============================================================================

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

// ============================================================================
// Event Sender Helper
// ============================================================================

/// Optional sender; every method is a no-op without a subscriber
#[derive(Clone, Default)]
pub struct AgentEventSender {
    sender: Option<EventSender>,
}

impl AgentEventSender {
    pub fn new(sender: EventSender) -> Self {
        Self { sender: Some(sender) }
    }

    pub fn none() -> Self {
        Self { sender: None }
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    /// Send an event (silently dropped if nobody listens)
    pub fn send(&self, event: AgentEvent) {
        if let Some(ref sender) = self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn processing_start(&self, message: &str) {
        self.send(AgentEvent::ProcessingStart {
            message: message.to_string(),
        });
    }

    pub fn iteration(&self, number: usize, tool_calls: usize) {
        self.send(AgentEvent::Iteration { number, tool_calls });
    }

    pub fn tool_start(&self, call_id: &str, name: &str, arguments: Value) {
        self.send(AgentEvent::ToolStart {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments,
        });
    }

    pub fn tool_complete(&self, call_id: &str, name: &str, result: &str, duration: Duration, is_error: bool) {
        self.send(AgentEvent::ToolComplete {
            call_id: call_id.to_string(),
            name: name.to_string(),
            result: result.to_string(),
            duration,
            is_error,
        });
    }

    pub fn response_complete(&self, content: &str, rounds: usize, total_duration: Duration) {
        self.send(AgentEvent::ResponseComplete {
            content: content.to_string(),
            rounds,
            total_duration,
        });
    }

    pub fn error(&self, kind: &str, message: &str) {
        self.send(AgentEvent::Error {
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }
}
