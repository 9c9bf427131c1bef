//! Agent loop
//!
//! One `chat` call drives the tool-using loop:
//! 1. The user's text is appended as a turn
//! 2. The provider sees the whole conversation plus every registered tool
//! 3. Tool calls in the reply run concurrently; their results are appended
//!    in request order
//! 4. The loop repeats until a reply has no tool calls, the round limit is
//!    hit, the provider fails, or the request is cancelled
//!
//! Every appended turn goes to the session store when one is configured.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::conversation::{ConversationState, ToolCallRequest, ToolResult, Turn};
use crate::error::{ProviderError, SessionError};
use crate::llm::{synthesize_call_id, AssistantReply, GenerationConfig, ModelProvider};
use crate::mcp::McpClient;
use crate::session::{new_session_id, SessionFailure, SessionRecord, SessionStore};
use crate::tools::{self, SharedRegistry, ToolDescriptor};

pub mod builder;
pub mod events;

pub use builder::AgentBuilder;
pub use events::{event_channel, AgentEvent, AgentEventSender, EventReceiver, EventSender};

/// Maximum number of model rounds per request
pub const DEFAULT_MAX_ROUNDS: usize = 10;

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;

/// Event payloads longer than this are cut for display
const EVENT_RESULT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    AwaitingUserInput,
    AwaitingModel,
    ExecutingTools,
    Done,
    Failed,
}

/// Result of a successful `chat`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatOutcome {
    /// Final answer, with `<final>` markup removed
    pub text: String,
    /// Model rounds used
    pub rounds: usize,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub provider: String,
    pub model: String,
    pub turns: usize,
    pub tools: Vec<String>,
    pub logging: bool,
}

/// Text between the first `<final>` and the following `</final>`, or the
/// whole content when there is no such tag; trimmed either way
pub fn extract_final(content: &str) -> String {
    match content.split("<final>").nth(1) {
        Some(after) => after.split("</final>").next().unwrap_or(after).trim().to_string(),
        None => content.trim().to_string(),
    }
}

/// Give every call a unique, non-empty id so results can be paired
fn normalize_call_ids(calls: &mut [ToolCallRequest]) {
    let mut seen = HashSet::new();
    for call in calls.iter_mut() {
        if call.id.is_empty() || !seen.insert(call.id.clone()) {
            let fresh = synthesize_call_id();
            tracing::debug!("Replacing tool call id {:?} with {}", call.id, fresh);
            call.id = fresh;
            seen.insert(call.id.clone());
        }
    }
}

fn display_text(text: &str) -> String {
    if text.chars().count() <= EVENT_RESULT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EVENT_RESULT_CHARS).collect();
    format!("{}...", cut)
}

pub struct Agent {
    provider: Arc<dyn ModelProvider>,
    registry: SharedRegistry,
    mcp: Option<Arc<McpClient>>,
    config: GenerationConfig,
    max_rounds: usize,
    tool_timeout: Duration,
    conversation: ConversationState,
    state: AgentState,
    session_id: String,
    next_seq: u64,
    store: Option<Arc<dyn SessionStore>>,
    events: AgentEventSender,
    cancel: CancellationToken,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn history(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.config.system_prompt.as_deref()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn mcp_client(&self) -> Option<&Arc<McpClient>> {
        self.mcp.as_ref()
    }

    /// Token that aborts the request in flight
    ///
    /// A cancelled token is replaced at the start of the next `chat`, so
    /// fetch it again per request.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token for the next request, replacing a spent one
    pub fn arm_cancellation(&mut self) -> CancellationToken {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.cancel.clone()
    }

    pub fn set_event_sender(&mut self, sender: Option<EventSender>) {
        self.events = match sender {
            Some(s) => AgentEventSender::new(s),
            None => AgentEventSender::none(),
        };
    }

    pub async fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.read().await.list()
    }

    pub async fn session_info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            turns: self.conversation.len(),
            tools: self.registry.read().await.names(),
            logging: self.store.is_some(),
        }
    }

    /// Drop the conversation and start a new session id
    pub fn clear_history(&mut self) {
        self.conversation.clear();
        self.session_id = new_session_id();
        self.next_seq = 0;
        self.state = AgentState::AwaitingUserInput;
        tracing::info!("Conversation history cleared, new session {}", self.session_id);
    }

    /// Run one user request to completion
    pub async fn chat(&mut self, user_text: &str) -> Result<ChatOutcome, SessionError> {
        let started = Instant::now();
        self.arm_cancellation();
        self.state = AgentState::AwaitingUserInput;
        self.events.processing_start(user_text);
        self.append(Turn::user(user_text));

        let mut rounds = 0;
        loop {
            if rounds >= self.max_rounds {
                tracing::warn!("Agent reached max rounds ({}), stopping", self.max_rounds);
                return self.fail(SessionError::MaxRoundsExceeded(self.max_rounds));
            }
            rounds += 1;
            self.state = AgentState::AwaitingModel;

            let mut reply = match self.request_reply(rounds).await {
                Ok(reply) => reply,
                Err(err) => return self.fail(err),
            };
            normalize_call_ids(&mut reply.tool_calls);

            let calls = reply.tool_calls.clone();
            self.append(Turn::assistant(reply.text.clone(), reply.tool_calls));

            if calls.is_empty() {
                self.state = AgentState::Done;
                let text = extract_final(&reply.text);
                self.events.response_complete(&text, rounds, started.elapsed());
                tracing::info!("Agent responded after {} round(s) in {:?}", rounds, started.elapsed());
                return Ok(ChatOutcome {
                    text,
                    rounds,
                    session_id: self.session_id.clone(),
                });
            }

            self.state = AgentState::ExecutingTools;
            tracing::info!("Round {}: {} tool call(s)", rounds, calls.len());
            self.events.iteration(rounds, calls.len());

            match self.execute_calls(&calls).await {
                Some(results) => {
                    for (call, result) in calls.iter().zip(results) {
                        self.append(Turn::tool_result(call, result));
                    }
                }
                None => {
                    // answer every outstanding call so the transcript stays paired
                    for call in &calls {
                        let result = ToolResult::failure("cancelled")
                            .with_metadata(json!({ "error_kind": "cancelled" }));
                        self.append(Turn::tool_result(call, result));
                    }
                    return self.fail(SessionError::Cancelled);
                }
            }
        }
    }

    /// One provider round, bounded by the model timeout and cancellation
    async fn request_reply(&self, round: usize) -> Result<AssistantReply, SessionError> {
        let tools = self.registry.read().await.list();
        tracing::debug!(
            "Round {}: sending {} turns and {} tools to {}/{}",
            round,
            self.conversation.len(),
            tools.len(),
            self.provider.name(),
            self.provider.model()
        );

        // retrying providers bound each attempt themselves and report the total
        let timeout = self.provider.deadline(self.config.timeout);
        let send = self.provider.send(&self.conversation, &tools, &self.config);
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, send) => Some(result),
        };

        match outcome {
            None => Err(SessionError::Cancelled),
            Some(Err(_elapsed)) => Err(SessionError::Provider(ProviderError::Transport(format!(
                "model call timed out after {:?}",
                timeout
            )))),
            Some(Ok(result)) => result.map_err(SessionError::Provider),
        }
    }

    /// Dispatch all calls concurrently; `None` if cancelled first
    async fn execute_calls(&self, calls: &[ToolCallRequest]) -> Option<Vec<ToolResult>> {
        let pending = calls.iter().map(|call| {
            let registry = self.registry.clone();
            let events = self.events.clone();
            let timeout = self.tool_timeout;
            async move {
                events.tool_start(&call.id, &call.name, Value::Object(call.arguments.clone()));
                let started = Instant::now();
                let result = tools::dispatch(&registry, call, timeout).await;
                tracing::info!(
                    "Tool {} ({}) finished in {:?}, success={}",
                    call.name,
                    call.id,
                    started.elapsed(),
                    result.success
                );
                events.tool_complete(
                    &call.id,
                    &call.name,
                    &display_text(&result.model_content()),
                    started.elapsed(),
                    !result.success,
                );
                result
            }
        });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            results = join_all(pending) => Some(results),
        }
    }

    fn append(&mut self, turn: Turn) {
        if let Some(store) = &self.store {
            let record = SessionRecord::for_turn(
                &self.session_id,
                self.next_seq,
                self.provider.name(),
                self.provider.model(),
                turn.clone(),
            );
            if let Err(e) = store.record(&record) {
                tracing::warn!("Failed to record turn {} of {}: {:#}", self.next_seq, self.session_id, e);
            }
        }
        self.next_seq += 1;
        self.conversation.push(turn);
    }

    fn fail(&mut self, err: SessionError) -> Result<ChatOutcome, SessionError> {
        self.state = AgentState::Failed;
        let kind = err.label();
        let message = err.to_string();
        tracing::warn!("Session {} failed: {}", self.session_id, message);
        self.events.error(&kind, &message);

        if let Some(store) = &self.store {
            let record = SessionRecord::for_failure(
                &self.session_id,
                self.next_seq,
                self.provider.name(),
                self.provider.model(),
                SessionFailure { kind, message },
            );
            if let Err(e) = store.record(&record) {
                tracing::warn!("Failed to record failure of {}: {:#}", self.session_id, e);
            }
        }
        self.next_seq += 1;
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Arguments;

    #[test]
    fn test_extract_final() {
        assert_eq!(extract_final("thinking... <final> 42 </final> trailing"), "42");
        assert_eq!(extract_final("<final>open ended"), "open ended");
        assert_eq!(extract_final("  plain answer \n"), "plain answer");
    }

    #[test]
    fn test_normalize_call_ids() {
        let mut calls = vec![
            ToolCallRequest::new("a", "x", Arguments::new()),
            ToolCallRequest::new("a", "y", Arguments::new()),
            ToolCallRequest::new("", "z", Arguments::new()),
        ];
        normalize_call_ids(&mut calls);
        assert_eq!(calls[0].id, "a");
        assert_ne!(calls[1].id, "a");
        assert!(!calls[2].id.is_empty());
        let unique: HashSet<_> = calls.iter().map(|c| c.id.clone()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_display_text_truncates() {
        let long = "x".repeat(EVENT_RESULT_CHARS + 10);
        assert!(display_text(&long).ends_with("..."));
        assert_eq!(display_text("short"), "short");
    }
}
