//! Canonical conversation model
//!
//! Every provider adapter translates to and from these types, so the agent
//! loop and the session log never see a provider-specific message shape.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolExecutionError;

/// Tool call arguments, always a JSON object
pub type Arguments = Map<String, Value>;

// ============================================================================
// Tool Calls and Results
// ============================================================================

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned (or synthesized) call id
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Payload produced by a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
}

impl ToolOutput {
    /// Render the payload as text for a model message
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Structured(value) => value.is_null(),
        }
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: ToolOutput,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            output: ToolOutput::Text(text.into()),
            success: true,
            error: None,
            metadata: None,
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            output: ToolOutput::Structured(value),
            success: true,
            error: None,
            metadata: None,
        }
    }

    /// A failed result with an empty payload
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            output: ToolOutput::Text(String::new()),
            success: false,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Failed result carrying the error class in metadata
    pub fn from_error(err: &ToolExecutionError) -> Self {
        Self::failure(err.to_string())
            .with_metadata(serde_json::json!({ "error_kind": err.label() }))
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Text sent back to the model for this result
    pub fn model_content(&self) -> String {
        if self.success {
            return self.output.render();
        }
        let error = self.error.as_deref().unwrap_or("tool failed");
        if self.output.is_empty() {
            format!("Error: {}", error)
        } else {
            format!("Error: {}\n{}", error, self.output.render())
        }
    }
}

// ============================================================================
// Turns
// ============================================================================

/// One entry of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Assistant {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        result: ToolResult,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_calls,
        }
    }

    pub fn tool_result(call: &ToolCallRequest, result: ToolResult) -> Self {
        Self::ToolResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

// ============================================================================
// Pairing Invariant
// ============================================================================

/// First place where a transcript breaks call/result pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingViolation {
    /// A tool result with no matching outstanding call
    UnexpectedResult { turn: usize, call_id: String },
    /// A tool result answering a call other than the next one in request order
    OutOfOrder {
        turn: usize,
        expected: String,
        found: String,
    },
    /// A new user/assistant turn (or the end) arrived while calls were unanswered
    MissingResults { turn: usize, call_ids: Vec<String> },
    /// The same call id appears twice in one assistant turn
    DuplicateCallId { turn: usize, call_id: String },
}

impl fmt::Display for PairingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedResult { turn, call_id } => {
                write!(f, "turn {}: result for unknown call '{}'", turn, call_id)
            }
            Self::OutOfOrder {
                turn,
                expected,
                found,
            } => write!(
                f,
                "turn {}: expected result for '{}', found '{}'",
                turn, expected, found
            ),
            Self::MissingResults { turn, call_ids } => write!(
                f,
                "turn {}: unanswered calls [{}]",
                turn,
                call_ids.join(", ")
            ),
            Self::DuplicateCallId { turn, call_id } => {
                write!(f, "turn {}: duplicate call id '{}'", turn, call_id)
            }
        }
    }
}

impl std::error::Error for PairingViolation {}

// ============================================================================
// Conversation State
// ============================================================================

/// Ordered turns of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Calls from the latest assistant turn that have no result yet
    pub fn pending_calls(&self) -> Vec<&ToolCallRequest> {
        let Some(idx) = self
            .turns
            .iter()
            .rposition(|t| matches!(t, Turn::Assistant { .. }))
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.turns[idx + 1..]
            .iter()
            .filter_map(|t| match t {
                Turn::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();

        match &self.turns[idx] {
            Turn::Assistant { tool_calls, .. } => tool_calls
                .iter()
                .filter(|c| !answered.contains(c.id.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Text of the most recent assistant turn
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::Assistant { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Check that every requested call is answered exactly once, in request
    /// order, before the next user or assistant turn.
    pub fn validate(&self) -> Result<(), PairingViolation> {
        let mut pending: VecDeque<String> = VecDeque::new();

        for (idx, turn) in self.turns.iter().enumerate() {
            match turn {
                Turn::User { .. } => {
                    if !pending.is_empty() {
                        return Err(PairingViolation::MissingResults {
                            turn: idx,
                            call_ids: pending.into_iter().collect(),
                        });
                    }
                }
                Turn::Assistant { tool_calls, .. } => {
                    if !pending.is_empty() {
                        return Err(PairingViolation::MissingResults {
                            turn: idx,
                            call_ids: pending.into_iter().collect(),
                        });
                    }
                    let mut seen = HashSet::new();
                    for call in tool_calls {
                        if !seen.insert(call.id.as_str()) {
                            return Err(PairingViolation::DuplicateCallId {
                                turn: idx,
                                call_id: call.id.clone(),
                            });
                        }
                        pending.push_back(call.id.clone());
                    }
                }
                Turn::ToolResult { call_id, .. } => match pending.front() {
                    Some(expected) if expected == call_id => {
                        pending.pop_front();
                    }
                    Some(expected) if pending.contains(call_id) => {
                        return Err(PairingViolation::OutOfOrder {
                            turn: idx,
                            expected: expected.clone(),
                            found: call_id.clone(),
                        });
                    }
                    _ => {
                        return Err(PairingViolation::UnexpectedResult {
                            turn: idx,
                            call_id: call_id.clone(),
                        });
                    }
                },
            }
        }

        if pending.is_empty() {
            Ok(())
        } else {
            Err(PairingViolation::MissingResults {
                turn: self.turns.len(),
                call_ids: pending.into_iter().collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, Arguments::new())
    }

    #[test]
    fn test_valid_transcript() {
        let mut state = ConversationState::new();
        state.push(Turn::user("what is 2+2"));
        let calls = vec![call("a", "calc"), call("b", "calc")];
        state.push(Turn::assistant("", calls.clone()));
        state.push(Turn::tool_result(&calls[0], ToolResult::text("4")));
        assert_eq!(state.pending_calls().len(), 1);
        state.push(Turn::tool_result(&calls[1], ToolResult::text("4")));
        state.push(Turn::assistant("4", vec![]));

        assert!(state.validate().is_ok());
        assert!(state.pending_calls().is_empty());
        assert_eq!(state.last_assistant_text(), Some("4"));
    }

    #[test]
    fn test_missing_result_detected() {
        let mut state = ConversationState::new();
        state.push(Turn::user("hi"));
        state.push(Turn::assistant("", vec![call("a", "x")]));
        state.push(Turn::assistant("done", vec![]));

        match state.validate() {
            Err(PairingViolation::MissingResults { turn, call_ids }) => {
                assert_eq!(turn, 2);
                assert_eq!(call_ids, vec!["a".to_string()]);
            }
            other => panic!("Expected MissingResults, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_pending_call_is_violation() {
        let mut state = ConversationState::new();
        state.push(Turn::user("hi"));
        state.push(Turn::assistant("", vec![call("a", "x")]));
        assert!(matches!(
            state.validate(),
            Err(PairingViolation::MissingResults { turn: 2, .. })
        ));
    }

    #[test]
    fn test_out_of_order_and_unexpected() {
        let calls = vec![call("a", "x"), call("b", "x")];
        let state = ConversationState::from_turns(vec![
            Turn::user("hi"),
            Turn::assistant("", calls.clone()),
            Turn::tool_result(&calls[1], ToolResult::text("b")),
        ]);
        assert!(matches!(
            state.validate(),
            Err(PairingViolation::OutOfOrder { turn: 2, .. })
        ));

        let state = ConversationState::from_turns(vec![
            Turn::user("hi"),
            Turn::tool_result(&call("z", "x"), ToolResult::text("z")),
        ]);
        assert!(matches!(
            state.validate(),
            Err(PairingViolation::UnexpectedResult { turn: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_call_id() {
        let state = ConversationState::from_turns(vec![
            Turn::user("hi"),
            Turn::assistant("", vec![call("a", "x"), call("a", "y")]),
        ]);
        assert!(matches!(
            state.validate(),
            Err(PairingViolation::DuplicateCallId { turn: 1, .. })
        ));
    }

    #[test]
    fn test_turn_serialization() {
        let turn = Turn::assistant("", vec![call("c1", "terminal")]);
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["tool_calls"][0]["name"], "terminal");

        let result = Turn::ToolResult {
            call_id: "c1".into(),
            tool_name: "terminal".into(),
            result: ToolResult::structured(json!({"ok": true})),
        };
        let text = serde_json::to_string(&result).unwrap();
        let parsed: Turn = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_model_content_for_failure() {
        let result = ToolResult::failure("boom");
        assert_eq!(result.model_content(), "Error: boom");

        let err = ToolExecutionError::UnknownTool("ghost".into());
        let result = ToolResult::from_error(&err);
        assert!(!result.success);
        assert_eq!(result.metadata.unwrap()["error_kind"], "unknown_tool");
    }
}
