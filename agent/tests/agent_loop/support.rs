//! Scripted provider and local tools shared by the agent loop tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use open_agent::conversation::{Arguments, ConversationState, ToolCallRequest, ToolResult};
use open_agent::error::{ProviderError, ToolExecutionError};
use open_agent::llm::{AssistantReply, GenerationConfig, ModelProvider};
use open_agent::tools::{parse_args, schema_for, SharedRegistry, Tool, ToolDescriptor, ToolRegistry};

/// Plays back canned replies in order, then answers "done"
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<AssistantReply, ProviderError>>>,
    /// Conversation length at each request
    pub seen: Mutex<Vec<usize>>,
    pub tools_offered: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<AssistantReply, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            tools_offered: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn send(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
        _config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError> {
        self.seen.lock().unwrap().push(conversation.len());
        self.tools_offered
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text_reply("<final>done</final>")))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "script-1"
    }
}

pub fn text_reply(text: &str) -> AssistantReply {
    AssistantReply {
        text: text.to_string(),
        ..Default::default()
    }
}

pub fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
    let arguments: Arguments = match args {
        Value::Object(map) => map,
        _ => Arguments::new(),
    };
    ToolCallRequest::new(id, name, arguments)
}

pub fn calls_reply(calls: Vec<ToolCallRequest>) -> AssistantReply {
    AssistantReply {
        text: String::new(),
        tool_calls: calls,
        ..Default::default()
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SleepParams {
    /// Milliseconds to wait before answering
    pub millis: u64,
    /// Text to answer with
    pub label: String,
}

/// Answers with its label after sleeping; counts invocations
pub struct SleepTool {
    pub calls: AtomicUsize,
}

impl SleepTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait, then echo a label"
    }

    fn schema(&self) -> Value {
        schema_for::<SleepParams>()
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let params: SleepParams = parse_args("sleep", args)?;
        tokio::time::sleep(Duration::from_millis(params.millis)).await;
        Ok(ToolResult::text(params.label).with_metadata(json!({ "slept_ms": params.millis })))
    }
}

/// Always fails
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Fails every time"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        Err(ToolExecutionError::failed("broken", "disk on fire"))
    }
}

pub fn registry_with(tools: Vec<Arc<dyn Tool>>) -> SharedRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    registry.shared()
}
