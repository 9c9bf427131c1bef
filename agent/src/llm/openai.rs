//! OpenAI Chat Completions adapter

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{clean_text, http_client, send_json, AssistantReply, GenerationConfig, ModelProvider, Usage};
use crate::conversation::{Arguments, ConversationState, ToolCallRequest, Turn};
use crate::error::ProviderError;
use crate::tools::ToolDescriptor;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: FunctionDefinition,
}

#[derive(Debug, Serialize)]
struct FunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ============================================================================
// Translation
// ============================================================================

pub(crate) fn build_request(
    model: &str,
    conversation: &ConversationState,
    tools: &[ToolDescriptor],
    config: &GenerationConfig,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(conversation.len() + 1);

    if let Some(prompt) = &config.system_prompt {
        messages.push(ChatMessage::System {
            content: prompt.clone(),
        });
    }

    for turn in conversation.turns() {
        let message = match turn {
            Turn::User { text } => ChatMessage::User {
                content: clean_text(text),
            },
            Turn::Assistant { text, tool_calls } => {
                let text = clean_text(text);
                ChatMessage::Assistant {
                    content: if text.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(text)
                    },
                    tool_calls: tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            call_type: function_type(),
                            function: WireFunction {
                                name: call.name.clone(),
                                arguments: Value::Object(call.arguments.clone()).to_string(),
                            },
                        })
                        .collect(),
                }
            }
            Turn::ToolResult { call_id, result, .. } => ChatMessage::Tool {
                tool_call_id: call_id.clone(),
                content: clean_text(&result.model_content()),
            },
        };
        messages.push(message);
    }

    let tools: Vec<FunctionTool> = tools
        .iter()
        .map(|t| FunctionTool {
            tool_type: "function",
            function: FunctionDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.schema.clone(),
            },
        })
        .collect();

    ChatRequest {
        model: model.to_string(),
        messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        tool_choice: if tools.is_empty() { None } else { Some("auto") },
        tools,
    }
}

/// Decode the JSON-string arguments OpenAI sends
///
/// Undecodable arguments become an empty object; schema validation then
/// reports the problem back to the model as a failed tool result.
fn decode_arguments(name: &str, raw: &str) -> Arguments {
    if raw.trim().is_empty() {
        return Arguments::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!("Tool call '{}' arguments are not an object: {}", name, other);
            Arguments::new()
        }
        Err(e) => {
            tracing::warn!("Tool call '{}' has undecodable arguments: {}", name, e);
            Arguments::new()
        }
    }
}

pub(crate) fn parse_response(response: ChatResponse) -> Result<AssistantReply, ProviderError> {
    let usage = response.usage.map(|u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Transport("response contained no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            let arguments = decode_arguments(&call.function.name, &call.function.arguments);
            ToolCallRequest::new(call.id, call.function.name, arguments)
        })
        .collect();

    Ok(AssistantReply {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage,
        finish_reason: choice.finish_reason,
    })
}

// ============================================================================
// Provider
// ============================================================================

pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).context("Invalid API key format")?,
        );

        Ok(Self {
            client: http_client(timeout, headers)?,
            model: model.to_string(),
            url: API_URL.to_string(),
        })
    }

    /// Point at an OpenAI-compatible endpoint
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn send(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError> {
        let request = build_request(&self.model, conversation, tools, config);
        tracing::debug!(
            "OpenAI request: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response: ChatResponse = send_json(self.client.post(&self.url).json(&request)).await?;
        parse_response(response)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
