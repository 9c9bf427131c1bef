//! Ollama adapter
//!
//! Talks to `/api/chat` directly over HTTP rather than through a client
//! library, since tool calling needs the raw `tools` / `tool_calls` fields.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    clean_text, http_client, send_json, synthesize_call_id, AssistantReply, GenerationConfig, ModelProvider, Usage,
};
use crate::conversation::{ConversationState, ToolCallRequest, Turn};
use crate::error::ProviderError;
use crate::tools::schema::clean_schema;
use crate::tools::ToolDescriptor;

const DEFAULT_URL: &str = "http://localhost:11434";

// ============================================================================
// Wire Types
// ============================================================================

/// Direct chat request for Ollama API
#[derive(Debug, Serialize)]
pub(crate) struct DirectChatRequest {
    model: String,
    messages: Vec<DirectMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<DirectTool>,
    stream: bool,
    options: DirectOptions,
}

#[derive(Debug, Serialize)]
struct DirectOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// A message in the conversation
#[derive(Debug, Serialize)]
struct DirectMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<DirectToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl DirectMessage {
    fn new(role: &'static str, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DirectToolCall {
    function: DirectFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct DirectFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// A tool definition for Ollama
#[derive(Debug, Serialize)]
struct DirectTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: DirectToolFunction,
}

#[derive(Debug, Serialize)]
struct DirectToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

/// Response from Ollama chat endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct DirectChatResponse {
    message: DirectResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DirectResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<DirectToolCall>,
}

// ============================================================================
// Translation
// ============================================================================

pub(crate) fn build_request(
    model: &str,
    conversation: &ConversationState,
    tools: &[ToolDescriptor],
    config: &GenerationConfig,
) -> DirectChatRequest {
    let mut messages = Vec::with_capacity(conversation.len() + 1);

    if let Some(prompt) = &config.system_prompt {
        messages.push(DirectMessage::new("system", prompt.clone()));
    }

    for turn in conversation.turns() {
        let message = match turn {
            Turn::User { text } => DirectMessage::new("user", clean_text(text)),
            Turn::Assistant { text, tool_calls } => DirectMessage {
                tool_calls: tool_calls
                    .iter()
                    .map(|call| DirectToolCall {
                        function: DirectFunctionCall {
                            name: call.name.clone(),
                            arguments: Value::Object(call.arguments.clone()),
                        },
                    })
                    .collect(),
                ..DirectMessage::new("assistant", clean_text(text))
            },
            Turn::ToolResult {
                tool_name, result, ..
            } => DirectMessage {
                tool_name: Some(tool_name.clone()),
                ..DirectMessage::new("tool", clean_text(&result.model_content()))
            },
        };
        messages.push(message);
    }

    DirectChatRequest {
        model: model.to_string(),
        messages,
        tools: tools
            .iter()
            .map(|t| DirectTool {
                tool_type: "function",
                function: DirectToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: clean_schema(&t.schema),
                },
            })
            .collect(),
        stream: false,
        options: DirectOptions {
            temperature: config.temperature,
            num_predict: config.max_tokens,
        },
    }
}

pub(crate) fn parse_response(response: DirectChatResponse) -> AssistantReply {
    let tool_calls = response
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            // some models send arguments as a JSON-encoded string
            let arguments = match call.function.arguments {
                Value::Object(map) => map,
                Value::String(raw) => serde_json::from_str(&raw).unwrap_or_default(),
                _ => Default::default(),
            };
            ToolCallRequest::new(synthesize_call_id(), call.function.name, arguments)
        })
        .collect();

    let usage = match (response.prompt_eval_count, response.eval_count) {
        (None, None) => None,
        (input, output) => Some(Usage {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
        }),
    };

    AssistantReply {
        text: response.message.content,
        tool_calls,
        usage,
        finish_reason: response.done_reason,
    }
}

/// Normalize a user-supplied Ollama URL to `scheme://host:port`
fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("localhost");
            let port = url.port().unwrap_or(11434);
            format!("{}://{}:{}", url.scheme(), host, port)
        }
        Err(e) => {
            tracing::warn!("Invalid Ollama URL '{}' ({}), using {}", raw, e, DEFAULT_URL);
            DEFAULT_URL.to_string()
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout, HeaderMap::new())?,
            base_url: normalize_url(url),
            model: model.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn send(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError> {
        let request = build_request(&self.model, conversation, tools, config);
        tracing::debug!(
            "Ollama request: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let url = format!("{}/api/chat", self.base_url);
        let response: DirectChatResponse = send_json(self.client.post(&url).json(&request)).await?;
        Ok(parse_response(response))
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
