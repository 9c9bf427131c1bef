//! Anthropic Messages API adapter

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{clean_text, http_client, send_json, AssistantReply, GenerationConfig, ModelProvider, Usage};
use crate::conversation::{ConversationState, ToolCallRequest, Turn};
use crate::error::ProviderError;
use crate::tools::ToolDescriptor;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<RequestBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ToolDefinition {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// ============================================================================
// Translation
// ============================================================================

/// Append a block, merging into the previous message when roles match
fn push_block(messages: &mut Vec<Message>, role: &'static str, block: RequestBlock) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.push(block),
        _ => messages.push(Message {
            role,
            content: vec![block],
        }),
    }
}

pub(crate) fn build_request(
    model: &str,
    conversation: &ConversationState,
    tools: &[ToolDescriptor],
    config: &GenerationConfig,
) -> MessagesRequest {
    let mut messages: Vec<Message> = Vec::new();

    for turn in conversation.turns() {
        match turn {
            Turn::User { text } => {
                push_block(&mut messages, "user", RequestBlock::Text { text: clean_text(text) });
            }
            Turn::Assistant { text, tool_calls } => {
                let text = clean_text(text);
                if !text.is_empty() {
                    push_block(&mut messages, "assistant", RequestBlock::Text { text });
                }
                for call in tool_calls {
                    push_block(
                        &mut messages,
                        "assistant",
                        RequestBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: Value::Object(call.arguments.clone()),
                        },
                    );
                }
            }
            Turn::ToolResult { call_id, result, .. } => {
                push_block(
                    &mut messages,
                    "user",
                    RequestBlock::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: clean_text(&result.model_content()),
                        is_error: !result.success,
                    },
                );
            }
        }
    }

    MessagesRequest {
        model: model.to_string(),
        max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: config.temperature,
        system: config.system_prompt.clone(),
        messages,
        tools: tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.schema.clone(),
            })
            .collect(),
    }
}

pub(crate) fn parse_response(response: MessagesResponse) -> AssistantReply {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ResponseBlock::Text { text } => text_parts.push(text),
            ResponseBlock::ToolUse { id, name, input } => {
                let arguments = match input {
                    Value::Object(map) => map,
                    _ => Default::default(),
                };
                tool_calls.push(ToolCallRequest::new(id, name, arguments));
            }
            ResponseBlock::Other => {}
        }
    }

    AssistantReply {
        text: text_parts.join("\n"),
        tool_calls,
        usage: response.usage.map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
        finish_reason: response.stop_reason,
    }
}

// ============================================================================
// Provider
// ============================================================================

pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).context("Invalid API key format")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));

        Ok(Self {
            client: http_client(timeout, headers)?,
            model: model.to_string(),
            url: API_URL.to_string(),
        })
    }

    /// Point at a different endpoint (proxies, test servers)
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn send(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError> {
        let request = build_request(&self.model, conversation, tools, config);
        tracing::debug!(
            "Anthropic request: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response: MessagesResponse =
            send_json(self.client.post(&self.url).json(&request)).await?;
        Ok(parse_response(response))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Arguments, ToolResult};
    use crate::tools::ToolCapability;
    use serde_json::json;

    fn conversation() -> ConversationState {
        let mut args = Arguments::new();
        args.insert("command".into(), json!("ls"));
        let calls = vec![
            ToolCallRequest::new("toolu_1", "terminal", args.clone()),
            ToolCallRequest::new("toolu_2", "terminal", args),
        ];
        ConversationState::from_turns(vec![
            Turn::user("list files  \n"),
            Turn::assistant("Let me check.", calls.clone()),
            Turn::tool_result(&calls[0], ToolResult::text("a.txt")),
            Turn::tool_result(&calls[1], ToolResult::failure("denied")),
        ])
    }

    #[test]
    fn test_build_request_shape() {
        let tools = vec![ToolDescriptor {
            name: "terminal".into(),
            description: "Run a command".into(),
            schema: json!({"type": "object"}),
            capability: ToolCapability::Local,
        }];
        let config = GenerationConfig {
            system_prompt: Some("be brief".into()),
            max_tokens: None,
            ..GenerationConfig::default()
        };
        let request = build_request("claude-test", &conversation(), &tools, &config);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["content"][0]["text"], "list files");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"][1]["type"], "tool_use");
        assert_eq!(body["messages"][1]["content"][1]["input"]["command"], "ls");

        // Both results merge into a single user message
        let results = &body["messages"][2];
        assert_eq!(results["role"], "user");
        assert_eq!(results["content"].as_array().unwrap().len(), 2);
        assert_eq!(results["content"][1]["is_error"], true);
        assert_eq!(results["content"][1]["content"], "Error: denied");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_parse_response_with_tool_use() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Searching"},
                {"type": "tool_use", "id": "toolu_9", "name": "web_search", "input": {"query": "rust"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        }))
        .unwrap();

        let reply = parse_response(response);
        assert_eq!(reply.text, "Searching");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "toolu_9");
        assert_eq!(reply.tool_calls[0].arguments["query"], "rust");
        assert_eq!(reply.finish_reason.as_deref(), Some("tool_use"));
        assert_eq!(reply.usage.unwrap().output_tokens, 7);
    }

    #[test]
    fn test_parse_ignores_unknown_blocks() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "x"},
                {"type": "text", "text": "done"}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        let reply = parse_response(response);
        assert_eq!(reply.text, "done");
        assert!(reply.tool_calls.is_empty());
    }
}
