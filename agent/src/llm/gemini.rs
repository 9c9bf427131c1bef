//! Google Gemini generateContent adapter
//!
//! Gemini assigns no ids to function calls and matches responses by name, so
//! ids are synthesized on receipt and dropped again when sending.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    clean_text, http_client, send_json, synthesize_call_id, AssistantReply, GenerationConfig, ModelProvider, Usage,
};
use crate::conversation::{ConversationState, ToolCallRequest, Turn};
use crate::error::ProviderError;
use crate::tools::schema::clean_schema;
use crate::tools::ToolDescriptor;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Schema keywords Gemini's OpenAPI subset accepts
const SCHEMA_KEYS: [&str; 7] = ["type", "description", "enum", "properties", "required", "items", "nullable"];

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolGroup>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolGroup {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

// ============================================================================
// Translation
// ============================================================================

/// Reduce a JSON schema to the keywords Gemini accepts
///
/// Returns `None` for object schemas without properties, which Gemini
/// rejects outright.
pub(crate) fn gemini_schema(schema: &Value) -> Option<Value> {
    let cleaned = filter_schema(&clean_schema(schema));
    let has_props = cleaned
        .get("properties")
        .and_then(Value::as_object)
        .map(|p| !p.is_empty())
        .unwrap_or(false);
    has_props.then_some(cleaned)
}

fn filter_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        if !SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match (key.as_str(), value) {
            ("properties", Value::Object(props)) => Value::Object(
                props
                    .iter()
                    .map(|(name, prop)| (name.clone(), filter_schema(prop)))
                    .collect(),
            ),
            ("items", items) => filter_schema(items),
            // remaining type arrays carry null; Gemini wants a single type plus `nullable`
            ("type", Value::Array(types)) => {
                let first = types
                    .iter()
                    .find(|t| t.as_str() != Some("null"))
                    .cloned()
                    .unwrap_or_else(|| Value::String("string".into()));
                if types.iter().any(|t| t.as_str() == Some("null")) {
                    out.insert("nullable".into(), Value::Bool(true));
                }
                first
            }
            _ => value.clone(),
        };
        out.insert(key.clone(), value);
    }
    Value::Object(out)
}

fn push_part(contents: &mut Vec<Content>, role: &str, part: Part) {
    match contents.last_mut() {
        Some(last) if last.role == role => last.parts.push(part),
        _ => contents.push(Content {
            role: role.to_string(),
            parts: vec![part],
        }),
    }
}

pub(crate) fn build_request(
    conversation: &ConversationState,
    tools: &[ToolDescriptor],
    config: &GenerationConfig,
) -> GenerateRequest {
    let mut contents: Vec<Content> = Vec::new();

    for turn in conversation.turns() {
        match turn {
            Turn::User { text } => push_part(
                &mut contents,
                "user",
                Part {
                    text: Some(clean_text(text)),
                    ..Part::default()
                },
            ),
            Turn::Assistant { text, tool_calls } => {
                let text = clean_text(text);
                if !text.is_empty() {
                    push_part(
                        &mut contents,
                        "model",
                        Part {
                            text: Some(text),
                            ..Part::default()
                        },
                    );
                }
                for call in tool_calls {
                    push_part(
                        &mut contents,
                        "model",
                        Part {
                            function_call: Some(FunctionCall {
                                name: call.name.clone(),
                                args: Value::Object(call.arguments.clone()),
                            }),
                            ..Part::default()
                        },
                    );
                }
            }
            Turn::ToolResult { tool_name, result, .. } => {
                let response = if result.success {
                    serde_json::json!({ "name": tool_name, "content": clean_text(&result.model_content()) })
                } else {
                    serde_json::json!({ "name": tool_name, "error": clean_text(&result.model_content()) })
                };
                push_part(
                    &mut contents,
                    "user",
                    Part {
                        function_response: Some(FunctionResponse {
                            name: tool_name.clone(),
                            response,
                        }),
                        ..Part::default()
                    },
                );
            }
        }
    }

    let declarations: Vec<FunctionDeclaration> = tools
        .iter()
        .map(|t| FunctionDeclaration {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: gemini_schema(&t.schema),
        })
        .collect();

    GenerateRequest {
        contents,
        system_instruction: config.system_prompt.as_ref().map(|prompt| SystemInstruction {
            parts: vec![Part {
                text: Some(prompt.clone()),
                ..Part::default()
            }],
        }),
        tools: if declarations.is_empty() {
            Vec::new()
        } else {
            vec![ToolGroup {
                function_declarations: declarations,
            }]
        },
        generation_config: WireGenerationConfig {
            temperature: config.temperature,
            max_output_tokens: config.max_tokens,
        },
    }
}

/// Map a response to a reply; a prompt blocked before any candidate is an error
pub(crate) fn parse_response(response: GenerateResponse) -> Result<AssistantReply, ProviderError> {
    let usage = response.usage_metadata.map(|u| Usage {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
    });

    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "NO_CANDIDATES".to_string());
        tracing::warn!("Gemini returned no candidates: {}", reason);
        return Err(ProviderError::MalformedRequest(format!(
            "Gemini returned no candidates (block reason: {})",
            reason
        )));
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            text_parts.push(text);
        }
        if let Some(call) = part.function_call {
            let arguments = match call.args {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            tool_calls.push(ToolCallRequest::new(synthesize_call_id(), call.name, arguments));
        }
    }

    if let Some(reason) = &candidate.finish_reason {
        if reason != "STOP" {
            tracing::warn!("Gemini generation finish reason: {}", reason);
        }
    }

    Ok(AssistantReply {
        text: text_parts.join(""),
        tool_calls,
        usage,
        finish_reason: candidate.finish_reason,
    })
}

// ============================================================================
// Provider
// ============================================================================

pub struct GeminiProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("Gemini API key cannot be empty");
        }
        // header auth keeps the key out of URLs, and so out of error messages
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key).context("Invalid API key format")?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);
        Ok(Self {
            client: http_client(timeout, headers)?,
            model: model.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    fn api_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn send(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError> {
        let request = build_request(conversation, tools, config);
        tracing::debug!("Gemini request: {} contents, {} tools", request.contents.len(), tools.len());

        let response: GenerateResponse = send_json(
            self.client.post(self.api_url()).json(&request),
        )
        .await?;
        parse_response(response)
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
