//! Tool abstraction and dispatch
//!
//! A tool is anything the model can call by name: local built-ins (terminal,
//! code execution, web search/content) and remote MCP tools both implement
//! [`Tool`] and live side by side in the [`ToolRegistry`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::conversation::{Arguments, ToolCallRequest, ToolResult};
use crate::error::ToolExecutionError;

pub mod browser;
pub mod code_execution;
pub mod registry;
pub mod schema;
pub mod terminal;
pub mod web_content;
pub mod web_search;

pub use browser::BrowserTool;
pub use code_execution::CodeExecutionTool;
pub use registry::{SharedRegistry, ToolRegistry};
pub use terminal::TerminalTool;
pub use web_content::WebContentTool;
pub use web_search::{ExaClient, WebSearchTool};

// ============================================================================
// Tool Trait
// ============================================================================

/// Where a tool runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolCapability {
    Local,
    Remote { server: String },
}

impl ToolCapability {
    /// Backing MCP server, if remote
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Remote { server } => Some(server),
        }
    }
}

impl fmt::Display for ToolCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote { server } => write!(f, "remote:{}", server),
        }
    }
}

/// What the model (and the CLI) sees of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: Value,
    pub capability: ToolCapability,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the argument object
    fn schema(&self) -> Value;

    fn capability(&self) -> ToolCapability {
        ToolCapability::Local
    }

    /// Run the tool. Arguments have already been checked against `schema()`.
    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.schema(),
            capability: self.capability(),
        }
    }
}

// ============================================================================
// Helpers for tool implementations
// ============================================================================

/// Deserialize an argument object into a typed parameter struct
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Arguments) -> Result<T, ToolExecutionError> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| ToolExecutionError::invalid(tool, e.to_string()))
}

/// JSON schema for a parameter struct, with nested types inlined
pub fn schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::generate::SchemaSettings::draft2020_12()
        .with(|s| s.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<T>();
    serde_json::to_value(&schema).unwrap_or_else(|_| schema::empty_object_schema())
}

/// Local tools enabled by the given settings, in registration order
pub fn builtin_tools(settings: &Settings) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

    // registered even when disabled so the model gets an explicit refusal
    tools.push(Arc::new(CodeExecutionTool::new(
        settings.code_execution.clone(),
        settings.terminal.working_dir.clone(),
    )));
    tools.push(Arc::new(TerminalTool::new(settings.terminal.clone())));

    let exa = ExaClient::new(&settings.web, settings.keys.exa.clone());
    tools.push(Arc::new(WebSearchTool::new(exa.clone(), settings.web.clone())));
    tools.push(Arc::new(WebContentTool::new(exa)));

    tools
}

// ============================================================================
// Dispatch
// ============================================================================

/// Resolve, validate and run one call, bounded by `timeout`
pub async fn invoke(
    registry: &SharedRegistry,
    call: &ToolCallRequest,
    timeout: Duration,
) -> Result<ToolResult, ToolExecutionError> {
    // Hold the read lock only long enough to clone the Arc
    let tool = registry.read().await.lookup(&call.name)?;

    schema::validate_arguments(&tool.schema(), &call.arguments)
        .map_err(|reason| ToolExecutionError::invalid(&call.name, reason))?;

    tokio::time::timeout(timeout, tool.execute(call.arguments.clone()))
        .await
        .map_err(|_| ToolExecutionError::Timeout {
            tool: call.name.clone(),
            after: timeout,
        })?
}

/// Like [`invoke`], but folds every error into a failed [`ToolResult`]
pub async fn dispatch(registry: &SharedRegistry, call: &ToolCallRequest, timeout: Duration) -> ToolResult {
    match invoke(registry, call, timeout).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!("Tool call {} ({}) failed: {}", call.id, call.name, err);
            ToolResult::from_error(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoParams {
        /// Text to echo back
        text: String,
    }

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo text"
        }
        fn schema(&self) -> Value {
            schema_for::<EchoParams>()
        }
        async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let params: EchoParams = parse_args(self.name(), args)?;
            Ok(ToolResult::text(params.text))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Sleeps"
        }
        fn schema(&self) -> Value {
            schema::empty_object_schema()
        }
        async fn execute(&self, _args: Arguments) -> Result<ToolResult, ToolExecutionError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::text("late"))
        }
    }

    fn call(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new("c1", name, args.as_object().cloned().unwrap_or_default())
    }

    fn registry_with(echo: Arc<Echo>) -> SharedRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(echo).unwrap();
        registry.register(Arc::new(Sleepy)).unwrap();
        registry.shared()
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(ToolCapability::Local.to_string(), "local");
        let remote = ToolCapability::Remote {
            server: "puppeteer".into(),
        };
        assert_eq!(remote.to_string(), "remote:puppeteer");
        assert_eq!(remote.server(), Some("puppeteer"));
    }

    #[test]
    fn test_schema_for_marks_required() {
        let schema = schema_for::<EchoParams>();
        assert_eq!(schema["required"], json!(["text"]));
        assert_eq!(schema["properties"]["text"]["type"], "string");
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with(echo.clone());
        let result = dispatch(&registry, &call("echo", json!({"text": "hi"})), Duration::from_secs(1)).await;
        assert!(result.success);
        assert_eq!(result.model_content(), "hi");
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_tool() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with(echo.clone());
        let err = invoke(&registry, &call("echo", json!({"text": 7})), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutionError::InvalidArguments { .. }));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new().shared();
        let result = dispatch(&registry, &call("ghost", json!({})), Duration::from_secs(1)).await;
        assert!(!result.success);
        assert_eq!(result.metadata.unwrap()["error_kind"], "unknown_tool");
    }

    #[tokio::test]
    async fn test_timeout() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with(echo);
        let err = invoke(&registry, &call("sleepy", json!({})), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_repeated_calls_keep_result_shape() {
        let registry = registry_with(Arc::new(Echo {
            calls: AtomicUsize::new(0),
        }));
        let shape = |r: &ToolResult| {
            (
                r.success,
                r.error.is_some(),
                r.metadata.as_ref().and_then(|m| m.get("error_kind")).cloned(),
            )
        };

        for args in [json!({"text": "same"}), json!({"text": 1}), json!({})] {
            let first = dispatch(&registry, &call("echo", args.clone()), Duration::from_secs(1)).await;
            let second = dispatch(&registry, &call("echo", args), Duration::from_secs(1)).await;
            assert_eq!(shape(&first), shape(&second));
        }
    }
}
