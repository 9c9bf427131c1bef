//! Browser automation tool
//!
//! A single `browser_automation` tool in front of whichever browser MCP
//! server is connected. Each action maps to the server's `<server>_<action>`
//! tool with camelCase arguments.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, schema_for, Tool};
use crate::config::BROWSER_SERVERS;
use crate::conversation::{Arguments, ToolResult};
use crate::error::ToolExecutionError;
use crate::mcp::{remote_tool_name, McpClient};

const NAME: &str = "browser_automation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate,
    Click,
    Type,
    Screenshot,
    Wait,
    GetPageContent,
    FindElement,
    Scroll,
    Back,
    Forward,
    Refresh,
    Close,
}

impl BrowserAction {
    pub const ALL: [BrowserAction; 12] = [
        Self::Navigate,
        Self::Click,
        Self::Type,
        Self::Screenshot,
        Self::Wait,
        Self::GetPageContent,
        Self::FindElement,
        Self::Scroll,
        Self::Back,
        Self::Forward,
        Self::Refresh,
        Self::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::Type => "type",
            Self::Screenshot => "screenshot",
            Self::Wait => "wait",
            Self::GetPageContent => "get_page_content",
            Self::FindElement => "find_element",
            Self::Scroll => "scroll",
            Self::Back => "back",
            Self::Forward => "forward",
            Self::Refresh => "refresh",
            Self::Close => "close",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BrowserParams {
    #[schemars(description = "Browser action to perform")]
    pub action: BrowserAction,

    #[schemars(description = "URL to navigate to")]
    #[serde(default)]
    pub url: Option<String>,

    #[schemars(description = "CSS selector for element interaction")]
    #[serde(default)]
    pub selector: Option<String>,

    #[schemars(description = "Text to type")]
    #[serde(default)]
    pub text: Option<String>,

    #[schemars(description = "Element or condition to wait for")]
    #[serde(default)]
    pub wait_for: Option<String>,

    #[schemars(description = "Capture the full page in screenshots")]
    #[serde(default)]
    pub full_page: Option<bool>,

    #[schemars(description = "Scroll direction (up or down)")]
    #[serde(default)]
    pub direction: Option<String>,

    #[schemars(description = "Scroll amount in pixels")]
    #[serde(default)]
    pub amount: Option<i64>,

    #[schemars(description = "Wait timeout in milliseconds")]
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn require<'a>(value: &'a Option<String>, field: &str, action: BrowserAction) -> Result<&'a str, ToolExecutionError> {
    value.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
        ToolExecutionError::invalid(NAME, format!("'{}' is required for action '{}'", field, action.as_str()))
    })
}

/// Arguments for the server-side tool backing `params.action`
pub fn action_arguments(params: &BrowserParams) -> Result<Arguments, ToolExecutionError> {
    let action = params.action;
    let mut args = Arguments::new();

    match action {
        BrowserAction::Navigate => {
            args.insert("url".into(), json!(require(&params.url, "url", action)?));
            if let Some(wait_for) = &params.wait_for {
                args.insert("waitFor".into(), json!(wait_for));
            }
        }
        BrowserAction::Click => {
            args.insert("selector".into(), json!(require(&params.selector, "selector", action)?));
            if let Some(wait_for) = &params.wait_for {
                args.insert("waitFor".into(), json!(wait_for));
            }
        }
        BrowserAction::Type => {
            args.insert("selector".into(), json!(require(&params.selector, "selector", action)?));
            args.insert("text".into(), json!(require(&params.text, "text", action)?));
        }
        BrowserAction::Screenshot => {
            if let Some(selector) = &params.selector {
                args.insert("selector".into(), json!(selector));
            }
            if params.full_page == Some(true) {
                args.insert("fullPage".into(), json!(true));
            }
        }
        BrowserAction::Wait => {
            let target = params.wait_for.clone().or_else(|| params.selector.clone());
            args.insert("selector".into(), json!(require(&target, "wait_for", action)?));
            if let Some(timeout) = params.timeout {
                args.insert("timeout".into(), json!(timeout));
            }
        }
        BrowserAction::GetPageContent => {
            if let Some(selector) = &params.selector {
                args.insert("selector".into(), json!(selector));
            }
        }
        BrowserAction::FindElement => {
            args.insert("selector".into(), json!(require(&params.selector, "selector", action)?));
        }
        BrowserAction::Scroll => {
            if let Some(selector) = &params.selector {
                args.insert("selector".into(), json!(selector));
            }
            if let Some(direction) = &params.direction {
                args.insert("direction".into(), json!(direction));
            }
            if let Some(amount) = params.amount {
                args.insert("amount".into(), json!(amount));
            }
        }
        BrowserAction::Back | BrowserAction::Forward | BrowserAction::Refresh | BrowserAction::Close => {}
    }

    Ok(args)
}

pub struct BrowserTool {
    client: Arc<McpClient>,
    /// Browser servers in order of preference
    candidates: Vec<String>,
}

impl BrowserTool {
    pub fn new(client: Arc<McpClient>, preferred: &str) -> Self {
        let mut candidates = vec![preferred.to_string()];
        candidates.extend(
            BROWSER_SERVERS
                .iter()
                .filter(|s| **s != preferred)
                .map(|s| s.to_string()),
        );
        Self { client, candidates }
    }

    /// First connected candidate, connecting enabled ones in order if needed
    async fn active_server(&self) -> Option<String> {
        let status = self.client.status().await;
        if let Some(server) = self
            .candidates
            .iter()
            .find(|c| status.get(*c).is_some_and(|s| s.is_connected()))
        {
            return Some(server.clone());
        }

        let enabled = self.client.enabled_servers().await;
        for candidate in self.candidates.iter().filter(|c| enabled.contains(c)) {
            match self.client.connect(candidate).await {
                Ok(_) => {
                    tracing::info!("Connected to browser server: {}", candidate);
                    return Some(candidate.clone());
                }
                Err(e) => tracing::warn!("Browser server '{}' unavailable: {:#}", candidate, e),
            }
        }
        None
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Browser automation tool using MCP server for web navigation, screenshots, clicking, typing, and more"
    }

    fn schema(&self) -> Value {
        schema_for::<BrowserParams>()
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        let params: BrowserParams = parse_args(NAME, args)?;
        let arguments = action_arguments(&params)?;

        let Some(server) = self.active_server().await else {
            return Ok(ToolResult::failure("Browser MCP server not available"));
        };

        let action = params.action.as_str();
        let result = self.client.invoke(&server, action, arguments).await?;
        Ok(result.with_metadata(json!({
            "action": action,
            "server": server,
            "tool": remote_tool_name(&server, action),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{McpConfig, McpSettings};
    use crate::tools::ToolRegistry;

    fn params(value: Value) -> BrowserParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_navigate_arguments() {
        let args = action_arguments(&params(json!({
            "action": "navigate",
            "url": "https://example.com",
            "wait_for": "#main"
        })))
        .unwrap();
        assert_eq!(Value::Object(args), json!({"url": "https://example.com", "waitFor": "#main"}));
    }

    #[test]
    fn test_missing_required_field() {
        let err = action_arguments(&params(json!({"action": "type", "selector": "#q"}))).unwrap_err();
        assert!(matches!(err, ToolExecutionError::InvalidArguments { .. }));
        assert!(err.to_string().contains("'text'"));
    }

    #[test]
    fn test_wait_falls_back_to_selector() {
        let args = action_arguments(&params(json!({"action": "wait", "selector": ".x", "timeout": 500}))).unwrap();
        assert_eq!(Value::Object(args), json!({"selector": ".x", "timeout": 500}));
    }

    #[test]
    fn test_screenshot_and_bare_actions() {
        let args = action_arguments(&params(json!({"action": "screenshot", "full_page": true}))).unwrap();
        assert_eq!(Value::Object(args), json!({"fullPage": true}));
        for action in ["back", "forward", "refresh", "close"] {
            assert!(action_arguments(&params(json!({"action": action}))).unwrap().is_empty());
        }
    }

    #[test]
    fn test_action_names_round_trip_through_serde() {
        for action in BrowserAction::ALL {
            let parsed: BrowserAction = serde_json::from_value(json!(action.as_str())).unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn test_schema_rejects_unknown_action() {
        let client = McpClient::new(McpConfig::default(), McpSettings::default(), ToolRegistry::new().shared());
        let tool = BrowserTool::new(client, "puppeteer");
        let args = json!({"action": "teleport"}).as_object().cloned().unwrap();
        assert!(crate::tools::schema::validate_arguments(&tool.schema(), &args).is_err());
        assert_eq!(tool.candidates[0], "puppeteer");
        assert_eq!(tool.candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_no_server_is_failed_result() {
        let client = McpClient::new(McpConfig::default(), McpSettings::default(), ToolRegistry::new().shared());
        let tool = BrowserTool::new(client, "browser_use");
        let result = tool
            .execute(json!({"action": "back"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Browser MCP server not available"));
    }
}
