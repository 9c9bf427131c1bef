//! MCP type definitions
//!
//! Shared types used by the client and the remote tool wrapper.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A tool from an MCP server
#[derive(Debug, Clone)]
pub struct McpTool {
    /// Server this tool belongs to
    pub server: String,
    /// Tool name as the server knows it
    pub name: String,
    pub description: Option<String>,
    /// Input schema (JSON)
    pub input_schema: Option<Value>,
}

impl McpTool {
    /// Name under which the tool is registered locally
    pub fn qualified_name(&self) -> String {
        remote_tool_name(&self.server, &self.name)
    }
}

/// `<server>_<tool>`
pub fn remote_tool_name(server: &str, tool: &str) -> String {
    format!("{}_{}", server, tool)
}

/// Connection state of one configured server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServerStatus {
    Connected { tools: usize },
    /// Gave up on this server for the rest of the session
    Unavailable { reason: String },
    Disconnected,
}

impl ServerStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { tools } => write!(f, "connected ({} tools)", tools),
            Self::Unavailable { reason } => write!(f, "unavailable: {}", reason),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        let tool = McpTool {
            server: "puppeteer".into(),
            name: "navigate".into(),
            description: None,
            input_schema: None,
        };
        assert_eq!(tool.qualified_name(), "puppeteer_navigate");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(ServerStatus::Connected { tools: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "connected", "tools": 4}));
        assert_eq!(ServerStatus::Disconnected.to_string(), "disconnected");
        assert!(!ServerStatus::Unavailable { reason: "x".into() }.is_connected());
    }
}
