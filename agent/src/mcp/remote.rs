//! Registry adapter for tools discovered on an MCP server

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::Value;

use super::client::McpClient;
use super::types::McpTool;
use crate::conversation::{Arguments, ToolResult};
use crate::error::ToolExecutionError;
use crate::tools::schema::{clean_schema, empty_object_schema};
use crate::tools::{Tool, ToolCapability};

/// A remote tool registered as `<server>_<tool>`
///
/// Holds a weak handle: the client owns the registry, so a strong one would
/// keep both alive forever.
pub struct RemoteTool {
    qualified: String,
    tool: McpTool,
    schema: Value,
    client: Weak<McpClient>,
}

impl RemoteTool {
    pub fn new(tool: McpTool, client: Weak<McpClient>) -> Self {
        let schema = tool
            .input_schema
            .as_ref()
            .map(clean_schema)
            .filter(|s| s.is_object())
            .unwrap_or_else(empty_object_schema);
        Self {
            qualified: tool.qualified_name(),
            tool,
            schema,
            client,
        }
    }

    pub fn server(&self) -> &str {
        &self.tool.server
    }

    /// Tool name on the server side
    pub fn remote_name(&self) -> &str {
        &self.tool.name
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.qualified
    }

    fn description(&self) -> &str {
        self.tool.description.as_deref().unwrap_or("")
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::Remote {
            server: self.tool.server.clone(),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        let client = self
            .client
            .upgrade()
            .ok_or_else(|| ToolExecutionError::failed(&self.qualified, "MCP client has shut down"))?;
        client.invoke(&self.tool.server, &self.tool.name, args).await
    }
}
