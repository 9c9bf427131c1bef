//! MCP (Model Context Protocol) client
//!
//! Connects to servers defined in .mcp.json and exposes their tools through
//! the shared tool registry.

mod client;
mod remote;
mod types;

pub use client::{call_result_to_tool_result, McpClient};
pub use remote::RemoteTool;
pub use types::{remote_tool_name, McpTool, ServerStatus};
