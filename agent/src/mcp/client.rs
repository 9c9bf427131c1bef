//! MCP client with persistent connections
//!
//! Each enabled server from .mcp.json is spawned once as a child process and
//! kept alive for the session. Discovered tools are registered in the shared
//! registry as `<server>_<tool>`. A connection that fails mid-session is
//! dropped and re-established on the next call, with exponential backoff; once
//! the attempts run out the server is marked unavailable and calls fail fast.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::future::join_all;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, RawContent},
    service::{Peer, RunningService},
    transport::TokioChildProcess,
    RoleClient, ServiceError, ServiceExt,
};
use tokio::process::Command;
use tokio::sync::Mutex;

use super::remote::RemoteTool;
use super::types::{remote_tool_name, McpTool, ServerStatus};
use crate::config::{McpConfig, McpServerConfig, McpSettings};
use crate::conversation::{Arguments, ToolResult};
use crate::error::ToolExecutionError;
use crate::tools::SharedRegistry;

// =============================================================================
// Connection state
// =============================================================================

struct Connection {
    service: RunningService<RoleClient, ()>,
    /// Cloneable request handle, used without holding the server lock
    peer: Peer<RoleClient>,
}

struct ServerSlot {
    config: McpServerConfig,
    connection: Option<Connection>,
    status: ServerStatus,
}

/// Backoff before reconnect attempt `attempt` (1-based)
pub(crate) fn reconnect_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Build the child process command, expanding `$VARS` in env values
fn server_command(config: &McpServerConfig) -> Command {
    let mut cmd = Command::new(&config.command);
    if !config.args.is_empty() {
        cmd.args(&config.args);
    }
    for (key, value) in &config.env {
        let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
        cmd.env(key, expanded.as_ref());
    }
    cmd
}

/// Only a broken pipe invalidates the connection; JSON-RPC errors are answers
fn is_transport_failure(err: &ServiceError) -> bool {
    matches!(err, ServiceError::TransportSend(_) | ServiceError::TransportClosed)
}

/// Map an MCP call result onto a [`ToolResult`]
///
/// Text parts are joined by newlines and images become `[image: <mime>]`.
/// Structured content is used only when there is nothing else to show.
pub fn call_result_to_tool_result(result: CallToolResult) -> ToolResult {
    let parts: Vec<String> = result
        .content
        .iter()
        .map(|content| match &content.raw {
            RawContent::Text(t) => t.text.to_string(),
            RawContent::Image(img) => format!("[image: {}]", img.mime_type),
            _ => "[unsupported content]".to_string(),
        })
        .collect();

    let mut tool_result = match (parts.is_empty(), result.structured_content) {
        (true, Some(value)) => ToolResult::structured(value),
        _ => ToolResult::text(parts.join("\n")),
    };

    if result.is_error.unwrap_or(false) {
        tool_result.success = false;
        tool_result.error = Some("MCP tool reported an error".to_string());
    }
    tool_result
}

// =============================================================================
// Client
// =============================================================================

pub struct McpClient {
    me: Weak<McpClient>,
    registry: SharedRegistry,
    settings: McpSettings,
    servers: Mutex<BTreeMap<String, ServerSlot>>,
    /// Serializes reconnects so concurrent failures spawn one process
    reconnect_lock: Mutex<()>,
}

impl McpClient {
    pub fn new(config: McpConfig, settings: McpSettings, registry: SharedRegistry) -> Arc<Self> {
        let servers = config
            .mcp_servers
            .into_iter()
            .map(|(name, config)| {
                let slot = ServerSlot {
                    config,
                    connection: None,
                    status: ServerStatus::Disconnected,
                };
                (name, slot)
            })
            .collect();

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry,
            settings,
            servers: Mutex::new(servers),
            reconnect_lock: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.servers.lock().await.keys().cloned().collect()
    }

    pub async fn enabled_servers(&self) -> Vec<String> {
        self.servers
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| slot.config.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Spawn, handshake and list tools, all bounded by the startup timeout
    async fn start(&self, name: &str, config: &McpServerConfig) -> Result<(Connection, Vec<McpTool>)> {
        tracing::debug!("Starting MCP server: {} ({})", name, config.command);
        let startup_timeout = self.settings.startup_timeout();
        let cmd = server_command(config);

        let service = tokio::time::timeout(startup_timeout, async {
            let transport = TokioChildProcess::new(cmd)
                .with_context(|| format!("Failed to spawn MCP server: {}", name))?;
            let svc = ().serve(transport).await?;
            Ok::<_, anyhow::Error>(svc)
        })
        .await
        .map_err(|_| anyhow!("MCP server '{}' startup timed out after {:?}", name, startup_timeout))??;

        let listed = tokio::time::timeout(startup_timeout, service.list_tools(Default::default()))
            .await
            .map_err(|_| anyhow!("MCP server '{}' did not list tools within {:?}", name, startup_timeout))?;
        let response = match listed {
            Ok(response) => response,
            Err(e) => {
                let _ = service.cancel().await;
                return Err(anyhow!("Failed to list tools from '{}': {}", name, e));
            }
        };

        let tools = response
            .tools
            .into_iter()
            .map(|t| McpTool {
                server: name.to_string(),
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: Some(serde_json::to_value(&t.input_schema).unwrap_or_default()),
            })
            .collect();

        let peer = service.peer().clone();
        Ok((Connection { service, peer }, tools))
    }

    /// Replace this server's registry entries with `tools`
    async fn register_tools(&self, server: &str, tools: Vec<McpTool>) -> usize {
        let mut registry = self.registry.write().await;
        registry.remove_server(server);

        let mut count = 0;
        for tool in tools {
            let remote = RemoteTool::new(tool, self.me.clone());
            match registry.register(Arc::new(remote)) {
                Ok(()) => count += 1,
                Err(e) => tracing::warn!("Skipping tool from '{}': {}", server, e),
            }
        }
        count
    }

    async fn install(&self, server: &str, connection: Connection, tools: Vec<McpTool>) -> usize {
        let count = self.register_tools(server, tools).await;
        let mut servers = self.servers.lock().await;
        if let Some(slot) = servers.get_mut(server) {
            slot.connection = Some(connection);
            slot.status = ServerStatus::Connected { tools: count };
        }
        count
    }

    async fn set_status(&self, server: &str, status: ServerStatus) {
        if let Some(slot) = self.servers.lock().await.get_mut(server) {
            slot.status = status;
        }
    }

    /// Connect to one server and register its tools; returns the tool count
    pub async fn connect(&self, server: &str) -> Result<usize> {
        let config = {
            let servers = self.servers.lock().await;
            let slot = servers
                .get(server)
                .with_context(|| format!("MCP server '{}' not found in config", server))?;
            if let ServerStatus::Connected { tools } = slot.status {
                return Ok(tools);
            }
            slot.config.clone()
        };

        match self.start(server, &config).await {
            Ok((connection, tools)) => {
                let count = self.install(server, connection, tools).await;
                tracing::info!("MCP server '{}': {} tools registered", server, count);
                Ok(count)
            }
            Err(e) => {
                self.set_status(server, ServerStatus::Unavailable { reason: e.to_string() })
                    .await;
                Err(e)
            }
        }
    }

    /// Connect every enabled server concurrently
    ///
    /// One server failing never affects the others.
    pub async fn connect_all(&self) -> BTreeMap<String, bool> {
        let names = self.enabled_servers().await;
        let results = join_all(names.iter().map(|name| self.connect(name))).await;

        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                if let Err(e) = &result {
                    tracing::warn!("Failed to connect MCP server '{}': {:#}", name, e);
                }
                (name, result.is_ok())
            })
            .collect()
    }

    /// Call `tool` on `server` over the live connection
    pub async fn invoke(&self, server: &str, tool: &str, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        let qualified = remote_tool_name(server, tool);
        let peer = self.peer_for(server, &qualified).await?;

        let call_timeout = self.settings.call_timeout();
        let params = CallToolRequestParam {
            name: tool.to_string().into(),
            arguments: Some(args),
            task: None,
        };

        match tokio::time::timeout(call_timeout, peer.call_tool(params)).await {
            Err(_) => Err(ToolExecutionError::Timeout {
                tool: qualified,
                after: call_timeout,
            }),
            Ok(Ok(result)) => Ok(call_result_to_tool_result(result)),
            Ok(Err(e)) if is_transport_failure(&e) => {
                tracing::warn!("MCP call {} failed, dropping connection: {}", qualified, e);
                self.drop_connection(server).await;
                Err(ToolExecutionError::failed(qualified, format!("MCP call failed: {}", e)))
            }
            Ok(Err(e)) => {
                tracing::debug!("MCP call {} rejected by server: {}", qualified, e);
                Err(ToolExecutionError::failed(qualified, format!("MCP call failed: {}", e)))
            }
        }
    }

    async fn peer_for(&self, server: &str, qualified: &str) -> Result<Peer<RoleClient>, ToolExecutionError> {
        {
            let servers = self.servers.lock().await;
            let slot = servers.get(server).ok_or_else(|| {
                ToolExecutionError::failed(qualified, format!("MCP server '{}' not configured", server))
            })?;
            if !slot.config.enabled {
                return Err(ToolExecutionError::failed(
                    qualified,
                    format!("MCP server '{}' is disabled", server),
                ));
            }
            if let ServerStatus::Unavailable { reason } = &slot.status {
                return Err(ToolExecutionError::failed(
                    qualified,
                    format!("MCP server '{}' unavailable: {}", server, reason),
                ));
            }
            if let Some(connection) = &slot.connection {
                return Ok(connection.peer.clone());
            }
        }

        self.reconnect(server)
            .await
            .map_err(|e| ToolExecutionError::failed(qualified, e.to_string()))
    }

    async fn reconnect(&self, server: &str) -> Result<Peer<RoleClient>> {
        let _guard = self.reconnect_lock.lock().await;

        // Another caller may have finished reconnecting while we waited
        let config = {
            let servers = self.servers.lock().await;
            let slot = servers
                .get(server)
                .with_context(|| format!("MCP server '{}' not configured", server))?;
            if let Some(connection) = &slot.connection {
                return Ok(connection.peer.clone());
            }
            if let ServerStatus::Unavailable { reason } = &slot.status {
                return Err(anyhow!("MCP server '{}' unavailable: {}", server, reason));
            }
            slot.config.clone()
        };

        let attempts = self.settings.reconnect_attempts;
        let mut last_error = None;
        for attempt in 1..=attempts {
            tokio::time::sleep(reconnect_delay(self.settings.reconnect_backoff_ms, attempt)).await;
            match self.start(server, &config).await {
                Ok((connection, tools)) => {
                    let peer = connection.peer.clone();
                    let count = self.install(server, connection, tools).await;
                    tracing::info!(
                        "Reconnected MCP server '{}' on attempt {} ({} tools)",
                        server,
                        attempt,
                        count
                    );
                    return Ok(peer);
                }
                Err(e) => {
                    tracing::warn!("Reconnect attempt {}/{} for '{}' failed: {:#}", attempt, attempts, server, e);
                    last_error = Some(e);
                }
            }
        }

        let reason = match last_error {
            Some(e) => format!("gave up after {} reconnect attempts: {}", attempts, e),
            None => "reconnection disabled".to_string(),
        };
        self.set_status(server, ServerStatus::Unavailable { reason: reason.clone() })
            .await;
        Err(anyhow!("MCP server '{}' unavailable: {}", server, reason))
    }

    /// Forget a broken connection; its tools stay registered for the reconnect
    async fn drop_connection(&self, server: &str) {
        let connection = {
            let mut servers = self.servers.lock().await;
            servers.get_mut(server).and_then(|slot| {
                slot.status = ServerStatus::Disconnected;
                slot.connection.take()
            })
        };
        if let Some(connection) = connection {
            if let Err(e) = connection.service.cancel().await {
                tracing::debug!("Error canceling MCP server {}: {}", server, e);
            }
        }
    }

    pub async fn status(&self) -> BTreeMap<String, ServerStatus> {
        self.servers
            .lock()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), slot.status.clone()))
            .collect()
    }

    /// Stop the server and unregister its tools; returns how many were removed
    pub async fn disconnect(&self, server: &str) -> usize {
        self.drop_connection(server).await;
        let removed = self.registry.write().await.remove_server(server);
        tracing::info!("Disconnected MCP server '{}' ({} tools removed)", server, removed);
        removed
    }

    /// Disconnect every server
    pub async fn shutdown(&self) {
        for name in self.server_names().await {
            let connected = self
                .servers
                .lock()
                .await
                .get(&name)
                .is_some_and(|slot| slot.connection.is_some());
            if connected {
                self.disconnect(&name).await;
            }
        }
    }
}
