//! Process-wide wiring
//!
//! Loads the tool registry, the optional MCP client and the session store
//! once, then hands out agents that share them.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::agent::{Agent, AgentBuilder, EventSender};
use crate::config::{McpConfig, Settings};
use crate::llm::{create_provider, ProviderKind};
use crate::mcp::{McpClient, ServerStatus};
use crate::session::{open_store, SessionStore};
use crate::tools::{builtin_tools, BrowserTool, SharedRegistry, ToolRegistry};

/// Options for a single agent
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Provider override; the configured (or first keyed) provider otherwise
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Resume or name the session
    pub session_id: Option<String>,
}

pub struct Runtime {
    settings: Settings,
    registry: SharedRegistry,
    mcp: Option<Arc<McpClient>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl Runtime {
    /// Register built-in tools, connect MCP servers when enabled, open the store
    pub async fn start(settings: Settings, enable_mcp: bool) -> Result<Self> {
        let mut registry = ToolRegistry::new();
        for tool in builtin_tools(&settings) {
            registry.register(tool)?;
        }
        let registry = registry.shared();

        let mcp = if enable_mcp || settings.mcp.enabled {
            Some(Self::start_mcp(&settings, registry.clone()).await?)
        } else {
            None
        };

        let store = open_store(&settings.logging).context("Failed to open session store")?;

        tracing::info!(
            "Runtime ready: {} tools, mcp={}, logging={}",
            registry.read().await.len(),
            mcp.is_some(),
            store.is_some()
        );
        Ok(Self {
            settings,
            registry,
            mcp,
            store,
        })
    }

    async fn start_mcp(settings: &Settings, registry: SharedRegistry) -> Result<Arc<McpClient>> {
        let config = McpConfig::browser_defaults(&settings.mcp.browser_server)
            .merged(McpConfig::load()?.unwrap_or_default());

        let client = McpClient::new(config, settings.mcp.clone(), registry.clone());
        let connected = client.connect_all().await;
        let up = connected.values().filter(|ok| **ok).count();
        tracing::info!("MCP: {}/{} servers connected", up, connected.len());

        register_browser(
            &mut *registry.write().await,
            client.clone(),
            &settings.mcp.browser_server,
        );
        Ok(client)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn mcp_client(&self) -> Option<&Arc<McpClient>> {
        self.mcp.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.store.as_ref()
    }

    pub async fn mcp_status(&self) -> BTreeMap<String, ServerStatus> {
        match &self.mcp {
            Some(client) => client.status().await,
            None => BTreeMap::new(),
        }
    }

    /// Build an agent over the shared registry and store
    pub async fn agent(&self, options: AgentOptions, events: Option<EventSender>) -> Result<Agent> {
        let kind = match options.provider {
            Some(kind) => kind,
            None => self.settings.preferred_provider()?,
        };
        let provider = create_provider(kind, options.model.as_deref(), &self.settings)?;

        let mut builder = AgentBuilder::from_settings(&self.settings)
            .with_provider(provider)
            .with_registry(self.registry.clone());
        if let Some(prompt) = &options.system_prompt {
            builder = builder.with_system_prompt(prompt);
        }
        if let Some(client) = &self.mcp {
            builder = builder.with_mcp_client(client.clone());
        }
        if let Some(store) = &self.store {
            builder = builder.with_store(store.clone());
        }
        if let Some(id) = &options.session_id {
            builder = builder.with_session_id(id);
        }
        if let Some(sender) = events {
            builder = builder.with_event_sender(sender);
        }
        builder.build().await
    }

    /// Stop every MCP server process
    pub async fn shutdown(&self) {
        if let Some(client) = &self.mcp {
            client.shutdown().await;
        }
    }
}

/// Add the browser tool unless an MCP server already claimed its name
fn register_browser(registry: &mut ToolRegistry, client: Arc<McpClient>, preferred: &str) {
    if let Err(e) = registry.register(Arc::new(BrowserTool::new(client, preferred))) {
        tracing::warn!("Skipping browser tool: {}", e);
    }
}
