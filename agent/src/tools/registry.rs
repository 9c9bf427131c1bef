//! Tool registry
//!
//! Name-keyed, insertion-ordered set of tools. Local tools are registered at
//! startup; the MCP client adds remote tools as servers connect and removes
//! them again on disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Tool, ToolDescriptor};
use crate::error::RegistryError;

/// Registry shared between agents and the MCP client
pub type SharedRegistry = Arc<RwLock<ToolRegistry>>;

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into the shared form used by agents
    pub fn shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        tracing::debug!("Registered tool '{}' ({})", name, tool.capability());
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.tools[i]))
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in registration order
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn remove(&mut self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        let idx = self
            .index
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;
        let tool = self.tools.remove(idx);
        self.reindex();
        Ok(tool)
    }

    /// Drop every tool backed by the given MCP server, returning how many went
    pub fn remove_server(&mut self, server: &str) -> usize {
        let before = self.tools.len();
        self.tools
            .retain(|t| t.capability().server() != Some(server));
        let removed = before - self.tools.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }

    fn reindex(&mut self) {
        self.index = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
    }
}
