//! AgentBuilder - builder pattern for Agent construction
//!
//! # Example
//!
//! ```rust,ignore
//! use open_agent::agent::AgentBuilder;
//!
//! let agent = AgentBuilder::from_settings(&settings)
//!     .with_provider(provider)
//!     .with_registry(registry)
//!     .with_system_prompt("You are a helpful assistant.")
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::conversation::ConversationState;
use crate::llm::{GenerationConfig, ModelProvider};
use crate::mcp::McpClient;
use crate::session::{new_session_id, next_seq, replay, SessionStore};
use crate::tools::{SharedRegistry, ToolRegistry};

use super::{Agent, AgentEventSender, AgentState, EventSender, DEFAULT_MAX_ROUNDS, DEFAULT_TOOL_TIMEOUT_SECS};

pub struct AgentBuilder {
    provider: Option<Arc<dyn ModelProvider>>,
    registry: Option<SharedRegistry>,
    mcp: Option<Arc<McpClient>>,
    config: GenerationConfig,
    max_rounds: usize,
    tool_timeout_secs: u64,
    store: Option<Arc<dyn SessionStore>>,
    session_id: Option<String>,
    event_sender: Option<EventSender>,
    cancel: Option<CancellationToken>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            registry: None,
            mcp: None,
            config: GenerationConfig::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            store: None,
            session_id: None,
            event_sender: None,
            cancel: None,
        }
    }

    /// Round limit, timeouts and generation parameters from settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .with_generation_config(GenerationConfig::from_settings(settings))
            .with_max_rounds(settings.agent.max_rounds)
            .with_tool_timeout_secs(settings.agent.tool_timeout_secs)
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Keep the MCP client alive alongside the agent
    pub fn with_mcp_client(mut self, client: Arc<McpClient>) -> Self {
        self.mcp = Some(client);
        self
    }

    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.config.system_prompt = Some(prompt.to_string());
        self
    }

    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max;
        self
    }

    pub fn with_tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this session id; an existing logged session is resumed
    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build the Agent
    ///
    /// Returns an error if no provider is set, or if a resumed session log
    /// does not pair every tool call with a result.
    pub async fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .context("AgentBuilder: provider is required - use .with_provider(...)")?;
        if self.max_rounds == 0 {
            anyhow::bail!("AgentBuilder: max_rounds must be at least 1");
        }

        let session_id = self.session_id.unwrap_or_else(new_session_id);
        let (conversation, seq) = match &self.store {
            Some(store) if store.list_sessions()?.contains(&session_id) => {
                let records = store.load(&session_id)?;
                let conversation = replay(&records);
                conversation
                    .validate()
                    .with_context(|| format!("Session {} cannot be resumed", session_id))?;
                tracing::info!("Resumed session {} ({} turns)", session_id, conversation.len());
                (conversation, next_seq(&records))
            }
            _ => (ConversationState::new(), 0),
        };

        Ok(Agent {
            provider,
            registry: self.registry.unwrap_or_else(|| ToolRegistry::new().shared()),
            mcp: self.mcp,
            config: self.config,
            max_rounds: self.max_rounds,
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            conversation,
            state: AgentState::AwaitingUserInput,
            session_id,
            next_seq: seq,
            store: self.store,
            events: self.event_sender.map(AgentEventSender::new).unwrap_or_default(),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::error::ProviderError;
    use crate::llm::AssistantReply;
    use crate::session::{JsonlSessionStore, SessionRecord};
    use crate::tools::ToolDescriptor;
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl ModelProvider for Silent {
        async fn send(
            &self,
            _conversation: &ConversationState,
            _tools: &[ToolDescriptor],
            _config: &GenerationConfig,
        ) -> Result<AssistantReply, ProviderError> {
            Ok(AssistantReply::default())
        }
        fn name(&self) -> &str {
            "silent"
        }
        fn model(&self) -> &str {
            "none"
        }
    }

    #[test]
    fn test_builder_defaults() {
        let builder = AgentBuilder::new();
        assert_eq!(builder.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(builder.tool_timeout_secs, DEFAULT_TOOL_TIMEOUT_SECS);
    }

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.agent.max_rounds = 4;
        settings.agent.system_prompt = Some("be brief".into());
        let builder = AgentBuilder::from_settings(&settings);
        assert_eq!(builder.max_rounds, 4);
        assert_eq!(builder.config.system_prompt.as_deref(), Some("be brief"));
    }

    #[tokio::test]
    async fn test_builder_requires_provider() {
        match AgentBuilder::new().build().await {
            Ok(_) => panic!("Expected error when provider not set"),
            Err(e) => assert!(e.to_string().contains("provider is required")),
        }
    }

    #[tokio::test]
    async fn test_builder_creates_agent() {
        let agent = AgentBuilder::new()
            .with_provider(Arc::new(Silent))
            .with_system_prompt("Test")
            .build()
            .await
            .unwrap();
        assert_eq!(agent.model(), "none");
        assert_eq!(agent.system_prompt(), Some("Test"));
        assert_eq!(agent.state(), AgentState::AwaitingUserInput);
        assert!(agent.session_id().starts_with("session_"));
    }

    #[tokio::test]
    async fn test_resume_logged_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlSessionStore::new(dir.path()).unwrap());
        store
            .record(&SessionRecord::for_turn("session_x", 0, "silent", "none", Turn::user("hi")))
            .unwrap();
        store
            .record(&SessionRecord::for_turn("session_x", 1, "silent", "none", Turn::assistant("hello", vec![])))
            .unwrap();

        let agent = AgentBuilder::new()
            .with_provider(Arc::new(Silent))
            .with_store(store)
            .with_session_id("session_x")
            .build()
            .await
            .unwrap();
        assert_eq!(agent.history().len(), 2);
        assert_eq!(agent.next_seq, 2);
    }
}
