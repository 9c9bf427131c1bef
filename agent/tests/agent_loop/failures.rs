//! Round limit, provider failures, timeouts and cancellation

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use open_agent::agent::{event_channel, AgentBuilder, AgentEvent, AgentState};
use open_agent::conversation::{ConversationState, Turn};
use open_agent::error::{ProviderError, SessionError};
use open_agent::llm::{AssistantReply, GenerationConfig, ModelProvider};
use open_agent::tools::ToolDescriptor;

use super::support::*;

#[tokio::test]
async fn test_max_rounds_exceeded() {
    let looping = (0..5)
        .map(|i| Ok(calls_reply(vec![call(&format!("c{}", i), "sleep", json!({"millis": 1, "label": "again"}))])))
        .collect();
    let provider = ScriptedProvider::new(looping);

    let mut agent = AgentBuilder::new()
        .with_provider(provider.clone())
        .with_registry(registry_with(vec![SleepTool::new()]))
        .with_max_rounds(2)
        .build()
        .await
        .unwrap();

    let err = agent.chat("loop forever").await.unwrap_err();
    assert!(matches!(err, SessionError::MaxRoundsExceeded(2)));
    assert_eq!(agent.state(), AgentState::Failed);
    assert_eq!(provider.requests(), 2);
    // both rounds were answered before giving up
    assert!(agent.history().validate().is_ok());
    assert_eq!(agent.history().len(), 5);
}

#[tokio::test]
async fn test_provider_error_fails_session() {
    let provider = ScriptedProvider::new(vec![Err(ProviderError::Auth("invalid x-api-key".into()))]);
    let (tx, mut rx) = event_channel();

    let mut agent = AgentBuilder::new()
        .with_provider(provider)
        .with_event_sender(tx)
        .build()
        .await
        .unwrap();

    let err = agent.chat("hello").await.unwrap_err();
    assert!(matches!(err, SessionError::Provider(ProviderError::Auth(_))));
    assert_eq!(err.label(), "provider:auth");
    assert_eq!(agent.state(), AgentState::Failed);
    assert_eq!(agent.history().turns(), &[Turn::user("hello")]);

    drop(agent);
    let mut saw_error = false;
    while let Some(event) = rx.recv().await {
        if let AgentEvent::Error { kind, .. } = event {
            assert_eq!(kind, "provider:auth");
            saw_error = true;
        }
    }
    assert!(saw_error);
}

struct Hanging;

#[async_trait]
impl ModelProvider for Hanging {
    async fn send(
        &self,
        _conversation: &ConversationState,
        _tools: &[ToolDescriptor],
        _config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(AssistantReply::default())
    }

    fn name(&self) -> &str {
        "hanging"
    }

    fn model(&self) -> &str {
        "never"
    }
}

#[tokio::test]
async fn test_model_timeout_is_transport_error() {
    let config = GenerationConfig {
        timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let mut agent = AgentBuilder::new()
        .with_provider(Arc::new(Hanging))
        .with_generation_config(config)
        .build()
        .await
        .unwrap();

    let err = agent.chat("anyone there?").await.unwrap_err();
    assert!(matches!(err, SessionError::Provider(ProviderError::Transport(_))));
}

#[tokio::test]
async fn test_cancel_during_tools_fills_results() {
    let provider = ScriptedProvider::new(vec![Ok(calls_reply(vec![
        call("long", "sleep", json!({"millis": 10_000, "label": "late"})),
        call("short", "sleep", json!({"millis": 1, "label": "early"})),
    ]))]);

    let mut agent = AgentBuilder::new()
        .with_provider(provider)
        .with_registry(registry_with(vec![SleepTool::new()]))
        .build()
        .await
        .unwrap();

    let token = agent.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let started = Instant::now();
    let err = agent.chat("slow work").await.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));

    let history = agent.history();
    assert!(history.validate().is_ok());
    assert!(history.pending_calls().is_empty());
    let cancelled = history
        .turns()
        .iter()
        .filter(|t| matches!(t, Turn::ToolResult { result, .. } if result.error.as_deref() == Some("cancelled")))
        .count();
    assert_eq!(cancelled, 2);

    // the next request gets a fresh token
    let outcome = agent.chat("carry on").await.unwrap();
    assert_eq!(outcome.text, "done");
}

#[tokio::test]
async fn test_events_follow_the_loop() {
    let provider = ScriptedProvider::new(vec![
        Ok(calls_reply(vec![call("c1", "sleep", json!({"millis": 1, "label": "x"}))])),
        Ok(text_reply("finished")),
    ]);
    let (tx, mut rx) = event_channel();

    let mut agent = AgentBuilder::new()
        .with_provider(provider)
        .with_registry(registry_with(vec![SleepTool::new()]))
        .with_event_sender(tx)
        .build()
        .await
        .unwrap();
    agent.chat("go").await.unwrap();
    drop(agent);

    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
    }
    assert_eq!(
        kinds,
        vec!["processing_start", "iteration", "tool_start", "tool_complete", "response_complete"]
    );
}
