//! Call/result pairing across tool rounds

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use serde_json::json;

use open_agent::agent::{AgentBuilder, AgentState};
use open_agent::conversation::Turn;

use super::support::*;

#[tokio::test]
async fn test_tool_round_keeps_pairing() {
    let provider = ScriptedProvider::new(vec![
        Ok(calls_reply(vec![call("c1", "sleep", json!({"millis": 1, "label": "first"}))])),
        Ok(text_reply("thinking <final>all set</final>")),
    ]);
    let sleep = SleepTool::new();

    let mut agent = AgentBuilder::new()
        .with_provider(provider.clone())
        .with_registry(registry_with(vec![sleep.clone()]))
        .build()
        .await
        .unwrap();

    let outcome = agent.chat("go").await.unwrap();
    assert_eq!(outcome.text, "all set");
    assert_eq!(outcome.rounds, 2);
    assert_eq!(agent.state(), AgentState::Done);
    assert_eq!(sleep.calls.load(Ordering::SeqCst), 1);

    // user, assistant(call), tool_result, assistant(final)
    let history = agent.history();
    assert_eq!(history.len(), 4);
    assert!(history.validate().is_ok());
    assert!(history.pending_calls().is_empty());
    match &history.turns()[2] {
        Turn::ToolResult { call_id, result, .. } => {
            assert_eq!(call_id, "c1");
            assert_eq!(result.model_content(), "first");
        }
        other => panic!("expected tool result, got {:?}", other),
    }

    // the second request saw the tool result
    assert_eq!(*provider.seen.lock().unwrap(), vec![1, 3]);
    assert_eq!(provider.tools_offered.lock().unwrap()[0], vec!["sleep".to_string()]);
}

#[tokio::test]
async fn test_concurrent_calls_answer_in_request_order() {
    let provider = ScriptedProvider::new(vec![Ok(calls_reply(vec![
        call("slow", "sleep", json!({"millis": 300, "label": "slow"})),
        call("fast", "sleep", json!({"millis": 10, "label": "fast"})),
        call("mid", "sleep", json!({"millis": 150, "label": "mid"})),
    ]))]);

    let mut agent = AgentBuilder::new()
        .with_provider(provider)
        .with_registry(registry_with(vec![SleepTool::new()]))
        .build()
        .await
        .unwrap();

    let started = Instant::now();
    agent.chat("race").await.unwrap();
    // run together, not back to back
    assert!(started.elapsed() < Duration::from_millis(450));

    let ids: Vec<&str> = agent
        .history()
        .turns()
        .iter()
        .filter_map(|t| match t {
            Turn::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec!["slow", "fast", "mid"]);
    assert!(agent.history().validate().is_ok());
}

#[tokio::test]
async fn test_failed_and_unknown_tools_become_results() {
    let provider = ScriptedProvider::new(vec![Ok(calls_reply(vec![
        call("a", "broken", json!({})),
        call("b", "no_such_tool", json!({})),
        call("c", "sleep", json!({"label": "missing millis"})),
        call("d", "sleep", json!({"millis": 1, "label": "fine"})),
    ]))]);

    let mut agent = AgentBuilder::new()
        .with_provider(provider)
        .with_registry(registry_with(vec![SleepTool::new(), std::sync::Arc::new(BrokenTool)]))
        .build()
        .await
        .unwrap();

    let outcome = agent.chat("try everything").await.unwrap();
    assert_eq!(outcome.text, "done");

    let results: Vec<_> = agent
        .history()
        .turns()
        .iter()
        .filter_map(|t| match t {
            Turn::ToolResult { result, .. } => Some(result.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 4);

    let kinds: Vec<Option<String>> = results
        .iter()
        .map(|r| {
            r.metadata
                .as_ref()
                .and_then(|m| m.get("error_kind"))
                .and_then(|k| k.as_str())
                .map(str::to_string)
        })
        .collect();
    assert!(!results[0].success);
    assert!(!results[1].success);
    assert!(!results[2].success);
    assert!(results[3].success);
    assert_eq!(kinds[1].as_deref(), Some("unknown_tool"));
    assert_eq!(kinds[2].as_deref(), Some("invalid_arguments"));
    assert!(results[0].model_content().contains("disk on fire"));
}

#[tokio::test]
async fn test_duplicate_call_ids_are_renamed() {
    let provider = ScriptedProvider::new(vec![Ok(calls_reply(vec![
        call("same", "sleep", json!({"millis": 1, "label": "one"})),
        call("same", "sleep", json!({"millis": 1, "label": "two"})),
        call("", "sleep", json!({"millis": 1, "label": "three"})),
    ]))]);

    let mut agent = AgentBuilder::new()
        .with_provider(provider)
        .with_registry(registry_with(vec![SleepTool::new()]))
        .build()
        .await
        .unwrap();

    agent.chat("dupes").await.unwrap();
    assert!(agent.history().validate().is_ok());
}
