//! Agents sharing one registry

use std::sync::atomic::Ordering;

use serde_json::json;

use open_agent::agent::AgentBuilder;
use open_agent::conversation::Turn;
use open_agent::error::ProviderError;
use open_agent::llm::AssistantReply;

use super::support::*;

fn sleeps(prefix: &str, count: usize) -> Vec<Result<AssistantReply, ProviderError>> {
    let mut replies: Vec<_> = (0..count)
        .map(|i| {
            Ok(calls_reply(vec![
                call(&format!("{}-{}a", prefix, i), "sleep", json!({"millis": 15, "label": format!("{}{}a", prefix, i)})),
                call(&format!("{}-{}b", prefix, i), "sleep", json!({"millis": 5, "label": format!("{}{}b", prefix, i)})),
            ]))
        })
        .collect();
    replies.push(Ok(text_reply(&format!("<final>{} finished</final>", prefix))));
    replies
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_agents_share_registry() {
    let sleep = SleepTool::new();
    let registry = registry_with(vec![sleep.clone()]);

    let mut first = AgentBuilder::new()
        .with_provider(ScriptedProvider::new(sleeps("a", 3)))
        .with_registry(registry.clone())
        .build()
        .await
        .unwrap();
    let mut second = AgentBuilder::new()
        .with_provider(ScriptedProvider::new(sleeps("b", 3)))
        .with_registry(registry.clone())
        .build()
        .await
        .unwrap();

    let (a, b) = tokio::join!(first.chat("left"), second.chat("right"));
    assert_eq!(a.unwrap().text, "a finished");
    assert_eq!(b.unwrap().text, "b finished");
    assert_ne!(first.session_id(), second.session_id());

    for (agent, prefix) in [(&first, "a"), (&second, "b")] {
        let history = agent.history();
        assert!(history.validate().is_ok());
        // each agent only ever sees its own results
        let labels: Vec<String> = history
            .turns()
            .iter()
            .filter_map(|t| match t {
                Turn::ToolResult { result, .. } => Some(result.output.render()),
                _ => None,
            })
            .collect();
        assert_eq!(labels.len(), 6);
        assert!(labels.iter().all(|l| l.starts_with(prefix)), "{:?}", labels);
    }
    assert_eq!(sleep.calls.load(Ordering::SeqCst), 12);
}
