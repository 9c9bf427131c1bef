//! Session logging, replay and resume

use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use open_agent::agent::AgentBuilder;
use open_agent::error::ProviderError;
use open_agent::session::{replay, JsonlSessionStore, SessionStore};

use super::support::*;

#[tokio::test]
async fn test_logged_session_replays_to_history() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(JsonlSessionStore::new(dir.path()).unwrap());

    let provider = ScriptedProvider::new(vec![
        Ok(calls_reply(vec![
            call("a", "sleep", json!({"millis": 20, "label": "one"})),
            call("b", "sleep", json!({"millis": 1, "label": "two"})),
        ])),
        Ok(text_reply("<final>two results</final>")),
    ]);

    let mut agent = AgentBuilder::new()
        .with_provider(provider)
        .with_registry(registry_with(vec![SleepTool::new()]))
        .with_store(store.clone())
        .build()
        .await
        .unwrap();
    let outcome = agent.chat("run both").await.unwrap();

    let records = store.load(&outcome.session_id).unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.provider == "scripted" && r.model == "script-1"));
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

    let replayed = replay(&records);
    assert!(replayed.validate().is_ok());
    assert_eq!(&replayed, agent.history());
}

#[tokio::test]
async fn test_failure_is_recorded() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(JsonlSessionStore::new(dir.path()).unwrap());

    let mut agent = AgentBuilder::new()
        .with_provider(ScriptedProvider::new(vec![Err(ProviderError::RateLimit {
            message: "slow down".into(),
            retry_after: None,
        })]))
        .with_store(store.clone())
        .build()
        .await
        .unwrap();
    assert!(agent.chat("hi").await.is_err());

    let records = store.load(agent.session_id()).unwrap();
    assert_eq!(records.len(), 2);
    let failure = records[1].failure.as_ref().unwrap();
    assert_eq!(failure.kind, "provider:rate_limit");
    assert!(records[1].turn.is_none());
    // failure records do not become turns
    assert_eq!(replay(&records).len(), 1);
}

#[tokio::test]
async fn test_resume_continues_sequence() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(JsonlSessionStore::new(dir.path()).unwrap());

    let mut first = AgentBuilder::new()
        .with_provider(ScriptedProvider::new(vec![Ok(text_reply("hello"))]))
        .with_store(store.clone())
        .with_session_id("session_resume")
        .build()
        .await
        .unwrap();
    first.chat("hi").await.unwrap();
    drop(first);

    let provider = ScriptedProvider::new(vec![Ok(text_reply("again"))]);
    let mut resumed = AgentBuilder::new()
        .with_provider(provider.clone())
        .with_store(store.clone())
        .with_session_id("session_resume")
        .build()
        .await
        .unwrap();
    assert_eq!(resumed.history().len(), 2);
    resumed.chat("once more").await.unwrap();

    // the provider saw the earlier exchange
    assert_eq!(*provider.seen.lock().unwrap(), vec![3]);
    let records = store.load("session_resume").unwrap();
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_clear_history_starts_new_session() {
    let mut agent = AgentBuilder::new()
        .with_provider(ScriptedProvider::new(vec![]))
        .build()
        .await
        .unwrap();
    agent.chat("hi").await.unwrap();
    let before = agent.session_id().to_string();

    agent.clear_history();
    assert!(agent.history().is_empty());
    assert_ne!(agent.session_id(), before);
}

#[cfg(feature = "persistence")]
#[tokio::test]
async fn test_sqlite_store_replays() {
    use open_agent::session::SqliteSessionStore;

    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::open_in_memory().unwrap());
    let mut agent = AgentBuilder::new()
        .with_provider(ScriptedProvider::new(vec![Ok(calls_reply(vec![call(
            "x",
            "sleep",
            json!({"millis": 1, "label": "ok"}),
        )]))]))
        .with_registry(registry_with(vec![SleepTool::new()]))
        .with_store(store.clone())
        .build()
        .await
        .unwrap();
    agent.chat("go").await.unwrap();

    let replayed = replay(&store.load(agent.session_id()).unwrap());
    assert_eq!(&replayed, agent.history());
}
