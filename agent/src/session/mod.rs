//! Session logging
//!
//! Every turn the agent appends is written as a [`SessionRecord`] to an
//! append-only store. A session that ends in failure gets one extra record
//! carrying the failure instead of a turn. [`replay`] rebuilds the
//! conversation from the records so a logged session can be checked or
//! resumed.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{LoggingSettings, StoreKind};
use crate::conversation::{ConversationState, Turn};

mod jsonl;
#[cfg(feature = "persistence")]
mod sqlite;

pub use jsonl::JsonlSessionStore;
#[cfg(feature = "persistence")]
pub use sqlite::SqliteSessionStore;

// ============================================================================
// Records
// ============================================================================

/// Why a session ended without an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    /// Stable error class, e.g. `max_rounds_exceeded` or `provider:auth`
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// Position within the session, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SessionFailure>,
}

impl SessionRecord {
    pub fn for_turn(session_id: &str, seq: u64, provider: &str, model: &str, turn: Turn) -> Self {
        Self {
            session_id: session_id.to_string(),
            seq,
            timestamp: Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            turn: Some(turn),
            failure: None,
        }
    }

    pub fn for_failure(session_id: &str, seq: u64, provider: &str, model: &str, failure: SessionFailure) -> Self {
        Self {
            session_id: session_id.to_string(),
            seq,
            timestamp: Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            turn: None,
            failure: Some(failure),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Append-only log of session records
pub trait SessionStore: Send + Sync {
    fn record(&self, record: &SessionRecord) -> Result<()>;

    /// All records of one session, ordered by `seq`
    fn load(&self, session_id: &str) -> Result<Vec<SessionRecord>>;

    /// Known session ids, sorted
    fn list_sessions(&self) -> Result<Vec<String>>;
}

/// `session_<YYYYmmdd_HHMMSS>_<8 hex>`
pub fn new_session_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", timestamp, &suffix[..8])
}

/// Session ids become file names, so keep them to a safe alphabet
pub(crate) fn check_session_id(session_id: &str) -> Result<()> {
    let ok = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    anyhow::ensure!(ok, "invalid session id: {:?}", session_id);
    Ok(())
}

/// Rebuild the conversation from a session's records
pub fn replay(records: &[SessionRecord]) -> ConversationState {
    let mut ordered: Vec<&SessionRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.seq);
    ConversationState::from_turns(ordered.into_iter().filter_map(|r| r.turn.clone()).collect())
}

/// Next free sequence number after `records`
pub fn next_seq(records: &[SessionRecord]) -> u64 {
    records.iter().map(|r| r.seq + 1).max().unwrap_or(0)
}

/// Open the store selected in `settings`, or `None` when logging is off
pub fn open_store(settings: &LoggingSettings) -> Result<Option<Arc<dyn SessionStore>>> {
    if !settings.enabled {
        return Ok(None);
    }

    let dir = Path::new(&settings.session_dir);
    let store: Arc<dyn SessionStore> = match settings.store {
        StoreKind::Jsonl => Arc::new(JsonlSessionStore::new(dir)?),
        #[cfg(feature = "persistence")]
        StoreKind::Sqlite => Arc::new(SqliteSessionStore::open(&dir.join("sessions.db"))?),
        #[cfg(not(feature = "persistence"))]
        StoreKind::Sqlite => anyhow::bail!("the SQLite session store needs the `persistence` feature"),
    };
    Ok(Some(store))
}
