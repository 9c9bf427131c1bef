//! SQLite session store (feature `persistence`)

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{SessionRecord, SessionStore};

/// Insert-only `session_turns` table
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS session_turns (
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            turn TEXT,
            failure TEXT,
            PRIMARY KEY (session_id, seq)
        );
        "#,
    )?;
    Ok(())
}

impl SqliteSessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open database at {:?}", path))?;
        create_tables(&conn)?;
        tracing::info!("Session database opened at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("session database lock poisoned"))
    }
}

impl SessionStore for SqliteSessionStore {
    fn record(&self, record: &SessionRecord) -> Result<()> {
        let turn = record.turn.as_ref().map(serde_json::to_string).transpose()?;
        let failure = record.failure.as_ref().map(serde_json::to_string).transpose()?;

        self.conn()?
            .execute(
                r#"
                INSERT INTO session_turns (session_id, seq, timestamp, provider, model, turn, failure)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                (
                    &record.session_id,
                    record.seq as i64,
                    record.timestamp.to_rfc3339(),
                    &record.provider,
                    &record.model,
                    &turn,
                    &failure,
                ),
            )
            .context("Failed to record session turn")?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, seq, timestamp, provider, model, turn, failure
            FROM session_turns
            WHERE session_id = ?1
            ORDER BY seq ASC
            "#,
        )?;

        let rows = stmt.query_map([session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (session_id, seq, timestamp, provider, model, turn, failure) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("bad timestamp in session {} seq {}", session_id, seq))?;
            records.push(SessionRecord {
                session_id,
                seq: seq as u64,
                timestamp,
                provider,
                model,
                turn: turn.as_deref().map(serde_json::from_str).transpose()?,
                failure: failure.as_deref().map(serde_json::from_str).transpose()?,
            });
        }

        if records.is_empty() {
            anyhow::bail!("Session not found: {}", session_id);
        }
        Ok(records)
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT session_id FROM session_turns ORDER BY session_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::session::SessionFailure;
    use tempfile::tempdir;

    #[test]
    fn test_record_and_load() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store
            .record(&SessionRecord::for_turn("s1", 1, "gemini", "g", Turn::assistant("done", vec![])))
            .unwrap();
        store
            .record(&SessionRecord::for_turn("s1", 0, "gemini", "g", Turn::user("go")))
            .unwrap();
        store
            .record(&SessionRecord::for_failure(
                "s2",
                0,
                "gemini",
                "g",
                SessionFailure {
                    kind: "provider:auth".into(),
                    message: "bad key".into(),
                },
            ))
            .unwrap();

        let records = store.load("s1").unwrap();
        assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(records[0].turn, Some(Turn::user("go")));

        let failed = store.load("s2").unwrap();
        assert_eq!(failed[0].failure.as_ref().unwrap().kind, "provider:auth");
        assert!(failed[0].turn.is_none());

        assert_eq!(store.list_sessions().unwrap(), vec!["s1", "s2"]);
    }

    #[test]
    fn test_seq_is_insert_only() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let record = SessionRecord::for_turn("s1", 0, "p", "m", Turn::user("a"));
        store.record(&record).unwrap();
        assert!(store.record(&record).is_err());
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");
        SqliteSessionStore::open(&path).unwrap();
        assert!(path.exists());
    }
}
