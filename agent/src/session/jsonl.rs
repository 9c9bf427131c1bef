//! One JSON-lines file per session

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};

use super::{check_session_id, SessionRecord, SessionStore};

/// Writes `<dir>/<session_id>.jsonl`, one record per line
pub struct JsonlSessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSessionStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session_id))
    }
}

impl SessionStore for JsonlSessionStore {
    fn record(&self, record: &SessionRecord) -> Result<()> {
        check_session_id(&record.session_id)?;
        let line = serde_json::to_string(record).context("Failed to serialize session record")?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("session log lock poisoned"))?;
        let path = self.path_for(&record.session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Vec<SessionRecord>> {
        check_session_id(session_id)?;
        let path = self.path_for(session_id);
        let file = fs::File::open(&path).with_context(|| format!("Session not found: {}", session_id))?;

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: SessionRecord = serde_json::from_str(&line)
                .with_context(|| format!("{:?} line {}: malformed record", path, idx + 1))?;
            records.push(record);
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
