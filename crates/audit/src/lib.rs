//! Change log: an append-only record of every collection mutation.
//!
//! Each entry is one JSON object per line:
//!
//! ```json
//! {"ts":"2026-01-01T10:00:00Z","action":"add_note","note_ids":[17],"count":1,"deck":"Chinese"}
//! ```
//!
//! Long id lists keep the first 20 ids followed by a `"...+N"` marker; `count`
//! always carries the full number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Ids kept verbatim in one entry.
pub const NOTE_ID_SAMPLE: usize = 20;

/// Entries kept in memory for `recent()` when there is no file.
const MEMORY_CAPACITY: usize = 200;

/// A single change log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub ts: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note_ids: Vec<serde_json::Value>,
    #[serde(default)]
    pub count: usize,
    /// Operation-specific fields, flattened into the entry
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ChangeEntry {
    pub fn new(action: &str, note_ids: &[i64], details: serde_json::Value) -> Self {
        let mut sample: Vec<serde_json::Value> = note_ids
            .iter()
            .take(NOTE_ID_SAMPLE)
            .map(|id| serde_json::Value::from(*id))
            .collect();
        if note_ids.len() > NOTE_ID_SAMPLE {
            sample.push(format!("...+{}", note_ids.len() - NOTE_ID_SAMPLE).into());
        }
        let details = match details {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("details".into(), other);
                map
            }
        };
        Self {
            ts: Utc::now(),
            action: action.to_string(),
            note_ids: sample,
            count: note_ids.len(),
            details,
        }
    }

    /// One line for chat display.
    pub fn summary(&self) -> String {
        let mut line = format!("{} {}", self.ts.format("%Y-%m-%d %H:%M"), self.action);
        if self.count > 0 {
            line.push_str(&format!(" ({} note(s))", self.count));
        }
        for key in ["deck", "query", "tags", "front", "simplified", "status"] {
            if let Some(value) = self.details.get(key) {
                match value {
                    serde_json::Value::String(s) => line.push_str(&format!(" {key}={s}")),
                    other => line.push_str(&format!(" {key}={other}")),
                }
            }
        }
        line
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to write change log {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Failed to read change log {path}: {reason}")]
    Read { path: PathBuf, reason: String },
}

/// Where entries are written.
pub trait ChangeSink: Send + Sync {
    fn record(&self, entry: &ChangeEntry) -> Result<(), AuditError>;
}

/// Appends entries to a JSONL file.
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }
}

impl ChangeSink for JsonlSink {
    fn record(&self, entry: &ChangeEntry) -> Result<(), AuditError> {
        let write_err = |reason: String| AuditError::Write {
            path: self.path.clone(),
            reason,
        };
        let _guard = self.lock.lock().map_err(|_| write_err("lock poisoned".into()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let line = serde_json::to_string(entry).map_err(|e| write_err(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| write_err(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| write_err(e.to_string()))
    }
}

/// Mirrors entries to `tracing`.
pub struct TracingSink;

impl ChangeSink for TracingSink {
    fn record(&self, entry: &ChangeEntry) -> Result<(), AuditError> {
        tracing::info!(
            action = %entry.action,
            count = entry.count,
            details = %serde_json::Value::Object(entry.details.clone()),
            "AUDIT"
        );
        Ok(())
    }
}

/// The change log used by operations.
///
/// Recording never fails the caller: sink errors are logged and swallowed.
pub struct ChangeLog {
    recent: Mutex<VecDeque<ChangeEntry>>,
    sinks: Vec<Box<dyn ChangeSink>>,
    file: Option<PathBuf>,
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLog")
            .field("file", &self.file)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ChangeLog {
    /// A log that only keeps entries in memory (plus tracing).
    pub fn in_memory() -> Self {
        Self {
            recent: Mutex::new(VecDeque::new()),
            sinks: vec![Box::new(TracingSink)],
            file: None,
        }
    }

    /// A log appending to `path` and mirroring to tracing.
    pub fn open(path: PathBuf) -> Self {
        Self {
            recent: Mutex::new(VecDeque::new()),
            sinks: vec![Box::new(JsonlSink::new(path.clone())), Box::new(TracingSink)],
            file: Some(path),
        }
    }

    /// Add an extra sink.
    pub fn with_sink(mut self, sink: Box<dyn ChangeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn record(&self, action: &str, note_ids: &[i64], details: serde_json::Value) {
        let entry = ChangeEntry::new(action, note_ids, details);

        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == MEMORY_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(entry.clone());
        }

        for sink in &self.sinks {
            if let Err(e) = sink.record(&entry) {
                tracing::warn!(error = %e, action = %entry.action, "Change log sink failed");
            }
        }
    }

    /// The last `n` entries, oldest first. Reads the file when there is one.
    pub fn recent(&self, n: usize) -> Result<Vec<ChangeEntry>, AuditError> {
        match &self.file {
            Some(path) => read_tail(path, n),
            None => {
                let recent = self.recent.lock().map_err(|_| AuditError::Read {
                    path: PathBuf::new(),
                    reason: "lock poisoned".into(),
                })?;
                let skip = recent.len().saturating_sub(n);
                Ok(recent.iter().skip(skip).cloned().collect())
            }
        }
    }
}

/// The last `n` parseable entries of a JSONL file, oldest first.
pub fn read_tail(path: &Path, n: usize) -> Result<Vec<ChangeEntry>, AuditError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(AuditError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };
    let entries: Vec<ChangeEntry> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping corrupted change log line");
                None
            }
        })
        .collect();
    let skip = entries.len().saturating_sub(n);
    Ok(entries.into_iter().skip(skip).collect())
}
