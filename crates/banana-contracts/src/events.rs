use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

pub type EventPayload = Map<String, Value>;

/// Keys stamped on every row. Payload entries with these names are dropped.
pub const RESERVED_KEYS: &[&str] = &["type", "session_id", "seq", "ts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStarted,
    SessionReset,
    ImageAttached,
    TurnAppended,
    GenerationFailed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::SessionReset => "session_reset",
            EventKind::ImageAttached => "image_attached",
            EventKind::TurnAppended => "turn_appended",
            EventKind::GenerationFailed => "generation_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only JSONL log of one chat session.
///
/// Clones share the same file handle and sequence counter, so rows stay
/// numbered in write order. The file is opened on the first event.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    seq: AtomicU64,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                seq: AtomicU64::new(0),
                file: Mutex::new(None),
            }),
        }
    }

    /// Writes one row and returns it as written.
    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> Result<Value> {
        let mut guard = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(file) = guard.as_mut() else {
            anyhow::bail!("event log {} is not open", self.shared.path.display());
        };

        let mut row = Map::new();
        row.insert("type".to_string(), json!(kind.as_str()));
        row.insert("session_id".to_string(), json!(self.shared.session_id));
        row.insert(
            "seq".to_string(),
            json!(self.shared.seq.fetch_add(1, Ordering::SeqCst)),
        );
        row.insert(
            "ts".to_string(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        row.extend(
            payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str())),
        );

        let mut line = serde_json::to_string(&row)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;
        Ok(Value::Object(row))
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.shared.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)
            .with_context(|| format!("failed to open {}", self.shared.path.display()))
    }
}

/// Reads every row of an event log, skipping lines that are not JSON objects.
pub fn read_events(path: &Path) -> Result<Vec<Value>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Ok(row @ Value::Object(_)) = serde_json::from_str::<Value>(&line) {
            rows.push(row);
        }
    }
    Ok(rows)
}
