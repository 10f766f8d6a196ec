//! Append-only attempt sink.
//!
//! The monitor writes one JSON-serializable record per finalized attempt to
//! a durable sink. Any append-capable destination satisfies the contract;
//! write failures must never abort the caller's extraction — the monitor
//! swallows and counts them.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AttemptOutcome, BackendId, ExtractionAttempt};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One serialized attempt, as appended to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Wall-clock start of the attempt, milliseconds since the Unix epoch.
    pub started_at_unix_ms: u64,
    pub section_id: String,
    pub backend: BackendId,
    /// 1-based attempt index within the backend's retry budget.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    pub units: Option<u64>,
    pub cost_usd: f64,
}

impl AttemptRecord {
    pub fn from_attempt(section_id: &str, attempt: &ExtractionAttempt, cost_usd: f64) -> Self {
        let started_at_unix_ms = attempt
            .started_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Self {
            started_at_unix_ms,
            section_id: section_id.to_string(),
            backend: attempt.backend,
            attempt: attempt.attempt,
            outcome: attempt.outcome,
            elapsed_ms: attempt.elapsed.as_millis() as u64,
            error: attempt.error.clone(),
            units: attempt.units,
            cost_usd,
        }
    }
}

/// An append-capable destination for attempt records.
pub trait AttemptSink: Send + Sync {
    fn append(&self, record: &AttemptRecord) -> Result<(), SinkError>;
}

/// Sink writing one JSON object per line to an append-only file.
pub struct JsonlFileSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlFileSink {
    /// Open (or create) the file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AttemptSink for JsonlFileSink {
    fn append(&self, record: &AttemptRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// In-memory sink, mainly for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl AttemptSink for MemorySink {
    fn append(&self, record: &AttemptRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Sink that always fails. Used to test that the monitor tolerates sink
/// outages without surfacing them.
pub struct FailingSink;

impl AttemptSink for FailingSink {
    fn append(&self, _record: &AttemptRecord) -> Result<(), SinkError> {
        Err(SinkError::Io(std::io::Error::other("sink unavailable")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> ExtractionAttempt {
        ExtractionAttempt {
            backend: BackendId::Gemini,
            attempt: 1,
            started_at: SystemTime::now(),
            elapsed: Duration::from_millis(250),
            outcome: AttemptOutcome::Success,
            error: None,
            units: Some(120),
        }
    }

    #[test]
    fn record_serializes_to_flat_json() {
        let record = AttemptRecord::from_attempt("parties", &attempt(), 0.0003);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"section_id\":\"parties\""));
        assert!(json.contains("\"backend\":\"gemini\""));
        assert!(json.contains("\"outcome\":\"success\""));
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.jsonl");
        let sink = JsonlFileSink::open(&path).unwrap();

        let record = AttemptRecord::from_attempt("parties", &attempt(), 0.0);
        sink.append(&record).unwrap();
        sink.append(&record).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AttemptRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.section_id, "parties");
        assert_eq!(parsed.units, Some(120));
    }

    #[test]
    fn jsonl_sink_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attempts.jsonl");
        let sink = JsonlFileSink::open(&path).unwrap();
        assert_eq!(sink.path(), path);
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn memory_sink_collects_records() {
        let sink = MemorySink::new();
        let record = AttemptRecord::from_attempt("cover", &attempt(), 0.0);
        sink.append(&record).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].section_id, "cover");
    }
}
