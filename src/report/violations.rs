//! Violation log collaborators.

use super::PersistenceError;
use crate::core::aggregator::{ViolationEvent, ViolationKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The persisted shape of one closed violation interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub user_id: String,
    pub session_id: Uuid,
    pub kind: ViolationKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl ViolationRecord {
    pub fn from_event(user_id: &str, session_id: Uuid, event: &ViolationEvent) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id,
            kind: event.kind,
            window_start: event.window_start,
            window_end: event.window_end,
        }
    }
}

/// Receives closed violation intervals.
///
/// Called from the engine task, so implementations must not block for long.
pub trait ViolationLog: Send + Sync {
    fn record(&self, record: &ViolationRecord) -> Result<(), PersistenceError>;
}

/// Append-only JSON-lines file.
pub struct JsonlViolationLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlViolationLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back from `path`, skipping lines that fail to parse.
    pub fn read_all(path: &Path) -> Result<Vec<ViolationRecord>, PersistenceError> {
        let file = File::open(path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "skipping malformed violation record"),
            }
        }
        Ok(records)
    }
}

impl ViolationLog for JsonlViolationLog {
    fn record(&self, record: &ViolationRecord) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps records in memory for inspection.
#[derive(Default)]
pub struct MemoryViolationLog {
    records: Mutex<Vec<ViolationRecord>>,
}

impl MemoryViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ViolationRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ViolationLog for MemoryViolationLog {
    fn record(&self, record: &ViolationRecord) -> Result<(), PersistenceError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Discards everything.
pub struct NullViolationLog;

impl ViolationLog for NullViolationLog {
    fn record(&self, _record: &ViolationRecord) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ViolationKind) -> ViolationRecord {
        let now = Utc::now();
        ViolationRecord {
            user_id: "u-1".to_string(),
            session_id: Uuid::nil(),
            kind,
            window_start: now,
            window_end: now,
        }
    }

    #[test]
    fn test_jsonl_log_appends_across_reopen() {
        let path = std::env::temp_dir().join(format!("violations-{}.jsonl", Uuid::new_v4()));

        {
            let log = JsonlViolationLog::open(&path).unwrap();
            log.record(&record(ViolationKind::NoFace)).unwrap();
        }
        {
            let log = JsonlViolationLog::open(&path).unwrap();
            log.record(&record(ViolationKind::HighNoise)).unwrap();
        }

        let records = JsonlViolationLog::read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, ViolationKind::NoFace);
        assert_eq!(records[1].kind, ViolationKind::HighNoise);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.lines().all(|l| l.contains("\"kind\"")));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_memory_log() {
        let log = MemoryViolationLog::new();
        assert!(log.is_empty());
        log.record(&record(ViolationKind::TabSwitch)).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].kind, ViolationKind::TabSwitch);
    }
}
