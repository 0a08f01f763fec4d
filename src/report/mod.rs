//! Outbound collaborators: violation logs, artifact storage, session reports.
//!
//! Persistence failures are logged and counted. They never feed back into
//! session status and nothing here is retried by the engine.

pub mod artifacts;
pub mod violations;

use crate::core::aggregator::{SessionState, ViolationEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use artifacts::{
    Artifact, ArtifactKind, ArtifactUploader, DirectoryArtifactStore, MemoryArtifactStore,
    NullArtifactUploader,
};
pub use violations::{JsonlViolationLog, MemoryViolationLog, NullViolationLog, ViolationLog, ViolationRecord};

/// Failures of the log and upload collaborators.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write queue full; artifact dropped")]
    QueueFull,

    #[error("writer closed")]
    Closed,
}

/// Summary of one finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub final_state: SessionState,
    /// Every closed interval, in closing order
    pub violations: Vec<ViolationEvent>,
}

impl SessionReport {
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds()
    }

    /// Write the report as pretty JSON.
    pub fn export(&self, path: &std::path::Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
