//! Artifact upload collaborators.
//!
//! Raw frames leave the engine only through this module. The directory store
//! writes them on a dedicated thread so the event loop never waits on disk;
//! an upload resolves once its file is written, or with the write error.

use super::PersistenceError;
use crate::sensor::types::Frame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Pending writes the directory store will hold before refusing uploads.
const WRITE_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// First camera frame after activation
    ReferencePhoto,
    /// Periodic capture of the shared screen
    Screenshot,
}

impl ArtifactKind {
    fn file_stem(&self) -> &'static str {
        match self {
            ArtifactKind::ReferencePhoto => "reference",
            ArtifactKind::Screenshot => "screenshot",
        }
    }
}

/// One captured frame addressed to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub kind: ArtifactKind,
    pub frame: Frame,
}

impl Artifact {
    pub fn new(session_id: Uuid, user_id: &str, kind: ArtifactKind, frame: Frame) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id: user_id.to_string(),
            kind,
            frame,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.frame.captured_at
    }

    fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.img",
            self.kind.file_stem(),
            self.captured_at().format("%Y%m%dT%H%M%S%.3f"),
            self.id.simple()
        )
    }
}

/// Receives raw frame captures. Failures never affect session status.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Resolves `Ok` only once the artifact is stored.
    async fn upload(&self, artifact: Artifact) -> Result<(), PersistenceError>;
}

/// Discards everything.
pub struct NullArtifactUploader;

#[async_trait]
impl ArtifactUploader for NullArtifactUploader {
    async fn upload(&self, _artifact: Artifact) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Keeps artifacts in memory for inspection.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.artifacts.lock().iter().filter(|a| a.kind == kind).count()
    }
}

#[async_trait]
impl ArtifactUploader for MemoryArtifactStore {
    async fn upload(&self, artifact: Artifact) -> Result<(), PersistenceError> {
        self.artifacts.lock().push(artifact);
        Ok(())
    }
}

/// One queued write and the caller waiting on it.
struct WriteJob {
    artifact: Artifact,
    done: oneshot::Sender<Result<(), PersistenceError>>,
}

#[derive(Debug, Default)]
struct WriterStats {
    written: AtomicU64,
    failed: AtomicU64,
}

/// Writes artifacts under `<root>/<session_id>/` from a background thread.
pub struct DirectoryArtifactStore {
    root: PathBuf,
    sender: Mutex<Option<Sender<WriteJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<WriterStats>,
}

impl DirectoryArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let (sender, receiver) = bounded(WRITE_QUEUE_CAPACITY);
        let stats = Arc::new(WriterStats::default());
        let worker = {
            let root = root.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name("artifact-writer".to_string())
                .spawn(move || write_loop(&root, receiver, &stats))?
        };

        Ok(Self {
            root,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn written(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Stop accepting uploads and wait for queued writes to finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("artifact writer thread panicked");
            }
        }
    }
}

fn write_loop(root: &Path, receiver: Receiver<WriteJob>, stats: &WriterStats) {
    for WriteJob { artifact, done } in receiver {
        let dir = root.join(artifact.session_id.to_string());
        let path = dir.join(artifact.file_name());
        let result = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, &artifact.frame.data));
        let outcome = match result {
            Ok(()) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = ?artifact.kind, path = %path.display(), "artifact written");
                Ok(())
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = ?artifact.kind, error = %e, "artifact write failed");
                Err(PersistenceError::Io(e))
            }
        };
        // The uploader may have stopped waiting.
        let _ = done.send(outcome);
    }
    tracing::debug!("artifact writer drained");
}

#[async_trait]
impl ArtifactUploader for DirectoryArtifactStore {
    async fn upload(&self, artifact: Artifact) -> Result<(), PersistenceError> {
        let sender = self.sender.lock().clone().ok_or(PersistenceError::Closed)?;
        let (done, written) = oneshot::channel();
        sender
            .try_send(WriteJob { artifact, done })
            .map_err(|e| match e {
                TrySendError::Full(_) => PersistenceError::QueueFull,
                TrySendError::Disconnected(_) => PersistenceError::Closed,
            })?;
        written.await.map_err(|_| PersistenceError::Closed)?
    }
}

impl Drop for DirectoryArtifactStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
