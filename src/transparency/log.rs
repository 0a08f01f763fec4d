//! Integrity transparency log.
//!
//! Counts what the engine looked at and what it sent out, so a candidate or
//! reviewer can see the extent of monitoring without seeing any content.

use crate::core::aggregator::ViolationKind;
use crate::sensor::types::SensorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monitoring statistics for the current process.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Camera frames passed to the landmark detector
    frames_analyzed: AtomicU64,
    /// Audio buffers whose level was measured
    audio_buffers_analyzed: AtomicU64,
    /// Visibility and screen-share platform events received
    platform_events: AtomicU64,
    /// Closed violation intervals handed to the log collaborator
    violations_logged: AtomicU64,
    /// Artifacts accepted by the upload collaborator
    artifacts_uploaded: AtomicU64,
    /// Activation failures across all sensors
    sensor_failures: AtomicU64,
    /// Log or upload collaborator errors
    persistence_failures: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            frames_analyzed: AtomicU64::new(0),
            audio_buffers_analyzed: AtomicU64::new(0),
            platform_events: AtomicU64::new(0),
            violations_logged: AtomicU64::new(0),
            artifacts_uploaded: AtomicU64::new(0),
            sensor_failures: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that resumes from and saves to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "could not load previous transparency stats");
        }

        log
    }

    /// Record one analysed sample from `kind`.
    pub fn record_sample(&self, kind: SensorKind) {
        match kind {
            SensorKind::Camera => self.frames_analyzed.fetch_add(1, Ordering::Relaxed),
            SensorKind::Microphone => self.audio_buffers_analyzed.fetch_add(1, Ordering::Relaxed),
            // Screenshots are forwarded, not analysed.
            SensorKind::ScreenShare => return,
        };
    }

    pub fn record_platform_event(&self) {
        self.platform_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_violation_logged(&self, kind: ViolationKind) {
        self.violations_logged.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%kind, "violation logged");
    }

    pub fn record_artifact_uploaded(&self) {
        self.artifacts_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sensor_failure(&self) {
        self.sensor_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            audio_buffers_analyzed: self.audio_buffers_analyzed.load(Ordering::Relaxed),
            platform_events: self.platform_events.load(Ordering::Relaxed),
            violations_logged: self.violations_logged.load(Ordering::Relaxed),
            artifacts_uploaded: self.artifacts_uploaded.load(Ordering::Relaxed),
            sensor_failures: self.sensor_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Monitoring Statistics:\n\
             - Camera frames analysed: {}\n\
             - Audio buffers measured: {}\n\
             - Platform events received: {}\n\
             - Violations logged: {}\n\
             - Artifacts uploaded: {}\n\
             - Sensor failures: {}\n\
             - Persistence failures: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Integrity Guarantee:\n\
             - Frames are reduced to face count and head pose\n\
             - Audio is reduced to a loudness level\n\
             - Screenshots and the reference photo are the only images kept",
            stats.frames_analyzed,
            stats.audio_buffers_analyzed,
            stats.platform_events,
            stats.violations_logged,
            stats.artifacts_uploaded,
            stats.sensor_failures,
            stats.persistence_failures,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                frames_analyzed: stats.frames_analyzed,
                audio_buffers_analyzed: stats.audio_buffers_analyzed,
                platform_events: stats.platform_events,
                violations_logged: stats.violations_logged,
                artifacts_uploaded: stats.artifacts_uploaded,
                sensor_failures: stats.sensor_failures,
                persistence_failures: stats.persistence_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.frames_analyzed
                    .store(persisted.frames_analyzed, Ordering::Relaxed);
                self.audio_buffers_analyzed
                    .store(persisted.audio_buffers_analyzed, Ordering::Relaxed);
                self.platform_events
                    .store(persisted.platform_events, Ordering::Relaxed);
                self.violations_logged
                    .store(persisted.violations_logged, Ordering::Relaxed);
                self.artifacts_uploaded
                    .store(persisted.artifacts_uploaded, Ordering::Relaxed);
                self.sensor_failures
                    .store(persisted.sensor_failures, Ordering::Relaxed);
                self.persistence_failures
                    .store(persisted.persistence_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.frames_analyzed,
            &self.audio_buffers_analyzed,
            &self.platform_events,
            &self.violations_logged,
            &self.artifacts_uploaded,
            &self.sensor_failures,
            &self.persistence_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub frames_analyzed: u64,
    pub audio_buffers_analyzed: u64,
    pub platform_events: u64,
    pub violations_logged: u64,
    pub artifacts_uploaded: u64,
    pub sensor_failures: u64,
    pub persistence_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_analyzed: u64,
    audio_buffers_analyzed: u64,
    platform_events: u64,
    violations_logged: u64,
    artifacts_uploaded: u64,
    sensor_failures: u64,
    #[serde(default)]
    persistence_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
