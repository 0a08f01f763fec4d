//! Core analysis for the proctoring engine.
//!
//! This module contains:
//! - Head-pose estimation from face landmarks
//! - Ambient audio level measurement
//! - The violation aggregator and its escalation policy
//! - The session countdown

pub mod aggregator;
pub mod audio;
pub mod geometry;
pub mod timer;

// Re-export commonly used types
pub use aggregator::{
    IngestOutcome, SessionState, SessionStatus, TimedReading, ViolationAggregator, ViolationEvent,
    ViolationKind, WarningNotice,
};
pub use audio::{AudioLevelAnalyzer, DEFAULT_NOISE_THRESHOLD_DB};
pub use geometry::{analyze_faces, estimate_pose, AnalysisError, FaceVerdict, PoseEstimate, PoseThresholds};
pub use timer::{run_timer, SessionTimer, TimerUpdate};
