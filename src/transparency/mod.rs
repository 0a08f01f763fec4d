//! Transparency module for the proctoring engine.
//!
//! Tracks and exposes how much the engine monitored, supporting candidate
//! trust and audit.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
