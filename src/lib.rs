//! Proctor Engine - real-time integrity monitoring for timed online assessments.
//!
//! This library watches a candidate through webcam, microphone and screen
//! share, turns each sample into a typed verdict, and escalates with a
//! two-strike policy: the first violation warns, the second (or the exam
//! clock running out) blocks the session.
//!
//! # Integrity Guarantees
//!
//! - **Verdicts, not recordings**: frames are reduced to a face count and a
//!   head-pose flag, audio to a loudness level
//! - **Bounded evidence**: only periodic screenshots and one reference photo
//!   leave the engine, through the upload collaborator
//! - **Single writer**: session state is changed by one task only
//! - **Transparency**: all monitoring is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          Proctor Engine                           │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐                                  │
//! │  │   Camera   │──▶│ Pose loop  │──┐                               │
//! │  └────────────┘   └────────────┘  │                               │
//! │  ┌────────────┐   ┌────────────┐  │   ┌────────────┐   ┌────────┐ │
//! │  │ Microphone │──▶│ Audio loop │──┼──▶│   Engine   │──▶│ watch  │ │
//! │  └────────────┘   └────────────┘  │   │(aggregator)│   │ state  │ │
//! │  ┌────────────┐   ┌────────────┐  │   └────────────┘   └────────┘ │
//! │  │  Platform  │──▶│  Watcher   │──┤         │                     │
//! │  └────────────┘   └────────────┘  │         ▼                     │
//! │  ┌────────────┐                   │   ┌────────────┐              │
//! │  │   Timer    │───────────────────┘   │ Violation  │              │
//! │  └────────────┘                       │    Log     │              │
//! │  ┌────────────┐   ┌────────────┐      └────────────┘              │
//! │  │   Screen   │──▶│Screenshots │──▶ Artifact uploader             │
//! │  └────────────┘   └────────────┘                                  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use proctor_engine::{Config, ProctorSession};
//! use proctor_engine::sensor::simulated::SimulatedScene;
//!
//! # async fn run() -> Result<(), proctor_engine::SessionError> {
//! let scene = SimulatedScene::new();
//! let handle = ProctorSession::new(
//!     "candidate-42",
//!     Config::default(),
//!     scene.camera(),
//!     scene.microphone(),
//!     scene.screen(),
//!     scene.detector(),
//! )
//! .start()
//! .await?;
//!
//! handle.set_page_hidden(true).await?;
//! let report = handle.finish().await?;
//! println!("{} violation(s)", report.violations.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod monitor;
pub mod report;
pub mod scenario;
pub mod sensor;
pub mod session;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, RequiredSensors};
pub use core::{
    SessionState, SessionStatus, ViolationAggregator, ViolationEvent, ViolationKind, WarningNotice,
};
pub use monitor::PlatformEvent;
pub use report::{PersistenceError, SessionReport, ViolationLog, ViolationRecord};
pub use sensor::{SensorError, SensorKind, SensorReading, SensorStatus};
pub use session::{EngineEvent, ProctorSession, SessionError, SessionHandle};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Integrity declaration that can be displayed to candidates.
pub const INTEGRITY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║          PROCTOR ENGINE - EXAM INTEGRITY DECLARATION             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This session is monitored for exam integrity.                   ║
║                                                                  ║
║  ✓ WHAT WE CHECK:                                                ║
║    • Whether exactly one face is in front of the camera          ║
║    • Whether your head is turned away from the screen            ║
║    • Whether the room is louder than a set level                 ║
║    • Whether the exam page is hidden or screen sharing stops     ║
║                                                                  ║
║  ✓ WHAT WE KEEP:                                                 ║
║    • One reference photo at the start of the exam                ║
║    • A screenshot of your shared screen every 30 seconds         ║
║    • Start and end times of each violation                       ║
║                                                                  ║
║  ✗ WHAT WE NEVER KEEP:                                           ║
║    • Video or audio recordings                                   ║
║    • What you say (only how loud the room is)                    ║
║    • Your face beyond the reference photo                        ║
║                                                                  ║
║  The first violation shows a warning. A second violation, or     ║
║  the exam clock running out, ends the session.                   ║
║                                                                  ║
║  You can view monitoring statistics anytime with:                ║
║    proctor status                                                ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
