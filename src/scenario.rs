//! Scripted scene changes replayed through a real session.
//!
//! A scenario is a JSON document:
//!
//! ```json
//! {
//!   "name": "looks away, then switches tab",
//!   "permissions": { "microphone": "deny" },
//!   "steps": [
//!     { "action": "wait", "ms": 2000 },
//!     { "action": "faces", "faces": [{ "yaw": 0.6 }] },
//!     { "action": "wait", "ms": 1500 },
//!     { "action": "page_hidden", "hidden": true }
//!   ]
//! }
//! ```

use crate::sensor::simulated::{PermissionResponse, SimulatedFace, SimulatedScene};
use crate::sensor::types::SensorKind;
use crate::session::{SessionError, SessionHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("could not read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One scripted change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Wait { ms: u64 },
    Faces { faces: Vec<SimulatedFace> },
    /// Peak amplitude around the 128 midpoint
    Noise { amplitude: u8 },
    PageHidden { hidden: bool },
    EndScreenShare,
    AcknowledgeWarning,
    DetectorFails { fails: bool },
    Finish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub permissions: BTreeMap<SensorKind, PermissionResponse>,
    #[serde(default)]
    pub permission_delay_ms: u64,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply permissions and prompt delay. Call before the session starts.
    pub fn prepare(&self, scene: &SimulatedScene) {
        for (kind, response) in &self.permissions {
            scene.set_permission(*kind, response.clone());
        }
        scene.set_permission_delay(Duration::from_millis(self.permission_delay_ms));
    }

    /// Total scripted wait time.
    pub fn scripted_duration(&self) -> Duration {
        let ms = self
            .steps
            .iter()
            .map(|s| match s {
                Step::Wait { ms } => *ms,
                _ => 0,
            })
            .sum();
        Duration::from_millis(ms)
    }

    /// Play every step against a running session.
    ///
    /// Stops early at a `finish` step or once the session is blocked.
    pub async fn play(&self, scene: &SimulatedScene, handle: &SessionHandle) -> Result<(), SessionError> {
        tracing::info!(scenario = %self.name, steps = self.steps.len(), "replaying scenario");
        for (index, step) in self.steps.iter().enumerate() {
            if handle.state().status.is_terminal() {
                tracing::info!(step = index, "session blocked; remaining steps skipped");
                break;
            }
            tracing::debug!(step = index, ?step, "scenario step");
            match step {
                Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
                Step::Faces { faces } => scene.set_faces(faces.clone()),
                Step::Noise { amplitude } => scene.set_noise(*amplitude),
                Step::PageHidden { hidden } => handle.set_page_hidden(*hidden).await?,
                Step::EndScreenShare => {
                    if !scene.end_screen_share() {
                        tracing::warn!("no live screen share to end");
                    }
                }
                Step::AcknowledgeWarning => {
                    if let Some(notice) = handle.acknowledge_warning().await? {
                        tracing::info!(kind = %notice.kind, resumable = notice.resumable, "warning acknowledged");
                    }
                }
                Step::DetectorFails { fails } => scene.set_detector_fails(*fails),
                Step::Finish => break,
            }
        }
        Ok(())
    }

    /// A short walk through the escalation policy.
    pub fn demo() -> Self {
        Self {
            name: "built-in demo".to_string(),
            permissions: BTreeMap::new(),
            permission_delay_ms: 300,
            steps: vec![
                Step::Wait { ms: 2_000 },
                Step::Faces {
                    faces: vec![SimulatedFace::turned(0.6)],
                },
                Step::Wait { ms: 1_500 },
                Step::Faces {
                    faces: vec![SimulatedFace::facing_screen()],
                },
                Step::Wait { ms: 1_000 },
                Step::AcknowledgeWarning,
                Step::Wait { ms: 2_000 },
                Step::Noise { amplitude: 120 },
                Step::Wait { ms: 1_000 },
                Step::Finish,
            ],
        }
    }
}
