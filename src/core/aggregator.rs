//! Violation aggregation and the two-strike escalation policy.
//!
//! The aggregator is the single writer of [`SessionState`]. It consumes typed
//! readings, tracks one "currently violating" flag per [`ViolationKind`], and
//! turns flag transitions into violation intervals:
//!
//! - rising edge (false → true): opens an interval and counts one violation
//! - falling edge (true → false): closes the interval and hands it out for logging
//!
//! Escalation: the first counted violation warns, the second blocks. Time
//! expiry blocks unconditionally.

use crate::sensor::types::{SensorKind, SensorReading, SensorStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Stable identifiers for violation conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    NoFace,
    MultipleFace,
    LookingAway,
    HighNoise,
    TabSwitch,
    ScreenShareStopped,
    TimeExpired,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::NoFace => "no_face",
            ViolationKind::MultipleFace => "multiple_face",
            ViolationKind::LookingAway => "looking_away",
            ViolationKind::HighNoise => "high_noise",
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::ScreenShareStopped => "screen_share_stopped",
            ViolationKind::TimeExpired => "time_expired",
        }
    }

    /// Whether the candidate may resume after acknowledging a warning for this kind.
    pub fn is_resumable(&self) -> bool {
        matches!(self, ViolationKind::ScreenShareStopped)
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session escalation status. Ordered: transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Warned,
    Blocked,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Blocked)
    }
}

/// A closed violation interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub id: Uuid,
    pub kind: ViolationKind,
    /// When the violation was counted
    pub occurred_at: DateTime<Utc>,
    /// First sample at which the condition held
    pub window_start: DateTime<Utc>,
    /// First sample at which it no longer held (or session end)
    pub window_end: DateTime<Utc>,
}

impl ViolationEvent {
    pub fn duration_secs(&self) -> f64 {
        (self.window_end - self.window_start).num_milliseconds() as f64 / 1000.0
    }
}

/// Pending warning shown to the candidate after the first violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningNotice {
    pub kind: ViolationKind,
    pub issued_at: DateTime<Utc>,
    pub resumable: bool,
}

/// Read-only snapshot of the session, as delivered to renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub violation_count: u32,
    pub active_conditions: BTreeSet<ViolationKind>,
    pub remaining_seconds: u64,
    pub warning: Option<WarningNotice>,
    pub sensors: BTreeMap<SensorKind, SensorStatus>,
}

impl SessionState {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            status: SessionStatus::Active,
            violation_count: 0,
            active_conditions: BTreeSet::new(),
            remaining_seconds: duration_secs,
            warning: None,
            sensors: SensorKind::ALL
                .iter()
                .map(|&kind| (kind, SensorStatus::Inactive))
                .collect(),
        }
    }
}

/// A reading stamped with its sample time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedReading {
    pub reading: SensorReading,
    pub observed_at: DateTime<Utc>,
}

impl TimedReading {
    pub fn new(reading: SensorReading, observed_at: DateTime<Utc>) -> Self {
        Self {
            reading,
            observed_at,
        }
    }
}

/// What one ingestion changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    pub opened: Vec<ViolationKind>,
    pub closed: Vec<ViolationEvent>,
    pub escalated_to: Option<SessionStatus>,
}

impl IngestOutcome {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty() && self.escalated_to.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenInterval {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    window_start: DateTime<Utc>,
}

/// Violation conditions implied by one reading.
fn conditions(reading: &SensorReading) -> Vec<(ViolationKind, bool)> {
    match *reading {
        SensorReading::Face {
            face_count,
            looking_away,
        } => vec![
            (ViolationKind::NoFace, face_count == 0),
            (ViolationKind::MultipleFace, face_count >= 2),
            (ViolationKind::LookingAway, face_count == 1 && looking_away),
        ],
        SensorReading::Audio {
            above_threshold, ..
        } => vec![(ViolationKind::HighNoise, above_threshold)],
        SensorReading::Visibility { hidden } => vec![(ViolationKind::TabSwitch, hidden)],
        SensorReading::ScreenShare { active } => {
            vec![(ViolationKind::ScreenShareStopped, !active)]
        }
    }
}

/// The escalation state machine.
pub struct ViolationAggregator {
    state: SessionState,
    open: BTreeMap<ViolationKind, OpenInterval>,
    time_expired: bool,
}

impl ViolationAggregator {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            state: SessionState::new(duration_secs),
            open: BTreeMap::new(),
            time_expired: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    pub fn violation_count(&self) -> u32 {
        self.state.violation_count
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    /// Ingest a single reading.
    pub fn ingest(&mut self, reading: TimedReading, now: DateTime<Utc>) -> IngestOutcome {
        self.ingest_tick(&[reading], now)
    }

    /// Ingest every reading produced in one scheduling tick.
    ///
    /// Kinds rising together each count. Once the session is blocked, later
    /// ticks are ignored.
    pub fn ingest_tick(&mut self, readings: &[TimedReading], now: DateTime<Utc>) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        if self.state.status.is_terminal() {
            tracing::trace!(count = readings.len(), "readings ignored: session blocked");
            return outcome;
        }

        for timed in readings {
            for (kind, violating) in conditions(&timed.reading) {
                self.apply(kind, violating, timed.observed_at, now, &mut outcome);
            }
        }
        outcome
    }

    /// Session clock reached zero. Blocks regardless of count, exactly once.
    pub fn expire(&mut self, now: DateTime<Utc>) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        if self.time_expired || self.state.status.is_terminal() {
            return outcome;
        }
        self.time_expired = true;
        self.state.remaining_seconds = 0;
        self.open_interval(ViolationKind::TimeExpired, now, now);
        outcome.opened.push(ViolationKind::TimeExpired);
        tracing::info!(count = self.state.violation_count, "session time expired");
        if self.escalate_to(SessionStatus::Blocked, ViolationKind::TimeExpired, now) {
            outcome.escalated_to = Some(SessionStatus::Blocked);
        }
        outcome
    }

    /// Record the timer's remaining seconds. Never moves the clock backwards.
    pub fn set_remaining(&mut self, remaining_secs: u64) {
        self.state.remaining_seconds = self.state.remaining_seconds.min(remaining_secs);
    }

    pub fn set_sensor_status(&mut self, kind: SensorKind, status: SensorStatus) {
        self.state.sensors.insert(kind, status);
    }

    /// Clear the pending warning. Returns it so the caller can act on it
    /// (e.g. restart screen sharing). The violation count is untouched.
    pub fn acknowledge_warning(&mut self) -> Option<WarningNotice> {
        if self.state.status.is_terminal() {
            return None;
        }
        self.state.warning.take()
    }

    /// Close every open interval at `now`, for session end.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<ViolationEvent> {
        let kinds: Vec<ViolationKind> = self.open.keys().copied().collect();
        kinds
            .into_iter()
            .filter_map(|kind| self.close_interval(kind, now))
            .collect()
    }

    fn apply(
        &mut self,
        kind: ViolationKind,
        violating: bool,
        observed_at: DateTime<Utc>,
        now: DateTime<Utc>,
        outcome: &mut IngestOutcome,
    ) {
        let is_open = self.open.contains_key(&kind);
        match (violating, is_open) {
            (true, false) => {
                self.open_interval(kind, observed_at, now);
                outcome.opened.push(kind);
                let target = if self.state.violation_count >= 2 {
                    SessionStatus::Blocked
                } else {
                    SessionStatus::Warned
                };
                if self.escalate_to(target, kind, now) {
                    outcome.escalated_to = Some(target);
                }
            }
            (false, true) => {
                if let Some(event) = self.close_interval(kind, observed_at) {
                    outcome.closed.push(event);
                }
            }
            _ => {}
        }
    }

    fn open_interval(&mut self, kind: ViolationKind, observed_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.open.insert(
            kind,
            OpenInterval {
                id: Uuid::new_v4(),
                occurred_at: now,
                window_start: observed_at,
            },
        );
        self.state.active_conditions.insert(kind);
        self.state.violation_count += 1;
        tracing::info!(%kind, count = self.state.violation_count, "violation opened");
    }

    fn close_interval(&mut self, kind: ViolationKind, at: DateTime<Utc>) -> Option<ViolationEvent> {
        let interval = self.open.remove(&kind)?;
        self.state.active_conditions.remove(&kind);
        let event = ViolationEvent {
            id: interval.id,
            kind,
            occurred_at: interval.occurred_at,
            window_start: interval.window_start,
            window_end: at.max(interval.window_start),
        };
        tracing::info!(%kind, duration_secs = event.duration_secs(), "violation closed");
        Some(event)
    }

    /// Move status forward. Returns true if it changed.
    fn escalate_to(&mut self, target: SessionStatus, kind: ViolationKind, now: DateTime<Utc>) -> bool {
        if target <= self.state.status {
            return false;
        }
        let from = self.state.status;
        self.state.status = target;
        match target {
            SessionStatus::Warned => {
                self.state.warning = Some(WarningNotice {
                    kind,
                    issued_at: now,
                    resumable: kind.is_resumable(),
                });
            }
            SessionStatus::Blocked => self.state.warning = None,
            SessionStatus::Active => {}
        }
        tracing::warn!(?from, to = ?target, trigger = %kind, "session escalated");
        true
    }
}
