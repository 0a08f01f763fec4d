//! Wall-clock session timer.
//!
//! The clock cannot be paused. Remaining time is derived from the start
//! instant on every tick, so a late tick never drifts the countdown.

use crate::session::EngineEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What one poll of the timer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerUpdate {
    /// Nothing visible changed since the last poll.
    Unchanged,
    /// Whole seconds left, rounded up.
    Remaining(u64),
    /// The clock reached zero. Produced exactly once.
    Expired,
}

/// Countdown state for one session.
#[derive(Debug)]
pub struct SessionTimer {
    total: Duration,
    started_at: Instant,
    last_remaining: Option<u64>,
    expired: bool,
}

impl SessionTimer {
    pub fn start(total: Duration) -> Self {
        Self::start_at(total, Instant::now())
    }

    pub fn start_at(total: Duration, started_at: Instant) -> Self {
        Self {
            total,
            started_at,
            last_remaining: None,
            expired: false,
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Remaining whole seconds at `now`, rounded up.
    pub fn remaining_at(&self, now: Instant) -> u64 {
        let left = self.total.saturating_sub(now.saturating_duration_since(self.started_at));
        let secs = left.as_secs();
        if left.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    pub fn poll(&mut self, now: Instant) -> TimerUpdate {
        if self.expired {
            return TimerUpdate::Unchanged;
        }
        let remaining = self.remaining_at(now);
        if remaining == 0 {
            self.expired = true;
            self.last_remaining = Some(0);
            return TimerUpdate::Expired;
        }
        if self.last_remaining == Some(remaining) {
            return TimerUpdate::Unchanged;
        }
        self.last_remaining = Some(remaining);
        TimerUpdate::Remaining(remaining)
    }
}

/// Drive `timer` on a fixed tick until it expires or `cancel` fires.
pub async fn run_timer(
    mut timer: SessionTimer,
    tick: Duration,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("session timer cancelled");
                return;
            }
            _ = interval.tick() => {}
        }

        let event = match timer.poll(Instant::now()) {
            TimerUpdate::Unchanged => continue,
            TimerUpdate::Remaining(remaining_secs) => EngineEvent::Tick { remaining_secs },
            TimerUpdate::Expired => EngineEvent::TimeExpired,
        };
        let expired = matches!(event, EngineEvent::TimeExpired);
        if events.send(event).await.is_err() {
            tracing::debug!("engine gone; timer stopping");
            return;
        }
        if expired {
            tracing::info!(total_secs = timer.total().as_secs(), "session clock reached zero");
            return;
        }
    }
}
