//! Discrete platform signals: page visibility and screen-share end.
//!
//! Hosts push [`PlatformEvent`]s into a bounded channel. The watcher turns
//! them into edge readings for the engine, in arrival order.

use crate::core::aggregator::TimedReading;
use crate::session::EngineEvent;
use crate::sensor::types::SensorReading;
use crate::transparency::SharedTransparencyLog;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The exam page was hidden or shown again.
    VisibilityChanged { hidden: bool },
    /// The user stopped sharing the screen behind `handle_id`.
    ScreenShareEnded { handle_id: Uuid },
}

/// Edge detector over platform events.
#[derive(Debug, Default)]
pub struct VisibilityWatcher {
    hidden: bool,
    ended_handles: HashSet<Uuid>,
}

impl VisibilityWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one event. Repeats of the current state yield nothing, and
    /// each screen-share handle ends at most once.
    pub fn translate(&mut self, event: PlatformEvent) -> Option<SensorReading> {
        match event {
            PlatformEvent::VisibilityChanged { hidden } => {
                if hidden == self.hidden {
                    return None;
                }
                self.hidden = hidden;
                Some(SensorReading::Visibility { hidden })
            }
            PlatformEvent::ScreenShareEnded { handle_id } => {
                if !self.ended_handles.insert(handle_id) {
                    tracing::debug!(handle = %handle_id, "duplicate screen-share end ignored");
                    return None;
                }
                Some(SensorReading::ScreenShare { active: false })
            }
        }
    }
}

/// Consume platform events until cancelled or every sender is gone.
pub async fn run_watcher(
    mut watcher: VisibilityWatcher,
    mut platform: mpsc::Receiver<PlatformEvent>,
    events: mpsc::Sender<EngineEvent>,
    transparency: SharedTransparencyLog,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = platform.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        transparency.record_platform_event();
        let Some(reading) = watcher.translate(event) else {
            continue;
        };
        tracing::info!(?event, "platform edge");
        let readings = vec![TimedReading::new(reading, Utc::now())];
        if events.send(EngineEvent::Readings(readings)).await.is_err() {
            break;
        }
    }
    tracing::debug!("platform watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transparency::create_shared_log;

    #[test]
    fn test_visibility_edges_only() {
        let mut watcher = VisibilityWatcher::new();
        assert_eq!(watcher.translate(PlatformEvent::VisibilityChanged { hidden: false }), None);
        assert_eq!(
            watcher.translate(PlatformEvent::VisibilityChanged { hidden: true }),
            Some(SensorReading::Visibility { hidden: true })
        );
        assert_eq!(watcher.translate(PlatformEvent::VisibilityChanged { hidden: true }), None);
        assert_eq!(
            watcher.translate(PlatformEvent::VisibilityChanged { hidden: false }),
            Some(SensorReading::Visibility { hidden: false })
        );
    }

    #[test]
    fn test_screen_share_end_once_per_handle() {
        let mut watcher = VisibilityWatcher::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let ended = Some(SensorReading::ScreenShare { active: false });
        assert_eq!(watcher.translate(PlatformEvent::ScreenShareEnded { handle_id: first }), ended);
        assert_eq!(watcher.translate(PlatformEvent::ScreenShareEnded { handle_id: first }), None);
        // A new share after resuming may end again.
        assert_eq!(watcher.translate(PlatformEvent::ScreenShareEnded { handle_id: second }), ended);
    }

    #[tokio::test]
    async fn test_run_watcher_forwards_in_order() {
        let (platform_tx, platform_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let transparency = create_shared_log();
        let task = tokio::spawn(run_watcher(
            VisibilityWatcher::new(),
            platform_rx,
            events_tx,
            transparency.clone(),
            CancellationToken::new(),
        ));

        platform_tx.send(PlatformEvent::VisibilityChanged { hidden: true }).await.unwrap();
        platform_tx.send(PlatformEvent::VisibilityChanged { hidden: true }).await.unwrap();
        platform_tx.send(PlatformEvent::VisibilityChanged { hidden: false }).await.unwrap();
        drop(platform_tx);
        task.await.unwrap();

        let mut hidden = Vec::new();
        while let Some(EngineEvent::Readings(readings)) = events_rx.recv().await {
            for r in readings {
                if let SensorReading::Visibility { hidden: h } = r.reading {
                    hidden.push(h);
                }
            }
        }
        assert_eq!(hidden, vec![true, false]);
        assert_eq!(transparency.stats().platform_events, 3);
    }
}
