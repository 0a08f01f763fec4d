//! Per-sensor monitors.
//!
//! A monitor pairs one [`SensorLifecycle`] with the producer tasks that only
//! make sense while its handle is live:
//!
//! ```text
//!   CameraMonitor      ── pose loop ──────────┐
//!   MicrophoneMonitor  ── audio loop ─────────┤
//!   ScreenMonitor      ── screenshot loop     ├──▶ EngineEvent queue ──▶ engine
//!                      └─ end signal ──▶ watcher ──┘
//! ```
//!
//! Activation and sampling are separate steps: preflight only activates, and
//! the session spawns each handle's loops once the exam clock starts.
//! [`Monitor::start`] does both, for re-activation mid-session. Stopping
//! deactivates; the loops notice on their next tick.

pub mod sampling;
pub mod watcher;

use crate::core::aggregator::TimedReading;
use crate::core::audio::AudioLevelAnalyzer;
use crate::core::geometry::PoseThresholds;
use crate::report::ArtifactUploader;
use crate::sensor::device::{AudioStream, CaptureDevice, LandmarkDetector, ScreenStream, VideoStream};
use crate::sensor::lifecycle::{Activation, Deactivation, SensorLifecycle};
use crate::sensor::types::{SensorError, SensorKind, SensorReading, SensorStatus};
use crate::session::EngineEvent;
use crate::transparency::SharedTransparencyLog;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use watcher::{run_watcher, PlatformEvent, VisibilityWatcher};

/// Everything a producer task needs to talk to the rest of the session.
#[derive(Clone)]
pub struct LoopContext {
    pub session_id: Uuid,
    pub user_id: String,
    pub events: mpsc::Sender<EngineEvent>,
    pub uploader: Arc<dyn ArtifactUploader>,
    pub transparency: SharedTransparencyLog,
    pub cancel: CancellationToken,
}

/// Object-safe control surface over one sensor and its loops.
#[async_trait]
pub trait Monitor: Send + Sync {
    fn kind(&self) -> SensorKind;

    /// Acquire the sensor without sampling it.
    async fn activate(&self) -> Result<Activation, SensorError>;

    /// Spawn the producer tasks bound to the live `handle`.
    async fn spawn_loops(&self, handle: Uuid);

    /// Activate and, on a fresh handle, spawn its loops.
    async fn start(&self) -> Result<Activation, SensorError> {
        let activation = self.activate().await?;
        if let Activation::Activated(handle) = activation {
            self.spawn_loops(handle).await;
        }
        Ok(activation)
    }

    /// Deactivate the sensor. Loops exit on their next tick.
    fn stop(&self) -> Deactivation;

    fn status(&self) -> SensorStatus;

    fn handle_id(&self) -> Option<Uuid>;

    /// Latest verdict from this sensor; neutral while it is not live.
    fn last_reading(&self) -> SensorReading;
}

/// Shared start logic: activate, count failures, report the outcome.
async fn activate_logged<D: CaptureDevice>(
    lifecycle: &SensorLifecycle<D>,
    ctx: &LoopContext,
) -> Result<Activation, SensorError> {
    let result = lifecycle.activate().await;
    if let Err(error) = &result {
        ctx.transparency.record_sensor_failure();
        tracing::warn!(sensor = %lifecycle.kind(), %error, "monitor could not start");
    }
    result
}

/// Webcam: face presence and head pose.
pub struct CameraMonitor<D: CaptureDevice> {
    lifecycle: Arc<SensorLifecycle<D>>,
    detector: Arc<dyn LandmarkDetector>,
    thresholds: PoseThresholds,
    interval: Duration,
    ctx: LoopContext,
}

impl<D> CameraMonitor<D>
where
    D: CaptureDevice,
    D::Stream: VideoStream,
{
    pub fn new(
        device: D,
        detector: Arc<dyn LandmarkDetector>,
        thresholds: PoseThresholds,
        interval: Duration,
        ctx: LoopContext,
    ) -> Self {
        Self {
            lifecycle: Arc::new(SensorLifecycle::new(device)),
            detector,
            thresholds,
            interval,
            ctx,
        }
    }

    pub fn lifecycle(&self) -> &Arc<SensorLifecycle<D>> {
        &self.lifecycle
    }
}

#[async_trait]
impl<D> Monitor for CameraMonitor<D>
where
    D: CaptureDevice,
    D::Stream: VideoStream,
{
    fn kind(&self) -> SensorKind {
        SensorKind::Camera
    }

    async fn activate(&self) -> Result<Activation, SensorError> {
        activate_logged(&self.lifecycle, &self.ctx).await
    }

    async fn spawn_loops(&self, handle: Uuid) {
        tokio::spawn(sampling::pose_loop(
            self.lifecycle.clone(),
            handle,
            self.detector.clone(),
            self.thresholds,
            self.interval,
            self.ctx.clone(),
        ));
    }

    fn stop(&self) -> Deactivation {
        self.lifecycle.deactivate()
    }

    fn status(&self) -> SensorStatus {
        self.lifecycle.status()
    }

    fn handle_id(&self) -> Option<Uuid> {
        self.lifecycle.handle_id()
    }

    fn last_reading(&self) -> SensorReading {
        self.lifecycle.last_reading()
    }
}

/// Microphone: ambient noise level.
pub struct MicrophoneMonitor<D: CaptureDevice> {
    lifecycle: Arc<SensorLifecycle<D>>,
    analyzer: AudioLevelAnalyzer,
    interval: Duration,
    ctx: LoopContext,
}

impl<D> MicrophoneMonitor<D>
where
    D: CaptureDevice,
    D::Stream: AudioStream,
{
    pub fn new(device: D, analyzer: AudioLevelAnalyzer, interval: Duration, ctx: LoopContext) -> Self {
        Self {
            lifecycle: Arc::new(SensorLifecycle::new(device)),
            analyzer,
            interval,
            ctx,
        }
    }

    pub fn lifecycle(&self) -> &Arc<SensorLifecycle<D>> {
        &self.lifecycle
    }
}

#[async_trait]
impl<D> Monitor for MicrophoneMonitor<D>
where
    D: CaptureDevice,
    D::Stream: AudioStream,
{
    fn kind(&self) -> SensorKind {
        SensorKind::Microphone
    }

    async fn activate(&self) -> Result<Activation, SensorError> {
        activate_logged(&self.lifecycle, &self.ctx).await
    }

    async fn spawn_loops(&self, handle: Uuid) {
        tokio::spawn(sampling::audio_loop(
            self.lifecycle.clone(),
            handle,
            self.analyzer,
            self.interval,
            self.ctx.clone(),
        ));
    }

    fn stop(&self) -> Deactivation {
        self.lifecycle.deactivate()
    }

    fn status(&self) -> SensorStatus {
        self.lifecycle.status()
    }

    fn handle_id(&self) -> Option<Uuid> {
        self.lifecycle.handle_id()
    }

    fn last_reading(&self) -> SensorReading {
        self.lifecycle.last_reading()
    }
}

/// Screen share: periodic screenshots and the "stopped sharing" signal.
pub struct ScreenMonitor<D: CaptureDevice> {
    lifecycle: Arc<SensorLifecycle<D>>,
    interval: Duration,
    platform: mpsc::Sender<PlatformEvent>,
    ctx: LoopContext,
}

impl<D> ScreenMonitor<D>
where
    D: CaptureDevice,
    D::Stream: ScreenStream,
{
    pub fn new(
        device: D,
        interval: Duration,
        platform: mpsc::Sender<PlatformEvent>,
        ctx: LoopContext,
    ) -> Self {
        Self {
            lifecycle: Arc::new(SensorLifecycle::new(device)),
            interval,
            platform,
            ctx,
        }
    }

    pub fn lifecycle(&self) -> &Arc<SensorLifecycle<D>> {
        &self.lifecycle
    }

    /// Wait for the stream's end signal, report it, then release the dead stream.
    fn spawn_end_watch(&self, handle: Uuid) {
        let Some(Some(signal)) = self.lifecycle.with_stream(|s| s.take_end_signal()) else {
            return;
        };
        let lifecycle = self.lifecycle.clone();
        let platform = self.platform.clone();
        let events = self.ctx.events.clone();
        let cancel = self.ctx.cancel.clone();

        tokio::spawn(async move {
            let ended = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                result = signal => result.is_ok(),
            };
            if !ended {
                return;
            }
            tracing::info!(%handle, "screen share ended by user");
            if platform
                .send(PlatformEvent::ScreenShareEnded { handle_id: handle })
                .await
                .is_err()
            {
                tracing::debug!("platform watcher gone");
            }
            if lifecycle.handle_id() == Some(handle) {
                lifecycle.deactivate();
                let status = EngineEvent::SensorStatus {
                    kind: SensorKind::ScreenShare,
                    status: lifecycle.status(),
                };
                let _ = events.send(status).await;
            }
        });
    }
}

#[async_trait]
impl<D> Monitor for ScreenMonitor<D>
where
    D: CaptureDevice,
    D::Stream: ScreenStream,
{
    fn kind(&self) -> SensorKind {
        SensorKind::ScreenShare
    }

    async fn activate(&self) -> Result<Activation, SensorError> {
        activate_logged(&self.lifecycle, &self.ctx).await
    }

    async fn spawn_loops(&self, handle: Uuid) {
        self.spawn_end_watch(handle);
        tokio::spawn(sampling::screenshot_loop(
            self.lifecycle.clone(),
            handle,
            self.interval,
            self.ctx.clone(),
        ));
        // Sharing (again): closes any open "stopped" interval.
        let reading = SensorReading::ScreenShare { active: true };
        self.lifecycle.record_reading(reading);
        let reading = TimedReading::new(reading, Utc::now());
        let _ = self.ctx.events.send(EngineEvent::Readings(vec![reading])).await;
    }

    fn stop(&self) -> Deactivation {
        self.lifecycle.deactivate()
    }

    fn status(&self) -> SensorStatus {
        self.lifecycle.status()
    }

    fn handle_id(&self) -> Option<Uuid> {
        self.lifecycle.handle_id()
    }

    fn last_reading(&self) -> SensorReading {
        self.lifecycle.last_reading()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryArtifactStore;
    use crate::sensor::simulated::{PermissionResponse, SimulatedScene};
    use crate::transparency::create_shared_log;

    fn context() -> (LoopContext, mpsc::Receiver<EngineEvent>, Arc<MemoryArtifactStore>) {
        let (events, rx) = mpsc::channel(64);
        let store = Arc::new(MemoryArtifactStore::new());
        let ctx = LoopContext {
            session_id: Uuid::new_v4(),
            user_id: "u-1".to_string(),
            events,
            uploader: store.clone(),
            transparency: create_shared_log(),
            cancel: CancellationToken::new(),
        };
        (ctx, rx, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_monitor_streams_face_readings() {
        let scene = SimulatedScene::new();
        let (ctx, mut rx, store) = context();
        let monitor = CameraMonitor::new(
            scene.camera(),
            Arc::new(scene.detector()),
            PoseThresholds::default(),
            Duration::from_millis(500),
            ctx,
        );

        assert!(matches!(monitor.start().await, Ok(Activation::Activated(_))));
        scene.set_faces(Vec::new());

        let mut saw_no_face = false;
        for _ in 0..4 {
            if let Some(EngineEvent::Readings(readings)) = rx.recv().await {
                if readings[0].reading
                    == (SensorReading::Face {
                        face_count: 0,
                        looking_away: false,
                    })
                {
                    saw_no_face = true;
                    break;
                }
            }
        }
        assert!(saw_no_face);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.count(crate::report::ArtifactKind::ReferencePhoto), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_alone_does_not_sample() {
        let scene = SimulatedScene::new();
        let (ctx, mut rx, _store) = context();
        let monitor = MicrophoneMonitor::new(
            scene.microphone(),
            AudioLevelAnalyzer::default(),
            Duration::from_millis(100),
            ctx,
        );

        let Ok(Activation::Activated(handle)) = monitor.activate().await else {
            panic!("microphone should activate");
        };
        assert_eq!(monitor.handle_id(), Some(handle));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());

        monitor.spawn_loops(handle).await;
        assert!(matches!(rx.recv().await, Some(EngineEvent::Readings(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_camera_stream_reports_failed_status() {
        let scene = SimulatedScene::new();
        let (ctx, mut rx, _store) = context();
        let transparency = ctx.transparency.clone();
        let monitor = CameraMonitor::new(
            scene.camera(),
            Arc::new(scene.detector()),
            PoseThresholds::default(),
            Duration::from_millis(500),
            ctx,
        );

        monitor.start().await.unwrap();
        assert!(matches!(rx.recv().await, Some(EngineEvent::Readings(_))));
        scene.set_capture_error(SensorKind::Camera, Some(SensorError::Interrupted));

        let status = loop {
            match rx.recv().await {
                Some(EngineEvent::SensorStatus { kind, status }) => break (kind, status),
                Some(_) => continue,
                None => panic!("loop ended without reporting"),
            }
        };
        assert_eq!(
            status,
            (
                SensorKind::Camera,
                SensorStatus::Failed {
                    error: SensorError::Interrupted
                }
            )
        );
        assert_eq!(monitor.status(), status.1);
        assert_eq!(scene.live_streams(SensorKind::Camera), 0);
        assert_eq!(transparency.stats().sensor_failures, 1);
        assert_eq!(monitor.last_reading(), SensorReading::neutral(SensorKind::Camera));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_loop_and_releases_stream() {
        let scene = SimulatedScene::new();
        let (ctx, mut rx, _store) = context();
        let monitor = MicrophoneMonitor::new(
            scene.microphone(),
            AudioLevelAnalyzer::default(),
            Duration::from_millis(100),
            ctx,
        );

        monitor.start().await.unwrap();
        assert!(rx.recv().await.is_some());
        assert!(matches!(monitor.stop(), Deactivation::Released(_)));
        assert_eq!(scene.live_streams(SensorKind::Microphone), 0);

        // Drain whatever was queued; nothing new may arrive after the loop notices.
        tokio::time::sleep(Duration::from_millis(300)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_screen_share_reports_failure() {
        let scene = SimulatedScene::new();
        scene.set_permission(SensorKind::ScreenShare, PermissionResponse::Deny);
        let (ctx, _rx, _store) = context();
        let transparency = ctx.transparency.clone();
        let (platform, _platform_rx) = mpsc::channel(4);
        let monitor = ScreenMonitor::new(scene.screen(), Duration::from_secs(30), platform, ctx);

        assert_eq!(monitor.start().await, Err(SensorError::PermissionDenied));
        assert_eq!(
            monitor.status(),
            SensorStatus::Failed {
                error: SensorError::PermissionDenied
            }
        );
        assert_eq!(transparency.stats().sensor_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_end_signal_reports_and_releases() {
        let scene = SimulatedScene::new();
        let (ctx, mut rx, _store) = context();
        let (platform, mut platform_rx) = mpsc::channel(4);
        let monitor = ScreenMonitor::new(scene.screen(), Duration::from_secs(30), platform, ctx);

        let Ok(Activation::Activated(handle)) = monitor.start().await else {
            panic!("screen share should activate");
        };
        // Initial "sharing" reading.
        assert!(matches!(rx.recv().await, Some(EngineEvent::Readings(_))));

        assert!(scene.end_screen_share());
        assert_eq!(
            platform_rx.recv().await,
            Some(PlatformEvent::ScreenShareEnded { handle_id: handle })
        );
        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::SensorStatus {
                kind: SensorKind::ScreenShare,
                status: SensorStatus::Inactive,
            })
        );
        assert_eq!(scene.live_streams(SensorKind::ScreenShare), 0);
    }
}
