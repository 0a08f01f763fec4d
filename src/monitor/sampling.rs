//! Sampling loops.
//!
//! Each loop is bound to one handle id. Before every sample it re-reads the
//! lifecycle's current handle, and exits as soon as that handle is gone or
//! has been replaced, so a loop never outlives the activation it was started
//! for.
//!
//! A read error is retried on the next tick. After
//! [`MAX_CONSECUTIVE_READ_ERRORS`] in a row the stream is treated as dead: the
//! sensor is released, its status becomes `Failed`, and the engine is told.
//! A dead stream is never a violation.

use super::LoopContext;
use crate::core::aggregator::TimedReading;
use crate::core::audio::AudioLevelAnalyzer;
use crate::core::geometry::{analyze_faces, PoseThresholds};
use crate::report::{Artifact, ArtifactKind};
use crate::sensor::device::{AudioStream, CaptureDevice, LandmarkDetector, VideoStream};
use crate::sensor::lifecycle::{Deactivation, SensorLifecycle};
use crate::sensor::types::{Frame, SensorError, SensorKind, SensorReading};
use crate::session::EngineEvent;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Failed reads in a row before a stream is declared dead.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 3;

/// Wait for the next tick. Returns false once the session is cancelled.
async fn next_tick(interval: &mut tokio::time::Interval, ctx: &LoopContext) -> bool {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => false,
        _ = interval.tick() => true,
    }
}

fn still_live<D: CaptureDevice>(lifecycle: &SensorLifecycle<D>, handle: Uuid) -> bool {
    lifecycle.handle_id() == Some(handle)
}

async fn forward(ctx: &LoopContext, reading: SensorReading) -> bool {
    let event = EngineEvent::Readings(vec![TimedReading::new(reading, Utc::now())]);
    ctx.events.send(event).await.is_ok()
}

/// Count one failed read. Returns true once the loop should stop.
async fn read_failed<D: CaptureDevice>(
    lifecycle: &SensorLifecycle<D>,
    handle: Uuid,
    error: SensorError,
    failures: &mut u32,
    ctx: &LoopContext,
) -> bool {
    *failures += 1;
    let kind = lifecycle.kind();
    if *failures < MAX_CONSECUTIVE_READ_ERRORS {
        tracing::debug!(sensor = %kind, %error, attempt = *failures, "stream read failed");
        return false;
    }

    if let Deactivation::Released(_) = lifecycle.fail(handle, error) {
        ctx.transparency.record_sensor_failure();
        let status = EngineEvent::SensorStatus {
            kind,
            status: lifecycle.status(),
        };
        let _ = ctx.events.send(status).await;
    }
    true
}

/// Hand a frame to the upload collaborator without waiting for the result.
pub fn spawn_upload(ctx: &LoopContext, kind: ArtifactKind, frame: Frame) {
    let artifact = Artifact::new(ctx.session_id, &ctx.user_id, kind, frame);
    let uploader = ctx.uploader.clone();
    let transparency = ctx.transparency.clone();
    tokio::spawn(async move {
        match uploader.upload(artifact).await {
            Ok(()) => transparency.record_artifact_uploaded(),
            Err(e) => {
                transparency.record_persistence_failure();
                tracing::warn!(?kind, error = %e, "artifact upload failed");
            }
        }
    });
}

/// Face detection and head pose, once per `interval`.
///
/// The first frame of each activation is also uploaded as the reference photo.
pub async fn pose_loop<D>(
    lifecycle: Arc<SensorLifecycle<D>>,
    handle: Uuid,
    detector: Arc<dyn LandmarkDetector>,
    thresholds: PoseThresholds,
    interval: Duration,
    ctx: LoopContext,
) where
    D: CaptureDevice,
    D::Stream: VideoStream,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reference_sent = false;
    let mut failures = 0;
    tracing::debug!(%handle, ?interval, "pose loop started");

    while next_tick(&mut ticker, &ctx).await {
        if !still_live(&lifecycle, handle) {
            break;
        }
        let frame = match lifecycle.with_stream(|s| s.grab_frame()) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                if read_failed(&lifecycle, handle, e, &mut failures, &ctx).await {
                    break;
                }
                continue;
            }
            None => break,
        };
        failures = 0;

        if !reference_sent {
            reference_sent = true;
            spawn_upload(&ctx, ArtifactKind::ReferencePhoto, frame.clone());
        }

        let reading = match detector.detect(&frame).await {
            Ok(faces) => analyze_faces(&faces, &thresholds).into_reading(),
            Err(e) => {
                tracing::debug!(error = %e, "detection failed; using neutral reading");
                SensorReading::neutral(SensorKind::Camera)
            }
        };

        // Deactivated while the detector ran.
        if !still_live(&lifecycle, handle) {
            break;
        }
        lifecycle.record_reading(reading);
        ctx.transparency.record_sample(SensorKind::Camera);
        if !forward(&ctx, reading).await {
            break;
        }
    }
    tracing::debug!(%handle, "pose loop stopped");
}

/// Ambient noise level, once per `interval`.
pub async fn audio_loop<D>(
    lifecycle: Arc<SensorLifecycle<D>>,
    handle: Uuid,
    analyzer: AudioLevelAnalyzer,
    interval: Duration,
    ctx: LoopContext,
) where
    D: CaptureDevice,
    D::Stream: AudioStream,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buffer = Vec::new();
    let mut failures = 0;
    tracing::debug!(%handle, ?interval, "audio loop started");

    while next_tick(&mut ticker, &ctx).await {
        if !still_live(&lifecycle, handle) {
            break;
        }
        let read = lifecycle.with_stream(|s| {
            buffer.resize(s.buffer_len(), 128);
            s.read_amplitudes(&mut buffer)
        });
        let reading = match read {
            Some(Ok(())) => analyzer.analyze(&buffer),
            Some(Err(e)) => {
                if read_failed(&lifecycle, handle, e, &mut failures, &ctx).await {
                    break;
                }
                continue;
            }
            None => break,
        };
        failures = 0;

        lifecycle.record_reading(reading);
        ctx.transparency.record_sample(SensorKind::Microphone);
        if !forward(&ctx, reading).await {
            break;
        }
    }
    tracing::debug!(%handle, "audio loop stopped");
}

/// Periodic screenshots of the shared surface. Feeds uploads only.
pub async fn screenshot_loop<D>(
    lifecycle: Arc<SensorLifecycle<D>>,
    handle: Uuid,
    interval: Duration,
    ctx: LoopContext,
) where
    D: CaptureDevice,
    D::Stream: VideoStream,
{
    // First capture one full interval after sharing starts.
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures = 0;
    tracing::debug!(%handle, ?interval, "screenshot loop started");

    while next_tick(&mut ticker, &ctx).await {
        if !still_live(&lifecycle, handle) {
            break;
        }
        match lifecycle.with_stream(|s| s.grab_frame()) {
            Some(Ok(frame)) => {
                failures = 0;
                spawn_upload(&ctx, ArtifactKind::Screenshot, frame);
            }
            Some(Err(e)) => {
                if read_failed(&lifecycle, handle, e, &mut failures, &ctx).await {
                    break;
                }
            }
            None => break,
        }
    }
    tracing::debug!(%handle, "screenshot loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::DirectoryArtifactStore;
    use crate::transparency::create_shared_log;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_only_written_artifacts_count_as_uploaded() {
        let root = std::env::temp_dir().join(format!("sampling-{}", Uuid::new_v4()));
        let store = Arc::new(DirectoryArtifactStore::new(&root).unwrap());
        let session_id = Uuid::new_v4();
        let (events, _rx) = mpsc::channel(4);
        let ctx = LoopContext {
            session_id,
            user_id: "u-1".to_string(),
            events,
            uploader: store.clone(),
            transparency: create_shared_log(),
            cancel: CancellationToken::new(),
        };

        spawn_upload(&ctx, ArtifactKind::ReferencePhoto, Frame::new(1, 1, vec![0]));
        for _ in 0..200 {
            if ctx.transparency.stats().artifacts_uploaded > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ctx.transparency.stats().artifacts_uploaded, 1);

        // The writer cannot create the session directory under a plain file.
        let blocked_session = Uuid::new_v4();
        std::fs::write(root.join(blocked_session.to_string()), b"occupied").unwrap();
        let ctx = LoopContext {
            session_id: blocked_session,
            ..ctx
        };
        spawn_upload(&ctx, ArtifactKind::Screenshot, Frame::new(1, 1, vec![0]));
        for _ in 0..200 {
            if ctx.transparency.stats().persistence_failures > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = ctx.transparency.stats();
        assert_eq!(stats.persistence_failures, 1);
        assert_eq!(stats.artifacts_uploaded, 1);
        assert_eq!(store.failed(), 1);

        store.shutdown();
        std::fs::remove_dir_all(root).ok();
    }
}
