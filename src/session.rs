//! Session orchestration.
//!
//! A session is one engine task that owns the [`ViolationAggregator`] and a
//! set of producer tasks that only ever send it [`EngineEvent`]s:
//!
//! ```text
//!   pose / audio loops ──┐
//!   platform watcher ────┼──▶ mpsc<EngineEvent> ──▶ engine ──▶ watch<SessionState>
//!   session timer ───────┤                            │
//!   sensor activations ──┘                            └──▶ ViolationLog
//! ```
//!
//! The engine applies each event to completion before taking the next, so
//! escalation is totally ordered no matter how many producers are running.

use crate::config::{Config, ConfigError, RequiredSensors};
use crate::core::aggregator::{
    IngestOutcome, SessionState, SessionStatus, TimedReading, ViolationAggregator, ViolationEvent,
    WarningNotice,
};
use crate::core::audio::AudioLevelAnalyzer;
use crate::core::timer::{run_timer, SessionTimer};
use crate::monitor::{
    run_watcher, CameraMonitor, LoopContext, MicrophoneMonitor, Monitor, PlatformEvent, ScreenMonitor,
    VisibilityWatcher,
};
use crate::report::{
    ArtifactUploader, NullArtifactUploader, NullViolationLog, SessionReport, ViolationLog,
    ViolationRecord,
};
use crate::sensor::device::{AudioStream, CaptureDevice, LandmarkDetector, ScreenStream, VideoStream};
use crate::sensor::types::{SensorError, SensorKind, SensorReading, SensorStatus};
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Messages producers send to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Every reading one producer took in one tick.
    Readings(Vec<TimedReading>),
    /// The countdown changed.
    Tick { remaining_secs: u64 },
    /// The countdown reached zero.
    TimeExpired,
    /// A sensor's availability changed outside the engine.
    SensorStatus { kind: SensorKind, status: SensorStatus },
}

enum Command {
    AcknowledgeWarning(oneshot::Sender<Option<WarningNotice>>),
    Finish,
}

/// Errors starting or talking to a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("required sensor {kind} unavailable: {source}")]
    SensorUnavailable {
        kind: SensorKind,
        #[source]
        source: SensorError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session engine stopped")]
    EngineStopped,
}

/// Builder for one proctored session.
pub struct ProctorSession<C, M, S> {
    user_id: String,
    config: Config,
    camera: C,
    microphone: M,
    screen: S,
    detector: Arc<dyn LandmarkDetector>,
    violation_log: Arc<dyn ViolationLog>,
    uploader: Arc<dyn ArtifactUploader>,
    transparency: SharedTransparencyLog,
}

impl<C, M, S> ProctorSession<C, M, S>
where
    C: CaptureDevice,
    C::Stream: VideoStream,
    M: CaptureDevice,
    M::Stream: AudioStream,
    S: CaptureDevice,
    S::Stream: ScreenStream,
{
    pub fn new(
        user_id: impl Into<String>,
        config: Config,
        camera: C,
        microphone: M,
        screen: S,
        detector: impl LandmarkDetector,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            config,
            camera,
            microphone,
            screen,
            detector: Arc::new(detector),
            violation_log: Arc::new(NullViolationLog),
            uploader: Arc::new(NullArtifactUploader),
            transparency: create_shared_log(),
        }
    }

    pub fn with_violation_log(mut self, log: Arc<dyn ViolationLog>) -> Self {
        self.violation_log = log;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ArtifactUploader>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_transparency(mut self, transparency: SharedTransparencyLog) -> Self {
        self.transparency = transparency;
        self
    }

    /// Activate every sensor, then start the clock and the sampling loops.
    ///
    /// Nothing is sampled while permission prompts are open, so behaviour
    /// before the exam starts never counts. Fails without starting the clock
    /// when a required sensor cannot be activated; every sensor acquired so
    /// far is released first.
    pub async fn start(self) -> Result<SessionHandle, SessionError> {
        self.config.validate()?;

        let session_id = Uuid::new_v4();
        // Producers stop when the session blocks; the watcher lives until finish.
        let cancel = CancellationToken::new();
        let producers = cancel.child_token();
        let capacity = self.config.event_queue_capacity;
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (platform_tx, platform_rx) = mpsc::channel(capacity);
        let (commands_tx, commands_rx) = mpsc::channel(8);

        let ctx = LoopContext {
            session_id,
            user_id: self.user_id.clone(),
            events: events_tx.clone(),
            uploader: self.uploader.clone(),
            transparency: self.transparency.clone(),
            cancel: producers.clone(),
        };

        let monitors: Vec<Arc<dyn Monitor>> = vec![
            Arc::new(CameraMonitor::new(
                self.camera,
                self.detector,
                self.config.pose_thresholds(),
                self.config.detection_interval,
                ctx.clone(),
            )),
            Arc::new(MicrophoneMonitor::new(
                self.microphone,
                AudioLevelAnalyzer::new(self.config.noise_threshold_db),
                self.config.audio_interval,
                ctx.clone(),
            )),
            Arc::new(ScreenMonitor::new(
                self.screen,
                self.config.screenshot_interval,
                platform_tx.clone(),
                ctx,
            )),
        ];

        tracing::info!(%session_id, user = %self.user_id, "starting preflight");
        if let Err(e) = preflight(&monitors, &self.config.required_sensors).await {
            cancel.cancel();
            for monitor in &monitors {
                monitor.stop();
            }
            return Err(e);
        }

        let mut aggregator = ViolationAggregator::new(self.config.session_duration.as_secs());
        for monitor in &monitors {
            aggregator.set_sensor_status(monitor.kind(), monitor.status());
        }
        let (state_tx, state_rx) = watch::channel(aggregator.snapshot());

        tokio::spawn(run_watcher(
            VisibilityWatcher::new(),
            platform_rx,
            events_tx.clone(),
            self.transparency.clone(),
            cancel.clone(),
        ));

        let started_at = Utc::now();
        let engine = Engine {
            session_id,
            user_id: self.user_id.clone(),
            started_at,
            aggregator,
            monitors: monitors.clone(),
            violation_log: self.violation_log,
            transparency: self.transparency,
            state: state_tx,
            events: events_tx.clone(),
            cancel,
            producers: producers.clone(),
            closed: Vec::new(),
        };
        let task = tokio::spawn(engine.run(events_rx, commands_rx));

        for monitor in &monitors {
            if let Some(handle) = monitor.handle_id() {
                monitor.spawn_loops(handle).await;
            }
        }
        tokio::spawn(run_timer(
            SessionTimer::start(self.config.session_duration),
            self.config.timer_tick,
            events_tx,
            producers,
        ));
        tracing::info!(%session_id, duration_secs = self.config.session_duration.as_secs(), "session started");

        Ok(SessionHandle {
            session_id,
            user_id: self.user_id,
            started_at,
            state: state_rx,
            platform: platform_tx,
            commands: commands_tx,
            monitors,
            engine: task,
        })
    }
}

/// Activate all sensors concurrently without sampling them. The first
/// required failure wins.
async fn preflight(
    monitors: &[Arc<dyn Monitor>],
    required: &RequiredSensors,
) -> Result<(), SessionError> {
    let mut pending = JoinSet::new();
    for monitor in monitors {
        let monitor = monitor.clone();
        pending.spawn(async move { (monitor.kind(), monitor.activate().await) });
    }

    let mut failure = None;
    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok((kind, Err(source))) => {
                if required.contains(kind) {
                    tracing::error!(sensor = %kind, error = %source, "required sensor unavailable");
                    if failure.is_none() {
                        failure = Some(SessionError::SensorUnavailable { kind, source });
                    }
                } else {
                    tracing::warn!(sensor = %kind, error = %source, "optional sensor unavailable");
                }
            }
            Ok((kind, Ok(activation))) => {
                tracing::debug!(sensor = %kind, ?activation, "preflight activation");
            }
            Err(e) => {
                tracing::error!(error = %e, "preflight task failed");
                if failure.is_none() {
                    failure = Some(SessionError::EngineStopped);
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Host-facing control surface for a running session.
pub struct SessionHandle {
    session_id: Uuid,
    user_id: String,
    started_at: DateTime<Utc>,
    state: watch::Receiver<SessionState>,
    platform: mpsc::Sender<PlatformEvent>,
    commands: mpsc::Sender<Command>,
    monitors: Vec<Arc<dyn Monitor>>,
    engine: JoinHandle<SessionReport>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Latest published state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Renderer feed. Receives a new snapshot whenever the state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Latest verdict from one sensor. Neutral once the sensor is released.
    pub fn latest_reading(&self, kind: SensorKind) -> Option<SensorReading> {
        self.monitors
            .iter()
            .find(|m| m.kind() == kind)
            .map(|m| m.last_reading())
    }

    /// Report that the exam page was hidden or shown.
    pub async fn set_page_hidden(&self, hidden: bool) -> Result<(), SessionError> {
        self.platform
            .send(PlatformEvent::VisibilityChanged { hidden })
            .await
            .map_err(|_| SessionError::EngineStopped)
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState, SessionError> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::EngineStopped)?;
        Ok((*snapshot).clone())
    }

    /// Wait until the session is blocked.
    pub async fn blocked(&self) -> Result<SessionState, SessionError> {
        self.wait_for(|s| s.status == SessionStatus::Blocked).await
    }

    /// Dismiss the pending warning. For a screen-share warning this also
    /// asks the candidate to share their screen again.
    pub async fn acknowledge_warning(&self) -> Result<Option<WarningNotice>, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::AcknowledgeWarning(reply))
            .await
            .map_err(|_| SessionError::EngineStopped)?;
        response.await.map_err(|_| SessionError::EngineStopped)
    }

    /// End the session: release every sensor, close open intervals and
    /// return the report.
    pub async fn finish(self) -> Result<SessionReport, SessionError> {
        // A closed queue means the engine already stopped; its report is still in the task.
        let _ = self.commands.send(Command::Finish).await;
        self.engine.await.map_err(|e| {
            tracing::error!(error = %e, "engine task failed");
            SessionError::EngineStopped
        })
    }
}

/// The single writer of session state.
struct Engine {
    session_id: Uuid,
    user_id: String,
    started_at: DateTime<Utc>,
    aggregator: ViolationAggregator,
    monitors: Vec<Arc<dyn Monitor>>,
    violation_log: Arc<dyn ViolationLog>,
    transparency: SharedTransparencyLog,
    state: watch::Sender<SessionState>,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
    producers: CancellationToken,
    closed: Vec<ViolationEvent>,
}

impl Engine {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<EngineEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) -> SessionReport {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::AcknowledgeWarning(reply)) => {
                        let notice = self.acknowledge_warning();
                        let _ = reply.send(notice);
                    }
                    Some(Command::Finish) | None => break,
                },
                Some(event) = events.recv() => self.handle(event),
            }
        }
        self.shutdown()
    }

    fn handle(&mut self, event: EngineEvent) {
        let now = Utc::now();
        match event {
            EngineEvent::Readings(readings) => {
                let outcome = self.aggregator.ingest_tick(&readings, now);
                self.apply(outcome);
            }
            EngineEvent::Tick { remaining_secs } => self.aggregator.set_remaining(remaining_secs),
            EngineEvent::TimeExpired => {
                let outcome = self.aggregator.expire(now);
                self.apply(outcome);
            }
            EngineEvent::SensorStatus { kind, status } => {
                tracing::debug!(sensor = %kind, ?status, "sensor status changed");
                self.aggregator.set_sensor_status(kind, status);
            }
        }
        self.publish();
    }

    fn apply(&mut self, outcome: IngestOutcome) {
        for event in outcome.closed {
            self.log(event);
        }
        if outcome.escalated_to == Some(SessionStatus::Blocked) {
            self.block();
        }
    }

    /// Terminal: release every sensor and stop all producers.
    fn block(&mut self) {
        tracing::warn!(
            session = %self.session_id,
            count = self.aggregator.violation_count(),
            "session blocked; releasing sensors"
        );
        self.producers.cancel();
        self.release_sensors();
    }

    fn release_sensors(&mut self) {
        for monitor in &self.monitors {
            monitor.stop();
            self.aggregator.set_sensor_status(monitor.kind(), monitor.status());
        }
    }

    fn acknowledge_warning(&mut self) -> Option<WarningNotice> {
        let notice = self.aggregator.acknowledge_warning();
        match &notice {
            Some(notice) if notice.resumable => self.resume_screen_share(),
            Some(notice) => tracing::info!(kind = %notice.kind, "warning acknowledged"),
            None => tracing::debug!("no warning to acknowledge"),
        }
        self.publish();
        notice
    }

    fn resume_screen_share(&mut self) {
        let Some(monitor) = self
            .monitors
            .iter()
            .find(|m| m.kind() == SensorKind::ScreenShare)
            .cloned()
        else {
            return;
        };
        tracing::info!("warning acknowledged; requesting screen share again");
        self.aggregator
            .set_sensor_status(SensorKind::ScreenShare, SensorStatus::Activating);

        let events = self.events.clone();
        let producers = self.producers.clone();
        tokio::spawn(async move {
            if producers.is_cancelled() {
                return;
            }
            if let Err(error) = monitor.start().await {
                tracing::warn!(%error, "screen share could not be resumed");
            }
            let status = EngineEvent::SensorStatus {
                kind: SensorKind::ScreenShare,
                status: monitor.status(),
            };
            let _ = events.send(status).await;
        });
    }

    fn log(&mut self, event: ViolationEvent) {
        let record = ViolationRecord::from_event(&self.user_id, self.session_id, &event);
        match self.violation_log.record(&record) {
            Ok(()) => self.transparency.record_violation_logged(event.kind),
            Err(e) => {
                self.transparency.record_persistence_failure();
                tracing::warn!(kind = %event.kind, error = %e, "violation not persisted");
            }
        }
        self.closed.push(event);
    }

    fn publish(&self) {
        let snapshot = self.aggregator.snapshot();
        self.state.send_if_modified(move |current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn shutdown(mut self) -> SessionReport {
        let ended_at = Utc::now();
        self.cancel.cancel();
        self.release_sensors();
        for event in self.aggregator.finish(ended_at) {
            self.log(event);
        }
        self.publish();

        if let Err(e) = self.transparency.save() {
            tracing::warn!(error = %e, "could not save transparency stats");
        }

        let final_state = self.aggregator.snapshot();
        tracing::info!(
            session = %self.session_id,
            status = ?final_state.status,
            violations = final_state.violation_count,
            "session finished"
        );
        SessionReport {
            session_id: self.session_id,
            user_id: self.user_id,
            started_at: self.started_at,
            ended_at,
            final_state,
            violations: self.closed,
        }
    }
}
