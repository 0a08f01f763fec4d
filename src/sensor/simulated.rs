//! Simulated capture devices backed by a shared, scriptable scene.
//!
//! Used by scenario replay, the demo, and tests. Nothing here touches real
//! hardware: the "camera" reports whatever faces the scene holds, the
//! "microphone" produces a square wave at the scene's noise amplitude, and
//! the "screen" can be ended on demand to mimic the user pressing
//! "stop sharing".

use crate::core::geometry::{synthetic_face, AnalysisError, PoseThresholds};
use crate::sensor::device::{
    AudioStream, CaptureDevice, CaptureStream, LandmarkDetector, ScreenStream, VideoStream,
};
use crate::sensor::types::{FaceLandmarks, Frame, SensorError, SensorKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Head pose of one simulated face.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulatedFace {
    #[serde(default)]
    pub yaw: f64,
    #[serde(default)]
    pub pitch: f64,
}

impl SimulatedFace {
    pub fn facing_screen() -> Self {
        Self::default()
    }

    pub fn turned(yaw: f64) -> Self {
        Self { yaw, pitch: 0.0 }
    }
}

/// How the simulated user answers a permission prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionResponse {
    Grant,
    Deny,
    Missing,
    Busy,
}

impl PermissionResponse {
    fn into_result(self) -> Result<(), SensorError> {
        match self {
            PermissionResponse::Grant => Ok(()),
            PermissionResponse::Deny => Err(SensorError::PermissionDenied),
            PermissionResponse::Missing => Err(SensorError::DeviceNotFound),
            PermissionResponse::Busy => Err(SensorError::DeviceBusy),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    acquired: usize,
    released: usize,
}

struct SceneInner {
    faces: Vec<SimulatedFace>,
    noise_amplitude: u8,
    detector_fails: bool,
    permission_delay: Duration,
    prompt_delays: BTreeMap<SensorKind, Duration>,
    permissions: BTreeMap<SensorKind, PermissionResponse>,
    capture_errors: BTreeMap<SensorKind, SensorError>,
    usage: BTreeMap<SensorKind, Usage>,
    screen_end: Option<oneshot::Sender<()>>,
    frames: u64,
}

/// Shared world state the simulated devices observe.
#[derive(Clone)]
pub struct SimulatedScene {
    inner: Arc<Mutex<SceneInner>>,
    calibration_offset: f64,
}

impl SimulatedScene {
    /// A quiet room with one candidate facing the screen; every permission granted.
    pub fn new() -> Self {
        Self::with_calibration(PoseThresholds::default().pitch_calibration_offset)
    }

    pub fn with_calibration(calibration_offset: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SceneInner {
                faces: vec![SimulatedFace::facing_screen()],
                noise_amplitude: 0,
                detector_fails: false,
                permission_delay: Duration::ZERO,
                prompt_delays: BTreeMap::new(),
                permissions: BTreeMap::new(),
                capture_errors: BTreeMap::new(),
                usage: BTreeMap::new(),
                screen_end: None,
                frames: 0,
            })),
            calibration_offset,
        }
    }

    pub fn set_faces(&self, faces: Vec<SimulatedFace>) {
        self.inner.lock().faces = faces;
    }

    pub fn faces(&self) -> Vec<SimulatedFace> {
        self.inner.lock().faces.clone()
    }

    /// Peak deviation from the 128 midpoint. 0 is silence, 127 is full scale.
    pub fn set_noise(&self, amplitude: u8) {
        self.inner.lock().noise_amplitude = amplitude.min(127);
    }

    pub fn set_detector_fails(&self, fails: bool) {
        self.inner.lock().detector_fails = fails;
    }

    /// How long every permission prompt stays open.
    pub fn set_permission_delay(&self, delay: Duration) {
        self.inner.lock().permission_delay = delay;
    }

    /// Prompt delay for one sensor, overriding [`set_permission_delay`](Self::set_permission_delay).
    pub fn set_prompt_delay(&self, kind: SensorKind, delay: Duration) {
        self.inner.lock().prompt_delays.insert(kind, delay);
    }

    /// Make every read from live `kind` streams fail with `error`; `None` heals them.
    pub fn set_capture_error(&self, kind: SensorKind, error: Option<SensorError>) {
        let mut inner = self.inner.lock();
        match error {
            Some(error) => inner.capture_errors.insert(kind, error),
            None => inner.capture_errors.remove(&kind),
        };
    }

    pub fn set_permission(&self, kind: SensorKind, response: PermissionResponse) {
        self.inner.lock().permissions.insert(kind, response);
    }

    /// Fire the "track ended" signal of the live screen stream, if any.
    pub fn end_screen_share(&self) -> bool {
        match self.inner.lock().screen_end.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Number of capture primitives handed out for `kind`.
    pub fn acquisitions(&self, kind: SensorKind) -> usize {
        self.inner.lock().usage.get(&kind).map_or(0, |u| u.acquired)
    }

    /// Number of capture primitives stopped for `kind`.
    pub fn releases(&self, kind: SensorKind) -> usize {
        self.inner.lock().usage.get(&kind).map_or(0, |u| u.released)
    }

    /// Acquired but not yet stopped.
    pub fn live_streams(&self, kind: SensorKind) -> usize {
        let inner = self.inner.lock();
        inner
            .usage
            .get(&kind)
            .map_or(0, |u| u.acquired.saturating_sub(u.released))
    }

    pub fn camera(&self) -> SimulatedCamera {
        SimulatedCamera {
            scene: self.clone(),
        }
    }

    pub fn microphone(&self) -> SimulatedMicrophone {
        SimulatedMicrophone {
            scene: self.clone(),
            buffer_len: 1024,
        }
    }

    pub fn screen(&self) -> SimulatedScreen {
        SimulatedScreen {
            scene: self.clone(),
        }
    }

    pub fn detector(&self) -> SimulatedDetector {
        SimulatedDetector {
            scene: self.clone(),
        }
    }

    async fn prompt(&self, kind: SensorKind) -> Result<(), SensorError> {
        let delay = {
            let inner = self.inner.lock();
            inner
                .prompt_delays
                .get(&kind)
                .copied()
                .unwrap_or(inner.permission_delay)
        };
        if !delay.is_zero() {
            tracing::debug!(sensor = %kind, ?delay, "simulated permission prompt open");
            tokio::time::sleep(delay).await;
        }
        let response = self
            .inner
            .lock()
            .permissions
            .get(&kind)
            .cloned()
            .unwrap_or(PermissionResponse::Grant);
        response.into_result()?;
        self.inner.lock().usage.entry(kind).or_default().acquired += 1;
        Ok(())
    }

    fn release(&self, kind: SensorKind) {
        let mut inner = self.inner.lock();
        inner.usage.entry(kind).or_default().released += 1;
        if kind == SensorKind::ScreenShare {
            inner.screen_end = None;
        }
    }

    fn capture_error(&self, kind: SensorKind) -> Result<(), SensorError> {
        match self.inner.lock().capture_errors.get(&kind) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn frame(&self, kind: SensorKind) -> Result<Frame, SensorError> {
        self.capture_error(kind)?;
        let mut inner = self.inner.lock();
        inner.frames += 1;
        let data = format!("simulated {kind} frame {}", inner.frames).into_bytes();
        Ok(Frame::new(640, 480, data))
    }
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated webcam.
pub struct SimulatedCamera {
    scene: SimulatedScene,
}

/// Simulated microphone.
pub struct SimulatedMicrophone {
    scene: SimulatedScene,
    buffer_len: usize,
}

/// Simulated display-capture source.
pub struct SimulatedScreen {
    scene: SimulatedScene,
}

/// Live stream for the simulated camera.
pub struct SimulatedVideoStream {
    scene: SimulatedScene,
    kind: SensorKind,
    stopped: bool,
}

impl CaptureStream for SimulatedVideoStream {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.scene.release(self.kind);
        }
    }
}

impl VideoStream for SimulatedVideoStream {
    fn grab_frame(&mut self) -> Result<Frame, SensorError> {
        if self.stopped {
            return Err(SensorError::Interrupted);
        }
        self.scene.frame(self.kind)
    }
}

/// Live stream for the simulated microphone.
pub struct SimulatedAudioStream {
    scene: SimulatedScene,
    buffer_len: usize,
    connected: bool,
    stopped: bool,
}

impl CaptureStream for SimulatedAudioStream {
    fn connect(&mut self) -> Result<(), SensorError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.scene.release(SensorKind::Microphone);
        }
    }
}

impl AudioStream for SimulatedAudioStream {
    fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    fn read_amplitudes(&mut self, out: &mut [u8]) -> Result<(), SensorError> {
        if !self.connected || self.stopped {
            return Err(SensorError::Interrupted);
        }
        self.scene.capture_error(SensorKind::Microphone)?;
        let amplitude = self.scene.inner.lock().noise_amplitude;
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = if i % 2 == 0 {
                128 + amplitude
            } else {
                128 - amplitude
            };
        }
        Ok(())
    }
}

/// Live stream for the simulated screen share.
pub struct SimulatedScreenStream {
    video: SimulatedVideoStream,
    end_signal: Option<oneshot::Receiver<()>>,
}

impl CaptureStream for SimulatedScreenStream {
    fn stop(&mut self) {
        self.video.stop();
    }
}

impl VideoStream for SimulatedScreenStream {
    fn grab_frame(&mut self) -> Result<Frame, SensorError> {
        self.video.grab_frame()
    }
}

impl ScreenStream for SimulatedScreenStream {
    fn take_end_signal(&mut self) -> Option<oneshot::Receiver<()>> {
        self.end_signal.take()
    }
}

#[async_trait]
impl CaptureDevice for SimulatedCamera {
    type Stream = SimulatedVideoStream;

    fn kind(&self) -> SensorKind {
        SensorKind::Camera
    }

    async fn acquire(&self) -> Result<Self::Stream, SensorError> {
        self.scene.prompt(SensorKind::Camera).await?;
        Ok(SimulatedVideoStream {
            scene: self.scene.clone(),
            kind: SensorKind::Camera,
            stopped: false,
        })
    }
}

#[async_trait]
impl CaptureDevice for SimulatedMicrophone {
    type Stream = SimulatedAudioStream;

    fn kind(&self) -> SensorKind {
        SensorKind::Microphone
    }

    async fn acquire(&self) -> Result<Self::Stream, SensorError> {
        self.scene.prompt(SensorKind::Microphone).await?;
        Ok(SimulatedAudioStream {
            scene: self.scene.clone(),
            buffer_len: self.buffer_len,
            connected: false,
            stopped: false,
        })
    }
}

#[async_trait]
impl CaptureDevice for SimulatedScreen {
    type Stream = SimulatedScreenStream;

    fn kind(&self) -> SensorKind {
        SensorKind::ScreenShare
    }

    async fn acquire(&self) -> Result<Self::Stream, SensorError> {
        self.scene.prompt(SensorKind::ScreenShare).await?;
        let (tx, rx) = oneshot::channel();
        self.scene.inner.lock().screen_end = Some(tx);
        Ok(SimulatedScreenStream {
            video: SimulatedVideoStream {
                scene: self.scene.clone(),
                kind: SensorKind::ScreenShare,
                stopped: false,
            },
            end_signal: Some(rx),
        })
    }
}

/// Landmark detector that reports the scene's faces as synthetic meshes.
pub struct SimulatedDetector {
    scene: SimulatedScene,
}

#[async_trait]
impl LandmarkDetector for SimulatedDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<FaceLandmarks>, AnalysisError> {
        let (faces, fails) = {
            let inner = self.scene.inner.lock();
            (inner.faces.clone(), inner.detector_fails)
        };
        if fails {
            return Err(AnalysisError::Detection("simulated model failure".to_string()));
        }
        Ok(faces
            .iter()
            .map(|f| synthetic_face(f.yaw, f.pitch, self.scene.calibration_offset))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::AudioLevelAnalyzer;
    use crate::core::geometry::{analyze_faces, FaceVerdict};
    use crate::sensor::types::SensorReading;

    #[tokio::test]
    async fn test_denied_permission_does_not_count_acquisition() {
        let scene = SimulatedScene::new();
        scene.set_permission(SensorKind::Camera, PermissionResponse::Deny);

        let result = scene.camera().acquire().await;
        assert!(matches!(result, Err(SensorError::PermissionDenied)));
        assert_eq!(scene.acquisitions(SensorKind::Camera), 0);
    }

    #[tokio::test]
    async fn test_stop_releases_once() {
        let scene = SimulatedScene::new();
        let mut stream = scene.camera().acquire().await.unwrap();
        assert_eq!(scene.live_streams(SensorKind::Camera), 1);

        stream.stop();
        stream.stop();
        assert_eq!(scene.releases(SensorKind::Camera), 1);
        assert_eq!(scene.live_streams(SensorKind::Camera), 0);
        assert!(stream.grab_frame().is_err());
    }

    #[tokio::test]
    async fn test_noise_amplitude_drives_audio_level() {
        let scene = SimulatedScene::new();
        let mut stream = scene.microphone().acquire().await.unwrap();
        stream.connect().unwrap();
        let mut buffer = vec![0u8; stream.buffer_len()];
        let analyzer = AudioLevelAnalyzer::default();

        stream.read_amplitudes(&mut buffer).unwrap();
        assert!(matches!(
            analyzer.analyze(&buffer),
            SensorReading::Audio {
                above_threshold: false,
                ..
            }
        ));

        scene.set_noise(120);
        stream.read_amplitudes(&mut buffer).unwrap();
        assert!(matches!(
            analyzer.analyze(&buffer),
            SensorReading::Audio {
                above_threshold: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_detector_reports_scene_faces() {
        let scene = SimulatedScene::new();
        let detector = scene.detector();
        let frame = Frame::new(1, 1, Vec::new());
        let thresholds = PoseThresholds::default();

        let faces = detector.detect(&frame).await.unwrap();
        assert_eq!(
            analyze_faces(&faces, &thresholds),
            FaceVerdict::SingleFace {
                looking_away: false
            }
        );

        scene.set_faces(vec![SimulatedFace::turned(0.6)]);
        let faces = detector.detect(&frame).await.unwrap();
        assert_eq!(
            analyze_faces(&faces, &thresholds),
            FaceVerdict::SingleFace { looking_away: true }
        );

        scene.set_faces(Vec::new());
        let faces = detector.detect(&frame).await.unwrap();
        assert_eq!(analyze_faces(&faces, &thresholds), FaceVerdict::NoFace);
    }

    #[tokio::test]
    async fn test_capture_error_fails_reads_until_healed() {
        let scene = SimulatedScene::new();
        let mut stream = scene.camera().acquire().await.unwrap();

        scene.set_capture_error(SensorKind::Camera, Some(SensorError::Interrupted));
        assert_eq!(stream.grab_frame(), Err(SensorError::Interrupted));

        scene.set_capture_error(SensorKind::Camera, None);
        assert!(stream.grab_frame().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_delay_applies_per_sensor() {
        let scene = SimulatedScene::new();
        scene.set_prompt_delay(SensorKind::ScreenShare, Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        scene.camera().acquire().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        scene.screen().acquire().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_screen_end_signal_fires_once() {
        let scene = SimulatedScene::new();
        let mut stream = scene.screen().acquire().await.unwrap();
        let signal = stream.take_end_signal().expect("signal available");
        assert!(stream.take_end_signal().is_none());

        assert!(scene.end_screen_share());
        assert!(signal.await.is_ok());
        assert!(!scene.end_screen_share());
    }
}
