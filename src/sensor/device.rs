//! Platform capture primitives the engine drives but never looks inside.
//!
//! A host embeds the engine by implementing [`CaptureDevice`] for its camera,
//! microphone and screen-capture APIs, and [`LandmarkDetector`] for its face
//! landmark model. The engine only ever sees the traits.

use crate::core::geometry::AnalysisError;
use crate::sensor::types::{FaceLandmarks, Frame, SensorError, SensorKind};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Factory for one kind of capture stream.
#[async_trait]
pub trait CaptureDevice: Send + Sync + 'static {
    type Stream: CaptureStream;

    fn kind(&self) -> SensorKind;

    /// Request the capture primitive.
    ///
    /// May suspend for as long as the user takes to answer a permission prompt.
    async fn acquire(&self) -> Result<Self::Stream, SensorError>;
}

/// A live capture stream plus whatever processing graph hangs off it.
pub trait CaptureStream: Send + 'static {
    /// Bind the processing graph (analyser node, frame buffer) to the stream.
    fn connect(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    /// Tear the processing graph down. Called before [`CaptureStream::stop`].
    fn disconnect(&mut self) {}

    /// Stop the capture primitive and release the device.
    fn stop(&mut self);
}

/// Streams that expose the current video frame.
pub trait VideoStream: CaptureStream {
    fn grab_frame(&mut self) -> Result<Frame, SensorError>;
}

/// Streams that expose an amplitude buffer from their analyser node.
pub trait AudioStream: CaptureStream {
    /// Number of byte amplitudes one read fills.
    fn buffer_len(&self) -> usize;

    /// Copy the latest amplitudes (centred at 128) into `out`.
    fn read_amplitudes(&mut self, out: &mut [u8]) -> Result<(), SensorError>;
}

/// Screen-capture streams additionally report when the user stops sharing.
pub trait ScreenStream: VideoStream {
    /// Hand out the one-shot "track ended" signal. Subsequent calls return `None`.
    fn take_end_signal(&mut self) -> Option<oneshot::Receiver<()>>;
}

/// External face-landmark model.
#[async_trait]
pub trait LandmarkDetector: Send + Sync + 'static {
    /// Detect every face in `frame`, returning one landmark mesh per face.
    async fn detect(&self, frame: &Frame) -> Result<Vec<FaceLandmarks>, AnalysisError>;
}
