//! Sensor resources and their lifecycles.
//!
//! - [`device`]: the traits a host implements for its capture APIs
//! - [`lifecycle`]: per-sensor activation state machine
//! - [`simulated`]: scriptable devices for demos, replay and tests

pub mod device;
pub mod lifecycle;
pub mod simulated;
pub mod types;

pub use device::{AudioStream, CaptureDevice, CaptureStream, LandmarkDetector, ScreenStream, VideoStream};
pub use lifecycle::{Activation, Deactivation, SensorHandle, SensorLifecycle};
pub use types::{FaceLandmarks, Frame, Landmark, SensorError, SensorKind, SensorReading, SensorStatus};
