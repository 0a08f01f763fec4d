//! Typed readings and resources exchanged between sensors and the engine.
//!
//! Readings carry only the verdicts extracted from a sample - never the raw
//! frame or audio buffer they were derived from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The three capture resources a proctored session manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Camera,
    Microphone,
    ScreenShare,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Camera,
        SensorKind::Microphone,
        SensorKind::ScreenShare,
    ];

    /// Parse a user-facing sensor name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "camera" | "webcam" => Some(SensorKind::Camera),
            "microphone" | "mic" => Some(SensorKind::Microphone),
            "screen" | "screen_share" | "screenshare" => Some(SensorKind::ScreenShare),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Camera => write!(f, "camera"),
            SensorKind::Microphone => write!(f, "microphone"),
            SensorKind::ScreenShare => write!(f, "screen_share"),
        }
    }
}

/// One verdict produced per sample tick or platform edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorReading {
    Face { face_count: u32, looking_away: bool },
    Audio { decibels: f64, above_threshold: bool },
    Visibility { hidden: bool },
    ScreenShare { active: bool },
}

impl SensorReading {
    /// The non-violating reading for a sensor kind.
    ///
    /// Used when a sample cannot be analysed and when a sensor is torn down.
    pub fn neutral(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Camera => SensorReading::Face {
                face_count: 1,
                looking_away: false,
            },
            SensorKind::Microphone => SensorReading::Audio {
                decibels: f64::NEG_INFINITY,
                above_threshold: false,
            },
            SensorKind::ScreenShare => SensorReading::ScreenShare { active: true },
        }
    }
}

/// A normalized 2-D facial landmark (0.0-1.0 in both axes).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Landmark) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Ordered landmark mesh for one detected face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<Landmark>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.points.get(index).copied()
    }
}

/// A raw captured image. Opaque to the engine apart from forwarding.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Encoded image bytes as delivered by the capture primitive
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            captured_at: Utc::now(),
        }
    }
}

/// Failures while acquiring or running a capture resource.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum SensorError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not found")]
    DeviceNotFound,

    #[error("device busy")]
    DeviceBusy,

    #[error("capture interrupted")]
    Interrupted,

    #[error("processing graph setup failed: {0}")]
    GraphSetup(String),
}

/// Availability of a sensor as shown to the candidate, separate from violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SensorStatus {
    Inactive,
    Activating,
    Active,
    Failed { error: SensorError },
}

impl SensorStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SensorStatus::Active)
    }
}
