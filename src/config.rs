//! Configuration for the proctoring engine.

use crate::core::geometry::PoseThresholds;
use crate::sensor::types::SensorKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for a proctored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Normalized yaw beyond which the candidate counts as looking away
    pub yaw_threshold: f64,

    /// Normalized pitch beyond which the candidate counts as looking away
    pub pitch_threshold: f64,

    /// Nose-drop ratio of a neutral head, subtracted before the pitch check
    pub pitch_calibration_offset: f64,

    /// Noise ceiling in dBFS
    pub noise_threshold_db: f64,

    /// Pose loop period
    #[serde(rename = "detection_interval_ms", with = "duration_ms_serde")]
    pub detection_interval: Duration,

    /// Audio loop period
    #[serde(rename = "audio_interval_ms", with = "duration_ms_serde")]
    pub audio_interval: Duration,

    /// Screenshot loop period
    #[serde(rename = "screenshot_interval_ms", with = "duration_ms_serde")]
    pub screenshot_interval: Duration,

    /// Exam length
    #[serde(rename = "session_duration_seconds", with = "duration_serde")]
    pub session_duration: Duration,

    /// How often the countdown is refreshed
    #[serde(rename = "timer_tick_ms", with = "duration_ms_serde")]
    pub timer_tick: Duration,

    /// Capacity of the engine's event queue
    pub event_queue_capacity: usize,

    /// Sensors whose activation failure aborts the session before it starts
    pub required_sensors: RequiredSensors,

    /// Path for session reports and artifacts
    pub export_path: PathBuf,

    /// Path for the violation log and transparency stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("proctor-engine");
        let thresholds = PoseThresholds::default();

        Self {
            yaw_threshold: thresholds.yaw,
            pitch_threshold: thresholds.pitch,
            pitch_calibration_offset: thresholds.pitch_calibration_offset,
            noise_threshold_db: crate::core::audio::DEFAULT_NOISE_THRESHOLD_DB,
            detection_interval: Duration::from_millis(500),
            audio_interval: Duration::from_millis(100),
            screenshot_interval: Duration::from_secs(30),
            session_duration: Duration::from_secs(1800), // 30 minutes
            timer_tick: Duration::from_secs(1),
            event_queue_capacity: 256,
            required_sensors: RequiredSensors::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("proctor-engine")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("detection_interval_ms", self.detection_interval),
            ("audio_interval_ms", self.audio_interval),
            ("screenshot_interval_ms", self.screenshot_interval),
            ("session_duration_seconds", self.session_duration),
            ("timer_tick_ms", self.timer_tick),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        for (name, value) in [
            ("yaw_threshold", self.yaw_threshold),
            ("pitch_threshold", self.pitch_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be a positive number")));
            }
        }
        if !self.noise_threshold_db.is_finite() {
            return Err(ConfigError::Invalid(
                "noise_threshold_db must be finite".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pose_thresholds(&self) -> PoseThresholds {
        PoseThresholds {
            yaw: self.yaw_threshold,
            pitch: self.pitch_threshold,
            pitch_calibration_offset: self.pitch_calibration_offset,
        }
    }

    pub fn violation_log_path(&self) -> PathBuf {
        self.data_path.join("violations.jsonl")
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.export_path.join("artifacts")
    }
}

/// Which sensors must activate for a session to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredSensors {
    pub camera: bool,
    pub microphone: bool,
    pub screen_share: bool,
}

impl Default for RequiredSensors {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            screen_share: true,
        }
    }
}

impl RequiredSensors {
    pub fn none() -> Self {
        Self {
            camera: false,
            microphone: false,
            screen_share: false,
        }
    }

    /// Parse a comma-separated list such as `camera,microphone` or `all`/`none`.
    pub fn from_csv(s: &str) -> Result<Self, ConfigError> {
        let mut required = Self::none();
        for item in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.to_lowercase().as_str() {
                "all" => required = Self::default(),
                "none" => {}
                other => match SensorKind::parse(other) {
                    Some(kind) => required.set(kind, true),
                    None => {
                        return Err(ConfigError::Invalid(format!("unknown sensor '{other}'")));
                    }
                },
            }
        }
        Ok(required)
    }

    pub fn contains(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Camera => self.camera,
            SensorKind::Microphone => self.microphone,
            SensorKind::ScreenShare => self.screen_share,
        }
    }

    pub fn set(&mut self, kind: SensorKind, required: bool) {
        match kind {
            SensorKind::Camera => self.camera = required,
            SensorKind::Microphone => self.microphone = required,
            SensorKind::ScreenShare => self.screen_share = required,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("serialize error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_sensor_parsing() {
        let required = RequiredSensors::from_csv("camera,mic").unwrap();
        assert!(required.camera);
        assert!(required.microphone);
        assert!(!required.screen_share);

        let required = RequiredSensors::from_csv("camera,microphone,screen").unwrap();
        assert_eq!(required, RequiredSensors::default());

        assert_eq!(RequiredSensors::from_csv("none").unwrap(), RequiredSensors::none());
        assert_eq!(RequiredSensors::from_csv("all").unwrap(), RequiredSensors::default());
        assert!(RequiredSensors::from_csv("camera,keyboard").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.yaw_threshold, 0.3);
        assert_eq!(config.pitch_threshold, 0.05);
        assert_eq!(config.noise_threshold_db, -5.0);
        assert_eq!(config.detection_interval, Duration::from_millis(500));
        assert_eq!(config.screenshot_interval, Duration::from_secs(30));
        assert_eq!(config.session_duration, Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_field_names_and_partial_files() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["detection_interval_ms"], 500);
        assert_eq!(json["screenshot_interval_ms"], 30000);
        assert_eq!(json["session_duration_seconds"], 1800);

        let partial: Config =
            serde_json::from_str(r#"{"session_duration_seconds": 60, "yaw_threshold": 0.4}"#)
                .unwrap();
        assert_eq!(partial.session_duration, Duration::from_secs(60));
        assert_eq!(partial.yaw_threshold, 0.4);
        assert_eq!(partial.pitch_threshold, 0.05);
    }

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let mut config = Config::default();
        config.detection_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.yaw_threshold = -1.0;
        assert!(config.validate().is_err());
    }
}
