//! Ambient audio level estimation.
//!
//! Only the level is measured. Buffer contents are discarded after the RMS
//! is taken; nothing about speech or content is derived.

use crate::core::geometry::AnalysisError;
use crate::sensor::types::SensorReading;
use statrs::statistics::Statistics;

/// Default ceiling in dBFS. Values closer to zero are louder.
pub const DEFAULT_NOISE_THRESHOLD_DB: f64 = -5.0;

/// Byte value that represents zero amplitude.
const MIDPOINT: f64 = 128.0;

/// Root-mean-square of byte amplitudes normalized to [-1, 1].
pub fn rms(samples: &[u8]) -> Result<f64, AnalysisError> {
    if samples.is_empty() {
        return Err(AnalysisError::EmptyBuffer);
    }
    let normalized: Vec<f64> = samples
        .iter()
        .map(|&b| ((b as f64 - MIDPOINT) / MIDPOINT).clamp(-1.0, 1.0))
        .collect();
    Ok(normalized.quadratic_mean())
}

/// Convert an RMS amplitude to dBFS. Silence is negative infinity.
pub fn to_dbfs(rms: f64) -> f64 {
    if rms <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}

/// Whether a level exceeds the ceiling (i.e. the room is too loud).
pub fn exceeds_ceiling(dbfs: f64, threshold_db: f64) -> bool {
    dbfs > threshold_db
}

/// Stateless analyser for one audio buffer per tick.
#[derive(Debug, Clone, Copy)]
pub struct AudioLevelAnalyzer {
    threshold_db: f64,
}

impl AudioLevelAnalyzer {
    pub fn new(threshold_db: f64) -> Self {
        Self { threshold_db }
    }

    /// Analyse one buffer. An unusable buffer yields the neutral reading.
    pub fn analyze(&self, samples: &[u8]) -> SensorReading {
        match rms(samples) {
            Ok(level) => {
                let decibels = to_dbfs(level);
                SensorReading::Audio {
                    decibels,
                    above_threshold: exceeds_ceiling(decibels, self.threshold_db),
                }
            }
            Err(e) => {
                tracing::trace!(error = %e, "audio sample skipped");
                SensorReading::Audio {
                    decibels: f64::NEG_INFINITY,
                    above_threshold: false,
                }
            }
        }
    }
}

impl Default for AudioLevelAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_THRESHOLD_DB)
    }
}
