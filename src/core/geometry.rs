//! Head-pose estimation from facial landmark geometry.
//!
//! The estimate is a cheap proxy, not a calibrated angle: yaw compares the
//! nose tip against the midpoint of the inner eye corners, pitch compares the
//! nose drop below the eyes against overall face height.

use crate::sensor::types::{FaceLandmarks, Landmark, SensorReading};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Landmark indices in the 468-point face mesh.
pub mod mesh {
    pub const FOREHEAD: usize = 10;
    pub const NOSE_TIP: usize = 1;
    pub const LEFT_EYE_INNER: usize = 133;
    pub const RIGHT_EYE_INNER: usize = 362;
    pub const BETWEEN_EYES: usize = 168;
    pub const CHIN: usize = 152;
    /// Number of points a complete mesh carries.
    pub const POINT_COUNT: usize = 468;
}

/// Distances at or below this are treated as degenerate geometry.
const MIN_EXTENT: f64 = 1e-6;

/// A sample that cannot be interpreted. Never escalated: callers fall back
/// to a neutral reading.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("landmark {0} missing from face mesh")]
    MissingLandmark(usize),

    #[error("sample buffer is empty")]
    EmptyBuffer,

    #[error("degenerate face geometry")]
    DegenerateGeometry,

    #[error("landmark detection failed: {0}")]
    Detection(String),
}

/// Pose thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseThresholds {
    pub yaw: f64,
    pub pitch: f64,
    /// Nose-drop ratio of a neutral, screen-facing head
    pub pitch_calibration_offset: f64,
}

impl Default for PoseThresholds {
    fn default() -> Self {
        Self {
            yaw: 0.3,
            pitch: 0.05,
            pitch_calibration_offset: 0.22,
        }
    }
}

/// Normalized head-rotation proxies for one face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub yaw: f64,
    pub pitch: f64,
}

impl PoseEstimate {
    pub fn is_looking_away(&self, thresholds: &PoseThresholds) -> bool {
        self.yaw.abs() > thresholds.yaw || self.pitch.abs() > thresholds.pitch
    }
}

/// Interpretation of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum FaceVerdict {
    NoFace,
    MultipleFaces { count: u32 },
    SingleFace { looking_away: bool },
}

impl FaceVerdict {
    pub fn face_count(&self) -> u32 {
        match self {
            FaceVerdict::NoFace => 0,
            FaceVerdict::MultipleFaces { count } => *count,
            FaceVerdict::SingleFace { .. } => 1,
        }
    }

    pub fn into_reading(self) -> SensorReading {
        SensorReading::Face {
            face_count: self.face_count(),
            looking_away: matches!(self, FaceVerdict::SingleFace { looking_away: true }),
        }
    }
}

/// Estimate yaw and pitch for a single face.
///
/// Fails on a truncated mesh or when the eyes or face collapse to a point.
pub fn estimate_pose(
    face: &FaceLandmarks,
    calibration_offset: f64,
) -> Result<PoseEstimate, AnalysisError> {
    let point = |index: usize| face.get(index).ok_or(AnalysisError::MissingLandmark(index));

    let nose = point(mesh::NOSE_TIP)?;
    let left_eye = point(mesh::LEFT_EYE_INNER)?;
    let right_eye = point(mesh::RIGHT_EYE_INNER)?;
    let between_eyes = point(mesh::BETWEEN_EYES)?;
    let forehead = point(mesh::FOREHEAD)?;
    let chin = point(mesh::CHIN)?;

    let inter_eye_distance = left_eye.distance(&right_eye);
    let face_height = (chin.y - forehead.y).abs();
    if inter_eye_distance <= MIN_EXTENT || face_height <= MIN_EXTENT {
        return Err(AnalysisError::DegenerateGeometry);
    }

    let eye_mid = Landmark::new(
        (left_eye.x + right_eye.x) / 2.0,
        (left_eye.y + right_eye.y) / 2.0,
    );
    let yaw = (nose.x - eye_mid.x) / inter_eye_distance;
    let pitch = ((nose.y - between_eyes.y) / face_height).abs() - calibration_offset;

    Ok(PoseEstimate { yaw, pitch })
}

/// Turn a detection pass into a verdict.
///
/// Pose is only evaluated for exactly one face. Uninterpretable geometry is
/// not a violation.
pub fn analyze_faces(faces: &[FaceLandmarks], thresholds: &PoseThresholds) -> FaceVerdict {
    match faces {
        [] => FaceVerdict::NoFace,
        [face] => {
            let looking_away = match estimate_pose(face, thresholds.pitch_calibration_offset) {
                Ok(pose) => pose.is_looking_away(thresholds),
                Err(e) => {
                    tracing::trace!(error = %e, "pose not evaluated");
                    false
                }
            };
            FaceVerdict::SingleFace { looking_away }
        }
        many => FaceVerdict::MultipleFaces {
            count: many.len() as u32,
        },
    }
}

/// Build a full-size mesh with the pose keypoints placed at the given positions.
///
/// Used by simulated detectors and tests; all other points sit at the nose.
pub fn synthetic_face(yaw: f64, pitch: f64, calibration_offset: f64) -> FaceLandmarks {
    let left_eye = Landmark::new(0.4, 0.4);
    let right_eye = Landmark::new(0.6, 0.4);
    let forehead = Landmark::new(0.5, 0.2);
    let chin = Landmark::new(0.5, 0.8);
    let inter_eye = left_eye.distance(&right_eye);
    let height = chin.y - forehead.y;
    let nose = Landmark::new(
        0.5 + yaw * inter_eye,
        0.4 + (pitch + calibration_offset) * height,
    );

    let mut points = vec![nose; mesh::POINT_COUNT];
    points[mesh::LEFT_EYE_INNER] = left_eye;
    points[mesh::RIGHT_EYE_INNER] = right_eye;
    points[mesh::BETWEEN_EYES] = Landmark::new(0.5, 0.4);
    points[mesh::FOREHEAD] = forehead;
    points[mesh::CHIN] = chin;
    FaceLandmarks::new(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const OFFSET: f64 = 0.22;

    #[test]
    fn test_no_faces() {
        let verdict = analyze_faces(&[], &PoseThresholds::default());
        assert_eq!(verdict, FaceVerdict::NoFace);
        assert_eq!(
            verdict.into_reading(),
            SensorReading::Face {
                face_count: 0,
                looking_away: false
            }
        );
    }

    #[test]
    fn test_multiple_faces_skip_pose() {
        // Both faces turned hard; pose must not be evaluated.
        let faces = vec![synthetic_face(0.9, 0.0, OFFSET), synthetic_face(0.9, 0.0, OFFSET)];
        let verdict = analyze_faces(&faces, &PoseThresholds::default());
        assert_eq!(verdict, FaceVerdict::MultipleFaces { count: 2 });
        assert_eq!(
            verdict.into_reading(),
            SensorReading::Face {
                face_count: 2,
                looking_away: false
            }
        );
    }

    #[test]
    fn test_synthetic_face_round_trips_pose() {
        let pose = estimate_pose(&synthetic_face(0.45, 0.0, OFFSET), OFFSET).unwrap();
        assert_abs_diff_eq!(pose.yaw, 0.45, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.pitch, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_yaw_threshold() {
        let thresholds = PoseThresholds::default();
        let away = analyze_faces(&[synthetic_face(0.45, 0.0, OFFSET)], &thresholds);
        assert_eq!(away, FaceVerdict::SingleFace { looking_away: true });

        let ahead = analyze_faces(&[synthetic_face(0.1, 0.0, OFFSET)], &thresholds);
        assert_eq!(ahead, FaceVerdict::SingleFace { looking_away: false });

        let left = analyze_faces(&[synthetic_face(-0.45, 0.0, OFFSET)], &thresholds);
        assert_eq!(left, FaceVerdict::SingleFace { looking_away: true });
    }

    #[test]
    fn test_pitch_threshold() {
        let thresholds = PoseThresholds::default();
        let down = analyze_faces(&[synthetic_face(0.0, 0.1, OFFSET)], &thresholds);
        assert_eq!(down, FaceVerdict::SingleFace { looking_away: true });

        let slight = analyze_faces(&[synthetic_face(0.0, 0.02, OFFSET)], &thresholds);
        assert_eq!(slight, FaceVerdict::SingleFace { looking_away: false });
    }

    #[test]
    fn test_calibration_offset_is_independent_of_threshold() {
        // Same nose position; a different neutral offset shifts the pitch once.
        let face = synthetic_face(0.0, 0.0, OFFSET);
        let pose = estimate_pose(&face, 0.30).unwrap();
        assert_abs_diff_eq!(pose.pitch, OFFSET - 0.30, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_inter_eye_distance_is_not_a_violation() {
        let mut face = synthetic_face(0.9, 0.0, OFFSET);
        face.points[mesh::RIGHT_EYE_INNER] = face.points[mesh::LEFT_EYE_INNER];

        assert_eq!(
            estimate_pose(&face, OFFSET),
            Err(AnalysisError::DegenerateGeometry)
        );
        let verdict = analyze_faces(&[face], &PoseThresholds::default());
        assert_eq!(verdict, FaceVerdict::SingleFace { looking_away: false });
    }

    #[test]
    fn test_zero_face_height_is_not_a_violation() {
        let mut face = synthetic_face(0.0, 0.5, OFFSET);
        face.points[mesh::CHIN] = face.points[mesh::FOREHEAD];
        let verdict = analyze_faces(&[face], &PoseThresholds::default());
        assert_eq!(verdict, FaceVerdict::SingleFace { looking_away: false });
    }

    #[test]
    fn test_truncated_mesh() {
        let face = FaceLandmarks::new(vec![Landmark::new(0.5, 0.5); 10]);
        assert!(matches!(
            estimate_pose(&face, OFFSET),
            Err(AnalysisError::MissingLandmark(_))
        ));
        let verdict = analyze_faces(&[face], &PoseThresholds::default());
        assert_eq!(verdict, FaceVerdict::SingleFace { looking_away: false });
    }
}
