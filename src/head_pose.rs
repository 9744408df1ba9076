//! Coarse head pose from 2D face landmarks.
//!
//! This is a closed-form approximation rather than a 3D solve. It only needs to
//! be good enough to compensate iris vectors for head rotation, and it sits
//! behind [`HeadPoseEstimator`] so a proper solver can replace it.

use crate::{
    constants::{
        CHIN, FRONTAL_PITCH_RATIO, LEFT_EAR, LEFT_EYE_OUTER, MAX_HEAD_ANGLE_DEG, NOSE_TIP, PITCH_GAIN_DEG, RIGHT_EAR,
        RIGHT_EYE_OUTER, YAW_GAIN_DEG,
    },
    landmarks::FaceLandmarks,
};

/// Normalized distances below this are treated as collapsed geometry
const GEOMETRY_EPSILON: f64 = 1e-6;

/// Head rotation in degrees, each angle within ±45
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadPose {
    /// Rotation about the vertical axis, positive when the nose moves toward the image right
    pub yaw: f64,
    /// Rotation about the horizontal axis, positive when the head tilts down
    pub pitch: f64,
    /// In-plane rotation of the eye line, positive clockwise in image coordinates
    pub roll: f64,
}

impl HeadPose {
    /// Build a pose, clamping every angle to ±45 degrees
    #[must_use]
    pub fn clamped(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self {
            yaw: clamp_angle(yaw),
            pitch: clamp_angle(pitch),
            roll: clamp_angle(roll),
        }
    }
}

fn clamp_angle(angle: f64) -> f64 {
    if angle.is_nan() {
        return 0.0;
    }
    angle.clamp(-MAX_HEAD_ANGLE_DEG, MAX_HEAD_ANGLE_DEG)
}

/// Estimates head orientation from one frame of landmarks
pub trait HeadPoseEstimator: Send {
    /// Estimate the pose; missing landmarks give a neutral pose
    fn estimate(&self, landmarks: &FaceLandmarks) -> HeadPose;
}

/// Landmark ratio heuristic
#[derive(Debug, Clone, Copy, Default)]
pub struct LandmarkHeadPose;

impl LandmarkHeadPose {
    /// Nose offset from the ear midpoint, relative to the ear span
    fn yaw(landmarks: &FaceLandmarks) -> Option<f64> {
        let nose = landmarks.get(NOSE_TIP)?;
        let left_ear = landmarks.get(LEFT_EAR)?;
        let right_ear = landmarks.get(RIGHT_EAR)?;

        let span = (right_ear.x - left_ear.x).abs();
        if span < GEOMETRY_EPSILON {
            return None;
        }
        let ear_mid_x = (left_ear.x + right_ear.x) / 2.0;
        Some((nose.x - ear_mid_x) / span * YAW_GAIN_DEG)
    }

    /// Deviation of the nose-to-eye / nose-to-chin ratio from a frontal face
    fn pitch(landmarks: &FaceLandmarks) -> Option<f64> {
        let nose = landmarks.get(NOSE_TIP)?;
        let chin = landmarks.get(CHIN)?;
        let left_eye = landmarks.get(LEFT_EYE_OUTER)?;
        let right_eye = landmarks.get(RIGHT_EYE_OUTER)?;

        let eye_mid_y = (left_eye.y + right_eye.y) / 2.0;
        let nose_to_eye = nose.y - eye_mid_y;
        let nose_to_chin = chin.y - nose.y;
        if nose_to_chin.abs() < GEOMETRY_EPSILON {
            return None;
        }
        Some((nose_to_eye / nose_to_chin - FRONTAL_PITCH_RATIO) * PITCH_GAIN_DEG)
    }

    /// Slope of the line through the outer eye corners, in pixels
    fn roll(landmarks: &FaceLandmarks) -> Option<f64> {
        let (lx, ly) = landmarks.pixel(LEFT_EYE_OUTER)?;
        let (rx, ry) = landmarks.pixel(RIGHT_EYE_OUTER)?;
        if (rx - lx).abs() < GEOMETRY_EPSILON && (ry - ly).abs() < GEOMETRY_EPSILON {
            return None;
        }
        Some((ry - ly).atan2(rx - lx).to_degrees())
    }
}

impl HeadPoseEstimator for LandmarkHeadPose {
    fn estimate(&self, landmarks: &FaceLandmarks) -> HeadPose {
        HeadPose::clamped(
            Self::yaw(landmarks).unwrap_or(0.0),
            Self::pitch(landmarks).unwrap_or(0.0),
            Self::roll(landmarks).unwrap_or(0.0),
        )
    }
}
