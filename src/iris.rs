//! Per-eye iris vectors, blink gating and eye combination.

use crate::{
    config::{EyeSelection, GazeConfig, HeadPoseConfig, TrackingMethod},
    constants::{
        BLINK_THRESHOLD, FULL_CONFIDENCE, LEFT_EYE_BOTTOM, LEFT_EYE_INNER, LEFT_EYE_OUTER, LEFT_EYE_TOP,
        LEFT_IRIS_CENTER, MAX_HEAD_ANGLE_DEG, MIN_EYE_WIDTH_PX, OFFSET_TARGET_MARGIN_PX, RIGHT_EYE_BOTTOM, RIGHT_EYE_INNER, RIGHT_EYE_OUTER,
        RIGHT_EYE_TOP, RIGHT_IRIS_CENTER, SENSITIVITY_MAX, SENSITIVITY_MIN, SINGLE_EYE_CONFIDENCE,
    },
    head_pose::HeadPose,
    landmarks::FaceLandmarks,
};
use log::debug;

/// Normalized gaze vector, nominally within [-1, 1] on both axes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GazeVector {
    /// Horizontal component, positive toward the image right
    pub x: f64,
    /// Vertical component, positive toward the image bottom
    pub y: f64,
}

impl GazeVector {
    /// Create a vector
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamp both components to [-1, 1]
    #[must_use]
    pub fn clamped(self) -> Self {
        Self::new(self.x.clamp(-1.0, 1.0), self.y.clamp(-1.0, 1.0))
    }

    /// Component-wise mean of two vectors
    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        Self::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Which eye
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    /// Left eye
    Left,
    /// Right eye
    Right,
}

/// Landmark indices describing one eye
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EyeLandmarks {
    /// Outer corner
    pub outer: usize,
    /// Inner corner
    pub inner: usize,
    /// Upper eyelid midpoint
    pub top: usize,
    /// Lower eyelid midpoint
    pub bottom: usize,
    /// Iris centre
    pub iris: usize,
}

impl Eye {
    /// Face mesh indices of this eye
    #[must_use]
    pub const fn landmarks(self) -> EyeLandmarks {
        match self {
            Self::Left => EyeLandmarks {
                outer: LEFT_EYE_OUTER,
                inner: LEFT_EYE_INNER,
                top: LEFT_EYE_TOP,
                bottom: LEFT_EYE_BOTTOM,
                iris: LEFT_IRIS_CENTER,
            },
            Self::Right => EyeLandmarks {
                outer: RIGHT_EYE_OUTER,
                inner: RIGHT_EYE_INNER,
                top: RIGHT_EYE_TOP,
                bottom: RIGHT_EYE_BOTTOM,
                iris: RIGHT_IRIS_CENTER,
            },
        }
    }
}

/// Gaze vector of one eye with the iris location it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeEstimate {
    /// Sensitivity-scaled, offset and clamped vector
    pub vector: GazeVector,
    /// Iris centre in frame pixels
    pub iris_pixel: (f64, f64),
}

/// Everything measured from the eyes of one frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EyeMeasurements {
    /// Left eye estimate, absent when blinking, unselected or degenerate
    pub left: Option<EyeEstimate>,
    /// Right eye estimate, absent when blinking, unselected or degenerate
    pub right: Option<EyeEstimate>,
    /// Left eye closed
    pub left_blink: bool,
    /// Right eye closed
    pub right_blink: bool,
}

/// Turns eye landmarks into raw gaze vectors
#[derive(Debug, Clone)]
pub struct IrisGazeCalculator {
    sensitivity_x: f64,
    sensitivity_y: f64,
    offset_x: f64,
    offset_y: f64,
    tracking_method: TrackingMethod,
    compensation_enabled: bool,
    yaw_factor: f64,
    pitch_factor: f64,
}

impl IrisGazeCalculator {
    /// Create a calculator from configuration
    #[must_use]
    pub fn new(gaze: &GazeConfig, head_pose: &HeadPoseConfig) -> Self {
        let mut calculator = Self {
            sensitivity_x: 1.0,
            sensitivity_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            tracking_method: gaze.tracking_method,
            compensation_enabled: head_pose.compensation_enabled,
            yaw_factor: head_pose.yaw_factor,
            pitch_factor: head_pose.pitch_factor,
        };
        calculator.set_sensitivity(gaze.sensitivity_x, gaze.sensitivity_y);
        calculator.set_offset(gaze.offset_x, gaze.offset_y);
        calculator
    }

    /// Set sensitivity, each axis clamped to [0.5, 5.0]
    pub fn set_sensitivity(&mut self, x: f64, y: f64) {
        self.sensitivity_x = x.clamp(SENSITIVITY_MIN, SENSITIVITY_MAX);
        self.sensitivity_y = y.clamp(SENSITIVITY_MIN, SENSITIVITY_MAX);
    }

    /// Current sensitivity
    #[must_use]
    pub const fn sensitivity(&self) -> (f64, f64) {
        (self.sensitivity_x, self.sensitivity_y)
    }

    /// Set offset, each axis clamped to [-1, 1]
    pub fn set_offset(&mut self, x: f64, y: f64) {
        self.offset_x = x.clamp(-1.0, 1.0);
        self.offset_y = y.clamp(-1.0, 1.0);
    }

    /// Current offset
    #[must_use]
    pub const fn offset(&self) -> (f64, f64) {
        (self.offset_x, self.offset_y)
    }

    /// Set how the iris is located
    pub fn set_tracking_method(&mut self, method: TrackingMethod) {
        self.tracking_method = method;
    }

    /// Current iris location method
    #[must_use]
    pub const fn tracking_method(&self) -> TrackingMethod {
        self.tracking_method
    }

    /// Enable or disable head pose compensation and set its factors
    pub fn set_head_compensation(&mut self, enabled: bool, yaw_factor: f64, pitch_factor: f64) {
        self.compensation_enabled = enabled;
        self.yaw_factor = yaw_factor.max(0.0);
        self.pitch_factor = pitch_factor.max(0.0);
    }

    /// Whether head pose compensation is applied
    #[must_use]
    pub const fn compensation_enabled(&self) -> bool {
        self.compensation_enabled
    }

    /// Blink state of (left, right) from the vertical eyelid gap
    #[must_use]
    pub fn detect_blinks(landmarks: &FaceLandmarks) -> (bool, bool) {
        (Self::is_blinking(landmarks, Eye::Left), Self::is_blinking(landmarks, Eye::Right))
    }

    fn is_blinking(landmarks: &FaceLandmarks, eye: Eye) -> bool {
        let indices = eye.landmarks();
        match (landmarks.get(indices.top), landmarks.get(indices.bottom)) {
            (Some(top), Some(bottom)) => (bottom.y - top.y).abs() < BLINK_THRESHOLD,
            _ => false,
        }
    }

    /// Gaze vector of one eye.
    ///
    /// `None` when landmarks are missing or the eye is narrower than a pixel.
    #[must_use]
    pub fn eye_vector(&self, landmarks: &FaceLandmarks, eye: Eye) -> Option<EyeEstimate> {
        let indices = eye.landmarks();
        let (outer_x, outer_y) = landmarks.pixel(indices.outer)?;
        let (inner_x, inner_y) = landmarks.pixel(indices.inner)?;

        let eye_width = (inner_x - outer_x).hypot(inner_y - outer_y);
        if !(eye_width >= MIN_EYE_WIDTH_PX) {
            return None;
        }
        let center = ((outer_x + inner_x) / 2.0, (outer_y + inner_y) / 2.0);

        let iris = self.iris_pixel(landmarks, indices, (outer_x, outer_y), (inner_x, inner_y))?;

        // The eye opening is roughly half as tall as it is wide
        let raw_x = (iris.0 - center.0) / (eye_width / 2.0);
        let raw_y = (iris.1 - center.1) / (eye_width / 4.0);

        let vector = GazeVector::new(
            raw_x.mul_add(self.sensitivity_x, self.offset_x),
            raw_y.mul_add(self.sensitivity_y, self.offset_y),
        )
        .clamped();

        Some(EyeEstimate {
            vector,
            iris_pixel: iris,
        })
    }

    fn iris_pixel(
        &self,
        landmarks: &FaceLandmarks,
        indices: EyeLandmarks,
        outer: (f64, f64),
        inner: (f64, f64),
    ) -> Option<(f64, f64)> {
        if self.tracking_method == TrackingMethod::Iris {
            if let Some(iris) = landmarks.pixel(indices.iris) {
                return Some(iris);
            }
        }

        let top = landmarks.pixel(indices.top)?;
        let bottom = landmarks.pixel(indices.bottom)?;
        Some((
            (outer.0 + inner.0 + top.0 + bottom.0) / 4.0,
            (outer.1 + inner.1 + top.1 + bottom.1) / 4.0,
        ))
    }

    /// Blink-gated estimates for the eyes the selection uses
    #[must_use]
    pub fn measure(&self, landmarks: &FaceLandmarks, selection: EyeSelection) -> EyeMeasurements {
        let (left_blink, right_blink) = Self::detect_blinks(landmarks);
        let use_left = selection != EyeSelection::RightOnly && !left_blink;
        let use_right = selection != EyeSelection::LeftOnly && !right_blink;

        EyeMeasurements {
            left: if use_left { self.eye_vector(landmarks, Eye::Left) } else { None },
            right: if use_right { self.eye_vector(landmarks, Eye::Right) } else { None },
            left_blink,
            right_blink,
        }
    }

    /// Combine per-eye vectors into one vector with a confidence
    #[must_use]
    pub fn combine(
        left: Option<GazeVector>,
        right: Option<GazeVector>,
        selection: EyeSelection,
    ) -> Option<(GazeVector, f64)> {
        match selection {
            EyeSelection::LeftOnly => left.map(|v| (v, FULL_CONFIDENCE)),
            EyeSelection::RightOnly => right.map(|v| (v, FULL_CONFIDENCE)),
            EyeSelection::BothEyes => match (left, right) {
                (Some(l), Some(r)) => Some((l.midpoint(r), FULL_CONFIDENCE)),
                (Some(v), None) | (None, Some(v)) => Some((v, SINGLE_EYE_CONFIDENCE)),
                (None, None) => None,
            },
        }
    }

    /// Remove the apparent iris shift caused by head rotation
    #[must_use]
    pub fn compensate(&self, vector: GazeVector, pose: &HeadPose) -> GazeVector {
        if !self.compensation_enabled {
            return vector;
        }
        GazeVector::new(
            (pose.yaw / MAX_HEAD_ANGLE_DEG).mul_add(-self.yaw_factor, vector.x),
            (pose.pitch / MAX_HEAD_ANGLE_DEG).mul_add(-self.pitch_factor, vector.y),
        )
        .clamped()
    }
}

impl Default for IrisGazeCalculator {
    fn default() -> Self {
        Self::new(&GazeConfig::default(), &HeadPoseConfig::default())
    }
}

/// Gaze measured while the user fixated one quick-calibration target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetMeasurement {
    /// Gaze vector pointing exactly at the target
    pub expected: GazeVector,
    /// Mean gaze vector reported while fixating it
    pub measured: GazeVector,
}

impl OffsetMeasurement {
    /// Measurement for a target given in screen pixels
    #[must_use]
    pub fn at_screen_point(screen_x: f64, screen_y: f64, screen_width: u32, screen_height: u32, measured: GazeVector) -> Self {
        let expected = GazeVector::new(
            screen_x / f64::from(screen_width) * 2.0 - 1.0,
            screen_y / f64::from(screen_height) * 2.0 - 1.0,
        );
        Self { expected, measured }
    }

    /// Expected minus measured
    #[must_use]
    pub fn error(&self) -> GazeVector {
        GazeVector::new(self.expected.x - self.measured.x, self.expected.y - self.measured.y)
    }
}

/// Quick offset calibration targets in pixels: centre, top, bottom, left, right
#[must_use]
pub fn offset_calibration_targets(screen_width: u32, screen_height: u32) -> [(f64, f64); 5] {
    let (width, height) = (f64::from(screen_width), f64::from(screen_height));
    let margin_x = OFFSET_TARGET_MARGIN_PX.min(width / 2.0);
    let margin_y = OFFSET_TARGET_MARGIN_PX.min(height / 2.0);
    let (cx, cy) = (width / 2.0, height / 2.0);
    [
        (cx, cy),
        (cx, margin_y),
        (cx, height - margin_y),
        (margin_x, cy),
        (width - margin_x, cy),
    ]
}

/// New gaze offsets that cancel the mean bias of `measurements`.
///
/// The mean error is added to `current_offset` and the result clamped to
/// [-1, 1]. `None` without measurements.
#[must_use]
pub fn compute_offset_correction(current_offset: (f64, f64), measurements: &[OffsetMeasurement]) -> Option<(f64, f64)> {
    if measurements.is_empty() {
        return None;
    }
    let n = measurements.len() as f64;
    let (sum_x, sum_y) = measurements
        .iter()
        .map(OffsetMeasurement::error)
        .fold((0.0, 0.0), |(sx, sy), e| (sx + e.x, sy + e.y));
    let (error_x, error_y) = (sum_x / n, sum_y / n);
    debug!("Mean offset error ({error_x:+.3}, {error_y:+.3}) over {} targets", measurements.len());

    Some((
        (current_offset.0 + error_x).clamp(-1.0, 1.0),
        (current_offset.1 + error_y).clamp(-1.0, 1.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::LandmarkPoint;

    fn unit_calculator() -> IrisGazeCalculator {
        let gaze = GazeConfig {
            sensitivity_x: 1.0,
            sensitivity_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            ..GazeConfig::default()
        };
        IrisGazeCalculator::new(&gaze, &HeadPoseConfig::default())
    }

    /// Left eye 0.1 wide (64 px at 640), centred on (0.4, 0.4)
    fn left_eye_face(iris: (f64, f64), lid_gap: f64) -> FaceLandmarks {
        let mut points = vec![LandmarkPoint::new(0.5, 0.5); 478];
        points[LEFT_EYE_OUTER] = LandmarkPoint::new(0.35, 0.4);
        points[LEFT_EYE_INNER] = LandmarkPoint::new(0.45, 0.4);
        points[LEFT_EYE_TOP] = LandmarkPoint::new(0.4, 0.4 - lid_gap / 2.0);
        points[LEFT_EYE_BOTTOM] = LandmarkPoint::new(0.4, 0.4 + lid_gap / 2.0);
        points[LEFT_IRIS_CENTER] = LandmarkPoint::new(iris.0, iris.1);
        FaceLandmarks {
            points,
            frame_width: 640,
            frame_height: 640,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_centered_iris_gives_zero_vector() {
        let estimate = unit_calculator()
            .eye_vector(&left_eye_face((0.4, 0.4), 0.03), Eye::Left)
            .unwrap();
        assert!(estimate.vector.x.abs() < 1e-9);
        assert!(estimate.vector.y.abs() < 1e-9);
        assert!((estimate.iris_pixel.0 - 256.0).abs() < 1e-9);
    }

    #[test]
    fn test_vertical_axis_uses_quarter_width() {
        // 0.0125 is a quarter of the half-width horizontally, half the quarter-width vertically
        let estimate = unit_calculator()
            .eye_vector(&left_eye_face((0.4125, 0.4125), 0.03), Eye::Left)
            .unwrap();
        assert!((estimate.vector.x - 0.25).abs() < 1e-9);
        assert!((estimate.vector.y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sensitivity_offset_and_clamp() {
        let mut calculator = unit_calculator();
        calculator.set_sensitivity(2.0, 2.0);
        calculator.set_offset(0.1, -0.1);

        let estimate = calculator
            .eye_vector(&left_eye_face((0.4125, 0.4125), 0.03), Eye::Left)
            .unwrap();
        assert!((estimate.vector.x - 0.6).abs() < 1e-9);
        assert!((estimate.vector.y - 0.9).abs() < 1e-9);

        let estimate = calculator
            .eye_vector(&left_eye_face((0.45, 0.45), 0.03), Eye::Left)
            .unwrap();
        assert_eq!(estimate.vector, GazeVector::new(1.0, 1.0));
    }

    #[test]
    fn test_setters_clamp() {
        let mut calculator = unit_calculator();
        calculator.set_sensitivity(0.1, 9.0);
        assert_eq!(calculator.sensitivity(), (SENSITIVITY_MIN, SENSITIVITY_MAX));
        calculator.set_offset(-3.0, 3.0);
        assert_eq!(calculator.offset(), (-1.0, 1.0));
    }

    #[test]
    fn test_degenerate_eye_width() {
        let mut face = left_eye_face((0.4, 0.4), 0.03);
        face.points[LEFT_EYE_INNER] = LandmarkPoint::new(0.3501, 0.4);
        assert!(unit_calculator().eye_vector(&face, Eye::Left).is_none());
    }

    #[test]
    fn test_contour_method_ignores_iris_landmark() {
        let mut calculator = unit_calculator();
        calculator.set_tracking_method(TrackingMethod::EyeContour);
        let estimate = calculator
            .eye_vector(&left_eye_face((0.44, 0.44), 0.03), Eye::Left)
            .unwrap();
        assert!(estimate.vector.x.abs() < 1e-9);
        assert!(estimate.vector.y.abs() < 1e-9);
    }

    #[test]
    fn test_iris_method_falls_back_without_iris_landmarks() {
        let mut face = left_eye_face((0.44, 0.44), 0.03);
        face.points.truncate(468);
        let estimate = unit_calculator().eye_vector(&face, Eye::Left).unwrap();
        assert!(estimate.vector.x.abs() < 1e-9);
    }

    #[test]
    fn test_blink_detection() {
        let (left, _) = IrisGazeCalculator::detect_blinks(&left_eye_face((0.4, 0.4), 0.005));
        assert!(left);
        let (left, _) = IrisGazeCalculator::detect_blinks(&left_eye_face((0.4, 0.4), 0.03));
        assert!(!left);
    }

    #[test]
    fn test_combine_both_eyes() {
        let l = GazeVector::new(0.2, 0.4);
        let r = GazeVector::new(0.4, 0.0);

        let (v, c) = IrisGazeCalculator::combine(Some(l), Some(r), EyeSelection::BothEyes).unwrap();
        assert!((v.x - 0.3).abs() < 1e-12 && (v.y - 0.2).abs() < 1e-12);
        assert_eq!(c, FULL_CONFIDENCE);

        let (v, c) = IrisGazeCalculator::combine(None, Some(r), EyeSelection::BothEyes).unwrap();
        assert_eq!(v, r);
        assert_eq!(c, SINGLE_EYE_CONFIDENCE);

        assert!(IrisGazeCalculator::combine(None, None, EyeSelection::BothEyes).is_none());
    }

    #[test]
    fn test_combine_single_eye_selection() {
        let l = GazeVector::new(0.2, 0.4);
        assert_eq!(
            IrisGazeCalculator::combine(Some(l), None, EyeSelection::LeftOnly),
            Some((l, FULL_CONFIDENCE))
        );
        assert!(IrisGazeCalculator::combine(Some(l), None, EyeSelection::RightOnly).is_none());
    }

    #[test]
    fn test_head_pose_compensation() {
        let calculator = IrisGazeCalculator::new(
            &GazeConfig::default(),
            &HeadPoseConfig {
                compensation_enabled: true,
                yaw_factor: 0.4,
                pitch_factor: 0.2,
            },
        );
        let pose = HeadPose::clamped(22.5, -45.0, 0.0);
        let v = calculator.compensate(GazeVector::new(0.5, 0.0), &pose);
        assert!((v.x - 0.3).abs() < 1e-12);
        assert!((v.y - 0.2).abs() < 1e-12);

        let v = calculator.compensate(GazeVector::new(-0.9, 0.0), &HeadPose::clamped(45.0, 0.0, 0.0));
        assert_eq!(v.x, -1.0);
    }

    #[test]
    fn test_compensation_disabled() {
        let mut calculator = IrisGazeCalculator::default();
        calculator.set_head_compensation(false, 1.0, 1.0);
        let v = GazeVector::new(0.5, 0.5);
        assert_eq!(calculator.compensate(v, &HeadPose::clamped(30.0, 30.0, 0.0)), v);
    }

    #[test]
    fn test_offset_correction_cancels_bias() {
        let targets = offset_calibration_targets(1000, 800);
        assert_eq!(targets[0], (500.0, 400.0));
        assert_eq!(targets[1], (500.0, 150.0));
        assert_eq!(targets[4], (850.0, 400.0));

        // Every target reads 0.2 right and 0.1 low of where it should
        let measurements: Vec<OffsetMeasurement> = targets
            .iter()
            .map(|&(x, y)| {
                let expected = OffsetMeasurement::at_screen_point(x, y, 1000, 800, GazeVector::default()).expected;
                let measured = GazeVector::new(expected.x + 0.2, expected.y + 0.1);
                OffsetMeasurement::at_screen_point(x, y, 1000, 800, measured)
            })
            .collect();

        let (x, y) = compute_offset_correction((0.0, 0.3), &measurements).unwrap();
        assert!((x + 0.2).abs() < 1e-12);
        assert!((y - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_offset_correction_clamps_and_needs_input() {
        let measurement = OffsetMeasurement {
            expected: GazeVector::new(0.0, 0.0),
            measured: GazeVector::new(-0.8, 0.9),
        };
        assert_eq!(compute_offset_correction((0.5, -0.5), &[measurement]), Some((1.0, -1.0)));
        assert_eq!(compute_offset_correction((0.5, -0.5), &[]), None);
    }

    #[test]
    fn test_offset_targets_on_tiny_screen() {
        for (x, y) in offset_calibration_targets(200, 100) {
            assert!((0.0..=200.0).contains(&x) && (0.0..=100.0).contains(&y));
        }
    }
}
