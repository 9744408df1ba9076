//! Constants used throughout the library

/// Landmark count of the face mesh without iris refinement
pub const NUM_FACE_MESH_LANDMARKS: usize = 468;

/// Landmark count of the face mesh with the ten iris points appended
pub const NUM_FACE_MESH_LANDMARKS_WITH_IRIS: usize = 478;

/// Face mesh indices for the left eye
pub const LEFT_EYE_OUTER: usize = 33;
pub const LEFT_EYE_INNER: usize = 133;
pub const LEFT_EYE_TOP: usize = 159;
pub const LEFT_EYE_BOTTOM: usize = 145;
pub const LEFT_IRIS_CENTER: usize = 468;

/// Face mesh indices for the right eye
pub const RIGHT_EYE_OUTER: usize = 263;
pub const RIGHT_EYE_INNER: usize = 362;
pub const RIGHT_EYE_TOP: usize = 386;
pub const RIGHT_EYE_BOTTOM: usize = 374;
pub const RIGHT_IRIS_CENTER: usize = 473;

/// Face mesh indices used by the head pose heuristic
pub const NOSE_TIP: usize = 1;
pub const CHIN: usize = 152;
pub const LEFT_EAR: usize = 234;
pub const RIGHT_EAR: usize = 454;

/// Head angles are clamped to this magnitude (degrees)
pub const MAX_HEAD_ANGLE_DEG: f64 = 45.0;

/// Nose-to-eye over nose-to-chin vertical ratio of a frontal face
pub const FRONTAL_PITCH_RATIO: f64 = 0.6;

/// Degrees of yaw per unit of nose offset relative to the ear span
pub const YAW_GAIN_DEG: f64 = 120.0;

/// Degrees of pitch per unit of deviation from the frontal ratio
pub const PITCH_GAIN_DEG: f64 = 90.0;

/// Vertical eyelid gap (normalized) below which an eye counts as closed
pub const BLINK_THRESHOLD: f64 = 0.015;

/// Eye width (pixels) below which the eye geometry is degenerate
pub const MIN_EYE_WIDTH_PX: f64 = 1.0;

/// Confidence when both eyes contribute, or the selected single eye does
pub const FULL_CONFIDENCE: f64 = 1.0;

/// Confidence when only one eye is available under both-eye selection
pub const SINGLE_EYE_CONFIDENCE: f64 = 0.7;

/// Sensitivity bounds
pub const SENSITIVITY_MIN: f64 = 0.5;
pub const SENSITIVITY_MAX: f64 = 5.0;

/// Default gaze sensitivity and offset
pub const DEFAULT_SENSITIVITY_X: f64 = 2.5;
pub const DEFAULT_SENSITIVITY_Y: f64 = 3.0;
pub const DEFAULT_OFFSET_X: f64 = 0.0;
pub const DEFAULT_OFFSET_Y: f64 = 0.3;

/// Default head pose compensation factors
pub const DEFAULT_YAW_COMPENSATION: f64 = 0.5;
pub const DEFAULT_PITCH_COMPENSATION: f64 = 0.5;

/// Default Kalman noise parameters
pub const DEFAULT_PROCESS_NOISE: f64 = 1e-4;
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 1e-2;

/// Default adaptive filter parameters
pub const DEFAULT_LOW_VELOCITY_THRESHOLD: f64 = 0.02;
pub const DEFAULT_HIGH_VELOCITY_THRESHOLD: f64 = 0.15;
pub const DEFAULT_DWELL_MULTIPLIER: f64 = 3.0;
pub const DEFAULT_RAPID_MULTIPLIER: f64 = 0.3;

/// Number of velocity samples averaged by the adaptive filter
pub const VELOCITY_HISTORY_SIZE: usize = 5;

/// Process noise scaling bounds of the adaptive filter
pub const PROCESS_NOISE_FACTOR_MIN: f64 = 0.5;
pub const PROCESS_NOISE_FACTOR_MAX: f64 = 2.0;

/// Determinant magnitude treated as singular when inverting 2x2 matrices
pub const SINGULAR_DETERMINANT: f64 = 1e-12;

/// Pivot magnitude below which a calibration system is singular
pub const PIVOT_EPSILON: f64 = 1e-10;

/// Calibration defaults
pub const DEFAULT_CALIBRATION_MARGIN: f64 = 0.1;
pub const DEFAULT_CALIBRATION_POINTS: usize = 9;
pub const FAST_CALIBRATION_POINTS: usize = 5;
pub const RECOMMENDED_SAMPLES_PER_POINT: usize = 30;
pub const MIN_SAMPLES_PER_POINT: usize = 10;

/// Minimum valid targets per calibration mode
pub const MIN_AFFINE_TARGETS: usize = 4;
pub const MIN_POLYNOMIAL_TARGETS: usize = 6;

/// IQR fence multiplier for outlier rejection
pub const IQR_FENCE: f64 = 1.5;

/// Below this many samples the robust average is a plain mean
pub const MIN_SAMPLES_FOR_IQR: usize = 4;

/// Inset of the quick offset calibration targets from the screen edges, in pixels
pub const OFFSET_TARGET_MARGIN_PX: f64 = 150.0;

/// Frames kept in the rolling latency window
pub const LATENCY_WINDOW: usize = 30;

/// Default screen size
pub const DEFAULT_SCREEN_WIDTH: u32 = 1920;
pub const DEFAULT_SCREEN_HEIGHT: u32 = 1080;
