//! Configuration management for the gaze tracker

use crate::{
    constants::{
        DEFAULT_CALIBRATION_MARGIN, DEFAULT_CALIBRATION_POINTS, DEFAULT_DWELL_MULTIPLIER,
        DEFAULT_HIGH_VELOCITY_THRESHOLD, DEFAULT_LOW_VELOCITY_THRESHOLD, DEFAULT_MEASUREMENT_NOISE,
        DEFAULT_OFFSET_X, DEFAULT_OFFSET_Y, DEFAULT_PITCH_COMPENSATION, DEFAULT_PROCESS_NOISE,
        DEFAULT_RAPID_MULTIPLIER, DEFAULT_SCREEN_HEIGHT, DEFAULT_SCREEN_WIDTH, DEFAULT_SENSITIVITY_X,
        DEFAULT_SENSITIVITY_Y, DEFAULT_YAW_COMPENSATION, FAST_CALIBRATION_POINTS, MIN_SAMPLES_PER_POINT,
        RECOMMENDED_SAMPLES_PER_POINT, SENSITIVITY_MAX, SENSITIVITY_MIN,
    },
    filters::adaptive::AdaptiveParams,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, str::FromStr};

/// Which smoothing filter runs on the combined gaze vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMode {
    /// Raw combined vector
    None,
    /// Fixed-noise Kalman filter
    Kalman,
    /// Velocity-adaptive Kalman filter
    #[default]
    Adaptive,
    /// Fixed-noise filter per eye, then on the combined vector
    PerEye,
}

/// Which eyes feed the gaze estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyeSelection {
    /// Left eye only
    LeftOnly,
    /// Right eye only
    RightOnly,
    /// Average of both, falling back to whichever eye is open
    #[default]
    BothEyes,
}

/// How the iris position inside the eye is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMethod {
    /// Dedicated iris-centre landmarks, contour fallback when absent
    #[default]
    Iris,
    /// Centroid of the eye contour landmarks
    EyeContour,
}

/// Shape of the fitted gaze-to-screen mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// `a0 + a1*gx + a2*gy`
    Affine,
    /// `a0 + a1*gx + a2*gy + a3*gx^2 + a4*gy^2 + a5*gx*gy`
    #[default]
    Polynomial,
}

impl SmoothingMode {
    /// Name used in configuration files and settings storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Kalman => "kalman",
            Self::Adaptive => "adaptive",
            Self::PerEye => "per_eye",
        }
    }
}

impl EyeSelection {
    /// Name used in configuration files and settings storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LeftOnly => "left_only",
            Self::RightOnly => "right_only",
            Self::BothEyes => "both_eyes",
        }
    }
}

impl TrackingMethod {
    /// Name used in configuration files
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Iris => "iris",
            Self::EyeContour => "eye_contour",
        }
    }
}

impl CalibrationMode {
    /// Name used in configuration files and storage keys
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Affine => "affine",
            Self::Polynomial => "polynomial",
        }
    }

    /// Number of fitted coefficients per screen axis
    #[must_use]
    pub const fn coefficient_count(self) -> usize {
        match self {
            Self::Affine => 3,
            Self::Polynomial => 6,
        }
    }
}

impl FromStr for SmoothingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "kalman" | "fixed" => Ok(Self::Kalman),
            "adaptive" => Ok(Self::Adaptive),
            "per_eye" | "pereye" => Ok(Self::PerEye),
            _ => Err(Error::InvalidInput(format!("Unknown smoothing mode: {s}"))),
        }
    }
}

impl FromStr for EyeSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "left" | "left_only" => Ok(Self::LeftOnly),
            "right" | "right_only" => Ok(Self::RightOnly),
            "both" | "both_eyes" => Ok(Self::BothEyes),
            _ => Err(Error::InvalidInput(format!("Unknown eye selection: {s}"))),
        }
    }
}

impl FromStr for TrackingMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "iris" => Ok(Self::Iris),
            "eye_contour" | "contour" => Ok(Self::EyeContour),
            _ => Err(Error::InvalidInput(format!("Unknown tracking method: {s}"))),
        }
    }
}

impl FromStr for CalibrationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "affine" | "linear" => Ok(Self::Affine),
            "polynomial" => Ok(Self::Polynomial),
            _ => Err(Error::InvalidInput(format!("Unknown calibration mode: {s}"))),
        }
    }
}

impl fmt::Display for SmoothingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EyeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Iris vector configuration
    pub gaze: GazeConfig,

    /// Head pose compensation
    pub head_pose: HeadPoseConfig,

    /// Smoothing filter configuration
    pub filter: FilterConfig,

    /// Calibration configuration
    pub calibration: CalibrationConfig,

    /// Target screen
    pub screen: ScreenConfig,
}

/// Iris vector parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Horizontal sensitivity multiplier
    pub sensitivity_x: f64,

    /// Vertical sensitivity multiplier
    pub sensitivity_y: f64,

    /// Horizontal offset (positive shifts gaze right)
    pub offset_x: f64,

    /// Vertical offset (positive shifts gaze down)
    pub offset_y: f64,

    /// Which eyes feed the estimate
    pub eye_selection: EyeSelection,

    /// How the iris is located
    pub tracking_method: TrackingMethod,
}

/// Head pose compensation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadPoseConfig {
    /// Subtract head rotation from the gaze vector
    pub compensation_enabled: bool,

    /// Horizontal shift per 45 degrees of yaw
    pub yaw_factor: f64,

    /// Vertical shift per 45 degrees of pitch
    pub pitch_factor: f64,
}

/// Filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Smoothing variant
    pub smoothing_mode: SmoothingMode,

    /// Process noise of the fixed filter
    pub process_noise: f64,

    /// Measurement noise of the fixed filter
    pub measurement_noise: f64,

    /// Adaptive filter velocity below which gaze is dwelling
    pub low_velocity_threshold: f64,

    /// Adaptive filter velocity above which gaze is moving rapidly
    pub high_velocity_threshold: f64,

    /// Adaptive measurement noise multiplier while dwelling
    pub dwell_multiplier: f64,

    /// Adaptive measurement noise multiplier during rapid movement
    pub rapid_multiplier: f64,

    /// Exponential smoothing of the screen point (1.0 disables)
    pub screen_smoothing: f64,
}

/// Calibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Mapping shape
    pub mode: CalibrationMode,

    /// Number of targets (5 or 9)
    pub point_count: usize,

    /// Target inset from each screen edge, as a fraction of the screen
    pub margin_percent: f64,

    /// Samples to collect per target
    pub samples_per_point: usize,

    /// Fewest samples a target needs before collection may move on
    pub min_samples_per_point: usize,
}

/// Screen dimensions in pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            sensitivity_x: DEFAULT_SENSITIVITY_X,
            sensitivity_y: DEFAULT_SENSITIVITY_Y,
            offset_x: DEFAULT_OFFSET_X,
            offset_y: DEFAULT_OFFSET_Y,
            eye_selection: EyeSelection::default(),
            tracking_method: TrackingMethod::default(),
        }
    }
}

impl Default for HeadPoseConfig {
    fn default() -> Self {
        Self {
            compensation_enabled: true,
            yaw_factor: DEFAULT_YAW_COMPENSATION,
            pitch_factor: DEFAULT_PITCH_COMPENSATION,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            smoothing_mode: SmoothingMode::default(),
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            low_velocity_threshold: DEFAULT_LOW_VELOCITY_THRESHOLD,
            high_velocity_threshold: DEFAULT_HIGH_VELOCITY_THRESHOLD,
            dwell_multiplier: DEFAULT_DWELL_MULTIPLIER,
            rapid_multiplier: DEFAULT_RAPID_MULTIPLIER,
            screen_smoothing: 1.0,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::default(),
            point_count: DEFAULT_CALIBRATION_POINTS,
            margin_percent: DEFAULT_CALIBRATION_MARGIN,
            samples_per_point: RECOMMENDED_SAMPLES_PER_POINT,
            min_samples_per_point: MIN_SAMPLES_PER_POINT,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_SCREEN_WIDTH,
            height: DEFAULT_SCREEN_HEIGHT,
        }
    }
}

impl FilterConfig {
    /// Adaptive filter parameters derived from this configuration
    #[must_use]
    pub const fn adaptive_params(&self) -> AdaptiveParams {
        AdaptiveParams {
            base_process_noise: self.process_noise,
            base_measurement_noise: self.measurement_noise,
            low_velocity_threshold: self.low_velocity_threshold,
            high_velocity_threshold: self.high_velocity_threshold,
            dwell_multiplier: self.dwell_multiplier,
            rapid_multiplier: self.rapid_multiplier,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first out-of-range field
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = self.first_non_finite() {
            return Err(Error::ConfigError(format!("{name} must be a finite number")));
        }

        let gaze = &self.gaze;
        for (name, value) in [("sensitivity_x", gaze.sensitivity_x), ("sensitivity_y", gaze.sensitivity_y)] {
            if !(SENSITIVITY_MIN..=SENSITIVITY_MAX).contains(&value) {
                return Err(Error::ConfigError(format!(
                    "{name} must be between {SENSITIVITY_MIN} and {SENSITIVITY_MAX}"
                )));
            }
        }
        for (name, value) in [("offset_x", gaze.offset_x), ("offset_y", gaze.offset_y)] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(Error::ConfigError(format!("{name} must be between -1.0 and 1.0")));
            }
        }

        let head = &self.head_pose;
        if head.yaw_factor < 0.0 || head.pitch_factor < 0.0 {
            return Err(Error::ConfigError(
                "Head pose compensation factors must be non-negative".to_string(),
            ));
        }

        let filter = &self.filter;
        if filter.process_noise <= 0.0 || filter.measurement_noise <= 0.0 {
            return Err(Error::ConfigError("Filter noise values must be positive".to_string()));
        }
        if filter.low_velocity_threshold < 0.0 || filter.high_velocity_threshold <= filter.low_velocity_threshold {
            return Err(Error::ConfigError(
                "High velocity threshold must exceed a non-negative low velocity threshold".to_string(),
            ));
        }
        if filter.dwell_multiplier <= 0.0 || filter.rapid_multiplier <= 0.0 {
            return Err(Error::ConfigError("Noise multipliers must be positive".to_string()));
        }
        if !(filter.screen_smoothing > 0.0 && filter.screen_smoothing <= 1.0) {
            return Err(Error::ConfigError("Screen smoothing must be in (0, 1]".to_string()));
        }

        let calibration = &self.calibration;
        if calibration.point_count != DEFAULT_CALIBRATION_POINTS && calibration.point_count != FAST_CALIBRATION_POINTS {
            return Err(Error::ConfigError(format!(
                "Calibration point count must be {FAST_CALIBRATION_POINTS} or {DEFAULT_CALIBRATION_POINTS}"
            )));
        }
        if !(0.0..0.5).contains(&calibration.margin_percent) {
            return Err(Error::ConfigError("Calibration margin must be in [0.0, 0.5)".to_string()));
        }
        if calibration.min_samples_per_point == 0 || calibration.samples_per_point < calibration.min_samples_per_point {
            return Err(Error::ConfigError(
                "Samples per point must be at least the (non-zero) minimum".to_string(),
            ));
        }

        if self.screen.width == 0 || self.screen.height == 0 {
            return Err(Error::ConfigError("Screen dimensions must be non-zero".to_string()));
        }

        Ok(())
    }

    fn first_non_finite(&self) -> Option<&'static str> {
        let (gaze, head, filter) = (&self.gaze, &self.head_pose, &self.filter);
        [
            ("sensitivity_x", gaze.sensitivity_x),
            ("sensitivity_y", gaze.sensitivity_y),
            ("offset_x", gaze.offset_x),
            ("offset_y", gaze.offset_y),
            ("yaw_factor", head.yaw_factor),
            ("pitch_factor", head.pitch_factor),
            ("process_noise", filter.process_noise),
            ("measurement_noise", filter.measurement_noise),
            ("low_velocity_threshold", filter.low_velocity_threshold),
            ("high_velocity_threshold", filter.high_velocity_threshold),
            ("dwell_multiplier", filter.dwell_multiplier),
            ("rapid_multiplier", filter.rapid_multiplier),
            ("screen_smoothing", filter.screen_smoothing),
            ("margin_percent", self.calibration.margin_percent),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Gaze Tracker Configuration

# Iris vector
gaze:
  sensitivity_x: 2.5
  sensitivity_y: 3.0
  offset_x: 0.0
  offset_y: 0.3
  eye_selection: "both_eyes"
  tracking_method: "iris"

# Head pose compensation
head_pose:
  compensation_enabled: true
  yaw_factor: 0.5
  pitch_factor: 0.5

# Smoothing
filter:
  smoothing_mode: "adaptive"
  process_noise: 0.0001
  measurement_noise: 0.01
  low_velocity_threshold: 0.02
  high_velocity_threshold: 0.15
  dwell_multiplier: 3.0
  rapid_multiplier: 0.3
  screen_smoothing: 1.0

# Calibration
calibration:
  mode: "polynomial"
  point_count: 9
  margin_percent: 0.1
  samples_per_point: 30
  min_samples_per_point: 10

# Target screen
screen:
  width: 1920
  height: 1080
"#;
