//! Per-frame gaze pipeline.
//!
//! Each frame runs: landmarks, head pose, blink gating, per-eye iris vectors,
//! eye combination, head pose compensation, smoothing, then screen mapping.
//! Frames must be processed strictly in order; `GazeTracker` takes `&mut self`
//! for every frame operation, so a single owner serializes them.

use crate::{
    calibration::Calibrator,
    config::{Config, EyeSelection, SmoothingMode, TrackingMethod},
    constants::LATENCY_WINDOW,
    filters::{adaptive::AdaptiveKalmanFilter, exponential::ExponentialFilter, kalman::KalmanFilter, GazeFilter},
    head_pose::{HeadPoseEstimator, LandmarkHeadPose},
    iris::{compute_offset_correction, offset_calibration_targets, GazeVector, IrisGazeCalculator, OffsetMeasurement},
    landmarks::{FaceLandmarks, LandmarkSource},
    storage::{CalibrationStore, KeyValueStore, Settings},
    Result,
};
use log::{debug, error, info, warn};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Gaze estimate for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct GazeResult {
    /// Smoothed horizontal gaze in [-1, 1]
    pub gaze_x: f64,
    /// Smoothed vertical gaze in [-1, 1]
    pub gaze_y: f64,
    /// Mapped and screen-smoothed point in pixels
    pub screen_point: (f64, f64),
    /// Left iris in frame pixels, when the left eye contributed
    pub left_iris_pixel: Option<(f64, f64)>,
    /// Right iris in frame pixels, when the right eye contributed
    pub right_iris_pixel: Option<(f64, f64)>,
    /// 1.0 with both eyes or a single selected eye, 0.7 on single-eye fallback
    pub confidence: f64,
    /// Left eye closed
    pub left_blink: bool,
    /// Right eye closed
    pub right_blink: bool,
    /// Head yaw in degrees
    pub head_yaw: f64,
    /// Head pitch in degrees
    pub head_pitch: f64,
    /// Head roll in degrees
    pub head_roll: f64,
}

/// Filters backing the smoothing modes.
///
/// All of them exist at once so that switching modes never allocates; the
/// inactive ones keep whatever state they had.
#[derive(Debug, Clone)]
struct SmoothingFilters {
    fixed: KalmanFilter,
    adaptive: AdaptiveKalmanFilter,
    left: KalmanFilter,
    right: KalmanFilter,
    combined: KalmanFilter,
}

impl SmoothingFilters {
    fn new(config: &Config) -> Self {
        let fixed = KalmanFilter::new(config.filter.process_noise, config.filter.measurement_noise);
        Self {
            adaptive: AdaptiveKalmanFilter::new(config.filter.adaptive_params()),
            left: fixed.clone(),
            right: fixed.clone(),
            combined: fixed.clone(),
            fixed,
        }
    }

    fn reset(&mut self) {
        self.fixed.reset();
        self.adaptive.reset();
        self.left.reset();
        self.right.reset();
        self.combined.reset();
    }
}

/// Gaze tracker tying the landmark source, estimators, filters and calibration together
pub struct GazeTracker {
    source: Box<dyn LandmarkSource>,
    store: Box<dyn KeyValueStore>,
    head_pose: Box<dyn HeadPoseEstimator>,
    calculator: IrisGazeCalculator,
    calibrator: Calibrator,
    smoothing_mode: SmoothingMode,
    eye_selection: EyeSelection,
    low_velocity_threshold: f64,
    samples_per_point: usize,
    min_samples_per_point: usize,
    filters: SmoothingFilters,
    screen_filter: ExponentialFilter,
    latencies: VecDeque<Duration>,
}

impl GazeTracker {
    /// Create a tracker.
    ///
    /// The calibration targets are laid out from the configuration; no stored
    /// calibration is loaded until [`Self::load_calibration`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    pub fn new(config: Config, source: Box<dyn LandmarkSource>, store: Box<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;

        let mut calibrator = Calibrator::new(config.screen.width, config.screen.height, config.calibration.mode);
        calibrator.generate_calibration_points_with_count(
            config.calibration.margin_percent,
            config.calibration.point_count,
        );

        info!(
            "Gaze tracker ready: {} smoothing, {} eyes, {}x{} screen",
            config.filter.smoothing_mode, config.gaze.eye_selection, config.screen.width, config.screen.height
        );

        Ok(Self {
            source,
            store,
            head_pose: Box::new(LandmarkHeadPose),
            calculator: IrisGazeCalculator::new(&config.gaze, &config.head_pose),
            calibrator,
            smoothing_mode: config.filter.smoothing_mode,
            eye_selection: config.gaze.eye_selection,
            low_velocity_threshold: config.filter.low_velocity_threshold,
            samples_per_point: config.calibration.samples_per_point,
            min_samples_per_point: config.calibration.min_samples_per_point,
            filters: SmoothingFilters::new(&config),
            screen_filter: ExponentialFilter::new(config.filter.screen_smoothing),
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
        })
    }

    /// Replace the head pose estimator
    #[must_use]
    pub fn with_head_pose_estimator(mut self, estimator: Box<dyn HeadPoseEstimator>) -> Self {
        self.head_pose = estimator;
        self
    }

    /// Fetch the next frame's landmarks and process them.
    ///
    /// `Ok(None)` when no face was found or no eye produced an estimate.
    ///
    /// # Errors
    ///
    /// Returns an error if the landmark source fails
    pub async fn process_frame(&mut self) -> Result<Option<GazeResult>> {
        let start = Instant::now();
        let landmarks = self.source.detect_landmarks().await?;

        let result = match landmarks {
            Some(landmarks) => self.process_landmarks(&landmarks),
            None => {
                debug!("No face detected");
                None
            }
        };

        self.record_latency(start.elapsed());
        Ok(result)
    }

    /// Run the synchronous part of the pipeline on one frame of landmarks
    pub fn process_landmarks(&mut self, landmarks: &FaceLandmarks) -> Option<GazeResult> {
        let pose = self.head_pose.estimate(landmarks);
        let measurements = self.calculator.measure(landmarks, self.eye_selection);

        let mut left = measurements.left.map(|e| e.vector);
        let mut right = measurements.right.map(|e| e.vector);
        if self.smoothing_mode == SmoothingMode::PerEye {
            left = left.map(|v| filter_vector(&mut self.filters.left, v));
            right = right.map(|v| filter_vector(&mut self.filters.right, v));
        }

        let Some((combined, confidence)) = IrisGazeCalculator::combine(left, right, self.eye_selection) else {
            debug!(
                "No usable eye (blink left={}, right={})",
                measurements.left_blink, measurements.right_blink
            );
            return None;
        };
        let compensated = self.calculator.compensate(combined, &pose);

        let smoothed = match self.smoothing_mode {
            SmoothingMode::None => compensated,
            SmoothingMode::Kalman => filter_vector(&mut self.filters.fixed, compensated),
            SmoothingMode::Adaptive => {
                let (x, y) = self.filters.adaptive.update(compensated.x, compensated.y);
                GazeVector::new(x, y)
            }
            SmoothingMode::PerEye if left.is_some() && right.is_some() => {
                filter_vector(&mut self.filters.combined, compensated)
            }
            SmoothingMode::PerEye => compensated,
        };

        let (screen_x, screen_y) = self.calibrator.gaze_to_screen(smoothed.x, smoothed.y);
        let screen_point = self.screen_filter.update(screen_x, screen_y);

        Some(GazeResult {
            gaze_x: smoothed.x,
            gaze_y: smoothed.y,
            screen_point,
            left_iris_pixel: measurements.left.map(|e| e.iris_pixel),
            right_iris_pixel: measurements.right.map(|e| e.iris_pixel),
            confidence,
            left_blink: measurements.left_blink,
            right_blink: measurements.right_blink,
            head_yaw: pose.yaw,
            head_pitch: pose.pitch,
            head_roll: pose.roll,
        })
    }

    fn record_latency(&mut self, elapsed: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(elapsed);
    }

    /// Mean processing time over the last 30 frames, 0 before the first frame
    #[must_use]
    pub fn average_latency_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        let total: Duration = self.latencies.iter().sum();
        total.as_secs_f64() * 1000.0 / self.latencies.len() as f64
    }

    /// Whether the active smoothing filter considers the gaze stationary
    #[must_use]
    pub fn is_dwelling(&self) -> bool {
        match self.smoothing_mode {
            SmoothingMode::None => false,
            SmoothingMode::Kalman => self.filters.fixed.velocity() <= self.low_velocity_threshold,
            SmoothingMode::Adaptive => self.filters.adaptive.is_dwelling(),
            SmoothingMode::PerEye => self.filters.combined.velocity() <= self.low_velocity_threshold,
        }
    }

    /// Reset every smoothing filter and the screen smoothing
    pub fn reset(&mut self) {
        self.filters.reset();
        self.screen_filter.reset();
        debug!("Filters reset");
    }

    /// Map a gaze vector to screen pixels through the current calibration
    #[must_use]
    pub fn gaze_to_screen(&self, gaze_x: f64, gaze_y: f64) -> (f64, f64) {
        self.calibrator.gaze_to_screen(gaze_x, gaze_y)
    }

    /// Select the smoothing filter for following frames; filter state is kept
    pub fn set_smoothing_mode(&mut self, mode: SmoothingMode) {
        self.smoothing_mode = mode;
    }

    /// Active smoothing filter
    #[must_use]
    pub const fn smoothing_mode(&self) -> SmoothingMode {
        self.smoothing_mode
    }

    /// Select which eyes feed following frames; filter state is kept
    pub fn set_eye_selection(&mut self, selection: EyeSelection) {
        self.eye_selection = selection;
    }

    /// Eyes feeding the estimate
    #[must_use]
    pub const fn eye_selection(&self) -> EyeSelection {
        self.eye_selection
    }

    /// Select how the iris is located; filter state is kept
    pub fn set_tracking_method(&mut self, method: TrackingMethod) {
        self.calculator.set_tracking_method(method);
    }

    /// Set per-axis sensitivity, clamped to [0.5, 5.0]
    pub fn set_sensitivity(&mut self, x: f64, y: f64) {
        self.calculator.set_sensitivity(x, y);
    }

    /// Set per-axis offset, clamped to [-1, 1]
    pub fn set_offset(&mut self, x: f64, y: f64) {
        self.calculator.set_offset(x, y);
    }

    /// Configure head pose compensation
    pub fn set_head_compensation(&mut self, enabled: bool, yaw_factor: f64, pitch_factor: f64) {
        self.calculator.set_head_compensation(enabled, yaw_factor, pitch_factor);
    }

    /// Iris vector calculator
    #[must_use]
    pub const fn calculator(&self) -> &IrisGazeCalculator {
        &self.calculator
    }

    /// Calibration state
    #[must_use]
    pub const fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// Calibration state, for sample collection and fitting
    pub fn calibrator_mut(&mut self) -> &mut Calibrator {
        &mut self.calibrator
    }

    /// Record a gaze sample for a calibration target.
    ///
    /// Returns false for an unknown target or one that already holds the
    /// configured samples per point.
    pub fn add_calibration_sample(&mut self, target_index: usize, gaze_x: f64, gaze_y: f64) -> bool {
        if self.calibrator.samples_collected(target_index) >= self.samples_per_point {
            return false;
        }
        self.calibrator.add_calibration_sample(target_index, gaze_x, gaze_y)
    }

    /// Whether a target has the configured minimum of samples
    #[must_use]
    pub fn calibration_target_complete(&self, target_index: usize) -> bool {
        self.calibrator.is_point_complete(target_index, self.min_samples_per_point)
    }

    /// First target still short of the configured minimum, `None` once all are ready to fit
    #[must_use]
    pub fn next_calibration_target(&self) -> Option<usize> {
        self.calibrator.next_incomplete_point(self.min_samples_per_point)
    }

    /// Quick offset calibration targets for the configured screen
    #[must_use]
    pub fn offset_calibration_targets(&self) -> [(f64, f64); 5] {
        let (width, height) = self.calibrator.screen_size();
        offset_calibration_targets(width, height)
    }

    /// Fold the mean bias of quick-calibration measurements into the gaze offsets
    pub fn apply_offset_correction(&mut self, measurements: &[OffsetMeasurement]) -> bool {
        let Some((x, y)) = compute_offset_correction(self.calculator.offset(), measurements) else {
            warn!("No offset calibration measurements");
            return false;
        };
        self.calculator.set_offset(x, y);
        info!("Gaze offsets corrected to ({x:+.2}, {y:+.2})");
        true
    }

    /// Persist the active calibration under its mode
    pub fn save_calibration(&mut self) -> bool {
        let Some(data) = self.calibrator.calibration_data() else {
            warn!("No calibration to save");
            return false;
        };
        match CalibrationStore::new(self.store.as_mut()).save_calibration_data(&data, data.mode) {
            Ok(saved) => saved,
            Err(e) => {
                error!("Failed to save calibration: {e}");
                false
            }
        }
    }

    /// Load the stored calibration for the calibrator's current mode
    pub fn load_calibration(&mut self) -> bool {
        let mode = self.calibrator.mode();
        match CalibrationStore::new(self.store.as_mut()).load_calibration_data(mode) {
            Ok(Some(data)) => self.calibrator.load_calibration_data(data),
            Ok(None) => false,
            Err(e) => {
                error!("Failed to load {mode} calibration: {e}");
                false
            }
        }
    }

    /// Delete the stored calibration for the calibrator's current mode
    pub fn delete_calibration(&mut self) -> bool {
        let mode = self.calibrator.mode();
        match CalibrationStore::new(self.store.as_mut()).delete_calibration_data(mode) {
            Ok(deleted) => deleted,
            Err(e) => {
                error!("Failed to delete {mode} calibration: {e}");
                false
            }
        }
    }

    fn current_settings(&self) -> Settings {
        let (sensitivity_x, sensitivity_y) = self.calculator.sensitivity();
        let (offset_x, offset_y) = self.calculator.offset();
        Settings {
            sensitivity_x,
            sensitivity_y,
            offset_x,
            offset_y,
            smoothing_mode: self.smoothing_mode,
            eye_selection: self.eye_selection,
            calibration_mode: self.calibrator.mode(),
        }
    }

    /// Persist sensitivity, offsets and mode selections
    pub fn save_settings(&mut self) -> bool {
        let settings = self.current_settings();
        match settings.save(self.store.as_mut()) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save settings: {e}");
                false
            }
        }
    }

    /// Apply stored settings; missing keys keep their current values
    pub fn load_settings(&mut self) -> bool {
        let settings = match Settings::load(self.store.as_ref(), self.current_settings()) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to load settings: {e}");
                return false;
            }
        };
        self.calculator
            .set_sensitivity(settings.sensitivity_x, settings.sensitivity_y);
        self.calculator.set_offset(settings.offset_x, settings.offset_y);
        self.smoothing_mode = settings.smoothing_mode;
        self.eye_selection = settings.eye_selection;
        self.calibrator.set_mode(settings.calibration_mode);
        true
    }
}

fn filter_vector(filter: &mut KalmanFilter, vector: GazeVector) -> GazeVector {
    let (x, y) = filter.update(vector.x, vector.y);
    GazeVector::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{landmarks::ReplaySource, storage::MemoryStore};

    fn tracker(config: Config) -> GazeTracker {
        GazeTracker::new(config, Box::new(ReplaySource::default()), Box::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.screen.width = 0;
        let result = GazeTracker::new(config, Box::new(ReplaySource::default()), Box::new(MemoryStore::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_setters_do_not_reset_filters() {
        let mut tracker = tracker(Config::default());
        tracker.filters.adaptive.update(0.3, 0.3);
        tracker.set_smoothing_mode(SmoothingMode::Kalman);
        tracker.set_eye_selection(EyeSelection::LeftOnly);
        assert_eq!(tracker.filters.adaptive.position(), (0.3, 0.3));

        tracker.reset();
        assert_eq!(tracker.filters.adaptive.position(), (0.0, 0.0));
    }

    #[test]
    fn test_latency_window() {
        let mut tracker = tracker(Config::default());
        assert_eq!(tracker.average_latency_ms(), 0.0);
        for _ in 0..LATENCY_WINDOW {
            tracker.record_latency(Duration::from_millis(100));
        }
        for _ in 0..LATENCY_WINDOW {
            tracker.record_latency(Duration::from_millis(10));
        }
        assert_eq!(tracker.latencies.len(), LATENCY_WINDOW);
        assert!((tracker.average_latency_ms() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_save_without_calibration() {
        let mut tracker = tracker(Config::default());
        assert!(!tracker.save_calibration());
        assert!(!tracker.load_calibration());
        assert!(!tracker.delete_calibration());
    }

    #[test]
    fn test_settings_round_trip() {
        let mut tracker = tracker(Config::default());
        tracker.set_sensitivity(1.5, 2.0);
        tracker.set_smoothing_mode(SmoothingMode::PerEye);
        assert!(tracker.save_settings());

        tracker.set_sensitivity(4.0, 4.0);
        tracker.set_smoothing_mode(SmoothingMode::None);
        assert!(tracker.load_settings());
        assert_eq!(tracker.calculator().sensitivity(), (1.5, 2.0));
        assert_eq!(tracker.smoothing_mode(), SmoothingMode::PerEye);
    }
}
