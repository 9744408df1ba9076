//! Velocity-adaptive Kalman filter.
//!
//! A single noise setting cannot be both responsive during saccades and
//! steady during fixations. This filter rescales its noise every update from
//! the mean of the last few velocity magnitudes: slow motion raises the
//! measurement noise (lean on the prediction), fast motion lowers it (lean on
//! the measurement).

use super::{invert_2x2, observation, transition, GazeFilter};
use crate::constants::{
    DEFAULT_DWELL_MULTIPLIER, DEFAULT_HIGH_VELOCITY_THRESHOLD, DEFAULT_LOW_VELOCITY_THRESHOLD,
    DEFAULT_MEASUREMENT_NOISE, DEFAULT_PROCESS_NOISE, DEFAULT_RAPID_MULTIPLIER, PROCESS_NOISE_FACTOR_MAX,
    PROCESS_NOISE_FACTOR_MIN, VELOCITY_HISTORY_SIZE,
};
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};
use std::collections::VecDeque;

/// Tuning parameters of the adaptive filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveParams {
    /// Process noise before velocity scaling
    pub base_process_noise: f64,
    /// Measurement noise before velocity scaling
    pub base_measurement_noise: f64,
    /// Smoothed velocity at or below which gaze is dwelling
    pub low_velocity_threshold: f64,
    /// Smoothed velocity at or above which gaze is moving rapidly
    pub high_velocity_threshold: f64,
    /// Measurement noise multiplier while dwelling
    pub dwell_multiplier: f64,
    /// Measurement noise multiplier during rapid movement
    pub rapid_multiplier: f64,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            base_process_noise: DEFAULT_PROCESS_NOISE,
            base_measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            low_velocity_threshold: DEFAULT_LOW_VELOCITY_THRESHOLD,
            high_velocity_threshold: DEFAULT_HIGH_VELOCITY_THRESHOLD,
            dwell_multiplier: DEFAULT_DWELL_MULTIPLIER,
            rapid_multiplier: DEFAULT_RAPID_MULTIPLIER,
        }
    }
}

/// Kalman filter whose noise follows the observed gaze velocity
#[derive(Debug, Clone)]
pub struct AdaptiveKalmanFilter {
    params: AdaptiveParams,
    state: Vector4<f64>,
    covariance: Matrix4<f64>,
    transition: Matrix4<f64>,
    measurement: Matrix2x4<f64>,
    velocity_history: VecDeque<f64>,
    current_process_noise: f64,
    current_measurement_noise: f64,
    initialized: bool,
}

impl AdaptiveKalmanFilter {
    /// Create a new adaptive filter
    ///
    /// # Panics
    ///
    /// Panics if the high velocity threshold is not above the low one
    #[must_use]
    pub fn new(params: AdaptiveParams) -> Self {
        assert!(
            params.high_velocity_threshold > params.low_velocity_threshold,
            "High velocity threshold must exceed low velocity threshold"
        );
        Self {
            params,
            state: Vector4::zeros(),
            covariance: Matrix4::identity(),
            transition: transition(),
            measurement: observation(),
            velocity_history: VecDeque::with_capacity(VELOCITY_HISTORY_SIZE),
            current_process_noise: params.base_process_noise,
            current_measurement_noise: params.base_measurement_noise,
            initialized: false,
        }
    }

    /// Advance the state with velocity-scaled process noise
    pub fn predict(&mut self) -> (f64, f64) {
        if !self.initialized {
            return (self.state[0], self.state[1]);
        }

        self.current_process_noise = self.params.base_process_noise * self.process_noise_factor();
        let process_noise = Matrix4::identity() * self.current_process_noise;

        self.state = self.transition * self.state;
        self.covariance = self.transition * self.covariance * self.transition.transpose() + process_noise;

        (self.state[0], self.state[1])
    }

    /// Correct the state with velocity-scaled measurement noise
    pub fn update(&mut self, x: f64, y: f64) -> (f64, f64) {
        if !self.initialized {
            self.state = Vector4::new(x, y, 0.0, 0.0);
            self.initialized = true;
            return (x, y);
        }

        self.predict();

        self.current_measurement_noise = self.params.base_measurement_noise * self.measurement_noise_multiplier();
        let measurement_noise = Matrix2::identity() * self.current_measurement_noise;

        let innovation = Vector2::new(x, y) - self.measurement * self.state;
        let innovation_cov = self.measurement * self.covariance * self.measurement.transpose() + measurement_noise;
        let gain = self.covariance * self.measurement.transpose() * invert_2x2(&innovation_cov);

        self.state += gain * innovation;
        self.covariance = (Matrix4::identity() - gain * self.measurement) * self.covariance;

        self.push_velocity(self.state_velocity());

        (self.state[0], self.state[1])
    }

    /// Zero state, identity covariance, empty history, base noise
    pub fn reset(&mut self) {
        self.state = Vector4::zeros();
        self.covariance = Matrix4::identity();
        self.velocity_history.clear();
        self.current_process_noise = self.params.base_process_noise;
        self.current_measurement_noise = self.params.base_measurement_noise;
        self.initialized = false;
    }

    /// Smoothed velocity magnitude driving the noise scaling
    #[must_use]
    pub fn velocity_magnitude(&self) -> f64 {
        if self.velocity_history.is_empty() {
            return self.state_velocity();
        }
        self.velocity_history.iter().sum::<f64>() / self.velocity_history.len() as f64
    }

    /// Whether the smoothed velocity is at or below the dwell threshold
    #[must_use]
    pub fn is_dwelling(&self) -> bool {
        self.velocity_magnitude() <= self.params.low_velocity_threshold
    }

    /// Measurement noise used by the most recent correction
    #[must_use]
    pub const fn current_measurement_noise(&self) -> f64 {
        self.current_measurement_noise
    }

    /// Process noise used by the most recent prediction
    #[must_use]
    pub const fn current_process_noise(&self) -> f64 {
        self.current_process_noise
    }

    /// Filter parameters
    #[must_use]
    pub const fn params(&self) -> &AdaptiveParams {
        &self.params
    }

    /// Current filtered position
    #[must_use]
    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    fn state_velocity(&self) -> f64 {
        self.state[2].hypot(self.state[3])
    }

    fn push_velocity(&mut self, velocity: f64) {
        if self.velocity_history.len() >= VELOCITY_HISTORY_SIZE {
            self.velocity_history.pop_front();
        }
        self.velocity_history.push_back(velocity);
    }

    /// Dwell multiplier at low speed, rapid multiplier at high speed,
    /// smoothstep in between.
    fn measurement_noise_multiplier(&self) -> f64 {
        let p = &self.params;
        let velocity = self.velocity_magnitude();

        if velocity <= p.low_velocity_threshold {
            p.dwell_multiplier
        } else if velocity >= p.high_velocity_threshold {
            p.rapid_multiplier
        } else {
            let t = (velocity - p.low_velocity_threshold) / (p.high_velocity_threshold - p.low_velocity_threshold);
            let smooth = t * t * 2.0f64.mul_add(-t, 3.0);
            smooth.mul_add(p.rapid_multiplier - p.dwell_multiplier, p.dwell_multiplier)
        }
    }

    fn process_noise_factor(&self) -> f64 {
        (self.velocity_magnitude() / self.params.high_velocity_threshold)
            .clamp(PROCESS_NOISE_FACTOR_MIN, PROCESS_NOISE_FACTOR_MAX)
    }
}

impl Default for AdaptiveKalmanFilter {
    fn default() -> Self {
        Self::new(AdaptiveParams::default())
    }
}

impl GazeFilter for AdaptiveKalmanFilter {
    fn update(&mut self, x: f64, y: f64) -> (f64, f64) {
        Self::update(self, x, y)
    }

    fn reset(&mut self) {
        Self::reset(self);
    }

    fn name(&self) -> &str {
        "AdaptiveKalmanFilter"
    }
}
