use super::{invert_2x2, observation, transition, GazeFilter};
use crate::constants::{DEFAULT_MEASUREMENT_NOISE, DEFAULT_PROCESS_NOISE};
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

/// Constant-velocity Kalman filter with static noise parameters
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    // State: [x, y, vx, vy]
    state: Vector4<f64>,
    // State covariance
    covariance: Matrix4<f64>,
    // Process noise
    process_noise: Matrix4<f64>,
    // Measurement noise
    measurement_noise: Matrix2<f64>,
    // State transition matrix
    transition: Matrix4<f64>,
    // Measurement matrix
    measurement: Matrix2x4<f64>,
    initialized: bool,
}

impl KalmanFilter {
    /// Create a filter with isotropic process and measurement noise
    #[must_use]
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            state: Vector4::zeros(),
            covariance: Matrix4::identity(),
            process_noise: Matrix4::identity() * process_noise,
            measurement_noise: Matrix2::identity() * measurement_noise,
            transition: transition(),
            measurement: observation(),
            initialized: false,
        }
    }

    /// Advance the state one step.
    ///
    /// Before the first measurement this only reports the current position.
    pub fn predict(&mut self) -> (f64, f64) {
        if !self.initialized {
            return (self.state[0], self.state[1]);
        }

        self.state = self.transition * self.state;
        self.covariance = self.transition * self.covariance * self.transition.transpose() + self.process_noise;

        (self.state[0], self.state[1])
    }

    /// Correct the state with a position measurement and return the filtered position
    pub fn update(&mut self, x: f64, y: f64) -> (f64, f64) {
        if !self.initialized {
            self.state = Vector4::new(x, y, 0.0, 0.0);
            self.initialized = true;
            return (x, y);
        }

        self.predict();

        let innovation = Vector2::new(x, y) - self.measurement * self.state;
        let innovation_cov =
            self.measurement * self.covariance * self.measurement.transpose() + self.measurement_noise;
        let gain = self.covariance * self.measurement.transpose() * invert_2x2(&innovation_cov);

        self.state += gain * innovation;
        self.covariance = (Matrix4::identity() - gain * self.measurement) * self.covariance;

        (self.state[0], self.state[1])
    }

    /// Zero state, identity covariance, uninitialized
    pub fn reset(&mut self) {
        self.state = Vector4::zeros();
        self.covariance = Matrix4::identity();
        self.initialized = false;
    }

    /// Current filtered position
    #[must_use]
    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    /// Magnitude of the estimated velocity
    #[must_use]
    pub fn velocity(&self) -> f64 {
        self.state[2].hypot(self.state[3])
    }

    /// Whether a measurement has been received since construction or reset
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_NOISE, DEFAULT_MEASUREMENT_NOISE)
    }
}

impl GazeFilter for KalmanFilter {
    fn update(&mut self, x: f64, y: f64) -> (f64, f64) {
        Self::update(self, x, y)
    }

    fn reset(&mut self) {
        Self::reset(self);
    }

    fn name(&self) -> &str {
        "KalmanFilter"
    }
}
