//! Smoothing filters for gaze estimates.
//!
//! Both Kalman variants track a constant-velocity state `[x, y, vx, vy]` in
//! fixed-size nalgebra matrices, so a frame never allocates.

/// Fixed-noise constant-velocity Kalman filter
pub mod kalman;

/// Velocity-adaptive Kalman filter
pub mod adaptive;

/// Exponential smoothing for mapped screen points
pub mod exponential;

use crate::constants::SINGULAR_DETERMINANT;
use nalgebra::{Matrix2, Matrix2x4, Matrix4};

/// Common interface of the gaze filters
pub trait GazeFilter: Send {
    /// Feed one measurement and return the filtered position
    fn update(&mut self, x: f64, y: f64) -> (f64, f64);

    /// Reset filter state
    fn reset(&mut self);

    /// Get filter name
    fn name(&self) -> &str;
}

/// No-op filter that passes through values unchanged
pub struct NoFilter;

impl GazeFilter for NoFilter {
    fn update(&mut self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }

    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "NoFilter"
    }
}

/// Constant-velocity transition with a unit step per update
pub(crate) fn transition() -> Matrix4<f64> {
    Matrix4::new(
        1.0, 0.0, 1.0, 0.0,
        0.0, 1.0, 0.0, 1.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Measurement matrix, only position is observed
pub(crate) fn observation() -> Matrix2x4<f64> {
    Matrix2x4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
    )
}

/// Closed-form 2x2 inverse.
///
/// A near-singular matrix yields the identity instead of an error.
pub(crate) fn invert_2x2(m: &Matrix2<f64>) -> Matrix2<f64> {
    let det = m[(0, 0)].mul_add(m[(1, 1)], -(m[(0, 1)] * m[(1, 0)]));
    if det.abs() < SINGULAR_DETERMINANT {
        log::debug!("Innovation covariance is singular (det = {det:e}), using identity");
        return Matrix2::identity();
    }
    Matrix2::new(m[(1, 1)], -m[(0, 1)], -m[(1, 0)], m[(0, 0)]) / det
}
