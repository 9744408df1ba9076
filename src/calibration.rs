//! Multi-point gaze calibration.
//!
//! The user fixates a grid of screen targets while raw gaze samples are
//! collected for each one. Every target's samples are reduced to an
//! outlier-robust average, then an affine or second-order polynomial mapping
//! from gaze to screen pixels is fitted per axis by least squares:
//!
//! ```text
//! affine:      s = a0 + a1*gx + a2*gy
//! polynomial:  s = a0 + a1*gx + a2*gy + a3*gx^2 + a4*gy^2 + a5*gx*gy
//! ```
//!
//! A failed fit never touches the previous calibration.

use crate::{
    config::CalibrationMode,
    constants::{
        FAST_CALIBRATION_POINTS, IQR_FENCE, MIN_AFFINE_TARGETS, MIN_POLYNOMIAL_TARGETS, MIN_SAMPLES_FOR_IQR,
        PIVOT_EPSILON,
    },
    iris::GazeVector,
};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A screen target and the gaze samples recorded while it was fixated
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPoint {
    /// Target x in pixels
    pub screen_x: f64,
    /// Target y in pixels
    pub screen_y: f64,
    /// Raw gaze samples
    pub samples: Vec<GazeVector>,
}

impl CalibrationPoint {
    fn new(screen_x: f64, screen_y: f64) -> Self {
        Self {
            screen_x,
            screen_y,
            samples: Vec::new(),
        }
    }
}

/// A fitted calibration, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    /// Coefficients producing screen x
    pub transform_x: Vec<f64>,
    /// Coefficients producing screen y
    pub transform_y: Vec<f64>,
    /// Screen width the fit was made for
    pub screen_width: u32,
    /// Screen height the fit was made for
    pub screen_height: u32,
    /// Mean pixel residual over the calibration targets
    pub calibration_error: f64,
    /// Mapping shape
    pub mode: CalibrationMode,
}

/// Mean of the samples inside the IQR fences
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustMean {
    /// Mean of the surviving samples
    pub value: f64,
    /// Samples discarded as outliers
    pub rejected: usize,
}

/// Average `values` after discarding samples outside
/// `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
///
/// Fewer than four samples give a plain mean. Empty input gives `None`.
#[must_use]
pub fn robust_average(values: &[f64]) -> Option<RobustMean> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    if n < MIN_SAMPLES_FOR_IQR {
        return Some(RobustMean {
            value: values.iter().sum::<f64>() / n as f64,
            rejected: 0,
        });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q1 = sorted[n / 4];
    let q3 = sorted[3 * n / 4];
    let iqr = q3 - q1;
    let low = IQR_FENCE.mul_add(-iqr, q1);
    let high = IQR_FENCE.mul_add(iqr, q3);

    let (sum, kept) = sorted
        .iter()
        .filter(|&&v| v >= low && v <= high)
        .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));

    if kept == 0 {
        // Only reachable with non-finite fences
        return Some(RobustMean {
            value: sorted[n / 2],
            rejected: n - 1,
        });
    }

    Some(RobustMean {
        value: sum / kept as f64,
        rejected: n - kept,
    })
}

/// Solve the square system `a * x = b` by Gaussian elimination with partial
/// pivoting.
///
/// Returns `None` when a pivot magnitude falls below `1e-10` or the shapes
/// do not match.
#[must_use]
pub fn solve_linear_system(mut a: DMatrix<f64>, mut b: DVector<f64>) -> Option<DVector<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return None;
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| a[(i, col)].abs().total_cmp(&a[(j, col)].abs()))?;
        let pivot = a[(pivot_row, col)];
        if !(pivot.abs() >= PIVOT_EPSILON) {
            debug!("Pivot {pivot:e} in column {col} is below {PIVOT_EPSILON:e}");
            return None;
        }
        if pivot_row != col {
            a.swap_rows(pivot_row, col);
            b.swap_rows(pivot_row, col);
        }

        for row in (col + 1)..n {
            let factor = a[(row, col)] / a[(col, col)];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                let delta = factor * a[(col, k)];
                a[(row, k)] -= delta;
            }
            let delta = factor * b[col];
            b[row] -= delta;
        }
    }

    let mut x = DVector::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[(row, k)] * x[k]).sum();
        x[row] = (b[row] - tail) / a[(row, row)];
    }
    Some(x)
}

/// Feature row `[1, gx, gy, gx^2, gy^2, gx*gy]`; affine fits use the first three
const fn features(gx: f64, gy: f64) -> [f64; 6] {
    [1.0, gx, gy, gx * gx, gy * gy, gx * gy]
}

fn evaluate(coefficients: &[f64], mode: CalibrationMode, gx: f64, gy: f64) -> f64 {
    coefficients
        .iter()
        .zip(&features(gx, gy)[..mode.coefficient_count()])
        .map(|(c, f)| c * f)
        .sum()
}

fn clamp_to_screen(value: f64, size: u32) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, f64::from(size.saturating_sub(1)))
}

const fn min_targets(mode: CalibrationMode) -> usize {
    match mode {
        CalibrationMode::Affine => MIN_AFFINE_TARGETS,
        CalibrationMode::Polynomial => MIN_POLYNOMIAL_TARGETS,
    }
}

/// Collects calibration samples and maps gaze vectors to screen pixels
#[derive(Debug, Clone)]
pub struct Calibrator {
    screen_width: u32,
    screen_height: u32,
    mode: CalibrationMode,
    points: Vec<CalibrationPoint>,
    fit: Option<CalibrationData>,
}

impl Calibrator {
    /// Create an uncalibrated calibrator for a screen
    #[must_use]
    pub const fn new(screen_width: u32, screen_height: u32, mode: CalibrationMode) -> Self {
        Self {
            screen_width,
            screen_height,
            mode,
            points: Vec::new(),
            fit: None,
        }
    }

    /// Lay out the 3x3 target grid inset by `margin_percent` and clear samples
    pub fn generate_calibration_points(&mut self, margin_percent: f64) -> &[CalibrationPoint] {
        self.generate_calibration_points_with_count(margin_percent, 9)
    }

    /// Lay out 5 targets (corners and centre) or the 9-point grid, clearing samples
    pub fn generate_calibration_points_with_count(&mut self, margin_percent: f64, count: usize) -> &[CalibrationPoint] {
        let width = f64::from(self.screen_width);
        let height = f64::from(self.screen_height);
        let margin_x = width * margin_percent;
        let margin_y = height * margin_percent;

        self.points = if count == FAST_CALIBRATION_POINTS {
            vec![
                CalibrationPoint::new(margin_x, margin_y),
                CalibrationPoint::new(width - margin_x, margin_y),
                CalibrationPoint::new(width / 2.0, height / 2.0),
                CalibrationPoint::new(margin_x, height - margin_y),
                CalibrationPoint::new(width - margin_x, height - margin_y),
            ]
        } else {
            let step_x = (width - 2.0 * margin_x) / 2.0;
            let step_y = (height - 2.0 * margin_y) / 2.0;
            (0..3)
                .flat_map(|row| {
                    (0..3).map(move |col| {
                        CalibrationPoint::new(
                            f64::from(col).mul_add(step_x, margin_x),
                            f64::from(row).mul_add(step_y, margin_y),
                        )
                    })
                })
                .collect()
        };

        debug!("Generated {} calibration targets", self.points.len());
        &self.points
    }

    /// Record one raw gaze sample for a target; false for an unknown index
    pub fn add_calibration_sample(&mut self, target_index: usize, gaze_x: f64, gaze_y: f64) -> bool {
        match self.points.get_mut(target_index) {
            Some(point) => {
                point.samples.push(GazeVector::new(gaze_x, gaze_y));
                true
            }
            None => {
                warn!("Calibration sample for unknown target {target_index}");
                false
            }
        }
    }

    /// Fit the gaze-to-screen mapping from the collected samples.
    ///
    /// Returns false, leaving any previous calibration in place, when too few
    /// targets have samples or the normal equations are singular.
    pub fn compute_calibration(&mut self) -> bool {
        let mode = self.mode;
        let required = min_targets(mode);

        let targets: Vec<(GazeVector, f64, f64)> = self
            .points
            .iter()
            .enumerate()
            .filter_map(|(index, point)| {
                let xs: Vec<f64> = point.samples.iter().map(|s| s.x).collect();
                let ys: Vec<f64> = point.samples.iter().map(|s| s.y).collect();
                let gx = robust_average(&xs)?;
                let gy = robust_average(&ys)?;
                debug!(
                    "Target {index}: {} samples, {} x / {} y outliers, mean gaze ({:.4}, {:.4})",
                    point.samples.len(),
                    gx.rejected,
                    gy.rejected,
                    gx.value,
                    gy.value
                );
                Some((GazeVector::new(gx.value, gy.value), point.screen_x, point.screen_y))
            })
            .collect();

        if targets.len() < required {
            warn!(
                "Not enough calibration targets for {mode} mode (need {required}, have {})",
                targets.len()
            );
            return false;
        }

        let columns = mode.coefficient_count();
        let design = DMatrix::from_fn(targets.len(), columns, |r, c| {
            let (gaze, _, _) = targets[r];
            features(gaze.x, gaze.y)[c]
        });
        let screen_x = DVector::from_iterator(targets.len(), targets.iter().map(|t| t.1));
        let screen_y = DVector::from_iterator(targets.len(), targets.iter().map(|t| t.2));

        let normal = design.transpose() * &design;
        let Some(transform_x) = solve_linear_system(normal.clone(), design.transpose() * screen_x) else {
            warn!("Calibration system for screen x is singular, keeping previous calibration");
            return false;
        };
        let Some(transform_y) = solve_linear_system(normal, design.transpose() * screen_y) else {
            warn!("Calibration system for screen y is singular, keeping previous calibration");
            return false;
        };

        let transform_x: Vec<f64> = transform_x.iter().copied().collect();
        let transform_y: Vec<f64> = transform_y.iter().copied().collect();

        let total_error: f64 = targets
            .iter()
            .map(|(gaze, sx, sy)| {
                let px = clamp_to_screen(evaluate(&transform_x, mode, gaze.x, gaze.y), self.screen_width);
                let py = clamp_to_screen(evaluate(&transform_y, mode, gaze.x, gaze.y), self.screen_height);
                (px - sx).hypot(py - sy)
            })
            .sum();
        let calibration_error = total_error / targets.len() as f64;

        info!("Calibration error ({mode}): {calibration_error:.1} pixels average over {} targets", targets.len());
        info!("Transform X: {transform_x:.3?}");
        info!("Transform Y: {transform_y:.3?}");

        self.fit = Some(CalibrationData {
            transform_x,
            transform_y,
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            calibration_error,
            mode,
        });
        true
    }

    /// Map a gaze vector to screen pixels, clamped to the screen.
    ///
    /// Without a calibration [-1, 1] is stretched linearly over the screen.
    #[must_use]
    pub fn gaze_to_screen(&self, gaze_x: f64, gaze_y: f64) -> (f64, f64) {
        let (x, y) = match &self.fit {
            Some(fit) => (
                evaluate(&fit.transform_x, fit.mode, gaze_x, gaze_y),
                evaluate(&fit.transform_y, fit.mode, gaze_x, gaze_y),
            ),
            None => (
                (gaze_x + 1.0) / 2.0 * f64::from(self.screen_width),
                (gaze_y + 1.0) / 2.0 * f64::from(self.screen_height),
            ),
        };
        (clamp_to_screen(x, self.screen_width), clamp_to_screen(y, self.screen_height))
    }

    /// The current fit, if calibrated
    #[must_use]
    pub fn calibration_data(&self) -> Option<CalibrationData> {
        self.fit.clone()
    }

    /// Adopt a stored calibration.
    ///
    /// Rejected, keeping the current state, when it was made for another
    /// screen size or its coefficients do not fit its mode.
    pub fn load_calibration_data(&mut self, data: CalibrationData) -> bool {
        if data.screen_width != self.screen_width || data.screen_height != self.screen_height {
            warn!(
                "Rejecting calibration for {}x{}, screen is {}x{}",
                data.screen_width, data.screen_height, self.screen_width, self.screen_height
            );
            return false;
        }
        let expected = data.mode.coefficient_count();
        if data.transform_x.len() != expected || data.transform_y.len() != expected {
            warn!(
                "Rejecting {} calibration with {}/{} coefficients, expected {expected}",
                data.mode,
                data.transform_x.len(),
                data.transform_y.len()
            );
            return false;
        }
        if !data.transform_x.iter().chain(&data.transform_y).all(|c| c.is_finite()) {
            warn!("Rejecting calibration with non-finite coefficients");
            return false;
        }

        info!("Loaded {} calibration, error {:.1} pixels", data.mode, data.calibration_error);
        self.mode = data.mode;
        self.fit = Some(data);
        true
    }

    /// Drop samples and the fitted mapping
    pub fn reset_calibration(&mut self) {
        for point in &mut self.points {
            point.samples.clear();
        }
        self.fit = None;
    }

    /// Whether a fitted mapping is active
    #[must_use]
    pub const fn is_calibrated(&self) -> bool {
        self.fit.is_some()
    }

    /// Mean pixel residual of the active fit
    #[must_use]
    pub fn calibration_error(&self) -> Option<f64> {
        self.fit.as_ref().map(|fit| fit.calibration_error)
    }

    /// Mapping shape used by the next fit
    #[must_use]
    pub const fn mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Change the shape of the next fit; the active mapping is unaffected
    pub fn set_mode(&mut self, mode: CalibrationMode) {
        self.mode = mode;
    }

    /// Calibration targets
    #[must_use]
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Screen size in pixels
    #[must_use]
    pub const fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    /// Samples recorded for a target
    #[must_use]
    pub fn samples_collected(&self, target_index: usize) -> usize {
        self.points.get(target_index).map_or(0, |p| p.samples.len())
    }

    /// Whether a target has at least `min_samples` samples
    #[must_use]
    pub fn is_point_complete(&self, target_index: usize, min_samples: usize) -> bool {
        self.samples_collected(target_index) >= min_samples
    }

    /// First target with fewer than `min_samples` samples
    #[must_use]
    pub fn next_incomplete_point(&self, min_samples: usize) -> Option<usize> {
        self.points.iter().position(|p| p.samples.len() < min_samples)
    }
}
