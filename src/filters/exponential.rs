use super::GazeFilter;

/// Exponential smoothing filter, applied to mapped screen points
#[derive(Debug, Clone)]
pub struct ExponentialFilter {
    alpha: f64,
    last: Option<(f64, f64)>,
}

impl ExponentialFilter {
    /// Create a new exponential filter; alpha 1.0 passes values through
    ///
    /// # Panics
    ///
    /// Panics if alpha is not in the range (0, 1]
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        assert!(alpha > 0.0 && alpha <= 1.0, "Alpha must be in (0, 1]");
        Self { alpha, last: None }
    }

    /// Smoothing factor
    #[must_use]
    pub const fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl GazeFilter for ExponentialFilter {
    fn update(&mut self, x: f64, y: f64) -> (f64, f64) {
        let filtered = match self.last {
            Some((last_x, last_y)) => (
                self.alpha.mul_add(x - last_x, last_x),
                self.alpha.mul_add(y - last_y, last_y),
            ),
            None => (x, y),
        };
        self.last = Some(filtered);
        filtered
    }

    fn reset(&mut self) {
        self.last = None;
    }

    fn name(&self) -> &str {
        "ExponentialFilter"
    }
}
