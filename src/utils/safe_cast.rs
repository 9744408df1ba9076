//! Checked conversions between stored integers, floats and pixel indices

use crate::{Error, Result};

/// Convert a stored integer to a screen dimension
///
/// # Errors
///
/// Returns an error if the value is negative or exceeds `u32::MAX`
pub fn i64_to_u32(value: i64) -> Result<u32> {
    value
        .try_into()
        .map_err(|_| Error::InvalidInput(format!("Value {value} does not fit in u32")))
}

/// Round a pixel coordinate to an index in `[0, size - 1]`.
///
/// Non-finite values map to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Clamping ensures safe truncation
#[allow(clippy::cast_sign_loss)] // Clamped to non-negative
pub fn f64_to_pixel(value: f64, size: u32) -> u32 {
    let max = size.saturating_sub(1);
    if !value.is_finite() {
        return 0;
    }
    let clamped = value.round().clamp(0.0, f64::from(max));
    (clamped as u32).min(max)
}
