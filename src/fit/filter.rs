//! Derivative/filter stage.
//!
//! Turns a quality-passed trim current into the breakdown-detection signal:
//!
//! 1. shift the current positive (log derivative needs `I > 0`)
//! 2. smooth with a narrow degree-1 moving-window polynomial
//! 3. take the negated log gradient
//! 4. drop non-finite samples (division by near-zero current)
//!
//! The output arrays are what both estimators fit; they are never longer
//! than the input.

use crate::domain::{SmootherSettings, SweepSample};
use crate::math::{neg_log_gradient, savgol_smooth};

/// First-pass smoother applied to the raw trim current.
pub const IV_SMOOTHER: SmootherSettings = SmootherSettings {
    window: 10,
    degree: 1,
};

/// Filtered derivative of one trim sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredDerivative {
    /// Trim codes surviving the NaN/Inf mask.
    pub codes: Vec<f64>,
    /// Normalized derivative at those codes.
    pub derivative: Vec<f64>,
    /// Smoothed (pre-derivative) current over the full input, for
    /// diagnostics.
    pub smoothed_current: Vec<f64>,
    pub smoother: SmootherSettings,
}

/// Compute the filtered, normalized derivative of a trim sweep.
pub fn trim_derivative(sweep: &SweepSample) -> FilteredDerivative {
    let shifted = shift_positive(&sweep.current);
    let smoothed = savgol_smooth(&shifted, IV_SMOOTHER.window, IV_SMOOTHER.degree);
    let raw = neg_log_gradient(&sweep.codes, &smoothed);

    let mut codes = Vec::with_capacity(raw.len());
    let mut derivative = Vec::with_capacity(raw.len());
    for (i, d) in raw.iter().enumerate() {
        if d.is_finite() {
            codes.push(sweep.codes[i]);
            derivative.push(*d);
        }
    }

    FilteredDerivative {
        codes,
        derivative,
        smoothed_current: smoothed,
        smoother: IV_SMOOTHER,
    }
}

/// Shift a current array up by the magnitude of its smallest finite value,
/// so a sign-flipped sweep becomes non-negative before the log is taken.
fn shift_positive(current: &[f64]) -> Vec<f64> {
    let min = current
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        return current.to_vec();
    }
    current.iter().map(|v| v + min.abs()).collect()
}
