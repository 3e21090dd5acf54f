//! Moving-window polynomial (Savitzky–Golay) smoother.
//!
//! Each output sample is the value at the window center of a low-degree
//! polynomial fitted by least squares to the samples inside the window.
//!
//! Conventions:
//! - The window is centered on the output sample; for even lengths the extra
//!   point is taken on the left.
//! - Windows are clamped at the array edges (the fit simply sees fewer
//!   points there).
//! - Any non-finite sample inside a window makes the output sample NaN, so
//!   missing currents propagate instead of being invented. The NaN mask in
//!   the filter stage removes them before fitting.

use nalgebra::{DMatrix, DVector};

use crate::math::ols::solve_least_squares;

/// Smooth `y` with window length `window` and polynomial degree `degree`.
///
/// Output length equals input length. Degenerate settings (window < 2 or
/// degree ≥ window) return the input unchanged.
pub fn savgol_smooth(y: &[f64], window: usize, degree: usize) -> Vec<f64> {
    let n = y.len();
    if n == 0 || window < 2 || degree >= window {
        return y.to_vec();
    }

    let left = window / 2;
    let right = window - 1 - left;

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(left);
        let hi = (i + right).min(n - 1);
        out.push(fit_window(y, lo, hi, i, degree));
    }
    out
}

/// Fit a degree-`degree` polynomial to `y[lo..=hi]` and evaluate it at
/// sample `center`.
fn fit_window(y: &[f64], lo: usize, hi: usize, center: usize, degree: usize) -> f64 {
    let m = hi - lo + 1;
    if y[lo..=hi].iter().any(|v| !v.is_finite()) {
        return f64::NAN;
    }
    // Too few points for the requested degree: pass the sample through.
    if m <= degree {
        return y[center];
    }

    // Powers of the offset from the window center keep the system well
    // conditioned for the small windows used here.
    let mut design = DMatrix::<f64>::zeros(m, degree + 1);
    let mut obs = DVector::<f64>::zeros(m);
    for (row, idx) in (lo..=hi).enumerate() {
        let t = idx as f64 - center as f64;
        let mut p = 1.0;
        for col in 0..=degree {
            design[(row, col)] = p;
            p *= t;
        }
        obs[row] = y[idx];
    }

    match solve_least_squares(&design, &obs) {
        // Evaluated at offset 0: the constant term.
        Some(beta) => beta[0],
        None => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_data_passes_through_unchanged() {
        // A degree-1 smoother reproduces a straight line exactly.
        let y: Vec<f64> = (0..30).map(|i| 3.0 * i as f64 + 1.0).collect();
        let s = savgol_smooth(&y, 10, 1);
        for (a, b) in y.iter().zip(s.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn quadratic_data_passes_through_degree_two() {
        let y: Vec<f64> = (0..40).map(|i| (i as f64 - 20.0).powi(2)).collect();
        let s = savgol_smooth(&y, 20, 2);
        for (a, b) in y.iter().zip(s.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn smoothing_reduces_noise_variance() {
        // Deterministic pseudo-noise on top of a line.
        let y: Vec<f64> = (0..60)
            .map(|i| i as f64 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let s = savgol_smooth(&y, 10, 1);
        let dev_raw: f64 = y.iter().enumerate().map(|(i, v)| (v - i as f64).abs()).sum();
        let dev_smooth: f64 = s
            .iter()
            .enumerate()
            .skip(5)
            .take(50)
            .map(|(i, v)| (v - i as f64).abs())
            .sum();
        assert!(dev_smooth < dev_raw * 0.5);
    }

    #[test]
    fn nan_inputs_propagate_to_nan_outputs() {
        let mut y: Vec<f64> = (0..30).map(|i| i as f64).collect();
        y[15] = f64::NAN;
        let s = savgol_smooth(&y, 10, 1);
        assert!(s[15].is_nan());
        // Samples whose window includes index 15 are NaN too.
        assert!(s[12].is_nan());
        // Far away samples are untouched.
        assert!(s[0].is_finite());
        assert!(s[29].is_finite());
    }
}
