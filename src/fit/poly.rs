//! Polynomial (derivative-peak) estimator.
//!
//! Locates the peak of the filtered derivative and fits a parabola around it;
//! the breakdown voltage is the parabola's vertex `-b/2a`, with the error
//! propagated from the fit covariance.
//!
//! The smoothing window applied before the peak search is retried in fixed
//! steps (narrower first, then wider) until a candidate passes the validity
//! checks or the window ladder is exhausted.

use crate::domain::{DiagnosticCurve, FitEstimate, FitMethod, SmootherSettings};
use crate::math::{parabola_fit, savgol_smooth};

/// Starting window for the second (derivative) smoothing pass.
pub const POLY_WINDOW_START: usize = 20;
/// The window ladder shrinks down to (exclusive) this bound...
pub const POLY_WINDOW_MIN: usize = 10;
/// ...then restarts above the start value and grows up to this bound.
pub const POLY_WINDOW_MAX: usize = 40;
/// Step between candidate windows.
pub const POLY_WINDOW_STEP: usize = 2;

/// Smoothing degree for the derivative pass.
const POLY_DEGREE: usize = 2;

/// Samples excluded at each end of the derivative during the peak search.
const EDGE_MARGIN: usize = 10;

/// Half-width of the point window around the peak handed to the parabola fit.
const PEAK_HALF_RANGE: usize = 8;

/// Vertex positions inside the first/last few samples are edge artifacts.
const VERTEX_MARGIN: usize = 5;

/// Run the polynomial estimator with its bounded window-retry ladder.
///
/// Returns `None` when every candidate window is rejected.
pub fn estimate(codes: &[f64], derivative: &[f64]) -> Option<FitEstimate> {
    for window in window_ladder() {
        if let Some(found) = fit_once(codes, derivative, window) {
            return Some(found);
        }
    }
    None
}

/// Candidate smoothing windows, in retry order: the start value, narrower
/// steps down to the minimum, then wider steps up to the maximum.
fn window_ladder() -> impl Iterator<Item = usize> {
    let down = (POLY_WINDOW_MIN..=POLY_WINDOW_START)
        .rev()
        .step_by(POLY_WINDOW_STEP);
    let up = (POLY_WINDOW_START + POLY_WINDOW_STEP..=POLY_WINDOW_MAX).step_by(POLY_WINDOW_STEP);
    down.chain(up)
}

/// One attempt at a fixed smoothing window.
fn fit_once(codes: &[f64], derivative: &[f64], window: usize) -> Option<FitEstimate> {
    let n = codes.len();
    if n != derivative.len() || n <= 2 * EDGE_MARGIN || n <= 2 * VERTEX_MARGIN {
        return None;
    }

    let smoothed = savgol_smooth(derivative, window, POLY_DEGREE);
    if smoothed.iter().all(|v| v.is_nan()) {
        return None;
    }

    // Peak of the smoothed derivative, interior only.
    let peak_index = argmax_finite(&smoothed[EDGE_MARGIN..n - EDGE_MARGIN])? + EDGE_MARGIN;

    let min_index = peak_index.saturating_sub(PEAK_HALF_RANGE);
    let max_index = (peak_index + PEAK_HALF_RANGE).min(n - 1);

    let fit = parabola_fit(&codes[min_index..max_index], &smoothed[min_index..max_index])?;

    // Physically the derivative peaks downward-opening; an upward parabola
    // means the window caught noise, not the breakdown knee.
    if fit.a >= 0.0 {
        return None;
    }

    let vbd = fit.vertex();
    if vbd < codes[VERTEX_MARGIN] || vbd > codes[n - VERTEX_MARGIN] {
        return None;
    }

    let fitted = sample_parabola(&fit, codes[min_index], codes[max_index], 100);
    Some(FitEstimate {
        method: FitMethod::Polynomial,
        vbd_trim_dac: vbd,
        error_dac: fit.vertex_error(),
        derivative: DiagnosticCurve {
            x: codes.to_vec(),
            y: smoothed,
        },
        fitted,
        smoother: SmootherSettings {
            window,
            degree: POLY_DEGREE,
        },
    })
}

/// Index of the largest finite value; NaNs lose, ties break to the first.
fn argmax_finite(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

fn sample_parabola(
    fit: &crate::math::ParabolaFit,
    lo: f64,
    hi: f64,
    steps: usize,
) -> DiagnosticCurve {
    let mut x = Vec::with_capacity(steps);
    let mut y = Vec::with_capacity(steps);
    for i in 0..steps {
        let t = lo + (hi - lo) * i as f64 / (steps - 1) as f64;
        x.push(t);
        y.push(fit.eval(t));
    }
    DiagnosticCurve { x, y }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clean gaussian bump centered at `center` on a dense code axis.
    fn peaked_derivative(center: f64) -> (Vec<f64>, Vec<f64>) {
        let codes: Vec<f64> = (0..40).map(|i| i as f64 * 100.0).collect();
        let der: Vec<f64> = codes
            .iter()
            .map(|&c| 0.0005 + 0.004 * (-((c - center) / 200.0).powi(2)).exp())
            .collect();
        (codes, der)
    }

    #[test]
    fn recovers_a_clean_peak() {
        let (codes, der) = peaked_derivative(2000.0);
        let fit = estimate(&codes, &der).expect("estimator should converge");
        assert!(
            (fit.vbd_trim_dac - 2000.0).abs() < 100.0,
            "vertex at {}",
            fit.vbd_trim_dac
        );
        assert!(fit.error_dac.is_finite());
        assert_eq!(fit.method, FitMethod::Polynomial);
    }

    #[test]
    fn edge_peak_is_rejected() {
        // Monotonically rising derivative: the apparent peak sits at the edge
        // of the interior and the vertex lands outside the valid range.
        let codes: Vec<f64> = (0..40).map(|i| i as f64 * 100.0).collect();
        let der: Vec<f64> = codes.iter().map(|&c| 1e-4 * c).collect();
        assert!(estimate(&codes, &der).is_none());
    }

    #[test]
    fn too_short_input_is_rejected() {
        let codes: Vec<f64> = (0..15).map(|i| i as f64).collect();
        let der = vec![0.1; 15];
        assert!(estimate(&codes, &der).is_none());
    }

    #[test]
    fn window_ladder_order_and_bounds() {
        let ladder: Vec<usize> = window_ladder().collect();
        assert_eq!(ladder[0], 20);
        assert!(ladder.contains(&10));
        assert_eq!(*ladder.last().unwrap(), 40);
        let descent_end = ladder.iter().position(|&w| w == 10).unwrap();
        assert!(ladder[..=descent_end].windows(2).all(|w| w[1] < w[0]));
        assert!(ladder[descent_end + 1..].windows(2).all(|w| w[1] > w[0]));
    }
}
