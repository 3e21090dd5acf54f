//! Normalized derivative of a current curve.
//!
//! Breakdown detection works on the *relative* slope `I'(V) / I(V)`, which
//! peaks sharply where the avalanche current turns on. Two formulations are
//! in use, and for strictly positive smooth currents they agree:
//!
//! - forward-difference ratio: `(Δy/Δx) / y`
//! - log gradient: `d(ln y)/dx`, central differences in the interior
//!
//! Domain precondition: `y > 0`. Non-positive currents produce NaN/−∞
//! samples, which the filter stage strips before any fit sees them.

/// Second-order gradient of `y` with respect to a (possibly non-uniform)
/// `x`, central differences in the interior, one-sided at the edges.
pub fn gradient(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = y.len();
    assert_eq!(x.len(), n, "gradient: mismatched array lengths");
    if n < 2 {
        return vec![0.0; n];
    }

    let mut out = vec![0.0; n];
    out[0] = (y[1] - y[0]) / (x[1] - x[0]);
    out[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        let hd = x[i] - x[i - 1];
        let hs = x[i + 1] - x[i];
        out[i] = (hs * hs * y[i + 1] + (hd * hd - hs * hs) * y[i] - hd * hd * y[i - 1])
            / (hs * hd * (hd + hs));
    }
    out
}

/// `d(ln y)/dx` via the central-difference gradient.
pub fn log_gradient(x: &[f64], y: &[f64]) -> Vec<f64> {
    let ln_y: Vec<f64> = y.iter().map(|v| v.ln()).collect();
    gradient(x, &ln_y)
}

/// Forward-difference ratio `(Δy/Δx) / y`, final sample padded with 0 so the
/// output aligns with the input.
pub fn normalized_forward(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = y.len();
    assert_eq!(x.len(), n, "normalized_forward: mismatched array lengths");
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n - 1 {
        out.push((y[i + 1] - y[i]) / (x[i + 1] - x[i]) / y[i]);
    }
    out.push(0.0);
    out
}

/// Negated log gradient: the trim-scan breakdown signal.
///
/// Trim current falls as the trim code rises (the effective voltage drops),
/// so the relative slope is negative and breakdown shows up as a sharp
/// positive peak after negation.
pub fn neg_log_gradient(x: &[f64], y: &[f64]) -> Vec<f64> {
    log_gradient(x, y).into_iter().map(|v| -v).collect()
}
