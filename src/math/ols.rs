//! Least squares solvers.
//!
//! The core repeatedly solves small regression problems: the DAC→volt line,
//! the parabola around a derivative peak, the per-window polynomials of the
//! smoother, and the linear pair of the pulse-shape model.
//!
//! Implementation choices:
//! - SVD to solve the least-squares problem robustly even when the design
//!   matrix is tall. (Nalgebra's `QR::solve` is intended for square systems
//!   and will panic for non-square matrices.)
//! - Parameter dimensions are tiny (2–3 columns), so SVD cost is irrelevant.
//! - Coefficient covariance is `s² (XᵀX)⁻¹` with `s² = SSE / (n − p)`, the
//!   same estimate scipy's `curve_fit` reports for unweighted fits.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if the strict solve fails; flat
    // derivative windows can make the design matrix near-singular.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Least squares with coefficient covariance.
///
/// Returns `None` when the solve fails, the problem is underdetermined
/// (`n ≤ p`), or the normal matrix is singular.
pub fn solve_with_covariance(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
) -> Option<(DVector<f64>, DMatrix<f64>)> {
    let n = x.nrows();
    let p = x.ncols();
    if n <= p {
        return None;
    }

    let beta = solve_least_squares(x, y)?;

    let residual = y - x * &beta;
    let sse: f64 = residual.iter().map(|r| r * r).sum();
    let s2 = sse / (n - p) as f64;

    let xtx = x.transpose() * x;
    let cov = xtx.try_inverse()? * s2;
    if cov.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((beta, cov))
}

/// A fitted straight line `y = slope·x + intercept` with 1σ errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    pub slope_error: f64,
    pub intercept_error: f64,
}

/// Fit a straight line by least squares.
pub fn line_fit(x: &[f64], y: &[f64]) -> Option<LineFit> {
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }
    let n = x.len();
    let mut design = DMatrix::<f64>::zeros(n, 2);
    for (i, &xi) in x.iter().enumerate() {
        design[(i, 0)] = xi;
        design[(i, 1)] = 1.0;
    }
    let obs = DVector::from_column_slice(y);
    let (beta, cov) = solve_with_covariance(&design, &obs)?;
    Some(LineFit {
        slope: beta[0],
        intercept: beta[1],
        slope_error: cov[(0, 0)].max(0.0).sqrt(),
        intercept_error: cov[(1, 1)].max(0.0).sqrt(),
    })
}

/// A fitted parabola `y = a·x² + b·x + c` with 1σ errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParabolaFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub a_error: f64,
    pub b_error: f64,
    pub c_error: f64,
}

impl ParabolaFit {
    /// Vertex location `-b / 2a`.
    pub fn vertex(&self) -> f64 {
        -self.b / (2.0 * self.a)
    }

    /// 1σ error on the vertex, propagated from the a/b uncertainties.
    pub fn vertex_error(&self) -> f64 {
        let d_b = self.b_error / (2.0 * self.a);
        let d_a = self.b * self.a_error / (2.0 * self.a * self.a);
        (d_b * d_b + d_a * d_a).sqrt()
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.a * x * x + self.b * x + self.c
    }
}

/// Fit a parabola by least squares.
pub fn parabola_fit(x: &[f64], y: &[f64]) -> Option<ParabolaFit> {
    if x.len() != y.len() || x.len() < 4 {
        return None;
    }
    let n = x.len();
    let mut design = DMatrix::<f64>::zeros(n, 3);
    for (i, &xi) in x.iter().enumerate() {
        design[(i, 0)] = xi * xi;
        design[(i, 1)] = xi;
        design[(i, 2)] = 1.0;
    }
    let obs = DVector::from_column_slice(y);
    let (beta, cov) = solve_with_covariance(&design, &obs)?;
    Some(ParabolaFit {
        a: beta[0],
        b: beta[1],
        c: beta[2],
        a_error: cov[(0, 0)].max(0.0).sqrt(),
        b_error: cov[(1, 1)].max(0.0).sqrt(),
        c_error: cov[(2, 2)].max(0.0).sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn line_fit_recovers_slope_and_intercept() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 10.0).collect();
        let y: Vec<f64> = x.iter().map(|&v| 0.001 * v + 0.5).collect();
        let fit = line_fit(&x, &y).unwrap();
        assert!((fit.slope - 0.001).abs() < 1e-12);
        assert!((fit.intercept - 0.5).abs() < 1e-9);
        // A perfect line should report (near-)zero coefficient errors.
        assert!(fit.slope_error < 1e-9);
    }

    #[test]
    fn parabola_vertex_of_exact_data() {
        // y = -(x - 3)^2 + 10 → a = -1, b = 6, c = 1, vertex at 3.
        let x: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| -(v - 3.0) * (v - 3.0) + 10.0).collect();
        let fit = parabola_fit(&x, &y).unwrap();
        assert!((fit.a + 1.0).abs() < 1e-9);
        assert!((fit.vertex() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn underdetermined_fit_is_rejected() {
        assert!(line_fit(&[0.0, 1.0], &[0.0, 1.0]).is_none());
        assert!(parabola_fit(&[0.0, 1.0, 2.0], &[0.0, 1.0, 0.0]).is_none());
    }
}
