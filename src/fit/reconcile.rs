//! Reconciliation of the two estimators.
//!
//! The decision table and its outcome strings (`domain::FitStatus`) are a
//! fixed contract with downstream reporting and operator review:
//!
//! | polynomial | pulse | outcome |
//! |---|---|---|
//! | found | found, |Δ| < threshold | truncated mean, `Both good` |
//! | found | found, |Δ| ≥ threshold | null, `Check(Delta=…)` |
//! | found | not found | polynomial, `Only polyfit` |
//! | not found | found | pulse, `Only pulsefit` |
//! | not found | not found | null, `Both failed` |

use crate::domain::{FitEstimate, FitStatus};

/// Two estimates agreeing within this many trim-DAC counts are averaged;
/// beyond it both are discarded for operator review.
pub const AGREEMENT_THRESHOLD_DAC: f64 = 200.0;

/// Reconciled trim-domain breakdown for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciled {
    pub vbd_trim_dac: Option<f64>,
    pub error_dac: Option<f64>,
    pub status: FitStatus,
}

/// Merge the two estimator outputs into one value + status.
pub fn reconcile(poly: Option<&FitEstimate>, pulse: Option<&FitEstimate>) -> Reconciled {
    match (poly, pulse) {
        (Some(p), Some(q)) => {
            let delta = q.vbd_trim_dac - p.vbd_trim_dac;
            if delta.abs() < AGREEMENT_THRESHOLD_DAC {
                Reconciled {
                    // Integer-truncated mean, matching the DAC granularity of
                    // the reports.
                    vbd_trim_dac: Some(((p.vbd_trim_dac + q.vbd_trim_dac) / 2.0).trunc()),
                    error_dac: Some(delta.abs() / 2.0),
                    status: FitStatus::BothGood,
                }
            } else {
                Reconciled {
                    vbd_trim_dac: None,
                    error_dac: None,
                    status: FitStatus::Disagreement { delta },
                }
            }
        }
        (Some(p), None) => Reconciled {
            vbd_trim_dac: Some(p.vbd_trim_dac),
            error_dac: Some(p.error_dac),
            status: FitStatus::OnlyPolyfit,
        },
        (None, Some(q)) => Reconciled {
            vbd_trim_dac: Some(q.vbd_trim_dac),
            error_dac: Some(q.error_dac),
            status: FitStatus::OnlyPulsefit,
        },
        (None, None) => Reconciled {
            vbd_trim_dac: None,
            error_dac: None,
            status: FitStatus::BothFailed,
        },
    }
}
