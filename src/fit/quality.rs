//! Data-quality gate.
//!
//! Classifies a raw current array as usable or not before any fitting is
//! attempted. The thresholds are fixed policy constants: they decide whether
//! a channel is analyzed at all, so they must not drift between runs.
//!
//! A `BAD` verdict short-circuits that channel/scan: no fit runs and the
//! channel is reported with a null Vbd and the verdict string.

use crate::domain::{DataQuality, ScanKind};

/// Minimum sample counts per scan type.
pub const BIAS_MIN_SAMPLES: usize = 10;
pub const TRIM_MIN_SAMPLES: usize = 20;

/// NaN currents at or above this count make a sweep unusable.
pub const MAX_NAN_CURRENTS: usize = 10;

/// Margin over the low-end mean current that the top of a bias sweep must
/// exceed; otherwise the channel is dead or the bias range is wrong.
pub const DEAD_CHANNEL_MARGIN: f64 = 0.02;

/// Minimum trim-current dynamic range.
pub const TRIM_MIN_SPAN: f64 = 0.10;

/// Assess one sweep's current array.
pub fn assess(scan: ScanKind, current: &[f64]) -> DataQuality {
    match scan {
        ScanKind::Bias => bias_quality(current),
        ScanKind::Trim => trim_quality(current),
    }
}

fn bias_quality(current: &[f64]) -> DataQuality {
    if current.len() < BIAS_MIN_SAMPLES {
        return DataQuality::BadTooFewSamples {
            min: BIAS_MIN_SAMPLES,
        };
    }
    if nan_count(current) >= MAX_NAN_CURRENTS {
        return DataQuality::BadTooManyNan;
    }

    // The avalanche turn-on must lift the last samples clear of the low-end
    // plateau. NaN comparisons are false, so NaN endpoints count as alive.
    let plateau = mean(&current[..BIAS_MIN_SAMPLES]) + DEAD_CHANNEL_MARGIN;
    let n = current.len();
    if current[n - 1] < plateau && current[n - 2] < plateau {
        return DataQuality::BadDeadChannel;
    }

    DataQuality::Good
}

fn trim_quality(current: &[f64]) -> DataQuality {
    if current.len() < TRIM_MIN_SAMPLES {
        return DataQuality::BadTooFewSamples {
            min: TRIM_MIN_SAMPLES,
        };
    }
    let nans = nan_count(current);
    if nans == current.len() {
        return DataQuality::BadAllNan;
    }
    if nans >= MAX_NAN_CURRENTS {
        return DataQuality::BadTooManyNan;
    }
    if nans > 0 {
        return DataQuality::GoodNanWarning;
    }

    let (min, max) = finite_extrema(current);
    if max - min < TRIM_MIN_SPAN {
        return DataQuality::BadLowSpan;
    }

    DataQuality::Good
}

fn nan_count(values: &[f64]) -> usize {
    values.iter().filter(|v| v.is_nan()).count()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn finite_extrema(values: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_finite() {
            min = min.min(v);
            max = max.max(v);
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_bias_sweep_is_rejected() {
        let current = vec![0.1; 9];
        assert_eq!(
            assess(ScanKind::Bias, &current),
            DataQuality::BadTooFewSamples { min: 10 }
        );
    }

    #[test]
    fn dead_bias_channel_is_rejected() {
        // Flat current: the top never rises above the low-end plateau.
        let current = vec![0.1; 30];
        assert_eq!(assess(ScanKind::Bias, &current), DataQuality::BadDeadChannel);
    }

    #[test]
    fn rising_bias_sweep_is_good() {
        let current: Vec<f64> = (0..30).map(|i| 0.1 + 0.01 * i as f64).collect();
        assert_eq!(assess(ScanKind::Bias, &current), DataQuality::Good);
    }

    #[test]
    fn trim_nan_policy() {
        let mut current: Vec<f64> = (0..40).map(|i| 0.01 * i as f64).collect();
        assert_eq!(assess(ScanKind::Trim, &current), DataQuality::Good);

        for v in current.iter_mut().take(3) {
            *v = f64::NAN;
        }
        assert_eq!(assess(ScanKind::Trim, &current), DataQuality::GoodNanWarning);

        for v in current.iter_mut().take(10) {
            *v = f64::NAN;
        }
        assert_eq!(assess(ScanKind::Trim, &current), DataQuality::BadTooManyNan);

        let all_nan = vec![f64::NAN; 40];
        assert_eq!(assess(ScanKind::Trim, &all_nan), DataQuality::BadAllNan);
    }

    #[test]
    fn flat_trim_sweep_fails_span_check() {
        let current: Vec<f64> = (0..40).map(|i| 0.001 * i as f64).collect();
        assert_eq!(assess(ScanKind::Trim, &current), DataQuality::BadLowSpan);
    }
}
