//! DAC↔Volt conversion.
//!
//! The bias sweep measures both the DAC code and the resulting volts, so a
//! straight-line fit of those pairs is the sole source of truth for the
//! DAC→volt map of that channel. The trim DAC instead maps linearly across a
//! fixed voltage range, independent of per-channel fitting.
//!
//! The inverse map (volts → DAC pair) validates its result instead of
//! clamping: a trim code outside the physical range, or a round-trip that
//! does not reproduce the requested voltage, is an error. Clamping would
//! silently operate a channel at the wrong overvoltage.

use crate::domain::{ConversionCoefficients, ScanKind, SweepSample};
use crate::error::{CalibError, Result};
use crate::math::line_fit;

/// Volts per trim-DAC count: the trim span maps linearly onto 4.4 V.
pub const TRIM_VOLTS_PER_DAC: f64 = 4.4 / 4095.0;

/// Highest trim code the hardware accepts for operating points.
pub const TRIM_DAC_MAX: u32 = 4090;

/// Flooring the bias DAC would undershoot the requested voltage; this offset
/// keeps the bias side just above it so the trim side can take up the slack.
pub const BIAS_DAC_OFFSET: i64 = 2;

/// Maximum allowed |requested − applied| after the DAC pair is chosen.
pub const ROUND_TRIP_TOLERANCE_V: f64 = 0.1;

/// A solved (bias, trim) DAC pair and the voltage it actually applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacPair {
    pub bias_dac: u32,
    pub trim_dac: u32,
}

impl DacPair {
    pub fn applied_volts(&self, conversion: &ConversionCoefficients) -> f64 {
        conversion.bias_dac_to_volts(self.bias_dac as f64) - trim_dac_to_volts(self.trim_dac as f64)
    }
}

/// Fit the linear DAC→volt map from a bias sweep.
pub fn fit_conversion(bias: &SweepSample) -> Result<ConversionCoefficients> {
    if bias.scan != ScanKind::Bias {
        return Err(CalibError::DegenerateConversion(
            "conversion requires a bias sweep".into(),
        ));
    }
    let volts = bias.volts.as_ref().ok_or_else(|| {
        CalibError::DegenerateConversion("bias sweep has no measured volts".into())
    })?;

    let fit = line_fit(&bias.codes, volts).ok_or_else(|| {
        CalibError::DegenerateConversion("bias DAC/volt line fit failed".into())
    })?;
    if !(fit.slope.is_finite() && fit.slope != 0.0 && fit.intercept.is_finite()) {
        return Err(CalibError::DegenerateConversion(format!(
            "unusable line fit: slope={}, intercept={}",
            fit.slope, fit.intercept
        )));
    }

    Ok(ConversionCoefficients {
        slope: fit.slope,
        intercept: fit.intercept,
        slope_error: fit.slope_error,
        intercept_error: fit.intercept_error,
    })
}

/// Trim DAC → volts (fixed scale, no per-channel fit involved).
pub fn trim_dac_to_volts(trim_dac: f64) -> f64 {
    trim_dac * TRIM_VOLTS_PER_DAC
}

impl ConversionCoefficients {
    /// Bias DAC → volts.
    pub fn bias_dac_to_volts(&self, bias_dac: f64) -> f64 {
        self.slope * bias_dac + self.intercept
    }

    /// 1σ error on a converted bias voltage, from the fit uncertainties.
    pub fn bias_volts_error(&self, volts: f64) -> f64 {
        ((volts * self.slope_error).powi(2) + self.intercept_error.powi(2)).sqrt()
    }

    /// Full operating voltage of a channel: bias volts minus trim volts.
    pub fn full_to_volts(&self, bias_dac: f64, trim_dac: f64) -> f64 {
        self.bias_dac_to_volts(bias_dac) - trim_dac_to_volts(trim_dac)
    }

    /// Solve the (bias, trim) DAC pair applying `volts`.
    ///
    /// The bias DAC is floored just above the target and the trim DAC pulls
    /// the remainder back down. Errors when the trim code leaves the physical
    /// range or the round trip misses by more than the tolerance.
    pub fn volts_to_dac_pair(&self, volts: f64) -> Result<DacPair> {
        if !(self.slope.is_finite() && self.slope > 0.0) {
            return Err(CalibError::DegenerateConversion(format!(
                "non-positive conversion slope {}",
                self.slope
            )));
        }

        let bias_dac = ((volts - self.intercept) / self.slope).trunc() as i64 + BIAS_DAC_OFFSET;
        if bias_dac < 0 {
            return Err(CalibError::DegenerateConversion(format!(
                "negative bias DAC {bias_dac} for {volts:.3} V"
            )));
        }
        let bias_volts = self.bias_dac_to_volts(bias_dac as f64);

        let trim_dac = ((bias_volts - volts) / TRIM_VOLTS_PER_DAC).trunc() as i64;
        if trim_dac < 0 || trim_dac > TRIM_DAC_MAX as i64 {
            return Err(CalibError::TrimDacOutOfRange {
                trim_dac,
                max_dac: TRIM_DAC_MAX,
                requested_volts: volts,
            });
        }

        let pair = DacPair {
            bias_dac: bias_dac as u32,
            trim_dac: trim_dac as u32,
        };
        let applied = pair.applied_volts(self);
        if (applied - volts).abs() > ROUND_TRIP_TOLERANCE_V {
            return Err(CalibError::RoundTripFailed {
                requested_volts: volts,
                applied_volts: applied,
                tolerance: ROUND_TRIP_TOLERANCE_V,
            });
        }

        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CalibError;

    fn conv(slope: f64, intercept: f64) -> ConversionCoefficients {
        ConversionCoefficients {
            slope,
            intercept,
            slope_error: 0.0,
            intercept_error: 0.0,
        }
    }

    fn bias_sweep(slope: f64, intercept: f64) -> SweepSample {
        let codes: Vec<f64> = (0..30).map(|i| i as f64 * 100.0).collect();
        let volts: Vec<f64> = codes.iter().map(|&c| slope * c + intercept).collect();
        let current: Vec<f64> = (0..30).map(|i| 0.1 + 0.01 * i as f64).collect();
        SweepSample::new(ScanKind::Bias, codes, current, Some(volts)).unwrap()
    }

    #[test]
    fn conversion_fit_recovers_the_line() {
        let c = fit_conversion(&bias_sweep(0.001, 0.5)).unwrap();
        assert!((c.slope - 0.001).abs() < 1e-12);
        assert!((c.intercept - 0.5).abs() < 1e-9);
    }

    #[test]
    fn conversion_requires_measured_volts() {
        let codes: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let current = vec![0.1; 30];
        let sweep = SweepSample::new(ScanKind::Bias, codes, current, None).unwrap();
        assert!(matches!(
            fit_conversion(&sweep),
            Err(CalibError::DegenerateConversion(_))
        ));
    }

    #[test]
    fn round_trip_reproduces_the_voltage() {
        let c = conv(0.001, 0.5);
        for dac in [1000u32, 2500, 40000] {
            let volts = c.bias_dac_to_volts(dac as f64);
            let pair = c.volts_to_dac_pair(volts).unwrap();
            // Bias side lands just above, trim pulls back within one step.
            assert_eq!(pair.bias_dac, dac + BIAS_DAC_OFFSET as u32);
            let applied = pair.applied_volts(&c);
            assert!((applied - volts).abs() <= TRIM_VOLTS_PER_DAC + 1e-12);
        }
    }

    #[test]
    fn out_of_range_trim_is_an_error_not_a_clamp() {
        // Huge slope: the +2 bias offset overshoots by more than the trim
        // span can pull back.
        let c = conv(10.0, 0.0);
        let err = c.volts_to_dac_pair(25.0).unwrap_err();
        assert!(matches!(err, CalibError::TrimDacOutOfRange { .. }));
    }

    #[test]
    fn operating_voltage_combines_both_domains() {
        let c = conv(0.001, 0.5);
        let v = c.full_to_volts(45000.0, 2000.0);
        let expected = 45.5 - 2000.0 * TRIM_VOLTS_PER_DAC;
        assert!((v - expected).abs() < 1e-12);
    }
}
