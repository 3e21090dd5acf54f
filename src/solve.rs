//! Operating-voltage solver.
//!
//! All channels on one AFE share a single bias line, so the solver picks ONE
//! bias DAC for the group and an individual trim DAC per channel:
//!
//! - uniform breakdown (all bias-domain Vbd equal within tolerance): the
//!   shared bias is the common Vbd bias plus the DAC equivalent of the
//!   target overvoltage
//! - non-uniform: the bias is solved for the channel with the highest
//!   required operating voltage, so every channel can still reach its own
//!   target by trimming down
//!
//! Channels with a null Vbd never contribute to the bias selection and come
//! back with a null trim. Per-channel conversion-bounds violations are
//! collected and surfaced, never clamped, and never abort the sibling
//! channels.

use tracing::{debug, warn};

use crate::convert::{TRIM_DAC_MAX, TRIM_VOLTS_PER_DAC, trim_dac_to_volts};
use crate::domain::{ConversionCoefficients, OperatingSpec, SipmKind};
use crate::error::{CalibError, Result};

/// Bias-domain Vbd DACs within this many counts count as uniform.
pub const UNIFORM_VBD_TOLERANCE_DAC: u32 = 2;

/// Applied-vs-target mismatches beyond this are reported as warnings.
pub const APPLIED_VOLTS_WARN_TOLERANCE: f64 = 0.01;

/// Per-channel solver input, one entry per channel on the AFE in map order.
#[derive(Debug, Clone)]
pub struct AfeChannel {
    pub channel: u8,
    pub conversion: Option<ConversionCoefficients>,
    pub vbd_bias_dac: Option<u32>,
    /// Reconciled breakdown voltage; `None` marks an unresolved channel.
    pub vbd_volts: Option<f64>,
}

/// Solver output: the spec plus any surfaced conversion failures.
#[derive(Debug)]
pub struct SolveOutcome {
    pub spec: OperatingSpec,
    /// Channels whose operating point could not be solved, with the cause.
    pub channel_errors: Vec<(u8, CalibError)>,
    /// A failure that left the whole AFE without a bias setting.
    pub afe_error: Option<CalibError>,
}

/// Solve one AFE's shared bias DAC and per-channel trim DACs.
pub fn solve_afe(
    afe: u8,
    sipm: SipmKind,
    overvoltage: f64,
    channels: &[AfeChannel],
) -> SolveOutcome {
    let null_spec = |channels: &[AfeChannel]| OperatingSpec {
        afe,
        sipm,
        overvoltage,
        bias_dac: None,
        channels: channels.iter().map(|c| c.channel).collect(),
        trim_dac: vec![None; channels.len()],
    };

    let usable: Vec<&AfeChannel> = channels.iter().filter(|c| c.vbd_volts.is_some()).collect();
    if usable.is_empty() {
        debug!(afe, "no usable Vbd on this AFE, emitting null operating spec");
        return SolveOutcome {
            spec: null_spec(channels),
            channel_errors: Vec::new(),
            afe_error: None,
        };
    }

    let conversion = match mean_conversion(channels) {
        Some(c) => c,
        None => {
            warn!(afe, "no conversion coefficients available on this AFE");
            return SolveOutcome {
                spec: null_spec(channels),
                channel_errors: Vec::new(),
                afe_error: Some(CalibError::DegenerateConversion(
                    "no conversion coefficients on this AFE".into(),
                )),
            };
        }
    };

    let mut channel_errors = Vec::new();
    let bias_dac = match choose_bias_dac(&usable, &conversion, overvoltage) {
        Ok(dac) => dac,
        Err(e) => {
            // Without a bias line setting the whole AFE stays unset.
            warn!(afe, error = %e, "bias DAC selection failed");
            return SolveOutcome {
                spec: null_spec(channels),
                channel_errors,
                afe_error: Some(e),
            };
        }
    };
    let bias_volts = conversion.bias_dac_to_volts(bias_dac as f64);

    let mut trims = Vec::with_capacity(channels.len());
    for ch in channels {
        let Some(vbd) = ch.vbd_volts else {
            trims.push(None);
            continue;
        };
        let target = vbd + overvoltage;
        match solve_trim(bias_volts, target) {
            Ok(trim) => {
                let applied = bias_volts - trim_dac_to_volts(trim as f64);
                if (applied - target).abs() > APPLIED_VOLTS_WARN_TOLERANCE {
                    warn!(
                        afe,
                        channel = ch.channel,
                        target,
                        applied,
                        "applied voltage deviates from target"
                    );
                }
                trims.push(Some(trim));
            }
            Err(e) => {
                warn!(afe, channel = ch.channel, error = %e, "trim DAC unsolvable");
                channel_errors.push((ch.channel, e));
                trims.push(None);
            }
        }
    }

    SolveOutcome {
        spec: OperatingSpec {
            afe,
            sipm,
            overvoltage,
            bias_dac: Some(bias_dac),
            channels: channels.iter().map(|c| c.channel).collect(),
            trim_dac: trims,
        },
        channel_errors,
        afe_error: None,
    }
}

/// Pick the shared bias DAC for the AFE.
fn choose_bias_dac(
    usable: &[&AfeChannel],
    conversion: &ConversionCoefficients,
    overvoltage: f64,
) -> Result<u32> {
    if let Some(shared) = uniform_bias_dac(usable) {
        // All channels broke down at the same bias point: offset it by the
        // DAC equivalent of the overvoltage.
        if !(conversion.slope.is_finite() && conversion.slope > 0.0) {
            return Err(CalibError::DegenerateConversion(format!(
                "non-positive conversion slope {}",
                conversion.slope
            )));
        }
        let ov_dac = (overvoltage / conversion.slope).round() as i64;
        let dac = shared as i64 + ov_dac;
        if dac < 0 {
            return Err(CalibError::DegenerateConversion(format!(
                "negative shared bias DAC {dac}"
            )));
        }
        return Ok(dac as u32);
    }

    // Non-uniform: the highest required operating voltage dictates the bias
    // rail; everyone else trims down to their own target.
    let vop_max = usable
        .iter()
        .filter_map(|c| c.vbd_volts)
        .fold(f64::NEG_INFINITY, f64::max)
        + overvoltage;
    Ok(conversion.volts_to_dac_pair(vop_max)?.bias_dac)
}

/// The common bias-domain Vbd DAC, if all usable channels agree within
/// tolerance.
fn uniform_bias_dac(usable: &[&AfeChannel]) -> Option<u32> {
    let mut dacs = usable.iter().filter_map(|c| c.vbd_bias_dac);
    let first = dacs.next()?;
    // Every usable channel must report a bias-domain Vbd for the uniform
    // shortcut to apply.
    if usable.iter().any(|c| c.vbd_bias_dac.is_none()) {
        return None;
    }
    if dacs.all(|d| d.abs_diff(first) <= UNIFORM_VBD_TOLERANCE_DAC) {
        Some(first)
    } else {
        None
    }
}

/// Trim DAC pulling `bias_volts` down to `target`; range-checked.
fn solve_trim(bias_volts: f64, target: f64) -> Result<u32> {
    let trim = ((bias_volts - target) / TRIM_VOLTS_PER_DAC).trunc() as i64;
    if trim < 0 || trim > TRIM_DAC_MAX as i64 {
        return Err(CalibError::TrimDacOutOfRange {
            trim_dac: trim,
            max_dac: TRIM_DAC_MAX,
            requested_volts: target,
        });
    }
    Ok(trim as u32)
}

/// NaN-tolerant mean of the per-channel conversion coefficients.
fn mean_conversion(channels: &[AfeChannel]) -> Option<ConversionCoefficients> {
    let mut n = 0usize;
    let mut slope = 0.0;
    let mut intercept = 0.0;
    let mut slope_error = 0.0;
    let mut intercept_error = 0.0;
    for c in channels.iter().filter_map(|c| c.conversion.as_ref()) {
        if !(c.slope.is_finite() && c.intercept.is_finite()) {
            continue;
        }
        n += 1;
        slope += c.slope;
        intercept += c.intercept;
        slope_error += c.slope_error;
        intercept_error += c.intercept_error;
    }
    if n == 0 {
        return None;
    }
    let n = n as f64;
    Some(ConversionCoefficients {
        slope: slope / n,
        intercept: intercept / n,
        slope_error: slope_error / n,
        intercept_error: intercept_error / n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversionCoefficients {
        ConversionCoefficients {
            slope: 0.001,
            intercept: 0.5,
            slope_error: 0.0,
            intercept_error: 0.0,
        }
    }

    fn channel(ch: u8, vbd_bias_dac: u32, vbd_volts: f64) -> AfeChannel {
        AfeChannel {
            channel: ch,
            conversion: Some(conv()),
            vbd_bias_dac: Some(vbd_bias_dac),
            vbd_volts: Some(vbd_volts),
        }
    }

    #[test]
    fn uniform_breakdown_shares_one_bias_dac() {
        let shared_dac = 30000u32;
        let ov = 4.5;
        // Identical bias-domain Vbd; slightly different trim-domain values.
        let channels: Vec<AfeChannel> = (0..4)
            .map(|i| {
                let vbd = conv().bias_dac_to_volts(shared_dac as f64)
                    - trim_dac_to_volts(1900.0 + 50.0 * i as f64);
                channel(i, shared_dac, vbd)
            })
            .collect();

        let out = solve_afe(0, SipmKind::Fbk, ov, &channels);
        assert!(out.channel_errors.is_empty());
        let bias_dac = out.spec.bias_dac.unwrap();
        assert_eq!(bias_dac, shared_dac + 4500);

        let bias_volts = conv().bias_dac_to_volts(bias_dac as f64);
        for (i, trim) in out.spec.trim_dac.iter().enumerate() {
            let trim = trim.unwrap();
            let applied = bias_volts - trim_dac_to_volts(trim as f64);
            let target = channels[i].vbd_volts.unwrap() + ov;
            assert!(
                (applied - target).abs() < 0.01,
                "channel {i}: applied {applied}, target {target}"
            );
        }
    }

    #[test]
    fn non_uniform_breakdown_follows_the_highest_target() {
        let ov = 3.0;
        let channels = vec![
            channel(0, 30000, 41.0),
            channel(1, 31000, 41.5),
            channel(2, 32000, 42.3),
        ];
        let out = solve_afe(1, SipmKind::Hpk, ov, &channels);
        assert!(out.channel_errors.is_empty());

        let bias_dac = out.spec.bias_dac.unwrap();
        let bias_volts = conv().bias_dac_to_volts(bias_dac as f64);
        // The rail covers the highest target...
        assert!(bias_volts >= 42.3 + ov);
        // ...and no channel needs a negative trim.
        for (i, trim) in out.spec.trim_dac.iter().enumerate() {
            let trim = trim.expect("all channels solvable");
            let applied = bias_volts - trim_dac_to_volts(trim as f64);
            let target = channels[i].vbd_volts.unwrap() + ov;
            assert!((applied - target).abs() < 0.01, "channel {i}");
        }
    }

    #[test]
    fn null_vbd_channels_get_null_trim_and_no_vote() {
        let ov = 4.5;
        let mut channels = vec![channel(0, 30000, 32.0), channel(1, 30000, 32.0)];
        channels.push(AfeChannel {
            channel: 2,
            conversion: Some(conv()),
            vbd_bias_dac: None,
            vbd_volts: None,
        });

        let out = solve_afe(2, SipmKind::Fbk, ov, &channels);
        assert_eq!(out.spec.trim_dac[2], None);
        // The two live channels agree, so the uniform path still applies.
        assert_eq!(out.spec.bias_dac, Some(30000 + 4500));
    }

    #[test]
    fn all_null_afe_yields_null_spec() {
        let channels = vec![AfeChannel {
            channel: 0,
            conversion: None,
            vbd_bias_dac: None,
            vbd_volts: None,
        }];
        let out = solve_afe(3, SipmKind::Hpk, 3.0, &channels);
        assert_eq!(out.spec.bias_dac, None);
        assert_eq!(out.spec.trim_dac, vec![None]);
    }
}
