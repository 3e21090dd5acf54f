//! Shared domain types.
//!
//! These types are intentionally lightweight and serializable so they can be:
//!
//! - used in-memory while the pipeline runs
//! - exported to JSON / tab-separated reports by external writers
//! - reloaded later for comparisons across runs
//!
//! Everything here is created fresh per analysis run and never mutated after
//! creation; each pipeline stage produces a new record consumed by the next.

use serde::{Deserialize, Serialize};

use crate::error::{CalibError, Result};

/// Which reverse I–V scan a sweep belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Coarse scan over the shared bias DAC; also yields the DAC→volt map.
    Bias,
    /// Fine scan over the per-channel trim DAC around breakdown.
    Trim,
}

/// SiPM sensor family. Determines the default target overvoltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SipmKind {
    Fbk,
    Hpk,
}

impl SipmKind {
    /// Label used in reports (`SIPM_type` column).
    pub fn label(self) -> &'static str {
        match self {
            SipmKind::Fbk => "FBK",
            SipmKind::Hpk => "HPK",
        }
    }

    /// Default target overvoltage for this family, in volts.
    pub fn default_overvoltage(self) -> f64 {
        match self {
            SipmKind::Fbk => 4.5,
            SipmKind::Hpk => 3.0,
        }
    }
}

/// Identity of one readout channel, assigned from the channel map and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    /// Endpoint IP address (reports keep the full dotted form).
    pub endpoint: String,
    /// APA the endpoint serves.
    pub apa: u8,
    /// Configuration channel number, 0–39.
    pub channel: u8,
    pub sipm: SipmKind,
}

impl ChannelIdentity {
    /// Amplifier front-end group (0–4). Eight config channels per AFE.
    pub fn afe(&self) -> u8 {
        self.channel / 8
    }

    /// DAQ channel numbering: AFE counts in tens, channel-within-AFE in units.
    pub fn daq_channel(&self) -> u8 {
        10 * self.afe() + (self.channel % 8)
    }
}

/// One scan's ordered (code, current[, volts]) samples for one channel.
///
/// Invariants (enforced at construction): at least one sample, equal array
/// lengths, monotonic codes. Currents may contain NaN; the quality gate
/// decides whether the sweep is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSample {
    pub scan: ScanKind,
    /// DAC or trim codes, stored as f64 for the numerics downstream.
    pub codes: Vec<f64>,
    /// Measured current per code (sign-corrected, arbitrary units).
    pub current: Vec<f64>,
    /// Measured volts per code; present for bias scans only.
    pub volts: Option<Vec<f64>>,
}

impl SweepSample {
    pub fn new(
        scan: ScanKind,
        codes: Vec<f64>,
        current: Vec<f64>,
        volts: Option<Vec<f64>>,
    ) -> Result<Self> {
        if codes.is_empty() {
            return Err(CalibError::InvalidSweep("empty sweep".into()));
        }
        if codes.len() != current.len() {
            return Err(CalibError::InvalidSweep(format!(
                "{} codes vs {} currents",
                codes.len(),
                current.len()
            )));
        }
        if let Some(v) = &volts {
            if v.len() != codes.len() {
                return Err(CalibError::InvalidSweep(format!(
                    "{} codes vs {} volts",
                    codes.len(),
                    v.len()
                )));
            }
        }
        let increasing = codes.windows(2).all(|w| w[1] >= w[0]);
        let decreasing = codes.windows(2).all(|w| w[1] <= w[0]);
        if !(increasing || decreasing) {
            return Err(CalibError::InvalidSweep(
                "independent variable is not monotonic".into(),
            ));
        }
        Ok(Self {
            scan,
            codes,
            current,
            volts,
        })
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Sampling step of the independent variable (first difference).
    pub fn step(&self) -> f64 {
        if self.codes.len() < 2 {
            0.0
        } else {
            self.codes[1] - self.codes[0]
        }
    }
}

/// Verdict of the quality gate for one sweep.
///
/// The exact verdict strings are load-bearing: downstream reports and
/// operator tooling match on them, so `Display` reproduces them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataQuality {
    Good,
    /// Usable, but some currents were NaN (1–9 in a trim scan).
    GoodNanWarning,
    /// Fewer samples than the scan-type minimum.
    BadTooFewSamples { min: usize },
    BadAllNan,
    BadTooManyNan,
    /// Current never rises at the top of the bias range.
    BadDeadChannel,
    /// Trim current span below the minimum dynamic range.
    BadLowSpan,
}

impl DataQuality {
    /// Whether fitting may proceed on this sweep.
    pub fn is_usable(self) -> bool {
        matches!(self, DataQuality::Good | DataQuality::GoodNanWarning)
    }
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataQuality::Good => write!(f, "Good"),
            DataQuality::GoodNanWarning => {
                write!(f, "Good(Warning: some NaN value for current)")
            }
            DataQuality::BadTooFewSamples { min } => {
                write!(f, "BAD(less than {min} samples)")
            }
            DataQuality::BadAllNan => write!(f, "BAD(all currents are NaN)"),
            DataQuality::BadTooManyNan => write!(f, "BAD(more than 10 NaN currents)"),
            DataQuality::BadDeadChannel => {
                write!(f, "BAD(dead channel or wrong bias range)")
            }
            DataQuality::BadLowSpan => write!(f, "BAD(check trim current)"),
        }
    }
}

/// Which estimator produced a `FitEstimate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    Polynomial,
    PulseShape,
}

/// Moving-window polynomial smoother settings actually used by a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmootherSettings {
    pub window: usize,
    pub degree: usize,
}

/// A sampled curve kept for diagnostics/plotting by external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticCurve {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// One estimator's breakdown estimate. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitEstimate {
    pub method: FitMethod,
    /// Breakdown location in trim-DAC units.
    pub vbd_trim_dac: f64,
    /// 1σ fit error, trim-DAC units.
    pub error_dac: f64,
    /// Filtered derivative the fit ran on.
    pub derivative: DiagnosticCurve,
    /// Fitted function sampled over the fit window.
    pub fitted: DiagnosticCurve,
    pub smoother: SmootherSettings,
}

/// Outcome of reconciling the two estimators.
///
/// The strings emitted by `Display` are the closed vocabulary operators
/// review against; they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FitStatus {
    BothGood,
    /// Both converged but disagree by `delta` trim-DAC counts; needs review.
    Disagreement { delta: f64 },
    OnlyPolyfit,
    OnlyPulsefit,
    BothFailed,
}

impl std::fmt::Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitStatus::BothGood => write!(f, "Both good"),
            FitStatus::Disagreement { delta } => write!(f, "Check(Delta={delta:.0})"),
            FitStatus::OnlyPolyfit => write!(f, "Only polyfit"),
            FitStatus::OnlyPulsefit => write!(f, "Only pulsefit"),
            FitStatus::BothFailed => write!(f, "Both failed"),
        }
    }
}

/// Linear DAC→volt map for one channel's bias line, with fit uncertainties.
///
/// Derived once from the channel's bias sweep and read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionCoefficients {
    /// Volts per bias-DAC count.
    pub slope: f64,
    /// Volts at DAC 0.
    pub intercept: f64,
    pub slope_error: f64,
    pub intercept_error: f64,
}

/// Reconciled breakdown result for one channel.
///
/// A missing Vbd is `None`, never 0.0, so an unresolved channel can not be
/// mistaken for a real reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VbdResult {
    /// Bias-domain breakdown DAC (top of the bias sweep).
    pub vbd_bias_dac: Option<u32>,
    /// Reconciled trim-domain breakdown, trim-DAC units.
    pub vbd_trim_dac: Option<f64>,
    /// Reconciled 1σ error on the trim-domain value.
    pub vbd_trim_dac_error: Option<f64>,
    /// Breakdown voltage in volts (bias volts − trim volts).
    pub vbd_volts: Option<f64>,
    pub vbd_volts_error: Option<f64>,
    pub status: FitStatus,
    pub polynomial: Option<FitEstimate>,
    pub pulse: Option<FitEstimate>,
}

impl VbdResult {
    /// A null result with the given status (gate short-circuit, failed fits).
    pub fn null(status: FitStatus) -> Self {
        Self {
            vbd_bias_dac: None,
            vbd_trim_dac: None,
            vbd_trim_dac_error: None,
            vbd_volts: None,
            vbd_volts_error: None,
            status,
            polynomial: None,
            pulse: None,
        }
    }
}

/// Operating settings for one AFE: the single shared bias DAC plus one trim
/// DAC per channel. Terminal artifact handed to the configuration writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingSpec {
    pub afe: u8,
    pub sipm: SipmKind,
    /// Target overvoltage applied, volts.
    pub overvoltage: f64,
    /// Shared bias DAC; `None` when no channel on the AFE has a usable Vbd.
    pub bias_dac: Option<u32>,
    /// Config channel numbers, in map order.
    pub channels: Vec<u8>,
    /// Per-channel trim DAC, aligned with `channels`; `None` for null Vbd.
    pub trim_dac: Vec<Option<u32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daq_channel_numbering() {
        let id = ChannelIdentity {
            endpoint: "10.73.137.104".into(),
            apa: 1,
            channel: 27,
            sipm: SipmKind::Hpk,
        };
        assert_eq!(id.afe(), 3);
        assert_eq!(id.daq_channel(), 33);
    }

    #[test]
    fn sweep_rejects_non_monotonic_codes() {
        let err = SweepSample::new(
            ScanKind::Trim,
            vec![0.0, 2.0, 1.0],
            vec![1.0, 1.0, 1.0],
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn quality_strings_are_verbatim() {
        assert_eq!(
            DataQuality::BadTooFewSamples { min: 20 }.to_string(),
            "BAD(less than 20 samples)"
        );
        assert_eq!(
            DataQuality::BadDeadChannel.to_string(),
            "BAD(dead channel or wrong bias range)"
        );
        assert_eq!(
            DataQuality::GoodNanWarning.to_string(),
            "Good(Warning: some NaN value for current)"
        );
    }

    #[test]
    fn fit_status_strings_are_verbatim() {
        assert_eq!(FitStatus::BothGood.to_string(), "Both good");
        assert_eq!(
            FitStatus::Disagreement { delta: -250.0 }.to_string(),
            "Check(Delta=-250)"
        );
        assert_eq!(FitStatus::OnlyPolyfit.to_string(), "Only polyfit");
        assert_eq!(FitStatus::OnlyPulsefit.to_string(), "Only pulsefit");
        assert_eq!(FitStatus::BothFailed.to_string(), "Both failed");
    }
}
