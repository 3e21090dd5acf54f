//! Per-channel analysis pipeline and per-AFE solving.
//!
//! `run` takes one channel input per mapped channel and produces:
//!
//! - one `ChannelAnalysis` per input, in input order (gate, filter, both
//!   estimators, reconciliation, DAC→volt conversion)
//! - one solved `OperatingSpec` per (endpoint, AFE) group
//!
//! Channels are analyzed in parallel; each channel's analysis is independent
//! and a failed channel never aborts its siblings. The solver then runs per
//! AFE because the bias line is shared across the group.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::overrides::{self, VbdOverride};
use crate::convert::{fit_conversion, trim_dac_to_volts};
use crate::domain::{
    ChannelIdentity, ConversionCoefficients, DataQuality, FitStatus, ScanKind, SipmKind,
    SweepSample, VbdResult,
};
use crate::fit::{self, quality, trim_derivative};
use crate::report::{ChannelRow, EndpointOperatingFile};
use crate::solve::{self, AfeChannel, SolveOutcome};

/// Run-level knobs. Defaults match standard production analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Target overvoltage for FBK channels, volts.
    pub fbk_overvoltage: f64,
    /// Target overvoltage for HPK channels, volts.
    pub hpk_overvoltage: f64,
    /// Apply the reviewed per-channel Vbd corrections.
    pub apply_overrides: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fbk_overvoltage: SipmKind::Fbk.default_overvoltage(),
            hpk_overvoltage: SipmKind::Hpk.default_overvoltage(),
            apply_overrides: false,
        }
    }
}

impl PipelineOptions {
    fn overvoltage(&self, sipm: SipmKind) -> f64 {
        match sipm {
            SipmKind::Fbk => self.fbk_overvoltage,
            SipmKind::Hpk => self.hpk_overvoltage,
        }
    }
}

/// Everything the pipeline needs about one channel. A missing sweep is
/// treated exactly like an empty one by the quality gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInput {
    pub identity: ChannelIdentity,
    pub bias: Option<SweepSample>,
    pub trim: Option<SweepSample>,
}

/// Full analysis record of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAnalysis {
    pub identity: ChannelIdentity,
    pub bias_quality: DataQuality,
    pub trim_quality: DataQuality,
    /// Finite (min, max) of the raw bias current, when any sample is finite.
    pub bias_current_extrema: Option<(f64, f64)>,
    pub trim_current_extrema: Option<(f64, f64)>,
    pub conversion: Option<ConversionCoefficients>,
    /// Rendered conversion-fit failure, if the bias line could not be fit.
    pub conversion_error: Option<String>,
    /// Breakdown voltage at the top of the bias sweep, volts.
    pub vbd_bias_volts: Option<f64>,
    pub vbd_bias_volts_error: Option<f64>,
    pub vbd: VbdResult,
}

/// Analyze one channel: gate both sweeps, fit the bias conversion, run both
/// trim estimators and reconcile, then convert the result to volts.
///
/// `override_table` entries add volts to the fitted Vbd of matching channels;
/// pass an empty slice to disable corrections.
pub fn analyze_channel(input: &ChannelInput, override_table: &[VbdOverride]) -> ChannelAnalysis {
    let bias_current: &[f64] = input.bias.as_ref().map(|s| s.current.as_slice()).unwrap_or(&[]);
    let trim_current: &[f64] = input.trim.as_ref().map(|s| s.current.as_slice()).unwrap_or(&[]);

    let bias_quality = quality::assess(ScanKind::Bias, bias_current);
    let trim_quality = quality::assess(ScanKind::Trim, trim_current);

    let mut analysis = ChannelAnalysis {
        identity: input.identity.clone(),
        bias_quality,
        trim_quality,
        bias_current_extrema: finite_extrema(bias_current),
        trim_current_extrema: finite_extrema(trim_current),
        conversion: None,
        conversion_error: None,
        vbd_bias_volts: None,
        vbd_bias_volts_error: None,
        vbd: VbdResult::null(FitStatus::BothFailed),
    };

    if !bias_quality.is_usable() {
        debug!(
            endpoint = %input.identity.endpoint,
            channel = input.identity.channel,
            bias = %bias_quality,
            "bias sweep rejected by quality gate"
        );
        return analysis;
    }
    // Usable implies present.
    let bias = match &input.bias {
        Some(b) => b,
        None => return analysis,
    };

    let conversion = match fit_conversion(bias) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                endpoint = %input.identity.endpoint,
                channel = input.identity.channel,
                error = %e,
                "bias conversion fit failed"
            );
            analysis.conversion_error = Some(e.to_string());
            return analysis;
        }
    };
    analysis.conversion = Some(conversion);

    // Breakdown sits at the top of the bias sweep by construction: the bias
    // scan stops right at avalanche turn-on and the trim scan refines from
    // there.
    let vbd_bias_dac = bias.codes[bias.len() - 1] as u32;
    let vbd_bias_volts = conversion.bias_dac_to_volts(vbd_bias_dac as f64);
    let vbd_bias_volts_error = conversion.bias_volts_error(vbd_bias_volts);
    analysis.vbd_bias_volts = Some(vbd_bias_volts);
    analysis.vbd_bias_volts_error = Some(vbd_bias_volts_error);
    // A usable bias sweep alone pins the bias-side breakdown; it stays on the
    // row and feeds the AFE conversion mean even when the trim fit below
    // never runs.
    analysis.vbd.vbd_bias_dac = Some(vbd_bias_dac);

    if !trim_quality.is_usable() {
        debug!(
            endpoint = %input.identity.endpoint,
            channel = input.identity.channel,
            trim = %trim_quality,
            "trim sweep rejected by quality gate"
        );
        return analysis;
    }
    let trim = match &input.trim {
        Some(t) => t,
        None => return analysis,
    };

    let filtered = trim_derivative(trim);
    let poly = fit::poly::estimate(&filtered.codes, &filtered.derivative);
    let pulse = fit::pulse::estimate(&filtered.codes, &filtered.derivative);
    let reconciled = fit::reconcile(poly.as_ref(), pulse.as_ref());

    let mut vbd = VbdResult::null(reconciled.status);
    vbd.vbd_bias_dac = Some(vbd_bias_dac);
    vbd.polynomial = poly;
    vbd.pulse = pulse;

    if let (Some(trim_dac), Some(trim_err)) = (reconciled.vbd_trim_dac, reconciled.error_dac) {
        let mut vbd_volts = conversion.full_to_volts(vbd_bias_dac as f64, trim_dac);
        let vbd_volts_error =
            (trim_dac_to_volts(trim_err).powi(2) + vbd_bias_volts_error.powi(2)).sqrt();

        if let Some(extra) =
            overrides::lookup(override_table, &input.identity.endpoint, input.identity.channel)
        {
            info!(
                endpoint = %input.identity.endpoint,
                channel = input.identity.channel,
                extra,
                "applying reviewed Vbd correction"
            );
            vbd_volts += extra;
        }

        vbd.vbd_trim_dac = Some(trim_dac);
        vbd.vbd_trim_dac_error = Some(trim_err);
        vbd.vbd_volts = Some(vbd_volts);
        vbd.vbd_volts_error = Some(vbd_volts_error);
    }
    analysis.vbd = vbd;
    analysis
}

/// Solved settings for one (endpoint, AFE) group.
#[derive(Debug)]
pub struct AfeOutcome {
    pub endpoint: String,
    pub outcome: SolveOutcome,
}

/// Full run output: per-channel analyses in input order plus one solved
/// outcome per (endpoint, AFE), in first-seen order.
#[derive(Debug)]
pub struct RunOutput {
    pub channels: Vec<ChannelAnalysis>,
    pub afes: Vec<AfeOutcome>,
}

/// Analyze every channel and solve every AFE.
pub fn run(inputs: &[ChannelInput], options: &PipelineOptions) -> RunOutput {
    let override_table = if options.apply_overrides {
        overrides::review_overrides_2024()
    } else {
        Vec::new()
    };

    let channels: Vec<ChannelAnalysis> = inputs
        .par_iter()
        .map(|input| analyze_channel(input, &override_table))
        .collect();

    // Group by (endpoint, AFE) preserving first-seen order; the solver input
    // stays aligned with the map order of the channels.
    let mut groups: Vec<(String, u8, Vec<&ChannelAnalysis>)> = Vec::new();
    for analysis in &channels {
        let endpoint = analysis.identity.endpoint.clone();
        let afe = analysis.identity.afe();
        match groups
            .iter_mut()
            .find(|(e, a, _)| *e == endpoint && *a == afe)
        {
            Some((_, _, members)) => members.push(analysis),
            None => groups.push((endpoint, afe, vec![analysis])),
        }
    }

    let mut afes = Vec::with_capacity(groups.len());
    for (endpoint, afe, members) in groups {
        let sipm = members[0].identity.sipm;
        if members.iter().any(|m| m.identity.sipm != sipm) {
            warn!(%endpoint, afe, "mixed sensor families on one AFE");
        }
        let sorted = members
            .windows(2)
            .all(|w| w[0].identity.channel <= w[1].identity.channel);
        if !sorted {
            warn!(%endpoint, afe, "channels not in ascending map order");
        }

        let solver_input: Vec<AfeChannel> = members
            .iter()
            .map(|m| AfeChannel {
                channel: m.identity.channel,
                conversion: m.conversion,
                vbd_bias_dac: m.vbd.vbd_bias_dac,
                vbd_volts: m.vbd.vbd_volts,
            })
            .collect();

        let outcome = solve::solve_afe(afe, sipm, options.overvoltage(sipm), &solver_input);
        afes.push(AfeOutcome { endpoint, outcome });
    }

    RunOutput { channels, afes }
}

impl ChannelAnalysis {
    /// Flatten this analysis into one tab-separated report row.
    pub fn report_row(&self) -> ChannelRow {
        let (poly_dac, poly_err) = estimate_pair(self.vbd.polynomial.as_ref());
        let (pulse_dac, pulse_err) = estimate_pair(self.vbd.pulse.as_ref());
        ChannelRow {
            ip: self.identity.endpoint.clone(),
            apa: self.identity.apa,
            afe: self.identity.afe(),
            config_ch: self.identity.channel,
            daq_ch: self.identity.daq_channel(),
            sipm_type: self.identity.sipm.label().to_owned(),
            bias_data_quality: self.bias_quality.to_string(),
            bias_min_i: self.bias_current_extrema.map(|(min, _)| min),
            bias_max_i: self.bias_current_extrema.map(|(_, max)| max),
            vbd_bias_dac: self.vbd.vbd_bias_dac,
            vbd_bias_volts: self.vbd_bias_volts,
            vbd_bias_volts_error: self.vbd_bias_volts_error,
            bias_conversion_slope: self.conversion.map(|c| c.slope),
            bias_conversion_intercept: self.conversion.map(|c| c.intercept),
            trim_data_quality: self.trim_quality.to_string(),
            trim_min_i: self.trim_current_extrema.map(|(min, _)| min),
            trim_max_i: self.trim_current_extrema.map(|(_, max)| max),
            fit_status: self.vbd.status.to_string(),
            poly_vbd_trim_dac: poly_dac,
            poly_vbd_trim_dac_error: poly_err,
            pulse_vbd_trim_dac: pulse_dac,
            pulse_vbd_trim_dac_error: pulse_err,
            vbd_volts: self.vbd.vbd_volts,
            vbd_volts_error: self.vbd.vbd_volts_error,
        }
    }
}

fn estimate_pair(
    estimate: Option<&crate::domain::FitEstimate>,
) -> (Option<f64>, Option<f64>) {
    match estimate {
        Some(e) => (Some(e.vbd_trim_dac), Some(e.error_dac)),
        None => (None, None),
    }
}

/// Assemble one endpoint's operating-point artifact from a finished run.
///
/// Bias arrays carry one entry per AFE (first-seen order); trim arrays carry
/// one entry per channel, aligned with the `fbk`/`hpk` channel lists.
pub fn operating_file(output: &RunOutput, endpoint: &str, run_label: &str) -> EndpointOperatingFile {
    let mut file = EndpointOperatingFile {
        ip: endpoint.to_owned(),
        apa: output
            .channels
            .iter()
            .find(|c| c.identity.endpoint == endpoint)
            .map(|c| c.identity.apa)
            .unwrap_or(0),
        run: run_label.to_owned(),
        fbk_ov: SipmKind::Fbk.default_overvoltage(),
        fbk: Vec::new(),
        fbk_op_bias: Vec::new(),
        fbk_op_trim: Vec::new(),
        hpk_ov: SipmKind::Hpk.default_overvoltage(),
        hpk: Vec::new(),
        hpk_op_bias: Vec::new(),
        hpk_op_trim: Vec::new(),
    };

    for afe in output.afes.iter().filter(|a| a.endpoint == endpoint) {
        let spec = &afe.outcome.spec;
        let (ov, bias_list, ch_list, trim_list) = match spec.sipm {
            SipmKind::Fbk => (
                &mut file.fbk_ov,
                &mut file.fbk_op_bias,
                &mut file.fbk,
                &mut file.fbk_op_trim,
            ),
            SipmKind::Hpk => (
                &mut file.hpk_ov,
                &mut file.hpk_op_bias,
                &mut file.hpk,
                &mut file.hpk_op_trim,
            ),
        };
        *ov = spec.overvoltage;
        bias_list.push(spec.bias_dac);
        ch_list.extend_from_slice(&spec.channels);
        trim_list.extend_from_slice(&spec.trim_dac);
    }

    file
}

fn finite_extrema(values: &[f64]) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_finite() {
            min = min.min(v);
            max = max.max(v);
        }
    }
    if min.is_finite() { Some((min, max)) } else { None }
}
