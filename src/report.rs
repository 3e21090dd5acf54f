//! Report rows and operating-point artifacts.
//!
//! Two consumer-facing formats:
//!
//! - a tab-separated per-channel fit report, one row per analyzed channel
//! - a per-endpoint JSON file with the solved operating DACs, consumed by the
//!   slow-control configuration writer
//!
//! Column names and order are part of the interface with downstream tooling
//! and must stay stable. Missing numeric values are written as `nan` in the
//! text report and as `null` in JSON.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One line of the per-channel fit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRow {
    pub ip: String,
    pub apa: u8,
    pub afe: u8,
    pub config_ch: u8,
    pub daq_ch: u8,
    pub sipm_type: String,
    pub bias_data_quality: String,
    pub bias_min_i: Option<f64>,
    pub bias_max_i: Option<f64>,
    pub vbd_bias_dac: Option<u32>,
    pub vbd_bias_volts: Option<f64>,
    pub vbd_bias_volts_error: Option<f64>,
    pub bias_conversion_slope: Option<f64>,
    pub bias_conversion_intercept: Option<f64>,
    pub trim_data_quality: String,
    pub trim_min_i: Option<f64>,
    pub trim_max_i: Option<f64>,
    pub fit_status: String,
    pub poly_vbd_trim_dac: Option<f64>,
    pub poly_vbd_trim_dac_error: Option<f64>,
    pub pulse_vbd_trim_dac: Option<f64>,
    pub pulse_vbd_trim_dac_error: Option<f64>,
    pub vbd_volts: Option<f64>,
    pub vbd_volts_error: Option<f64>,
}

/// Header line of the tab-separated report, without trailing newline.
pub fn report_header() -> String {
    [
        "IP",
        "APA",
        "AFE",
        "Config_CH",
        "DAQ_CH",
        "SIPM_type",
        "Bias_data_quality",
        "Bias_min_I",
        "Bias_max_I",
        "Vbd_bias(DAC)",
        "Vbd_bias(V)",
        "Vbd_bias_error(V)",
        "Bias_conversion_slope",
        "Bias_conversion_intercept",
        "Trim_data_quality",
        "Trim_min_I",
        "Trim_max_I",
        "Fit_status",
        "Poly_Vbd_trim(DAC)",
        "Poly_Vbd_trim_error(DAC)",
        "Pulse_Vbd_trim(DAC)",
        "Pulse_Vbd_trim_error(DAC)",
        "Vbd(V)",
        "Vbd_error(V)",
    ]
    .join("\t")
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{x:.decimals$}"),
        _ => "nan".into(),
    }
}

impl ChannelRow {
    /// Format the row tab-separated, in header order.
    pub fn to_tsv(&self) -> String {
        let vbd_bias_dac = match self.vbd_bias_dac {
            Some(d) => d.to_string(),
            None => "nan".into(),
        };
        [
            self.ip.clone(),
            self.apa.to_string(),
            self.afe.to_string(),
            self.config_ch.to_string(),
            self.daq_ch.to_string(),
            self.sipm_type.clone(),
            self.bias_data_quality.clone(),
            fmt_opt(self.bias_min_i, 3),
            fmt_opt(self.bias_max_i, 3),
            vbd_bias_dac,
            fmt_opt(self.vbd_bias_volts, 3),
            fmt_opt(self.vbd_bias_volts_error, 3),
            fmt_opt(self.bias_conversion_slope, 5),
            fmt_opt(self.bias_conversion_intercept, 3),
            self.trim_data_quality.clone(),
            fmt_opt(self.trim_min_i, 3),
            fmt_opt(self.trim_max_i, 3),
            self.fit_status.clone(),
            fmt_opt(self.poly_vbd_trim_dac, 0),
            fmt_opt(self.poly_vbd_trim_dac_error, 0),
            fmt_opt(self.pulse_vbd_trim_dac, 0),
            fmt_opt(self.pulse_vbd_trim_dac_error, 0),
            fmt_opt(self.vbd_volts, 3),
            fmt_opt(self.vbd_volts_error, 3),
        ]
        .join("\t")
    }
}

/// Solved operating settings for one endpoint, written as JSON for the
/// configuration writer. Field names match what that tool already reads.
///
/// Channel lists and op arrays are aligned: `fbk[i]` is driven by the bias in
/// `fbk_op_bias[afe-of(fbk[i])]` and the trim in `fbk_op_trim[i]`. A `null`
/// op value means the channel (or its whole AFE) could not be solved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointOperatingFile {
    pub ip: String,
    pub apa: u8,
    pub run: String,
    /// Target overvoltage the FBK settings were solved for, volts.
    pub fbk_ov: f64,
    pub fbk: Vec<u8>,
    pub fbk_op_bias: Vec<Option<u32>>,
    pub fbk_op_trim: Vec<Option<u32>>,
    /// Target overvoltage the HPK settings were solved for, volts.
    pub hpk_ov: f64,
    pub hpk: Vec<u8>,
    pub hpk_op_bias: Vec<Option<u32>>,
    pub hpk_op_trim: Vec<Option<u32>>,
}

impl EndpointOperatingFile {
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
