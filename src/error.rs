//! Error types for the calibration core.
//!
//! The taxonomy is deliberately narrow:
//!
//! - data-quality verdicts are *statuses*, not errors (a `BAD` gate verdict
//!   short-circuits one channel but the run continues)
//! - fit-convergence failures are *absences* (`Option<FitEstimate>`), so the
//!   reconciler always has a defined decision to make
//! - only conversion-bounds violations and malformed inputs/configuration are
//!   actual `Err` values, because acting on them would mis-bias hardware

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CalibError>;

#[derive(Debug, Error)]
pub enum CalibError {
    /// Malformed sweep input (empty arrays, mismatched lengths, or a
    /// non-monotonic independent variable).
    #[error("invalid sweep input: {0}")]
    InvalidSweep(String),

    /// A requested operating voltage maps to a trim DAC outside the physical
    /// code range. Clamping is forbidden: it would silently mis-bias hardware.
    #[error(
        "trim DAC {trim_dac} out of range [0, {max_dac}] for requested {requested_volts:.3} V"
    )]
    TrimDacOutOfRange {
        trim_dac: i64,
        max_dac: u32,
        requested_volts: f64,
    },

    /// The computed DAC pair does not reproduce the requested voltage within
    /// the round-trip tolerance.
    #[error(
        "DAC round-trip failed: requested {requested_volts:.3} V, applied {applied_volts:.3} V \
         (tolerance {tolerance:.3} V)"
    )]
    RoundTripFailed {
        requested_volts: f64,
        applied_volts: f64,
        tolerance: f64,
    },

    /// Conversion requested before a usable bias-sweep linear fit exists, or
    /// the fit itself is degenerate (e.g. zero slope).
    #[error("unusable DAC/volt conversion: {0}")]
    DegenerateConversion(String),

    /// Channel-map configuration problems (unknown endpoint, unparsable JSON,
    /// no map version effective for the run date).
    #[error("channel map error: {0}")]
    ChannelMap(String),

    /// JSON (de)serialization failures: channel-map parsing and
    /// operating-file rendering both funnel through here.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
