//! Manual Vbd corrections for channels whose fitted breakdown is known to be
//! off (reviewed against single-photon gain data). The correction is added to
//! the fitted Vbd in volts before operating points are solved.

use serde::{Deserialize, Serialize};

/// One reviewed correction: endpoint + configuration channel to extra volts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VbdOverride {
    pub endpoint: String,
    pub channel: u8,
    /// Volts added to the fitted Vbd.
    pub extra_volts: f64,
}

/// The corrections from the 2024 fit review campaign.
pub fn review_overrides_2024() -> Vec<VbdOverride> {
    let entry = |endpoint: &str, channel: u8, extra_volts: f64| VbdOverride {
        endpoint: endpoint.to_owned(),
        channel,
        extra_volts,
    };
    vec![
        entry("10.73.137.107", 8, 2.0),
        entry("10.73.137.104", 33, 2.0),
        entry("10.73.137.112", 18, 0.6),
        entry("10.73.137.112", 27, 0.86),
    ]
}

/// Correction for one channel, or `None` when no review entry exists.
pub fn lookup(overrides: &[VbdOverride], endpoint: &str, channel: u8) -> Option<f64> {
    overrides
        .iter()
        .find(|o| o.endpoint == endpoint && o.channel == channel)
        .map(|o| o.extra_volts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_table_lookup() {
        let table = review_overrides_2024();
        assert_eq!(lookup(&table, "10.73.137.112", 27), Some(0.86));
        assert_eq!(lookup(&table, "10.73.137.112", 28), None);
        assert_eq!(lookup(&table, "10.73.137.104", 33), Some(2.0));
    }
}
