//! Versioned detector channel maps.
//!
//! A map lists, per endpoint, which configuration channels carry FBK sensors
//! and which carry HPK sensors. The cabling changed over time, so maps are
//! versioned by the date they became effective and a run date selects the
//! right one. Maps can also be loaded from JSON for ad-hoc setups.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{ChannelIdentity, SipmKind};
use crate::error::{CalibError, Result};

/// Sensor population of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMap {
    pub apa: u8,
    /// Configuration channels carrying FBK sensors, in readout order.
    #[serde(default)]
    pub fbk: Vec<u8>,
    /// Configuration channels carrying HPK sensors, in readout order.
    #[serde(default)]
    pub hpk: Vec<u8>,
}

impl EndpointMap {
    /// All channels of this endpoint as identities, FBK first then HPK,
    /// preserving the listed order within each family.
    pub fn identities(&self, endpoint: &str) -> Vec<ChannelIdentity> {
        let mut out = Vec::with_capacity(self.fbk.len() + self.hpk.len());
        for &ch in &self.fbk {
            out.push(ChannelIdentity {
                endpoint: endpoint.to_owned(),
                apa: self.apa,
                channel: ch,
                sipm: SipmKind::Fbk,
            });
        }
        for &ch in &self.hpk {
            out.push(ChannelIdentity {
                endpoint: endpoint.to_owned(),
                apa: self.apa,
                channel: ch,
                sipm: SipmKind::Hpk,
            });
        }
        out
    }

    /// Sensor family of a configuration channel, if the channel is mapped.
    pub fn sipm_of(&self, channel: u8) -> Option<SipmKind> {
        if self.fbk.contains(&channel) {
            Some(SipmKind::Fbk)
        } else if self.hpk.contains(&channel) {
            Some(SipmKind::Hpk)
        } else {
            None
        }
    }
}

/// One dated revision of the full detector map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapVersion {
    pub name: String,
    /// First run date this revision applies to; `None` means "since forever".
    pub effective_from: Option<NaiveDate>,
    /// Endpoint IP (full dotted form) to its sensor population.
    pub endpoints: Vec<(String, EndpointMap)>,
}

impl MapVersion {
    pub fn endpoint(&self, ip: &str) -> Option<&EndpointMap> {
        self.endpoints.iter().find(|(e, _)| e == ip).map(|(_, m)| m)
    }
}

/// The known map revisions, newest last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapSet {
    pub versions: Vec<MapVersion>,
}

impl ChannelMapSet {
    /// The revision in force on `date`: the newest version whose
    /// `effective_from` is on or before `date`.
    pub fn select(&self, date: NaiveDate) -> Result<&MapVersion> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.effective_from.map(|d| d <= date).unwrap_or(true))
            .ok_or_else(|| {
                CalibError::ChannelMap(format!("no map revision in force on {date}"))
            })
    }

    /// Parse a map set from its JSON serialization.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let set: ChannelMapSet = serde_json::from_str(json)?;
        if set.versions.is_empty() {
            return Err(CalibError::ChannelMap("map set has no versions".into()));
        }
        Ok(set)
    }

    /// The built-in revisions: the original installation map and the
    /// recabling that took effect on 2024-09-24.
    pub fn builtin() -> Self {
        let ep = |ip: &str, apa: u8, fbk: &[u8], hpk: &[u8]| {
            (
                ip.to_owned(),
                EndpointMap {
                    apa,
                    fbk: fbk.to_vec(),
                    hpk: hpk.to_vec(),
                },
            )
        };

        let original = MapVersion {
            name: "original".into(),
            effective_from: None,
            endpoints: vec![
                ep(
                    "10.73.137.104",
                    1,
                    &[0, 1, 2, 3, 4, 5, 6, 7],
                    &[8, 9, 10, 11, 12, 13, 14, 15],
                ),
                ep(
                    "10.73.137.105",
                    1,
                    &[0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 13, 15],
                    &[17, 19, 20, 22],
                ),
                ep("10.73.137.107", 1, &[0, 2, 5, 7], &[8, 10, 13, 15]),
                ep(
                    "10.73.137.109",
                    2,
                    &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
                    &[
                        16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
                        33, 34, 35, 36, 37, 38, 39,
                    ],
                ),
                ep(
                    "10.73.137.111",
                    3,
                    &[
                        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18,
                        19, 20, 21, 22, 23,
                    ],
                    &[24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39],
                ),
                ep(
                    "10.73.137.112",
                    4,
                    &[],
                    &[
                        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18,
                        19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 34, 37, 39,
                    ],
                ),
                ep("10.73.137.113", 4, &[0, 2, 5, 7], &[]),
            ],
        };

        // 105, 107 and 113 moved onto 104 during the 2024-09 recabling.
        let recabled = MapVersion {
            name: "map_mod_20240924".into(),
            effective_from: NaiveDate::from_ymd_opt(2024, 9, 24),
            endpoints: vec![
                ep(
                    "10.73.137.104",
                    1,
                    &[
                        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18,
                        19, 20, 21, 22, 23,
                    ],
                    &[24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39],
                ),
                ep(
                    "10.73.137.109",
                    2,
                    &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
                    &[
                        16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
                        33, 34, 35, 36, 37, 38, 39,
                    ],
                ),
                ep(
                    "10.73.137.111",
                    3,
                    &[
                        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18,
                        19, 20, 21, 22, 23,
                    ],
                    &[24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39],
                ),
                ep(
                    "10.73.137.112",
                    4,
                    &[],
                    &[
                        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18,
                        19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 34, 37, 39,
                    ],
                ),
                ep("10.73.137.113", 4, &[0, 2, 5, 7], &[]),
            ],
        };

        Self {
            versions: vec![original, recabled],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_selects_revision() {
        let set = ChannelMapSet::builtin();

        let before = set
            .select(NaiveDate::from_ymd_opt(2024, 9, 23).unwrap())
            .unwrap();
        assert_eq!(before.name, "original");
        assert_eq!(before.endpoint("10.73.137.104").unwrap().fbk.len(), 8);

        let after = set
            .select(NaiveDate::from_ymd_opt(2024, 9, 24).unwrap())
            .unwrap();
        assert_eq!(after.name, "map_mod_20240924");
        assert_eq!(after.endpoint("10.73.137.104").unwrap().fbk.len(), 24);
        // 105 dropped out of the recabled revision entirely.
        assert!(after.endpoint("10.73.137.105").is_none());
    }

    #[test]
    fn identities_carry_family_and_apa() {
        let set = ChannelMapSet::builtin();
        let map = set
            .select(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .unwrap();
        let ep = map.endpoint("10.73.137.107").unwrap();
        let ids = ep.identities("10.73.137.107");
        assert_eq!(ids.len(), 8);
        assert!(ids[..4].iter().all(|i| i.sipm == SipmKind::Fbk));
        assert!(ids[4..].iter().all(|i| i.sipm == SipmKind::Hpk));
        assert!(ids.iter().all(|i| i.apa == 1));
        assert_eq!(ep.sipm_of(13), Some(SipmKind::Hpk));
        assert_eq!(ep.sipm_of(1), None);
    }

    #[test]
    fn json_round_trip() {
        let set = ChannelMapSet::builtin();
        let json = serde_json::to_string(&set).unwrap();
        let back = ChannelMapSet::from_json_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn empty_set_rejected() {
        assert!(ChannelMapSet::from_json_str(r#"{"versions":[]}"#).is_err());
    }

    #[test]
    fn malformed_json_reports_a_json_error() {
        let err = ChannelMapSet::from_json_str("{not json").unwrap_err();
        assert!(err.to_string().starts_with("JSON error:"), "{err}");
    }
}
