// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Participant profiling: where a visitor comes from and how they move.

use crate::distribution::Distribution;
use crate::model::{QuantityRecord, Quality, ScaleInstanceId};
use crate::taxonomy::Taxonomy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Geographic origin of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    International,
    National,
    Local,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::International => "international",
            Origin::National => "national",
            Origin::Local => "local",
        })
    }
}

/// Survey codes used to classify origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRules {
    /// Country of the host city.
    pub home_country: String,
    /// Province counted as local.
    pub local_province: String,
    /// Residence answer meaning "abroad".
    pub foreign_marker: String,
}

impl Default for OriginRules {
    fn default() -> Self {
        Self {
            home_country: "España".to_string(),
            local_province: "Valencia/València".to_string(),
            foreign_marker: "Extranjero".to_string(),
        }
    }
}

impl OriginRules {
    /// Classify from the residence answer, plus country and province when
    /// given. `None` when the answers don't determine an origin.
    pub fn classify(
        &self,
        residence: &str,
        country: Option<&str>,
        province: Option<&str>,
    ) -> Option<Origin> {
        let abroad = same(residence, &self.foreign_marker)
            || country.is_some_and(|c| !c.trim().is_empty() && !same(c, &self.home_country));
        if abroad {
            return Some(Origin::International);
        }
        if !same(residence, &self.home_country) {
            return None;
        }
        if province.is_some_and(|p| same(p, &self.local_province)) {
            Some(Origin::Local)
        } else {
            Some(Origin::National)
        }
    }
}

fn same(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Mobility profile from a participant's dominant transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobilityProfile {
    EcoConscious,
    YoungProfessional,
    Standard,
    NoTransportReported,
}

impl MobilityProfile {
    /// Classify a transport distribution over `walk_bike`,
    /// `public_transport` and `car`.
    ///
    /// Ties go to the more sustainable mode: walking or cycling first, then
    /// public transport.
    pub fn from_distribution(distribution: &Distribution) -> Self {
        let walk_bike = distribution.weight("walk_bike");
        let public = distribution.weight("public_transport");
        let car = distribution.weight("car");

        let max = walk_bike.max(public).max(car);
        if max <= 0.0 {
            MobilityProfile::NoTransportReported
        } else if walk_bike == max {
            MobilityProfile::EcoConscious
        } else if public == max {
            MobilityProfile::YoungProfessional
        } else {
            MobilityProfile::Standard
        }
    }
}

impl fmt::Display for MobilityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MobilityProfile::EcoConscious => "eco_conscious",
            MobilityProfile::YoungProfessional => "young_professional",
            MobilityProfile::Standard => "standard",
            MobilityProfile::NoTransportReported => "no_transport_reported",
        })
    }
}

/// Mobility profile per instance from normalized transport records.
///
/// Only records routed through the
/// [`Taxonomy::transport_modes`](crate::taxonomy::Taxonomy::transport_modes)
/// preset count; `missing` ones are ignored.
pub fn mobility_profiles<'a, I>(records: I) -> BTreeMap<ScaleInstanceId, MobilityProfile>
where
    I: IntoIterator<Item = &'a QuantityRecord>,
{
    let mut per_instance: BTreeMap<ScaleInstanceId, Distribution> = BTreeMap::new();
    for record in records {
        if record.taxonomy != Taxonomy::TRANSPORT {
            continue;
        }
        let dist = per_instance
            .entry(record.instance.clone())
            .or_insert_with(|| {
                Distribution::from_weights(&[
                    ("public_transport", 0.0),
                    ("car", 0.0),
                    ("walk_bike", 0.0),
                ])
            });
        if record.quality != Quality::Missing && record.value > 0.0 {
            dist.add(&record.category, record.value, record.quality == Quality::Imputed);
        }
    }
    per_instance
        .into_iter()
        .map(|(id, dist)| (id, MobilityProfile::from_distribution(&dist)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Flow;

    #[test]
    fn test_origin_classification() {
        let rules = OriginRules::default();
        assert_eq!(
            rules.classify("Extranjero", None, None),
            Some(Origin::International)
        );
        assert_eq!(
            rules.classify("España", Some("Francia"), None),
            Some(Origin::International)
        );
        assert_eq!(
            rules.classify("España", Some("España"), Some("Valencia/València")),
            Some(Origin::Local)
        );
        assert_eq!(
            rules.classify("españa ", None, Some("Madrid")),
            Some(Origin::National)
        );
        assert_eq!(rules.classify("", None, None), None);
    }

    #[test]
    fn test_mobility_tie_prefers_sustainable() {
        let tie = Distribution::from_weights(&[
            ("walk_bike", 2.0),
            ("public_transport", 2.0),
            ("car", 2.0),
        ]);
        assert_eq!(
            MobilityProfile::from_distribution(&tie),
            MobilityProfile::EcoConscious
        );

        let public_car = Distribution::from_weights(&[
            ("walk_bike", 0.0),
            ("public_transport", 3.0),
            ("car", 3.0),
        ]);
        assert_eq!(
            MobilityProfile::from_distribution(&public_car),
            MobilityProfile::YoungProfessional
        );
    }

    #[test]
    fn test_mobility_profiles_per_instance() {
        let record = |id: &str, instance: &str, category: &str, value: f64| QuantityRecord {
            id: id.to_string(),
            instance: ScaleInstanceId::new(instance),
            flow: Flow::Material,
            taxonomy: Taxonomy::TRANSPORT.to_string(),
            category: category.to_string(),
            value,
            si_unit: "count".to_string(),
            timestamp_ms: 0,
            quality: Quality::Ok,
        };
        let records = vec![
            record("t1", "p1", "car", 4.0),
            record("t2", "p1", "walk_bike", 1.0),
            record("t3", "p2", "public_transport", 2.0),
            record("t4", "p3", "car", 0.0),
        ];
        let mut food = record("f1", "p2", "car", 50.0);
        food.taxonomy = "food".to_string();
        let records: Vec<QuantityRecord> = records.into_iter().chain([food]).collect();
        let profiles = mobility_profiles(&records);
        assert_eq!(profiles[&ScaleInstanceId::new("p1")], MobilityProfile::Standard);
        assert_eq!(
            profiles[&ScaleInstanceId::new("p2")],
            MobilityProfile::YoungProfessional
        );
        assert_eq!(
            profiles[&ScaleInstanceId::new("p3")],
            MobilityProfile::NoTransportReported
        );
        assert_eq!(MobilityProfile::Standard.to_string(), "standard");
    }
}
