// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Core data model: flows, scales, quality flags, windows and records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of resource exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    Material,
    Energy,
    Information,
}

impl Flow {
    /// All flows, in reporting order.
    pub const ALL: [Flow; 3] = [Flow::Material, Flow::Energy, Flow::Information];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Material => "material",
            Flow::Energy => "energy",
            Flow::Information => "information",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of aggregation in the containment hierarchy.
///
/// participant ⊂ event ⊂ congress on the event side, building ⊂ city on the
/// geographic side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Participant,
    Event,
    Congress,
    Building,
    City,
}

impl Scale {
    /// Height in the hierarchy; leaves are 0. Cells are scheduled by
    /// ascending level.
    pub fn level(&self) -> u8 {
        match self {
            Scale::Participant | Scale::Building => 0,
            Scale::Event | Scale::City => 1,
            Scale::Congress => 2,
        }
    }

    /// The only scale allowed as a direct container.
    pub fn parent_scale(&self) -> Option<Scale> {
        match self {
            Scale::Participant => Some(Scale::Event),
            Scale::Event => Some(Scale::Congress),
            Scale::Building => Some(Scale::City),
            Scale::Congress | Scale::City => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Participant => "participant",
            Scale::Event => "event",
            Scale::Congress => "congress",
            Scale::Building => "building",
            Scale::City => "city",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality indicator carried alongside every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Ok,
    Imputed,
    Suspect,
    Missing,
}

impl Quality {
    /// Source-flagged values that must not be averaged or used as anchors.
    pub fn is_bad(&self) -> bool {
        matches!(self, Quality::Suspect | Quality::Missing)
    }

    /// Stable byte used in input fingerprints.
    pub(crate) fn fingerprint_byte(&self) -> u8 {
        match self {
            Quality::Ok => 0,
            Quality::Imputed => 1,
            Quality::Suspect => 2,
            Quality::Missing => 3,
        }
    }
}

/// Identifier of one instance of a scale (a participant, an event, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaleInstanceId(String);

impl ScaleInstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScaleInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScaleInstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Half-open time window `[start_ms, end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeWindow {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn contains(&self, timestamp_ms: u64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms < self.end_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    pub fn is_empty(&self) -> bool {
        self.end_ms <= self.start_ms
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_ms, self.end_ms)
    }
}

/// Where a curated row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Survey,
    Trip,
    Consumption,
    Sensor,
}

/// A curated survey/trip/consumption row as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityRow {
    pub id: String,
    pub source: SourceKind,
    pub instance: ScaleInstanceId,
    pub flow: Flow,
    /// Raw category label, resolved through the flow's taxonomies.
    pub category: String,
    pub value: f64,
    pub unit_code: String,
    pub timestamp_ms: u64,
    pub quality: Quality,
}

/// A raw sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp_ms: u64,
    pub value: f64,
    pub quality: Quality,
    /// Declared sampling interval, used as averaging weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_interval_ms: Option<u64>,
}

impl SensorReading {
    pub fn new(timestamp_ms: u64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
            quality: Quality::Ok,
            sampling_interval_ms: None,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        self.sampling_interval_ms = Some(interval_ms);
        self
    }
}

/// Static description of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub sensor_id: String,
    /// Instance the sensor is installed in (usually a building).
    pub instance: ScaleInstanceId,
    pub flow: Flow,
    /// Measurement type label, resolved through the flow's taxonomies.
    pub category: String,
    pub unit_code: String,
    /// Interval assumed for readings that don't declare their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_interval_ms: Option<u64>,
}

/// A normalized observation. Immutable once produced within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityRecord {
    pub id: String,
    pub instance: ScaleInstanceId,
    pub flow: Flow,
    /// Name of the taxonomy the record was resolved through.
    pub taxonomy: String,
    /// Declared taxonomy category.
    pub category: String,
    /// SI-equivalent value.
    pub value: f64,
    pub si_unit: String,
    pub timestamp_ms: u64,
    pub quality: Quality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_levels_follow_containment() {
        for scale in [
            Scale::Participant,
            Scale::Event,
            Scale::Congress,
            Scale::Building,
            Scale::City,
        ] {
            if let Some(parent) = scale.parent_scale() {
                assert!(parent.level() > scale.level());
            }
        }
    }

    #[test]
    fn test_window_half_open() {
        let window = TimeWindow::new(1000, 2000);
        assert!(window.contains(1000));
        assert!(window.contains(1999));
        assert!(!window.contains(2000));
        assert_eq!(window.duration_ms(), 1000);
        assert!(TimeWindow::new(5, 5).is_empty());
    }

    #[test]
    fn test_bad_quality() {
        assert!(!Quality::Ok.is_bad());
        assert!(!Quality::Imputed.is_bad());
        assert!(Quality::Suspect.is_bad());
        assert!(Quality::Missing.is_bad());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Flow::Energy).unwrap(), "\"energy\"");
        assert_eq!(
            serde_json::to_string(&Scale::Congress).unwrap(),
            "\"congress\""
        );
        let id: ScaleInstanceId = serde_json::from_str("\"p-1\"").unwrap();
        assert_eq!(id.as_str(), "p-1");
    }
}
