// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Content fingerprints of a cell's inputs.
//!
//! The fingerprint is a stable hash over the cell key, the declared
//! taxonomy, and the sorted contributing records. Two runs with identical
//! inputs produce identical fingerprints regardless of input order.

use crate::metric::CellKey;
use crate::model::{QuantityRecord, ScaleInstanceId};
use crate::taxonomy::Taxonomy;
use crate::units::{ExcludedRow, ExclusionReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// 64-bit input fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Accumulates length-prefixed sections, hashed once on `finish`.
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    data: Vec<u8>,
}

impl FingerprintBuilder {
    pub fn new(cell: &CellKey) -> Self {
        let mut builder = Self { data: Vec::new() };
        builder.tag(b'K');
        builder.text(cell.scale.as_str());
        builder.text(cell.instance.as_str());
        builder.text(cell.flow.as_str());
        builder.text(&cell.taxonomy);
        builder.data.extend_from_slice(&cell.window.start_ms.to_be_bytes());
        builder.data.extend_from_slice(&cell.window.end_ms.to_be_bytes());
        builder
    }

    /// Declared categories, in declaration order.
    pub fn taxonomy(mut self, taxonomy: &Taxonomy) -> Self {
        self.tag(b'T');
        self.text(&taxonomy.unit);
        self.data
            .extend_from_slice(&(taxonomy.len() as u32).to_be_bytes());
        for category in taxonomy.categories() {
            self.text(category);
        }
        self
    }

    /// Contributing records, sorted by id.
    pub fn records<'a, I>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = &'a QuantityRecord>,
    {
        let mut sorted: Vec<&QuantityRecord> = records.into_iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        self.tag(b'R');
        self.data
            .extend_from_slice(&(sorted.len() as u32).to_be_bytes());
        for record in sorted {
            self.text(&record.id);
            self.text(&record.category);
            self.data.extend_from_slice(&record.value.to_bits().to_be_bytes());
            self.data.push(record.quality.fingerprint_byte());
        }
        self
    }

    /// Excluded rows, sorted by id. Exclusions change metadata, so they are
    /// part of the input.
    pub fn excluded<'a, I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = &'a ExcludedRow>,
    {
        let mut sorted: Vec<&ExcludedRow> = rows.into_iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        self.tag(b'X');
        self.data
            .extend_from_slice(&(sorted.len() as u32).to_be_bytes());
        for row in sorted {
            self.text(&row.id);
            self.text(match &row.reason {
                ExclusionReason::SourceMissing => "source_missing",
                ExclusionReason::Error(err) => err.kind(),
            });
        }
        self
    }

    /// Fingerprints of aggregated children, sorted by child id.
    pub fn children(mut self, children: &[(ScaleInstanceId, Fingerprint)]) -> Self {
        let mut sorted: Vec<&(ScaleInstanceId, Fingerprint)> = children.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        self.tag(b'C');
        self.data
            .extend_from_slice(&(sorted.len() as u32).to_be_bytes());
        for (id, fingerprint) in sorted {
            self.text(id.as_str());
            self.data.extend_from_slice(&fingerprint.0.to_be_bytes());
        }
        self
    }

    /// Free-form discriminator (e.g. aggregation policy, gap count).
    pub fn note(mut self, label: &str) -> Self {
        self.tag(b'N');
        self.text(label);
        self
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(xxh64(&self.data, 0))
    }

    fn tag(&mut self, tag: u8) {
        self.data.push(tag);
    }

    fn text(&mut self, s: &str) {
        self.data.extend_from_slice(&(s.len() as u32).to_be_bytes());
        self.data.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Flow, Quality, Scale, TimeWindow};

    fn cell() -> CellKey {
        CellKey::new(
            Scale::Participant,
            ScaleInstanceId::new("p1"),
            Flow::Material,
            "transport",
            TimeWindow::new(0, 1000),
        )
    }

    fn record(id: &str, value: f64) -> QuantityRecord {
        QuantityRecord {
            id: id.to_string(),
            instance: ScaleInstanceId::new("p1"),
            flow: Flow::Material,
            taxonomy: "transport".to_string(),
            category: "car".to_string(),
            value,
            si_unit: "m".to_string(),
            timestamp_ms: 10,
            quality: Quality::Ok,
        }
    }

    fn fingerprint(records: &[QuantityRecord]) -> Fingerprint {
        FingerprintBuilder::new(&cell())
            .taxonomy(&Taxonomy::transport_modes(Flow::Material))
            .records(records)
            .finish()
    }

    #[test]
    fn test_order_independent() {
        let a = fingerprint(&[record("r1", 1.0), record("r2", 2.0)]);
        let b = fingerprint(&[record("r2", 2.0), record("r1", 1.0)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_value_change_detected() {
        let a = fingerprint(&[record("r1", 1.0), record("r2", 2.0)]);
        let b = fingerprint(&[record("r1", 1.0), record("r2", 2.5)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_quality_change_detected() {
        let mut imputed = record("r1", 1.0);
        imputed.quality = Quality::Imputed;
        assert_ne!(fingerprint(&[record("r1", 1.0)]), fingerprint(&[imputed]));
    }

    #[test]
    fn test_cell_key_separates() {
        let mut other = cell();
        other.window = TimeWindow::new(1000, 2000);
        let a = FingerprintBuilder::new(&cell()).finish();
        let b = FingerprintBuilder::new(&other).finish();
        assert_ne!(a, b);

        let mut renamed = cell();
        renamed.taxonomy = "food".to_string();
        assert_ne!(a, FingerprintBuilder::new(&renamed).finish());
    }

    #[test]
    fn test_child_fingerprints() {
        let base = FingerprintBuilder::new(&cell());
        let a = base
            .clone()
            .children(&[(ScaleInstanceId::new("e1"), Fingerprint::from_u64(1))])
            .finish();
        let b = base
            .children(&[(ScaleInstanceId::new("e1"), Fingerprint::from_u64(2))])
            .finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_is_fixed_width() {
        assert_eq!(Fingerprint::from_u64(255).to_hex(), "00000000000000ff");
    }
}
