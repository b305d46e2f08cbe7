// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Unit normalization into SI-equivalent values.
//!
//! The conversion table is reference data: loaded once per batch and shared
//! read-only between cells. Rows whose unit cannot be resolved are excluded
//! and counted as `missing`, never zeroed. Rows whose SI unit is not the one
//! their taxonomy sums in are excluded as `IncompatibleUnit`.

use crate::error::{EntropyError, Result};
use crate::model::{Flow, Quality, QuantityRecord, QuantityRow, ScaleInstanceId};
use crate::taxonomy::ReferenceData;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Conversion factor to an SI-equivalent unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFactor {
    pub si_unit: String,
    pub factor: f64,
}

/// Unit code → SI-equivalent factor lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitTable {
    factors: HashMap<String, UnitFactor>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table covering the units found in survey, trip, consumption and
    /// building sensor sources.
    pub fn standard() -> Self {
        let mut table = Self::new();
        // Mass
        table.register("kg", "kg", 1.0);
        table.register("g", "kg", 1e-3);
        table.register("t", "kg", 1e3);
        // Energy
        table.register("j", "J", 1.0);
        table.register("kj", "J", 1e3);
        table.register("mj", "J", 1e6);
        table.register("wh", "J", 3.6e3);
        table.register("kwh", "J", 3.6e6);
        // Power
        table.register("w", "W", 1.0);
        table.register("kw", "W", 1e3);
        // Distance
        table.register("m", "m", 1.0);
        table.register("km", "m", 1e3);
        // Counts
        table.register("count", "count", 1.0);
        table.register("item", "count", 1.0);
        table.register("trip", "count", 1.0);
        table.register("night", "count", 1.0);
        table.register("response", "count", 1.0);
        table
    }

    /// Register a unit code. Codes are matched trimmed and case-insensitively.
    pub fn register(&mut self, code: &str, si_unit: &str, factor: f64) {
        self.factors.insert(
            Self::key(code),
            UnitFactor {
                si_unit: si_unit.to_string(),
                factor,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Look up the factor for a unit code.
    ///
    /// A code that is itself one of the registered SI units resolves with
    /// factor 1.
    pub fn lookup(&self, code: &str) -> Option<UnitFactor> {
        let key = Self::key(code);
        if let Some(factor) = self.factors.get(&key) {
            return Some(factor.clone());
        }
        self.factors
            .values()
            .find(|f| Self::key(&f.si_unit) == key)
            .map(|f| UnitFactor {
                si_unit: f.si_unit.clone(),
                factor: 1.0,
            })
    }

    /// Convert a raw quantity into its SI-equivalent value.
    pub fn normalize(&self, value: f64, code: &str) -> Result<(f64, String)> {
        let factor = self.lookup(code).ok_or_else(|| EntropyError::UnknownUnit {
            unit: code.to_string(),
        })?;
        Ok((value * factor.factor, factor.si_unit))
    }

    fn key(code: &str) -> String {
        code.trim().to_ascii_lowercase()
    }
}

/// SI quantity obtained by integrating a rate over time, e.g. W·s = J.
///
/// Sensor buckets in a rate unit are multiplied by their width in seconds
/// before they join a distribution.
pub fn integrated_unit(si_unit: &str) -> Option<&'static str> {
    match si_unit {
        "W" => Some("J"),
        _ => None,
    }
}

/// A source row that could not become a quantity record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedRow {
    pub id: String,
    pub instance: ScaleInstanceId,
    pub flow: Flow,
    /// Taxonomy the exclusion is counted against, when one can be named.
    pub taxonomy: Option<String>,
    pub timestamp_ms: u64,
    pub reason: ExclusionReason,
}

/// Why a row was excluded.
#[derive(Debug, Clone, PartialEq)]
pub enum ExclusionReason {
    /// Source flagged the row as missing.
    SourceMissing,
    /// Normalization or category resolution failed.
    Error(EntropyError),
}

impl ExclusionReason {
    /// Exclusions that count as `missing` quality.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            ExclusionReason::SourceMissing
                | ExclusionReason::Error(EntropyError::UnknownUnit { .. })
        )
    }
}

/// Output of normalizing a batch of curated rows.
#[derive(Debug, Clone, Default)]
pub struct NormalizedRows {
    pub records: Vec<QuantityRecord>,
    pub excluded: Vec<ExcludedRow>,
}

/// Normalize curated rows against the batch's reference data.
///
/// Unit and category failures are recovered per row.
pub fn normalize_rows(rows: &[QuantityRow], reference: &ReferenceData) -> NormalizedRows {
    let mut out = NormalizedRows::default();

    for row in rows {
        match normalize_row(row, reference) {
            Ok(Some(record)) => out.records.push(record),
            Ok(None) => out
                .excluded
                .push(excluded(row, reference, ExclusionReason::SourceMissing)),
            Err(err) => {
                warn!(row = %row.id, error = %err, "excluding row");
                out.excluded
                    .push(excluded(row, reference, ExclusionReason::Error(err)));
            }
        }
    }

    out
}

fn normalize_row(row: &QuantityRow, reference: &ReferenceData) -> Result<Option<QuantityRecord>> {
    if row.quality == Quality::Missing {
        return Ok(None);
    }

    let (value, si_unit) = reference.units.normalize(row.value, &row.unit_code)?;
    let (taxonomy, category) = reference.route(&row.id, row.flow, &row.category, &si_unit)?;

    Ok(Some(QuantityRecord {
        id: row.id.clone(),
        instance: row.instance.clone(),
        flow: row.flow,
        taxonomy: taxonomy.name.clone(),
        category,
        value,
        si_unit,
        timestamp_ms: row.timestamp_ms,
        quality: row.quality,
    }))
}

fn excluded(row: &QuantityRow, reference: &ReferenceData, reason: ExclusionReason) -> ExcludedRow {
    ExcludedRow {
        id: row.id.clone(),
        instance: row.instance.clone(),
        flow: row.flow,
        taxonomy: reference
            .attribute(row.flow, &row.category)
            .map(|t| t.name.clone()),
        timestamp_ms: row.timestamp_ms,
        reason,
    }
}
