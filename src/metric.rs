// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Entropy metrics and the sink they are upserted into.
//!
//! A cell produces one metric per [`MetricKey`]. Sinks receive the whole set
//! for a cell in a single call and must apply it atomically: either every
//! key of the cell is replaced or none is.

use crate::batch::BatchReport;
use crate::config::LogBase;
use crate::distribution::{CellDistribution, ExclusionCounts};
use crate::entropy::EntropyStats;
use crate::error::{EntropyError, Result};
use crate::fingerprint::Fingerprint;
use crate::model::{Flow, Scale, ScaleInstanceId, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A (scale instance, flow, taxonomy, window) unit of metric computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub scale: Scale,
    pub instance: ScaleInstanceId,
    pub flow: Flow,
    /// Name of the flow's taxonomy the cell's distribution is dense over.
    pub taxonomy: String,
    pub window: TimeWindow,
}

impl CellKey {
    pub fn new(
        scale: Scale,
        instance: ScaleInstanceId,
        flow: Flow,
        taxonomy: impl Into<String>,
        window: TimeWindow,
    ) -> Self {
        Self {
            scale,
            instance,
            flow,
            taxonomy: taxonomy.into(),
            window,
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}/{}",
            self.scale, self.instance, self.flow, self.taxonomy, self.window
        )
    }
}

/// Metric kinds produced per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    EntropyNormalized,
    EntropyRaw,
    EffectiveCategories,
    TotalMass,
}

impl MetricKey {
    pub const ALL: [MetricKey; 4] = [
        MetricKey::EntropyNormalized,
        MetricKey::EntropyRaw,
        MetricKey::EffectiveCategories,
        MetricKey::TotalMass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::EntropyNormalized => "entropy_normalized",
            MetricKey::EntropyRaw => "entropy_raw",
            MetricKey::EffectiveCategories => "effective_categories",
            MetricKey::TotalMass => "total_mass",
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit trail attached to every metric of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMetadata {
    /// Declared categories (n).
    pub cardinality: usize,
    /// Categories with positive weight.
    pub observed_categories: usize,
    pub imputed_fraction: f64,
    pub low_confidence: bool,
    pub dominant_category: Option<String>,
    pub exclusions: ExclusionCounts,
    /// Records that contributed mass.
    pub record_count: usize,
    /// Direct children whose inputs were aggregated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ScaleInstanceId>,
    /// Input fingerprint (hex).
    pub fingerprint: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// One persisted entropy metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyMetric {
    pub scale: Scale,
    pub instance: ScaleInstanceId,
    pub flow: Flow,
    pub taxonomy: String,
    pub key: MetricKey,
    /// `None` for undefined entropy (zero-mass cells).
    pub value: Option<f64>,
    pub unit: String,
    pub window: TimeWindow,
    pub computed_at: DateTime<Utc>,
    pub metadata: MetricMetadata,
}

impl EntropyMetric {
    pub fn cell(&self) -> CellKey {
        CellKey::new(
            self.scale,
            self.instance.clone(),
            self.flow,
            self.taxonomy.clone(),
            self.window,
        )
    }
}

/// Everything needed to turn a computed cell into metrics.
#[derive(Debug, Clone)]
pub struct CellOutcome<'a> {
    pub cell: &'a CellKey,
    pub stats: &'a EntropyStats,
    pub distribution: &'a CellDistribution,
    /// SI unit of the flow's taxonomy.
    pub mass_unit: &'a str,
    pub log_base: LogBase,
    pub fingerprint: Fingerprint,
    pub children: Vec<ScaleInstanceId>,
    pub gaps_exceeded: usize,
    pub computed_at: DateTime<Utc>,
}

impl CellOutcome<'_> {
    /// The full metric set for the cell, in [`MetricKey::ALL`] order.
    pub fn into_metrics(self) -> Vec<EntropyMetric> {
        let metadata = self.metadata();
        MetricKey::ALL
            .iter()
            .map(|key| {
                let (value, unit) = match key {
                    MetricKey::EntropyNormalized => (self.stats.normalized, "ratio"),
                    MetricKey::EntropyRaw => (self.stats.raw, self.log_base.unit()),
                    MetricKey::EffectiveCategories => {
                        (self.stats.effective_categories, "categories")
                    }
                    MetricKey::TotalMass => (Some(self.stats.total_mass), self.mass_unit),
                };
                EntropyMetric {
                    scale: self.cell.scale,
                    instance: self.cell.instance.clone(),
                    flow: self.cell.flow,
                    taxonomy: self.cell.taxonomy.clone(),
                    key: *key,
                    value,
                    unit: unit.to_string(),
                    window: self.cell.window,
                    computed_at: self.computed_at,
                    metadata: metadata.clone(),
                }
            })
            .collect()
    }

    fn metadata(&self) -> MetricMetadata {
        let dist = &self.distribution.distribution;
        MetricMetadata {
            cardinality: dist.cardinality(),
            observed_categories: dist.observed_categories(),
            imputed_fraction: dist.imputed_fraction(),
            low_confidence: self.distribution.low_confidence,
            dominant_category: self.stats.dominant_category.clone(),
            exclusions: self.distribution.exclusions,
            record_count: self.distribution.record_count,
            children: self.children.clone(),
            fingerprint: self.fingerprint.to_hex(),
            flags: self.flags(),
        }
    }

    fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.stats.is_null() {
            flags.push("NULL_ENTROPY".to_string());
        }
        if self.distribution.low_confidence {
            flags.push("LOW_CONFIDENCE".to_string());
        }
        let missing = self.distribution.exclusions.missing;
        if missing > 0 {
            flags.push(format!("MISSING_EXCLUDED:{}", missing));
        }
        let excluded = self.distribution.exclusions.excluded() - missing;
        if excluded > 0 {
            flags.push(format!("INVALID_EXCLUDED:{}", excluded));
        }
        if self.gaps_exceeded > 0 {
            flags.push(format!("GAP_EXCEEDED:{}", self.gaps_exceeded));
        }
        flags
    }
}

/// Destination for computed metrics and batch status.
pub trait MetricSink: Send + Sync {
    /// Replace every metric of `cell` with `metrics`, atomically.
    fn upsert_cell(&self, cell: &CellKey, metrics: Vec<EntropyMetric>) -> Result<()>;

    /// Record a batch run (once per run, retries included).
    fn report_batch(&self, report: &BatchReport) -> Result<()>;
}

/// In-memory sink keyed by (cell, metric key).
#[derive(Debug, Default)]
pub struct MemorySink {
    metrics: Mutex<BTreeMap<(CellKey, MetricKey), EntropyMetric>>,
    reports: Mutex<Vec<BatchReport>>,
    cell_writes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert_cell` calls applied so far.
    pub fn cell_writes(&self) -> usize {
        self.cell_writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.metrics).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.metrics).is_empty()
    }

    pub fn get(&self, cell: &CellKey, key: MetricKey) -> Option<EntropyMetric> {
        lock(&self.metrics).get(&(cell.clone(), key)).cloned()
    }

    /// All metrics of one cell, in key order.
    pub fn cell_metrics(&self, cell: &CellKey) -> Vec<EntropyMetric> {
        lock(&self.metrics)
            .iter()
            .filter(|((c, _), _)| c == cell)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Every stored metric, in key order.
    pub fn metrics(&self) -> Vec<EntropyMetric> {
        lock(&self.metrics).values().cloned().collect()
    }

    pub fn reports(&self) -> Vec<BatchReport> {
        lock(&self.reports).clone()
    }

    /// Stored metrics as pretty JSON, in key order.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.metrics())?)
    }
}

impl MetricSink for MemorySink {
    fn upsert_cell(&self, cell: &CellKey, metrics: Vec<EntropyMetric>) -> Result<()> {
        if let Some(stray) = metrics.iter().find(|m| &m.cell() != cell) {
            return Err(EntropyError::Sink(format!(
                "metric for {} submitted under cell {}",
                stray.cell(),
                cell
            )));
        }

        let mut stored = lock(&self.metrics);
        stored.retain(|(c, _), _| c != cell);
        for metric in metrics {
            stored.insert((cell.clone(), metric.key), metric);
        }
        self.cell_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn report_batch(&self, report: &BatchReport) -> Result<()> {
        lock(&self.reports).push(report.clone());
        Ok(())
    }
}

// Poisoned guards are recovered; a cell is applied under a single guard.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;

    fn cell(instance: &str) -> CellKey {
        CellKey::new(
            Scale::Event,
            ScaleInstanceId::new(instance),
            Flow::Material,
            "food",
            TimeWindow::new(0, 3_600_000),
        )
    }

    fn outcome_metrics(
        cell: &CellKey,
        stats: &EntropyStats,
        dist: &CellDistribution,
    ) -> Vec<EntropyMetric> {
        CellOutcome {
            cell,
            stats,
            distribution: dist,
            mass_unit: "kg",
            log_base: LogBase::E,
            fingerprint: Fingerprint::from_u64(0xabcd),
            children: vec![ScaleInstanceId::new("p1")],
            gaps_exceeded: 0,
            computed_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
        .into_metrics()
    }

    fn cell_dist(weights: &[(&str, f64)]) -> CellDistribution {
        CellDistribution {
            distribution: Distribution::from_weights(weights),
            exclusions: ExclusionCounts {
                missing: 1,
                ..Default::default()
            },
            record_count: weights.len(),
            low_confidence: false,
        }
    }

    #[test]
    fn test_metric_set_per_cell() {
        let key = cell("e1");
        let dist = cell_dist(&[("a", 1.0), ("b", 1.0)]);
        let stats = crate::entropy::EntropyCalculator::default()
            .compute(Flow::Material, &dist.distribution)
            .unwrap();
        let metrics = outcome_metrics(&key, &stats, &dist);

        assert_eq!(metrics.len(), 4);
        assert_eq!(metrics[0].key, MetricKey::EntropyNormalized);
        assert_eq!(metrics[0].unit, "ratio");
        assert_eq!(metrics[1].unit, "nats");
        assert_eq!(metrics[3].value, Some(2.0));
        assert_eq!(metrics[3].unit, "kg");
        assert_eq!(metrics[0].taxonomy, "food");
        assert_eq!(metrics[0].cell(), key);
        assert_eq!(metrics[0].metadata.fingerprint, "000000000000abcd");
        assert!(metrics[0]
            .metadata
            .flags
            .contains(&"MISSING_EXCLUDED:1".to_string()));
    }

    #[test]
    fn test_null_metrics_flagged() {
        let key = cell("e1");
        let dist = cell_dist(&[("a", 0.0), ("b", 0.0)]);
        let stats = crate::entropy::EntropyCalculator::default()
            .compute(Flow::Material, &dist.distribution)
            .unwrap();
        let metrics = outcome_metrics(&key, &stats, &dist);
        assert_eq!(metrics[0].value, None);
        assert_eq!(metrics[3].value, Some(0.0));
        assert!(metrics[0].metadata.flags.contains(&"NULL_ENTROPY".to_string()));
    }

    #[test]
    fn test_upsert_overwrites_per_key() {
        let sink = MemorySink::new();
        let key = cell("e1");
        let dist = cell_dist(&[("a", 1.0), ("b", 3.0)]);
        let stats = crate::entropy::EntropyCalculator::default()
            .compute(Flow::Material, &dist.distribution)
            .unwrap();

        sink.upsert_cell(&key, outcome_metrics(&key, &stats, &dist)).unwrap();
        sink.upsert_cell(&key, outcome_metrics(&key, &stats, &dist)).unwrap();

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.cell_writes(), 2);
        assert_eq!(sink.cell_metrics(&key).len(), 4);
        assert!(sink.get(&key, MetricKey::TotalMass).is_some());
    }

    #[test]
    fn test_upsert_rejects_foreign_metrics() {
        let sink = MemorySink::new();
        let dist = cell_dist(&[("a", 1.0)]);
        let stats = crate::entropy::EntropyCalculator::default()
            .compute(Flow::Material, &dist.distribution)
            .unwrap();
        let metrics = outcome_metrics(&cell("e1"), &stats, &dist);

        let result = sink.upsert_cell(&cell("e2"), metrics);
        assert!(matches!(result, Err(EntropyError::Sink(_))));
        assert!(sink.is_empty());
        assert_eq!(sink.cell_writes(), 0);
    }

    #[test]
    fn test_taxonomies_are_separate_cells() {
        let food = cell("e1");
        let transport = CellKey {
            taxonomy: "transport".to_string(),
            ..food.clone()
        };
        assert_ne!(food, transport);
        assert_eq!(food.to_string(), "event/e1/material:food/[0, 3600000)");

        let sink = MemorySink::new();
        let dist = cell_dist(&[("a", 1.0)]);
        let stats = crate::entropy::EntropyCalculator::default()
            .compute(Flow::Material, &dist.distribution)
            .unwrap();
        sink.upsert_cell(&food, outcome_metrics(&food, &stats, &dist)).unwrap();
        sink.upsert_cell(&transport, outcome_metrics(&transport, &stats, &dist))
            .unwrap();
        assert_eq!(sink.len(), 8);
    }
}
