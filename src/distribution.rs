// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Category distributions for one (scale instance, flow, taxonomy, window)
//! cell.

use crate::config::DistributionConfig;
use crate::error::{EntropyError, Result};
use crate::model::{Quality, QuantityRecord};
use crate::taxonomy::Taxonomy;
use crate::units::{ExcludedRow, ExclusionReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Category → non-negative weight, dense over the declared taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    weights: BTreeMap<String, f64>,
    /// Mass contributed by imputed values.
    imputed_mass: f64,
}

impl Distribution {
    /// Zero-mass distribution over every declared category.
    pub fn empty(taxonomy: &Taxonomy) -> Self {
        Self {
            weights: taxonomy
                .categories()
                .iter()
                .map(|c| (c.clone(), 0.0))
                .collect(),
            imputed_mass: 0.0,
        }
    }

    /// Build directly from weights (categories listed are the declared set).
    pub fn from_weights<S: AsRef<str>>(weights: &[(S, f64)]) -> Self {
        Self {
            weights: weights
                .iter()
                .map(|(c, w)| (c.as_ref().to_string(), *w))
                .collect(),
            imputed_mass: 0.0,
        }
    }

    /// Add mass to a category.
    pub fn add(&mut self, category: &str, weight: f64, imputed: bool) {
        *self.weights.entry(category.to_string()).or_insert(0.0) += weight;
        if imputed {
            self.imputed_mass += weight;
        }
    }

    /// Weight-sum another distribution into this one, per category.
    pub fn merge(&mut self, other: &Distribution) {
        for (category, weight) in &other.weights {
            *self.weights.entry(category.clone()).or_insert(0.0) += weight;
        }
        self.imputed_mass += other.imputed_mass;
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn weight(&self, category: &str) -> f64 {
        self.weights.get(category).copied().unwrap_or(0.0)
    }

    /// Number of declared categories.
    pub fn cardinality(&self) -> usize {
        self.weights.len()
    }

    /// Categories with positive weight.
    pub fn observed_categories(&self) -> usize {
        self.weights.values().filter(|w| **w > 0.0).count()
    }

    pub fn total_mass(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn imputed_mass(&self) -> f64 {
        self.imputed_mass
    }

    /// Fraction of total mass that was imputed (0 for empty cells).
    pub fn imputed_fraction(&self) -> f64 {
        let total = self.total_mass();
        if total > 0.0 {
            self.imputed_mass / total
        } else {
            0.0
        }
    }
}

/// Per-record exclusions and flags tallied for a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionCounts {
    /// Source-missing rows and unknown units.
    pub missing: usize,
    /// Negative, zero or non-finite quantities, and quantities in a unit
    /// other than the taxonomy's.
    pub invalid: usize,
    /// Labels outside the taxonomy.
    pub unknown_category: usize,
    /// Suspect rows (included unless configured otherwise).
    pub suspect: usize,
}

impl ExclusionCounts {
    pub fn merge(&mut self, other: &ExclusionCounts) {
        self.missing += other.missing;
        self.invalid += other.invalid;
        self.unknown_category += other.unknown_category;
        self.suspect += other.suspect;
    }

    /// Records dropped from the distribution.
    pub fn excluded(&self) -> usize {
        self.missing + self.invalid + self.unknown_category
    }

    fn record(&mut self, reason: &ExclusionReason) {
        match reason {
            r if r.is_missing() => self.missing += 1,
            ExclusionReason::Error(EntropyError::UnknownCategory { .. }) => {
                self.unknown_category += 1
            }
            _ => self.invalid += 1,
        }
    }
}

/// Distribution plus the bookkeeping needed for metric metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CellDistribution {
    pub distribution: Distribution,
    pub exclusions: ExclusionCounts,
    /// Records that contributed mass.
    pub record_count: usize,
    /// Imputed fraction above the configured ceiling.
    pub low_confidence: bool,
}

/// Builds cell distributions from normalized records.
#[derive(Debug, Clone)]
pub struct DistributionBuilder {
    config: DistributionConfig,
}

impl DistributionBuilder {
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }

    /// Partition records by category over the declared taxonomy.
    ///
    /// Invalid records are excluded and counted; only a taxonomy with no
    /// declared category fails the cell. Masses are only summed in the
    /// taxonomy's unit.
    pub fn build<'a, R, E>(
        &self,
        taxonomy: &Taxonomy,
        records: R,
        excluded: E,
    ) -> Result<CellDistribution>
    where
        R: IntoIterator<Item = &'a QuantityRecord>,
        E: IntoIterator<Item = &'a ExcludedRow>,
    {
        taxonomy.validate()?;

        let mut distribution = Distribution::empty(taxonomy);
        let mut exclusions = ExclusionCounts::default();
        let mut record_count = 0;

        for record in records {
            if let Err(err) = Self::check(taxonomy, record) {
                warn!(record = %record.id, error = %err, "excluding record from distribution");
                exclusions.invalid += 1;
                continue;
            }
            if !taxonomy.contains(&record.category) {
                exclusions.unknown_category += 1;
                continue;
            }
            match record.quality {
                Quality::Missing => {
                    exclusions.missing += 1;
                    continue;
                }
                Quality::Suspect => {
                    exclusions.suspect += 1;
                    if !self.config.include_suspect {
                        continue;
                    }
                }
                Quality::Ok | Quality::Imputed => {}
            }

            distribution.add(
                &record.category,
                record.value,
                record.quality == Quality::Imputed,
            );
            record_count += 1;
        }

        for row in excluded {
            exclusions.record(&row.reason);
        }

        let low_confidence = distribution.imputed_fraction() > self.config.imputed_ceiling;

        Ok(CellDistribution {
            distribution,
            exclusions,
            record_count,
            low_confidence,
        })
    }

    /// Combine already-built child cells by weight-summing.
    pub fn combine<'a, I>(&self, taxonomy: &Taxonomy, children: I) -> Result<CellDistribution>
    where
        I: IntoIterator<Item = &'a CellDistribution>,
    {
        taxonomy.validate()?;

        let mut distribution = Distribution::empty(taxonomy);
        let mut exclusions = ExclusionCounts::default();
        let mut record_count = 0;

        for child in children {
            distribution.merge(&child.distribution);
            exclusions.merge(&child.exclusions);
            record_count += child.record_count;
        }

        let low_confidence = distribution.imputed_fraction() > self.config.imputed_ceiling;

        Ok(CellDistribution {
            distribution,
            exclusions,
            record_count,
            low_confidence,
        })
    }

    fn check(taxonomy: &Taxonomy, record: &QuantityRecord) -> Result<()> {
        if !record.value.is_finite() || record.value <= 0.0 {
            return Err(EntropyError::InvalidQuantity {
                record: record.id.clone(),
                value: record.value,
            });
        }
        if record.si_unit != taxonomy.unit {
            return Err(EntropyError::IncompatibleUnit {
                record: record.id.clone(),
                unit: record.si_unit.clone(),
                expected: taxonomy.unit.clone(),
            });
        }
        Ok(())
    }
}
