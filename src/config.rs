// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pipeline configuration.

use crate::error::{EntropyError, Result};
use crate::model::Flow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Master configuration for the entropy pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sensor resampling.
    pub resample: ResampleConfig,

    /// Distribution building.
    pub distribution: DistributionConfig,

    /// Entropy computation.
    pub entropy: EntropyConfig,

    /// Parent-scale aggregation policy.
    pub aggregation: AggregationConfig,

    /// Batch execution.
    pub batch: BatchConfig,
}

impl PipelineConfig {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.resample.bucket_ms == 0 {
            return Err(EntropyError::InvalidConfig(
                "resample.bucket_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.distribution.imputed_ceiling) {
            return Err(EntropyError::InvalidConfig(format!(
                "distribution.imputed_ceiling {} outside [0, 1]",
                self.distribution.imputed_ceiling
            )));
        }
        if self.batch.max_concurrency == 0 {
            return Err(EntropyError::InvalidConfig(
                "batch.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sensor resampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleConfig {
    /// Bucket width (ms).
    pub bucket_ms: u64,

    /// Longest interior gap (in buckets) that is linearly interpolated.
    pub max_gap_buckets: usize,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            bucket_ms: 3_600_000, // hourly
            max_gap_buckets: 3,
        }
    }
}

/// Distribution building configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Imputed mass fraction above which a cell is `low_confidence`.
    pub imputed_ceiling: f64,

    /// Count `suspect` rows toward mass (they are always tallied).
    pub include_suspect: bool,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            imputed_ceiling: 0.5,
            include_suspect: true,
        }
    }
}

/// Entropy computation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntropyConfig {
    pub log_base: LogBase,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogBase {
    /// Natural log (nats).
    #[default]
    E,
    /// Log base 2 (bits).
    Two,
}

impl LogBase {
    /// Unit label for raw entropy values.
    pub fn unit(&self) -> &'static str {
        match self {
            LogBase::E => "nats",
            LogBase::Two => "bits",
        }
    }

    pub(crate) fn from_nats(&self, nats: f64) -> f64 {
        match self {
            LogBase::E => nats,
            LogBase::Two => nats / std::f64::consts::LN_2,
        }
    }
}

/// How parent scales obtain their distributions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Re-run distribution building over the pooled records of the subtree.
    #[default]
    PooledRecords,
    /// Sum the already-computed child distributions per category.
    ChildDistributions,
}

/// Per-flow aggregation policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Policy when no per-flow override exists.
    pub default_policy: AggregationPolicy,

    /// Per-flow overrides.
    #[serde(default)]
    pub per_flow: BTreeMap<Flow, AggregationPolicy>,
}

impl AggregationConfig {
    pub fn policy(&self, flow: Flow) -> AggregationPolicy {
        self.per_flow
            .get(&flow)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

/// Batch execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum cells computed concurrently within a level.
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}
