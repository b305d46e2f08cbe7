//! # Entropic - Entropy metrics for multi-scale resource flows
//!
//! Turns curated survey, trip, consumption and building sensor records into
//! normalized Shannon entropy metrics per scale instance, flow and window.
//!
//! ## Key Features
//!
//! - **Unit normalization**: heterogeneous quantities to SI equivalents
//! - **Sensor resampling**: fixed buckets, bounded linear gap filling
//! - **Dense distributions**: over named taxonomies, several per flow
//! - **Hierarchical roll-up**: participant → event → congress, building → city
//! - **Idempotent batches**: content fingerprints, per-cell atomic commits
//!
//! ## Quick Start
//!
//! ```rust
//! use entropic::{Distribution, EntropyCalculator, Flow};
//!
//! let calculator = EntropyCalculator::default();
//! let dist = Distribution::from_weights(&[("bus", 10.0), ("car", 10.0), ("bike", 0.0)]);
//!
//! let stats = calculator.compute(Flow::Material, &dist).unwrap();
//! assert!(stats.normalized.unwrap() > 0.6);
//! assert_eq!(stats.dominant_category.as_deref(), Some("bus"));
//! ```
//!
//! A full batch goes through [`Pipeline::run_batch`], which schedules cells
//! bottom-up over the [`ScaleHierarchy`] and commits them to a
//! [`MetricSink`].
//!
//! ## Modules
//!
//! - [`units`]: Unit conversion table and row normalization
//! - [`taxonomy`]: Per-flow categories and batch reference data
//! - [`resample`]: Sensor resampling and gap policy
//! - [`distribution`]: Category distributions per cell
//! - [`entropy`]: Normalized Shannon entropy
//! - [`hierarchy`]: Scale containment arena
//! - [`aggregate`]: Parent-scale distributions
//! - [`batch`]: Batch status and the cell-status table
//! - [`pipeline`]: Async batch orchestration
//!
//! The library logs through `tracing` and never installs a subscriber.

// Modules
pub mod aggregate;
pub mod batch;
pub mod config;
pub mod distribution;
pub mod entropy;
pub mod error;
pub mod fingerprint;
pub mod hierarchy;
pub mod metric;
pub mod model;
pub mod pipeline;
pub mod profile;
pub mod resample;
pub mod taxonomy;
pub mod units;

// Re-exports for convenient access
pub use aggregate::{CellInputs, InstanceInputs, ScaleAggregator};
pub use batch::{
    BatchCoordinator, BatchReport, BatchStatus, CellState, CellStatus, Decision, FailedCell,
    IngestionBatch,
};
pub use config::{
    AggregationConfig, AggregationPolicy, BatchConfig, DistributionConfig, EntropyConfig,
    LogBase, PipelineConfig, ResampleConfig,
};
pub use distribution::{CellDistribution, Distribution, DistributionBuilder, ExclusionCounts};
pub use entropy::{EntropyCalculator, EntropyStats};
pub use error::{EntropyError, Result};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use hierarchy::ScaleHierarchy;
pub use metric::{
    CellKey, CellOutcome, EntropyMetric, MemorySink, MetricKey, MetricMetadata, MetricSink,
};
pub use model::{
    Flow, Quality, QuantityRecord, QuantityRow, Scale, ScaleInstanceId, SensorReading,
    SensorSpec, SourceKind, TimeWindow,
};
pub use pipeline::{BatchInput, CancelFlag, Pipeline};
pub use profile::{mobility_profiles, MobilityProfile, Origin, OriginRules};
pub use resample::{Bucket, ResampledSeries, Resampler};
pub use taxonomy::{ReferenceData, Taxonomy};
pub use units::{
    integrated_unit, normalize_rows, ExcludedRow, ExclusionReason, NormalizedRows, UnitTable,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_rows_to_entropy() {
        let reference = ReferenceData::new(UnitTable::standard())
            .with_taxonomy(Taxonomy::transport_modes(Flow::Material));
        let row = |id: &str, mode: &str, km: f64| QuantityRow {
            id: id.to_string(),
            source: SourceKind::Trip,
            instance: ScaleInstanceId::new("p1"),
            flow: Flow::Material,
            category: mode.to_string(),
            value: km,
            unit_code: "km".to_string(),
            timestamp_ms: 0,
            quality: Quality::Ok,
        };
        let rows = vec![row("t1", "bus", 2.0), row("t2", "taxi", 2.0), row("t3", "pie", 2.0)];

        let normalized = normalize_rows(&rows, &reference);
        let taxonomy = reference.taxonomy(Flow::Material, Taxonomy::TRANSPORT).unwrap();
        let cell = DistributionBuilder::new(DistributionConfig::default())
            .build(taxonomy, &normalized.records, &normalized.excluded)
            .unwrap();
        let stats = EntropyCalculator::default()
            .compute(Flow::Material, &cell.distribution)
            .unwrap();

        assert!((stats.normalized.unwrap() - 1.0).abs() < 1e-12);
        assert!((stats.total_mass - 6000.0).abs() < 1e-9);
    }
}
