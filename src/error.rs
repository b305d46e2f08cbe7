//! Error types for Entropic
//!
//! This module defines all error kinds raised by the metric pipeline.
//! Per-record kinds are recovered where they occur; structural kinds abort
//! a single cell.

use thiserror::Error;

use crate::model::{Flow, ScaleInstanceId};

/// Result type alias for Entropic operations
pub type Result<T> = std::result::Result<T, EntropyError>;

/// Main error type for Entropic operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntropyError {
    /// Unit code has no registered conversion factor
    #[error("Unknown unit: {unit}")]
    UnknownUnit { unit: String },

    /// Negative, zero or non-finite quantity
    #[error("Invalid quantity for record {record}: {value}")]
    InvalidQuantity { record: String, value: f64 },

    /// Source label not covered by any of the flow's taxonomies
    #[error("Unknown {flow} category: {label}")]
    UnknownCategory { flow: Flow, label: String },

    /// Quantity unit differs from the unit its taxonomy sums in
    #[error("Incompatible unit for record {record}: {unit}, expected {expected}")]
    IncompatibleUnit {
        record: String,
        unit: String,
        expected: String,
    },

    /// Taxonomy declares no category at all
    #[error("Insufficient taxonomy for {flow}: {declared} declared categories")]
    InsufficientTaxonomy { flow: Flow, declared: usize },

    /// Sensor gap too long to interpolate (informational)
    #[error("Gap exceeded on sensor {sensor}: {buckets} buckets from bucket {start_bucket}")]
    GapExceeded {
        sensor: String,
        start_bucket: usize,
        buckets: usize,
    },

    /// A record could be attributed to more than one scale path
    #[error("Hierarchy ambiguity at {instance}: {parents} parents")]
    HierarchyAmbiguity {
        instance: ScaleInstanceId,
        parents: usize,
    },

    /// Parent aggregated before its child reached `computed`
    #[error("Stale aggregation input: {child} not computed before {parent}")]
    StaleAggregationInput {
        parent: ScaleInstanceId,
        child: ScaleInstanceId,
    },

    /// Hierarchy construction rejected
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cell status change not allowed by the batch state machine
    #[error("Invalid cell transition: {0}")]
    InvalidTransition(String),

    /// A cell task panicked or was aborted
    #[error("Execution error: {0}")]
    Execution(String),

    /// Metric sink rejected a write
    #[error("Sink error: {0}")]
    Sink(String),
}

impl EntropyError {
    /// Errors that exclude a single record and never abort a cell.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            Self::UnknownUnit { .. }
                | Self::InvalidQuantity { .. }
                | Self::UnknownCategory { .. }
                | Self::IncompatibleUnit { .. }
        )
    }

    /// Errors that abort the affected cell only.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InsufficientTaxonomy { .. }
                | Self::HierarchyAmbiguity { .. }
                | Self::StaleAggregationInput { .. }
        )
    }

    /// Short kind tag used in batch notes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownUnit { .. } => "unknown_unit",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::UnknownCategory { .. } => "unknown_category",
            Self::IncompatibleUnit { .. } => "incompatible_unit",
            Self::InsufficientTaxonomy { .. } => "insufficient_taxonomy",
            Self::GapExceeded { .. } => "gap_exceeded",
            Self::HierarchyAmbiguity { .. } => "hierarchy_ambiguity",
            Self::StaleAggregationInput { .. } => "stale_aggregation_input",
            Self::InvalidHierarchy(_) => "invalid_hierarchy",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Serialization(_) => "serialization",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Execution(_) => "execution",
            Self::Sink(_) => "sink",
        }
    }
}

impl From<serde_json::Error> for EntropyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EntropyError::UnknownUnit {
            unit: "furlong".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("furlong"));
    }

    #[test]
    fn test_error_classification() {
        let per_record = EntropyError::InvalidQuantity {
            record: "r1".to_string(),
            value: -2.0,
        };
        assert!(per_record.is_per_record());
        assert!(!per_record.is_structural());

        let mixed = EntropyError::IncompatibleUnit {
            record: "r2".to_string(),
            unit: "W".to_string(),
            expected: "J".to_string(),
        };
        assert!(mixed.is_per_record());
        assert_eq!(mixed.kind(), "incompatible_unit");

        let structural = EntropyError::StaleAggregationInput {
            parent: ScaleInstanceId::new("c1"),
            child: ScaleInstanceId::new("e1"),
        };
        assert!(structural.is_structural());
        assert_eq!(structural.kind(), "stale_aggregation_input");

        let gap = EntropyError::GapExceeded {
            sensor: "s1".to_string(),
            start_bucket: 2,
            buckets: 5,
        };
        assert!(!gap.is_per_record());
        assert!(!gap.is_structural());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: EntropyError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, EntropyError::Serialization(_)));
    }
}
