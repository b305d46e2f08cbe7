// Entropic Testdata - Synthetic congress datasets
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Entropic Testdata
//!
//! Seeded generator for congress-shaped datasets: a participant → event →
//! congress hierarchy with survey, trip and consumption rows, plus a
//! building → city side with noisy energy sensors.
//!
//! ## Quick Start
//!
//! ```rust
//! use entropic_testdata::{generate_congress, CongressConfig};
//!
//! let config = CongressConfig::new()
//!     .with_events(2)
//!     .with_participants_per_event(5)
//!     .with_seed(42);
//!
//! let dataset = generate_congress(&config);
//! assert_eq!(dataset.instances_of("participant").count(), 10);
//! ```
//!
//! Rows use the curated store's JSON layout, so they deserialize directly
//! into the pipeline's row and sensor types.

pub mod dataset;
pub mod generator;

pub use dataset::{
    CongressDataset, DatasetError, DatasetMetadata, InstanceRow, QuantityRow, ReadingRow,
    SensorRow,
};
pub use generator::{generate_congress, CongressConfig};
