// Entropic Testdata - Dataset structures
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Dataset structures and I/O.
//!
//! Rows are laid out the way the curated store exports them: lowercase
//! enum names, instance ids as plain strings and timestamps in epoch
//! milliseconds, so a dataset's JSON can be read back as pipeline input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

/// Dataset error types.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One node of the containment hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub id: String,
    /// `participant`, `event`, `congress`, `building` or `city`.
    pub scale: String,
    pub parent: Option<String>,
}

/// A survey, trip or consumption row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityRow {
    pub id: String,
    pub source: String,
    pub instance: String,
    pub flow: String,
    pub category: String,
    pub value: f64,
    pub unit_code: String,
    pub timestamp_ms: u64,
    pub quality: String,
}

/// Static description of a building sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRow {
    pub sensor_id: String,
    pub instance: String,
    pub flow: String,
    pub category: String,
    pub unit_code: String,
    pub sampling_interval_ms: Option<u64>,
}

/// One raw sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRow {
    pub timestamp_ms: u64,
    pub value: f64,
    pub quality: String,
}

impl ReadingRow {
    pub fn ok(timestamp_ms: u64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
            quality: "ok".to_string(),
        }
    }
}

/// Generation metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub seed: Option<u64>,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub sensor_interval_ms: u64,
}

/// A generated congress: hierarchy, curated rows, sensors and readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CongressDataset {
    pub instances: Vec<InstanceRow>,
    pub rows: Vec<QuantityRow>,
    pub sensors: Vec<SensorRow>,
    /// Readings by sensor id.
    pub readings: BTreeMap<String, Vec<ReadingRow>>,
    #[serde(default)]
    pub metadata: DatasetMetadata,
}

impl CongressDataset {
    /// Instances of one scale, in generation order.
    pub fn instances_of<'a>(&'a self, scale: &'a str) -> impl Iterator<Item = &'a InstanceRow> {
        self.instances.iter().filter(move |i| i.scale == scale)
    }

    /// Rows attached to one instance.
    pub fn rows_for<'a>(&'a self, instance: &'a str) -> impl Iterator<Item = &'a QuantityRow> {
        self.rows.iter().filter(move |r| r.instance == instance)
    }

    pub fn reading_count(&self) -> usize {
        self.readings.values().map(Vec::len).sum()
    }

    /// Export to a JSON file.
    pub fn to_json(&self, path: impl AsRef<Path>) -> Result<(), DatasetError> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Import from a JSON file.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let dataset = serde_json::from_reader(reader)?;
        Ok(dataset)
    }
}
