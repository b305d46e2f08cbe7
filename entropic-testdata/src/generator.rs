// Entropic Testdata - Congress generator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Synthetic congress generation.
//!
//! Participants answer a survey, log trips and report food consumption
//! during the congress. Buildings in the host city report electric and
//! heating load from 15-minute sensors with occasional dropouts.
//!
//! Trips (km) and food (g) both land in the `material` flow with their raw
//! labels; the consumer routes them to separate taxonomies by label and unit.

use crate::dataset::{
    CongressDataset, DatasetMetadata, InstanceRow, QuantityRow, ReadingRow, SensorRow,
};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Normal};
use serde::{Deserialize, Serialize};

/// Raw transport labels as they appear in trip logs, with their weights.
const TRANSPORT_LABELS: [(&str, f64); 6] = [
    ("bus", 0.25),
    ("metro", 0.20),
    ("taxi", 0.15),
    ("coche", 0.10),
    ("bici", 0.10),
    ("pie", 0.20),
];

/// Raw food labels with mean kg per participant.
const FOOD_LABELS: [(&str, f64); 3] = [("carne_roja", 1.2), ("avepescado", 0.9), ("marisco", 0.4)];

const SURVEY_TOPICS: [&str; 5] = [
    "transporte",
    "alimentacion",
    "alojamiento",
    "compras",
    "residencia",
];

/// Building sensor channels: (category label, unit code, base load).
const SENSOR_CHANNELS: [(&str, &str, f64); 2] = [("power", "kw", 40.0), ("gas", "kw", 25.0)];

/// Congress generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongressConfig {
    /// Start timestamp in milliseconds.
    pub start_time_ms: u64,
    /// Congress duration in hours.
    pub duration_hours: u64,
    pub events: usize,
    pub participants_per_event: usize,
    pub buildings: usize,
    /// Interval between sensor readings in milliseconds.
    pub sensor_interval_ms: u64,
    /// Probability that a sensor reading is dropped.
    pub dropout_rate: f64,
    /// Probability that a survey answer is flagged `missing`.
    pub missing_rate: f64,
    /// Random seed for reproducibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for CongressConfig {
    fn default() -> Self {
        Self {
            start_time_ms: 1_706_745_600_000, // 2024-02-01 00:00:00 UTC
            duration_hours: 24,
            events: 3,
            participants_per_event: 8,
            buildings: 2,
            sensor_interval_ms: 900_000, // 15 minutes
            dropout_rate: 0.05,
            missing_rate: 0.02,
            seed: None,
        }
    }
}

impl CongressConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_time(mut self, timestamp_ms: u64) -> Self {
        self.start_time_ms = timestamp_ms;
        self
    }

    pub fn with_duration_hours(mut self, hours: u64) -> Self {
        self.duration_hours = hours;
        self
    }

    pub fn with_events(mut self, events: usize) -> Self {
        self.events = events;
        self
    }

    pub fn with_participants_per_event(mut self, participants: usize) -> Self {
        self.participants_per_event = participants;
        self
    }

    pub fn with_buildings(mut self, buildings: usize) -> Self {
        self.buildings = buildings;
        self
    }

    pub fn with_sensor_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sensor_interval_ms = interval_ms;
        self
    }

    pub fn with_dropout_rate(mut self, rate: f64) -> Self {
        self.dropout_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_missing_rate(mut self, rate: f64) -> Self {
        self.missing_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn end_time_ms(&self) -> u64 {
        self.start_time_ms + self.duration_hours * 3_600_000
    }
}

/// Generate a congress dataset.
pub fn generate_congress(config: &CongressConfig) -> CongressDataset {
    let mut rng = match config.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let mut dataset = CongressDataset {
        metadata: DatasetMetadata {
            seed: config.seed,
            start_time_ms: config.start_time_ms,
            end_time_ms: config.end_time_ms(),
            sensor_interval_ms: config.sensor_interval_ms,
        },
        ..CongressDataset::default()
    };

    dataset.instances.push(instance("congress", "congress", None));
    for e in 0..config.events {
        let event = format!("event-{}", e + 1);
        dataset
            .instances
            .push(instance(&event, "event", Some("congress")));
        for p in 0..config.participants_per_event {
            let participant = format!("{}-p{}", event, p + 1);
            dataset
                .instances
                .push(instance(&participant, "participant", Some(&event)));
            participant_rows(config, &mut rng, &participant, &mut dataset.rows);
        }
    }

    if config.buildings > 0 {
        dataset.instances.push(instance("city", "city", None));
    }
    for b in 0..config.buildings {
        let building = format!("building-{}", b + 1);
        dataset
            .instances
            .push(instance(&building, "building", Some("city")));
        for (label, unit, base) in SENSOR_CHANNELS {
            let sensor_id = format!("{}-{}", building, label);
            let scale = rng.gen_range(0.6..1.4);
            let readings = sensor_readings(config, &mut rng, base * scale);
            dataset.sensors.push(SensorRow {
                sensor_id: sensor_id.clone(),
                instance: building.clone(),
                flow: "energy".to_string(),
                category: label.to_string(),
                unit_code: unit.to_string(),
                sampling_interval_ms: Some(config.sensor_interval_ms),
            });
            dataset.readings.insert(sensor_id, readings);
        }
    }

    dataset
}

fn instance(id: &str, scale: &str, parent: Option<&str>) -> InstanceRow {
    InstanceRow {
        id: id.to_string(),
        scale: scale.to_string(),
        parent: parent.map(str::to_string),
    }
}

fn participant_rows(
    config: &CongressConfig,
    rng: &mut StdRng,
    participant: &str,
    rows: &mut Vec<QuantityRow>,
) {
    let span_ms = config.end_time_ms() - config.start_time_ms;
    let timestamp = |rng: &mut StdRng| config.start_time_ms + rng.gen_range(0..span_ms.max(1));
    let quality = |rng: &mut StdRng| {
        if rng.gen::<f64>() < config.missing_rate {
            "missing"
        } else {
            "ok"
        }
    };

    // Trips: a handful per participant, log-normal distances in km.
    let trips = rng.gen_range(1..=4);
    let distance = LogNormal::new(1.0, 0.6).ok();
    for t in 0..trips {
        let label = pick_weighted(rng, &TRANSPORT_LABELS);
        let km = match distance {
            Some(d) => d.sample(rng),
            None => 2.0,
        };
        rows.push(QuantityRow {
            id: format!("{}-trip{}", participant, t + 1),
            source: "trip".to_string(),
            instance: participant.to_string(),
            flow: "material".to_string(),
            category: label.to_string(),
            value: round3(km),
            unit_code: "km".to_string(),
            timestamp_ms: timestamp(rng),
            quality: quality(rng).to_string(),
        });
    }

    // Survey answers count toward the information flow.
    for topic in SURVEY_TOPICS {
        if rng.gen::<f64>() < 0.8 {
            rows.push(QuantityRow {
                id: format!("{}-{}", participant, topic),
                source: "survey".to_string(),
                instance: participant.to_string(),
                flow: "information".to_string(),
                category: topic.to_string(),
                value: 1.0,
                unit_code: "response".to_string(),
                timestamp_ms: timestamp(rng),
                quality: quality(rng).to_string(),
            });
        }
    }

    // Food consumption in grams, reported as consumption rows.
    for (label, mean_kg) in FOOD_LABELS {
        let grams = match Normal::new(mean_kg * 1000.0, mean_kg * 250.0) {
            Ok(d) => d.sample(rng).max(0.0),
            Err(_) => mean_kg * 1000.0,
        };
        if grams <= 0.0 {
            continue;
        }
        rows.push(QuantityRow {
            id: format!("{}-{}", participant, label),
            source: "consumption".to_string(),
            instance: participant.to_string(),
            flow: "material".to_string(),
            category: label.to_string(),
            value: grams.round(),
            unit_code: "g".to_string(),
            timestamp_ms: timestamp(rng),
            quality: quality(rng).to_string(),
        });
    }
}

/// Daily load curve plus noise, with random dropouts.
fn sensor_readings(config: &CongressConfig, rng: &mut StdRng, base_kw: f64) -> Vec<ReadingRow> {
    let interval = config.sensor_interval_ms.max(1);
    let noise = Normal::new(0.0, base_kw * 0.05).ok();
    let mut readings = Vec::new();

    let mut t = config.start_time_ms;
    while t < config.end_time_ms() {
        if rng.gen::<f64>() >= config.dropout_rate {
            let hour = ((t - config.start_time_ms) / 3_600_000) % 24;
            let phase = (hour as f64 - 14.0) / 24.0 * std::f64::consts::TAU;
            let daily = 1.0 + 0.4 * phase.cos();
            let jitter = match noise {
                Some(n) => n.sample(rng),
                None => 0.0,
            };
            let value = base_kw * daily + jitter;
            readings.push(ReadingRow::ok(t, round3(value.max(0.0))));
        }
        t += interval;
    }

    readings
}

fn pick_weighted<'a>(rng: &mut StdRng, options: &[(&'a str, f64)]) -> &'a str {
    let total: f64 = options.iter().map(|(_, w)| w).sum();
    let mut target = rng.gen::<f64>() * total;
    for (label, weight) in options {
        if target < *weight {
            return *label;
        }
        target -= weight;
    }
    options.last().map_or("", |(label, _)| *label)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CongressConfig::default();
        assert_eq!(config.events, 3);
        assert_eq!(config.end_time_ms() - config.start_time_ms, 86_400_000);
    }

    #[test]
    fn test_hierarchy_shape() {
        let config = CongressConfig::new()
            .with_events(2)
            .with_participants_per_event(3)
            .with_buildings(2)
            .with_seed(7);
        let dataset = generate_congress(&config);

        assert_eq!(dataset.instances_of("congress").count(), 1);
        assert_eq!(dataset.instances_of("event").count(), 2);
        assert_eq!(dataset.instances_of("participant").count(), 6);
        assert_eq!(dataset.instances_of("building").count(), 2);
        assert!(dataset
            .instances_of("participant")
            .all(|p| p.parent.as_deref().is_some_and(|e| e.starts_with("event-"))));
        assert_eq!(dataset.sensors.len(), 4);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let config = CongressConfig::new().with_seed(42);
        assert_eq!(generate_congress(&config), generate_congress(&config));

        let other = generate_congress(&CongressConfig::new().with_seed(43));
        assert_ne!(generate_congress(&config).rows, other.rows);
    }

    #[test]
    fn test_rows_within_congress() {
        let config = CongressConfig::new().with_seed(1);
        let dataset = generate_congress(&config);
        assert!(!dataset.rows.is_empty());
        for row in &dataset.rows {
            assert!(row.timestamp_ms >= config.start_time_ms);
            assert!(row.timestamp_ms < config.end_time_ms());
            assert!(row.value >= 0.0);
        }
    }

    #[test]
    fn test_dropouts_thin_readings() {
        let full = generate_congress(&CongressConfig::new().with_dropout_rate(0.0).with_seed(3));
        let sparse = generate_congress(&CongressConfig::new().with_dropout_rate(0.5).with_seed(3));
        // 24h at 15-minute intervals, 2 buildings x 2 channels
        assert_eq!(full.reading_count(), 96 * 4);
        assert!(sparse.reading_count() < full.reading_count());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dataset = generate_congress(&CongressConfig::new().with_events(1).with_seed(9));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("congress.json");
        dataset.to_json(&path).unwrap();
        assert_eq!(CongressDataset::from_json(&path).unwrap(), dataset);
    }
}
