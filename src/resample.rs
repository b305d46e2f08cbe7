// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fixed-interval resampling of irregular sensor readings.
//!
//! Readings are bucketed over the requested window, averaged per bucket, and
//! short interior gaps are linearly interpolated between observed neighbors.
//! Gaps longer than `max_gap_buckets` are left missing: interpolating across
//! them would fabricate long stretches of data.

use crate::config::ResampleConfig;
use crate::error::EntropyError;
use crate::model::{Quality, QuantityRecord, SensorReading, SensorSpec, TimeWindow};
use crate::units::integrated_unit;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One fixed-width bucket of a resampled series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start_ms: u64,
    pub value: Option<f64>,
    pub quality: Quality,
}

impl Bucket {
    fn missing(start_ms: u64) -> Self {
        Self {
            start_ms,
            value: None,
            quality: Quality::Missing,
        }
    }
}

/// Resampled series for one sensor over one window.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledSeries {
    pub sensor_id: String,
    pub window: TimeWindow,
    pub bucket_ms: u64,
    pub buckets: Vec<Bucket>,
    /// `GapExceeded` diagnostics for runs left missing.
    pub gaps: Vec<EntropyError>,
}

impl ResampledSeries {
    /// Buckets carrying a value (observed or imputed).
    pub fn valid_buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter().filter(|b| b.value.is_some())
    }

    pub fn imputed_count(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| b.quality == Quality::Imputed)
            .count()
    }

    pub fn missing_count(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| b.quality == Quality::Missing)
            .count()
    }

    /// Width of a bucket; the last one is cut at the window end.
    pub fn bucket_width_ms(&self, bucket: &Bucket) -> u64 {
        self.bucket_ms
            .min(self.window.end_ms.saturating_sub(bucket.start_ms))
    }

    /// Unit of the records [`to_records`](Self::to_records) emits for a
    /// series read in `si_unit`.
    pub fn record_unit(si_unit: &str) -> &str {
        integrated_unit(si_unit).unwrap_or(si_unit)
    }

    /// Turn valid buckets into quantity records attributed to the sensor's
    /// instance. Missing buckets produce nothing.
    ///
    /// Buckets read in a rate unit (W) are integrated over their width into
    /// the matching quantity (J); other units keep the bucket mean.
    pub fn to_records(
        &self,
        spec: &SensorSpec,
        taxonomy: &str,
        category: &str,
        si_unit: &str,
    ) -> Vec<QuantityRecord> {
        let integrated = integrated_unit(si_unit);
        let unit = integrated.unwrap_or(si_unit);
        self.valid_buckets()
            .filter_map(|bucket| {
                let seconds = self.bucket_width_ms(bucket) as f64 / 1000.0;
                bucket.value.map(|value| QuantityRecord {
                    id: format!("{}@{}", self.sensor_id, bucket.start_ms),
                    instance: spec.instance.clone(),
                    flow: spec.flow,
                    taxonomy: taxonomy.to_string(),
                    category: category.to_string(),
                    value: if integrated.is_some() { value * seconds } else { value },
                    si_unit: unit.to_string(),
                    timestamp_ms: bucket.start_ms,
                    quality: bucket.quality,
                })
            })
            .collect()
    }
}

/// Sensor resampler. Stateless across windows.
#[derive(Debug, Clone)]
pub struct Resampler {
    config: ResampleConfig,
}

impl Resampler {
    pub fn new(config: ResampleConfig) -> Self {
        Self { config }
    }

    /// Resample one sensor's readings over `window`.
    pub fn resample(
        &self,
        sensor_id: &str,
        readings: &[SensorReading],
        window: TimeWindow,
    ) -> ResampledSeries {
        let bucket_ms = self.config.bucket_ms.max(1);
        let n_buckets = if window.is_empty() {
            0
        } else {
            ((window.duration_ms() + bucket_ms - 1) / bucket_ms) as usize
        };

        let mut per_bucket: Vec<Vec<&SensorReading>> = vec![Vec::new(); n_buckets];
        for reading in readings {
            if reading.quality.is_bad() || !reading.value.is_finite() {
                continue;
            }
            if !window.contains(reading.timestamp_ms) {
                continue;
            }
            let index = ((reading.timestamp_ms - window.start_ms) / bucket_ms) as usize;
            if let Some(bucket) = per_bucket.get_mut(index) {
                bucket.push(reading);
            }
        }

        let observed: Vec<Option<f64>> = per_bucket.iter().map(|r| Self::mean(r)).collect();
        let mut buckets: Vec<Bucket> = observed
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let start_ms = window.start_ms + i as u64 * bucket_ms;
                match value {
                    Some(v) => Bucket {
                        start_ms,
                        value: Some(*v),
                        quality: Quality::Ok,
                    },
                    None => Bucket::missing(start_ms),
                }
            })
            .collect();

        let gaps = self.fill_gaps(sensor_id, &observed, &mut buckets);

        ResampledSeries {
            sensor_id: sensor_id.to_string(),
            window,
            bucket_ms,
            buckets,
            gaps,
        }
    }

    /// Bucket mean. Time-weighted when every reading declares its sampling
    /// interval, equal weights otherwise.
    fn mean(readings: &[&SensorReading]) -> Option<f64> {
        if readings.is_empty() {
            return None;
        }

        let all_declared = readings
            .iter()
            .all(|r| r.sampling_interval_ms.is_some_and(|i| i > 0));

        let (sum, weight) = readings.iter().fold((0.0, 0.0), |(sum, weight), r| {
            let w = if all_declared {
                r.sampling_interval_ms.unwrap_or(1) as f64
            } else {
                1.0
            };
            (sum + r.value * w, weight + w)
        });

        Some(sum / weight)
    }

    fn fill_gaps(
        &self,
        sensor_id: &str,
        observed: &[Option<f64>],
        buckets: &mut [Bucket],
    ) -> Vec<EntropyError> {
        let mut gaps = Vec::new();
        let n = observed.len();
        let mut i = 0;

        while i < n {
            if observed[i].is_some() {
                i += 1;
                continue;
            }

            let start = i;
            while i < n && observed[i].is_none() {
                i += 1;
            }
            let len = i - start;

            let left = start.checked_sub(1).and_then(|l| observed[l].map(|v| (l, v)));
            let right = observed.get(i).copied().flatten().map(|v| (i, v));

            match (left, right) {
                (Some((l, v_l)), Some((r, v_r))) if len <= self.config.max_gap_buckets => {
                    let span = (r - l) as f64;
                    for (k, bucket) in buckets.iter_mut().enumerate().take(r).skip(start) {
                        let alpha = (k - l) as f64 / span;
                        bucket.value = Some(v_l + alpha * (v_r - v_l));
                        bucket.quality = Quality::Imputed;
                    }
                }
                _ => {
                    if len > self.config.max_gap_buckets {
                        warn!(
                            sensor = sensor_id,
                            start_bucket = start,
                            buckets = len,
                            "gap exceeded"
                        );
                        gaps.push(EntropyError::GapExceeded {
                            sensor: sensor_id.to_string(),
                            start_bucket: start,
                            buckets: len,
                        });
                    }
                }
            }
        }

        gaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resampler(max_gap: usize) -> Resampler {
        Resampler::new(ResampleConfig {
            bucket_ms: 1000,
            max_gap_buckets: max_gap,
        })
    }

    #[test]
    fn test_single_gap_interpolated() {
        let readings = vec![SensorReading::new(0, 10.0), SensorReading::new(2000, 20.0)];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 3000));

        assert_eq!(series.buckets.len(), 3);
        assert_eq!(series.buckets[1].quality, Quality::Imputed);
        assert!((series.buckets[1].value.unwrap() - 15.0).abs() < 1e-9);
        assert!(series.gaps.is_empty());
    }

    #[test]
    fn test_long_gap_left_missing() {
        let readings = vec![SensorReading::new(0, 10.0), SensorReading::new(6000, 20.0)];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 7000));

        assert_eq!(series.missing_count(), 5);
        assert_eq!(series.imputed_count(), 0);
        assert_eq!(
            series.gaps,
            vec![EntropyError::GapExceeded {
                sensor: "s1".to_string(),
                start_bucket: 1,
                buckets: 5,
            }]
        );
    }

    #[test]
    fn test_gap_at_maximum_is_interpolated() {
        let readings = vec![SensorReading::new(0, 0.0), SensorReading::new(4000, 40.0)];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 5000));
        let values: Vec<f64> = series.buckets.iter().map(|b| b.value.unwrap()).collect();
        assert_eq!(values, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_edge_gaps_not_extrapolated() {
        let readings = vec![SensorReading::new(1500, 5.0)];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 3000));
        assert_eq!(series.buckets[0].quality, Quality::Missing);
        assert_eq!(series.buckets[1].value, Some(5.0));
        assert_eq!(series.buckets[2].quality, Quality::Missing);
    }

    #[test]
    fn test_bucket_mean_equal_weights() {
        let readings = vec![
            SensorReading::new(100, 10.0),
            SensorReading::new(600, 20.0),
            SensorReading::new(900, 30.0),
        ];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 1000));
        assert!((series.buckets[0].value.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_bucket_mean_time_weighted() {
        let readings = vec![
            SensorReading::new(0, 10.0).with_interval(750),
            SensorReading::new(750, 30.0).with_interval(250),
        ];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 1000));
        assert!((series.buckets[0].value.unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_bad_readings_do_not_anchor() {
        let readings = vec![
            SensorReading::new(0, 10.0),
            SensorReading::new(1000, 999.0).with_quality(Quality::Suspect),
            SensorReading::new(2000, 20.0),
        ];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 3000));
        assert_eq!(series.buckets[1].quality, Quality::Imputed);
        assert!((series.buckets[1].value.unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_readings_outside_window_ignored() {
        let readings = vec![SensorReading::new(5000, 1.0), SensorReading::new(500, 2.0)];
        let series = resampler(3).resample("s1", &readings, TimeWindow::new(0, 2000));
        assert_eq!(series.buckets[0].value, Some(2.0));
        assert_eq!(series.buckets[1].value, None);
    }

    #[test]
    fn test_deterministic() {
        let readings = vec![SensorReading::new(0, 1.0), SensorReading::new(3000, 4.0)];
        let r = resampler(3);
        let a = r.resample("s1", &readings, TimeWindow::new(0, 4000));
        let b = r.resample("s1", &readings, TimeWindow::new(0, 4000));
        assert_eq!(a, b);
    }

    #[test]
    fn test_to_records_skips_missing() {
        let readings = vec![SensorReading::new(0, 10.0), SensorReading::new(2000, 20.0)];
        let series = resampler(0).resample("s1", &readings, TimeWindow::new(0, 3000));
        let spec = SensorSpec {
            sensor_id: "s1".to_string(),
            instance: "b1".into(),
            flow: crate::model::Flow::Energy,
            category: "power".to_string(),
            unit_code: "W".to_string(),
            sampling_interval_ms: None,
        };
        let records = series.to_records(&spec, "building_energy", "electricity", "W");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "s1@0");
        assert_eq!(records[1].id, "s1@2000");
    }

    #[test]
    fn test_power_buckets_become_energy() {
        // 1 kW for a 1.5 s window: one full bucket and a half bucket
        let readings = vec![SensorReading::new(0, 1000.0), SensorReading::new(1000, 1000.0)];
        let series = resampler(0).resample("s1", &readings, TimeWindow::new(0, 1500));
        let spec = SensorSpec {
            sensor_id: "s1".to_string(),
            instance: "b1".into(),
            flow: crate::model::Flow::Energy,
            category: "power".to_string(),
            unit_code: "kW".to_string(),
            sampling_interval_ms: None,
        };

        let records = series.to_records(&spec, "building_energy", "electricity", "W");
        assert_eq!(records[0].si_unit, "J");
        assert!((records[0].value - 1000.0).abs() < 1e-9);
        assert!((records[1].value - 500.0).abs() < 1e-9);
        assert_eq!(records[0].taxonomy, "building_energy");
        assert_eq!(ResampledSeries::record_unit("W"), "J");

        let counts = series.to_records(&spec, "occupancy", "people", "count");
        assert_eq!(counts[0].si_unit, "count");
        assert_eq!(counts[0].value, 1000.0);
    }
}
