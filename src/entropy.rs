// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Normalized Shannon entropy over category distributions.

use crate::config::{EntropyConfig, LogBase};
use crate::distribution::Distribution;
use crate::error::{EntropyError, Result};
use crate::model::Flow;
use serde::{Deserialize, Serialize};

/// Entropy statistics for one distribution.
///
/// Entropy fields are `None` when the distribution carries no mass: an
/// empty cell is an absence of activity, not a concentrated one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyStats {
    /// H in the configured log base.
    pub raw: Option<f64>,
    /// H / ln(n), in [0, 1].
    pub normalized: Option<f64>,
    /// exp(H) in nats, the "species count" reading.
    pub effective_categories: Option<f64>,
    /// Category with the largest weight; lexical order breaks ties.
    pub dominant_category: Option<String>,
    pub total_mass: f64,
    /// Declared categories (n).
    pub cardinality: usize,
}

impl EntropyStats {
    pub fn is_null(&self) -> bool {
        self.normalized.is_none()
    }
}

/// Shannon entropy calculator.
#[derive(Debug, Clone, Default)]
pub struct EntropyCalculator {
    log_base: LogBase,
}

impl EntropyCalculator {
    pub fn new(config: EntropyConfig) -> Self {
        Self {
            log_base: config.log_base,
        }
    }

    pub fn log_base(&self) -> LogBase {
        self.log_base
    }

    /// Compute entropy statistics for a distribution of `flow`.
    pub fn compute(&self, flow: Flow, distribution: &Distribution) -> Result<EntropyStats> {
        let n = distribution.cardinality();
        if n == 0 {
            return Err(EntropyError::InsufficientTaxonomy { flow, declared: 0 });
        }

        let total_mass = distribution.total_mass();
        if total_mass <= 0.0 || !total_mass.is_finite() {
            return Ok(EntropyStats {
                raw: None,
                normalized: None,
                effective_categories: None,
                dominant_category: None,
                total_mass: 0.0,
                cardinality: n,
            });
        }

        // 0·ln(0) ≡ 0: zero-weight categories are never evaluated
        let h_nats: f64 = distribution
            .weights()
            .values()
            .filter(|w| **w > 0.0)
            .map(|w| {
                let p = w / total_mass;
                -p * p.ln()
            })
            .sum();
        // Rounding can leave -0.0 or a tiny negative for concentrated mass
        let h_nats = if h_nats <= 0.0 { 0.0 } else { h_nats };

        let normalized = if n < 2 {
            0.0
        } else {
            (h_nats / (n as f64).ln()).clamp(0.0, 1.0)
        };

        Ok(EntropyStats {
            raw: Some(self.log_base.from_nats(h_nats)),
            normalized: Some(normalized),
            effective_categories: Some(h_nats.exp()),
            dominant_category: Self::dominant(distribution),
            total_mass,
            cardinality: n,
        })
    }

    fn dominant(distribution: &Distribution) -> Option<String> {
        // BTreeMap iterates in lexical order; strict `>` keeps the first of ties
        let mut best: Option<(&String, f64)> = None;
        for (category, weight) in distribution.weights() {
            if *weight <= 0.0 {
                continue;
            }
            match best {
                Some((_, w)) if *weight <= w => {}
                _ => best = Some((category, *weight)),
            }
        }
        best.map(|(c, _)| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn calc() -> EntropyCalculator {
        EntropyCalculator::new(EntropyConfig::default())
    }

    fn uniform(n: usize) -> Distribution {
        let weights: Vec<(String, f64)> = (0..n).map(|i| (format!("c{:02}", i), 3.0)).collect();
        Distribution::from_weights(&weights)
    }

    #[test]
    fn test_uniform_is_one_for_any_n() {
        for n in [2, 3, 10] {
            let stats = calc().compute(Flow::Material, &uniform(n)).unwrap();
            assert_relative_eq!(stats.normalized.unwrap(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(stats.effective_categories.unwrap(), n as f64, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_concentrated_is_zero() {
        let dist = Distribution::from_weights(&[("a", 5.0), ("b", 0.0), ("c", 0.0)]);
        let stats = calc().compute(Flow::Energy, &dist).unwrap();
        assert_eq!(stats.normalized, Some(0.0));
        assert_eq!(stats.raw, Some(0.0));
        assert_relative_eq!(stats.effective_categories.unwrap(), 1.0);
        assert_eq!(stats.dominant_category.as_deref(), Some("a"));
    }

    #[test]
    fn test_zero_mass_is_null() {
        let dist = Distribution::from_weights(&[("a", 0.0), ("b", 0.0)]);
        let stats = calc().compute(Flow::Information, &dist).unwrap();
        assert!(stats.is_null());
        assert_eq!(stats.raw, None);
        assert_eq!(stats.effective_categories, None);
        assert_eq!(stats.dominant_category, None);
        assert_eq!(stats.total_mass, 0.0);
        assert_eq!(stats.cardinality, 2);
    }

    #[test]
    fn test_single_category_taxonomy() {
        let dist = Distribution::from_weights(&[("only", 4.0)]);
        let stats = calc().compute(Flow::Material, &dist).unwrap();
        assert_eq!(stats.normalized, Some(0.0));
    }

    #[test]
    fn test_empty_taxonomy_rejected() {
        let dist = Distribution::from_weights::<&str>(&[]);
        assert!(matches!(
            calc().compute(Flow::Material, &dist),
            Err(EntropyError::InsufficientTaxonomy { declared: 0, .. })
        ));
    }

    #[test]
    fn test_dominant_tie_break_is_lexical() {
        let dist = Distribution::from_weights(&[("walk", 2.0), ("bus", 2.0), ("car", 1.0)]);
        let stats = calc().compute(Flow::Material, &dist).unwrap();
        assert_eq!(stats.dominant_category.as_deref(), Some("bus"));
    }

    #[test]
    fn test_log_base_two() {
        let calc = EntropyCalculator::new(EntropyConfig {
            log_base: LogBase::Two,
        });
        let stats = calc
            .compute(Flow::Material, &Distribution::from_weights(&[("a", 1.0), ("b", 1.0)]))
            .unwrap();
        assert_relative_eq!(stats.raw.unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(stats.normalized.unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_skewed_between_bounds() {
        let dist = Distribution::from_weights(&[("a", 8.0), ("b", 1.0), ("c", 1.0)]);
        let h = calc().compute(Flow::Material, &dist).unwrap().normalized.unwrap();
        assert!(h > 0.0 && h < 1.0);
    }
}
