// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Parent-scale distributions.
//!
//! Parents never average child entropies. Either the subtree's records are
//! pooled and the distribution rebuilt, or child distributions are summed
//! per category. Both paths refuse a subtree in which some node has more
//! than one parent, since its records would be counted along two paths.

use crate::config::DistributionConfig;
use crate::distribution::{CellDistribution, DistributionBuilder};
use crate::error::{EntropyError, Result};
use crate::hierarchy::ScaleHierarchy;
use crate::model::{QuantityRecord, ScaleInstanceId};
use crate::taxonomy::Taxonomy;
use crate::units::ExcludedRow;
use std::collections::HashMap;

/// Records and exclusions attached directly to one instance, for one
/// (flow, taxonomy, window).
#[derive(Debug, Clone, Default)]
pub struct InstanceInputs {
    pub records: Vec<QuantityRecord>,
    pub excluded: Vec<ExcludedRow>,
}

/// Direct inputs of every instance, for one (flow, taxonomy, window).
pub type CellInputs = HashMap<ScaleInstanceId, InstanceInputs>;

/// Builds parent distributions from the hierarchy below them.
#[derive(Debug, Clone)]
pub struct ScaleAggregator {
    builder: DistributionBuilder,
}

impl ScaleAggregator {
    pub fn new(config: DistributionConfig) -> Self {
        Self {
            builder: DistributionBuilder::new(config),
        }
    }

    /// `parent` and its descendants, provided every descendant has exactly
    /// one parent.
    pub fn attributed_subtree(
        hierarchy: &ScaleHierarchy,
        parent: &ScaleInstanceId,
    ) -> Result<Vec<ScaleInstanceId>> {
        let subtree = hierarchy.subtree(parent);
        for member in subtree.iter().skip(1) {
            let parents = hierarchy.parents(member).len();
            if parents > 1 {
                return Err(EntropyError::HierarchyAmbiguity {
                    instance: member.clone(),
                    parents,
                });
            }
        }
        Ok(subtree)
    }

    /// Rebuild the distribution over the pooled records of the subtree.
    pub fn pooled(
        &self,
        taxonomy: &Taxonomy,
        hierarchy: &ScaleHierarchy,
        parent: &ScaleInstanceId,
        inputs: &CellInputs,
    ) -> Result<CellDistribution> {
        let members = Self::attributed_subtree(hierarchy, parent)?;
        let direct: Vec<&InstanceInputs> = members.iter().filter_map(|m| inputs.get(m)).collect();

        self.builder.build(
            taxonomy,
            direct.iter().flat_map(|i| i.records.iter()),
            direct.iter().flat_map(|i| i.excluded.iter()),
        )
    }

    /// Sum the computed distributions of `parent`'s direct children, plus
    /// any records attached to `parent` itself.
    ///
    /// A child without a computed distribution fails the parent with
    /// `StaleAggregationInput`.
    pub fn combine(
        &self,
        taxonomy: &Taxonomy,
        hierarchy: &ScaleHierarchy,
        parent: &ScaleInstanceId,
        own: Option<&InstanceInputs>,
        computed: &HashMap<ScaleInstanceId, CellDistribution>,
    ) -> Result<CellDistribution> {
        Self::attributed_subtree(hierarchy, parent)?;

        let mut children = Vec::new();
        for child in hierarchy.children(parent) {
            match computed.get(&child) {
                Some(cell) => children.push(cell),
                None => {
                    return Err(EntropyError::StaleAggregationInput {
                        parent: parent.clone(),
                        child,
                    })
                }
            }
        }

        let own = self.builder.build(
            taxonomy,
            own.into_iter().flat_map(|i| i.records.iter()),
            own.into_iter().flat_map(|i| i.excluded.iter()),
        )?;

        self.builder
            .combine(taxonomy, std::iter::once(&own).chain(children))
    }
}
