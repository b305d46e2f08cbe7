// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scale containment hierarchy.
//!
//! Instances live in an arena addressed by index, with parent/child links
//! stored as indices. A node may be linked under more than one parent; that
//! is legal to build but makes every strict ancestor ambiguous, because the
//! node's records could be attributed along several root paths.

use crate::error::{EntropyError, Result};
use crate::model::{Scale, ScaleInstanceId};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

#[derive(Debug, Clone)]
struct ScaleNode {
    id: ScaleInstanceId,
    scale: Scale,
    parents: Vec<usize>,
    children: Vec<usize>,
}

/// Arena of scale instances.
#[derive(Debug, Clone, Default)]
pub struct ScaleHierarchy {
    nodes: Vec<ScaleNode>,
    index: HashMap<ScaleInstanceId, usize>,
}

impl ScaleHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance, optionally under a parent of the containing scale.
    pub fn add_instance(
        &mut self,
        id: impl Into<ScaleInstanceId>,
        scale: Scale,
        parent: Option<&ScaleInstanceId>,
    ) -> Result<()> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(EntropyError::InvalidHierarchy(format!(
                "duplicate instance {}",
                id
            )));
        }

        let parent_idx = match parent {
            Some(parent) => Some(self.checked_parent(scale, parent)?),
            None => None,
        };

        let idx = self.nodes.len();
        self.nodes.push(ScaleNode {
            id: id.clone(),
            scale,
            parents: parent_idx.into_iter().collect(),
            children: Vec::new(),
        });
        self.index.insert(id, idx);
        if let Some(p) = parent_idx {
            self.nodes[p].children.push(idx);
        }
        Ok(())
    }

    /// Link an existing instance under an additional parent.
    pub fn link(&mut self, child: &ScaleInstanceId, parent: &ScaleInstanceId) -> Result<()> {
        let child_idx = self.idx(child)?;
        let scale = self.nodes[child_idx].scale;
        let parent_idx = self.checked_parent(scale, parent)?;
        if self.nodes[child_idx].parents.contains(&parent_idx) {
            return Ok(());
        }
        self.nodes[child_idx].parents.push(parent_idx);
        self.nodes[parent_idx].children.push(child_idx);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ScaleInstanceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn scale(&self, id: &ScaleInstanceId) -> Option<Scale> {
        self.index.get(id).map(|i| self.nodes[*i].scale)
    }

    pub fn parents(&self, id: &ScaleInstanceId) -> Vec<ScaleInstanceId> {
        self.ids_of(id, |n| &n.parents)
    }

    pub fn children(&self, id: &ScaleInstanceId) -> Vec<ScaleInstanceId> {
        self.ids_of(id, |n| &n.children)
    }

    /// Unique path from `id` up to its root, `id` first.
    ///
    /// Fails with `HierarchyAmbiguity` at the first node on the way up that
    /// has more than one parent.
    pub fn path_to_root(&self, id: &ScaleInstanceId) -> Result<Vec<ScaleInstanceId>> {
        let mut idx = self.idx(id)?;
        let mut path = vec![self.nodes[idx].id.clone()];
        loop {
            let node = &self.nodes[idx];
            match node.parents.as_slice() {
                [] => return Ok(path),
                [parent] => {
                    idx = *parent;
                    path.push(self.nodes[idx].id.clone());
                }
                parents => {
                    return Err(EntropyError::HierarchyAmbiguity {
                        instance: node.id.clone(),
                        parents: parents.len(),
                    })
                }
            }
        }
    }

    /// All instances below `id`, breadth-first, each listed once.
    pub fn descendants(&self, id: &ScaleInstanceId) -> Vec<ScaleInstanceId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<usize> = self.nodes[start].children.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            if !seen.insert(idx) {
                continue;
            }
            out.push(self.nodes[idx].id.clone());
            queue.extend(self.nodes[idx].children.iter().copied());
        }
        out
    }

    /// `id` and everything below it.
    pub fn subtree(&self, id: &ScaleInstanceId) -> Vec<ScaleInstanceId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut out = vec![id.clone()];
        out.extend(self.descendants(id));
        out
    }

    /// Instances grouped by scale level, leaves first. Ids are sorted within
    /// a level so scheduling is deterministic.
    pub fn levels(&self) -> Vec<Vec<ScaleInstanceId>> {
        let mut by_level: BTreeMap<u8, Vec<ScaleInstanceId>> = BTreeMap::new();
        for node in &self.nodes {
            by_level
                .entry(node.scale.level())
                .or_default()
                .push(node.id.clone());
        }
        by_level
            .into_values()
            .map(|mut ids| {
                ids.sort();
                ids
            })
            .collect()
    }

    /// Every strict ancestor of a multi-parent node, mapped to the
    /// ambiguity that poisons it.
    pub fn ambiguous_ancestors(&self) -> BTreeMap<ScaleInstanceId, EntropyError> {
        let mut out = BTreeMap::new();
        for node in self.nodes.iter().filter(|n| n.parents.len() > 1) {
            let error = EntropyError::HierarchyAmbiguity {
                instance: node.id.clone(),
                parents: node.parents.len(),
            };
            let mut queue: VecDeque<usize> = node.parents.iter().copied().collect();
            while let Some(idx) = queue.pop_front() {
                let ancestor = &self.nodes[idx];
                if out.contains_key(&ancestor.id) {
                    continue;
                }
                out.insert(ancestor.id.clone(), error.clone());
                queue.extend(ancestor.parents.iter().copied());
            }
        }
        out
    }

    fn idx(&self, id: &ScaleInstanceId) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| EntropyError::InvalidHierarchy(format!("unknown instance {}", id)))
    }

    fn checked_parent(&self, scale: Scale, parent: &ScaleInstanceId) -> Result<usize> {
        let parent_idx = self.idx(parent)?;
        let parent_scale = self.nodes[parent_idx].scale;
        if scale.parent_scale() != Some(parent_scale) {
            return Err(EntropyError::InvalidHierarchy(format!(
                "{} cannot be contained in {} {}",
                scale, parent_scale, parent
            )));
        }
        Ok(parent_idx)
    }

    fn ids_of(
        &self,
        id: &ScaleInstanceId,
        links: impl Fn(&ScaleNode) -> &Vec<usize>,
    ) -> Vec<ScaleInstanceId> {
        self.index
            .get(id)
            .map(|i| {
                links(&self.nodes[*i])
                    .iter()
                    .map(|j| self.nodes[*j].id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ScaleInstanceId {
        ScaleInstanceId::new(s)
    }

    fn congress() -> ScaleHierarchy {
        let mut h = ScaleHierarchy::new();
        h.add_instance("c1", Scale::Congress, None).unwrap();
        h.add_instance("e1", Scale::Event, Some(&id("c1"))).unwrap();
        h.add_instance("e2", Scale::Event, Some(&id("c1"))).unwrap();
        h.add_instance("p1", Scale::Participant, Some(&id("e1"))).unwrap();
        h.add_instance("p2", Scale::Participant, Some(&id("e2"))).unwrap();
        h
    }

    #[test]
    fn test_path_to_root() {
        let h = congress();
        assert_eq!(
            h.path_to_root(&id("p1")).unwrap(),
            vec![id("p1"), id("e1"), id("c1")]
        );
        assert_eq!(h.path_to_root(&id("c1")).unwrap(), vec![id("c1")]);
    }

    #[test]
    fn test_scale_containment_enforced() {
        let mut h = congress();
        let err = h.add_instance("p3", Scale::Participant, Some(&id("c1")));
        assert!(matches!(err, Err(EntropyError::InvalidHierarchy(_))));

        h.add_instance("city", Scale::City, None).unwrap();
        assert!(h.add_instance("b1", Scale::Building, Some(&id("city"))).is_ok());
        assert!(h.link(&id("b1"), &id("e1")).is_err());
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        let mut h = congress();
        assert!(h.add_instance("p1", Scale::Participant, Some(&id("e1"))).is_err());
        assert!(h.add_instance("p9", Scale::Participant, Some(&id("nope"))).is_err());
    }

    #[test]
    fn test_levels_bottom_up() {
        let h = congress();
        let levels = h.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec![id("p1"), id("p2")]);
        assert_eq!(levels[1], vec![id("e1"), id("e2")]);
        assert_eq!(levels[2], vec![id("c1")]);
    }

    #[test]
    fn test_descendants_and_subtree() {
        let h = congress();
        let mut below: Vec<_> = h.descendants(&id("c1"));
        below.sort();
        assert_eq!(below, vec![id("e1"), id("e2"), id("p1"), id("p2")]);
        assert_eq!(h.subtree(&id("e1")), vec![id("e1"), id("p1")]);
        assert!(h.descendants(&id("p1")).is_empty());
    }

    #[test]
    fn test_multi_parent_is_ambiguous() {
        let mut h = congress();
        h.link(&id("p1"), &id("e2")).unwrap();

        assert!(matches!(
            h.path_to_root(&id("p1")),
            Err(EntropyError::HierarchyAmbiguity { parents: 2, .. })
        ));

        let ambiguous = h.ambiguous_ancestors();
        let keys: Vec<_> = ambiguous.keys().cloned().collect();
        assert_eq!(keys, vec![id("c1"), id("e1"), id("e2")]);
        // The shared node's own cell is not poisoned
        assert!(!ambiguous.contains_key(&id("p1")));
        // Descendants are deduplicated
        assert_eq!(
            h.descendants(&id("c1")).iter().filter(|d| **d == id("p1")).count(),
            1
        );
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut h = congress();
        h.link(&id("p1"), &id("e1")).unwrap();
        assert_eq!(h.parents(&id("p1")), vec![id("e1")]);
        assert!(h.ambiguous_ancestors().is_empty());
    }
}
