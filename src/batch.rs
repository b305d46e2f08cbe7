// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ingestion batches and the per-cell status table.
//!
//! Each (batch, cell) pair walks `pending → computed → superseded | failed`.
//! The table is shared by every concurrent cell of a run; transitions are
//! compare-and-swap under the entry's shard lock, so no update is lost.
//!
//! A cell only counts as `computed` once its metrics were committed. The
//! fingerprint stored with it is the one of those committed inputs, and it
//! survives a later failure: a failed recomputation never touches the sink.

use crate::error::{EntropyError, Result};
use crate::fingerprint::Fingerprint;
use crate::metric::CellKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Overall status of an ingestion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Partial,
    Complete,
    Failed,
}

impl BatchStatus {
    /// Status of a finished run.
    pub fn from_counts(total: usize, failed: usize, cancelled: bool) -> Self {
        if total > 0 && failed == total {
            BatchStatus::Failed
        } else if failed > 0 || cancelled {
            BatchStatus::Partial
        } else {
            BatchStatus::Complete
        }
    }
}

/// A tracked unit of source data processed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionBatch {
    pub id: String,
    pub status: BatchStatus,
    /// Source rows (curated rows plus sensor readings) seen by the last run.
    pub row_count: usize,
}

impl IngestionBatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: BatchStatus::Pending,
            row_count: 0,
        }
    }
}

/// A cell that failed during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCell {
    pub cell: CellKey,
    /// Short error kind, e.g. `hierarchy_ambiguity`.
    pub kind: String,
    pub message: String,
}

/// Status update emitted once per batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub rows_processed: usize,
    pub rows_excluded: usize,
    pub cells_total: usize,
    /// Cells whose metrics were written this run.
    pub cells_written: usize,
    /// Cells skipped on a fingerprint match.
    pub cells_skipped: usize,
    pub cells_failed: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub notes: Vec<String>,
    pub failed_cells: Vec<FailedCell>,
}

/// Per-cell state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Pending,
    Computed,
    Superseded,
    Failed,
}

impl CellStatus {
    pub fn can_transition(&self, to: CellStatus) -> bool {
        use CellStatus::*;
        matches!(
            (self, to),
            (Pending, Computed)
                | (Pending, Failed)
                | (Computed, Superseded)
                | (Superseded, Computed)
                | (Superseded, Failed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CellStatus::Pending => "pending",
            CellStatus::Computed => "computed",
            CellStatus::Superseded => "superseded",
            CellStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status plus the fingerprint of the last committed inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub status: CellStatus,
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CellState {
    fn pending() -> Self {
        Self {
            status: CellStatus::Pending,
            fingerprint: None,
            error: None,
        }
    }
}

/// What to do with a cell whose inputs have been fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Committed metrics already reflect these inputs.
    Skip,
    /// Compute and commit.
    Compute,
}

#[derive(Debug, Serialize, Deserialize)]
struct CellRecord {
    batch: String,
    cell: CellKey,
    state: CellState,
}

/// Concurrent cell-status table.
#[derive(Debug, Default)]
pub struct BatchCoordinator {
    cells: DashMap<(String, CellKey), CellState>,
}

impl BatchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Register a cell as `pending` unless it is already tracked.
    pub fn register(&self, batch: &str, cell: &CellKey) -> CellStatus {
        self.cells
            .entry(Self::key(batch, cell))
            .or_insert_with(CellState::pending)
            .status
    }

    pub fn state(&self, batch: &str, cell: &CellKey) -> Option<CellState> {
        self.cells.get(&Self::key(batch, cell)).map(|s| s.clone())
    }

    pub fn status(&self, batch: &str, cell: &CellKey) -> Option<CellStatus> {
        self.cells.get(&Self::key(batch, cell)).map(|s| s.status)
    }

    /// Compare-and-swap status transition.
    ///
    /// Returns the observed status on mismatch or on a transition the state
    /// machine does not allow.
    pub fn transition(
        &self,
        batch: &str,
        cell: &CellKey,
        from: CellStatus,
        to: CellStatus,
    ) -> std::result::Result<(), Option<CellStatus>> {
        let Some(mut state) = self.cells.get_mut(&Self::key(batch, cell)) else {
            return Err(None);
        };
        if state.status != from || !from.can_transition(to) {
            return Err(Some(state.status));
        }
        state.status = to;
        Ok(())
    }

    /// Decide whether a cell must be computed for `fingerprint`.
    ///
    /// A `computed` cell with matching fingerprint is skipped. A `computed`
    /// cell with different inputs is moved to `superseded`; a `failed` one
    /// back to `pending`.
    pub fn decide(&self, batch: &str, cell: &CellKey, fingerprint: Fingerprint) -> Decision {
        let mut state = self
            .cells
            .entry(Self::key(batch, cell))
            .or_insert_with(CellState::pending);

        match state.status {
            CellStatus::Computed if state.fingerprint == Some(fingerprint) => Decision::Skip,
            CellStatus::Computed => {
                debug!(cell = %cell, "inputs changed, superseding");
                state.status = CellStatus::Superseded;
                Decision::Compute
            }
            CellStatus::Failed => {
                state.status = CellStatus::Pending;
                state.error = None;
                Decision::Compute
            }
            CellStatus::Pending | CellStatus::Superseded => Decision::Compute,
        }
    }

    /// Record a successful commit.
    pub fn mark_computed(
        &self,
        batch: &str,
        cell: &CellKey,
        fingerprint: Fingerprint,
    ) -> Result<()> {
        let mut state = self
            .cells
            .get_mut(&Self::key(batch, cell))
            .ok_or_else(|| Self::untracked(batch, cell))?;
        if !state.status.can_transition(CellStatus::Computed) {
            return Err(EntropyError::InvalidTransition(format!(
                "cell {} cannot move from {} to computed",
                cell, state.status
            )));
        }
        state.status = CellStatus::Computed;
        state.fingerprint = Some(fingerprint);
        state.error = None;
        Ok(())
    }

    /// Record a failure. The last committed fingerprint is kept.
    pub fn mark_failed(&self, batch: &str, cell: &CellKey, error: &EntropyError) -> Result<()> {
        let mut state = self
            .cells
            .entry(Self::key(batch, cell))
            .or_insert_with(CellState::pending);
        if state.status == CellStatus::Computed {
            state.status = CellStatus::Superseded;
        }
        if state.status != CellStatus::Failed && !state.status.can_transition(CellStatus::Failed) {
            return Err(EntropyError::InvalidTransition(format!(
                "cell {} cannot move from {} to failed",
                cell, state.status
            )));
        }
        state.status = CellStatus::Failed;
        state.error = Some(error.to_string());
        Ok(())
    }

    /// Cells of `batch` currently `failed`, sorted.
    pub fn failed_cells(&self, batch: &str) -> Vec<CellKey> {
        self.cells_with(batch, |s| s.status == CellStatus::Failed)
    }

    /// Every tracked cell of `batch`, sorted.
    pub fn cells(&self, batch: &str) -> Vec<CellKey> {
        self.cells_with(batch, |_| true)
    }

    /// Serialize the table for persistence across restarts.
    pub fn export_state(&self) -> Result<String> {
        let mut records: Vec<CellRecord> = self
            .cells
            .iter()
            .map(|entry| CellRecord {
                batch: entry.key().0.clone(),
                cell: entry.key().1.clone(),
                state: entry.value().clone(),
            })
            .collect();
        records.sort_by(|a, b| (&a.batch, &a.cell).cmp(&(&b.batch, &b.cell)));
        Ok(serde_json::to_string(&records)?)
    }

    /// Load a previously exported table, replacing tracked entries with the
    /// same key. Returns the number of cells loaded.
    pub fn import_state(&self, json: &str) -> Result<usize> {
        let records: Vec<CellRecord> = serde_json::from_str(json)?;
        let count = records.len();
        for record in records {
            self.cells.insert((record.batch, record.cell), record.state);
        }
        Ok(count)
    }

    fn cells_with(&self, batch: &str, keep: impl Fn(&CellState) -> bool) -> Vec<CellKey> {
        let mut cells: Vec<CellKey> = self
            .cells
            .iter()
            .filter(|entry| entry.key().0 == batch && keep(entry.value()))
            .map(|entry| entry.key().1.clone())
            .collect();
        cells.sort();
        cells
    }

    fn key(batch: &str, cell: &CellKey) -> (String, CellKey) {
        (batch.to_string(), cell.clone())
    }

    fn untracked(batch: &str, cell: &CellKey) -> EntropyError {
        EntropyError::InvalidTransition(format!("cell {} not tracked in batch {}", cell, batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Flow, Scale, ScaleInstanceId, TimeWindow};
    use std::sync::Arc;

    fn cell(instance: &str) -> CellKey {
        CellKey::new(
            Scale::Event,
            ScaleInstanceId::new(instance),
            Flow::Energy,
            "building_energy",
            TimeWindow::new(0, 10),
        )
    }

    fn fp(v: u64) -> Fingerprint {
        Fingerprint::from_u64(v)
    }

    #[test]
    fn test_skip_on_matching_fingerprint() {
        let coord = BatchCoordinator::new();
        let c = cell("e1");
        assert_eq!(coord.register("b1", &c), CellStatus::Pending);
        assert_eq!(coord.decide("b1", &c, fp(1)), Decision::Compute);
        coord.mark_computed("b1", &c, fp(1)).unwrap();

        assert_eq!(coord.decide("b1", &c, fp(1)), Decision::Skip);
        assert_eq!(coord.status("b1", &c), Some(CellStatus::Computed));
    }

    #[test]
    fn test_changed_inputs_supersede() {
        let coord = BatchCoordinator::new();
        let c = cell("e1");
        coord.register("b1", &c);
        coord.mark_computed("b1", &c, fp(1)).unwrap();

        assert_eq!(coord.decide("b1", &c, fp(2)), Decision::Compute);
        assert_eq!(coord.status("b1", &c), Some(CellStatus::Superseded));
        coord.mark_computed("b1", &c, fp(2)).unwrap();
        assert_eq!(coord.state("b1", &c).unwrap().fingerprint, Some(fp(2)));
    }

    #[test]
    fn test_failure_keeps_committed_fingerprint() {
        let coord = BatchCoordinator::new();
        let c = cell("e1");
        coord.register("b1", &c);
        coord.mark_computed("b1", &c, fp(7)).unwrap();
        coord.decide("b1", &c, fp(8));

        let err = EntropyError::InsufficientTaxonomy {
            flow: Flow::Energy,
            declared: 0,
        };
        coord.mark_failed("b1", &c, &err).unwrap();

        let state = coord.state("b1", &c).unwrap();
        assert_eq!(state.status, CellStatus::Failed);
        assert_eq!(state.fingerprint, Some(fp(7)));
        assert_eq!(coord.failed_cells("b1"), vec![c.clone()]);

        // Retry moves it back through pending
        assert_eq!(coord.decide("b1", &c, fp(8)), Decision::Compute);
        assert_eq!(coord.status("b1", &c), Some(CellStatus::Pending));
    }

    #[test]
    fn test_cas_transition() {
        let coord = BatchCoordinator::new();
        let c = cell("e1");
        coord.register("b1", &c);

        assert_eq!(
            coord.transition("b1", &c, CellStatus::Computed, CellStatus::Superseded),
            Err(Some(CellStatus::Pending))
        );
        assert!(coord
            .transition("b1", &c, CellStatus::Pending, CellStatus::Computed)
            .is_ok());
        // Not an allowed edge
        assert!(coord
            .transition("b1", &c, CellStatus::Computed, CellStatus::Pending)
            .is_err());
        assert_eq!(
            coord.transition("b1", &cell("nope"), CellStatus::Pending, CellStatus::Computed),
            Err(None)
        );
    }

    #[test]
    fn test_concurrent_transitions_single_winner() {
        let coord = Arc::new(BatchCoordinator::new());
        let c = cell("e1");
        coord.register("b1", &c);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coord = Arc::clone(&coord);
                let c = c.clone();
                std::thread::spawn(move || {
                    coord
                        .transition("b1", &c, CellStatus::Pending, CellStatus::Computed)
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_batches_are_isolated() {
        let coord = BatchCoordinator::new();
        let c = cell("e1");
        coord.register("b1", &c);
        coord.mark_computed("b1", &c, fp(1)).unwrap();
        assert_eq!(coord.decide("b2", &c, fp(1)), Decision::Compute);
        assert_eq!(coord.cells("b1"), vec![c.clone()]);
        assert_eq!(coord.cells("b2"), vec![c]);
    }

    #[test]
    fn test_state_export_import() {
        let coord = BatchCoordinator::new();
        let c = cell("e1");
        coord.register("b1", &c);
        coord.mark_computed("b1", &c, fp(42)).unwrap();

        let json = coord.export_state().unwrap();
        let restored = BatchCoordinator::new();
        assert_eq!(restored.import_state(&json).unwrap(), 1);
        assert_eq!(restored.decide("b1", &c, fp(42)), Decision::Skip);
    }

    #[test]
    fn test_batch_status_from_counts() {
        assert_eq!(BatchStatus::from_counts(4, 0, false), BatchStatus::Complete);
        assert_eq!(BatchStatus::from_counts(4, 1, false), BatchStatus::Partial);
        assert_eq!(BatchStatus::from_counts(4, 4, false), BatchStatus::Failed);
        assert_eq!(BatchStatus::from_counts(4, 0, true), BatchStatus::Partial);
        assert_eq!(BatchStatus::from_counts(0, 0, false), BatchStatus::Complete);
    }
}
