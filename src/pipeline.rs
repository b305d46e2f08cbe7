// Entropic - Entropy metrics for multi-scale resource flows
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Batch orchestration.
//!
//! A run normalizes the batch's rows, resamples its sensors, then walks the
//! hierarchy level by level, leaves first. Cells of one level are
//! independent: they run on the blocking pool, bounded by a semaphore of
//! `batch.max_concurrency` permits. A level starts only once the previous
//! one has fully joined, so parents always see their children's results.
//!
//! Nothing reaches the sink until a cell has been completely computed, and
//! each cell is committed with a single `upsert_cell` call.

use crate::aggregate::{CellInputs, InstanceInputs, ScaleAggregator};
use crate::batch::{
    BatchCoordinator, BatchReport, BatchStatus, Decision, FailedCell, IngestionBatch,
};
use crate::config::{AggregationPolicy, PipelineConfig};
use crate::distribution::CellDistribution;
use crate::entropy::{EntropyCalculator, EntropyStats};
use crate::error::{EntropyError, Result};
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::hierarchy::ScaleHierarchy;
use crate::metric::{CellKey, CellOutcome, MetricSink};
use crate::model::{Flow, QuantityRow, ScaleInstanceId, SensorReading, TimeWindow};
use crate::resample::{ResampledSeries, Resampler};
use crate::taxonomy::ReferenceData;
use crate::units::{normalize_rows, ExcludedRow, ExclusionReason};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Shared cancellation flag, checked before each cell starts and again
/// before it commits.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Source data of one batch, as read from the curated store.
#[derive(Debug, Clone)]
pub struct BatchInput {
    /// Survey, trip and consumption rows.
    pub rows: Vec<QuantityRow>,
    /// Raw readings by sensor id.
    pub readings: HashMap<String, Vec<SensorReading>>,
    /// Instant stamped on every metric of the run.
    pub as_of: DateTime<Utc>,
}

impl BatchInput {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            rows: Vec::new(),
            readings: HashMap::new(),
            as_of,
        }
    }

    pub fn with_rows(mut self, rows: Vec<QuantityRow>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_readings(mut self, sensor_id: &str, readings: Vec<SensorReading>) -> Self {
        self.readings.insert(sensor_id.to_string(), readings);
        self
    }

    /// Curated rows plus raw sensor readings.
    pub fn row_count(&self) -> usize {
        self.rows.len() + self.readings.values().map(Vec::len).sum::<usize>()
    }
}

/// (flow, taxonomy name, window) a record is routed to.
type SeriesWindow = (Flow, String, TimeWindow);

/// Inputs routed to cells, ready for computation.
#[derive(Debug, Default)]
struct Prepared {
    inputs: HashMap<SeriesWindow, CellInputs>,
    gaps: HashMap<(ScaleInstanceId, SeriesWindow), usize>,
    rows_excluded: usize,
    notes: Vec<String>,
}

/// Result of a successful (written or skipped) cell, visible to parents.
#[derive(Debug, Clone)]
struct CellResult {
    distribution: CellDistribution,
    fingerprint: Fingerprint,
}

struct CellWork {
    distribution: CellDistribution,
    stats: EntropyStats,
    fingerprint: Fingerprint,
    children: Vec<ScaleInstanceId>,
    gaps: usize,
}

enum Outcome {
    Written(CellResult),
    Skipped(CellResult),
    Cancelled,
    Failed(EntropyError),
}

/// Read-only state shared by every cell of a run.
struct BatchContext {
    batch_id: String,
    as_of: DateTime<Utc>,
    /// Settings that shape metric values, folded into every fingerprint.
    policy_tag: String,
    config: PipelineConfig,
    reference: Arc<ReferenceData>,
    hierarchy: Arc<ScaleHierarchy>,
    sink: Arc<dyn MetricSink>,
    coordinator: Arc<BatchCoordinator>,
    aggregator: ScaleAggregator,
    calculator: EntropyCalculator,
    prepared: Prepared,
    ambiguous: BTreeMap<ScaleInstanceId, EntropyError>,
    cancel: CancelFlag,
}

/// Entropy metric pipeline bound to its reference data, hierarchy and sink.
pub struct Pipeline {
    config: PipelineConfig,
    reference: Arc<ReferenceData>,
    hierarchy: Arc<ScaleHierarchy>,
    sink: Arc<dyn MetricSink>,
    coordinator: Arc<BatchCoordinator>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        reference: Arc<ReferenceData>,
        hierarchy: ScaleHierarchy,
        sink: Arc<dyn MetricSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reference,
            hierarchy: Arc::new(hierarchy),
            sink,
            coordinator: Arc::new(BatchCoordinator::new()),
        })
    }

    /// Use an existing status table, e.g. one restored with
    /// [`BatchCoordinator::import_state`].
    pub fn with_coordinator(mut self, coordinator: Arc<BatchCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.coordinator
    }

    pub fn hierarchy(&self) -> &ScaleHierarchy {
        &self.hierarchy
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run (or re-run) a batch over `windows`.
    ///
    /// Per-cell failures are reported, not returned; the returned error is
    /// reserved for failures of the run itself.
    pub async fn run_batch(
        &self,
        batch: &mut IngestionBatch,
        input: BatchInput,
        windows: &[TimeWindow],
        cancel: &CancelFlag,
    ) -> Result<BatchReport> {
        let started_at = Utc::now();
        let rows_processed = input.row_count();
        info!(batch = %batch.id, rows = rows_processed, windows = windows.len(), "starting batch");

        let mut windows: Vec<TimeWindow> = windows.to_vec();
        windows.sort();
        windows.dedup();
        let empty_windows = windows.iter().filter(|w| w.is_empty()).count();
        windows.retain(|w| !w.is_empty());

        let as_of = input.as_of;
        let prepared = {
            let reference = Arc::clone(&self.reference);
            let hierarchy = Arc::clone(&self.hierarchy);
            let resampler = Resampler::new(self.config.resample.clone());
            let windows = windows.clone();
            tokio::task::spawn_blocking(move || {
                prepare(&reference, &hierarchy, &resampler, &input, &windows)
            })
            .await
            .map_err(|e| EntropyError::Execution(e.to_string()))?
        };

        let mut notes = prepared.notes.clone();
        if empty_windows > 0 {
            notes.push(format!("ignored {} empty windows", empty_windows));
        }
        let rows_excluded = prepared.rows_excluded;

        let ctx = Arc::new(BatchContext {
            batch_id: batch.id.clone(),
            as_of,
            policy_tag: serde_json::to_string(&(
                &self.config.resample,
                &self.config.distribution,
                &self.config.entropy,
                &self.config.aggregation,
            ))?,
            config: self.config.clone(),
            reference: Arc::clone(&self.reference),
            hierarchy: Arc::clone(&self.hierarchy),
            sink: Arc::clone(&self.sink),
            coordinator: Arc::clone(&self.coordinator),
            aggregator: ScaleAggregator::new(self.config.distribution.clone()),
            calculator: EntropyCalculator::new(self.config.entropy.clone()),
            prepared,
            ambiguous: self.hierarchy.ambiguous_ancestors(),
            cancel: cancel.clone(),
        });

        let series = self.reference.series();
        let levels = self.hierarchy.levels();
        let cells_total =
            levels.iter().map(Vec::len).sum::<usize>() * series.len() * windows.len();

        let semaphore = Arc::new(Semaphore::new(self.config.batch.max_concurrency));
        let mut results: HashMap<CellKey, CellResult> = HashMap::new();
        let mut failed_cells = Vec::new();
        let mut cells_written = 0;
        let mut cells_skipped = 0;
        let mut cancelled = false;

        'levels: for level in levels {
            let prior = Arc::new(std::mem::take(&mut results));
            let mut tasks: JoinSet<(CellKey, Outcome)> = JoinSet::new();

            for instance in &level {
                let Some(scale) = self.hierarchy.scale(instance) else {
                    continue;
                };
                for (flow, taxonomy) in &series {
                    for window in &windows {
                        if cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }
                        let permit = match Arc::clone(&semaphore).acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let cell = CellKey::new(
                            scale,
                            instance.clone(),
                            *flow,
                            taxonomy.as_str(),
                            *window,
                        );
                        let ctx = Arc::clone(&ctx);
                        let prior = Arc::clone(&prior);
                        tasks.spawn(async move {
                            let task_cell = cell.clone();
                            let outcome = tokio::task::spawn_blocking(move || {
                                run_cell(&ctx, &prior, &task_cell)
                            })
                            .await
                            .unwrap_or_else(|e| {
                                Outcome::Failed(EntropyError::Execution(e.to_string()))
                            });
                            drop(permit);
                            (cell, outcome)
                        });
                    }
                }
            }

            // Children must stay visible to the whole next level.
            let mut level_results: HashMap<CellKey, CellResult> = (*prior).clone();
            while let Some(joined) = tasks.join_next().await {
                let (cell, outcome) = match joined {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "cell task aborted");
                        notes.push(format!("cell task aborted: {}", err));
                        continue;
                    }
                };
                match outcome {
                    Outcome::Written(result) => {
                        cells_written += 1;
                        level_results.insert(cell, result);
                    }
                    Outcome::Skipped(result) => {
                        cells_skipped += 1;
                        level_results.insert(cell, result);
                    }
                    Outcome::Cancelled => cancelled = true,
                    Outcome::Failed(err) => {
                        if matches!(err, EntropyError::Execution(_)) {
                            self.coordinator.mark_failed(&batch.id, &cell, &err).ok();
                        }
                        failed_cells.push(FailedCell {
                            cell,
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
            results = level_results;

            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                break 'levels;
            }
        }

        failed_cells.sort_by(|a, b| a.cell.cmp(&b.cell));
        let cells_failed = failed_cells.len();
        let attempted = cells_written + cells_skipped + cells_failed;
        if cancelled {
            notes.push(format!(
                "cancelled after {} of {} cells",
                attempted, cells_total
            ));
        }
        let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
        for failed in &failed_cells {
            *by_kind.entry(failed.kind.as_str()).or_default() += 1;
        }
        for (kind, count) in by_kind {
            notes.push(format!("{} cells failed: {}", count, kind));
        }

        let status = BatchStatus::from_counts(cells_total, cells_failed, cancelled);
        batch.status = status;
        batch.row_count = rows_processed;

        let report = BatchReport {
            batch_id: batch.id.clone(),
            status,
            rows_processed,
            rows_excluded,
            cells_total,
            cells_written,
            cells_skipped,
            cells_failed,
            cancelled,
            started_at,
            finished_at: Utc::now(),
            notes,
            failed_cells,
        };

        if let Err(err) = self.sink.report_batch(&report) {
            warn!(batch = %batch.id, error = %err, "batch report rejected by sink");
        }

        info!(
            batch = %report.batch_id,
            status = ?report.status,
            written = report.cells_written,
            skipped = report.cells_skipped,
            failed = report.cells_failed,
            "batch finished"
        );

        Ok(report)
    }
}

/// Normalize rows, resample sensors and route everything to its cell.
fn prepare(
    reference: &ReferenceData,
    hierarchy: &ScaleHierarchy,
    resampler: &Resampler,
    input: &BatchInput,
    windows: &[TimeWindow],
) -> Prepared {
    let mut prepared = Prepared::default();
    let normalized = normalize_rows(&input.rows, reference);
    let mut excluded = normalized.excluded;
    let mut unattributed = 0;
    let mut outside = 0;

    for record in normalized.records {
        if !hierarchy.contains(&record.instance) {
            unattributed += 1;
            continue;
        }
        let mut routed = false;
        for window in windows.iter().filter(|w| w.contains(record.timestamp_ms)) {
            routed = true;
            prepared
                .inputs
                .entry((record.flow, record.taxonomy.clone(), *window))
                .or_default()
                .entry(record.instance.clone())
                .or_default()
                .records
                .push(record.clone());
        }
        if !routed {
            outside += 1;
        }
    }

    // Sensors are resampled per window and routed directly to that window.
    let mut sensor_ids: Vec<&String> = input.readings.keys().collect();
    sensor_ids.sort();
    let mut unknown_sensors = 0;
    let mut gap_runs = 0;
    for sensor_id in sensor_ids {
        let readings = &input.readings[sensor_id];
        let Some(spec) = reference.sensors.get(sensor_id) else {
            warn!(sensor = %sensor_id, "readings for unregistered sensor");
            unknown_sensors += 1;
            prepared.rows_excluded += readings.len();
            continue;
        };
        if !hierarchy.contains(&spec.instance) {
            unattributed += readings.len();
            continue;
        }

        // Power sensors land in their taxonomy as energy.
        let resolved = reference
            .units
            .normalize(1.0, &spec.unit_code)
            .and_then(|(factor, si_unit)| {
                let record_unit = ResampledSeries::record_unit(&si_unit);
                reference
                    .route(sensor_id, spec.flow, &spec.category, record_unit)
                    .map(|(taxonomy, category)| {
                        (factor, si_unit.clone(), taxonomy.name.clone(), category)
                    })
            });
        let (factor, si_unit, taxonomy, category) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(sensor = %sensor_id, error = %err, "excluding sensor");
                let attributed = reference
                    .attribute(spec.flow, &spec.category)
                    .map(|t| t.name.clone());
                for window in windows {
                    excluded.push(ExcludedRow {
                        id: sensor_id.clone(),
                        instance: spec.instance.clone(),
                        flow: spec.flow,
                        taxonomy: attributed.clone(),
                        timestamp_ms: window.start_ms,
                        reason: ExclusionReason::Error(err.clone()),
                    });
                }
                continue;
            }
        };

        let scaled: Vec<SensorReading> = readings
            .iter()
            .map(|r| SensorReading {
                value: r.value * factor,
                sampling_interval_ms: r.sampling_interval_ms.or(spec.sampling_interval_ms),
                ..*r
            })
            .collect();

        for window in windows {
            let series = resampler.resample(sensor_id, &scaled, *window);
            let key = (spec.flow, taxonomy.clone(), *window);
            if !series.gaps.is_empty() {
                gap_runs += series.gaps.len();
                *prepared
                    .gaps
                    .entry((spec.instance.clone(), key.clone()))
                    .or_default() += series.gaps.len();
            }
            let records = series.to_records(spec, &taxonomy, &category, &si_unit);
            prepared
                .inputs
                .entry(key)
                .or_default()
                .entry(spec.instance.clone())
                .or_default()
                .records
                .extend(records);
        }
    }

    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for row in &excluded {
        let kind = match &row.reason {
            ExclusionReason::SourceMissing => "source_missing",
            ExclusionReason::Error(err) => err.kind(),
        };
        *by_kind.entry(kind).or_default() += 1;
    }
    prepared.rows_excluded += excluded.len() + unattributed;
    for (kind, count) in by_kind {
        prepared.notes.push(format!("excluded {} rows: {}", count, kind));
    }
    if unattributed > 0 {
        prepared
            .notes
            .push(format!("excluded {} rows: unknown_instance", unattributed));
    }
    if unknown_sensors > 0 {
        prepared
            .notes
            .push(format!("ignored {} unregistered sensors", unknown_sensors));
    }
    if outside > 0 {
        prepared
            .notes
            .push(format!("{} records outside every window", outside));
    }
    if gap_runs > 0 {
        prepared
            .notes
            .push(format!("{} sensor gaps left missing", gap_runs));
    }

    // Exclusions no taxonomy can be named for stay in the batch counts only.
    for row in excluded {
        if !hierarchy.contains(&row.instance) {
            continue;
        }
        let Some(taxonomy) = row.taxonomy.clone() else {
            continue;
        };
        for window in windows.iter().filter(|w| w.contains(row.timestamp_ms)) {
            prepared
                .inputs
                .entry((row.flow, taxonomy.clone(), *window))
                .or_default()
                .entry(row.instance.clone())
                .or_default()
                .excluded
                .push(row.clone());
        }
    }

    // Input order must not leak into floating-point sums.
    for cell_inputs in prepared.inputs.values_mut() {
        for direct in cell_inputs.values_mut() {
            direct.records.sort_by(|a, b| a.id.cmp(&b.id));
            direct.excluded.sort_by(|a, b| a.id.cmp(&b.id));
        }
    }

    prepared
}

/// Compute, decide and commit one cell. Runs on the blocking pool.
fn run_cell(
    ctx: &BatchContext,
    prior: &HashMap<CellKey, CellResult>,
    cell: &CellKey,
) -> Outcome {
    if ctx.cancel.is_cancelled() {
        return Outcome::Cancelled;
    }
    ctx.coordinator.register(&ctx.batch_id, cell);

    let work = match compute_cell(ctx, prior, cell) {
        Ok(work) => work,
        Err(err) => return fail(ctx, cell, err),
    };

    if ctx.coordinator.decide(&ctx.batch_id, cell, work.fingerprint) == Decision::Skip {
        debug!(cell = %cell, fingerprint = %work.fingerprint, "inputs unchanged, skipping");
        return Outcome::Skipped(CellResult {
            distribution: work.distribution,
            fingerprint: work.fingerprint,
        });
    }

    if ctx.cancel.is_cancelled() {
        return Outcome::Cancelled;
    }

    let Some(taxonomy) = ctx.reference.taxonomy(cell.flow, &cell.taxonomy) else {
        return fail(
            ctx,
            cell,
            EntropyError::InsufficientTaxonomy {
                flow: cell.flow,
                declared: 0,
            },
        );
    };
    let metrics = CellOutcome {
        cell,
        stats: &work.stats,
        distribution: &work.distribution,
        mass_unit: &taxonomy.unit,
        log_base: ctx.calculator.log_base(),
        fingerprint: work.fingerprint,
        children: work.children,
        gaps_exceeded: work.gaps,
        computed_at: ctx.as_of,
    }
    .into_metrics();

    if let Err(err) = ctx.sink.upsert_cell(cell, metrics) {
        return fail(ctx, cell, err);
    }
    if let Err(err) = ctx
        .coordinator
        .mark_computed(&ctx.batch_id, cell, work.fingerprint)
    {
        return fail(ctx, cell, err);
    }

    debug!(cell = %cell, fingerprint = %work.fingerprint, "cell committed");
    Outcome::Written(CellResult {
        distribution: work.distribution,
        fingerprint: work.fingerprint,
    })
}

fn fail(ctx: &BatchContext, cell: &CellKey, err: EntropyError) -> Outcome {
    warn!(cell = %cell, error = %err, "cell failed");
    if let Err(state_err) = ctx.coordinator.mark_failed(&ctx.batch_id, cell, &err) {
        warn!(cell = %cell, error = %state_err, "could not record failure");
    }
    Outcome::Failed(err)
}

fn compute_cell(
    ctx: &BatchContext,
    prior: &HashMap<CellKey, CellResult>,
    cell: &CellKey,
) -> Result<CellWork> {
    if let Some(err) = ctx.ambiguous.get(&cell.instance) {
        return Err(err.clone());
    }

    let taxonomy = ctx
        .reference
        .taxonomy(cell.flow, &cell.taxonomy)
        .ok_or(EntropyError::InsufficientTaxonomy {
            flow: cell.flow,
            declared: 0,
        })?;
    taxonomy.validate()?;

    let series = (cell.flow, cell.taxonomy.clone(), cell.window);
    let empty = CellInputs::new();
    let inputs = ctx.prepared.inputs.get(&series).unwrap_or(&empty);
    let members = ScaleAggregator::attributed_subtree(&ctx.hierarchy, &cell.instance)?;
    let children = ctx.hierarchy.children(&cell.instance);
    let gaps: usize = members
        .iter()
        .filter_map(|m| ctx.prepared.gaps.get(&(m.clone(), series.clone())))
        .sum();

    let fingerprint = FingerprintBuilder::new(cell)
        .taxonomy(taxonomy)
        .note(&ctx.policy_tag)
        .note(&format!("gaps:{}", gaps));

    let policy = ctx.config.aggregation.policy(cell.flow);
    let (distribution, fingerprint) = match policy {
        AggregationPolicy::ChildDistributions if !children.is_empty() => {
            let mut child_cells = HashMap::new();
            let mut child_fingerprints = Vec::new();
            for child in &children {
                let Some(scale) = ctx.hierarchy.scale(child) else {
                    continue;
                };
                let key = CellKey::new(
                    scale,
                    child.clone(),
                    cell.flow,
                    cell.taxonomy.as_str(),
                    cell.window,
                );
                if let Some(result) = prior.get(&key) {
                    child_cells.insert(child.clone(), result.distribution.clone());
                    child_fingerprints.push((child.clone(), result.fingerprint));
                }
            }

            let own = inputs.get(&cell.instance);
            let distribution = ctx.aggregator.combine(
                taxonomy,
                &ctx.hierarchy,
                &cell.instance,
                own,
                &child_cells,
            )?;
            let fingerprint = fingerprint
                .records(own.into_iter().flat_map(|i| i.records.iter()))
                .excluded(own.into_iter().flat_map(|i| i.excluded.iter()))
                .children(&child_fingerprints)
                .finish();
            (distribution, fingerprint)
        }
        _ => {
            let distribution =
                ctx.aggregator
                    .pooled(taxonomy, &ctx.hierarchy, &cell.instance, inputs)?;
            let direct: Vec<&InstanceInputs> =
                members.iter().filter_map(|m| inputs.get(m)).collect();
            let fingerprint = fingerprint
                .records(direct.iter().flat_map(|i| i.records.iter()))
                .excluded(direct.iter().flat_map(|i| i.excluded.iter()))
                .finish();
            (distribution, fingerprint)
        }
    };

    let stats = ctx.calculator.compute(cell.flow, &distribution.distribution)?;

    Ok(CellWork {
        distribution,
        stats,
        fingerprint,
        children,
        gaps,
    })
}
