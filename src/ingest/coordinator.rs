//! Fan-out of one pass over a worker pool.
//!
//! The pass coordinator owns the dispatching side of a pass: it claims
//! identities, hands rows to workers over bounded channels and, at the
//! barrier in [`PassHandle::finish`], merges what the workers leave behind.
//!
//! # Flow
//!
//! 1. `dispatch` assigns each new identity a placeholder and routes the row
//!    to a worker (workers are spawned on the first row)
//! 2. Each worker builds entities, fills its own batch accumulator and
//!    submits full batches; holds resolved by a flushed batch go straight to
//!    the worker's related accumulator
//! 3. `finish` closes the channels, joins the workers, submits the merged
//!    leftovers, then the second wave of related entities, then clears
//!    delete markers

use super::accumulator::{BatchAccumulator, rebatch};
use super::resolver::{HoldStore, MarkerStore, clear_markers};
use super::stats::{EntityResult, Outcome, PassSummary, Phase, PhaseStats};
use super::submitter::{BatchReport, BatchSubmitter};
use crate::context::RunContext;
use crate::error::{LoaderError, RowError};
use crate::handlers::{BuildContext, ColumnFilter, EntityHandler};
use crate::model::{Entity, EntityKey, Handle, Placeholder, Record};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// What one pass imports.
#[derive(Debug, Clone)]
pub struct PassSpec {
    pub type_name: String,
    /// Label used in logs and results, e.g. `depth-2` or `cyclic`.
    pub label: String,
    pub columns: ColumnFilter,
}

pub struct PassOutcome {
    pub summary: PassSummary,
    pub results: Vec<EntityResult>,
}

struct WorkItem {
    record: Record,
    handler: Arc<dyn EntityHandler>,
    placeholder: Placeholder,
    identity: String,
}

#[derive(Default)]
struct WorkerOutput {
    report: BatchReport,
    primary_remainder: Vec<Entity>,
    related_remainder: Vec<Entity>,
    holds: HoldStore,
    markers: MarkerStore,
    dropped_holds: usize,
}

impl WorkerOutput {
    fn absorb(&mut self, other: WorkerOutput) {
        self.report.merge(other.report);
        self.primary_remainder.extend(other.primary_remainder);
        self.related_remainder.extend(other.related_remainder);
        self.holds.merge(other.holds);
        self.markers.merge(other.markers);
        self.dropped_holds += other.dropped_holds;
    }
}

/// Second occurrence of an identity within one pass.
struct Duplicate {
    key: EntityKey,
    first: Placeholder,
    row: usize,
}

pub struct PassCoordinator {
    ctx: Arc<RunContext>,
}

impl PassCoordinator {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    pub fn begin(&self, spec: PassSpec) -> PassHandle {
        PassHandle {
            ctx: Arc::clone(&self.ctx),
            spec: Arc::new(spec),
            senders: Vec::new(),
            workers: JoinSet::new(),
            next_worker: 0,
            claims: HashMap::new(),
            duplicates: Vec::new(),
            rejected: Vec::new(),
            rows: 0,
        }
    }
}

pub struct PassHandle {
    ctx: Arc<RunContext>,
    spec: Arc<PassSpec>,
    senders: Vec<mpsc::Sender<WorkItem>>,
    workers: JoinSet<WorkerOutput>,
    next_worker: usize,
    claims: HashMap<EntityKey, Placeholder>,
    duplicates: Vec<Duplicate>,
    rejected: Vec<EntityResult>,
    rows: usize,
}

impl PassHandle {
    /// Rows routed to this pass so far, including rejected and duplicate
    /// ones.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub async fn dispatch(
        &mut self,
        record: Record,
        handler: Arc<dyn EntityHandler>,
    ) -> Result<(), LoaderError> {
        self.rows += 1;

        let identity = match handler.identity(&record) {
            Ok(identity) => identity,
            Err(err) => {
                self.record_rejection(handler.type_name(), err);
                return Ok(());
            }
        };

        let key = EntityKey::new(handler.type_name(), identity.as_str());
        if let Some(first) = self.claims.get(&key) {
            self.duplicates.push(Duplicate {
                key,
                first: *first,
                row: record.row(),
            });
            return Ok(());
        }

        let placeholder = self.ctx.sequence.next();
        self.claims.insert(key, placeholder);
        self.ensure_workers();

        let index = self.next_worker % self.senders.len();
        self.next_worker += 1;
        self.senders[index]
            .send(WorkItem {
                record,
                handler,
                placeholder,
                identity,
            })
            .await
            .map_err(|_| LoaderError::Worker(format!("worker {index} stopped accepting rows")))
    }

    /// Report a row that could not be classified.
    pub fn reject(&mut self, type_name: &str, err: RowError) {
        self.rows += 1;
        self.record_rejection(type_name, err);
    }

    fn record_rejection(&mut self, type_name: &str, err: RowError) {
        log::warn!("{} pass {}: {}", type_name, self.spec.label, err);
        self.rejected.push(EntityResult {
            handle: Handle::Placeholder(self.ctx.sequence.next()),
            type_name: type_name.to_string(),
            identity: format!("row {}", err.row()),
            phase: Phase::Primary,
            pass: self.spec.label.clone(),
            outcome: Outcome::Failed {
                reason: err.to_string(),
            },
        });
    }

    fn ensure_workers(&mut self) {
        if !self.senders.is_empty() {
            return;
        }

        let workers = self.ctx.settings.workers.max(1);
        let capacity = self.ctx.settings.channel_capacity.max(1);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel(capacity);
            self.senders.push(tx);
            self.workers.spawn(run_worker(
                Arc::clone(&self.ctx),
                Arc::clone(&self.spec),
                rx,
            ));
        }

        log::debug!(
            "{} pass {}: started {} workers",
            self.spec.type_name,
            self.spec.label,
            workers
        );
    }

    /// Flush barrier. Returns only once every primary and related batch of
    /// the pass has been submitted.
    pub async fn finish(self) -> Result<PassOutcome, LoaderError> {
        let PassHandle {
            ctx,
            spec,
            senders,
            mut workers,
            duplicates,
            rejected,
            rows,
            ..
        } = self;

        // Closing the channels lets workers drain and return
        drop(senders);

        let mut merged = WorkerOutput::default();
        while let Some(joined) = workers.join_next().await {
            let output = joined.map_err(|e| LoaderError::Worker(e.to_string()))?;
            merged.absorb(output);
        }

        let batch_size = ctx.settings.batch_size;
        let primary = BatchSubmitter::new(Arc::clone(&ctx), Phase::Primary, spec.label.clone());
        let related = BatchSubmitter::new(Arc::clone(&ctx), Phase::Related, spec.label.clone());

        let leftovers = std::mem::take(&mut merged.primary_remainder);
        let tail = submit_all(&primary, rebatch(leftovers, batch_size)).await?;
        merged.dropped_holds += merged.holds.drop_unresolved(&tail.unresolved);

        // Second wave starts only once every primary handle of the pass is known
        let mut second_wave = std::mem::take(&mut merged.related_remainder);
        second_wave.extend(merged.holds.take_resolved(&tail.mapping));
        merged.report.merge(tail);
        merged.dropped_holds += merged.holds.drain();

        let related_report = submit_all(&related, rebatch(second_wave, batch_size)).await?;
        merged.report.merge(related_report);

        let mut results = std::mem::take(&mut merged.report.results);

        let markers = merged.markers.into_resolved(&merged.report.mapping);
        if !markers.is_empty() {
            results.extend(clear_markers(&ctx, markers, &spec.label).await);
        }

        for duplicate in duplicates {
            let handle = match merged.report.mapping.get(&duplicate.first) {
                Some(guid) => Handle::Resolved(guid.clone()),
                None => Handle::Placeholder(duplicate.first),
            };
            results.push(EntityResult {
                handle,
                type_name: duplicate.key.type_name,
                identity: duplicate.key.identity,
                phase: Phase::Primary,
                pass: spec.label.clone(),
                outcome: Outcome::Skipped {
                    reason: format!("duplicate identity (row {})", duplicate.row),
                },
            });
        }
        results.extend(rejected);

        let summary = PassSummary {
            type_name: spec.type_name.clone(),
            pass: spec.label.clone(),
            rows,
            primary: PhaseStats::from_results(Phase::Primary, &results),
            related: PhaseStats::from_results(Phase::Related, &results),
            dropped_holds: merged.dropped_holds,
        };
        summary.log();

        Ok(PassOutcome { summary, results })
    }
}

async fn submit_all(
    submitter: &BatchSubmitter,
    batches: Vec<Vec<Entity>>,
) -> Result<BatchReport, LoaderError> {
    let mut tasks = JoinSet::new();
    for batch in batches {
        let submitter = submitter.clone();
        tasks.spawn(async move { submitter.submit(batch).await });
    }

    let mut report = BatchReport::default();
    while let Some(joined) = tasks.join_next().await {
        report.merge(joined.map_err(|e| LoaderError::Worker(e.to_string()))?);
    }
    Ok(report)
}

async fn run_worker(
    ctx: Arc<RunContext>,
    spec: Arc<PassSpec>,
    mut rx: mpsc::Receiver<WorkItem>,
) -> WorkerOutput {
    let primary = BatchSubmitter::new(Arc::clone(&ctx), Phase::Primary, spec.label.clone());
    let related = BatchSubmitter::new(Arc::clone(&ctx), Phase::Related, spec.label.clone());
    let mut primary_batch = BatchAccumulator::new(ctx.settings.batch_size);
    let mut related_batch = BatchAccumulator::new(ctx.settings.batch_size);
    let mut output = WorkerOutput::default();

    while let Some(item) = rx.recv().await {
        let built = {
            let build_ctx = BuildContext {
                placeholder: item.placeholder,
                columns: &spec.columns,
                cache: &ctx.cache,
                schema: ctx.schema.as_ref(),
                overwrite_blank: &ctx.settings.overwrite_blank,
                sequence: &ctx.sequence,
            };
            item.handler.build(&item.record, &build_ctx)
        };

        let built = match built {
            Ok(built) => built,
            Err(err) => {
                log::warn!("{} pass {}: {}", spec.type_name, spec.label, err);
                output.report.results.push(EntityResult {
                    handle: Handle::Placeholder(item.placeholder),
                    type_name: item.handler.type_name().to_string(),
                    identity: item.identity,
                    phase: Phase::Primary,
                    pass: spec.label.clone(),
                    outcome: Outcome::Failed {
                        reason: err.to_string(),
                    },
                });
                continue;
            }
        };

        if let Some(hold) = built.hold {
            output.holds.insert(item.placeholder, hold);
        }
        if let Some(marker) = built.marker {
            output.markers.insert(item.placeholder, marker);
        }

        let Some(batch) = primary_batch.push(built.entity) else {
            continue;
        };

        let report = primary.submit(batch).await;
        output.dropped_holds += output.holds.drop_unresolved(&report.unresolved);
        for entity in output.holds.take_resolved(&report.mapping) {
            if let Some(batch) = related_batch.push(entity) {
                let related_report = related.submit(batch).await;
                output.report.merge(related_report);
            }
        }
        output.report.merge(report);
    }

    output.primary_remainder = primary_batch.take();
    output.related_remainder = related_batch.take();
    output
}
