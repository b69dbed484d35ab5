//! Multi-pass orchestration over one record source.
//!
//! Types found in the source run in load order. Hierarchical types get one
//! pass per depth, top down. Types with cyclic relationship columns get a
//! final pass that imports only the deferred columns. Between passes every
//! created entity is looked up again and cached under its stored identity.

mod classifier;
mod cyclic;
mod hierarchy;

pub use classifier::{RecordClassifier, Selection};
pub use cyclic::{CyclicPlan, plan_cyclic_fields};
pub use hierarchy::HierarchyTracker;

use crate::context::RunContext;
use crate::error::LoaderError;
use crate::handlers::{ColumnFilter, EntityHandler};
use crate::ingest::{
    EntityResult, Outcome, PassCoordinator, PassOutcome, PassSpec, Phase, PhaseStats, RunReport,
};
use crate::model::{Handle, IDENTITY_COLUMN, Placeholder, TYPE_COLUMN};
use crate::source::{RecordSource, SourceError};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

/// Which rows of a type a pass imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Rows of a hierarchical type at one depth.
    Depth(usize),
    /// Every row of a flat type.
    Primary,
    /// Only the deferred cyclic relationship columns.
    Cyclic,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassKind::Depth(depth) => write!(f, "depth-{depth}"),
            PassKind::Primary => f.write_str("primary"),
            PassKind::Cyclic => f.write_str("cyclic"),
        }
    }
}

/// Types present in the source, found by a first scan.
#[derive(Debug, Default)]
struct Survey {
    rows_by_type: BTreeMap<String, usize>,
    rejected: Vec<EntityResult>,
}

pub struct MultiPassController {
    ctx: Arc<RunContext>,
}

impl MultiPassController {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Validate the source, then import every type it contains.
    ///
    /// Configuration errors are returned before the first submission. Row
    /// and batch failures end up in the report.
    pub async fn run(&self, source: &dyn RecordSource) -> Result<RunReport, LoaderError> {
        let mut report = RunReport::new();
        let header = source.header()?;

        for column in [TYPE_COLUMN, IDENTITY_COLUMN] {
            if !header.contains(column) {
                return Err(LoaderError::MissingColumn {
                    column: column.to_string(),
                });
            }
        }

        let survey = self.survey(source)?;
        report.results.extend(survey.rejected);

        let handlers = self
            .ctx
            .registry
            .order(survey.rows_by_type.keys().map(String::as_str));

        // Every type is validated before anything is written
        let mut plans = Vec::with_capacity(handlers.len());
        for handler in handlers {
            for column in self.ctx.schema.required_columns(handler.type_name()) {
                if !header.contains(&column) {
                    return Err(LoaderError::MissingRequiredColumn {
                        type_name: handler.type_name().to_string(),
                        column,
                    });
                }
            }
            let plan =
                plan_cyclic_fields(handler.type_name(), &header, self.ctx.schema.as_ref())?;
            plans.push((handler, plan));
        }

        log::info!(
            "Loading {} with {} types: {}",
            source.describe(),
            plans.len(),
            plans
                .iter()
                .map(|(h, _)| h.type_name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        for (handler, plan) in plans {
            self.load_type(source, handler, plan, &mut report).await?;
        }

        report.finish();
        Ok(report)
    }

    async fn load_type(
        &self,
        source: &dyn RecordSource,
        handler: Arc<dyn EntityHandler>,
        plan: CyclicPlan,
        report: &mut RunReport,
    ) -> Result<(), LoaderError> {
        let type_name = handler.type_name().to_string();

        if self.ctx.settings.preload_cache
            && let Err(err) = self.ctx.cache.preload(self.ctx.client(), &type_name).await
        {
            log::warn!(
                "{}: cache preload failed, continuing without: {}",
                type_name,
                err
            );
        }

        let first_pass = ColumnFilter::AllExcept(plan.deferred.clone());
        let mut loaded = HashSet::new();

        if handler.is_hierarchical() {
            let mut tracker = HierarchyTracker::new();
            loop {
                let kind = PassKind::Depth(tracker.current());
                let outcome = self
                    .run_pass(
                        source,
                        &type_name,
                        kind,
                        first_pass.clone(),
                        Some(&mut tracker),
                        None,
                    )
                    .await?;
                let rows = outcome.summary.rows;
                loaded.extend(self.record(outcome, report).await);
                if !tracker.advance(rows) {
                    break;
                }
            }
        } else {
            let outcome = self
                .run_pass(source, &type_name, PassKind::Primary, first_pass, None, None)
                .await?;
            loaded.extend(self.record(outcome, report).await);
        }

        if plan.needs_second_pass() {
            let outcome = self
                .run_pass(
                    source,
                    &type_name,
                    PassKind::Cyclic,
                    ColumnFilter::Only(plan.deferred),
                    None,
                    Some(&loaded),
                )
                .await?;
            self.record(outcome, report).await;
        }

        Ok(())
    }

    /// Scan the whole source once and stream the rows of this pass to the
    /// coordinator.
    ///
    /// With `loaded`, rows whose identity is not in it are reported skipped
    /// instead of dispatched.
    async fn run_pass(
        &self,
        source: &dyn RecordSource,
        type_name: &str,
        kind: PassKind,
        columns: ColumnFilter,
        mut tracker: Option<&mut HierarchyTracker>,
        loaded: Option<&HashSet<String>>,
    ) -> Result<PassOutcome, LoaderError> {
        let mut classifier =
            RecordClassifier::new(Arc::clone(&self.ctx.registry), self.ctx.delta.clone());
        let coordinator = PassCoordinator::new(Arc::clone(&self.ctx));
        let mut pass = coordinator.begin(PassSpec {
            type_name: type_name.to_string(),
            label: kind.to_string(),
            columns,
        });

        log::debug!("{} pass {}: scanning {}", type_name, kind, source.describe());
        let mut skipped = Vec::new();

        for row in source.rows()? {
            let record = match row {
                Ok(record) => record,
                // Reported once by the survey
                Err(SourceError::Row { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            let Ok(handler) = classifier.classify(&record) else {
                continue;
            };
            if handler.type_name() != type_name {
                continue;
            }

            let depth = match tracker.as_deref_mut() {
                Some(tracker) => {
                    tracker.observe(handler.depth(&record));
                    Some(tracker.current())
                }
                None => None,
            };

            match classifier.select(&record, handler.as_ref(), type_name, depth) {
                Selection::Include => {
                    if let Some(loaded) = loaded {
                        match handler.identity(&record) {
                            Ok(identity) if loaded.contains(&identity) => {}
                            Ok(identity) => {
                                log::debug!(
                                    "{} {}: not loaded by an earlier pass, skipping pass {}",
                                    type_name,
                                    identity,
                                    kind
                                );
                                skipped.push(EntityResult {
                                    handle: Handle::Placeholder(Placeholder(0)),
                                    type_name: type_name.to_string(),
                                    identity,
                                    phase: Phase::Primary,
                                    pass: kind.to_string(),
                                    outcome: Outcome::Skipped {
                                        reason: "not loaded by an earlier pass".to_string(),
                                    },
                                });
                                continue;
                            }
                            // Already failed in the earlier pass
                            Err(_) => continue,
                        }
                    }
                    pass.dispatch(record, handler).await?
                }
                Selection::OtherType | Selection::OtherDepth | Selection::Unchanged => {}
            }
        }

        let mut outcome = pass.finish().await?;
        outcome.results.extend(skipped);
        Ok(outcome)
    }

    /// Re-cache created entities by their stored identity, then add the pass
    /// to the report. A lookup that never succeeds fails that entity.
    ///
    /// Returns the identities whose primary entity was created or updated.
    async fn record(&self, mut outcome: PassOutcome, report: &mut RunReport) -> HashSet<String> {
        let created: Vec<usize> = outcome
            .results
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.phase == Phase::Primary
                    && r.outcome == Outcome::Created
                    && r.handle.is_resolved()
            })
            .map(|(index, _)| index)
            .collect();

        let limit = self.ctx.settings.workers.max(1);
        let mut lookups = JoinSet::new();
        // Index of every lookup not yet confirmed, with the reason to report
        // if it never is
        let mut unconfirmed = BTreeMap::new();

        for index in created {
            let Some(guid) = outcome.results[index].handle.guid().cloned() else {
                continue;
            };
            if lookups.len() >= limit
                && let Some(joined) = lookups.join_next().await
            {
                settle_lookup(joined, &mut unconfirmed);
            }

            unconfirmed.insert(index, "re-cache lookup did not complete".to_string());
            let ctx = Arc::clone(&self.ctx);
            lookups.spawn(async move {
                let failure = ctx
                    .cache
                    .lookup_with_retry(ctx.client(), &guid, &ctx.settings.lookup)
                    .await
                    .err()
                    .map(|err| err.to_string());
                (index, failure)
            });
        }
        while let Some(joined) = lookups.join_next().await {
            settle_lookup(joined, &mut unconfirmed);
        }

        for (index, reason) in unconfirmed {
            let result = &mut outcome.results[index];
            log::warn!("{} {}: {}", result.type_name, result.identity, reason);
            result.outcome = Outcome::Failed { reason };
        }

        let loaded = outcome
            .results
            .iter()
            .filter(|r| {
                r.phase == Phase::Primary
                    && matches!(r.outcome, Outcome::Created | Outcome::Updated)
            })
            .map(|r| r.identity.clone())
            .collect();

        let mut summary = outcome.summary;
        summary.primary = PhaseStats::from_results(Phase::Primary, &outcome.results);
        report.passes.push(summary);
        report.results.extend(outcome.results);
        loaded
    }

    fn survey(&self, source: &dyn RecordSource) -> Result<Survey, LoaderError> {
        let mut survey = Survey::default();
        let mut classifier = RecordClassifier::new(Arc::clone(&self.ctx.registry), None);

        for row in source.rows()? {
            let record = match row {
                Ok(record) => record,
                Err(SourceError::Row { row, message }) => {
                    log::warn!("row {}: unreadable: {}", row, message);
                    survey.rejected.push(rejected_row(row, "", message));
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            match classifier.classify(&record) {
                Ok(handler) => {
                    *survey
                        .rows_by_type
                        .entry(handler.type_name().to_string())
                        .or_insert(0) += 1;
                }
                Err(err) => {
                    log::warn!("{}", err);
                    let type_name = record.type_name().unwrap_or("");
                    survey
                        .rejected
                        .push(rejected_row(err.row(), type_name, err.to_string()));
                }
            }
        }

        for (type_name, rows) in &survey.rows_by_type {
            log::debug!("survey: {} rows of {}", rows, type_name);
        }

        Ok(survey)
    }
}

/// Clear a lookup that completed. A task that panicked stays unconfirmed.
fn settle_lookup(
    joined: Result<(usize, Option<String>), JoinError>,
    unconfirmed: &mut BTreeMap<usize, String>,
) {
    match joined {
        Ok((index, None)) => {
            unconfirmed.remove(&index);
        }
        Ok((index, Some(reason))) => {
            unconfirmed.insert(index, reason);
        }
        Err(err) => log::error!("re-cache lookup task failed: {}", err),
    }
}

fn rejected_row(row: usize, type_name: &str, reason: String) -> EntityResult {
    EntityResult {
        handle: Handle::Placeholder(Placeholder(0)),
        type_name: type_name.to_string(),
        identity: format!("row {row}"),
        phase: Phase::Primary,
        pass: "survey".to_string(),
        outcome: Outcome::Failed { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panicked_lookup_stays_unconfirmed() {
        let mut unconfirmed = BTreeMap::from([
            (0, "re-cache lookup did not complete".to_string()),
            (1, "re-cache lookup did not complete".to_string()),
            (2, "re-cache lookup did not complete".to_string()),
        ]);

        let task: tokio::task::JoinHandle<(usize, Option<String>)> =
            tokio::spawn(async { panic!("lookup blew up") });
        let panicked = task.await;
        settle_lookup(panicked, &mut unconfirmed);
        settle_lookup(Ok((1, None)), &mut unconfirmed);
        settle_lookup(Ok((2, Some("gone".to_string()))), &mut unconfirmed);

        assert_eq!(unconfirmed.len(), 2);
        assert_eq!(unconfirmed[&0], "re-cache lookup did not complete");
        assert_eq!(unconfirmed[&2], "gone");
    }
}
