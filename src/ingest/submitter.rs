use super::stats::{EntityResult, Outcome, Phase};
use crate::client::{MutationStatus, SubmitRequest};
use crate::context::RunContext;
use crate::model::{Entity, Guid, Handle, Placeholder};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one bulk write.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<EntityResult>,
    /// Placeholder to resolved handle for every created or matched entity.
    pub mapping: HashMap<Placeholder, Guid>,
    /// Placeholders of entities that did not resolve.
    pub unresolved: Vec<Placeholder>,
}

impl BatchReport {
    pub fn merge(&mut self, other: BatchReport) {
        self.results.extend(other.results);
        self.mapping.extend(other.mapping);
        self.unresolved.extend(other.unresolved);
    }
}

/// Submits batches for one phase of one pass.
///
/// A failed batch never aborts the run: every entity in it is reported as
/// failed and the caller carries on with the next batch.
#[derive(Clone)]
pub struct BatchSubmitter {
    ctx: Arc<RunContext>,
    phase: Phase,
    pass: String,
}

impl BatchSubmitter {
    pub fn new(ctx: Arc<RunContext>, phase: Phase, pass: impl Into<String>) -> Self {
        Self {
            ctx,
            phase,
            pass: pass.into(),
        }
    }

    pub async fn submit(&self, batch: Vec<Entity>) -> BatchReport {
        let mut report = BatchReport::default();
        if batch.is_empty() {
            return report;
        }

        let request = SubmitRequest {
            mode: self.ctx.settings.mode,
            entities: batch,
        };
        let size = request.entities.len();

        let response = match self.ctx.client().submit(request.clone()).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!(
                    "{} batch of {} entities failed in pass {}: {}",
                    self.phase,
                    size,
                    self.pass,
                    err
                );
                let reason = err.to_string();
                for entity in request.entities {
                    report.unresolved.extend(entity.placeholder());
                    report.results.push(self.result(
                        &entity,
                        entity.handle.clone(),
                        Outcome::Failed {
                            reason: reason.clone(),
                        },
                    ));
                }
                return report;
            }
        };

        let mut mutations: HashMap<Handle, _> = response
            .mutations
            .into_iter()
            .map(|mutation| (mutation.handle.clone(), mutation))
            .collect();

        for entity in &request.entities {
            let Some(mutation) = mutations.remove(&entity.handle) else {
                report.unresolved.extend(entity.placeholder());
                report.results.push(self.result(
                    entity,
                    entity.handle.clone(),
                    Outcome::Failed {
                        reason: "catalog reported no outcome".to_string(),
                    },
                ));
                continue;
            };

            let outcome = match mutation.status {
                MutationStatus::Created => Outcome::Created,
                MutationStatus::Updated => Outcome::Updated,
                MutationStatus::Skipped { reason } => Outcome::Skipped { reason },
                MutationStatus::Failed { reason } => Outcome::Failed { reason },
            };

            match (&outcome, mutation.guid) {
                (Outcome::Created | Outcome::Updated, Some(guid)) => {
                    let guid = self.ctx.cache.add_by_handle(guid, entity);
                    if let Some(placeholder) = entity.placeholder() {
                        report.mapping.insert(placeholder, guid.clone());
                    }
                    report
                        .results
                        .push(self.result(entity, Handle::Resolved(guid), outcome));
                }
                (Outcome::Created | Outcome::Updated, None) => {
                    report.unresolved.extend(entity.placeholder());
                    report.results.push(self.result(
                        entity,
                        entity.handle.clone(),
                        Outcome::Failed {
                            reason: "catalog returned no handle".to_string(),
                        },
                    ));
                }
                (_, _) => {
                    if let Outcome::Failed { reason } = &outcome {
                        log::warn!("{} {} failed: {}", entity.type_name, entity.identity, reason);
                    }
                    report.unresolved.extend(entity.placeholder());
                    report
                        .results
                        .push(self.result(entity, entity.handle.clone(), outcome));
                }
            }
        }

        log::debug!(
            "{} batch of {} in pass {}: {} resolved, {} unresolved",
            self.phase,
            size,
            self.pass,
            report.mapping.len(),
            report.unresolved.len()
        );

        report
    }

    fn result(&self, entity: &Entity, handle: Handle, outcome: Outcome) -> EntityResult {
        EntityResult {
            handle,
            type_name: entity.type_name.clone(),
            identity: entity.identity.clone(),
            phase: self.phase,
            pass: self.pass.clone(),
            outcome,
        }
    }
}
