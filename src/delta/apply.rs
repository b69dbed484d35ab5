use super::DeltaResult;
use crate::client::SearchCriteria;
use crate::context::RunContext;
use crate::ingest::{EntityResult, Outcome, Phase};
use crate::model::{EntityRecord, Guid, Handle, Placeholder};
use std::collections::{BTreeMap, HashSet};

/// Pass label used for delta-driven deletions in results and reports.
pub const DELETE_PASS: &str = "delete";

#[derive(Debug, Default)]
pub struct DeletionReport {
    pub results: Vec<EntityResult>,
}

impl DeletionReport {
    pub fn deleted(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Deleted))
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Skipped { .. }))
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|result| predicate(&result.outcome))
            .count()
    }
}

/// Delete everything the delta marks as gone, batch by batch, and confirm
/// each batch is no longer active before moving on.
pub async fn apply_deletions(ctx: &RunContext, delta: &DeltaResult) -> DeletionReport {
    let mut report = DeletionReport::default();
    if delta.to_delete.is_empty() {
        return report;
    }

    let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (identity, type_name) in &delta.to_delete {
        by_type
            .entry(type_name.as_str())
            .or_default()
            .push(identity.as_str());
    }

    let batch_size = ctx.settings.batch_size.max(1);
    for (type_name, identities) in by_type {
        log::info!(
            "Deleting {} {} entities ({} mode)",
            identities.len(),
            type_name,
            ctx.settings.delete_mode
        );
        for chunk in identities.chunks(batch_size) {
            report
                .results
                .extend(delete_chunk(ctx, type_name, chunk).await);
        }
    }

    log::info!(
        "Deletion complete: {} deleted, {} skipped, {} failed",
        report.deleted(),
        report.skipped(),
        report.failed()
    );
    report
}

async fn delete_chunk(ctx: &RunContext, type_name: &str, identities: &[&str]) -> Vec<EntityResult> {
    let criteria = SearchCriteria::of_type(type_name).with_identities(identities.iter().copied());

    let existing = match ctx.client().search(&criteria).await {
        Ok(existing) => existing,
        Err(err) => {
            log::warn!("failed to look up {} entities to delete: {}", type_name, err);
            let reason = err.to_string();
            return identities
                .iter()
                .map(|identity| {
                    unresolved(type_name, identity, Outcome::Failed { reason: reason.clone() })
                })
                .collect();
        }
    };

    let found: HashSet<&str> = existing.iter().map(|r| r.identity.as_str()).collect();
    let mut results: Vec<EntityResult> = identities
        .iter()
        .filter(|identity| !found.contains(*identity))
        .map(|identity| {
            unresolved(
                type_name,
                identity,
                Outcome::Skipped {
                    reason: "not found in catalog".to_string(),
                },
            )
        })
        .collect();
    if existing.is_empty() {
        return results;
    }

    let guids: Vec<Guid> = existing.iter().map(|record| record.guid.clone()).collect();
    let remaining = match ctx.client().delete(&guids, ctx.settings.delete_mode).await {
        Ok(_) => still_active(ctx, &criteria).await,
        Err(err) => {
            log::warn!("delete of {} {} entities failed: {}", guids.len(), type_name, err);
            let reason = err.to_string();
            results.extend(existing.into_iter().map(|record| {
                resolved(record, Outcome::Failed { reason: reason.clone() })
            }));
            return results;
        }
    };

    let gone: Vec<Guid> = guids
        .into_iter()
        .filter(|guid| !remaining.contains(guid))
        .collect();
    ctx.cache.evict(&gone);

    for record in existing {
        let outcome = if remaining.contains(&record.guid) {
            Outcome::Failed {
                reason: "still active after delete".to_string(),
            }
        } else {
            Outcome::Deleted
        };
        results.push(resolved(record, outcome));
    }
    results
}

/// Guids still reported active once the lookup retries are used up.
async fn still_active(ctx: &RunContext, criteria: &SearchCriteria) -> HashSet<Guid> {
    let policy = ctx.settings.lookup;
    let mut remaining = HashSet::new();
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
        match ctx.client().search(criteria).await {
            Ok(active) if active.is_empty() => return HashSet::new(),
            Ok(active) => remaining = active.into_iter().map(|r| r.guid).collect(),
            Err(err) => log::debug!("deletion check failed: {}", err),
        }
    }
    remaining
}

fn resolved(record: EntityRecord, outcome: Outcome) -> EntityResult {
    EntityResult {
        handle: Handle::Resolved(record.guid),
        type_name: record.type_name,
        identity: record.identity,
        phase: Phase::Primary,
        pass: DELETE_PASS.to_string(),
        outcome,
    }
}

fn unresolved(type_name: &str, identity: &str, outcome: Outcome) -> EntityResult {
    EntityResult {
        handle: Handle::Placeholder(Placeholder(0)),
        type_name: type_name.to_string(),
        identity: identity.to_string(),
        phase: Phase::Primary,
        pass: DELETE_PASS.to_string(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKey;
    use crate::test_support::memory_context;

    #[tokio::test]
    async fn test_apply_deletions_removes_only_listed_entities() {
        let (catalog, ctx) = memory_context(1);
        catalog.seed("Table", "db/orders", BTreeMap::new());
        catalog.seed("Table", "db/customers", BTreeMap::new());

        let delta = DeltaResult {
            to_delete: BTreeMap::from([
                ("db/orders".to_string(), "Table".to_string()),
                ("db/missing".to_string(), "Table".to_string()),
            ]),
            ..DeltaResult::default()
        };
        let report = apply_deletions(&ctx, &delta).await;

        assert_eq!(report.deleted(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);
        assert!(report.results.iter().all(|r| r.pass == DELETE_PASS));
        assert_eq!(catalog.active_count("Table"), 1);
        assert!(catalog.find("Table", "db/customers").is_some_and(|r| r.is_active()));
    }

    #[tokio::test]
    async fn test_deleted_handles_leave_the_identity_cache() {
        let (catalog, ctx) = memory_context(10);
        let orders = catalog.seed("Table", "db/orders", BTreeMap::new());
        let customers = catalog.seed("Table", "db/customers", BTreeMap::new());
        ctx.cache.insert(EntityKey::new("Table", "db/orders"), orders);
        ctx.cache
            .insert(EntityKey::new("Table", "db/customers"), customers.clone());

        let delta = DeltaResult {
            to_delete: BTreeMap::from([("db/orders".to_string(), "Table".to_string())]),
            ..DeltaResult::default()
        };
        apply_deletions(&ctx, &delta).await;

        assert!(ctx.cache.get_by_identity("Table", "db/orders").is_none());
        assert_eq!(ctx.cache.get_by_identity("Table", "db/customers"), Some(customers));
    }

    #[tokio::test]
    async fn test_empty_delta_touches_nothing() {
        let (catalog, ctx) = memory_context(10);
        catalog.seed("Table", "db/orders", BTreeMap::new());

        let report = apply_deletions(&ctx, &DeltaResult::default()).await;

        assert!(report.results.is_empty());
        assert_eq!(catalog.active_count("Table"), 1);
    }
}
