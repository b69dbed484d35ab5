//! Deferred relationship resolution.
//!
//! Related entities that point back at a primary cannot be submitted until
//! the primary's batch has flushed and its real handle is known. They wait
//! in a [`HoldStore`] keyed by the primary's placeholder. Delete markers wait
//! the same way in a [`MarkerStore`].

use super::stats::{EntityResult, Outcome, Phase};
use crate::client::SearchCriteria;
use crate::context::RunContext;
use crate::handlers::{DeleteMarker, OWNER_RELATIONSHIP, RelatedHold, owned_type};
use crate::model::{Entity, Guid, Handle, Placeholder, Reference};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct HoldStore {
    holds: HashMap<Placeholder, RelatedHold>,
}

impl HoldStore {
    pub fn insert(&mut self, primary: Placeholder, hold: RelatedHold) {
        self.holds.insert(primary, hold);
    }

    pub fn merge(&mut self, other: HoldStore) {
        self.holds.extend(other.holds);
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }

    /// Complete and release every hold whose primary appears in `mapping`.
    /// The returned entities carry the primary's resolved handle.
    pub fn take_resolved(&mut self, mapping: &HashMap<Placeholder, Guid>) -> Vec<Entity> {
        let ready: Vec<Placeholder> = self
            .holds
            .keys()
            .filter(|placeholder| mapping.contains_key(placeholder))
            .copied()
            .collect();

        let mut entities = Vec::new();
        for placeholder in ready {
            if let (Some(hold), Some(guid)) =
                (self.holds.remove(&placeholder), mapping.get(&placeholder))
            {
                entities.extend(complete(hold, guid));
            }
        }
        entities
    }

    /// Discard holds of primaries that failed to resolve. Returns how many
    /// were dropped.
    pub fn drop_unresolved(&mut self, primaries: &[Placeholder]) -> usize {
        let mut dropped = 0;
        for placeholder in primaries {
            if let Some(hold) = self.holds.remove(placeholder) {
                log::warn!(
                    "dropping {} related entities of {}: primary did not resolve",
                    hold.len(),
                    hold.primary
                );
                dropped += 1;
            }
        }
        dropped
    }

    /// Discard everything still held.
    pub fn drain(&mut self) -> usize {
        let remaining: Vec<Placeholder> = self.holds.keys().copied().collect();
        self.drop_unresolved(&remaining)
    }
}

fn complete(hold: RelatedHold, primary: &Guid) -> Vec<Entity> {
    hold.related
        .into_values()
        .flatten()
        .map(|related| {
            let mut entity = related.entity;
            entity.relationships.insert(
                related.back_reference,
                vec![Reference::guid(primary.clone())],
            );
            entity
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct MarkerStore {
    markers: HashMap<Placeholder, DeleteMarker>,
}

impl MarkerStore {
    pub fn insert(&mut self, primary: Placeholder, marker: DeleteMarker) {
        self.markers.insert(primary, marker);
    }

    pub fn merge(&mut self, other: MarkerStore) {
        self.markers.extend(other.markers);
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers whose primary resolved; the rest are dropped.
    pub fn into_resolved(self, mapping: &HashMap<Placeholder, Guid>) -> Vec<(Guid, DeleteMarker)> {
        let mut resolved = Vec::with_capacity(self.markers.len());
        for (placeholder, marker) in self.markers {
            match mapping.get(&placeholder) {
                Some(guid) => resolved.push((guid.clone(), marker)),
                None => log::warn!(
                    "dropping delete marker of {}: primary did not resolve",
                    marker.primary
                ),
            }
        }
        resolved
    }
}

/// Remove the existing targets of every marked owned relationship, then poll
/// until the catalog stops reporting them.
pub async fn clear_markers(
    ctx: &RunContext,
    markers: Vec<(Guid, DeleteMarker)>,
    pass: &str,
) -> Vec<EntityResult> {
    let mut results = Vec::new();

    for (primary, marker) in markers {
        for relationship in &marker.relationships {
            let Some(owned) = owned_type(relationship) else {
                continue;
            };
            let criteria =
                SearchCriteria::of_type(owned).related_to(primary.clone(), OWNER_RELATIONSHIP);

            let existing = match ctx.client().search(&criteria).await {
                Ok(existing) => existing,
                Err(err) => {
                    log::warn!(
                        "failed to list {} of {}: {}",
                        relationship,
                        marker.primary,
                        err
                    );
                    continue;
                }
            };
            if existing.is_empty() {
                continue;
            }

            let guids: Vec<Guid> = existing.iter().map(|record| record.guid.clone()).collect();
            let outcome = match ctx.client().delete(&guids, ctx.settings.delete_mode).await {
                Ok(_) if verify_cleared(ctx, &criteria).await => {
                    ctx.cache.evict(&guids);
                    Outcome::Deleted
                }
                Ok(_) => Outcome::Failed {
                    reason: format!("{relationship} still present after delete"),
                },
                Err(err) => Outcome::Failed {
                    reason: err.to_string(),
                },
            };

            for record in existing {
                results.push(EntityResult {
                    handle: Handle::Resolved(record.guid),
                    type_name: record.type_name,
                    identity: record.identity,
                    phase: Phase::Related,
                    pass: pass.to_string(),
                    outcome: outcome.clone(),
                });
            }
        }
    }

    results
}

async fn verify_cleared(ctx: &RunContext, criteria: &SearchCriteria) -> bool {
    let policy = ctx.settings.lookup;
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
        match ctx.client().search(criteria).await {
            Ok(remaining) if remaining.is_empty() => return true,
            Ok(_) => {}
            Err(err) => log::debug!("verification search failed: {}", err),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::RelatedEntity;
    use crate::model::EntityKey;
    use crate::test_support::memory_context;
    use std::collections::{BTreeMap, BTreeSet};

    fn hold() -> RelatedHold {
        let readme = Entity::new(Placeholder(2), "Readme", "db/orders/readme");
        RelatedHold {
            primary: EntityKey::new("Table", "db/orders"),
            related: BTreeMap::from([(
                "readme".to_string(),
                vec![RelatedEntity {
                    entity: readme,
                    back_reference: OWNER_RELATIONSHIP.to_string(),
                }],
            )]),
        }
    }

    #[test]
    fn test_take_resolved_substitutes_primary_handle() {
        let mut store = HoldStore::default();
        store.insert(Placeholder(1), hold());

        let mapping = HashMap::from([(Placeholder(1), Guid::new("g-orders"))]);
        let entities = store.take_resolved(&mapping);

        assert_eq!(entities.len(), 1);
        assert_eq!(
            entities[0].relationships[OWNER_RELATIONSHIP],
            vec![Reference::guid(Guid::new("g-orders"))]
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_unresolved_holds_stay_until_dropped() {
        let mut store = HoldStore::default();
        store.insert(Placeholder(1), hold());

        assert!(store.take_resolved(&HashMap::new()).is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(store.drop_unresolved(&[Placeholder(1)]), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_markers_deletes_owned_entities() {
        let (catalog, ctx) = memory_context(10);
        let table = catalog.seed("Table", "db/orders", BTreeMap::new());
        let readme = catalog.seed("Readme", "db/orders/readme", BTreeMap::new());
        catalog.seed_relationship(&readme, OWNER_RELATIONSHIP, &table);

        ctx.cache
            .insert(EntityKey::new("Readme", "db/orders/readme"), readme);

        let marker = DeleteMarker {
            primary: EntityKey::new("Table", "db/orders"),
            relationships: BTreeSet::from(["readme".to_string()]),
        };
        let results = clear_markers(&ctx, vec![(table, marker)], "primary").await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::Deleted);
        assert_eq!(catalog.active_count("Readme"), 0);
        assert!(ctx.cache.get_by_identity("Readme", "db/orders/readme").is_none());
    }
}
