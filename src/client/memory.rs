use super::{
    CatalogClient, ClientError, DeleteMode, EntityMutation, MutationStatus, SearchCriteria,
    SubmitMode, SubmitRequest, SubmitResponse,
};
use crate::model::{Entity, EntityKey, EntityRecord, EntityStatus, Guid, Reference};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct CatalogState {
    records: HashMap<Guid, EntityRecord>,
    index: HashMap<EntityKey, Guid>,
    /// Remaining lookups that still miss for a freshly written handle.
    pending_reads: HashMap<Guid, usize>,
    rejected: HashSet<String>,
    submissions: Vec<Vec<Entity>>,
}

/// In-process catalog.
///
/// Entities are upserted by `(type, identity)`. A `null` attribute clears
/// the stored value and a relationship field replaces the stored targets.
/// References must point at entities already present, otherwise that entity
/// alone fails. Failures and read-after-write lag can be injected.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    failing_batches: AtomicUsize,
    read_lag: usize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookups by handle miss `lag` times after every write before the
    /// entity becomes visible.
    pub fn with_read_lag(mut self, lag: usize) -> Self {
        self.read_lag = lag;
        self
    }

    /// Every entity with this identity fails validation.
    pub fn reject_identity(&self, identity: impl Into<String>) {
        self.state.lock().rejected.insert(identity.into());
    }

    /// The next `count` bulk writes fail as a whole.
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// Every bulk write received so far, in arrival order.
    pub fn submissions(&self) -> Vec<Vec<Entity>> {
        self.state.lock().submissions.clone()
    }

    pub fn find(&self, type_name: &str, identity: &str) -> Option<EntityRecord> {
        let state = self.state.lock();
        state
            .index
            .get(&EntityKey::new(type_name, identity))
            .and_then(|guid| state.records.get(guid))
            .cloned()
    }

    pub fn get(&self, guid: &Guid) -> Option<EntityRecord> {
        self.state.lock().records.get(guid).cloned()
    }

    pub fn active_count(&self, type_name: &str) -> usize {
        self.state
            .lock()
            .records
            .values()
            .filter(|record| record.type_name == type_name && record.is_active())
            .count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entity directly, bypassing submission and read lag.
    pub fn seed(
        &self,
        type_name: &str,
        identity: &str,
        attributes: BTreeMap<String, Value>,
    ) -> Guid {
        let mut state = self.state.lock();
        let key = EntityKey::new(type_name, identity);
        if let Some(guid) = state.index.get(&key) {
            return guid.clone();
        }

        let guid = Guid::new(uuid::Uuid::new_v4().to_string());
        state.records.insert(
            guid.clone(),
            EntityRecord {
                guid: guid.clone(),
                type_name: type_name.to_string(),
                identity: identity.to_string(),
                status: EntityStatus::Active,
                attributes,
                relationships: BTreeMap::new(),
            },
        );
        state.index.insert(key, guid.clone());
        guid
    }

    /// Link `from` to `to` under `relationship`, as if written by a bulk
    /// write.
    pub fn seed_relationship(&self, from: &Guid, relationship: &str, to: &Guid) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(from) {
            record
                .relationships
                .entry(relationship.to_string())
                .or_default()
                .push(to.clone());
        }
    }

    fn resolve_reference(state: &CatalogState, reference: &Reference) -> Result<Guid, String> {
        match reference {
            Reference::Guid { guid } => match state.records.get(guid) {
                Some(record) if record.is_active() => Ok(guid.clone()),
                _ => Err(format!("unknown handle {guid}")),
            },
            Reference::Identity {
                type_name: Some(type_name),
                identity,
            } => state
                .index
                .get(&EntityKey::new(type_name.as_str(), identity.as_str()))
                .filter(|guid| {
                    state
                        .records
                        .get(*guid)
                        .is_some_and(EntityRecord::is_active)
                })
                .cloned()
                .ok_or_else(|| format!("unknown reference {type_name}@{identity}")),
            Reference::Identity {
                type_name: None,
                identity,
            } => {
                let mut matches = state
                    .records
                    .values()
                    .filter(|record| record.identity == *identity && record.is_active());
                match (matches.next(), matches.next()) {
                    (Some(record), None) => Ok(record.guid.clone()),
                    (Some(_), Some(_)) => Err(format!("ambiguous reference {identity}")),
                    (None, _) => Err(format!("unknown reference {identity}")),
                }
            }
        }
    }

    fn apply(
        state: &mut CatalogState,
        mode: SubmitMode,
        entity: &Entity,
        read_lag: usize,
    ) -> (Option<Guid>, MutationStatus) {
        if state.rejected.contains(&entity.identity) {
            return (
                None,
                MutationStatus::Failed {
                    reason: format!("validation failed for {}", entity.key()),
                },
            );
        }

        let mut relationships = BTreeMap::new();
        for (field, references) in &entity.relationships {
            let mut targets = Vec::with_capacity(references.len());
            for reference in references {
                match Self::resolve_reference(state, reference) {
                    Ok(guid) => targets.push(guid),
                    Err(reason) => {
                        return (
                            None,
                            MutationStatus::Failed {
                                reason: format!("{field}: {reason}"),
                            },
                        );
                    }
                }
            }
            relationships.insert(field.clone(), targets);
        }

        let key = entity.key();
        if let Some(guid) = state.index.get(&key).cloned() {
            if let Some(record) = state.records.get_mut(&guid) {
                record.status = EntityStatus::Active;
                for (name, value) in &entity.attributes {
                    if value.is_null() {
                        record.attributes.remove(name);
                    } else {
                        record.attributes.insert(name.clone(), value.clone());
                    }
                }
                record.relationships.extend(relationships);
            }
            return (Some(guid), MutationStatus::Updated);
        }

        if mode == SubmitMode::UpdateOnly {
            return (
                None,
                MutationStatus::Skipped {
                    reason: "not found in catalog".to_string(),
                },
            );
        }

        let guid = Guid::new(uuid::Uuid::new_v4().to_string());
        let attributes = entity
            .attributes
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        state.records.insert(
            guid.clone(),
            EntityRecord {
                guid: guid.clone(),
                type_name: entity.type_name.clone(),
                identity: entity.identity.clone(),
                status: EntityStatus::Active,
                attributes,
                relationships,
            },
        );
        state.index.insert(key, guid.clone());
        if read_lag > 0 {
            state.pending_reads.insert(guid.clone(), read_lag);
        }

        (Some(guid), MutationStatus::Created)
    }

    fn matches(record: &EntityRecord, criteria: &SearchCriteria) -> bool {
        if !criteria.include_deleted && !record.is_active() {
            return false;
        }
        if let Some(type_name) = &criteria.type_name
            && record.type_name != *type_name
        {
            return false;
        }
        if !criteria.identities.is_empty() && !criteria.identities.contains(&record.identity) {
            return false;
        }
        if let Some(related) = &criteria.related_to {
            let linked = record
                .relationships
                .get(&related.relationship)
                .is_some_and(|targets| targets.contains(&related.guid));
            if !linked {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, ClientError> {
        let mut state = self.state.lock();
        state.submissions.push(request.entities.clone());

        let failing = self.failing_batches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_batches.store(failing - 1, Ordering::SeqCst);
            return Err(ClientError::Service {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "injected batch failure".to_string(),
            });
        }

        let mutations = request
            .entities
            .iter()
            .map(|entity| {
                let (guid, status) = Self::apply(&mut state, request.mode, entity, self.read_lag);
                EntityMutation {
                    handle: entity.handle.clone(),
                    guid,
                    status,
                }
            })
            .collect();

        Ok(SubmitResponse { mutations })
    }

    async fn lookup_by_handle(&self, guid: &Guid) -> Result<Option<EntityRecord>, ClientError> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.pending_reads.get_mut(guid) {
            *remaining -= 1;
            if *remaining == 0 {
                state.pending_reads.remove(guid);
            }
            return Ok(None);
        }
        Ok(state.records.get(guid).cloned())
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<EntityRecord>, ClientError> {
        let state = self.state.lock();
        let mut found: Vec<EntityRecord> = state
            .records
            .values()
            .filter(|record| Self::matches(record, criteria))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(found)
    }

    async fn delete(&self, guids: &[Guid], mode: DeleteMode) -> Result<Vec<Guid>, ClientError> {
        let mut state = self.state.lock();
        let mut deleted = Vec::new();

        for guid in guids {
            match mode {
                DeleteMode::Soft => {
                    if let Some(record) = state.records.get_mut(guid)
                        && record.is_active()
                    {
                        record.status = EntityStatus::Deleted;
                        deleted.push(guid.clone());
                    }
                }
                DeleteMode::Hard | DeleteMode::Purge => {
                    if let Some(record) = state.records.remove(guid) {
                        state.index.remove(&record.key());
                        state.pending_reads.remove(guid);
                        deleted.push(guid.clone());
                    }
                }
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Placeholder;
    use serde_json::json;

    fn table(seq: u64, identity: &str) -> Entity {
        Entity::new(Placeholder(seq), "Table", identity)
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let catalog = MemoryCatalog::new();
        let request = SubmitRequest {
            mode: SubmitMode::Upsert,
            entities: vec![table(1, "db/orders").with_attribute("owner", json!("ops"))],
        };

        let first = catalog.submit(request.clone()).await.unwrap();
        let second = catalog.submit(request).await.unwrap();

        assert_eq!(first.mutations[0].status, MutationStatus::Created);
        assert_eq!(second.mutations[0].status, MutationStatus::Updated);
        assert_eq!(first.mutations[0].guid, second.mutations[0].guid);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_null_attribute_clears_value() {
        let catalog = MemoryCatalog::new();
        let mut attributes = BTreeMap::new();
        attributes.insert("owner".to_string(), json!("ops"));
        catalog.seed("Table", "db/orders", attributes);

        catalog
            .submit(SubmitRequest {
                mode: SubmitMode::Upsert,
                entities: vec![table(1, "db/orders").with_attribute("owner", Value::Null)],
            })
            .await
            .unwrap();

        let stored = catalog.find("Table", "db/orders").unwrap();
        assert!(!stored.attributes.contains_key("owner"));
    }

    #[tokio::test]
    async fn test_update_only_skips_unknown_identity() {
        let catalog = MemoryCatalog::new();
        let response = catalog
            .submit(SubmitRequest {
                mode: SubmitMode::UpdateOnly,
                entities: vec![table(1, "db/missing")],
            })
            .await
            .unwrap();

        assert!(matches!(
            response.mutations[0].status,
            MutationStatus::Skipped { .. }
        ));
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_reference_fails_only_that_entity() {
        let catalog = MemoryCatalog::new();
        let mut broken = table(2, "db/broken");
        broken.relationships.insert(
            "assignedTerms".to_string(),
            vec![Reference::parse("GlossaryTerm@nowhere", None)],
        );

        let response = catalog
            .submit(SubmitRequest {
                mode: SubmitMode::Upsert,
                entities: vec![table(1, "db/ok"), broken],
            })
            .await
            .unwrap();

        assert_eq!(response.mutations[0].status, MutationStatus::Created);
        assert!(matches!(
            response.mutations[1].status,
            MutationStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_read_lag_hides_new_entity() {
        let catalog = MemoryCatalog::new().with_read_lag(2);
        let response = catalog
            .submit(SubmitRequest {
                mode: SubmitMode::Upsert,
                entities: vec![table(1, "db/orders")],
            })
            .await
            .unwrap();
        let guid = response.mutations[0].guid.clone().unwrap();

        assert!(catalog.lookup_by_handle(&guid).await.unwrap().is_none());
        assert!(catalog.lookup_by_handle(&guid).await.unwrap().is_none());
        assert!(catalog.lookup_by_handle(&guid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_injected_batch_failure() {
        let catalog = MemoryCatalog::new();
        catalog.fail_next_batches(1);
        let request = SubmitRequest {
            mode: SubmitMode::Upsert,
            entities: vec![table(1, "db/orders")],
        };

        assert!(catalog.submit(request.clone()).await.is_err());
        assert!(catalog.submit(request).await.is_ok());
        assert_eq!(catalog.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_search() {
        let catalog = MemoryCatalog::new();
        let guid = catalog.seed("Table", "db/orders", BTreeMap::new());

        let deleted = catalog.delete(&[guid.clone()], DeleteMode::Soft).await.unwrap();
        assert_eq!(deleted, vec![guid]);

        let active = catalog
            .search(&SearchCriteria::of_type("Table"))
            .await
            .unwrap();
        assert!(active.is_empty());

        let all = catalog
            .search(&SearchCriteria::of_type("Table").including_deleted())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }
}
