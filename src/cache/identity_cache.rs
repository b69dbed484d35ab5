//! Identity cache shared by every worker of a run
//!
//! ## Design
//!
//! - DashMap keyed by `(type, identity)` so workers never contend on one lock
//! - Write-once per key: the first handle stored for an identity wins and
//!   racing writers get that handle back
//! - Optional disk persistence via bincode for reuse across runs
//! - Entries loaded from disk are provisional: the first handle the catalog
//!   reports for that identity in this run replaces them
//! - Deleted handles are evicted so later runs never see them

use super::{CacheError, CacheStats};
use crate::client::{CatalogClient, SearchCriteria};
use crate::config::RetryPolicy;
use crate::model::{Entity, EntityKey, EntityRecord, Guid, Reference};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    entries: Arc<DashMap<EntityKey, CachedHandle>>,
}

#[derive(Debug, Clone)]
struct CachedHandle {
    guid: Guid,
    /// Reported by the catalog during this run rather than read from disk.
    confirmed: bool,
}

/// Serializable format for disk storage
#[derive(Serialize, Deserialize)]
struct StoredIdentityCache {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<(EntityKey, Guid)>,
}

impl IdentityCache {
    /// Current cache format version
    const CACHE_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record `guid` for `key` unless this run already cached a handle, and
    /// return the handle that is cached afterwards.
    pub fn insert(&self, key: EntityKey, guid: Guid) -> Guid {
        let fresh = CachedHandle {
            guid: guid.clone(),
            confirmed: true,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut existing) if !existing.get().confirmed => {
                if existing.get().guid != guid {
                    log::debug!(
                        "identity {} was cached as {} by an earlier run, now {}",
                        existing.key(),
                        existing.get().guid,
                        guid
                    );
                }
                existing.insert(fresh);
                guid
            }
            Entry::Occupied(existing) => {
                if existing.get().guid != guid {
                    log::warn!(
                        "identity {} already cached as {}, ignoring {}",
                        existing.key(),
                        existing.get().guid,
                        guid
                    );
                }
                existing.get().guid.clone()
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                guid
            }
        }
    }

    /// Drop every identity cached under one of `guids`. Returns how many
    /// entries were removed.
    pub fn evict(&self, guids: &[Guid]) -> usize {
        if guids.is_empty() {
            return 0;
        }
        let gone: HashSet<&Guid> = guids.iter().collect();
        let before = self.entries.len();
        self.entries.retain(|_, cached| !gone.contains(&cached.guid));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::debug!("Evicted {} deleted handles from identity cache", evicted);
        }
        evicted
    }

    /// Write path after a bulk write: the identity comes from the entity as
    /// submitted.
    pub fn add_by_handle(&self, guid: Guid, entity: &Entity) -> Guid {
        self.insert(entity.key(), guid)
    }

    /// Write path after a lookup: the identity comes from what the catalog
    /// stored.
    pub fn add_record(&self, record: &EntityRecord) -> Guid {
        self.insert(record.key(), record.guid.clone())
    }

    pub fn get(&self, key: &EntityKey) -> Option<Guid> {
        self.entries.get(key).map(|entry| entry.value().guid.clone())
    }

    pub fn get_by_identity(&self, type_name: &str, identity: &str) -> Option<Guid> {
        self.get(&EntityKey::new(type_name, identity))
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Replace an identity reference with a handle reference when the
    /// target is cached.
    pub fn resolve_reference(&self, reference: Reference) -> Reference {
        match &reference {
            Reference::Identity {
                type_name: Some(type_name),
                identity,
            } => match self.get_by_identity(type_name, identity) {
                Some(guid) => Reference::guid(guid),
                None => reference,
            },
            _ => reference,
        }
    }

    /// Bulk-fetch every active entity of `type_name`.
    pub async fn preload(
        &self,
        client: &dyn CatalogClient,
        type_name: &str,
    ) -> Result<usize, CacheError> {
        let records = client.search(&SearchCriteria::of_type(type_name)).await?;
        for record in &records {
            self.add_record(record);
        }

        log::info!(
            "Preloaded {} {} identities into cache",
            records.len(),
            type_name
        );
        Ok(records.len())
    }

    /// Fetch an entity by handle and cache it under its stored identity,
    /// retrying with backoff while the catalog does not report it yet.
    pub async fn lookup_with_retry(
        &self,
        client: &dyn CatalogClient,
        guid: &Guid,
        policy: &RetryPolicy,
    ) -> Result<EntityRecord, CacheError> {
        let attempts = policy.max_retries + 1;
        for attempt in 1..=attempts {
            if let Some(record) = client.lookup_by_handle(guid).await? {
                self.add_record(&record);
                return Ok(record);
            }

            if attempt < attempts {
                let delay = policy.backoff(attempt);
                log::debug!(
                    "{} not visible yet (attempt {}/{}), retrying in {:?}",
                    guid,
                    attempt,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(CacheError::LookupExhausted {
            guid: guid.clone(),
            attempts,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut by_type = BTreeMap::new();
        for entry in self.entries.iter() {
            *by_type.entry(entry.key().type_name.clone()).or_insert(0) += 1;
        }
        CacheStats {
            entries: self.entries.len(),
            by_type,
        }
    }

    /// Load cache from disk (bincode serialized)
    ///
    /// ## Errors
    ///
    /// Returns `CacheError::NotFound` if the file doesn't exist
    /// Returns `CacheError::VersionMismatch` if the format is incompatible
    pub fn load_from_disk(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            return Err(CacheError::NotFound);
        }

        let serialized_data = std::fs::read(path).map_err(|e| CacheError::IoError(e.to_string()))?;
        let stored: StoredIdentityCache = bincode::deserialize(&serialized_data)
            .map_err(|e| CacheError::DeserializeError(e.to_string()))?;

        if stored.version != Self::CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                expected: Self::CACHE_VERSION,
                found: stored.version,
            });
        }

        let entries = Arc::new(DashMap::with_capacity(stored.entries.len()));
        for (key, guid) in stored.entries {
            entries.insert(
                key,
                CachedHandle {
                    guid,
                    confirmed: false,
                },
            );
        }

        log::info!(
            "Loaded identity cache from disk: {} entries (saved {})",
            entries.len(),
            stored.saved_at.to_rfc3339()
        );

        Ok(Self { entries })
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<(), CacheError> {
        let stored = StoredIdentityCache {
            version: Self::CACHE_VERSION,
            saved_at: Utc::now(),
            entries: self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().guid.clone()))
                .collect(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::IoError(e.to_string()))?;
        }

        let serialized_data =
            bincode::serialize(&stored).map_err(|e| CacheError::SerializeError(e.to_string()))?;
        std::fs::write(path, &serialized_data).map_err(|e| CacheError::IoError(e.to_string()))?;

        log::info!(
            "Saved identity cache: {} entries ({} bytes)",
            stored.entries.len(),
            serialized_data.len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryCatalog, SubmitMode, SubmitRequest};
    use crate::model::Placeholder;
    use std::collections::BTreeMap;

    #[test]
    fn test_insert_is_write_once() {
        let cache = IdentityCache::new();
        let key = EntityKey::new("Table", "db/orders");

        let first = cache.insert(key.clone(), Guid::new("g-1"));
        let second = cache.insert(key.clone(), Guid::new("g-2"));

        assert_eq!(first, Guid::new("g-1"));
        assert_eq!(second, Guid::new("g-1"));
        assert_eq!(cache.get(&key), Some(Guid::new("g-1")));
    }

    #[test]
    fn test_concurrent_writers_agree_on_one_handle() {
        let cache = IdentityCache::new();
        let key = EntityKey::new("Table", "db/orders");

        let winners: Vec<Guid> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|n| {
                    let cache = cache.clone();
                    let key = key.clone();
                    scope.spawn(move || cache.insert(key, Guid::new(format!("g-{n}"))))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let stored = cache.get(&key).unwrap();
        assert!(winners.iter().all(|guid| *guid == stored));
    }

    #[test]
    fn test_resolve_reference_uses_cached_handle() {
        let cache = IdentityCache::new();
        cache.insert(EntityKey::new("GlossaryTerm", "revenue"), Guid::new("g-7"));

        let hit = cache.resolve_reference(Reference::parse("revenue", Some("GlossaryTerm")));
        assert_eq!(hit, Reference::guid(Guid::new("g-7")));

        let miss = cache.resolve_reference(Reference::parse("margin", Some("GlossaryTerm")));
        assert!(miss.as_guid().is_none());
    }

    #[tokio::test]
    async fn test_preload_fetches_type() {
        let catalog = MemoryCatalog::new();
        catalog.seed("Table", "db/a", BTreeMap::new());
        catalog.seed("Table", "db/b", BTreeMap::new());
        catalog.seed("View", "db/c", BTreeMap::new());

        let cache = IdentityCache::new();
        let loaded = cache.preload(&catalog, "Table").await.unwrap();

        assert_eq!(loaded, 2);
        assert!(cache.get_by_identity("Table", "db/a").is_some());
        assert!(cache.get_by_identity("View", "db/c").is_none());
    }

    #[tokio::test]
    async fn test_lookup_with_retry_tolerates_lag() {
        let catalog = MemoryCatalog::new().with_read_lag(2);
        let response = catalog
            .submit(SubmitRequest {
                mode: SubmitMode::Upsert,
                entities: vec![Entity::new(Placeholder(1), "Table", "db/orders")],
            })
            .await
            .unwrap();
        let guid = response.mutations[0].guid.clone().unwrap();

        let cache = IdentityCache::new();
        let record = cache
            .lookup_with_retry(&catalog, &guid, &RetryPolicy::immediate(3))
            .await
            .unwrap();

        assert_eq!(record.identity, "db/orders");
        assert_eq!(cache.get_by_identity("Table", "db/orders"), Some(guid));
    }

    #[tokio::test]
    async fn test_lookup_with_retry_gives_up() {
        let catalog = MemoryCatalog::new().with_read_lag(5);
        let response = catalog
            .submit(SubmitRequest {
                mode: SubmitMode::Upsert,
                entities: vec![Entity::new(Placeholder(1), "Table", "db/orders")],
            })
            .await
            .unwrap();
        let guid = response.mutations[0].guid.clone().unwrap();

        let err = IdentityCache::new()
            .lookup_with_retry(&catalog, &guid, &RetryPolicy::immediate(1))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::LookupExhausted { attempts: 2, .. }));
    }

    #[test]
    fn test_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("identities.bin");

        let cache = IdentityCache::new();
        cache.insert(EntityKey::new("Table", "db/orders"), Guid::new("g-1"));
        cache.save_to_disk(&path).unwrap();

        let loaded = IdentityCache::load_from_disk(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.stats().by_type.get("Table"), Some(&1));
    }

    #[test]
    fn test_catalog_handle_replaces_one_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.bin");
        let key = EntityKey::new("Table", "db/orders");

        let earlier = IdentityCache::new();
        earlier.insert(key.clone(), Guid::new("g-old"));
        earlier.save_to_disk(&path).unwrap();

        let cache = IdentityCache::load_from_disk(&path).unwrap();
        assert_eq!(cache.get(&key), Some(Guid::new("g-old")));

        assert_eq!(cache.insert(key.clone(), Guid::new("g-new")), Guid::new("g-new"));
        // From here on the handle is write-once again
        assert_eq!(cache.insert(key.clone(), Guid::new("g-other")), Guid::new("g-new"));
        assert_eq!(cache.get(&key), Some(Guid::new("g-new")));
    }

    #[test]
    fn test_evict_removes_deleted_handles() {
        let cache = IdentityCache::new();
        cache.insert(EntityKey::new("Table", "db/a"), Guid::new("g-a"));
        cache.insert(EntityKey::new("Table", "db/b"), Guid::new("g-b"));

        assert_eq!(cache.evict(&[Guid::new("g-b"), Guid::new("g-unknown")]), 1);
        assert!(cache.get_by_identity("Table", "db/b").is_none());
        assert_eq!(cache.get_by_identity("Table", "db/a"), Some(Guid::new("g-a")));
        assert_eq!(cache.evict(&[]), 0);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = IdentityCache::load_from_disk(&dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, CacheError::NotFound));
    }
}
