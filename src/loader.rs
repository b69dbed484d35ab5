//! One call that runs a whole load: optional delta, multi-pass ingestion,
//! delta-driven deletions and cache persistence.

use crate::cache::{CacheError, IdentityCache};
use crate::client::CatalogClient;
use crate::config::LoaderConfig;
use crate::context::RunContext;
use crate::controller::MultiPassController;
use crate::delta::{DeltaEngine, DeltaResult, apply_deletions};
use crate::error::LoaderError;
use crate::handlers::HandlerRegistry;
use crate::ingest::RunReport;
use crate::schema::{RelationshipSchema, StaticSchema};
use crate::source::RecordSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct BulkLoader {
    config: LoaderConfig,
    client: Arc<dyn CatalogClient>,
    schema: Arc<dyn RelationshipSchema>,
    registry: Arc<HandlerRegistry>,
    cache_file: Option<PathBuf>,
}

/// Report of one load plus the delta that filtered it, if any.
#[derive(Debug)]
pub struct LoadRun {
    pub report: RunReport,
    pub delta: Option<DeltaResult>,
}

impl BulkLoader {
    pub fn new(config: LoaderConfig, client: Arc<dyn CatalogClient>) -> Self {
        Self {
            config,
            client,
            schema: Arc::new(StaticSchema::builtin()),
            registry: Arc::new(HandlerRegistry::builtin()),
            cache_file: None,
        }
    }

    pub fn with_schema(mut self, schema: Arc<dyn RelationshipSchema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Reuse identities across runs through a cache file.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load `current`. With `previous`, only added and reloaded rows are
    /// ingested and entities gone since `previous` are deleted afterwards.
    ///
    /// The delta is computed in full before the first write.
    pub async fn load(
        &self,
        current: &dyn RecordSource,
        previous: Option<&dyn RecordSource>,
    ) -> Result<LoadRun, LoaderError> {
        let delta = match previous {
            Some(previous) => {
                let engine = DeltaEngine::new(self.config.delta.clone());
                let delta = engine.compute_from_sources(previous, current, &self.registry)?;
                Some(Arc::new(delta))
            }
            None => None,
        };

        let mut ctx = RunContext::new(
            self.config.settings.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.schema),
            Arc::clone(&self.registry),
        )
        .with_cache(self.open_cache());
        if let Some(delta) = &delta {
            ctx = ctx.with_delta(Arc::clone(delta));
        }
        let ctx = Arc::new(ctx);

        let controller = MultiPassController::new(Arc::clone(&ctx));
        let mut report = controller.run(current).await?;

        if let Some(delta) = &delta {
            let deletions = apply_deletions(&ctx, delta).await;
            report.results.extend(deletions.results);
        }
        report.finish();

        if let Some(path) = &self.cache_file
            && let Err(err) = ctx.cache.save_to_disk(path)
        {
            log::warn!("failed to save identity cache to {}: {}", path.display(), err);
        }

        Ok(LoadRun {
            report,
            delta: delta.map(|delta| delta.as_ref().clone()),
        })
    }

    fn open_cache(&self) -> IdentityCache {
        let Some(path) = &self.cache_file else {
            return IdentityCache::new();
        };
        match IdentityCache::load_from_disk(Path::new(path)) {
            Ok(cache) => cache,
            Err(CacheError::NotFound) => {
                log::info!("No identity cache at {}, starting empty", path.display());
                IdentityCache::new()
            }
            Err(err) => {
                log::warn!("Ignoring identity cache at {}: {}", path.display(), err);
                IdentityCache::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryCatalog;
    use crate::config::RetryPolicy;
    use crate::ingest::Outcome;
    use crate::source::MemorySource;

    fn loader(catalog: Arc<MemoryCatalog>) -> BulkLoader {
        let mut config = LoaderConfig::default();
        config.settings = config
            .settings
            .with_batch_size(5)
            .with_workers(2)
            .with_lookup(RetryPolicy::immediate(2))
            .with_preload(false);
        BulkLoader::new(config, catalog)
    }

    fn tables(identities: &[(&str, &str)]) -> MemorySource {
        let mut source = MemorySource::new(&["typeName", "qualifiedName", "description"]);
        for &(identity, description) in identities {
            source.push(&["Table", identity, description]);
        }
        source
    }

    #[tokio::test]
    async fn test_delta_load_reloads_changed_and_deletes_removed() {
        let catalog = Arc::new(MemoryCatalog::new());
        let loader = loader(catalog.clone());

        let previous = tables(&[("a", "one"), ("b", "two"), ("c", "three")]);
        loader.load(&previous, None).await.unwrap();
        assert_eq!(catalog.active_count("Table"), 3);
        let submitted_before = catalog.submissions().len();

        let current = tables(&[("a", "one"), ("c", "four")]);
        let run = loader.load(&current, Some(&previous)).await.unwrap();

        let delta = run.delta.unwrap();
        assert!(delta.to_delete.contains_key("b"));
        assert_eq!(catalog.active_count("Table"), 2);
        assert!(catalog.find("Table", "b").is_some_and(|r| !r.is_active()));

        let resubmitted: Vec<String> = catalog.submissions()[submitted_before..]
            .iter()
            .flatten()
            .map(|entity| entity.identity.clone())
            .collect();
        assert_eq!(resubmitted, vec!["c".to_string()]);
        assert!(
            run.report
                .results
                .iter()
                .any(|r| r.identity == "b" && r.outcome == Outcome::Deleted)
        );
    }

    #[tokio::test]
    async fn test_cache_file_is_written_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.bin");
        let catalog = Arc::new(MemoryCatalog::new());

        loader(catalog)
            .with_cache_file(&path)
            .load(&tables(&[("a", "one")]), None)
            .await
            .unwrap();

        let cache = IdentityCache::load_from_disk(&path).unwrap();
        assert!(cache.get_by_identity("Table", "a").is_some());
    }
}
