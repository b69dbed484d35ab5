//! Per-run state shared by every component.
//!
//! One `RunContext` exists per run and is handed around as `Arc<RunContext>`.
//! Run state never lives in statics.

use crate::cache::IdentityCache;
use crate::client::CatalogClient;
use crate::config::LoadSettings;
use crate::delta::DeltaResult;
use crate::handlers::HandlerRegistry;
use crate::model::Placeholder;
use crate::schema::RelationshipSchema;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out placeholder handles, unique within a run.
#[derive(Debug, Default)]
pub struct PlaceholderSequence(AtomicU64);

impl PlaceholderSequence {
    pub fn next(&self) -> Placeholder {
        Placeholder(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn issued(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct RunContext {
    pub settings: LoadSettings,
    pub client: Arc<dyn CatalogClient>,
    pub schema: Arc<dyn RelationshipSchema>,
    pub registry: Arc<HandlerRegistry>,
    pub cache: IdentityCache,
    pub sequence: PlaceholderSequence,
    /// When set, only rows the delta marks as added or reloadable are
    /// ingested.
    pub delta: Option<Arc<DeltaResult>>,
}

impl RunContext {
    pub fn new(
        settings: LoadSettings,
        client: Arc<dyn CatalogClient>,
        schema: Arc<dyn RelationshipSchema>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            settings,
            client,
            schema,
            registry,
            cache: IdentityCache::new(),
            sequence: PlaceholderSequence::default(),
            delta: None,
        }
    }

    pub fn with_cache(mut self, cache: IdentityCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_delta(mut self, delta: Arc<DeltaResult>) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn client(&self) -> &dyn CatalogClient {
        self.client.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_unique_and_positive() {
        let sequence = PlaceholderSequence::default();
        let first = sequence.next();
        let second = sequence.next();
        assert_eq!(first, Placeholder(1));
        assert_eq!(second, Placeholder(2));
        assert_eq!(sequence.issued(), 2);
    }
}
