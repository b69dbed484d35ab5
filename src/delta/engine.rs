use super::{DeltaConfig, DeltaError, DeltaResult, ReloadSemantic, Snapshot, SnapshotEntry};
use crate::handlers::{HandlerRegistry, PATH_SEPARATOR};
use crate::source::RecordSource;
use std::collections::BTreeSet;

pub struct DeltaEngine {
    config: DeltaConfig,
}

impl DeltaEngine {
    pub fn new(config: DeltaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeltaConfig {
        &self.config
    }

    /// First `container_segments` segments of an identity, or `None` for
    /// identities too short to belong to a container.
    pub fn container_of(&self, identity: &str) -> Option<String> {
        let segments = self.config.container_segments;
        if segments == 0 {
            return None;
        }
        let parts: Vec<&str> = identity.split(PATH_SEPARATOR).collect();
        (parts.len() >= segments).then(|| parts[..segments].join("/"))
    }

    pub fn compute_from_sources(
        &self,
        previous: &dyn RecordSource,
        current: &dyn RecordSource,
        registry: &HandlerRegistry,
    ) -> Result<DeltaResult, DeltaError> {
        let previous = Snapshot::from_source("previous", previous, registry, &self.config)?;
        let current = Snapshot::from_source("current", current, registry, &self.config)?;
        self.compute(&previous, &current)
    }

    pub fn compute(
        &self,
        previous: &Snapshot,
        current: &Snapshot,
    ) -> Result<DeltaResult, DeltaError> {
        let containers: BTreeSet<String> = previous
            .entries
            .keys()
            .chain(current.entries.keys())
            .filter_map(|identity| self.container_of(identity))
            .collect();
        if containers.len() > 1 {
            return Err(DeltaError::MultipleContainers {
                containers: containers.into_iter().collect(),
            });
        }

        let mut result = DeltaResult {
            container: containers.into_iter().next(),
            ..DeltaResult::default()
        };

        for (identity, entry) in &previous.entries {
            if self.config.participates(&entry.type_name) && !current.entries.contains_key(identity)
            {
                result
                    .to_delete
                    .insert(identity.clone(), entry.type_name.clone());
            }
        }

        for (identity, entry) in &current.entries {
            if !self.config.participates(&entry.type_name) {
                continue;
            }
            let Some(before) = previous.entries.get(identity) else {
                result.added.insert(identity.clone(), entry.type_name.clone());
                continue;
            };

            let reload = match self.config.reload {
                ReloadSemantic::ReloadAll => true,
                ReloadSemantic::ReloadChanged => {
                    before.fingerprint != entry.fingerprint
                        || dependents_changed(before, entry, previous, current)
                }
            };
            if reload {
                result
                    .to_reload
                    .insert(identity.clone(), entry.type_name.clone());
            }
        }

        log::info!(
            "Delta: {} to delete, {} to reload, {} added{}",
            result.to_delete.len(),
            result.to_reload.len(),
            result.added.len(),
            result
                .container
                .as_deref()
                .map(|c| format!(" (container {c})"))
                .unwrap_or_default()
        );

        Ok(result)
    }
}

/// True when a dependent appeared, disappeared or changed content.
fn dependents_changed(
    before: &SnapshotEntry,
    after: &SnapshotEntry,
    previous: &Snapshot,
    current: &Snapshot,
) -> bool {
    if before.dependents != after.dependents {
        return true;
    }
    after.dependents.iter().any(|dependent| {
        previous.get(dependent).map(|e| &e.fingerprint)
            != current.get(dependent).map(|e| &e.fingerprint)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn source(rows: &[(&str, &str)]) -> MemorySource {
        let mut source = MemorySource::new(&["typeName", "qualifiedName", "value"]);
        for &(identity, value) in rows {
            source.push(&["Table", identity, value]);
        }
        source
    }

    fn engine(reload: ReloadSemantic) -> DeltaEngine {
        DeltaEngine::new(DeltaConfig::from_env().with_reload(reload))
    }

    #[test]
    fn test_delete_and_reload_sets() {
        let previous = source(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let current = source(&[("a", "1"), ("c", "4")]);

        let delta = engine(ReloadSemantic::ReloadChanged)
            .compute_from_sources(&previous, &current, &HandlerRegistry::builtin())
            .unwrap();

        assert_eq!(delta.to_delete.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(delta.to_reload.contains_key("c"));
        assert!(!delta.to_reload.contains_key("a"));
        assert!(delta.added.is_empty());
        assert!(delta.should_load("c"));
        assert!(!delta.should_load("a"));
    }

    #[test]
    fn test_reload_all_includes_unchanged() {
        let previous = source(&[("a", "1"), ("c", "3")]);
        let current = source(&[("a", "1"), ("c", "3"), ("d", "5")]);

        let delta = engine(ReloadSemantic::ReloadAll)
            .compute_from_sources(&previous, &current, &HandlerRegistry::builtin())
            .unwrap();

        assert_eq!(delta.to_reload.len(), 2);
        assert_eq!(delta.added.keys().collect::<Vec<_>>(), vec!["d"]);
    }

    #[test]
    fn test_child_change_reloads_unchanged_parent() {
        let previous = source(&[("db/orders", "1"), ("db/orders/id", "int")]);
        let current = source(&[("db/orders", "1"), ("db/orders/id", "bigint")]);

        let delta = engine(ReloadSemantic::ReloadChanged)
            .compute_from_sources(&previous, &current, &HandlerRegistry::builtin())
            .unwrap();

        assert!(delta.to_reload.contains_key("db/orders"));
        assert!(delta.to_reload.contains_key("db/orders/id"));
    }

    #[test]
    fn test_multiple_containers_are_fatal() {
        let previous = source(&[("default/snowflake/1/db", "1")]);
        let current = source(&[("default/snowflake/2/db", "1")]);

        let err = engine(ReloadSemantic::ReloadChanged)
            .compute_from_sources(&previous, &current, &HandlerRegistry::builtin())
            .unwrap_err();

        match err {
            DeltaError::MultipleContainers { containers } => {
                assert_eq!(
                    containers,
                    vec!["default/snowflake/1", "default/snowflake/2"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_container_of() {
        let engine = engine(ReloadSemantic::ReloadChanged);
        assert_eq!(
            engine.container_of("default/snowflake/1/db/schema"),
            Some("default/snowflake/1".to_string())
        );
        assert_eq!(engine.container_of("finance"), None);
    }
}
