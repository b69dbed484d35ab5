use super::{DeltaConfig, DeltaError};
use crate::handlers::{EntityHandler, HandlerRegistry, PATH_SEPARATOR};
use crate::model::Record;
use crate::source::RecordSource;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub identity: String,
    pub type_name: String,
    pub fingerprint: String,
    pub parent: Option<String>,
    /// Identities of entries whose change forces a reload of this one.
    pub dependents: BTreeSet<String>,
}

/// One full export reduced to fingerprints, keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub label: String,
    pub entries: BTreeMap<String, SnapshotEntry>,
}

/// SHA-256 over the sorted non-blank `(column, trimmed value)` pairs of a
/// record, skipping volatile columns. Hex encoded.
pub fn fingerprint(record: &Record, volatile: &BTreeSet<String>) -> String {
    let mut pairs: Vec<(&str, &str)> = record
        .columns()
        .map(|(column, value)| (column, value.trim()))
        .filter(|(column, value)| !value.is_empty() && !volatile.contains(*column))
        .collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    for (column, value) in pairs {
        hasher.update(column.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

impl Snapshot {
    /// Read every row of `source` and fingerprint them in parallel.
    ///
    /// Identities are derived with the same handlers ingestion uses. Rows
    /// without a usable type or identity are skipped with a warning.
    pub fn from_source(
        label: &str,
        source: &dyn RecordSource,
        registry: &HandlerRegistry,
        config: &DeltaConfig,
    ) -> Result<Self, DeltaError> {
        let mut records = Vec::new();
        for row in source.rows()? {
            records.push(row.map_err(|e| DeltaError::Malformed(format!("{label}: {e}")))?);
        }

        let mut handlers: HashMap<String, Arc<dyn EntityHandler>> = HashMap::new();
        for record in &records {
            if let Some(type_name) = record.type_name()
                && !handlers.contains_key(type_name)
                && let Some(handler) = registry.resolve(type_name)
            {
                handlers.insert(type_name.to_string(), handler);
            }
        }

        let skipped = AtomicUsize::new(0);
        let fingerprinted: Vec<SnapshotEntry> = records
            .par_iter()
            .filter_map(|record| {
                let handler = record.type_name().and_then(|t| handlers.get(t))?;
                if !config.participates(handler.type_name()) {
                    return None;
                }
                match handler.identity(record) {
                    Ok(identity) => Some(SnapshotEntry {
                        identity,
                        type_name: handler.type_name().to_string(),
                        fingerprint: fingerprint(record, &config.volatile_columns),
                        parent: handler.parent_identity(record).map(str::to_string),
                        dependents: BTreeSet::new(),
                    }),
                    Err(err) => {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        log::warn!("{} snapshot: {}", label, err);
                        None
                    }
                }
            })
            .collect();

        let mut entries: BTreeMap<String, SnapshotEntry> = BTreeMap::new();
        for entry in fingerprinted {
            match entries.get(&entry.identity) {
                Some(existing) if existing.fingerprint != entry.fingerprint => {
                    return Err(DeltaError::DuplicateIdentity {
                        identity: entry.identity,
                        snapshot: label.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    entries.insert(entry.identity.clone(), entry);
                }
            }
        }

        link_dependents(&mut entries);

        log::info!(
            "{} snapshot: {} entries from {} rows ({} skipped)",
            label,
            entries.len(),
            records.len(),
            skipped.load(Ordering::Relaxed)
        );

        Ok(Self {
            label: label.to_string(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&SnapshotEntry> {
        self.entries.get(identity)
    }
}

/// An entry depends on the rows naming it as parent and on the rows whose
/// identity sits directly under its own.
fn link_dependents(entries: &mut BTreeMap<String, SnapshotEntry>) {
    let mut links: Vec<(String, String)> = Vec::new();
    for entry in entries.values() {
        if let Some(parent) = &entry.parent {
            links.push((parent.clone(), entry.identity.clone()));
        }
        if let Some((prefix, _)) = entry.identity.rsplit_once(PATH_SEPARATOR)
            && entry.parent.as_deref() != Some(prefix)
        {
            links.push((prefix.to_string(), entry.identity.clone()));
        }
    }

    for (owner, dependent) in links {
        if let Some(entry) = entries.get_mut(&owner) {
            entry.dependents.insert(dependent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Header;
    use crate::source::MemorySource;

    fn volatile() -> BTreeSet<String> {
        BTreeSet::from(["updatedAt".to_string()])
    }

    #[test]
    fn test_fingerprint_ignores_column_order_blank_and_volatile() {
        let a = Record::new(
            1,
            Arc::new(Header::new(["typeName", "name", "updatedAt", "owner"])),
            vec!["Table".into(), "orders".into(), "monday".into(), " ".into()],
        );
        let b = Record::new(
            1,
            Arc::new(Header::new(["name", "updatedAt", "typeName"])),
            vec![" orders ".into(), "tuesday".into(), "Table".into()],
        );
        assert_eq!(fingerprint(&a, &volatile()), fingerprint(&b, &volatile()));

        let c = Record::new(
            1,
            Arc::new(Header::new(["typeName", "name"])),
            vec!["Table".into(), "customers".into()],
        );
        assert_ne!(fingerprint(&a, &volatile()), fingerprint(&c, &volatile()));
    }

    #[test]
    fn test_dependents_from_parent_and_path_prefix() {
        let source = MemorySource::new(&["typeName", "qualifiedName", "name", "parentDomain"])
            .with_row(&["DataDomain", "", "sales", ""])
            .with_row(&["DataDomain", "", "emea", "sales"])
            .with_row(&["Table", "db/orders", "orders", ""])
            .with_row(&["Column", "db/orders/id", "id", ""]);

        let snapshot = Snapshot::from_source(
            "current",
            &source,
            &HandlerRegistry::builtin(),
            &DeltaConfig::from_env(),
        )
        .unwrap();

        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.get("sales").unwrap().dependents.contains("sales/emea"));
        assert!(snapshot.get("db/orders").unwrap().dependents.contains("db/orders/id"));
    }

    #[test]
    fn test_conflicting_duplicate_is_malformed() {
        let source = MemorySource::new(&["typeName", "qualifiedName", "owner"])
            .with_row(&["Table", "db/orders", "ops"])
            .with_row(&["Table", "db/orders", "finance"]);

        let err = Snapshot::from_source(
            "previous",
            &source,
            &HandlerRegistry::builtin(),
            &DeltaConfig::from_env(),
        )
        .unwrap_err();
        assert!(matches!(err, DeltaError::DuplicateIdentity { .. }));
    }
}
