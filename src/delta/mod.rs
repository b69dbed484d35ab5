//! Snapshot comparison between two full exports of one source.
//!
//! Each snapshot is reduced to identity, type, fingerprint and dependents
//! per entry. The engine derives what to delete (gone since the previous
//! snapshot), what to reload and what is new. Any ambiguity aborts the
//! comparison so deletions never run against a partial result.

mod apply;
mod engine;
mod snapshot;

pub use apply::{DELETE_PASS, DeletionReport, apply_deletions};
pub use engine::DeltaEngine;
pub use snapshot::{Snapshot, SnapshotEntry, fingerprint};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use thiserror::Error;

/// Columns that change on every export without the entity changing.
pub const DEFAULT_VOLATILE_COLUMNS: [&str; 7] = [
    "lastSyncRun",
    "lastSyncRunAt",
    "lastSyncWorkflowName",
    "updatedAt",
    "updatedBy",
    "createdAt",
    "createdBy",
];

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("failed to read snapshot: {0}")]
    Source(#[from] crate::source::SourceError),

    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error(
        "identity '{identity}' appears twice with different content in the {snapshot} snapshot"
    )]
    DuplicateIdentity { identity: String, snapshot: String },

    #[error("snapshots span more than one top-level container: {}", .containers.join(", "))]
    MultipleContainers { containers: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadSemantic {
    /// Reload entries whose fingerprint or dependents changed.
    #[default]
    ReloadChanged,
    /// Reload every entry present in both snapshots.
    ReloadAll,
}

#[derive(Debug, Clone)]
pub struct DeltaConfig {
    pub volatile_columns: BTreeSet<String>,
    /// Leading identity segments naming the top-level container.
    pub container_segments: usize,
    pub reload: ReloadSemantic,
    /// Types taking part in the comparison; empty means all.
    pub types: BTreeSet<String>,
}

impl DeltaConfig {
    pub fn from_env() -> Self {
        let mut volatile_columns: BTreeSet<String> = DEFAULT_VOLATILE_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .collect();
        volatile_columns.extend(env_list("LOADER_VOLATILE_COLUMNS"));

        Self {
            volatile_columns,
            container_segments: env::var("LOADER_CONTAINER_SEGMENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            reload: ReloadSemantic::ReloadChanged,
            types: env_list("LOADER_DELTA_TYPES").collect(),
        }
    }

    /// Restrict the comparison to these types. Empty means all.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reload(mut self, reload: ReloadSemantic) -> Self {
        self.reload = reload;
        self
    }

    pub fn with_container_segments(mut self, segments: usize) -> Self {
        self.container_segments = segments;
        self
    }

    pub fn participates(&self, type_name: &str) -> bool {
        self.types.is_empty() || self.types.contains(type_name)
    }
}

/// Comma-separated values of `key`, trimmed, blanks dropped.
fn env_list(key: &str) -> impl Iterator<Item = String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Identity to type, for each kind of change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaResult {
    pub to_delete: BTreeMap<String, String>,
    pub to_reload: BTreeMap<String, String>,
    pub added: BTreeMap<String, String>,
    /// The single top-level container both snapshots belong to, if any.
    pub container: Option<String>,
}

impl DeltaResult {
    /// Rows of the current snapshot that still need to be ingested.
    pub fn should_load(&self, identity: &str) -> bool {
        self.added.contains_key(identity) || self.to_reload.contains_key(identity)
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_reload.is_empty() && self.added.is_empty()
    }
}
