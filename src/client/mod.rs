//! Seam to the remote metadata catalog.
//!
//! Everything the loader needs from the catalog goes through
//! [`CatalogClient`]: bulk writes, lookups by handle, searches and deletes.
//! [`HttpCatalogClient`] talks to a real catalog over JSON/HTTP and
//! [`MemoryCatalog`] keeps the whole catalog in process for dry runs and
//! tests.

mod http;
mod memory;

pub use http::HttpCatalogClient;
pub use memory::MemoryCatalog;

use crate::model::{Entity, EntityRecord, Guid, Handle};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("catalog HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog returned status {status}: {body}")]
    Service { status: StatusCode, body: String },
    #[error("failed to decode catalog response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// How a bulk write treats identities the catalog does not know yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Create missing entities, update existing ones.
    #[default]
    Upsert,
    /// Only update existing entities; unknown identities are skipped.
    UpdateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Mark as deleted; the entity stays retrievable.
    #[default]
    Soft,
    Hard,
    Purge,
}

impl FromStr for DeleteMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "soft" => Ok(DeleteMode::Soft),
            "hard" => Ok(DeleteMode::Hard),
            "purge" => Ok(DeleteMode::Purge),
            other => Err(format!(
                "unknown delete mode '{other}' (expected soft, hard or purge)"
            )),
        }
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeleteMode::Soft => "soft",
            DeleteMode::Hard => "hard",
            DeleteMode::Purge => "purge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub mode: SubmitMode,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationStatus {
    Created,
    Updated,
    Skipped { reason: String },
    Failed { reason: String },
}

/// Outcome of one entity in a bulk write, keyed by the handle it was
/// submitted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMutation {
    pub handle: Handle,
    pub guid: Option<Guid>,
    #[serde(flatten)]
    pub status: MutationStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub mutations: Vec<EntityMutation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTo {
    pub guid: Guid,
    pub relationship: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<RelatedTo>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl SearchCriteria {
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn with_identities<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identities = identities.into_iter().map(Into::into).collect();
        self
    }

    pub fn related_to(mut self, guid: Guid, relationship: impl Into<String>) -> Self {
        self.related_to = Some(RelatedTo {
            guid,
            relationship: relationship.into(),
        });
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub guids: Vec<Guid>,
    pub mode: DeleteMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: Vec<Guid>,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Bulk write. `Err` means the whole batch failed; per-entity failures
    /// are reported inside the response.
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, ClientError>;

    /// `Ok(None)` when the catalog does not (yet) know the handle.
    async fn lookup_by_handle(&self, guid: &Guid) -> Result<Option<EntityRecord>, ClientError>;

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<EntityRecord>, ClientError>;

    /// Returns the handles actually deleted.
    async fn delete(&self, guids: &[Guid], mode: DeleteMode) -> Result<Vec<Guid>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Placeholder;

    #[test]
    fn test_delete_mode_from_str() {
        assert_eq!("Soft".parse::<DeleteMode>(), Ok(DeleteMode::Soft));
        assert_eq!("purge".parse::<DeleteMode>(), Ok(DeleteMode::Purge));
        assert!("archive".parse::<DeleteMode>().is_err());
    }

    #[test]
    fn test_mutation_wire_format() {
        let mutation = EntityMutation {
            handle: Handle::Placeholder(Placeholder(3)),
            guid: None,
            status: MutationStatus::Failed {
                reason: "bad reference".to_string(),
            },
        };

        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "bad reference");

        let decoded: EntityMutation = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, mutation);
    }

    #[test]
    fn test_search_criteria_skips_empty_filters() {
        let criteria = SearchCriteria::of_type("Table");
        let json = serde_json::to_value(&criteria).unwrap();
        assert_eq!(json["type_name"], "Table");
        assert!(json.get("identities").is_none());
        assert!(json.get("related_to").is_none());
    }
}
