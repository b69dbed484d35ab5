use crate::client::ClientError;
use crate::model::Guid;
use std::collections::BTreeMap;

/// Statistics about cache contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of identities cached
    pub entries: usize,

    /// Cached identities per entity type
    pub by_type: BTreeMap<String, usize>,
}

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache not found")]
    NotFound,

    #[error("Cache version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializeError(String),

    #[error("Deserialization error: {0}")]
    DeserializeError(String),

    #[error("Catalog error: {0}")]
    Client(#[from] ClientError),

    #[error("Entity {guid} still not visible after {attempts} lookups")]
    LookupExhausted { guid: Guid, attempts: usize },
}
