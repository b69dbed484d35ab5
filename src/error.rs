use crate::cache::CacheError;
use crate::client::ClientError;
use crate::delta::DeltaError;
use crate::source::SourceError;
use thiserror::Error;

/// Run-level errors.
///
/// Configuration variants abort the run before anything is written.
/// Everything that concerns a single row or batch is reported through
/// [`RowError`] or the run report instead.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("source header is missing mandatory column '{column}'")]
    MissingColumn { column: String },

    #[error(
        "type {type_name}: both ends of the cyclic relationship '{field_a}' / '{field_b}' are present as columns; keep only one of them"
    )]
    AmbiguousCyclicRelationship {
        type_name: String,
        field_a: String,
        field_b: String,
    },

    #[error("type {type_name}: required column '{column}' is missing from the source header")]
    MissingRequiredColumn { type_name: String, column: String },

    #[error("delta computation failed: {0}")]
    Delta(#[from] DeltaError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("catalog error: {0}")]
    Client(#[from] ClientError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("results file error: {0}")]
    Results(#[from] csv::Error),

    #[error("schema file error: {0}")]
    Schema(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    /// True for errors caused by the shape of the input or configuration
    /// rather than by the remote catalog.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LoaderError::MissingColumn { .. }
                | LoaderError::AmbiguousCyclicRelationship { .. }
                | LoaderError::MissingRequiredColumn { .. }
                | LoaderError::Delta(_)
                | LoaderError::Schema(_)
        )
    }
}

/// Failure to interpret a single record. Recovered: the row is reported as
/// failed and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("row {row}: blank type discriminator")]
    MissingType { row: usize },

    #[error("row {row}: no handler registered for type '{type_name}'")]
    UnsupportedType { row: usize, type_name: String },

    #[error("row {row}: blank identity and no name to derive one from")]
    MissingIdentity { row: usize },

    #[error("row {row}: invalid value '{value}' in column '{column}'")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
}

impl RowError {
    pub fn row(&self) -> usize {
        match self {
            RowError::MissingType { row }
            | RowError::UnsupportedType { row, .. }
            | RowError::MissingIdentity { row }
            | RowError::InvalidValue { row, .. } => *row,
        }
    }
}
