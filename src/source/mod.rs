//! Re-readable tabular record sources.
//!
//! Every pass of the multi-pass controller scans the source again from the
//! top, so `rows()` must be callable any number of times and yield the same
//! records in the same order.

mod csv_source;
mod memory;

pub use csv_source::CsvSource;
pub use memory::MemorySource;

use crate::model::{Header, Record};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open source {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read source header: {0}")]
    Header(String),

    #[error("failed to read row {row}: {message}")]
    Row { row: usize, message: String },
}

pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Record, SourceError>> + Send + 'a>;

pub trait RecordSource: Send + Sync {
    /// Human readable name used in log lines.
    fn describe(&self) -> String;

    fn header(&self) -> Result<Arc<Header>, SourceError>;

    /// Start a fresh scan of every data row.
    fn rows(&self) -> Result<RowIter<'_>, SourceError>;
}
