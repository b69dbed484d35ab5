//! Bulk loading and reconciliation of tabular entity descriptions into a
//! remote metadata catalog.
//!
//! The crate is organised leaf-first:
//!
//! - [`model`] - records, entities, handles and references
//! - [`source`] - re-readable tabular sources (CSV, in-memory)
//! - [`client`] - the remote catalog seam (HTTP and in-memory implementations)
//! - [`schema`] - relationship declarations, including cyclic pairs
//! - [`handlers`] - per-type entity builders behind one registry
//! - [`cache`] - the run-scoped identity cache
//! - [`ingest`] - batching, worker pool and deferred relationship resolution
//! - [`controller`] - hierarchy and cyclic multi-pass orchestration
//! - [`delta`] - snapshot comparison and delta-driven deletion
//! - [`loader`] - the facade used by the CLI

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod controller;
pub mod delta;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod loader;
pub mod model;
pub mod schema;
pub mod source;
pub mod test_support;

use env_logger::Env;
use std::sync::Once;

pub use cache::IdentityCache;
pub use client::{CatalogClient, DeleteMode, HttpCatalogClient, MemoryCatalog, SubmitMode};
pub use config::{LoadSettings, LoaderConfig, RetryPolicy};
pub use context::RunContext;
pub use controller::MultiPassController;
pub use delta::{DeltaConfig, DeltaEngine, DeltaResult, ReloadSemantic, Snapshot};
pub use error::{LoaderError, RowError};
pub use handlers::HandlerRegistry;
pub use ingest::{EntityResult, Outcome, Phase, RunReport};
pub use loader::{BulkLoader, LoadRun};
pub use schema::{RelationshipSchema, StaticSchema};
pub use source::{CsvSource, MemorySource, RecordSource};

static LOGGER: Once = Once::new();

/// Initialise `env_logger` once per process. `RUST_LOG` overrides the default.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,reqwest=warn"))
            .format_timestamp_millis()
            .init();
    });
}
