//! Fixtures shared by unit and integration tests.

use crate::client::MemoryCatalog;
use crate::config::{LoadSettings, RetryPolicy};
use crate::context::RunContext;
use crate::handlers::HandlerRegistry;
use crate::schema::StaticSchema;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings with no network-sized backoffs and a fixed worker count.
pub fn test_settings(batch_size: usize) -> LoadSettings {
    LoadSettings::from_env()
        .with_batch_size(batch_size)
        .with_workers(2)
        .with_lookup(RetryPolicy::immediate(3))
        .with_preload(false)
}

pub fn memory_context(batch_size: usize) -> (Arc<MemoryCatalog>, Arc<RunContext>) {
    memory_context_with(MemoryCatalog::new(), test_settings(batch_size))
}

pub fn memory_context_with(
    catalog: MemoryCatalog,
    settings: LoadSettings,
) -> (Arc<MemoryCatalog>, Arc<RunContext>) {
    let catalog = Arc::new(catalog);
    let ctx = RunContext::new(
        settings,
        catalog.clone(),
        Arc::new(StaticSchema::builtin()),
        Arc::new(HandlerRegistry::builtin()),
    );
    (catalog, Arc::new(ctx))
}

/// Write `contents` to `dir/name` and return the full path.
pub fn write_csv(dir: &Path, name: &str, contents: &str) -> io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    Ok(path)
}
