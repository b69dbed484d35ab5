//! Streaming ingestion of built entities into the catalog.
//!
//! 1. **Accumulation** (`accumulator`) - per-worker bounded batches
//! 2. **Submission** (`submitter`) - one bulk write per batch, outcomes and
//!    placeholder mapping per batch
//! 3. **Resolution** (`resolver`) - related-entity holds and delete markers
//!    released once their primary resolves
//! 4. **Coordination** (`coordinator`) - worker pool and end-of-pass barrier
//! 5. **Statistics** (`stats`, `results`) - outcomes, counters and the
//!    results file

pub mod accumulator;
pub mod coordinator;
pub mod resolver;
pub mod results;
pub mod stats;
pub mod submitter;

pub use accumulator::{BatchAccumulator, rebatch};
pub use coordinator::{PassCoordinator, PassHandle, PassOutcome, PassSpec};
pub use resolver::{HoldStore, MarkerStore};
pub use results::{write_results, write_results_file};
pub use stats::{EntityResult, Outcome, PassSummary, Phase, PhaseStats, RunReport};
pub use submitter::{BatchReport, BatchSubmitter};
