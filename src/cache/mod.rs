//! Run-scoped identity cache.
//!
//! Maps business identities to catalog handles so builders can express
//! references without a remote lookup. Populated by preload before a type's
//! first pass, by every successful bulk write, and by the post-pass lookups
//! that re-cache entities by their stored identity.

mod identity_cache;
mod types;

pub use identity_cache::IdentityCache;
pub use types::{CacheError, CacheStats};
