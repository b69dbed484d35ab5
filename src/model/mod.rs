//! Records read from a source and the entities built from them.
//!
//! A [`Record`] is one row of the source plus the shared [`Header`]. An
//! [`Entity`] is the typed description submitted to the catalog; its
//! [`Handle`] starts as a per-run placeholder and is replaced by the
//! catalog-assigned [`Guid`] after submission.

mod entity;
mod record;

pub use entity::{
    Entity, EntityKey, EntityRecord, EntityStatus, Guid, Handle, Placeholder, Reference,
};
pub use record::{
    ALWAYS_INCLUDED_COLUMNS, DESCRIPTION_COLUMN, Header, IDENTITY_COLUMN, LINKS_COLUMN,
    MULTI_VALUE_SEPARATOR, NAME_COLUMN, README_COLUMN, Record, TAGS_COLUMN, TYPE_COLUMN,
    split_multi,
};
