//! Per-type entity builders.
//!
//! Every entity family is handled by one [`EntityHandler`] registered in the
//! [`HandlerRegistry`]. Handlers know how to derive a row's identity and
//! hierarchy depth and how to turn a row into a [`BuiltEntity`]: the primary
//! entity plus any owned related entities held until the primary resolves,
//! and any delete marker for owned relationships that must be cleared.

mod asset;
mod common;
mod hierarchy;

pub use asset::AssetHandler;
pub use common::{LINK_TYPE, OWNER_RELATIONSHIP, README_TYPE, build_entity, owned_type};
pub use hierarchy::{HierarchyHandler, PATH_SEPARATOR, depth_of};

use crate::cache::IdentityCache;
use crate::context::PlaceholderSequence;
use crate::error::RowError;
use crate::model::{Entity, EntityKey, IDENTITY_COLUMN, Placeholder, Record, TYPE_COLUMN};
use crate::schema::RelationshipSchema;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Load order of types without a registered handler.
pub const FALLBACK_LOAD_ORDER: u32 = 100;

/// Which columns of a row a pass may import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFilter {
    AllExcept(BTreeSet<String>),
    Only(BTreeSet<String>),
}

impl ColumnFilter {
    pub fn all() -> Self {
        ColumnFilter::AllExcept(BTreeSet::new())
    }

    pub fn allows(&self, column: &str) -> bool {
        match self {
            ColumnFilter::AllExcept(excluded) => !excluded.contains(column),
            ColumnFilter::Only(included) => included.contains(column),
        }
    }
}

/// Everything a handler may consult while building one entity.
pub struct BuildContext<'a> {
    pub placeholder: Placeholder,
    pub columns: &'a ColumnFilter,
    pub cache: &'a IdentityCache,
    pub schema: &'a dyn RelationshipSchema,
    pub overwrite_blank: &'a BTreeSet<String>,
    pub sequence: &'a PlaceholderSequence,
}

/// A related entity that can only be submitted once its primary's handle is
/// known. `back_reference` is the relationship on the related entity that
/// points at the primary.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub back_reference: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelatedHold {
    pub primary: EntityKey,
    /// Relationship name to the related entities held under it.
    pub related: BTreeMap<String, Vec<RelatedEntity>>,
}

impl RelatedHold {
    pub fn len(&self) -> usize {
        self.related.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owned relationships of a primary whose existing targets must be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteMarker {
    pub primary: EntityKey,
    pub relationships: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltEntity {
    pub entity: Entity,
    pub hold: Option<RelatedHold>,
    pub marker: Option<DeleteMarker>,
}

pub trait EntityHandler: Send + Sync {
    fn type_name(&self) -> &str;

    /// Types load in ascending order; ties break on the type name.
    fn load_order(&self) -> u32;

    /// Column holding the parent's identity, for hierarchical types.
    fn parent_column(&self) -> Option<&str> {
        None
    }

    fn is_hierarchical(&self) -> bool {
        self.parent_column().is_some()
    }

    fn parent_identity<'r>(&self, record: &'r Record) -> Option<&'r str> {
        self.parent_column().and_then(|column| record.value(column))
    }

    /// 1 for roots and flat types, otherwise 1 + segments of the parent path.
    fn depth(&self, record: &Record) -> usize {
        depth_of(self.parent_identity(record))
    }

    fn identity(&self, record: &Record) -> Result<String, RowError>;

    /// Columns consumed by the handler itself rather than sent as
    /// attributes.
    fn structural_columns(&self) -> Vec<&str> {
        let mut columns = vec![TYPE_COLUMN, IDENTITY_COLUMN];
        columns.extend(self.parent_column());
        columns
    }

    fn build(&self, record: &Record, ctx: &BuildContext<'_>) -> Result<BuiltEntity, RowError>;
}

/// Registered handlers plus an optional generic fallback for unknown types.
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn EntityHandler>>,
    fallback: bool,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
            fallback: true,
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(HierarchyHandler::new("DataDomain", "parentDomain", 5));
        registry.register(AssetHandler::new("Glossary", 10));
        registry.register(HierarchyHandler::new("GlossaryCategory", "parentCategory", 20));
        registry.register(AssetHandler::new("GlossaryTerm", 30));
        registry.register(AssetHandler::new("Connection", 50));
        registry.register(AssetHandler::new("Database", 60));
        registry.register(AssetHandler::new("Schema", 70));
        registry.register(AssetHandler::new("Table", 80));
        registry.register(AssetHandler::new("View", 80));
        registry.register(AssetHandler::new("Column", 90));
        registry
    }

    /// Reject rows of unregistered types instead of loading them generically.
    pub fn without_fallback(mut self) -> Self {
        self.fallback = false;
        self
    }

    pub fn register(&mut self, handler: impl EntityHandler + 'static) {
        self.handlers
            .insert(handler.type_name().to_string(), Arc::new(handler));
    }

    pub fn resolve(&self, type_name: &str) -> Option<Arc<dyn EntityHandler>> {
        if let Some(handler) = self.handlers.get(type_name) {
            return Some(Arc::clone(handler));
        }
        if self.fallback {
            return Some(Arc::new(AssetHandler::new(type_name, FALLBACK_LOAD_ORDER)));
        }
        None
    }

    /// Handlers for `types` in load order. Unsupported types are left out.
    pub fn order<'t, I>(&self, types: I) -> Vec<Arc<dyn EntityHandler>>
    where
        I: IntoIterator<Item = &'t str>,
    {
        let mut handlers: Vec<_> = types
            .into_iter()
            .filter_map(|type_name| self.resolve(type_name))
            .collect();
        handlers.sort_by(|a, b| {
            (a.load_order(), a.type_name()).cmp(&(b.load_order(), b.type_name()))
        });
        handlers.dedup_by(|a, b| a.type_name() == b.type_name());
        handlers
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_filter() {
        let except = ColumnFilter::AllExcept(BTreeSet::from(["seeAlso".to_string()]));
        assert!(except.allows("name"));
        assert!(!except.allows("seeAlso"));

        let only = ColumnFilter::Only(BTreeSet::from(["seeAlso".to_string()]));
        assert!(only.allows("seeAlso"));
        assert!(!only.allows("name"));
    }

    #[test]
    fn test_order_by_load_order_then_name() {
        let registry = HandlerRegistry::builtin();
        let ordered: Vec<String> = registry
            .order(["Table", "Widget", "View", "Glossary", "DataDomain"])
            .iter()
            .map(|h| h.type_name().to_string())
            .collect();
        assert_eq!(ordered, vec!["DataDomain", "Glossary", "Table", "View", "Widget"]);
    }

    #[test]
    fn test_without_fallback_rejects_unknown_type() {
        let registry = HandlerRegistry::builtin().without_fallback();
        assert!(registry.resolve("Widget").is_none());
        assert!(registry.resolve("Table").is_some());
    }

    #[test]
    fn test_hierarchy_handlers_expose_parent_column() {
        let registry = HandlerRegistry::builtin();
        let category = registry.resolve("GlossaryCategory").unwrap();
        assert!(category.is_hierarchical());
        assert!(category.structural_columns().contains(&"parentCategory"));
        assert!(!registry.resolve("Table").unwrap().is_hierarchical());
    }
}
