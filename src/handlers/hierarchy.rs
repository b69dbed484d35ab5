use super::{BuildContext, BuiltEntity, EntityHandler, build_entity};
use crate::error::RowError;
use crate::model::{IDENTITY_COLUMN, NAME_COLUMN, Record, Reference};

pub const PATH_SEPARATOR: char = '/';

/// Relationship carrying the parent of a hierarchical entity.
const PARENT_RELATIONSHIP: &str = "parent";

/// Depth of a row given its parent path: 1 for roots, otherwise one more
/// than the number of segments in the path.
pub fn depth_of(parent: Option<&str>) -> usize {
    match parent.map(str::trim).filter(|p| !p.is_empty()) {
        None => 1,
        Some(path) => {
            1 + path
                .split(PATH_SEPARATOR)
                .filter(|segment| !segment.trim().is_empty())
                .count()
        }
    }
}

/// Handler for self-referencing types whose parent is named by a path
/// column, such as data domains and glossary categories.
#[derive(Debug, Clone)]
pub struct HierarchyHandler {
    type_name: String,
    parent_column: String,
    load_order: u32,
}

impl HierarchyHandler {
    pub fn new(
        type_name: impl Into<String>,
        parent_column: impl Into<String>,
        load_order: u32,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            parent_column: parent_column.into(),
            load_order,
        }
    }
}

impl EntityHandler for HierarchyHandler {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn load_order(&self) -> u32 {
        self.load_order
    }

    fn parent_column(&self) -> Option<&str> {
        Some(self.parent_column.as_str())
    }

    /// `qualifiedName`, else `{parent}/{name}`, else `{name}` for roots.
    fn identity(&self, record: &Record) -> Result<String, RowError> {
        if let Some(identity) = record.value(IDENTITY_COLUMN) {
            return Ok(identity.to_string());
        }
        let name = record
            .value(NAME_COLUMN)
            .ok_or(RowError::MissingIdentity { row: record.row() })?;
        Ok(match self.parent_identity(record) {
            Some(parent) => format!(
                "{}{}{}",
                parent.trim_end_matches(PATH_SEPARATOR),
                PATH_SEPARATOR,
                name
            ),
            None => name.to_string(),
        })
    }

    fn build(&self, record: &Record, ctx: &BuildContext<'_>) -> Result<BuiltEntity, RowError> {
        let identity = self.identity(record)?;
        let mut built = build_entity(self, record, ctx, identity)?;

        if ctx.columns.allows(&self.parent_column)
            && let Some(parent) = self.parent_identity(record)
        {
            let reference = ctx
                .cache
                .resolve_reference(Reference::parse(parent, Some(self.type_name.as_str())));
            built
                .entity
                .relationships
                .insert(PARENT_RELATIONSHIP.to_string(), vec![reference]);
        }

        Ok(built)
    }
}
