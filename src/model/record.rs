use std::collections::HashMap;
use std::sync::Arc;

/// Type discriminator column; mandatory in every source.
pub const TYPE_COLUMN: &str = "typeName";
/// Business identity column; mandatory in every source, value may be blank.
pub const IDENTITY_COLUMN: &str = "qualifiedName";
pub const NAME_COLUMN: &str = "name";
pub const DESCRIPTION_COLUMN: &str = "description";
pub const TAGS_COLUMN: &str = "tags";
/// Content of the owned README related entity.
pub const README_COLUMN: &str = "readme";
/// Owned Link related entities, one `url` or `title|url` per line.
pub const LINKS_COLUMN: &str = "links";

/// Separator between values of a multi-valued cell.
pub const MULTI_VALUE_SEPARATOR: char = '\n';

/// Columns imported together with the rest of a row in the first pass of a
/// type and never reprocessed by a cyclic-relationship pass.
pub const ALWAYS_INCLUDED_COLUMNS: [&str; 4] =
    [DESCRIPTION_COLUMN, TAGS_COLUMN, README_COLUMN, LINKS_COLUMN];

/// Ordered field names shared by every record of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .enumerate()
            .map(|(position, name)| {
                let name = name.as_ref();
                // Spreadsheet exports prepend a byte-order mark to the first cell
                let name = if position == 0 {
                    name.trim_start_matches('\u{feff}')
                } else {
                    name
                };
                name.trim().to_string()
            })
            .collect();

        let mut index = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            index.entry(name.clone()).or_insert(position);
        }

        Self { names, index }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One row of a source. Row numbers are 1-based and count data rows only.
#[derive(Debug, Clone)]
pub struct Record {
    row: usize,
    header: Arc<Header>,
    fields: Vec<String>,
}

impl Record {
    pub fn new(row: usize, header: Arc<Header>, fields: Vec<String>) -> Self {
        Self { row, header, fields }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Raw cell value. Short rows yield `None` for trailing columns.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .position(column)
            .and_then(|position| self.fields.get(position))
            .map(String::as_str)
    }

    /// Trimmed cell value, `None` when absent or blank.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.get(column)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn type_name(&self) -> Option<&str> {
        self.value(TYPE_COLUMN)
    }

    /// Every `(column, raw value)` pair in header order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .names()
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let value = self.fields.get(position).map(String::as_str).unwrap_or("");
                (name.as_str(), value)
            })
    }
}

/// Split a multi-valued cell, dropping blank entries.
pub fn split_multi(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(MULTI_VALUE_SEPARATOR)
        .map(|part| part.trim_end_matches('\r').trim())
        .filter(|part| !part.is_empty())
}
