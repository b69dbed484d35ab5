//! Relationship declarations consumed by entity builders and the cyclic
//! pass planner.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A relationship column for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipField {
    pub name: String,
    /// Type of the referenced entities.
    pub target_type: String,
}

pub trait RelationshipSchema: Send + Sync {
    fn relationship(&self, type_name: &str, field: &str) -> Option<RelationshipField>;

    /// Pairs of fields that are the two ends of one bidirectional
    /// relationship of `type_name`. A self-referencing relationship appears
    /// as `(field, field)`. Pairs touching any field in `excluding` are
    /// left out.
    fn cyclical_relationship_pairs(
        &self,
        type_name: &str,
        excluding: &BTreeSet<String>,
    ) -> BTreeSet<(String, String)>;

    /// Columns that must be present in the header for rows of `type_name`.
    fn required_columns(&self, _type_name: &str) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Relationship field name to target type.
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
    #[serde(default)]
    pub cyclic_pairs: Vec<(String, String)>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// Schema held in memory, either built in or loaded from a JSON file of the
/// form `{"types": {"GlossaryTerm": {"relationships": {...}, "cyclic_pairs": [...]}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSchema {
    #[serde(default)]
    pub types: BTreeMap<String, TypeSchema>,
}

const TERM_TO_TERM: [&str; 13] = [
    "seeAlso",
    "synonyms",
    "antonyms",
    "preferredTerms",
    "preferredToTerms",
    "replacedBy",
    "replacementTerms",
    "classifies",
    "isA",
    "translatedTerms",
    "translationOfTerms",
    "validValuesFor",
    "validValues",
];

const TERM_PAIRS: [(&str, &str); 8] = [
    ("seeAlso", "seeAlso"),
    ("synonyms", "synonyms"),
    ("antonyms", "antonyms"),
    ("preferredTerms", "preferredToTerms"),
    ("replacedBy", "replacementTerms"),
    ("classifies", "isA"),
    ("translatedTerms", "translationOfTerms"),
    ("validValuesFor", "validValues"),
];

impl StaticSchema {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Glossary and relational asset relationships understood out of the
    /// box.
    pub fn builtin() -> Self {
        let mut schema = Self::default();

        let term = schema.type_entry("GlossaryTerm");
        term.relationships
            .insert("anchor".to_string(), "Glossary".to_string());
        term.relationships
            .insert("categories".to_string(), "GlossaryCategory".to_string());
        for field in TERM_TO_TERM {
            term.relationships
                .insert(field.to_string(), "GlossaryTerm".to_string());
        }
        term.cyclic_pairs = TERM_PAIRS
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();

        schema
            .type_entry("GlossaryCategory")
            .relationships
            .insert("anchor".to_string(), "Glossary".to_string());

        for (type_name, field, target) in [
            ("Database", "connection", "Connection"),
            ("Schema", "database", "Database"),
            ("Table", "schema", "Schema"),
            ("View", "schema", "Schema"),
            ("Column", "table", "Table"),
            ("Column", "view", "View"),
            ("Table", "assignedTerms", "GlossaryTerm"),
            ("View", "assignedTerms", "GlossaryTerm"),
            ("Column", "assignedTerms", "GlossaryTerm"),
            ("Table", "domain", "DataDomain"),
            ("View", "domain", "DataDomain"),
        ] {
            schema
                .type_entry(type_name)
                .relationships
                .insert(field.to_string(), target.to_string());
        }

        schema
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&raw).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    /// Mutable declaration for `type_name`, created empty on first use.
    pub fn type_entry(&mut self, type_name: &str) -> &mut TypeSchema {
        self.types.entry(type_name.to_string()).or_default()
    }
}

impl RelationshipSchema for StaticSchema {
    fn relationship(&self, type_name: &str, field: &str) -> Option<RelationshipField> {
        self.types
            .get(type_name)
            .and_then(|entry| entry.relationships.get(field))
            .map(|target| RelationshipField {
                name: field.to_string(),
                target_type: target.clone(),
            })
    }

    fn cyclical_relationship_pairs(
        &self,
        type_name: &str,
        excluding: &BTreeSet<String>,
    ) -> BTreeSet<(String, String)> {
        self.types
            .get(type_name)
            .map(|entry| {
                entry
                    .cyclic_pairs
                    .iter()
                    .filter(|(a, b)| !excluding.contains(a) && !excluding.contains(b))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn required_columns(&self, type_name: &str) -> Vec<String> {
        self.types
            .get(type_name)
            .map(|entry| entry.required.clone())
            .unwrap_or_default()
    }
}
