use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Catalog-assigned opaque identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(pub String);

impl Guid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-run sequence position standing in for a handle until submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Placeholder(pub u64);

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handle {
    Placeholder(Placeholder),
    Resolved(Guid),
}

impl Handle {
    pub fn placeholder(&self) -> Option<Placeholder> {
        match self {
            Handle::Placeholder(placeholder) => Some(*placeholder),
            Handle::Resolved(_) => None,
        }
    }

    pub fn guid(&self) -> Option<&Guid> {
        match self {
            Handle::Placeholder(_) => None,
            Handle::Resolved(guid) => Some(guid),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Handle::Resolved(_))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Placeholder(placeholder) => placeholder.fmt(f),
            Handle::Resolved(guid) => guid.fmt(f),
        }
    }
}

/// Business identity scoped by entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub type_name: String,
    pub identity: String,
}

impl EntityKey {
    pub fn new(type_name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            identity: identity.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_name, self.identity)
    }
}

/// Pointer from one entity to another inside a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reference {
    /// Already resolved, either from the identity cache or a completed batch.
    Guid { guid: Guid },
    /// Resolved by the catalog at write time.
    Identity {
        type_name: Option<String>,
        identity: String,
    },
}

impl Reference {
    pub fn guid(guid: Guid) -> Self {
        Reference::Guid { guid }
    }

    /// Parse a cell value written either `Type@identity` or as a bare
    /// identity, in which case `default_type` applies.
    pub fn parse(value: &str, default_type: Option<&str>) -> Self {
        let value = value.trim();
        if let Some((prefix, rest)) = value.split_once('@') {
            let looks_like_type = prefix
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_uppercase())
                && prefix.chars().all(|c| c.is_ascii_alphanumeric());
            if looks_like_type && !rest.is_empty() {
                return Reference::Identity {
                    type_name: Some(prefix.to_string()),
                    identity: rest.to_string(),
                };
            }
        }
        Reference::Identity {
            type_name: default_type.map(str::to_string),
            identity: value.to_string(),
        }
    }

    pub fn as_guid(&self) -> Option<&Guid> {
        match self {
            Reference::Guid { guid } => Some(guid),
            Reference::Identity { .. } => None,
        }
    }
}

/// Description of one entity as submitted to the catalog.
///
/// A `Null` attribute asks the catalog to clear the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub handle: Handle,
    pub type_name: String,
    pub identity: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub relationships: BTreeMap<String, Vec<Reference>>,
}

impl Entity {
    pub fn new(
        placeholder: Placeholder,
        type_name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            handle: Handle::Placeholder(placeholder),
            type_name: type_name.into(),
            identity: identity.into(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.type_name.clone(), self.identity.clone())
    }

    pub fn placeholder(&self) -> Option<Placeholder> {
        self.handle.placeholder()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Deleted,
}

/// Entity as stored and reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub guid: Guid,
    pub type_name: String,
    pub identity: String,
    pub status: EntityStatus,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub relationships: BTreeMap<String, Vec<Guid>>,
}

impl EntityRecord {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.type_name.clone(), self.identity.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status == EntityStatus::Active
    }
}
