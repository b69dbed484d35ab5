use super::{BuildContext, BuiltEntity, EntityHandler, build_entity};
use crate::error::RowError;
use crate::model::{IDENTITY_COLUMN, NAME_COLUMN, Record};

/// Handler for flat entity types.
///
/// Identity falls back to `{type}/{name}` when `qualifiedName` is blank.
#[derive(Debug, Clone)]
pub struct AssetHandler {
    type_name: String,
    load_order: u32,
}

impl AssetHandler {
    pub fn new(type_name: impl Into<String>, load_order: u32) -> Self {
        Self {
            type_name: type_name.into(),
            load_order,
        }
    }
}

impl EntityHandler for AssetHandler {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn load_order(&self) -> u32 {
        self.load_order
    }

    fn identity(&self, record: &Record) -> Result<String, RowError> {
        if let Some(identity) = record.value(IDENTITY_COLUMN) {
            return Ok(identity.to_string());
        }
        record
            .value(NAME_COLUMN)
            .map(|name| format!("{}/{}", self.type_name, name))
            .ok_or(RowError::MissingIdentity { row: record.row() })
    }

    fn build(&self, record: &Record, ctx: &BuildContext<'_>) -> Result<BuiltEntity, RowError> {
        let identity = self.identity(record)?;
        build_entity(self, record, ctx, identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdentityCache;
    use crate::context::PlaceholderSequence;
    use crate::handlers::{ColumnFilter, LINK_TYPE, OWNER_RELATIONSHIP, README_TYPE};
    use crate::model::{EntityKey, Guid, Header, Placeholder, Reference};
    use crate::schema::StaticSchema;
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    const COLUMNS: [&str; 8] = [
        "typeName",
        "qualifiedName",
        "name",
        "description",
        "tags",
        "readme",
        "links",
        "assignedTerms",
    ];

    fn record(fields: [&str; 8]) -> Record {
        let header = Arc::new(Header::new(COLUMNS));
        Record::new(1, header, fields.iter().map(|f| f.to_string()).collect())
    }

    struct Fixture {
        cache: IdentityCache,
        schema: StaticSchema,
        sequence: PlaceholderSequence,
        columns: ColumnFilter,
        overwrite: BTreeSet<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cache: IdentityCache::new(),
                schema: StaticSchema::builtin(),
                sequence: PlaceholderSequence::default(),
                columns: ColumnFilter::all(),
                overwrite: BTreeSet::new(),
            }
        }

        fn build(&self, record: &Record) -> Result<BuiltEntity, RowError> {
            let ctx = BuildContext {
                placeholder: self.sequence.next(),
                columns: &self.columns,
                cache: &self.cache,
                schema: &self.schema,
                overwrite_blank: &self.overwrite,
                sequence: &self.sequence,
            };
            AssetHandler::new("Table", 80).build(record, &ctx)
        }
    }

    #[test]
    fn test_identity_falls_back_to_type_and_name() {
        let handler = AssetHandler::new("Table", 80);
        let rec = record(["Table", "", "orders", "", "", "", "", ""]);
        assert_eq!(handler.identity(&rec).unwrap(), "Table/orders");

        let nameless = record(["Table", "", "", "", "", "", "", ""]);
        assert_eq!(
            handler.identity(&nameless),
            Err(RowError::MissingIdentity { row: 1 })
        );
    }

    #[test]
    fn test_build_maps_attributes_tags_and_references() {
        let fixture = Fixture::new();
        fixture
            .cache
            .insert(EntityKey::new("GlossaryTerm", "revenue"), Guid::new("g-1"));

        let rec = record([
            "Table",
            "db/orders",
            "orders",
            "All orders",
            "pii\nfinance",
            "",
            "",
            "revenue\nGlossaryTerm@margin",
        ]);
        let built = fixture.build(&rec).unwrap();

        assert_eq!(built.entity.placeholder(), Some(Placeholder(1)));
        assert_eq!(built.entity.attributes["description"], json!("All orders"));
        assert_eq!(built.entity.attributes["tags"], json!(["pii", "finance"]));
        assert_eq!(
            built.entity.relationships["assignedTerms"],
            vec![
                Reference::guid(Guid::new("g-1")),
                Reference::parse("margin", Some("GlossaryTerm")),
            ]
        );
        assert!(built.hold.is_none());
        assert!(built.marker.is_none());
    }

    #[test]
    fn test_readme_and_links_are_held() {
        let fixture = Fixture::new();
        let rec = record([
            "Table",
            "db/orders",
            "orders",
            "",
            "",
            "# Orders",
            "Docs|https://docs/orders\nhttps://wiki/orders",
            "",
        ]);
        let built = fixture.build(&rec).unwrap();
        let hold = built.hold.unwrap();

        assert_eq!(hold.primary, EntityKey::new("Table", "db/orders"));
        assert_eq!(hold.len(), 3);

        let readme = &hold.related["readme"][0];
        assert_eq!(readme.entity.type_name, README_TYPE);
        assert_eq!(readme.entity.identity, "db/orders/readme");
        assert_eq!(readme.back_reference, OWNER_RELATIONSHIP);

        let links = &hold.related["links"];
        assert_eq!(links[0].entity.type_name, LINK_TYPE);
        assert_eq!(links[0].entity.attributes["name"], json!("Docs"));
        assert_eq!(links[1].entity.attributes["url"], json!("https://wiki/orders"));

        // Related entities get their own placeholders
        assert!(links[0].entity.placeholder() != built.entity.placeholder());
    }

    #[test]
    fn test_blank_overwrite_columns_clear() {
        let mut fixture = Fixture::new();
        fixture.overwrite = BTreeSet::from([
            "description".to_string(),
            "readme".to_string(),
            "assignedTerms".to_string(),
        ]);

        let rec = record(["Table", "db/orders", "orders", " ", "", "", "", ""]);
        let built = fixture.build(&rec).unwrap();

        assert_eq!(built.entity.attributes["description"], Value::Null);
        assert!(!built.entity.attributes.contains_key("tags"));
        assert!(built.entity.relationships["assignedTerms"].is_empty());
        let marker = built.marker.unwrap();
        assert!(marker.relationships.contains("readme"));
        assert!(!marker.relationships.contains("links"));
    }

    #[test]
    fn test_column_filter_limits_imported_columns() {
        let mut fixture = Fixture::new();
        fixture.columns = ColumnFilter::Only(BTreeSet::from(["assignedTerms".to_string()]));

        let rec = record([
            "Table",
            "db/orders",
            "orders",
            "desc",
            "pii",
            "# hi",
            "",
            "revenue",
        ]);
        let built = fixture.build(&rec).unwrap();

        assert!(built.entity.attributes.is_empty());
        assert!(built.hold.is_none());
        assert_eq!(built.entity.relationships.len(), 1);
    }
}
