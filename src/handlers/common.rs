use super::{BuildContext, BuiltEntity, DeleteMarker, EntityHandler, RelatedEntity, RelatedHold};
use crate::error::RowError;
use crate::model::{
    Entity, LINKS_COLUMN, README_COLUMN, Record, Reference, TAGS_COLUMN, split_multi,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const README_TYPE: &str = "Readme";
pub const LINK_TYPE: &str = "Link";
/// Relationship on owned related entities pointing back at their primary.
pub const OWNER_RELATIONSHIP: &str = "asset";

/// Entity type owned through `column`, if the column holds owned related
/// entities.
pub fn owned_type(column: &str) -> Option<&'static str> {
    match column {
        README_COLUMN => Some(README_TYPE),
        LINKS_COLUMN => Some(LINK_TYPE),
        _ => None,
    }
}

/// Shared row-to-entity translation used by the built-in handlers.
///
/// Relationship columns become references, resolved to handles through the
/// identity cache where possible. `readme` and `links` become related
/// entities held until the primary resolves. Every other column is a plain
/// attribute.
pub fn build_entity(
    handler: &dyn EntityHandler,
    record: &Record,
    ctx: &BuildContext<'_>,
    identity: String,
) -> Result<BuiltEntity, RowError> {
    let type_name = handler.type_name();
    let structural = handler.structural_columns();
    let mut entity = Entity::new(ctx.placeholder, type_name, identity);
    let mut related: BTreeMap<String, Vec<RelatedEntity>> = BTreeMap::new();
    let mut cleared = BTreeSet::new();

    for (column, raw) in record.columns() {
        if column.is_empty() || structural.contains(&column) || !ctx.columns.allows(column) {
            continue;
        }

        let value = raw.trim();
        let clear_when_blank = ctx.overwrite_blank.contains(column);

        if let Some(owned) = owned_type(column) {
            if value.is_empty() {
                if clear_when_blank {
                    cleared.insert(column.to_string());
                }
                continue;
            }
            let entities = match owned {
                README_TYPE => vec![readme(&entity, value, ctx)],
                _ => links(&entity, value, ctx),
            };
            related.insert(column.to_string(), entities);
            continue;
        }

        if let Some(field) = ctx.schema.relationship(type_name, column) {
            if value.is_empty() {
                if clear_when_blank {
                    entity.relationships.insert(column.to_string(), Vec::new());
                }
                continue;
            }
            let references = split_multi(value)
                .map(|part| Reference::parse(part, Some(field.target_type.as_str())))
                .map(|reference| ctx.cache.resolve_reference(reference))
                .collect();
            entity.relationships.insert(column.to_string(), references);
            continue;
        }

        if value.is_empty() {
            if clear_when_blank {
                entity.attributes.insert(column.to_string(), Value::Null);
            }
            continue;
        }

        let attribute = if column == TAGS_COLUMN {
            Value::Array(
                split_multi(value)
                    .map(|tag| Value::String(tag.to_string()))
                    .collect(),
            )
        } else {
            Value::String(value.to_string())
        };
        entity.attributes.insert(column.to_string(), attribute);
    }

    let primary = entity.key();
    let hold = (!related.is_empty()).then(|| RelatedHold {
        primary: primary.clone(),
        related,
    });
    let marker = (!cleared.is_empty()).then(|| DeleteMarker {
        primary,
        relationships: cleared,
    });

    Ok(BuiltEntity {
        entity,
        hold,
        marker,
    })
}

fn readme(primary: &Entity, content: &str, ctx: &BuildContext<'_>) -> RelatedEntity {
    let entity = Entity::new(
        ctx.sequence.next(),
        README_TYPE,
        format!("{}/readme", primary.identity),
    )
    .with_attribute("content", Value::String(content.to_string()));

    RelatedEntity {
        entity,
        back_reference: OWNER_RELATIONSHIP.to_string(),
    }
}

/// One Link per line, written `url` or `title|url`.
fn links(primary: &Entity, value: &str, ctx: &BuildContext<'_>) -> Vec<RelatedEntity> {
    split_multi(value)
        .map(|line| {
            let (title, url) = match line.split_once('|') {
                Some((title, url)) => (title.trim(), url.trim()),
                None => (line, line),
            };
            let entity = Entity::new(
                ctx.sequence.next(),
                LINK_TYPE,
                format!("{}/link/{}", primary.identity, url),
            )
            .with_attribute("name", Value::String(title.to_string()))
            .with_attribute("url", Value::String(url.to_string()));

            RelatedEntity {
                entity,
                back_reference: OWNER_RELATIONSHIP.to_string(),
            }
        })
        .collect()
}
