use crate::error::LoaderError;
use crate::model::{ALWAYS_INCLUDED_COLUMNS, Header};
use crate::schema::RelationshipSchema;
use std::collections::BTreeSet;

/// Relationship columns of one type postponed to a second pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CyclicPlan {
    pub deferred: BTreeSet<String>,
}

impl CyclicPlan {
    pub fn needs_second_pass(&self) -> bool {
        !self.deferred.is_empty()
    }
}

/// Decide which cyclic relationship columns of `type_name` are deferred.
///
/// Only one end of a bidirectional relationship may be present as a column.
/// When both are, the direction is ambiguous and the run must stop before
/// anything is written. A self-referencing relationship present as a column
/// is always deferred.
pub fn plan_cyclic_fields(
    type_name: &str,
    header: &Header,
    schema: &dyn RelationshipSchema,
) -> Result<CyclicPlan, LoaderError> {
    let excluding: BTreeSet<String> = ALWAYS_INCLUDED_COLUMNS
        .iter()
        .map(|column| column.to_string())
        .collect();

    let mut plan = CyclicPlan::default();
    for (field_a, field_b) in schema.cyclical_relationship_pairs(type_name, &excluding) {
        let has_a = header.contains(&field_a);
        let has_b = header.contains(&field_b);

        if field_a == field_b {
            if has_a {
                plan.deferred.insert(field_a);
            }
            continue;
        }

        match (has_a, has_b) {
            (true, true) => {
                return Err(LoaderError::AmbiguousCyclicRelationship {
                    type_name: type_name.to_string(),
                    field_a,
                    field_b,
                });
            }
            (true, false) => {
                plan.deferred.insert(field_a);
            }
            (false, true) => {
                plan.deferred.insert(field_b);
            }
            (false, false) => {}
        }
    }

    if plan.needs_second_pass() {
        log::info!(
            "{}: deferring cyclic relationship columns {:?} to a second pass",
            type_name,
            plan.deferred
        );
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;

    fn header(columns: &[&str]) -> Header {
        Header::new(columns.iter().copied())
    }

    #[test]
    fn test_both_ends_present_is_fatal() {
        let schema = StaticSchema::builtin();
        let err = plan_cyclic_fields(
            "GlossaryTerm",
            &header(&["typeName", "qualifiedName", "preferredTerms", "preferredToTerms"]),
            &schema,
        )
        .unwrap_err();

        match err {
            LoaderError::AmbiguousCyclicRelationship {
                type_name,
                field_a,
                field_b,
            } => {
                assert_eq!(type_name, "GlossaryTerm");
                assert_eq!(field_a, "preferredTerms");
                assert_eq!(field_b, "preferredToTerms");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_end_and_self_reference_are_deferred() {
        let schema = StaticSchema::builtin();
        let plan = plan_cyclic_fields(
            "GlossaryTerm",
            &header(&["typeName", "qualifiedName", "seeAlso", "replacementTerms", "tags"]),
            &schema,
        )
        .unwrap();

        assert_eq!(
            plan.deferred,
            BTreeSet::from(["replacementTerms".to_string(), "seeAlso".to_string()])
        );
    }

    #[test]
    fn test_types_without_cycles_need_one_pass() {
        let schema = StaticSchema::builtin();
        let plan = plan_cyclic_fields(
            "Table",
            &header(&["typeName", "qualifiedName", "seeAlso"]),
            &schema,
        )
        .unwrap();
        assert!(!plan.needs_second_pass());
    }
}
