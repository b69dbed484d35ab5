use crate::delta::DeltaResult;
use crate::error::RowError;
use crate::handlers::{EntityHandler, HandlerRegistry};
use crate::model::Record;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps rows to their type handler and decides whether a row belongs to the
/// running pass.
pub struct RecordClassifier {
    registry: Arc<HandlerRegistry>,
    delta: Option<Arc<DeltaResult>>,
    resolved: HashMap<String, Option<Arc<dyn EntityHandler>>>,
}

/// Whether a row takes part in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Include,
    OtherType,
    OtherDepth,
    /// Unchanged since the previous snapshot.
    Unchanged,
}

impl RecordClassifier {
    pub fn new(registry: Arc<HandlerRegistry>, delta: Option<Arc<DeltaResult>>) -> Self {
        Self {
            registry,
            delta,
            resolved: HashMap::new(),
        }
    }

    pub fn classify(&mut self, record: &Record) -> Result<Arc<dyn EntityHandler>, RowError> {
        let type_name = record
            .type_name()
            .ok_or(RowError::MissingType { row: record.row() })?;

        if !self.resolved.contains_key(type_name) {
            let handler = self.registry.resolve(type_name);
            self.resolved.insert(type_name.to_string(), handler);
        }

        self.resolved
            .get(type_name)
            .cloned()
            .flatten()
            .ok_or_else(|| RowError::UnsupportedType {
                row: record.row(),
                type_name: type_name.to_string(),
            })
    }

    /// `depth` is the depth imported by the running pass, `None` for passes
    /// that take every row of the type.
    pub fn select(
        &self,
        record: &Record,
        handler: &dyn EntityHandler,
        type_name: &str,
        depth: Option<usize>,
    ) -> Selection {
        if handler.type_name() != type_name {
            return Selection::OtherType;
        }
        if let Some(depth) = depth
            && handler.depth(record) != depth
        {
            return Selection::OtherDepth;
        }
        if let Some(delta) = &self.delta
            && let Ok(identity) = handler.identity(record)
            && !delta.should_load(&identity)
        {
            return Selection::Unchanged;
        }
        Selection::Include
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Header;

    fn record(type_name: &str, identity: &str, parent: &str) -> Record {
        let header = Arc::new(Header::new([
            "typeName",
            "qualifiedName",
            "name",
            "parentDomain",
        ]));
        Record::new(
            1,
            header,
            vec![
                type_name.to_string(),
                identity.to_string(),
                "n".to_string(),
                parent.to_string(),
            ],
        )
    }

    #[test]
    fn test_classify_reports_blank_and_unknown_types() {
        let mut classifier =
            RecordClassifier::new(Arc::new(HandlerRegistry::builtin().without_fallback()), None);

        assert_eq!(
            classifier.classify(&record("", "x", "")).err(),
            Some(RowError::MissingType { row: 1 })
        );
        assert!(matches!(
            classifier.classify(&record("Widget", "x", "")),
            Err(RowError::UnsupportedType { .. })
        ));
        assert!(classifier.classify(&record("Table", "x", "")).is_ok());
    }

    #[test]
    fn test_select_filters_by_type_and_depth() {
        let mut classifier = RecordClassifier::new(Arc::new(HandlerRegistry::builtin()), None);
        let child = record("DataDomain", "sales/emea", "sales");
        let handler = classifier.classify(&child).unwrap();

        assert_eq!(
            classifier.select(&child, handler.as_ref(), "DataDomain", Some(2)),
            Selection::Include
        );
        assert_eq!(
            classifier.select(&child, handler.as_ref(), "DataDomain", Some(1)),
            Selection::OtherDepth
        );
        assert_eq!(
            classifier.select(&child, handler.as_ref(), "Table", None),
            Selection::OtherType
        );
    }
}
