use super::{RecordSource, RowIter, SourceError};
use crate::model::{Header, Record};
use std::sync::Arc;

/// Source backed by rows held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    header: Arc<Header>,
    rows: Vec<Vec<String>>,
}

impl MemorySource {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            header: Arc::new(Header::new(columns.iter().map(AsRef::as_ref))),
            rows: Vec::new(),
        }
    }

    pub fn with_row<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.push(fields);
        self
    }

    pub fn push<S: AsRef<str>>(&mut self, fields: &[S]) {
        self.rows
            .push(fields.iter().map(|f| f.as_ref().to_string()).collect());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RecordSource for MemorySource {
    fn describe(&self) -> String {
        format!("in-memory source ({} rows)", self.rows.len())
    }

    fn header(&self) -> Result<Arc<Header>, SourceError> {
        Ok(Arc::clone(&self.header))
    }

    fn rows(&self) -> Result<RowIter<'_>, SourceError> {
        let header = Arc::clone(&self.header);
        Ok(Box::new(self.rows.iter().enumerate().map(
            move |(index, fields)| Ok(Record::new(index + 1, Arc::clone(&header), fields.clone())),
        )))
    }
}
