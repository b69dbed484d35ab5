use super::{RecordSource, RowIter, SourceError};
use crate::model::{Header, Record};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// CSV file source. Paths ending in `.gz` are decompressed on the fly.
///
/// The header is read once at construction; each call to `rows()` reopens
/// the file.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    header: Arc<Header>,
}

impl CsvSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let mut reader = Self::reader(&path)?;
        let headers = reader
            .headers()
            .map_err(|e| SourceError::Header(e.to_string()))?;
        let header = Arc::new(Header::new(headers.iter()));

        if header.is_empty() {
            return Err(SourceError::Header(format!(
                "{} has an empty header row",
                path.display()
            )));
        }

        log::debug!(
            "opened source {} with {} columns",
            path.display(),
            header.len()
        );

        Ok(Self { path, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(path: &Path) -> Result<csv::Reader<Box<dyn Read + Send>>, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let inner: Box<dyn Read + Send> =
            if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz")) {
                Box::new(GzDecoder::new(BufReader::new(file)))
            } else {
                Box::new(BufReader::new(file))
            };

        Ok(csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(inner))
    }
}

impl RecordSource for CsvSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn header(&self) -> Result<Arc<Header>, SourceError> {
        Ok(Arc::clone(&self.header))
    }

    fn rows(&self) -> Result<RowIter<'_>, SourceError> {
        let reader = Self::reader(&self.path)?;
        let header = Arc::clone(&self.header);

        let iter = reader
            .into_records()
            .enumerate()
            .map(move |(index, result)| {
                let row = index + 1;
                result
                    .map(|fields| {
                        Record::new(
                            row,
                            Arc::clone(&header),
                            fields.iter().map(str::to_string).collect(),
                        )
                    })
                    .map_err(|e| SourceError::Row {
                        row,
                        message: e.to_string(),
                    })
            });

        Ok(Box::new(iter))
    }
}
