//! CSV table ingestion.

use csv::{StringRecord, StringRecordsIntoIter};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// One data row of an input table.
#[derive(Debug, Clone)]
pub struct CsvRow {
    /// 1-based line number in the source file
    pub line: u64,
    fields: StringRecord,
}

impl CsvRow {
    /// Build a row from raw fields.
    pub fn new(line: u64, fields: &[&str]) -> Self {
        Self {
            line,
            fields: StringRecord::from(fields.to_vec()),
        }
    }

    /// Get a field by column index.
    pub fn get(&self, column: usize) -> Option<&str> {
        self.fields.get(column)
    }

    /// Number of fields in the row.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A comma-delimited table with one header row.
///
/// Quoted fields may contain embedded commas. Rows are produced lazily.
pub struct CsvTable {
    path: PathBuf,
    records: StringRecordsIntoIter<File>,
}

impl CsvTable {
    /// Open a table. Fails immediately if the file is missing or unreadable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Error::InputUnavailable {
            path: path.clone(),
            source,
        })?;

        let records = csv::ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(true)
            .flexible(true)
            .from_reader(file)
            .into_records();

        Ok(Self { path, records })
    }

    /// Path the table was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for CsvTable {
    type Item = Result<CsvRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(record.map_err(Error::from).map(|fields| CsvRow {
            line: fields.position().map(|p| p.line()).unwrap_or(0),
            fields,
        }))
    }
}
