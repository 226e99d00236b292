// CSV table source
// Each table is a file named `<table>.csv` inside a data directory

use super::{ColumnKey, Row, TableSource, Value};
use crate::error::SourceError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads tables from CSV files with a header line
///
/// Every cell is returned as text; numeric coercion is left to the
/// predicate evaluator so that `'5'` and `5` keep their distinction.
#[derive(Debug, Clone)]
pub struct CsvTableSource {
    dir: PathBuf,
}

impl CsvTableSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a table name to its file, refusing anything that could
    /// escape the data directory
    fn table_path(&self, table: &str) -> Option<PathBuf> {
        let separator = |c: char| c == '/' || c == '\\';
        if table.is_empty() || table.contains(separator) || table.contains("..") {
            return None;
        }
        Some(self.dir.join(format!("{}.csv", table)))
    }
}

#[async_trait]
impl TableSource for CsvTableSource {
    async fn fetch(&self, table: &str) -> Result<Vec<Row>, SourceError> {
        let path = self
            .table_path(table)
            .ok_or_else(|| SourceError::NotFound(table.to_string()))?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceError::NotFound(table.to_string()),
            _ => SourceError::Read {
                table: table.to_string(),
                reason: e.to_string(),
            },
        })?;

        let rows = parse_csv(table, &bytes)?;
        debug!(table, path = %path.display(), rows = rows.len(), "loaded csv table");
        Ok(rows)
    }
}

fn parse_csv(table: &str, bytes: &[u8]) -> Result<Vec<Row>, SourceError> {
    let read_error = |e: csv::Error| SourceError::Read {
        table: table.to_string(),
        reason: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<ColumnKey> = reader
        .headers()
        .map_err(read_error)?
        .iter()
        .map(ColumnKey::plain)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(read_error)?;
        let mut row = Row::new();
        for (key, cell) in headers.iter().zip(record.iter()) {
            row.set(key.clone(), Value::Text(cell.to_string()));
        }
        rows.push(row);
    }

    Ok(rows)
}
