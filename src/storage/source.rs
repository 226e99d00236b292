// Table sources
// The engine never reads storage itself; it asks a TableSource for rows

use super::Row;
use crate::error::SourceError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Supplies named tables as ordered row sequences
///
/// Rows use plain (unqualified) column names. Fetching is the only async
/// step of a query, so implementations are free to do I/O here.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn fetch(&self, table: &str) -> Result<Vec<Row>, SourceError>;
}

/// A table source backed by a HashMap, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryTableSource {
    tables: HashMap<String, Vec<Row>>,
}

impl MemoryTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a table
    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.insert(name, rows);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, rows: Vec<Row>) {
        self.tables.insert(name.into(), rows);
    }
}

#[async_trait]
impl TableSource for MemoryTableSource {
    async fn fetch(&self, table: &str) -> Result<Vec<Row>, SourceError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(table.to_string()))
    }
}
