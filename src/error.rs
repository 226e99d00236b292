// Error types
// Every failure is fatal to the query that raised it, so these are plain
// enums the caller matches on - there is no recovery path inside the engine.

use thiserror::Error;

/// Errors returned while parsing or executing a query
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query text does not follow the grammar
    #[error("parse error: {0}")]
    Parse(String),

    /// The query is well-formed but asks for something we do not implement
    /// (e.g. a FULL JOIN or the `<>` operator)
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// A WHERE clause references a column that the row does not have
    #[error("invalid field: {0}")]
    Field(String),

    /// The table source failed to produce a table
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Errors raised by a `TableSource`
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("table not found: {0}")]
    NotFound(String),

    #[error("failed to read table '{table}': {reason}")]
    Read { table: String, reason: String },
}

pub type QueryResult<T> = Result<T, QueryError>;
