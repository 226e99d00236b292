// MiniSQL - a small SELECT engine over tables of loosely typed rows
// This is the library root that exposes the public API

pub mod error;
pub mod query;
pub mod storage;

// Re-export commonly used types for convenience
pub use error::{QueryError, SourceError};
pub use query::{
    ExecutionEvent, ExecutionObserver, QueryDescriptor, QueryExecutor, QueryParser, ResultSet,
    TracingObserver,
};
pub use storage::{ColumnKey, CsvTableSource, MemoryTableSource, Row, TableSource, Value};
