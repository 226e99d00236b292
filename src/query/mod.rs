// Query module - parses SELECT statements and runs them
// parser -> join -> predicate -> aggregate, driven by the executor
pub mod aggregate;
pub mod executor;
pub mod join;
pub mod observer;
pub mod parser;
pub mod predicate;

pub use executor::{QueryExecutor, ResultSet};
pub use observer::{ExecutionEvent, ExecutionObserver, TracingObserver};
pub use parser::{QueryDescriptor, QueryParser};
