// Execution events
// The executor reports what each stage did through an observer instead of
// printing; the default observer hands everything to `tracing`.

use super::parser::JoinKind;
use tracing::debug;

/// Something that happened while executing one query
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    QueryParsed {
        table: String,
        join_table: Option<String>,
        predicates: usize,
    },
    TableFetched {
        table: String,
        rows: usize,
    },
    JoinCompleted {
        kind: JoinKind,
        rows: usize,
    },
    RowsFiltered {
        before: usize,
        after: usize,
    },
    RowsAggregated {
        grouped: bool,
        groups: usize,
    },
    QueryCompleted {
        rows: usize,
    },
}

/// Receives execution events
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Logs every event at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::QueryParsed {
                table,
                join_table,
                predicates,
            } => debug!(table = %table, join_table = ?join_table, predicates, "query parsed"),
            ExecutionEvent::TableFetched { table, rows } => {
                debug!(table = %table, rows, "table fetched")
            }
            ExecutionEvent::JoinCompleted { kind, rows } => {
                debug!(kind = %kind, rows, "join completed")
            }
            ExecutionEvent::RowsFiltered { before, after } => {
                debug!(before, after, "rows filtered")
            }
            ExecutionEvent::RowsAggregated { grouped, groups } => {
                debug!(grouped, groups, "rows aggregated")
            }
            ExecutionEvent::QueryCompleted { rows } => debug!(rows, "query completed"),
        }
    }
}
