// Aggregation
// Two modes: one row over the whole input (aggregates without GROUP BY),
// or one row per group. Fields that are not COUNT/SUM/AVG/MIN/MAX produce
// no output column in either mode, except for the GROUP BY columns.

use super::parser::{Field, FieldKind};
use super::predicate::numeric;
use crate::storage::{Row, Value};
use std::collections::HashMap;

/// Joins the group-by values into a group key
/// Values containing the separator can make two groups share a key
pub const GROUP_KEY_SEPARATOR: &str = "-";

/// Aggregate the whole input into a single row
///
/// - COUNT is the number of rows
/// - SUM adds numeric values; anything non-numeric counts as 0
/// - AVG is SUM divided by the row count, or NULL when there are no rows
/// - MIN / MAX only look at numeric values, and are NULL without any
pub fn aggregate_all(rows: &[Row], fields: &[Field]) -> Row {
    let mut out = Row::new();

    for field in fields {
        let value = match &field.kind {
            FieldKind::Count => Value::Number(rows.len() as f64),
            FieldKind::Sum(column) => Value::Number(sum(rows, column)),
            FieldKind::Avg(column) => average(sum(rows, column), rows.len()),
            FieldKind::Min(column) => extreme(rows, column, f64::min),
            FieldKind::Max(column) => extreme(rows, column, f64::max),
            FieldKind::Plain(_) | FieldKind::Wildcard => continue,
        };
        out.insert(&field.text, value);
    }

    out
}

fn sum(rows: &[Row], column: &str) -> f64 {
    rows.iter()
        .map(|row| row.get(column).and_then(numeric).unwrap_or(0.0))
        .sum()
}

fn average(total: f64, count: usize) -> Value {
    if count == 0 {
        Value::Null
    } else {
        Value::Number(total / count as f64)
    }
}

fn extreme(rows: &[Row], column: &str, pick: fn(f64, f64) -> f64) -> Value {
    rows.iter()
        .filter_map(|row| row.get(column).and_then(numeric))
        .reduce(pick)
        .map_or(Value::Null, Value::Number)
}

/// Running state for one group
#[derive(Debug)]
struct GroupAccumulator {
    /// The group-by values, in GROUP BY order
    values: Vec<Value>,
    count: usize,
    sums: HashMap<String, f64>,
    mins: HashMap<String, f64>,
    maxes: HashMap<String, f64>,
}

impl GroupAccumulator {
    fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            count: 0,
            sums: HashMap::new(),
            mins: HashMap::new(),
            maxes: HashMap::new(),
        }
    }

    fn add(&mut self, row: &Row, fields: &[Field]) {
        self.count += 1;

        for field in fields {
            match &field.kind {
                FieldKind::Sum(column) | FieldKind::Avg(column) => {
                    let n = row.get(column).and_then(numeric).unwrap_or(0.0);
                    *self.sums.entry(column.clone()).or_insert(0.0) += n;
                }
                FieldKind::Min(column) => {
                    if let Some(n) = row.get(column).and_then(numeric) {
                        // the first value seen initializes the minimum
                        let min = self.mins.entry(column.clone()).or_insert(n);
                        *min = min.min(n);
                    }
                }
                FieldKind::Max(column) => {
                    if let Some(n) = row.get(column).and_then(numeric) {
                        let max = self.maxes.entry(column.clone()).or_insert(n);
                        *max = max.max(n);
                    }
                }
                FieldKind::Count | FieldKind::Plain(_) | FieldKind::Wildcard => {}
            }
        }
    }

    fn finish(self, group_by: &[String], fields: &[Field]) -> Row {
        let mut out = Row::new();

        for (column, value) in group_by.iter().zip(self.values) {
            out.insert(column, value);
        }

        let lookup = |map: &HashMap<String, f64>, column: &str| {
            map.get(column).copied().map_or(Value::Null, Value::Number)
        };

        for field in fields {
            let value = match &field.kind {
                FieldKind::Count => Value::Number(self.count as f64),
                FieldKind::Sum(column) => {
                    Value::Number(self.sums.get(column).copied().unwrap_or(0.0))
                }
                // Extension: AVG per group
                FieldKind::Avg(column) => {
                    average(self.sums.get(column).copied().unwrap_or(0.0), self.count)
                }
                FieldKind::Min(column) => lookup(&self.mins, column),
                FieldKind::Max(column) => lookup(&self.maxes, column),
                FieldKind::Plain(_) | FieldKind::Wildcard => continue,
            };
            out.insert(&field.text, value);
        }

        out
    }
}

/// Build the key for a row's group
pub fn group_key(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::key_text)
        .collect::<Vec<_>>()
        .join(GROUP_KEY_SEPARATOR)
}

/// Aggregate per group, one output row per group in first-seen order
///
/// Each row carries the GROUP BY columns followed by one column per
/// aggregate, keyed by the aggregate's text.
pub fn aggregate_groups(rows: &[Row], group_by: &[String], fields: &[Field]) -> Vec<Row> {
    let mut groups: Vec<GroupAccumulator> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let values: Vec<Value> = group_by
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect();

        let slot = *index.entry(group_key(&values)).or_insert_with(|| {
            groups.push(GroupAccumulator::new(values));
            groups.len() - 1
        });
        groups[slot].add(row, fields);
    }

    groups
        .into_iter()
        .map(|group| group.finish(group_by, fields))
        .collect()
}
