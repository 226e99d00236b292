// Storage module - the row model and the sources that produce rows
// Tables live outside the engine; a TableSource hands them over as rows

pub mod csv_table;
pub mod source;

pub use csv_table::CsvTableSource;
pub use source::{MemoryTableSource, TableSource};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A single cell value
///
/// Tables are loosely typed: a cell is either text, a number, or missing.
/// `untagged` makes the JSON form the natural one (`null`, `3`, `"abc"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    /// Compare two values of the same type
    /// Values of different types (including NULL) have no ordering
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text used when a value becomes part of a group key
    /// NULL renders as the empty string
    pub fn key_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            // Whole numbers print without a trailing ".0"
            Value::Number(n) => match whole(*n) {
                Some(i) => write!(f, "{}", i),
                None => write!(f, "{}", n),
            },
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// `n` as an integer, when it is one and fits without loss
fn whole(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() < 1e15).then_some(n as i64)
}

// Counts and sums come out as `15`, not `15.0`
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Number(n) => match whole(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// The name of a column, optionally tagged with the table it came from
///
/// Table sources produce plain keys (`age`); the join stage produces
/// qualified ones (`student.age`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnKey {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Split a field reference on its first '.'
    /// `"t.c"` becomes table `t`, column `c`; `"c"` stays plain
    pub fn parse(field: &str) -> Self {
        match field.split_once('.') {
            Some((table, name)) if !table.is_empty() && !name.is_empty() => {
                Self::qualified(table, name)
            }
            _ => Self::plain(field),
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.table.is_some()
    }

    /// The same column without its table tag
    pub fn unqualified(&self) -> ColumnKey {
        Self::plain(self.name.clone())
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A single row: an ordered list of (column, value) pairs
///
/// Plain and qualified keys can live side by side in the same row. Lookups
/// go through `get`, which tries the exact key first and then falls back to
/// the bare column name, so callers never concatenate key strings themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(ColumnKey, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(field, value)` pairs, parsing each field as a key
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut row = Row::new();
        for (field, value) in pairs {
            row.insert(field.as_ref(), value.into());
        }
        row
    }

    /// Set a column, replacing the value if the key already exists
    /// New keys keep insertion order
    pub fn set(&mut self, key: ColumnKey, value: Value) {
        match self.columns.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((key, value)),
        }
    }

    /// Set a column by its textual field reference
    pub fn insert(&mut self, field: &str, value: Value) {
        self.set(ColumnKey::parse(field), value);
    }

    /// Look up a value by exact key
    pub fn get_key(&self, key: &ColumnKey) -> Option<&Value> {
        self.columns.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a value by field reference
    /// Tries the exact key, then the unqualified form of a qualified key
    pub fn get(&self, field: &str) -> Option<&Value> {
        let key = ColumnKey::parse(field);
        self.get_key(&key).or_else(|| {
            if key.is_qualified() {
                self.get_key(&key.unqualified())
            } else {
                None
            }
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &ColumnKey> {
        self.columns.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnKey, &Value)> {
        self.columns.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// A row with the same keys as this one and every value NULL
    pub fn nulled(&self) -> Row {
        Row {
            columns: self
                .columns
                .iter()
                .map(|(k, _)| (k.clone(), Value::Null))
                .collect(),
        }
    }
}

// Rows serialize as JSON objects, keeping column order
impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (key, value) in &self.columns {
            map.serialize_entry(&key.to_string(), value)?;
        }
        map.end()
    }
}
