// Predicate evaluation
// Both sides of a comparison go through the same coercion (parse_value)
// before they are compared, so '5' in a query and "5" in a CSV cell are
// treated exactly alike.

use super::parser::Predicate;
use crate::error::{QueryError, QueryResult};
use crate::storage::{Row, Value};

/// Coerce a value for comparison
///
/// - A string wrapped in one matching pair of `'` or `"` loses that pair
///   and stays a string (`'5'` is the string `5`)
/// - Otherwise a non-empty, fully numeric string becomes a number
/// - Anything else is left as it is
pub fn parse_value(value: &Value) -> Value {
    match value {
        Value::Text(text) => {
            if let Some(inner) = strip_quotes(text) {
                return Value::Text(inner.to_string());
            }
            match parse_number(text) {
                Some(n) => Value::Number(n),
                None => Value::Text(text.clone()),
            }
        }
        other => other.clone(),
    }
}

/// Coerce the raw text of a WHERE literal
pub fn parse_literal(literal: &str) -> Value {
    parse_value(&Value::Text(literal.to_string()))
}

/// Read a value as a number, the way aggregates do
/// Quoted or non-numeric text is not a number
pub fn numeric(value: &Value) -> Option<f64> {
    match parse_value(value) {
        Value::Number(n) => Some(n),
        _ => None,
    }
}

fn strip_quotes(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    // f64::from_str also takes "inf" and "NaN"; only plain decimal
    // (optionally with an exponent) counts as numeric here
    let numeric_chars = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if !numeric_chars {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Evaluate one predicate against a row
///
/// A field the row does not have is an error, raised before any coercion.
/// Values of different types (a number against a string, or NULL against
/// anything) are never equal and never ordered: only `!=` is true for them.
pub fn evaluate(row: &Row, predicate: &Predicate) -> QueryResult<bool> {
    let value = row
        .get(&predicate.field)
        .ok_or_else(|| QueryError::Field(predicate.field.clone()))?;

    let lhs = parse_value(value);
    let rhs = parse_literal(&predicate.literal);

    Ok(predicate.operator.matches(lhs.compare(&rhs)))
}

/// Keep the rows for which every predicate holds
/// The input is left untouched; matching rows are copied into a new vector
pub fn filter_rows(rows: &[Row], predicates: &[Predicate]) -> QueryResult<Vec<Row>> {
    let mut kept = Vec::new();
    for row in rows {
        let mut keep = true;
        for predicate in predicates {
            if !evaluate(row, predicate)? {
                keep = false;
                break;
            }
        }
        if keep {
            kept.push(row.clone());
        }
    }
    Ok(kept)
}
