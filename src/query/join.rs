// Join evaluation
// Nested-loop joins over two in-memory row sequences with an equality
// condition. The base table is the one named in FROM.

use super::parser::JoinCondition;
use crate::storage::{ColumnKey, Row, Value};

/// Everything a join needs besides the rows themselves
#[derive(Debug, Clone, Copy)]
pub struct JoinSpec<'a> {
    /// `left` is read from base rows, `right` from join rows
    pub condition: &'a JoinCondition,
    /// Fields to emit; unqualified ones belong to the base table
    pub fields: &'a [String],
    pub base_table: &'a str,
}

/// Rows match when both join keys are present, non-NULL and equal
fn keys_match(base: &Row, joined: &Row, condition: &JoinCondition) -> bool {
    match (base.get(&condition.left), joined.get(&condition.right)) {
        (Some(a), Some(b)) if !a.is_null() && !b.is_null() => a == b,
        _ => false,
    }
}

/// Build one output row
///
/// A field `t.c` is read from the base row when `t` is the base table and
/// from the join row otherwise. A side with no row (outer-join padding)
/// gives NULL. A column the row itself lacks is left out, so a later WHERE
/// on it fails with a field error. With `include_all_base`, every base
/// column is also emitted as `base.column`.
fn build_row(
    base: Option<&Row>,
    joined: Option<&Row>,
    spec: &JoinSpec,
    include_all_base: bool,
) -> Row {
    let mut out = Row::new();

    if include_all_base {
        if let Some(base) = base {
            for (key, value) in base.iter() {
                out.set(
                    ColumnKey::qualified(spec.base_table, key.name.clone()),
                    value.clone(),
                );
            }
        }
    }

    for field in spec.fields {
        let key = ColumnKey::parse(field);
        let from_base = key.table.as_deref().map_or(true, |t| t == spec.base_table);
        let source = if from_base { base } else { joined };
        let value = match source {
            None => Value::Null,
            Some(row) => match row.get(&key.name) {
                Some(value) => value.clone(),
                None => continue,
            },
        };
        out.set(key, value);
    }

    out
}

/// INNER JOIN: one output row per matching (base, join) pair
/// Base rows without a match produce nothing
pub fn inner_join(base_rows: &[Row], join_rows: &[Row], spec: &JoinSpec) -> Vec<Row> {
    base_rows
        .iter()
        .flat_map(|base| {
            join_rows
                .iter()
                .filter(move |joined| keys_match(base, joined, spec.condition))
                .map(move |joined| build_row(Some(base), Some(joined), spec, false))
        })
        .collect()
}

/// LEFT JOIN: like INNER, but a base row without a match still produces
/// one row, with every join-side field NULL
pub fn left_join(base_rows: &[Row], join_rows: &[Row], spec: &JoinSpec) -> Vec<Row> {
    let mut out = Vec::new();
    for base in base_rows {
        let before = out.len();
        for joined in join_rows {
            if keys_match(base, joined, spec.condition) {
                out.push(build_row(Some(base), Some(joined), spec, true));
            }
        }
        if out.len() == before {
            out.push(build_row(Some(base), None, spec, true));
        }
    }
    out
}

/// RIGHT JOIN: every join row produces at least one row
///
/// A join row without a matching base row is paired with a stand-in base
/// row of the same shape as a real one, with every value NULL. An empty
/// base table has no shape to copy; its side is padded like LEFT JOIN pads.
pub fn right_join(base_rows: &[Row], join_rows: &[Row], spec: &JoinSpec) -> Vec<Row> {
    let null_base = base_rows.first().map(Row::nulled);

    let mut out = Vec::new();
    for joined in join_rows {
        let before = out.len();
        for base in base_rows {
            if keys_match(base, joined, spec.condition) {
                out.push(build_row(Some(base), Some(joined), spec, true));
            }
        }
        if out.len() == before {
            out.push(build_row(null_base.as_ref(), Some(joined), spec, true));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn students() -> Vec<Row> {
        vec![
            Row::from_pairs([("id", "1"), ("name", "John"), ("age", "30")]),
            Row::from_pairs([("id", "2"), ("name", "Jane"), ("age", "25")]),
            Row::from_pairs([("id", "3"), ("name", "Bob"), ("age", "22")]),
        ]
    }

    fn enrollments() -> Vec<Row> {
        vec![
            Row::from_pairs([("student_id", "1"), ("course", "Mathematics")]),
            Row::from_pairs([("student_id", "1"), ("course", "Physics")]),
            Row::from_pairs([("student_id", "2"), ("course", "Chemistry")]),
            Row::from_pairs([("student_id", "5"), ("course", "Biology")]),
        ]
    }

    fn condition() -> JoinCondition {
        JoinCondition {
            left: "student.id".to_string(),
            right: "enrollment.student_id".to_string(),
        }
    }

    fn fields() -> Vec<String> {
        vec!["student.name".to_string(), "enrollment.course".to_string()]
    }

    fn pairs(rows: &[Row]) -> Vec<(String, String)> {
        rows.iter()
            .map(|r| {
                (
                    r.get("student.name").unwrap().to_string(),
                    r.get("enrollment.course").unwrap().to_string(),
                )
            })
            .collect()
    }

    /// RIGHT JOIN the other way round: a LEFT JOIN with the tables
    /// swapped, so the join table drives the loop and becomes the base
    fn right_join_by_swap(
        base_rows: &[Row],
        join_rows: &[Row],
        spec: &JoinSpec,
        join_table: &str,
    ) -> Vec<Row> {
        let swapped = JoinCondition {
            left: spec.condition.right.clone(),
            right: spec.condition.left.clone(),
        };
        let swapped_spec = JoinSpec {
            condition: &swapped,
            fields: spec.fields,
            base_table: join_table,
        };
        left_join(join_rows, base_rows, &swapped_spec)
    }

    /// The value of each requested field, row by row
    fn selected(rows: &[Row], fields: &[String]) -> Vec<Vec<Option<Value>>> {
        rows.iter()
            .map(|row| fields.iter().map(|f| row.get(f).cloned()).collect())
            .collect()
    }

    #[test]
    fn test_inner_join() {
        let (fields, condition) = (fields(), condition());
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };

        let rows = inner_join(&students(), &enrollments(), &spec);

        assert_eq!(
            pairs(&rows),
            vec![
                ("John".to_string(), "Mathematics".to_string()),
                ("John".to_string(), "Physics".to_string()),
                ("Jane".to_string(), "Chemistry".to_string()),
            ]
        );
        // inner joins carry only the requested fields
        assert_eq!(rows[0].len(), 2);
    }

    #[test]
    fn test_inner_join_cardinality() {
        let (fields, condition) = (fields(), condition());
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };
        let (base, joined) = (students(), enrollments());

        let expected: usize = base
            .iter()
            .map(|b| joined.iter().filter(|j| keys_match(b, j, &condition)).count())
            .sum();

        assert_eq!(inner_join(&base, &joined, &spec).len(), expected);
    }

    #[test]
    fn test_left_join_keeps_unmatched_base_rows() {
        let (fields, condition) = (fields(), condition());
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };

        let rows = left_join(&students(), &enrollments(), &spec);

        assert_eq!(rows.len(), 4);
        let bob = &rows[3];
        assert_eq!(bob.get("student.name"), Some(&Value::from("Bob")));
        assert_eq!(bob.get("enrollment.course"), Some(&Value::Null));
        // every base column is also present under its qualified name
        assert_eq!(bob.get("student.age"), Some(&Value::from("22")));
        assert_eq!(bob.get("student.id"), Some(&Value::from("3")));
    }

    #[test]
    fn test_right_join_keeps_unmatched_join_rows() {
        let (fields, condition) = (fields(), condition());
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };

        let rows = right_join(&students(), &enrollments(), &spec);

        assert_eq!(rows.len(), 4);
        let biology = &rows[3];
        assert_eq!(biology.get("enrollment.course"), Some(&Value::from("Biology")));
        assert_eq!(biology.get("student.name"), Some(&Value::Null));
        assert_eq!(biology.get("student.id"), Some(&Value::Null));
    }

    #[test]
    fn test_right_join_emits_every_match() {
        let (fields, condition) = (fields(), condition());
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };
        let mut base = students();
        base.push(Row::from_pairs([("id", "1"), ("name", "Johnny"), ("age", "19")]));

        let rows = right_join(&base, &enrollments(), &spec);

        // Mathematics and Physics both match two students
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[1].get("student.name"), Some(&Value::from("Johnny")));
    }

    #[test]
    fn test_right_join_strategies_agree_on_qualified_fields() {
        let condition = condition();
        let fields = vec![
            "student.name".to_string(),
            "enrollment.course".to_string(),
            "student.id".to_string(),
        ];
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };
        let mut with_duplicates = students();
        with_duplicates.push(Row::from_pairs([("id", "2"), ("name", "Janet"), ("age", "28")]));

        let datasets = [
            (students(), enrollments()),
            (with_duplicates, enrollments()),
            (Vec::new(), enrollments()),
            (students(), Vec::new()),
            (students(), vec![Row::from_pairs([("student_id", "9"), ("course", "Art")])]),
        ];

        for (base, joined) in datasets {
            let direct = right_join(&base, &joined, &spec);
            let swapped = right_join_by_swap(&base, &joined, &spec, "enrollment");

            assert_eq!(selected(&direct, &fields), selected(&swapped, &fields));
        }
    }

    #[test]
    fn test_swapped_right_join_resolves_bare_names_elsewhere() {
        let condition = condition();
        let fields = vec!["name".to_string(), "enrollment.course".to_string()];
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };
        let (base, joined) = (students(), enrollments());

        let direct = right_join(&base, &joined, &spec);
        let swapped = right_join_by_swap(&base, &joined, &spec, "enrollment");

        assert_eq!(direct.len(), swapped.len());
        // a bare name belongs to the FROM table, and the swap changes it
        assert_eq!(direct[0].get("name"), Some(&Value::from("John")));
        assert_eq!(swapped[0].get("name"), None);
        // the extra qualified columns follow the base table too
        assert_eq!(direct[0].get("student.age"), Some(&Value::from("30")));
        assert_eq!(swapped[0].get("student.age"), None);
        assert_eq!(swapped[0].get("enrollment.student_id"), Some(&Value::from("1")));
    }

    #[test]
    fn test_missing_column_is_left_out_but_padding_is_null() {
        let condition = condition();
        let fields = vec!["student.grade".to_string(), "enrollment.course".to_string()];
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };

        let inner = inner_join(&students(), &enrollments(), &spec);
        assert_eq!(inner[0].get("student.grade"), None);
        assert_eq!(inner[0].get("enrollment.course"), Some(&Value::from("Mathematics")));

        let left = left_join(&students(), &enrollments(), &spec);
        let bob = &left[3];
        assert_eq!(bob.get("student.grade"), None);
        assert_eq!(bob.get("enrollment.course"), Some(&Value::Null));
    }

    #[test]
    fn test_unqualified_fields_default_to_base_table() {
        let condition = condition();
        let fields = vec!["name".to_string(), "enrollment.course".to_string()];
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };

        let rows = inner_join(&students(), &enrollments(), &spec);

        assert_eq!(rows[0].get("name"), Some(&Value::from("John")));
    }

    #[test]
    fn test_null_keys_never_match() {
        let condition = condition();
        let fields = fields();
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: "student",
        };
        let base = vec![Row::from_pairs([("id", Value::Null), ("name", Value::from("Ghost"))])];
        let joined = vec![Row::from_pairs([
            ("student_id", Value::Null),
            ("course", Value::from("Void")),
        ])];

        assert!(inner_join(&base, &joined, &spec).is_empty());
    }
}
