// Query Executor
// This module runs a parsed query against a table source:
// fetch -> join -> filter -> aggregate or project

use super::aggregate::{aggregate_all, aggregate_groups};
use super::join::{inner_join, left_join, right_join, JoinSpec};
use super::observer::{ExecutionEvent, ExecutionObserver, TracingObserver};
use super::parser::{Field, FieldKind, JoinClause, JoinKind, QueryDescriptor, QueryParser};
use super::predicate::filter_rows;
use crate::error::{QueryError, QueryResult};
use crate::storage::{ColumnKey, Row, TableSource, Value};
use std::sync::Arc;

/// Executes SELECT statements against a TableSource
///
/// The executor holds no state between queries: every call fetches its
/// tables afresh and owns the intermediate rows until it returns.
pub struct QueryExecutor<S> {
    source: S,
    observer: Arc<dyn ExecutionObserver>,
}

impl<S: TableSource> QueryExecutor<S> {
    /// Create an executor that reports to `tracing`
    pub fn new(source: S) -> Self {
        Self {
            source,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the observer that receives execution events
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Parse and execute a query
    pub async fn execute(&self, sql: &str) -> QueryResult<Vec<Row>> {
        let query = QueryParser::parse(sql)?;
        self.execute_query(&query).await
    }

    /// Execute an already parsed query
    pub async fn execute_query(&self, query: &QueryDescriptor) -> QueryResult<Vec<Row>> {
        self.emit(ExecutionEvent::QueryParsed {
            table: query.table.clone(),
            join_table: query.join.as_ref().map(|j| j.table.clone()),
            predicates: query.where_clauses.len(),
        });

        let rows = match &query.join {
            None => self.fetch(&query.table).await?,
            Some(join) => {
                // The two fetches don't depend on each other
                let (base, joined) =
                    futures::try_join!(self.fetch(&query.table), self.fetch(&join.table))?;
                self.join(query, join, &base, &joined)?
            }
        };

        let rows = if query.where_clauses.is_empty() {
            rows
        } else {
            let filtered = filter_rows(&rows, &query.where_clauses)?;
            self.emit(ExecutionEvent::RowsFiltered {
                before: rows.len(),
                after: filtered.len(),
            });
            filtered
        };

        let result = if query.has_aggregate_without_group_by {
            let result = vec![aggregate_all(&rows, &query.fields)];
            self.emit(ExecutionEvent::RowsAggregated {
                grouped: false,
                groups: 1,
            });
            result
        } else if let Some(group_by) = &query.group_by {
            let result = aggregate_groups(&rows, group_by, &query.fields);
            self.emit(ExecutionEvent::RowsAggregated {
                grouped: true,
                groups: result.len(),
            });
            result
        } else {
            project(&rows, &query.fields)
        };

        self.emit(ExecutionEvent::QueryCompleted { rows: result.len() });
        Ok(result)
    }

    async fn fetch(&self, table: &str) -> QueryResult<Vec<Row>> {
        let rows = self.source.fetch(table).await?;
        self.emit(ExecutionEvent::TableFetched {
            table: table.to_string(),
            rows: rows.len(),
        });
        Ok(rows)
    }

    fn join(
        &self,
        query: &QueryDescriptor,
        join: &JoinClause,
        base: &[Row],
        joined: &[Row],
    ) -> QueryResult<Vec<Row>> {
        let condition = join.condition.oriented(&query.table, &join.table);
        let fields = join_fields(query, join, base, joined);
        let spec = JoinSpec {
            condition: &condition,
            fields: &fields,
            base_table: &query.table,
        };

        let rows = match &join.kind {
            JoinKind::Inner => inner_join(base, joined, &spec),
            JoinKind::Left => left_join(base, joined, &spec),
            JoinKind::Right => right_join(base, joined, &spec),
            JoinKind::Unsupported(kind) => {
                return Err(QueryError::Unsupported(format!("JOIN type: {}", kind)))
            }
        };

        self.emit(ExecutionEvent::JoinCompleted {
            kind: join.kind.clone(),
            rows: rows.len(),
        });
        Ok(rows)
    }

    fn emit(&self, event: ExecutionEvent) {
        self.observer.on_event(&event);
    }
}

/// The columns a join must carry forward: everything the query reads,
/// plus every column of both tables when `*` is selected
fn join_fields(
    query: &QueryDescriptor,
    join: &JoinClause,
    base: &[Row],
    joined: &[Row],
) -> Vec<String> {
    let mut fields = query.referenced_columns();

    if query.has_wildcard() {
        let all = qualified_columns(&query.table, base)
            .into_iter()
            .chain(qualified_columns(&join.table, joined));
        for column in all {
            if !fields.contains(&column) {
                fields.push(column);
            }
        }
    }

    fields
}

fn qualified_columns(table: &str, rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|row| {
            row.keys()
                .map(|key| ColumnKey::qualified(table, key.name.clone()).to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Keep only the selected fields, keyed as they were written
/// `*` copies every column of the row
pub fn project(rows: &[Row], fields: &[Field]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut out = Row::new();
            for field in fields {
                match &field.kind {
                    FieldKind::Wildcard => {
                        for (key, value) in row.iter() {
                            out.set(key.clone(), value.clone());
                        }
                    }
                    FieldKind::Plain(column) => {
                        let value = row.get(column).cloned().unwrap_or(Value::Null);
                        out.insert(&field.text, value);
                    }
                    // aggregates never get here: they switch to an aggregation mode
                    _ => {}
                }
            }
            out
        })
        .collect()
}

/// Rows plus the column order used to display them
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<ColumnKey>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Columns are collected from all rows in first-seen order
    pub fn new(rows: Vec<Row>) -> Self {
        let mut columns: Vec<ColumnKey> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Render the rows as JSON objects
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.rows)
    }

    /// Format the result as a string for display
    /// This creates a nice table format
    pub fn format(&self) -> String {
        if self.rows.is_empty() {
            return "No rows found".to_string();
        }

        let names: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|key| row.get_key(key).map(|v| v.to_string()).unwrap_or_default())
                    .collect()
            })
            .collect();

        // Calculate column widths
        let mut widths: Vec<usize> = names.iter().map(|n| n.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let border = |left: &str, middle: &str, right: &str| {
            let inner: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("{}{}{}\n", left, inner.join(middle), right)
        };
        let line = |values: &[String]| {
            let mut out = String::from("│");
            for (value, width) in values.iter().zip(&widths) {
                out.push_str(&format!(" {:<width$} │", value, width = width));
            }
            out.push('\n');
            out
        };

        let mut result = String::new();
        result.push_str(&border("┌", "┬", "┐"));
        result.push_str(&line(&names));
        result.push_str(&border("├", "┼", "┤"));
        for row in &cells {
            result.push_str(&line(row));
        }
        result.push_str(&border("└", "┴", "┘"));
        result.push_str(&format!("\n{} row(s) returned", self.rows.len()));

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::storage::MemoryTableSource;
    use std::sync::Mutex;

    fn source() -> MemoryTableSource {
        MemoryTableSource::new()
            .with_table(
                "student",
                vec![
                    Row::from_pairs([("id", "1"), ("name", "John"), ("age", "30")]),
                    Row::from_pairs([("id", "2"), ("name", "Jane"), ("age", "25")]),
                    Row::from_pairs([("id", "3"), ("name", "Bob"), ("age", "22")]),
                    Row::from_pairs([("id", "4"), ("name", "Alice"), ("age", "24")]),
                ],
            )
            .with_table(
                "enrollment",
                vec![
                    Row::from_pairs([("student_id", "1"), ("course", "Mathematics")]),
                    Row::from_pairs([("student_id", "1"), ("course", "Physics")]),
                    Row::from_pairs([("student_id", "2"), ("course", "Chemistry")]),
                    Row::from_pairs([("student_id", "3"), ("course", "Mathematics")]),
                    Row::from_pairs([("student_id", "5"), ("course", "Biology")]),
                ],
            )
    }

    fn executor() -> QueryExecutor<MemoryTableSource> {
        QueryExecutor::new(source())
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<ExecutionEvent>>,
    }

    impl ExecutionObserver for RecordingObserver {
        fn on_event(&self, event: &ExecutionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_plain_select_is_projection_in_source_order() {
        let rows = executor().execute("SELECT name, id FROM student").await.unwrap();

        let expected: Vec<Row> = source()
            .fetch("student")
            .await
            .unwrap()
            .iter()
            .map(|r| {
                Row::from_pairs([
                    ("name", r.get("name").unwrap().clone()),
                    ("id", r.get("id").unwrap().clone()),
                ])
            })
            .collect();
        assert_eq!(rows, expected);
    }

    #[tokio::test]
    async fn test_where_filters_rows() {
        let rows = executor()
            .execute("SELECT id, name FROM student WHERE age > 23 AND name != 'John'")
            .await
            .unwrap();

        let names: Vec<String> = rows.iter().map(|r| r.get("name").unwrap().to_string()).collect();
        assert_eq!(names, vec!["Jane", "Alice"]);
    }

    #[tokio::test]
    async fn test_where_on_missing_column_is_field_error() {
        let err = executor()
            .execute("SELECT id FROM student WHERE grade = 'A'")
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Field(ref f) if f == "grade"));
    }

    #[tokio::test]
    async fn test_join_where_on_missing_column_is_field_error() {
        let err = executor()
            .execute(
                "SELECT student.name FROM student \
                 INNER JOIN enrollment ON student.id = enrollment.student_id \
                 WHERE student.grade = 'A'",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Field(ref f) if f == "student.grade"));

        let err = executor()
            .execute(
                "SELECT student.name FROM student \
                 LEFT JOIN enrollment ON student.id = enrollment.student_id \
                 WHERE enrollment.grade = 'A'",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Field(ref f) if f == "enrollment.grade"));
    }

    #[tokio::test]
    async fn test_unknown_table_is_source_error() {
        let err = executor().execute("SELECT id FROM professor").await.unwrap_err();

        assert!(matches!(
            err,
            QueryError::Source(SourceError::NotFound(ref t)) if t == "professor"
        ));
    }

    #[tokio::test]
    async fn test_missing_join_table_aborts() {
        let err = executor()
            .execute(
                "SELECT student.name FROM student \
                 INNER JOIN course ON student.id = course.sid",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Source(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_full_join_is_unsupported() {
        let err = executor()
            .execute(
                "SELECT student.name FROM student FULL JOIN enrollment \
                 ON student.id = enrollment.student_id",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Unsupported(ref m) if m.contains("FULL")));
    }

    #[tokio::test]
    async fn test_inner_join_projects_selected_fields() {
        let rows = executor()
            .execute(
                "SELECT student.name, enrollment.course FROM student \
                 INNER JOIN enrollment ON student.id = enrollment.student_id",
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0],
            Row::from_pairs([("student.name", "John"), ("enrollment.course", "Mathematics")])
        );
    }

    #[tokio::test]
    async fn test_join_condition_written_backwards() {
        let rows = executor()
            .execute(
                "SELECT student.name, enrollment.course FROM student \
                 INNER JOIN enrollment ON enrollment.student_id = student.id",
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn test_inner_join_with_where_on_unselected_column() {
        let rows = executor()
            .execute(
                "SELECT student.name, enrollment.course FROM student \
                 INNER JOIN enrollment ON student.id = enrollment.student_id \
                 WHERE student.age < 30",
            )
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                Row::from_pairs([("student.name", "Jane"), ("enrollment.course", "Chemistry")]),
                Row::from_pairs([("student.name", "Bob"), ("enrollment.course", "Mathematics")]),
            ]
        );
    }

    #[tokio::test]
    async fn test_left_join_keeps_every_student() {
        let rows = executor()
            .execute(
                "SELECT student.name, enrollment.course FROM student \
                 LEFT JOIN enrollment ON student.id = enrollment.student_id",
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(
            rows[4],
            Row::from_pairs([
                ("student.name", Value::from("Alice")),
                ("enrollment.course", Value::Null),
            ])
        );
    }

    #[tokio::test]
    async fn test_right_join_keeps_every_enrollment() {
        let rows = executor()
            .execute(
                "SELECT student.name, enrollment.course FROM student \
                 RIGHT JOIN enrollment ON student.id = enrollment.student_id",
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(
            rows[4],
            Row::from_pairs([
                ("student.name", Value::Null),
                ("enrollment.course", Value::from("Biology")),
            ])
        );
    }

    #[tokio::test]
    async fn test_left_join_where_on_join_side_null() {
        let rows = executor()
            .execute(
                "SELECT student.name FROM student \
                 LEFT JOIN enrollment ON student.id = enrollment.student_id \
                 WHERE enrollment.course != 'Mathematics'",
            )
            .await
            .unwrap();

        // Alice has no enrollment: NULL != 'Mathematics' holds
        let names: Vec<String> = rows
            .iter()
            .map(|r| r.get("student.name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["John", "Jane", "Alice"]);
    }

    #[tokio::test]
    async fn test_count_star_without_group_by() {
        let rows = executor().execute("SELECT COUNT(*) FROM student").await.unwrap();

        assert_eq!(rows, vec![Row::from_pairs([("COUNT(*)", 4.0)])]);
    }

    #[tokio::test]
    async fn test_global_aggregates_after_filter() {
        let rows = executor()
            .execute("SELECT AVG(age), MAX(age), name FROM student WHERE age < 30")
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![Row::from_pairs([("AVG(age)", 71.0 / 3.0), ("MAX(age)", 25.0)])]
        );
    }

    #[tokio::test]
    async fn test_avg_over_no_rows_is_null() {
        let rows = executor()
            .execute("SELECT AVG(age) FROM student WHERE age > 100")
            .await
            .unwrap();

        assert_eq!(rows[0].get("AVG(age)"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_group_by_sum() {
        let source = MemoryTableSource::new().with_table(
            "t",
            vec![
                Row::from_pairs([("g", Value::from("a")), ("v", Value::Number(10.0))]),
                Row::from_pairs([("g", Value::from("a")), ("v", Value::Number(5.0))]),
                Row::from_pairs([("g", Value::from("b")), ("v", Value::Number(3.0))]),
            ],
        );

        let rows = QueryExecutor::new(source)
            .execute("SELECT g, SUM(v) FROM t GROUP BY g")
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                Row::from_pairs([("g", Value::from("a")), ("SUM(v)", Value::Number(15.0))]),
                Row::from_pairs([("g", Value::from("b")), ("SUM(v)", Value::Number(3.0))]),
            ]
        );
    }

    #[tokio::test]
    async fn test_group_by_over_join() {
        let rows = executor()
            .execute(
                "SELECT enrollment.course, COUNT(*) FROM student \
                 INNER JOIN enrollment ON student.id = enrollment.student_id \
                 GROUP BY enrollment.course",
            )
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                Row::from_pairs([
                    ("enrollment.course", Value::from("Mathematics")),
                    ("COUNT(*)", Value::Number(2.0)),
                ]),
                Row::from_pairs([
                    ("enrollment.course", Value::from("Physics")),
                    ("COUNT(*)", Value::Number(1.0)),
                ]),
                Row::from_pairs([
                    ("enrollment.course", Value::from("Chemistry")),
                    ("COUNT(*)", Value::Number(1.0)),
                ]),
            ]
        );
    }

    #[tokio::test]
    async fn test_wildcard_select() {
        let rows = executor().execute("SELECT * FROM student WHERE id = 2").await.unwrap();

        assert_eq!(
            rows,
            vec![Row::from_pairs([("id", "2"), ("name", "Jane"), ("age", "25")])]
        );
    }

    #[tokio::test]
    async fn test_wildcard_over_join_carries_both_tables() {
        let rows = executor()
            .execute(
                "SELECT * FROM student INNER JOIN enrollment \
                 ON student.id = enrollment.student_id WHERE student.id = 2",
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("student.name"), Some(&Value::from("Jane")));
        assert_eq!(rows[0].get("enrollment.course"), Some(&Value::from("Chemistry")));
    }

    #[tokio::test]
    async fn test_refiltering_is_a_no_op() {
        let sql = "SELECT id, age FROM student WHERE age >= 24";
        let once = executor().execute(sql).await.unwrap();

        let source = MemoryTableSource::new().with_table("student", once.clone());
        let twice = QueryExecutor::new(source).execute(sql).await.unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_observer_sees_every_stage() {
        let observer = Arc::new(RecordingObserver::default());
        let executor = QueryExecutor::new(source()).with_observer(observer.clone());

        executor
            .execute(
                "SELECT enrollment.course, COUNT(*) FROM student \
                 LEFT JOIN enrollment ON student.id = enrollment.student_id \
                 WHERE student.age > 22 GROUP BY enrollment.course",
            )
            .await
            .unwrap();

        let events = observer.events.lock().unwrap();
        assert_eq!(
            events.first(),
            Some(&ExecutionEvent::QueryParsed {
                table: "student".to_string(),
                join_table: Some("enrollment".to_string()),
                predicates: 1,
            })
        );
        assert!(events.contains(&ExecutionEvent::TableFetched {
            table: "enrollment".to_string(),
            rows: 5,
        }));
        assert!(events.contains(&ExecutionEvent::JoinCompleted {
            kind: JoinKind::Left,
            rows: 5,
        }));
        assert!(events.contains(&ExecutionEvent::RowsFiltered { before: 5, after: 4 }));
        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::QueryCompleted { rows: 4 })
        );
    }

    #[test]
    fn test_result_set_format() {
        let result = ResultSet::new(vec![
            Row::from_pairs([("id", Value::Number(1.0)), ("name", Value::from("John"))]),
            Row::from_pairs([("id", Value::Number(2.0)), ("name", Value::Null)]),
        ]);

        let expected = "\
┌────┬──────┐
│ id │ name │
├────┼──────┤
│ 1  │ John │
│ 2  │ NULL │
└────┴──────┘

2 row(s) returned";
        assert_eq!(result.format(), expected);
    }

    #[test]
    fn test_empty_result_set() {
        assert_eq!(ResultSet::new(Vec::new()).format(), "No rows found");
    }
}
