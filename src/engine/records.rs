//! Functional front end: typed records filtered with closures or with the
//! same [`Expr`] trees the other front ends use.

use crate::error::{ExecError, QueryError};
use crate::model::{Named, Problem, Solution, TestCase, Verdict};

use super::expr::Expr;
use super::frame::Row;
use super::schema::{DataType, Field, Schema};
use super::value::Value;

/// A row type with a fixed table schema.
pub trait Record: Sized + Clone {
    /// Table read by [`Session::records`](super::Session::records).
    const TABLE: &'static str;

    fn schema() -> Schema;

    /// Values in schema order.
    fn to_row(&self) -> Row;

    fn from_row(row: &[Value]) -> Result<Self, QueryError>;
}

fn mismatch(column: &str, expected: &str, found: &Value) -> QueryError {
    QueryError::Type(format!(
        "column `{column}` expected {expected}, found {}",
        found.type_name()
    ))
}

fn cell<'r>(row: &'r [Value], i: usize, column: &str) -> Result<&'r Value, QueryError> {
    row.get(i)
        .ok_or_else(|| QueryError::Type(format!("row has no value for column `{column}`")))
}

fn string(row: &[Value], i: usize, column: &str) -> Result<String, QueryError> {
    let v = cell(row, i, column)?;
    v.as_str().map(str::to_string).ok_or_else(|| mismatch(column, "Utf8", v))
}

fn int(row: &[Value], i: usize, column: &str) -> Result<i64, QueryError> {
    let v = cell(row, i, column)?;
    match v {
        Value::Int(x) => Ok(*x),
        other => Err(mismatch(column, "Int64", other)),
    }
}

fn opt_int(row: &[Value], i: usize, column: &str) -> Result<Option<i64>, QueryError> {
    match cell(row, i, column)? {
        Value::Null => Ok(None),
        _ => int(row, i, column).map(Some),
    }
}

fn opt_float(row: &[Value], i: usize, column: &str) -> Result<Option<f64>, QueryError> {
    match cell(row, i, column)? {
        Value::Null => Ok(None),
        v => v.as_f64().map(Some).ok_or_else(|| mismatch(column, "Float64", v)),
    }
}

fn int_list(row: &[Value], i: usize, column: &str) -> Result<Vec<i64>, QueryError> {
    match cell(row, i, column)? {
        Value::List(items) => items
            .iter()
            .map(|v| match v {
                Value::Int(x) => Ok(*x),
                other => Err(mismatch(column, "List<Int64>", other)),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(mismatch(column, "List<Int64>", other)),
    }
}

impl Record for Problem {
    const TABLE: &'static str = "problems";

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("difficulty", DataType::Int64, true),
            Field::new("time_limit", DataType::Float64, true),
            Field::new("memory_limit_bytes", DataType::Int64, true),
            Field::new("source", DataType::Int64, false),
            Field::new("tags", DataType::List(Box::new(DataType::Int64)), false),
            Field::new("cf_rating", DataType::Int64, true),
        ])
    }

    fn to_row(&self) -> Row {
        vec![
            Value::from(self.id.as_str()),
            Value::from(self.description.as_str()),
            Value::from(self.difficulty),
            Value::from(self.time_limit),
            Value::from(self.memory_limit_bytes),
            Value::Int(self.source),
            Value::from(self.tags.clone()),
            Value::from(self.cf_rating),
        ]
    }

    fn from_row(row: &[Value]) -> Result<Self, QueryError> {
        Ok(Problem {
            id: string(row, 0, "id")?,
            description: string(row, 1, "description")?,
            difficulty: opt_int(row, 2, "difficulty")?,
            time_limit: opt_float(row, 3, "time_limit")?,
            memory_limit_bytes: opt_int(row, 4, "memory_limit_bytes")?,
            source: int(row, 5, "source")?,
            tags: int_list(row, 6, "tags")?,
            cf_rating: opt_int(row, 7, "cf_rating")?,
        })
    }
}

impl Record for Solution {
    const TABLE: &'static str = "solutions";

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("problem_id", DataType::Utf8, false),
            Field::new("ordinal", DataType::Int64, false),
            Field::new("language", DataType::Int64, false),
            Field::new("solution", DataType::Utf8, false),
            Field::new("verdict", DataType::Utf8, false),
        ])
    }

    fn to_row(&self) -> Row {
        vec![
            Value::from(self.problem_id.as_str()),
            Value::Int(self.ordinal),
            Value::Int(self.language),
            Value::from(self.solution.as_str()),
            Value::from(self.verdict.as_str()),
        ]
    }

    fn from_row(row: &[Value]) -> Result<Self, QueryError> {
        let verdict = string(row, 4, "verdict")?;
        Ok(Solution {
            problem_id: string(row, 0, "problem_id")?,
            ordinal: int(row, 1, "ordinal")?,
            language: int(row, 2, "language")?,
            solution: string(row, 3, "solution")?,
            verdict: Verdict::parse(&verdict)
                .ok_or_else(|| QueryError::Type(format!("unknown verdict `{verdict}`")))?,
        })
    }
}

/// Backs the `languages`, `sources` and `tags` views; pick one with
/// [`Session::records_in`](super::Session::records_in).
impl Record for Named {
    const TABLE: &'static str = "languages";

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ])
    }

    fn to_row(&self) -> Row {
        vec![Value::Int(self.id), Value::from(self.name.as_str())]
    }

    fn from_row(row: &[Value]) -> Result<Self, QueryError> {
        Ok(Named {
            id: int(row, 0, "id")?,
            name: string(row, 1, "name")?,
        })
    }
}

impl Record for TestCase {
    const TABLE: &'static str = "problem_tests";

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("problem_id", DataType::Utf8, false),
            Field::new("idx", DataType::Int64, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("input", DataType::Utf8, false),
            Field::new("output", DataType::Utf8, false),
        ])
    }

    fn to_row(&self) -> Row {
        vec![
            Value::from(self.problem_id.as_str()),
            Value::Int(self.idx),
            Value::from(self.kind.as_str()),
            Value::from(self.input.as_str()),
            Value::from(self.output.as_str()),
        ]
    }

    fn from_row(row: &[Value]) -> Result<Self, QueryError> {
        Ok(TestCase {
            problem_id: string(row, 0, "problem_id")?,
            idx: int(row, 1, "idx")?,
            kind: string(row, 2, "kind")?,
            input: string(row, 3, "input")?,
            output: string(row, 4, "output")?,
        })
    }
}

/// An in-memory collection of typed records.
#[derive(Debug, Clone, PartialEq)]
pub struct Records<T> {
    items: Vec<T>,
}

impl<T: Record> Records<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool,
    {
        Self {
            items: self.items.into_iter().filter(|r| predicate(r)).collect(),
        }
    }

    /// Keeps records for which `predicate` evaluates to true, with the
    /// same null semantics as a `WHERE` clause.
    pub fn filter_where(self, predicate: &Expr) -> Result<Self, ExecError> {
        let bound = predicate.bind(&T::schema())?;
        let mut items = Vec::with_capacity(self.items.len());
        for r in self.items {
            if bound.matches(&r.to_row())? {
                items.push(r);
            }
        }
        Ok(Self { items })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> IntoIterator for Records<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::{col, lit};

    fn problem(id: &str, time_limit: Option<f64>, rating: Option<i64>) -> Problem {
        Problem {
            id: id.into(),
            description: String::new(),
            difficulty: Some(7),
            time_limit,
            memory_limit_bytes: Some(256 << 20),
            source: 2,
            tags: vec![1, 3],
            cf_rating: rating,
        }
    }

    #[test]
    fn rows_convert_both_ways() {
        let p = problem("p1", Some(1.5), None);
        assert_eq!(Problem::from_row(&p.to_row()).unwrap(), p);
        assert_eq!(p.to_row().len(), Problem::schema().len());
    }

    #[test]
    fn wrong_cell_type_is_a_type_error() {
        let mut row = problem("p1", None, None).to_row();
        row[5] = Value::from("two");
        assert!(matches!(Problem::from_row(&row), Err(QueryError::Type(_))));
    }

    #[test]
    fn closure_and_expression_filters_agree() {
        let records = Records::new(vec![
            problem("a", Some(1.0), Some(1200)),
            problem("b", Some(3.0), None),
            problem("c", None, Some(800)),
        ]);
        let by_closure: Vec<_> = records
            .clone()
            .filter(|p| p.time_limit.map_or(false, |t| t < 2.0))
            .into_iter()
            .map(|p| p.id)
            .collect();
        let by_expr: Vec<_> = records
            .filter_where(&col("time_limit").lt(lit(2.0)))
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(by_closure, vec!["a".to_string()]);
        assert_eq!(by_expr, by_closure);
    }

    #[test]
    fn unknown_column_in_expression_is_rejected() {
        let records = Records::new(vec![problem("a", None, None)]);
        assert!(matches!(
            records.filter_where(&col("rating").gt(lit(1))),
            Err(ExecError::Query(QueryError::UnknownColumn { .. }))
        ));
    }
}
