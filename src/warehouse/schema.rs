//! Explicit table schemas and validation of exported artifacts against
//! them.

use std::collections::HashSet;

use serde_json::Value as Json;

use crate::encode::read_csv;
use crate::engine::{DataType, Field, Record, Row, Schema, Value};
use crate::error::SchemaError;
use crate::model::{Named, Problem, Solution, TestCase};

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table: &'static str,
    pub schema: Schema,
    /// Columns whose combined value must be unique.
    pub key: Vec<&'static str>,
    /// Numeric columns that must not be negative when present.
    pub non_negative: Vec<&'static str>,
}

impl TableSchema {
    fn of<T: Record>(table: &'static str, key: Vec<&'static str>, non_negative: Vec<&'static str>) -> Self {
        Self {
            table,
            schema: T::schema(),
            key,
            non_negative,
        }
    }

    pub fn problems() -> Self {
        Self::of::<Problem>("problems", vec!["id"], vec!["time_limit", "memory_limit_bytes"])
    }

    pub fn solutions() -> Self {
        Self::of::<Solution>("solutions", vec!["problem_id", "ordinal"], vec![])
    }

    /// Schema of the `languages`, `sources` or `tags` view.
    pub fn named(table: &'static str) -> Self {
        Self::of::<Named>(table, vec!["id"], vec![])
    }

    pub fn problem_tests() -> Self {
        Self::of::<TestCase>("problem_tests", vec!["problem_id", "kind", "idx"], vec![])
    }

    fn type_mismatch(&self, field: &Field, line: usize, found: impl Into<String>) -> SchemaError {
        SchemaError::TypeMismatch {
            table: self.table.to_string(),
            column: field.name.clone(),
            line,
            expected: field.data_type.to_string(),
            found: found.into(),
        }
    }

    fn from_json(&self, field: &Field, line: usize, value: Option<&Json>) -> Result<Value, SchemaError> {
        let v = match value {
            None | Some(Json::Null) if field.nullable => return Ok(Value::Null),
            None => return Err(self.type_mismatch(field, line, "missing")),
            Some(v) => v,
        };
        let converted = match (&field.data_type, v) {
            (DataType::Utf8, Json::String(s)) => Some(Value::Str(s.clone())),
            (DataType::Int64, Json::Number(n)) => n.as_i64().map(Value::Int),
            (DataType::Float64, Json::Number(n)) => n.as_f64().map(Value::Float),
            (DataType::Boolean, Json::Bool(b)) => Some(Value::Bool(*b)),
            (DataType::List(item), Json::Array(items)) if **item == DataType::Int64 => items
                .iter()
                .map(|i| i.as_i64().map(Value::Int))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            _ => None,
        };
        converted.ok_or_else(|| self.type_mismatch(field, line, json_type(v)))
    }

    fn from_cell(&self, field: &Field, line: usize, cell: Option<&str>) -> Result<Value, SchemaError> {
        let text = match cell {
            None if field.nullable => return Ok(Value::Null),
            // an empty cell is an empty string for text columns
            None if field.data_type == DataType::Utf8 => return Ok(Value::Str(String::new())),
            None => return Err(self.type_mismatch(field, line, "empty cell")),
            Some(t) => t,
        };
        let parsed = match &field.data_type {
            DataType::Utf8 => Some(Value::Str(text.to_string())),
            DataType::Int64 => text.trim().parse::<i64>().ok().map(Value::Int),
            DataType::Float64 => text.trim().parse::<f64>().ok().map(Value::Float),
            DataType::Boolean => text.trim().parse::<bool>().ok().map(Value::Bool),
            _ => None,
        };
        parsed.ok_or_else(|| self.type_mismatch(field, line, format!("`{text}`")))
    }

    fn check_row(&self, line: usize, row: &Row) -> Result<(), SchemaError> {
        for column in &self.non_negative {
            let i = self.index(column)?;
            if row[i].as_f64().map_or(false, |x| x < 0.0) {
                return Err(SchemaError::Negative {
                    table: self.table.to_string(),
                    column: column.to_string(),
                    line,
                    value: row[i].to_string(),
                });
            }
        }
        Ok(())
    }

    fn index(&self, column: &str) -> Result<usize, SchemaError> {
        self.schema
            .index_of_name(column)
            .map_err(|_| SchemaError::MissingColumn {
                table: self.table.to_string(),
                column: column.to_string(),
            })
    }

    fn check_keys(&self, rows: &[Row]) -> Result<(), SchemaError> {
        let key_cols = self
            .key
            .iter()
            .map(|c| self.index(c))
            .collect::<Result<Vec<_>, _>>()?;
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            let key: Vec<u8> = key_cols.iter().flat_map(|&i| row[i].key_bytes()).collect();
            if !seen.insert(key) {
                let shown: Vec<String> = key_cols.iter().map(|&i| row[i].to_string()).collect();
                return Err(SchemaError::DuplicateKey {
                    table: self.table.to_string(),
                    key: shown.join(", "),
                });
            }
        }
        Ok(())
    }

    /// Validates one JSON object per line. Blank lines are skipped; line
    /// numbers count from 1.
    pub fn parse_jsonl(&self, text: &str) -> Result<Vec<Row>, SchemaError> {
        let mut rows = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = i + 1;
            if raw.trim().is_empty() {
                continue;
            }
            let record: Json = serde_json::from_str(raw).map_err(|e| SchemaError::Malformed {
                table: self.table.to_string(),
                line,
                message: e.to_string(),
            })?;
            let object = record.as_object().ok_or_else(|| SchemaError::Malformed {
                table: self.table.to_string(),
                line,
                message: format!("expected an object, found {}", json_type(&record)),
            })?;
            let row = self
                .schema
                .fields
                .iter()
                .map(|f| self.from_json(f, line, object.get(&f.name)))
                .collect::<Result<Row, _>>()?;
            self.check_row(line, &row)?;
            rows.push(row);
        }
        self.check_keys(&rows)?;
        Ok(rows)
    }

    /// Validates a CSV file with a header row. Columns are matched by
    /// header name; record `n` is reported as line `n + 1`.
    pub fn parse_csv(&self, text: &str) -> Result<Vec<Row>, SchemaError> {
        let table = read_csv(text).map_err(|e| SchemaError::Malformed {
            table: self.table.to_string(),
            line: 0,
            message: e.to_string(),
        })?;
        let positions = self
            .schema
            .fields
            .iter()
            .map(|f| {
                table
                    .header
                    .iter()
                    .position(|h| h.trim() == f.name)
                    .ok_or_else(|| SchemaError::MissingColumn {
                        table: self.table.to_string(),
                        column: f.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = Vec::with_capacity(table.records.len());
        for (i, record) in table.records.iter().enumerate() {
            let line = i + 2;
            let row = self
                .schema
                .fields
                .iter()
                .zip(&positions)
                .map(|(f, &p)| self.from_cell(f, line, record.get(p).and_then(|c| c.as_deref())))
                .collect::<Result<Row, _>>()?;
            self.check_row(line, &row)?;
            rows.push(row);
        }
        self.check_keys(&rows)?;
        Ok(rows)
    }
}

fn json_type(v: &Json) -> String {
    match v {
        Json::Null => "null".into(),
        Json::Bool(_) => "boolean".into(),
        Json::Number(n) if n.is_i64() || n.is_u64() => "integer".into(),
        Json::Number(_) => "float".into(),
        Json::String(_) => "string".into(),
        Json::Array(_) => "array".into(),
        Json::Object(_) => "object".into(),
    }
}
