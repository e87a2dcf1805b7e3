//! Conversions between engine rows and Arrow record batches, and the
//! parquet and CSV files built from them.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, ListBuilder, StringBuilder,
};
use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Float64Type, Int64Type, Schema as ArrowSchema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

use crate::engine::{DataType, Row, Schema, Value};

pub mod csv;
pub mod parquet_io;

pub use self::csv::{read_csv, write_csv, CsvTable};
pub use parquet_io::{read_parquet, write_parquet};

fn arrow_type(data_type: &DataType) -> ArrowType {
    match data_type {
        DataType::Boolean => ArrowType::Boolean,
        DataType::Int64 => ArrowType::Int64,
        DataType::Float64 => ArrowType::Float64,
        DataType::Utf8 | DataType::Any => ArrowType::Utf8,
        DataType::List(item) => ArrowType::List(Arc::new(ArrowField::new("item", arrow_type(item), true))),
    }
}

pub fn arrow_schema(schema: &Schema) -> ArrowSchema {
    let fields: Vec<ArrowField> = (0..schema.len())
        .map(|i| {
            let f = schema.field(i);
            ArrowField::new(&f.name, arrow_type(&f.data_type), f.nullable)
        })
        .collect();
    ArrowSchema::new(fields)
}

fn mismatch(column: &str, expected: &str, value: &Value) -> ArrowError {
    ArrowError::InvalidArgumentError(format!(
        "column `{column}` expected {expected}, found {}",
        value.type_name()
    ))
}

fn build_column(schema: &Schema, i: usize, rows: &[Row]) -> Result<ArrayRef, ArrowError> {
    let field = schema.field(i);
    let name = field.name.as_str();
    Ok(match &field.data_type {
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                match &row[i] {
                    Value::Null => b.append_null(),
                    v => b.append_value(v.as_bool().ok_or_else(|| mismatch(name, "Boolean", v))?),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(rows.len());
            for row in rows {
                match &row[i] {
                    Value::Null => b.append_null(),
                    Value::Int(x) => b.append_value(*x),
                    v => return Err(mismatch(name, "Int64", v)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(rows.len());
            for row in rows {
                match &row[i] {
                    Value::Null => b.append_null(),
                    v => b.append_value(v.as_f64().ok_or_else(|| mismatch(name, "Float64", v))?),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Utf8 | DataType::Any => {
            let mut b = StringBuilder::new();
            for row in rows {
                match &row[i] {
                    Value::Null => b.append_null(),
                    Value::Str(s) => b.append_value(s),
                    v => b.append_value(v.to_string()),
                }
            }
            Arc::new(b.finish())
        }
        DataType::List(item) if **item == DataType::Int64 => {
            let mut b = ListBuilder::new(Int64Builder::new());
            for row in rows {
                match &row[i] {
                    Value::Null => b.append(false),
                    Value::List(items) => {
                        for v in items {
                            match v {
                                Value::Int(x) => b.values().append_value(*x),
                                Value::Null => b.values().append_null(),
                                other => return Err(mismatch(name, "List<Int64>", other)),
                            }
                        }
                        b.append(true);
                    }
                    v => return Err(mismatch(name, "List<Int64>", v)),
                }
            }
            Arc::new(b.finish())
        }
        other => {
            return Err(ArrowError::NotYetImplemented(format!(
                "column `{name}` of type {other}"
            )))
        }
    })
}

/// Packs rows into one record batch laid out by `schema`.
pub fn rows_to_batch(schema: &Schema, rows: &[Row]) -> Result<RecordBatch, ArrowError> {
    let columns = (0..schema.len())
        .map(|i| build_column(schema, i, rows))
        .collect::<Result<Vec<_>, _>>()?;
    RecordBatch::try_new(Arc::new(arrow_schema(schema)), columns)
}

fn column_values(array: &dyn Array, data_type: &DataType, name: &str) -> Result<Vec<Value>, ArrowError> {
    let wrong = || {
        ArrowError::SchemaError(format!(
            "column `{name}` is stored as {}, expected {data_type}",
            array.data_type()
        ))
    };
    let len = array.len();
    let mut out = Vec::with_capacity(len);
    match data_type {
        DataType::Boolean => {
            let a = array.as_boolean_opt().ok_or_else(wrong)?;
            for i in 0..len {
                out.push(if a.is_null(i) { Value::Null } else { Value::Bool(a.value(i)) });
            }
        }
        DataType::Int64 => {
            let a = array.as_primitive_opt::<Int64Type>().ok_or_else(wrong)?;
            for i in 0..len {
                out.push(if a.is_null(i) { Value::Null } else { Value::Int(a.value(i)) });
            }
        }
        DataType::Float64 => {
            let a = array.as_primitive_opt::<Float64Type>().ok_or_else(wrong)?;
            for i in 0..len {
                out.push(if a.is_null(i) { Value::Null } else { Value::Float(a.value(i)) });
            }
        }
        DataType::Utf8 | DataType::Any => {
            let a = array.as_string_opt::<i32>().ok_or_else(wrong)?;
            for i in 0..len {
                out.push(if a.is_null(i) {
                    Value::Null
                } else {
                    Value::Str(a.value(i).to_string())
                });
            }
        }
        DataType::List(item) => {
            let a = array.as_list_opt::<i32>().ok_or_else(wrong)?;
            for i in 0..len {
                if a.is_null(i) {
                    out.push(Value::Null);
                } else {
                    let items = column_values(a.value(i).as_ref(), item, name)?;
                    out.push(Value::List(items));
                }
            }
        }
    }
    Ok(out)
}

/// Unpacks a record batch whose columns are named and ordered as in
/// `schema`.
pub fn batch_to_rows(batch: &RecordBatch, schema: &Schema) -> Result<Vec<Row>, ArrowError> {
    let found: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
    if found != schema.names() {
        return Err(ArrowError::SchemaError(format!(
            "columns [{}] do not match [{}]",
            found.join(", "),
            schema.names().join(", ")
        )));
    }
    let mut rows: Vec<Row> = (0..batch.num_rows()).map(|_| Vec::with_capacity(schema.len())).collect();
    for i in 0..schema.len() {
        let field = schema.field(i);
        let values = column_values(batch.column(i).as_ref(), &field.data_type, &field.name)?;
        for (row, v) in rows.iter_mut().zip(values) {
            row.push(v);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Record;
    use crate::model::Problem;

    #[test]
    fn problem_rows_survive_a_record_batch() {
        let p = Problem {
            id: "1A".into(),
            description: "Theatre square".into(),
            difficulty: None,
            time_limit: Some(1.0),
            memory_limit_bytes: Some(1 << 28),
            source: 2,
            tags: vec![0, 4],
            cf_rating: Some(1000),
        };
        let rows = vec![p.to_row()];
        let batch = rows_to_batch(&Problem::schema(), &rows).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch_to_rows(&batch, &Problem::schema()).unwrap(), rows);
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let mut row = Problem {
            id: "x".into(),
            description: String::new(),
            difficulty: None,
            time_limit: None,
            memory_limit_bytes: None,
            source: 0,
            tags: vec![],
            cf_rating: None,
        }
        .to_row();
        row[2] = Value::from("hard");
        assert!(rows_to_batch(&Problem::schema(), &[row]).is_err());
    }
}
