//! Reference tables as CSV with a header row.
//!
//! Reading keeps every cell as text so validation can report the record
//! and column of a bad value.

use std::io::{Cursor, Write};
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Schema as ArrowSchema};
use arrow::error::ArrowError;

use crate::engine::{Row, Schema};

use super::rows_to_batch;

/// Writes `rows` with a header line. Cells are quoted when needed, so
/// multi-line test inputs survive.
pub fn write_csv<W: Write>(writer: W, schema: &Schema, rows: &[Row]) -> Result<(), ArrowError> {
    let batch = rows_to_batch(schema, rows)?;
    let mut w = WriterBuilder::new().with_header(true).build(writer);
    w.write(&batch)
}

/// Untyped CSV contents. An empty cell reads as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub records: Vec<Vec<Option<String>>>,
}

pub fn read_csv(text: &str) -> Result<CsvTable, ArrowError> {
    let (inferred, _) = Format::default()
        .with_header(true)
        .infer_schema(Cursor::new(text.as_bytes()), Some(0))?;
    let header: Vec<String> = inferred.fields().iter().map(|f| f.name().clone()).collect();
    if header.is_empty() {
        return Ok(CsvTable {
            header,
            records: Vec::new(),
        });
    }
    let schema = ArrowSchema::new(
        header
            .iter()
            .map(|h| ArrowField::new(h, ArrowType::Utf8, true))
            .collect::<Vec<_>>(),
    );
    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_header(true)
        .build(Cursor::new(text.as_bytes()))?;
    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let columns = batch
            .columns()
            .iter()
            .map(|c| {
                c.as_string_opt::<i32>()
                    .ok_or_else(|| ArrowError::CsvError("expected a text column".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for i in 0..batch.num_rows() {
            records.push(
                columns
                    .iter()
                    .map(|c| (!c.is_null(i)).then(|| c.value(i).to_string()))
                    .collect(),
            );
        }
    }
    Ok(CsvTable { header, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Record;
    use crate::model::TestCase;

    #[test]
    fn multi_line_cells_are_quoted() {
        let case = TestCase {
            problem_id: "1A".into(),
            idx: 0,
            kind: "public".into(),
            input: "6 6 4\n".into(),
            output: "4, \"ok\"\n".into(),
        };
        let mut out = Vec::new();
        write_csv(&mut out, &TestCase::schema(), &[case.to_row()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("problem_id,idx,kind,input,output\n"));

        let table = read_csv(&text).unwrap();
        assert_eq!(table.header, vec!["problem_id", "idx", "kind", "input", "output"]);
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0][3].as_deref(), Some("6 6 4\n"));
        assert_eq!(table.records[0][4].as_deref(), Some("4, \"ok\"\n"));
    }

    #[test]
    fn header_only_file_has_no_records() {
        let table = read_csv("id,name\n").unwrap();
        assert_eq!(table.header, vec!["id", "name"]);
        assert!(table.records.is_empty());
    }
}
