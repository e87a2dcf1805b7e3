//! Parquet files of engine rows, SNAPPY compressed.

use std::fs::{self, File};
use std::path::Path;

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::Result;
use parquet::file::properties::WriterProperties;
use tracing::debug;

use crate::engine::{Row, Schema};

use super::{batch_to_rows, rows_to_batch};

/// Writes `rows` to `path` as a single row group, creating parent
/// directories and replacing any existing file.
pub fn write_parquet(path: &Path, schema: &Schema, rows: &[Row]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let batch = rows_to_batch(schema, rows)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    // footer is only written on close
    writer.close()?;
    debug!(path = %path.display(), rows = rows.len(), "wrote parquet");
    Ok(())
}

/// Reads every row group of `path`. Column names must match `schema`.
pub fn read_parquet(path: &Path, schema: &Schema) -> Result<Vec<Row>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(batch_to_rows(&batch?, schema)?);
    }
    debug!(path = %path.display(), rows = rows.len(), "read parquet");
    Ok(rows)
}
