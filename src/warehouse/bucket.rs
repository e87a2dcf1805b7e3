//! Physical layout of bucketed tables.
//!
//! Bucket `i` of a table holds exactly the rows whose bucket column
//! satisfies `ihash(value) % num_buckets == i` and is stored as
//! `<table>/bucket-0000i.parquet`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::glob;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WarehouseConfig;
use crate::encode::{read_parquet, write_parquet};
use crate::engine::frame::bucket_of;
use crate::engine::{Frame, Partitioning, Row, Schema};
use crate::error::SchemaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub column: String,
    pub num_buckets: usize,
}

impl Default for BucketSpec {
    fn default() -> Self {
        Self {
            column: "language".into(),
            num_buckets: 4,
        }
    }
}

impl From<&WarehouseConfig> for BucketSpec {
    fn from(config: &WarehouseConfig) -> Self {
        Self {
            column: config.bucket_column.clone(),
            num_buckets: config.num_buckets,
        }
    }
}

pub fn bucket_file(dir: &Path, table: &str, bucket: usize) -> PathBuf {
    dir.join(table).join(format!("bucket-{bucket:05}.parquet"))
}

pub fn part_file(dir: &Path, table: &str) -> PathBuf {
    dir.join(table).join("part-00000.parquet")
}

fn layout_err(table: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Layout {
        table: table.to_string(),
        message: message.into(),
    }
}

/// Splits `rows` into the buckets of `spec`.
pub fn bucketize(table: &str, schema: Arc<Schema>, rows: Vec<Row>, spec: &BucketSpec) -> Result<Frame, SchemaError> {
    if spec.num_buckets == 0 {
        return Err(layout_err(table, "bucket count must be positive"));
    }
    let column = schema
        .index_of_name(&spec.column)
        .map_err(|_| SchemaError::MissingColumn {
            table: table.to_string(),
            column: spec.column.clone(),
        })?;
    Ok(Frame::hash_partitioned(schema, rows, column, spec.num_buckets))
}

/// Writes one parquet file per bucket, including empty buckets. Buckets
/// left by an earlier build of `table` are removed first.
pub fn write_buckets(dir: &Path, table: &str, frame: &Frame) -> Result<(), SchemaError> {
    let table_dir = dir.join(table);
    if table_dir.exists() {
        std::fs::remove_dir_all(&table_dir).map_err(|e| layout_err(table, e.to_string()))?;
        debug!(table, dir = %table_dir.display(), "removed previous buckets");
    }
    for (i, rows) in frame.partitions.iter().enumerate() {
        let path = bucket_file(dir, table, i);
        write_parquet(&path, &frame.schema, rows).map_err(|e| layout_err(table, e.to_string()))?;
        debug!(table, bucket = i, rows = rows.len(), "wrote bucket");
    }
    Ok(())
}

/// Reads back the buckets of `table`, checking that there are exactly
/// `spec.num_buckets` of them and that every row sits in its bucket.
pub fn read_buckets(dir: &Path, table: &str, schema: Arc<Schema>, spec: &BucketSpec) -> Result<Frame, SchemaError> {
    let pattern = dir.join(table).join("bucket-*.parquet");
    let files: Vec<PathBuf> = glob(&pattern.to_string_lossy())
        .map_err(|e| layout_err(table, e.to_string()))?
        .filter_map(Result::ok)
        .collect();
    if files.len() != spec.num_buckets {
        return Err(SchemaError::BucketMismatch {
            table: table.to_string(),
            expected: spec.num_buckets,
            found: files.len(),
        });
    }
    let column = schema
        .index_of_name(&spec.column)
        .map_err(|_| SchemaError::MissingColumn {
            table: table.to_string(),
            column: spec.column.clone(),
        })?;
    let mut partitions = Vec::with_capacity(spec.num_buckets);
    for i in 0..spec.num_buckets {
        let path = bucket_file(dir, table, i);
        let rows = read_parquet(&path, &schema).map_err(|e| layout_err(table, format!("{}: {e}", path.display())))?;
        if let Some(row) = rows.iter().find(|r| bucket_of(&r[column], spec.num_buckets) != i) {
            return Err(layout_err(
                table,
                format!("bucket {i} holds a row with {} = {}", spec.column, row[column]),
            ));
        }
        partitions.push(rows);
    }
    Ok(Frame::new(
        schema,
        partitions,
        Partitioning::Hash {
            column,
            num: spec.num_buckets,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Record;
    use crate::model::{Solution, Verdict};

    fn rows() -> Vec<Row> {
        (0..20)
            .map(|i| {
                Solution {
                    problem_id: format!("p{i}"),
                    ordinal: 0,
                    language: i % 5,
                    solution: String::new(),
                    verdict: Verdict::Correct,
                }
                .to_row()
            })
            .collect()
    }

    #[test]
    fn every_row_lands_in_its_hash_bucket() {
        let spec = BucketSpec::default();
        let frame = bucketize("solutions", Arc::new(Solution::schema()), rows(), &spec).unwrap();
        assert_eq!(frame.partitions.len(), 4);
        assert_eq!(frame.num_rows(), 20);
        for (i, part) in frame.partitions.iter().enumerate() {
            assert!(part.iter().all(|r| bucket_of(&r[2], 4) == i));
        }
    }

    #[test]
    fn buckets_round_trip_and_count_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let spec = BucketSpec::default();
        let schema = Arc::new(Solution::schema());
        let frame = bucketize("solutions", schema.clone(), rows(), &spec).unwrap();
        write_buckets(dir.path(), "solutions", &frame).unwrap();

        let back = read_buckets(dir.path(), "solutions", schema.clone(), &spec).unwrap();
        assert_eq!(back.partitions, frame.partitions);
        assert_eq!(back.partitioning, frame.partitioning);

        let eight = BucketSpec {
            num_buckets: 8,
            ..BucketSpec::default()
        };
        assert!(matches!(
            read_buckets(dir.path(), "solutions", schema, &eight),
            Err(SchemaError::BucketMismatch { expected: 8, found: 4, .. })
        ));
    }

    #[test]
    fn rewriting_with_fewer_buckets_drops_the_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(Solution::schema());
        let eight = BucketSpec {
            num_buckets: 8,
            ..BucketSpec::default()
        };
        let frame = bucketize("solutions", schema.clone(), rows(), &eight).unwrap();
        write_buckets(dir.path(), "solutions", &frame).unwrap();

        let four = BucketSpec::default();
        let frame = bucketize("solutions", schema.clone(), rows(), &four).unwrap();
        write_buckets(dir.path(), "solutions", &frame).unwrap();

        assert!(!bucket_file(dir.path(), "solutions", 7).exists());
        let back = read_buckets(dir.path(), "solutions", schema, &four).unwrap();
        assert_eq!(back.partitions, frame.partitions);
    }
}
