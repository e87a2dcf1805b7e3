//! Partitioned row collections.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::ihash;

use super::schema::Schema;
use super::value::Value;

pub type Row = Vec<Value>;

/// How rows are spread over a frame's partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partitioning {
    /// Row placed in partition `ihash(key) % num` where `key` is the value
    /// of `column`.
    Hash { column: usize, num: usize },
    /// No known placement.
    Unknown,
}

impl Partitioning {
    pub fn hash_column(&self) -> Option<(usize, usize)> {
        match self {
            Partitioning::Hash { column, num } => Some((*column, *num)),
            Partitioning::Unknown => None,
        }
    }
}

/// Partition a key value belongs to.
pub fn bucket_of(key: &Value, num: usize) -> usize {
    (ihash(&key.key_bytes()) as usize) % num
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub schema: Arc<Schema>,
    pub partitions: Vec<Vec<Row>>,
    pub partitioning: Partitioning,
}

impl Frame {
    pub fn new(schema: Arc<Schema>, partitions: Vec<Vec<Row>>, partitioning: Partitioning) -> Self {
        Self {
            schema,
            partitions,
            partitioning,
        }
    }

    /// A frame with all rows in one partition.
    pub fn single(schema: Arc<Schema>, rows: Vec<Row>) -> Self {
        Self::new(schema, vec![rows], Partitioning::Unknown)
    }

    /// Places rows into `num` partitions by the hash of `column`.
    pub fn hash_partitioned(schema: Arc<Schema>, rows: Vec<Row>, column: usize, num: usize) -> Self {
        let mut partitions = vec![Vec::new(); num];
        for row in rows {
            let b = bucket_of(&row[column], num);
            partitions[b].push(row);
        }
        Self::new(schema, partitions, Partitioning::Hash { column, num })
    }

    pub fn num_rows(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.partitions.iter().flatten()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.partitions.into_iter().flatten().collect()
    }
}

/// Rows returned to the caller of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            columns: frame.schema.names(),
            rows: frame.rows().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of the named column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let i = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r[i].clone()).collect())
    }

    /// Rows in a canonical order, for order-insensitive comparison.
    pub fn sorted_rows(&self) -> Vec<Row> {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            a.iter()
                .zip(b)
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }
}

impl fmt::Display for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| {
                r.iter()
                    .map(|v| match v {
                        Value::Str(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect();
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count().min(48));
            }
        }
        let line = |f: &mut fmt::Formatter<'_>, items: &[String]| -> fmt::Result {
            for (i, (item, w)) in items.iter().zip(&widths).enumerate() {
                if i > 0 {
                    f.write_str(" | ")?;
                }
                let item: String = item.chars().take(48).collect();
                write!(f, "{item:<w$}")?;
            }
            writeln!(f)
        };
        line(f, &self.columns)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        line(f, &rule)?;
        for row in &cells {
            line(f, row)?;
        }
        write!(f, "({} rows)", self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schema::{DataType, Field};

    #[test]
    fn hash_partitioning_places_equal_keys_together() {
        let schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, false)]));
        let rows = (0..100).map(|i| vec![Value::Int(i % 7)]).collect();
        let frame = Frame::hash_partitioned(schema, rows, 0, 4);
        assert_eq!(frame.partitions.len(), 4);
        assert_eq!(frame.num_rows(), 100);
        for (b, part) in frame.partitions.iter().enumerate() {
            for row in part {
                assert_eq!(bucket_of(&row[0], 4), b);
            }
        }
    }

    #[test]
    fn result_set_renders_table() {
        let rs = ResultSet {
            columns: vec!["language".into(), "n".into()],
            rows: vec![vec![Value::from("CPP"), Value::Int(3)]],
        };
        let text = rs.to_string();
        assert!(text.starts_with("language | n"));
        assert!(text.contains("CPP"));
        assert!(text.ends_with("(1 rows)"));
        assert_eq!(rs.column("n"), Some(vec![Value::Int(3)]));
    }
}
