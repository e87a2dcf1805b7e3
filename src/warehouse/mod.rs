//! Turns loaded artifacts into the tables the engine queries.
//!
//! `problems` is stored as one parquet part, `solutions` as hash buckets
//! on the configured column, and the four reference views as the CSV they
//! were exported as. A manifest records the bucket layout so that
//! [`Warehouse::open`] can refuse a layout it was not configured for.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{EngineConfig, WarehouseConfig};
use crate::encode::{read_parquet, write_parquet};
use crate::engine::{Catalog, Frame, Row, Session, Table, TableKind};
use crate::error::SchemaError;
use crate::storage::{self, Layout, ObjectStore};

pub mod bucket;
pub mod schema;

pub use bucket::BucketSpec;
pub use schema::TableSchema;

const MANIFEST: &str = "_manifest.json";

/// Views and the artifact each is read from.
const VIEWS: [(&str, &str); 4] = [
    ("languages", storage::LANGUAGES),
    ("sources", storage::SOURCES),
    ("tags", storage::TAGS),
    ("problem_tests", storage::PROBLEM_TESTS),
];

fn view_schema(name: &str) -> TableSchema {
    match name {
        "languages" => TableSchema::named("languages"),
        "sources" => TableSchema::named("sources"),
        "tags" => TableSchema::named("tags"),
        _ => TableSchema::problem_tests(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Manifest {
    bucket: BucketSpec,
    rows: BTreeMap<String, usize>,
}

/// Text of the six exported artifacts.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub problems: String,
    pub solutions: String,
    /// `(view name, csv text)`.
    pub views: Vec<(String, String)>,
}

impl Artifacts {
    /// Fetches every artifact under `root`, failing closed when any is
    /// missing.
    pub async fn fetch(store: &ObjectStore, root: &str) -> Result<Self, SchemaError> {
        storage::verify_complete(store, root).await?;
        let layout = Layout::new(root);
        let mut views = Vec::with_capacity(VIEWS.len());
        for (name, artifact) in VIEWS {
            views.push((name.to_string(), store.get_string(&layout.key(artifact)).await?));
        }
        Ok(Self {
            problems: store.get_string(&layout.key(storage::PROBLEMS)).await?,
            solutions: store.get_string(&layout.key(storage::SOLUTIONS)).await?,
            views,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Warehouse {
    dir: PathBuf,
    bucket: BucketSpec,
    catalog: Catalog,
    rows: BTreeMap<String, usize>,
}

impl Warehouse {
    /// Validates the artifacts under `root`, lays them out in `dir` and
    /// returns the registered tables.
    pub async fn build(
        store: &ObjectStore,
        root: &str,
        dir: &Path,
        config: &WarehouseConfig,
    ) -> Result<Self, SchemaError> {
        let artifacts = Artifacts::fetch(store, root).await?;
        Self::from_artifacts(&artifacts, dir, config)
    }

    /// Like [`Warehouse::build`], from artifact text already in memory.
    pub fn from_artifacts(artifacts: &Artifacts, dir: &Path, config: &WarehouseConfig) -> Result<Self, SchemaError> {
        let spec = BucketSpec::from(config);
        let mut catalog = Catalog::new();
        let mut rows = BTreeMap::new();

        let problems_schema = TableSchema::problems();
        let problems = problems_schema.parse_jsonl(&artifacts.problems)?;
        write_parquet(&bucket::part_file(dir, "problems"), &problems_schema.schema, &problems)
            .map_err(|e| layout_err("problems", e))?;
        rows.insert("problems".to_string(), problems.len());
        catalog.register(physical("problems", &problems_schema, problems));

        let solutions_schema = TableSchema::solutions();
        let solutions = solutions_schema.parse_jsonl(&artifacts.solutions)?;
        rows.insert("solutions".to_string(), solutions.len());
        let frame = bucket::bucketize("solutions", Arc::new(solutions_schema.schema.clone()), solutions, &spec)?;
        bucket::write_buckets(dir, "solutions", &frame)?;
        catalog.register(Table::new("solutions", TableKind::Physical, frame));

        for (name, text) in &artifacts.views {
            let view = view_schema(name);
            let parsed = view.parse_csv(text)?;
            let path = view_file(dir, name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| layout_err(name, e))?;
            }
            std::fs::write(&path, text).map_err(|e| layout_err(name, e))?;
            rows.insert(name.clone(), parsed.len());
            catalog.register(view_table(name, &view, parsed));
        }

        let manifest = Manifest {
            bucket: spec.clone(),
            rows: rows.clone(),
        };
        let json = serde_json::to_string_pretty(&manifest).map_err(|e| layout_err(MANIFEST, e))?;
        std::fs::write(dir.join(MANIFEST), json).map_err(|e| layout_err(MANIFEST, e))?;

        for (table, n) in &rows {
            info!(table = %table, rows = n, "registered table");
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            bucket: spec,
            catalog,
            rows,
        })
    }

    /// Reloads a warehouse written by [`Warehouse::build`]. Fails when the
    /// persisted bucket count is not the configured one.
    pub fn open(dir: &Path, config: &WarehouseConfig) -> Result<Self, SchemaError> {
        let spec = BucketSpec::from(config);
        let text = std::fs::read_to_string(dir.join(MANIFEST)).map_err(|e| layout_err(MANIFEST, e))?;
        let manifest: Manifest = serde_json::from_str(&text).map_err(|e| layout_err(MANIFEST, e))?;
        if manifest.bucket.num_buckets != spec.num_buckets {
            return Err(SchemaError::BucketMismatch {
                table: "solutions".into(),
                expected: spec.num_buckets,
                found: manifest.bucket.num_buckets,
            });
        }
        if manifest.bucket.column != spec.column {
            return Err(layout_err(
                "solutions",
                format!(
                    "bucketed on `{}`, configured for `{}`",
                    manifest.bucket.column, spec.column
                ),
            ));
        }

        let mut catalog = Catalog::new();
        let problems_schema = TableSchema::problems();
        let problems = read_parquet(&bucket::part_file(dir, "problems"), &problems_schema.schema)
            .map_err(|e| layout_err("problems", e))?;
        catalog.register(physical("problems", &problems_schema, problems));

        let solutions_schema = TableSchema::solutions();
        let frame = bucket::read_buckets(dir, "solutions", Arc::new(solutions_schema.schema), &spec)?;
        catalog.register(Table::new("solutions", TableKind::Physical, frame));

        for (name, _) in VIEWS {
            let view = view_schema(name);
            let text = std::fs::read_to_string(view_file(dir, name)).map_err(|e| layout_err(name, e))?;
            catalog.register(view_table(name, &view, view.parse_csv(&text)?));
        }
        info!(dir = %dir.display(), tables = catalog.names().len(), "opened warehouse");
        Ok(Self {
            dir: dir.to_path_buf(),
            bucket: spec,
            catalog,
            rows: manifest.rows,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_spec(&self) -> &BucketSpec {
        &self.bucket
    }

    /// Every registered table by name.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Row count per table at build time.
    pub fn row_counts(&self) -> &BTreeMap<String, usize> {
        &self.rows
    }

    /// A fresh query session over this warehouse.
    pub fn session(&self, config: &EngineConfig) -> Session {
        Session::new(self.catalog.clone(), config.clone())
    }
}

fn layout_err(table: &str, e: impl std::fmt::Display) -> SchemaError {
    SchemaError::Layout {
        table: table.to_string(),
        message: e.to_string(),
    }
}

fn view_file(dir: &Path, name: &str) -> PathBuf {
    dir.join("views").join(format!("{name}.csv"))
}

fn physical(name: &str, schema: &TableSchema, rows: Vec<Row>) -> Table {
    Table::new(
        name,
        TableKind::Physical,
        Frame::single(Arc::new(schema.schema.clone()), rows),
    )
}

fn view_table(name: &str, schema: &TableSchema, rows: Vec<Row>) -> Table {
    Table::new(
        name,
        TableKind::View,
        Frame::single(Arc::new(schema.schema.clone()), rows),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> Artifacts {
        let problems = [
            r#"{"id":"1A","description":"a","difficulty":7,"time_limit":1.0,"memory_limit_bytes":256,"source":2,"tags":[0],"cf_rating":1000}"#,
            r#"{"id":"1B","description":"b","difficulty":null,"time_limit":2.0,"memory_limit_bytes":256,"source":2,"tags":[],"cf_rating":null}"#,
        ]
        .join("\n");
        let solutions = [
            r#"{"problem_id":"1A","ordinal":0,"language":2,"solution":"x","verdict":"correct"}"#,
            r#"{"problem_id":"1A","ordinal":1,"language":3,"solution":"y","verdict":"incorrect"}"#,
        ]
        .join("\n");
        Artifacts {
            problems,
            solutions,
            views: vec![
                ("languages".into(), "id,name\n0,UNKNOWN_LANGUAGE\n2,CPP\n".into()),
                ("sources".into(), "id,name\n2,CODEFORCES\n".into()),
                ("tags".into(), "id,name\n0,greedy\n".into()),
                ("problem_tests".into(), "problem_id,idx,kind,input,output\n1A,0,public,\"1\n\",2\n".into()),
            ],
        }
    }

    #[test]
    fn build_then_open_gives_the_same_tables() {
        let dir = tempfile::tempdir().unwrap();
        let config = WarehouseConfig::default();
        let built = Warehouse::from_artifacts(&artifacts(), dir.path(), &config).unwrap();
        assert_eq!(
            built.catalog().names(),
            vec!["languages", "problem_tests", "problems", "solutions", "sources", "tags"]
        );
        assert!(bucket::bucket_file(dir.path(), "solutions", 3).exists());

        let opened = Warehouse::open(dir.path(), &config).unwrap();
        for name in built.catalog().names() {
            let a = built.catalog().get(&name).unwrap();
            let b = opened.catalog().get(&name).unwrap();
            assert_eq!(a.frame.partitions, b.frame.partitions, "table {name}");
            assert_eq!(a.kind, b.kind);
        }
        assert_eq!(opened.row_counts()["solutions"], 2);
    }

    #[test]
    fn open_rejects_a_different_bucket_count() {
        let dir = tempfile::tempdir().unwrap();
        Warehouse::from_artifacts(&artifacts(), dir.path(), &WarehouseConfig::default()).unwrap();
        let eight = WarehouseConfig {
            num_buckets: 8,
            ..WarehouseConfig::default()
        };
        assert!(matches!(
            Warehouse::open(dir.path(), &eight),
            Err(SchemaError::BucketMismatch { expected: 8, found: 4, .. })
        ));
    }

    #[tokio::test]
    async fn build_fails_closed_on_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::local(dir.path().join("store"));
        store
            .put_string("runs/r/problems.jsonl", String::new())
            .await
            .unwrap();
        let err = Warehouse::build(&store, "runs/r", &dir.path().join("wh"), &WarehouseConfig::default())
            .await
            .unwrap_err();
        match err {
            SchemaError::Storage(crate::error::StorageError::Missing { missing, .. }) => {
                assert_eq!(missing.len(), 5);
            }
            other => panic!("unexpected {other}"),
        }
        assert!(!dir.path().join("wh").exists());
    }
}
