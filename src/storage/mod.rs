//! Loads exported artifacts into an object store.
//!
//! The store is a local directory or an S3-compatible bucket. Artifacts of
//! one pipeline run live under a session root such as `runs/<uuid>`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{info, warn};

use crate::config::{StorageConfig, StoreKind};
use crate::error::StorageError;
use crate::utils::{join_key, string_from_bytes, string_to_bytes};

pub mod local;
pub mod minio;

pub use local::LocalStore;
pub use minio::MinioStore;

#[derive(Debug, Clone)]
pub enum ObjectStore {
    Local(LocalStore),
    Minio(MinioStore),
}

impl ObjectStore {
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(match config.kind {
            StoreKind::Local => ObjectStore::Local(LocalStore::new(&config.local_root)),
            StoreKind::Minio => ObjectStore::Minio(MinioStore::connect(config).await?),
        })
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        ObjectStore::Local(LocalStore::new(root))
    }

    pub fn describe(&self) -> String {
        match self {
            ObjectStore::Local(s) => format!("local:{}", s.root().display()),
            ObjectStore::Minio(s) => format!("s3://{}", s.bucket()),
        }
    }

    pub async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        match self {
            ObjectStore::Local(s) => s.put(key, data).await,
            ObjectStore::Minio(s) => s.put(key, data).await,
        }
    }

    pub async fn put_string(&self, key: &str, content: String) -> Result<(), StorageError> {
        self.put(key, string_to_bytes(content)).await
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        match self {
            ObjectStore::Local(s) => s.get(key).await,
            ObjectStore::Minio(s) => s.get(key).await,
        }
    }

    /// Reads an object as UTF-8 text.
    pub async fn get_string(&self, key: &str) -> Result<String, StorageError> {
        string_from_bytes(self.get(key).await?).map_err(|e| StorageError::Read {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        match self {
            ObjectStore::Local(s) => s.list(prefix).await,
            ObjectStore::Minio(s) => s.list(prefix).await,
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            ObjectStore::Local(s) => s.exists(key).await,
            ObjectStore::Minio(s) => s.exists(key).await,
        }
    }

    /// Copies a local file to `key`, creating parents. Returns the size.
    pub async fn upload_file(&self, key: &str, file: &Path) -> Result<u64, StorageError> {
        match self {
            ObjectStore::Local(s) => s.upload_file(key, file).await,
            ObjectStore::Minio(s) => s.upload_file(key, file).await,
        }
    }
}

/// The six exported artifacts.
pub const PROBLEMS: &str = "problems.jsonl";
pub const SOLUTIONS: &str = "solutions.jsonl";
pub const LANGUAGES: &str = "languages.csv";
pub const SOURCES: &str = "sources.csv";
pub const TAGS: &str = "tags.csv";
pub const PROBLEM_TESTS: &str = "problem_tests.csv";

pub const ARTIFACTS: [&str; 6] = [PROBLEMS, SOLUTIONS, LANGUAGES, SOURCES, TAGS, PROBLEM_TESTS];

/// Where the artifacts of one session root live in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: String,
}

impl Layout {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn key(&self, artifact: &str) -> String {
        join_key(&self.root, artifact)
    }

    pub fn keys(&self) -> Vec<String> {
        ARTIFACTS.iter().map(|a| self.key(a)).collect()
    }
}

/// Uploads every artifact found in `export_dir` under `root`.
///
/// Not transactional: a failure leaves the artifacts uploaded so far in
/// place. Returns the uploaded keys.
pub async fn load_artifacts(store: &ObjectStore, root: &str, export_dir: &Path) -> Result<Vec<String>, StorageError> {
    let layout = Layout::new(root);
    let mut uploaded = Vec::new();
    for artifact in ARTIFACTS {
        let file = export_dir.join(artifact);
        if !tokio::fs::try_exists(&file).await? {
            warn!(artifact, dir = %export_dir.display(), "artifact not exported, skipping");
            continue;
        }
        let key = layout.key(artifact);
        let bytes = store.upload_file(&key, &file).await?;
        info!(key = %key, bytes, store = %store.describe(), "uploaded artifact");
        uploaded.push(key);
    }
    Ok(uploaded)
}

/// Fails with every missing artifact when `root` is incomplete.
pub async fn verify_complete(store: &ObjectStore, root: &str) -> Result<(), StorageError> {
    let layout = Layout::new(root);
    let mut missing = Vec::new();
    for artifact in ARTIFACTS {
        if !store.exists(&layout.key(artifact)).await? {
            missing.push(artifact.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StorageError::Missing {
            root: root.to_string(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_joins_root_and_artifact() {
        let layout = Layout::new("runs/abc/");
        assert_eq!(layout.key(PROBLEMS), "runs/abc/problems.jsonl");
        assert_eq!(layout.keys().len(), 6);
    }

    #[tokio::test]
    async fn verify_lists_every_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("export");
        std::fs::create_dir_all(&export).unwrap();
        std::fs::write(export.join(TAGS), "id,name\n").unwrap();
        std::fs::write(export.join(LANGUAGES), "id,name\n").unwrap();

        let store = ObjectStore::local(dir.path().join("store"));
        let uploaded = load_artifacts(&store, "runs/x", &export).await.unwrap();
        assert_eq!(uploaded, vec!["runs/x/languages.csv".to_string(), "runs/x/tags.csv".to_string()]);

        match verify_complete(&store, "runs/x").await {
            Err(StorageError::Missing { missing, .. }) => {
                assert_eq!(missing, vec![PROBLEMS, SOLUTIONS, SOURCES, PROBLEM_TESTS]);
            }
            other => panic!("expected missing artifacts, got {other:?}"),
        }
        assert_eq!(store.get_string("runs/x/tags.csv").await.unwrap(), "id,name\n");
    }
}
