//! Object store backed by a local directory. Keys are relative paths.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tracing::trace;

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    pub async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.path(key);
        trace!(path = %path.display(), bytes = data.len(), "local put");
        let write = async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, &data).await
        };
        write.await.map_err(|e| StorageError::Write {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path(key);
        trace!(path = %path.display(), "local get");
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::Read {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.path(key)).await?)
    }

    /// Keys under `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let list_err = |e: std::io::Error| StorageError::List {
            prefix: prefix.to_string(),
            message: e.to_string(),
        };
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(list_err(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
                let path = entry.path();
                if entry.file_type().await.map_err(list_err)?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let key = path
                    .strip_prefix(&self.root)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                if key.starts_with(prefix.trim_start_matches('/')) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Copies a local file into the store. Returns the bytes copied.
    pub async fn upload_file(&self, key: &str, file: &Path) -> Result<u64, StorageError> {
        let path = self.path(key);
        trace!(from = %file.display(), to = %path.display(), "local upload");
        let copy = async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(file, &path).await
        };
        copy.await.map_err(|e| StorageError::Write {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put("runs/a/tags.csv", Bytes::from_static(b"id,name\n")).await.unwrap();
        store.put("runs/b/tags.csv", Bytes::from_static(b"id,name\n")).await.unwrap();
        assert_eq!(store.get("runs/a/tags.csv").await.unwrap(), Bytes::from_static(b"id,name\n"));
        assert_eq!(store.list("runs/a").await.unwrap(), vec!["runs/a/tags.csv".to_string()]);
        assert_eq!(store.list("").await.unwrap().len(), 2);
        assert!(store.exists("runs/b/tags.csv").await.unwrap());
        assert!(matches!(
            store.get("runs/c/tags.csv").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
