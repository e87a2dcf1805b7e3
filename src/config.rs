//! Pipeline configuration.
//!
//! Every knob has a default so an empty TOML file (or none at all) is a
//! valid configuration. Command line flags are layered on top by `cmd`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    pub engine: EngineConfig,
    pub bands: BandConfig,
    pub split: SplitConfig,
    pub tree: TreeConfig,
    pub predict: PredictConfig,
}

impl PipelineConfig {
    /// Reads a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Local,
    Minio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StoreKind,
    /// Base directory of the local store.
    pub local_root: String,
    /// Endpoint of the object store, e.g. `http://localhost:9000`.
    pub endpoint: String,
    pub user: String,
    pub password: String,
    pub bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Local,
            local_root: "./store".into(),
            endpoint: "http://localhost:9000".into(),
            user: "ROOTNAME".into(),
            password: "CHANGEME123".into(),
            bucket: "cplite".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Number of hash buckets for the `solutions` table.
    pub num_buckets: usize,
    /// Column `solutions` is bucketed on.
    pub bucket_column: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            num_buckets: 4,
            bucket_column: "language".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Partition count used when a shuffle cannot be avoided.
    pub shuffle_partitions: usize,
    /// Tables with at most this many rows are broadcast to every partition
    /// of the other join side.
    pub broadcast_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shuffle_partitions: 4,
            broadcast_threshold: 1_000,
        }
    }
}

/// Cutoffs between the difficulty bands. `easy_below` is exclusive,
/// `hard_from` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    pub easy_below: i64,
    pub hard_from: i64,
}

impl Default for BandConfig {
    fn default() -> Self {
        // Codeforces problems are scored 7 (A) and up in the upstream enum.
        Self {
            easy_below: 7,
            hard_from: 11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_ratio: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.8,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_bins: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictConfig {
    pub min_training_rows: usize,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            min_training_rows: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.warehouse.num_buckets, 4);
        assert_eq!(config.tree.max_depth, 5);
    }

    #[test]
    fn partial_sections_override_only_given_keys() {
        let config = PipelineConfig::from_toml(
            r#"
            [bands]
            easy_below = 5

            [split]
            seed = 7

            [storage]
            kind = "minio"
            "#,
        )
        .unwrap();
        assert_eq!(config.bands.easy_below, 5);
        assert_eq!(config.bands.hard_from, 11);
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.split.train_ratio, 0.8);
        assert_eq!(config.storage.kind, StoreKind::Minio);
    }
}
