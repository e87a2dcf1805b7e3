use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::config::{PipelineConfig, StoreKind};
use crate::pipeline::DEFAULT_ROOT;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,

    /// TOML configuration file; flags below override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Object store kind: local or minio
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Object store endpoint, e.g. http://localhost:9000
    #[arg(long, global = true)]
    pub os: Option<String>,

    /// Object store access key
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Object store secret key
    #[arg(long, global = true)]
    pub pw: Option<String>,

    /// Object store bucket
    #[arg(long, global = true)]
    pub bucket: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the upstream dataset to flat artifacts
    Export {
        /// Glob spec for the upstream JSONL files
        #[arg(short, long)]
        input: String,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Upload exported artifacts to the object store
    Load {
        #[arg(short, long)]
        export_dir: PathBuf,

        /// Key prefix the artifacts are stored under
        #[arg(short, long, default_value = DEFAULT_ROOT)]
        root: String,
    },
    /// Validate stored artifacts and lay out the warehouse
    Build {
        #[arg(short, long, default_value = DEFAULT_ROOT)]
        root: String,

        #[arg(short, long)]
        warehouse: PathBuf,
    },
    /// Run a SQL query against a built warehouse
    Query {
        #[arg(short, long)]
        warehouse: PathBuf,

        /// Print the logical and physical plan instead of the rows
        #[arg(long)]
        explain: bool,

        sql: String,
    },
    /// Train the rating model and impute missing ratings
    Predict {
        #[arg(short, long)]
        warehouse: PathBuf,

        /// Write the fitted tree as JSON
        #[arg(short, long)]
        save_model: Option<PathBuf>,
    },
    /// Run every stage end to end
    Run {
        #[arg(short, long)]
        input: String,

        /// Directory for the export and the warehouse
        #[arg(short, long)]
        work_dir: PathBuf,

        #[arg(short, long, default_value = DEFAULT_ROOT)]
        root: String,
    },
}

impl Args {
    /// The configuration file (or defaults) with command line overrides.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(kind) = &self.store {
            config.storage.kind = match kind.to_ascii_lowercase().as_str() {
                "local" => StoreKind::Local,
                "minio" | "s3" => StoreKind::Minio,
                other => bail!("unknown store kind `{other}`, expected local or minio"),
            };
        }
        if let Some(os) = &self.os {
            config.storage.endpoint = os.clone();
        }
        if let Some(user) = &self.user {
            config.storage.user = user.clone();
        }
        if let Some(pw) = &self.pw {
            config.storage.password = pw.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.storage.bucket = bucket.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "cpl", "--store", "minio", "--os", "http://minio:9000", "--bucket", "lake", "build", "-w", "/tmp/wh",
        ])
        .unwrap();
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.storage.kind, StoreKind::Minio);
        assert_eq!(config.storage.endpoint, "http://minio:9000");
        assert_eq!(config.storage.bucket, "lake");
        match args.command {
            Commands::Build { root, warehouse } => {
                assert_eq!(root, DEFAULT_ROOT);
                assert_eq!(warehouse, PathBuf::from("/tmp/wh"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn config_file_is_read_before_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpl.toml");
        std::fs::write(&path, "[storage]\nbucket = \"from-file\"\nuser = \"alice\"\n").unwrap();
        let args = Args::try_parse_from([
            "cpl",
            "query",
            "-w",
            "wh",
            "SELECT 1 FROM problems",
            "--config",
            path.to_str().unwrap(),
            "--bucket",
            "from-flag",
        ])
        .unwrap();
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.storage.bucket, "from-flag");
        assert_eq!(config.storage.user, "alice");
    }

    #[test]
    fn unknown_store_kind_is_an_error() {
        let args = Args::try_parse_from(["cpl", "--store", "hdfs", "predict", "-w", "wh"]).unwrap();
        assert!(args.pipeline_config().is_err());
    }
}
