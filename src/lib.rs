//! A lightweight data lake for competitive-programming datasets.
//!
//! Upstream problem dumps are exported to flat files, loaded into an
//! object store, laid out as a bucketed warehouse, queried through three
//! equivalent front ends (typed records, dataframes, SQL) and finally fed
//! to a regression tree that fills in missing difficulty ratings.
//! For simplicity, data is kept on a local directory or an S3-compatible
//! system, unlike Hadoop or HDFS.

use std::hash::Hasher;

pub mod cmd;
pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod storage;
pub mod utils;
pub mod warehouse;

pub use config::PipelineConfig;
pub use engine::{DataFrame, Session};
pub use error::{PipelineError, Stage};
pub use model::{Problem, Solution};
pub use warehouse::Warehouse;

/// Hashes a partitioning key. Compute a bucket for a given key
/// by calculating `ihash(key) % n_buckets`.
///
/// The same function places rows at warehouse write time and during
/// shuffles, so a bucketed table and a shuffled one agree on placement.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    (hasher.finish() & 0x7fffffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_is_stable_and_positive() {
        let a = ihash(b"python3");
        let b = ihash(b"python3");
        assert_eq!(a, b);
        assert!(a <= 0x7fffffff);
        assert_ne!(ihash(b"cpp"), ihash(b"java"));
    }
}
