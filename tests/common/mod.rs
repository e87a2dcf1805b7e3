#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cplite::config::PipelineConfig;
use cplite::pipeline::Pipeline;
use cplite::storage::ObjectStore;
use cplite::Warehouse;
use serde_json::json;

pub const ROOT: &str = "runs/test";

/// Rating as a function of difficulty, so a shallow tree can learn it.
pub fn rating_for(difficulty: i64) -> i64 {
    800 + 100 * difficulty
}

/// One upstream record. Every sixth problem is unrated, every
/// seventeenth has no time limit.
pub fn upstream_record(i: usize) -> serde_json::Value {
    let difficulty = 1 + (i % 20) as i64;
    let name = format!("{:04}_{}. Problem {i}", 1000 + i / 4, ["A", "B", "C", "D"][i % 4]);
    let source = [2, 2, 1, 6][i % 4];
    let rating = if i % 6 == 0 { 0 } else { rating_for(difficulty) };
    let tags: Vec<&str> = match i % 4 {
        0 => vec!["greedy"],
        1 => vec!["math", "dp"],
        2 => vec!["implementation"],
        _ => vec![],
    };
    let seconds = 1 + i % 3;
    let nanos = if i % 2 == 0 { 0 } else { 500_000_000 };
    let mut record = json!({
        "name": name,
        "description": format!("statement of problem {i}"),
        "source": source,
        "difficulty": difficulty,
        "cf_rating": rating,
        "cf_tags": tags,
        "time_limit": {"seconds": seconds, "nanos": nanos},
        "memory_limit_bytes": 256_000_000,
        "solutions": {"language": [2, 3], "solution": [format!("// cpp {i}"), format!("# py {i}")]},
        "incorrect_solutions": {"language": [i % 5], "solution": [format!("wrong {i}")]},
        "public_tests": {"input": [format!("{i}\n")], "output": [format!("{}\n", i * 2)]},
        "private_tests": {"input": [], "output": []},
        "generated_tests": {"input": ["0\n", "1\n"], "output": ["0\n", "2\n"]},
    });
    if i % 17 == 0 {
        if let Some(fields) = record.as_object_mut() {
            fields.remove("time_limit");
        }
    }
    record
}

/// Writes `n` upstream records split over two files, plus one record
/// without a name, and returns the glob matching them.
pub fn write_upstream(dir: &Path, n: usize) -> String {
    let upstream = dir.join("upstream");
    std::fs::create_dir_all(&upstream).unwrap();
    let (first, second): (Vec<usize>, Vec<usize>) = (0..n).partition(|i| i % 2 == 0);
    let lines = |ids: &[usize]| ids.iter().map(|&i| upstream_record(i).to_string()).collect::<Vec<_>>();
    let mut train = lines(&first);
    train.push(json!({"description": "no name", "source": 2}).to_string());
    std::fs::write(upstream.join("train-00000.jsonl"), train.join("\n")).unwrap();
    std::fs::write(upstream.join("valid-00000.jsonl"), lines(&second).join("\n")).unwrap();
    format!("{}/*.jsonl", upstream.display())
}

pub struct Built {
    pub pipeline: Pipeline,
    pub store: ObjectStore,
    pub warehouse: Warehouse,
    pub work: PathBuf,
}

/// Export, load into a local store and build, all under `dir`.
pub async fn build(dir: &Path, n: usize) -> Built {
    let pattern = write_upstream(dir, n);
    let pipeline = Pipeline::new(PipelineConfig::default());
    let store = ObjectStore::local(dir.join("store"));
    let export_dir = dir.join("export");
    pipeline.export(&pattern, &export_dir).unwrap();
    pipeline.load(&store, &export_dir, ROOT).await.unwrap();
    let warehouse = pipeline.build(&store, ROOT, &dir.join("warehouse")).await.unwrap();
    Built {
        pipeline,
        store,
        warehouse,
        work: dir.to_path_buf(),
    }
}
