//! Exports the upstream dataset to the six flat artifacts.
//!
//! Output is deterministic for a given input: problems sorted by id,
//! solutions by `(problem_id, ordinal)`, tag ids dense over the sorted tag
//! names.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use glob::glob;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::encode::write_csv;
use crate::engine::Record;
use crate::error::ExportError;
use crate::model::{language_table, source_table, Named, Problem, Solution, TestCase, Verdict};
use crate::storage;

pub mod upstream;

use upstream::UpstreamProblem;

/// Fields that must be present in most upstream records.
pub const REQUIRED_FIELDS: [&str; 5] = ["name", "description", "source", "time_limit", "memory_limit_bytes"];

/// What an export wrote and what it had to leave out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportSummary {
    pub files: usize,
    pub records: usize,
    /// Rows written per artifact file name.
    pub rows: BTreeMap<String, usize>,
    /// Records dropped because they had no name.
    pub skipped_unnamed: usize,
    /// Records dropped because an earlier record had the same name.
    pub skipped_duplicate: usize,
    /// Records dropped because their solution or test arrays differ in length.
    pub skipped_misaligned: usize,
    /// Required fields absent from individual (kept) records.
    pub missing: BTreeMap<String, usize>,
}

fn missing_count(records: &[UpstreamProblem], field: &str) -> usize {
    records
        .iter()
        .filter(|r| match field {
            "name" => r.name.is_none(),
            "description" => r.description.is_none(),
            "source" => r.source.is_none(),
            "time_limit" => r.time_limit.is_none(),
            _ => r.memory_limit_bytes.is_none(),
        })
        .count()
}

/// Fails when a required field is absent from more than half of the
/// records, which means the upstream layout changed.
pub fn check_drift(records: &[UpstreamProblem]) -> Result<BTreeMap<String, usize>, ExportError> {
    let total = records.len();
    let mut missing = BTreeMap::new();
    for field in REQUIRED_FIELDS {
        let n = missing_count(records, field);
        if n * 2 > total {
            return Err(ExportError::SchemaDrift {
                field,
                missing: n,
                total,
            });
        }
        if n > 0 {
            missing.insert(field.to_string(), n);
        }
    }
    Ok(missing)
}

/// The artifacts as typed rows, before they are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exported {
    pub problems: Vec<Problem>,
    pub solutions: Vec<Solution>,
    pub languages: Vec<Named>,
    pub sources: Vec<Named>,
    pub tags: Vec<Named>,
    pub tests: Vec<TestCase>,
}

/// Converts upstream records. Records without a name, records whose
/// parallel arrays differ in length and repeated names are dropped and
/// counted in `summary`.
pub fn convert(records: Vec<UpstreamProblem>, summary: &mut ExportSummary) -> Exported {
    let mut by_id: BTreeMap<String, UpstreamProblem> = BTreeMap::new();
    for record in records {
        let Some(name) = record.name.clone() else {
            summary.skipped_unnamed += 1;
            continue;
        };
        let misaligned = record.misaligned();
        if !misaligned.is_empty() {
            warn!(problem = %name, fields = ?misaligned, "skipped upstream record with misaligned arrays");
            summary.skipped_misaligned += 1;
            continue;
        }
        if by_id.contains_key(&name) {
            summary.skipped_duplicate += 1;
            continue;
        }
        by_id.insert(name, record);
    }
    if summary.skipped_unnamed > 0 {
        warn!(records = summary.skipped_unnamed, "skipped upstream records without a name");
    }
    if summary.skipped_duplicate > 0 {
        warn!(records = summary.skipped_duplicate, "skipped upstream records with a repeated name");
    }

    let tag_names: BTreeSet<&str> = by_id
        .values()
        .flat_map(|r| r.cf_tags.iter().map(String::as_str))
        .filter(|t| !t.is_empty())
        .collect();
    let tag_ids: BTreeMap<&str, i64> = tag_names.iter().enumerate().map(|(i, t)| (*t, i as i64)).collect();

    let mut out = Exported {
        languages: language_table(),
        sources: source_table(),
        tags: tag_ids
            .iter()
            .map(|(name, id)| Named {
                id: *id,
                name: name.to_string(),
            })
            .collect(),
        ..Exported::default()
    };

    for (id, r) in &by_id {
        let mut tags: Vec<i64> = r.cf_tags.iter().filter_map(|t| tag_ids.get(t.as_str()).copied()).collect();
        tags.sort_unstable();
        tags.dedup();
        out.problems.push(Problem {
            id: id.clone(),
            description: r.description.clone().unwrap_or_default(),
            difficulty: r.difficulty,
            time_limit: r.time_limit.map(|t| t.as_secs_f64()),
            memory_limit_bytes: r.memory_limit_bytes,
            source: r.source.unwrap_or(0),
            tags,
            cf_rating: r.cf_rating.filter(|&x| x != 0),
        });

        let submissions = [
            (&r.solutions, Verdict::Correct),
            (&r.incorrect_solutions, Verdict::Incorrect),
        ];
        let mut ordinal = 0;
        for (subs, verdict) in submissions {
            for (language, solution) in subs.language.iter().zip(&subs.solution) {
                out.solutions.push(Solution {
                    problem_id: id.clone(),
                    ordinal,
                    language: *language,
                    solution: solution.clone(),
                    verdict,
                });
                ordinal += 1;
            }
        }

        let tests = [
            ("public", &r.public_tests),
            ("private", &r.private_tests),
            ("generated", &r.generated_tests),
        ];
        for (kind, t) in tests {
            for (idx, (input, output)) in t.input.iter().zip(&t.output).enumerate() {
                out.tests.push(TestCase {
                    problem_id: id.clone(),
                    idx: idx as i64,
                    kind: kind.to_string(),
                    input: input.clone(),
                    output: output.clone(),
                });
            }
        }
    }
    out
}

fn write_err(artifact: &str, e: impl std::fmt::Display) -> ExportError {
    ExportError::Write {
        artifact: artifact.to_string(),
        message: e.to_string(),
    }
}

fn write_jsonl<T: Serialize>(dir: &Path, artifact: &str, items: &[T]) -> Result<usize, ExportError> {
    let file = File::create(dir.join(artifact)).map_err(|e| write_err(artifact, e))?;
    let mut w = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut w, item).map_err(|e| write_err(artifact, e))?;
        w.write_all(b"\n").map_err(|e| write_err(artifact, e))?;
    }
    w.flush().map_err(|e| write_err(artifact, e))?;
    Ok(items.len())
}

fn write_table<T: Record>(dir: &Path, artifact: &str, items: &[T]) -> Result<usize, ExportError> {
    let file = File::create(dir.join(artifact)).map_err(|e| write_err(artifact, e))?;
    let rows: Vec<_> = items.iter().map(Record::to_row).collect();
    write_csv(BufWriter::new(file), &T::schema(), &rows).map_err(|e| write_err(artifact, e))?;
    Ok(items.len())
}

/// Writes the six artifacts into `dir`, replacing earlier output.
pub fn write_artifacts(dir: &Path, exported: &Exported) -> Result<BTreeMap<String, usize>, ExportError> {
    fs::create_dir_all(dir).map_err(|e| write_err(&dir.display().to_string(), e))?;
    let mut rows = BTreeMap::new();
    rows.insert(storage::PROBLEMS.to_string(), write_jsonl(dir, storage::PROBLEMS, &exported.problems)?);
    rows.insert(storage::SOLUTIONS.to_string(), write_jsonl(dir, storage::SOLUTIONS, &exported.solutions)?);
    rows.insert(storage::LANGUAGES.to_string(), write_table(dir, storage::LANGUAGES, &exported.languages)?);
    rows.insert(storage::SOURCES.to_string(), write_table(dir, storage::SOURCES, &exported.sources)?);
    rows.insert(storage::TAGS.to_string(), write_table(dir, storage::TAGS, &exported.tags)?);
    rows.insert(storage::PROBLEM_TESTS.to_string(), write_table(dir, storage::PROBLEM_TESTS, &exported.tests)?);
    Ok(rows)
}

/// Reads every upstream file matching `pattern` and writes the artifacts
/// into `output`.
pub fn export(pattern: &str, output: &Path) -> Result<ExportSummary, ExportError> {
    let mut files: Vec<PathBuf> = glob(pattern)
        .map_err(|e| ExportError::Unreachable(format!("{pattern}: {e}")))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(ExportError::Unreachable(format!("no files match `{pattern}`")));
    }

    let per_file = files
        .par_iter()
        .map(|f| upstream::read_file(f))
        .collect::<Result<Vec<_>, _>>()?;
    let records: Vec<UpstreamProblem> = per_file.into_iter().flatten().collect();
    info!(files = files.len(), records = records.len(), "read upstream dataset");

    let missing = check_drift(&records)?;
    for (field, n) in &missing {
        warn!(field = %field, records = n, "upstream records missing a required field");
    }
    let mut summary = ExportSummary {
        files: files.len(),
        records: records.len(),
        missing,
        ..ExportSummary::default()
    };
    let exported = convert(records, &mut summary);
    summary.rows = write_artifacts(output, &exported)?;
    info!(dir = %output.display(), rows = ?summary.rows, "exported artifacts");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: Option<&str>, tags: &[&str], rating: i64) -> UpstreamProblem {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "description": "d",
            "source": 2,
            "difficulty": 7,
            "cf_rating": rating,
            "cf_tags": tags,
            "time_limit": {"seconds": 2},
            "memory_limit_bytes": 256000000,
            "solutions": {"language": [2, 3], "solution": ["a", "b"]},
            "incorrect_solutions": {"language": [4], "solution": ["c"]},
            "public_tests": {"input": ["1\n"], "output": ["2\n"]},
        }))
        .unwrap()
    }

    #[test]
    fn converts_ids_ratings_and_ordinals() {
        let mut summary = ExportSummary::default();
        let out = convert(
            vec![
                record(Some("B"), &["math", "greedy"], 0),
                record(Some("A"), &["greedy"], 1200),
                record(None, &[], 0),
                record(Some("A"), &[], 0),
            ],
            &mut summary,
        );
        assert_eq!(summary.skipped_unnamed, 1);
        assert_eq!(summary.skipped_duplicate, 1);
        let ids: Vec<_> = out.problems.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(out.problems[0].cf_rating, Some(1200));
        assert_eq!(out.problems[1].cf_rating, None);
        assert_eq!(out.problems[1].tags, vec![0, 1]);
        assert_eq!(out.problems[0].time_limit, Some(2.0));
        assert_eq!(out.tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["greedy", "math"]);

        let b: Vec<_> = out.solutions.iter().filter(|s| s.problem_id == "B").collect();
        assert_eq!(b.iter().map(|s| s.ordinal).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(b[2].verdict, Verdict::Incorrect);
        assert_eq!(out.tests.len(), 2);
    }

    #[test]
    fn misaligned_arrays_drop_the_record() {
        let mut short = record(Some("B"), &[], 1500);
        short.solutions.language.push(4);
        let mut untested = record(Some("C"), &[], 1500);
        untested.public_tests.input.push("3\n".to_string());
        assert_eq!(short.misaligned(), vec!["solutions"]);
        assert_eq!(untested.misaligned(), vec!["public_tests"]);

        let mut summary = ExportSummary::default();
        let out = convert(vec![record(Some("A"), &[], 0), short, untested], &mut summary);
        assert_eq!(summary.skipped_misaligned, 2);
        assert_eq!(out.problems.len(), 1);
        assert!(out.solutions.iter().all(|s| s.problem_id == "A"));
        assert!(out.tests.iter().all(|t| t.problem_id == "A"));
    }

    #[test]
    fn majority_missing_field_is_drift() {
        let mut records = vec![record(Some("A"), &[], 0), record(Some("B"), &[], 0), record(Some("C"), &[], 0)];
        records[0].time_limit = None;
        assert_eq!(check_drift(&records).unwrap()["time_limit"], 1);
        records[1].time_limit = None;
        assert!(matches!(
            check_drift(&records),
            Err(ExportError::SchemaDrift {
                field: "time_limit",
                missing: 2,
                total: 3
            })
        ));
    }

    #[test]
    fn unmatched_glob_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.jsonl", dir.path().display());
        assert!(matches!(
            export(&pattern, &dir.path().join("out")),
            Err(ExportError::Unreachable(_))
        ));
    }

    #[test]
    fn export_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("train.jsonl");
        let lines: Vec<String> = ["X", "Y"]
            .iter()
            .map(|n| {
                let mut v = serde_json::json!({
                    "name": n, "description": "d", "source": 2, "difficulty": 8,
                    "cf_rating": 900, "cf_tags": ["dp"], "time_limit": {"seconds": 1},
                    "memory_limit_bytes": 1000,
                });
                v["solutions"] = serde_json::json!({"language": [2], "solution": ["s"]});
                v.to_string()
            })
            .collect();
        fs::write(&input, lines.join("\n")).unwrap();

        let out = dir.path().join("out");
        let summary = export(&format!("{}/*.jsonl", dir.path().display()), &out).unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.rows[storage::SOLUTIONS], 2);
        for artifact in storage::ARTIFACTS {
            assert!(out.join(artifact).exists(), "{artifact}");
        }
        let again = export(&format!("{}/*.jsonl", dir.path().display()), &out).unwrap();
        assert_eq!(again, summary);
    }
}
