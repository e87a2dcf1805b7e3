//! Records of the upstream code-contests dump, one JSON object per line.
//!
//! Every field is optional here; presence is checked by the exporter so
//! that a missing field can be counted instead of failing the whole file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::error::ExportError;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpstreamProblem {
    pub name: Option<String>,
    pub description: Option<String>,
    pub source: Option<i64>,
    pub difficulty: Option<i64>,
    /// 0 when the problem is unrated.
    pub cf_rating: Option<i64>,
    #[serde(default)]
    pub cf_tags: Vec<String>,
    pub time_limit: Option<Duration>,
    pub memory_limit_bytes: Option<i64>,
    #[serde(default)]
    pub solutions: Submissions,
    #[serde(default)]
    pub incorrect_solutions: Submissions,
    #[serde(default)]
    pub public_tests: Tests,
    #[serde(default)]
    pub private_tests: Tests,
    #[serde(default)]
    pub generated_tests: Tests,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Duration {
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub nanos: i64,
}

impl UpstreamProblem {
    /// Names of the parallel arrays whose lengths disagree.
    pub fn misaligned(&self) -> Vec<&'static str> {
        let submissions = [
            ("solutions", &self.solutions),
            ("incorrect_solutions", &self.incorrect_solutions),
        ];
        let tests = [
            ("public_tests", &self.public_tests),
            ("private_tests", &self.private_tests),
            ("generated_tests", &self.generated_tests),
        ];
        submissions
            .into_iter()
            .filter(|(_, s)| s.language.len() != s.solution.len())
            .map(|(name, _)| name)
            .chain(
                tests
                    .into_iter()
                    .filter(|(_, t)| t.input.len() != t.output.len())
                    .map(|(name, _)| name),
            )
            .collect()
    }
}

impl Duration {
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanos as f64 / 1e9
    }
}

/// Parallel arrays, `language[i]` is the language of `solution[i]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Submissions {
    #[serde(default)]
    pub language: Vec<i64>,
    #[serde(default)]
    pub solution: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Tests {
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

/// Reads every record of one upstream file.
pub fn read_file(path: &Path) -> Result<Vec<UpstreamProblem>, ExportError> {
    let shown = path.display().to_string();
    let file = File::open(path).map_err(|source| ExportError::Read {
        path: shown.clone(),
        source,
    })?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| ExportError::Read {
            path: shown.clone(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| ExportError::Malformed {
            path: shown.clone(),
            line: i + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_record_deserializes() {
        let p: UpstreamProblem = serde_json::from_str(
            r#"{"name":"1A. Theatre Square","time_limit":{"seconds":1,"nanos":500000000},
                "solutions":{"language":[2],"solution":["int main(){}"]}}"#,
        )
        .unwrap();
        assert_eq!(p.time_limit.map(|t| t.as_secs_f64()), Some(1.5));
        assert_eq!(p.solutions.language, vec![2]);
        assert!(p.description.is_none());
        assert!(p.public_tests.input.is_empty());
    }
}
