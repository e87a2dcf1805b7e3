//! Records stored in the warehouse.

use serde::{Deserialize, Serialize};

/// One competitive-programming task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub description: String,
    pub difficulty: Option<i64>,
    /// Seconds.
    pub time_limit: Option<f64>,
    pub memory_limit_bytes: Option<i64>,
    pub source: i64,
    #[serde(default)]
    pub tags: Vec<i64>,
    /// Codeforces rating, the prediction target.
    pub cf_rating: Option<i64>,
}

/// One submitted solution, identified by `(problem_id, ordinal)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub problem_id: String,
    pub ordinal: i64,
    pub language: i64,
    pub solution: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Correct => "correct",
            Verdict::Incorrect => "incorrect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "correct" => Some(Verdict::Correct),
            "incorrect" => Some(Verdict::Incorrect),
            _ => None,
        }
    }
}

/// `id -> name` entry of the `languages`, `sources` and `tags` views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub problem_id: String,
    pub idx: i64,
    /// `public`, `private` or `generated`.
    pub kind: String,
    pub input: String,
    pub output: String,
}

/// Languages of the upstream dataset, in enum order.
pub const LANGUAGES: [&str; 5] = ["UNKNOWN_LANGUAGE", "PYTHON", "CPP", "PYTHON3", "JAVA"];

/// Source platforms of the upstream dataset, in enum order.
pub const SOURCES: [&str; 7] = [
    "UNKNOWN_SOURCE",
    "CODECHEF",
    "CODEFORCES",
    "HACKEREARTH",
    "CODEJAM",
    "ATCODER",
    "AIZU",
];

pub fn language_table() -> Vec<Named> {
    named_table(&LANGUAGES)
}

pub fn source_table() -> Vec<Named> {
    named_table(&SOURCES)
}

fn named_table(names: &[&str]) -> Vec<Named> {
    names
        .iter()
        .enumerate()
        .map(|(id, name)| Named {
            id: id as i64,
            name: name.to_string(),
        })
        .collect()
}
