//! Rating prediction over the `problems` table.
//!
//! Labeled rows with a complete [`FeatureVector`] are split with a seeded
//! shuffle, a [`DecisionTreeRegressor`] is fitted on the training side and
//! scored on the held-out side against a predict-the-mean baseline. The
//! fitted model then fills in null ratings of an augmented copy of the
//! rows; the input rows are never modified.

use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{BandConfig, PipelineConfig, PredictConfig, SplitConfig, TreeConfig};
use crate::engine::{col, lit, when, Expr};
use crate::error::{ConfigError, PredictionError, TrainingError};
use crate::model::Problem;

pub mod metrics;
pub mod tree;

pub use metrics::{r2_score, Evaluation};
pub use tree::{DecisionTreeRegressor, Node, TreeModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DifficultyBand {
    Easy,
    Medium,
    Hard,
}

impl DifficultyBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyBand::Easy => "Easy",
            DifficultyBand::Medium => "Medium",
            DifficultyBand::Hard => "Hard",
        }
    }
}

impl fmt::Display for DifficultyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of problems per band. Problems without a difficulty are counted
/// in `unbanded`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BandCounts {
    pub easy: usize,
    pub medium: usize,
    pub hard: usize,
    pub unbanded: usize,
}

impl BandCounts {
    pub fn banded(&self) -> usize {
        self.easy + self.medium + self.hard
    }
}

/// Thresholds from [`BandConfig`]: below `easy_below` is Easy, from
/// `hard_from` on is Hard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyBands {
    easy_below: i64,
    hard_from: i64,
}

impl DifficultyBands {
    pub fn new(config: BandConfig) -> Result<Self, ConfigError> {
        if config.easy_below > config.hard_from {
            return Err(ConfigError::Invalid {
                section: "bands",
                message: format!(
                    "easy_below ({}) is above hard_from ({})",
                    config.easy_below, config.hard_from
                ),
            });
        }
        Ok(Self {
            easy_below: config.easy_below,
            hard_from: config.hard_from,
        })
    }

    pub fn band(&self, difficulty: i64) -> DifficultyBand {
        if difficulty < self.easy_below {
            DifficultyBand::Easy
        } else if difficulty >= self.hard_from {
            DifficultyBand::Hard
        } else {
            DifficultyBand::Medium
        }
    }

    pub fn band_of(&self, problem: &Problem) -> Option<DifficultyBand> {
        problem.difficulty.map(|d| self.band(d))
    }

    pub fn band_counts<'a>(&self, problems: impl IntoIterator<Item = &'a Problem>) -> BandCounts {
        let mut counts = BandCounts::default();
        for p in problems {
            match self.band_of(p) {
                Some(DifficultyBand::Easy) => counts.easy += 1,
                Some(DifficultyBand::Medium) => counts.medium += 1,
                Some(DifficultyBand::Hard) => counts.hard += 1,
                None => counts.unbanded += 1,
            }
        }
        counts
    }

    /// The band of `column` as an engine expression; null for a null
    /// difficulty.
    pub fn to_expr(&self, column: &str) -> Expr {
        when(col(column).lt(lit(self.easy_below)), lit("Easy"))
            .when(col(column).gt_eq(lit(self.hard_from)), lit("Hard"))
            .when(col(column).is_not_null(), lit("Medium"))
            .end()
    }

    /// The band of `column` as a SQL `CASE` expression.
    pub fn to_sql(&self, column: &str) -> String {
        format!(
            "CASE WHEN {column} < {} THEN 'Easy' WHEN {column} >= {} THEN 'Hard' \
             WHEN {column} IS NOT NULL THEN 'Medium' END",
            self.easy_below, self.hard_from
        )
    }
}

/// Feature names in vector order.
pub const FEATURES: [&str; 3] = ["difficulty", "time_limit", "memory_limit_bytes"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector(pub [f64; 3]);

impl FeatureVector {
    pub fn from_problem(problem: &Problem) -> Result<Self, PredictionError> {
        let values = [
            problem.difficulty.map(|d| d as f64),
            problem.time_limit,
            problem.memory_limit_bytes.map(|m| m as f64),
        ];
        let missing: Vec<&'static str> = FEATURES
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(PredictionError::IncompleteFeatures {
                problem_id: problem.id.clone(),
                missing,
            });
        }
        Ok(Self(values.map(|v| v.unwrap_or_default())))
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }
}

/// Feature rows and their targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub ids: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl Dataset {
    /// Rows with a rating and a complete feature vector, in id order.
    pub fn labeled(problems: &[Problem]) -> Self {
        let mut rows: Vec<(&Problem, FeatureVector, i64)> = problems
            .iter()
            .filter_map(|p| {
                let rating = p.cf_rating?;
                let features = FeatureVector::from_problem(p).ok()?;
                Some((p, features, rating))
            })
            .collect();
        rows.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        let mut data = Dataset::default();
        for (p, features, rating) in rows {
            data.ids.push(p.id.clone());
            data.features.push(features.to_vec());
            data.targets.push(rating as f64);
        }
        data
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn subset(&self, rows: &[usize]) -> Self {
        Self {
            ids: rows.iter().map(|&i| self.ids[i].clone()).collect(),
            features: rows.iter().map(|&i| self.features[i].clone()).collect(),
            targets: rows.iter().map(|&i| self.targets[i]).collect(),
        }
    }

    /// Shuffles with `config.seed` and cuts at `train_ratio`. Fails when
    /// either side would be empty.
    pub fn split(&self, config: &SplitConfig) -> Result<(Self, Self), TrainingError> {
        if !(config.train_ratio > 0.0 && config.train_ratio < 1.0) {
            return Err(TrainingError::Config(format!(
                "split.train_ratio must be in (0, 1), got {}",
                config.train_ratio
            )));
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        let mut rng = StdRng::seed_from_u64(config.seed);
        order.shuffle(&mut rng);
        let cut = (self.len() as f64 * config.train_ratio).round() as usize;
        let empty = |side| TrainingError::EmptySplit {
            ratio: config.train_ratio,
            side,
            rows: self.len(),
        };
        if cut == 0 {
            return Err(empty("training"));
        }
        if cut >= self.len() {
            return Err(empty("evaluation"));
        }
        Ok((self.subset(&order[..cut]), self.subset(&order[cut..])))
    }
}

/// A fitted model and its held-out scores.
#[derive(Debug, Clone, PartialEq)]
pub struct Trained {
    pub model: TreeModel,
    pub evaluation: Evaluation,
}

/// One row of the augmented `problems` copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugmentedProblem {
    #[serde(flatten)]
    pub problem: Problem,
    /// Whether `problem.cf_rating` was filled in by the model.
    pub imputed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Imputation {
    pub rows: Vec<AugmentedProblem>,
    pub imputed: usize,
    /// Unlabeled rows that could not be scored.
    pub skipped: Vec<PredictionError>,
}

/// Fills null ratings with `model` predictions, rounded to the nearest
/// integer. Present ratings are copied unchanged.
pub fn impute(problems: &[Problem], model: &TreeModel) -> Result<Imputation, PredictionError> {
    if model.feature_order.len() != FEATURES.len() {
        return Err(PredictionError::FeatureArity {
            expected: model.feature_order.len(),
            found: FEATURES.len(),
        });
    }
    let mut out = Imputation {
        rows: Vec::with_capacity(problems.len()),
        ..Imputation::default()
    };
    for p in problems {
        let mut row = AugmentedProblem {
            problem: p.clone(),
            imputed: false,
        };
        if p.cf_rating.is_none() {
            match FeatureVector::from_problem(p) {
                Ok(features) => {
                    let rating = model.predict(&features.0)?;
                    row.problem.cf_rating = Some(rating.round() as i64);
                    row.imputed = true;
                    out.imputed += 1;
                }
                Err(e) => {
                    debug!(error = %e, "not imputed");
                    out.skipped.push(e);
                }
            }
        }
        out.rows.push(row);
    }
    if !out.skipped.is_empty() {
        warn!(
            skipped = out.skipped.len(),
            "unlabeled problems without complete features were not imputed"
        );
    }
    info!(imputed = out.imputed, rows = out.rows.len(), "imputed ratings");
    Ok(out)
}

/// Trains and evaluates the rating model with one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingPredictor {
    pub split: SplitConfig,
    pub tree: TreeConfig,
    pub predict: PredictConfig,
}

impl From<&PipelineConfig> for RatingPredictor {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            split: config.split,
            tree: config.tree,
            predict: config.predict,
        }
    }
}

impl RatingPredictor {
    pub fn train(&self, problems: &[Problem]) -> Result<Trained, TrainingError> {
        let data = Dataset::labeled(problems);
        let required = self.predict.min_training_rows.max(2);
        if data.len() < required {
            return Err(TrainingError::InsufficientData {
                available: data.len(),
                required,
            });
        }
        let (train, test) = data.split(&self.split)?;
        let model = DecisionTreeRegressor::new(self.tree).fit(&FEATURES, &train.features, &train.targets)?;
        let predictions = model
            .predict_many(&test.features)
            .map_err(|e| TrainingError::Config(e.to_string()))?;
        let evaluation = Evaluation::new(&train.targets, &test.targets, &predictions);
        info!(
            train = evaluation.train_rows,
            test = evaluation.test_rows,
            r2 = evaluation.r2,
            baseline_r2 = evaluation.baseline_r2,
            "trained rating model"
        );
        Ok(Trained { model, evaluation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(id: &str, difficulty: Option<i64>, rating: Option<i64>) -> Problem {
        Problem {
            id: id.into(),
            description: String::new(),
            difficulty,
            time_limit: Some(2.0),
            memory_limit_bytes: Some(256 << 20),
            source: 2,
            tags: vec![],
            cf_rating: rating,
        }
    }

    fn learnable(n: usize) -> Vec<Problem> {
        (0..n)
            .map(|i| {
                let d = 7 + (i % 10) as i64;
                problem(&format!("p{i:04}"), Some(d), Some(800 + 100 * d))
            })
            .collect()
    }

    #[test]
    fn bands_are_monotonic() {
        let bands = DifficultyBands::new(BandConfig::default()).unwrap();
        let seq: Vec<_> = (0..20).map(|d| bands.band(d)).collect();
        assert!(seq.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(bands.band(6), DifficultyBand::Easy);
        assert_eq!(bands.band(7), DifficultyBand::Medium);
        assert_eq!(bands.band(11), DifficultyBand::Hard);
        assert!(matches!(
            DifficultyBands::new(BandConfig {
                easy_below: 12,
                hard_from: 11
            }),
            Err(ConfigError::Invalid { section: "bands", .. })
        ));
    }

    #[test]
    fn band_counts_leave_null_difficulty_unbanded() {
        let bands = DifficultyBands::new(BandConfig::default()).unwrap();
        let ps = vec![
            problem("a", Some(1), None),
            problem("b", Some(8), None),
            problem("c", Some(12), None),
            problem("d", None, None),
        ];
        let counts = bands.band_counts(&ps);
        assert_eq!((counts.easy, counts.medium, counts.hard, counts.unbanded), (1, 1, 1, 1));
        assert_eq!(counts.banded(), 3);
    }

    #[test]
    fn missing_features_are_named() {
        let mut p = problem("x", None, None);
        p.time_limit = None;
        assert_eq!(
            FeatureVector::from_problem(&p),
            Err(PredictionError::IncompleteFeatures {
                problem_id: "x".into(),
                missing: vec!["difficulty", "time_limit"],
            })
        );
    }

    #[test]
    fn split_is_seeded() {
        let data = Dataset::labeled(&learnable(50));
        let config = SplitConfig::default();
        let (a, b) = data.split(&config).unwrap();
        assert_eq!((a.len(), b.len()), (40, 10));
        assert_eq!(data.split(&config).unwrap().0, a);
        let other = data.split(&SplitConfig { seed: 7, ..config }).unwrap().0;
        assert_ne!(other.ids, a.ids);

        let tiny = Dataset::labeled(&learnable(2));
        assert!(matches!(
            tiny.split(&SplitConfig {
                train_ratio: 0.99,
                ..config
            }),
            Err(TrainingError::EmptySplit { side: "evaluation", .. })
        ));
    }

    #[test]
    fn too_few_labeled_rows_fail_training() {
        let mut ps = learnable(12);
        for p in ps.iter_mut().skip(5) {
            p.cf_rating = None;
        }
        let predictor = RatingPredictor::from(&PipelineConfig::default());
        assert_eq!(
            predictor.train(&ps),
            Err(TrainingError::InsufficientData {
                available: 5,
                required: 10
            })
        );
    }

    #[test]
    fn training_beats_the_mean_and_imputation_keeps_labels() {
        let mut ps = learnable(100);
        ps.push(problem("u1", Some(9), None));
        ps.push(problem("u2", None, None));
        let predictor = RatingPredictor::from(&PipelineConfig::default());
        let trained = predictor.train(&ps).unwrap();
        assert!(trained.evaluation.r2 <= 1.0);
        assert!(trained.evaluation.beats_baseline());
        assert_eq!(predictor.train(&ps).unwrap(), trained);

        let out = impute(&ps, &trained.model).unwrap();
        assert_eq!(out.imputed, 1);
        assert_eq!(out.skipped.len(), 1);
        for (before, after) in ps.iter().zip(&out.rows) {
            if before.cf_rating.is_some() {
                assert_eq!(after.problem.cf_rating, before.cf_rating);
                assert!(!after.imputed);
            }
        }
        let u1 = out.rows.iter().find(|r| r.problem.id == "u1").unwrap();
        assert_eq!(u1.problem.cf_rating, Some(1700));
        assert!(ps.iter().any(|p| p.id == "u1" && p.cf_rating.is_none()));
    }

    #[test]
    fn model_with_other_features_is_rejected_before_imputing() {
        let model = TreeModel {
            feature_order: vec!["difficulty".into(), "time_limit".into()],
            max_depth: 0,
            root: Node::Leaf {
                value: 1500.0,
                samples: 1,
            },
        };
        let err = impute(&[problem("u1", Some(9), None)], &model).unwrap_err();
        assert_eq!(err, PredictionError::FeatureArity { expected: 2, found: 3 });
        assert_eq!(err.to_string(), "prediction: model expects 2 features, got 3");
    }
}
