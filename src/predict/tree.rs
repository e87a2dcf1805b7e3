//! Depth-bounded regression tree (CART, variance reduction).
//!
//! Candidate thresholds per feature are computed once from the training
//! data: midpoints between distinct values when there are few of them,
//! otherwise up to `max_bins - 1` quantiles. A row goes left when
//! `x[feature] <= threshold`.

use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TreeConfig;
use crate::error::{PredictionError, TrainingError};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    Leaf {
        value: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        samples: usize,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn leaves(&self) -> usize {
        match self {
            Node::Leaf { .. } => 1,
            Node::Split { left, right, .. } => left.leaves() + right.leaves(),
        }
    }

    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => node = if x[*feature] <= *threshold { &**left } else { &**right },
            }
        }
    }
}

/// A trained tree with the names of the features it expects, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    pub feature_order: Vec<String>,
    pub max_depth: usize,
    pub root: Node,
}

impl TreeModel {
    pub fn predict(&self, x: &[f64]) -> Result<f64, PredictionError> {
        if x.len() != self.feature_order.len() {
            return Err(PredictionError::FeatureArity {
                expected: self.feature_order.len(),
                found: x.len(),
            });
        }
        Ok(self.root.predict(x))
    }

    pub fn predict_many(&self, xs: &[Vec<f64>]) -> Result<Vec<f64>, PredictionError> {
        xs.iter().map(|x| self.predict(x)).collect()
    }

    pub fn to_json(&self) -> Result<String, PredictionError> {
        serde_json::to_string_pretty(self).map_err(|e| PredictionError::Artifact(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, PredictionError> {
        serde_json::from_str(text).map_err(|e| PredictionError::Artifact(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), PredictionError> {
        std::fs::write(path, self.to_json()?).map_err(|e| PredictionError::Artifact(format!("{}: {e}", path.display())))
    }

    pub fn load(path: &Path) -> Result<Self, PredictionError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| PredictionError::Artifact(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionTreeRegressor {
    config: TreeConfig,
}

impl DecisionTreeRegressor {
    pub fn new(config: TreeConfig) -> Self {
        Self { config }
    }

    fn validate(&self) -> Result<(), TrainingError> {
        let c = &self.config;
        if c.max_bins < 2 {
            return Err(TrainingError::Config(format!("tree.max_bins must be at least 2, got {}", c.max_bins)));
        }
        if c.min_samples_leaf == 0 {
            return Err(TrainingError::Config("tree.min_samples_leaf must be positive".into()));
        }
        if c.min_samples_split < 2 {
            return Err(TrainingError::Config(format!(
                "tree.min_samples_split must be at least 2, got {}",
                c.min_samples_split
            )));
        }
        Ok(())
    }

    /// Fits a tree to `x -> y`. Identical input gives an identical tree.
    pub fn fit(&self, feature_order: &[&str], x: &[Vec<f64>], y: &[f64]) -> Result<TreeModel, TrainingError> {
        self.validate()?;
        if x.is_empty() || x.len() != y.len() {
            return Err(TrainingError::InsufficientData {
                available: x.len().min(y.len()),
                required: 1,
            });
        }
        if let Some(row) = x.iter().find(|r| r.len() != feature_order.len()) {
            return Err(TrainingError::Config(format!(
                "row has {} features, expected {}",
                row.len(),
                feature_order.len()
            )));
        }
        let thresholds: Vec<Vec<f64>> = (0..feature_order.len())
            .map(|f| candidate_thresholds(x.iter().map(|r| r[f]).collect(), self.config.max_bins))
            .collect();
        let root = self.grow(x, y, (0..x.len()).collect(), &thresholds, 0);
        debug!(depth = root.depth(), leaves = root.leaves(), rows = x.len(), "fitted regression tree");
        Ok(TreeModel {
            feature_order: feature_order.iter().map(|f| f.to_string()).collect(),
            max_depth: self.config.max_depth,
            root,
        })
    }

    fn grow(&self, x: &[Vec<f64>], y: &[f64], rows: Vec<usize>, thresholds: &[Vec<f64>], depth: usize) -> Node {
        let n = rows.len();
        let (sum, sumsq) = rows.iter().fold((0.0, 0.0), |(s, q), &i| (s + y[i], q + y[i] * y[i]));
        let value = sum / n as f64;
        let sse = sumsq - sum * sum / n as f64;
        let leaf = Node::Leaf { value, samples: n };
        if depth >= self.config.max_depth
            || n < self.config.min_samples_split
            || n < 2 * self.config.min_samples_leaf
            || sse <= MIN_GAIN
        {
            return leaf;
        }

        let per_feature: Vec<Option<Candidate>> = thresholds
            .par_iter()
            .enumerate()
            .map(|(f, ts)| self.best_threshold(x, y, &rows, f, ts, sse))
            .collect();
        // first strictly better candidate wins, so ties resolve by feature order
        let mut best: Option<Candidate> = None;
        for c in per_feature.into_iter().flatten() {
            if best.map_or(true, |b| c.gain > b.gain + MIN_GAIN) {
                best = Some(c);
            }
        }
        let Some(best) = best else {
            return leaf;
        };

        let (left, right): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&i| x[i][best.feature] <= best.threshold);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            samples: n,
            left: Box::new(self.grow(x, y, left, thresholds, depth + 1)),
            right: Box::new(self.grow(x, y, right, thresholds, depth + 1)),
        }
    }

    fn best_threshold(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        rows: &[usize],
        feature: usize,
        thresholds: &[f64],
        sse: f64,
    ) -> Option<Candidate> {
        let n = rows.len();
        let (total, total_sq) = rows.iter().fold((0.0, 0.0), |(s, q), &i| (s + y[i], q + y[i] * y[i]));
        let mut best: Option<Candidate> = None;
        for &t in thresholds {
            let (mut nl, mut sl, mut ql) = (0usize, 0.0, 0.0);
            for &i in rows {
                if x[i][feature] <= t {
                    nl += 1;
                    sl += y[i];
                    ql += y[i] * y[i];
                }
            }
            let nr = n - nl;
            if nl < self.config.min_samples_leaf || nr < self.config.min_samples_leaf {
                continue;
            }
            let (sr, qr) = (total - sl, total_sq - ql);
            let child = (ql - sl * sl / nl as f64) + (qr - sr * sr / nr as f64);
            let gain = sse - child;
            if gain > MIN_GAIN && best.map_or(true, |b| gain > b.gain + MIN_GAIN) {
                best = Some(Candidate {
                    feature,
                    threshold: t,
                    gain,
                });
            }
        }
        best
    }
}

/// Split points for one feature, ascending.
fn candidate_thresholds(mut values: Vec<f64>, max_bins: usize) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    let mut distinct = values.clone();
    distinct.dedup();
    if distinct.len() < 2 {
        return Vec::new();
    }
    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }
    let n = values.len();
    let max = distinct[distinct.len() - 1];
    let mut cuts: Vec<f64> = (1..max_bins).map(|k| values[k * n / max_bins]).filter(|&v| v < max).collect();
    cuts.dedup();
    cuts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y = x.iter().map(|r| if r[0] < 15.0 { 100.0 } else { 300.0 }).collect();
        (x, y)
    }

    #[test]
    fn quantile_thresholds_skip_the_maximum() {
        assert_eq!(candidate_thresholds(vec![3.0, 1.0, 2.0, 1.0], 32), vec![1.5, 2.5]);
        let cuts = candidate_thresholds((0..100).map(f64::from).collect(), 4);
        assert_eq!(cuts, vec![25.0, 50.0, 75.0]);
        assert!(candidate_thresholds(vec![7.0; 5], 4).is_empty());
    }

    #[test]
    fn learns_a_step_exactly() {
        let (x, y) = step_data();
        let model = DecisionTreeRegressor::new(TreeConfig::default())
            .fit(&["a", "b"], &x, &y)
            .unwrap();
        match &model.root {
            Node::Split { feature, threshold, .. } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 14.5);
            }
            leaf => panic!("expected a split, got {leaf:?}"),
        }
        assert_eq!(model.predict(&[3.0, 0.0]).unwrap(), 100.0);
        assert_eq!(model.predict(&[25.0, 2.0]).unwrap(), 300.0);
        assert_eq!(model.root.depth(), 1);
    }

    #[test]
    fn depth_is_bounded_and_fit_is_deterministic() {
        let x: Vec<Vec<f64>> = (0..200).map(|i| vec![(i * 7 % 200) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| (r[0] * 0.37).sin() * 50.0 + r[0]).collect();
        let config = TreeConfig {
            max_depth: 3,
            ..TreeConfig::default()
        };
        let a = DecisionTreeRegressor::new(config).fit(&["x"], &x, &y).unwrap();
        let b = DecisionTreeRegressor::new(config).fit(&["x"], &x, &y).unwrap();
        assert!(a.root.depth() <= 3);
        assert_eq!(a, b);
    }

    #[test]
    fn json_artifact_predicts_the_same() {
        let (x, y) = step_data();
        let model = DecisionTreeRegressor::default().fit(&["a", "b"], &x, &y).unwrap();
        let back = TreeModel::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(back.feature_order, vec!["a", "b"]);
        for row in &x {
            let (p, q) = (model.predict(row).unwrap(), back.predict(row).unwrap());
            assert!((p - q).abs() < 1e-9);
        }
        assert!(matches!(
            back.predict(&[1.0]),
            Err(PredictionError::FeatureArity { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TreeConfig {
            max_bins: 1,
            ..TreeConfig::default()
        };
        let (x, y) = step_data();
        assert!(matches!(
            DecisionTreeRegressor::new(config).fit(&["a", "b"], &x, &y),
            Err(TrainingError::Config(_))
        ));
    }
}
