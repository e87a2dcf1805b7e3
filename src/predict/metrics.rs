//! Regression metrics.

use serde::Serialize;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Coefficient of determination of `predicted` against `actual`.
///
/// When `actual` is constant the score is 1.0 for an exact fit and
/// negative infinity otherwise. Empty input gives NaN.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return f64::NAN;
    }
    let m = mean(actual);
    let ss_tot: f64 = actual.iter().map(|y| (y - m).powi(2)).sum();
    let ss_res: f64 = actual.iter().zip(predicted).map(|(y, p)| (y - p).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { f64::NEG_INFINITY };
    }
    1.0 - ss_res / ss_tot
}

/// Held-out scores of a model and of predicting the training mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub r2: f64,
    pub baseline_r2: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

impl Evaluation {
    pub fn new(train_targets: &[f64], test_targets: &[f64], predictions: &[f64]) -> Self {
        let train_mean = mean(train_targets);
        let baseline: Vec<f64> = vec![train_mean; test_targets.len()];
        Self {
            r2: r2_score(test_targets, predictions),
            baseline_r2: r2_score(test_targets, &baseline),
            train_rows: train_targets.len(),
            test_rows: test_targets.len(),
        }
    }

    pub fn beats_baseline(&self) -> bool {
        self.r2 > self.baseline_r2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r2_edges() {
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]), 0.0);
        assert_eq!(r2_score(&[5.0, 5.0], &[5.0, 5.0]), 1.0);
        assert_eq!(r2_score(&[5.0, 5.0], &[4.0, 5.0]), f64::NEG_INFINITY);
        assert!(r2_score(&[], &[]).is_nan());
    }

    #[test]
    fn baseline_uses_training_mean() {
        let eval = Evaluation::new(&[0.0, 10.0], &[4.0, 6.0], &[4.0, 6.0]);
        assert_eq!(eval.r2, 1.0);
        // train mean 5 is also the test mean
        assert_eq!(eval.baseline_r2, 0.0);
        assert!(eval.beats_baseline());
    }
}
