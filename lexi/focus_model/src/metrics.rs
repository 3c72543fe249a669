//! Confusion-matrix metrics for the held-out evaluation and the CV folds.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::models::FittedModel;

/// Counts indexed `[true, predicted]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Tallies paired true and predicted encoded labels.
    #[must_use]
    pub fn from_predictions(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Self {
        let mut counts = vec![vec![0; n_classes]; n_classes];
        for (truth, predicted) in y_true.iter().zip(y_pred) {
            counts[*truth][*predicted] += 1;
        }
        Self { counts }
    }

    /// Raw counts, rows are true classes.
    #[must_use]
    pub fn counts(&self) -> &[Vec<usize>] {
        &self.counts
    }

    /// Number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.counts.len()
    }

    /// Total samples tallied.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn row_sum(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    fn column_sum(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }

    /// Trace over total, 0 when empty.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.n_classes()).map(|class| self.counts[class][class]).sum();
        correct as f64 / total as f64
    }

    /// Per-class precision, recall, F1 and support.
    #[must_use]
    pub fn per_class(&self) -> Vec<ClassMetrics> {
        (0..self.n_classes())
            .map(|class| {
                let hits = self.counts[class][class] as f64;
                let support = self.row_sum(class);
                let predicted = self.column_sum(class);
                let recall = ratio(hits, support as f64);
                let precision = ratio(hits, predicted as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                ClassMetrics {
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect()
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Metrics of one class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Hits over predicted count.
    pub precision: f64,
    /// Hits over true count.
    pub recall: f64,
    /// Harmonic mean of the two.
    pub f1: f64,
    /// True count.
    pub support: usize,
}

/// Support-weighted averages plus the per-class breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Fraction correct.
    pub accuracy: f64,
    /// Support-weighted precision.
    pub weighted_precision: f64,
    /// Support-weighted recall.
    pub weighted_recall: f64,
    /// Support-weighted F1.
    pub weighted_f1: f64,
    /// Per-class metrics in codec order.
    pub per_class: Vec<ClassMetrics>,
    /// Source counts.
    pub confusion: ConfusionMatrix,
}

impl EvaluationResult {
    /// Derives every metric from `confusion`.
    #[must_use]
    pub fn from_confusion(confusion: ConfusionMatrix) -> Self {
        let per_class = confusion.per_class();
        let total_support: usize = per_class.iter().map(|metrics| metrics.support).sum();
        let weighted = |pick: fn(&ClassMetrics) -> f64| {
            let sum: f64 = per_class
                .iter()
                .map(|metrics| metrics.support as f64 * pick(metrics))
                .sum();
            ratio(sum, total_support as f64)
        };
        Self {
            accuracy: confusion.accuracy(),
            weighted_precision: weighted(|metrics| metrics.precision),
            weighted_recall: weighted(|metrics| metrics.recall),
            weighted_f1: weighted(|metrics| metrics.f1),
            per_class,
            confusion,
        }
    }
}

/// Scores `model` on scaled `x` against encoded `y`.
#[must_use]
pub fn evaluate(
    model: &FittedModel,
    x: &Array2<f64>,
    y: &[usize],
    n_classes: usize,
) -> EvaluationResult {
    let predictions = model.predict_labels(x);
    EvaluationResult::from_confusion(ConfusionMatrix::from_predictions(y, &predictions, n_classes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_class_metrics_follow_the_matrix() {
        let y_true = [0, 0, 0, 1, 1, 2];
        let y_pred = [0, 0, 1, 1, 0, 2];
        let confusion = ConfusionMatrix::from_predictions(&y_true, &y_pred, 3);
        assert_eq!(confusion.counts(), [vec![2, 1, 0], vec![1, 1, 0], vec![0, 0, 1]]);
        let metrics = confusion.per_class();
        assert!((metrics[0].recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics[0].precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics[1].recall - 0.5).abs() < 1e-12);
        assert_eq!(metrics[2].f1, 1.0);
        assert_eq!(metrics[1].support, 2);
        assert!((confusion.accuracy() - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn weighted_averages_use_support() {
        let y_true = [0, 0, 0, 1];
        let y_pred = [0, 0, 0, 0];
        let confusion = ConfusionMatrix::from_predictions(&y_true, &y_pred, 2);
        let result = EvaluationResult::from_confusion(confusion);
        assert!((result.weighted_recall - 0.75).abs() < 1e-12);
        assert!((result.weighted_precision - 0.5625).abs() < 1e-12);
        let f1_zero = 2.0 * 0.75 / 1.75;
        assert!((result.weighted_f1 - 0.75 * f1_zero).abs() < 1e-12);
    }

    #[test]
    fn degenerate_denominators_are_zero() {
        let confusion = ConfusionMatrix::from_predictions(&[], &[], 3);
        assert_eq!(confusion.accuracy(), 0.0);
        let result = EvaluationResult::from_confusion(confusion);
        assert_eq!(result.weighted_f1, 0.0);
        assert!(result.per_class.iter().all(|metrics| metrics.f1 == 0.0));
    }
}
