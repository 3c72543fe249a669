use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::TrainingError, metrics::EvaluationResult};

/// Held-out metric that decides the winning candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMetric {
    /// Support-weighted F1.
    #[default]
    WeightedF1,
    /// Plain accuracy.
    Accuracy,
    /// Support-weighted recall.
    WeightedRecall,
    /// Support-weighted precision.
    WeightedPrecision,
}

impl SelectionMetric {
    /// Reads the metric from an evaluation.
    #[must_use]
    pub const fn score(self, result: &EvaluationResult) -> f64 {
        match self {
            Self::WeightedF1 => result.weighted_f1,
            Self::Accuracy => result.accuracy,
            Self::WeightedRecall => result.weighted_recall,
            Self::WeightedPrecision => result.weighted_precision,
        }
    }
}

impl fmt::Display for SelectionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WeightedF1 => "weighted_f1",
            Self::Accuracy => "accuracy",
            Self::WeightedRecall => "weighted_recall",
            Self::WeightedPrecision => "weighted_precision",
        })
    }
}

/// Index of the best result. Only a strictly greater score replaces the
/// incumbent, so the earliest registered candidate wins ties.
pub fn select_best(
    results: &[EvaluationResult],
    metric: SelectionMetric,
) -> Result<usize, TrainingError> {
    let mut scores = results.iter().map(|result| metric.score(result)).enumerate();
    let (mut best, mut best_score) = scores.next().ok_or(TrainingError::NoCandidates)?;
    for (idx, score) in scores {
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    Ok(best)
}
