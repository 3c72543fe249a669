use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    codec::LabelCodec,
    dataset::ClassShare,
    metrics::EvaluationResult,
    selection::SelectionMetric,
    training::{CandidateFit, CrossValidationResult, FitDiagnostic},
};

/// Recall and precision of one class on the held-out split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassBreakdown {
    /// Hits over true count.
    pub recall: f64,
    /// Hits over predicted count.
    pub precision: f64,
    /// True count in the test split.
    pub support: usize,
}

/// Everything measured for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    /// Candidate name.
    pub name: String,
    /// Whether the candidate reports probabilities.
    pub supports_probability: bool,
    /// Accuracy on the training partition.
    pub train_accuracy: f64,
    /// Cross-validation scores.
    pub cross_validation: CrossValidationResult,
    /// Over/underfit verdict.
    pub diagnostic: FitDiagnostic,
    /// Held-out evaluation.
    pub test: EvaluationResult,
    /// Held-out recall and precision keyed by class label.
    pub per_class: IndexMap<String, ClassBreakdown>,
}

impl CandidateReport {
    /// Combines a fit with its held-out evaluation.
    #[must_use]
    pub fn new(fit: &CandidateFit, test: EvaluationResult, codec: &LabelCodec) -> Self {
        let per_class = codec
            .classes()
            .iter()
            .zip(&test.per_class)
            .map(|(label, metrics)| {
                (
                    label.clone(),
                    ClassBreakdown {
                        recall: metrics.recall,
                        precision: metrics.precision,
                        support: metrics.support,
                    },
                )
            })
            .collect();
        Self {
            name: fit.model.name.clone(),
            supports_probability: fit.model.supports_probability,
            train_accuracy: fit.train_accuracy,
            cross_validation: fit.cross_validation.clone(),
            diagnostic: fit.diagnostic,
            test,
            per_class,
        }
    }

    /// One line per candidate.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{:<20} train={:.4} cv={:.4}±{:.4} test_acc={:.4} test_f1={:.4} [{}]",
            self.name,
            self.train_accuracy,
            self.cross_validation.mean_accuracy,
            self.cross_validation.std_accuracy,
            self.test.accuracy,
            self.test.weighted_f1,
            self.diagnostic
        )
    }
}

/// Report written next to the bundle as `training_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Bundle the report belongs to.
    pub bundle_id: Uuid,
    /// When the run finished.
    pub generated_at: DateTime<Utc>,
    /// Dataset rows.
    pub rows: usize,
    /// Training partition size.
    pub train_size: usize,
    /// Held-out partition size.
    pub test_size: usize,
    /// Codec classes.
    pub classes: Vec<String>,
    /// Label counts and percentages of the full dataset.
    pub class_distribution: IndexMap<String, ClassShare>,
    /// Metric used for selection.
    pub selection_metric: SelectionMetric,
    /// Threshold used by the fit diagnostic.
    pub fit_gap_threshold: f64,
    /// Name of the winning candidate.
    pub selected: String,
    /// Candidates in registry order.
    pub candidates: Vec<CandidateReport>,
    /// Importances of the winner, when it is a tree ensemble.
    pub feature_importances: Option<IndexMap<String, f64>>,
}

impl TrainingReport {
    /// File name used inside a bundle directory.
    pub const FILE_NAME: &'static str = "training_report.json";

    /// Multi-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "[lexi] rows={} train={} test={} classes={}",
            self.rows,
            self.train_size,
            self.test_size,
            self.classes.join("/")
        )];
        lines.extend(self.candidates.iter().map(CandidateReport::summary));
        lines.push(format!(
            "[lexi] selected={} by {} (bundle {})",
            self.selected, self.selection_metric, self.bundle_id
        ));
        lines.join("\n")
    }

    /// Writes pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let payload = serde_json::to_string_pretty(self)?;
        fs::write(path, payload).with_context(|| format!("writing {}", path.display()))
    }

    /// Reads a saved report.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}
