use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::DEFAULT_LABEL_COLUMN,
    models::{default_candidates, CandidateSpec},
    selection::SelectionMetric,
    split::{DEFAULT_SEED, DEFAULT_TEST_RATIO},
};

/// Default train-vs-CV accuracy gap beyond which a fit is flagged.
pub const DEFAULT_FIT_GAP_THRESHOLD: f64 = 0.05;
/// Default number of cross-validation folds.
pub const DEFAULT_CV_FOLDS: usize = 5;

/// Settings of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// CSV column holding the difficulty label.
    pub label_column: String,
    /// Held-out fraction.
    pub test_ratio: f64,
    /// Seed of the split and the folds.
    pub seed: u64,
    /// Cross-validation folds.
    pub cv_folds: usize,
    /// Over/underfit threshold on `train_acc - cv_mean`.
    pub fit_gap_threshold: f64,
    /// Held-out metric used to pick the winner.
    pub selection_metric: SelectionMetric,
    /// Train candidates on scoped threads.
    pub parallel_candidates: bool,
    /// Candidate registry, in tie-break order.
    pub candidates: Vec<CandidateSpec>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            test_ratio: DEFAULT_TEST_RATIO,
            seed: DEFAULT_SEED,
            cv_folds: DEFAULT_CV_FOLDS,
            fit_gap_threshold: DEFAULT_FIT_GAP_THRESHOLD,
            selection_metric: SelectionMetric::default(),
            parallel_candidates: false,
            candidates: default_candidates(),
        }
    }
}

impl TrainingConfig {
    /// Loads and validates a TOML configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading training config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            bail!("test_ratio must be in (0, 1), got {}", self.test_ratio);
        }
        if self.cv_folds < 2 {
            bail!("cv_folds must be at least 2, got {}", self.cv_folds);
        }
        if self.fit_gap_threshold.is_nan() || self.fit_gap_threshold < 0.0 {
            bail!("fit_gap_threshold must be non-negative");
        }
        if self.candidates.is_empty() {
            bail!("at least one candidate is required");
        }
        if self.label_column.trim().is_empty() {
            bail!("label_column must not be blank");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Algorithm;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TrainingConfig::from_toml("").unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert_eq!(config.candidates.len(), 5);
        assert_eq!(config.cv_folds, 5);
    }

    #[test]
    fn overrides_and_custom_registry() {
        let config = TrainingConfig::from_toml(
            r#"
            test_ratio = 0.25
            selection_metric = "accuracy"
            parallel_candidates = true

            [[candidates]]
            name = "KNN"
            algorithm = "k_nearest_neighbors"
            k = 3

            [[candidates]]
            name = "LR"
            algorithm = "logistic_regression"
            "#,
        )
        .unwrap();
        assert_eq!(config.test_ratio, 0.25);
        assert_eq!(config.selection_metric, SelectionMetric::Accuracy);
        assert_eq!(config.candidates.len(), 2);
        assert!(matches!(
            &config.candidates[0].algorithm,
            Algorithm::KNearestNeighbors(params) if params.k == 3
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(TrainingConfig::from_toml("test_ratio = 1.5").is_err());
        assert!(TrainingConfig::from_toml("cv_folds = 1").is_err());
        assert!(TrainingConfig::from_toml("candidates = []").is_err());
    }

    #[test]
    fn load_reports_path() {
        let err = TrainingConfig::load("/nonexistent/lexi.toml").unwrap_err();
        assert!(format!("{err:#}").contains("lexi.toml"));
    }
}
