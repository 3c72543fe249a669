//! Candidate training, cross-validation and the end-to-end training run.

use std::{fmt, path::Path, thread};

use anyhow::Context;
use chrono::Utc;
use indexmap::IndexMap;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    bundle::ArtifactBundle,
    codec::LabelCodec,
    config::TrainingConfig,
    dataset::Dataset,
    error::TrainingError,
    features::FEATURE_NAMES,
    metrics::{evaluate, EvaluationResult},
    models::{CandidateSpec, FittedModel},
    report::{CandidateReport, TrainingReport},
    scaler::StandardScaler,
    selection::select_best,
    split::{stratified_train_test_split, StratifiedKFold},
    telemetry::{log, FocusTelemetry},
};

/// Per-fold scores of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationResult {
    /// Validation accuracy per fold.
    pub fold_accuracy: Vec<f64>,
    /// Validation weighted F1 per fold.
    pub fold_f1: Vec<f64>,
    /// Mean fold accuracy.
    pub mean_accuracy: f64,
    /// Population standard deviation of fold accuracy.
    pub std_accuracy: f64,
    /// Mean fold weighted F1.
    pub mean_f1: f64,
    /// Population standard deviation of fold weighted F1.
    pub std_f1: f64,
}

impl CrossValidationResult {
    /// Aggregates fold scores.
    #[must_use]
    pub fn from_folds(fold_accuracy: Vec<f64>, fold_f1: Vec<f64>) -> Self {
        let (mean_accuracy, std_accuracy) = mean_and_std(&fold_accuracy);
        let (mean_f1, std_f1) = mean_and_std(&fold_f1);
        Self {
            fold_accuracy,
            fold_f1,
            mean_accuracy,
            std_accuracy,
            mean_f1,
            std_f1,
        }
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / count;
    (mean, variance.sqrt())
}

/// Advisory comparison of training accuracy against the CV mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitDiagnostic {
    /// Training accuracy exceeds CV accuracy by more than the threshold.
    Overfit,
    /// CV accuracy exceeds training accuracy by more than the threshold.
    Underfit,
    /// Within the threshold.
    Balanced,
}

impl FitDiagnostic {
    /// Classifies `train_accuracy - cv_mean` against `threshold`.
    #[must_use]
    pub fn classify(train_accuracy: f64, cv_mean: f64, threshold: f64) -> Self {
        let gap = train_accuracy - cv_mean;
        if gap > threshold {
            Self::Overfit
        } else if gap < -threshold {
            Self::Underfit
        } else {
            Self::Balanced
        }
    }

    const fn level(self) -> LogLevel {
        match self {
            Self::Balanced => LogLevel::Info,
            Self::Overfit | Self::Underfit => LogLevel::Warn,
        }
    }
}

impl fmt::Display for FitDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overfit => "overfit",
            Self::Underfit => "underfit",
            Self::Balanced => "balanced",
        })
    }
}

/// A candidate fit on the training partition, before held-out scoring.
#[derive(Debug, Clone)]
pub struct CandidateFit {
    /// Model fit on the full training partition.
    pub model: FittedModel,
    /// Accuracy of that model on its own training data.
    pub train_accuracy: f64,
    /// Cross-validation scores.
    pub cross_validation: CrossValidationResult,
    /// Over/underfit verdict.
    pub diagnostic: FitDiagnostic,
}

/// Fits candidates and cross-validates them on a scaled training partition.
#[derive(Debug, Clone, Copy)]
pub struct TrainingOrchestrator<'a> {
    config: &'a TrainingConfig,
    telemetry: Option<&'a FocusTelemetry>,
}

impl<'a> TrainingOrchestrator<'a> {
    /// Creates an orchestrator over `config`.
    #[must_use]
    pub const fn new(config: &'a TrainingConfig, telemetry: Option<&'a FocusTelemetry>) -> Self {
        Self { config, telemetry }
    }

    /// Fits `spec` on `(x, y)`, measures training accuracy, runs stratified
    /// k-fold CV with fresh fits, and classifies the gap.
    pub fn train_candidate(
        &self,
        spec: &CandidateSpec,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<CandidateFit, TrainingError> {
        let model = spec.fit(x, y, n_classes)?;
        let train_accuracy = evaluate(&model, x, y, n_classes).accuracy;
        log(
            self.telemetry,
            LogLevel::Info,
            "training.candidate_fitted",
            json!({ "candidate": spec.name, "train_accuracy": train_accuracy }),
        );

        let folds = StratifiedKFold::new(self.config.cv_folds, self.config.seed).split(y)?;
        let mut fold_accuracy = Vec::with_capacity(folds.len());
        let mut fold_f1 = Vec::with_capacity(folds.len());
        for fold in folds {
            let fold_x = x.select(Axis(0), &fold.train);
            let fold_y: Vec<usize> = fold.train.iter().map(|idx| y[*idx]).collect();
            let validation_x = x.select(Axis(0), &fold.validation);
            let validation_y: Vec<usize> = fold.validation.iter().map(|idx| y[*idx]).collect();
            let fold_model = spec.fit(&fold_x, &fold_y, n_classes)?;
            let scores = evaluate(&fold_model, &validation_x, &validation_y, n_classes);
            fold_accuracy.push(scores.accuracy);
            fold_f1.push(scores.weighted_f1);
        }
        let cross_validation = CrossValidationResult::from_folds(fold_accuracy, fold_f1);
        let diagnostic = FitDiagnostic::classify(
            train_accuracy,
            cross_validation.mean_accuracy,
            self.config.fit_gap_threshold,
        );
        log(
            self.telemetry,
            diagnostic.level(),
            "training.fit_diagnostic",
            json!({
                "candidate": spec.name,
                "diagnostic": diagnostic.to_string(),
                "train_accuracy": train_accuracy,
                "cv_mean_accuracy": cross_validation.mean_accuracy,
                "cv_std_accuracy": cross_validation.std_accuracy,
                "gap": train_accuracy - cross_validation.mean_accuracy,
            }),
        );
        Ok(CandidateFit {
            model,
            train_accuracy,
            cross_validation,
            diagnostic,
        })
    }

    /// Trains every configured candidate, in registry order. With
    /// `parallel_candidates` each candidate gets a scoped thread.
    pub fn train_all(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Vec<CandidateFit>, TrainingError> {
        if self.config.candidates.is_empty() {
            return Err(TrainingError::NoCandidates);
        }
        if !self.config.parallel_candidates {
            return self
                .config
                .candidates
                .iter()
                .map(|spec| self.train_candidate(spec, x, y, n_classes))
                .collect();
        }
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .config
                .candidates
                .iter()
                .map(|spec| {
                    let handle = scope.spawn(move || self.train_candidate(spec, x, y, n_classes));
                    (spec, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(spec, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(TrainingError::Fit {
                            name: spec.name.clone(),
                            reason: "training thread panicked".into(),
                        })
                    })
                })
                .collect()
        })
    }
}

/// Artefacts of a completed training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Metrics of every candidate and the selection.
    pub report: TrainingReport,
    /// Winning model with its scaler and codec.
    pub bundle: ArtifactBundle,
}

impl TrainingOutcome {
    /// Writes the bundle members and `training_report.json` into `dir`.
    pub fn persist(&self, dir: impl AsRef<Path>) -> anyhow::Result<()> {
        let dir = dir.as_ref();
        self.bundle.save(dir)?;
        self.report.save(dir.join(TrainingReport::FILE_NAME))?;
        Ok(())
    }
}

/// Dataset → split → scale → train/CV → evaluate → select.
#[derive(Debug, Clone, Default)]
pub struct TrainingPipeline {
    config: TrainingConfig,
    telemetry: Option<FocusTelemetry>,
}

impl TrainingPipeline {
    /// Creates a pipeline with `config`.
    #[must_use]
    pub const fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: FocusTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Persists `outcome` into `dir` and records where it went.
    pub fn persist(
        &self,
        outcome: &TrainingOutcome,
        dir: impl AsRef<Path>,
    ) -> anyhow::Result<()> {
        let dir = dir.as_ref();
        outcome
            .persist(dir)
            .with_context(|| format!("persisting bundle to {}", dir.display()))?;
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "bundle.persisted",
            json!({
                "bundle_id": outcome.bundle.bundle_id,
                "model": outcome.bundle.model.name,
                "dir": dir,
            }),
        );
        Ok(())
    }

    /// Loads a CSV with the configured label column and runs training.
    pub fn run_csv(&self, path: impl AsRef<Path>) -> anyhow::Result<TrainingOutcome> {
        let path = path.as_ref();
        let dataset = Dataset::from_csv_path(path, &self.config.label_column)
            .with_context(|| format!("loading dataset {}", path.display()))?;
        self.run(&dataset)
    }

    /// Runs training end to end on an in-memory dataset.
    pub fn run(&self, dataset: &Dataset) -> anyhow::Result<TrainingOutcome> {
        self.config.validate()?;
        let telemetry = self.telemetry.as_ref();
        let class_distribution = dataset.class_distribution();
        log(
            telemetry,
            LogLevel::Info,
            "dataset.loaded",
            json!({ "rows": dataset.len(), "class_distribution": class_distribution }),
        );

        let codec = LabelCodec::fit(&dataset.labels);
        if codec.len() < 2 {
            return Err(TrainingError::SingleClass(codec.classes().join(", ")).into());
        }
        let y = codec.encode_all(&dataset.labels)?;
        let split = stratified_train_test_split(&y, self.config.test_ratio, self.config.seed)?;
        log(
            telemetry,
            LogLevel::Info,
            "training.split",
            json!({
                "train": split.train.len(),
                "test": split.test.len(),
                "seed": self.config.seed,
                "test_ratio": self.config.test_ratio,
            }),
        );

        let matrix = dataset.matrix();
        let raw_train = matrix.select(Axis(0), &split.train);
        let raw_test = matrix.select(Axis(0), &split.test);
        let y_train: Vec<usize> = split.train.iter().map(|idx| y[*idx]).collect();
        let y_test: Vec<usize> = split.test.iter().map(|idx| y[*idx]).collect();
        let scaler = StandardScaler::fit(&raw_train)?;
        let x_train = scaler.transform(&raw_train)?;
        let x_test = scaler.transform(&raw_test)?;

        let n_classes = codec.len();
        let fits = TrainingOrchestrator::new(&self.config, telemetry)
            .train_all(&x_train, &y_train, n_classes)
            .context("training candidates")?;
        let evaluations: Vec<EvaluationResult> = fits
            .iter()
            .map(|fit| {
                let result = evaluate(&fit.model, &x_test, &y_test, n_classes);
                log(
                    telemetry,
                    LogLevel::Info,
                    "training.candidate_evaluated",
                    json!({
                        "candidate": fit.model.name,
                        "accuracy": result.accuracy,
                        "weighted_precision": result.weighted_precision,
                        "weighted_recall": result.weighted_recall,
                        "weighted_f1": result.weighted_f1,
                    }),
                );
                result
            })
            .collect();

        let metric = self.config.selection_metric;
        let best = select_best(&evaluations, metric)?;
        let candidates: Vec<CandidateReport> = fits
            .iter()
            .zip(&evaluations)
            .map(|(fit, evaluation)| CandidateReport::new(fit, evaluation.clone(), &codec))
            .collect();
        let selected = fits[best].model.clone();
        log(
            telemetry,
            LogLevel::Info,
            "training.selected",
            json!({
                "model": selected.name,
                "metric": metric.to_string(),
                "score": metric.score(&evaluations[best]),
            }),
        );

        let feature_importances = selected.feature_importances().map(|importances| {
            FEATURE_NAMES
                .iter()
                .zip(importances)
                .map(|(name, value)| ((*name).to_string(), value))
                .collect::<IndexMap<String, f64>>()
        });
        let bundle = ArtifactBundle::new(selected, scaler, codec);
        let report = TrainingReport {
            bundle_id: bundle.bundle_id,
            generated_at: Utc::now(),
            rows: dataset.len(),
            train_size: split.train.len(),
            test_size: split.test.len(),
            classes: bundle.codec.classes().to_vec(),
            class_distribution,
            selection_metric: metric,
            fit_gap_threshold: self.config.fit_gap_threshold,
            selected: bundle.model.name.clone(),
            candidates,
            feature_importances,
        };
        Ok(TrainingOutcome { report, bundle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        features::FeatureVector,
        models::{default_candidates, Algorithm, ForestParams, KnnParams, LogisticParams},
    };
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use shared_logging::MemoryLogger;
    use std::sync::Arc;

    fn synthetic(n_per_class: usize) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for (label, base) in [("Easy", 80.0), ("Hard", 30.0), ("Medium", 55.0)] {
            for _ in 0..n_per_class {
                let mut values = [0.0; 10];
                for value in &mut values {
                    *value = base + rng.gen_range(-6.0..6.0);
                }
                features.push(FeatureVector::from_array(values));
                labels.push(label.to_string());
            }
        }
        Dataset::from_records(features, labels).unwrap()
    }

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            candidates: vec![
                CandidateSpec::new(
                    "Random Forest",
                    Algorithm::RandomForest(ForestParams {
                        n_estimators: 10,
                        ..ForestParams::default()
                    }),
                ),
                CandidateSpec::new(
                    "Logistic Regression",
                    Algorithm::LogisticRegression(LogisticParams {
                        max_iter: 300,
                        ..LogisticParams::default()
                    }),
                ),
                CandidateSpec::new(
                    "K-Nearest Neighbors",
                    Algorithm::KNearestNeighbors(KnnParams::default()),
                ),
            ],
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn diagnostic_thresholds() {
        assert_eq!(FitDiagnostic::classify(0.99, 0.90, 0.05), FitDiagnostic::Overfit);
        assert_eq!(FitDiagnostic::classify(0.80, 0.90, 0.05), FitDiagnostic::Underfit);
        assert_eq!(FitDiagnostic::classify(0.92, 0.90, 0.05), FitDiagnostic::Balanced);
        assert_eq!(FitDiagnostic::classify(0.95, 0.90, 0.05), FitDiagnostic::Balanced);
    }

    #[test]
    fn cross_validation_uses_population_std() {
        let result = CrossValidationResult::from_folds(vec![0.8, 1.0], vec![0.5, 0.7]);
        assert!((result.mean_accuracy - 0.9).abs() < 1e-12);
        assert!((result.std_accuracy - 0.1).abs() < 1e-12);
        assert!((result.mean_f1 - 0.6).abs() < 1e-12);
        assert!((result.std_f1 - 0.1).abs() < 1e-12);
    }

    #[test]
    fn pipeline_selects_and_logs() {
        let memory = Arc::new(MemoryLogger::new());
        let telemetry = FocusTelemetry::builder("focus_model")
            .sink(memory.clone())
            .build()
            .unwrap();
        let outcome = TrainingPipeline::new(quick_config())
            .with_telemetry(telemetry)
            .run(&synthetic(20))
            .unwrap();
        assert_eq!(outcome.report.candidates.len(), 3);
        assert_eq!(outcome.report.classes, ["Easy", "Hard", "Medium"]);
        assert_eq!(outcome.report.train_size + outcome.report.test_size, 60);
        assert_eq!(outcome.report.selected, outcome.bundle.model.name);
        assert!(outcome
            .report
            .candidates
            .iter()
            .all(|c| c.cross_validation.fold_accuracy.len() == 5));
        for event in [
            "dataset.loaded",
            "training.split",
            "training.candidate_fitted",
            "training.fit_diagnostic",
            "training.candidate_evaluated",
            "training.selected",
        ] {
            assert!(!memory.find(event).is_empty(), "missing {event}");
        }
        assert_eq!(memory.find("training.candidate_evaluated").len(), 3);
    }

    #[test]
    fn parallel_training_keeps_registry_order() {
        let dataset = synthetic(15);
        let sequential = TrainingPipeline::new(quick_config()).run(&dataset).unwrap();
        let parallel = TrainingPipeline::new(TrainingConfig {
            parallel_candidates: true,
            ..quick_config()
        })
        .run(&dataset)
        .unwrap();
        let names = |outcome: &TrainingOutcome| {
            outcome
                .report
                .candidates
                .iter()
                .map(|candidate| candidate.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&sequential), names(&parallel));
        assert_eq!(sequential.report.selected, parallel.report.selected);
        assert_eq!(sequential.bundle.model, parallel.bundle.model);
    }

    #[test]
    fn single_class_dataset_is_rejected() {
        let features = vec![FeatureVector::from_array([50.0; 10]); 6];
        let labels = vec!["Easy".to_string(); 6];
        let dataset = Dataset::from_records(features, labels).unwrap();
        let err = TrainingPipeline::default().run(&dataset).unwrap_err();
        assert!(err.to_string().contains("fewer than two classes"));
    }

    #[test]
    fn default_registry_is_used_without_overrides() {
        assert_eq!(TrainingPipeline::default().config().candidates, default_candidates());
    }
}
