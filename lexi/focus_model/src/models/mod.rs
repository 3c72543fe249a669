//! Candidate classifiers and the registry they are trained from.
//!
//! Every family is implemented directly on `ndarray`. The registry is a list
//! of [`CandidateSpec`] values; fitting one yields a [`FittedModel`] whose
//! probability capability is fixed when the candidate is registered.

/// Multiclass gradient boosting.
pub mod boosting;
/// Bagged random forest.
pub mod forest;
/// k-nearest neighbours.
pub mod knn;
/// Multinomial logistic regression.
pub mod logistic;
/// Kernel SVM over random Fourier features.
pub mod svm;
/// CART classification and regression trees.
pub mod tree;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

pub use boosting::{BoostingParams, GradientBoosting};
pub use forest::{ForestParams, RandomForest};
pub use knn::{KNearestNeighbors, KnnParams, KnnWeights};
pub use logistic::{LogisticParams, LogisticRegression};
pub use svm::{Gamma, KernelSvm, SvmParams};

use crate::error::TrainingError;

/// Behaviour shared by every fitted classifier family.
pub trait Classifier {
    /// Number of classes the model was fit on.
    fn n_classes(&self) -> usize;

    /// Per-class scores for one scaled row; larger means more likely.
    fn class_scores(&self, row: ArrayView1<'_, f64>) -> Vec<f64>;

    /// Per-class probabilities. Families whose scores are already
    /// distributions keep the default.
    fn class_probabilities(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        self.class_scores(row)
    }

    /// Index of the highest score.
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> usize {
        argmax(&self.class_scores(row))
    }

    /// Normalised importances, for families that expose them.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Position of the maximum; ties go to the lowest index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = idx;
        }
    }
    best
}

/// Max-shifted softmax over a score vector.
pub(crate) fn softmax_in_place(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for value in values.iter_mut() {
        *value = (*value - max).exp();
        sum += *value;
    }
    if sum > 0.0 {
        values.iter_mut().for_each(|value| *value /= sum);
    }
}

/// Row-wise softmax of a score matrix.
pub(crate) fn softmax_rows(matrix: &mut Array2<f64>) {
    for mut row in matrix.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |acc, value| acc.max(*value));
        row.mapv_inplace(|value| (value - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        }
    }
}

/// Class reweighting scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    /// Every sample weighs one.
    Uniform,
    /// `n / (n_classes * n_c)` computed on the full training set.
    Balanced,
    /// Balanced weights recomputed on each bootstrap resample.
    BalancedSubsample,
}

/// Per-class weights for `labels` under `scheme`. Absent classes weigh zero.
pub(crate) fn class_weights(scheme: ClassWeight, labels: &[usize], n_classes: usize) -> Vec<f64> {
    match scheme {
        ClassWeight::Uniform => vec![1.0; n_classes],
        ClassWeight::Balanced | ClassWeight::BalancedSubsample => {
            let mut counts = vec![0usize; n_classes];
            for &label in labels {
                counts[label] += 1;
            }
            let total = labels.len() as f64;
            counts
                .iter()
                .map(|&count| {
                    if count == 0 {
                        0.0
                    } else {
                        total / (n_classes as f64 * count as f64)
                    }
                })
                .collect()
        }
    }
}

/// Features considered at each tree split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `floor(sqrt(d))`, at least one.
    Sqrt,
    /// `floor(log2(d))`, at least one.
    Log2,
    /// Every feature.
    All,
}

impl MaxFeatures {
    /// Resolves the rule against `n_features` columns.
    #[must_use]
    pub fn resolve(self, n_features: usize) -> usize {
        let resolved = match self {
            Self::Sqrt => (n_features as f64).sqrt().floor() as usize,
            Self::Log2 => (n_features as f64).log2().floor() as usize,
            Self::All => n_features,
        };
        resolved.clamp(1, n_features.max(1))
    }
}

/// Algorithm family and its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Algorithm {
    /// Bagged Gini trees.
    RandomForest(ForestParams),
    /// Approximate RBF support vector machine.
    Svm(SvmParams),
    /// Multinomial logistic regression.
    LogisticRegression(LogisticParams),
    /// Softmax gradient boosting.
    GradientBoosting(BoostingParams),
    /// Brute-force nearest neighbours.
    KNearestNeighbors(KnnParams),
}

/// One registered candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    /// Display name, also used in reports and the health probe.
    pub name: String,
    /// Family and hyperparameters.
    #[serde(flatten)]
    pub algorithm: Algorithm,
}

impl CandidateSpec {
    /// Creates a named candidate.
    pub fn new(name: impl Into<String>, algorithm: Algorithm) -> Self {
        Self {
            name: name.into(),
            algorithm,
        }
    }

    /// Whether fitted models of this candidate report probabilities.
    #[must_use]
    pub const fn supports_probability(&self) -> bool {
        match &self.algorithm {
            Algorithm::Svm(params) => params.probability,
            _ => true,
        }
    }

    /// Fits a fresh model on scaled features `x` and encoded labels `y`.
    pub fn fit(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<FittedModel, TrainingError> {
        if x.nrows() != y.len() {
            return Err(TrainingError::DimensionMismatch(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if let Some(label) = y.iter().find(|label| **label >= n_classes) {
            return Err(TrainingError::DimensionMismatch(format!(
                "label index {label} outside {n_classes} classes"
            )));
        }
        let mut present = vec![false; n_classes];
        for &label in y {
            present[label] = true;
        }
        if present.iter().filter(|seen| **seen).count() < 2 {
            return Err(TrainingError::SingleClass(self.name.clone()));
        }
        let wrap = |reason: TrainingError| TrainingError::Fit {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        let model = match &self.algorithm {
            Algorithm::RandomForest(params) => {
                ModelKind::RandomForest(RandomForest::fit(params, x, y, n_classes).map_err(wrap)?)
            }
            Algorithm::Svm(params) => {
                ModelKind::Svm(KernelSvm::fit(params, x, y, n_classes).map_err(wrap)?)
            }
            Algorithm::LogisticRegression(params) => ModelKind::LogisticRegression(
                LogisticRegression::fit(params, x, y, n_classes).map_err(wrap)?,
            ),
            Algorithm::GradientBoosting(params) => ModelKind::GradientBoosting(
                GradientBoosting::fit(params, x, y, n_classes).map_err(wrap)?,
            ),
            Algorithm::KNearestNeighbors(params) => ModelKind::KNearestNeighbors(
                KNearestNeighbors::fit(params, x, y, n_classes).map_err(wrap)?,
            ),
        };
        Ok(FittedModel {
            name: self.name.clone(),
            supports_probability: self.supports_probability(),
            n_classes,
            n_features: x.ncols(),
            model,
        })
    }
}

/// The five-entry registry in tie-break order.
#[must_use]
pub fn default_candidates() -> Vec<CandidateSpec> {
    vec![
        CandidateSpec::new(
            "Random Forest",
            Algorithm::RandomForest(ForestParams::default()),
        ),
        CandidateSpec::new("SVM", Algorithm::Svm(SvmParams::default())),
        CandidateSpec::new(
            "Logistic Regression",
            Algorithm::LogisticRegression(LogisticParams::default()),
        ),
        CandidateSpec::new(
            "Gradient Boosting",
            Algorithm::GradientBoosting(BoostingParams::default()),
        ),
        CandidateSpec::new(
            "K-Nearest Neighbors",
            Algorithm::KNearestNeighbors(KnnParams::default()),
        ),
    ]
}

/// Fitted parameters of one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "params", rename_all = "snake_case")]
pub enum ModelKind {
    /// Fitted forest.
    RandomForest(RandomForest),
    /// Fitted approximate kernel machine.
    Svm(KernelSvm),
    /// Fitted softmax regression.
    LogisticRegression(LogisticRegression),
    /// Fitted boosted ensemble.
    GradientBoosting(GradientBoosting),
    /// Stored neighbours.
    KNearestNeighbors(KNearestNeighbors),
}

impl ModelKind {
    fn classifier(&self) -> &dyn Classifier {
        match self {
            Self::RandomForest(model) => model,
            Self::Svm(model) => model,
            Self::LogisticRegression(model) => model,
            Self::GradientBoosting(model) => model,
            Self::KNearestNeighbors(model) => model,
        }
    }
}

/// A trained candidate together with its registration-time capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    /// Candidate name.
    pub name: String,
    /// Whether [`FittedModel::predict_probabilities`] returns a distribution.
    pub supports_probability: bool,
    /// Classes seen at fit time.
    pub n_classes: usize,
    /// Feature width seen at fit time.
    pub n_features: usize,
    /// Family parameters.
    pub model: ModelKind,
}

impl FittedModel {
    /// Encoded class of one scaled row.
    #[must_use]
    pub fn predict_label(&self, row: ArrayView1<'_, f64>) -> usize {
        self.model.classifier().predict_row(row)
    }

    /// Encoded classes of every row of `x`.
    #[must_use]
    pub fn predict_labels(&self, x: &Array2<f64>) -> Vec<usize> {
        x.rows().into_iter().map(|row| self.predict_label(row)).collect()
    }

    /// Class distribution of one scaled row, or `None` without the capability.
    #[must_use]
    pub fn predict_probabilities(&self, row: ArrayView1<'_, f64>) -> Option<Vec<f64>> {
        self.supports_probability
            .then(|| self.model.classifier().class_probabilities(row))
    }

    /// Normalised impurity-decrease importances of the tree ensembles.
    #[must_use]
    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        self.model.classifier().feature_importances()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::Classifier;

    const CENTERS: [[f64; 4]; 3] = [
        [0.0, 0.0, 0.0, 0.0],
        [4.0, 4.0, 0.0, 4.0],
        [-4.0, 4.0, 4.0, 0.0],
    ];

    /// Three well separated four-dimensional clusters.
    pub(crate) fn blobs(n_per_class: usize) -> (Array2<f64>, Vec<usize>) {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut values = Vec::with_capacity(n_per_class * 3 * 4);
        let mut labels = Vec::with_capacity(n_per_class * 3);
        for _ in 0..n_per_class {
            for (class, center) in CENTERS.iter().enumerate() {
                for coordinate in center {
                    values.push(coordinate + rng.gen_range(-1.0..1.0));
                }
                labels.push(class);
            }
        }
        let x = Array2::from_shape_vec((labels.len(), 4), values)
            .expect("blob matrix shape");
        (x, labels)
    }

    pub(crate) fn training_accuracy(model: &impl Classifier, x: &Array2<f64>, y: &[usize]) -> f64 {
        let hits = x
            .rows()
            .into_iter()
            .zip(y)
            .filter(|(row, label)| model.predict_row(*row) == **label)
            .count();
        hits as f64 / y.len() as f64
    }
}
