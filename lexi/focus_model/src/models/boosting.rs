use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{
    softmax_in_place, softmax_rows,
    tree::{normalize, DecisionTree, NewtonRegression, TreeGrower, TreeParams},
    Classifier,
};
use crate::error::TrainingError;

/// Hyperparameters of multiclass gradient boosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    /// Boosting stages.
    pub n_estimators: usize,
    /// Shrinkage applied to every stage.
    pub learning_rate: f64,
    /// Maximum depth of each regression tree.
    pub max_depth: usize,
    /// Minimum samples to split a node.
    pub min_samples_split: usize,
    /// Minimum samples per leaf.
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) per stage.
    pub subsample: f64,
    /// Seed for row subsampling.
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            learning_rate: 0.08,
            max_depth: 5,
            min_samples_split: 8,
            min_samples_leaf: 3,
            subsample: 0.85,
            seed: 42,
        }
    }
}

/// Softmax boosting: one regression tree per class per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    initial: Vec<f64>,
    learning_rate: f64,
    stages: Vec<Vec<DecisionTree>>,
    importances: Vec<f64>,
}

impl GradientBoosting {
    /// Fits the boosted ensemble on multinomial deviance.
    pub fn fit(
        params: &BoostingParams,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self, TrainingError> {
        if !(params.subsample > 0.0 && params.subsample <= 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "subsample must be in (0, 1], got {}",
                params.subsample
            )));
        }
        let n_samples = x.nrows();
        let mut counts = vec![0.0; n_classes];
        for &label in y {
            counts[label] += 1.0;
        }
        let initial: Vec<f64> = counts
            .iter()
            .map(|count| (count / n_samples as f64).max(1e-12).ln())
            .collect();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };
        let n_drawn = ((params.subsample * n_samples as f64).ceil() as usize).clamp(1, n_samples);
        let leaf_scale = (n_classes as f64 - 1.0) / n_classes as f64;

        let mut raw = Array2::from_shape_fn((n_samples, n_classes), |(_, class)| initial[class]);
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut stages = Vec::with_capacity(params.n_estimators);
        let mut importances = vec![0.0; x.ncols()];

        for _ in 0..params.n_estimators {
            let mut probabilities = raw.clone();
            softmax_rows(&mut probabilities);
            let rows = if n_drawn < n_samples {
                let mut drawn = rand::seq::index::sample(&mut rng, n_samples, n_drawn).into_vec();
                drawn.sort_unstable();
                drawn
            } else {
                (0..n_samples).collect()
            };
            let mut stage = Vec::with_capacity(n_classes);
            for class in 0..n_classes {
                let residuals: Vec<f64> = (0..n_samples)
                    .map(|idx| f64::from(u8::from(y[idx] == class)) - probabilities[[idx, class]])
                    .collect();
                let hessians: Vec<f64> = residuals
                    .iter()
                    .map(|residual| residual.abs() * (1.0 - residual.abs()))
                    .collect();
                let criterion = NewtonRegression {
                    targets: &residuals,
                    hessians: &hessians,
                    leaf_scale,
                };
                let (tree, tree_importances) =
                    TreeGrower::new(x, &criterion, tree_params, &mut rng).grow(rows.clone());
                for (total, value) in importances.iter_mut().zip(&tree_importances) {
                    *total += value;
                }
                for (idx, row) in x.rows().into_iter().enumerate() {
                    raw[[idx, class]] += params.learning_rate * tree.leaf(row)[0];
                }
                stage.push(tree);
            }
            stages.push(stage);
        }
        normalize(&mut importances);
        Ok(Self {
            initial,
            learning_rate: params.learning_rate,
            stages,
            importances,
        })
    }

    /// Number of boosting stages.
    #[must_use]
    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    fn raw_scores(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut raw = self.initial.clone();
        for stage in &self.stages {
            for (score, tree) in raw.iter_mut().zip(stage) {
                *score += self.learning_rate * tree.leaf(row)[0];
            }
        }
        raw
    }
}

impl Classifier for GradientBoosting {
    fn n_classes(&self) -> usize {
        self.initial.len()
    }

    fn class_scores(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut scores = self.raw_scores(row);
        softmax_in_place(&mut scores);
        scores
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{blobs, training_accuracy};

    fn small() -> BoostingParams {
        BoostingParams {
            n_estimators: 20,
            max_depth: 3,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn boosting_learns_separable_blobs() {
        let (x, y) = blobs(25);
        let model = GradientBoosting::fit(&small(), &x, &y, 3).unwrap();
        assert_eq!(model.n_stages(), 20);
        assert!(training_accuracy(&model, &x, &y) > 0.95);
        let scores = model.class_scores(x.row(3));
        assert!((scores.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn initial_scores_follow_class_priors() {
        let (x, y) = blobs(10);
        let params = BoostingParams {
            n_estimators: 0,
            ..BoostingParams::default()
        };
        let model = GradientBoosting::fit(&params, &x, &y, 3).unwrap();
        let scores = model.class_scores(x.row(0));
        for score in scores {
            assert!((score - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_invalid_subsample() {
        let (x, y) = blobs(5);
        let params = BoostingParams {
            subsample: 0.0,
            ..small()
        };
        assert!(GradientBoosting::fit(&params, &x, &y, 3).is_err());
    }
}
