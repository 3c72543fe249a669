use ndarray::{Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{
    class_weights,
    tree::{normalize, DecisionTree, Gini, TreeGrower, TreeParams},
    ClassWeight, Classifier, MaxFeatures,
};
use crate::error::TrainingError;

/// Hyperparameters of the bagged Gini forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Minimum samples to split a node.
    pub min_samples_split: usize,
    /// Minimum samples per leaf.
    pub min_samples_leaf: usize,
    /// Features considered per split.
    pub max_features: MaxFeatures,
    /// Class reweighting scheme.
    pub class_weight: ClassWeight,
    /// Seed for bootstrap draws and feature sampling.
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: MaxFeatures::Sqrt,
            class_weight: ClassWeight::BalancedSubsample,
            seed: 42,
        }
    }
}

/// Fitted random forest; probabilities are the mean leaf distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_classes: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    /// Fits `params.n_estimators` trees on bootstrap resamples.
    pub fn fit(
        params: &ForestParams,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self, TrainingError> {
        if params.n_estimators == 0 {
            return Err(TrainingError::InvalidConfig(
                "random forest needs at least one tree".into(),
            ));
        }
        let n_samples = x.nrows();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some(params.max_features.resolve(x.ncols())),
        };
        let full_weights = class_weights(params.class_weight, y, n_classes);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut importances = vec![0.0; x.ncols()];

        for tree_idx in 0..params.n_estimators {
            let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(tree_idx as u64));
            let mut multiplicity = vec![0u32; n_samples];
            for _ in 0..n_samples {
                multiplicity[rng.gen_range(0..n_samples)] += 1;
            }
            let drawn: Vec<usize> = (0..n_samples).filter(|idx| multiplicity[*idx] > 0).collect();
            let per_class = match params.class_weight {
                ClassWeight::BalancedSubsample => {
                    let resampled: Vec<usize> = drawn
                        .iter()
                        .flat_map(|idx| {
                            std::iter::repeat(y[*idx]).take(multiplicity[*idx] as usize)
                        })
                        .collect();
                    class_weights(ClassWeight::Balanced, &resampled, n_classes)
                }
                _ => full_weights.clone(),
            };
            let weights: Vec<f64> = (0..n_samples)
                .map(|idx| f64::from(multiplicity[idx]) * per_class[y[idx]])
                .collect();
            let gini = Gini {
                labels: y,
                weights: &weights,
                n_classes,
            };
            let (tree, mut tree_importances) =
                TreeGrower::new(x, &gini, tree_params, &mut rng).grow(drawn);
            normalize(&mut tree_importances);
            for (total, value) in importances.iter_mut().zip(&tree_importances) {
                *total += value;
            }
            trees.push(tree);
        }
        normalize(&mut importances);
        Ok(Self {
            trees,
            n_classes,
            importances,
        })
    }

    /// Number of fitted trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn class_scores(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut mean = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (total, value) in mean.iter_mut().zip(tree.leaf(row)) {
                *total += value;
            }
        }
        let count = self.trees.len().max(1) as f64;
        mean.iter_mut().for_each(|value| *value /= count);
        mean
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}
