use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use super::{class_weights, softmax_in_place, softmax_rows, ClassWeight, Classifier};
use crate::error::TrainingError;

const POWER_ITERATIONS: usize = 100;

/// Hyperparameters of multinomial logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    /// Inverse L2 strength.
    pub c: f64,
    /// Iteration cap of the solver.
    pub max_iter: usize,
    /// Stop once every gradient entry is below this.
    pub tol: f64,
    /// Class reweighting scheme.
    pub class_weight: ClassWeight,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: 1.2,
            max_iter: 2000,
            tol: 1e-6,
            class_weight: ClassWeight::Balanced,
        }
    }
}

/// Softmax regression; the last weight column is the unpenalised intercept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    weights: Array2<f64>,
    iterations: usize,
}

impl LogisticRegression {
    /// Minimises weighted cross-entropy plus `||W||² / (2 C Σw)` with
    /// Nesterov-accelerated gradient descent at step `1 / L`.
    pub fn fit(
        params: &LogisticParams,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self, TrainingError> {
        if params.c.is_nan() || params.c <= 0.0 {
            return Err(TrainingError::InvalidConfig(format!(
                "logistic regression needs c > 0, got {}",
                params.c
            )));
        }
        let n_features = x.ncols();
        let design = with_intercept(x);
        let per_class = class_weights(params.class_weight, y, n_classes);
        let sample_weights = Array1::from_iter(y.iter().map(|label| per_class[*label]));
        let total_weight = sample_weights.sum().max(1e-12);
        let penalty = 1.0 / (params.c * total_weight);
        let mut targets = Array2::<f64>::zeros((y.len(), n_classes));
        for (idx, label) in y.iter().enumerate() {
            targets[[idx, *label]] = 1.0;
        }

        let lipschitz = 0.5 * largest_eigenvalue(&design, &sample_weights) / total_weight + penalty;
        let step = 1.0 / lipschitz;

        let gradient = |weights: &Array2<f64>| {
            let mut probabilities = design.dot(&weights.t());
            softmax_rows(&mut probabilities);
            let mut residual = probabilities - &targets;
            for (mut row, weight) in residual.rows_mut().into_iter().zip(&sample_weights) {
                row *= *weight / total_weight;
            }
            let mut grad = residual.t().dot(&design);
            let mut penalised = grad.slice_mut(s![.., ..n_features]);
            penalised.scaled_add(penalty, &weights.slice(s![.., ..n_features]));
            grad
        };

        let mut weights = Array2::<f64>::zeros((n_classes, n_features + 1));
        let mut previous = weights.clone();
        let mut iterations = 0;
        for iteration in 0..params.max_iter {
            iterations = iteration + 1;
            let momentum = iteration as f64 / (iteration as f64 + 3.0);
            let lookahead = &weights + &((&weights - &previous) * momentum);
            let grad = gradient(&lookahead);
            if grad.iter().all(|value| value.abs() < params.tol) {
                weights = lookahead;
                break;
            }
            previous = weights;
            weights = lookahead - grad * step;
        }
        if weights.iter().any(|value| !value.is_finite()) {
            return Err(TrainingError::Fit {
                name: "logistic_regression".into(),
                reason: "solver diverged".into(),
            });
        }
        Ok(Self {
            weights,
            iterations,
        })
    }

    /// Solver iterations actually run.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }
}

fn with_intercept(x: &Array2<f64>) -> Array2<f64> {
    let mut design = Array2::ones((x.nrows(), x.ncols() + 1));
    design.slice_mut(s![.., ..x.ncols()]).assign(x);
    design
}

/// Power iteration on `Xᵀ diag(w) X`.
fn largest_eigenvalue(design: &Array2<f64>, sample_weights: &Array1<f64>) -> f64 {
    let weighted = design * &sample_weights.view().insert_axis(Axis(1));
    let gram = design.t().dot(&weighted);
    let mut vector = Array1::<f64>::ones(gram.nrows());
    let mut eigenvalue = 0.0;
    for _ in 0..POWER_ITERATIONS {
        let next = gram.dot(&vector);
        let norm = next.dot(&next).sqrt();
        if norm <= f64::EPSILON {
            return 0.0;
        }
        eigenvalue = norm / vector.dot(&vector).sqrt();
        vector = next / norm;
    }
    eigenvalue
}

impl Classifier for LogisticRegression {
    fn n_classes(&self) -> usize {
        self.weights.nrows()
    }

    fn class_scores(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let n_features = row.len();
        let mut scores: Vec<f64> = self
            .weights
            .rows()
            .into_iter()
            .map(|weights| weights.slice(s![..n_features]).dot(&row) + weights[n_features])
            .collect();
        softmax_in_place(&mut scores);
        scores
    }
}
