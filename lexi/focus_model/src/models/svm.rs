use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{class_weights, softmax_in_place, ClassWeight, Classifier};
use crate::error::TrainingError;

const TEMPERATURE_GRID: [f64; 9] = [0.05, 0.1, 0.2, 0.35, 0.5, 1.0, 2.0, 3.5, 5.0];

/// RBF kernel width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// `1 / (n_features * Var(X))`.
    Scale,
    /// `1 / n_features`.
    Auto,
    /// Explicit width.
    Value(f64),
}

impl Gamma {
    fn resolve(self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match self {
            Self::Scale => {
                let variance = x.var(0.0);
                if variance.is_finite() && variance > 0.0 {
                    1.0 / (n_features * variance)
                } else {
                    1.0 / n_features
                }
            }
            Self::Auto => 1.0 / n_features,
            Self::Value(gamma) => gamma,
        }
    }
}

/// Hyperparameters of the approximate RBF machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    /// Inverse regularisation strength.
    pub c: f64,
    /// Kernel width.
    pub gamma: Gamma,
    /// Random Fourier components approximating the kernel.
    pub n_components: usize,
    /// Passes of the hinge-loss solver over the data.
    pub epochs: usize,
    /// Class reweighting scheme.
    pub class_weight: ClassWeight,
    /// Whether fitted models report probabilities.
    pub probability: bool,
    /// Seed for the feature map and sample order.
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.5,
            gamma: Gamma::Scale,
            n_components: 256,
            epochs: 12,
            class_weight: ClassWeight::Balanced,
            probability: true,
            seed: 42,
        }
    }
}

/// One-vs-rest hinge-loss machine on a random Fourier feature map.
///
/// `z(x) = sqrt(2/D) * cos(Wx + b)` with `W ~ N(0, 2γ)` approximates the RBF
/// kernel; a constant feature carries the bias. Probabilities are a softmax of
/// the margins with a temperature fit on the training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSvm {
    frequencies: Array2<f64>,
    phases: Vec<f64>,
    weights: Array2<f64>,
    temperature: f64,
}

impl KernelSvm {
    /// Fits the feature map, the per-class hyperplanes and the temperature.
    pub fn fit(
        params: &SvmParams,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self, TrainingError> {
        if params.c.is_nan() || params.c <= 0.0 || params.n_components == 0 || params.epochs == 0 {
            return Err(TrainingError::InvalidConfig(format!(
                "svm needs c > 0, components and epochs, got c={} components={} epochs={}",
                params.c, params.n_components, params.epochs
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let gamma = params.gamma.resolve(x);
        let spread = (2.0 * gamma).sqrt();
        let frequencies = Array2::from_shape_simple_fn((params.n_components, x.ncols()), || {
            spread * standard_normal(&mut rng)
        });
        let phases: Vec<f64> = (0..params.n_components)
            .map(|_| rng.gen_range(0.0..2.0 * PI))
            .collect();
        let mut svm = Self {
            frequencies,
            phases,
            weights: Array2::zeros((n_classes, params.n_components + 1)),
            temperature: 1.0,
        };

        let mapped = svm.map_matrix(x);
        let per_class = class_weights(params.class_weight, y, n_classes);
        let sample_weights: Vec<f64> = y.iter().map(|label| per_class[*label]).collect();
        let max_weight = sample_weights.iter().copied().fold(0.0, f64::max).max(1e-12);
        let lambda = 1.0 / (params.c * x.nrows() as f64);
        let radius = (max_weight / lambda).sqrt();

        for class in 0..n_classes {
            let hyperplane = pegasos(
                &mapped,
                y,
                class,
                &sample_weights,
                lambda,
                radius,
                params.epochs,
                &mut rng,
            );
            svm.weights.row_mut(class).assign(&hyperplane);
        }
        svm.temperature = svm.calibrate(&mapped, y);
        Ok(svm)
    }

    fn map_row(&self, row: ArrayView1<'_, f64>) -> Array1<f64> {
        let scale = (2.0 / self.phases.len() as f64).sqrt();
        let projected = self.frequencies.dot(&row);
        let mut mapped = Array1::ones(self.phases.len() + 1);
        for (idx, (value, phase)) in projected.iter().zip(&self.phases).enumerate() {
            mapped[idx] = scale * (value + phase).cos();
        }
        mapped
    }

    fn map_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut mapped = Array2::zeros((x.nrows(), self.phases.len() + 1));
        for (idx, row) in x.axis_iter(Axis(0)).enumerate() {
            mapped.row_mut(idx).assign(&self.map_row(row));
        }
        mapped
    }

    fn margins(&self, mapped: ArrayView1<'_, f64>) -> Vec<f64> {
        self.weights.dot(&mapped).to_vec()
    }

    /// Temperature from the grid minimising training negative log-likelihood.
    fn calibrate(&self, mapped: &Array2<f64>, y: &[usize]) -> f64 {
        let margins: Vec<Vec<f64>> = mapped
            .rows()
            .into_iter()
            .map(|row| self.margins(row))
            .collect();
        let mut best = (f64::INFINITY, 1.0);
        for temperature in TEMPERATURE_GRID {
            let nll: f64 = margins
                .iter()
                .zip(y)
                .map(|(scores, label)| {
                    let mut probabilities: Vec<f64> =
                        scores.iter().map(|score| score / temperature).collect();
                    softmax_in_place(&mut probabilities);
                    -probabilities[*label].max(1e-15).ln()
                })
                .sum();
            if nll < best.0 {
                best = (nll, temperature);
            }
        }
        best.1
    }

    /// Softmax temperature chosen at fit time.
    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.temperature
    }
}

/// Weighted Pegasos for one one-vs-rest hyperplane; returns the mean iterate
/// of the final epoch.
#[allow(clippy::too_many_arguments)]
fn pegasos(
    mapped: &Array2<f64>,
    y: &[usize],
    class: usize,
    sample_weights: &[f64],
    lambda: f64,
    radius: f64,
    epochs: usize,
    rng: &mut ChaCha8Rng,
) -> Array1<f64> {
    let n_samples = mapped.nrows();
    let mut weights = Array1::<f64>::zeros(mapped.ncols());
    let mut averaged = Array1::<f64>::zeros(mapped.ncols());
    let mut order: Vec<usize> = (0..n_samples).collect();
    let mut step = 0usize;
    for epoch in 0..epochs {
        order.shuffle(rng);
        for &idx in &order {
            step += 1;
            let eta = 1.0 / (lambda * step as f64);
            let sign = if y[idx] == class { 1.0 } else { -1.0 };
            let sample = mapped.row(idx);
            let margin = sign * weights.dot(&sample);
            weights *= 1.0 - 1.0 / step as f64;
            if margin < 1.0 {
                weights.scaled_add(eta * sample_weights[idx] * sign, &sample);
            }
            let norm = weights.dot(&weights).sqrt();
            if norm > radius {
                weights *= radius / norm;
            }
            if epoch + 1 == epochs {
                averaged += &weights;
            }
        }
    }
    averaged / n_samples.max(1) as f64
}

/// Box-Muller draw from N(0, 1).
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl Classifier for KernelSvm {
    fn n_classes(&self) -> usize {
        self.weights.nrows()
    }

    fn class_scores(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        self.margins(self.map_row(row).view())
    }

    fn class_probabilities(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut scaled: Vec<f64> = self
            .class_scores(row)
            .iter()
            .map(|margin| margin / self.temperature)
            .collect();
        softmax_in_place(&mut scaled);
        scaled
    }
}
