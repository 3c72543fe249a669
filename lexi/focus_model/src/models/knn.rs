use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::Classifier;
use crate::error::TrainingError;

/// Vote weighting of the neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnnWeights {
    /// One vote each.
    Uniform,
    /// Votes weighted by inverse distance.
    Distance,
}

/// Hyperparameters of the neighbour vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnParams {
    /// Neighbours consulted.
    pub k: usize,
    /// Vote weighting.
    pub weights: KnnWeights,
    /// Minkowski exponent.
    pub p: f64,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            k: 7,
            weights: KnnWeights::Distance,
            p: 2.0,
        }
    }
}

/// Lazy learner holding the scaled training set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KNearestNeighbors {
    params: KnnParams,
    points: Array2<f64>,
    labels: Vec<usize>,
    n_classes: usize,
}

impl KNearestNeighbors {
    /// Stores the training data.
    pub fn fit(
        params: &KnnParams,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self, TrainingError> {
        if params.k == 0 || params.p.is_nan() || params.p < 1.0 {
            return Err(TrainingError::InvalidConfig(format!(
                "knn needs k >= 1 and p >= 1, got k={} p={}",
                params.k, params.p
            )));
        }
        Ok(Self {
            params: params.clone(),
            points: x.clone(),
            labels: y.to_vec(),
            n_classes,
        })
    }

    fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        let p = self.params.p;
        if (p - 2.0).abs() < f64::EPSILON {
            return a
                .iter()
                .zip(b.iter())
                .map(|(left, right)| (left - right).powi(2))
                .sum::<f64>()
                .sqrt();
        }
        a.iter()
            .zip(b.iter())
            .map(|(left, right)| (left - right).abs().powf(p))
            .sum::<f64>()
            .powf(1.0 / p)
    }

    /// `(distance, label)` of the `k` closest stored points, nearest first.
    fn neighbours(&self, row: ArrayView1<'_, f64>) -> Vec<(f64, usize)> {
        let mut distances: Vec<(f64, usize)> = self
            .points
            .rows()
            .into_iter()
            .zip(&self.labels)
            .map(|(point, label)| (self.distance(point, row), *label))
            .collect();
        let k = self.params.k.min(distances.len());
        if k == 0 {
            return Vec::new();
        }
        if k < distances.len() {
            distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
            distances.truncate(k);
        }
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        distances
    }
}

impl Classifier for KNearestNeighbors {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Normalised neighbour votes. Under distance weighting, exact matches
    /// (distance zero) take all the votes when present.
    fn class_scores(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let neighbours = self.neighbours(row);
        let mut votes = vec![0.0; self.n_classes];
        let exact: Vec<usize> = neighbours
            .iter()
            .filter(|(distance, _)| *distance == 0.0)
            .map(|(_, label)| *label)
            .collect();
        match self.params.weights {
            KnnWeights::Distance if !exact.is_empty() => {
                for label in exact {
                    votes[label] += 1.0;
                }
            }
            KnnWeights::Distance => {
                for (distance, label) in &neighbours {
                    votes[*label] += 1.0 / distance;
                }
            }
            KnnWeights::Uniform => {
                for (_, label) in &neighbours {
                    votes[*label] += 1.0;
                }
            }
        }
        let mut total: f64 = votes.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            // Every neighbour is infinitely far away; count heads instead.
            votes.iter_mut().for_each(|vote| *vote = 0.0);
            for (_, label) in &neighbours {
                votes[*label] += 1.0;
            }
            total = neighbours.len() as f64;
        }
        if total > 0.0 {
            votes.iter_mut().for_each(|vote| *vote /= total);
        }
        votes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{blobs, training_accuracy};
    use ndarray::array;

    #[test]
    fn distance_weighting_favours_close_points() {
        let x = array![[0.0], [1.0], [10.0], [11.0], [12.0]];
        let y = vec![0, 0, 1, 1, 1];
        let knn = KNearestNeighbors::fit(&KnnParams::default(), &x, &y, 2).unwrap();
        let scores = knn.class_scores(array![0.5].view());
        assert!(scores[0] > 0.9);
        assert_eq!(knn.predict_row(array![0.5].view()), 0);
    }

    #[test]
    fn uniform_weighting_counts_heads() {
        let x = array![[0.0], [1.0], [10.0], [11.0], [12.0]];
        let y = vec![0, 0, 1, 1, 1];
        let params = KnnParams {
            k: 5,
            weights: KnnWeights::Uniform,
            p: 2.0,
        };
        let knn = KNearestNeighbors::fit(&params, &x, &y, 2).unwrap();
        assert_eq!(knn.class_scores(array![0.0].view()), vec![0.4, 0.6]);
    }

    #[test]
    fn exact_match_takes_the_vote() {
        let x = array![[0.0, 0.0], [0.1, 0.0], [0.2, 0.0]];
        let y = vec![1, 0, 0];
        let knn = KNearestNeighbors::fit(&KnnParams::default(), &x, &y, 2).unwrap();
        assert_eq!(knn.class_scores(array![0.0, 0.0].view()), vec![0.0, 1.0]);
    }

    #[test]
    fn overflowing_distances_fall_back_to_head_counts() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = vec![0, 1, 1];
        let params = KnnParams {
            k: 3,
            ..KnnParams::default()
        };
        let knn = KNearestNeighbors::fit(&params, &x, &y, 2).unwrap();
        let scores = knn.class_scores(array![1e200].view());
        assert!((scores.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(knn.predict_row(array![1e200].view()), 1);
    }

    #[test]
    fn manhattan_distance() {
        let x = array![[0.0, 0.0]];
        let params = KnnParams {
            p: 1.0,
            ..KnnParams::default()
        };
        let knn = KNearestNeighbors::fit(&params, &x, &[0], 2).unwrap();
        let distance = knn.distance(array![3.0, 4.0].view(), array![0.0, 0.0].view());
        assert!((distance - 7.0).abs() < 1e-12);
    }

    #[test]
    fn blobs_are_recalled() {
        let (x, y) = blobs(20);
        let knn = KNearestNeighbors::fit(&KnnParams::default(), &x, &y, 3).unwrap();
        assert!((training_accuracy(&knn, &x, &y) - 1.0).abs() < 1e-12);
    }
}
