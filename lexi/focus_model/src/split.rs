//! Seeded stratified partitioning: the train/test split and k-fold CV.

use std::collections::BTreeMap;

use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::TrainingError;

/// Default held-out fraction.
pub const DEFAULT_TEST_RATIO: f64 = 0.2;
/// Default seed shared by the split, the folds and the seeded candidates.
pub const DEFAULT_SEED: u64 = 42;

/// Index partition of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainTestSplit {
    /// Training indices, ascending.
    pub train: Vec<usize>,
    /// Held-out indices, ascending.
    pub test: Vec<usize>,
}

/// Groups sample indices by encoded class, shuffled with `rng`.
fn shuffled_class_groups(labels: &[usize], rng: &mut ChaCha8Rng) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(idx);
    }
    for members in groups.values_mut() {
        members.shuffle(rng);
    }
    groups
}

/// Stratified, seeded train/test split.
///
/// Each class contributes `round(n_c * test_ratio)` samples to the test side,
/// capped so a class with two or more samples keeps at least one for training.
pub fn stratified_train_test_split(
    labels: &[usize],
    test_ratio: f64,
    seed: u64,
) -> Result<TrainTestSplit, TrainingError> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(TrainingError::InvalidConfig(format!(
            "test_ratio must be in (0, 1), got {test_ratio}"
        )));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for members in shuffled_class_groups(labels, &mut rng).into_values() {
        let count = members.len();
        let mut n_test = (count as f64 * test_ratio).round() as usize;
        if count >= 2 {
            n_test = n_test.min(count - 1);
        } else {
            n_test = 0;
        }
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok(TrainTestSplit { train, test })
}

/// One cross-validation fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    /// Indices used to fit, ascending.
    pub train: Vec<usize>,
    /// Indices used to score, ascending.
    pub validation: Vec<usize>,
}

/// Shuffled stratified k-fold splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratifiedKFold {
    n_splits: usize,
    seed: u64,
}

impl StratifiedKFold {
    /// Creates a splitter with `n_splits` folds.
    #[must_use]
    pub const fn new(n_splits: usize, seed: u64) -> Self {
        Self { n_splits, seed }
    }

    /// Number of folds.
    #[must_use]
    pub const fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Deals each class's shuffled indices round-robin over the folds.
    ///
    /// The dealing offset carries over between classes, so fold sizes differ
    /// by at most one and every class is spread as evenly as possible.
    pub fn split(&self, labels: &[usize]) -> Result<Vec<Fold>, TrainingError> {
        if self.n_splits < 2 {
            return Err(TrainingError::InvalidConfig(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.n_splits
            )));
        }
        if labels.len() < self.n_splits {
            return Err(TrainingError::InvalidConfig(format!(
                "{} samples cannot fill {} folds",
                labels.len(),
                self.n_splits
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut assignment = vec![0usize; labels.len()];
        let mut offset = 0;
        for members in shuffled_class_groups(labels, &mut rng).into_values() {
            for (position, idx) in members.iter().enumerate() {
                assignment[*idx] = (offset + position) % self.n_splits;
            }
            offset += members.len();
        }
        Ok((0..self.n_splits)
            .map(|fold| {
                let (validation, train): (Vec<usize>, Vec<usize>) =
                    (0..labels.len()).partition(|idx| assignment[*idx] == fold);
                Fold { train, validation }
            })
            .collect())
    }
}
