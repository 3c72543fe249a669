//! CART growth shared by the forest (Gini) and boosting (squared error) candidates.

use ndarray::{Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Smallest impurity decrease accepted as a split.
const MIN_GAIN: f64 = 1e-12;

/// Tree node stored in a flat arena; the root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Terminal node. Class distribution for classification trees, a single
    /// value for regression trees.
    Leaf {
        /// Leaf payload.
        value: Vec<f64>,
    },
    /// Internal node; samples with `x[feature] <= threshold` go left.
    Split {
        /// Feature column.
        feature: usize,
        /// Split threshold.
        threshold: f64,
        /// Left child index.
        left: usize,
        /// Right child index.
        right: usize,
    },
}

/// A fitted decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Leaf payload reached by `row`.
    #[must_use]
    pub fn leaf(&self, row: ArrayView1<'_, f64>) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Depth of the deepest leaf (a single leaf has depth 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Growth limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    /// Maximum depth of any leaf.
    pub max_depth: usize,
    /// Minimum samples required to split a node.
    pub min_samples_split: usize,
    /// Minimum samples in each child.
    pub min_samples_leaf: usize,
    /// Features drawn per node; `None` searches all of them.
    pub max_features: Option<usize>,
}

/// Impurity bookkeeping for one target type.
pub(crate) trait Criterion {
    /// Running sufficient statistics of a sample set.
    type Stats: Clone;

    fn empty(&self) -> Self::Stats;
    fn add(&self, stats: &mut Self::Stats, idx: usize);
    fn remove(&self, stats: &mut Self::Stats, idx: usize);
    /// Impurity scaled by the node weight, so children costs add up.
    fn cost(&self, stats: &Self::Stats) -> f64;
    fn leaf_value(&self, stats: &Self::Stats) -> Vec<f64>;
}

/// Weighted Gini impurity for classification.
pub(crate) struct Gini<'a> {
    pub labels: &'a [usize],
    pub weights: &'a [f64],
    pub n_classes: usize,
}

#[derive(Clone)]
pub(crate) struct ClassWeights {
    per_class: Vec<f64>,
    total: f64,
}

impl Criterion for Gini<'_> {
    type Stats = ClassWeights;

    fn empty(&self) -> ClassWeights {
        ClassWeights {
            per_class: vec![0.0; self.n_classes],
            total: 0.0,
        }
    }

    fn add(&self, stats: &mut ClassWeights, idx: usize) {
        stats.per_class[self.labels[idx]] += self.weights[idx];
        stats.total += self.weights[idx];
    }

    fn remove(&self, stats: &mut ClassWeights, idx: usize) {
        stats.per_class[self.labels[idx]] -= self.weights[idx];
        stats.total -= self.weights[idx];
    }

    fn cost(&self, stats: &ClassWeights) -> f64 {
        if stats.total <= 0.0 {
            return 0.0;
        }
        let squares: f64 = stats.per_class.iter().map(|w| w * w).sum();
        (stats.total - squares / stats.total).max(0.0)
    }

    fn leaf_value(&self, stats: &ClassWeights) -> Vec<f64> {
        if stats.total <= 0.0 {
            return vec![1.0 / self.n_classes as f64; self.n_classes];
        }
        stats.per_class.iter().map(|w| w / stats.total).collect()
    }
}

/// Squared-error splitting with a one-step Newton leaf value
/// `scale * Σ target / Σ hessian`.
pub(crate) struct NewtonRegression<'a> {
    pub targets: &'a [f64],
    pub hessians: &'a [f64],
    pub leaf_scale: f64,
}

#[derive(Clone)]
pub(crate) struct Moments {
    count: f64,
    sum: f64,
    sum_sq: f64,
    hessian: f64,
}

impl Criterion for NewtonRegression<'_> {
    type Stats = Moments;

    fn empty(&self) -> Moments {
        Moments {
            count: 0.0,
            sum: 0.0,
            sum_sq: 0.0,
            hessian: 0.0,
        }
    }

    fn add(&self, stats: &mut Moments, idx: usize) {
        let target = self.targets[idx];
        stats.count += 1.0;
        stats.sum += target;
        stats.sum_sq += target * target;
        stats.hessian += self.hessians[idx];
    }

    fn remove(&self, stats: &mut Moments, idx: usize) {
        let target = self.targets[idx];
        stats.count -= 1.0;
        stats.sum -= target;
        stats.sum_sq -= target * target;
        stats.hessian -= self.hessians[idx];
    }

    fn cost(&self, stats: &Moments) -> f64 {
        if stats.count <= 0.0 {
            return 0.0;
        }
        (stats.sum_sq - stats.sum * stats.sum / stats.count).max(0.0)
    }

    fn leaf_value(&self, stats: &Moments) -> Vec<f64> {
        let value = if stats.hessian.abs() < 1e-12 {
            0.0
        } else {
            self.leaf_scale * stats.sum / stats.hessian
        };
        vec![value]
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grows one tree and accumulates impurity decrease per feature.
pub(crate) struct TreeGrower<'a, C: Criterion, R: Rng> {
    x: &'a Array2<f64>,
    criterion: &'a C,
    params: TreeParams,
    rng: &'a mut R,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl<'a, C: Criterion, R: Rng> TreeGrower<'a, C, R> {
    pub(crate) fn new(
        x: &'a Array2<f64>,
        criterion: &'a C,
        params: TreeParams,
        rng: &'a mut R,
    ) -> Self {
        Self {
            x,
            criterion,
            params,
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; x.ncols()],
        }
    }

    /// Grows from `indices` and returns the tree with its raw importances.
    pub(crate) fn grow(mut self, indices: Vec<usize>) -> (DecisionTree, Vec<f64>) {
        self.grow_node(indices, 0);
        (DecisionTree { nodes: self.nodes }, self.importances)
    }

    fn stats_of(&self, indices: &[usize]) -> C::Stats {
        let mut stats = self.criterion.empty();
        for &idx in indices {
            self.criterion.add(&mut stats, idx);
        }
        stats
    }

    fn grow_node(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let stats = self.stats_of(&indices);
        let cost = self.criterion.cost(&stats);
        let splittable = depth < self.params.max_depth
            && indices.len() >= self.params.min_samples_split
            && indices.len() >= 2 * self.params.min_samples_leaf.max(1)
            && cost > MIN_GAIN;
        if splittable {
            if let Some(split) = self.best_split(&indices, &stats, cost) {
                let (left, right): (Vec<usize>, Vec<usize>) = indices
                    .into_iter()
                    .partition(|idx| self.x[[*idx, split.feature]] <= split.threshold);
                self.importances[split.feature] += split.gain;
                let id = self.nodes.len();
                self.nodes.push(Node::Leaf { value: Vec::new() });
                let left = self.grow_node(left, depth + 1);
                let right = self.grow_node(right, depth + 1);
                self.nodes[id] = Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left,
                    right,
                };
                return id;
            }
        }
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.criterion.leaf_value(&stats),
        });
        id
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let n_features = self.x.ncols();
        match self.params.max_features {
            Some(k) if k < n_features => {
                rand::seq::index::sample(&mut *self.rng, n_features, k.max(1)).into_vec()
            }
            _ => (0..n_features).collect(),
        }
    }

    fn best_split(
        &mut self,
        indices: &[usize],
        total: &C::Stats,
        parent_cost: f64,
    ) -> Option<SplitCandidate> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;
        let mut order = indices.to_vec();
        for feature in self.candidate_features() {
            let x = self.x;
            order.sort_by(|a, b| x[[*a, feature]].total_cmp(&x[[*b, feature]]));
            let mut left = self.criterion.empty();
            let mut right = total.clone();
            for pos in 0..order.len() - 1 {
                let idx = order[pos];
                self.criterion.add(&mut left, idx);
                self.criterion.remove(&mut right, idx);
                let n_left = pos + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }
                let current = x[[idx, feature]];
                let next = x[[order[pos + 1], feature]];
                if next <= current {
                    continue;
                }
                let gain =
                    parent_cost - self.criterion.cost(&left) - self.criterion.cost(&right);
                if gain > best.as_ref().map_or(MIN_GAIN, |split| split.gain) {
                    let mut threshold = current + (next - current) / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Scales raw importances to sum to one; all-zero input stays zero.
pub(crate) fn normalize(importances: &mut [f64]) {
    let total: f64 = importances.iter().sum();
    if total > 0.0 {
        for value in importances.iter_mut() {
            *value /= total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const PARAMS: TreeParams = TreeParams {
        max_depth: 4,
        min_samples_split: 2,
        min_samples_leaf: 1,
        max_features: None,
    };

    #[test]
    fn gini_tree_separates_threshold_classes() {
        let x = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0], [7.0, 5.0], [8.0, 5.0], [9.0, 5.0]];
        let labels = [0, 0, 0, 1, 1, 1];
        let weights = [1.0; 6];
        let gini = Gini {
            labels: &labels,
            weights: &weights,
            n_classes: 2,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (tree, importances) =
            TreeGrower::new(&x, &gini, PARAMS, &mut rng).grow((0..6).collect());
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf(array![2.5, 0.0].view()), [1.0, 0.0]);
        assert_eq!(tree.leaf(array![8.5, 0.0].view()), [0.0, 1.0]);
        assert!(importances[0] > 0.0);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn respects_depth_and_leaf_limits() {
        let x = Array2::from_shape_fn((32, 1), |(i, _)| i as f64);
        let labels: Vec<usize> = (0..32).map(|i| i % 2).collect();
        let weights = vec![1.0; 32];
        let gini = Gini {
            labels: &labels,
            weights: &weights,
            n_classes: 2,
        };
        let params = TreeParams {
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 3,
            max_features: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (tree, _) = TreeGrower::new(&x, &gini, params, &mut rng).grow((0..32).collect());
        assert!(tree.depth() <= 3);
        assert!(tree.node_count() <= 15);
    }

    #[test]
    fn newton_leaf_uses_scaled_ratio() {
        let x = array![[0.0], [0.0], [1.0], [1.0]];
        let targets = [0.5, 0.5, -0.5, -0.5];
        let hessians = [0.25; 4];
        let criterion = NewtonRegression {
            targets: &targets,
            hessians: &hessians,
            leaf_scale: 0.5,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (tree, _) = TreeGrower::new(&x, &criterion, PARAMS, &mut rng).grow((0..4).collect());
        assert_eq!(tree.leaf(array![0.0].view()), [1.0]);
        assert_eq!(tree.leaf(array![1.0].view()), [-1.0]);
    }

    #[test]
    fn normalize_handles_zero_total() {
        let mut zeros = [0.0, 0.0];
        normalize(&mut zeros);
        assert_eq!(zeros, [0.0, 0.0]);
        let mut values = [1.0, 3.0];
        normalize(&mut values);
        assert_eq!(values, [0.25, 0.75]);
    }
}
