//! Regression tree grown on squared-error impurity

use crate::error::{RegulonError, Result};
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

/// Regression tree with per-split feature subsampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn at each split; all when `None`
    pub max_features: Option<usize>,
    n_features: usize,
    /// Unnormalized impurity decrease per feature
    importances: Vec<f64>,
}

impl Default for RegressionTree {
    fn default() -> Self {
        Self::new()
    }
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            n_features: 0,
            importances: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self.min_samples_split = self.min_samples_split.max(2 * self.min_samples_leaf);
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features.max(1));
        self
    }

    /// Grow the tree on rows `indices` of `x`. Repeated indices act as
    /// bootstrap weights.
    pub fn fit<R: Rng>(&mut self, x: &Array2<f64>, y: &Array1<f64>, indices: &[usize], rng: &mut R) -> Result<&mut Self> {
        if x.nrows() != y.len() {
            return Err(RegulonError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if indices.is_empty() {
            return Err(RegulonError::DataError("cannot grow a tree on zero samples".to_string()));
        }

        self.n_features = x.ncols();
        let mut importances = vec![0.0; self.n_features];
        self.root = Some(self.build(x, y, indices, 0, &mut importances, rng));
        self.importances = importances;
        Ok(self)
    }

    /// Total weighted impurity decrease attributed to each feature
    pub fn impurity_decrease(&self) -> &[f64] {
        &self.importances
    }

    pub fn predict_row(&self, x: &Array2<f64>, row: usize) -> Option<f64> {
        let mut node = self.root.as_ref()?;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return Some(*value),
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if x[[row, *feature_idx]] <= *threshold { left.as_ref() } else { right.as_ref() };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        self.root.as_ref().map(walk).unwrap_or(0)
    }

    fn build<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        depth: usize,
        importances: &mut [f64],
        rng: &mut R,
    ) -> TreeNode {
        let n_samples = indices.len();
        let (mean, impurity) = mean_and_mse(y, indices);

        let should_stop = n_samples < self.min_samples_split
            || self.max_depth.map_or(false, |d| depth >= d)
            || impurity <= 1e-12;
        if should_stop {
            return TreeNode::Leaf { value: mean, n_samples };
        }

        let best = match self.best_split(x, y, indices, impurity, rng) {
            Some(c) => c,
            None => return TreeNode::Leaf { value: mean, n_samples },
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, best.feature]] <= best.threshold);

        importances[best.feature] += n_samples as f64 * best.gain;

        let left = Box::new(self.build(x, y, &left_idx, depth + 1, importances, rng));
        let right = Box::new(self.build(x, y, &right_idx, depth + 1, importances, rng));
        TreeNode::Split {
            feature_idx: best.feature,
            threshold: best.threshold,
            left,
            right,
            n_samples,
        }
    }

    fn best_split<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        parent_impurity: f64,
        rng: &mut R,
    ) -> Option<Candidate> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        let k = self.max_features.unwrap_or(self.n_features).min(self.n_features);
        if k < self.n_features {
            features.shuffle(rng);
            features.truncate(k);
        }

        let n = indices.len() as f64;
        let mut best: Option<Candidate> = None;
        for feature in features {
            // sorted (value, response) pairs; prefix sums give each split in O(1)
            let mut pairs: Vec<(f64, f64)> = indices.iter().map(|&i| (x[[i, feature]], y[i])).collect();
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
            let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;

            for i in 0..pairs.len() - 1 {
                left_sum += pairs[i].1;
                left_sq += pairs[i].1 * pairs[i].1;
                if pairs[i].0 == pairs[i + 1].0 {
                    continue;
                }
                let n_left = i + 1;
                let n_right = pairs.len() - n_left;
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }

                let left_mse = left_sq / n_left as f64 - (left_sum / n_left as f64).powi(2);
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let right_mse = right_sq / n_right as f64 - (right_sum / n_right as f64).powi(2);
                let weighted = (n_left as f64 * left_mse.max(0.0) + n_right as f64 * right_mse.max(0.0)) / n;
                let gain = parent_impurity - weighted;

                if gain > 1e-15 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Candidate {
                        feature,
                        threshold: (pairs[i].0 + pairs[i + 1].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn mean_and_mse(y: &Array1<f64>, indices: &[usize]) -> (f64, f64) {
    let n = indices.len() as f64;
    if indices.is_empty() {
        return (0.0, 0.0);
    }
    let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / n;
    let mse = indices.iter().map(|&i| (y[i] - mean).powi(2)).sum::<f64>() / n;
    (mean, mse)
}
