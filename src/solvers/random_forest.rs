//! Random-forest variable importance (mean decrease in impurity)

use super::decision_tree::RegressionTree;
use super::{log_fit, ScoreRow, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
use crate::error::{RegulonError, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::time::Instant;

/// Bootstrap samples below this leave too few distinct rows per tree
pub const MIN_SAMPLES: usize = 8;

const DEFAULT_TREES: usize = 500;

/// Features tried per split
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxFeatures {
    Sqrt,
    Fraction(f64),
}

impl MaxFeatures {
    fn resolve(&self, n_features: usize) -> usize {
        match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
        }
        .clamp(1, n_features.max(1))
    }
}

/// One grown tree plus the rows it never saw
struct GrownTree {
    tree: RegressionTree,
    out_of_bag: Vec<usize>,
}

/// Score = normalized mean decrease in impurity (sums to 1 over
/// regulators), aux `impurity_decrease` (unnormalized, averaged over trees).
/// With `keep_metrics` the table also carries `oob_r_squared` and
/// `mean_depth`.
#[derive(Debug, Clone)]
pub struct RandomForestSolver {
    input: SolverInput,
    n_trees: usize,
    max_depth: Option<usize>,
    min_samples_leaf: usize,
    max_features: MaxFeatures,
    seed: u64,
    keep_metrics: bool,
}

impl RandomForestSolver {
    pub fn new(input: SolverInput, params: &SolverParams) -> Result<Self> {
        let max_features = match params.max_features {
            None => MaxFeatures::Sqrt,
            Some(f) if f > 0.0 && f <= 1.0 => MaxFeatures::Fraction(f),
            Some(f) => return Err(RegulonError::invalid_param("max_features", f, "must lie in (0, 1]")),
        };
        let max_depth = params
            .max_depth
            .map(|d| SolverParams::at_least("max_depth", Some(d), d, 1))
            .transpose()?;
        Ok(Self {
            input,
            n_trees: SolverParams::at_least("n_trees", params.n_trees, DEFAULT_TREES, 1)?,
            max_depth,
            min_samples_leaf: SolverParams::at_least("min_samples_leaf", params.min_samples_leaf, 1, 1)?,
            max_features,
            seed: params.required_seed(SolverKind::RandomForest)?,
            keep_metrics: params.keep_metrics,
        })
    }

    fn grow(&self, x: &Array2<f64>, y: &Array1<f64>) -> Vec<Result<GrownTree>> {
        let n_samples = x.nrows();
        let mtry = self.max_features.resolve(x.ncols());

        (0..self.n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(tree_idx as u64));
                let sample: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                let mut seen = vec![false; n_samples];
                for &i in &sample {
                    seen[i] = true;
                }
                let out_of_bag = (0..n_samples).filter(|&i| !seen[i]).collect();

                let mut tree = RegressionTree::new()
                    .with_max_depth(self.max_depth)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(mtry);
                tree.fit(x, y, &sample, &mut rng)?;
                Ok(GrownTree { tree, out_of_bag })
            })
            .collect()
    }
}

/// R² of out-of-bag predictions; `None` when no row was ever out of bag
fn oob_r_squared(trees: &[GrownTree], x: &Array2<f64>, y: &Array1<f64>) -> Option<f64> {
    let n = x.nrows();
    let mut sum = vec![0.0; n];
    let mut count = vec![0usize; n];
    for grown in trees {
        for &i in &grown.out_of_bag {
            if let Some(p) = grown.tree.predict_row(x, i) {
                sum[i] += p;
                count[i] += 1;
            }
        }
    }
    let rows: Vec<usize> = (0..n).filter(|&i| count[i] > 0).collect();
    if rows.len() < 2 {
        return None;
    }
    let mean = rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64;
    let ss_tot: f64 = rows.iter().map(|&i| (y[i] - mean).powi(2)).sum();
    let ss_res: f64 = rows
        .iter()
        .map(|&i| (y[i] - sum[i] / count[i] as f64).powi(2))
        .sum();
    (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot)
}

impl Solver for RandomForestSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::RandomForest
    }

    fn input(&self) -> &SolverInput {
        &self.input
    }

    fn fit(&self) -> Result<ScoreTable> {
        let kind = SolverKind::RandomForest;
        self.input.require_samples(kind)?;
        let start = Instant::now();

        let (x, y) = self.input.design()?;
        if y.var(0.0) <= 1e-24 {
            return Err(RegulonError::degenerate(
                kind.id(),
                format!("target '{}' has zero variance", self.input.target()),
            ));
        }

        let trees = self.grow(&x, &y).into_iter().collect::<Result<Vec<_>>>()?;

        let p = x.ncols();
        let mut mean_decrease = vec![0.0; p];
        for grown in &trees {
            for (acc, v) in mean_decrease.iter_mut().zip(grown.tree.impurity_decrease()) {
                *acc += v;
            }
        }
        let n_trees = trees.len() as f64;
        for v in &mut mean_decrease {
            *v /= n_trees;
        }

        let total: f64 = mean_decrease.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(RegulonError::degenerate(kind.id(), "no split reduced impurity in any tree"));
        }

        let mut table = ScoreTable::new(kind, self.input.target())
            .with_metric("n_trees", n_trees)
            .with_metric("max_features", self.max_features.resolve(p) as f64);
        for (j, name) in self.input.candidates().iter().enumerate() {
            table.push(
                ScoreRow::new(name.clone(), mean_decrease[j] / total)
                    .with_aux("impurity_decrease", mean_decrease[j]),
            );
        }
        if self.keep_metrics {
            if let Some(r2) = oob_r_squared(&trees, &x, &y) {
                table = table.with_metric("oob_r_squared", r2);
            }
            let mean_depth = trees.iter().map(|g| g.tree.depth() as f64).sum::<f64>() / n_trees;
            table = table.with_metric("mean_depth", mean_depth);
        }

        log_fit(&self.input, &table, start.elapsed());
        Ok(table)
    }
}
