//! Consensus reducers over normalized per-solver columns

use super::EnsembleResult;
use crate::error::{RegulonError, Result};
use crate::solvers::linalg::solve_spd;
use crate::solvers::SolverKind;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reduces a regulators x solvers grid of normalized scores (absent =
/// `None`) to one consensus score per regulator. Larger means stronger.
pub trait ConsensusReducer: Send + Sync {
    fn name(&self) -> &str;

    fn reduce(&self, solvers: &[SolverKind], normalized: &[Vec<Option<f64>>]) -> Result<Vec<f64>>;
}

/// Mean of the normalized scores that are present
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanRank;

impl ConsensusReducer for MeanRank {
    fn name(&self) -> &str {
        "mean-rank"
    }

    fn reduce(&self, _solvers: &[SolverKind], normalized: &[Vec<Option<f64>>]) -> Result<Vec<f64>> {
        Ok(normalized.iter().map(|row| mean_present(row)).collect())
    }
}

fn mean_present(row: &[Option<f64>]) -> f64 {
    let (sum, count) = row
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Weighted mean along the leading principal component of the columns.
///
/// Absent entries are imputed with their column median. Loadings are
/// oriented to sum positive and rescaled to sum to one. Falls back to
/// [`MeanRank`] when the columns carry no variance.
#[derive(Debug, Clone, Copy)]
pub struct PcaMax {
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for PcaMax {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-12,
        }
    }
}

impl PcaMax {
    /// Loadings of the first principal component, or `None` when degenerate
    pub fn loadings(&self, grid: &Array2<f64>) -> Option<Array1<f64>> {
        let (n, k) = grid.dim();
        if n < 2 {
            return None;
        }
        let means = grid.mean_axis(Axis(0))?;
        let centered = grid - &means;
        let cov = centered.t().dot(&centered) / n as f64;

        let mut v = Array1::from_elem(k, 1.0 / (k as f64).sqrt());
        let mut eigen = 0.0;
        for _ in 0..self.max_iter {
            let w = cov.dot(&v);
            let norm = w.dot(&w).sqrt();
            if norm <= 1e-15 {
                return None;
            }
            let next = w / norm;
            let delta = (&next - &v).mapv(f64::abs).sum();
            v = next;
            eigen = norm;
            if delta <= self.tol {
                break;
            }
        }
        if eigen <= 1e-15 {
            return None;
        }

        let total = v.sum();
        if total.abs() <= 1e-12 {
            return None;
        }
        Some(v / total)
    }
}

impl ConsensusReducer for PcaMax {
    fn name(&self) -> &str {
        "pca-max"
    }

    fn reduce(&self, solvers: &[SolverKind], normalized: &[Vec<Option<f64>>]) -> Result<Vec<f64>> {
        let k = solvers.len();
        let n = normalized.len();
        if k == 1 {
            return MeanRank.reduce(solvers, normalized);
        }

        let mut grid = Array2::<f64>::zeros((n, k));
        for j in 0..k {
            let mut present: Vec<f64> = normalized.iter().filter_map(|r| r[j]).collect();
            let fill = median(&mut present).unwrap_or(0.5);
            for (i, row) in normalized.iter().enumerate() {
                grid[[i, j]] = row[j].unwrap_or(fill);
            }
        }

        match self.loadings(&grid) {
            Some(w) => Ok(grid.dot(&w).to_vec()),
            None => {
                tracing::debug!("normalized columns carry no variance, using mean rank");
                MeanRank.reduce(solvers, normalized)
            }
        }
    }
}

/// Normalized score used for a solver the meta-model knows but the
/// result lacks
pub const ABSENT_FILL: f64 = 0.5;

/// Ridge meta-model over normalized solver columns, trained by the
/// caller on labelled regulators (for example 1 = known regulator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaModel {
    solvers: Vec<SolverKind>,
    weights: Vec<f64>,
    intercept: f64,
    lambda: f64,
}

impl MetaModel {
    /// Fit `labels ~ features` with an L2 penalty on the weights.
    /// `features` columns follow `solvers`.
    pub fn train(solvers: &[SolverKind], features: &Array2<f64>, labels: &Array1<f64>, lambda: f64) -> Result<Self> {
        let (n, k) = features.dim();
        if k != solvers.len() {
            return Err(RegulonError::ShapeError {
                expected: format!("{} feature columns", solvers.len()),
                actual: format!("{} feature columns", k),
            });
        }
        if n != labels.len() {
            return Err(RegulonError::ShapeError {
                expected: format!("{} labels", n),
                actual: format!("{} labels", labels.len()),
            });
        }
        if n < 2 {
            return Err(RegulonError::DataError(format!(
                "meta-model needs at least 2 labelled regulators, got {}",
                n
            )));
        }
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(RegulonError::invalid_param("lambda", lambda, "must be non-negative and finite"));
        }

        let x_mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| RegulonError::DataError("empty feature grid".to_string()))?;
        let y_mean = labels.mean().unwrap_or(0.0);
        let xc = features - &x_mean;
        let yc = labels - y_mean;

        let mut gram = xc.t().dot(&xc);
        for j in 0..k {
            gram[[j, j]] += lambda;
        }
        let rhs = xc.t().dot(&yc);
        let w = solve_spd(&gram, &rhs).ok_or_else(|| {
            RegulonError::degenerate("meta-model", "normal equations are singular; raise lambda")
        })?;

        Ok(Self {
            solvers: solvers.to_vec(),
            intercept: y_mean - x_mean.dot(&w),
            weights: w.to_vec(),
            lambda,
        })
    }

    /// Train on the normalized columns of a previous result. Regulators
    /// without a label are skipped; absent entries use [`ABSENT_FILL`].
    pub fn train_on_result(result: &EnsembleResult, labels: &HashMap<String, f64>, lambda: f64) -> Result<Self> {
        let labelled: Vec<_> = result
            .rows
            .iter()
            .filter_map(|row| labels.get(&row.regulator).map(|&y| (row, y)))
            .collect();
        let k = result.solvers.len();
        let mut features = Array2::<f64>::zeros((labelled.len(), k));
        let mut y = Array1::<f64>::zeros(labelled.len());
        for (i, (row, label)) in labelled.iter().enumerate() {
            for j in 0..k {
                features[[i, j]] = row.normalized[j].unwrap_or(ABSENT_FILL);
            }
            y[i] = *label;
        }
        Self::train(&result.solvers, &features, &y, lambda)
    }

    pub fn solvers(&self) -> &[SolverKind] {
        &self.solvers
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn load(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&json)?;
        Ok(model)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl ConsensusReducer for MetaModel {
    fn name(&self) -> &str {
        "meta-model"
    }

    fn reduce(&self, solvers: &[SolverKind], normalized: &[Vec<Option<f64>>]) -> Result<Vec<f64>> {
        let columns: Vec<Option<usize>> = self
            .solvers
            .iter()
            .map(|kind| solvers.iter().position(|s| s == kind))
            .collect();
        Ok(normalized
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(self.weights.iter())
                    .map(|(col, w)| w * col.and_then(|j| row[j]).unwrap_or(ABSENT_FILL))
                    .sum::<f64>()
                    + self.intercept
            })
            .collect())
    }
}
