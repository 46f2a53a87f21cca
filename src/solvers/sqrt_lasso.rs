//! Square-root lasso via the scaled-lasso fixed point
//!
//! Minimizes `|y - X b|_2 / sqrt(n) + lambda * sum_j pf_j |b_j|`. The
//! noise level is estimated jointly, so the default penalty does not
//! depend on the residual variance.

use super::correlation::pearson;
use super::linalg::{normalized_penalty, CoordinateDescent, Standardized};
use super::{log_fit, r_squared, ScoreRow, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
use crate::error::{RegulonError, Result};
use statrs::distribution::{ContinuousCDF, Normal};
use std::time::Instant;

pub const MIN_SAMPLES: usize = 3;

const MAX_OUTER: usize = 200;

/// Pivotal penalty `1.1 * z(1 - 0.05 / (2p)) / sqrt(n)`
pub fn default_lambda(n_samples: usize, n_regulators: usize) -> f64 {
    let q = 1.0 - 0.05 / (2.0 * n_regulators.max(1) as f64);
    let z = Normal::new(0.0, 1.0).map(|d| d.inverse_cdf(q)).unwrap_or(1.96);
    1.1 * z / (n_samples as f64).sqrt()
}

/// Score = coefficient, aux `correlation`; metrics `lambda`, `sigma`
#[derive(Debug, Clone)]
pub struct SqrtLassoSolver {
    input: SolverInput,
    lambda: Option<f64>,
    max_iter: usize,
    tol: f64,
    keep_metrics: bool,
}

impl SqrtLassoSolver {
    pub fn new(input: SolverInput, params: &SolverParams) -> Result<Self> {
        let lambda = params
            .lambda
            .map(|l| SolverParams::positive("lambda", Some(l), l))
            .transpose()?;
        Ok(Self {
            input,
            lambda,
            max_iter: SolverParams::at_least("max_iter", params.max_iter, 10_000, 1)?,
            tol: SolverParams::positive("tol", params.tol, 1e-7)?,
            keep_metrics: params.keep_metrics,
        })
    }
}

impl Solver for SqrtLassoSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::SqrtLasso
    }

    fn input(&self) -> &SolverInput {
        &self.input
    }

    fn fit(&self) -> Result<ScoreTable> {
        let kind = SolverKind::SqrtLasso;
        self.input.require_samples(kind)?;
        let start = Instant::now();

        let (x, y) = self.input.design()?;
        let s = Standardized::new(&x, &y);
        let n = x.nrows() as f64;
        let y_sd = (s.y.mapv(|v| v * v).sum() / n).sqrt();
        if y_sd <= 1e-12 {
            return Err(RegulonError::degenerate(
                kind.id(),
                format!("target '{}' has zero variance", self.input.target()),
            ));
        }

        let lambda = self
            .lambda
            .unwrap_or_else(|| default_lambda(x.nrows(), x.ncols()));
        let penalty = normalized_penalty(self.input.weights());
        let cd = CoordinateDescent::new(1.0)
            .with_max_iter(self.max_iter)
            .with_tol(self.tol);

        let mut sigma = y_sd;
        let mut beta = None;
        let mut converged = false;
        for _ in 0..MAX_OUTER {
            let fit = cd.fit(&s.x, &s.y, lambda * sigma, &penalty, beta.as_ref());
            if !fit.converged {
                return Err(RegulonError::degenerate(
                    kind.id(),
                    "inner coordinate descent did not converge",
                ));
            }
            let resid = &s.y - &s.x.dot(&fit.beta);
            let next = (resid.mapv(|v| v * v).sum() / n).sqrt();
            beta = Some(fit.beta);
            if next <= 1e-10 * y_sd {
                return Err(RegulonError::degenerate(
                    kind.id(),
                    "residual scale collapsed to zero (perfect fit)",
                ));
            }
            let delta = (next - sigma).abs();
            sigma = next;
            if delta <= 1e-8 * y_sd {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(RegulonError::degenerate(
                kind.id(),
                format!("noise scale did not settle within {} rounds", MAX_OUTER),
            ));
        }

        let beta = beta.ok_or_else(|| RegulonError::degenerate(kind.id(), "no fit produced"))?;
        let (coef, intercept) = s.unscale(&beta);

        let mut table = ScoreTable::new(kind, self.input.target())
            .with_metric("lambda", lambda)
            .with_metric("sigma", sigma);
        for (j, name) in self.input.candidates().iter().enumerate() {
            let cor = pearson(x.column(j), y.view()).unwrap_or(0.0);
            table.push(ScoreRow::new(name.clone(), coef[j]).with_aux("correlation", cor));
        }
        if self.keep_metrics {
            table = table
                .with_metric("r_squared", r_squared(&x, &y, &coef, intercept))
                .with_metric("intercept", intercept);
        }

        log_fit(&self.input, &table, start.elapsed());
        Ok(table)
    }
}
