//! Elastic-net family solver (ridge <-> lasso via the mixing parameter)

use super::correlation::pearson;
use super::cross_validation::KFold;
use super::linalg::{normalized_penalty, CoordinateDescent, Standardized};
use super::{log_fit, r_squared, ScoreRow, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
use crate::error::{RegulonError, Result};
use ndarray::{Array1, Array2, Axis};
use std::time::Instant;

pub const MIN_SAMPLES: usize = 3;

const DEFAULT_ALPHA: f64 = 0.5;
const DEFAULT_N_LAMBDA: usize = 50;
const DEFAULT_N_FOLDS: usize = 5;

/// Penalty chosen by cross-validation along a lambda path
#[derive(Debug, Clone)]
pub struct LambdaSelection {
    pub lambda: f64,
    pub cv_error: f64,
}

/// Pick the lambda with the lowest mean held-out squared error.
/// Ties resolve to the larger (sparser) lambda.
pub(crate) fn select_lambda(
    x: &Array2<f64>,
    y: &Array1<f64>,
    cd: &CoordinateDescent,
    penalty: &[f64],
    n_lambda: usize,
    n_folds: usize,
    seed: u64,
) -> Result<LambdaSelection> {
    let full = Standardized::new(x, y);
    let lambda_max = cd.lambda_max(&full.x, &full.y, penalty);
    let path = cd.lambda_path(lambda_max, n_lambda, x.nrows(), x.ncols());
    let splits = KFold::new(n_folds, seed).split(x.nrows())?;

    let mut errors = vec![0.0; path.len()];
    for split in &splits {
        let x_train = x.select(Axis(0), &split.train_indices);
        let y_train = y.select(Axis(0), &split.train_indices);
        let x_test = x.select(Axis(0), &split.test_indices);
        let y_test = y.select(Axis(0), &split.test_indices);
        let s = Standardized::new(&x_train, &y_train);

        let mut warm: Option<Array1<f64>> = None;
        for (k, &lambda) in path.iter().enumerate() {
            let fit = cd.fit(&s.x, &s.y, lambda, penalty, warm.as_ref());
            let (coef, intercept) = s.unscale(&fit.beta);
            let pred = x_test.dot(&coef) + intercept;
            errors[k] += (&pred - &y_test).mapv(|v| v * v).sum();
            warm = Some(fit.beta);
        }
    }

    let n = x.nrows() as f64;
    let (best, cv_error) = errors
        .iter()
        .map(|e| e / n)
        .enumerate()
        .fold((0usize, f64::INFINITY), |acc, (k, e)| if e < acc.1 { (k, e) } else { acc });

    if !cv_error.is_finite() {
        return Err(RegulonError::degenerate("elastic-net", "cross-validation error is not finite"));
    }
    Ok(LambdaSelection {
        lambda: path[best],
        cv_error,
    })
}

/// Score = |coefficient|, aux `beta` (signed) and `correlation`;
/// metrics `alpha`, `lambda`, optional `cv_error`/`r_squared`.
#[derive(Debug, Clone)]
pub struct ElasticNetSolver {
    kind: SolverKind,
    input: SolverInput,
    alpha: f64,
    lambda: Option<f64>,
    n_lambda: usize,
    n_folds: usize,
    max_iter: usize,
    tol: f64,
    seed: Option<u64>,
    keep_metrics: bool,
}

impl ElasticNetSolver {
    pub fn new(input: SolverInput, params: &SolverParams) -> Result<Self> {
        let alpha = SolverParams::unit_interval("alpha", params.alpha, DEFAULT_ALPHA)?;
        Self::build(SolverKind::ElasticNet, input, params, alpha)
    }

    /// Pure L1 penalty
    pub fn lasso(input: SolverInput, params: &SolverParams) -> Result<Self> {
        Self::build(SolverKind::Lasso, input, params, 1.0)
    }

    /// Pure L2 penalty
    pub fn ridge(input: SolverInput, params: &SolverParams) -> Result<Self> {
        Self::build(SolverKind::Ridge, input, params, 0.0)
    }

    fn build(kind: SolverKind, input: SolverInput, params: &SolverParams, alpha: f64) -> Result<Self> {
        let lambda = params
            .lambda
            .map(|l| SolverParams::positive("lambda", Some(l), l))
            .transpose()?;
        let seed = if lambda.is_none() {
            Some(params.required_seed(kind)?)
        } else {
            params.seed
        };
        Ok(Self {
            kind,
            input,
            alpha,
            lambda,
            n_lambda: SolverParams::at_least("n_lambda", params.n_lambda, DEFAULT_N_LAMBDA, 1)?,
            n_folds: SolverParams::at_least("n_folds", params.n_folds, DEFAULT_N_FOLDS, 2)?,
            max_iter: SolverParams::at_least("max_iter", params.max_iter, 10_000, 1)?,
            tol: SolverParams::positive("tol", params.tol, 1e-7)?,
            seed,
            keep_metrics: params.keep_metrics,
        })
    }
}

impl Solver for ElasticNetSolver {
    fn kind(&self) -> SolverKind {
        self.kind
    }

    fn input(&self) -> &SolverInput {
        &self.input
    }

    fn fit(&self) -> Result<ScoreTable> {
        self.input.require_samples(self.kind)?;
        let start = Instant::now();
        let (x, y) = self.input.design()?;
        if y.var(0.0) <= 1e-24 {
            return Err(RegulonError::degenerate(
                self.kind.id(),
                format!("target '{}' has zero variance", self.input.target()),
            ));
        }

        let penalty = normalized_penalty(self.input.weights());
        let cd = CoordinateDescent::new(self.alpha)
            .with_max_iter(self.max_iter)
            .with_tol(self.tol);

        let (lambda, cv_error) = match self.lambda {
            Some(l) => (l, None),
            None => {
                let seed = self
                    .seed
                    .ok_or_else(|| RegulonError::invalid_param("seed", "none", "needed for the lambda search"))?;
                let sel = select_lambda(&x, &y, &cd, &penalty, self.n_lambda, self.n_folds, seed)?;
                (sel.lambda, Some(sel.cv_error))
            }
        };

        let s = Standardized::new(&x, &y);
        let fit = cd.fit(&s.x, &s.y, lambda, &penalty, None);
        if !fit.converged {
            return Err(RegulonError::degenerate(
                self.kind.id(),
                format!("coordinate descent did not converge in {} iterations", fit.iterations),
            ));
        }
        let (coef, intercept) = s.unscale(&fit.beta);
        if coef.iter().any(|c| !c.is_finite()) {
            return Err(RegulonError::degenerate(self.kind.id(), "non-finite coefficients"));
        }

        let mut table = ScoreTable::new(self.kind, self.input.target())
            .with_metric("alpha", self.alpha)
            .with_metric("lambda", lambda);
        for (j, name) in self.input.candidates().iter().enumerate() {
            let cor = pearson(x.column(j), y.view()).unwrap_or(0.0);
            table.push(
                ScoreRow::new(name.clone(), coef[j].abs())
                    .with_aux("beta", coef[j])
                    .with_aux("correlation", cor),
            );
        }
        if self.keep_metrics {
            table = table
                .with_metric("r_squared", r_squared(&x, &y, &coef, intercept))
                .with_metric("intercept", intercept)
                .with_metric("iterations", fit.iterations as f64);
            if let Some(e) = cv_error {
                table = table.with_metric("cv_error", e);
            }
        }

        log_fit(&self.input, &table, start.elapsed());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::test_support::{names, toy_matrix, toy_matrix_with_flat};
    use std::sync::Arc;

    #[test]
    fn test_driver_ranks_first() {
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2", "G3", "G4"])).unwrap();
        let solver = ElasticNetSolver::new(input, &SolverParams::new().with_seed(3)).unwrap();
        let table = solver.fit().unwrap();
        assert_eq!(table.ranked()[0].regulator, "G2");
        assert!(table.metrics.contains_key("lambda"));
        assert!(table.get("G2").unwrap().aux["beta"] > 0.0);
    }

    #[test]
    fn test_flat_regulator_gets_zero_coefficient() {
        let input = SolverInput::new(toy_matrix_with_flat(), "G1", &names(&["G2", "FLAT", "G3"])).unwrap();
        let table = ElasticNetSolver::lasso(input, &SolverParams::new().with_seed(3)).unwrap().fit().unwrap();
        let flat = table.get("FLAT").unwrap();
        assert_eq!(flat.score, 0.0);
        assert_eq!(flat.aux["correlation"], 0.0);
        assert_eq!(table.ranked()[0].regulator, "G2");
    }

    #[test]
    fn test_seed_required_without_lambda() {
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2"])).unwrap();
        let err = ElasticNetSolver::lasso(input, &SolverParams::default()).unwrap_err();
        assert!(matches!(err, RegulonError::InvalidParameter { .. }));
    }

    #[test]
    fn test_fixed_lambda_needs_no_seed() {
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2", "G3"])).unwrap();
        let solver = ElasticNetSolver::ridge(input, &SolverParams::new().with_lambda(0.1)).unwrap();
        let table = solver.fit().unwrap();
        assert_eq!(table.metrics["lambda"], 0.1);
        assert_eq!(table.metrics["alpha"], 0.0);
    }

    #[test]
    fn test_alpha_out_of_range() {
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2"])).unwrap();
        let params = SolverParams::new().with_alpha(1.5).with_seed(1);
        assert!(ElasticNetSolver::new(input, &params).is_err());
    }

    #[test]
    fn test_reproducible_with_seed() {
        let m = toy_matrix();
        let cands = names(&["G2", "G3", "G4"]);
        let params = SolverParams::new().with_seed(11).with_keep_metrics(true);
        let a = ElasticNetSolver::new(SolverInput::new(Arc::clone(&m), "G1", &cands).unwrap(), &params)
            .unwrap()
            .fit()
            .unwrap();
        let b = ElasticNetSolver::new(SolverInput::new(m, "G1", &cands).unwrap(), &params)
            .unwrap()
            .fit()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_heavy_weight_suppresses_regulator() {
        let m = toy_matrix();
        let cands = names(&["G2", "G3"]);
        let mut w = std::collections::HashMap::new();
        w.insert("G2".to_string(), 1000.0);
        let input = SolverInput::new(m, "G1", &cands).unwrap().with_weights(&w).unwrap();
        let table = ElasticNetSolver::lasso(input, &SolverParams::new().with_lambda(10.0))
            .unwrap()
            .fit()
            .unwrap();
        assert_eq!(table.get("G2").unwrap().score, 0.0);
    }
}
