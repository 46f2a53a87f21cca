//! Lasso with permutation p-values per regulator

use super::correlation::pearson;
use super::elastic_net::select_lambda;
use super::linalg::{normalized_penalty, CoordinateDescent, Standardized};
use super::{log_fit, ScoreRow, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
use crate::error::{RegulonError, Result};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::time::Instant;

pub const MIN_SAMPLES: usize = 4;

const DEFAULT_PERMUTATIONS: usize = 200;

/// Score = lasso coefficient, aux `p_value` (empirical, permutation of
/// the target at the selected lambda) and `correlation`.
#[derive(Debug, Clone)]
pub struct PValueLassoSolver {
    input: SolverInput,
    lambda: Option<f64>,
    n_permutations: usize,
    n_folds: usize,
    n_lambda: usize,
    max_iter: usize,
    tol: f64,
    seed: u64,
}

impl PValueLassoSolver {
    pub fn new(input: SolverInput, params: &SolverParams) -> Result<Self> {
        let lambda = params
            .lambda
            .map(|l| SolverParams::positive("lambda", Some(l), l))
            .transpose()?;
        Ok(Self {
            input,
            lambda,
            n_permutations: SolverParams::at_least("n_permutations", params.n_permutations, DEFAULT_PERMUTATIONS, 1)?,
            n_folds: SolverParams::at_least("n_folds", params.n_folds, 5, 2)?,
            n_lambda: SolverParams::at_least("n_lambda", params.n_lambda, 50, 1)?,
            max_iter: SolverParams::at_least("max_iter", params.max_iter, 10_000, 1)?,
            tol: SolverParams::positive("tol", params.tol, 1e-7)?,
            seed: params.required_seed(SolverKind::PValueLasso)?,
        })
    }
}

impl Solver for PValueLassoSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::PValueLasso
    }

    fn input(&self) -> &SolverInput {
        &self.input
    }

    fn fit(&self) -> Result<ScoreTable> {
        let kind = SolverKind::PValueLasso;
        self.input.require_samples(kind)?;
        let start = Instant::now();

        let (x, y) = self.input.design()?;
        if y.var(0.0) <= 1e-24 {
            return Err(RegulonError::degenerate(
                kind.id(),
                format!("target '{}' has zero variance", self.input.target()),
            ));
        }

        let penalty = normalized_penalty(self.input.weights());
        let cd = CoordinateDescent::new(1.0)
            .with_max_iter(self.max_iter)
            .with_tol(self.tol);
        let lambda = match self.lambda {
            Some(l) => l,
            None => select_lambda(&x, &y, &cd, &penalty, self.n_lambda, self.n_folds, self.seed)?.lambda,
        };

        let s = Standardized::new(&x, &y);
        let observed = cd.fit(&s.x, &s.y, lambda, &penalty, None);
        if !observed.converged {
            return Err(RegulonError::degenerate(kind.id(), "lasso fit did not converge"));
        }

        // one independent stream per permutation keeps results thread-count independent
        let exceed: Vec<Vec<bool>> = (0..self.n_permutations)
            .into_par_iter()
            .map(|b| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(b as u64 + 1));
                let mut perm = s.y.to_vec();
                perm.shuffle(&mut rng);
                let fit = cd.fit(&s.x, &Array1::from(perm), lambda, &penalty, None);
                fit.beta
                    .iter()
                    .zip(observed.beta.iter())
                    .map(|(bp, bo)| bp.abs() >= bo.abs())
                    .collect()
            })
            .collect();

        let (coef, _) = s.unscale(&observed.beta);
        let denom = (self.n_permutations + 1) as f64;
        let mut table = ScoreTable::new(kind, self.input.target())
            .with_metric("lambda", lambda)
            .with_metric("n_permutations", self.n_permutations as f64);
        for (j, name) in self.input.candidates().iter().enumerate() {
            let hits = exceed.iter().filter(|row| row[j]).count();
            let p_value = (hits + 1) as f64 / denom;
            let cor = pearson(x.column(j), y.view()).unwrap_or(0.0);
            table.push(
                ScoreRow::new(name.clone(), coef[j])
                    .with_aux("p_value", p_value)
                    .with_aux("correlation", cor),
            );
        }

        log_fit(&self.input, &table, start.elapsed());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::test_support::{names, toy_matrix};

    #[test]
    fn test_driver_has_small_p_value() {
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2", "G3", "G4"])).unwrap();
        let params = SolverParams::new().with_seed(5).with_n_permutations(99);
        let table = PValueLassoSolver::new(input, &params).unwrap().fit().unwrap();
        let g2 = table.get("G2").unwrap();
        assert!(g2.score > 0.0);
        assert!(g2.aux["p_value"] <= 0.05, "p = {}", g2.aux["p_value"]);
        for row in &table.rows {
            let p = row.aux["p_value"];
            assert!(p > 0.0 && p <= 1.0);
        }
    }

    #[test]
    fn test_requires_seed() {
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2"])).unwrap();
        assert!(matches!(
            PValueLassoSolver::new(input, &SolverParams::default()),
            Err(RegulonError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_same_seed_same_table() {
        let m = toy_matrix();
        let cands = names(&["G2", "G3", "G4"]);
        let params = SolverParams::new().with_seed(21).with_n_permutations(30);
        let a = PValueLassoSolver::new(SolverInput::new(m.clone(), "G1", &cands).unwrap(), &params)
            .unwrap()
            .fit()
            .unwrap();
        let b = PValueLassoSolver::new(SolverInput::new(m, "G1", &cands).unwrap(), &params)
            .unwrap()
            .fit()
            .unwrap();
        assert_eq!(a, b);
    }
}
