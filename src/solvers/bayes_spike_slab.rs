//! Bayesian spike-and-slab regression by Gibbs sampling
//!
//! On standardized data each coefficient is either exactly zero (spike)
//! or drawn from `N(0, sigma^2 * tau^2)` (slab) with prior probability
//! `pi` of inclusion. The noise variance carries a weak inverse-gamma
//! prior. Coefficient and indicator are updated jointly per regulator,
//! with the coefficient integrated out for the indicator draw.

use super::correlation::pearson;
use super::linalg::Standardized;
use super::{log_fit, ScoreRow, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
use crate::error::{RegulonError, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma, StandardNormal};
use std::time::Instant;

pub const MIN_SAMPLES: usize = 3;

const DEFAULT_BURN_IN: usize = 500;
const DEFAULT_N_ITER: usize = 2_000;
const DEFAULT_PRIOR_INCLUSION: f64 = 0.2;
const DEFAULT_SLAB_VARIANCE: f64 = 1.0;

// inverse-gamma hyperparameters for sigma^2
const SIGMA_SHAPE: f64 = 0.01;
const SIGMA_RATE: f64 = 0.01;

/// Posterior summaries on the standardized scale
#[derive(Debug, Clone)]
pub struct PosteriorSummary {
    /// Mean of beta over kept draws, zeros included
    pub beta_mean: Array1<f64>,
    /// Fraction of kept draws with the regulator included
    pub inclusion: Array1<f64>,
    pub sigma2_mean: f64,
}

#[derive(Debug, Clone, Copy)]
struct GibbsSampler {
    burn_in: usize,
    n_iter: usize,
    prior_inclusion: f64,
    slab_variance: f64,
}

impl GibbsSampler {
    fn run(&self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<PosteriorSummary> {
        let (n, p) = x.dim();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let xtx: Vec<f64> = (0..p).map(|j| x.column(j).dot(&x.column(j))).collect();
        let prior_log_odds = (self.prior_inclusion / (1.0 - self.prior_inclusion)).ln();
        let inv_tau2 = 1.0 / self.slab_variance;

        let mut beta = Array1::<f64>::zeros(p);
        let mut gamma = vec![false; p];
        let mut resid = y.clone();
        let mut sigma2 = y.dot(y) / n as f64;

        let mut beta_sum = Array1::<f64>::zeros(p);
        let mut incl_count = vec![0usize; p];
        let mut sigma2_sum = 0.0;

        for iter in 0..self.burn_in + self.n_iter {
            for j in 0..p {
                let xj = x.column(j);
                if gamma[j] {
                    resid.scaled_add(beta[j], &xj);
                }
                let prec = xtx[j] + inv_tau2;
                let xr = xj.dot(&resid);

                // Bayes factor with beta_j integrated out
                let log_bf = -0.5 * (self.slab_variance * prec).ln() + 0.5 * xr * xr / (sigma2 * prec);
                let prob = logistic(prior_log_odds + log_bf);
                if rng.gen::<f64>() < prob {
                    let z: f64 = StandardNormal.sample(&mut rng);
                    beta[j] = xr / prec + z * (sigma2 / prec).sqrt();
                    gamma[j] = true;
                    resid.scaled_add(-beta[j], &xj);
                } else {
                    beta[j] = 0.0;
                    gamma[j] = false;
                }
            }

            let k = gamma.iter().filter(|&&g| g).count();
            let slab_ss: f64 = beta.iter().map(|b| b * b).sum::<f64>() * inv_tau2;
            let shape = SIGMA_SHAPE + 0.5 * (n + k) as f64;
            let rate = SIGMA_RATE + 0.5 * (resid.dot(&resid) + slab_ss);
            let precision = Gamma::new(shape, 1.0 / rate)
                .map_err(|e| RegulonError::degenerate("bayes-spike-slab", format!("noise variance update: {}", e)))?
                .sample(&mut rng);
            sigma2 = 1.0 / precision;
            if !sigma2.is_finite() || sigma2 <= 0.0 {
                return Err(RegulonError::degenerate(
                    "bayes-spike-slab",
                    format!("noise variance left the valid range at sweep {}", iter),
                ));
            }

            if iter >= self.burn_in {
                beta_sum += &beta;
                for (c, &g) in incl_count.iter_mut().zip(gamma.iter()) {
                    *c += g as usize;
                }
                sigma2_sum += sigma2;
            }
        }

        let kept = self.n_iter as f64;
        let summary = PosteriorSummary {
            beta_mean: beta_sum / kept,
            inclusion: incl_count.iter().map(|&c| c as f64 / kept).collect(),
            sigma2_mean: sigma2_sum / kept,
        };
        if summary.beta_mean.iter().any(|b| !b.is_finite()) {
            return Err(RegulonError::degenerate("bayes-spike-slab", "non-finite posterior mean"));
        }
        Ok(summary)
    }
}

fn logistic(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

/// Score = posterior mean coefficient (spike draws count as zero), aux
/// `inclusion_probability` and `correlation`.
#[derive(Debug, Clone)]
pub struct BayesSpikeSlabSolver {
    input: SolverInput,
    sampler: GibbsSampler,
    seed: u64,
    keep_metrics: bool,
}

impl BayesSpikeSlabSolver {
    pub fn new(input: SolverInput, params: &SolverParams) -> Result<Self> {
        let prior_inclusion = params.prior_inclusion.unwrap_or(DEFAULT_PRIOR_INCLUSION);
        if !(prior_inclusion > 0.0 && prior_inclusion < 1.0) {
            return Err(RegulonError::invalid_param("prior_inclusion", prior_inclusion, "must lie in (0, 1)"));
        }
        let sampler = GibbsSampler {
            burn_in: params.burn_in.unwrap_or(DEFAULT_BURN_IN),
            n_iter: SolverParams::at_least("n_iter", params.n_iter, DEFAULT_N_ITER, 1)?,
            prior_inclusion,
            slab_variance: SolverParams::positive("slab_variance", params.slab_variance, DEFAULT_SLAB_VARIANCE)?,
        };
        Ok(Self {
            input,
            sampler,
            seed: params.required_seed(SolverKind::BayesSpikeSlab)?,
            keep_metrics: params.keep_metrics,
        })
    }
}

impl Solver for BayesSpikeSlabSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::BayesSpikeSlab
    }

    fn input(&self) -> &SolverInput {
        &self.input
    }

    fn fit(&self) -> Result<ScoreTable> {
        let kind = SolverKind::BayesSpikeSlab;
        self.input.require_samples(kind)?;
        let start = Instant::now();

        let (x, y) = self.input.design()?;
        if y.var(0.0) <= 1e-24 {
            return Err(RegulonError::degenerate(
                kind.id(),
                format!("target '{}' has zero variance", self.input.target()),
            ));
        }

        // a constant column leaves the likelihood flat, so its draws are pure prior
        let flat: Vec<String> = self
            .input
            .candidates()
            .iter()
            .enumerate()
            .filter(|(j, _)| x.column(*j).var(0.0) <= 1e-24)
            .map(|(_, name)| name.clone())
            .collect();
        if !flat.is_empty() {
            return Err(RegulonError::NumericalDegeneracy {
                solver: kind.id().to_string(),
                reason: format!("zero-variance regulator(s): {}", flat.join(", ")),
                regulators: flat,
            });
        }

        let s = Standardized::new(&x, &y);
        let posterior = self.sampler.run(&s.x, &s.y, self.seed)?;
        let (coef, intercept) = s.unscale(&posterior.beta_mean);

        let mut table = ScoreTable::new(kind, self.input.target())
            .with_metric("n_iter", self.sampler.n_iter as f64)
            .with_metric("prior_inclusion", self.sampler.prior_inclusion);
        for (j, name) in self.input.candidates().iter().enumerate() {
            let cor = pearson(x.column(j), y.view()).unwrap_or(0.0);
            table.push(
                ScoreRow::new(name.clone(), coef[j])
                    .with_aux("inclusion_probability", posterior.inclusion[j])
                    .with_aux("correlation", cor),
            );
        }
        if self.keep_metrics {
            table = table
                .with_metric("sigma2", posterior.sigma2_mean)
                .with_metric("intercept", intercept)
                .with_metric("expected_model_size", posterior.inclusion.sum());
        }

        log_fit(&self.input, &table, start.elapsed());
        Ok(table)
    }
}
