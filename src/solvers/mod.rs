//! Solver contract and base solvers
//!
//! Every fitting strategy is constructed from a validated [`SolverInput`]
//! plus a [`SolverParams`] bag, and produces a fresh [`ScoreTable`] from
//! `fit`. Strategies:
//! - Elastic net family (lasso, ridge and everything in between)
//! - Square-root lasso
//! - P-value penalized lasso
//! - Random forest importance
//! - Pearson and Spearman correlation
//! - Bayesian spike-and-slab regression

pub mod bayes_spike_slab;
pub mod correlation;
pub mod cross_validation;
pub mod decision_tree;
pub mod elastic_net;
pub mod linalg;
pub mod pvalue_lasso;
pub mod random_forest;
pub mod sqrt_lasso;

pub use bayes_spike_slab::BayesSpikeSlabSolver;
pub use correlation::{PearsonSolver, SpearmanSolver};
pub use elastic_net::ElasticNetSolver;
pub use pvalue_lasso::PValueLassoSolver;
pub use random_forest::RandomForestSolver;
pub use sqrt_lasso::SqrtLassoSolver;

use crate::error::{RegulonError, Result};
use crate::matrix::ExpressionMatrix;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Closed set of fitting strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    ElasticNet,
    Lasso,
    Ridge,
    SqrtLasso,
    PValueLasso,
    RandomForest,
    Pearson,
    Spearman,
    BayesSpikeSlab,
}

impl SolverKind {
    /// All kinds in canonical order; ensemble columns follow this order
    pub const ALL: [SolverKind; 9] = [
        SolverKind::ElasticNet,
        SolverKind::Lasso,
        SolverKind::Ridge,
        SolverKind::SqrtLasso,
        SolverKind::PValueLasso,
        SolverKind::RandomForest,
        SolverKind::Pearson,
        SolverKind::Spearman,
        SolverKind::BayesSpikeSlab,
    ];

    /// Stable identifier used in configuration and output columns
    pub fn id(&self) -> &'static str {
        match self {
            SolverKind::ElasticNet => "elastic-net",
            SolverKind::Lasso => "lasso",
            SolverKind::Ridge => "ridge",
            SolverKind::SqrtLasso => "sqrt-lasso",
            SolverKind::PValueLasso => "p-value-lasso",
            SolverKind::RandomForest => "random-forest",
            SolverKind::Pearson => "pearson",
            SolverKind::Spearman => "spearman",
            SolverKind::BayesSpikeSlab => "bayes-spike-slab",
        }
    }

    /// Minimum number of samples the strategy accepts
    pub fn min_samples(&self) -> usize {
        match self {
            SolverKind::RandomForest => random_forest::MIN_SAMPLES,
            SolverKind::PValueLasso => pvalue_lasso::MIN_SAMPLES,
            SolverKind::Pearson | SolverKind::Spearman => correlation::MIN_SAMPLES,
            SolverKind::SqrtLasso => sqrt_lasso::MIN_SAMPLES,
            SolverKind::BayesSpikeSlab => bayes_spike_slab::MIN_SAMPLES,
            SolverKind::ElasticNet | SolverKind::Lasso | SolverKind::Ridge => elastic_net::MIN_SAMPLES,
        }
    }

    /// Whether the fit consumes randomness and therefore needs a seed
    pub fn is_stochastic(&self, params: &SolverParams) -> bool {
        match self {
            SolverKind::RandomForest | SolverKind::PValueLasso | SolverKind::BayesSpikeSlab => true,
            // internal penalty search shuffles folds
            SolverKind::ElasticNet | SolverKind::Lasso | SolverKind::Ridge => params.lambda.is_none(),
            SolverKind::SqrtLasso | SolverKind::Pearson | SolverKind::Spearman => false,
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SolverKind {
    type Err = RegulonError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        SolverKind::ALL
            .iter()
            .copied()
            .find(|k| k.id() == normalized)
            .ok_or_else(|| RegulonError::UnknownSolver(s.to_string()))
    }
}

/// Per-solver parameter bag. Each solver reads the fields it understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Elastic-net mixing parameter in [0, 1] (0 = ridge, 1 = lasso)
    pub alpha: Option<f64>,
    /// Fixed penalty strength; searched internally when absent
    pub lambda: Option<f64>,
    /// Folds for the internal penalty search
    pub n_folds: Option<usize>,
    /// Length of the penalty path searched
    pub n_lambda: Option<usize>,
    pub max_iter: Option<usize>,
    pub tol: Option<f64>,
    pub n_trees: Option<usize>,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: Option<usize>,
    /// Fraction of regulators tried at each split
    pub max_features: Option<f64>,
    pub n_permutations: Option<usize>,
    pub burn_in: Option<usize>,
    pub n_iter: Option<usize>,
    /// Prior probability that a regulator is included
    pub prior_inclusion: Option<f64>,
    /// Slab variance relative to the noise variance
    pub slab_variance: Option<f64>,
    pub seed: Option<u64>,
    /// Record fit-level metrics such as r_squared
    pub keep_metrics: bool,
}

impl SolverParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = Some(lambda);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = Some(n_trees);
        self
    }

    pub fn with_n_permutations(mut self, n: usize) -> Self {
        self.n_permutations = Some(n);
        self
    }

    pub fn with_iterations(mut self, burn_in: usize, n_iter: usize) -> Self {
        self.burn_in = Some(burn_in);
        self.n_iter = Some(n_iter);
        self
    }

    pub fn with_keep_metrics(mut self, keep: bool) -> Self {
        self.keep_metrics = keep;
        self
    }

    /// Fields set in `overrides` win over fields set in `self`
    pub fn merged_with(&self, overrides: &SolverParams) -> SolverParams {
        SolverParams {
            alpha: overrides.alpha.or(self.alpha),
            lambda: overrides.lambda.or(self.lambda),
            n_folds: overrides.n_folds.or(self.n_folds),
            n_lambda: overrides.n_lambda.or(self.n_lambda),
            max_iter: overrides.max_iter.or(self.max_iter),
            tol: overrides.tol.or(self.tol),
            n_trees: overrides.n_trees.or(self.n_trees),
            max_depth: overrides.max_depth.or(self.max_depth),
            min_samples_leaf: overrides.min_samples_leaf.or(self.min_samples_leaf),
            max_features: overrides.max_features.or(self.max_features),
            n_permutations: overrides.n_permutations.or(self.n_permutations),
            burn_in: overrides.burn_in.or(self.burn_in),
            n_iter: overrides.n_iter.or(self.n_iter),
            prior_inclusion: overrides.prior_inclusion.or(self.prior_inclusion),
            slab_variance: overrides.slab_variance.or(self.slab_variance),
            seed: overrides.seed.or(self.seed),
            keep_metrics: overrides.keep_metrics || self.keep_metrics,
        }
    }

    /// Seed for a stochastic strategy; absence is a configuration error
    pub(crate) fn required_seed(&self, kind: SolverKind) -> Result<u64> {
        self.seed.ok_or_else(|| {
            RegulonError::invalid_param("seed", "none", &format!("{} is stochastic and needs an explicit seed", kind))
        })
    }

    pub(crate) fn unit_interval(name: &str, value: Option<f64>, default: f64) -> Result<f64> {
        let v = value.unwrap_or(default);
        if !(0.0..=1.0).contains(&v) {
            return Err(RegulonError::invalid_param(name, v, "must lie in [0, 1]"));
        }
        Ok(v)
    }

    pub(crate) fn positive(name: &str, value: Option<f64>, default: f64) -> Result<f64> {
        let v = value.unwrap_or(default);
        if !(v.is_finite() && v > 0.0) {
            return Err(RegulonError::invalid_param(name, v, "must be positive and finite"));
        }
        Ok(v)
    }

    pub(crate) fn at_least(name: &str, value: Option<usize>, default: usize, min: usize) -> Result<usize> {
        let v = value.unwrap_or(default);
        if v < min {
            return Err(RegulonError::invalid_param(name, v, &format!("must be at least {}", min)));
        }
        Ok(v)
    }
}

/// Validated target/candidate inputs shared by every solver
#[derive(Debug, Clone)]
pub struct SolverInput {
    matrix: Arc<ExpressionMatrix>,
    target: String,
    candidates: Vec<String>,
    weights: Vec<f64>,
    quiet: bool,
}

impl SolverInput {
    /// Validate a target and candidate list against the matrix.
    ///
    /// The target is removed from the candidates, candidates missing
    /// from the matrix are dropped silently and duplicates collapse to
    /// their first occurrence.
    pub fn new(matrix: Arc<ExpressionMatrix>, target: &str, candidates: &[String]) -> Result<Self> {
        if !matrix.has_row(target) {
            return Err(RegulonError::InvalidTarget(target.to_string()));
        }

        let mut seen = HashSet::new();
        let usable: Vec<String> = candidates
            .iter()
            .filter(|c| c.as_str() != target && matrix.has_row(c))
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();

        if usable.is_empty() {
            return Err(RegulonError::InvalidCandidateSet(format!(
                "none of {} candidate(s) remain for target '{}' after intersecting with the matrix",
                candidates.len(),
                target
            )));
        }

        let weights = vec![1.0; usable.len()];
        Ok(Self {
            matrix,
            target: target.to_string(),
            candidates: usable,
            weights,
            quiet: true,
        })
    }

    /// Attach per-candidate penalty weights; absent candidates keep weight 1
    pub fn with_weights(mut self, weights: &HashMap<String, f64>) -> Result<Self> {
        for (name, &w) in weights {
            if !(w.is_finite() && w > 0.0) {
                return Err(RegulonError::invalid_param(
                    &format!("weight[{}]", name),
                    w,
                    "must be positive and finite",
                ));
            }
        }
        self.weights = self
            .candidates
            .iter()
            .map(|c| weights.get(c).copied().unwrap_or(1.0))
            .collect();
        Ok(self)
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn matrix(&self) -> &ExpressionMatrix {
        &self.matrix
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Weights aligned with `candidates()`
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn quiet(&self) -> bool {
        self.quiet
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.n_samples()
    }

    /// Samples x candidates design matrix and target vector
    pub fn design(&self) -> Result<(Array2<f64>, Array1<f64>)> {
        let x = self.matrix.design_matrix(&self.candidates)?;
        let y = self.matrix.row_vector(&self.target)?;
        Ok((x, y))
    }

    pub(crate) fn require_samples(&self, kind: SolverKind) -> Result<()> {
        let required = kind.min_samples();
        if self.n_samples() < required {
            return Err(RegulonError::InsufficientData {
                solver: kind.id().to_string(),
                required,
                actual: self.n_samples(),
            });
        }
        Ok(())
    }

    /// Same request without the given regulators
    pub fn without(&self, regulators: &[String]) -> Result<Self> {
        let drop: HashSet<&str> = regulators.iter().map(|s| s.as_str()).collect();
        let (candidates, weights): (Vec<String>, Vec<f64>) = self
            .candidates
            .iter()
            .zip(self.weights.iter())
            .filter(|(c, _)| !drop.contains(c.as_str()))
            .map(|(c, &w)| (c.clone(), w))
            .unzip();
        if candidates.is_empty() {
            return Err(RegulonError::InvalidCandidateSet(format!(
                "no candidates left for target '{}' after excluding {} regulator(s)",
                self.target,
                regulators.len()
            )));
        }
        Ok(Self {
            matrix: Arc::clone(&self.matrix),
            target: self.target.clone(),
            candidates,
            weights,
            quiet: self.quiet,
        })
    }
}

/// One regulator's score from a single solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub regulator: String,
    /// Primary score; scale and sign are solver-specific
    pub score: f64,
    /// Solver-specific side statistics (p_value, beta, correlation, ...)
    pub aux: BTreeMap<String, f64>,
}

impl ScoreRow {
    pub fn new(regulator: impl Into<String>, score: f64) -> Self {
        Self {
            regulator: regulator.into(),
            score,
            aux: BTreeMap::new(),
        }
    }

    pub fn with_aux(mut self, key: &str, value: f64) -> Self {
        self.aux.insert(key.to_string(), value);
        self
    }

    /// Magnitude used for ranking; larger means more important
    pub fn importance(&self) -> f64 {
        self.score.abs()
    }
}

/// Output of one solver fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTable {
    pub solver: SolverKind,
    pub target: String,
    pub rows: Vec<ScoreRow>,
    /// Fit-level statistics (selected lambda, r_squared, ...)
    pub metrics: BTreeMap<String, f64>,
}

impl ScoreTable {
    pub fn new(solver: SolverKind, target: &str) -> Self {
        Self {
            solver,
            target: target.to_string(),
            rows: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, row: ScoreRow) {
        self.rows.push(row);
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, regulator: &str) -> Option<&ScoreRow> {
        self.rows.iter().find(|r| r.regulator == regulator)
    }

    pub fn regulators(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.regulator.as_str()).collect()
    }

    /// Rows ordered by descending importance, name as tiebreak
    pub fn ranked(&self) -> Vec<&ScoreRow> {
        let mut rows: Vec<&ScoreRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            b.importance()
                .total_cmp(&a.importance())
                .then_with(|| a.regulator.cmp(&b.regulator))
        });
        rows
    }
}

/// Common contract of every fitting strategy
pub trait Solver: Send + Sync {
    fn kind(&self) -> SolverKind;

    fn input(&self) -> &SolverInput;

    /// Fit and score every candidate. Never mutates the input matrix.
    fn fit(&self) -> Result<ScoreTable>;
}

/// Construct the solver for `kind`
pub fn build_solver(kind: SolverKind, input: SolverInput, params: &SolverParams) -> Result<Box<dyn Solver>> {
    let solver: Box<dyn Solver> = match kind {
        SolverKind::ElasticNet => Box::new(ElasticNetSolver::new(input, params)?),
        SolverKind::Lasso => Box::new(ElasticNetSolver::lasso(input, params)?),
        SolverKind::Ridge => Box::new(ElasticNetSolver::ridge(input, params)?),
        SolverKind::SqrtLasso => Box::new(SqrtLassoSolver::new(input, params)?),
        SolverKind::PValueLasso => Box::new(PValueLassoSolver::new(input, params)?),
        SolverKind::RandomForest => Box::new(RandomForestSolver::new(input, params)?),
        SolverKind::Pearson => Box::new(PearsonSolver::new(input, params)?),
        SolverKind::Spearman => Box::new(SpearmanSolver::new(input, params)?),
        SolverKind::BayesSpikeSlab => Box::new(BayesSpikeSlabSolver::new(input, params)?),
    };
    Ok(solver)
}

pub(crate) fn log_fit(input: &SolverInput, table: &ScoreTable, elapsed: Duration) {
    let top = table.ranked().first().map(|r| r.regulator.clone()).unwrap_or_default();
    if input.quiet() {
        tracing::debug!(
            solver = %table.solver,
            target_gene = %table.target,
            n_regulators = table.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "fit complete"
        );
    } else {
        tracing::info!(
            solver = %table.solver,
            target_gene = %table.target,
            n_regulators = table.len(),
            top = %top,
            elapsed_ms = elapsed.as_millis() as u64,
            "fit complete"
        );
    }
}

/// R² of a linear predictor
pub(crate) fn r_squared(x: &Array2<f64>, y: &Array1<f64>, beta: &Array1<f64>, intercept: f64) -> f64 {
    let pred = x.dot(beta) + intercept;
    let ym = y.mean().unwrap_or(0.0);
    let ss_res = (&pred - y).mapv(|v| v * v).sum();
    let ss_tot = y.mapv(|v| (v - ym).powi(2)).sum();
    if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("pearson".parse::<SolverKind>().unwrap(), SolverKind::Pearson);
        assert_eq!("Random_Forest".parse::<SolverKind>().unwrap(), SolverKind::RandomForest);
        assert_eq!("bayes-spike-slab".parse::<SolverKind>().unwrap(), SolverKind::BayesSpikeSlab);
        assert!(matches!(
            "glmnet".parse::<SolverKind>(),
            Err(RegulonError::UnknownSolver(_))
        ));
        for kind in SolverKind::ALL {
            assert_eq!(kind.id().parse::<SolverKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_input_drops_target_and_unknown() {
        let m = toy_matrix();
        let input = SolverInput::new(m, "G1", &names(&["G1", "G2", "GX", "G2"])).unwrap();
        assert_eq!(input.candidates(), &names(&["G2"])[..]);
        assert_eq!(input.weights(), &[1.0]);
    }

    #[test]
    fn test_input_invalid_target() {
        let res = SolverInput::new(toy_matrix(), "NOPE", &names(&["G2"]));
        assert!(matches!(res, Err(RegulonError::InvalidTarget(_))));
    }

    #[test]
    fn test_input_empty_candidates() {
        let res = SolverInput::new(toy_matrix(), "G1", &names(&["G1", "GX"]));
        assert!(matches!(res, Err(RegulonError::InvalidCandidateSet(_))));
    }

    #[test]
    fn test_weights_aligned_and_validated() {
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2", "G3"])).unwrap();
        let mut w = HashMap::new();
        w.insert("G3".to_string(), 4.0);
        w.insert("G9".to_string(), 2.0);
        let input = input.with_weights(&w).unwrap();
        assert_eq!(input.weights(), &[1.0, 4.0]);

        w.insert("G2".to_string(), -1.0);
        assert!(input.with_weights(&w).is_err());
    }

    #[test]
    fn test_without_keeps_weights_aligned() {
        let mut w = HashMap::new();
        w.insert("G4".to_string(), 3.0);
        let input = SolverInput::new(toy_matrix(), "G1", &names(&["G2", "G3", "G4"]))
            .unwrap()
            .with_weights(&w)
            .unwrap();
        let reduced = input.without(&names(&["G3"])).unwrap();
        assert_eq!(reduced.candidates(), &names(&["G2", "G4"])[..]);
        assert_eq!(reduced.weights(), &[1.0, 3.0]);
        assert!(input.without(&names(&["G2", "G3", "G4"])).is_err());
    }

    #[test]
    fn test_params_merge() {
        let base = SolverParams::new().with_alpha(0.5).with_seed(1);
        let over = SolverParams::new().with_seed(9);
        let merged = base.merged_with(&over);
        assert_eq!(merged.alpha, Some(0.5));
        assert_eq!(merged.seed, Some(9));
    }

    #[test]
    fn test_params_deserialize_partial() {
        let p: SolverParams = serde_json::from_str(r#"{"alpha": 0.2, "n_trees": 50}"#).unwrap();
        assert_eq!(p.alpha, Some(0.2));
        assert_eq!(p.n_trees, Some(50));
        assert!(p.seed.is_none());
    }

    #[test]
    fn test_every_solver_scores_each_candidate_once() {
        let m = toy_matrix();
        let cands = names(&["G2", "G3", "G4", "G1"]);
        let params = SolverParams::new()
            .with_seed(7)
            .with_n_trees(20)
            .with_n_permutations(20)
            .with_iterations(50, 200);
        for kind in SolverKind::ALL {
            let input = SolverInput::new(Arc::clone(&m), "G1", &cands).unwrap();
            let table = build_solver(kind, input, &params).unwrap().fit().unwrap();
            assert_eq!(table.len(), 3, "{} returned {} rows", kind, table.len());
            assert!(table.get("G1").is_none(), "{} scored the target", kind);
            for name in ["G2", "G3", "G4"] {
                assert!(table.get(name).is_some(), "{} missing {}", kind, name);
            }
        }
    }

    #[test]
    fn test_ranked_orders_by_magnitude() {
        let mut t = ScoreTable::new(SolverKind::Pearson, "G1");
        t.push(ScoreRow::new("A", 0.2));
        t.push(ScoreRow::new("B", -0.9));
        t.push(ScoreRow::new("C", 0.5));
        let order: Vec<&str> = t.ranked().iter().map(|r| r.regulator.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
    }
}
