//! Ensemble combiner
//!
//! Runs a selection of solvers over one target/candidate set, rank
//! normalizes every score column and reduces the columns to a consensus
//! ranking:
//! - [`EnsembleRequest`] - what to solve and with which solvers
//! - [`ExecutionContext`] - sequential or thread-pool dispatch
//! - [`ConsensusReducer`] - mean rank, principal component or meta-model
//! - [`EnsembleResult`] - the merged table

mod context;
mod normalize;
mod reducer;
mod result;

pub use context::ExecutionContext;
pub use normalize::{concordance, kendall_w, percentile_ranks};
pub use reducer::{ConsensusReducer, MeanRank, MetaModel, PcaMax, ABSENT_FILL};
pub use result::{EnsembleResult, EnsembleRow, EnsembleWarning};

use crate::error::{RegulonError, Result, SolverFailure};
use crate::matrix::ExpressionMatrix;
use crate::solvers::{build_solver, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Seed handed to stochastic solvers when neither the request nor a
/// per-solver override supplies one
pub const DEFAULT_SEED: u64 = 42;

/// One solve request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleRequest {
    pub target: String,
    pub candidates: Vec<String>,
    /// Solver identifiers, e.g. `elastic-net`, `pearson`
    pub solvers: Vec<String>,
    /// Parameter overrides keyed by solver identifier
    pub overrides: BTreeMap<String, SolverParams>,
    pub seed: Option<u64>,
    /// Per-regulator penalty multipliers
    pub weights: HashMap<String, f64>,
    /// Return each solver's score table alongside the ranking
    pub keep_raw_tables: bool,
    pub quiet: bool,
}

impl EnsembleRequest {
    pub fn new(target: impl Into<String>, candidates: &[String]) -> Self {
        Self {
            target: target.into(),
            candidates: candidates.to_vec(),
            quiet: true,
            ..Default::default()
        }
    }

    pub fn with_solvers<S: AsRef<str>>(mut self, solvers: &[S]) -> Self {
        self.solvers = solvers.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_override(mut self, solver: &str, params: SolverParams) -> Self {
        self.overrides.insert(solver.to_string(), params);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_raw_tables(mut self, keep: bool) -> Self {
        self.keep_raw_tables = keep;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Parse solver identifiers and override keys, then attach each
    /// solver's effective parameters. Kinds come back deduplicated in
    /// canonical order, so the order solvers were listed in never
    /// matters.
    pub fn resolve(&self) -> Result<Vec<(SolverKind, SolverParams)>> {
        if self.solvers.is_empty() {
            return Err(RegulonError::invalid_param("solvers", "[]", "select at least one solver"));
        }
        let kinds: BTreeSet<SolverKind> = self
            .solvers
            .iter()
            .map(|s| s.parse())
            .collect::<Result<_>>()?;

        let mut overrides: HashMap<SolverKind, &SolverParams> = HashMap::new();
        for (key, params) in &self.overrides {
            let kind: SolverKind = key.parse()?;
            if !kinds.contains(&kind) {
                tracing::debug!(solver = %kind, "override for an unselected solver ignored");
            }
            overrides.insert(kind, params);
        }

        let base = SolverParams::new().with_seed(self.seed.unwrap_or(DEFAULT_SEED));
        Ok(kinds
            .into_iter()
            .map(|kind| {
                let params = match overrides.get(&kind) {
                    Some(o) => base.merged_with(o),
                    None => base.clone(),
                };
                (kind, params)
            })
            .collect())
    }
}

/// A solver fit after per-regulator degradation
struct Outcome {
    kind: SolverKind,
    result: Result<ScoreTable>,
    warnings: Vec<EnsembleWarning>,
}

/// Fit, and while the fit blames specific regulators, refit without them
fn fit_with_degradation(solver: &dyn Solver, params: &SolverParams) -> Outcome {
    let kind = solver.kind();
    let mut warnings = Vec::new();
    let mut input = solver.input().clone();
    let mut attempt = solver.fit();

    loop {
        match attempt {
            Err(RegulonError::NumericalDegeneracy { solver: name, regulators, reason }) if !regulators.is_empty() => {
                let reduced = match input.without(&regulators) {
                    Ok(r) if r.candidates().len() < input.candidates().len() => r,
                    _ => {
                        return Outcome {
                            kind,
                            result: Err(RegulonError::NumericalDegeneracy { solver: name, regulators, reason }),
                            warnings,
                        }
                    }
                };
                for regulator in &regulators {
                    warnings.push(EnsembleWarning::regulator_dropped(kind, regulator, reason.clone()));
                }
                input = reduced;
                attempt = build_solver(kind, input.clone(), params).and_then(|s| s.fit());
            }
            other => {
                return Outcome {
                    kind,
                    result: other,
                    warnings,
                }
            }
        }
    }
}

/// Ensemble combiner: execution backend plus consensus reducer
pub struct Ensemble {
    context: ExecutionContext,
    reducer: Box<dyn ConsensusReducer>,
}

impl Default for Ensemble {
    fn default() -> Self {
        Self::new()
    }
}

impl Ensemble {
    /// Sequential execution with mean-rank consensus
    pub fn new() -> Self {
        Self {
            context: ExecutionContext::default(),
            reducer: Box::new(MeanRank),
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_reducer<R: ConsensusReducer + 'static>(mut self, reducer: R) -> Self {
        self.reducer = Box::new(reducer);
        self
    }

    pub fn with_boxed_reducer(mut self, reducer: Box<dyn ConsensusReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn reducer_name(&self) -> &str {
        self.reducer.name()
    }

    /// Validate the request, fit every selected solver and merge.
    ///
    /// Malformed requests fail before any fit. A solver that runs out of
    /// samples or hits a numerical degeneracy drops out with a warning;
    /// the call fails only when every solver drops out.
    pub fn run(&self, matrix: Arc<ExpressionMatrix>, request: &EnsembleRequest) -> Result<EnsembleResult> {
        let start = Instant::now();
        let plan = request.resolve()?;

        let input = SolverInput::new(matrix, &request.target, &request.candidates)?
            .with_weights(&request.weights)?
            .with_quiet(request.quiet);

        // construct everything first so a bad parameter aborts before fitting
        let solvers: Vec<(Box<dyn Solver>, SolverParams)> = plan
            .into_iter()
            .map(|(kind, params)| Ok((build_solver(kind, input.clone(), &params)?, params)))
            .collect::<Result<_>>()?;

        let outcomes = self
            .context
            .map(&solvers, |(solver, params)| fit_with_degradation(solver.as_ref(), params))?;

        let mut tables = Vec::new();
        let mut warnings = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            warnings.extend(outcome.warnings);
            match outcome.result {
                Ok(table) => tables.push(table),
                Err(e) if e.is_runtime_solver_error() => {
                    warnings.push(EnsembleWarning::solver_failed(outcome.kind, e.to_string()));
                    failures.push(SolverFailure {
                        solver: outcome.kind.id().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        for w in &warnings {
            tracing::warn!(solver = %w.solver, regulators = ?w.regulators, "{}", w.message);
        }
        if tables.is_empty() {
            return Err(RegulonError::AllSolversFailed(failures));
        }

        let mut result = self.combine(&request.target, &tables)?;
        result.warnings = warnings;
        result.failures = failures;
        if request.keep_raw_tables {
            result.raw_tables = Some(tables);
        }

        let top = result.rows.first().map(|r| r.regulator.as_str()).unwrap_or_default();
        if request.quiet {
            tracing::debug!(
                target_gene = %result.target,
                solvers = result.solvers.len(),
                regulators = result.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "ensemble complete"
            );
        } else {
            tracing::info!(
                target_gene = %result.target,
                solvers = result.solvers.len(),
                regulators = result.len(),
                top = %top,
                kendall_w = ?result.kendall_w,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "ensemble complete"
            );
        }
        Ok(result)
    }

    /// Normalize and reduce already-fitted score tables.
    ///
    /// Rows are the union of the tables' regulators; a regulator a
    /// table did not score is absent in that column, never zero.
    pub fn combine(&self, target: &str, tables: &[ScoreTable]) -> Result<EnsembleResult> {
        if tables.is_empty() {
            return Err(RegulonError::AllSolversFailed(Vec::new()));
        }
        let mut ordered: Vec<&ScoreTable> = tables.iter().collect();
        ordered.sort_by_key(|t| t.solver);
        let solvers: Vec<SolverKind> = ordered.iter().map(|t| t.solver).collect();

        let columns: Vec<HashMap<&str, (f64, f64)>> = ordered
            .iter()
            .map(|t| {
                t.rows
                    .iter()
                    .zip(percentile_ranks(t))
                    .map(|(row, p)| (row.regulator.as_str(), (row.score, p)))
                    .collect()
            })
            .collect();

        let regulators: BTreeSet<&str> = ordered
            .iter()
            .flat_map(|t| t.rows.iter().map(|r| r.regulator.as_str()))
            .collect();

        let mut raw = Vec::with_capacity(regulators.len());
        let mut normalized = Vec::with_capacity(regulators.len());
        for name in &regulators {
            raw.push(columns.iter().map(|c| c.get(name).map(|v| v.0)).collect::<Vec<_>>());
            normalized.push(columns.iter().map(|c| c.get(name).map(|v| v.1)).collect::<Vec<_>>());
        }

        let consensus = self.reducer.reduce(&solvers, &normalized)?;
        if consensus.len() != regulators.len() || consensus.iter().any(|c| !c.is_finite()) {
            return Err(RegulonError::degenerate(
                "ensemble",
                format!("reducer '{}' produced an invalid consensus column", self.reducer.name()),
            ));
        }
        let kendall = kendall_w(&normalized);

        let mut rows: Vec<EnsembleRow> = regulators
            .iter()
            .zip(raw)
            .zip(normalized)
            .zip(consensus)
            .map(|(((name, raw), normalized), consensus)| {
                let present: Vec<f64> = normalized.iter().flatten().copied().collect();
                EnsembleRow {
                    regulator: name.to_string(),
                    n_solvers: present.len(),
                    concordance: concordance(&present),
                    raw,
                    normalized,
                    consensus,
                }
            })
            .collect();
        rows.sort_by(EnsembleRow::order);

        Ok(EnsembleResult {
            target: target.to_string(),
            solvers,
            reducer: self.reducer.name().to_string(),
            rows,
            kendall_w: kendall,
            warnings: Vec::new(),
            failures: Vec::new(),
            raw_tables: None,
        })
    }
}
