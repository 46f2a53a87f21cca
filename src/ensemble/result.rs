//! Ensemble output table

use crate::error::{Result, SolverFailure};
use crate::solvers::{ScoreTable, SolverKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Degradation recorded while dispatching solvers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWarning {
    pub solver: SolverKind,
    /// Regulators left absent in this solver's column; empty when the
    /// whole solver dropped out
    pub regulators: Vec<String>,
    pub message: String,
}

impl EnsembleWarning {
    pub fn solver_failed(solver: SolverKind, message: impl Into<String>) -> Self {
        Self {
            solver,
            regulators: Vec::new(),
            message: message.into(),
        }
    }

    pub fn regulator_dropped(solver: SolverKind, regulator: &str, message: impl Into<String>) -> Self {
        Self {
            solver,
            regulators: vec![regulator.to_string()],
            message: message.into(),
        }
    }
}

impl fmt::Display for EnsembleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.regulators.is_empty() {
            write!(f, "{} dropped: {}", self.solver, self.message)
        } else {
            write!(f, "{} skipped {}: {}", self.solver, self.regulators.join(", "), self.message)
        }
    }
}

/// One regulator of the consensus ranking. `raw` and `normalized` are
/// aligned with [`EnsembleResult::solvers`]; `None` marks a solver that
/// did not score the regulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleRow {
    pub regulator: String,
    pub raw: Vec<Option<f64>>,
    pub normalized: Vec<Option<f64>>,
    pub consensus: f64,
    /// Solvers that scored this regulator
    pub n_solvers: usize,
    pub concordance: f64,
}

impl EnsembleRow {
    pub(crate) fn order(a: &EnsembleRow, b: &EnsembleRow) -> Ordering {
        b.consensus
            .total_cmp(&a.consensus)
            .then_with(|| b.n_solvers.cmp(&a.n_solvers))
            .then_with(|| a.regulator.cmp(&b.regulator))
    }
}

/// Merged, normalized and ranked output of an ensemble run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub target: String,
    /// Contributing solvers in canonical order
    pub solvers: Vec<SolverKind>,
    /// Name of the reducer that produced `consensus`
    pub reducer: String,
    /// Sorted by consensus, then solver count, then name
    pub rows: Vec<EnsembleRow>,
    /// Agreement across solvers on regulators every solver scored
    pub kendall_w: Option<f64>,
    pub warnings: Vec<EnsembleWarning>,
    pub failures: Vec<SolverFailure>,
    /// Per-solver score tables, kept on request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tables: Option<Vec<ScoreTable>>,
}

impl EnsembleResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, regulator: &str) -> Option<&EnsembleRow> {
        self.rows.iter().find(|r| r.regulator == regulator)
    }

    /// 1-based position in the ranking
    pub fn rank_of(&self, regulator: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.regulator == regulator).map(|i| i + 1)
    }

    pub fn regulators(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.regulator.as_str()).collect()
    }

    pub fn column(&self, solver: SolverKind) -> Option<usize> {
        self.solvers.iter().position(|&s| s == solver)
    }

    pub fn normalized(&self, regulator: &str, solver: SolverKind) -> Option<f64> {
        let j = self.column(solver)?;
        self.get(regulator)?.normalized[j]
    }

    pub fn raw(&self, regulator: &str, solver: SolverKind) -> Option<f64> {
        let j = self.column(solver)?;
        self.get(regulator)?.raw[j]
    }

    pub fn top(&self, k: usize) -> &[EnsembleRow] {
        &self.rows[..k.min(self.rows.len())]
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
