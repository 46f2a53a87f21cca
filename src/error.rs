//! Error types for regulon

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for regulon operations
pub type Result<T> = std::result::Result<T, RegulonError>;

/// One solver's failure inside an ensemble run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverFailure {
    /// Solver identifier, e.g. `random-forest`
    pub solver: String,
    /// Rendered cause
    pub message: String,
}

impl fmt::Display for SolverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.solver, self.message)
    }
}

fn join_failures(failures: &[SolverFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type
#[derive(Error, Debug)]
pub enum RegulonError {
    #[error("Invalid target: '{0}' is not a row of the expression matrix")]
    InvalidTarget(String),

    #[error("Invalid candidate set: {0}")]
    InvalidCandidateSet(String),

    #[error("Unknown solver: '{0}'")]
    UnknownSolver(String),

    #[error("Insufficient data for {solver}: need at least {required} samples, got {actual}")]
    InsufficientData {
        solver: String,
        required: usize,
        actual: usize,
    },

    #[error("Numerical degeneracy in {solver}: {reason}")]
    NumericalDegeneracy {
        solver: String,
        /// Regulators responsible for the failure; empty when the whole fit is affected
        regulators: Vec<String>,
        reason: String,
    },

    #[error("All solvers failed: {}", join_failures(.0))]
    AllSolversFailed(Vec<SolverFailure>),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RegulonError {
    /// Malformed request: aborts the whole solve before any fitting starts
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            RegulonError::InvalidTarget(_)
                | RegulonError::InvalidCandidateSet(_)
                | RegulonError::UnknownSolver(_)
                | RegulonError::InvalidParameter { .. }
        )
    }

    /// Runtime numeric failure of a single solver, degraded by the ensemble
    pub fn is_runtime_solver_error(&self) -> bool {
        matches!(
            self,
            RegulonError::InsufficientData { .. } | RegulonError::NumericalDegeneracy { .. }
        )
    }

    pub(crate) fn degenerate(solver: &str, reason: impl Into<String>) -> Self {
        RegulonError::NumericalDegeneracy {
            solver: solver.to_string(),
            regulators: Vec::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_param(name: &str, value: impl fmt::Display, reason: &str) -> Self {
        RegulonError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for RegulonError {
    fn from(err: serde_json::Error) -> Self {
        RegulonError::SerializationError(err.to_string())
    }
}

impl From<polars::error::PolarsError> for RegulonError {
    fn from(err: polars::error::PolarsError) -> Self {
        RegulonError::DataError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for RegulonError {
    fn from(err: ndarray::ShapeError) -> Self {
        RegulonError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
