//! regulon - ensemble ranking of transcriptional regulators
//!
//! Given an expression matrix (rows = genes, columns = samples), a target
//! gene and a list of candidate regulators, several independent
//! regression and association techniques score every candidate and their
//! rank-normalized scores are reduced to one consensus ranking.
//!
//! # Modules
//!
//! - [`matrix`] - named expression matrix
//! - [`solvers`] - solver contract and base solvers (elastic net, lasso,
//!   ridge, sqrt-lasso, p-value lasso, random forest, Pearson, Spearman,
//!   Bayesian spike-and-slab)
//! - [`ensemble`] - dispatch, normalization and consensus reduction
//! - [`filter`] - candidate filters
//! - [`config`] - serializable ensemble configuration
//! - [`utils`] - matrix loading from delimited text
//! - [`cli`] - command-line interface
//!
//! ```no_run
//! use regulon::prelude::*;
//! use std::sync::Arc;
//!
//! let matrix = Arc::new(DataLoader::new().load("expression.csv")?);
//! let candidates: Vec<String> = vec!["TF1".into(), "TF2".into()];
//! let request = EnsembleRequest::new("GENE1", &candidates)
//!     .with_solvers(&["elastic-net", "pearson", "random-forest"])
//!     .with_seed(7);
//! let result = Ensemble::new().run(matrix, &request)?;
//! println!("{}", result.rows[0].regulator);
//! # Ok::<(), regulon::error::RegulonError>(())
//! ```

pub mod error;
pub mod matrix;
pub mod solvers;
pub mod ensemble;
pub mod filter;
pub mod config;
pub mod utils;
pub mod cli;

pub use error::{RegulonError, Result};

pub mod prelude {
    pub use crate::config::{EnsembleConfig, ReducerChoice};
    pub use crate::ensemble::{
        ConsensusReducer, Ensemble, EnsembleRequest, EnsembleResult, EnsembleRow, EnsembleWarning,
        ExecutionContext, MeanRank, MetaModel, PcaMax, DEFAULT_SEED,
    };
    pub use crate::error::{RegulonError, Result};
    pub use crate::filter::{AllowListFilter, CandidateFilter, FilterChain, VarianceFilter};
    pub use crate::matrix::ExpressionMatrix;
    pub use crate::solvers::{build_solver, ScoreRow, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
    pub use crate::utils::DataLoader;
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
