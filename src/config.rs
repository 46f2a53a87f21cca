//! Serializable ensemble configuration

use crate::ensemble::{ConsensusReducer, Ensemble, EnsembleRequest, ExecutionContext, MeanRank, MetaModel, PcaMax};
use crate::error::{RegulonError, Result};
use crate::solvers::{SolverKind, SolverParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Consensus reduction selected by configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReducerChoice {
    #[default]
    MeanRank,
    PcaMax,
    /// Previously trained meta-model stored as JSON
    MetaModel { path: String },
}

impl ReducerChoice {
    pub fn build(&self) -> Result<Box<dyn ConsensusReducer>> {
        Ok(match self {
            ReducerChoice::MeanRank => Box::new(MeanRank),
            ReducerChoice::PcaMax => Box::new(PcaMax::default()),
            ReducerChoice::MetaModel { path } => Box::new(MetaModel::load(path)?),
        })
    }
}

/// Everything about a solve except the target and candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub solvers: Vec<String>,
    pub overrides: BTreeMap<String, SolverParams>,
    pub seed: Option<u64>,
    pub execution: ExecutionContext,
    pub reducer: ReducerChoice,
    pub keep_raw_tables: bool,
    pub quiet: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            solvers: ["elastic-net", "random-forest", "pearson", "spearman"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            overrides: BTreeMap::new(),
            seed: None,
            execution: ExecutionContext::Sequential,
            reducer: ReducerChoice::MeanRank,
            keep_raw_tables: false,
            quiet: true,
        }
    }
}

impl EnsembleConfig {
    pub fn new() -> Self {
        Self::default()
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

    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_reducer(mut self, reducer: ReducerChoice) -> Self {
        self.reducer = reducer;
        self
    }

    /// Check solver identifiers and override keys without fitting anything
    pub fn validate(&self) -> Result<()> {
        if self.solvers.is_empty() {
            return Err(RegulonError::ConfigError("no solvers selected".to_string()));
        }
        for s in self.solvers.iter().chain(self.overrides.keys()) {
            s.parse::<SolverKind>()?;
        }
        if let ExecutionContext::ThreadPool { n_threads } = self.execution {
            if n_threads > 1024 {
                return Err(RegulonError::ConfigError(format!(
                    "n_threads = {} is not a sensible pool size",
                    n_threads
                )));
            }
        }
        Ok(())
    }

    pub fn load(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn ensemble(&self) -> Result<Ensemble> {
        Ok(Ensemble::new()
            .with_context(self.execution)
            .with_boxed_reducer(self.reducer.build()?))
    }

    /// Request for one target under this configuration
    pub fn request(&self, target: &str, candidates: &[String]) -> EnsembleRequest {
        EnsembleRequest {
            target: target.to_string(),
            candidates: candidates.to_vec(),
            solvers: self.solvers.clone(),
            overrides: self.overrides.clone(),
            seed: self.seed,
            weights: Default::default(),
            keep_raw_tables: self.keep_raw_tables,
            quiet: self.quiet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::test_support::{names, toy_matrix};
    use ndarray::array;
    use std::sync::Arc;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EnsembleConfig = serde_json::from_str(
            r#"{
                "solvers": ["pearson", "random_forest"],
                "overrides": {"random-forest": {"n_trees": 50}},
                "execution": {"backend": "thread-pool", "n_threads": 2},
                "reducer": {"kind": "pca-max"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.solvers.len(), 2);
        assert_eq!(config.overrides["random-forest"].n_trees, Some(50));
        assert_eq!(config.execution, ExecutionContext::thread_pool(2));
        assert_eq!(config.reducer, ReducerChoice::PcaMax);
        assert!(config.quiet);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown() {
        let config = EnsembleConfig::new().with_solvers(&["pearson", "xgboost"]);
        assert!(matches!(config.validate(), Err(RegulonError::UnknownSolver(_))));
        let config = EnsembleConfig::new().with_override("bogus", SolverParams::new());
        assert!(config.validate().is_err());
        let config = EnsembleConfig::new().with_solvers::<&str>(&[]);
        assert!(matches!(config.validate(), Err(RegulonError::ConfigError(_))));
    }

    #[test]
    fn test_request_carries_settings() {
        let config = EnsembleConfig::new().with_seed(3);
        let req = config.request("G1", &["G2".to_string()]);
        assert_eq!(req.seed, Some(3));
        assert_eq!(req.solvers, config.solvers);
        assert_eq!(req.target, "G1");
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("regulon-config-{}.json", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let config = EnsembleConfig::new()
            .with_seed(11)
            .with_execution(ExecutionContext::thread_pool(4))
            .with_override("elastic-net", SolverParams::new().with_alpha(0.3));
        config.save(&path).unwrap();
        let back = EnsembleConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_meta_model_file() {
        let choice = ReducerChoice::MetaModel {
            path: "/nonexistent/regulon/meta.json".to_string(),
        };
        assert!(matches!(choice.build(), Err(RegulonError::IoError(_))));
    }

    #[test]
    fn test_meta_model_file_drives_a_run() {
        let solvers = [SolverKind::Pearson, SolverKind::Spearman];
        let features = array![[1.0, 0.9], [0.8, 1.0], [0.4, 0.5], [0.2, 0.25], [0.6, 0.3]];
        let labels = array![1.0, 1.0, 0.0, 0.0, 0.0];
        let model = MetaModel::train(&solvers, &features, &labels, 0.1).unwrap();

        let path = std::env::temp_dir().join(format!("regulon-meta-{}.json", std::process::id()));
        let path = path.to_string_lossy().to_string();
        model.save(&path).unwrap();

        let config = EnsembleConfig::new()
            .with_solvers(&["pearson", "spearman"])
            .with_reducer(ReducerChoice::MetaModel { path: path.clone() });
        let ensemble = config.ensemble().unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(ensemble.reducer_name(), "meta-model");

        let m = toy_matrix();
        let req = config.request("G1", &names(&["G2", "G3", "G4"]));
        let from_file = ensemble.run(Arc::clone(&m), &req).unwrap();
        let in_memory = Ensemble::new().with_reducer(model).run(m, &req).unwrap();
        assert_eq!(from_file.reducer, "meta-model");
        assert_eq!(from_file.len(), 3);
        assert_eq!(from_file, in_memory);
    }
}
