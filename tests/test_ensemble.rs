//! Integration tests for the ensemble combiner

use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use regulon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// G2 tracks G1 closely, G3 is uncorrelated with it
fn five_sample_matrix() -> Arc<ExpressionMatrix> {
    Arc::new(
        ExpressionMatrix::from_rows(vec![
            ("G1", vec![1.0, 2.0, 3.0, 4.0, 5.0]),
            ("G2", vec![1.1, 2.3, 2.8, 4.2, 4.9]),
            ("G3", vec![2.0, 1.0, 3.0, 1.0, 2.0]),
        ])
        .unwrap(),
    )
}

fn synthetic(n: usize, seed: u64) -> Arc<ExpressionMatrix> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let tfs: Vec<Vec<f64>> = (0..8)
        .map(|_| (0..n).map(|_| normal.sample(&mut rng)).collect())
        .collect();
    let target: Vec<f64> = (0..n)
        .map(|i| 1.8 * tfs[0][i] + 1.2 * tfs[1][i] + 0.4 * normal.sample(&mut rng))
        .collect();
    let mut rows = vec![("TARGET".to_string(), target)];
    for (k, tf) in tfs.into_iter().enumerate() {
        rows.push((format!("TF{}", k), tf));
    }
    Arc::new(ExpressionMatrix::from_rows(rows).unwrap())
}

fn tfs() -> Vec<String> {
    (0..8).map(|k| format!("TF{}", k)).collect()
}

fn fast_overrides(req: EnsembleRequest) -> EnsembleRequest {
    req.with_override("random-forest", SolverParams::new().with_n_trees(80))
        .with_override("p-value-lasso", SolverParams::new().with_n_permutations(40))
        .with_override("bayes-spike-slab", SolverParams::new().with_iterations(200, 800))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_correlated_regulator_ranks_first() {
    let req = EnsembleRequest::new("G1", &names(&["G2", "G3"])).with_solvers(&["pearson", "spearman"]);
    let result = Ensemble::new().run(five_sample_matrix(), &req).unwrap();

    assert_eq!(result.regulators(), vec!["G2", "G3"]);
    assert!(result.get("G2").unwrap().consensus > result.get("G3").unwrap().consensus);
    assert!(result.warnings.is_empty());
}

#[test]
fn test_target_listed_as_candidate_is_ignored() {
    let req = EnsembleRequest::new("G1", &names(&["G1", "G2", "G3"])).with_solvers(&["pearson"]);
    let result = Ensemble::new().run(five_sample_matrix(), &req).unwrap();
    assert!(result.get("G1").is_none());
    assert_eq!(result.len(), 2);
}

#[test]
fn test_no_valid_candidates_fails_once() {
    let req = EnsembleRequest::new("G1", &names(&["G1", "G9"])).with_solvers(&["pearson", "spearman"]);
    let err = Ensemble::new().run(five_sample_matrix(), &req).unwrap_err();
    assert!(matches!(err, RegulonError::InvalidCandidateSet(_)), "{:?}", err);
}

#[test]
fn test_invalid_target_fails() {
    let req = EnsembleRequest::new("G9", &names(&["G2"])).with_solvers(&["pearson"]);
    let err = Ensemble::new().run(five_sample_matrix(), &req).unwrap_err();
    assert!(matches!(err, RegulonError::InvalidTarget(_)));
}

#[test]
fn test_unknown_solver_fails_before_fitting() {
    let req = EnsembleRequest::new("G1", &names(&["G2"])).with_solvers(&["pearson", "neural-net"]);
    let err = Ensemble::new().run(five_sample_matrix(), &req).unwrap_err();
    assert!(matches!(err, RegulonError::UnknownSolver(ref s) if s == "neural-net"));
}

#[test]
fn test_short_matrix_drops_forest_keeps_pearson() {
    let req = EnsembleRequest::new("G1", &names(&["G2", "G3"])).with_solvers(&["random-forest", "pearson"]);
    let result = Ensemble::new().run(five_sample_matrix(), &req).unwrap();

    assert_eq!(result.solvers, vec![SolverKind::Pearson]);
    assert_eq!(result.regulators(), vec!["G2", "G3"]);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].solver, SolverKind::RandomForest);
    assert!(result.warnings[0].regulators.is_empty());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].solver, "random-forest");
}

#[test]
fn test_all_solvers_failing_is_an_error() {
    let req = EnsembleRequest::new("G1", &names(&["G2", "G3"])).with_solvers(&["random-forest"]);
    match Ensemble::new().run(five_sample_matrix(), &req) {
        Err(RegulonError::AllSolversFailed(causes)) => {
            assert_eq!(causes.len(), 1);
            assert!(causes[0].message.contains("need at least 8 samples"), "{}", causes[0]);
        }
        other => panic!("expected AllSolversFailed, got {:?}", other.map(|r| r.len())),
    }
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_rows_are_union_of_solver_outputs() {
    let m = synthetic(30, 1);
    let flat: Vec<(String, Vec<f64>)> = m
        .row_names()
        .iter()
        .map(|n| (n.clone(), m.row(n).unwrap().to_vec()))
        .chain(std::iter::once(("FLAT".to_string(), vec![0.5; 30])))
        .collect();
    let m = Arc::new(ExpressionMatrix::from_rows(flat).unwrap());

    let mut cands = tfs();
    cands.push("FLAT".to_string());
    let req = EnsembleRequest::new("TARGET", &cands)
        .with_solvers(&["pearson", "random-forest"])
        .with_override("random-forest", SolverParams::new().with_n_trees(50))
        .with_raw_tables(true);
    let result = Ensemble::new().run(m, &req).unwrap();

    let union: BTreeSet<String> = result
        .raw_tables
        .as_ref()
        .unwrap()
        .iter()
        .flat_map(|t| t.rows.iter().map(|r| r.regulator.clone()))
        .collect();
    let rows: BTreeSet<String> = result.rows.iter().map(|r| r.regulator.clone()).collect();
    assert_eq!(rows, union);

    // pearson cannot score the flat row, the forest can
    let flat_row = result.get("FLAT").unwrap();
    assert_eq!(result.normalized("FLAT", SolverKind::Pearson), None);
    assert!(result.normalized("FLAT", SolverKind::RandomForest).is_some());
    assert_eq!(flat_row.n_solvers, 1);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.solver == SolverKind::Pearson && w.regulators == vec!["FLAT".to_string()]));
}

#[test]
fn test_normalized_columns_are_percentiles() {
    let req = fast_overrides(
        EnsembleRequest::new("TARGET", &tfs())
            .with_solvers(&["elastic-net", "sqrt-lasso", "random-forest", "pearson", "spearman", "bayes-spike-slab"])
            .with_seed(3),
    );
    let result = Ensemble::new().run(synthetic(30, 2), &req).unwrap();

    for (j, kind) in result.solvers.iter().enumerate() {
        let cells: Vec<(f64, f64)> = result
            .rows
            .iter()
            .filter_map(|r| Some((r.raw[j]?.abs(), r.normalized[j]?)))
            .collect();
        assert!(cells.iter().all(|(_, p)| *p > 0.0 && *p <= 1.0), "{} out of range", kind);
        for a in &cells {
            for b in &cells {
                if a.0 > b.0 {
                    assert!(a.1 > b.1, "{} not monotone: {:?} vs {:?}", kind, a, b);
                } else if a.0 == b.0 {
                    assert_eq!(a.1, b.1);
                }
            }
        }
    }
}

#[test]
fn test_solver_order_does_not_matter() {
    let m = synthetic(30, 3);
    let forward = fast_overrides(
        EnsembleRequest::new("TARGET", &tfs())
            .with_solvers(&["pearson", "spearman", "elastic-net", "random-forest", "p-value-lasso"])
            .with_seed(5),
    );
    let backward = fast_overrides(
        EnsembleRequest::new("TARGET", &tfs())
            .with_solvers(&["p-value-lasso", "random-forest", "elastic-net", "spearman", "pearson"])
            .with_seed(5),
    );
    let a = Ensemble::new().run(Arc::clone(&m), &forward).unwrap();
    let b = Ensemble::new().run(m, &backward).unwrap();
    assert_eq!(a.regulators(), b.regulators());
    for (ra, rb) in a.rows.iter().zip(b.rows.iter()) {
        assert_relative_eq!(ra.consensus, rb.consensus, epsilon = 1e-12);
    }
}

#[test]
fn test_same_seed_same_result_across_backends() {
    let m = synthetic(30, 4);
    let req = fast_overrides(
        EnsembleRequest::new("TARGET", &tfs())
            .with_solvers(&["random-forest", "p-value-lasso", "bayes-spike-slab", "lasso"])
            .with_seed(11),
    );
    let sequential = Ensemble::new().run(Arc::clone(&m), &req).unwrap();
    let again = Ensemble::new().run(Arc::clone(&m), &req).unwrap();
    let pooled = Ensemble::new()
        .with_context(ExecutionContext::thread_pool(4))
        .run(m, &req)
        .unwrap();
    assert_eq!(sequential, again);
    assert_eq!(sequential, pooled);
}

#[test]
fn test_planted_drivers_lead_the_consensus() {
    let req = fast_overrides(
        EnsembleRequest::new("TARGET", &tfs())
            .with_solvers(&[
                "elastic-net",
                "lasso",
                "ridge",
                "sqrt-lasso",
                "p-value-lasso",
                "random-forest",
                "pearson",
                "spearman",
                "bayes-spike-slab",
            ])
            .with_seed(21),
    );
    let result = Ensemble::new().run(synthetic(50, 5), &req).unwrap();
    let top: BTreeSet<&str> = result.top(2).iter().map(|r| r.regulator.as_str()).collect();
    assert_eq!(top, ["TF0", "TF1"].into_iter().collect());
    assert_eq!(result.solvers.len(), 9);
    assert!(result.kendall_w.unwrap() > 0.3);
    assert!(result.rows.iter().all(|r| (0.0..=1.0).contains(&r.concordance)));
}

#[test]
fn test_pca_reducer_agrees_on_leaders() {
    let req = fast_overrides(
        EnsembleRequest::new("TARGET", &tfs())
            .with_solvers(&["elastic-net", "pearson", "spearman", "random-forest"])
            .with_seed(8),
    );
    let result = Ensemble::new()
        .with_reducer(PcaMax::default())
        .run(synthetic(40, 6), &req)
        .unwrap();
    assert_eq!(result.reducer, "pca-max");
    let top: BTreeSet<&str> = result.top(2).iter().map(|r| r.regulator.as_str()).collect();
    assert_eq!(top, ["TF0", "TF1"].into_iter().collect());
}

#[test]
fn test_meta_model_trained_on_labels() {
    let req = fast_overrides(
        EnsembleRequest::new("TARGET", &tfs())
            .with_solvers(&["pearson", "random-forest", "elastic-net"])
            .with_seed(2),
    );
    let m = synthetic(40, 7);
    let baseline = Ensemble::new().run(Arc::clone(&m), &req).unwrap();

    let mut labels = HashMap::new();
    for tf in tfs() {
        let y = if tf == "TF0" || tf == "TF1" { 1.0 } else { 0.0 };
        labels.insert(tf, y);
    }
    let model = MetaModel::train_on_result(&baseline, &labels, 0.1).unwrap();
    assert_eq!(model.solvers(), &baseline.solvers[..]);

    let result = Ensemble::new().with_reducer(model).run(m, &req).unwrap();
    assert_eq!(result.reducer, "meta-model");
    let top: BTreeSet<&str> = result.top(2).iter().map(|r| r.regulator.as_str()).collect();
    assert_eq!(top, ["TF0", "TF1"].into_iter().collect());
}

#[test]
fn test_weights_reach_penalized_solvers() {
    let m = synthetic(30, 8);
    let base = EnsembleRequest::new("TARGET", &tfs())
        .with_solvers(&["lasso"])
        .with_override("lasso", SolverParams::new().with_lambda(0.3))
        .with_raw_tables(true);
    let plain = Ensemble::new().run(Arc::clone(&m), &base).unwrap();

    let mut w = HashMap::new();
    w.insert("TF0".to_string(), 50.0);
    let weighted = Ensemble::new().run(m, &base.clone().with_weights(w)).unwrap();

    let raw = |r: &EnsembleResult| r.raw("TF0", SolverKind::Lasso).unwrap();
    assert!(raw(&plain) > 0.0);
    assert!(raw(&weighted) < raw(&plain));
}

#[test]
fn test_config_drives_a_run() {
    let config = EnsembleConfig::new()
        .with_solvers(&["pearson", "spearman"])
        .with_execution(ExecutionContext::thread_pool(2))
        .with_reducer(ReducerChoice::PcaMax);
    let ensemble = config.ensemble().unwrap();
    let result = ensemble
        .run(five_sample_matrix(), &config.request("G1", &names(&["G2", "G3"])))
        .unwrap();
    assert_eq!(result.rows[0].regulator, "G2");
    let json = result.to_json().unwrap();
    let back: EnsembleResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}
