//! Integration tests for candidate filters feeding the ensemble

use regulon::prelude::*;
use std::sync::Arc;

fn matrix() -> Arc<ExpressionMatrix> {
    Arc::new(
        ExpressionMatrix::from_rows(vec![
            ("T", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            ("A", vec![1.2, 1.9, 3.1, 4.2, 4.8, 6.1]),
            ("B", vec![3.0, 1.0, 2.0, 2.5, 1.5, 2.2]),
            ("C", vec![0.1, 0.1, 0.1, 0.1, 0.1, 0.1]),
            ("D", vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]),
        ])
        .unwrap(),
    )
}

fn universe() -> Vec<String> {
    ["A", "B", "C", "D", "Z"].iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_variance_filter_removes_flat_rows_before_solving() {
    let m = matrix();
    let cands = VarianceFilter::threshold(1e-6).unwrap().filter(&universe(), &m).unwrap();
    assert_eq!(cands, vec!["A", "B", "D"]);

    let req = EnsembleRequest::new("T", &cands).with_solvers(&["pearson", "spearman"]);
    let result = Ensemble::new().run(m, &req).unwrap();
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert_eq!(result.len(), 3);
}

#[test]
fn test_allow_list_output_is_subset_in_order() {
    let m = matrix();
    let f = AllowListFilter::new(["D", "A", "Q"]);
    let out = f.filter(&universe(), &m).unwrap();
    assert_eq!(out, vec!["A", "D"]);
    assert_eq!(f.name(), "allow-list");
}

#[test]
fn test_chain_then_ensemble() {
    let m = matrix();
    let chain = FilterChain::new()
        .with(AllowListFilter::new(["A", "B", "C", "T"]))
        .with(VarianceFilter::top_k(2));
    let cands = chain.filter(&universe(), &m).unwrap();
    assert_eq!(cands, vec!["A", "B"]);

    let req = EnsembleRequest::new("T", &cands).with_solvers(&["pearson"]);
    let result = Ensemble::new().run(m, &req).unwrap();
    assert_eq!(result.rows[0].regulator, "A");
}

#[test]
fn test_filter_emptying_candidates_surfaces_as_invalid_set() {
    let m = matrix();
    let cands = AllowListFilter::new(["NOPE"]).filter(&universe(), &m).unwrap();
    assert!(cands.is_empty());
    let req = EnsembleRequest::new("T", &cands).with_solvers(&["pearson"]);
    assert!(matches!(
        Ensemble::new().run(m, &req),
        Err(RegulonError::InvalidCandidateSet(_))
    ));
}
