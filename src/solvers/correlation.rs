//! Pearson and Spearman correlation solvers

use super::{log_fit, ScoreRow, ScoreTable, Solver, SolverInput, SolverKind, SolverParams};
use crate::error::{RegulonError, Result};
use ndarray::ArrayView1;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::time::Instant;

/// Fewest samples for which a two-sided t-test on r is defined
pub const MIN_SAMPLES: usize = 3;

/// Pearson correlation; `None` when either vector has zero variance
pub fn pearson(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Option<f64> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }
    let x_mean = x.mean().unwrap_or(0.0);
    let y_mean = y.mean().unwrap_or(0.0);

    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    let mut sum_y2 = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - x_mean;
        let dy = yi - y_mean;
        sum_xy += dx * dy;
        sum_x2 += dx * dx;
        sum_y2 += dy * dy;
    }

    let denom = (sum_x2 * sum_y2).sqrt();
    if denom <= 1e-300 || sum_x2 <= 1e-24 || sum_y2 <= 1e-24 {
        None
    } else {
        Some((sum_xy / denom).clamp(-1.0, 1.0))
    }
}

/// 1-based ranks, ties share their average rank
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Two-sided p-value of a correlation coefficient under H0: rho = 0
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < MIN_SAMPLES {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= 1e-15 {
        return 0.0;
    }
    let t = r * (df / denom).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Pearson,
    Spearman,
}

fn correlate(input: &SolverInput, params: &SolverParams, method: Method) -> Result<ScoreTable> {
    let kind = match method {
        Method::Pearson => SolverKind::Pearson,
        Method::Spearman => SolverKind::Spearman,
    };
    input.require_samples(kind)?;
    let start = Instant::now();

    let matrix = input.matrix();
    let n = input.n_samples();
    let transform = |v: ArrayView1<f64>| -> ndarray::Array1<f64> {
        match method {
            Method::Pearson => v.to_owned(),
            Method::Spearman => ndarray::Array1::from(average_ranks(&v.to_vec())),
        }
    };

    let target = matrix
        .row(input.target())
        .map(transform)
        .ok_or_else(|| RegulonError::InvalidTarget(input.target().to_string()))?;
    if target.var(0.0) <= 1e-24 {
        return Err(RegulonError::degenerate(
            kind.id(),
            format!("target '{}' has zero variance", input.target()),
        ));
    }

    let mut table = ScoreTable::new(kind, input.target());
    let mut degenerate = Vec::new();
    for name in input.candidates() {
        let row = matrix
            .row(name)
            .map(transform)
            .ok_or_else(|| RegulonError::DataError(format!("row '{}' not in matrix", name)))?;
        match pearson(row.view(), target.view()) {
            Some(r) => table.push(
                ScoreRow::new(name.clone(), r).with_aux("p_value", correlation_p_value(r, n)),
            ),
            None => degenerate.push(name.clone()),
        }
    }

    if !degenerate.is_empty() {
        return Err(RegulonError::NumericalDegeneracy {
            solver: kind.id().to_string(),
            reason: format!("zero-variance regulator(s): {}", degenerate.join(", ")),
            regulators: degenerate,
        });
    }

    if params.keep_metrics {
        table = table.with_metric("n_samples", n as f64);
    }
    log_fit(input, &table, start.elapsed());
    Ok(table)
}

/// Score = Pearson r, aux `p_value`
#[derive(Debug, Clone)]
pub struct PearsonSolver {
    input: SolverInput,
    params: SolverParams,
}

impl PearsonSolver {
    pub fn new(input: SolverInput, params: &SolverParams) -> Result<Self> {
        Ok(Self {
            input,
            params: params.clone(),
        })
    }
}

impl Solver for PearsonSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Pearson
    }

    fn input(&self) -> &SolverInput {
        &self.input
    }

    fn fit(&self) -> Result<ScoreTable> {
        correlate(&self.input, &self.params, Method::Pearson)
    }
}

/// Score = Spearman rho, aux `p_value`
#[derive(Debug, Clone)]
pub struct SpearmanSolver {
    input: SolverInput,
    params: SolverParams,
}

impl SpearmanSolver {
    pub fn new(input: SolverInput, params: &SolverParams) -> Result<Self> {
        Ok(Self {
            input,
            params: params.clone(),
        })
    }
}

impl Solver for SpearmanSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Spearman
    }

    fn input(&self) -> &SolverInput {
        &self.input
    }

    fn fit(&self) -> Result<ScoreTable> {
        correlate(&self.input, &self.params, Method::Spearman)
    }
}
