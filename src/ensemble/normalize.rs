//! Rank normalization and agreement statistics

use crate::solvers::correlation::average_ranks;
use crate::solvers::ScoreTable;

/// Percentile rank of each row's importance, aligned with `table.rows`.
///
/// Ties share their average rank; values lie in (0, 1] with 1 for the
/// most important regulator.
pub fn percentile_ranks(table: &ScoreTable) -> Vec<f64> {
    let importance: Vec<f64> = table.rows.iter().map(|r| r.importance()).collect();
    let m = importance.len() as f64;
    average_ranks(&importance).into_iter().map(|r| r / m).collect()
}

/// 1 - spread of a regulator's normalized scores; 1.0 for a single score
pub fn concordance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    (1.0 - (hi - lo)).clamp(0.0, 1.0)
}

fn tie_term(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut total = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        let t = (j - i) as f64;
        total += t * t * t - t;
        i = j;
    }
    total
}

/// Kendall's coefficient of concordance (tie-corrected) over the rows
/// scored by every column.
///
/// `rows[i][j]` is regulator i's score under solver j. Returns `None`
/// with fewer than two columns or fewer than two complete rows.
pub fn kendall_w(rows: &[Vec<Option<f64>>]) -> Option<f64> {
    let m = rows.first().map(|r| r.len())?;
    let complete: Vec<Vec<f64>> = rows
        .iter()
        .filter_map(|r| r.iter().copied().collect::<Option<Vec<f64>>>())
        .collect();
    let n = complete.len();
    if m < 2 || n < 2 {
        return None;
    }

    let mut rank_sums = vec![0.0; n];
    let mut ties = 0.0;
    for j in 0..m {
        let column: Vec<f64> = complete.iter().map(|r| r[j]).collect();
        for (sum, rank) in rank_sums.iter_mut().zip(average_ranks(&column)) {
            *sum += rank;
        }
        ties += tie_term(&column);
    }

    let (m, nf) = (m as f64, n as f64);
    let mean = rank_sums.iter().sum::<f64>() / nf;
    let s: f64 = rank_sums.iter().map(|r| (r - mean).powi(2)).sum();
    let denom = m * m * (nf * nf * nf - nf) - m * ties;
    if denom <= 0.0 {
        return None;
    }
    Some((12.0 * s / denom).clamp(0.0, 1.0))
}
