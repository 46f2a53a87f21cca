//! Named expression matrix
//!
//! Rows are variables (genes), columns are samples. The matrix is
//! immutable once built; solvers share it behind an `Arc` and only ever
//! read from it.

use crate::error::{RegulonError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Numeric table with unique row names and sample column names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionMatrix {
    values: Array2<f64>,
    row_names: Vec<String>,
    col_names: Vec<String>,
    #[serde(skip)]
    row_index: HashMap<String, usize>,
}

impl ExpressionMatrix {
    /// Build a matrix from a `(n_rows, n_samples)` array.
    ///
    /// Fails when the name vectors disagree with the array shape, when a
    /// row name is repeated, or when any value is not finite.
    pub fn new(values: Array2<f64>, row_names: Vec<String>, col_names: Vec<String>) -> Result<Self> {
        if values.nrows() != row_names.len() || values.ncols() != col_names.len() {
            return Err(RegulonError::ShapeError {
                expected: format!("{} x {}", row_names.len(), col_names.len()),
                actual: format!("{} x {}", values.nrows(), values.ncols()),
            });
        }

        let mut row_index = HashMap::with_capacity(row_names.len());
        for (i, name) in row_names.iter().enumerate() {
            if row_index.insert(name.clone(), i).is_some() {
                return Err(RegulonError::DataError(format!("duplicate row name '{}'", name)));
            }
        }

        if let Some(((r, c), _)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(RegulonError::DataError(format!(
                "non-finite value at row '{}', sample '{}'",
                row_names[r], col_names[c]
            )));
        }

        Ok(Self {
            values,
            row_names,
            col_names,
            row_index,
        })
    }

    /// Build from `(name, values)` rows, naming samples `S1..Sn`
    pub fn from_rows<S: Into<String>>(rows: Vec<(S, Vec<f64>)>) -> Result<Self> {
        let n_samples = rows.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut row_names = Vec::with_capacity(rows.len());
        let mut flat = Vec::with_capacity(rows.len() * n_samples);
        for (name, vals) in rows {
            let name = name.into();
            if vals.len() != n_samples {
                return Err(RegulonError::ShapeError {
                    expected: format!("{} samples in row '{}'", n_samples, name),
                    actual: format!("{} samples", vals.len()),
                });
            }
            flat.extend(vals);
            row_names.push(name);
        }
        let values = Array2::from_shape_vec((row_names.len(), n_samples), flat)?;
        let col_names = (1..=n_samples).map(|i| format!("S{}", i)).collect();
        Self::new(values, row_names, col_names)
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn row_names(&self) -> &[String] {
        &self.row_names
    }

    pub fn col_names(&self) -> &[String] {
        &self.col_names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn has_row(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        if self.row_index.len() == self.row_names.len() {
            self.row_index.get(name).copied()
        } else {
            // index is skipped by serde; fall back to a scan after deserialization
            self.row_names.iter().position(|n| n == name)
        }
    }

    /// Expression vector for one variable
    pub fn row(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.index_of(name).map(|i| self.values.row(i))
    }

    /// Sample variance (n - 1 denominator) of one row
    pub fn row_variance(&self, name: &str) -> Option<f64> {
        self.row(name)
            .map(|r| if r.len() < 2 { 0.0 } else { r.var(1.0) })
    }

    /// Samples x regulators design matrix, one column per name in order.
    /// Names must be present; callers validate first.
    pub fn design_matrix(&self, names: &[String]) -> Result<Array2<f64>> {
        let indices = names
            .iter()
            .map(|n| {
                self.index_of(n)
                    .ok_or_else(|| RegulonError::DataError(format!("row '{}' not in matrix", n)))
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(self.values.select(Axis(0), &indices).reversed_axes())
    }

    /// Owned copy of one row
    pub fn row_vector(&self, name: &str) -> Result<Array1<f64>> {
        self.row(name)
            .map(|r| r.to_owned())
            .ok_or_else(|| RegulonError::DataError(format!("row '{}' not in matrix", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_and_lookup() {
        let m = ExpressionMatrix::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            names(&["G1", "G2"]),
            names(&["a", "b", "c"]),
        )
        .unwrap();
        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.n_samples(), 3);
        assert!(m.has_row("G2"));
        assert!(!m.has_row("G3"));
        assert_eq!(m.row("G2").unwrap()[1], 5.0);
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let res = ExpressionMatrix::new(
            array![[1.0, 2.0], [3.0, 4.0]],
            names(&["G1", "G1"]),
            names(&["a", "b"]),
        );
        assert!(matches!(res, Err(RegulonError::DataError(_))));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let res = ExpressionMatrix::new(array![[1.0, 2.0]], names(&["G1", "G2"]), names(&["a", "b"]));
        assert!(matches!(res, Err(RegulonError::ShapeError { .. })));
    }

    #[test]
    fn test_non_finite_rejected() {
        let res = ExpressionMatrix::from_rows(vec![("G1", vec![1.0, f64::NAN])]);
        assert!(res.is_err());
    }

    #[test]
    fn test_design_matrix_layout() {
        let m = ExpressionMatrix::from_rows(vec![
            ("G1", vec![1.0, 2.0, 3.0]),
            ("G2", vec![4.0, 5.0, 6.0]),
            ("G3", vec![7.0, 8.0, 9.0]),
        ])
        .unwrap();
        let x = m.design_matrix(&names(&["G3", "G1"])).unwrap();
        assert_eq!(x.dim(), (3, 2));
        assert_eq!(x[[0, 0]], 7.0);
        assert_eq!(x[[2, 1]], 3.0);
    }

    #[test]
    fn test_row_variance() {
        let m = ExpressionMatrix::from_rows(vec![("G1", vec![1.0, 2.0, 3.0])]).unwrap();
        assert!((m.row_variance("G1").unwrap() - 1.0).abs() < 1e-12);
    }
}
