//! Delimited-text loading of expression matrices

use crate::error::{RegulonError, Result};
use crate::matrix::ExpressionMatrix;
use ndarray::Array2;
use polars::prelude::*;
use std::fs::File;
use std::time::Instant;

/// Loads a table whose first column holds row names (genes) and whose
/// remaining columns are samples
pub struct DataLoader {
    /// Field separator; guessed from the extension when unset
    delimiter: Option<u8>,
    infer_schema_length: usize,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            delimiter: None,
            infer_schema_length: 100,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    fn delimiter_for(&self, path: &str) -> u8 {
        self.delimiter.unwrap_or_else(|| {
            let lower = path.to_lowercase();
            if lower.ends_with(".tsv") || lower.ends_with(".txt") || lower.ends_with(".tab") {
                b'\t'
            } else {
                b','
            }
        })
    }

    /// Read the raw frame
    pub fn load_frame(&self, path: &str) -> Result<DataFrame> {
        let file = File::open(path).map_err(|e| RegulonError::DataError(format!("{}: {}", path, e)))?;
        let parse_opts = CsvParseOptions::default().with_separator(self.delimiter_for(path));
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()?;
        Ok(df)
    }

    pub fn load(&self, path: &str) -> Result<ExpressionMatrix> {
        let start = Instant::now();
        let df = self.load_frame(path)?;
        let matrix = frame_to_matrix(&df)?;
        tracing::debug!(
            path,
            rows = matrix.n_rows(),
            samples = matrix.n_samples(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "expression matrix loaded"
        );
        Ok(matrix)
    }
}

/// Convert a frame (names column + numeric sample columns) to a matrix.
/// Missing or non-numeric cells are rejected.
pub fn frame_to_matrix(df: &DataFrame) -> Result<ExpressionMatrix> {
    let columns = df.get_columns();
    if columns.len() < 2 {
        return Err(RegulonError::DataError(format!(
            "expected a row-name column plus at least one sample column, found {} column(s)",
            columns.len()
        )));
    }

    let names_series = columns[0].as_materialized_series().cast(&DataType::String)?;
    let row_names = names_series
        .str()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.map(|s| s.trim().to_string())
                .ok_or_else(|| RegulonError::DataError(format!("row {} has no name", i + 1)))
        })
        .collect::<Result<Vec<String>>>()?;

    let n_rows = df.height();
    let n_cols = columns.len() - 1;
    let mut values = Array2::<f64>::zeros((n_rows, n_cols));
    let mut col_names = Vec::with_capacity(n_cols);
    for (j, col) in columns[1..].iter().enumerate() {
        col_names.push(col.name().to_string());
        let series = col.as_materialized_series().cast(&DataType::Float64)?;
        for (i, v) in series.f64()?.into_iter().enumerate() {
            values[[i, j]] = v.ok_or_else(|| {
                RegulonError::DataError(format!(
                    "missing or non-numeric value for '{}' in sample '{}'",
                    row_names[i],
                    col.name()
                ))
            })?;
        }
    }

    ExpressionMatrix::new(values, row_names, col_names)
}
