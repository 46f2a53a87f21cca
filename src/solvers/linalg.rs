//! Dense linear-algebra helpers shared by the regression solvers

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Centered and scaled copy of a design matrix and response.
///
/// Columns are scaled to unit population variance; constant columns keep
/// scale 1 and end up all-zero after centering.
#[derive(Debug, Clone)]
pub struct Standardized {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub x_mean: Array1<f64>,
    pub x_scale: Array1<f64>,
    pub y_mean: f64,
}

impl Standardized {
    pub fn new(x: &Array2<f64>, y: &Array1<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let x_mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let y_mean = y.mean().unwrap_or(0.0);
        let mut xc = x - &x_mean.view().insert_axis(Axis(0));
        let x_scale: Array1<f64> = xc
            .axis_iter(Axis(1))
            .map(|col| {
                let sd = (col.mapv(|v| v * v).sum() / n).sqrt();
                if sd > 1e-12 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();
        for (mut col, &s) in xc.axis_iter_mut(Axis(1)).zip(x_scale.iter()) {
            col.mapv_inplace(|v| v / s);
        }
        Self {
            x: xc,
            y: y - y_mean,
            x_mean,
            x_scale,
            y_mean,
        }
    }

    /// Map standardized coefficients back to the original scale
    pub fn unscale(&self, beta: &Array1<f64>) -> (Array1<f64>, f64) {
        let coef = beta / &self.x_scale;
        let intercept = self.y_mean - coef.dot(&self.x_mean);
        (coef, intercept)
    }
}

/// Soft-threshold operator for the L1 proximal step
pub fn soft_threshold(val: f64, threshold: f64) -> f64 {
    if val > threshold {
        val - threshold
    } else if val < -threshold {
        val + threshold
    } else {
        0.0
    }
}

/// Solve a symmetric positive-definite system with Cholesky.
/// Returns `None` if the matrix is not positive definite.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    Some(x)
}

/// Matrix inverse by Gauss-Jordan elimination with partial pivoting
pub fn matrix_inverse(m: &Array2<f64>) -> Option<Array2<f64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return None;
    }

    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        let mut max_row = col;
        for row in col + 1..n {
            if aug[[row, col]].abs() > aug[[max_row, col]].abs() {
                max_row = row;
            }
        }
        if max_row != col {
            for j in 0..2 * n {
                aug.swap([col, j], [max_row, j]);
            }
        }
        if aug[[col, col]].abs() < 1e-10 {
            return None;
        }
        let pivot = aug[[col, col]];
        for j in 0..2 * n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                for j in 0..2 * n {
                    aug[[row, j]] -= factor * aug[[col, j]];
                }
            }
        }
    }

    Some(aug.slice(ndarray::s![.., n..]).to_owned())
}

/// Cholesky with a Gauss-Jordan fallback
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky_solve(a, b).or_else(|| matrix_inverse(a).map(|inv| inv.dot(b)))
}

/// Penalty factors rescaled to sum to the number of regulators
pub fn normalized_penalty(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return vec![1.0; weights.len()];
    }
    let p = weights.len() as f64;
    weights.iter().map(|w| w * p / total).collect()
}

/// Elastic-net coordinate descent settings.
///
/// Minimizes `1/(2n) |y - X b|^2 + lambda * sum_j pf_j (alpha |b_j| + (1 - alpha)/2 b_j^2)`
/// on centered data without intercept.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateDescent {
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
}

/// Coefficients plus convergence bookkeeping
#[derive(Debug, Clone)]
pub struct CdFit {
    pub beta: Array1<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl CoordinateDescent {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            max_iter: 10_000,
            tol: 1e-7,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Smallest lambda that zeroes every coefficient
    pub fn lambda_max(&self, x: &Array2<f64>, y: &Array1<f64>, penalty: &[f64]) -> f64 {
        let n = x.nrows().max(1) as f64;
        // ridge has no finite lambda_max; borrow a small mixing value like glmnet
        let alpha = self.alpha.max(1e-3);
        x.axis_iter(Axis(1))
            .zip(penalty.iter())
            .filter(|(_, &pf)| pf > 0.0)
            .map(|(col, &pf)| col.dot(y).abs() / (n * alpha * pf))
            .fold(0.0, f64::max)
    }

    /// Log-spaced decreasing lambda path from `lambda_max`
    pub fn lambda_path(&self, lambda_max: f64, n_lambda: usize, n_samples: usize, n_features: usize) -> Vec<f64> {
        let ratio = if n_samples > n_features { 1e-4 } else { 1e-2 };
        let hi = lambda_max.max(1e-10);
        let lo = hi * ratio;
        if n_lambda <= 1 {
            return vec![hi];
        }
        let step = (lo.ln() - hi.ln()) / (n_lambda - 1) as f64;
        (0..n_lambda).map(|k| (hi.ln() + step * k as f64).exp()).collect()
    }

    /// Fit at one lambda, optionally warm-started
    pub fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        lambda: f64,
        penalty: &[f64],
        warm: Option<&Array1<f64>>,
    ) -> CdFit {
        let n = x.nrows().max(1) as f64;
        let p = x.ncols();
        let col_norms: Vec<f64> = x
            .axis_iter(Axis(1))
            .map(|col| col.mapv(|v| v * v).sum() / n)
            .collect();

        let mut w = warm.cloned().unwrap_or_else(|| Array1::zeros(p));
        let mut r = y - &x.dot(&w);

        for iter in 0..self.max_iter {
            let mut max_delta: f64 = 0.0;
            for j in 0..p {
                let l1 = lambda * self.alpha * penalty[j];
                let l2 = lambda * (1.0 - self.alpha) * penalty[j];
                let denom = col_norms[j] + l2;
                if col_norms[j] < 1e-15 || denom < 1e-15 {
                    w[j] = 0.0;
                    continue;
                }
                let col: ArrayView1<f64> = x.column(j);
                let rho = col.dot(&r) / n + col_norms[j] * w[j];
                let old = w[j];
                w[j] = soft_threshold(rho, l1) / denom;
                let delta = old - w[j];
                if delta != 0.0 {
                    r.scaled_add(delta, &col);
                    max_delta = max_delta.max(col_norms[j] * delta * delta);
                }
            }
            if max_delta < self.tol {
                return CdFit {
                    beta: w,
                    iterations: iter + 1,
                    converged: true,
                };
            }
        }

        CdFit {
            beta: w,
            iterations: self.max_iter,
            converged: false,
        }
    }
}
