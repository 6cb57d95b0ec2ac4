//! Linear algebra routines for Gaussian densities.
//!
//! Covariances are factorized with a Cholesky decomposition; if the matrix
//! is not positive definite as given, progressively larger diagonal jitter is
//! tried before giving up with [`HmmError::SingularCovariance`].

use crate::errors::{HmmError, HmmResult};
use crate::math_utils::constants;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Returns `(m + mᵀ) / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Cholesky factor of a covariance, regularizing the diagonal if needed.
///
/// `state` is only used to label the error.
pub fn regularized_cholesky(
    covariance: &DMatrix<f64>,
    state: usize,
) -> HmmResult<Cholesky<f64, Dyn>> {
    if covariance.nrows() != covariance.ncols() {
        return Err(HmmError::DimensionMismatch {
            expected: covariance.nrows(),
            actual: covariance.ncols(),
            context: format!("covariance of state {}", state),
        });
    }
    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(HmmError::SingularCovariance {
            state,
            reason: "covariance contains non-finite entries".to_string(),
        });
    }

    let sym = symmetrize(covariance);
    if let Some(chol) = Cholesky::new(sym.clone()) {
        return Ok(chol);
    }

    let n = sym.nrows();
    let scale = if n > 0 {
        (sym.diagonal().iter().map(|v| v.abs()).sum::<f64>() / n as f64).max(1.0)
    } else {
        1.0
    };

    for &level in &constants::REGULARIZATION_LEVELS {
        let regularized = &sym + DMatrix::identity(n, n) * (level * scale);
        if let Some(chol) = Cholesky::new(regularized) {
            log::trace!(
                "covariance of state {} regularized with jitter {:.1e}",
                state,
                level * scale
            );
            return Ok(chol);
        }
    }

    Err(HmmError::SingularCovariance {
        state,
        reason: "Cholesky decomposition failed even with progressive regularization".to_string(),
    })
}

/// Multivariate normal density with a cached Cholesky factor.
#[derive(Debug, Clone)]
pub struct GaussianDensity {
    mean: DVector<f64>,
    lower: DMatrix<f64>,
    /// `-0.5 * (k ln 2π + ln|Σ|)`
    log_norm: f64,
}

impl GaussianDensity {
    /// Factorizes `covariance` and caches the normalization constant.
    pub fn new(mean: &DVector<f64>, covariance: &DMatrix<f64>, state: usize) -> HmmResult<Self> {
        if mean.len() != covariance.nrows() {
            return Err(HmmError::DimensionMismatch {
                expected: covariance.nrows(),
                actual: mean.len(),
                context: format!("mean of state {}", state),
            });
        }
        let chol = regularized_cholesky(covariance, state)?;
        let lower = chol.l();
        let log_det = 2.0 * lower.diagonal().iter().map(|x| x.ln()).sum::<f64>();
        let k = mean.len() as f64;

        Ok(Self {
            mean: mean.clone(),
            lower,
            log_norm: -0.5 * (k * constants::LOG_2PI + log_det),
        })
    }

    /// Dimension of the density.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Log-density at `x`. The caller guarantees `x.len() == self.dim()`.
    pub fn log_pdf(&self, x: &DVector<f64>) -> f64 {
        let diff = x - &self.mean;
        match self.lower.solve_lower_triangular(&diff) {
            Some(y) => self.log_norm - 0.5 * y.norm_squared(),
            None => f64::NEG_INFINITY,
        }
    }

    /// Log-density of every row of `observations` (T×D).
    pub fn log_pdf_rows(&self, observations: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_iterator(
            observations.nrows(),
            observations
                .row_iter()
                .map(|row| self.log_pdf(&row.transpose())),
        )
    }
}

/// Entries of `v` at `indices`, in the given order.
pub fn sub_vector(v: &DVector<f64>, indices: &[usize]) -> DVector<f64> {
    v.select_rows(indices.iter())
}

/// Sub-matrix of `m` with the given row and column indices.
pub fn sub_matrix(m: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    m.select_rows(rows.iter()).select_columns(cols.iter())
}

/// 0/1 mask that keeps entries whose row and column fall in the same group.
pub fn block_diagonal_mask(dim: usize, groups: &[Vec<usize>]) -> DMatrix<f64> {
    let mut mask = DMatrix::zeros(dim, dim);
    for group in groups {
        for &i in group {
            for &j in group {
                mask[(i, j)] = 1.0;
            }
        }
    }
    mask
}
