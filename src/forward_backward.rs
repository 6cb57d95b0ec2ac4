//! Scaled forward-backward message passing.
//!
//! Forward variables are renormalized at every step; the multipliers `c[t]`
//! are kept so that the sequence log-likelihood is `-Σ ln c[t]`. Backward
//! variables reuse the same multipliers, which keeps both passes bounded
//! over long sequences and lets the edge marginals be formed directly from
//! the scaled quantities.

use crate::errors::{validate_dimension, HmmError, HmmResult};
use crate::math_utils::constants::{REALMAX, REALMIN};
use nalgebra::{DMatrix, DVector};

/// Output of one forward-backward pass over a sequence of length T.
#[derive(Debug, Clone)]
pub struct Messages {
    /// Scaled forward variables (S×T)
    pub alpha: DMatrix<f64>,
    /// Scaled backward variables (S×T)
    pub beta: DMatrix<f64>,
    /// Smoothed state marginals (S×T), columns sum to one
    pub gamma: DMatrix<f64>,
    /// Smoothed transition marginals: `zeta[t][(i, j)]` for t in 0..T-1
    pub zeta: Vec<DMatrix<f64>>,
    /// Per-step scaling multipliers (length T)
    pub scaling: DVector<f64>,
}

impl Messages {
    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.scaling.len()
    }

    /// Whether the pass covered no time steps.
    pub fn is_empty(&self) -> bool {
        self.scaling.is_empty()
    }

    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.alpha.nrows()
    }

    /// Sequence log-likelihood, `-Σ ln c[t]`.
    pub fn log_likelihood(&self) -> f64 {
        -self.scaling.iter().map(|c| c.ln()).sum::<f64>()
    }

    /// Sum of the edge marginals over time (S×S).
    pub fn zeta_sum(&self) -> DMatrix<f64> {
        let s = self.num_states();
        self.zeta
            .iter()
            .fold(DMatrix::zeros(s, s), |acc, z| acc + z)
    }
}

/// Runs the scaled forward-backward recursions.
///
/// `likelihoods` is the linear emission matrix B (S×T).
pub fn forward_backward(
    likelihoods: &DMatrix<f64>,
    init_priors: &DVector<f64>,
    transition: &DMatrix<f64>,
) -> HmmResult<Messages> {
    let num_states = likelihoods.nrows();
    let t_len = likelihoods.ncols();
    if t_len == 0 {
        return Err(HmmError::EmptySequence { index: 0 });
    }
    validate_dimension(num_states, init_priors.len(), "initial priors")?;
    validate_dimension(num_states, transition.nrows(), "transition rows")?;
    validate_dimension(num_states, transition.ncols(), "transition columns")?;

    let transition_t = transition.transpose();

    // Forward pass
    let mut alpha = DMatrix::zeros(num_states, t_len);
    let mut scaling = DVector::zeros(t_len);

    let first = init_priors.component_mul(&likelihoods.column(0));
    scaling[0] = 1.0 / (first.sum() + REALMIN);
    alpha.set_column(0, &(first * scaling[0]));

    for t in 1..t_len {
        let predicted = &transition_t * alpha.column(t - 1);
        let column = predicted.component_mul(&likelihoods.column(t));
        scaling[t] = 1.0 / (column.sum() + REALMIN);
        alpha.set_column(t, &(column * scaling[t]));
    }

    // Backward pass, rescaled with the forward multipliers
    let mut beta = DMatrix::zeros(num_states, t_len);
    beta.set_column(t_len - 1, &DVector::from_element(num_states, scaling[t_len - 1]));

    for t in (0..t_len - 1).rev() {
        // Emission factor of step t+1 goes inside the product: A·(B ⊙ β)
        let weighted = beta.column(t + 1).component_mul(&likelihoods.column(t + 1));
        let column = (transition * weighted * scaling[t]).map(|v| v.min(REALMAX));
        beta.set_column(t, &column);
    }

    // Node marginals
    let mut gamma = alpha.component_mul(&beta);
    for mut column in gamma.column_iter_mut() {
        let norm = column.sum() + REALMIN;
        column /= norm;
    }

    // Edge marginals; scaling factors cancel between adjacent steps
    let zeta = (0..t_len - 1)
        .map(|t| {
            let next = likelihoods.column(t + 1).component_mul(&beta.column(t + 1));
            DMatrix::from_fn(num_states, num_states, |i, j| {
                transition[(i, j)] * alpha[(i, t)] * next[j]
            })
        })
        .collect();

    Ok(Messages {
        alpha,
        beta,
        gamma,
        zeta,
        scaling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn model() -> (DVector<f64>, DMatrix<f64>) {
        (
            DVector::from_vec(vec![0.6, 0.3, 0.1]),
            DMatrix::from_row_slice(3, 3, &[0.7, 0.2, 0.1, 0.1, 0.8, 0.1, 0.25, 0.25, 0.5]),
        )
    }

    fn likelihoods() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            3,
            4,
            &[
                0.5, 0.1, 0.02, 0.3, //
                0.2, 0.6, 0.3, 0.05, //
                0.01, 0.2, 0.7, 0.4,
            ],
        )
    }

    /// Sum over all S^T paths of the joint probability.
    fn brute_force_likelihood(b: &DMatrix<f64>, pi: &DVector<f64>, a: &DMatrix<f64>) -> f64 {
        let s = b.nrows();
        let t_len = b.ncols();
        let mut total = 0.0;
        for code in 0..s.pow(t_len as u32) {
            let mut path = Vec::with_capacity(t_len);
            let mut c = code;
            for _ in 0..t_len {
                path.push(c % s);
                c /= s;
            }
            let mut p = pi[path[0]] * b[(path[0], 0)];
            for t in 1..t_len {
                p *= a[(path[t - 1], path[t])] * b[(path[t], t)];
            }
            total += p;
        }
        total
    }

    #[test]
    fn test_log_likelihood_matches_brute_force() {
        let (pi, a) = model();
        let b = likelihoods();
        let messages = forward_backward(&b, &pi, &a).unwrap();
        let expected = brute_force_likelihood(&b, &pi, &a).ln();
        assert_approx_eq!(messages.log_likelihood(), expected, 1e-10);
    }

    #[test]
    fn test_gamma_columns_sum_to_one() {
        let (pi, a) = model();
        let messages = forward_backward(&likelihoods(), &pi, &a).unwrap();
        for column in messages.gamma.column_iter() {
            assert_approx_eq!(column.sum(), 1.0, 1e-6);
        }
    }

    #[test]
    fn test_zeta_consistent_with_gamma() {
        let (pi, a) = model();
        let messages = forward_backward(&likelihoods(), &pi, &a).unwrap();
        assert_eq!(messages.zeta.len(), 3);
        for (t, z) in messages.zeta.iter().enumerate() {
            assert_approx_eq!(z.sum(), 1.0, 1e-9);
            for i in 0..3 {
                assert_approx_eq!(z.row(i).sum(), messages.gamma[(i, t)], 1e-9);
                assert_approx_eq!(z.column(i).sum(), messages.gamma[(i, t + 1)], 1e-9);
            }
        }
    }

    #[test]
    fn test_gamma_matches_brute_force_posterior() {
        let (pi, a) = model();
        let b = likelihoods();
        let total = brute_force_likelihood(&b, &pi, &a);
        let messages = forward_backward(&b, &pi, &a).unwrap();

        // Posterior of state 2 at t = 2 by clamping that entry.
        let mut clamped = b.clone();
        for s in 0..3 {
            if s != 2 {
                clamped[(s, 2)] = 0.0;
            }
        }
        let posterior = brute_force_likelihood(&clamped, &pi, &a) / total;
        assert_approx_eq!(messages.gamma[(2, 2)], posterior, 1e-10);
    }

    #[test]
    fn test_long_sequence_does_not_underflow() {
        let (pi, a) = model();
        let b = DMatrix::from_fn(3, 2000, |i, t| 1e-30 * (1.0 + ((i + t) % 3) as f64));
        let messages = forward_backward(&b, &pi, &a).unwrap();
        assert!(messages.log_likelihood().is_finite());
        assert!(messages.gamma.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_likelihood_column_is_absorbed() {
        let (pi, a) = model();
        let mut b = likelihoods();
        b.column_mut(1).fill(0.0);
        let messages = forward_backward(&b, &pi, &a).unwrap();
        assert!(messages.gamma.iter().all(|v| v.is_finite()));
        assert!(messages.scaling.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_step() {
        let (pi, a) = model();
        let b = DMatrix::from_column_slice(3, 1, &[0.2, 0.2, 0.2]);
        let messages = forward_backward(&b, &pi, &a).unwrap();
        assert!(messages.zeta.is_empty());
        assert_approx_eq!(messages.gamma[(0, 0)], 0.6, 1e-12);
        assert_approx_eq!(messages.log_likelihood(), 0.2f64.ln(), 1e-12);
    }

    #[test]
    fn test_empty_sequence() {
        let (pi, a) = model();
        let b = DMatrix::zeros(3, 0);
        assert!(matches!(
            forward_backward(&b, &pi, &a),
            Err(HmmError::EmptySequence { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let (pi, a) = model();
        let b = DMatrix::zeros(2, 4);
        assert!(matches!(
            forward_backward(&b, &pi, &a),
            Err(HmmError::DimensionMismatch { .. })
        ));
    }
}
