//! Most likely state sequence by log-domain dynamic programming.

use crate::errors::{validate_dimension, HmmError, HmmResult};
use crate::math_utils::{argmax, constants::REALMIN};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Decoded state path and its log-probability under the model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViterbiPath {
    /// State index per time step
    pub states: Vec<usize>,
    /// Joint log-probability of the path and the observations
    pub log_probability: f64,
}

/// Decode the most probable path from the log-emission matrix (S×T).
///
/// Ties resolve to the lowest state index.
pub fn viterbi(
    log_likelihoods: &DMatrix<f64>,
    init_priors: &DVector<f64>,
    transition: &DMatrix<f64>,
) -> HmmResult<ViterbiPath> {
    let num_states = log_likelihoods.nrows();
    let t_len = log_likelihoods.ncols();
    if t_len == 0 {
        return Err(HmmError::EmptySequence { index: 0 });
    }
    validate_dimension(num_states, init_priors.len(), "initial priors")?;
    validate_dimension(num_states, transition.nrows(), "transition rows")?;
    validate_dimension(num_states, transition.ncols(), "transition columns")?;

    let log_priors = init_priors.map(|p| (p + REALMIN).ln());
    let log_trans = transition.map(|p| (p + REALMIN).ln());

    let mut log_delta = DMatrix::zeros(num_states, t_len);
    let mut psi = vec![vec![0usize; num_states]; t_len];

    log_delta.set_column(0, &(log_priors + log_likelihoods.column(0)));

    for t in 1..t_len {
        for i in 0..num_states {
            let (best, value) =
                argmax((0..num_states).map(|j| log_delta[(j, t - 1)] + log_trans[(j, i)]));
            psi[t][i] = best;
            log_delta[(i, t)] = value + log_likelihoods[(i, t)];
        }
    }

    let (last, log_probability) = argmax(log_delta.column(t_len - 1).iter().cloned());

    let mut states = vec![0; t_len];
    states[t_len - 1] = last;
    for t in (0..t_len - 1).rev() {
        states[t] = psi[t + 1][states[t + 1]];
    }

    Ok(ViterbiPath {
        states,
        log_probability,
    })
}

/// Log-probability of a given path, using the same ε floor as [`viterbi`].
pub fn path_log_probability(
    log_likelihoods: &DMatrix<f64>,
    init_priors: &DVector<f64>,
    transition: &DMatrix<f64>,
    path: &[usize],
) -> HmmResult<f64> {
    validate_dimension(log_likelihoods.ncols(), path.len(), "path length")?;
    let num_states = log_likelihoods.nrows();
    if let Some(&state) = path.iter().find(|&&s| s >= num_states) {
        return Err(HmmError::StateOutOfRange { state, num_states });
    }
    let Some(&first) = path.first() else {
        return Err(HmmError::EmptySequence { index: 0 });
    };

    let mut lp = (init_priors[first] + REALMIN).ln() + log_likelihoods[(first, 0)];
    for t in 1..path.len() {
        lp += (transition[(path[t - 1], path[t])] + REALMIN).ln() + log_likelihoods[(path[t], t)];
    }
    Ok(lp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn model() -> (DVector<f64>, DMatrix<f64>) {
        (
            DVector::from_vec(vec![0.5, 0.3, 0.2]),
            DMatrix::from_row_slice(3, 3, &[0.6, 0.3, 0.1, 0.2, 0.5, 0.3, 0.1, 0.2, 0.7]),
        )
    }

    fn log_b() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            3,
            5,
            &[
                -0.5, -2.0, -1.0, -3.0, -0.2, //
                -1.5, -0.3, -1.2, -0.9, -2.5, //
                -2.5, -1.0, -0.4, -0.8, -1.0,
            ],
        )
    }

    #[test]
    fn test_viterbi_beats_every_enumerated_path() {
        let (pi, a) = model();
        let lb = log_b();
        let best = viterbi(&lb, &pi, &a).unwrap();

        let mut best_enumerated = f64::NEG_INFINITY;
        for code in 0..3usize.pow(5) {
            let mut path = Vec::new();
            let mut c = code;
            for _ in 0..5 {
                path.push(c % 3);
                c /= 3;
            }
            let lp = path_log_probability(&lb, &pi, &a, &path).unwrap();
            assert!(best.log_probability >= lp - 1e-12);
            best_enumerated = best_enumerated.max(lp);
        }
        assert_approx_eq!(best.log_probability, best_enumerated, 1e-12);
        assert_approx_eq!(
            path_log_probability(&lb, &pi, &a, &best.states).unwrap(),
            best.log_probability,
            1e-12
        );
    }

    #[test]
    fn test_ties_resolve_to_lowest_state() {
        let pi = DVector::from_element(2, 0.5);
        let a = DMatrix::from_element(2, 2, 0.5);
        let lb = DMatrix::zeros(2, 3);
        let path = viterbi(&lb, &pi, &a).unwrap();
        assert_eq!(path.states, vec![0, 0, 0]);
    }

    #[test]
    fn test_forbidden_transition_avoided() {
        let pi = DVector::from_vec(vec![1.0, 0.0]);
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 1.0]);
        let lb = DMatrix::from_row_slice(2, 3, &[0.0, 0.0, 0.0, -5.0, -5.0, -5.0]);
        let path = viterbi(&lb, &pi, &a).unwrap();
        assert_eq!(path.states, vec![0, 1, 1]);
    }

    #[test]
    fn test_empty_sequence() {
        let (pi, a) = model();
        assert!(matches!(
            viterbi(&DMatrix::zeros(3, 0), &pi, &a),
            Err(HmmError::EmptySequence { .. })
        ));
    }

    #[test]
    fn test_path_log_probability_validates() {
        let (pi, a) = model();
        let lb = log_b();
        assert!(path_log_probability(&lb, &pi, &a, &[0, 1]).is_err());
        assert!(matches!(
            path_log_probability(&lb, &pi, &a, &[0, 1, 2, 3, 0]),
            Err(HmmError::StateOutOfRange { state: 3, .. })
        ));
    }
}
