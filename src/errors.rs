//! Error types and validation functions for Gaussian HMM operations.
//!
//! Structural problems (dimension disagreement, empty input, covariance that
//! cannot be factorized) are surfaced as [`HmmError`]. Recoverable conditions
//! that still leave a usable model behind are reported as [`Diagnostic`]
//! values next to the result instead.

use crate::math_utils::constants;
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error types for HMM evaluation and training.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HmmError {
    /// Observation or parameter dimension disagrees with the model.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the model expects
        expected: usize,
        /// Dimension that was supplied
        actual: usize,
        /// Where the mismatch was detected
        context: String,
    },

    /// A sequence with zero time steps was supplied.
    #[error("Empty sequence at index {index}: at least one observation is required")]
    EmptySequence {
        /// Position of the offending sequence in the input collection
        index: usize,
    },

    /// No sequences were supplied at all.
    #[error("Empty dataset: at least one sequence is required")]
    EmptyDataset,

    /// Not enough data points for the requested fit.
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData {
        /// Minimum required data points
        required: usize,
        /// Actual number of data points provided
        actual: usize,
    },

    /// Covariance is not invertible even after regularization.
    #[error("Singular covariance for state {state}: {reason}")]
    SingularCovariance {
        /// State whose covariance failed to factorize
        state: usize,
        /// Detailed reason
        reason: String,
    },

    /// Invalid scalar parameter value.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// A vector or matrix row that must be a probability distribution is not one.
    #[error("{parameter} is not a probability distribution (sum = {sum})")]
    InvalidDistribution {
        /// Parameter name, e.g. `transition[1]`
        parameter: String,
        /// Observed sum of the entries
        sum: f64,
    },

    /// A dimension index lies outside the model dimension.
    #[error("Dimension index {index} out of range for {dim}-dimensional model")]
    DimensionOutOfRange {
        /// Offending index
        index: usize,
        /// Model dimension
        dim: usize,
    },

    /// A state index lies outside the model.
    #[error("State {state} out of range for model with {num_states} states")]
    StateOutOfRange {
        /// Offending state index
        state: usize,
        /// Number of states in the model
        num_states: usize,
    },
}

/// Result type for HMM operations.
pub type HmmResult<T> = Result<T, HmmError>;

/// Model parameter that can be defaulted to uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModelParameter {
    /// Initial state distribution
    InitPriors,
    /// State transition matrix
    Transition,
}

impl fmt::Display for ModelParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelParameter::InitPriors => write!(f, "initial state priors"),
            ModelParameter::Transition => write!(f, "transition matrix"),
        }
    }
}

/// Non-fatal condition reported alongside a usable result.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Diagnostic {
    /// A parameter was never set and has been initialized to uniform.
    UninitializedParameter {
        /// Which parameter was defaulted
        parameter: ModelParameter,
    },
    /// EM exhausted its iteration budget before the log-likelihood settled.
    NonConvergence {
        /// Number of iterations that were run
        iterations: usize,
        /// Log-likelihood change over the final iteration
        last_improvement: f64,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UninitializedParameter { parameter } => {
                write!(f, "HMM {} not defined, initializing to uniform", parameter)
            }
            Diagnostic::NonConvergence {
                iterations,
                last_improvement,
            } => write!(
                f,
                "EM did not converge after {} iterations (last improvement {:.3e})",
                iterations, last_improvement
            ),
        }
    }
}

/// Validates that a vector is a probability distribution.
///
/// Entries must be finite and nonnegative and sum to one within
/// [`constants::DISTRIBUTION_TOLERANCE`].
pub fn validate_distribution(values: &DVector<f64>, name: &str) -> HmmResult<()> {
    if values.is_empty() {
        return Err(HmmError::InvalidDistribution {
            parameter: name.to_string(),
            sum: 0.0,
        });
    }

    if let Some(&bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(HmmError::InvalidParameter {
            parameter: name.to_string(),
            value: bad,
            constraint: "finite and nonnegative entries".to_string(),
        });
    }

    let sum = values.sum();
    if (sum - 1.0).abs() > constants::DISTRIBUTION_TOLERANCE {
        return Err(HmmError::InvalidDistribution {
            parameter: name.to_string(),
            sum,
        });
    }

    Ok(())
}

/// Validates that a square matrix is row-stochastic.
pub fn validate_stochastic_matrix(matrix: &DMatrix<f64>, name: &str) -> HmmResult<()> {
    validate_dimension(matrix.nrows(), matrix.ncols(), name)?;

    for (i, row) in matrix.row_iter().enumerate() {
        validate_distribution(&row.transpose(), &format!("{}[{}]", name, i))?;
    }

    Ok(())
}

/// Validates that `actual` equals `expected`.
pub fn validate_dimension(expected: usize, actual: usize, context: &str) -> HmmResult<()> {
    if expected != actual {
        return Err(HmmError::DimensionMismatch {
            expected,
            actual,
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Validates that every index in `dims` addresses one of `dim` dimensions
/// and that no index is repeated.
pub fn validate_dims_in_range(dims: &[usize], dim: usize) -> HmmResult<()> {
    let mut seen = vec![false; dim];
    for &index in dims {
        if index >= dim {
            return Err(HmmError::DimensionOutOfRange { index, dim });
        }
        if seen[index] {
            return Err(HmmError::InvalidParameter {
                parameter: "dimension index".to_string(),
                value: index as f64,
                constraint: "each dimension listed at most once".to_string(),
            });
        }
        seen[index] = true;
    }
    Ok(())
}

/// Validates that every value is finite.
pub fn validate_all_finite<'a, I>(values: I, name: &str) -> HmmResult<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    if let Some((i, &value)) = values.into_iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(HmmError::InvalidParameter {
            parameter: format!("{}[{}]", name, i),
            value,
            constraint: "finite value".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_distribution() {
        let v = DVector::from_vec(vec![0.2, 0.3, 0.5]);
        assert!(validate_distribution(&v, "priors").is_ok());
    }

    #[test]
    fn test_distribution_bad_sum() {
        let v = DVector::from_vec(vec![0.2, 0.3]);
        match validate_distribution(&v, "priors") {
            Err(HmmError::InvalidDistribution { parameter, sum }) => {
                assert_eq!(parameter, "priors");
                assert!((sum - 0.5).abs() < 1e-12);
            }
            other => panic!("Expected InvalidDistribution, got {:?}", other),
        }
    }

    #[test]
    fn test_distribution_negative_entry() {
        let v = DVector::from_vec(vec![1.5, -0.5]);
        assert!(matches!(
            validate_distribution(&v, "priors"),
            Err(HmmError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_stochastic_matrix_reports_row() {
        let m = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.4, 0.4]);
        match validate_stochastic_matrix(&m, "transition") {
            Err(HmmError::InvalidDistribution { parameter, .. }) => {
                assert_eq!(parameter, "transition[1]")
            }
            other => panic!("Expected InvalidDistribution, got {:?}", other),
        }
    }

    #[test]
    fn test_stochastic_matrix_not_square() {
        let m = DMatrix::from_element(2, 3, 1.0 / 3.0);
        assert!(matches!(
            validate_stochastic_matrix(&m, "transition"),
            Err(HmmError::DimensionMismatch { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn test_dims_in_range() {
        assert!(validate_dims_in_range(&[0, 2], 3).is_ok());
        assert!(matches!(
            validate_dims_in_range(&[0, 3], 3),
            Err(HmmError::DimensionOutOfRange { index: 3, dim: 3 })
        ));
        assert!(validate_dims_in_range(&[1, 1], 3).is_err());
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::UninitializedParameter {
            parameter: ModelParameter::Transition,
        };
        assert_eq!(
            d.to_string(),
            "HMM transition matrix not defined, initializing to uniform"
        );
    }
}
