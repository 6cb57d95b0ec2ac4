//! # Training Configuration
//!
//! Settings for EM training of the HMM and for the pooled-data mixture fit
//! used to seed it. Presets cover the common covariance structures; the
//! `with_*` methods adjust individual fields.

use crate::emission::DependencyStructure;
use crate::errors::{validate_dimension, HmmError, HmmResult};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Covariance structure enforced after every M-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CovarianceMode {
    /// Unrestricted symmetric covariance
    #[default]
    Full,
    /// Off-diagonal entries zeroed
    Diagonal,
    /// Isotropic `σ²·I` with σ² the mean of the diagonal
    Spherical,
}

/// Diagonal floor added to re-estimated covariances.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Regularization {
    /// Same value on every diagonal entry
    Scalar(f64),
    /// One value per dimension
    PerDimension(Vec<f64>),
}

impl Default for Regularization {
    fn default() -> Self {
        Regularization::Scalar(1e-8)
    }
}

impl Regularization {
    /// The regularization as a D×D diagonal matrix.
    pub fn matrix(&self, dim: usize) -> HmmResult<DMatrix<f64>> {
        let diag = match self {
            Regularization::Scalar(v) => DVector::from_element(dim, *v),
            Regularization::PerDimension(values) => {
                validate_dimension(dim, values.len(), "per-dimension regularization")?;
                DVector::from_column_slice(values)
            }
        };
        if let Some(&bad) = diag.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(HmmError::InvalidParameter {
                parameter: "regularization".to_string(),
                value: bad,
                constraint: "finite and nonnegative".to_string(),
            });
        }
        Ok(DMatrix::from_diagonal(&diag))
    }
}

/// Configuration for EM training.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmConfig {
    /// Iterations run before convergence is checked
    pub min_iterations: usize,
    /// Iteration budget
    pub max_iterations: usize,
    /// Minimum log-likelihood improvement to keep iterating
    pub tolerance: f64,
    /// Diagonal floor added to every covariance
    pub regularization: Regularization,
    /// Covariance structure
    pub covariance_mode: CovarianceMode,
    /// Recompute covariances without regularization once converged
    pub end_covariance: bool,
    /// Block structure used when evaluating emissions
    pub dependency: Option<DependencyStructure>,
    /// D×D multiplicative mask applied to every covariance
    pub dependency_mask: Option<DMatrix<f64>>,
    /// S×N 0/1 mask; zero forbids state s from explaining sequence n
    pub assignment_mask: Option<DMatrix<f64>>,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self::full()
    }
}

impl EmConfig {
    /// Full covariance, 5 to 50 iterations, tolerance 1e-4.
    pub fn full() -> Self {
        Self {
            min_iterations: 5,
            max_iterations: 50,
            tolerance: 1e-4,
            regularization: Regularization::default(),
            covariance_mode: CovarianceMode::Full,
            end_covariance: false,
            dependency: None,
            dependency_mask: None,
            assignment_mask: None,
        }
    }

    /// Diagonal covariance preset.
    pub fn diagonal() -> Self {
        Self {
            covariance_mode: CovarianceMode::Diagonal,
            ..Self::full()
        }
    }

    /// Spherical covariance preset.
    pub fn spherical() -> Self {
        Self {
            covariance_mode: CovarianceMode::Spherical,
            ..Self::full()
        }
    }

    /// Set the iteration bounds.
    pub fn with_iterations(mut self, min_iterations: usize, max_iterations: usize) -> Self {
        self.min_iterations = min_iterations;
        self.max_iterations = max_iterations;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the regularization.
    pub fn with_regularization(mut self, regularization: Regularization) -> Self {
        self.regularization = regularization;
        self
    }

    /// Set the covariance mode.
    pub fn with_covariance_mode(mut self, mode: CovarianceMode) -> Self {
        self.covariance_mode = mode;
        self
    }

    /// Recompute covariances without regularization after convergence.
    pub fn with_end_covariance(mut self, end_covariance: bool) -> Self {
        self.end_covariance = end_covariance;
        self
    }

    /// Evaluate emissions block-wise.
    pub fn with_dependency(mut self, dependency: DependencyStructure) -> Self {
        self.dependency = Some(dependency);
        self
    }

    /// Mask disallowed covariance entries.
    pub fn with_dependency_mask(mut self, mask: DMatrix<f64>) -> Self {
        self.dependency_mask = Some(mask);
        self
    }

    /// Restrict which states may explain which sequences.
    pub fn with_assignment_mask(mut self, mask: DMatrix<f64>) -> Self {
        self.assignment_mask = Some(mask);
        self
    }

    /// Check the configuration against a model with `num_states` states of
    /// dimension `dim` trained on `num_sequences` sequences.
    pub fn validate(&self, num_states: usize, dim: usize, num_sequences: usize) -> HmmResult<()> {
        if self.max_iterations == 0 {
            return Err(HmmError::InvalidParameter {
                parameter: "max_iterations".to_string(),
                value: 0.0,
                constraint: "at least 1".to_string(),
            });
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(HmmError::InvalidParameter {
                parameter: "tolerance".to_string(),
                value: self.tolerance,
                constraint: "finite and nonnegative".to_string(),
            });
        }
        self.regularization.matrix(dim)?;
        if let Some(dep) = &self.dependency {
            validate_dimension(dim, dep.dim(), "dependency structure")?;
        }
        if let Some(mask) = &self.dependency_mask {
            validate_dimension(dim, mask.nrows(), "dependency mask rows")?;
            validate_dimension(dim, mask.ncols(), "dependency mask columns")?;
        }
        if let Some(mask) = &self.assignment_mask {
            validate_dimension(num_states, mask.nrows(), "assignment mask rows")?;
            validate_dimension(num_sequences, mask.ncols(), "assignment mask columns")?;
        }
        Ok(())
    }
}

/// Configuration for fitting a Gaussian mixture to pooled data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MixtureFitConfig {
    /// EM iteration budget
    pub max_iterations: usize,
    /// Stop when the average log-likelihood changes by less than this
    pub tolerance: f64,
    /// Diagonal floor added to every covariance
    pub regularization: f64,
    /// Seed for k-means++ centroid selection
    pub seed: u64,
}

impl Default for MixtureFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            regularization: 1e-8,
            seed: 42,
        }
    }
}

impl MixtureFitConfig {
    /// Use a different seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let c = EmConfig::default();
        assert_eq!(c.min_iterations, 5);
        assert_eq!(c.max_iterations, 50);
        assert_eq!(c.tolerance, 1e-4);
        assert_eq!(c.covariance_mode, CovarianceMode::Full);
        assert_eq!(EmConfig::diagonal().covariance_mode, CovarianceMode::Diagonal);
        assert_eq!(EmConfig::spherical().covariance_mode, CovarianceMode::Spherical);
    }

    #[test]
    fn test_regularization_matrix() {
        let m = Regularization::PerDimension(vec![1.0, 2.0]).matrix(2).unwrap();
        assert_eq!(m[(1, 1)], 2.0);
        assert_eq!(m[(0, 1)], 0.0);
        assert!(Regularization::PerDimension(vec![1.0]).matrix(2).is_err());
        assert!(Regularization::Scalar(-1.0).matrix(2).is_err());
    }

    #[test]
    fn test_validate_masks() {
        let c = EmConfig::full().with_assignment_mask(DMatrix::from_element(2, 3, 1.0));
        assert!(c.validate(2, 1, 3).is_ok());
        assert!(matches!(
            c.validate(2, 1, 4),
            Err(HmmError::DimensionMismatch { .. })
        ));
        let c = EmConfig::full().with_dependency_mask(DMatrix::identity(3, 3));
        assert!(c.validate(2, 2, 1).is_err());
        assert!(EmConfig::full().with_iterations(0, 0).validate(2, 2, 1).is_err());
    }
}
