//! Per-state Gaussian parameters.
//!
//! [`GaussianStateBank`] holds the mean vector and covariance matrix of every
//! hidden state together with the mixing priors. It is the container the
//! evaluator reads from and the EM trainer writes into.

use crate::errors::{validate_dimension, validate_distribution, validate_dims_in_range, HmmError, HmmResult};
use crate::linear_algebra::{regularized_cholesky, sub_matrix, sub_vector, GaussianDensity};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mean and covariance of a single state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianState {
    /// Mean vector (length D)
    pub mean: DVector<f64>,
    /// Covariance matrix (D×D)
    pub covariance: DMatrix<f64>,
}

impl GaussianState {
    /// Create a state, checking that the shapes agree.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> HmmResult<Self> {
        validate_dimension(covariance.nrows(), covariance.ncols(), "covariance (square)")?;
        validate_dimension(covariance.nrows(), mean.len(), "mean length")?;
        Ok(Self { mean, covariance })
    }

    /// State with covariance `variance · I`.
    pub fn isotropic(mean: DVector<f64>, variance: f64) -> Self {
        let d = mean.len();
        Self {
            mean,
            covariance: DMatrix::identity(d, d) * variance,
        }
    }

    /// Dimension of the state.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Restrict to the listed dimensions (in the given order).
    pub fn marginal(&self, dims: &[usize]) -> HmmResult<GaussianState> {
        validate_dims_in_range(dims, self.dim())?;
        Ok(Self {
            mean: sub_vector(&self.mean, dims),
            covariance: sub_matrix(&self.covariance, dims, dims),
        })
    }

    /// Factorized density of this state; `index` labels errors.
    pub fn density(&self, index: usize) -> HmmResult<GaussianDensity> {
        GaussianDensity::new(&self.mean, &self.covariance, index)
    }

    /// Conditional distribution of `dims_out` given `dims_in = values_in`.
    ///
    /// With no input dimensions this is the marginal over `dims_out`.
    pub fn condition(
        &self,
        dims_in: &[usize],
        values_in: &DVector<f64>,
        dims_out: &[usize],
        index: usize,
    ) -> HmmResult<GaussianState> {
        validate_dims_in_range(dims_in, self.dim())?;
        validate_dims_in_range(dims_out, self.dim())?;
        validate_dimension(dims_in.len(), values_in.len(), "conditioning input")?;

        if dims_in.is_empty() {
            return self.marginal(dims_out);
        }

        let mu_in = sub_vector(&self.mean, dims_in);
        let mu_out = sub_vector(&self.mean, dims_out);
        let sigma_in = sub_matrix(&self.covariance, dims_in, dims_in);
        let sigma_out = sub_matrix(&self.covariance, dims_out, dims_out);
        let sigma_out_in = sub_matrix(&self.covariance, dims_out, dims_in);

        let chol = regularized_cholesky(&sigma_in, index)?;
        // gainᵀ = Σ_ii⁻¹ Σ_io
        let gain_t = chol.solve(&sigma_out_in.transpose());

        let mean = mu_out + gain_t.transpose() * (values_in - mu_in);
        let covariance = sigma_out - &sigma_out_in * gain_t;

        Ok(Self {
            mean,
            covariance: crate::linear_algebra::symmetrize(&covariance),
        })
    }
}

/// Means, covariances and mixing priors for S states of dimension D.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianStateBank {
    states: Vec<GaussianState>,
    priors: DVector<f64>,
    dim: usize,
}

impl GaussianStateBank {
    /// Bank with uniform mixing priors.
    pub fn new(states: Vec<GaussianState>) -> HmmResult<Self> {
        let n = states.len();
        if n == 0 {
            return Err(HmmError::InvalidParameter {
                parameter: "num_states".to_string(),
                value: 0.0,
                constraint: "at least one state".to_string(),
            });
        }
        Self::with_priors(states, DVector::from_element(n, 1.0 / n as f64))
    }

    /// Bank with explicit mixing priors.
    pub fn with_priors(states: Vec<GaussianState>, priors: DVector<f64>) -> HmmResult<Self> {
        let dim = states.first().map(|s| s.dim()).ok_or(HmmError::InvalidParameter {
            parameter: "num_states".to_string(),
            value: 0.0,
            constraint: "at least one state".to_string(),
        })?;

        for (i, s) in states.iter().enumerate() {
            validate_dimension(dim, s.dim(), &format!("state {}", i))?;
            validate_dimension(dim, s.covariance.nrows(), &format!("covariance of state {}", i))?;
            validate_dimension(dim, s.covariance.ncols(), &format!("covariance of state {}", i))?;
        }
        validate_dimension(states.len(), priors.len(), "mixing priors")?;
        validate_distribution(&priors, "mixing priors")?;

        Ok(Self {
            states,
            priors,
            dim,
        })
    }

    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Observation dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// All states.
    pub fn states(&self) -> &[GaussianState] {
        &self.states
    }

    /// A single state.
    pub fn state(&self, index: usize) -> HmmResult<&GaussianState> {
        self.states.get(index).ok_or(HmmError::StateOutOfRange {
            state: index,
            num_states: self.states.len(),
        })
    }

    /// Mean of a state.
    pub fn mean(&self, index: usize) -> HmmResult<&DVector<f64>> {
        Ok(&self.state(index)?.mean)
    }

    /// Covariance of a state.
    pub fn covariance(&self, index: usize) -> HmmResult<&DMatrix<f64>> {
        Ok(&self.state(index)?.covariance)
    }

    /// Mixing priors.
    pub fn priors(&self) -> &DVector<f64> {
        &self.priors
    }

    /// Replace a state, keeping the dimension fixed.
    pub fn set_state(&mut self, index: usize, state: GaussianState) -> HmmResult<()> {
        validate_dimension(self.dim, state.dim(), &format!("state {}", index))?;
        validate_dimension(self.dim, state.covariance.nrows(), &format!("covariance of state {}", index))?;
        let num_states = self.states.len();
        let slot = self.states.get_mut(index).ok_or(HmmError::StateOutOfRange {
            state: index,
            num_states,
        })?;
        *slot = state;
        Ok(())
    }

    /// Replace a state's mean.
    pub fn set_mean(&mut self, index: usize, mean: DVector<f64>) -> HmmResult<()> {
        let covariance = self.covariance(index)?.clone();
        self.set_state(index, GaussianState::new(mean, covariance)?)
    }

    /// Replace a state's covariance.
    pub fn set_covariance(&mut self, index: usize, covariance: DMatrix<f64>) -> HmmResult<()> {
        let mean = self.mean(index)?.clone();
        self.set_state(index, GaussianState::new(mean, covariance)?)
    }

    /// Replace the mixing priors.
    pub fn set_priors(&mut self, priors: DVector<f64>) -> HmmResult<()> {
        validate_dimension(self.states.len(), priors.len(), "mixing priors")?;
        validate_distribution(&priors, "mixing priors")?;
        self.priors = priors;
        Ok(())
    }

    /// Bank restricted to the listed dimensions.
    pub fn marginal(&self, dims: &[usize]) -> HmmResult<GaussianStateBank> {
        let states = self
            .states
            .iter()
            .map(|s| s.marginal(dims))
            .collect::<HmmResult<Vec<_>>>()?;
        Ok(Self {
            states,
            priors: self.priors.clone(),
            dim: dims.len(),
        })
    }

    /// Factorized densities of all states.
    pub fn densities(&self) -> HmmResult<Vec<GaussianDensity>> {
        self.states
            .iter()
            .enumerate()
            .map(|(i, s)| s.density(i))
            .collect()
    }
}
