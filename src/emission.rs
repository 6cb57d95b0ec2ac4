//! Emission likelihoods.
//!
//! For every state and time step the evaluator computes the log-density of
//! the observation under the state's Gaussian, then exponentiates once for
//! the linear-scale matrix consumed by forward-backward. Three paths exist:
//! full covariance, block-diagonal under a [`DependencyStructure`], and a
//! marginal restricted to a dimension subset.

use crate::errors::{validate_dims_in_range, HmmError, HmmResult};
use crate::gaussian::GaussianStateBank;
use crate::linear_algebra::{block_diagonal_mask, sub_matrix, sub_vector, GaussianDensity};
use crate::observations::SequenceData;
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Partition of the observation dimensions into independent blocks.
///
/// `[[0, 1], [2]]` keeps full covariance between dimensions 0 and 1 and none
/// with dimension 2; `[[0], [1], [2]]` is a diagonal covariance.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DependencyStructure {
    groups: Vec<Vec<usize>>,
    dim: usize,
}

impl DependencyStructure {
    /// Groups must be non-empty, disjoint, and together cover `0..dim`.
    pub fn new(groups: Vec<Vec<usize>>, dim: usize) -> HmmResult<Self> {
        let flat: Vec<usize> = groups.iter().flatten().cloned().collect();
        validate_dims_in_range(&flat, dim)?;
        if flat.len() != dim || groups.iter().any(|g| g.is_empty()) {
            return Err(HmmError::InvalidParameter {
                parameter: "dependency groups".to_string(),
                value: flat.len() as f64,
                constraint: format!("non-empty groups partitioning all {} dimensions", dim),
            });
        }
        Ok(Self { groups, dim })
    }

    /// One block holding every dimension.
    pub fn full(dim: usize) -> Self {
        Self {
            groups: vec![(0..dim).collect()],
            dim,
        }
    }

    /// One block per dimension.
    pub fn diagonal(dim: usize) -> Self {
        Self {
            groups: (0..dim).map(|d| vec![d]).collect(),
            dim,
        }
    }

    /// The blocks.
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Number of dimensions partitioned.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// 0/1 mask zeroing cross-block covariance entries.
    pub fn mask(&self) -> DMatrix<f64> {
        block_diagonal_mask(self.dim, &self.groups)
    }
}

/// Emission likelihood matrices for one sequence, shape S×T.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionLikelihoods {
    /// Log-likelihoods `L`
    pub log: DMatrix<f64>,
    /// `B = exp(L)`
    pub linear: DMatrix<f64>,
}

impl EmissionLikelihoods {
    /// Build from log-likelihoods.
    pub fn from_log(log: DMatrix<f64>) -> Self {
        let linear = log.map(f64::exp);
        Self { log, linear }
    }

    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.log.nrows()
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.log.ncols()
    }

    /// Whether there are no time steps.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Multiply each state's row by `weights[s]`.
    pub fn scale_states(&mut self, weights: &DVector<f64>) {
        for (s, &w) in weights.iter().enumerate() {
            self.linear.row_mut(s).scale_mut(w);
            self.log.row_mut(s).add_scalar_mut(w.ln());
        }
    }
}

/// Computes emission likelihoods from a state bank.
#[derive(Debug, Clone, Copy)]
pub struct EmissionEvaluator<'a> {
    bank: &'a GaussianStateBank,
    dependency: Option<&'a DependencyStructure>,
    marginal: Option<&'a [usize]>,
}

impl<'a> EmissionEvaluator<'a> {
    /// Full-covariance evaluator.
    pub fn new(bank: &'a GaussianStateBank) -> Self {
        Self {
            bank,
            dependency: None,
            marginal: None,
        }
    }

    /// Evaluate block-wise under a dependency structure.
    pub fn with_dependency(mut self, dependency: Option<&'a DependencyStructure>) -> Self {
        self.dependency = dependency;
        self
    }

    /// Restrict evaluation to a dimension subset. Sequences evaluated in
    /// this mode hold only the listed dimensions, in the listed order. An
    /// empty subset yields unit likelihood everywhere.
    pub fn with_marginal(mut self, dims: Option<&'a [usize]>) -> Self {
        self.marginal = dims;
        self
    }

    /// Log and linear likelihoods for `sequence`.
    pub fn evaluate<S: SequenceData + ?Sized>(&self, sequence: &S) -> HmmResult<EmissionLikelihoods> {
        let obs = sequence.observations();
        let log = match (self.marginal, self.dependency) {
            (Some(_), Some(_)) => {
                return Err(HmmError::InvalidParameter {
                    parameter: "emission mode".to_string(),
                    value: f64::NAN,
                    constraint: "marginal and dependency evaluation are exclusive".to_string(),
                })
            }
            (Some(dims), None) => self.marginal_log(obs, dims)?,
            (None, Some(dep)) => self.dependency_log(obs, dep)?,
            (None, None) => {
                self.check_dim(obs.ncols(), self.bank.dim())?;
                let densities = self.bank.densities()?;
                stack_rows(&densities, obs)
            }
        };
        Ok(EmissionLikelihoods::from_log(log))
    }

    fn check_dim(&self, actual: usize, expected: usize) -> HmmResult<()> {
        if actual != expected {
            return Err(HmmError::DimensionMismatch {
                expected,
                actual,
                context: "observation dimension".to_string(),
            });
        }
        Ok(())
    }

    fn dependency_log(&self, obs: &DMatrix<f64>, dep: &DependencyStructure) -> HmmResult<DMatrix<f64>> {
        self.check_dim(obs.ncols(), self.bank.dim())?;
        self.check_dim(dep.dim(), self.bank.dim())?;

        let mut log = DMatrix::zeros(self.bank.num_states(), obs.nrows());
        for (i, state) in self.bank.states().iter().enumerate() {
            for group in dep.groups() {
                let density = GaussianDensity::new(
                    &sub_vector(&state.mean, group),
                    &sub_matrix(&state.covariance, group, group),
                    i,
                )?;
                let block_obs = obs.select_columns(group.iter());
                let block_log = density.log_pdf_rows(&block_obs);
                let mut row = log.row_mut(i);
                row += block_log.transpose();
            }
        }
        Ok(log)
    }

    fn marginal_log(&self, obs: &DMatrix<f64>, dims: &[usize]) -> HmmResult<DMatrix<f64>> {
        if dims.is_empty() {
            return Ok(DMatrix::zeros(self.bank.num_states(), obs.nrows()));
        }
        let marginal = self.bank.marginal(dims)?;
        // Column k of `obs` holds dimension dims[k]
        self.check_dim(obs.ncols(), dims.len())?;
        let densities = marginal.densities()?;
        Ok(stack_rows(&densities, obs))
    }
}

fn stack_rows(densities: &[GaussianDensity], obs: &DMatrix<f64>) -> DMatrix<f64> {
    let mut log = DMatrix::zeros(densities.len(), obs.nrows());
    for (i, density) in densities.iter().enumerate() {
        log.set_row(i, &density.log_pdf_rows(obs).transpose());
    }
    log
}
