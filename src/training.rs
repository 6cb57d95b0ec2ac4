//! # Expectation-Maximization Training
//!
//! Baum-Welch re-estimation of a [`GaussianHmm`] from a set of independent
//! observation sequences of varying length.
//!
//! Each iteration runs forward-backward on every sequence, waits for all of
//! them, then re-estimates the emission parameters, the initial priors and
//! the transition matrix from the pooled statistics. Training stops once the
//! average log-likelihood improves by less than the configured tolerance
//! after the minimum number of iterations, or when the iteration budget runs
//! out. Running out of iterations is reported as a [`Diagnostic`], not an
//! error; the parameters of the last iteration are kept.

use crate::config::{CovarianceMode, EmConfig};
use crate::errors::{validate_dimension, Diagnostic, HmmResult};
use crate::forward_backward::forward_backward;
use crate::gaussian::{GaussianState, GaussianStateBank};
use crate::hmm::GaussianHmm;
use crate::linear_algebra::symmetrize;
use crate::math_utils::constants::REALMIN;
use crate::observations::{concatenate, validate_sequences, SequenceData};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome of an EM run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmReport {
    /// State marginals of the final E-step, all sequences side by side (S×ΣT)
    pub gamma: DMatrix<f64>,
    /// The same marginals split per sequence
    pub gammas: Vec<DMatrix<f64>>,
    /// Average per-sequence log-likelihood at every iteration
    pub log_likelihoods: Vec<f64>,
    /// Whether the tolerance criterion stopped training
    pub converged: bool,
    /// Number of iterations run
    pub iterations: usize,
    /// Non-fatal conditions met during training
    pub diagnostics: Vec<Diagnostic>,
}

impl EmReport {
    /// Average log-likelihood of the last iteration.
    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihoods.last().copied()
    }
}

/// Expected sufficient statistics of one sequence.
struct SequenceStatistics {
    gamma: DMatrix<f64>,
    zeta_sum: DMatrix<f64>,
    /// Row sums of gamma over all but the last step
    transition_mass: DVector<f64>,
    log_likelihood: f64,
}

/// EM runner borrowing its configuration.
#[derive(Debug, Clone, Copy)]
pub struct ExpectationMaximization<'a> {
    config: &'a EmConfig,
}

impl<'a> ExpectationMaximization<'a> {
    /// Runner for the given configuration.
    pub fn new(config: &'a EmConfig) -> Self {
        Self { config }
    }

    /// Train `hmm` in place on `sequences`.
    pub fn run<S: SequenceData>(&self, hmm: &mut GaussianHmm, sequences: &[S]) -> HmmResult<EmReport> {
        let dim = validate_sequences(sequences)?;
        validate_dimension(hmm.dim(), dim, "observation dimension")?;
        self.config.validate(hmm.num_states(), dim, sequences.len())?;

        let regularization = self.config.regularization.matrix(dim)?;
        let data = concatenate(sequences)?;

        let mut log_likelihoods = Vec::with_capacity(self.config.max_iterations);
        let mut converged = false;
        let mut statistics = Vec::new();

        for it in 0..self.config.max_iterations {
            statistics = self.expectation(hmm, sequences)?;

            let average = statistics.iter().map(|s| s.log_likelihood).sum::<f64>() / statistics.len() as f64;
            log_likelihoods.push(average);

            self.maximization(hmm, &data, &statistics, Some(&regularization))?;

            let improvement = match it {
                0 => f64::INFINITY,
                _ => average - log_likelihoods[it - 1],
            };
            debug!(
                "EM iteration {}: average log-likelihood {:.6}, improvement {:.3e}",
                it + 1,
                average,
                improvement
            );

            if it > self.config.min_iterations && improvement < self.config.tolerance {
                debug!("EM converged after {} iterations", it + 1);
                converged = true;
                break;
            }
        }

        if converged && self.config.end_covariance {
            self.recompute_covariances(hmm, &data, &statistics)?;
        }

        let mut diagnostics = Vec::new();
        if !converged {
            let n = log_likelihoods.len();
            let last_improvement = match n {
                0 | 1 => f64::NAN,
                _ => log_likelihoods[n - 1] - log_likelihoods[n - 2],
            };
            let diagnostic = Diagnostic::NonConvergence {
                iterations: n,
                last_improvement,
            };
            warn!("{}", diagnostic);
            diagnostics.push(diagnostic);
        }

        let gammas: Vec<DMatrix<f64>> = statistics.into_iter().map(|s| s.gamma).collect();
        Ok(EmReport {
            gamma: hstack(&gammas, hmm.num_states()),
            gammas,
            iterations: log_likelihoods.len(),
            log_likelihoods,
            converged,
            diagnostics,
        })
    }

    fn expectation<S: SequenceData>(
        &self,
        hmm: &GaussianHmm,
        sequences: &[S],
    ) -> HmmResult<Vec<SequenceStatistics>> {
        #[cfg(feature = "parallel")]
        let iter = sequences.par_iter().enumerate();
        #[cfg(not(feature = "parallel"))]
        let iter = sequences.iter().enumerate();

        iter.map(|(n, seq)| self.sequence_statistics(hmm, n, seq))
            .collect()
    }

    fn sequence_statistics<S: SequenceData>(
        &self,
        hmm: &GaussianHmm,
        n: usize,
        sequence: &S,
    ) -> HmmResult<SequenceStatistics> {
        let mut likelihoods = hmm.emission_likelihoods(sequence, self.config.dependency.as_ref())?;
        if let Some(mask) = &self.config.assignment_mask {
            likelihoods.scale_states(&mask.column(n).into_owned());
        }

        let messages = forward_backward(&likelihoods.linear, hmm.init_priors(), hmm.transition())?;
        let t_len = messages.len();
        let transition_mass = messages
            .gamma
            .columns(0, t_len - 1)
            .column_sum();

        Ok(SequenceStatistics {
            zeta_sum: messages.zeta_sum(),
            log_likelihood: messages.log_likelihood(),
            gamma: messages.gamma,
            transition_mass,
        })
    }

    fn maximization(
        &self,
        hmm: &mut GaussianHmm,
        data: &DMatrix<f64>,
        statistics: &[SequenceStatistics],
        regularization: Option<&DMatrix<f64>>,
    ) -> HmmResult<()> {
        let s = hmm.num_states();
        let gammas: Vec<DMatrix<f64>> = statistics.iter().map(|st| st.gamma.clone()).collect();
        let gamma = hstack(&gammas, s);
        let occupancy = gamma.column_sum();

        let mut states = Vec::with_capacity(s);
        for i in 0..s {
            let weights = gamma.row(i).transpose() / (occupancy[i] + REALMIN);
            let (mean, covariance) = weighted_moments(data, &weights);
            states.push(GaussianState::new(mean, self.shape_covariance(covariance, regularization))?);
        }
        let total = occupancy.sum();
        let mixing = if total > 0.0 {
            &occupancy / total
        } else {
            DVector::from_element(s, 1.0 / s as f64)
        };
        let bank = GaussianStateBank::with_priors(states, mixing)?;

        let mut init_priors = statistics
            .iter()
            .fold(DVector::<f64>::zeros(s), |acc, st| acc + st.gamma.column(0))
            / statistics.len() as f64;
        let init_total = init_priors.sum();
        init_priors /= init_total + REALMIN;

        let zeta = statistics
            .iter()
            .fold(DMatrix::<f64>::zeros(s, s), |acc, st| acc + &st.zeta_sum);
        let mass = statistics
            .iter()
            .fold(DVector::<f64>::zeros(s), |acc, st| acc + &st.transition_mass);

        let mut transition = hmm.transition().clone();
        for i in 0..s {
            let row = zeta.row(i) / (mass[i] + REALMIN);
            let row_sum = row.sum();
            // States never left keep their previous row
            if row_sum > 0.0 {
                transition.set_row(i, &(row / row_sum));
            }
        }

        hmm.update_parameters(bank, init_priors, transition);
        Ok(())
    }

    /// Final pass: covariances from the last responsibilities, without the
    /// regularization floor.
    fn recompute_covariances(
        &self,
        hmm: &mut GaussianHmm,
        data: &DMatrix<f64>,
        statistics: &[SequenceStatistics],
    ) -> HmmResult<()> {
        let s = hmm.num_states();
        let gammas: Vec<DMatrix<f64>> = statistics.iter().map(|st| st.gamma.clone()).collect();
        let gamma = hstack(&gammas, s);
        for i in 0..s {
            let weights = gamma.row(i).transpose() / (gamma.row(i).sum() + REALMIN);
            let (mean, covariance) = weighted_moments(data, &weights);
            hmm.bank_mut()
                .set_state(i, GaussianState::new(mean, self.shape_covariance(covariance, None))?)?;
        }
        Ok(())
    }

    fn shape_covariance(&self, covariance: DMatrix<f64>, regularization: Option<&DMatrix<f64>>) -> DMatrix<f64> {
        let mut cov = symmetrize(&covariance);
        if let Some(reg) = regularization {
            cov += reg;
        }

        let d = cov.nrows();
        cov = match self.config.covariance_mode {
            CovarianceMode::Full => cov,
            CovarianceMode::Diagonal => DMatrix::from_diagonal(&cov.diagonal()),
            CovarianceMode::Spherical => DMatrix::identity(d, d) * (cov.trace() / d as f64),
        };

        match &self.config.dependency_mask {
            Some(mask) => cov.component_mul(mask),
            None => cov,
        }
    }
}

/// Weighted mean and covariance of the rows of `data`; weights sum to one.
fn weighted_moments(data: &DMatrix<f64>, weights: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let mean = data.transpose() * weights;
    let mean_t = mean.transpose();

    let mut centered = data.clone();
    for mut row in centered.row_iter_mut() {
        row -= &mean_t;
    }
    let mut weighted = centered.clone();
    for (mut row, w) in weighted.row_iter_mut().zip(weights.iter()) {
        row *= *w;
    }

    (mean, centered.transpose() * weighted)
}

fn hstack(blocks: &[DMatrix<f64>], rows: usize) -> DMatrix<f64> {
    let cols = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMatrix::zeros(rows, cols);
    let mut offset = 0;
    for b in blocks {
        out.columns_mut(offset, b.ncols()).copy_from(b);
        offset += b.ncols();
    }
    out
}
