//! Hidden Markov model with multivariate Gaussian emissions.
//!
//! The model owns the initial state distribution and the transition matrix;
//! emission parameters live in a [`GaussianStateBank`]. Both distributions
//! are set at construction, either explicitly or through
//! [`GaussianHmm::with_uniform_parameters`], which reports what it
//! defaulted instead of mutating state on read.

use crate::config::{EmConfig, MixtureFitConfig};
use crate::emission::{DependencyStructure, EmissionEvaluator, EmissionLikelihoods};
use crate::errors::{
    validate_dimension, validate_distribution, validate_stochastic_matrix, Diagnostic, HmmError,
    HmmResult, ModelParameter,
};
use crate::forward_backward::{forward_backward, Messages};
use crate::gaussian::GaussianStateBank;
use crate::linear_algebra::regularized_cholesky;
use crate::mixture::{
    condition_with_weights, prior_weights, ConditionalSequence, GaussianMixture, MixtureModel,
};
use crate::observations::{concatenate, SequenceData};
use crate::training::{EmReport, ExpectationMaximization};
use crate::viterbi::{viterbi, ViterbiPath};
use log::warn;
use nalgebra::{DMatrix, DVector};
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gaussian-emission hidden Markov model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianHmm {
    bank: GaussianStateBank,
    init_priors: DVector<f64>,
    transition: DMatrix<f64>,
}

impl GaussianHmm {
    /// Model with explicit initial priors and transition matrix.
    pub fn new(
        bank: GaussianStateBank,
        init_priors: DVector<f64>,
        transition: DMatrix<f64>,
    ) -> HmmResult<Self> {
        let s = bank.num_states();
        validate_dimension(s, init_priors.len(), "initial priors")?;
        validate_distribution(&init_priors, "initial priors")?;
        validate_dimension(s, transition.nrows(), "transition rows")?;
        validate_stochastic_matrix(&transition, "transition")?;
        Ok(Self {
            bank,
            init_priors,
            transition,
        })
    }

    /// Model with uniform initial priors and transition matrix.
    ///
    /// The returned diagnostics name both defaulted parameters.
    pub fn with_uniform_parameters(bank: GaussianStateBank) -> (Self, Vec<Diagnostic>) {
        let s = bank.num_states();
        let mut hmm = Self {
            bank,
            init_priors: DVector::from_element(s, 1.0 / s as f64),
            transition: DMatrix::from_element(s, s, 1.0 / s as f64),
        };
        let diagnostics = hmm.seed_uniform();
        (hmm, diagnostics)
    }

    /// Seed from pooled data: fit a Gaussian mixture on all sequences
    /// concatenated, copy its components, and start from uniform priors and
    /// transitions.
    pub fn init_from_pooled<S: SequenceData>(
        sequences: &[S],
        num_states: usize,
        config: &MixtureFitConfig,
    ) -> HmmResult<Self> {
        let pooled = concatenate(sequences)?;
        let mixture = GaussianMixture::fit(&pooled, num_states, config)?;
        let s = num_states as f64;
        Self::new(
            mixture.into_bank(),
            DVector::from_element(num_states, 1.0 / s),
            DMatrix::from_element(num_states, num_states, 1.0 / s),
        )
    }

    /// Reset initial priors and transition matrix to uniform.
    pub fn seed_uniform(&mut self) -> Vec<Diagnostic> {
        let s = self.num_states();
        self.init_priors = DVector::from_element(s, 1.0 / s as f64);
        self.transition = DMatrix::from_element(s, s, 1.0 / s as f64);

        let diagnostics = vec![
            Diagnostic::UninitializedParameter {
                parameter: ModelParameter::InitPriors,
            },
            Diagnostic::UninitializedParameter {
                parameter: ModelParameter::Transition,
            },
        ];
        for d in &diagnostics {
            warn!("{}", d);
        }
        diagnostics
    }

    /// Emission parameters.
    pub fn bank(&self) -> &GaussianStateBank {
        &self.bank
    }

    /// Mutable emission parameters.
    pub fn bank_mut(&mut self) -> &mut GaussianStateBank {
        &mut self.bank
    }

    /// Initial state distribution.
    pub fn init_priors(&self) -> &DVector<f64> {
        &self.init_priors
    }

    /// Row-stochastic transition matrix.
    pub fn transition(&self) -> &DMatrix<f64> {
        &self.transition
    }

    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.bank.num_states()
    }

    /// Observation dimension.
    pub fn dim(&self) -> usize {
        self.bank.dim()
    }

    /// Replace the initial distribution.
    pub fn set_init_priors(&mut self, init_priors: DVector<f64>) -> HmmResult<()> {
        validate_dimension(self.num_states(), init_priors.len(), "initial priors")?;
        validate_distribution(&init_priors, "initial priors")?;
        self.init_priors = init_priors;
        Ok(())
    }

    /// Replace the transition matrix.
    pub fn set_transition(&mut self, transition: DMatrix<f64>) -> HmmResult<()> {
        validate_dimension(self.num_states(), transition.nrows(), "transition rows")?;
        validate_stochastic_matrix(&transition, "transition")?;
        self.transition = transition;
        Ok(())
    }

    /// Overwrite all parameters after an M-step.
    pub(crate) fn update_parameters(
        &mut self,
        bank: GaussianStateBank,
        init_priors: DVector<f64>,
        transition: DMatrix<f64>,
    ) {
        self.bank = bank;
        self.init_priors = init_priors;
        self.transition = transition;
    }

    /// Emission likelihoods of one sequence.
    pub fn emission_likelihoods<S: SequenceData + ?Sized>(
        &self,
        sequence: &S,
        dependency: Option<&DependencyStructure>,
    ) -> HmmResult<EmissionLikelihoods> {
        EmissionEvaluator::new(&self.bank)
            .with_dependency(dependency)
            .evaluate(sequence)
    }

    /// Forward-backward messages of one sequence.
    pub fn compute_messages<S: SequenceData + ?Sized>(
        &self,
        sequence: &S,
        dependency: Option<&DependencyStructure>,
    ) -> HmmResult<Messages> {
        let b = self.emission_likelihoods(sequence, dependency)?;
        forward_backward(&b.linear, &self.init_priors, &self.transition)
    }

    /// Forward-backward messages using only the listed dimensions.
    ///
    /// `sequence` holds exactly the listed dimensions, in the listed order.
    /// An empty list propagates the Markov prior alone.
    pub fn compute_marginal_messages<S: SequenceData + ?Sized>(
        &self,
        sequence: &S,
        dims: &[usize],
    ) -> HmmResult<Messages> {
        let b = EmissionEvaluator::new(&self.bank)
            .with_marginal(Some(dims))
            .evaluate(sequence)?;
        forward_backward(&b.linear, &self.init_priors, &self.transition)
    }

    /// Most likely state path.
    pub fn viterbi_path<S: SequenceData + ?Sized>(&self, sequence: &S) -> HmmResult<Vec<usize>> {
        Ok(self.decode(sequence)?.states)
    }

    /// Most likely state path with its log-probability.
    pub fn decode<S: SequenceData + ?Sized>(&self, sequence: &S) -> HmmResult<ViterbiPath> {
        if sequence.is_empty() {
            return Err(HmmError::EmptySequence { index: 0 });
        }
        let b = self.emission_likelihoods(sequence, None)?;
        viterbi(&b.log, &self.init_priors, &self.transition)
    }

    /// Log-likelihood `-Σ ln c[t]` of every sequence.
    pub fn log_likelihood<S: SequenceData>(&self, sequences: &[S]) -> HmmResult<Vec<f64>> {
        sequences
            .iter()
            .enumerate()
            .map(|(index, seq)| {
                if seq.is_empty() {
                    return Err(HmmError::EmptySequence { index });
                }
                Ok(self.compute_messages(seq, None)?.log_likelihood())
            })
            .collect()
    }

    /// Sum of the log scaling multipliers `Σ ln c[t]` of every sequence.
    ///
    /// This is the negated log-likelihood: lower scores mean better fit.
    pub fn score<S: SequenceData>(&self, sequences: &[S]) -> HmmResult<Vec<f64>> {
        Ok(self.log_likelihood(sequences)?.into_iter().map(|ll| -ll).collect())
    }

    /// Conditional distribution of `dims_out` given `data_in` on `dims_in`.
    ///
    /// With `use_posterior` the state weights at step t are the normalized
    /// forward variables computed on the marginal over `dims_in`; otherwise
    /// they come from the static mixture rule (priors times input density).
    pub fn condition_sequence(
        &self,
        data_in: &DMatrix<f64>,
        dims_in: &[usize],
        dims_out: &[usize],
        use_posterior: bool,
    ) -> HmmResult<ConditionalSequence> {
        let weights = if use_posterior {
            if data_in.nrows() == 0 {
                return Err(HmmError::EmptySequence { index: 0 });
            }
            validate_dimension(dims_in.len(), data_in.ncols(), "conditioning input")?;
            self.compute_marginal_messages(data_in, dims_in)?.alpha
        } else {
            prior_weights(&self.bank, data_in, dims_in)?
        };
        condition_with_weights(&self.bank, data_in, dims_in, dims_out, &weights)
    }

    /// Train with EM; see [`ExpectationMaximization`].
    pub fn fit<S: SequenceData>(&mut self, sequences: &[S], config: &EmConfig) -> HmmResult<EmReport> {
        ExpectationMaximization::new(config).run(self, sequences)
    }

    /// Draw a state path and a `length×D` observation matrix.
    pub fn sample<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> HmmResult<(Vec<usize>, DMatrix<f64>)> {
        let s = self.num_states();
        let d = self.dim();
        let factors = self
            .bank
            .states()
            .iter()
            .enumerate()
            .map(|(i, st)| regularized_cholesky(&st.covariance, i).map(|c| c.l()))
            .collect::<HmmResult<Vec<_>>>()?;

        let initial = weighted_index(self.init_priors.as_slice(), "initial priors")?;
        let rows = (0..s)
            .map(|i| weighted_index(&self.transition.row(i).iter().cloned().collect::<Vec<_>>(), "transition"))
            .collect::<HmmResult<Vec<_>>>()?;

        let mut states: Vec<usize> = Vec::with_capacity(length);
        let mut observations = DMatrix::zeros(length, d);
        for t in 0..length {
            let state = match states.last() {
                None => initial.sample(rng),
                Some(&prev) => rows[prev].sample(rng),
            };
            let z = DVector::<f64>::from_fn(d, |_, _| StandardNormal.sample(rng));
            let x = &self.bank.states()[state].mean + &factors[state] * z;
            observations.set_row(t, &x.transpose());
            states.push(state);
        }
        Ok((states, observations))
    }
}

fn weighted_index(weights: &[f64], name: &str) -> HmmResult<WeightedIndex<f64>> {
    WeightedIndex::new(weights).map_err(|e| HmmError::InvalidParameter {
        parameter: name.to_string(),
        value: weights.iter().sum(),
        constraint: format!("samplable weights ({})", e),
    })
}

impl MixtureModel for GaussianHmm {
    fn bank(&self) -> &GaussianStateBank {
        &self.bank
    }

    /// Posterior-weighted conditioning.
    fn condition(
        &self,
        data_in: &DMatrix<f64>,
        dims_in: &[usize],
        dims_out: &[usize],
    ) -> HmmResult<ConditionalSequence> {
        self.condition_sequence(data_in, dims_in, dims_out, true)
    }
}
