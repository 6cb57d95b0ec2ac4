//! Static Gaussian mixtures and mixture conditioning.
//!
//! [`MixtureModel`] is the capability shared by the static mixture and the
//! HMM: parameter access, marginalization and conditioning. The two variants
//! differ only in how they weight the states when conditioning.

use crate::config::MixtureFitConfig;
use crate::errors::{validate_all_finite, validate_dimension, validate_dims_in_range, HmmError, HmmResult};
use crate::gaussian::{GaussianState, GaussianStateBank};
use crate::linear_algebra::{regularized_cholesky, sub_matrix, sub_vector, symmetrize};
use crate::math_utils::{constants::REALMIN, log_sum_exp};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Conditional distribution of the output dimensions at every time step.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConditionalSequence {
    /// Conditional means (T×|out|)
    pub means: DMatrix<f64>,
    /// Conditional covariances, one |out|×|out| matrix per time step
    pub covariances: Vec<DMatrix<f64>>,
    /// State weights used (S×T), columns sum to one
    pub weights: DMatrix<f64>,
}

/// Shared capability of Gaussian mixture variants.
pub trait MixtureModel {
    /// Per-state parameters.
    fn bank(&self) -> &GaussianStateBank;

    /// Conditional distribution of `dims_out` given `data_in` (T×|in|)
    /// observed on `dims_in`.
    fn condition(
        &self,
        data_in: &DMatrix<f64>,
        dims_in: &[usize],
        dims_out: &[usize],
    ) -> HmmResult<ConditionalSequence>;

    /// Number of states.
    fn num_states(&self) -> usize {
        self.bank().num_states()
    }

    /// Observation dimension.
    fn dim(&self) -> usize {
        self.bank().dim()
    }

    /// Mean of a state.
    fn mean(&self, state: usize) -> HmmResult<&DVector<f64>> {
        self.bank().mean(state)
    }

    /// Covariance of a state.
    fn covariance(&self, state: usize) -> HmmResult<&DMatrix<f64>> {
        self.bank().covariance(state)
    }

    /// Parameters restricted to a dimension subset.
    fn marginal(&self, dims: &[usize]) -> HmmResult<GaussianStateBank> {
        self.bank().marginal(dims)
    }
}

/// State weights `h[k, t] ∝ π_k N(x_t | μ_k, Σ_k)` on the input dimensions.
///
/// Without input dimensions every column equals the mixing priors.
pub fn prior_weights(
    bank: &GaussianStateBank,
    data_in: &DMatrix<f64>,
    dims_in: &[usize],
) -> HmmResult<DMatrix<f64>> {
    let num_states = bank.num_states();
    let t_len = data_in.nrows();
    if dims_in.is_empty() {
        return Ok(DMatrix::from_fn(num_states, t_len, |k, _| bank.priors()[k]));
    }

    validate_dimension(dims_in.len(), data_in.ncols(), "conditioning input")?;
    let densities = bank.marginal(dims_in)?.densities()?;
    let log_priors = bank.priors().map(|p| (p + REALMIN).ln());

    let mut weights = DMatrix::zeros(num_states, t_len);
    for (t, row) in data_in.row_iter().enumerate() {
        let x = row.transpose();
        let log_w: Vec<f64> = densities
            .iter()
            .enumerate()
            .map(|(k, d)| log_priors[k] + d.log_pdf(&x))
            .collect();
        let norm = log_sum_exp(&log_w);
        for (k, lw) in log_w.iter().enumerate() {
            weights[(k, t)] = (lw - norm).exp();
        }
    }
    Ok(weights)
}

/// Gaussian mixture regression with caller-supplied weights (S×T).
///
/// Each column of `weights` is renormalized before use.
pub fn condition_with_weights(
    bank: &GaussianStateBank,
    data_in: &DMatrix<f64>,
    dims_in: &[usize],
    dims_out: &[usize],
    weights: &DMatrix<f64>,
) -> HmmResult<ConditionalSequence> {
    let dim = bank.dim();
    let num_states = bank.num_states();
    let t_len = data_in.nrows();
    validate_dims_in_range(dims_in, dim)?;
    validate_dims_in_range(dims_out, dim)?;
    validate_dimension(dims_in.len(), data_in.ncols(), "conditioning input")?;
    validate_dimension(num_states, weights.nrows(), "conditioning weight rows")?;
    validate_dimension(t_len, weights.ncols(), "conditioning weight columns")?;

    let mut weights = weights.clone();
    for mut column in weights.column_iter_mut() {
        let norm = column.sum() + REALMIN;
        column /= norm;
    }

    let out = dims_out.len();
    let mut means = DMatrix::zeros(t_len, out);
    let mut covariances = Vec::with_capacity(t_len);

    // Per-state regression terms do not depend on t
    let gains = bank
        .states()
        .iter()
        .enumerate()
        .map(|(k, s)| StateRegression::new(s, dims_in, dims_out, k))
        .collect::<HmmResult<Vec<_>>>()?;

    for (t, row) in data_in.row_iter().enumerate() {
        let x = row.transpose();
        let mut mean = DVector::zeros(out);
        let mut second_moment = DMatrix::zeros(out, out);
        for (k, g) in gains.iter().enumerate() {
            let w = weights[(k, t)];
            let mu = g.mean_at(&x);
            second_moment += (&g.covariance + &mu * mu.transpose()) * w;
            mean += mu * w;
        }
        let covariance = second_moment - &mean * mean.transpose();
        means.set_row(t, &mean.transpose());
        covariances.push(covariance);
    }

    Ok(ConditionalSequence {
        means,
        covariances,
        weights,
    })
}

/// Regression terms of one state: `μ_o|i(x) = μ_o + K (x − μ_i)`.
struct StateRegression {
    mu_in: DVector<f64>,
    mu_out: DVector<f64>,
    gain: DMatrix<f64>,
    covariance: DMatrix<f64>,
}

impl StateRegression {
    fn new(state: &GaussianState, dims_in: &[usize], dims_out: &[usize], index: usize) -> HmmResult<Self> {
        if dims_in.is_empty() {
            return Ok(Self {
                mu_in: DVector::zeros(0),
                mu_out: sub_vector(&state.mean, dims_out),
                gain: DMatrix::zeros(dims_out.len(), 0),
                covariance: sub_matrix(&state.covariance, dims_out, dims_out),
            });
        }
        let chol = regularized_cholesky(
            &sub_matrix(&state.covariance, dims_in, dims_in),
            index,
        )?;
        let sigma_out_in = sub_matrix(&state.covariance, dims_out, dims_in);
        let gain = chol.solve(&sigma_out_in.transpose()).transpose();
        let covariance = sub_matrix(&state.covariance, dims_out, dims_out) - &gain * sigma_out_in.transpose();
        Ok(Self {
            mu_in: sub_vector(&state.mean, dims_in),
            mu_out: sub_vector(&state.mean, dims_out),
            gain,
            covariance: symmetrize(&covariance),
        })
    }

    fn mean_at(&self, x: &DVector<f64>) -> DVector<f64> {
        if self.mu_in.is_empty() {
            return self.mu_out.clone();
        }
        &self.mu_out + &self.gain * (x - &self.mu_in)
    }
}

/// Gaussian mixture without temporal structure.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianMixture {
    bank: GaussianStateBank,
}

impl GaussianMixture {
    /// Wrap existing parameters.
    pub fn new(bank: GaussianStateBank) -> Self {
        Self { bank }
    }

    /// Mutable access to the parameters.
    pub fn bank_mut(&mut self) -> &mut GaussianStateBank {
        &mut self.bank
    }

    /// Take the parameters.
    pub fn into_bank(self) -> GaussianStateBank {
        self.bank
    }

    /// Fit `num_states` components to the rows of `data` (N×D).
    ///
    /// Centroids are seeded with k-means++ from a ChaCha20 stream seeded by
    /// `config.seed`, refined by Lloyd iterations, then EM runs until the
    /// average log-likelihood changes by less than `config.tolerance`.
    pub fn fit(data: &DMatrix<f64>, num_states: usize, config: &MixtureFitConfig) -> HmmResult<Self> {
        let n = data.nrows();
        let dim = data.ncols();
        if num_states == 0 {
            return Err(HmmError::InvalidParameter {
                parameter: "num_states".to_string(),
                value: 0.0,
                constraint: "at least one state".to_string(),
            });
        }
        if n < num_states {
            return Err(HmmError::InsufficientData {
                required: num_states,
                actual: n,
            });
        }
        validate_all_finite(data.iter(), "pooled data")?;

        let points: Vec<DVector<f64>> = data.row_iter().map(|r| r.transpose()).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
        let centroids = kmeans(&points, initialize_centroids_plus_plus(&points, num_states, &mut rng));

        let reg = DMatrix::identity(dim, dim) * config.regularization;
        let pooled_cov = weighted_covariance(&points, &vec![1.0 / n as f64; n], &mean_of(&points)) + &reg;

        // Hard assignments give the starting covariances and priors
        let assignments: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();
        let mut states = Vec::with_capacity(num_states);
        let mut priors = DVector::zeros(num_states);
        for (k, centroid) in centroids.iter().enumerate() {
            let members: Vec<DVector<f64>> = points
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == k)
                .map(|(p, _)| p.clone())
                .collect();
            priors[k] = members.len() as f64 / n as f64;
            let covariance = if members.len() > 1 {
                let w = vec![1.0 / members.len() as f64; members.len()];
                weighted_covariance(&members, &w, centroid) + &reg
            } else {
                warn!("mixture component {} seeded with {} points, using pooled covariance", k, members.len());
                pooled_cov.clone()
            };
            states.push(GaussianState::new(centroid.clone(), covariance)?);
        }
        let priors = normalized_or_uniform(priors);

        let mut mixture = Self {
            bank: GaussianStateBank::with_priors(states, priors)?,
        };

        let mut previous = f64::NEG_INFINITY;
        for iteration in 0..config.max_iterations {
            let (resp, ll) = mixture.responsibilities_and_likelihood(data)?;
            mixture.maximize(&points, &resp, &reg)?;
            debug!("mixture EM iteration {}: average log-likelihood {:.6}", iteration, ll);
            if (ll - previous).abs() < config.tolerance {
                break;
            }
            previous = ll;
        }

        Ok(mixture)
    }

    /// Average log-likelihood per row of `data`.
    pub fn log_likelihood(&self, data: &DMatrix<f64>) -> HmmResult<f64> {
        Ok(self.responsibilities_and_likelihood(data)?.1)
    }

    /// Posterior state probabilities for every row of `data` (S×N).
    pub fn responsibilities(&self, data: &DMatrix<f64>) -> HmmResult<DMatrix<f64>> {
        Ok(self.responsibilities_and_likelihood(data)?.0)
    }

    fn responsibilities_and_likelihood(&self, data: &DMatrix<f64>) -> HmmResult<(DMatrix<f64>, f64)> {
        validate_dimension(self.bank.dim(), data.ncols(), "observation dimension")?;
        let dims: Vec<usize> = (0..self.bank.dim()).collect();
        let resp = prior_weights(&self.bank, data, &dims)?;

        let densities = self.bank.densities()?;
        let log_priors = self.bank.priors().map(|p| (p + REALMIN).ln());
        let total: f64 = data
            .row_iter()
            .map(|row| {
                let x = row.transpose();
                let terms: Vec<f64> = densities
                    .iter()
                    .enumerate()
                    .map(|(k, d)| log_priors[k] + d.log_pdf(&x))
                    .collect();
                log_sum_exp(&terms)
            })
            .sum();
        let n = data.nrows().max(1) as f64;
        Ok((resp, total / n))
    }

    fn maximize(&mut self, points: &[DVector<f64>], resp: &DMatrix<f64>, reg: &DMatrix<f64>) -> HmmResult<()> {
        let n = points.len() as f64;
        let mut priors = DVector::zeros(self.bank.num_states());
        for k in 0..self.bank.num_states() {
            let row = resp.row(k);
            let mass = row.sum();
            priors[k] = mass / n;
            if mass <= REALMIN {
                warn!("mixture component {} lost all responsibility, keeping previous parameters", k);
                continue;
            }
            let w: Vec<f64> = row.iter().map(|r| r / mass).collect();
            let mean = points
                .iter()
                .zip(&w)
                .fold(DVector::zeros(self.bank.dim()), |acc, (p, wi)| acc + p * *wi);
            let covariance = weighted_covariance(points, &w, &mean) + reg;
            self.bank.set_state(k, GaussianState::new(mean, covariance)?)?;
        }
        self.bank.set_priors(normalized_or_uniform(priors))
    }
}

impl MixtureModel for GaussianMixture {
    fn bank(&self) -> &GaussianStateBank {
        &self.bank
    }

    fn condition(
        &self,
        data_in: &DMatrix<f64>,
        dims_in: &[usize],
        dims_out: &[usize],
    ) -> HmmResult<ConditionalSequence> {
        let weights = prior_weights(&self.bank, data_in, dims_in)?;
        condition_with_weights(&self.bank, data_in, dims_in, dims_out, &weights)
    }
}

fn normalized_or_uniform(mut v: DVector<f64>) -> DVector<f64> {
    let sum = v.sum();
    if sum > 0.0 {
        v /= sum;
    } else {
        let n = v.len() as f64;
        v.fill(1.0 / n);
    }
    v
}

fn mean_of(points: &[DVector<f64>]) -> DVector<f64> {
    let n = points.len().max(1) as f64;
    points
        .iter()
        .fold(DVector::zeros(points.first().map_or(0, |p| p.len())), |acc, p| acc + p)
        / n
}

/// `Σ w_t (x_t − μ)(x_t − μ)ᵀ`
pub(crate) fn weighted_covariance(points: &[DVector<f64>], weights: &[f64], mean: &DVector<f64>) -> DMatrix<f64> {
    let d = mean.len();
    let mut cov = DMatrix::zeros(d, d);
    for (p, &w) in points.iter().zip(weights) {
        let diff = p - mean;
        cov += &diff * diff.transpose() * w;
    }
    cov
}

fn nearest(point: &DVector<f64>, centroids: &[DVector<f64>]) -> usize {
    let mut best = 0;
    let mut min_dist = f64::INFINITY;
    for (j, c) in centroids.iter().enumerate() {
        let dist = (point - c).norm_squared();
        if dist < min_dist {
            min_dist = dist;
            best = j;
        }
    }
    best
}

/// k-means++ seeding: first centroid uniform, the rest proportional to
/// squared distance from the nearest chosen centroid.
fn initialize_centroids_plus_plus(
    points: &[DVector<f64>],
    num_states: usize,
    rng: &mut ChaCha20Rng,
) -> Vec<DVector<f64>> {
    let mut centroids = Vec::with_capacity(num_states);
    centroids.push(points[rng.gen_range(0..points.len())].clone());

    for _ in 1..num_states {
        let distances: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| (p - c).norm_squared())
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();

        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            distances
                .iter()
                .position(|&d| {
                    cumulative += d;
                    cumulative >= target && d > 0.0
                })
                .unwrap_or(points.len() - 1)
        } else {
            rng.gen_range(0..points.len())
        };
        centroids.push(points[chosen].clone());
    }
    centroids
}

fn kmeans(points: &[DVector<f64>], mut centroids: Vec<DVector<f64>>) -> Vec<DVector<f64>> {
    const MAX_ITERATIONS: usize = 100;
    const TOLERANCE: f64 = 1e-6;

    let k = centroids.len();
    let dim = points[0].len();
    for _ in 0..MAX_ITERATIONS {
        let mut sums = vec![DVector::zeros(dim); k];
        let mut counts = vec![0usize; k];
        for p in points {
            let j = nearest(p, &centroids);
            sums[j] += p;
            counts[j] += 1;
        }

        let mut max_change = 0.0f64;
        for j in 0..k {
            if counts[j] > 0 {
                let updated = &sums[j] / counts[j] as f64;
                max_change = max_change.max((&updated - &centroids[j]).norm());
                centroids[j] = updated;
            }
        }
        if max_change < TOLERANCE {
            break;
        }
    }
    centroids
}
