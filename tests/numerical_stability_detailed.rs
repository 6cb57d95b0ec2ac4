//! Property checks against brute-force enumeration and long-sequence stress
//!
//! Small models (S ≤ 3, T ≤ 5) are checked exhaustively over all state
//! paths; larger ones are checked for finiteness and normalization.

use assert_approx_eq::assert_approx_eq;
use gaussian_hmm::{
    path_log_probability, DependencyStructure, EmConfig, GaussianHmm, GaussianState,
    GaussianStateBank,
};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

fn all_paths(num_states: usize, len: usize) -> Vec<Vec<usize>> {
    (0..num_states.pow(len as u32))
        .map(|mut code| {
            (0..len)
                .map(|_| {
                    let s = code % num_states;
                    code /= num_states;
                    s
                })
                .collect()
        })
        .collect()
}

fn random_stochastic(rng: &mut ChaCha20Rng, rows: usize, cols: usize) -> DMatrix<f64> {
    let mut m = DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(0.05..1.0));
    for mut row in m.row_iter_mut() {
        let s = row.sum();
        row /= s;
    }
    m
}

fn random_model(seed: u64, num_states: usize, dim: usize) -> GaussianHmm {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let states = (0..num_states)
        .map(|_| {
            let mean = DVector::from_fn(dim, |_, _| rng.gen_range(-3.0..3.0));
            let a = DMatrix::from_fn(dim, dim, |_, _| rng.gen_range(-1.0..1.0));
            let cov = &a * a.transpose() + DMatrix::identity(dim, dim) * 0.5;
            GaussianState::new(mean, cov).unwrap()
        })
        .collect();
    let priors = random_stochastic(&mut rng, 1, num_states).row(0).transpose();
    let transition = random_stochastic(&mut rng, num_states, num_states);
    GaussianHmm::new(GaussianStateBank::new(states).unwrap(), priors, transition).unwrap()
}

#[test]
fn test_log_likelihood_equals_brute_force_sum() {
    for seed in 0..5 {
        let hmm = random_model(seed, 3, 2);
        let mut rng = ChaCha20Rng::seed_from_u64(100 + seed);
        let (_, seq) = hmm.sample(5, &mut rng).unwrap();

        let log_b = hmm.emission_likelihoods(&seq, None).unwrap().log;
        let total: f64 = all_paths(3, 5)
            .iter()
            .map(|p| {
                path_log_probability(&log_b, hmm.init_priors(), hmm.transition(), p)
                    .unwrap()
                    .exp()
            })
            .sum();

        let ll = hmm.log_likelihood(&[seq.clone()]).unwrap()[0];
        assert_approx_eq!(ll, total.ln(), 1e-9);
        assert_approx_eq!(hmm.score(&[seq]).unwrap()[0], -total.ln(), 1e-9);
    }
}

#[test]
fn test_viterbi_dominates_enumerated_paths() {
    for seed in 0..5 {
        let hmm = random_model(seed + 10, 3, 1);
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let (_, seq) = hmm.sample(5, &mut rng).unwrap();

        let decoded = hmm.decode(&seq).unwrap();
        let log_b = hmm.emission_likelihoods(&seq, None).unwrap().log;
        let best = all_paths(3, 5)
            .iter()
            .map(|p| path_log_probability(&log_b, hmm.init_priors(), hmm.transition(), p).unwrap())
            .fold(f64::NEG_INFINITY, f64::max);
        assert_approx_eq!(decoded.log_probability, best, 1e-9);
    }
}

#[test]
fn test_block_structure_equals_full_when_covariance_is_block_diagonal() {
    let cov = DMatrix::from_row_slice(3, 3, &[1.0, 0.3, 0.0, 0.3, 1.5, 0.0, 0.0, 0.0, 0.7]);
    let bank = GaussianStateBank::new(vec![
        GaussianState::new(DVector::from_vec(vec![0.0, 0.0, 0.0]), cov.clone()).unwrap(),
        GaussianState::new(DVector::from_vec(vec![2.0, -1.0, 1.0]), cov).unwrap(),
    ])
    .unwrap();
    let (hmm, _) = GaussianHmm::with_uniform_parameters(bank);
    let structure = DependencyStructure::new(vec![vec![0, 1], vec![2]], 3).unwrap();

    let seq = DMatrix::from_row_slice(3, 3, &[0.1, 0.2, 0.3, 1.9, -0.8, 1.2, 0.0, 0.1, -0.2]);
    let full = hmm.compute_messages(&seq, None).unwrap();
    let blocked = hmm.compute_messages(&seq, Some(&structure)).unwrap();
    assert_approx_eq!(full.log_likelihood(), blocked.log_likelihood(), 1e-10);
}

#[test]
fn test_long_sequences_remain_finite() {
    let hmm = random_model(77, 3, 2);
    let mut rng = ChaCha20Rng::seed_from_u64(1);
    let (_, seq) = hmm.sample(5000, &mut rng).unwrap();

    let messages = hmm.compute_messages(&seq, None).unwrap();
    assert!(messages.log_likelihood().is_finite());
    for column in messages.gamma.column_iter() {
        assert_approx_eq!(column.sum(), 1.0, 1e-6);
    }
    let path = hmm.viterbi_path(&seq).unwrap();
    assert_eq!(path.len(), 5000);
}

#[test]
fn test_outlier_observation_does_not_poison_messages() {
    let hmm = random_model(3, 2, 1);
    let seq = DMatrix::from_row_slice(4, 1, &[0.0, 1e4, 0.5, -0.5]);
    let messages = hmm.compute_messages(&seq, None).unwrap();
    assert!(messages.gamma.iter().all(|v| v.is_finite()));
    assert_eq!(hmm.viterbi_path(&seq).unwrap().len(), 4);
}

#[test]
fn test_em_monotone_on_random_models() {
    for seed in 0..3 {
        let source = random_model(seed + 40, 3, 2);
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let data: Vec<DMatrix<f64>> = (0..4).map(|_| source.sample(70, &mut rng).unwrap().1).collect();

        let mut hmm = random_model(seed + 90, 3, 2);
        let report = hmm.fit(&data, &EmConfig::default().with_regularization(gaussian_hmm::Regularization::Scalar(0.0))).unwrap();
        for pair in report.log_likelihoods.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-7, "{:?}", report.log_likelihoods);
        }
        assert_approx_eq!(hmm.init_priors().sum(), 1.0, 1e-9);
        for row in hmm.transition().row_iter() {
            assert_approx_eq!(row.sum(), 1.0, 1e-9);
        }
    }
}
