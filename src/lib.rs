//! # Gaussian Hidden Markov Models
//!
//! Hidden Markov models with multivariate Gaussian emissions for sequence
//! modelling, decoding and conditional regression.
//!
//! The crate covers the full inference and learning loop: per-state emission
//! likelihoods, scaled forward-backward smoothing, Viterbi decoding, Baum-Welch
//! training over many sequences of different length, and Gaussian mixture
//! regression that conditions some observation dimensions on others, weighted
//! either by the static mixture priors or by the temporal posterior.
//!
//! ## Key Features
//!
//! - **Numerically stable inference**: scaled forward-backward and log-domain
//!   Viterbi stay finite on long sequences
//! - **Structured covariances**: full, diagonal or spherical covariances, block
//!   dependency structures and multiplicative masks
//! - **Explicit initialization**: priors and transitions are set at construction
//!   or seeded from a pooled Gaussian mixture fit; defaults are reported as
//!   [`Diagnostic`] values
//! - **Conditioning**: Gaussian mixture regression shared by the static
//!   [`GaussianMixture`] and the temporal [`GaussianHmm`] through [`MixtureModel`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gaussian_hmm::{EmConfig, GaussianHmm, MixtureFitConfig};
//! use nalgebra::DMatrix;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sequences = vec![
//!         DMatrix::from_row_slice(5, 1, &[0.1, 0.2, 4.8, 5.1, 4.9]),
//!         DMatrix::from_row_slice(4, 1, &[5.2, 4.7, 0.3, -0.1]),
//!     ];
//!
//!     let mut hmm = GaussianHmm::init_from_pooled(&sequences, 2, &MixtureFitConfig::default())?;
//!     let report = hmm.fit(&sequences, &EmConfig::default())?;
//!     println!("converged: {} after {} iterations", report.converged, report.iterations);
//!
//!     let path = hmm.viterbi_path(&sequences[0])?;
//!     let scores = hmm.score(&sequences)?;
//!     println!("{:?} {:?}", path, scores);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! [`GaussianStateBank`] holds the per-state parameters. [`EmissionEvaluator`]
//! turns a sequence into an S×T likelihood matrix, which feeds
//! [`forward_backward`] and [`viterbi`]. [`GaussianHmm`] ties the pieces to a
//! prior and transition matrix, and [`ExpectationMaximization`] re-estimates
//! all of them from data.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod linear_algebra;
pub mod math_utils;
pub mod observations;

// Models and inference
pub mod emission;
pub mod forward_backward;
pub mod gaussian;
pub mod hmm;
pub mod mixture;
pub mod training;
pub mod viterbi;

// Re-exports for convenience - main public API
pub use config::{CovarianceMode, EmConfig, MixtureFitConfig, Regularization};
pub use errors::{Diagnostic, HmmError, HmmResult, ModelParameter};
pub use observations::{sequence_from_rows, sequence_from_scalars, Demonstration, SequenceData};

// Model exports
pub use emission::{DependencyStructure, EmissionEvaluator, EmissionLikelihoods};
pub use gaussian::{GaussianState, GaussianStateBank};
pub use hmm::GaussianHmm;
pub use mixture::{ConditionalSequence, GaussianMixture, MixtureModel};

// Inference exports
pub use forward_backward::{forward_backward, Messages};
pub use training::{EmReport, ExpectationMaximization};
pub use viterbi::{path_log_probability, viterbi, ViterbiPath};
