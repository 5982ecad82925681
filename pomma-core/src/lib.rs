//! Partially Observable Markov Models with Adaptation (POMMA).
//!
//! This crate learns a Markov chain over hidden states from a corpus of
//! symbol sequences, where each hidden state always emits the same symbol,
//! and samples new sequences from it:
//! - Symbol mapping and repeat statistics
//! - Topology construction (start, end and a stack of states per symbol)
//! - Expectation-Maximization fitting with multiple random starts
//! - Model selection (BIC or bootstrap validation)
//! - Pruning of rare transitions and rarely visited states
//! - Seeded, reproducible sequence generation
//!
//! Most callers only need [`pomma::PommaFitter`] and [`config::FitConfig`].
//! The building blocks are public so each stage can be run and inspected on
//! its own.

/// Dense alphabet and repeat statistics of a corpus.
pub mod alphabet;

/// Fit parameters, their defaults and validation.
pub mod config;

/// Crate-wide error type.
pub mod error;

/// Forward-backward expectation, maximization and the multi-start E-M driver.
pub mod fitter;

/// I/O utilities (corpus loading, path helpers).
pub mod io;

/// Dense row-stochastic transition matrices.
pub mod matrix;

/// Candidate and final models, and sequence generation.
pub mod model;

/// End-to-end fitting facade.
pub mod pomma;

/// Removal of rare transitions and rarely visited states.
pub mod pruner;

/// Choice of the number of extra states.
pub mod selector;

/// Hidden state layout of a model.
pub mod topology;

/// Statistics and the bootstrap comparison of generated sequences.
pub mod validation;

pub use config::{FitConfig, SelectionCriterion};
pub use error::{PommaError, Result};
pub use pomma::{FittedPomma, PommaFitter};
