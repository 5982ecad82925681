//! Fitted models and sequence generation.
//!
//! - Fitted but unpruned models (`CandidateModel`)
//! - Pruned models returned to the caller (`FinalModel`)
//! - Sampling of synthetic sequences (`SequenceGenerator`)

/// Model produced by one E-M run, with its convergence tag.
pub mod candidate;

/// Pruned model, with compacted states.
pub mod final_model;

/// Lazy, seeded generation of sequences from a final model.
pub mod generator;

/// Cumulative-distribution view of a state, used for sampling.
/// This module is not exposed publicly.
mod state;
