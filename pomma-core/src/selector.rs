use std::sync::atomic::AtomicBool;

use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::alphabet::SymbolMap;
use crate::config::{FitConfig, SelectionCriterion};
use crate::error::{PommaError, Result};
use crate::fitter::EmFitter;
use crate::model::candidate::CandidateModel;
use crate::model::generator::generate;
use crate::pruner::Pruner;
use crate::topology::Topology;
use crate::validation::{bootstrap_compare, Statistic};

/// Summary of the best fit found for one number of extra states.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CandidateScore {
	pub extra_states: usize,
	pub log_likelihood: f64,
	/// `LL - k/2 * ln(N)`, higher is better.
	pub bic: f64,
	pub free_parameters: usize,
	pub converged: bool,
	/// Bootstrap verdict, only computed with `SelectionCriterion::Bootstrap`.
	pub accepted: Option<bool>,
}

/// Output of [`ModelSelector::select`].
#[derive(Clone, Debug)]
pub struct Selection {
	/// The candidate handed to the pruner.
	pub best: CandidateModel,
	/// One entry per topology tried, in order.
	pub scores: Vec<CandidateScore>,
}

/// Tries topologies with 1 to `max_extra_states` extra states and keeps the best.
pub struct ModelSelector<'a> {
	config: &'a FitConfig,
	cancel: Option<&'a AtomicBool>,
}

impl<'a> ModelSelector<'a> {
	pub fn new(config: &'a FitConfig) -> Self {
		Self { config, cancel: None }
	}

	#[must_use]
	pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
		self.cancel = Some(cancel);
		self
	}

	/// Fits every topology and selects one candidate.
	///
	/// With `SelectionCriterion::Bic` the candidate with the highest BIC wins,
	/// ties going to fewer extra states. With `SelectionCriterion::Bootstrap`
	/// the search stops at the first candidate accepted by the bootstrap test,
	/// and falls back to the BIC choice if none is.
	///
	/// # Errors
	/// Returns `PommaError::NoValidModel` if the corpus has fewer than two
	/// distinct symbols or if no candidate explains the corpus.
	pub fn select<S: Clone + Ord>(&self, symbols: &SymbolMap<S>) -> Result<Selection> {
		let num_symbols = symbols.num_symbols();
		if num_symbols < 2 {
			return Err(PommaError::NoValidModel(format!(
				"the corpus needs at least two distinct symbols, found {}",
				num_symbols
			)));
		}

		let mut fitter = EmFitter::new(self.config);
		if let Some(flag) = self.cancel {
			fitter = fitter.with_cancel(flag);
		}

		let mut scores = Vec::new();
		let mut best: Option<(f64, CandidateModel)> = None;
		for extra_states in 1..=self.config.max_extra_states {
			info!("Trying model with {} extra states", extra_states);
			let topology = Topology::build(
				&symbols.max_repeats,
				num_symbols,
				extra_states,
				self.config.start_symbol,
				self.config.end_symbol,
			)?;
			let candidate = fitter.fit(&topology, &symbols.mapped)?;
			if !candidate.log_likelihood().is_finite() {
				warn!("Model with {} extra states cannot explain the corpus", extra_states);
				continue;
			}

			let bic = candidate.bic_score();
			let accepted = match self.config.criterion {
				SelectionCriterion::Bic => None,
				SelectionCriterion::Bootstrap => Some(self.accepts(&candidate, symbols)?),
			};
			info!(
				"{} extra states: log-likelihood {:.4}, BIC {:.4}, converged {}",
				extra_states,
				candidate.log_likelihood(),
				bic,
				candidate.is_converged()
			);
			scores.push(CandidateScore {
				extra_states,
				log_likelihood: candidate.log_likelihood(),
				bic,
				free_parameters: candidate.free_parameters(),
				converged: candidate.is_converged(),
				accepted,
			});

			if accepted == Some(true) {
				info!("Selected {} extra states (bootstrap accepted)", extra_states);
				return Ok(Selection { best: candidate, scores });
			}
			if best.as_ref().is_none_or(|(score, _)| bic > *score) {
				best = Some((bic, candidate));
			}
		}

		let (_, best) = best.ok_or_else(|| {
			PommaError::NoValidModel(format!(
				"none of the topologies with 1 to {} extra states explains the corpus",
				self.config.max_extra_states
			))
		})?;
		if self.config.criterion == SelectionCriterion::Bootstrap {
			warn!("No candidate passed the bootstrap test, falling back to the best BIC");
		}
		info!("Selected {} extra states", best.extra_states());
		Ok(Selection { best, scores })
	}

	/// Prunes the candidate, generates `num_seq` sequences and compares their
	/// step probabilities with the corpus.
	///
	/// A corpus of fewer than two sequences cannot be resampled, so it never
	/// accepts a candidate.
	fn accepts<S: Clone + Ord>(&self, candidate: &CandidateModel, symbols: &SymbolMap<S>) -> Result<bool> {
		if symbols.mapped.len() < 2 {
			debug!(
				"Candidate with {} extra states not bootstrapped: {} sequence(s) in the corpus",
				candidate.extra_states(),
				symbols.mapped.len()
			);
			return Ok(false);
		}

		let model = match Pruner::from_config(self.config).prune(candidate) {
			Ok(model) => model,
			Err(PommaError::NoValidModel(reason)) => {
				debug!("Candidate with {} extra states rejected: {}", candidate.extra_states(), reason);
				return Ok(false);
			}
			Err(e) => return Err(e),
		};

		let seed = self.config.seed.wrapping_add(candidate.extra_states() as u64);
		let generated = generate(&model, self.config.num_seq, seed)?;
		let mut rng = StdRng::seed_from_u64(seed);
		let outcome = bootstrap_compare(
			&symbols.mapped,
			&generated,
			symbols.num_symbols(),
			Statistic::StepProbabilities { m_compare: self.config.m_compare },
			self.config,
			&mut rng,
		)?;
		debug!(
			"Bootstrap with {} extra states: distance {:.4}, bound {:.4}",
			candidate.extra_states(),
			outcome.distance,
			outcome.bound
		);
		Ok(outcome.accepted)
	}
}
