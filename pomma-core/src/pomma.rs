use std::fmt::Debug;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::alphabet::{map_symbols, Alphabet};
use crate::config::FitConfig;
use crate::error::{PommaError, Result};
use crate::model::candidate::CandidateModel;
use crate::model::final_model::FinalModel;
use crate::model::generator::SequenceGenerator;
use crate::pruner::Pruner;
use crate::selector::{CandidateScore, ModelSelector};

/// Entry point of the library: learns a POMMA model from a corpus.
///
/// # Responsibilities
/// - Map the corpus to a dense alphabet
/// - Fit and select a candidate topology
/// - Prune the selected candidate into a final model
///
/// # Example
/// ```no_run
/// use pomma_core::config::FitConfig;
/// use pomma_core::pomma::PommaFitter;
///
/// let corpus = vec![vec!['a', 'a', 'b'], vec!['a', 'b']];
/// let fitted = PommaFitter::new(FitConfig::default()).fit(&corpus)?;
/// let samples = fitted.generate(10, 42)?;
/// # Ok::<(), pomma_core::error::PommaError>(())
/// ```
#[derive(Clone, Debug)]
pub struct PommaFitter {
	config: FitConfig,
	cancel: Option<Arc<AtomicBool>>,
}

impl PommaFitter {
	pub fn new(config: FitConfig) -> Self {
		Self { config, cancel: None }
	}

	/// Raising `cancel` aborts the fit at the next E-M iteration with
	/// `PommaError::Cancelled`.
	#[must_use]
	pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
		self.cancel = Some(cancel);
		self
	}

	pub fn config(&self) -> &FitConfig {
		&self.config
	}

	/// Fits a model to `sequences`.
	///
	/// # Errors
	/// - `PommaError::InvalidConfig` if the configuration is out of range
	/// - `PommaError::InputShape` if the corpus is empty
	/// - `PommaError::NoValidModel` if no topology explains the corpus
	/// - `PommaError::Cancelled` if the cancellation flag was raised
	pub fn fit<S: Clone + Ord + Debug>(&self, sequences: &[Vec<S>]) -> Result<FittedPomma<S>> {
		self.config.validate()?;
		let symbols = map_symbols(sequences)?;
		info!(
			"Fitting {} sequences over {} symbols ({} repeating)",
			symbols.mapped.len(),
			symbols.num_symbols(),
			symbols.repeating.len()
		);

		let mut selector = ModelSelector::new(&self.config);
		if let Some(flag) = self.cancel.as_deref() {
			selector = selector.with_cancel(flag);
		}
		let selection = selector.select(&symbols)?;
		let model = Pruner::from_config(&self.config).prune(&selection.best)?;
		info!(
			"Final model has {} states (from {})",
			model.len(),
			selection.best.topology().len()
		);

		Ok(FittedPomma {
			alphabet: symbols.alphabet,
			max_repeats: symbols.max_repeats,
			model,
			candidate: selection.best,
			scores: selection.scores,
			config: self.config.clone(),
		})
	}
}

/// A fitted model together with everything needed to interpret it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FittedPomma<S> {
	alphabet: Alphabet<S>,
	max_repeats: Vec<usize>,
	model: FinalModel,
	candidate: CandidateModel,
	scores: Vec<CandidateScore>,
	config: FitConfig,
}

impl<S: Clone + Ord> FittedPomma<S> {
	pub fn alphabet(&self) -> &Alphabet<S> {
		&self.alphabet
	}

	/// Longest run of each mapped symbol in the corpus.
	pub fn max_repeats(&self) -> &[usize] {
		&self.max_repeats
	}

	/// The pruned model.
	pub fn model(&self) -> &FinalModel {
		&self.model
	}

	/// The selected model before pruning.
	pub fn candidate(&self) -> &CandidateModel {
		&self.candidate
	}

	/// One score per topology tried.
	pub fn scores(&self) -> &[CandidateScore] {
		&self.scores
	}

	pub fn config(&self) -> &FitConfig {
		&self.config
	}

	pub fn extra_states(&self) -> usize {
		self.model.extra_states()
	}

	/// Lazy generator of mapped sequences. Use `alphabet().unmap` on its items.
	pub fn generator(&self, count: usize, seed: u64) -> SequenceGenerator {
		SequenceGenerator::new(&self.model, count, seed)
	}

	/// Generates `count` sequences of original symbols.
	///
	/// # Errors
	/// Returns `PommaError::MalformedModel` if a walk does not terminate.
	pub fn generate(&self, count: usize, seed: u64) -> Result<Vec<Vec<S>>> {
		self.generator(count, seed)
			.map(|sequence| {
				let sequence = sequence?;
				self.alphabet.unmap(&sequence).ok_or_else(|| {
					PommaError::MalformedModel(format!("generated symbol outside the alphabet in {:?}", sequence))
				})
			})
			.collect()
	}
}

impl<S: Serialize + DeserializeOwned> FittedPomma<S> {
	/// Writes the model to `path` in the `postcard` binary format.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let bytes = postcard::to_stdvec(self)?;
		fs::write(path, bytes)?;
		Ok(())
	}

	/// Reads a model written by [`FittedPomma::save`].
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let bytes = fs::read(path)?;
		Ok(postcard::from_bytes(&bytes)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::Ordering;

	fn config() -> FitConfig {
		FitConfig::builder().max_extra_states(2).num_random_starts(2).seed(11).build().unwrap()
	}

	#[test]
	fn fit_keeps_alphabet_and_repeats() {
		let corpus = vec![vec!['x', 'x', 'y'], vec!['x', 'y'], vec!['x', 'x', 'x', 'y']];
		let fitted = PommaFitter::new(config()).fit(&corpus).unwrap();
		assert_eq!(fitted.alphabet().symbols(), &['x', 'y']);
		assert_eq!(fitted.max_repeats(), &[3, 1]);
		assert_eq!(fitted.scores().len(), 2);
		assert!(fitted.model().is_well_formed(1e-9));
		for sequence in fitted.generate(50, 3).unwrap() {
			assert_eq!(sequence.last(), Some(&'y'));
			assert!(sequence[..sequence.len() - 1].iter().all(|&c| c == 'x'));
		}
	}

	#[test]
	fn empty_corpus_is_rejected() {
		let corpus: Vec<Vec<char>> = Vec::new();
		assert!(matches!(PommaFitter::new(config()).fit(&corpus), Err(PommaError::InputShape(_))));
	}

	#[test]
	fn invalid_config_is_rejected_before_fitting() {
		let mut bad = config();
		bad.num_random_starts = 0;
		let corpus = vec![vec![1, 2]];
		assert!(matches!(PommaFitter::new(bad).fit(&corpus), Err(PommaError::InvalidConfig(_))));
	}

	#[test]
	fn raised_flag_cancels_the_fit() {
		let flag = Arc::new(AtomicBool::new(false));
		flag.store(true, Ordering::Relaxed);
		let corpus = vec![vec![1, 2], vec![1, 1, 2]];
		let result = PommaFitter::new(config()).with_cancel(flag).fit(&corpus);
		assert!(matches!(result, Err(PommaError::Cancelled)));
	}
}
