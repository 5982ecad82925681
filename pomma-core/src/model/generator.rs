use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{PommaError, Result};
use crate::model::final_model::FinalModel;
use crate::model::state::State;
use crate::topology::{END, START};

/// A generated sequence longer than this is reported as a malformed model.
pub const MAX_GENERATED_LENGTH: usize = 1_000_000;

/// Lazy, finite generator of sequences sampled from a final model.
///
/// # Responsibilities
/// - Walk the chain from the start state until the end state is reached
/// - Emit the symbol of every state entered on the way
///
/// Trial `i` draws from its own generator seeded from `(seed, i)`, so trials
/// are independent of each other and of the order they are run in.
/// `trial` can be called from several threads at once.
#[derive(Clone, Debug)]
pub struct SequenceGenerator {
	states: Vec<State>,
	seed: u64,
	count: usize,
	position: usize,
}

impl SequenceGenerator {
	/// Prepares `count` trials over `model`.
	pub fn new(model: &FinalModel, count: usize, seed: u64) -> Self {
		let states = model
			.states()
			.iter()
			.enumerate()
			.map(|(index, kind)| State::from_row(*kind, model.transitions(), index))
			.collect();
		Self { states, seed, count, position: 0 }
	}

	/// Rewinds the iterator: the same sequences are produced again.
	pub fn restart(&mut self) {
		self.position = 0;
	}

	/// Runs trial `index`, as a sequence of mapped symbols.
	///
	/// # Errors
	/// Returns `PommaError::MalformedModel` if the walk reaches a state with
	/// no outgoing transition, re-enters the start state, or does not reach
	/// the end state within `MAX_GENERATED_LENGTH` symbols.
	pub fn trial(&self, index: usize) -> Result<Vec<usize>> {
		let mut rng = StdRng::seed_from_u64(trial_seed(self.seed, index));
		let mut sequence = Vec::new();
		let mut current = START;

		loop {
			let next = self.states[current].predict(&mut rng).ok_or_else(|| {
				PommaError::MalformedModel(format!("state {} has no outgoing transition", current))
			})?;
			if next == END {
				break;
			}
			match self.states[next].kind().symbol() {
				Some(symbol) => sequence.push(symbol),
				None => {
					return Err(PommaError::MalformedModel(format!("state {} moves back to the start state", current)));
				}
			}
			if sequence.len() > MAX_GENERATED_LENGTH {
				return Err(PommaError::MalformedModel(format!(
					"trial {} did not reach the end state within {} symbols",
					index, MAX_GENERATED_LENGTH
				)));
			}
			current = next;
		}

		Ok(sequence)
	}
}

impl Iterator for SequenceGenerator {
	type Item = Result<Vec<usize>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.position >= self.count {
			return None;
		}
		let sequence = self.trial(self.position);
		self.position += 1;
		Some(sequence)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let remaining = self.count - self.position;
		(remaining, Some(remaining))
	}
}

impl ExactSizeIterator for SequenceGenerator {}

fn trial_seed(seed: u64, index: usize) -> u64 {
	seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Generates `count` sequences of mapped symbols from `model`.
pub fn generate(model: &FinalModel, count: usize, seed: u64) -> Result<Vec<Vec<usize>>> {
	SequenceGenerator::new(model, count, seed).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::matrix::TransitionMatrix;
	use crate::topology::StateKind;

	/// start -> a, a -> a (0.5) | b (0.5), b -> end
	fn model() -> FinalModel {
		let states = vec![
			StateKind::Start,
			StateKind::End,
			StateKind::Symbol { symbol: 0, stage: 0 },
			StateKind::Symbol { symbol: 1, stage: 0 },
		];
		let mut transitions = TransitionMatrix::zeros(4);
		transitions.set(START, 2, 1.0);
		transitions.set(2, 2, 0.5);
		transitions.set(2, 3, 0.5);
		transitions.set(3, END, 1.0);
		FinalModel {
			states,
			transitions,
			occupancy: vec![0.0, 0.0, 2.0 / 3.0, 1.0 / 3.0],
			extra_states: 0,
			start_symbol: 1000,
			end_symbol: 1001,
		}
	}

	#[test]
	fn zero_sequences_is_empty_not_an_error() {
		assert!(generate(&model(), 0, 1).unwrap().is_empty());
	}

	#[test]
	fn sequences_follow_the_chain() {
		let sequences = generate(&model(), 500, 9).unwrap();
		assert_eq!(sequences.len(), 500);
		for sequence in &sequences {
			let (last, body) = sequence.split_last().unwrap();
			assert_eq!(*last, 1);
			assert!(!body.is_empty());
			assert!(body.iter().all(|&s| s == 0));
		}
		// Geometric number of repeats, mean 2
		let mean = sequences.iter().map(|s| s.len() - 1).sum::<usize>() as f64 / 500.0;
		assert!((mean - 2.0).abs() < 0.3, "mean run was {}", mean);
	}

	#[test]
	fn generation_is_reproducible_and_restartable() {
		let mut generator = SequenceGenerator::new(&model(), 20, 4);
		let first: Vec<Vec<usize>> = generator.by_ref().map(|s| s.unwrap()).collect();
		assert!(generator.next().is_none());
		generator.restart();
		let second: Vec<Vec<usize>> = generator.map(|s| s.unwrap()).collect();
		assert_eq!(first, second);
		assert_eq!(first, generate(&model(), 20, 4).unwrap());
	}

	#[test]
	fn trials_are_order_independent() {
		let generator = SequenceGenerator::new(&model(), 10, 4);
		let forward: Vec<Vec<usize>> = (0..10).map(|i| generator.trial(i).unwrap()).collect();
		let backward: Vec<Vec<usize>> = (0..10).rev().map(|i| generator.trial(i).unwrap()).collect();
		assert_eq!(forward, backward.into_iter().rev().collect::<Vec<_>>());
	}

	#[test]
	fn state_without_exit_is_malformed() {
		let mut broken = model();
		broken.transitions.set(3, END, 0.0);
		let result = generate(&broken, 3, 1);
		assert!(matches!(result, Err(PommaError::MalformedModel(_))));
	}
}
