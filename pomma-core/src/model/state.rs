use rand::Rng;

use crate::matrix::TransitionMatrix;
use crate::topology::StateKind;

/// Sampling view of one hidden state of a final model.
///
/// Conceptually, this is a node in the Markov chain whose outgoing edges are
/// kept as a cumulative distribution, so a single uniform draw selects the
/// next state.
///
/// ## Invariants
/// - Only transitions with a strictly positive probability are kept
/// - `cumulative` is non-decreasing and ends close to 1
#[derive(Clone, Debug)]
pub(crate) struct State {
	kind: StateKind,
	/// Reachable states, in matrix order.
	targets: Vec<usize>,
	/// Running sum of the probabilities of `targets`.
	cumulative: Vec<f64>,
}

impl State {
	/// Builds the sampling view of row `index` of `transitions`.
	pub fn from_row(kind: StateKind, transitions: &TransitionMatrix, index: usize) -> Self {
		let mut targets = Vec::new();
		let mut cumulative = Vec::new();
		let mut total = 0.0;
		for (to, &p) in transitions.row(index).iter().enumerate() {
			if p > 0.0 {
				total += p;
				targets.push(to);
				cumulative.push(total);
			}
		}
		Self { kind, targets, cumulative }
	}

	pub fn kind(&self) -> StateKind {
		self.kind
	}

	/// Picks the next state: the first whose cumulative probability exceeds
	/// one uniform draw.
	///
	/// Returns `None` if the state has no outgoing transition.
	pub fn predict<R: Rng>(&self, rng: &mut R) -> Option<usize> {
		if self.targets.is_empty() {
			return None;
		}

		let r: f64 = rng.random();
		for (target, &bound) in self.targets.iter().zip(&self.cumulative) {
			if r < bound {
				return Some(*target);
			}
		}

		// Fallback: the row sums to slightly less than 1 after rounding
		self.targets.last().copied()
	}
}
