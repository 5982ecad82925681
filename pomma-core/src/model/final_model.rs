use serde::{Deserialize, Serialize};

use crate::matrix::TransitionMatrix;
use crate::topology::{state_labels, StateKind, END, START};

/// A pruned POMMA model, ready for generation.
///
/// States are compacted after pruning: the start state stays at index 0 and
/// the end state at index 1, the surviving symbol states follow in their
/// original order.
///
/// # Invariants
/// - every non-terminal row of `transitions` sums to 1
/// - every state is reachable from start and can reach end
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FinalModel {
	pub(crate) states: Vec<StateKind>,
	pub(crate) transitions: TransitionMatrix,
	/// Expected fraction of symbol positions spent in each state.
	pub(crate) occupancy: Vec<f64>,
	pub(crate) extra_states: usize,
	pub(crate) start_symbol: u32,
	pub(crate) end_symbol: u32,
}

impl FinalModel {
	pub fn states(&self) -> &[StateKind] {
		&self.states
	}

	pub fn transitions(&self) -> &TransitionMatrix {
		&self.transitions
	}

	pub fn occupancy(&self) -> &[f64] {
		&self.occupancy
	}

	/// Number of extra states per symbol of the topology this model was fitted on.
	pub fn extra_states(&self) -> usize {
		self.extra_states
	}

	pub fn len(&self) -> usize {
		self.states.len()
	}

	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}

	/// Number of surviving states owned by `symbol`.
	pub fn states_for_symbol(&self, symbol: usize) -> usize {
		self.states.iter().filter(|state| state.symbol() == Some(symbol)).count()
	}

	/// Per-state labels, sentinels for start and end, mapped symbols otherwise.
	pub fn state_symbols(&self) -> Vec<u32> {
		state_labels(&self.states, self.start_symbol, self.end_symbol)
	}

	/// Checks the structural invariants listed on the type.
	pub fn is_well_formed(&self, tolerance: f64) -> bool {
		if self.states.get(START) != Some(&StateKind::Start) || self.states.get(END) != Some(&StateKind::End) {
			return false;
		}
		if self.transitions.row_sum(END) != 0.0 {
			return false;
		}
		let rows_ok = (0..self.len())
			.filter(|&from| from != END)
			.all(|from| (self.transitions.row_sum(from) - 1.0).abs() <= tolerance);

		let forward = self.transitions.reachable_from(START);
		let backward = self.transitions.reaching(END);
		rows_ok && forward.iter().zip(&backward).all(|(&f, &b)| f && b)
	}
}
