use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{PommaError, Result};

/// Index of the start state in every topology and final model.
pub const START: usize = 0;
/// Index of the end state in every topology and final model.
pub const END: usize = 1;

/// What a hidden state stands for.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateKind {
	Start,
	End,
	/// One of the `1 + extra_states` states of a mapped symbol.
	/// `stage` tells the copies apart, the fit decides what each one means.
	Symbol { symbol: usize, stage: usize },
}

impl StateKind {
	/// Symbol emitted when entering this state, `None` for start and end.
	pub fn symbol(&self) -> Option<usize> {
		match self {
			StateKind::Symbol { symbol, .. } => Some(*symbol),
			_ => None,
		}
	}
}

/// Candidate hidden-state set for a given number of extra states per symbol.
///
/// Layout: start at index 0, end at index 1, then `1 + extra_states`
/// consecutive states for each symbol in mapped order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Topology {
	states: Vec<StateKind>,
	num_symbols: usize,
	extra_states: usize,
	max_repeats: Vec<usize>,
	start_symbol: u32,
	end_symbol: u32,
}

impl Topology {
	/// Builds the state set of `2 + num_symbols * (1 + extra_states)` states.
	///
	/// # Errors
	/// Returns `PommaError::InvalidConfig` if `max_repeats` does not have one
	/// entry per symbol, or if a sentinel collides with the other one or
	/// with a mapped symbol.
	pub fn build(
		max_repeats: &[usize],
		num_symbols: usize,
		extra_states: usize,
		start_symbol: u32,
		end_symbol: u32,
	) -> Result<Self> {
		if max_repeats.len() != num_symbols {
			return Err(PommaError::InvalidConfig(format!(
				"{} max-repeat entries for {} symbols",
				max_repeats.len(),
				num_symbols
			)));
		}
		if start_symbol == end_symbol {
			return Err(PommaError::InvalidConfig("start and end sentinels must differ".to_owned()));
		}
		for sentinel in [start_symbol, end_symbol] {
			if (sentinel as usize) < num_symbols {
				return Err(PommaError::InvalidConfig(format!(
					"sentinel {} collides with a mapped symbol (0..{})",
					sentinel, num_symbols
				)));
			}
		}

		let per_symbol = 1 + extra_states;
		let mut states = Vec::with_capacity(2 + num_symbols * per_symbol);
		states.push(StateKind::Start);
		states.push(StateKind::End);
		for symbol in 0..num_symbols {
			states.extend((0..per_symbol).map(|stage| StateKind::Symbol { symbol, stage }));
		}

		Ok(Self {
			states,
			num_symbols,
			extra_states,
			max_repeats: max_repeats.to_vec(),
			start_symbol,
			end_symbol,
		})
	}

	pub fn len(&self) -> usize {
		self.states.len()
	}

	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}

	pub fn states(&self) -> &[StateKind] {
		&self.states
	}

	pub fn num_symbols(&self) -> usize {
		self.num_symbols
	}

	pub fn extra_states(&self) -> usize {
		self.extra_states
	}

	pub fn max_repeats(&self) -> &[usize] {
		&self.max_repeats
	}

	pub fn start_symbol(&self) -> u32 {
		self.start_symbol
	}

	pub fn end_symbol(&self) -> u32 {
		self.end_symbol
	}

	/// Indices of the states owned by `symbol`.
	pub fn states_of(&self, symbol: usize) -> Range<usize> {
		let per_symbol = 1 + self.extra_states;
		let first = 2 + symbol * per_symbol;
		first..first + per_symbol
	}

	/// Whether the topology lets state `from` move to state `to`.
	///
	/// Nothing enters the start state and nothing leaves the end state.
	/// Moving between two states of the same symbol is only possible when
	/// that symbol repeats somewhere in the corpus.
	pub fn allows(&self, from: usize, to: usize) -> bool {
		match (self.states[from], self.states[to]) {
			(StateKind::End, _) | (_, StateKind::Start) => false,
			(StateKind::Symbol { symbol: a, .. }, StateKind::Symbol { symbol: b, .. }) if a == b => {
				self.max_repeats[a] > 1
			}
			_ => true,
		}
	}

	/// Per-state labels: the sentinels for start and end, the mapped symbol otherwise.
	pub fn state_symbols(&self) -> Vec<u32> {
		state_labels(&self.states, self.start_symbol, self.end_symbol)
	}

	/// Per-state longest run of the owning symbol, 0 for start and end.
	pub fn max_repeat_nums(&self) -> Vec<usize> {
		self.states
			.iter()
			.map(|state| state.symbol().map_or(0, |symbol| self.max_repeats[symbol]))
			.collect()
	}
}

/// Renders states as integer labels, using the sentinels for start and end.
pub(crate) fn state_labels(states: &[StateKind], start_symbol: u32, end_symbol: u32) -> Vec<u32> {
	states
		.iter()
		.map(|state| match state {
			StateKind::Start => start_symbol,
			StateKind::End => end_symbol,
			StateKind::Symbol { symbol, .. } => *symbol as u32,
		})
		.collect()
}
