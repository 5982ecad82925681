use log::{debug, warn};

use crate::config::FitConfig;
use crate::error::{PommaError, Result};
use crate::matrix::TransitionMatrix;
use crate::model::candidate::CandidateModel;
use crate::model::final_model::FinalModel;
use crate::topology::{StateKind, END, START};

/// Upper bound on prune rounds. Every round but the last removes at least
/// one transition or state, so this is only reached on huge models.
const MAX_PRUNE_ROUNDS: usize = 64;

/// Removes rare transitions and rarely visited states from a fitted model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pruner {
	prob_prune: f64,
	frac_in_prune: f64,
}

/// States, matrix and visitation fractions being pruned.
struct Parts {
	states: Vec<StateKind>,
	transitions: TransitionMatrix,
	occupancy: Vec<f64>,
}

impl Pruner {
	pub fn new(prob_prune: f64, frac_in_prune: f64) -> Self {
		Self { prob_prune, frac_in_prune }
	}

	pub fn from_config(config: &FitConfig) -> Self {
		Self::new(config.prob_prune, config.frac_in_prune)
	}

	/// Prunes a candidate model into a final model.
	///
	/// The first round uses the candidate's posterior visitation fractions.
	///
	/// # Errors
	/// Returns `PommaError::NoValidModel` if the start state can no longer
	/// reach the end state.
	pub fn prune(&self, candidate: &CandidateModel) -> Result<FinalModel> {
		let topology = candidate.topology();
		let parts = Parts {
			states: topology.states().to_vec(),
			transitions: candidate.transitions().clone(),
			occupancy: candidate.occupancy().to_vec(),
		};
		let parts = self.run(parts)?;
		Ok(FinalModel {
			states: parts.states,
			transitions: parts.transitions,
			occupancy: parts.occupancy,
			extra_states: topology.extra_states(),
			start_symbol: topology.start_symbol(),
			end_symbol: topology.end_symbol(),
		})
	}

	/// Prunes an already final model again. With the same thresholds the
	/// result is identical to the input.
	pub fn reprune(&self, model: &FinalModel) -> Result<FinalModel> {
		let parts = Parts {
			states: model.states.clone(),
			transitions: model.transitions.clone(),
			occupancy: model.occupancy.clone(),
		};
		let parts = self.run(parts)?;
		Ok(FinalModel {
			states: parts.states,
			transitions: parts.transitions,
			occupancy: parts.occupancy,
			..model.clone()
		})
	}

	fn run(&self, mut parts: Parts) -> Result<Parts> {
		for round in 0..MAX_PRUNE_ROUNDS {
			let mut changed = false;

			for from in 0..parts.states.len() {
				if from != END && parts.transitions.drop_below(from, self.prob_prune) {
					changed = true;
				}
			}

			let low: Vec<bool> = parts
				.states
				.iter()
				.zip(&parts.occupancy)
				.map(|(state, &fraction)| state.symbol().is_some() && fraction < self.frac_in_prune)
				.collect();
			if let Some(keep) = surviving_states(&mut parts.transitions, &low)? {
				debug!("Pruning round {}: keeping {} of {} states", round, keep.len(), parts.states.len());
				parts.states = keep.iter().map(|&i| parts.states[i]).collect();
				parts.transitions = parts.transitions.submatrix(&keep);
				changed = true;
			}

			if !changed {
				return Ok(parts);
			}
			parts.occupancy = chain_occupancy(&parts.states, &parts.transitions)?;
		}

		warn!("Pruning stopped after {} rounds without reaching a fixed point", MAX_PRUNE_ROUNDS);
		Ok(parts)
	}
}

/// Removes the `low` states, then every state that is unreachable from start
/// or cannot reach end, and renormalizes the rows that lost a transition.
///
/// Returns the indices of the surviving states, or `None` if every state survives.
fn surviving_states(transitions: &mut TransitionMatrix, low: &[bool]) -> Result<Option<Vec<usize>>> {
	let n = low.len();
	let mut removed = low.to_vec();
	let mut touched = vec![false; n];

	cut_edges(transitions, &removed, &mut touched);
	let forward = transitions.reachable_from(START);
	let backward = transitions.reaching(END);
	for state in 0..n {
		if !(forward[state] && backward[state]) {
			removed[state] = true;
		}
	}
	if removed[START] || removed[END] {
		return Err(PommaError::NoValidModel(
			"pruning left no path from the start state to the end state".to_owned(),
		));
	}
	if !removed.iter().any(|&r| r) {
		return Ok(None);
	}

	cut_edges(transitions, &removed, &mut touched);
	for state in 0..n {
		if touched[state] && !removed[state] {
			transitions.normalize_row(state);
		}
	}
	Ok(Some((0..n).filter(|&state| !removed[state]).collect()))
}

/// Zeroes every transition into or out of a removed state, marking the rows
/// that lost a transition.
fn cut_edges(transitions: &mut TransitionMatrix, removed: &[bool], touched: &mut [bool]) {
	let n = removed.len();
	for from in 0..n {
		for to in 0..n {
			if (removed[from] || removed[to]) && transitions.get(from, to) > 0.0 {
				transitions.set(from, to, 0.0);
				touched[from] = true;
			}
		}
	}
}

/// Expected fraction of symbol positions spent in each state of the chain.
///
/// At an E-M fixed point this equals the posterior visitation fraction.
fn chain_occupancy(states: &[StateKind], transitions: &TransitionMatrix) -> Result<Vec<f64>> {
	let visits = transitions.expected_visits(START)?;
	let total: f64 = states
		.iter()
		.zip(&visits)
		.filter(|(state, _)| state.symbol().is_some())
		.map(|(_, v)| v)
		.sum();
	Ok(states
		.iter()
		.zip(&visits)
		.map(|(state, &v)| if state.symbol().is_some() && total > 0.0 { v / total } else { 0.0 })
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::candidate::Convergence;
	use crate::topology::Topology;

	/// Symbol 0 with two states, symbol 1 with two states.
	fn candidate(edges: &[(usize, usize, f64)], occupancy: Vec<f64>) -> CandidateModel {
		let topology = Topology::build(&[3, 1], 2, 1, 1000, 1001).unwrap();
		let mut transitions = TransitionMatrix::zeros(topology.len());
		for &(from, to, p) in edges {
			transitions.set(from, to, p);
		}
		CandidateModel {
			topology,
			transitions,
			occupancy,
			log_likelihood: -1.0,
			convergence: Convergence::Converged { steps: 1 },
			observed_transitions: 10,
			run: 0,
			seed: 0,
		}
	}

	fn example() -> CandidateModel {
		candidate(
			&[
				(START, 2, 0.995),
				(START, 4, 0.005),
				(2, 3, 0.6),
				(2, 4, 0.4),
				(3, 2, 0.3),
				(3, 4, 0.7),
				(4, END, 1.0),
				// State 5 is never entered
				(5, END, 1.0),
			],
			vec![0.0, 0.0, 0.4, 0.2, 0.4, 0.0],
		)
	}

	#[test]
	fn rare_transitions_and_unused_states_are_removed() {
		let model = Pruner::new(0.01, 0.01).prune(&example()).unwrap();
		assert!(model.is_well_formed(1e-9));
		assert_eq!(model.len(), 5);
		assert_eq!(model.states_for_symbol(1), 1);
		assert_eq!(model.states_for_symbol(0), 2);
		// START -> symbol 1 was below the threshold
		assert_eq!(model.transitions().get(START, 4), 0.0);
		assert!((model.transitions().get(START, 2) - 1.0).abs() < 1e-12);
	}

	#[test]
	fn rows_stay_stochastic() {
		let candidate = example();
		assert!(candidate.transitions().is_stochastic(1e-9));
		let model = Pruner::new(0.01, 0.01).prune(&candidate).unwrap();
		assert!(model.transitions().is_stochastic(1e-9));
	}

	#[test]
	fn pruning_is_idempotent() {
		let pruner = Pruner::new(0.01, 0.01);
		let once = pruner.prune(&example()).unwrap();
		let twice = pruner.reprune(&once).unwrap();
		assert_eq!(once, twice);
		assert_eq!(twice, pruner.reprune(&twice).unwrap());
	}

	#[test]
	fn rarely_visited_state_is_removed_and_neighbours_renormalized() {
		// State 3 carries 0.5% of the positions
		let candidate = candidate(
			&[(START, 2, 1.0), (2, 3, 0.02), (2, 4, 0.98), (3, 4, 1.0), (4, END, 1.0)],
			vec![0.0, 0.0, 0.5, 0.005, 0.495, 0.0],
		);
		let model = Pruner::new(0.01, 0.01).prune(&candidate).unwrap();
		assert_eq!(model.states_for_symbol(0), 1);
		assert!(model.is_well_formed(1e-9));
		let occupancy: f64 = model.occupancy().iter().sum();
		assert!((occupancy - 1.0).abs() < 1e-9);
	}

	#[test]
	fn dead_end_states_are_dropped() {
		// State 3 loops on itself forever
		let candidate = candidate(
			&[(START, 2, 1.0), (2, 3, 0.5), (2, 4, 0.5), (3, 3, 1.0), (4, END, 1.0)],
			vec![0.0, 0.0, 0.3, 0.4, 0.3, 0.0],
		);
		let model = Pruner::new(0.01, 0.01).prune(&candidate).unwrap();
		assert!(model.is_well_formed(1e-9));
		assert_eq!(model.states_for_symbol(0), 1);
		assert!((model.transitions().get(2, 3) - 1.0).abs() < 1e-12);
	}

	#[test]
	fn start_without_exit_is_an_error() {
		let candidate = candidate(&[(START, 2, 1.0), (2, 2, 1.0)], vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
		assert!(matches!(Pruner::new(0.01, 0.01).prune(&candidate), Err(PommaError::NoValidModel(_))));
	}
}
