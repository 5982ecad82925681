//! Expectation-Maximization fitting of a topology's transition matrix.
//!
//! Every symbol state emits its own symbol, so the hidden part of a sequence
//! is only *which* copy of the observed symbol the chain is in. The
//! forward-backward pass therefore only walks the states of the observed
//! symbol at each position: the start state sits before the first symbol and
//! the end state after the last one.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FitConfig;
use crate::error::{PommaError, Result};
use crate::matrix::TransitionMatrix;
use crate::model::candidate::{CandidateModel, Convergence};
use crate::topology::{Topology, END, START};

/// Sufficient statistics of one E-step over the whole corpus.
#[derive(Clone, Debug)]
pub struct Expectation {
	/// Expected number of times each transition was taken.
	pub counts: TransitionMatrix,
	/// Expected number of symbol positions spent in each state.
	pub occupancy: Vec<f64>,
	/// Total log-likelihood, `-inf` if a sequence is impossible.
	pub log_likelihood: f64,
	/// Symbol positions of the sequences that are possible under the matrix.
	pub positions: usize,
	/// Sequences with zero likelihood, left out of `counts` and `occupancy`.
	pub impossible: usize,
}

impl Expectation {
	/// Posterior fraction of symbol positions spent in each state.
	pub fn visitation_fractions(&self) -> Vec<f64> {
		let total = self.positions.max(1) as f64;
		self.occupancy.iter().map(|o| o / total).collect()
	}
}

/// Candidate states at a position of a sequence of length `len`.
fn candidates(topology: &Topology, sequence: &[usize], t: usize) -> Range<usize> {
	if t == 0 {
		START..START + 1
	} else if t == sequence.len() + 1 {
		END..END + 1
	} else {
		topology.states_of(sequence[t - 1])
	}
}

/// Runs the scaled forward-backward pass over every sequence.
pub fn expectation(topology: &Topology, matrix: &TransitionMatrix, sequences: &[Vec<usize>]) -> Expectation {
	let n = topology.len();
	let mut stats = Expectation {
		counts: TransitionMatrix::zeros(n),
		occupancy: vec![0.0; n],
		log_likelihood: 0.0,
		positions: 0,
		impossible: 0,
	};

	for sequence in sequences {
		if !accumulate(topology, matrix, sequence, &mut stats) {
			stats.impossible += 1;
			stats.log_likelihood = f64::NEG_INFINITY;
		}
	}
	stats
}

/// Adds one sequence to `stats`. Returns `false` if the sequence has zero
/// likelihood, in which case `stats` is left untouched.
fn accumulate(topology: &Topology, matrix: &TransitionMatrix, sequence: &[usize], stats: &mut Expectation) -> bool {
	let last = sequence.len() + 1;

	// Forward, normalized at each position
	let mut alpha: Vec<Vec<f64>> = Vec::with_capacity(last + 1);
	let mut scales: Vec<f64> = Vec::with_capacity(last + 1);
	alpha.push(vec![1.0]);
	scales.push(1.0);
	for t in 1..=last {
		let previous = candidates(topology, sequence, t - 1);
		let current = candidates(topology, sequence, t);
		let mut column: Vec<f64> = current
			.clone()
			.map(|to| {
				previous
					.clone()
					.zip(&alpha[t - 1])
					.map(|(from, a)| a * matrix.get(from, to))
					.sum::<f64>()
			})
			.collect();
		let scale: f64 = column.iter().sum();
		if !(scale > 0.0) {
			return false;
		}
		for value in &mut column {
			*value /= scale;
		}
		alpha.push(column);
		scales.push(scale);
	}

	// Backward, with the forward scales
	let mut beta: Vec<Vec<f64>> = vec![Vec::new(); last + 1];
	beta[last] = vec![1.0];
	for t in (0..last).rev() {
		let current = candidates(topology, sequence, t);
		let next = candidates(topology, sequence, t + 1);
		let column: Vec<f64> = current
			.map(|from| {
				next.clone()
					.zip(&beta[t + 1])
					.map(|(to, b)| matrix.get(from, to) * b)
					.sum::<f64>()
					/ scales[t + 1]
			})
			.collect();
		beta[t] = column;
	}

	// Expected transition counts
	for t in 0..last {
		let current = candidates(topology, sequence, t);
		let next = candidates(topology, sequence, t + 1);
		for (from, a) in current.zip(&alpha[t]) {
			if *a == 0.0 {
				continue;
			}
			for (to, b) in next.clone().zip(&beta[t + 1]) {
				let xi = a * matrix.get(from, to) * b / scales[t + 1];
				if xi > 0.0 {
					let count = stats.counts.get(from, to);
					stats.counts.set(from, to, count + xi);
				}
			}
		}
	}

	// Occupancy of the symbol positions
	for t in 1..last {
		let current = candidates(topology, sequence, t);
		for ((state, a), b) in current.zip(&alpha[t]).zip(&beta[t]) {
			stats.occupancy[state] += a * b;
		}
	}

	stats.positions += sequence.len();
	stats.log_likelihood += scales.iter().map(|s| s.ln()).sum::<f64>();
	true
}

/// M-step: normalizes the expected counts row by row and removes the
/// transitions below `prob_small`.
///
/// Rows of states that were never visited keep their previous distribution.
pub fn maximization(stats: &Expectation, previous: &TransitionMatrix, prob_small: f64) -> TransitionMatrix {
	let n = previous.size();
	let mut next = stats.counts.clone();
	for from in 0..n {
		if from == END {
			continue;
		}
		if !next.normalize_row(from) {
			next.row_mut(from).copy_from_slice(previous.row(from));
		}
		next.drop_below(from, prob_small);
	}
	next
}

/// Fits the transition matrix of a topology from several random starts.
///
/// # Responsibilities
/// - Draw one seed per random start from the master seed
/// - Run the starts in parallel, each one with its own generator
/// - Keep the start with the highest log-likelihood
pub struct EmFitter<'a> {
	config: &'a FitConfig,
	cancel: Option<&'a AtomicBool>,
}

impl<'a> EmFitter<'a> {
	pub fn new(config: &'a FitConfig) -> Self {
		Self { config, cancel: None }
	}

	/// Checks `cancel` at the top of every E-M iteration.
	#[must_use]
	pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
		self.cancel = Some(cancel);
		self
	}

	/// Seeds of the random starts for a topology.
	///
	/// Derived from the master seed and the number of extra states, so each
	/// topology gets its own reproducible streams.
	pub fn run_seeds(&self, extra_states: usize) -> Vec<u64> {
		let mixed = self.config.seed ^ (extra_states as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
		let mut master = StdRng::seed_from_u64(mixed);
		(0..self.config.num_random_starts).map(|_| master.random::<u64>()).collect()
	}

	/// Runs every random start and returns the best candidate.
	///
	/// Ranking: higher log-likelihood first, then converged over
	/// non-converged, then lower run index.
	///
	/// # Errors
	/// Returns `PommaError::Cancelled` if the cancellation flag was raised.
	pub fn fit(&self, topology: &Topology, sequences: &[Vec<usize>]) -> Result<CandidateModel> {
		let seeds = self.run_seeds(topology.extra_states());
		let jobs: Vec<(usize, u64)> = seeds.into_iter().enumerate().collect();

		let workers = num_cpus::get().clamp(1, jobs.len().max(1));
		let chunk_size = jobs.len().div_ceil(workers).max(1);

		let mut results: Vec<(usize, Result<CandidateModel>)> = thread::scope(|scope| {
			let (tx, rx) = mpsc::channel();
			for chunk in jobs.chunks(chunk_size) {
				let tx = tx.clone();
				scope.spawn(move || {
					for &(run, seed) in chunk {
						let result = self.fit_run(topology, sequences, run, seed);
						if tx.send((run, result)).is_err() {
							return;
						}
					}
				});
			}
			drop(tx);
			rx.iter().collect()
		});
		results.sort_by_key(|(run, _)| *run);

		let candidates = results.into_iter().map(|(_, result)| result).collect::<Result<Vec<_>>>()?;
		best_run(candidates).ok_or_else(|| PommaError::NoValidModel("no random start was run".to_owned()))
	}

	/// Runs E-M once from the random matrix drawn with `seed`.
	///
	/// A run that uses its whole step budget is returned anyway, tagged with
	/// `Convergence::StepBudgetExhausted`.
	pub fn fit_run(&self, topology: &Topology, sequences: &[Vec<usize>], run: usize, seed: u64) -> Result<CandidateModel> {
		let mut rng = StdRng::seed_from_u64(seed);
		let mut matrix = TransitionMatrix::random(topology, &mut rng);

		let mut steps = 0;
		let mut delta = f64::INFINITY;
		while steps < self.config.max_steps {
			if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
				return Err(PommaError::Cancelled);
			}
			let stats = expectation(topology, &matrix, sequences);
			let next = maximization(&stats, &matrix, self.config.prob_small);
			delta = next.max_abs_diff(&matrix);
			matrix = next;
			steps += 1;
			if delta < self.config.tolerance {
				break;
			}
		}

		let convergence = if delta < self.config.tolerance {
			Convergence::Converged { steps }
		} else {
			warn!(
				"Run {} with {} extra states stopped after {} steps (last change {:e})",
				run,
				topology.extra_states(),
				steps,
				delta
			);
			Convergence::StepBudgetExhausted { steps, delta }
		};

		let stats = expectation(topology, &matrix, sequences);
		debug!(
			"Run {} with {} extra states: log-likelihood {:.4} after {} steps",
			run,
			topology.extra_states(),
			stats.log_likelihood,
			steps
		);

		Ok(CandidateModel {
			topology: topology.clone(),
			occupancy: stats.visitation_fractions(),
			transitions: matrix,
			log_likelihood: stats.log_likelihood,
			convergence,
			observed_transitions: sequences.iter().map(|s| s.len() + 1).sum(),
			run,
			seed,
		})
	}
}

/// Best of `candidates`, which must be sorted by run index: on a full tie
/// the earlier run is kept.
fn best_run(candidates: Vec<CandidateModel>) -> Option<CandidateModel> {
	let mut best: Option<CandidateModel> = None;
	for candidate in candidates {
		best = match best {
			Some(current) if !ranks_above(&candidate, &current) => Some(current),
			_ => Some(candidate),
		};
	}
	best
}

fn ranks_above(candidate: &CandidateModel, current: &CandidateModel) -> bool {
	candidate.log_likelihood > current.log_likelihood
		|| (candidate.log_likelihood == current.log_likelihood && candidate.is_converged() && !current.is_converged())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn corpus() -> Vec<Vec<usize>> {
		vec![vec![0, 0, 1, 2], vec![0, 0, 0, 0, 1, 2], vec![0, 0, 1, 2]]
	}

	fn topology(extra: usize) -> Topology {
		Topology::build(&[4, 1, 1], 3, extra, 1000, 1001).unwrap()
	}

	fn config() -> FitConfig {
		FitConfig::builder().num_random_starts(3).seed(11).build().unwrap()
	}

	#[test]
	fn posteriors_of_single_state_chain_are_exact() {
		// One state per symbol: the path is fully observed
		let topology = topology(0);
		let mut rng = StdRng::seed_from_u64(3);
		let matrix = TransitionMatrix::random(&topology, &mut rng);
		let stats = expectation(&topology, &matrix, &corpus());
		assert_eq!(stats.impossible, 0);
		assert_eq!(stats.positions, 14);
		// Symbol 0 occupies 8 of the 14 positions
		assert!((stats.occupancy[2] - 8.0).abs() < 1e-9);
		// 0 -> 0 happens 5 times, 0 -> 1 three times
		assert!((stats.counts.get(2, 2) - 5.0).abs() < 1e-9);
		assert!((stats.counts.get(2, 3) - 3.0).abs() < 1e-9);
		assert!((stats.counts.get(START, 2) - 3.0).abs() < 1e-9);
		assert!((stats.counts.get(4, END) - 3.0).abs() < 1e-9);
	}

	#[test]
	fn log_likelihood_matches_path_probability() {
		let topology = topology(0);
		let mut matrix = TransitionMatrix::zeros(topology.len());
		matrix.set(START, 2, 1.0);
		matrix.set(2, 2, 0.5);
		matrix.set(2, 3, 0.5);
		matrix.set(3, 4, 1.0);
		matrix.set(4, END, 1.0);
		let stats = expectation(&topology, &matrix, &[vec![0, 0, 1, 2]]);
		assert!((stats.log_likelihood - 0.25f64.ln()).abs() < 1e-12);
	}

	#[test]
	fn impossible_sequences_are_flagged() {
		let topology = topology(0);
		let mut matrix = TransitionMatrix::zeros(topology.len());
		matrix.set(START, 3, 1.0);
		matrix.set(3, END, 1.0);
		let stats = expectation(&topology, &matrix, &[vec![0], vec![1]]);
		assert_eq!(stats.impossible, 1);
		assert_eq!(stats.log_likelihood, f64::NEG_INFINITY);
		assert_eq!(stats.positions, 1);
	}

	#[test]
	fn occupancy_sums_to_positions() {
		let topology = topology(2);
		let mut rng = StdRng::seed_from_u64(5);
		let matrix = TransitionMatrix::random(&topology, &mut rng);
		let stats = expectation(&topology, &matrix, &corpus());
		let total: f64 = stats.occupancy.iter().sum();
		assert!((total - stats.positions as f64).abs() < 1e-9);
	}

	#[test]
	fn fitted_rows_are_stochastic_and_converged() {
		let config = config();
		let fitter = EmFitter::new(&config);
		let model = fitter.fit(&topology(1), &corpus()).unwrap();
		assert!(model.is_converged());
		assert!(model.ensure_converged().is_ok());
		assert!(model.transitions().is_stochastic(1e-9));
		assert!(model.log_likelihood().is_finite());
		// Data never leaves symbol 1 for anything but symbol 2
		let topology = model.topology();
		for from in topology.states_of(1) {
			if model.occupancy()[from] == 0.0 {
				continue;
			}
			for to in 0..topology.len() {
				if !topology.states_of(2).contains(&to) {
					assert_eq!(model.transitions().get(from, to), 0.0);
				}
			}
		}
	}

	#[test]
	fn seeded_fits_are_reproducible() {
		let config = config();
		let fitter = EmFitter::new(&config);
		let a = fitter.fit(&topology(2), &corpus()).unwrap();
		let b = fitter.fit(&topology(2), &corpus()).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn best_run_has_highest_likelihood() {
		let config = config();
		let fitter = EmFitter::new(&config);
		let topology = topology(2);
		let best = fitter.fit(&topology, &corpus()).unwrap();
		for (run, seed) in fitter.run_seeds(2).into_iter().enumerate() {
			let single = fitter.fit_run(&topology, &corpus(), run, seed).unwrap();
			assert!(single.log_likelihood() <= best.log_likelihood());
		}
	}

	#[test]
	fn exhausted_budget_is_tagged_not_fatal() {
		let config = FitConfig::builder().max_steps(1).tolerance(1e-12).num_random_starts(1).build().unwrap();
		let model = EmFitter::new(&config).fit(&topology(2), &corpus()).unwrap();
		assert!(!model.is_converged());
		assert_eq!(model.convergence().steps(), 1);
		assert!(matches!(model.ensure_converged(), Err(PommaError::Convergence { steps: 1, .. })));
	}

	fn tagged(log_likelihood: f64, convergence: Convergence, run: usize) -> CandidateModel {
		let topology = topology(0);
		CandidateModel {
			transitions: TransitionMatrix::zeros(topology.len()),
			occupancy: vec![0.0; topology.len()],
			topology,
			log_likelihood,
			convergence,
			observed_transitions: 17,
			run,
			seed: run as u64,
		}
	}

	#[test]
	fn converged_run_wins_a_likelihood_tie() {
		let converged = tagged(-4.0, Convergence::Converged { steps: 12 }, 1);
		let exhausted = tagged(-4.0, Convergence::StepBudgetExhausted { steps: 50, delta: 0.1 }, 0);
		assert!(ranks_above(&converged, &exhausted));
		assert!(!ranks_above(&exhausted, &converged));
		let best = best_run(vec![exhausted, converged]).unwrap();
		assert_eq!(best.run(), 1);
	}

	#[test]
	fn higher_likelihood_beats_convergence() {
		let converged = tagged(-5.0, Convergence::Converged { steps: 12 }, 0);
		let exhausted = tagged(-4.0, Convergence::StepBudgetExhausted { steps: 50, delta: 0.1 }, 1);
		assert!(ranks_above(&exhausted, &converged));
		assert_eq!(best_run(vec![converged, exhausted]).unwrap().run(), 1);
	}

	#[test]
	fn earlier_run_wins_a_full_tie() {
		let first = tagged(-4.0, Convergence::Converged { steps: 3 }, 0);
		let second = tagged(-4.0, Convergence::Converged { steps: 7 }, 1);
		assert!(!ranks_above(&second, &first));
		assert!(!ranks_above(&first, &second));
		assert_eq!(best_run(vec![first, second]).unwrap().run(), 0);
		assert!(best_run(Vec::new()).is_none());
	}

	#[test]
	fn raised_flag_cancels_the_fit() {
		let config = config();
		let flag = AtomicBool::new(true);
		let result = EmFitter::new(&config).with_cancel(&flag).fit(&topology(1), &corpus());
		assert!(matches!(result, Err(PommaError::Cancelled)));
	}
}
