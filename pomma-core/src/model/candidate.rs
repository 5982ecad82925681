use serde::{Deserialize, Serialize};

use crate::error::{PommaError, Result};
use crate::matrix::TransitionMatrix;
use crate::topology::{Topology, END};

/// How an E-M run ended.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum Convergence {
	/// The largest transition change dropped below the tolerance.
	Converged { steps: usize },
	/// The step budget ran out first. The estimate is still usable.
	StepBudgetExhausted { steps: usize, delta: f64 },
}

impl Convergence {
	pub fn is_converged(&self) -> bool {
		matches!(self, Convergence::Converged { .. })
	}

	pub fn steps(&self) -> usize {
		match self {
			Convergence::Converged { steps } | Convergence::StepBudgetExhausted { steps, .. } => *steps,
		}
	}
}

/// A topology together with the transition matrix fitted by one E-M run.
///
/// Immutable once produced; pruning builds a new `FinalModel` from it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CandidateModel {
	pub(crate) topology: Topology,
	pub(crate) transitions: TransitionMatrix,
	/// Posterior fraction of symbol positions spent in each state.
	pub(crate) occupancy: Vec<f64>,
	pub(crate) log_likelihood: f64,
	pub(crate) convergence: Convergence,
	/// Number of transitions observed in the corpus (`len + 1` per sequence).
	pub(crate) observed_transitions: usize,
	pub(crate) run: usize,
	pub(crate) seed: u64,
}

impl CandidateModel {
	pub fn topology(&self) -> &Topology {
		&self.topology
	}

	pub fn transitions(&self) -> &TransitionMatrix {
		&self.transitions
	}

	pub fn occupancy(&self) -> &[f64] {
		&self.occupancy
	}

	/// Total log-likelihood of the corpus under the fitted matrix.
	pub fn log_likelihood(&self) -> f64 {
		self.log_likelihood
	}

	pub fn convergence(&self) -> Convergence {
		self.convergence
	}

	pub fn is_converged(&self) -> bool {
		self.convergence.is_converged()
	}

	pub fn extra_states(&self) -> usize {
		self.topology.extra_states()
	}

	/// Index of the random start that produced this model.
	pub fn run(&self) -> usize {
		self.run
	}

	pub fn seed(&self) -> u64 {
		self.seed
	}

	/// Turns a non-converged run into `PommaError::Convergence`.
	pub fn ensure_converged(&self) -> Result<()> {
		match self.convergence {
			Convergence::Converged { .. } => Ok(()),
			Convergence::StepBudgetExhausted { steps, delta } => Err(PommaError::Convergence {
				extra_states: self.extra_states(),
				run: self.run,
				steps,
				delta,
			}),
		}
	}

	/// Number of free transition parameters: non-zero entries minus one per
	/// non-terminal row.
	pub fn free_parameters(&self) -> usize {
		(0..self.transitions.size())
			.filter(|&from| from != END)
			.map(|from| self.transitions.out_degree(from).saturating_sub(1))
			.sum()
	}

	/// Bayesian information criterion, in the "higher is better" form
	/// `LL - k/2 * ln(N)`.
	pub fn bic_score(&self) -> f64 {
		let n = self.observed_transitions.max(1) as f64;
		self.log_likelihood - 0.5 * self.free_parameters() as f64 * n.ln()
	}
}
