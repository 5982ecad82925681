use thiserror::Error;

/// Errors raised while mapping a corpus, fitting, pruning or generating.
#[derive(Debug, Error)]
pub enum PommaError {
	/// The corpus does not have the expected shape (e.g. it is empty).
	#[error("malformed corpus: {0}")]
	InputShape(String),

	/// An E-M run used its whole step budget without reaching the tolerance.
	///
	/// Fitting keeps such runs (they are tagged, not discarded); this variant
	/// is only produced on request by `CandidateModel::ensure_converged`.
	#[error("run {run} with {extra_states} extra states did not converge after {steps} steps (last change {delta:e})")]
	Convergence {
		extra_states: usize,
		run: usize,
		steps: usize,
		delta: f64,
	},

	/// No topology produced a usable model.
	#[error("no valid model: {0}")]
	NoValidModel(String),

	/// A model broke the stochastic-matrix invariants during generation.
	#[error("malformed model: {0}")]
	MalformedModel(String),

	/// A configuration value is out of range.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// The fit was aborted through its cancellation flag.
	#[error("fit cancelled")]
	Cancelled,

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("encoding error: {0}")]
	Encoding(#[from] postcard::Error),

	#[error("configuration format error: {0}")]
	ConfigFormat(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PommaError>;
