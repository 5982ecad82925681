use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PommaError, Result};

/// How candidate models with different numbers of extra states are compared.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
	/// Log-likelihood penalized by the number of free transition parameters.
	#[default]
	Bic,
	/// Smallest topology whose generated step statistics fall inside the
	/// bootstrap bounds of the data. Falls back to `Bic` if none does.
	Bootstrap,
}

/// Immutable fitting configuration, handed to every component call.
///
/// Build it with [`FitConfig::builder`] or [`FitConfig::from_json`]; both
/// validate the values. `FitConfig::default()` holds the reference defaults.
///
/// # Invariants
/// - `prob_prune`, `frac_in_prune` and `prob_small` are in `[0, 1)`
/// - `tolerance > 0`, and every count is at least 1
/// - `percent_split` and `p_value` are in `(0, 1)`
/// - `start_symbol != end_symbol`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FitConfig {
	/// Transitions below this probability are pruned from the final model.
	pub prob_prune: f64,
	/// States visited less than this fraction of positions are pruned.
	pub frac_in_prune: f64,
	/// Transitions below this probability are dropped during E-M.
	pub prob_small: f64,
	/// Largest change of any transition probability accepted as converged.
	pub tolerance: f64,
	/// Step budget of a single E-M run.
	pub max_steps: usize,
	/// Independent random initializations per topology.
	pub num_random_starts: usize,
	/// Fraction of each bootstrap resample used as its first half.
	pub percent_split: f64,
	/// Quantile of the bootstrap distances used as acceptance bound.
	pub p_value: f64,
	/// Number of bootstrap resamples.
	pub num_boot: usize,
	/// Number of leading steps compared by the step-probability statistic.
	pub m_compare: usize,
	/// Number of sequences generated to validate a candidate.
	pub num_seq: usize,
	/// Largest number of extra states per symbol tried by the selector.
	pub max_extra_states: usize,
	/// Label of the start state in rendered state labels.
	///
	/// Labels share one integer space with the mapped symbols `0..n`, so both
	/// sentinels must be at least the number of distinct symbols. The default
	/// (1000) limits a corpus to 1000 symbols; use
	/// [`FitConfigBuilder::sentinels`] for larger alphabets.
	pub start_symbol: u32,
	/// Label of the end state in rendered state labels. Same constraint as
	/// `start_symbol`.
	pub end_symbol: u32,
	/// Master seed, every random stream of a fit is derived from it.
	pub seed: u64,
	pub criterion: SelectionCriterion,
}

impl Default for FitConfig {
	fn default() -> Self {
		Self {
			prob_prune: 0.01,
			frac_in_prune: 0.01,
			prob_small: 0.001,
			tolerance: 0.001,
			max_steps: 10_000,
			num_random_starts: 20,
			percent_split: 0.5,
			p_value: 0.95,
			num_boot: 500,
			m_compare: 30,
			num_seq: 5000,
			max_extra_states: 15,
			start_symbol: 1000,
			end_symbol: 1001,
			seed: 0,
			criterion: SelectionCriterion::Bic,
		}
	}
}

impl FitConfig {
	pub fn builder() -> FitConfigBuilder {
		FitConfigBuilder::new()
	}

	/// Parses a JSON document, missing keys take their default value.
	///
	/// # Errors
	/// Returns an error if the document is not valid JSON or a value is out of range.
	pub fn from_json(json: &str) -> Result<Self> {
		let config: FitConfig = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads a JSON configuration file (see [`FitConfig::from_json`]).
	pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let json = fs::read_to_string(path)?;
		Self::from_json(&json)
	}

	/// Checks every invariant listed on the type.
	pub fn validate(&self) -> Result<()> {
		check_unit("prob_prune", self.prob_prune)?;
		check_unit("frac_in_prune", self.frac_in_prune)?;
		check_unit("prob_small", self.prob_small)?;
		check_open_unit("percent_split", self.percent_split)?;
		check_open_unit("p_value", self.p_value)?;

		if !(self.tolerance > 0.0) {
			return Err(PommaError::InvalidConfig(format!("tolerance must be > 0, got {}", self.tolerance)));
		}

		for (name, value) in [
			("max_steps", self.max_steps),
			("num_random_starts", self.num_random_starts),
			("num_boot", self.num_boot),
			("m_compare", self.m_compare),
			("num_seq", self.num_seq),
			("max_extra_states", self.max_extra_states),
		] {
			if value == 0 {
				return Err(PommaError::InvalidConfig(format!("{} must be >= 1", name)));
			}
		}

		if self.start_symbol == self.end_symbol {
			return Err(PommaError::InvalidConfig(format!(
				"start_symbol and end_symbol must differ, both are {}",
				self.start_symbol
			)));
		}
		Ok(())
	}
}

fn check_unit(name: &str, value: f64) -> Result<()> {
	if !(0.0..1.0).contains(&value) {
		return Err(PommaError::InvalidConfig(format!("{} must be in [0, 1), got {}", name, value)));
	}
	Ok(())
}

fn check_open_unit(name: &str, value: f64) -> Result<()> {
	if !(value > 0.0 && value < 1.0) {
		return Err(PommaError::InvalidConfig(format!("{} must be in (0, 1), got {}", name, value)));
	}
	Ok(())
}

/// Consuming builder for [`FitConfig`].
#[derive(Default)]
pub struct FitConfigBuilder {
	config: FitConfig,
}

impl FitConfigBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn prob_prune(mut self, value: f64) -> Self {
		self.config.prob_prune = value;
		self
	}

	#[must_use]
	pub fn frac_in_prune(mut self, value: f64) -> Self {
		self.config.frac_in_prune = value;
		self
	}

	#[must_use]
	pub fn prob_small(mut self, value: f64) -> Self {
		self.config.prob_small = value;
		self
	}

	#[must_use]
	pub fn tolerance(mut self, value: f64) -> Self {
		self.config.tolerance = value;
		self
	}

	#[must_use]
	pub fn max_steps(mut self, value: usize) -> Self {
		self.config.max_steps = value;
		self
	}

	#[must_use]
	pub fn num_random_starts(mut self, value: usize) -> Self {
		self.config.num_random_starts = value;
		self
	}

	#[must_use]
	pub fn percent_split(mut self, value: f64) -> Self {
		self.config.percent_split = value;
		self
	}

	#[must_use]
	pub fn p_value(mut self, value: f64) -> Self {
		self.config.p_value = value;
		self
	}

	#[must_use]
	pub fn num_boot(mut self, value: usize) -> Self {
		self.config.num_boot = value;
		self
	}

	#[must_use]
	pub fn m_compare(mut self, value: usize) -> Self {
		self.config.m_compare = value;
		self
	}

	#[must_use]
	pub fn num_seq(mut self, value: usize) -> Self {
		self.config.num_seq = value;
		self
	}

	#[must_use]
	pub fn max_extra_states(mut self, value: usize) -> Self {
		self.config.max_extra_states = value;
		self
	}

	#[must_use]
	pub fn sentinels(mut self, start_symbol: u32, end_symbol: u32) -> Self {
		self.config.start_symbol = start_symbol;
		self.config.end_symbol = end_symbol;
		self
	}

	#[must_use]
	pub fn seed(mut self, value: u64) -> Self {
		self.config.seed = value;
		self
	}

	#[must_use]
	pub fn criterion(mut self, value: SelectionCriterion) -> Self {
		self.config.criterion = value;
		self
	}

	/// Validates and returns the configuration.
	pub fn build(self) -> Result<FitConfig> {
		self.config.validate()?;
		Ok(self.config)
	}
}
