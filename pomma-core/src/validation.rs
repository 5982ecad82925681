//! Sequence statistics and the bootstrap test comparing generated sequences
//! with the corpus.

use rand::Rng;

use crate::alphabet::runs;
use crate::config::FitConfig;
use crate::error::{PommaError, Result};

/// Statistic compared between the corpus and generated sequences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Statistic {
	/// Distribution of the symbol found at each of the first `m_compare`
	/// steps, with an extra column for "the sequence already ended".
	StepProbabilities { m_compare: usize },
	/// For each symbol, distribution of its run lengths (runs longer than
	/// `max_run` are counted as `max_run`).
	RepeatDistributions { max_run: usize },
}

impl Statistic {
	/// Flattened statistic of `sequences` over an alphabet of `num_symbols`.
	pub fn compute(&self, sequences: &[&[usize]], num_symbols: usize) -> Vec<f64> {
		match *self {
			Statistic::StepProbabilities { m_compare } => step_probabilities(sequences, num_symbols, m_compare),
			Statistic::RepeatDistributions { max_run } => repeat_distributions(sequences, num_symbols, max_run),
		}
	}
}

/// `m_compare` rows of `num_symbols + 1` columns: row `t` is the share of
/// sequences showing each symbol at step `t`, the last column the share of
/// sequences shorter than `t + 1`.
pub fn step_probabilities(sequences: &[&[usize]], num_symbols: usize, m_compare: usize) -> Vec<f64> {
	let width = num_symbols + 1;
	let mut table = vec![0.0; m_compare * width];
	if sequences.is_empty() {
		return table;
	}
	for sequence in sequences {
		for step in 0..m_compare {
			let column = sequence.get(step).copied().unwrap_or(num_symbols);
			table[step * width + column] += 1.0;
		}
	}
	let total = sequences.len() as f64;
	for value in &mut table {
		*value /= total;
	}
	table
}

/// `num_symbols` rows of `max_run` columns: row `s` is the distribution of the
/// run lengths of symbol `s` (all zeros if the symbol never occurs).
pub fn repeat_distributions(sequences: &[&[usize]], num_symbols: usize, max_run: usize) -> Vec<f64> {
	let max_run = max_run.max(1);
	let mut table = vec![0.0; num_symbols * max_run];
	for sequence in sequences {
		for (symbol, length) in runs(sequence) {
			if symbol < num_symbols {
				table[symbol * max_run + length.min(max_run) - 1] += 1.0;
			}
		}
	}
	for row in table.chunks_mut(max_run) {
		let total: f64 = row.iter().sum();
		if total > 0.0 {
			for value in row {
				*value /= total;
			}
		}
	}
	table
}

/// L1 distance between two statistics of the same shape.
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
	a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Result of [`bootstrap_compare`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BootstrapOutcome {
	/// Distance between the corpus and the generated sequences.
	pub distance: f64,
	/// `p_value` quantile of the bootstrap distances.
	pub bound: f64,
	/// Whether `distance` lies within `bound`.
	pub accepted: bool,
}

/// Tests whether `generated` reproduces `statistic` of `data` within
/// bootstrap bounds.
///
/// The null distribution is built from `num_boot` resamples (with
/// replacement) of the corpus, each split at `percent_split` into two halves
/// whose statistics are compared. The generated sequences are accepted when
/// their distance to the corpus does not exceed the `p_value` quantile.
///
/// # Errors
/// Returns `PommaError::InputShape` if the corpus has fewer than two sequences.
pub fn bootstrap_compare<R: Rng>(
	data: &[Vec<usize>],
	generated: &[Vec<usize>],
	num_symbols: usize,
	statistic: Statistic,
	config: &FitConfig,
	rng: &mut R,
) -> Result<BootstrapOutcome> {
	let n = data.len();
	if n < 2 {
		return Err(PommaError::InputShape(format!(
			"bootstrap comparison needs at least two sequences, got {}",
			n
		)));
	}

	let data_refs: Vec<&[usize]> = data.iter().map(Vec::as_slice).collect();
	let generated_refs: Vec<&[usize]> = generated.iter().map(Vec::as_slice).collect();
	let observed = distance(
		&statistic.compute(&data_refs, num_symbols),
		&statistic.compute(&generated_refs, num_symbols),
	);

	let split = ((n as f64 * config.percent_split).round() as usize).clamp(1, n - 1);
	let mut null: Vec<f64> = (0..config.num_boot)
		.map(|_| {
			let resample: Vec<&[usize]> = (0..n).map(|_| data_refs[rng.random_range(0..n)]).collect();
			let (first, second) = resample.split_at(split);
			distance(&statistic.compute(first, num_symbols), &statistic.compute(second, num_symbols))
		})
		.collect();
	null.sort_by(f64::total_cmp);

	let rank = ((config.p_value * null.len() as f64).ceil() as usize).clamp(1, null.len());
	let bound = null[rank - 1];

	Ok(BootstrapOutcome { distance: observed, bound, accepted: observed <= bound })
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn corpus() -> Vec<Vec<usize>> {
		vec![vec![0, 0, 1, 2], vec![0, 0, 0, 0, 1, 2], vec![0, 0, 1, 2]]
	}

	fn refs(sequences: &[Vec<usize>]) -> Vec<&[usize]> {
		sequences.iter().map(Vec::as_slice).collect()
	}

	#[test]
	fn step_probabilities_rows_sum_to_one() {
		let corpus = corpus();
		let table = step_probabilities(&refs(&corpus), 3, 5);
		for row in table.chunks(4) {
			assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
		}
		// Every sequence starts with symbol 0
		assert_eq!(table[0], 1.0);
		// Step 4: two sequences have ended, one shows symbol 1
		assert!((table[4 * 4 + 3] - 2.0 / 3.0).abs() < 1e-12);
		assert!((table[4 * 4 + 1] - 1.0 / 3.0).abs() < 1e-12);
	}

	#[test]
	fn repeat_distribution_of_corpus() {
		let corpus = corpus();
		let table = repeat_distributions(&refs(&corpus), 3, 4);
		assert_eq!(&table[0..4], &[0.0, 2.0 / 3.0, 0.0, 1.0 / 3.0]);
		assert_eq!(&table[4..8], &[1.0, 0.0, 0.0, 0.0]);
	}

	#[test]
	fn identical_sequences_are_accepted() {
		let corpus = corpus();
		let config = FitConfig::builder().num_boot(200).build().unwrap();
		let mut rng = StdRng::seed_from_u64(2);
		let outcome = bootstrap_compare(
			&corpus,
			&corpus,
			3,
			Statistic::RepeatDistributions { max_run: 4 },
			&config,
			&mut rng,
		)
		.unwrap();
		assert_eq!(outcome.distance, 0.0);
		assert!(outcome.accepted);
	}

	#[test]
	fn unrelated_sequences_are_rejected() {
		let data: Vec<Vec<usize>> = (0..40).map(|i| if i % 2 == 0 { vec![0, 1] } else { vec![0, 0, 1] }).collect();
		let generated: Vec<Vec<usize>> = (0..40).map(|_| vec![1, 1, 1, 1, 0]).collect();
		let config = FitConfig::builder().num_boot(200).build().unwrap();
		let mut rng = StdRng::seed_from_u64(2);
		let outcome = bootstrap_compare(
			&data,
			&generated,
			2,
			Statistic::StepProbabilities { m_compare: 5 },
			&config,
			&mut rng,
		)
		.unwrap();
		assert!(!outcome.accepted, "{:?}", outcome);
	}

	#[test]
	fn single_sequence_cannot_be_bootstrapped() {
		let config = FitConfig::default();
		let mut rng = StdRng::seed_from_u64(2);
		let data = vec![vec![0, 1]];
		let result = bootstrap_compare(&data, &data, 2, Statistic::StepProbabilities { m_compare: 2 }, &config, &mut rng);
		assert!(matches!(result, Err(PommaError::InputShape(_))));
	}
}
