use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::{PommaError, Result};

/// Bijection between the symbols of a corpus and the dense range `[0, n)`.
///
/// Symbols are kept sorted, so the integer of a symbol is its rank. This makes
/// the mapping reproducible for a given corpus, whatever the input order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Alphabet<S> {
	symbols: Vec<S>,
}

impl<S: Clone + Ord> Alphabet<S> {
	/// Builds the alphabet of every symbol found in `sequences`.
	pub fn from_sequences(sequences: &[Vec<S>]) -> Self {
		let mut symbols: Vec<S> = sequences.iter().flatten().cloned().collect();
		symbols.sort();
		symbols.dedup();
		Self { symbols }
	}

	pub fn len(&self) -> usize {
		self.symbols.len()
	}

	pub fn is_empty(&self) -> bool {
		self.symbols.is_empty()
	}

	/// Returns the integer assigned to `symbol`, if it belongs to the alphabet.
	pub fn index_of(&self, symbol: &S) -> Option<usize> {
		self.symbols.binary_search(symbol).ok()
	}

	/// Returns the symbol mapped to `index`.
	pub fn symbol(&self, index: usize) -> Option<&S> {
		self.symbols.get(index)
	}

	pub fn symbols(&self) -> &[S] {
		&self.symbols
	}

	/// Maps a sequence of symbols to integers.
	///
	/// Returns `None` if a symbol is not part of the alphabet.
	pub fn map(&self, sequence: &[S]) -> Option<Vec<usize>> {
		sequence.iter().map(|symbol| self.index_of(symbol)).collect()
	}

	/// Maps integers back to the original symbols.
	///
	/// Returns `None` if an integer is out of range.
	pub fn unmap(&self, sequence: &[usize]) -> Option<Vec<S>> {
		sequence.iter().map(|&index| self.symbol(index).cloned()).collect()
	}
}

/// Output of [`map_symbols`]: the alphabet, the mapped corpus and its repeat statistics.
#[derive(Clone, Debug)]
pub struct SymbolMap<S> {
	pub alphabet: Alphabet<S>,
	/// Input sequences mapped to `[0, n)`, same order and lengths as the input.
	pub mapped: Vec<Vec<usize>>,
	/// `max_repeats[s]` is the longest run of mapped symbol `s` in the corpus.
	pub max_repeats: Vec<usize>,
	/// Mapped symbols with a longest run greater than 1, ascending.
	pub repeating: Vec<usize>,
}

impl<S: Clone + Ord> SymbolMap<S> {
	pub fn num_symbols(&self) -> usize {
		self.alphabet.len()
	}

	/// Longest run of an original symbol, if it belongs to the corpus.
	pub fn max_repeat_of(&self, symbol: &S) -> Option<usize> {
		self.alphabet.index_of(symbol).map(|index| self.max_repeats[index])
	}

	/// Original symbols that repeat consecutively somewhere in the corpus.
	pub fn repeating_symbols(&self) -> Vec<S> {
		self.repeating
			.iter()
			.filter_map(|&index| self.alphabet.symbol(index).cloned())
			.collect()
	}
}

/// Maps a corpus to a dense integer alphabet and measures consecutive repeats.
///
/// # Errors
/// Returns `PommaError::InputShape` if `sequences` is empty.
pub fn map_symbols<S: Clone + Ord + Debug>(sequences: &[Vec<S>]) -> Result<SymbolMap<S>> {
	if sequences.is_empty() {
		return Err(PommaError::InputShape("the corpus contains no sequence".to_owned()));
	}

	let alphabet = Alphabet::from_sequences(sequences);
	let mapped: Vec<Vec<usize>> = sequences
		.iter()
		.map(|sequence| {
			// Every symbol comes from the alphabet built above
			alphabet.map(sequence).ok_or_else(|| {
				PommaError::InputShape(format!("unmapped symbol in sequence {:?}", sequence))
			})
		})
		.collect::<Result<_>>()?;

	let mut max_repeats = vec![0usize; alphabet.len()];
	for sequence in &mapped {
		for (symbol, run) in runs(sequence) {
			max_repeats[symbol] = max_repeats[symbol].max(run);
		}
	}

	let repeating = (0..alphabet.len()).filter(|&s| max_repeats[s] > 1).collect();

	Ok(SymbolMap { alphabet, mapped, max_repeats, repeating })
}

/// Splits a sequence into maximal runs of identical symbols, as `(symbol, length)`.
pub(crate) fn runs(sequence: &[usize]) -> Vec<(usize, usize)> {
	let mut runs: Vec<(usize, usize)> = Vec::new();
	for &symbol in sequence {
		match runs.last_mut() {
			Some((last, count)) if *last == symbol => *count += 1,
			_ => runs.push((symbol, 1)),
		}
	}
	runs
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	fn corpus() -> Vec<Vec<u32>> {
		vec![vec![1, 1, 2, 3], vec![1, 1, 1, 1, 2, 3], vec![1, 1, 2, 3]]
	}

	#[test]
	fn max_repeats_and_repeating_symbols() {
		let map = map_symbols(&corpus()).unwrap();
		assert_eq!(map.max_repeat_of(&1), Some(4));
		assert_eq!(map.max_repeat_of(&2), Some(1));
		assert_eq!(map.max_repeat_of(&3), Some(1));
		assert_eq!(map.repeating_symbols(), vec![1]);
	}

	#[test]
	fn alphabet_covers_distinct_symbols() {
		let map = map_symbols(&corpus()).unwrap();
		let symbols: HashSet<u32> = map.alphabet.symbols().iter().copied().collect();
		assert_eq!(symbols, HashSet::from([1, 2, 3]));
		assert_eq!(map.num_symbols(), 3);
	}

	#[test]
	fn mapping_is_consistent_and_reversible() {
		let input = corpus();
		let map = map_symbols(&input).unwrap();
		for (raw, mapped) in input.iter().zip(&map.mapped) {
			assert_eq!(raw.len(), mapped.len());
			assert!(mapped.iter().all(|&s| s < map.num_symbols()));
			assert_eq!(&map.alphabet.unmap(mapped).unwrap(), raw);
		}
		// Same symbol, same integer
		assert_eq!(map.mapped[0][0], map.mapped[1][3]);
	}

	#[test]
	fn character_sequences_round_trip() {
		let input: Vec<Vec<char>> = vec!["aabbbc".chars().collect(), "cab".chars().collect(), vec![]];
		let map = map_symbols(&input).unwrap();
		assert_eq!(map.num_symbols(), 3);
		assert_eq!(map.max_repeat_of(&'b'), Some(3));
		assert_eq!(map.repeating_symbols(), vec!['a', 'b']);
		let back: Vec<Vec<char>> = map.mapped.iter().map(|s| map.alphabet.unmap(s).unwrap()).collect();
		assert_eq!(back, input);
	}

	#[test]
	fn empty_corpus_is_rejected() {
		let empty: Vec<Vec<u32>> = Vec::new();
		assert!(matches!(map_symbols(&empty), Err(PommaError::InputShape(_))));
	}

	#[test]
	fn runs_are_maximal() {
		assert_eq!(runs(&[0, 0, 1, 0, 0, 0]), vec![(0, 2), (1, 1), (0, 3)]);
		assert!(runs(&[]).is_empty());
	}
}
