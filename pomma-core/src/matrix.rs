use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PommaError, Result};
use crate::topology::{Topology, END};

/// Dense square transition matrix, stored row-major.
///
/// `get(i, j)` is the probability of moving from state `i` to state `j`.
/// A row of zeros marks a terminal state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransitionMatrix {
	n: usize,
	data: Vec<f64>,
}

impl TransitionMatrix {
	pub fn zeros(n: usize) -> Self {
		Self { n, data: vec![0.0; n * n] }
	}

	/// Draws a random feasible matrix for `topology`.
	///
	/// Every allowed edge gets a uniform weight in `(0, 1]` and each row is
	/// normalized. The end row stays empty.
	pub fn random<R: Rng>(topology: &Topology, rng: &mut R) -> Self {
		let n = topology.len();
		let mut matrix = Self::zeros(n);
		for from in 0..n {
			if from == END {
				continue;
			}
			for to in 0..n {
				if topology.allows(from, to) {
					// Shift [0, 1) to (0, 1] so no allowed edge starts at zero
					matrix.set(from, to, 1.0 - rng.random::<f64>());
				}
			}
			matrix.normalize_row(from);
		}
		matrix
	}

	/// Number of states.
	pub fn size(&self) -> usize {
		self.n
	}

	pub fn get(&self, from: usize, to: usize) -> f64 {
		self.data[from * self.n + to]
	}

	pub fn set(&mut self, from: usize, to: usize, p: f64) {
		self.data[from * self.n + to] = p;
	}

	pub fn row(&self, from: usize) -> &[f64] {
		&self.data[from * self.n..(from + 1) * self.n]
	}

	pub fn row_mut(&mut self, from: usize) -> &mut [f64] {
		&mut self.data[from * self.n..(from + 1) * self.n]
	}

	pub fn row_sum(&self, from: usize) -> f64 {
		self.row(from).iter().sum()
	}

	/// Number of non-zero outgoing transitions of a state.
	pub fn out_degree(&self, from: usize) -> usize {
		self.row(from).iter().filter(|&&p| p > 0.0).count()
	}

	/// Scales a row to sum to 1. Returns `false` (and leaves the row untouched)
	/// if the row is empty.
	pub fn normalize_row(&mut self, from: usize) -> bool {
		let sum = self.row_sum(from);
		if sum <= 0.0 {
			return false;
		}
		for p in self.row_mut(from) {
			*p /= sum;
		}
		true
	}

	/// Removes the transitions of a row that are below `threshold`, then
	/// renormalizes it. The largest transition always survives, so a
	/// non-empty row never becomes empty.
	///
	/// Returns whether a transition was removed.
	pub fn drop_below(&mut self, from: usize, threshold: f64) -> bool {
		let row = self.row_mut(from);
		let keep = match argmax(row) {
			Some(index) => index,
			None => return false,
		};

		let mut removed = false;
		for (to, p) in row.iter_mut().enumerate() {
			if *p > 0.0 && *p < threshold && to != keep {
				*p = 0.0;
				removed = true;
			}
		}
		if removed {
			self.normalize_row(from);
		}
		removed
	}

	/// Largest absolute difference between two matrices of the same size.
	pub fn max_abs_diff(&self, other: &Self) -> f64 {
		self.data
			.iter()
			.zip(&other.data)
			.map(|(a, b)| (a - b).abs())
			.fold(0.0, f64::max)
	}

	/// Checks that every row sums to 1 within `tolerance`, or is empty.
	pub fn is_stochastic(&self, tolerance: f64) -> bool {
		(0..self.n).all(|from| {
			let sum = self.row_sum(from);
			sum == 0.0 || (sum - 1.0).abs() <= tolerance
		})
	}

	/// Restricts the matrix to the states in `keep`, in that order.
	///
	/// Rows are not renormalized.
	pub fn submatrix(&self, keep: &[usize]) -> Self {
		let mut sub = Self::zeros(keep.len());
		for (new_from, &from) in keep.iter().enumerate() {
			for (new_to, &to) in keep.iter().enumerate() {
				sub.set(new_from, new_to, self.get(from, to));
			}
		}
		sub
	}

	/// States reachable from `start` through non-zero transitions, `start` included.
	pub fn reachable_from(&self, start: usize) -> Vec<bool> {
		let mut seen = vec![false; self.n];
		let mut stack = vec![start];
		seen[start] = true;
		while let Some(from) = stack.pop() {
			for to in 0..self.n {
				if !seen[to] && self.get(from, to) > 0.0 {
					seen[to] = true;
					stack.push(to);
				}
			}
		}
		seen
	}

	/// States with a path of non-zero transitions to `target`, `target` included.
	pub fn reaching(&self, target: usize) -> Vec<bool> {
		let mut seen = vec![false; self.n];
		let mut stack = vec![target];
		seen[target] = true;
		while let Some(to) = stack.pop() {
			for from in 0..self.n {
				if !seen[from] && self.get(from, to) > 0.0 {
					seen[from] = true;
					stack.push(from);
				}
			}
		}
		seen
	}

	/// Expected number of visits to each state of a chain started in `start`.
	///
	/// Solves `(I - Aᵀ) x = e_start`. The chain must be absorbing: every state
	/// reachable from `start` must be able to reach a terminal state.
	///
	/// # Errors
	/// Returns `PommaError::MalformedModel` if the system is singular.
	pub fn expected_visits(&self, start: usize) -> Result<Vec<f64>> {
		let n = self.n;
		let mut system = vec![0.0; n * n];
		for i in 0..n {
			for j in 0..n {
				let identity = if i == j { 1.0 } else { 0.0 };
				system[i * n + j] = identity - self.get(j, i);
			}
		}
		let mut rhs = vec![0.0; n];
		rhs[start] = 1.0;
		solve_linear_system(&system, &rhs, n)
	}
}

fn argmax(values: &[f64]) -> Option<usize> {
	let mut best: Option<usize> = None;
	for (index, &value) in values.iter().enumerate() {
		if value > 0.0 && best.is_none_or(|b| value > values[b]) {
			best = Some(index);
		}
	}
	best
}

/// Solve a linear system Ax = b via Gaussian elimination with partial pivoting.
/// `a` is row-major n×n, `b` is length n.
fn solve_linear_system(a: &[f64], b: &[f64], n: usize) -> Result<Vec<f64>> {
	let mut aug = vec![0.0; n * (n + 1)];
	for i in 0..n {
		for j in 0..n {
			aug[i * (n + 1) + j] = a[i * n + j];
		}
		aug[i * (n + 1) + n] = b[i];
	}

	for col in 0..n {
		let mut max_row = col;
		let mut max_val = aug[col * (n + 1) + col].abs();
		for row in (col + 1)..n {
			let val = aug[row * (n + 1) + col].abs();
			if val > max_val {
				max_val = val;
				max_row = row;
			}
		}
		if max_val < 1e-15 {
			return Err(PommaError::MalformedModel(
				"transition chain is not absorbing (singular visit system)".to_owned(),
			));
		}
		if max_row != col {
			for j in 0..=n {
				aug.swap(col * (n + 1) + j, max_row * (n + 1) + j);
			}
		}
		let pivot = aug[col * (n + 1) + col];
		for row in (col + 1)..n {
			let factor = aug[row * (n + 1) + col] / pivot;
			if factor == 0.0 {
				continue;
			}
			for j in col..=n {
				let above = aug[col * (n + 1) + j];
				aug[row * (n + 1) + j] -= factor * above;
			}
		}
	}

	let mut x = vec![0.0; n];
	for i in (0..n).rev() {
		let mut sum = aug[i * (n + 1) + n];
		for j in (i + 1)..n {
			sum -= aug[i * (n + 1) + j] * x[j];
		}
		x[i] = sum / aug[i * (n + 1) + i];
	}
	Ok(x)
}
