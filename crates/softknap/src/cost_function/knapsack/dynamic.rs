//! Exact dynamic programming over the active rows, used instead of the linear
//! relaxation to compute the cost moves when the relaxation is not tight.

use tracing::debug;

use crate::{
	actions::PropagationActions,
	cost_function::{
		knapsack::{KnapsackCostFunction, RowKind},
		PropagationError,
	},
	Cost, Weight, MAX_COST,
};

/// The largest difference between the maximum weight and the capacity for
/// which the dynamic programming is attempted.
const MAX_SLACK: Weight = 1 << 16;

/// The smallest total profit of a choice of one item per row whose weights
/// reach `capacity`, together with the position of the chosen item in each
/// row.
///
/// The table is indexed by the weight lost with respect to the heaviest item
/// of every row, which is bounded by the difference between the maximum
/// weight and the capacity. Returns [`MAX_COST`] when the capacity cannot be
/// reached.
pub(super) fn max_value(weights: &[Vec<Weight>], profits: &[Vec<Cost>], capacity: Weight) -> (Cost, Vec<usize>) {
	if capacity <= 0 {
		let mut choice = Vec::with_capacity(profits.len());
		let mut total = 0;
		for p in profits {
			let (j, &min) = p
				.iter()
				.enumerate()
				.min_by_key(|&(_, c)| *c)
				.unwrap_or((0, &0));
			choice.push(j);
			total += min;
		}
		return (total, choice);
	}
	let heaviest: Vec<usize> = weights
		.iter()
		.map(|w| {
			let mut best = 0;
			for (j, &x) in w.iter().enumerate() {
				if x > w[best] {
					best = j;
				}
			}
			best
		})
		.collect();
	let max_weight: Weight = weights.iter().zip(&heaviest).map(|(w, &j)| w[j]).sum();
	if max_weight < capacity {
		return (MAX_COST, heaviest);
	}
	let slack = (max_weight - capacity) as usize;
	let start: Cost = profits.iter().zip(&heaviest).map(|(p, &j)| p[j]).sum();
	let mut last: Vec<Option<(Cost, Vec<usize>)>> = vec![None; slack + 1];
	last[0] = Some((start, heaviest));
	for (i, (w, p)) in weights.iter().zip(profits).enumerate() {
		let mut current = last.clone();
		for j in 0..w.len() {
			for k in (0..=slack).rev() {
				let Some((cost, choice)) = &last[k] else {
					continue;
				};
				let sel = choice[i];
				if w[j] > w[sel] || p[j] >= p[sel] {
					continue;
				}
				let next = k + (w[sel] - w[j]) as usize;
				if next > slack {
					continue;
				}
				let c = cost - p[sel] + p[j];
				if current[next].as_ref().map_or(true, |(best, _)| *best > c) {
					let mut choice = choice.clone();
					choice[i] = j;
					current[next] = Some((c, choice));
				}
			}
		}
		last = current;
	}
	last.into_iter()
		.flatten()
		.min_by_key(|(c, _)| *c)
		.unwrap_or((MAX_COST, Vec::new()))
}

impl KnapsackCostFunction {
	/// Move costs following the exact optimum of the active rows.
	///
	/// The rows are visited in DAC order. Every non-optimal item of a row
	/// receives the part of its unary cost that is not needed to keep the
	/// optimum of the other rows, and the optimal item absorbs its unary cost.
	/// Returns `false`, without changing anything, when the table of the
	/// dynamic programming would be too large.
	pub(super) fn dynamic_shift<A: PropagationActions>(&mut self, actions: &mut A) -> Result<bool, PropagationError> {
		let capacity = self.capacity(actions);
		let mut weights: Vec<Vec<Weight>> = Vec::with_capacity(self.current.len());
		let mut profits: Vec<Vec<Cost>> = Vec::with_capacity(self.current.len());
		for a in &self.current {
			let r = &self.rows[a.row];
			weights.push(a.items.iter().map(|&k| r.weights[k]).collect());
			profits.push(a.items.iter().map(|&k| r.profit[k]).collect());
		}
		if self.max_weight(actions) - capacity > MAX_SLACK {
			return Ok(false);
		}
		let (best, choice) = max_value(&weights, &profits, capacity);
		let base = self.assigned_deltas(actions) - self.lower_bound(actions);
		let cost = best + base;
		debug!(cost, slack = self.max_weight(actions) - capacity, "knapsack dynamic programming");
		debug_assert!(cost >= 0);
		if cost <= 0 || best >= MAX_COST {
			return Ok(true);
		}

		let mut order: Vec<usize> = (0..self.current.len()).collect();
		order.sort_by_key(|&e| (self.anchor_order(actions, e), e));
		for e in order {
			if actions.is_interrupted() {
				return Err(PropagationError::Timeout);
			}
			let RowKind::Real(var) = self.rows[self.current[e].row].kind else {
				continue;
			};
			let mut rest_w = weights.clone();
			let mut rest_p = profits.clone();
			let _ = rest_w.remove(e);
			let _ = rest_p.remove(e);
			let x = self.scope[var];
			let row = self.current[e].row;
			for (j, &k) in self.current[e].items.clone().iter().enumerate() {
				let unary = if self.is_class(var, k) {
					self.rows[row].class_cost
				} else {
					actions.unary_cost(x, self.rows[row].values[k])
				};
				if j == choice[e] {
					if unary > 0 {
						self.shift(actions, var, k, unary, true)?;
						self.add_delta(actions, var, k, unary);
					}
					continue;
				}
				let (rest, _) = max_value(&rest_w, &rest_p, capacity - weights[e][j]);
				let gap = rest.saturating_add(base + profits[e][j]) - cost;
				debug_assert!(gap >= 0);
				let moved = unary - gap.min(MAX_COST);
				self.shift(actions, var, k, moved, true)?;
				self.add_delta(actions, var, k, moved);
				profits[e][j] = self.delta(actions, var, k);
			}
			actions.find_support(x)?;
		}
		self.project_lb(actions, cost)?;
		for (e, &j) in choice.iter().enumerate() {
			let a = &self.current[e];
			let r = &mut self.rows[a.row];
			r.opt.iter_mut().for_each(|o| *o = 0.0);
			r.opt[a.items[j]] = 1.0;
		}
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use crate::{cost_function::knapsack::dynamic::max_value, MAX_COST};

	#[test]
	fn test_max_value() {
		let weights = vec![vec![3, 0], vec![3, 0], vec![3, 0], vec![3, 0]];
		let profits = vec![vec![2, 0], vec![2, 0], vec![2, 0], vec![2, 0]];
		let (cost, choice) = max_value(&weights, &profits, 4);
		assert_eq!(cost, 4);
		assert_eq!(choice.iter().filter(|&&j| j == 0).count(), 2);

		assert_eq!(max_value(&weights, &profits, 0), (0, vec![1, 1, 1, 1]));
		assert_eq!(max_value(&weights, &profits, 13).0, MAX_COST);
		assert_eq!(max_value(&[], &[], 0).0, 0);
	}

	#[test]
	fn test_max_value_prefers_cheap_heavy_items() {
		let weights = vec![vec![0, 2, 5], vec![0, 4]];
		let profits = vec![vec![0, 1, 6], vec![0, 3]];
		// Weight 6 is reached by 2 + 4 for a cost of 4, or by 5 + 4 for 9.
		assert_eq!(max_value(&weights, &profits, 6), (4, vec![1, 1]));
	}
}
