//! Bound consistency on the weights, and the redistribution of the deltas
//! that cannot contribute to an optimal assignment.

use tracing::trace;

use crate::{
	actions::PropagationActions,
	cost_function::{
		knapsack::{Fixing, KnapsackCostFunction, RowKind},
		Conflict,
	},
	Cost,
};

impl KnapsackCostFunction {
	/// Remove the entries of the active rows that cannot be part of any
	/// assignment reaching the capacity.
	///
	/// Returns `true` as soon as the propagation has to be restarted, because a
	/// removal changed the weights that the other rows rely on.
	pub(super) fn bound_consistency<A: PropagationActions>(&mut self, actions: &mut A) -> Result<bool, Conflict> {
		let capacity = self.capacity(actions);
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			let spare = self.max_weight(actions) - self.rows[row].weights[self.greatest(actions, row)];
			if spare + self.rows[row].weights[self.lowest(actions, row)] >= capacity {
				continue;
			}
			for k in 0..self.current[e].items.len() {
				let item = self.current[e].items[k];
				if spare + self.rows[row].weights[item] >= capacity {
					continue;
				}
				let mut restart = false;
				match self.rows[row].kind {
					RowKind::Real(var) => {
						let x = self.scope[var];
						let r = &self.rows[row];
						trace!(var = x.index(), item, "knapsack removes light item");
						if item == r.values.len() - 1 {
							for &v in &r.others {
								if actions.can_be(x, v) {
									actions.remove(x, v)?;
								}
							}
						} else {
							actions.remove(x, r.values[item])?;
						}
						restart = item == self.lowest(actions, row);
					}
					RowKind::Group(g) => {
						let members = &self.groups[g].members;
						if item == members.len() {
							let _ = actions.set_trailed_int(self.rows[row].exhausted, 1);
							if self.open(actions, g) == 1 {
								let (var, lit) = members[self.current[e].items[0]];
								let x = self.scope[var];
								if actions.can_be(x, 1 - lit) {
									actions.remove(x, 1 - lit)?;
								}
								restart = true;
							}
						} else {
							let (var, lit) = members[item];
							let x = self.scope[var];
							if actions.can_be(x, lit) {
								actions.remove(x, lit)?;
							}
							restart = true;
						}
					}
				}
				if !restart {
					restart = !self.connected(actions)
						|| match self.rows[row].kind {
							RowKind::Real(var) => !self.is_unassigned(actions, var),
							RowKind::Group(_) => true,
						};
				}
				if restart {
					return Ok(true);
				}
			}
		}
		Ok(false)
	}

	/// Lower the deltas that exceed what any assignment of minimal delta would
	/// pay on top of the local lower bound, recording the cost moves.
	pub(super) fn obj_consistency<A: PropagationActions>(&mut self, actions: &mut A) {
		let target = self.lower_bound(actions) - self.assigned_deltas(actions);
		if self.has_groups() {
			let free: Vec<usize> = (0..self.scope.len())
				.filter(|&j| self.fixing(actions, j) == Fixing::Free)
				.collect();
			let min_idx: Vec<usize> = free
				.iter()
				.map(|&j| usize::from(self.delta(actions, j, 0) > self.delta(actions, j, 1)))
				.collect();
			let sum_min: Cost = free
				.iter()
				.zip(&min_idx)
				.map(|(&j, &m)| self.delta(actions, j, m))
				.sum();
			for (&j, &m) in free.iter().zip(&min_idx) {
				let excess = sum_min - self.delta(actions, j, m) + self.delta(actions, j, 1 - m) - target;
				if excess > 0 {
					self.add_delta(actions, j, 1 - m, -excess);
					self.record_move(j, 1 - m, -excess);
				}
			}
			return;
		}

		let sum_min: Cost = self
			.current
			.iter()
			.filter_map(|a| match self.rows[a.row].kind {
				RowKind::Real(var) => Some(self.delta(actions, var, self.lowest(actions, a.row))),
				RowKind::Group(_) => None,
			})
			.sum();
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			let RowKind::Real(var) = self.rows[row].kind else {
				continue;
			};
			let (low, great) = (self.lowest(actions, row), self.greatest(actions, row));
			if sum_min - self.delta(actions, var, low) + self.delta(actions, var, great) <= target {
				continue;
			}
			for k in 0..self.current[e].items.len() {
				let item = self.current[e].items[k];
				let excess = sum_min - self.delta(actions, var, low) + self.delta(actions, var, item) - target;
				if excess > 0 {
					self.add_delta(actions, var, item, -excess);
					self.record_move(var, item, -excess);
				}
			}
		}
	}
}
