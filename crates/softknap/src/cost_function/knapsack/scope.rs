//! Maintenance of the active rows of a [`KnapsackCostFunction`] and of the
//! cached extreme weights of its rows.

use tracing::debug;

use crate::{
	actions::{InspectionActions, TrailingActions},
	cost_function::knapsack::{Active, Fixing, KnapsackCostFunction, Role, RowKind},
	Weight,
};

impl KnapsackCostFunction {
	/// Replace the representative of the catch-all class of `row` when it was
	/// removed, or mark the class as exhausted when no value is left.
	pub(super) fn refresh_class<A: InspectionActions>(&mut self, actions: &mut A, row: usize) {
		let RowKind::Real(var) = self.rows[row].kind else {
			return;
		};
		let x = self.scope[var];
		let r = &self.rows[row];
		if self.exhausted(actions, row) || r.values.last().is_some_and(|&v| actions.can_be(x, v)) {
			return;
		}
		match r.others.iter().copied().find(|&v| actions.can_be(x, v)) {
			Some(v) => {
				if let Some(last) = self.rows[row].values.last_mut() {
					*last = v;
				}
			}
			None => {
				let _ = actions.set_trailed_int(self.rows[row].exhausted, 1);
			}
		}
	}

	/// Recompute the largest available weight of every unassigned variable
	/// whose largest weight was removed.
	pub(super) fn update_greatest_weight<A: InspectionActions>(&mut self, actions: &mut A) {
		for row in 0..self.rows.len() {
			let RowKind::Real(var) = self.rows[row].kind else {
				continue;
			};
			let x = self.scope[var];
			let g = self.greatest(actions, row);
			if self.fixing(actions, var) != Fixing::Free || actions.can_be(x, self.rows[row].values[g]) {
				continue;
			}
			self.refresh_class(actions, row);
			let r = &self.rows[row];
			let mut best = self.lowest(actions, row);
			for (j, (&v, &w)) in r.values.iter().zip(&r.weights).enumerate() {
				if actions.can_be(x, v) && w > r.weights[best] {
					best = j;
				}
			}
			let diff = r.weights[best] - r.weights[g];
			let _ = actions.set_trailed_int(r.greatest, best as i64);
			Self::add_trailed(actions, self.max_weight, diff);
		}
	}

	/// Whether the variable at `var` still has to be taken into account as
	/// unassigned: it is not fixed and its available values do not all weigh
	/// the same.
	pub(super) fn is_unassigned<A: InspectionActions>(&mut self, actions: &mut A, var: usize) -> bool {
		let x = self.scope[var];
		let row = match self.roles[var] {
			Role::Member { .. } => return !actions.is_assigned(x),
			Role::Real(row) => row,
		};
		if self.fixing(actions, var) != Fixing::Free || actions.is_assigned(x) {
			return false;
		}
		if self.rows[row].boolean {
			return true;
		}
		self.refresh_class(actions, row);
		let r = &mut self.rows[row];
		if !actions.can_be(x, r.witness) {
			let explicit = &r.values[..r.values.len() - 1];
			match explicit.iter().copied().find(|&v| actions.can_be(x, v)) {
				Some(v) => r.witness = v,
				None => return false,
			}
		}
		true
	}

	/// Rebuild the list of rows that are still active, with their available
	/// entries, and refresh the cached extreme weights of these rows.
	pub(super) fn current_scope<A: InspectionActions>(&mut self, actions: &mut A) {
		let mut current = std::mem::take(&mut self.current);
		current.clear();
		for row in 0..self.rows.len() {
			let items = match self.rows[row].kind {
				RowKind::Real(var) => {
					if self.fixing(actions, var) != Fixing::Free {
						continue;
					}
					let x = self.scope[var];
					if self.rows[row].boolean && !actions.is_assigned(x) {
						current.push(Active {
							row,
							items: vec![0, 1],
						});
						continue;
					}
					self.refresh_class(actions, row);
					let exhausted = self.exhausted(actions, row);
					let r = &self.rows[row];
					let last = r.values.len() - 1;
					(0..r.values.len())
						.filter(|&j| (j < last || !exhausted) && actions.can_be(x, r.values[j]))
						.collect::<Vec<_>>()
				}
				RowKind::Group(g) => {
					if self.open(actions, g) < 1 {
						continue;
					}
					let mut items: Vec<usize> = self.groups[g]
						.members
						.iter()
						.enumerate()
						.filter(|&(_, &(var, _))| self.fixing(actions, var) == Fixing::Free)
						.map(|(j, _)| j)
						.collect();
					if items.is_empty() {
						continue;
					}
					if !self.exhausted(actions, row) {
						items.push(self.groups[g].members.len());
					}
					items
				}
			};
			self.refresh_extremes(actions, row, &items);
			if matches!(self.rows[row].kind, RowKind::Real(_)) || items.len() > 1 {
				current.push(Active { row, items });
			}
		}
		debug_assert_eq!(
			self.max_weight(actions),
			self.rows
				.iter()
				.enumerate()
				.filter(|&(row, _)| self.contributes(actions, row))
				.map(|(row, r)| r.weights[self.greatest(actions, row)])
				.sum::<Weight>(),
			"inconsistent maximum weight"
		);
		debug!(active = current.len(), "rebuild knapsack scope");
		self.current = current;
	}

	/// Whether `row` still contributes its largest weight to the maximum
	/// weight.
	fn contributes<A: InspectionActions>(&self, actions: &A, row: usize) -> bool {
		match self.rows[row].kind {
			RowKind::Real(var) => self.fixing(actions, var) == Fixing::Free,
			RowKind::Group(g) => self.open(actions, g) >= 1,
		}
	}

	/// Replace the cached largest and smallest weights of `row` when they are
	/// no longer among the available `items`.
	fn refresh_extremes<A: TrailingActions>(&self, actions: &mut A, row: usize, items: &[usize]) {
		let r = &self.rows[row];
		let group_none = match r.kind {
			RowKind::Group(g) => Some(self.groups[g].members.len()),
			RowKind::Real(_) => None,
		};
		let none_alive = !self.exhausted(actions, row);
		let ok = |idx: usize| items.contains(&idx) || (Some(idx) == group_none && none_alive);
		let mut g = self.greatest(actions, row);
		if !ok(g) {
			let old = r.weights[g];
			g = self.lowest(actions, row);
			let mut w = r.weights[g];
			for &j in items {
				if r.weights[j] >= w {
					w = r.weights[j];
					g = j;
				}
			}
			let _ = actions.set_trailed_int(r.greatest, g as i64);
			Self::add_trailed(actions, self.max_weight, r.weights[g] - old);
		}
		if !ok(self.lowest(actions, row)) {
			let mut low = g;
			let mut w = r.weights[g];
			for &j in items {
				if r.weights[j] <= w {
					w = r.weights[j];
					low = j;
				}
			}
			let _ = actions.set_trailed_int(r.lowest, low as i64);
		}
	}

	/// Whether the constraint is satisfied by every assignment of the
	/// remaining variables, updating whether the AMO groups are the only
	/// remaining restriction.
	pub(super) fn universal<A: TrailingActions>(&self, actions: &mut A) -> bool {
		let capacity = self.capacity(actions);
		if !self.has_groups() && capacity <= 0 {
			return true;
		}
		let min_weight: Weight = self
			.current
			.iter()
			.map(|a| self.rows[a.row].weights[self.lowest(actions, a.row)])
			.sum();
		let always = self.has_groups() && min_weight >= capacity;
		let _ = actions.set_trailed_int(self.always_satisfied, i64::from(always));
		if self.has_groups() && (0..self.groups.len()).any(|g| self.open(actions, g) > 1) {
			return false;
		}
		min_weight >= capacity
	}
}

#[cfg(test)]
mod tests {
	use rangelist::RangeList;

	use crate::{CostFunction, KnapsackBuilder, Network};

	#[test]
	fn test_max_weight_follows_removals() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=3]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let mut k = KnapsackBuilder::new(3)
			.with_var(x, [(1, 1), (2, 2), (3, 4)])
			.with_var(y, [(1, 2)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		assert_eq!(k.max_weight(net.state()), 6);

		net.new_level();
		net.remove(x, 3).unwrap();
		k.update_greatest_weight(net.state_mut());
		assert_eq!(k.max_weight(net.state()), 4);
		k.current_scope(net.state_mut());
		assert_eq!(k.current.len(), 2);
		assert_eq!(k.current[0].items, vec![0, 1, 3]);

		net.backtrack(0);
		assert_eq!(k.max_weight(net.state()), 6);
	}

	#[test]
	fn test_class_only_variable_is_fixed() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=4]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let mut k = KnapsackBuilder::new(2)
			.with_var(x, [(1, 1), (2, 2)])
			.with_var(y, [(1, 1)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		assert!(k.is_unassigned(net.state_mut(), 0));

		net.new_level();
		net.remove(x, 1).unwrap();
		assert!(k.is_unassigned(net.state_mut(), 0));
		net.remove(x, 0).unwrap();
		net.remove(x, 2).unwrap();
		// Values 3 and 4 are left, which both belong to the catch-all class.
		assert!(!k.is_unassigned(net.state_mut(), 0));
		assert!(k.is_unassigned(net.state_mut(), 1));

		net.backtrack(0);
		assert!(k.is_unassigned(net.state_mut(), 0));
	}

	#[test]
	fn test_universal_capacity() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let mut k = KnapsackBuilder::new(1)
			.with_var(x, [(0, 1), (1, 3)])
			.with_var(y, [(0, 0), (1, 2)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		// Every assignment weighs at least 1.
		assert!(!k.is_connected(net.state()));
	}
}
