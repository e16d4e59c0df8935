//! Evaluation of complete assignments, and the statistics that the search
//! engine queries from a [`KnapsackCostFunction`].

use crate::{
	actions::{InspectionActions, TrailingActions},
	cost_function::{
		knapsack::{KnapsackCostFunction, Role, RowKind},
		ConflictOrigin,
	},
	network::VarRef,
	Cost, Value, Weight, MAX_COST,
};

impl KnapsackCostFunction {
	/// The cost of a complete assignment `tuple` of the scope.
	///
	/// When the assignment does not reach the capacity, the upper bound is
	/// returned, unless a penalty proportional to the missing weight stays
	/// below it. An assignment that uses a removed value costs the upper bound.
	pub(super) fn evaluate<A: InspectionActions>(&self, actions: &A, tuple: &[Value]) -> Cost {
		let ub = actions.upper_bound();
		let mut weight: Weight = 0;
		let mut cost = self.assigned_deltas(actions) - self.lower_bound(actions);
		let mut selected = vec![0usize; self.groups.len()];
		for (i, &val) in tuple.iter().enumerate() {
			if actions.cannot_be(self.scope[i], val) {
				return ub;
			}
			match self.roles[i] {
				Role::Real(row) => {
					let r = &self.rows[row];
					let last = r.values.len() - 1;
					let item = r.values[..last].iter().position(|&v| v == val).unwrap_or(last);
					weight += r.weights[item];
					cost += self.delta(actions, i, item);
				}
				Role::Member { group, pos } => {
					let (_, lit) = self.groups[group].members[pos];
					if val == lit {
						selected[group] += 1;
						if selected[group] > 1 {
							return ub;
						}
						weight += self.rows[self.groups[group].row].weights[pos];
					}
					cost += self.delta(actions, i, val as usize);
				}
			}
		}
		for (g, _) in selected.iter().enumerate().filter(|&(_, &s)| s == 0) {
			let group = &self.groups[g];
			weight += self.rows[group.row].weights[group.members.len()];
		}
		if weight < self.original_capacity {
			let missing = self.original_capacity - weight;
			if self.original_ub < ub && (self.original_ub as f64) * (missing as f64) < ub as f64 {
				return self.original_ub * missing;
			}
			return ub;
		}
		debug_assert!(cost >= 0);
		cost.min(ub)
	}

	/// The largest cost that the cost function can return for an assignment
	/// that is not forbidden, or [`MAX_COST`] when this reaches the upper bound.
	pub(super) fn get_max_finite_cost<A: InspectionActions>(&self, actions: &A) -> Cost {
		let deltas: Cost = (0..self.scope.len())
			.map(|i| {
				(0..self.deltas[i].len())
					.map(|j| self.delta(actions, i, j))
					.max()
					.unwrap_or(0)
					.max(0)
			})
			.sum();
		let cost = deltas - self.lower_bound(actions) + self.assigned_deltas(actions);
		if cost >= actions.upper_bound() {
			MAX_COST
		} else {
			cost
		}
	}

	/// The ratio between the remaining capacity and the maximum weight.
	pub(super) fn compute_tightness<A: TrailingActions>(&self, actions: &A) -> f64 {
		let capacity = self.capacity(actions);
		let max_weight = self.max_weight(actions);
		if capacity <= 0 || max_weight <= 0 {
			0.0
		} else {
			capacity as f64 / max_weight as f64
		}
	}

	/// Record a conflict, attributing it to the variables that explain it.
	///
	/// A conflict raised by the cost function is blamed, in reverse DAC order,
	/// on the variables whose removed heavy values would have reached the
	/// capacity, or on the members that break an AMO group. A conflict raised
	/// by a cost function spawned from this one is blamed on the unassigned
	/// variables of its scope.
	pub(super) fn increase_conflict_weight<A: InspectionActions>(
		&mut self,
		actions: &mut A,
		origin: ConflictOrigin<'_>,
	) {
		match origin {
			ConflictOrigin::This => {
				if self.same_weight
					|| self.non_assigned(actions) == self.scope.len()
					|| !self.connected(actions)
				{
					self.conflict_weight += 1;
					return;
				}
				self.current_scope(actions);
				if self.verify(actions) {
					self.conflict_weight += 1;
					return;
				}
				self.blame_capacity(actions);
			}
			ConflictOrigin::Other(scope) => {
				if self.connected(actions) {
					return;
				}
				let blamed: Vec<usize> = scope
					.iter()
					.filter(|&&v| !actions.is_assigned(v))
					.filter_map(|v| self.scope.iter().position(|x| x == v))
					.collect();
				self.blame(blamed);
			}
		}
	}

	/// Blame the variables responsible for a failure to reach the capacity.
	fn blame_capacity<A: InspectionActions>(&mut self, actions: &A) {
		let mut available = Vec::with_capacity(self.rows.len());
		for row in 0..self.rows.len() {
			let r = &self.rows[row];
			let w = match r.kind {
				RowKind::Real(var) => {
					let x = self.scope[var];
					let last = r.values.len() - 1;
					let class = r.others.iter().any(|&v| actions.can_be(x, v));
					r.values
						.iter()
						.zip(&r.weights)
						.enumerate()
						.filter(|&(j, (&v, _))| if j == last { class } else { actions.can_be(x, v) })
						.map(|(_, (_, &w))| w)
						.max()
						.unwrap_or(0)
				}
				RowKind::Group(g) => {
					let members = &self.groups[g].members;
					let chosen: Vec<usize> = (0..members.len())
						.filter(|&k| {
							let (var, lit) = members[k];
							actions.value(self.scope[var]) == Some(lit)
						})
						.collect();
					if chosen.len() > 1 {
						let vars: Vec<usize> = chosen.iter().map(|&k| members[k].0).collect();
						self.blame(vars);
						return;
					}
					match chosen.first() {
						Some(&k) => r.weights[k],
						None => {
							let none = (!self.exhausted(actions, row)).then(|| r.weights[members.len()]);
							members
								.iter()
								.zip(&r.weights)
								.filter(|&(&(var, lit), _)| actions.can_be(self.scope[var], lit))
								.map(|(_, &w)| w)
								.chain(none)
								.max()
								.unwrap_or(0)
						}
					}
				}
			};
			available.push(w);
		}
		let mut sum: Weight = available.iter().sum();
		debug_assert!(sum < self.original_capacity);

		let anchor = |row: usize| -> VarRef {
			match self.rows[row].kind {
				RowKind::Real(var) => self.scope[var],
				RowKind::Group(g) => self.scope[self.groups[g].members[0].0],
			}
		};
		let mut order: Vec<usize> = (0..self.rows.len()).collect();
		order.sort_by_key(|&row| (std::cmp::Reverse(actions.dac_order(anchor(row))), row));
		let mut blamed = Vec::new();
		for row in order {
			let largest = self.rows[row].largest;
			if sum - available[row] + largest >= self.original_capacity {
				match self.rows[row].kind {
					RowKind::Real(var) => blamed.push(var),
					RowKind::Group(g) => blamed.extend(
						self.groups[g]
							.members
							.iter()
							.filter(|&&(var, _)| actions.is_assigned(self.scope[var]))
							.map(|&(var, _)| var),
					),
				}
			} else {
				sum += largest - available[row];
			}
		}
		self.blame(blamed);
	}

	/// The weight of every explicitly weighted value of each variable, relative
	/// to the weight of its catch-all class, as (index in the initial domain,
	/// weight) pairs.
	pub fn normalized_weights<A: InspectionActions>(&self, actions: &A) -> Vec<Vec<(usize, Weight)>> {
		(0..self.scope.len())
			.map(|i| {
				let x = self.scope[i];
				let (values, weights): (&[Value], &[Weight]) = match self.roles[i] {
					Role::Real(row) => (&self.rows[row].values[..], &self.rows[row].weights[..]),
					Role::Member { .. } => (&[0, 1][..], &self.original_weights[i][..]),
				};
				let last = weights.len() - 1;
				values[..last]
					.iter()
					.zip(weights)
					.filter_map(|(&v, &w)| actions.to_index(x, v).map(|idx| (idx, w - weights[last])))
					.collect()
			})
			.collect()
	}

	/// The capacity relative to the weights of the catch-all classes, see
	/// [`Self::normalized_weights`].
	pub fn normalized_capacity(&self) -> Weight {
		self.original_capacity - (0..self.scope.len()).map(|i| self.class_weight(i)).sum::<Weight>()
	}

	/// The weight of the catch-all class of the variable at `i`.
	pub(super) fn class_weight(&self, i: usize) -> Weight {
		match self.roles[i] {
			Role::Real(row) => self.rows[row].weights.last().copied().unwrap_or(0),
			Role::Member { .. } => self.original_weights[i][1],
		}
	}
}

#[cfg(test)]
mod tests {
	use rangelist::RangeList;

	use crate::{network::State, CostFunction, KnapsackBuilder, Network};

	#[test]
	fn test_evaluate_penalizes_missing_weight() {
		let mut net = Network::new(1000);
		let x = net.new_var("x", &RangeList::from_iter([0..=2]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let k = KnapsackBuilder::new(3)
			.with_var(x, [(1, 1), (2, 2)])
			.with_var(y, [(1, 1)])
			.build(net.state_mut())
			.unwrap();
		assert_eq!(k.eval(net.state(), &[2, 1]), 0);
		assert_eq!(k.eval(net.state(), &[1, 1]), 1000);
		assert_eq!(k.eval(net.state(), &[0, 0]), 1000);

		let mut k = k;
		CostFunction::<State>::set_infinite_cost(&mut k, 10);
		assert_eq!(k.eval(net.state(), &[1, 1]), 10);
		assert_eq!(k.eval(net.state(), &[0, 0]), 30);
	}

	#[test]
	fn test_evaluate_broken_group() {
		let mut net = Network::new(50);
		let vars: Vec<_> = (0..3)
			.map(|i| net.new_var(format!("b{i}"), &RangeList::from_iter([0..=1])))
			.collect();
		let mut builder = KnapsackBuilder::new(1);
		for &v in &vars {
			builder = builder.with_var(v, [(1, 1)]);
		}
		let k = builder
			.with_amo(vars.iter().map(|&v| (v, 1)).collect())
			.build(net.state_mut())
			.unwrap();
		assert_eq!(k.eval(net.state(), &[0, 1, 0]), 0);
		assert_eq!(k.eval(net.state(), &[1, 1, 0]), 50);
		assert_eq!(k.eval(net.state(), &[0, 0, 0]), 50);
	}

	#[test]
	fn test_normalized_weights() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=3]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let mut k = KnapsackBuilder::new(5)
			.with_var(x, [(0, 4), (1, 1), (2, 4), (3, 4)])
			.with_var(y, [(1, 2)])
			.build(net.state_mut())
			.unwrap();
		// The values of x weighing 4 form the catch-all class.
		assert_eq!(k.normalized_weights(net.state()), vec![vec![(1, -3)], vec![(1, 2)]]);
		assert_eq!(k.normalized_capacity(), 1);
		assert_eq!(k.tightness(net.state_mut()), 5.0 / 6.0);
		assert_eq!(k.max_finite_cost(net.state()), 0);
	}
}
