//! The linear relaxation of the knapsack: profits of the available items, the
//! convex hull of every active row, the greedy fractional optimum, and the
//! dual prices that certify its cost.

use crate::{
	actions::InspectionActions,
	cost_function::knapsack::{KnapsackCostFunction, Role, RowKind, Slope},
	network::VarRef,
	Cost, Value, Weight, MAX_COST,
};

#[derive(Clone, Debug, PartialEq)]
/// The dual solution of the relaxation.
pub(super) struct Duals {
	/// The price of one unit of capacity.
	capacity: f64,
	/// The dual of each active row, in the order of
	/// [`KnapsackCostFunction::current`].
	rows: Vec<RowDual>,
}

#[derive(Clone, Debug, PartialEq)]
/// The dual associated with an active row.
enum RowDual {
	/// The price of selecting any value of a variable.
	Real(f64),
	/// The prices of an AMO group.
	Group {
		/// The price of the clique constraint.
		clique: f64,
		/// The price of each member, indexed like the available items of the row.
		members: Vec<f64>,
	},
}

impl KnapsackCostFunction {
	/// The weight of `item` of `row` as used by the relaxation: the weights of
	/// variables are capped by the capacity.
	fn slope_weight(&self, row: usize, item: usize, capacity: Weight) -> Weight {
		let w = self.rows[row].weights[item];
		match self.rows[row].kind {
			RowKind::Real(_) => w.min(capacity),
			RowKind::Group(_) => w,
		}
	}

	/// Compute the profit of every available item of the active rows.
	///
	/// Returns whether the solution of the previous relaxation no longer has
	/// a zero cost, or no longer reaches the capacity, in which case the costs
	/// have to be shifted again.
	pub(super) fn compute_profit<A: InspectionActions>(&mut self, actions: &mut A) -> bool {
		let capacity = self.capacity(actions);
		let mut verif = self.assigned_deltas(actions) - self.lower_bound(actions);
		let mut reached: Weight = 0;
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			self.rows[row].class_cost = 0;
			match self.rows[row].kind {
				RowKind::Real(var) if self.rows[row].boolean => {
					let x = self.scope[var];
					for k in 0..2 {
						let v = self.rows[row].values[k];
						self.rows[row].profit[k] = actions.unary_cost(x, v) + self.delta(actions, var, k);
					}
					self.rows[row].class_cost = actions.unary_cost(x, self.rows[row].values[1]);
				}
				RowKind::Real(var) => self.real_profit(actions, e, var),
				RowKind::Group(g) => self.group_profit(actions, e, g),
			}
			let r = &self.rows[row];
			let (mut w, mut c) = (0.0, 0.0);
			for &k in &self.current[e].items {
				w += r.weights[k] as f64 * r.opt[k];
				c += r.profit[k] as f64 * r.opt[k];
			}
			verif += self.ceil(c);
			reached += self.ceil(w);
			debug_assert!(r.profit.iter().all(|&p| p < MAX_COST));
		}
		verif > 0 || reached < capacity
	}

	/// Compute the profits of the available items of a non-Boolean variable,
	/// and the cost of the cheapest value of its catch-all class.
	fn real_profit<A: InspectionActions>(&mut self, actions: &mut A, e: usize, var: usize) {
		let row = self.current[e].row;
		let x = self.scope[var];
		let last = self.rows[row].values.len() - 1;
		let mut zero_seen = false;
		for idx in 0..self.current[e].items.len() {
			let k = self.current[e].items[idx];
			let profit = if k == last {
				let rep = self.rows[row].values[last];
				let mut class_cost = 0;
				if zero_seen && !self.exhausted(actions, row) && actions.unary_cost(x, rep) > 0 {
					class_cost = MAX_COST;
					for &v in &self.rows[row].others {
						if !actions.can_be(x, v) {
							continue;
						}
						let u = actions.unary_cost(x, v);
						if u < class_cost {
							class_cost = u;
							if u == 0 {
								break;
							}
						}
					}
					if class_cost == 0 {
						if let Some(&v) = self.rows[row]
							.others
							.iter()
							.find(|&&v| actions.can_be(x, v) && actions.unary_cost(x, v) == 0)
						{
							self.rows[row].values[last] = v;
						}
					}
				}
				self.rows[row].class_cost = class_cost;
				class_cost + self.delta(actions, var, k)
			} else {
				let u = actions.unary_cost(x, self.rows[row].values[k]);
				zero_seen |= u == 0;
				u + self.delta(actions, var, k)
			};
			self.rows[row].profit[k] = profit;
		}
	}

	/// The cost of the Boolean value `val` of the member at `var`, including
	/// its delta.
	fn member_cost<A: InspectionActions>(&self, actions: &A, var: usize, val: Value) -> Cost {
		actions.unary_cost(self.scope[var], val) + self.delta(actions, var, val as usize)
	}

	/// Compute the profits of the available items of an AMO group: the cost of
	/// leaving every member unselected, adjusted for the selected member.
	fn group_profit<A: InspectionActions>(&mut self, actions: &mut A, e: usize, g: usize) {
		let row = self.current[e].row;
		let members = &self.groups[g].members;
		let base: Cost = members
			.iter()
			.filter(|&&(var, _)| !actions.is_assigned(self.scope[var]))
			.map(|&(var, lit)| self.member_cost(actions, var, 1 - lit))
			.sum();
		let profits: Vec<(usize, Cost)> = self.current[e]
			.items
			.iter()
			.map(|&k| match members.get(k) {
				Some(&(var, lit)) => (
					k,
					base + self.member_cost(actions, var, lit) - self.member_cost(actions, var, 1 - lit),
				),
				None => (k, base),
			})
			.collect();
		for (k, p) in profits {
			self.rows[row].profit[k] = p;
		}
	}

	/// Build the upper convex hull of the (weight, profit) points of every
	/// active row, and the solution that takes the lightest point of every
	/// hull.
	///
	/// The weight and profit of this solution are added to `weight` and
	/// `cost`.
	pub(super) fn compute_slopes<A: InspectionActions>(&mut self, actions: &A, weight: &mut Weight, cost: &mut Cost) {
		let capacity = self.capacity(actions);
		self.slopes.clear();
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			self.rows[row].opt.iter_mut().for_each(|o| *o = 0.0);
			let mut items = self.current[e].items.clone();
			let support = match self.rows[row].kind {
				RowKind::Real(var) => Some(actions.support(self.scope[var])),
				RowKind::Group(_) => None,
			};
			{
				let r = &self.rows[row];
				let key = |k: usize| self.slope_weight(row, k, capacity);
				let is_support = |k: usize| support == Some(r.values[k]);
				items.sort_by(|&a, &b| {
					key(a)
						.cmp(&key(b))
						.then_with(|| r.profit[b].cmp(&r.profit[a]))
						.then_with(|| is_support(b).cmp(&is_support(a)))
						.then(a.cmp(&b))
				});
			}

			let Some((&heaviest, lighter)) = items.split_last() else {
				continue;
			};
			let mut slopes = std::mem::take(&mut self.slopes);
			let profit = |k: usize| self.rows[row].profit[k];
			let w = |k: usize| self.slope_weight(row, k, capacity);
			let slope_of = |low: usize, high: usize| (profit(high) - profit(low)) as f64 / (w(high) - w(low)) as f64;
			let mut item1 = heaviest;
			for &k in lighter.iter().rev() {
				if profit(k) >= profit(item1) || w(k) >= w(item1) {
					continue;
				}
				let slope = slope_of(k, item1);
				match slopes.last_mut() {
					Some(last) if last.entry == e && last.slope < slope => {
						last.low = k;
						last.slope = slope_of(k, last.high);
						while slopes.len() > 1 {
							let n = slopes.len();
							if slopes[n - 2].entry != e || slopes[n - 1].slope < slopes[n - 2].slope {
								break;
							}
							let low = slopes[n - 1].low;
							let _ = slopes.pop();
							let prev = &mut slopes[n - 2];
							prev.low = low;
							prev.slope = slope_of(low, prev.high);
						}
					}
					_ => slopes.push(Slope {
						entry: e,
						low: k,
						high: item1,
						slope,
					}),
				}
				item1 = k;
			}
			let start = match slopes.last() {
				Some(s) if s.entry == e => s.low,
				_ => item1,
			};
			self.slopes = slopes;
			let r = &mut self.rows[row];
			r.opt[start] = 1.0;
			*weight += r.weights[start];
			*cost += r.profit[start];
		}
	}

	/// Sort the slopes by increasing profit per unit of weight.
	///
	/// Ties are broken by the weight of the lighter item (capped by the
	/// capacity when `capped` is set) within a row, and by the DAC order
	/// between rows.
	pub(super) fn sort_slopes<A: InspectionActions>(&mut self, actions: &A, capped: bool) {
		let capacity = self.capacity(actions);
		let mut slopes = std::mem::take(&mut self.slopes);
		let low_weight = |s: &Slope| {
			let w = self.rows[self.current[s.entry].row].weights[s.low];
			if capped {
				w.min(capacity)
			} else {
				w
			}
		};
		slopes.sort_by(|a, b| {
			a.slope
				.total_cmp(&b.slope)
				.then_with(|| {
					if a.entry == b.entry {
						low_weight(a).cmp(&low_weight(b))
					} else {
						self.anchor_order(actions, a.entry)
							.cmp(&self.anchor_order(actions, b.entry))
					}
				})
				.then((a.entry, a.low).cmp(&(b.entry, b.low)))
		});
		self.slopes = slopes;
	}

	/// The DAC order of the variable that represents the active row `entry`.
	pub(super) fn anchor_order<A: InspectionActions>(&self, actions: &A, entry: usize) -> usize {
		let var = match self.rows[self.current[entry].row].kind {
			RowKind::Real(var) => var,
			RowKind::Group(g) => self.groups[g].members[0].0,
		};
		actions.dac_order(self.scope[var])
	}

	/// Follow the sorted slopes, moving the solution to the heavier item of
	/// each slope, until the capacity is reached.
	///
	/// The last slope can be taken partially; the fraction taken is stored in
	/// `fraction`, and `iter` is left at its index.
	pub(super) fn find_opt(
		&mut self,
		capacity: Weight,
		weight: &mut Weight,
		cost: &mut Cost,
		fraction: &mut f64,
		iter: &mut usize,
	) {
		while *weight < capacity {
			let Some(&s) = self.slopes.get(*iter) else {
				break;
			};
			let row = self.current[s.entry].row;
			let dw = self.slope_weight(row, s.high, capacity) - self.slope_weight(row, s.low, capacity);
			let dp = self.rows[row].profit[s.high] - self.rows[row].profit[s.low];
			if *weight + dw >= capacity {
				*fraction = (capacity - *weight) as f64 / dw as f64;
				*cost += self.ceil(*fraction * dp as f64);
				let r = &mut self.rows[row];
				r.opt[s.high] = *fraction;
				r.opt[s.low] = 1.0 - *fraction;
			} else {
				debug_assert_eq!(self.rows[row].opt[s.low], 1.0);
				let r = &mut self.rows[row];
				r.opt[s.low] = 0.0;
				r.opt[s.high] = 1.0;
				*cost += dp;
				*iter += 1;
			}
			*weight += dw;
		}
	}

	/// The price of one unit of capacity in the optimum found by
	/// [`Self::find_opt`].
	pub(super) fn capacity_price(&self, iter: usize, fraction: f64) -> f64 {
		if fraction == 0.0 {
			return 0.0;
		}
		self.slopes.get(iter).map_or(0.0, |s| s.slope)
	}

	/// Compute the dual solution matching the optimum of the relaxation.
	pub(super) fn duals<A: InspectionActions>(&self, actions: &A, iter: usize, fraction: f64) -> Duals {
		let capacity = self.capacity(actions);
		let y_cc = self.capacity_price(iter, fraction);
		debug_assert!(y_cc >= 0.0);
		let priced = |var: usize, val: Value| {
			self.member_cost(actions, var, val) as f64
				- y_cc * self.original_weights[var][val as usize].min(capacity) as f64
		};
		let rows = self
			.current
			.iter()
			.map(|a| {
				let r = &self.rows[a.row];
				match r.kind {
					RowKind::Real(_) => {
						let y = a.items.iter().find(|&&k| r.opt[k] != 0.0).map_or(0.0, |&k| {
							r.profit[k] as f64 - y_cc * r.weights[k].min(capacity) as f64
						});
						RowDual::Real(y)
					}
					RowKind::Group(g) => {
						let members = &self.groups[g].members;
						let mut clique = 0.0_f64;
						let mut fractional = false;
						for &k in &a.items {
							let Some(&(var, lit)) = members.get(k) else {
								continue;
							};
							if r.opt[k] == 1.0 {
								continue;
							}
							let c = priced(var, lit) - priced(var, 1 - lit);
							if r.opt[k] > 0.0 {
								clique = clique.min(c);
								fractional = true;
							}
							if !fractional {
								clique = clique.min(c);
							}
						}
						let prices = a
							.items
							.iter()
							.map(|&k| match members.get(k) {
								Some(&(var, lit)) => priced(var, 1 - lit).min(priced(var, lit) - clique),
								None => 0.0,
							})
							.collect();
						RowDual::Group {
							clique,
							members: prices,
						}
					}
				}
			})
			.collect();
		Duals { capacity: y_cc, rows }
	}

	/// Update the deltas following the dual solution: the items of the optimum
	/// absorb their unary cost, the other items receive their reduced cost.
	///
	/// The cost moves are recorded, to be applied on the unary costs once the
	/// lower bound has been increased.
	pub(super) fn extension_projection<A: InspectionActions>(&mut self, actions: &mut A, duals: &Duals) {
		let capacity = self.capacity(actions);
		let y_cc = duals.capacity;
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			match (self.rows[row].kind, &duals.rows[e]) {
				(RowKind::Real(var), &RowDual::Real(y)) => {
					let x = self.scope[var];
					let last = self.rows[row].values.len() - 1;
					for idx in 0..self.current[e].items.len() {
						let k = self.current[e].items[idx];
						let r = &self.rows[row];
						let c = if r.opt[k] > 0.0 {
							let c = if k == last {
								r.class_cost
							} else {
								actions.unary_cost(x, r.values[k])
							};
							c.max(0)
						} else {
							let w = r.weights[k].min(capacity) as f64;
							self.ceil(-(self.delta(actions, var, k) as f64) + y + y_cc * w)
						};
						if c != 0 {
							self.add_delta(actions, var, k, c);
							self.record_move(var, k, c);
						}
					}
				}
				(RowKind::Group(g), RowDual::Group { clique, members }) => {
					for idx in 0..self.current[e].items.len() {
						let k = self.current[e].items[idx];
						let Some(&(var, lit)) = self.groups[g].members.get(k) else {
							continue;
						};
						let x = self.scope[var];
						let (on, off) = (lit as usize, 1 - lit as usize);
						let reduced = |i: usize, extra: f64| {
							let w = self.original_weights[var][i].min(capacity) as f64;
							self.ceil(-(self.delta(actions, var, i) as f64) + members[idx] + y_cc * w + extra)
						};
						let opt = self.rows[row].opt[k];
						let moves = if opt == 1.0 {
							[(on, actions.unary_cost(x, lit).max(0)), (off, reduced(off, 0.0))]
						} else if opt == 0.0 {
							[(off, actions.unary_cost(x, 1 - lit).max(0)), (on, reduced(on, *clique))]
						} else {
							[
								(on, actions.unary_cost(x, lit).max(0)),
								(off, actions.unary_cost(x, 1 - lit).max(0)),
							]
						};
						for (i, c) in moves {
							if c != 0 {
								self.add_delta(actions, var, i, c);
								self.record_move(var, i, c);
							}
						}
					}
				}
				_ => debug_assert!(false, "dual does not match the row"),
			}
		}
	}

	/// The price of one unit of capacity in the relaxation at the current
	/// node, which can be used to guide the search.
	pub fn get_lag<A: InspectionActions>(&mut self, actions: &mut A) -> f64 {
		self.current_scope(actions);
		let _ = self.compute_profit(actions);
		let capacity = self.capacity(actions);
		let mut weight = 0;
		let mut cost = self.assigned_deltas(actions) - self.lower_bound(actions);
		self.compute_slopes(actions, &mut weight, &mut cost);
		let mut iter = 0;
		let mut fraction = 0.0;
		if weight < capacity {
			self.sort_slopes(actions, false);
			self.find_opt(capacity, &mut weight, &mut cost, &mut fraction, &mut iter);
		}
		self.capacity_price(iter, fraction)
	}

	/// The weights and values of the variable at `var` when it has exactly two
	/// weighted items.
	fn binary_item(&self, var: usize) -> Option<([Value; 2], [Weight; 2])> {
		match self.roles[var] {
			Role::Real(row) if self.rows[row].boolean => {
				let r = &self.rows[row];
				Some(([r.values[0], r.values[1]], [r.weights[0], r.weights[1]]))
			}
			Role::Real(_) => None,
			Role::Member { .. } => Some(([0, 1], self.original_weights[var])),
		}
	}

	/// The unassigned two-valued variables of the scope, ordered by the cost
	/// of their second value per unit of weight gained.
	pub fn get_order<A: InspectionActions>(&self, actions: &A) -> Vec<VarRef> {
		let mut keyed: Vec<(f64, [Weight; 2], usize)> = (0..self.scope.len())
			.filter(|&i| !actions.is_assigned(self.scope[i]))
			.filter_map(|i| {
				let (values, weights) = self.binary_item(i)?;
				let x = self.scope[i];
				let (i0, i1) = match self.roles[i] {
					Role::Real(_) => (0, 1),
					Role::Member { .. } => (values[0] as usize, values[1] as usize),
				};
				let gain = actions.unary_cost(x, values[1]) - actions.unary_cost(x, values[0])
					+ self.delta(actions, i, i1)
					- self.delta(actions, i, i0);
				Some((gain as f64 / (weights[1] - weights[0]) as f64, weights, i))
			})
			.collect();
		keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
		keyed.into_iter().map(|(_, _, i)| self.scope[i]).collect()
	}

	/// Whether the supports of the variables (with the support of the variable
	/// at `index` replaced by the given value) form an assignment that reaches
	/// the capacity and has a zero cost in the cost function.
	pub fn check_eac_greedy_solution<A: InspectionActions>(
		&self,
		actions: &A,
		replace: Option<(usize, Value)>,
	) -> bool {
		let support = |i: usize| match replace {
			Some((index, val)) if index == i => val,
			_ => actions.support(self.scope[i]),
		};
		let mut weight: Weight = 0;
		let mut res = self.assigned_deltas(actions) - self.lower_bound(actions);
		for i in 0..self.scope.len() {
			let val = support(i);
			let idx = match self.roles[i] {
				Role::Real(row) => {
					let r = &self.rows[row];
					let last = r.values.len() - 1;
					let idx = r.values[..last].iter().position(|&v| v == val).unwrap_or(last);
					if self.has_groups() {
						weight += self.original_weights[i][idx];
					} else {
						weight += r.weights[idx];
					}
					idx
				}
				Role::Member { .. } => {
					weight += self.original_weights[i][val as usize];
					val as usize
				}
			};
			res += self.delta(actions, i, idx);
		}
		let broken = self.groups.iter().any(|g| {
			g.members
				.iter()
				.filter(|&&(var, lit)| support(var) == lit)
				.count() > 1
		});
		if weight < self.original_capacity || broken {
			return false;
		}
		res == 0
	}
}

#[cfg(test)]
mod tests {
	use rangelist::RangeList;

	use crate::{CostFunction, KnapsackBuilder, Network};

	#[test]
	fn test_hull_skips_dominated_item() {
		let mut net = Network::new(1000);
		let x = net.new_var("x", &RangeList::from_iter([0..=3]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		net.set_unary_cost(x, 0, 4).unwrap();
		net.set_unary_cost(x, 1, 3).unwrap();
		net.set_unary_cost(x, 2, 0).unwrap();
		net.set_unary_cost(x, 3, 0).unwrap();
		let mut k = KnapsackBuilder::new(6)
			.with_var(x, [(0, 0), (1, 2), (2, 4), (3, 6)])
			.with_var(y, [(1, 1)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		k.current_scope(net.state_mut());
		let _ = k.compute_profit(net.state_mut());
		let (mut w, mut c) = (0, 0);
		k.compute_slopes(net.state(), &mut w, &mut c);
		// Value 3 is as cheap as value 2 and heavier, so it dominates all other
		// values of x and no slope is left for it.
		assert!(k.slopes.iter().all(|s| s.entry != 0));
		assert_eq!(k.rows[0].opt, vec![0.0, 0.0, 0.0, 1.0]);
		assert_eq!(w, 7);
		assert_eq!(c, 0);
	}

	#[test]
	fn test_lag_of_fractional_optimum() {
		let mut net = Network::new(1000);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		net.set_unary_cost(x, 1, 4).unwrap();
		net.set_unary_cost(y, 1, 9).unwrap();
		let mut k = KnapsackBuilder::new(3)
			.with_var(x, [(1, 2)])
			.with_var(y, [(1, 3)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		// x gives 2 units for 4 (slope 2), y gives 3 for 9 (slope 3): the optimum
		// takes x fully and a third of y.
		assert_eq!(k.get_lag(net.state_mut()), 3.0);
		assert_eq!(k.get_order(net.state()), vec![x, y]);
	}

	#[test]
	fn test_greedy_solution_of_supports() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=2]));
		let mut k = KnapsackBuilder::new(2)
			.with_var(x, [(1, 1)])
			.with_var(y, [(1, 1), (2, 2)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		// Both supports are 0, which weighs nothing.
		assert!(!k.check_eac_greedy_solution(net.state(), None));
		assert!(!k.check_eac_greedy_solution(net.state(), Some((1, 1))));
		assert!(k.check_eac_greedy_solution(net.state(), Some((1, 2))));
	}

	#[test]
	fn test_greedy_solution_with_group() {
		let mut net = Network::new(100);
		let vars: Vec<_> = (0..3)
			.map(|i| net.new_var(format!("b{i}"), &RangeList::from_iter([0..=1])))
			.collect();
		let mut builder = KnapsackBuilder::new(1);
		for &v in &vars {
			builder = builder.with_var(v, [(1, 1)]);
		}
		let mut k = builder
			.with_amo(vars.iter().map(|&v| (v, 1)).collect())
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		assert!(!k.check_eac_greedy_solution(net.state(), None));
		assert!(k.check_eac_greedy_solution(net.state(), Some((2, 1))));
	}
}
