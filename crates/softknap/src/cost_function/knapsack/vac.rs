//! Support for the passes of virtual arc consistency (VAC) run by the search
//! engine.
//!
//! During a VAC iteration, the engine removes values from a virtual copy of the
//! domains, which the cost function observes through
//! [`InspectionActions::can_be`]. The cost function records the iteration at
//! which every item became unavailable, so that the second pass can explain a
//! removal by the items that were removed before it. The passes are only
//! supported by knapsack cost functions without AMO groups: for the others
//! they never filter, and never move costs.

use tracing::debug;

use crate::{
	actions::{InspectionActions, PropagationActions},
	cost_function::{
		knapsack::{Active, Fixing, KnapsackCostFunction, RowKind},
		Conflict,
	},
	network::VarRef,
	Cost, Value, Weight,
};

#[derive(Clone, Debug, Default)]
/// Bookkeeping of the VAC passes.
pub(super) struct VacState {
	/// For every variable and item: `-1` when the item was unavailable when
	/// VAC started, `0` while it is available, and otherwise the iteration at
	/// which it was removed.
	deleted: Vec<Vec<i64>>,
	/// The current iteration.
	iteration: i64,
	/// Quanta of cost requested from the cost function as a whole.
	k_constraint: i64,
	/// Quanta of cost requested for every variable and item, with the time
	/// stamp of the request.
	quanta: Vec<Vec<(i64, u64)>>,
	/// Whether the third pass already extended a cost to the catch-all class
	/// of every variable.
	ext_to_last: Vec<bool>,
	/// Whether every value of the catch-all class of every variable was tested
	/// by the second pass.
	last_checked: Vec<Vec<bool>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// An elementary cost transfer between a unary cost function and the knapsack
/// cost function, which the engine replays on its unary costs.
///
/// A positive cost was extended from the unary cost of `val` to the knapsack;
/// a negative cost was projected back onto it.
pub struct VacMove {
	/// The variable.
	pub var: VarRef,
	/// The value of the variable.
	pub val: Value,
	/// The transferred cost.
	pub cost: Cost,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The result of [`KnapsackCostFunction::vac_pass1`].
pub enum VacOutcome {
	/// The available values cannot reach the capacity.
	Infeasible {
		/// The removed values whose restoration alone would reach the capacity.
		killers: Vec<(VarRef, Value)>,
	},
	/// The relaxation of the cost function reaches the threshold.
	Bound {
		/// The cost of the relaxation.
		cost: Cost,
		/// The removed values that support the cost.
		killers: Vec<(VarRef, Value)>,
	},
	/// The cost function removes values.
	Filtered {
		/// The iteration at which the values were removed.
		iteration: i64,
		/// The removed values.
		killed: Vec<(VarRef, Value)>,
	},
}

impl KnapsackCostFunction {
	/// The position in the scope of `var`.
	fn scope_position(&self, var: VarRef) -> Option<usize> {
		self.scope.iter().position(|&x| x == var)
	}

	/// The item of the variable at `var` that represents `val`.
	fn vac_item(&self, var: usize, val: Value) -> Option<usize> {
		let r = &self.rows[self.real_row(var)?];
		let last = r.values.len() - 1;
		r.values[..last]
			.iter()
			.position(|&v| v == val)
			.or_else(|| r.others.contains(&val).then_some(last))
	}

	/// Whether item `item` of `row`, the row of the variable at `var`, has an
	/// available value.
	fn vac_available<A: InspectionActions>(&self, actions: &A, var: usize, row: usize, item: usize) -> bool {
		let x = self.scope[var];
		let r = &self.rows[row];
		if item == r.values.len() - 1 {
			r.others.iter().any(|&v| actions.can_be(x, v))
		} else {
			actions.can_be(x, r.values[item])
		}
	}

	/// The values represented by `item` of `row`, possibly only the available
	/// ones.
	fn item_values<A: InspectionActions>(
		&self,
		actions: &A,
		var: usize,
		row: usize,
		item: usize,
		available: bool,
	) -> Vec<(VarRef, Value)> {
		let x = self.scope[var];
		let r = &self.rows[row];
		if item == r.values.len() - 1 {
			r.others
				.iter()
				.filter(|&&v| !available || actions.can_be(x, v))
				.map(|&v| (x, v))
				.collect()
		} else {
			vec![(x, r.values[item])]
		}
	}

	/// The VAC status of `item` of the variable at `var`.
	fn vac_deleted(&self, var: usize, item: usize) -> i64 {
		self.vac
			.deleted
			.get(var)
			.and_then(|d| d.get(item))
			.copied()
			.unwrap_or(0)
	}

	/// Mark `item` of the variable at `var` as removed at `iteration`.
	fn set_vac_deleted(&mut self, var: usize, item: usize, iteration: i64) {
		if let Some(d) = self.vac.deleted.get_mut(var).and_then(|d| d.get_mut(item)) {
			*d = iteration;
		}
	}

	/// Fill the active rows with the unassigned variables, excluding
	/// `excluded`, and set the profits used by the VAC relaxation: the delta of
	/// every available item, and the delta plus `lambda` for every item
	/// considered `removed`.
	///
	/// Returns the largest available weight of every row, and their sum.
	fn vac_view<A: InspectionActions>(
		&mut self,
		actions: &A,
		lambda: Cost,
		excluded: Option<usize>,
		removed: impl Fn(i64) -> bool,
	) -> (Vec<Weight>, Weight) {
		self.current.clear();
		let mut great = vec![0; self.rows.len()];
		let mut max_weight = 0;
		for row in 0..self.rows.len() {
			let RowKind::Real(var) = self.rows[row].kind else {
				continue;
			};
			if excluded == Some(var) || self.fixing(actions, var) != Fixing::Free {
				continue;
			}
			let mut items = Vec::new();
			let mut best: Option<Weight> = None;
			for k in 0..self.rows[row].values.len() {
				let delta = self.delta(actions, var, k);
				let profit = if removed(self.vac_deleted(var, k)) {
					delta + lambda
				} else if self.vac_available(actions, var, row, k) {
					let w = self.rows[row].weights[k];
					best = Some(best.map_or(w, |b| b.max(w)));
					delta
				} else {
					continue;
				};
				self.rows[row].profit[k] = profit;
				items.push(k);
			}
			great[row] = best.unwrap_or(0);
			max_weight += great[row];
			self.current.push(Active { row, items });
		}
		(great, max_weight)
	}

	/// The removed values that explain why the capacity cannot be reached:
	/// the heavy values that would reach it on their own, after the lighter
	/// ones were given back.
	fn vac_explain<A: InspectionActions>(
		&self,
		actions: &A,
		mut great: Vec<Weight>,
		mut max_weight: Weight,
		capacity: Weight,
	) -> Vec<(VarRef, Value)> {
		let mut killers = Vec::new();
		for a in &self.current {
			let RowKind::Real(var) = self.rows[a.row].kind else {
				continue;
			};
			for &k in &a.items {
				let w = self.rows[a.row].weights[k];
				if w <= great[a.row] {
					continue;
				}
				if max_weight + w - great[a.row] >= capacity {
					killers.extend(self.item_values(actions, var, a.row, k, false));
				} else {
					max_weight += w - great[a.row];
					great[a.row] = w;
				}
			}
		}
		killers
	}

	/// Solve the relaxation over the active rows, starting from `weight` and
	/// `cost`.
	///
	/// Returns its cost, the price of a unit of capacity, and the dual value
	/// of every active row.
	fn vac_relaxation<A: InspectionActions>(&mut self, actions: &A, weight: Weight, cost: Cost) -> (Cost, f64, Vec<f64>) {
		let capacity = self.capacity(actions);
		let (mut weight, mut cost) = (weight, cost);
		self.compute_slopes(actions, &mut weight, &mut cost);
		let (mut iter, mut fraction) = (0, 0.0);
		if weight < capacity {
			self.sort_slopes(actions, true);
			self.find_opt(capacity, &mut weight, &mut cost, &mut fraction, &mut iter);
		}
		let y_cc = self.capacity_price(iter, fraction);
		let prices = self
			.current
			.iter()
			.map(|a| {
				let r = &self.rows[a.row];
				a.items
					.iter()
					.find(|&&k| r.opt[k] != 0.0)
					.map_or(0.0, |&k| r.profit[k] as f64 - y_cc * r.weights[k].min(capacity) as f64)
			})
			.collect();
		(cost, y_cc, prices)
	}

	/// The cost that can be extended to `item` of the variable at `var` while
	/// keeping the dual solution feasible.
	fn vac_reduced<A: InspectionActions>(&self, actions: &A, var: usize, row: usize, item: usize, y_i: f64, y_cc: f64) -> Cost {
		let w = self.rows[row].weights[item].min(self.capacity(actions));
		self.ceil(-(self.delta(actions, var, item) as f64) + y_i + y_cc * w as f64)
	}

	/// Prepare the cost function for a VAC run: every currently unavailable
	/// item is marked as removed before the run.
	pub fn init_vac<A: InspectionActions>(&mut self, actions: &A) {
		let n = self.scope.len();
		let mut deleted = vec![Vec::new(); n];
		let mut quanta = vec![Vec::new(); n];
		let mut last_checked = vec![Vec::new(); n];
		for var in 0..n {
			let Some(row) = self.real_row(var) else {
				continue;
			};
			let len = self.rows[row].values.len();
			deleted[var] = (0..len)
				.map(|k| if self.vac_available(actions, var, row, k) { 0 } else { -1 })
				.collect();
			quanta[var] = vec![(0, 0); len];
			last_checked[var] = vec![false; self.rows[row].others.len()];
		}
		self.vac = VacState {
			deleted,
			iteration: 0,
			k_constraint: 0,
			quanta,
			ext_to_last: vec![false; n],
			last_checked,
		};
	}

	/// Start a new iteration, and record the items that became unavailable
	/// since the previous one.
	///
	/// Returns whether any did, in which case the cost function should run the
	/// first pass again.
	pub fn vac_need_propagate<A: InspectionActions>(&mut self, actions: &A) -> bool {
		self.vac.iteration += 1;
		let iteration = self.vac.iteration;
		let mut changed = false;
		for var in 0..self.scope.len() {
			let Some(row) = self.real_row(var) else {
				continue;
			};
			if self.fixing(actions, var) != Fixing::Free {
				continue;
			}
			for k in 0..self.rows[row].values.len() {
				if self.vac_deleted(var, k) == 0 && !self.vac_available(actions, var, row, k) {
					self.set_vac_deleted(var, k, iteration);
					changed = true;
				}
			}
		}
		changed
	}

	/// First VAC pass: detect the infeasibility of the virtual domains, or
	/// remove the values whose cost in the relaxation, where every removed
	/// value is penalized by `lambda`, would reach `threshold`.
	#[tracing::instrument(name = "knapsack_vac_pass1", level = "trace", skip(self, actions))]
	pub fn vac_pass1<A: InspectionActions>(&mut self, actions: &mut A, lambda: Cost, threshold: Cost) -> VacOutcome {
		if self.has_groups() {
			return VacOutcome::Filtered {
				iteration: self.vac.iteration,
				killed: Vec::new(),
			};
		}
		let capacity = self.capacity(actions);
		for var in 0..self.scope.len() {
			let Some(row) = self.real_row(var) else {
				continue;
			};
			for k in 0..self.rows[row].values.len() {
				if self.vac_deleted(var, k) == 0 && !self.vac_available(actions, var, row, k) {
					self.set_vac_deleted(var, k, self.vac.iteration);
				}
			}
		}
		let (great, max_weight) = self.vac_view(actions, lambda, None, |d| d > 0);
		if max_weight < capacity {
			let killers = self.vac_explain(actions, great, max_weight, capacity);
			debug!(killers = killers.len(), "knapsack infeasible in VAC pass 1");
			return VacOutcome::Infeasible { killers };
		}

		self.vac.iteration += 1;
		let iteration = self.vac.iteration;
		let mut killed = Vec::new();
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			let RowKind::Real(var) = self.rows[row].kind else {
				continue;
			};
			for idx in 0..self.current[e].items.len() {
				let k = self.current[e].items[idx];
				let w = self.rows[row].weights[k];
				if self.vac_deleted(var, k) == 0 && max_weight - great[row] + w < capacity {
					killed.extend(self.item_values(actions, var, row, k, true));
					self.set_vac_deleted(var, k, iteration);
				}
			}
		}

		let base = self.assigned_deltas(actions) - self.lower_bound(actions);
		let (cost, y_cc, prices) = self.vac_relaxation(actions, 0, base);
		if cost >= threshold {
			let mut killers = Vec::new();
			for (e, &y_i) in prices.iter().enumerate() {
				let row = self.current[e].row;
				let RowKind::Real(var) = self.rows[row].kind else {
					continue;
				};
				for &k in &self.current[e].items {
					if self.vac_available(actions, var, row, k) {
						continue;
					}
					if self.rows[row].opt[k] != 0.0 || self.vac_reduced(actions, var, row, k, y_i, y_cc) > 0 {
						killers.extend(self.item_values(actions, var, row, k, false));
					}
				}
			}
			debug!(cost, killers = killers.len(), "knapsack bound in VAC pass 1");
			return VacOutcome::Bound { cost, killers };
		}

		for (e, &y_i) in prices.iter().enumerate() {
			let row = self.current[e].row;
			let RowKind::Real(var) = self.rows[row].kind else {
				continue;
			};
			for idx in 0..self.current[e].items.len() {
				let k = self.current[e].items[idx];
				if self.rows[row].opt[k] != 0.0
					|| self.vac_deleted(var, k) != 0
					|| !self.vac_available(actions, var, row, k)
				{
					continue;
				}
				if self.vac_reduced(actions, var, row, k, y_i, y_cc) <= cost - threshold {
					killed.extend(self.item_values(actions, var, row, k, true));
					self.set_vac_deleted(var, k, iteration);
				}
			}
		}
		debug!(iteration, killed = killed.len(), "knapsack filtering in VAC pass 1");
		VacOutcome::Filtered { iteration, killed }
	}

	/// Second VAC pass: explain the removal of `tested` at iteration
	/// `curr_ite` by the values removed before it.
	///
	/// Returns the number of quanta of cost the removal requires, with the
	/// removed values that support it. A removal that the cost function
	/// cannot explain by the relaxation requires `kia` times `lambda`.
	#[tracing::instrument(name = "knapsack_vac_pass2", level = "trace", skip(self, actions))]
	pub fn vac_pass2<A: InspectionActions>(
		&mut self,
		actions: &mut A,
		curr_ite: i64,
		tested: (VarRef, Value),
		lambda: Cost,
		kia: Cost,
	) -> (Cost, Vec<(VarRef, Value)>) {
		let fallback = kia.saturating_mul(lambda);
		if self.has_groups() {
			return (fallback, Vec::new());
		}
		let (x, val) = tested;
		let Some((var, item)) = self
			.scope_position(x)
			.and_then(|var| Some((var, self.vac_item(var, val)?)))
		else {
			return (fallback, Vec::new());
		};
		let Some(row) = self.real_row(var) else {
			return (fallback, Vec::new());
		};
		if self.is_class(var, item) {
			let pos = self.rows[row].others.iter().position(|&v| v == val);
			if let Some(c) = pos.and_then(|p| self.vac.last_checked.get_mut(var)?.get_mut(p)) {
				*c = true;
			}
		}

		let capacity = self.capacity(actions);
		let removed = move |d: i64| d != 0 && d < curr_ite;
		let tested_weight = self.rows[row].weights[item];
		let (great, max_weight) = self.vac_view(actions, lambda, Some(var), removed);
		let max_weight = max_weight + tested_weight;
		if max_weight < capacity {
			return (fallback, self.vac_explain(actions, great, max_weight, capacity));
		}

		let base = self.assigned_deltas(actions) - self.lower_bound(actions) + self.delta(actions, var, item);
		let (cost, y_cc, prices) = self.vac_relaxation(actions, tested_weight, base);
		if cost <= 0 {
			return (0, Vec::new());
		}
		let mut killers = Vec::new();
		for (e, &y_i) in prices.iter().enumerate() {
			let row = self.current[e].row;
			let RowKind::Real(other) = self.rows[row].kind else {
				continue;
			};
			for &k in &self.current[e].items {
				if !removed(self.vac_deleted(other, k)) {
					continue;
				}
				if self.rows[row].opt[k] != 0.0 || self.vac_reduced(actions, other, row, k, y_i, y_cc) > 0 {
					killers.extend(self.item_values(actions, other, row, k, false));
				}
			}
		}
		(cost, killers)
	}

	/// Third VAC pass: move costs so that the lower bound increases.
	///
	/// When the relaxation is worth more than `min_lambda`, its whole cost is
	/// projected, otherwise `min_lambda` is extended from each of the `killers`
	/// that is still available. Returns the transfers that the engine has to
	/// replay on its unary costs; the projection onto the lower bound is
	/// already committed.
	#[tracing::instrument(name = "knapsack_vac_pass3", level = "trace", skip(self, actions, killers))]
	pub fn vac_pass3<A: PropagationActions>(
		&mut self,
		actions: &mut A,
		min_lambda: Cost,
		killers: &[(VarRef, Value)],
	) -> Result<Vec<VacMove>, Conflict> {
		let mut moves = Vec::new();
		if self.has_groups() || !self.connected(actions) {
			return Ok(moves);
		}
		self.current_scope(actions);
		let _ = self.compute_profit(actions);
		let base = self.assigned_deltas(actions) - self.lower_bound(actions);
		let (cost, y_cc, prices) = self.vac_relaxation(actions, 0, base);

		if cost > min_lambda {
			for (e, &y_i) in prices.iter().enumerate() {
				let row = self.current[e].row;
				let RowKind::Real(var) = self.rows[row].kind else {
					continue;
				};
				for idx in 0..self.current[e].items.len() {
					let k = self.current[e].items[idx];
					let c = if self.rows[row].opt[k] != 0.0 {
						let unary = if self.is_class(var, k) {
							self.rows[row].class_cost
						} else {
							actions.unary_cost(self.scope[var], self.rows[row].values[k])
						};
						unary.max(0)
					} else {
						self.vac_reduced(actions, var, row, k, y_i, y_cc)
					};
					if c == 0 {
						continue;
					}
					moves.extend(
						self.item_values(actions, var, row, k, true)
							.into_iter()
							.map(|(var, val)| VacMove { var, val, cost: c }),
					);
					self.add_delta(actions, var, k, c);
				}
			}
			self.project_lb(actions, cost)?;
		} else {
			for &(x, val) in killers {
				let Some((var, k)) = self
					.scope_position(x)
					.and_then(|var| Some((var, self.vac_item(var, val)?)))
				else {
					continue;
				};
				if !actions.can_be(x, val) {
					continue;
				}
				moves.push(VacMove {
					var: x,
					val,
					cost: min_lambda,
				});
				if !self.is_class(var, k) {
					self.add_delta(actions, var, k, min_lambda);
				} else if let Some(done) = self.vac.ext_to_last.get_mut(var).filter(|d| !**d) {
					*done = true;
					self.add_delta(actions, var, k, min_lambda);
				}
			}
			self.project_lb(actions, min_lambda)?;
		}
		debug!(cost, moves = moves.len(), "knapsack VAC pass 3");
		Ok(moves)
	}

	/// The values whose cost changes when a cost is extended to `val`: the
	/// value itself, or every available value of the catch-all class that
	/// contains it.
	pub fn was_last_value<A: InspectionActions>(&self, actions: &A, var: VarRef, val: Value) -> Vec<Value> {
		let Some((i, k)) = self
			.scope_position(var)
			.and_then(|i| Some((i, self.vac_item(i, val)?)))
		else {
			return vec![val];
		};
		match self.real_row(i) {
			Some(row) if self.is_class(i, k) => self
				.item_values(actions, i, row, k, true)
				.into_iter()
				.map(|(_, v)| v)
				.collect(),
			_ => vec![val],
		}
	}

	/// Whether `val`, a value of the catch-all class of `var`, was tested by
	/// the second pass since the last reset.
	pub fn vac_last_val_checked(&self, var: VarRef, val: Value) -> bool {
		let Some(i) = self.scope_position(var) else {
			return false;
		};
		let Some(row) = self.real_row(i) else {
			return false;
		};
		self.rows[row]
			.others
			.iter()
			.position(|&v| v == val)
			.and_then(|p| self.vac.last_checked.get(i)?.get(p))
			.copied()
			.unwrap_or(false)
	}

	/// Forget which values of the catch-all classes were tested.
	pub fn reset_vac_last_val_tested(&mut self) {
		self.vac
			.last_checked
			.iter_mut()
			.for_each(|c| c.iter_mut().for_each(|b| *b = false));
	}

	/// Forget which catch-all classes received a cost in the third pass.
	pub fn reset_vac_group_ext(&mut self) {
		self.vac.ext_to_last.iter_mut().for_each(|b| *b = false);
	}

	/// The quanta of cost requested for `val` of `var`, if they were
	/// requested at `timestamp` or later.
	pub fn k_vac(&self, var: VarRef, val: Value, timestamp: u64) -> i64 {
		self.scope_position(var)
			.and_then(|i| self.vac.quanta.get(i)?.get(self.vac_item(i, val)?))
			.filter(|&&(_, stamp)| stamp >= timestamp)
			.map_or(0, |&(k, _)| k)
	}

	/// Record the quanta of cost requested for `val` of `var` at `timestamp`.
	pub fn set_k_vac(&mut self, var: VarRef, val: Value, quanta: i64, timestamp: u64) {
		let Some((i, k)) = self
			.scope_position(var)
			.and_then(|i| Some((i, self.vac_item(i, val)?)))
		else {
			return;
		};
		if let Some(q) = self.vac.quanta.get_mut(i).and_then(|q| q.get_mut(k)) {
			*q = (quanta, timestamp);
		}
	}

	/// The quanta of cost requested from the cost function as a whole.
	pub fn k_constraint_vac(&self) -> i64 {
		self.vac.k_constraint
	}

	/// Request `quanta` more quanta of cost from the cost function as a whole.
	pub fn increase_k_constraint_vac(&mut self, quanta: i64) {
		self.vac.k_constraint += quanta;
	}

	/// Extend `cost` from the unary cost of `val` of `var` to the cost function.
	///
	/// Returns the values whose unary cost the engine has to decrease.
	pub fn vac_extend<A: InspectionActions>(&mut self, actions: &mut A, var: VarRef, val: Value, cost: Cost) -> Vec<Value> {
		let Some((i, k)) = self
			.scope_position(var)
			.and_then(|i| Some((i, self.vac_item(i, val)?)))
		else {
			return Vec::new();
		};
		self.add_delta(actions, i, k, cost);
		self.was_last_value(actions, var, val)
	}

	/// Project `cost` from the cost function to the unary cost of `val` of
	/// `var`.
	pub fn vac_project<A: InspectionActions>(&mut self, actions: &mut A, var: VarRef, val: Value, cost: Cost) {
		if let Some((i, k)) = self
			.scope_position(var)
			.and_then(|i| Some((i, self.vac_item(i, val)?)))
		{
			self.add_delta(actions, i, k, -cost);
		}
	}
}

#[cfg(test)]
mod tests {
	use rangelist::RangeList;

	use crate::{
		actions::PropagationActions,
		cost_function::knapsack::{VacMove, VacOutcome},
		CostFunction, KnapsackBuilder, Network,
	};

	#[test]
	fn test_vac_pass1_infeasible() {
		let mut net = Network::new(100);
		let vars: Vec<_> = ["x", "y", "z"]
			.iter()
			.map(|&n| net.new_var(n, &RangeList::from_iter([0..=1])))
			.collect();
		let mut k = KnapsackBuilder::new(6)
			.with_var(vars[0], [(1, 3)])
			.with_var(vars[1], [(1, 4)])
			.with_var(vars[2], [(1, 5)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		k.init_vac(net.state());

		let outcome = k.vac_pass1(net.state_mut(), 1, 1);
		assert_eq!(
			outcome,
			VacOutcome::Filtered {
				iteration: 1,
				killed: Vec::new()
			}
		);

		net.state_mut().remove(vars[1], 1).unwrap();
		net.state_mut().remove(vars[2], 1).unwrap();
		assert!(k.vac_need_propagate(net.state()));
		// Only x is left to reach the capacity, and either removed value would
		// reach it again.
		let outcome = k.vac_pass1(net.state_mut(), 1, 1);
		assert_eq!(
			outcome,
			VacOutcome::Infeasible {
				killers: vec![(vars[1], 1), (vars[2], 1)]
			}
		);
	}

	#[test]
	fn test_vac_pass1_filters_light_values() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=2]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let mut k = KnapsackBuilder::new(4)
			.with_var(x, [(0, 0), (1, 1), (2, 3)])
			.with_var(y, [(1, 1)])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		k.init_vac(net.state());
		// Only x = 2 and y = 1 reach the capacity.
		let VacOutcome::Filtered { iteration, killed } = k.vac_pass1(net.state_mut(), 1, 1) else {
			panic!("unexpected outcome");
		};
		assert_eq!(iteration, 1);
		assert_eq!(killed, vec![(x, 0), (x, 1), (y, 0)]);
		assert!(!k.vac_need_propagate(net.state()));
	}

	#[test]
	fn test_vac_pass2_explains_removal() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=2]));
		let mut k = KnapsackBuilder::new(3)
			.with_var(x, [(1, 2)])
			.with_var(y, [(1, 1), (2, 2)])
			.with_deltas(y, vec![0, 3, 0])
			.build(net.state_mut())
			.unwrap();
		k.connect(net.state_mut());
		k.init_vac(net.state());
		net.state_mut().remove(y, 1).unwrap();
		assert!(k.vac_need_propagate(net.state()));

		// With x = 1, the cheapest way to complete the capacity is the removed
		// y = 1, at the penalty of one lambda.
		let (cost, killers) = k.vac_pass2(net.state_mut(), 2, (x, 1), 1, 5);
		assert_eq!(cost, 1);
		assert_eq!(killers, vec![(y, 1)]);

		// With x = 0, even y = 2 does not reach the capacity.
		let (cost, killers) = k.vac_pass2(net.state_mut(), 2, (x, 0), 1, 5);
		assert_eq!(cost, 5);
		assert!(killers.is_empty());
		assert!(k.vac_last_val_checked(x, 0));
		k.reset_vac_last_val_tested();
		assert!(!k.vac_last_val_checked(x, 0));
	}

	#[test]
	fn test_vac_pass3_moves_relaxation() {
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
		k.init_vac(net.state());
		let before: Vec<_> = [[1, 1], [0, 1]]
			.iter()
			.map(|t| net.total_cost(t) + k.eval(net.state(), t))
			.collect();

		let moves = k.vac_pass3(net.state_mut(), 1, &[]).unwrap();
		assert_eq!(
			moves,
			vec![
				VacMove { var: x, val: 1, cost: 4 },
				VacMove { var: x, val: 0, cost: -2 },
				VacMove { var: y, val: 1, cost: 9 },
			]
		);
		assert_eq!(net.lower_bound(), 7);
		for m in moves {
			if m.cost > 0 {
				net.state_mut().extend(m.var, m.val, m.cost);
			} else {
				net.state_mut().project(m.var, m.val, -m.cost, true).unwrap();
			}
		}
		let after: Vec<_> = [[1, 1], [0, 1]]
			.iter()
			.map(|t| net.total_cost(t) + k.eval(net.state(), t))
			.collect();
		assert_eq!(before, after);
	}

	#[test]
	fn test_vac_quanta() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=3]));
		let mut k = KnapsackBuilder::new(1)
			.with_var(x, [(0, 0), (1, 1), (2, 1), (3, 1)])
			.build(net.state_mut())
			.unwrap();
		k.init_vac(net.state());
		k.set_k_vac(x, 1, 3, 10);
		assert_eq!(k.k_vac(x, 2, 10), 3);
		assert_eq!(k.k_vac(x, 3, 11), 0);
		k.increase_k_constraint_vac(2);
		assert_eq!(k.k_constraint_vac(), 2);
		assert_eq!(k.vac_extend(net.state_mut(), x, 3, 1), vec![1, 2, 3]);
		k.vac_project(net.state_mut(), x, 3, 1);
		assert_eq!(k.was_last_value(net.state(), x, 0), vec![0]);
	}
}
