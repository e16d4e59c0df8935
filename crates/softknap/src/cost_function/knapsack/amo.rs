//! Assignment of the variables of a [`KnapsackCostFunction`], and the
//! replacement of the cost function by simpler ones once the capacity no
//! longer restricts the remaining variables.

use tracing::debug;

use crate::{
	actions::PropagationActions,
	cost_function::{
		knapsack::{Fixing, KnapsackBuilder, KnapsackCostFunction, Role, RowKind},
		table::TableBuilder,
		Conflict, CostFunction, PropagationError, Spawn,
	},
	network::VarRef,
	Cost, Value, Weight, MAX_COST,
};

impl KnapsackCostFunction {
	/// Take the assignment of the variable at `index` into account.
	///
	/// The weight of its value is removed from the capacity and its delta is
	/// accumulated. For a member of an AMO group, the other members are fixed
	/// when the choice of the group is decided.
	pub(super) fn assign_free<A: PropagationActions>(
		&mut self,
		actions: &mut A,
		index: usize,
	) -> Result<(), PropagationError> {
		let x = self.scope[index];
		let fixing = if actions.is_assigned(x) {
			Fixing::Done
		} else {
			Fixing::Pending
		};
		self.set_fixing(actions, index, fixing);
		match self.roles[index] {
			Role::Real(row) => {
				let r = &self.rows[row];
				let val = actions.domain(x).first().copied().unwrap_or(r.values[0]);
				let last = r.values.len() - 1;
				let item = r.values[..last].iter().position(|&v| v == val).unwrap_or(last);
				Self::add_trailed(actions, self.capacity, -r.weights[item]);
				Self::add_trailed(actions, self.assigned_deltas, self.delta(actions, index, item));
				self.clear_deltas(actions, index);
				let greatest = r.weights[self.greatest(actions, row)];
				Self::add_trailed(actions, self.max_weight, -greatest);
			}
			Role::Member { group, pos } => {
				if self.open(actions, group) > 0 {
					self.assign_member(actions, index, group, pos)?;
				}
			}
		}
		self.current_scope(actions);
		if !self.fast_verify(actions) {
			return Err(Conflict::bound().into());
		}
		if !self.connected(actions) {
			return Ok(());
		}
		if self.universal(actions) {
			self.project_universal(actions)?;
		} else if self.check_nary_projection(actions) {
			return Ok(());
		} else if self.always_satisfied(actions) {
			self.decompose(actions)?;
		} else {
			CostFunction::propagate(self, actions)?;
			if self.config.full_eac() && self.connected(actions) {
				let greedy = self.check_eac_greedy_solution(actions, None);
				debug!(greedy, "knapsack greedy support check");
			}
		}
		Ok(())
	}

	/// Take the assignment of a member of an AMO group into account.
	fn assign_member<A: PropagationActions>(
		&mut self,
		actions: &mut A,
		index: usize,
		group: usize,
		pos: usize,
	) -> Result<(), Conflict> {
		let x = self.scope[index];
		let Some(value) = actions.value(x) else {
			return Ok(());
		};
		let row = self.groups[group].row;
		let (_, lit) = self.groups[group].members[pos];
		Self::add_trailed(actions, self.assigned_deltas, self.delta(actions, index, value as usize));
		self.clear_deltas(actions, index);
		if value == lit {
			Self::add_trailed(actions, self.capacity, -self.rows[row].weights[pos]);
			let greatest = self.rows[row].weights[self.greatest(actions, row)];
			Self::add_trailed(actions, self.max_weight, -greatest);
			let _ = actions.set_trailed_int(self.groups[group].open, 0);
			let mut unselected = Vec::new();
			for k in 0..self.groups[group].members.len() {
				let (var, l) = self.groups[group].members[k];
				if var == index || self.fixing(actions, var) != Fixing::Free {
					continue;
				}
				Self::add_trailed(actions, self.assigned_deltas, self.delta(actions, var, 1 - l as usize));
				self.set_fixing(actions, var, Fixing::Done);
				self.clear_deltas(actions, var);
				if !actions.is_assigned(self.scope[var]) {
					unselected.push((self.scope[var], l));
				}
			}
			for (y, l) in unselected {
				if actions.can_be(y, l) {
					actions.remove(y, l)?;
				}
			}
			return Ok(());
		}

		let open = self.open(actions, group) - 1;
		let _ = actions.set_trailed_int(self.groups[group].open, open);
		if open == 0 {
			let none = self.groups[group].members.len();
			Self::add_trailed(actions, self.capacity, -self.rows[row].weights[none]);
			let greatest = self.rows[row].weights[self.greatest(actions, row)];
			Self::add_trailed(actions, self.max_weight, -greatest);
		} else if open == 1 && self.exhausted(actions, row) {
			// The last open member has to be selected.
			let last = (0..self.groups[group].members.len())
				.find(|&k| self.fixing(actions, self.groups[group].members[k].0) == Fixing::Free);
			if let Some(k) = last {
				let (var, l) = self.groups[group].members[k];
				Self::add_trailed(actions, self.capacity, -self.rows[row].weights[k]);
				Self::add_trailed(actions, self.assigned_deltas, self.delta(actions, var, l as usize));
				self.clear_deltas(actions, var);
				let greatest = self.rows[row].weights[self.greatest(actions, row)];
				Self::add_trailed(actions, self.max_weight, -greatest);
				self.set_fixing(actions, var, Fixing::Done);
				let _ = actions.set_trailed_int(self.groups[group].open, 0);
				let y = self.scope[var];
				if !actions.is_assigned(y) && actions.can_be(y, 1 - l) {
					actions.remove(y, 1 - l)?;
				}
			}
		}
		Ok(())
	}

	/// Disconnect the cost function when any assignment of the remaining
	/// variables reaches the capacity, moving the deltas back to the unary
	/// cost functions and the rest of the cost to the lower bound.
	pub(super) fn project_universal<A: PropagationActions>(&mut self, actions: &mut A) -> Result<(), Conflict> {
		self.disconnect(actions);
		let mut cost = self.assigned_deltas(actions) - self.lower_bound(actions);
		let _ = actions.set_trailed_int(self.lb, 0);
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			let items = self.current[e].items.clone();
			match self.rows[row].kind {
				RowKind::Real(var) => {
					let deltas: Vec<Cost> = items.iter().map(|&k| self.delta(actions, var, k)).collect();
					let min = deltas.iter().copied().min().unwrap_or(0);
					cost += min;
					for (&k, &d) in items.iter().zip(&deltas) {
						self.shift(actions, var, k, min - d, false)?;
					}
					actions.find_support(self.scope[var])?;
				}
				RowKind::Group(g) => {
					for &k in &items {
						let Some(&(var, _)) = self.groups[g].members.get(k) else {
							continue;
						};
						let x = self.scope[var];
						let deltas = [self.delta(actions, var, 0), self.delta(actions, var, 1)];
						let min = deltas[0].min(deltas[1]);
						cost += min;
						for (v, d) in deltas.into_iter().enumerate() {
							if d > min && actions.can_be(x, v as Value) {
								actions.project(x, v as Value, d - min, false)?;
							}
						}
						actions.find_support(x)?;
					}
				}
			}
		}
		debug!(cost, "knapsack satisfied by all remaining assignments");
		if cost > 0 {
			actions.project_lb(cost)?;
		}
		Ok(())
	}

	/// Replace the cost function by a table over the unassigned variables at
	/// `free`, whose costs are given by [`Self::evaluate`].
	pub(super) fn project_nary<A: PropagationActions>(&self, actions: &mut A, free: &[usize]) {
		let base: Vec<Value> = self
			.scope
			.iter()
			.map(|&v| actions.value(v).unwrap_or_default())
			.collect();
		let vars: Vec<VarRef> = free.iter().map(|&i| self.scope[i]).collect();
		debug!(arity = vars.len(), "replace knapsack by table");
		let builder = TableBuilder::tabulate(actions, vars, |t| {
			let mut tuple = base.clone();
			for (&i, &v) in free.iter().zip(t) {
				tuple[i] = v;
			}
			self.evaluate(actions, &tuple)
		});
		actions.spawn(Spawn::Table(builder));
	}

	/// Replace the cost function by unary costs, tables, and smaller knapsack
	/// cost functions that enforce the AMO groups, once the capacity is reached
	/// by every assignment that respects the groups.
	fn decompose<A: PropagationActions>(&mut self, actions: &mut A) -> Result<(), PropagationError> {
		let _ = actions.set_trailed_int(self.capacity, 0);
		let mut complete = true;
		let mut forced: Vec<(VarRef, Value)> = Vec::new();
		for e in 0..self.current.len() {
			let row = self.current[e].row;
			let items = self.current[e].items.clone();
			match self.rows[row].kind {
				RowKind::Real(var) => {
					let x = self.scope[var];
					if let Some(val) = actions.value(x) {
						Self::add_trailed(actions, self.assigned_deltas, self.delta(actions, var, val as usize));
						self.clear_deltas(actions, var);
						continue;
					}
					let deltas = [self.delta(actions, var, 0), self.delta(actions, var, 1)];
					let min = deltas[0].min(deltas[1]);
					Self::add_trailed(actions, self.assigned_deltas, min);
					self.clear_deltas(actions, var);
					for (v, d) in deltas.into_iter().enumerate() {
						if d > min && actions.can_be(x, v as Value) {
							actions.project(x, v as Value, d - min, true)?;
						}
					}
					actions.find_support(x)?;
				}
				RowKind::Group(g) => {
					let n = self.groups[g].members.len();
					let mut free = Vec::new();
					let mut selected = false;
					for &k in items.iter().filter(|&&k| k < n) {
						let (var, lit) = self.groups[g].members[k];
						match actions.value(self.scope[var]) {
							Some(v) => {
								Self::add_trailed(actions, self.assigned_deltas, self.delta(actions, var, v as usize));
								self.clear_deltas(actions, var);
								selected |= v == lit;
							}
							None => free.push(k),
						}
					}
					if free.is_empty() {
						continue;
					}
					if selected {
						for &k in &free {
							let (var, lit) = self.groups[g].members[k];
							Self::add_trailed(actions, self.assigned_deltas, self.delta(actions, var, 1 - lit as usize));
							self.clear_deltas(actions, var);
							forced.push((self.scope[var], 1 - lit));
						}
						complete = false;
						continue;
					}
					let none_live = items.last() == Some(&n);
					self.decompose_group(actions, g, &free, none_live)?;
				}
			}
		}
		if complete {
			let cost = self.assigned_deltas(actions) - self.lower_bound(actions);
			self.disconnect(actions);
			let _ = actions.set_trailed_int(self.lb, 0);
			debug!(cost, "decompose knapsack into its at-most-one groups");
			if cost > 0 {
				actions.project_lb(cost)?;
			}
		}
		for (y, v) in forced {
			if !actions.is_assigned(y) {
				actions.assign(y, v)?;
			}
		}
		Ok(())
	}

	/// Replace the AMO group `g`, whose unassigned members are at positions
	/// `free`, by a cost function that only enforces the group.
	fn decompose_group<A: PropagationActions>(
		&mut self,
		actions: &mut A,
		g: usize,
		free: &[usize],
		none_live: bool,
	) -> Result<(), Conflict> {
		let members: Vec<(usize, VarRef, Value)> = free
			.iter()
			.map(|&k| {
				let (var, lit) = self.groups[g].members[k];
				(var, self.scope[var], lit)
			})
			.collect();
		let deltas: Vec<[Cost; 2]> = members
			.iter()
			.map(|&(var, _, _)| [self.delta(actions, var, 0), self.delta(actions, var, 1)])
			.collect();
		// Cost of selecting the member at `sel`, or none of them.
		let choice = |sel: Option<usize>| -> Cost {
			members
				.iter()
				.zip(&deltas)
				.enumerate()
				.map(|(j, (&(_, x, lit), d))| {
					let v = if sel == Some(j) { lit } else { 1 - lit };
					if actions.can_be(x, v) {
						d[v as usize]
					} else {
						MAX_COST
					}
				})
				.fold(0, |acc: Cost, c| acc.saturating_add(c).min(MAX_COST))
		};
		let select: Vec<Cost> = (0..members.len()).map(|j| choice(Some(j))).collect();
		let none = if none_live { choice(None) } else { MAX_COST };
		let min = select.iter().copied().chain([none]).min().unwrap_or(0);
		Self::add_trailed(actions, self.assigned_deltas, min);
		for &(var, _, _) in &members {
			self.clear_deltas(actions, var);
		}

		match members.len() {
			1 => {
				let (_, x, lit) = members[0];
				for (v, c) in [(lit, select[0]), (1 - lit, none)] {
					if !actions.can_be(x, v) {
						continue;
					}
					if c >= MAX_COST {
						actions.remove(x, v)?;
					} else if c > min {
						actions.project(x, v, c - min, true)?;
					}
				}
				actions.find_support(x)?;
			}
			2 | 3 => {
				let vars: Vec<VarRef> = members.iter().map(|&(_, x, _)| x).collect();
				let builder = TableBuilder::tabulate(actions, vars, |t| {
					let selected = members.iter().zip(t).filter(|&(&(_, _, lit), &v)| v == lit).count();
					if selected > 1 || (selected == 0 && !none_live) {
						return MAX_COST;
					}
					let sum: Cost = deltas.iter().zip(t).map(|(d, &v)| d[v as usize]).sum();
					sum - min
				});
				actions.spawn(Spawn::Table(builder));
			}
			n => {
				let mut builder = if none_live {
					KnapsackBuilder::new(n as Weight - 1)
				} else {
					KnapsackBuilder::new(1)
				};
				for (&(_, x, lit), d) in members.iter().zip(&deltas) {
					builder = if none_live {
						builder
							.with_var(x, [(1 - lit, 1), (lit, 0)])
							.with_deltas(x, vec![d[1 - lit as usize], d[lit as usize]])
					} else {
						builder.with_var(x, [(lit, 1), (1 - lit, 0)]).with_deltas(x, d.to_vec())
					};
				}
				if !none_live {
					builder = builder.with_amo(members.iter().map(|&(_, x, lit)| (x, lit)).collect());
				}
				let builder = builder.with_lower_bound(min).with_config(self.config.clone());
				actions.spawn(Spawn::Knapsack(builder));
			}
		}
		let row = self.groups[g].row;
		let _ = actions.set_trailed_int(self.groups[g].open, 0);
		let greatest = self.rows[row].weights[self.greatest(actions, row)];
		Self::add_trailed(actions, self.max_weight, -greatest);
		Ok(())
	}
}
