//! The knapsack cost function: a soft global constraint enforcing that a
//! weighted sum of (values of) variables reaches a capacity.
//!
//! Every variable contributes the weight of its value to the sum. The values
//! of a variable are split in a list of explicitly weighted values, and one
//! catch-all class of values that all share the weight of the last explicit
//! value. Boolean variables can additionally be grouped in at-most-one (AMO)
//! cliques, which are handled as a single virtual variable whose values are the
//! members of the clique plus a "none" value.
//!
//! The cost function keeps, for each value, the cost that was extended to it
//! from the unary cost functions of the network (its "delta"), and a local
//! lower bound that was projected onto the global lower bound of the network.
//! The cost of a complete assignment is the sum of the deltas of its values
//! minus the local lower bound, or the upper bound of the network when the
//! capacity is not reached.

mod amo;
mod bounds;
mod builder;
mod dump;
mod dynamic;
mod eval;
mod relaxation;
mod scope;
mod vac;

use tracing::trace;

pub use crate::cost_function::knapsack::{
	builder::KnapsackBuilder,
	dump::KnapsackDisplay,
	vac::{VacMove, VacOutcome},
};
use crate::{
	actions::{InspectionActions, PropagationActions, TrailingActions},
	cost_function::{
		Conflict, ConflictOrigin, CostFunction, DumpError, DumpForm, PropagationError,
	},
	network::{trail::TrailedInt, VarRef},
	Cost, Value, Weight,
};

#[derive(Clone, Debug, Default, PartialEq)]
/// Configuration object for the propagation of a [`KnapsackCostFunction`].
pub struct KnapsackConfig {
	/// Tolerance used when rounding fractional costs up to integer costs.
	epsilon: Option<f64>,
	/// How often the exact dynamic programming algorithm replaces the linear
	/// relaxation.
	dp_cadence: Option<DpCadence>,
	/// The level of consistency enforced during propagation.
	consistency: Option<ConsistencyLevel>,
	/// The number of unassigned variables at which the cost function is
	/// replaced by an explicit table.
	nary_projection_size: Option<usize>,
	/// The largest initial domain size allowed when projecting onto three
	/// variables.
	nary_projection_max_domain: Option<usize>,
	/// The largest product of initial domain sizes allowed when projecting onto
	/// three variables.
	nary_projection_max_product: Option<usize>,
	/// Whether to check the greedy solution of the supports after propagation
	/// caused by an assignment.
	full_eac: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// How often the exact dynamic programming algorithm is used to compute the
/// cost moves, instead of the linear relaxation.
pub enum DpCadence {
	#[default]
	/// Only use the linear relaxation.
	Never,
	/// Use dynamic programming at the first propagation of every search node.
	EveryNode,
	/// Use dynamic programming at the first propagation of every search node
	/// whose number is a multiple of the given number.
	EveryNth(u64),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// The level of consistency enforced by the knapsack cost function.
pub enum ConsistencyLevel {
	/// Only remove the values that cannot reach the capacity.
	Bound,
	#[default]
	/// Also move costs between the unary cost functions, the knapsack cost
	/// function, and the lower bound, based on the linear relaxation.
	Full,
}

#[derive(Debug)]
/// A soft knapsack constraint over a set of variables, possibly with groups of
/// Boolean variables of which at most one can take a given value.
pub struct KnapsackCostFunction {
	/// The variables in the scope of the cost function.
	scope: Vec<VarRef>,
	/// The role that each variable in the scope plays.
	roles: Vec<Role>,
	/// The multiple-choice items: one per variable that is not part of an AMO
	/// group, and one per AMO group.
	rows: Vec<Row>,
	/// The AMO groups.
	groups: Vec<Group>,
	/// For each variable in an AMO constraint, the weight of value 0 and 1 when
	/// the constraint was created. Empty when there are no AMO groups.
	original_weights: Vec<[Weight; 2]>,
	/// The configuration of the propagation.
	config: KnapsackConfig,
	/// The capacity when the cost function was created.
	original_capacity: Weight,
	/// The upper bound of the network when the cost function was created.
	original_ub: Cost,
	/// Whether all rows have the same weights.
	same_weight: bool,

	/// The capacity that the unassigned variables still have to reach.
	capacity: TrailedInt,
	/// The sum of the largest weights still available in each row.
	max_weight: TrailedInt,
	/// The cost that was projected onto the lower bound of the network.
	lb: TrailedInt,
	/// The sum of the deltas of the values of assigned variables.
	assigned_deltas: TrailedInt,
	/// Whether the capacity is reached by any assignment of the remaining
	/// variables (only tracked with AMO groups).
	always_satisfied: TrailedInt,
	/// Whether the cost function is part of the network.
	connected: TrailedInt,
	/// For each variable, whether it has been taken into account as assigned,
	/// see [`Fixing`].
	fixing: Vec<TrailedInt>,
	/// For each variable, the cost extended to each of its items.
	///
	/// The items of variables in the AMO setting are indexed by value, the
	/// items of the other variables by their position in [`Row::values`].
	deltas: Vec<Vec<TrailedInt>>,

	/// The number of conflicts raised by this cost function.
	conflict_weight: u64,
	/// For each variable, the number of conflicts it was held responsible for.
	conflict_weights: Vec<u64>,

	/// The rows that still have more than one available item.
	current: Vec<Active>,
	/// The slopes of the convex hulls of the active rows.
	slopes: Vec<Slope>,
	/// Cost moves computed by the relaxation, waiting to be applied.
	moves: Vec<Move>,
	/// Whether the exact dynamic programming should be used next.
	dynamic_pending: bool,
	/// The last search node at which the dynamic programming cadence was
	/// checked.
	last_node: Option<u64>,
	/// State of the virtual arc consistency passes.
	vac: vac::VacState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The role of a variable in the scope of a [`KnapsackCostFunction`].
enum Role {
	/// The variable is represented by its own row.
	Real(usize),
	/// The variable is part of an AMO group.
	Member {
		/// Index of the group.
		group: usize,
		/// Position of the variable in the group.
		pos: usize,
	},
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// What a row represents.
enum RowKind {
	/// The row of the variable with the given index in the scope.
	Real(usize),
	/// The row of the AMO group with the given index.
	Group(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
/// How far the assignment of a variable has been taken into account.
enum Fixing {
	/// The variable is unassigned.
	Free = 0,
	/// All remaining values of the variable have the same weight, but the
	/// variable is not assigned yet.
	Pending = 1,
	/// The variable is assigned.
	Done = 2,
}

#[derive(Debug)]
/// A multiple-choice item of the knapsack: a variable with its weighted values,
/// or an AMO group whose values are its members.
struct Row {
	/// What the row represents.
	kind: RowKind,
	/// The values that have a weight.
	///
	/// The last entry represents the catch-all class of a variable (and is
	/// replaced by any available value of the class), or the "none" value of an
	/// AMO group.
	values: Vec<Value>,
	/// The weight of each entry of `values`.
	weights: Vec<Weight>,
	/// The values of the catch-all class.
	others: Vec<Value>,
	/// Whether the variable has exactly two values.
	boolean: bool,
	/// Index of an available entry with the largest weight.
	greatest: TrailedInt,
	/// Index of an available entry with the smallest weight.
	lowest: TrailedInt,
	/// The largest weight when the cost function was created.
	largest: Weight,
	/// Whether all values of the catch-all class (or the "none" value) have been
	/// removed.
	exhausted: TrailedInt,
	/// An explicitly weighted value that was available at the last check.
	witness: Value,
	/// The profit of each entry, computed by the relaxation.
	profit: Vec<Cost>,
	/// The value of each entry in the solution of the relaxation.
	opt: Vec<f64>,
	/// The smallest unary cost of the catch-all class.
	class_cost: Cost,
}

#[derive(Debug)]
/// A group of Boolean variables of which at most one takes a given value.
struct Group {
	/// Index of the row representing the group.
	row: usize,
	/// The members of the group: index in the scope and the literal value.
	members: Vec<(usize, Value)>,
	/// The number of members whose literal can still be selected.
	open: TrailedInt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A row with more than one available entry, as seen by the relaxation.
struct Active {
	/// Index of the row.
	row: usize,
	/// The indices of the available entries.
	items: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// A segment of the convex hull of the (weight, profit) points of a row.
struct Slope {
	/// Index of the row in [`KnapsackCostFunction::current`].
	entry: usize,
	/// The lighter entry of the segment.
	low: usize,
	/// The heavier entry of the segment.
	high: usize,
	/// The increase in profit per unit of weight.
	slope: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A cost to move between the knapsack cost function and a unary cost.
///
/// A positive cost is extended from the unary cost function, a negative cost
/// is projected onto it.
struct Move {
	/// Index of the variable in the scope.
	var: usize,
	/// The item of the variable.
	idx: usize,
	/// The cost to move.
	cost: Cost,
}

impl KnapsackConfig {
	/// The default tolerance used when rounding fractional costs up.
	pub const DEFAULT_EPSILON: f64 = 1e-9;
	/// The default number of unassigned variables at which the cost function
	/// is replaced by an explicit table.
	pub const DEFAULT_NARY_PROJECTION_SIZE: usize = 3;
	/// The default largest initial domain size when projecting onto three
	/// variables.
	pub const DEFAULT_NARY_PROJECTION_MAX_DOMAIN: usize = 30;
	/// The default largest product of initial domain sizes when projecting onto
	/// three variables.
	pub const DEFAULT_NARY_PROJECTION_MAX_PRODUCT: usize = 1500;

	/// Get the tolerance used when rounding fractional costs up.
	pub fn epsilon(&self) -> f64 {
		self.epsilon.unwrap_or(Self::DEFAULT_EPSILON)
	}

	/// Get how often the exact dynamic programming algorithm is used.
	pub fn dp_cadence(&self) -> DpCadence {
		self.dp_cadence.unwrap_or_default()
	}

	/// Get the level of consistency enforced during propagation.
	pub fn consistency(&self) -> ConsistencyLevel {
		self.consistency.unwrap_or_default()
	}

	/// Get the number of unassigned variables at which the cost function is
	/// replaced by an explicit table.
	pub fn nary_projection_size(&self) -> usize {
		self.nary_projection_size
			.unwrap_or(Self::DEFAULT_NARY_PROJECTION_SIZE)
	}

	/// Get the largest initial domain size allowed when projecting onto three
	/// variables.
	pub fn nary_projection_max_domain(&self) -> usize {
		self.nary_projection_max_domain
			.unwrap_or(Self::DEFAULT_NARY_PROJECTION_MAX_DOMAIN)
	}

	/// Get the largest product of initial domain sizes allowed when projecting
	/// onto three variables.
	pub fn nary_projection_max_product(&self) -> usize {
		self.nary_projection_max_product
			.unwrap_or(Self::DEFAULT_NARY_PROJECTION_MAX_PRODUCT)
	}

	/// Get whether the greedy solution of the supports is checked after an
	/// assignment.
	pub fn full_eac(&self) -> bool {
		self.full_eac
	}

	/// Change the tolerance used when rounding fractional costs up.
	pub fn with_epsilon(mut self, epsilon: f64) -> Self {
		self.epsilon = Some(epsilon);
		self
	}

	/// Change how often the exact dynamic programming algorithm is used.
	pub fn with_dp_cadence(mut self, cadence: DpCadence) -> Self {
		self.dp_cadence = Some(cadence);
		self
	}

	/// Change the level of consistency enforced during propagation.
	pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
		self.consistency = Some(level);
		self
	}

	/// Change the number of unassigned variables at which the cost function is
	/// replaced by an explicit table.
	pub fn with_nary_projection_size(mut self, size: usize) -> Self {
		self.nary_projection_size = Some(size);
		self
	}

	/// Change the largest initial domain size allowed when projecting onto
	/// three variables.
	pub fn with_nary_projection_max_domain(mut self, size: usize) -> Self {
		self.nary_projection_max_domain = Some(size);
		self
	}

	/// Change the largest product of initial domain sizes allowed when
	/// projecting onto three variables.
	pub fn with_nary_projection_max_product(mut self, product: usize) -> Self {
		self.nary_projection_max_product = Some(product);
		self
	}

	/// Change whether the greedy solution of the supports is checked after an
	/// assignment.
	pub fn with_full_eac(mut self, full_eac: bool) -> Self {
		self.full_eac = full_eac;
		self
	}
}

impl KnapsackCostFunction {
	/// Add `v` to the trailed integer `t`.
	fn add_trailed<A: TrailingActions>(actions: &mut A, t: TrailedInt, v: i64) {
		if v != 0 {
			let x = actions.get_trailed_int(t);
			let _ = actions.set_trailed_int(t, x + v);
		}
	}

	/// The capacity that the unassigned variables still have to reach.
	pub fn capacity<A: TrailingActions>(&self, actions: &A) -> Weight {
		actions.get_trailed_int(self.capacity)
	}

	/// The sum of the largest available weights of all rows.
	pub fn max_weight<A: TrailingActions>(&self, actions: &A) -> Weight {
		actions.get_trailed_int(self.max_weight)
	}

	/// The cost projected by the cost function onto the lower bound.
	pub fn lower_bound<A: TrailingActions>(&self, actions: &A) -> Cost {
		actions.get_trailed_int(self.lb)
	}

	/// The sum of the deltas of the values of assigned variables.
	pub fn assigned_deltas<A: TrailingActions>(&self, actions: &A) -> Cost {
		actions.get_trailed_int(self.assigned_deltas)
	}

	/// The cost extended to item `idx` of the variable at `var`.
	pub fn delta<A: TrailingActions>(&self, actions: &A, var: usize, idx: usize) -> Cost {
		actions.get_trailed_int(self.deltas[var][idx])
	}

	/// Add `cost` to the delta of item `idx` of the variable at `var`.
	fn add_delta<A: TrailingActions>(&self, actions: &mut A, var: usize, idx: usize, cost: Cost) {
		Self::add_trailed(actions, self.deltas[var][idx], cost);
	}

	/// Reset all deltas of the variable at `var` to zero.
	fn clear_deltas<A: TrailingActions>(&self, actions: &mut A, var: usize) {
		for &d in &self.deltas[var] {
			let _ = actions.set_trailed_int(d, 0);
		}
	}

	/// How far the assignment of the variable at `var` was taken into account.
	fn fixing<A: TrailingActions>(&self, actions: &A, var: usize) -> Fixing {
		match actions.get_trailed_int(self.fixing[var]) {
			0 => Fixing::Free,
			1 => Fixing::Pending,
			_ => Fixing::Done,
		}
	}

	/// Record how far the assignment of the variable at `var` was taken into
	/// account.
	fn set_fixing<A: TrailingActions>(&self, actions: &mut A, var: usize, fixing: Fixing) {
		let _ = actions.set_trailed_int(self.fixing[var], fixing as i64);
	}

	/// Index of an available entry of `row` with the largest weight.
	fn greatest<A: TrailingActions>(&self, actions: &A, row: usize) -> usize {
		actions.get_trailed_int(self.rows[row].greatest) as usize
	}

	/// Index of an available entry of `row` with the smallest weight.
	fn lowest<A: TrailingActions>(&self, actions: &A, row: usize) -> usize {
		actions.get_trailed_int(self.rows[row].lowest) as usize
	}

	/// Whether the catch-all class (or "none" value) of `row` is empty.
	fn exhausted<A: TrailingActions>(&self, actions: &A, row: usize) -> bool {
		actions.get_trailed_int(self.rows[row].exhausted) != 0
	}

	/// The number of members of `group` whose literal can still be selected.
	fn open<A: TrailingActions>(&self, actions: &A, group: usize) -> i64 {
		actions.get_trailed_int(self.groups[group].open)
	}

	/// Whether the cost function has at least one AMO group.
	fn has_groups(&self) -> bool {
		!self.groups.is_empty()
	}

	/// Whether the capacity is reached by every assignment of the remaining
	/// variables.
	fn always_satisfied<A: TrailingActions>(&self, actions: &A) -> bool {
		actions.get_trailed_int(self.always_satisfied) != 0
	}

	/// Whether the cost function is part of the network.
	fn connected<A: TrailingActions>(&self, actions: &A) -> bool {
		actions.get_trailed_int(self.connected) != 0
	}

	/// Remove the cost function from the network.
	fn disconnect<A: TrailingActions>(&self, actions: &mut A) {
		tracing::debug!(arity = self.scope.len(), "disconnect knapsack");
		let _ = actions.set_trailed_int(self.connected, 0);
	}

	/// The row of the variable at `var`, if it is not part of an AMO group.
	fn real_row(&self, var: usize) -> Option<usize> {
		match self.roles[var] {
			Role::Real(row) => Some(row),
			Role::Member { .. } => None,
		}
	}

	/// Whether item `idx` of the variable at `var` is its catch-all class.
	fn is_class(&self, var: usize, idx: usize) -> bool {
		match self.roles[var] {
			Role::Real(row) => idx == self.rows[row].values.len() - 1,
			Role::Member { .. } => false,
		}
	}

	/// The value represented by item `idx` of the variable at `var`.
	fn item_value(&self, var: usize, idx: usize) -> Value {
		match self.roles[var] {
			Role::Real(row) => self.rows[row].values[idx],
			Role::Member { .. } => idx as Value,
		}
	}

	/// Round a fractional cost up, ignoring rounding errors.
	fn ceil(&self, v: f64) -> Cost {
		(v - self.config.epsilon()).ceil() as Cost
	}

	/// The number of variables that are not assigned in the network.
	fn non_assigned<A: InspectionActions>(&self, actions: &A) -> usize {
		self.scope
			.iter()
			.filter(|&&v| !actions.is_assigned(v))
			.count()
	}

	/// Increase the local and the global lower bound by `cost`.
	fn project_lb<A: PropagationActions>(&self, actions: &mut A, cost: Cost) -> Result<(), Conflict> {
		if cost > 0 {
			trace!(cost, "project knapsack cost to lower bound");
			Self::add_trailed(actions, self.lb, cost);
			actions.project_lb(cost)?;
		}
		Ok(())
	}

	/// Extend `cost` from every available value of the catch-all class of the
	/// variable at `var`.
	fn extend_class<A: PropagationActions>(&self, actions: &mut A, var: usize, cost: Cost) {
		let Some(row) = self.real_row(var) else {
			return;
		};
		for &v in &self.rows[row].others {
			if actions.can_be(self.scope[var], v) {
				actions.extend(self.scope[var], v, cost);
			}
		}
	}

	/// Project `cost` onto every available value of the catch-all class of the
	/// variable at `var`.
	fn project_class<A: PropagationActions>(
		&self,
		actions: &mut A,
		var: usize,
		cost: Cost,
	) -> Result<(), Conflict> {
		let Some(row) = self.real_row(var) else {
			return Ok(());
		};
		for &v in &self.rows[row].others {
			if actions.can_be(self.scope[var], v) {
				actions.project(self.scope[var], v, cost, true)?;
			}
		}
		Ok(())
	}

	/// Move `cost` between the cost function and the unary cost of item `idx`
	/// of the variable at `var`, without changing the deltas.
	///
	/// A positive cost is extended to the cost function, a negative cost is
	/// projected onto the unary cost function.
	fn shift<A: PropagationActions>(
		&self,
		actions: &mut A,
		var: usize,
		idx: usize,
		cost: Cost,
		delayed: bool,
	) -> Result<(), Conflict> {
		trace!(var = self.scope[var].index(), val = self.item_value(var, idx), cost, "knapsack cost move");
		let class = self.is_class(var, idx);
		if cost > 0 {
			if class {
				self.extend_class(actions, var, cost);
			} else {
				actions.extend(self.scope[var], self.item_value(var, idx), cost);
			}
		} else if cost < 0 {
			if class {
				self.project_class(actions, var, -cost)?;
			} else {
				actions.project(self.scope[var], self.item_value(var, idx), -cost, delayed)?;
			}
		}
		Ok(())
	}

	/// Record a cost move, merging it with an earlier move for the same item.
	fn record_move(&mut self, var: usize, idx: usize, cost: Cost) {
		if let Some(m) = self.moves.iter_mut().find(|m| m.var == var && m.idx == idx) {
			m.cost += cost;
		} else {
			self.moves.push(Move { var, idx, cost });
		}
	}

	/// Apply all recorded cost moves, and restore the supports of the
	/// variables involved.
	fn apply_moves<A: PropagationActions>(&mut self, actions: &mut A) -> Result<(), Conflict> {
		let moves = std::mem::take(&mut self.moves);
		for m in &moves {
			self.shift(actions, m.var, m.idx, m.cost, true)?;
		}
		for entry in &self.current {
			match self.rows[entry.row].kind {
				RowKind::Real(var) => actions.find_support(self.scope[var])?,
				RowKind::Group(g) => {
					for &item in &entry.items {
						if let Some(&(var, _)) = self.groups[g].members.get(item) {
							actions.find_support(self.scope[var])?;
						}
					}
				}
			}
		}
		Ok(())
	}

	/// Check the configured dynamic programming cadence at a new search node.
	fn schedule_dynamic<A: InspectionActions>(&mut self, actions: &A) {
		let cadence = self.config.dp_cadence();
		if cadence == DpCadence::Never || self.has_groups() {
			return;
		}
		let node = actions.num_nodes();
		if self.last_node != Some(node) {
			self.last_node = Some(node);
			self.dynamic_pending |= match cadence {
				DpCadence::EveryNth(n) => n == 0 || node % n == 0,
				_ => true,
			};
		}
	}

	/// Move costs based on the relaxation of the knapsack (or, when scheduled,
	/// the exact dynamic programming) of the active rows.
	fn shift_costs<A: PropagationActions>(&mut self, actions: &mut A) -> Result<(), PropagationError> {
		let capacity = self.capacity(actions);
		let mut weight = 0;
		let mut cost = self.assigned_deltas(actions) - self.lower_bound(actions);
		self.compute_slopes(actions, &mut weight, &mut cost);
		if self.dynamic_pending && weight < capacity {
			self.dynamic_pending = false;
			if self.dynamic_shift(actions)? {
				return Ok(());
			}
		}
		let mut iter = 0;
		let mut fraction = 0.0;
		if weight < capacity {
			self.sort_slopes(actions, true);
			self.find_opt(capacity, &mut weight, &mut cost, &mut fraction, &mut iter);
		}
		if cost > 0 {
			let duals = self.duals(actions, iter, fraction);
			self.extension_projection(actions, &duals);
			self.project_lb(actions, cost)?;
			self.obj_consistency(actions);
			self.apply_moves(actions)?;
		}
		Ok(())
	}

	/// Check that the available values can still reach the capacity.
	fn fast_verify<A: TrailingActions>(&self, actions: &A) -> bool {
		self.capacity(actions) <= self.max_weight(actions)
	}

	/// Check that the available values can still reach the capacity, and that
	/// no AMO group has more than one selected member.
	fn verify<A: InspectionActions>(&self, actions: &A) -> bool {
		self.groups.iter().all(|g| {
			g.members
				.iter()
				.filter(|&&(var, lit)| actions.value(self.scope[var]) == Some(lit))
				.count() <= 1
		}) && self.fast_verify(actions)
	}

	/// Check whether the cost function should be replaced by an explicit
	/// table, and do so.
	///
	/// Returns whether the cost function was replaced.
	fn check_nary_projection<A: PropagationActions>(&self, actions: &mut A) -> bool {
		let free: Vec<usize> = (0..self.scope.len())
			.filter(|&i| !actions.is_assigned(self.scope[i]))
			.collect();
		let n = free.len();
		if n > self.config.nary_projection_size() || !self.connected(actions) {
			return false;
		}
		let max_dom = free
			.iter()
			.map(|&i| actions.initial_domain(self.scope[i]).len())
			.max()
			.unwrap_or(0);
		let prod_dom = free.iter().fold(1usize, |p, &i| {
			p.saturating_mul(actions.initial_domain(self.scope[i]).len())
		});
		if n < 3
			|| max_dom <= self.config.nary_projection_max_domain()
			|| prod_dom <= self.config.nary_projection_max_product()
		{
			self.disconnect(actions);
			self.project_nary(actions, &free);
			return true;
		}
		false
	}

	/// Increase the conflict weight of every variable at the given indices.
	fn blame(&mut self, vars: impl IntoIterator<Item = usize>) {
		for i in vars {
			self.conflict_weights[i] += 1;
		}
	}
}

impl<A: PropagationActions> CostFunction<A> for KnapsackCostFunction {
	fn connect(&mut self, actions: &mut A) {
		let _ = actions.set_trailed_int(self.connected, 1);
		self.current_scope(actions);
		if self.universal(actions) {
			self.disconnect(actions);
		}
	}

	fn scope(&self) -> &[VarRef] {
		&self.scope
	}

	fn is_connected(&self, actions: &A) -> bool {
		self.connected(actions)
	}

	#[tracing::instrument(name = "knapsack_propagate", level = "trace", skip_all)]
	fn propagate(&mut self, actions: &mut A) -> Result<(), PropagationError> {
		if actions.is_interrupted() {
			return Err(PropagationError::Timeout);
		}
		if !self.connected(actions) {
			return Ok(());
		}
		let mut processed = false;
		for i in 0..self.scope.len() {
			if !self.connected(actions) {
				break;
			}
			if self.fixing(actions, i) != Fixing::Free {
				continue;
			}
			let fixed = match self.roles[i] {
				Role::Real(_) => !self.is_unassigned(actions, i),
				Role::Member { .. } => actions.is_assigned(self.scope[i]),
			};
			if fixed {
				self.assign(actions, i)?;
				processed = true;
			}
		}
		if processed || !self.connected(actions) || self.always_satisfied(actions) {
			return Ok(());
		}
		if !self.fast_verify(actions) {
			return Err(Conflict::bound().into());
		}
		if self.non_assigned(actions) > self.config.nary_projection_size() {
			self.current_scope(actions);
			if self.bound_consistency(actions)? {
				// Removed values are propagated through their own events.
				return Ok(());
			}
			if self.config.consistency() == ConsistencyLevel::Bound {
				return Ok(());
			}
			let stale = self.compute_profit(actions);
			self.schedule_dynamic(actions);
			if self.connected(actions) && (stale || self.dynamic_pending) {
				self.shift_costs(actions)?;
			}
		} else {
			self.current_scope(actions);
			if self.universal(actions) && self.connected(actions) {
				self.project_universal(actions)?;
			} else {
				let _ = self.check_nary_projection(actions);
			}
		}
		Ok(())
	}

	#[tracing::instrument(name = "knapsack_assign", level = "trace", skip(self, actions), fields(var = self.scope[index].index()))]
	fn assign(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError> {
		if !self.verify(actions) {
			return Err(Conflict::bound().into());
		}
		match self.fixing(actions, index) {
			Fixing::Free => self.assign_free(actions, index),
			Fixing::Pending if actions.is_assigned(self.scope[index]) => {
				self.set_fixing(actions, index, Fixing::Done);
				let _ = self.check_nary_projection(actions);
				Ok(())
			}
			_ => Ok(()),
		}
	}

	fn remove(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError> {
		if self.is_unassigned(actions, index) {
			self.update_greatest_weight(actions);
			self.propagate(actions)
		} else if self.fixing(actions, index) != Fixing::Done {
			self.assign(actions, index)
		} else {
			Ok(())
		}
	}

	fn project_from_zero(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError> {
		let _ = index;
		self.update_greatest_weight(actions);
		self.propagate(actions)
	}

	fn eval(&self, actions: &A, tuple: &[Value]) -> Cost {
		self.evaluate(actions, tuple)
	}

	fn set_infinite_cost(&mut self, ub: Cost) {
		self.original_ub = self.original_ub.min(ub);
	}

	fn max_finite_cost(&self, actions: &A) -> Cost {
		self.get_max_finite_cost(actions)
	}

	fn tightness(&mut self, actions: &mut A) -> f64 {
		self.compute_tightness(actions)
	}

	fn conflict_weight(&self, index: Option<usize>) -> u64 {
		match index {
			Some(i) => self.conflict_weights[i] + self.conflict_weight,
			None => self.conflict_weight,
		}
	}

	fn inc_conflict_weight(&mut self, actions: &mut A, origin: ConflictOrigin<'_>) {
		self.increase_conflict_weight(actions, origin);
	}

	fn reset_conflict_weight(&mut self) {
		self.conflict_weight = 0;
		self.conflict_weights.iter_mut().for_each(|w| *w = 0);
	}

	fn dump(&self, actions: &A, form: DumpForm, out: &mut String) -> Result<(), DumpError> {
		self.write_wcsp(actions, form, out)
	}

	fn dump_cfn(&self, actions: &A, form: DumpForm, out: &mut String) -> Result<(), DumpError> {
		self.write_cfn(actions, form, out)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::Ordering;

	use expect_test::expect;
	use rangelist::RangeList;
	use tracing_test::traced_test;

	use crate::{
		actions::PropagationActions,
		cost_function::{knapsack::Role, DumpForm},
		Cost, CostFnRef, CostFunction, DpCadence, KnapsackBuilder, KnapsackConfig, Network,
		PropagationError, VarRef,
	};

	/// Create `n` Boolean variables named `x1` to `xn`.
	fn booleans(net: &mut Network, n: usize) -> Vec<VarRef> {
		(1..=n)
			.map(|i| net.new_var(format!("x{i}"), &RangeList::from_iter([0..=1])))
			.collect()
	}

	/// Four Boolean variables that each weigh 2 and cost 3 when set, at least
	/// two of which have to be set.
	fn fractional_instance(net: &mut Network) -> (Vec<VarRef>, KnapsackBuilder) {
		let vars = booleans(net, 4);
		let mut builder = KnapsackBuilder::new(3);
		for &v in &vars {
			net.set_unary_cost(v, 1, 3).unwrap();
			builder = builder.with_var(v, [(1, 2)]);
		}
		(vars, builder)
	}

	/// Four variables with capacity 9, on which the relaxation moves unary
	/// costs into the cost function at the root.
	fn moved_costs_instance(net: &mut Network) -> (Vec<VarRef>, KnapsackBuilder) {
		let items = [
			(vec![(0, 0), (1, 5)], vec![2, 4]),
			(vec![(0, 5), (1, 1), (2, 4), (3, 5)], vec![0, 3, 2, 4]),
			(vec![(0, 0), (1, 2), (2, 5)], vec![4, 1, 4]),
			(vec![(0, 3), (1, 5), (2, 3), (3, 1)], vec![3, 3, 2, 1]),
		];
		let mut vars = Vec::new();
		let mut builder = KnapsackBuilder::new(9);
		for (i, (weights, costs)) in items.into_iter().enumerate() {
			let x = net.new_var(format!("x{i}"), &RangeList::from_iter([0..=costs.len() as i64 - 1]));
			for (val, cost) in (0..).zip(costs) {
				net.set_unary_cost(x, val, cost).unwrap();
			}
			builder = builder.with_var(x, weights);
			vars.push(x);
		}
		(vars, builder)
	}

	/// Boolean members of a single AMO group with capacity 0, each carrying
	/// the given costs for its two values.
	fn cost_group(net: &mut Network, deltas: &[[Cost; 2]]) -> (Vec<VarRef>, KnapsackBuilder) {
		let vars = booleans(net, deltas.len());
		let mut builder = KnapsackBuilder::new(0)
			.with_config(KnapsackConfig::default().with_nary_projection_size(0));
		for (&v, d) in vars.iter().zip(deltas) {
			builder = builder.with_var(v, [(1, 1)]).with_deltas(v, d.to_vec());
		}
		let builder = builder.with_amo(vars.iter().map(|&v| (v, 1)).collect());
		(vars, builder)
	}

	/// The connected cost functions other than `cf`.
	fn others(net: &Network, cf: CostFnRef) -> Vec<CostFnRef> {
		net.cost_functions()
			.filter(|&o| o != cf && net.is_connected(o))
			.collect()
	}

	#[test]
	#[traced_test]
	fn test_assignment_forces_remaining_values() {
		let mut net = Network::new(100);
		let vars = booleans(&mut net, 3);
		let _ = net
			.add_knapsack(
				KnapsackBuilder::new(6)
					.with_var(vars[0], [(1, 3)])
					.with_var(vars[1], [(1, 4)])
					.with_var(vars[2], [(1, 5)])
					.with_config(KnapsackConfig::default().with_nary_projection_size(0)),
			)
			.unwrap();
		net.propagate().unwrap();
		for &v in &vars {
			assert_eq!(net.domain(v), vec![0, 1]);
		}
		let before = net.tuple_costs();

		net.new_level();
		net.assign(vars[0], 0).unwrap();
		assert_eq!(net.domain(vars[1]), vec![1]);
		assert_eq!(net.domain(vars[2]), vec![1]);
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[0] == 0).collect();
		net.assert_costs_preserved(&before);
		assert!(logs_contain("disconnect knapsack"));

		assert!(matches!(
			net.assign(vars[1], 0),
			Err(PropagationError::Contradiction(_))
		));
	}

	#[test]
	#[traced_test]
	fn test_amo_assignment_selects_last_member() {
		let mut net = Network::new(100);
		let vars = booleans(&mut net, 2);
		let builder = KnapsackBuilder::new(5)
			.with_var(vars[0], [(1, 5)])
			.with_var(vars[1], [(1, 5)])
			.with_amo(vec![(vars[0], 1), (vars[1], 1)])
			.with_config(KnapsackConfig::default().with_nary_projection_size(0));

		// The group is a single row: a value per member and a final "none"
		// value that weighs the unselected weights of all members.
		let k = builder.clone().build(net.state_mut()).unwrap();
		assert_eq!(
			k.roles,
			vec![Role::Member { group: 0, pos: 0 }, Role::Member { group: 0, pos: 1 }]
		);
		assert_eq!(k.rows.len(), 1);
		assert_eq!(k.rows[0].values, vec![0, 1, 2]);
		assert_eq!(k.rows[0].weights, vec![5, 5, 0]);
		assert_eq!(k.eval(net.state(), &[1, 0]), 0);
		assert_eq!(k.eval(net.state(), &[0, 1]), 0);
		assert_eq!(k.eval(net.state(), &[0, 0]), 100);
		assert_eq!(k.eval(net.state(), &[1, 1]), 100);

		let _ = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		let before = net.tuple_costs();

		net.new_level();
		net.assign(vars[0], 0).unwrap();
		assert_eq!(net.domain(vars[1]), vec![1]);
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[0] == 0).collect();
		net.assert_costs_preserved(&before);
	}

	#[test]
	#[traced_test]
	fn test_lower_bound_with_unary_costs() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		net.set_unary_cost(x, 1, 5).unwrap();
		net.set_unary_cost(y, 1, 2).unwrap();
		let _ = net
			.add_knapsack(
				KnapsackBuilder::new(4)
					.with_var(x, [(0, 2), (1, 3)])
					.with_var(y, [(0, 4), (1, 1)])
					.with_config(KnapsackConfig::default().with_nary_projection_size(0)),
			)
			.unwrap();
		let before = net.tuple_costs();
		net.propagate().unwrap();

		let min = net.tuple_costs().iter().map(|&(_, c)| c).min().unwrap();
		assert_eq!(net.lower_bound(), 0);
		assert_eq!(min, 0);
		net.assert_costs_preserved(&before);
		net.expect_costs(expect![[r#"
			0, 0 -> 0
			0, 1 -> 100
			1, 0 -> 5
			1, 1 -> 7"#]]);
	}

	#[test]
	#[traced_test]
	fn test_relaxation_rounds_lower_bound_up() {
		let mut net = Network::new(100);
		let (_, builder) = fractional_instance(&mut net);
		let _ = net.add_knapsack(builder).unwrap();
		let before = net.tuple_costs();
		net.propagate().unwrap();

		// One and a half variables at cost 3 each.
		assert_eq!(net.lower_bound(), 5);
		let min = net.tuple_costs().iter().map(|&(_, c)| c).min().unwrap();
		assert_eq!(min, 6);
		net.assert_costs_preserved(&before);
	}

	#[test]
	#[traced_test]
	fn test_dynamic_programming_closes_gap() {
		for (cadence, lb) in [(DpCadence::Never, 3), (DpCadence::EveryNode, 4)] {
			let mut net = Network::new(100);
			let vars = booleans(&mut net, 4);
			let mut builder = KnapsackBuilder::new(4)
				.with_config(KnapsackConfig::default().with_dp_cadence(cadence));
			for &v in &vars {
				net.set_unary_cost(v, 1, 2).unwrap();
				builder = builder.with_var(v, [(1, 3)]);
			}
			let _ = net.add_knapsack(builder).unwrap();
			let before = net.tuple_costs();
			net.propagate().unwrap();
			assert_eq!(net.lower_bound(), lb, "{cadence:?}");
			net.assert_costs_preserved(&before);
		}
	}

	#[test]
	#[traced_test]
	fn test_propagation_is_idempotent() {
		let mut net = Network::new(100);
		let (vars, builder) = fractional_instance(&mut net);
		let mut k = builder.build(net.state_mut()).unwrap();
		k.connect(net.state_mut());
		CostFunction::propagate(&mut k, net.state_mut()).unwrap();
		let lb = net.lower_bound();
		let unary: Vec<_> = vars.iter().map(|&v| net.unary_cost(v, 1)).collect();
		assert!(lb > 0);

		CostFunction::propagate(&mut k, net.state_mut()).unwrap();
		assert_eq!(net.lower_bound(), lb);
		assert_eq!(
			vars.iter().map(|&v| net.unary_cost(v, 1)).collect::<Vec<_>>(),
			unary
		);
		assert_eq!(k.lower_bound(net.state()), lb);
	}

	#[test]
	#[traced_test]
	fn test_backtrack_restores_state() {
		let mut net = Network::new(100);
		let (vars, builder) = fractional_instance(&mut net);
		let cf = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		let before = net.tuple_costs();
		assert_eq!(net.lower_bound(), 5);

		net.new_level();
		net.assign(vars[0], 1).unwrap();
		// Three unassigned variables remain, which are covered by a table.
		assert!(!net.is_connected(cf));
		net.backtrack(0);

		assert!(net.is_connected(cf));
		assert_eq!(net.lower_bound(), 5);
		for &v in &vars {
			assert_eq!(net.domain(v), vec![0, 1]);
		}
		assert_eq!(net.tuple_costs(), before);
	}

	#[test]
	#[traced_test]
	fn test_satisfied_amo_is_decomposed() {
		let mut net = Network::new(100);
		let vars = booleans(&mut net, 5);
		let mut builder = KnapsackBuilder::new(0);
		for &v in &vars {
			builder = builder.with_var(v, [(1, 1)]);
		}
		let cf = net
			.add_knapsack(builder.with_amo(vars.iter().map(|&v| (v, 1)).collect()))
			.unwrap();
		net.propagate().unwrap();
		let before = net.tuple_costs();

		net.new_level();
		net.assign(vars[0], 0).unwrap();
		assert!(!net.is_connected(cf));
		assert!(net.cost_functions().count() > 1);
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[0] == 0).collect();
		net.assert_costs_preserved(&before);
	}

	#[test]
	#[traced_test]
	fn test_table_projection_after_removal() {
		let mut net = Network::new(100);
		let (vars, builder) = moved_costs_instance(&mut net);
		let cf = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		let root = net.tuple_costs();

		net.new_level();
		net.remove(vars[2], 2).unwrap();
		let before = net.tuple_costs();
		net.new_level();
		net.assign(vars[0], 0).unwrap();
		assert!(!net.is_connected(cf));
		assert!(logs_contain("replace knapsack by table"));

		let tables = others(&net, cf);
		assert_eq!(tables.len(), 1);
		let table = net.cost_function(tables[0]);
		assert_eq!(table.scope(), &vars[1..]);
		// x2 = 2 was removed, so its tuples are forbidden.
		assert_eq!(table.eval(net.state(), &[0, 2, 3]), 100);
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[0] == 0).collect();
		net.assert_costs_preserved(&before);
		assert!(net.tuple_costs().iter().all(|&(_, c)| c >= 0));

		net.backtrack(0);
		assert!(net.is_connected(cf));
		assert!(!net.is_connected(tables[0]));
		assert_eq!(net.tuple_costs(), root);
	}

	#[test]
	#[traced_test]
	fn test_dump_after_removal() {
		let mut net = Network::new(100);
		let (vars, builder) = moved_costs_instance(&mut net);
		let cf = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		net.new_level();
		net.remove(vars[2], 2).unwrap();
		assert!(net.is_connected(cf));

		let dump = net.dump(DumpForm::Original).unwrap();
		let mut lines = dump.lines();
		let header = lines.next().unwrap();
		assert!(header.starts_with("4 0 1 2 3 "), "{header}");
		assert!(!header.contains("knapsack"), "{header}");
		for line in lines {
			let fields: Vec<i64> = line.split_whitespace().map(|f| f.parse().unwrap()).collect();
			assert_eq!(fields.len(), 5, "{line}");
			assert_ne!(fields[2], 2, "{line}");
			assert!((0..100).contains(&fields[4]), "{line}");
		}
		assert!(net.dump_cfn(DumpForm::Original).is_ok());
	}

	#[test]
	#[traced_test]
	fn test_interrupted_propagation() {
		let mut net = Network::new(100);
		let vars = booleans(&mut net, 4);
		let mut builder = KnapsackBuilder::new(4)
			.with_config(KnapsackConfig::default().with_dp_cadence(DpCadence::EveryNode));
		for &v in &vars {
			net.set_unary_cost(v, 1, 2).unwrap();
			builder = builder.with_var(v, [(1, 3)]);
		}
		let cf = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		assert_eq!(net.lower_bound(), 4);
		let before = net.tuple_costs();

		let interrupt = net.interrupt_flag();
		net.new_level();
		interrupt.store(true, Ordering::Relaxed);
		PropagationActions::assign(net.state_mut(), vars[0], 1).unwrap();
		assert_eq!(net.propagate(), Err(PropagationError::Timeout));
		assert!(net.is_connected(cf));

		interrupt.store(false, Ordering::Relaxed);
		net.backtrack(0);
		assert!(net.is_connected(cf));
		assert_eq!(net.lower_bound(), 4);
		for &v in &vars {
			assert_eq!(net.domain(v), vec![0, 1]);
		}
		assert_eq!(net.tuple_costs(), before);

		net.new_level();
		net.assign(vars[0], 1).unwrap();
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[0] == 1).collect();
		net.assert_costs_preserved(&before);
	}

	#[test]
	#[traced_test]
	fn test_group_becomes_binary_table() {
		let mut net = Network::new(100);
		let (vars, builder) = cost_group(&mut net, &[[0, 2], [1, 0], [2, 3]]);
		let cf = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		let before = net.tuple_costs();

		net.new_level();
		net.assign(vars[2], 0).unwrap();
		assert!(!net.is_connected(cf));
		let tables = others(&net, cf);
		assert_eq!(tables.len(), 1);
		assert_eq!(net.cost_function(tables[0]).scope(), &vars[..2]);
		assert_eq!(net.lower_bound(), 2);
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[2] == 0).collect();
		net.assert_costs_preserved(&before);
		net.expect_costs(expect![[r#"
			0, 0, 0 -> 3
			0, 1, 0 -> 2
			1, 0, 0 -> 5
			1, 1, 0 -> 100"#]]);
	}

	#[test]
	#[traced_test]
	fn test_group_becomes_ternary_table() {
		let mut net = Network::new(100);
		let (vars, builder) = cost_group(&mut net, &[[0, 2], [1, 0], [0, 3], [2, 3]]);
		let cf = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		let before = net.tuple_costs();

		net.new_level();
		net.assign(vars[3], 0).unwrap();
		assert!(!net.is_connected(cf));
		let tables = others(&net, cf);
		assert_eq!(tables.len(), 1);
		assert_eq!(net.cost_function(tables[0]).scope(), &vars[..3]);
		assert_eq!(net.lower_bound(), 2);
		let filtered: Vec<_> = before.iter().filter(|(t, _)| t[3] == 0).cloned().collect();
		net.assert_costs_preserved(&filtered);
		net.expect_costs(expect![[r#"
			0, 0, 0, 0 -> 3
			0, 0, 1, 0 -> 6
			0, 1, 0, 0 -> 2
			0, 1, 1, 0 -> 100
			1, 0, 0, 0 -> 5
			1, 0, 1, 0 -> 100
			1, 1, 0, 0 -> 100
			1, 1, 1, 0 -> 100"#]]);

		net.backtrack(0);
		assert!(net.is_connected(cf));
		assert!(!net.is_connected(tables[0]));
		assert_eq!(net.tuple_costs(), before);
	}

	#[test]
	#[traced_test]
	fn test_large_group_becomes_smaller_knapsack() {
		let mut net = Network::new(100);
		let (vars, builder) = cost_group(&mut net, &[[0, 2], [1, 0], [0, 3], [2, 0], [1, 1]]);
		let cf = net.add_knapsack(builder).unwrap();
		net.propagate().unwrap();
		let before = net.tuple_costs();

		net.new_level();
		net.assign(vars[4], 0).unwrap();
		assert!(!net.is_connected(cf));
		let spawned = others(&net, cf);
		assert_eq!(spawned.len(), 1);
		assert_eq!(net.cost_function(spawned[0]).scope(), &vars[..4]);
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[4] == 0).collect();
		net.assert_costs_preserved(&before);
		assert_eq!(net.tuple_costs().iter().map(|&(_, c)| c).min(), Some(2));

		// Selecting a member forces the others of the smaller knapsack.
		net.new_level();
		net.assign(vars[1], 1).unwrap();
		for &v in &[vars[0], vars[2], vars[3]] {
			assert_eq!(net.domain(v), vec![0]);
		}
		let before: Vec<_> = before.into_iter().filter(|(t, _)| t[1] == 1).collect();
		net.assert_costs_preserved(&before);
	}
}
