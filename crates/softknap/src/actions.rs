//! Traits that encapsulate different sets of actions that can be performed at
//! different phases and by different objects in the cost function network.

use crate::{
	cost_function::{Conflict, Spawn},
	network::{trail::TrailedInt, VarRef},
	Cost, Value,
};

/// Actions that can be performed to change trailed values, whose changes are
/// undone when the search backtracks.
pub trait TrailingActions {
	/// Get the current value of a trailed integer.
	fn get_trailed_int(&self, i: TrailedInt) -> i64;
	/// Change the value of a trailed integer, returning the previous value.
	fn set_trailed_int(&mut self, i: TrailedInt, v: i64) -> i64;
}

/// Actions that can be performed when a cost function is initialized within a
/// network.
pub trait InitActions: InspectionActions {
	/// Create a new trailed integer with the given initial value.
	fn new_trailed_int(&mut self, init: i64) -> TrailedInt;
}

/// Actions that can be performed to inspect the current state of the network.
pub trait InspectionActions: TrailingActions {
	/// Check whether `val` is still in the domain of `var`.
	fn can_be(&self, var: VarRef, val: Value) -> bool;
	/// Check whether `val` has been removed from the domain of `var`.
	fn cannot_be(&self, var: VarRef, val: Value) -> bool {
		!self.can_be(var, val)
	}
	/// Check whether only a single value remains in the domain of `var`.
	fn is_assigned(&self, var: VarRef) -> bool {
		self.domain_size(var) == 1
	}
	/// Get the value of `var`, if it is assigned.
	fn value(&self, var: VarRef) -> Option<Value>;
	/// Get the values that remain in the domain of `var`, in increasing order.
	fn domain(&self, var: VarRef) -> Vec<Value>;
	/// Get the number of values that remain in the domain of `var`.
	fn domain_size(&self, var: VarRef) -> usize;
	/// Get the domain of `var` when it was created, in increasing order.
	fn initial_domain(&self, var: VarRef) -> &[Value];
	/// Get the index of `val` in the initial domain of `var`.
	fn to_index(&self, var: VarRef, val: Value) -> Option<usize>;
	/// Get the index of `val` in the current domain of `var`.
	fn to_current_index(&self, var: VarRef, val: Value) -> Option<usize>;
	/// Get the position of `var` among the unassigned variables of the network.
	fn current_var_id(&self, var: VarRef) -> Option<usize>;
	/// Get the name given to `var`.
	fn var_name(&self, var: VarRef) -> &str;
	/// Get the unary cost of assigning `val` to `var`.
	fn unary_cost(&self, var: VarRef, val: Value) -> Cost;
	/// Get the value of `var` that currently has a zero unary cost.
	fn support(&self, var: VarRef) -> Value;
	/// Get the position of `var` in the directional arc consistency order.
	fn dac_order(&self, var: VarRef) -> usize;
	/// Get the cost at which an assignment is forbidden.
	fn upper_bound(&self) -> Cost;
	/// Get the global lower bound of the network.
	fn lower_bound(&self) -> Cost;
	/// Get the number of search nodes that have been explored.
	fn num_nodes(&self) -> u64;
	/// Check whether the user has requested the search to be interrupted.
	fn is_interrupted(&self) -> bool;
}

/// Actions that can be performed during the propagation of a cost function.
pub trait PropagationActions: InspectionActions {
	/// Remove `val` from the domain of `var`.
	fn remove(&mut self, var: VarRef, val: Value) -> Result<(), Conflict>;
	/// Remove all values other than `val` from the domain of `var`.
	fn assign(&mut self, var: VarRef, val: Value) -> Result<(), Conflict>;
	/// Move `cost` from the unary cost of `val` for `var` to the cost function
	/// that performs the action.
	fn extend(&mut self, var: VarRef, val: Value, cost: Cost);
	/// Move `cost` from the cost function that performs the action to the unary
	/// cost of `val` for `var`.
	///
	/// When `delayed` is set, the value is not removed directly when its
	/// unary cost becomes too high, but only when node consistency is next
	/// enforced.
	fn project(&mut self, var: VarRef, val: Value, cost: Cost, delayed: bool)
		-> Result<(), Conflict>;
	/// Move the minimum unary cost of `var` to the global lower bound.
	fn find_support(&mut self, var: VarRef) -> Result<(), Conflict>;
	/// Increase the global lower bound of the network by `cost`.
	fn project_lb(&mut self, cost: Cost) -> Result<(), Conflict>;
	/// Post a new cost function, which is added to the network when the current
	/// propagation call has finished.
	fn spawn(&mut self, spawn: Spawn);
}
