//! This module contains the interface that cost functions must implement to be
//! hosted by a cost function network, and the errors that can occur during
//! their construction, propagation, or printing.

pub mod knapsack;
pub mod table;

use std::{
	error::Error,
	fmt::{self, Debug, Display},
};

use thiserror::Error as ThisError;

use crate::{
	actions::PropagationActions,
	cost_function::{knapsack::KnapsackBuilder, table::TableBuilder},
	network::VarRef,
	Cost, Value,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// A conflict detected during propagation: either the domain of a variable
/// became empty, or the lower bound of the network reached its upper bound.
pub struct Conflict {
	/// The variable whose domain became empty, if any.
	pub subject: Option<VarRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
/// Errors that can occur during the propagation of a cost function.
pub enum PropagationError {
	#[error("propagation found the current node to be inconsistent: {0}")]
	/// The current (partial) assignment cannot be extended to a solution with a
	/// cost lower than the upper bound.
	Contradiction(#[from] Conflict),
	#[error("propagation was interrupted")]
	/// The user requested the search to stop.
	Timeout,
}

#[derive(Debug, ThisError)]
/// Errors that can occur when printing a cost function.
pub enum DumpError {
	#[error("cost function cannot be written in this format: {0}")]
	/// The cost function has no representation in the requested format.
	WrongFileFormat(&'static str),
	#[error("unable to write cost function")]
	/// The underlying writer failed.
	Fmt(#[from] fmt::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
/// Errors that can occur when creating a cost function.
pub enum BuildError {
	#[error("variable {0} occurs more than once in the scope")]
	/// A variable was added twice to the scope of the cost function.
	DuplicateVariable(VarRef),
	#[error("value {1} is not in the domain of variable {0}")]
	/// A weight or cost was given for a value outside the initial domain.
	UnknownValue(VarRef, Value),
	#[error("variable {0} in an at-most-one group must have domain {{0, 1}}")]
	/// An at-most-one group was given a non-Boolean variable.
	NonBooleanMember(VarRef),
	#[error("variable {0} is not part of the scope")]
	/// An at-most-one group or cost delta refers to an unknown variable.
	UnknownVariable(VarRef),
	#[error("variable {0} occurs in more than one at-most-one group")]
	/// A variable was added to more than one at-most-one group.
	OverlappingGroups(VarRef),
	#[error("the number of costs does not match the number of tuples")]
	/// The costs given to a table cost function do not cover its tuples.
	TableSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// The forms in which a cost function can be printed.
pub enum DumpForm {
	/// The cost function as it was created, over the initial domains of its
	/// variables.
	Original,
	/// The cost function restricted to the current domains of its unassigned
	/// variables.
	Current,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The cost function at the origin of a conflict.
pub enum ConflictOrigin<'a> {
	/// The conflict was raised by the cost function itself.
	This,
	/// The conflict was raised by another cost function with the given scope.
	Other(&'a [VarRef]),
}

#[derive(Debug)]
/// A cost function created during propagation, that is added to the network
/// (at the current search level) after the propagation call has finished.
pub enum Spawn {
	/// An explicit table cost function.
	Table(TableBuilder),
	/// A knapsack cost function.
	Knapsack(KnapsackBuilder),
}

/// The interface of a cost function hosted by a cost function network.
///
/// A cost function is informed of the changes to its variables through the
/// `assign`, `remove`, `increase`, `decrease`, and `project_from_zero` methods,
/// which receive the index of the variable in its scope.
pub trait CostFunction<A: PropagationActions>: Debug {
	/// Make the cost function part of the network at the current search level.
	fn connect(&mut self, actions: &mut A);
	/// The variables on which the cost function depends.
	fn scope(&self) -> &[VarRef];
	/// Whether the cost function is still part of the network.
	fn is_connected(&self, actions: &A) -> bool;

	/// Propagate the cost function from scratch.
	fn propagate(&mut self, actions: &mut A) -> Result<(), PropagationError>;
	/// Notify the cost function that the variable at `index` has been assigned.
	fn assign(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError>;
	/// Notify the cost function that a value was removed from the domain of the
	/// variable at `index`.
	fn remove(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError> {
		let _ = index;
		self.propagate(actions)
	}
	/// Notify the cost function that the lower bound of the variable at `index`
	/// increased.
	fn increase(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError> {
		self.remove(actions, index)
	}
	/// Notify the cost function that the upper bound of the variable at `index`
	/// decreased.
	fn decrease(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError> {
		self.remove(actions, index)
	}
	/// Notify the cost function that a unary cost of the variable at `index`
	/// increased from zero.
	fn project_from_zero(&mut self, actions: &mut A, index: usize) -> Result<(), PropagationError> {
		let _ = (actions, index);
		Ok(())
	}

	/// The cost of a complete assignment of the scope, in scope order.
	fn eval(&self, actions: &A, tuple: &[Value]) -> Cost;
	/// Notify the cost function that the upper bound of the network changed.
	fn set_infinite_cost(&mut self, ub: Cost) {
		let _ = ub;
	}
	/// The largest finite cost that the cost function can return.
	fn max_finite_cost(&self, actions: &A) -> Cost;
	/// The ratio of forbidden tuples in the current domains.
	fn tightness(&mut self, actions: &mut A) -> f64;

	/// The number of conflicts in which the cost function (and the variable at
	/// `index`, if given) took part.
	fn conflict_weight(&self, index: Option<usize>) -> u64;
	/// Record that a conflict occurred.
	fn inc_conflict_weight(&mut self, actions: &mut A, origin: ConflictOrigin<'_>);
	/// Forget all recorded conflicts.
	fn reset_conflict_weight(&mut self);

	/// Print the cost function in the text (wcsp) format.
	fn dump(&self, actions: &A, form: DumpForm, out: &mut String) -> Result<(), DumpError>;
	/// Print the cost function in the JSON-like CFN format.
	fn dump_cfn(&self, actions: &A, form: DumpForm, out: &mut String) -> Result<(), DumpError>;
}

impl Display for Conflict {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.subject {
			Some(var) => write!(f, "domain of variable {var} is empty"),
			None => write!(f, "lower bound reached the upper bound"),
		}
	}
}

impl Error for Conflict {}

impl Conflict {
	/// Create a conflict caused by the lower bound of the network.
	pub(crate) fn bound() -> Self {
		Self { subject: None }
	}

	/// Create a conflict caused by the empty domain of `var`.
	pub(crate) fn wipeout(var: VarRef) -> Self {
		Self { subject: Some(var) }
	}
}
