//! # Softknap - Soft Knapsack Constraints for Cost Function Networks
//!
//! Softknap provides a global cost function that enforces a weighted sum of
//! integer variables to reach a capacity, with the soft variant of the
//! constraint expressed through the unary costs of a Cost Function Network
//! (CFN). The cost function keeps a local lower bound of the costs that are
//! guaranteed to be paid within its scope, and uses a linear relaxation of the
//! problem to move costs between the unary cost functions of its variables and
//! the global lower bound of the network. Optionally, groups of Boolean
//! variables can be declared as "at most one" (AMO) cliques, which the cost
//! function handles as single virtual variables.
//!
//! The crate also contains a small [`Network`] implementation that is able to
//! host cost functions, and which is used to drive and test the propagation
//! of the knapsack cost function.

pub mod actions;
pub mod cost_function;
pub mod network;
#[cfg(test)]
pub(crate) mod tests;

pub use crate::{
	cost_function::{
		knapsack::{
			ConsistencyLevel, DpCadence, KnapsackBuilder, KnapsackConfig, KnapsackCostFunction,
		},
		table::{TableBuilder, TableCostFunction},
		BuildError, Conflict, CostFunction, DumpError, PropagationError, Spawn,
	},
	network::{CostFnRef, Network, VarRef},
};

/// Type alias for the costs used within the network.
pub type Cost = i64;

/// Type alias for the values that variables in the network can take.
pub type Value = i64;

/// Type alias for the weights used by the knapsack cost function.
pub type Weight = i64;

/// The minimal cost of any (partial) assignment.
pub const MIN_COST: Cost = 0;

/// The largest cost that can be used within the network.
///
/// The constant is chosen such that the sum of a few of these costs does not
/// overflow an [`i64`].
pub const MAX_COST: Cost = i64::MAX / 16;
