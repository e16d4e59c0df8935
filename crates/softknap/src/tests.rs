//! Helpers shared by the unit tests of the crate.

use expect_test::Expect;
use itertools::Itertools;

use crate::{Cost, Network, Value};

impl Network {
	/// The cost of every complete assignment of the current domains, with the
	/// variables in the order in which they were created.
	pub(crate) fn tuple_costs(&self) -> Vec<(Vec<Value>, Cost)> {
		self.vars()
			.map(|v| self.domain(v))
			.multi_cartesian_product()
			.map(|tuple| {
				let cost = self.total_cost(&tuple);
				(tuple, cost)
			})
			.collect()
	}

	/// Assert that the current network gives every complete assignment in
	/// `before` the same cost, and that any assignment that is no longer
	/// possible was forbidden.
	pub(crate) fn assert_costs_preserved(&self, before: &[(Vec<Value>, Cost)]) {
		let ub = self.upper_bound();
		let after = self.tuple_costs();
		for (tuple, cost) in before {
			match after.iter().find(|(t, _)| t == tuple) {
				Some((_, c)) => assert_eq!(c, cost, "cost of {tuple:?} changed"),
				None => assert!(*cost >= ub, "tuple {tuple:?} of cost {cost} was removed"),
			}
		}
	}

	/// Check the costs of the complete assignments of the current domains
	/// against a snapshot.
	pub(crate) fn expect_costs(&self, expect: Expect) {
		let lines = self
			.tuple_costs()
			.into_iter()
			.map(|(tuple, cost)| format!("{} -> {cost}", tuple.iter().join(", ")))
			.join("\n");
		expect.assert_eq(&lines);
	}
}
