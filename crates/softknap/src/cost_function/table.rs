//! Cost functions given by an explicit cost for every tuple of the initial
//! domains of their variables.

use std::fmt::Write;

use crate::{
	actions::{InitActions, InspectionActions, PropagationActions},
	cost_function::{
		BuildError, Conflict, ConflictOrigin, CostFunction, DumpError, DumpForm, PropagationError,
	},
	network::{trail::TrailedInt, VarRef},
	Cost, Value, MAX_COST,
};

#[derive(Clone, Debug, PartialEq, Eq)]
/// Description of a [`TableCostFunction`] that has not been added to a network
/// yet.
pub struct TableBuilder {
	/// The variables of the table.
	scope: Vec<VarRef>,
	/// Cost of every tuple, in lexicographic order of the initial domains.
	costs: Option<Vec<Cost>>,
	/// Cost of the tuples that are not listed.
	default: Cost,
	/// Costs of individual tuples, applied after `costs`.
	entries: Vec<(Vec<Value>, Cost)>,
}

#[derive(Debug)]
/// A cost function over a small number of variables that stores the cost of
/// every tuple.
///
/// The table does not enforce any consistency as long as two or more of its
/// variables are unassigned. Once at most one variable remains, its costs are
/// moved to the unary cost function of that variable (or to the lower bound)
/// and the table disconnects.
pub struct TableCostFunction {
	/// The variables of the table.
	scope: Vec<VarRef>,
	/// The initial domain of each variable.
	domains: Vec<Vec<Value>>,
	/// Cost of every tuple, in lexicographic order of `domains`.
	costs: Vec<Cost>,
	/// Whether the table is part of the network.
	connected: TrailedInt,
	/// The number of conflicts raised by the table.
	conflict_weight: u64,
}

impl TableBuilder {
	/// Create a table over `scope` whose tuples all cost zero.
	pub fn new(scope: Vec<VarRef>) -> Self {
		Self {
			scope,
			costs: None,
			default: 0,
			entries: Vec::new(),
		}
	}

	/// Give the cost of every tuple, in lexicographic order of the initial
	/// domains.
	pub fn with_costs(mut self, costs: Vec<Cost>) -> Self {
		self.costs = Some(costs);
		self
	}

	/// Change the cost of the tuples that are not given explicitly.
	pub fn with_default(mut self, cost: Cost) -> Self {
		self.default = cost;
		self
	}

	/// Give the cost of a single tuple.
	pub fn with_tuple(mut self, tuple: Vec<Value>, cost: Cost) -> Self {
		self.entries.push((tuple, cost));
		self
	}

	/// Create the table whose costs are given by `cost` for every tuple of the
	/// initial domains of `scope`.
	///
	/// Tuples that contain a removed value cost the upper bound, and `cost` is
	/// not called for them.
	pub(crate) fn tabulate<A: InspectionActions>(
		actions: &A,
		scope: Vec<VarRef>,
		mut cost: impl FnMut(&[Value]) -> Cost,
	) -> Self {
		let domains: Vec<Vec<Value>> = scope
			.iter()
			.map(|&v| actions.initial_domain(v).to_vec())
			.collect();
		let ub = actions.upper_bound();
		let costs = tuples(&domains)
			.map(|t| {
				if scope.iter().zip(&t).all(|(&var, &val)| actions.can_be(var, val)) {
					cost(&t)
				} else {
					ub
				}
			})
			.collect();
		Self::new(scope).with_costs(costs)
	}

	/// Create the table in the network using `actions`.
	pub fn build<A: InitActions>(self, actions: &mut A) -> Result<TableCostFunction, BuildError> {
		for (i, &v) in self.scope.iter().enumerate() {
			if self.scope[..i].contains(&v) {
				return Err(BuildError::DuplicateVariable(v));
			}
		}
		let domains: Vec<Vec<Value>> = self
			.scope
			.iter()
			.map(|&v| actions.initial_domain(v).to_vec())
			.collect();
		let size = domains.iter().map(Vec::len).product::<usize>();
		let mut costs = match self.costs {
			Some(costs) if costs.len() == size => costs,
			Some(_) => return Err(BuildError::TableSize),
			None => vec![self.default; size],
		};
		for (tuple, cost) in self.entries {
			if tuple.len() != self.scope.len() {
				return Err(BuildError::TableSize);
			}
			let mut pos = 0;
			for ((&var, dom), &val) in self.scope.iter().zip(&domains).zip(&tuple) {
				let idx = dom
					.binary_search(&val)
					.map_err(|_| BuildError::UnknownValue(var, val))?;
				pos = pos * dom.len() + idx;
			}
			costs[pos] = cost;
		}
		Ok(TableCostFunction {
			scope: self.scope,
			domains,
			costs,
			connected: actions.new_trailed_int(0),
			conflict_weight: 0,
		})
	}
}

impl TableCostFunction {
	/// The position of `tuple` in the table, if all its values are part of the
	/// initial domains.
	fn position(&self, tuple: &[Value]) -> Option<usize> {
		let mut pos = 0;
		for (dom, val) in self.domains.iter().zip(tuple) {
			pos = pos * dom.len() + dom.binary_search(val).ok()?;
		}
		Some(pos)
	}

	/// The cost of `tuple`, or [`MAX_COST`] if it is outside the table.
	fn cost(&self, tuple: &[Value]) -> Cost {
		self.position(tuple).map_or(MAX_COST, |pos| self.costs[pos])
	}

	/// The current domains of the variables of the table.
	fn current_domains<A: InspectionActions>(&self, actions: &A) -> Vec<Vec<Value>> {
		self.scope.iter().map(|&v| actions.domain(v)).collect()
	}

	/// Move the costs of the table to the only unassigned variable or to the
	/// lower bound, and disconnect.
	fn project_remaining<A: PropagationActions>(&mut self, actions: &mut A) -> Result<(), Conflict> {
		let free: Vec<usize> = (0..self.scope.len())
			.filter(|&i| !actions.is_assigned(self.scope[i]))
			.collect();
		if free.len() > 1 {
			return Ok(());
		}
		let _ = actions.set_trailed_int(self.connected, 0);
		let mut tuple: Vec<Value> = self
			.scope
			.iter()
			.map(|&v| actions.value(v).unwrap_or_default())
			.collect();
		match free.first() {
			None => actions.project_lb(self.cost(&tuple)),
			Some(&i) => {
				let var = self.scope[i];
				for val in actions.domain(var) {
					tuple[i] = val;
					let cost = self.cost(&tuple);
					if cost > 0 {
						actions.project(var, val, cost, false)?;
					}
				}
				actions.find_support(var)
			}
		}
	}
}

impl<A: PropagationActions> CostFunction<A> for TableCostFunction {
	fn connect(&mut self, actions: &mut A) {
		let _ = actions.set_trailed_int(self.connected, 1);
	}

	fn scope(&self) -> &[VarRef] {
		&self.scope
	}

	fn is_connected(&self, actions: &A) -> bool {
		actions.get_trailed_int(self.connected) != 0
	}

	fn propagate(&mut self, actions: &mut A) -> Result<(), PropagationError> {
		self.project_remaining(actions)?;
		Ok(())
	}

	fn assign(&mut self, actions: &mut A, _: usize) -> Result<(), PropagationError> {
		self.propagate(actions)
	}

	fn eval(&self, _: &A, tuple: &[Value]) -> Cost {
		self.cost(tuple)
	}

	fn max_finite_cost(&self, actions: &A) -> Cost {
		let ub = actions.upper_bound();
		self.costs.iter().copied().filter(|&c| c < ub).max().unwrap_or(0)
	}

	fn tightness(&mut self, actions: &mut A) -> f64 {
		let ub = actions.upper_bound();
		let (mut total, mut forbidden) = (0usize, 0usize);
		for t in tuples(&self.current_domains(actions)) {
			total += 1;
			if self.cost(&t) >= ub {
				forbidden += 1;
			}
		}
		if total == 0 {
			0.0
		} else {
			forbidden as f64 / total as f64
		}
	}

	fn conflict_weight(&self, _: Option<usize>) -> u64 {
		self.conflict_weight
	}

	fn inc_conflict_weight(&mut self, _: &mut A, origin: ConflictOrigin<'_>) {
		if origin == ConflictOrigin::This {
			self.conflict_weight += 1;
		}
	}

	fn reset_conflict_weight(&mut self) {
		self.conflict_weight = 0;
	}

	fn dump(&self, actions: &A, form: DumpForm, out: &mut String) -> Result<(), DumpError> {
		let ub = actions.upper_bound();
		let (vars, domains): (Vec<VarRef>, Vec<Vec<Value>>) = match form {
			DumpForm::Original => (self.scope.clone(), self.domains.clone()),
			DumpForm::Current => self
				.scope
				.iter()
				.map(|&v| (v, actions.domain(v)))
				.unzip(),
		};
		let listed: Vec<(Vec<Value>, Cost)> = tuples(&domains)
			.map(|t| {
				let c = self.cost(&t).min(ub);
				(t, c)
			})
			.filter(|&(_, c)| c > 0)
			.collect();
		let free: Vec<usize> = match form {
			DumpForm::Original => (0..vars.len()).collect(),
			DumpForm::Current => (0..vars.len())
				.filter(|&i| !actions.is_assigned(vars[i]))
				.collect(),
		};
		write!(out, "{}", free.len())?;
		for &i in &free {
			let id = match form {
				DumpForm::Original => Some(vars[i].index()),
				DumpForm::Current => actions.current_var_id(vars[i]),
			};
			write!(out, " {}", id.unwrap_or_default())?;
		}
		writeln!(out, " 0 {}", listed.len())?;
		for (t, c) in listed {
			for &i in &free {
				let idx = match form {
					DumpForm::Original => actions.to_index(vars[i], t[i]),
					DumpForm::Current => actions.to_current_index(vars[i], t[i]),
				};
				write!(out, "{} ", idx.unwrap_or_default())?;
			}
			writeln!(out, "{c}")?;
		}
		Ok(())
	}

	fn dump_cfn(&self, actions: &A, form: DumpForm, out: &mut String) -> Result<(), DumpError> {
		let ub = actions.upper_bound();
		let ids: Vec<String> = self.scope.iter().map(|v| v.index().to_string()).collect();
		let names: Vec<String> = self
			.scope
			.iter()
			.map(|&v| format!("\"{}\"", actions.var_name(v)))
			.collect();
		write!(
			out,
			"\"F_{}\":{{\"scope\":[{}],\"defaultcost\":0,\n\"costs\":[",
			ids.join("_"),
			names.join(",")
		)?;
		let domains = match form {
			DumpForm::Original => self.domains.clone(),
			DumpForm::Current => self.current_domains(actions),
		};
		let mut first = true;
		for t in tuples(&domains) {
			let c = self.cost(&t).min(ub);
			if c == 0 {
				continue;
			}
			if !first {
				write!(out, ",")?;
			}
			first = false;
			for (&v, val) in self.scope.iter().zip(&t) {
				let idx = match form {
					DumpForm::Original => actions.to_index(v, *val),
					DumpForm::Current => actions.to_current_index(v, *val),
				};
				write!(out, "{},", idx.unwrap_or_default())?;
			}
			write!(out, "{c}")?;
		}
		writeln!(out, "]}},")?;
		Ok(())
	}
}

/// Iterate over all tuples of the given domains in lexicographic order.
pub(crate) fn tuples(domains: &[Vec<Value>]) -> impl Iterator<Item = Vec<Value>> + '_ {
	use itertools::{Either, Itertools};

	if domains.is_empty() {
		Either::Left(std::iter::once(Vec::new()))
	} else {
		Either::Right(
			domains
				.iter()
				.map(|d| d.iter().copied())
				.multi_cartesian_product(),
		)
	}
}

#[cfg(test)]
mod tests {
	use expect_test::expect;
	use rangelist::RangeList;
	use tracing_test::traced_test;

	use crate::{
		cost_function::{table::TableBuilder, DumpForm},
		Network,
	};

	#[test]
	#[traced_test]
	fn test_table_projects_last_variable() {
		let mut net = Network::new(10);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=2]));
		let cf = net
			.add_table(TableBuilder::new(vec![x, y]).with_costs(vec![1, 2, 3, 4, 10, 6]))
			.unwrap();
		net.propagate().unwrap();
		assert!(net.is_connected(cf));
		assert_eq!(net.total_cost(&[1, 2]), 6);

		net.new_level();
		net.assign(x, 1).unwrap();
		assert!(!net.is_connected(cf));
		// Cost 4 is moved to the lower bound, value 1 reaches the upper bound.
		assert_eq!(net.lower_bound(), 4);
		assert_eq!(net.domain(y), vec![0, 2]);
		assert_eq!(net.unary_cost(y, 2), 2);
		assert_eq!(net.total_cost(&[1, 2]), 6);

		net.backtrack(0);
		assert!(net.is_connected(cf));
		assert_eq!(net.lower_bound(), 0);
		assert_eq!(net.domain(y), vec![0, 1, 2]);
	}

	#[test]
	fn test_table_entries() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([3..=4]));
		let cf = net
			.add_table(
				TableBuilder::new(vec![x, y])
					.with_default(5)
					.with_tuple(vec![1, 4], 0)
					.with_tuple(vec![0, 3], 7),
			)
			.unwrap();
		assert_eq!(net.total_cost(&[1, 4]), 0);
		assert_eq!(net.total_cost(&[0, 3]), 7);
		assert_eq!(net.total_cost(&[0, 4]), 5);

		let dump = net.dump(DumpForm::Original).unwrap();
		expect![[r#"
		    2 0 1 0 3
		    0 0 7
		    0 1 5
		    1 0 5
"#]]
		.assert_eq(&dump);
		let cfn = net.dump_cfn(DumpForm::Original).unwrap();
		expect![[r#"
		    "F_0_1":{"scope":["x","y"],"defaultcost":0,
		    "costs":[0,0,7,0,1,5,1,0,5]},
"#]]
		.assert_eq(&cfn);
		assert_eq!(net.cost_function(cf).scope(), &[x, y]);
	}

	#[test]
	fn test_table_errors() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		assert_eq!(
			net.add_table(TableBuilder::new(vec![x]).with_costs(vec![1]))
				.unwrap_err()
				.to_string(),
			"the number of costs does not match the number of tuples"
		);
		assert_eq!(
			net.add_table(TableBuilder::new(vec![x]).with_tuple(vec![3], 1))
				.unwrap_err()
				.to_string(),
			format!("value 3 is not in the domain of variable {x}")
		);
	}
}
