//! Construction of [`KnapsackCostFunction`] objects from lists of weighted
//! values and at-most-one groups.

use std::collections::HashMap;

use tracing::debug;

use crate::{
	actions::InitActions,
	cost_function::{
		knapsack::{vac::VacState, Group, KnapsackConfig, KnapsackCostFunction, Role, Row, RowKind},
		BuildError,
	},
	network::VarRef,
	Cost, Value, Weight,
};

#[derive(Clone, Debug, Default, PartialEq)]
/// Description of a [`KnapsackCostFunction`] that has not been added to a
/// network yet.
pub struct KnapsackBuilder {
	/// The capacity that the weighted sum has to reach.
	capacity: Weight,
	/// The variables with their weighted values. Values that are not listed
	/// weigh zero.
	vars: Vec<(VarRef, Vec<(Value, Weight)>)>,
	/// The at-most-one groups, as lists of (variable, literal) pairs.
	groups: Vec<Vec<(VarRef, Value)>>,
	/// The configuration of the propagation.
	config: KnapsackConfig,
	/// Cost already projected onto the lower bound on behalf of the new cost
	/// function.
	lb: Cost,
	/// Initial deltas of the items of some variables.
	deltas: Vec<(VarRef, Vec<Cost>)>,
}

impl KnapsackBuilder {
	/// Create a knapsack over no variables with the given capacity.
	pub fn new(capacity: Weight) -> Self {
		Self {
			capacity,
			..Self::default()
		}
	}

	/// Add a variable with the weights of its values to the scope.
	pub fn with_var(mut self, var: VarRef, weights: impl IntoIterator<Item = (Value, Weight)>) -> Self {
		self.vars.push((var, weights.into_iter().collect()));
		self
	}

	/// Add a group of (variable, literal) pairs of which at most one can hold.
	///
	/// Once a group is given, all variables of the scope must have the domain
	/// `{0, 1}`.
	pub fn with_amo(mut self, group: Vec<(VarRef, Value)>) -> Self {
		self.groups.push(group);
		self
	}

	/// Change the configuration of the propagation.
	pub fn with_config(mut self, config: KnapsackConfig) -> Self {
		self.config = config;
		self
	}

	/// Start with a local lower bound that was already projected.
	pub(crate) fn with_lower_bound(mut self, lb: Cost) -> Self {
		self.lb = lb;
		self
	}

	/// Start with the given deltas for the items of `var`.
	pub(crate) fn with_deltas(mut self, var: VarRef, deltas: Vec<Cost>) -> Self {
		self.deltas.push((var, deltas));
		self
	}

	/// Create the cost function in the network using `actions`.
	pub fn build<A: InitActions>(self, actions: &mut A) -> Result<KnapsackCostFunction, BuildError> {
		for (i, (var, weights)) in self.vars.iter().enumerate() {
			if self.vars[..i].iter().any(|(v, _)| v == var) {
				return Err(BuildError::DuplicateVariable(*var));
			}
			if let Some(&(val, _)) = weights.iter().find(|&&(val, _)| actions.to_index(*var, val).is_none()) {
				return Err(BuildError::UnknownValue(*var, val));
			}
		}
		let mut member_of: HashMap<VarRef, usize> = HashMap::new();
		for (g, group) in self.groups.iter().enumerate() {
			for &(var, lit) in group {
				if !self.vars.iter().any(|(v, _)| *v == var) {
					return Err(BuildError::UnknownVariable(var));
				}
				if lit != 0 && lit != 1 {
					return Err(BuildError::UnknownValue(var, lit));
				}
				if member_of.insert(var, g).is_some() {
					return Err(BuildError::OverlappingGroups(var));
				}
			}
		}
		if !self.groups.is_empty() {
			if let Some((var, _)) = self.vars.iter().find(|(v, _)| actions.initial_domain(*v) != [0, 1].as_slice()) {
				return Err(BuildError::NonBooleanMember(*var));
			}
		}
		for (var, _) in &self.deltas {
			if !self.vars.iter().any(|(v, _)| v == var) {
				return Err(BuildError::UnknownVariable(*var));
			}
		}

		let mut parts = Parts {
			capacity: self.capacity,
			..Parts::default()
		};
		if self.groups.iter().all(Vec::is_empty) {
			self.split_rows(actions, &mut parts);
		} else {
			self.group_rows(&mut parts, &member_of);
		}
		self.finish(actions, parts)
	}

	/// The weight of `val` for the variable at position `i` of `vars`.
	fn weight(&self, i: usize, val: Value) -> Weight {
		self.vars[i]
			.1
			.iter()
			.rev()
			.find(|&&(v, _)| v == val)
			.map_or(0, |&(_, w)| w)
	}

	/// Create one row per variable, folding the variables whose values all
	/// weigh the same into the capacity.
	fn split_rows<A: InitActions>(&self, actions: &A, parts: &mut Parts) {
		for (i, (var, listed)) in self.vars.iter().enumerate() {
			let var = *var;
			let domain = actions.initial_domain(var);
			let weights: Vec<Weight> = domain.iter().map(|&v| self.weight(i, v)).collect();
			if weights.iter().all(|&w| w == weights[0]) {
				parts.capacity -= weights.first().copied().unwrap_or(0);
				continue;
			}
			// The catch-all class holds the unlisted values, or else the values
			// that share the weight of the last listed value.
			let class_weight = if domain.iter().any(|v| !listed.iter().any(|(l, _)| l == v)) {
				0
			} else {
				listed.last().map_or(0, |&(_, w)| w)
			};
			let mut values = Vec::new();
			let mut row_weights = Vec::new();
			let mut others = Vec::new();
			for (&val, &w) in domain.iter().zip(&weights) {
				if w == class_weight {
					others.push(val);
				} else {
					values.push(val);
					row_weights.push(w);
				}
			}
			values.push(others[0]);
			row_weights.push(class_weight);
			let idx = parts.scope.len();
			parts.roles.push(Role::Real(parts.rows.len()));
			parts.scope.push(var);
			parts.rows.push((RowKind::Real(idx), values, row_weights, others));
		}
	}

	/// Create a row for each variable outside the groups, and a row for each
	/// group whose values are its members followed by the "none" value.
	fn group_rows(&self, parts: &mut Parts, member_of: &HashMap<VarRef, usize>) {
		let own = |var: VarRef| -> [Weight; 2] {
			let i = self.vars.iter().position(|(v, _)| *v == var).unwrap_or_default();
			[self.weight(i, 0), self.weight(i, 1)]
		};
		for &(var, _) in &self.vars {
			if member_of.contains_key(&var) {
				continue;
			}
			let idx = parts.scope.len();
			parts.roles.push(Role::Real(parts.rows.len()));
			parts.scope.push(var);
			parts.original_weights.push(own(var));
			parts.rows.push((RowKind::Real(idx), vec![0, 1], own(var).to_vec(), vec![1]));
		}
		for group in self.groups.iter().filter(|g| !g.is_empty()) {
			let g = parts.groups.len();
			let row = parts.rows.len();
			let mut members = Vec::with_capacity(group.len());
			for (pos, &(var, lit)) in group.iter().enumerate() {
				members.push((parts.scope.len(), lit));
				parts.roles.push(Role::Member { group: g, pos });
				parts.scope.push(var);
				parts.original_weights.push(own(var));
			}
			let unselected: Weight = members
				.iter()
				.map(|&(j, lit)| parts.original_weights[j][1 - lit as usize])
				.sum();
			let mut weights: Vec<Weight> = members
				.iter()
				.map(|&(j, lit)| {
					let ow = parts.original_weights[j];
					unselected - ow[1 - lit as usize] + ow[lit as usize]
				})
				.collect();
			weights.push(unselected);
			let n = members.len() as Value;
			parts
				.rows
				.push((RowKind::Group(g), (0..=n).collect(), weights, vec![n]));
			parts.groups.push((row, members));
		}
	}

	/// Allocate the trailed state and assemble the cost function.
	fn finish<A: InitActions>(self, actions: &mut A, parts: Parts) -> Result<KnapsackCostFunction, BuildError> {
		let amo = !parts.groups.is_empty();
		let same_weight = parts.rows.windows(2).all(|w| w[0].2 == w[1].2);
		let mut max_weight = 0;
		let rows: Vec<Row> = parts
			.rows
			.into_iter()
			.map(|(kind, values, weights, others)| {
				let greatest = first_position(&weights, |a, b| a > b);
				let lowest = first_position(&weights, |a, b| a < b);
				max_weight += weights[greatest];
				let boolean = matches!(kind, RowKind::Real(_)) && values.len() + others.len() <= 3;
				let len = values.len();
				Row {
					kind,
					witness: values[0],
					boolean,
					greatest: actions.new_trailed_int(greatest as i64),
					lowest: actions.new_trailed_int(lowest as i64),
					largest: weights[greatest],
					exhausted: actions.new_trailed_int(0),
					values,
					weights,
					others,
					profit: vec![0; len],
					opt: vec![0.0; len],
					class_cost: 0,
				}
			})
			.collect();
		let groups: Vec<Group> = parts
			.groups
			.into_iter()
			.map(|(row, members)| Group {
				row,
				open: actions.new_trailed_int(members.len() as i64),
				members,
			})
			.collect();

		let mut deltas = Vec::with_capacity(parts.scope.len());
		for (i, &var) in parts.scope.iter().enumerate() {
			let len = match parts.roles[i] {
				Role::Real(row) if !amo => rows[row].values.len(),
				_ => 2,
			};
			let init = self
				.deltas
				.iter()
				.rev()
				.find(|(v, _)| *v == var)
				.map(|(_, d)| d.as_slice())
				.unwrap_or_default();
			deltas.push(
				(0..len)
					.map(|j| actions.new_trailed_int(init.get(j).copied().unwrap_or(0)))
					.collect(),
			);
		}
		let fixing = parts.scope.iter().map(|_| actions.new_trailed_int(0)).collect();

		debug!(
			arity = parts.scope.len(),
			capacity = parts.capacity,
			max_weight,
			groups = groups.len(),
			"create knapsack"
		);
		let arity = parts.scope.len();
		Ok(KnapsackCostFunction {
			scope: parts.scope,
			roles: parts.roles,
			original_weights: parts.original_weights,
			config: self.config,
			original_capacity: parts.capacity,
			original_ub: actions.upper_bound(),
			same_weight,
			capacity: actions.new_trailed_int(parts.capacity),
			max_weight: actions.new_trailed_int(max_weight),
			lb: actions.new_trailed_int(self.lb),
			assigned_deltas: actions.new_trailed_int(0),
			always_satisfied: actions.new_trailed_int(0),
			connected: actions.new_trailed_int(0),
			fixing,
			deltas,
			conflict_weight: 0,
			conflict_weights: vec![0; arity],
			current: Vec::new(),
			slopes: Vec::new(),
			moves: Vec::new(),
			dynamic_pending: false,
			last_node: None,
			vac: VacState::default(),
			rows,
			groups,
		})
	}
}

#[derive(Debug, Default)]
/// The pieces of a knapsack cost function collected while building it.
struct Parts {
	/// The capacity after folding constant variables.
	capacity: Weight,
	/// The variables of the scope.
	scope: Vec<VarRef>,
	/// The role of each variable of the scope.
	roles: Vec<Role>,
	/// Kind, values, weights, and catch-all class of each row.
	rows: Vec<(RowKind, Vec<Value>, Vec<Weight>, Vec<Value>)>,
	/// Row and members of each group.
	groups: Vec<(usize, Vec<(usize, Value)>)>,
	/// Weights of value 0 and 1 of each variable when groups are used.
	original_weights: Vec<[Weight; 2]>,
}

/// The first position in `weights` that no later weight beats according to
/// `better`.
fn first_position(weights: &[Weight], better: impl Fn(Weight, Weight) -> bool) -> usize {
	let mut best = 0;
	for (i, &w) in weights.iter().enumerate() {
		if better(w, weights[best]) {
			best = i;
		}
	}
	best
}

#[cfg(test)]
mod tests {
	use rangelist::RangeList;

	use crate::{cost_function::BuildError, KnapsackBuilder, Network};

	#[test]
	fn test_build_errors() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=2]));

		let dup = KnapsackBuilder::new(1)
			.with_var(x, [(1, 1)])
			.with_var(x, [(0, 1)]);
		assert_eq!(net.add_knapsack(dup), Err(BuildError::DuplicateVariable(x)));

		let unknown = KnapsackBuilder::new(1).with_var(y, [(5, 1)]);
		assert_eq!(net.add_knapsack(unknown), Err(BuildError::UnknownValue(y, 5)));

		let non_bool = KnapsackBuilder::new(1)
			.with_var(x, [(1, 1)])
			.with_var(y, [(1, 1)])
			.with_amo(vec![(x, 1)]);
		assert_eq!(net.add_knapsack(non_bool), Err(BuildError::NonBooleanMember(y)));

		let outside = KnapsackBuilder::new(1)
			.with_var(x, [(1, 1)])
			.with_amo(vec![(y, 1)]);
		assert_eq!(net.add_knapsack(outside), Err(BuildError::UnknownVariable(y)));

		let overlap = KnapsackBuilder::new(1)
			.with_var(x, [(1, 1)])
			.with_amo(vec![(x, 1)])
			.with_amo(vec![(x, 0)]);
		assert_eq!(
			net.add_knapsack(overlap),
			Err(BuildError::OverlappingGroups(x))
		);
	}
}
