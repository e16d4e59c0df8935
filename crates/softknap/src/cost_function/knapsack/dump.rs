//! Printing of a [`KnapsackCostFunction`] in the text (wcsp) and CFN formats,
//! and in a human-readable form.

use std::fmt::{self, Display, Write};

use itertools::Itertools;

use crate::{
	actions::InspectionActions,
	cost_function::{
		knapsack::{KnapsackCostFunction, Role},
		table::tuples,
		DumpError, DumpForm,
	},
	network::VarRef,
	Cost, Value, Weight,
};

/// Human-readable description of a [`KnapsackCostFunction`] in the current
/// state of a network, see [`KnapsackCostFunction::display`].
#[derive(Debug)]
pub struct KnapsackDisplay<'a, A> {
	/// The cost function to describe.
	knapsack: &'a KnapsackCostFunction,
	/// The network holding the state of the cost function.
	actions: &'a A,
}

impl KnapsackCostFunction {
	/// Describe the cost function in the current state of the network: its
	/// scope, capacity, maximum weight, lower bound, and the value, weight, and
	/// delta of every item.
	pub fn display<'a, A: InspectionActions>(&'a self, actions: &'a A) -> KnapsackDisplay<'a, A> {
		KnapsackDisplay {
			knapsack: self,
			actions,
		}
	}

	/// Whether no cost was moved into or out of the cost function yet.
	fn pristine<A: InspectionActions>(&self, actions: &A) -> bool {
		self.lower_bound(actions) == 0
			&& self.assigned_deltas(actions) == 0
			&& (0..self.scope.len()).all(|i| (0..self.deltas[i].len()).all(|j| self.delta(actions, i, j) == 0))
	}

	/// The positions in the scope that are printed in the given form.
	fn printed<A: InspectionActions>(&self, actions: &A, form: DumpForm) -> Vec<usize> {
		(0..self.scope.len())
			.filter(|&i| form == DumpForm::Original || !actions.is_assigned(self.scope[i]))
			.collect()
	}

	/// The identifier of `var` in the given form.
	fn var_id<A: InspectionActions>(actions: &A, var: VarRef, form: DumpForm) -> usize {
		match form {
			DumpForm::Original => var.index(),
			DumpForm::Current => actions.current_var_id(var).unwrap_or_default(),
		}
	}

	/// The index of `val` in the domain of `var` in the given form.
	fn val_id<A: InspectionActions>(actions: &A, var: VarRef, val: Value, form: DumpForm) -> usize {
		match form {
			DumpForm::Original => actions.to_index(var, val),
			DumpForm::Current => actions.to_current_index(var, val),
		}
		.unwrap_or_default()
	}

	/// The weight of value `val` of the variable at `i`.
	fn weight_of(&self, i: usize, val: Value) -> Weight {
		match self.roles[i] {
			Role::Real(row) => {
				let r = &self.rows[row];
				let last = r.values.len() - 1;
				let item = r.values[..last].iter().position(|&v| v == val).unwrap_or(last);
				r.weights[item]
			}
			Role::Member { .. } => self.original_weights[i][val as usize],
		}
	}

	/// The capacity that the printed variables have to reach: the weights of
	/// the assigned variables are subtracted in the current form.
	fn residual_capacity<A: InspectionActions>(&self, actions: &A, form: DumpForm) -> Weight {
		let assigned: Weight = match form {
			DumpForm::Original => 0,
			DumpForm::Current => self
				.scope
				.iter()
				.enumerate()
				.filter_map(|(i, &x)| actions.value(x).map(|val| self.weight_of(i, val)))
				.sum(),
		};
		self.original_capacity - assigned
	}

	/// The explicitly weighted values of the variable at `i` that are printed,
	/// with their weights relative to the catch-all class.
	fn printed_values<A: InspectionActions>(&self, actions: &A, i: usize, form: DumpForm) -> Vec<(Value, Weight)> {
		let x = self.scope[i];
		let (values, weights): (&[Value], &[Weight]) = match self.roles[i] {
			Role::Real(row) => (&self.rows[row].values[..], &self.rows[row].weights[..]),
			Role::Member { .. } => (&[0, 1][..], &self.original_weights[i][..]),
		};
		let last = weights.len() - 1;
		values[..last]
			.iter()
			.zip(weights)
			.filter(|&(&v, _)| form == DumpForm::Original || actions.can_be(x, v))
			.map(|(&v, &w)| (v, w - weights[last]))
			.collect()
	}

	/// The tuples of the printed variables, with the cost of their completion
	/// by the assigned values, when the cost is below the upper bound.
	///
	/// Tuples that use a removed value are left out, and so take the default
	/// cost of the table.
	fn listed_tuples<A: InspectionActions>(&self, actions: &A, form: DumpForm) -> Vec<(Vec<Value>, Cost)> {
		let ub = actions.upper_bound();
		let domains: Vec<Vec<Value>> = self
			.scope
			.iter()
			.map(|&x| match (form, actions.value(x)) {
				(DumpForm::Current, Some(val)) => vec![val],
				(DumpForm::Current, None) => actions.domain(x),
				(DumpForm::Original, _) => actions.initial_domain(x).to_vec(),
			})
			.collect();
		tuples(&domains)
			.filter(|t| self.scope.iter().zip(t).all(|(&x, &val)| actions.can_be(x, val)))
			.map(|t| {
				let c = self.evaluate(actions, &t);
				(t, c)
			})
			.filter(|&(_, c)| c < ub)
			.collect()
	}

	/// Print the cost function in the text (wcsp) format.
	///
	/// A cost function that has not moved any cost is printed as a `knapsackp`
	/// (or, with AMO groups, `knapsackc`) global cost function. Otherwise, its
	/// costs are printed as an explicit table.
	pub(super) fn write_wcsp<A: InspectionActions>(
		&self,
		actions: &A,
		form: DumpForm,
		out: &mut String,
	) -> Result<(), DumpError> {
		let printed = self.printed(actions, form);
		write!(out, "{}", printed.len())?;
		for &i in &printed {
			write!(out, " {}", Self::var_id(actions, self.scope[i], form))?;
		}
		if !self.pristine(actions) {
			let listed = self.listed_tuples(actions, form);
			writeln!(out, " {} {}", actions.upper_bound(), listed.len())?;
			for (t, c) in listed {
				for &i in &printed {
					write!(out, "{} ", Self::val_id(actions, self.scope[i], t[i], form))?;
				}
				writeln!(out, "{c}")?;
			}
			return Ok(());
		}

		let value = |x: VarRef, v: Value| -> Value {
			match form {
				DumpForm::Original => v,
				DumpForm::Current => Self::val_id(actions, x, v, form) as Value,
			}
		};
		if self.has_groups() {
			write!(out, " -1 knapsackc {}", self.residual_capacity(actions, form))?;
			for &i in &printed {
				let [w0, w1] = self.original_weights[i];
				write!(out, " 2 {} {w0} {} {w1}", value(self.scope[i], 0), value(self.scope[i], 1))?;
			}
			let groups: Vec<Vec<(VarRef, Value)>> = self
				.groups
				.iter()
				.map(|g| {
					g.members
						.iter()
						.filter(|&&(var, _)| printed.contains(&var))
						.map(|&(var, lit)| (self.scope[var], lit))
						.collect::<Vec<_>>()
				})
				.filter(|g| !g.is_empty())
				.collect();
			write!(out, " {}", groups.len())?;
			for g in groups {
				write!(out, " {}", g.len())?;
				for (x, lit) in g {
					write!(out, " {} {lit}", Self::var_id(actions, x, form))?;
				}
			}
		} else {
			write!(out, " -1 knapsackp {}", self.printed_capacity(actions, form, &printed))?;
			for &i in &printed {
				let values = self.printed_values(actions, i, form);
				write!(out, " {}", values.len())?;
				for (v, w) in values {
					write!(out, " {} {w}", value(self.scope[i], v))?;
				}
			}
		}
		writeln!(out)?;
		Ok(())
	}

	/// The capacity that the printed variables have to reach, relative to the
	/// weights of their catch-all classes.
	fn printed_capacity<A: InspectionActions>(&self, actions: &A, form: DumpForm, printed: &[usize]) -> Weight {
		self.residual_capacity(actions, form) - printed.iter().map(|&i| self.class_weight(i)).sum::<Weight>()
	}

	/// Print the cost function in the CFN format.
	pub(super) fn write_cfn<A: InspectionActions>(
		&self,
		actions: &A,
		form: DumpForm,
		out: &mut String,
	) -> Result<(), DumpError> {
		if self.has_groups() {
			return Err(DumpError::WrongFileFormat(
				"knapsack with at-most-one groups has no CFN representation",
			));
		}
		let printed = self.printed(actions, form);
		write!(
			out,
			"\"F_{}\":{{\"scope\":[{}],\n",
			printed
				.iter()
				.map(|&i| Self::var_id(actions, self.scope[i], form))
				.join("_"),
			printed
				.iter()
				.map(|&i| format!("\"{}\"", actions.var_name(self.scope[i])))
				.join(",")
		)?;
		if self.pristine(actions) {
			write!(
				out,
				"\"type\":\"knapsackv\",\n\"params\":{{\"capacity\":{},\n\t\"weightedvalues\":[",
				self.printed_capacity(actions, form, &printed)
			)?;
			let weighted = printed.iter().flat_map(|&i| {
				let x = self.scope[i];
				self.printed_values(actions, i, form)
					.into_iter()
					.map(move |(v, w)| (x, v, w))
			});
			let weighted = weighted
				.map(|(x, v, w)| {
					format!(
						"[{},{},{w}]",
						Self::var_id(actions, x, form),
						Self::val_id(actions, x, v, form)
					)
				})
				.join(",");
			writeln!(out, "{weighted}]}}}},")?;
			return Ok(());
		}
		write!(out, "\"defaultcost\":{},\n\"costs\":[", actions.upper_bound())?;
		let listed = self.listed_tuples(actions, form);
		let rows = listed.iter().map(|(t, c)| {
			let idx = printed
				.iter()
				.map(|&i| Self::val_id(actions, self.scope[i], t[i], form))
				.join(",");
			format!("\n{idx},{c}")
		});
		writeln!(out, "{}]}},", rows.format(","))?;
		Ok(())
	}
}

impl<A: InspectionActions> Display for KnapsackDisplay<'_, A> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let k = self.knapsack;
		let a = self.actions;
		let capacity = k.capacity(a);
		let max_weight = k.max_weight(a);
		write!(
			f,
			"knapsackp({}) >= {capacity} <= {max_weight} (ratio: {})",
			k.scope.iter().map(|&x| a.var_name(x)).join(","),
			capacity as f64 / max_weight as f64
		)?;
		write!(f, " \\ {} - {} (", k.lower_bound(a), k.assigned_deltas(a))?;
		for i in 0..k.scope.len() {
			if i > 0 {
				write!(f, ",")?;
			}
			let items = (0..k.deltas[i].len()).map(|j| {
				let (val, weight) = match k.roles[i] {
					Role::Real(row) if !k.has_groups() => (k.rows[row].values[j], k.rows[row].weights[j]),
					_ => (j as Value, k.original_weights[i][j]),
				};
				format!("{val}:{weight}:{}", k.delta(a, i, j))
			});
			write!(f, "{}", items.format("|"))?;
		}
		let free = k.non_assigned(a);
		write!(f, ") arity: {} unassigned: {free}", k.scope.len())
	}
}

#[cfg(test)]
mod tests {
	use expect_test::expect;
	use rangelist::RangeList;

	use crate::{cost_function::DumpForm, DumpError, KnapsackBuilder, Network};

	#[test]
	fn test_dump_knapsackp() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=2]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let z = net.new_var("z", &RangeList::from_iter([0..=1]));
		let _ = net
			.add_knapsack(
				KnapsackBuilder::new(3)
					.with_var(x, [(1, 1), (2, 3)])
					.with_var(y, [(1, 2)])
					.with_var(z, [(1, 1)]),
			)
			.unwrap();
		expect![[r#"
			3 0 1 2 -1 knapsackp 3 2 1 1 2 3 1 1 2 1 1 1
"#]]
		.assert_eq(&net.dump(DumpForm::Original).unwrap());
		expect![[r#"
			"F_0_1_2":{"scope":["x","y","z"],
			"type":"knapsackv",
			"params":{"capacity":3,
				"weightedvalues":[[0,1,1],[0,2,3],[1,1,2],[2,1,1]]}},
"#]]
		.assert_eq(&net.dump_cfn(DumpForm::Original).unwrap());
	}

	#[test]
	fn test_dump_knapsackc() {
		let mut net = Network::new(100);
		let vars: Vec<_> = (0..4)
			.map(|i| net.new_var(format!("b{i}"), &RangeList::from_iter([0..=1])))
			.collect();
		let mut builder = KnapsackBuilder::new(2);
		for (i, &v) in vars.iter().enumerate() {
			builder = builder.with_var(v, [(1, i as i64 + 1)]);
		}
		let _ = net
			.add_knapsack(builder.with_amo(vec![(vars[2], 1), (vars[3], 1)]))
			.unwrap();
		expect![[r#"
			4 0 1 2 3 -1 knapsackc 2 2 0 0 1 1 2 0 0 1 2 2 0 0 1 3 2 0 0 1 4 1 2 2 1 3 1
"#]]
		.assert_eq(&net.dump(DumpForm::Original).unwrap());
		assert!(matches!(
			net.dump_cfn(DumpForm::Original),
			Err(DumpError::WrongFileFormat(_))
		));
	}

	#[test]
	fn test_display() {
		let mut net = Network::new(100);
		let x = net.new_var("x", &RangeList::from_iter([0..=1]));
		let y = net.new_var("y", &RangeList::from_iter([0..=1]));
		let k = KnapsackBuilder::new(3)
			.with_var(x, [(1, 2)])
			.with_var(y, [(1, 3)])
			.build(net.state_mut())
			.unwrap();
		expect![[r#"knapsackp(x,y) >= 3 <= 5 (ratio: 0.6) \ 0 - 0 (1:2:0|0:0:0,1:3:0|0:0:0) arity: 2 unassigned: 2"#]]
			.assert_eq(&k.display(net.state()).to_string());

		let k = KnapsackBuilder::new(5)
			.with_var(x, [(1, 5)])
			.with_var(y, [(1, 5)])
			.with_amo(vec![(x, 1), (y, 1)])
			.build(net.state_mut())
			.unwrap();
		expect![[r#"knapsackp(x,y) >= 5 <= 5 (ratio: 1) \ 0 - 0 (0:0:0|1:5:0,0:0:0|1:5:0) arity: 2 unassigned: 2"#]]
			.assert_eq(&k.display(net.state()).to_string());
	}
}
