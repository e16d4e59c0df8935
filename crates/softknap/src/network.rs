//! A small cost function network that hosts cost functions over enumerated
//! variables, maintains their unary costs and the global lower bound, and
//! schedules the propagation of its cost functions.

pub(crate) mod queue;
pub(crate) mod trail;
pub(crate) mod variable;

use std::{
	fmt::Write,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use delegate::delegate;
use index_vec::IndexVec;
use rangelist::RangeList;
use tracing::{debug, trace};

pub use crate::network::trail::TrailedInt;
use crate::{
	actions::{InitActions, InspectionActions, PropagationActions, TrailingActions},
	cost_function::{
		knapsack::KnapsackBuilder,
		table::TableBuilder,
		BuildError, Conflict, ConflictOrigin, CostFunction, DumpError, DumpForm, PropagationError,
		Spawn,
	},
	network::{
		queue::{PriorityLevel, PriorityQueue},
		trail::Trail,
		variable::Variable,
	},
	Cost, Value, MAX_COST, MIN_COST,
};

/// Type alias for a cost function hosted by a [`Network`].
pub type BoxedCostFunction = Box<dyn CostFunction<State>>;

#[derive(Debug)]
/// A cost function network: a set of enumerated variables with unary costs,
/// a set of cost functions over these variables, and a lower and upper bound
/// on the cost of its solutions.
pub struct Network {
	/// The state of the variables, the bounds and the propagation queue.
	state: State,
	/// The cost functions hosted by the network.
	functions: IndexVec<CostFnRef, BoxedCostFunction>,
	/// For each variable, the cost functions that have it in their scope, and
	/// its position in their scope.
	watchers: IndexVec<VarRef, Vec<(CostFnRef, usize)>>,
}

#[derive(Debug)]
/// The state of a [`Network`] on which its cost functions act.
pub struct State {
	/// Trailed storage of the domains, the unary costs, and the state of the cost
	/// functions.
	trail: Trail,
	/// The variables of the network.
	vars: IndexVec<VarRef, Variable>,
	/// The global lower bound.
	lb: TrailedInt,
	/// The cost at which an assignment is forbidden.
	ub: Cost,
	/// The number of search nodes that have been opened.
	nodes: u64,
	/// Flag that is raised when the search should stop.
	interrupt: Arc<AtomicBool>,
	/// Events waiting to be sent to the cost functions.
	queue: PriorityQueue<Event>,
	/// Cost functions created during the current propagation call.
	spawned: Vec<Spawn>,
	/// The cost function that is currently propagating.
	current: Option<CostFnRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A change in the network that the cost functions have to be told about.
enum Event {
	/// The variable was assigned.
	Assign(VarRef),
	/// The value was removed from the domain of the variable.
	Remove(VarRef, Value),
	/// A unary cost of the variable increased from zero, because of the given
	/// cost function.
	CostIncrease {
		/// The variable whose unary cost increased.
		var: VarRef,
		/// The cost function that projected the cost.
		source: Option<CostFnRef>,
	},
	/// The cost function has to be propagated from scratch.
	Propagate(CostFnRef),
}

impl Network {
	/// Create a new empty network with the given upper bound.
	pub fn new(ub: Cost) -> Self {
		let mut trail = Trail::default();
		let lb = trail.track_int(MIN_COST);
		Self {
			state: State {
				trail,
				vars: IndexVec::new(),
				lb,
				ub: ub.min(MAX_COST),
				nodes: 0,
				interrupt: Arc::default(),
				queue: PriorityQueue::default(),
				spawned: Vec::new(),
				current: None,
			},
			functions: IndexVec::new(),
			watchers: IndexVec::new(),
		}
	}

	/// Create a new variable with the given name and domain.
	pub fn new_var(&mut self, name: impl Into<String>, domain: &RangeList<Value>) -> VarRef {
		let dac = self.state.vars.len();
		let var = Variable::new(&mut self.state.trail, name.into(), domain, dac);
		let r = self.state.vars.push(var);
		let w = self.watchers.push(Vec::new());
		debug_assert_eq!(r, w);
		r
	}

	/// Get the variables of the network.
	pub fn vars(&self) -> impl Iterator<Item = VarRef> + '_ {
		self.state.vars.indices()
	}

	/// Find a variable by its name.
	pub fn var_by_name(&self, name: &str) -> Option<VarRef> {
		self.state.vars.iter_enumerated().find(|(_, v)| v.name == name).map(|(r, _)| r)
	}

	/// Set the unary cost of `val` for `var`.
	///
	/// This method is meant to be used while creating the network, before
	/// propagation. It does not trigger any events.
	pub fn set_unary_cost(&mut self, var: VarRef, val: Value, cost: Cost) -> Result<(), BuildError> {
		let v = &self.state.vars[var];
		let idx = v.index(val).ok_or(BuildError::UnknownValue(var, val))?;
		let _ = v.set_cost(&mut self.state.trail, idx, cost);
		Ok(())
	}

	/// Add a knapsack cost function to the network.
	pub fn add_knapsack(&mut self, builder: KnapsackBuilder) -> Result<CostFnRef, BuildError> {
		let cf = builder.build(&mut self.state)?;
		Ok(self.post(Box::new(cf)))
	}

	/// Add a table cost function to the network.
	pub fn add_table(&mut self, builder: TableBuilder) -> Result<CostFnRef, BuildError> {
		let cf = builder.build(&mut self.state)?;
		Ok(self.post(Box::new(cf)))
	}

	/// Add a cost function to the network, connect it at the current level,
	/// and schedule its propagation.
	fn post(&mut self, mut cf: BoxedCostFunction) -> CostFnRef {
		cf.connect(&mut self.state);
		let scope = cf.scope().to_vec();
		let r = self.functions.push(cf);
		for (i, &v) in scope.iter().enumerate() {
			self.watchers[v].push((r, i));
		}
		debug!(cf = r.index(), arity = scope.len(), "post cost function");
		self.state.queue.insert(PriorityLevel::Lowest, Event::Propagate(r));
		r
	}

	/// Get the cost function with the given reference.
	pub fn cost_function(&self, cf: CostFnRef) -> &dyn CostFunction<State> {
		self.functions[cf].as_ref()
	}

	/// Get the cost functions hosted by the network, including disconnected
	/// ones.
	pub fn cost_functions(&self) -> impl Iterator<Item = CostFnRef> + '_ {
		self.functions.indices()
	}

	/// Whether the cost function is still part of the network.
	pub fn is_connected(&self, cf: CostFnRef) -> bool {
		self.functions[cf].is_connected(&self.state)
	}

	/// Get the state of the network.
	pub fn state(&self) -> &State {
		&self.state
	}

	/// Get mutable access to the state of the network.
	pub fn state_mut(&mut self) -> &mut State {
		&mut self.state
	}

	/// Get the current global lower bound.
	pub fn lower_bound(&self) -> Cost {
		self.state.lower_bound()
	}

	/// Get the current upper bound.
	pub fn upper_bound(&self) -> Cost {
		self.state.ub
	}

	/// Lower the upper bound of the network.
	pub fn set_upper_bound(&mut self, ub: Cost) {
		if ub < self.state.ub {
			self.state.ub = ub;
			for cf in self.functions.iter_mut() {
				cf.set_infinite_cost(ub);
			}
		}
	}

	/// Get the current domain of `var`.
	pub fn domain(&self, var: VarRef) -> Vec<Value> {
		self.state.domain(var)
	}

	/// Get the current unary cost of `val` for `var`.
	pub fn unary_cost(&self, var: VarRef, val: Value) -> Cost {
		self.state.unary_cost(var, val)
	}

	/// Get the flag that interrupts propagation when it is raised.
	pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
		Arc::clone(&self.state.interrupt)
	}

	/// Get the number of search nodes that have been opened.
	pub fn num_nodes(&self) -> u64 {
		self.state.nodes
	}

	/// Get the current decision level.
	pub fn decision_level(&self) -> usize {
		self.state.trail.decision_level()
	}

	/// Open a new search node, whose changes can be undone with
	/// [`Self::backtrack`].
	pub fn new_level(&mut self) {
		self.state.nodes += 1;
		self.state.trail.notify_new_decision_level();
	}

	/// Undo all changes made after the given decision level was opened.
	pub fn backtrack(&mut self, level: usize) {
		self.state.trail.notify_backtrack(level);
		self.state.queue.clear();
		self.state.spawned.clear();
		self.state.current = None;
	}

	/// Assign `val` to `var` and propagate.
	pub fn assign(&mut self, var: VarRef, val: Value) -> Result<(), PropagationError> {
		debug!(var = var.index(), val, "decision: assign");
		self.state.assign(var, val)?;
		self.propagate()
	}

	/// Remove `val` from the domain of `var` and propagate.
	pub fn remove(&mut self, var: VarRef, val: Value) -> Result<(), PropagationError> {
		debug!(var = var.index(), val, "decision: remove");
		self.state.remove(var, val)?;
		self.propagate()
	}

	/// Send all pending events to the cost functions and enforce node
	/// consistency, until a fixed point is reached.
	#[tracing::instrument(level = "debug", skip(self), fields(level = self.decision_level()))]
	pub fn propagate(&mut self) -> Result<(), PropagationError> {
		loop {
			while let Some(event) = self.state.queue.pop() {
				if self.state.is_interrupted() {
					self.state.queue.clear();
					return Err(PropagationError::Timeout);
				}
				self.dispatch(event)?;
			}
			self.state.node_consistency()?;
			if self.state.queue.is_empty() {
				return Ok(());
			}
		}
	}

	/// Send an event to the cost functions it concerns.
	fn dispatch(&mut self, event: Event) -> Result<(), PropagationError> {
		match event {
			Event::Assign(var) => {
				for i in 0..self.watchers[var].len() {
					let (cf, idx) = self.watchers[var][i];
					self.call(cf, |f, s| f.assign(s, idx))?;
				}
			}
			Event::Remove(var, val) => {
				let dom = self.state.domain(var);
				let (Some(&min), Some(&max)) = (dom.first(), dom.last()) else {
					return Err(Conflict::wipeout(var).into());
				};
				for i in 0..self.watchers[var].len() {
					let (cf, idx) = self.watchers[var][i];
					if val < min {
						self.call(cf, |f, s| f.increase(s, idx))?;
					} else if val > max {
						self.call(cf, |f, s| f.decrease(s, idx))?;
					} else {
						self.call(cf, |f, s| f.remove(s, idx))?;
					}
				}
			}
			Event::CostIncrease { var, source } => {
				for i in 0..self.watchers[var].len() {
					let (cf, idx) = self.watchers[var][i];
					if Some(cf) != source {
						self.call(cf, |f, s| f.project_from_zero(s, idx))?;
					}
				}
			}
			Event::Propagate(cf) => self.call(cf, |f, s| f.propagate(s))?,
		}
		Ok(())
	}

	/// Call a method on a connected cost function, record a conflict it
	/// raises, and post the cost functions it spawned.
	fn call(
		&mut self,
		cf: CostFnRef,
		method: impl FnOnce(&mut dyn CostFunction<State>, &mut State) -> Result<(), PropagationError>,
	) -> Result<(), PropagationError> {
		if !self.functions[cf].is_connected(&self.state) {
			return Ok(());
		}
		self.state.current = Some(cf);
		let res = method(self.functions[cf].as_mut(), &mut self.state);
		self.state.current = None;
		if let Err(PropagationError::Contradiction(_)) = res {
			self.record_conflict(cf);
		}
		res?;
		self.drain_spawned();
		Ok(())
	}

	/// Add the cost functions that were spawned during the last call.
	fn drain_spawned(&mut self) {
		for spawn in std::mem::take(&mut self.state.spawned) {
			let posted = match spawn {
				Spawn::Table(b) => b.build(&mut self.state).map(|t| self.post(Box::new(t))),
				Spawn::Knapsack(b) => b.build(&mut self.state).map(|k| self.post(Box::new(k))),
			};
			if let Err(err) = posted {
				tracing::error!(%err, "unable to create spawned cost function");
				debug_assert!(false, "invalid spawned cost function: {err}");
			}
		}
	}

	/// Increase the conflict weights after `cf` raised a conflict.
	fn record_conflict(&mut self, cf: CostFnRef) {
		self.functions[cf].inc_conflict_weight(&mut self.state, ConflictOrigin::This);
		let scope = self.functions[cf].scope().to_vec();
		let mut others: Vec<CostFnRef> = scope
			.iter()
			.flat_map(|&v| self.watchers[v].iter().map(|&(o, _)| o))
			.filter(|&o| o != cf)
			.collect();
		others.sort();
		others.dedup();
		for o in others {
			self.functions[o].inc_conflict_weight(&mut self.state, ConflictOrigin::Other(&scope));
		}
	}

	/// The cost of a complete assignment of the variables, given in the order
	/// in which they were created: the lower bound, plus the unary costs, plus
	/// the cost of every connected cost function. The result is capped at the
	/// upper bound.
	pub fn total_cost(&self, tuple: &[Value]) -> Cost {
		debug_assert_eq!(tuple.len(), self.state.vars.len());
		let ub = self.state.ub;
		let mut cost = self.state.lower_bound();
		for (var, &val) in self.state.vars.indices().zip(tuple) {
			cost = cost.saturating_add(self.state.unary_cost(var, val));
		}
		for f in self.functions.iter() {
			if f.is_connected(&self.state) {
				let sub: Vec<Value> = f.scope().iter().map(|&v| tuple[v.index()]).collect();
				cost = cost.saturating_add(f.eval(&self.state, &sub));
			}
		}
		cost.min(ub)
	}

	/// Print the connected cost functions in the text (wcsp) format.
	pub fn dump(&self, form: DumpForm) -> Result<String, DumpError> {
		let mut out = String::new();
		for f in self.functions.iter() {
			if f.is_connected(&self.state) {
				f.dump(&self.state, form, &mut out)?;
			}
		}
		Ok(out)
	}

	/// Print the connected cost functions in the CFN format.
	pub fn dump_cfn(&self, form: DumpForm) -> Result<String, DumpError> {
		let mut out = String::new();
		for f in self.functions.iter() {
			if f.is_connected(&self.state) {
				f.dump_cfn(&self.state, form, &mut out)?;
			}
		}
		Ok(out)
	}

	/// Print the current domains and unary costs of the variables.
	pub fn dump_domains(&self) -> Result<String, DumpError> {
		let mut out = String::new();
		for var in self.state.vars.indices() {
			write!(out, "{}:", self.state.var_name(var))?;
			for val in self.state.domain(var) {
				write!(out, " {val}")?;
				let cost = self.state.unary_cost(var, val);
				if cost != 0 {
					write!(out, "[{cost}]")?;
				}
			}
			writeln!(out)?;
		}
		Ok(out)
	}
}

impl State {
	/// Fix the assignment of `var` once a single value remains: its unary cost
	/// is moved to the lower bound.
	fn fix(&mut self, var: VarRef) -> Result<(), Conflict> {
		let v = &self.vars[var];
		let Some(idx) = v.alive_indices(&self.trail).next() else {
			return Err(Conflict::wipeout(var));
		};
		let cost = v.set_cost(&mut self.trail, idx, 0);
		v.set_support(&mut self.trail, idx);
		trace!(var = var.index(), val = v.values[idx], "assigned");
		self.queue.insert(PriorityLevel::High, Event::Assign(var));
		self.project_lb(cost)
	}

	/// Remove the values whose unary cost reaches the upper bound, and move the
	/// minimum unary cost of every variable to the lower bound.
	fn node_consistency(&mut self) -> Result<(), Conflict> {
		for var in self.vars.indices() {
			let lb = self.lower_bound();
			let doomed: Vec<Value> = {
				let v = &self.vars[var];
				v.alive_indices(&self.trail)
					.filter(|&idx| lb.saturating_add(v.cost(&self.trail, idx)) >= self.ub)
					.map(|idx| v.values[idx])
					.collect()
			};
			for val in doomed {
				PropagationActions::remove(self, var, val)?;
			}
			self.find_support(var)?;
		}
		Ok(())
	}
}

impl TrailingActions for State {
	delegate! {
		to self.trail {
			fn get_trailed_int(&self, i: TrailedInt) -> i64;
			fn set_trailed_int(&mut self, i: TrailedInt, v: i64) -> i64;
		}
	}
}

impl InitActions for State {
	fn new_trailed_int(&mut self, init: i64) -> TrailedInt {
		self.trail.track_int(init)
	}
}

impl InspectionActions for State {
	fn can_be(&self, var: VarRef, val: Value) -> bool {
		self.vars[var].can_be(&self.trail, val)
	}

	fn value(&self, var: VarRef) -> Option<Value> {
		let v = &self.vars[var];
		if v.size(&self.trail) == 1 {
			v.alive_indices(&self.trail).next().map(|idx| v.values[idx])
		} else {
			None
		}
	}

	fn domain(&self, var: VarRef) -> Vec<Value> {
		self.vars[var].domain(&self.trail)
	}

	fn domain_size(&self, var: VarRef) -> usize {
		self.vars[var].size(&self.trail)
	}

	fn initial_domain(&self, var: VarRef) -> &[Value] {
		&self.vars[var].values
	}

	fn to_index(&self, var: VarRef, val: Value) -> Option<usize> {
		self.vars[var].index(val)
	}

	fn to_current_index(&self, var: VarRef, val: Value) -> Option<usize> {
		let v = &self.vars[var];
		v.alive_indices(&self.trail).position(|idx| v.values[idx] == val)
	}

	fn current_var_id(&self, var: VarRef) -> Option<usize> {
		if self.is_assigned(var) {
			return None;
		}
		Some(
			self.vars
				.indices()
				.take_while(|&v| v != var)
				.filter(|&v| !self.is_assigned(v))
				.count(),
		)
	}

	fn var_name(&self, var: VarRef) -> &str {
		&self.vars[var].name
	}

	fn unary_cost(&self, var: VarRef, val: Value) -> Cost {
		let v = &self.vars[var];
		v.index(val).map_or(MAX_COST, |idx| v.cost(&self.trail, idx))
	}

	fn support(&self, var: VarRef) -> Value {
		let v = &self.vars[var];
		v.values[v.support(&self.trail)]
	}

	fn dac_order(&self, var: VarRef) -> usize {
		self.vars[var].dac
	}

	fn upper_bound(&self) -> Cost {
		self.ub
	}

	fn lower_bound(&self) -> Cost {
		self.trail.get_trailed_int(self.lb)
	}

	fn num_nodes(&self) -> u64 {
		self.nodes
	}

	fn is_interrupted(&self) -> bool {
		self.interrupt.load(Ordering::Relaxed)
	}
}

impl PropagationActions for State {
	fn remove(&mut self, var: VarRef, val: Value) -> Result<(), Conflict> {
		let v = &self.vars[var];
		let Some(idx) = v.index(val) else {
			return Ok(());
		};
		if !v.alive(&self.trail, idx) {
			return Ok(());
		}
		if v.size(&self.trail) == 1 {
			return Err(Conflict::wipeout(var));
		}
		let _ = v.remove(&mut self.trail, idx);
		trace!(var = var.index(), val, "remove value");
		self.queue.insert(PriorityLevel::Medium, Event::Remove(var, val));
		if v.size(&self.trail) == 1 {
			self.fix(var)?;
		} else if v.support(&self.trail) == idx {
			self.find_support(var)?;
		}
		Ok(())
	}

	fn assign(&mut self, var: VarRef, val: Value) -> Result<(), Conflict> {
		let v = &self.vars[var];
		let Some(keep) = v.index(val).filter(|&idx| v.alive(&self.trail, idx)) else {
			return Err(Conflict::wipeout(var));
		};
		if v.size(&self.trail) == 1 {
			return Ok(());
		}
		let others: Vec<usize> = v.alive_indices(&self.trail).filter(|&idx| idx != keep).collect();
		for idx in others {
			let _ = v.remove(&mut self.trail, idx);
		}
		self.fix(var)
	}

	fn extend(&mut self, var: VarRef, val: Value, cost: Cost) {
		let v = &self.vars[var];
		if let Some(idx) = v.index(val) {
			let old = v.cost(&self.trail, idx);
			debug_assert!(old >= cost, "extending {cost} from unary cost {old}");
			trace!(var = var.index(), val, cost, "extend unary cost");
			let _ = v.set_cost(&mut self.trail, idx, old - cost);
		}
	}

	fn project(&mut self, var: VarRef, val: Value, cost: Cost, delayed: bool) -> Result<(), Conflict> {
		let v = &self.vars[var];
		let Some(idx) = v.index(val) else {
			return Ok(());
		};
		let old = v.cost(&self.trail, idx);
		let new = old.saturating_add(cost).min(MAX_COST);
		trace!(var = var.index(), val, cost, "project unary cost");
		let _ = v.set_cost(&mut self.trail, idx, new);
		if old == 0 && new > 0 {
			self.queue.insert(
				PriorityLevel::Low,
				Event::CostIncrease {
					var,
					source: self.current,
				},
			);
		}
		if !delayed && v.alive(&self.trail, idx) && self.lower_bound().saturating_add(new) >= self.ub {
			PropagationActions::remove(self, var, val)?;
		}
		Ok(())
	}

	fn find_support(&mut self, var: VarRef) -> Result<(), Conflict> {
		let v = &self.vars[var];
		let Some((best, min)) = v
			.alive_indices(&self.trail)
			.map(|idx| (idx, v.cost(&self.trail, idx)))
			.min_by_key(|&(idx, c)| (c, idx))
		else {
			return Err(Conflict::wipeout(var));
		};
		v.set_support(&mut self.trail, best);
		if min > 0 {
			let alive: Vec<usize> = v.alive_indices(&self.trail).collect();
			for idx in alive {
				let c = v.cost(&self.trail, idx);
				let _ = v.set_cost(&mut self.trail, idx, c - min);
			}
			self.project_lb(min)?;
		}
		Ok(())
	}

	fn project_lb(&mut self, cost: Cost) -> Result<(), Conflict> {
		if cost != 0 {
			let lb = self.lower_bound().saturating_add(cost);
			trace!(cost, lb, "increase lower bound");
			let _ = self.trail.set_trailed_int(self.lb, lb);
		}
		if self.lower_bound() >= self.ub {
			return Err(Conflict::bound());
		}
		Ok(())
	}

	fn spawn(&mut self, spawn: Spawn) {
		self.spawned.push(spawn);
	}
}

index_vec::define_index_type! {
	/// Identifies a variable in a [`Network`]
	pub struct VarRef = u32;
	DISPLAY_FORMAT = "{}";
}

index_vec::define_index_type! {
	/// Identifies a cost function in a [`Network`]
	pub struct CostFnRef = u32;
	DISPLAY_FORMAT = "{}";
}
