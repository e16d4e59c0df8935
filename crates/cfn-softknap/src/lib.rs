//! # cfn-softknap
//!
//! Command line front end of the `softknap` crate. It reads a JSON description
//! of a cost function network with knapsack cost functions, enforces the
//! consistency of the cost functions at the root of the search, and prints the
//! resulting lower bound, domains, and cost functions.

mod trace;

use std::{
	ffi::OsStr,
	fs,
	io::{self, Write},
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
	thread,
	time::{Duration, Instant},
};

use pico_args::Arguments;
use rangelist::RangeList;
use serde::Deserialize;
use softknap::{
	cost_function::DumpForm, BuildError, ConsistencyLevel, Cost, DpCadence, DumpError,
	KnapsackBuilder, KnapsackConfig, Network, PropagationError, Value, VarRef, Weight,
};
use tracing::{debug, info, warn};
use ustr::Ustr;

use crate::trace::create_subscriber;

/// The string that is printed when propagation has proven that the instance has
/// no solution with a cost below the upper bound.
const UNSATISFIABLE: &str = "=====UNSATISFIABLE=====";

#[derive(Debug, Clone, PartialEq)]
/// Parsed command line arguments of `cfn-softknap`.
pub struct Cli<Stdout, Stderr> {
	/// Path to the instance file.
	path: PathBuf,
	/// Print the cost functions in the CFN format instead of the wcsp format.
	cfn: bool,
	/// Print the cost functions as they were created, rather than restricted to
	/// the current domains.
	original: bool,
	/// Maximum time spent propagating.
	time_limit: Option<Duration>,
	/// Level of verbosity of the log messages.
	verbose: u8,
	/// Configuration of every knapsack cost function in the instance.
	config: KnapsackConfig,

	/// Output stream for the report.
	stdout: Stdout,
	/// Output stream for the log messages.
	stderr: Stderr,
	/// Whether the log messages use ANSI color codes.
	ansi_color: bool,
}

#[derive(Debug, thiserror::Error)]
/// Errors that can occur while running `cfn-softknap`.
pub enum CliError {
	#[error("invalid argument: {0}")]
	/// The command line arguments could not be parsed.
	Argument(#[from] pico_args::Error),
	#[error("unexpected argument(s): {0}")]
	/// Arguments remained after parsing.
	UnexpectedArgument(String),
	#[error("unable to read instance: {0}")]
	/// The instance file could not be read, or the report could not be written.
	Io(#[from] io::Error),
	#[error("unable to parse instance: {0}")]
	/// The instance file is not a valid JSON instance.
	Json(#[from] serde_json::Error),
	#[error("unknown variable `{0}`")]
	/// A cost function refers to a variable that was not declared.
	UnknownVariable(Ustr),
	#[error("invalid cost function: {0}")]
	/// A cost function could not be created.
	Build(#[from] BuildError),
	#[error(transparent)]
	/// Propagation was interrupted.
	Propagation(#[from] PropagationError),
	#[error("unable to print cost functions: {0}")]
	/// A cost function could not be printed in the requested format.
	Dump(#[from] DumpError),
}

#[derive(Debug, Deserialize)]
/// JSON description of a cost function network.
struct Instance {
	/// The upper bound: assignments of this cost are forbidden.
	#[serde(default = "default_ub")]
	ub: Cost,
	/// The variables of the network.
	variables: Vec<VariableDecl>,
	/// The knapsack cost functions of the network.
	#[serde(default)]
	knapsacks: Vec<KnapsackDecl>,
}

#[derive(Debug, Deserialize)]
/// JSON description of a variable.
struct VariableDecl {
	/// Name of the variable.
	name: Ustr,
	/// The domain as a list of inclusive ranges.
	domain: Vec<(Value, Value)>,
	/// The unary costs of the values that do not cost zero.
	#[serde(default)]
	costs: Vec<(Value, Cost)>,
}

#[derive(Debug, Deserialize)]
/// JSON description of a knapsack cost function.
struct KnapsackDecl {
	/// The capacity that the weighted sum has to reach.
	capacity: Weight,
	/// The weights of the values of each variable in the scope.
	weights: Vec<(Ustr, Vec<(Value, Weight)>)>,
	/// At-most-one groups, as lists of (variable, literal) pairs.
	#[serde(default)]
	amo: Vec<Vec<(Ustr, Value)>>,
}

/// The default upper bound of an instance.
fn default_ub() -> Cost {
	softknap::MAX_COST
}

impl<Stdout, Stderr> Cli<Stdout, Stderr> {
	/// Replace the output stream for the report.
	pub fn with_stdout<W: Write>(self, out: W) -> Cli<W, Stderr> {
		Cli {
			path: self.path,
			cfn: self.cfn,
			original: self.original,
			time_limit: self.time_limit,
			verbose: self.verbose,
			config: self.config,
			stdout: out,
			stderr: self.stderr,
			ansi_color: self.ansi_color,
		}
	}

	/// Replace the output stream for the log messages, and set whether ANSI
	/// color codes are used.
	pub fn with_stderr<W: Clone + Fn() -> E, E: Write>(self, err: W, color: bool) -> Cli<Stdout, W> {
		Cli {
			path: self.path,
			cfn: self.cfn,
			original: self.original,
			time_limit: self.time_limit,
			verbose: self.verbose,
			config: self.config,
			stdout: self.stdout,
			stderr: err,
			ansi_color: color,
		}
	}
}

impl<Stdout, Stderr, E> Cli<Stdout, Stderr>
where
	Stdout: Write,
	Stderr: Clone + Fn() -> E + Send + Sync + 'static,
	E: Write,
{
	/// Load the instance, propagate it, and print the report.
	pub fn run(&mut self) -> Result<(), CliError> {
		let start = Instant::now();
		let var_names = Arc::new(Mutex::new(Vec::new()));
		let subscriber = create_subscriber(
			self.verbose,
			self.stderr.clone(),
			self.ansi_color,
			Arc::clone(&var_names),
		);
		let _guard = tracing::subscriber::set_default(subscriber);

		let content = fs::read_to_string(&self.path)?;
		let instance: Instance = serde_json::from_str(&content)?;
		let mut net = self.build(&instance, &var_names)?;
		info!(
			num_vars = instance.variables.len(),
			num_knapsacks = instance.knapsacks.len(),
			elapsed = ?start.elapsed(),
			"instance loaded"
		);

		let interrupt = net.interrupt_flag();
		let handler_flag = Arc::clone(&interrupt);
		if let Err(err) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
			warn!(%err, "unable to install the interrupt handler");
		}
		if let Some(limit) = self.time_limit {
			Self::start_timer(limit, Arc::clone(&interrupt));
		}

		match net.propagate() {
			Ok(()) => {
				info!(lb = net.lower_bound(), elapsed = ?start.elapsed(), "propagation finished");
				self.report(&net)?;
			}
			Err(PropagationError::Contradiction(conflict)) => {
				info!(%conflict, elapsed = ?start.elapsed(), "propagation found a contradiction");
				writeln!(self.stdout, "{UNSATISFIABLE}")?;
			}
			Err(err) => return Err(err.into()),
		}
		Ok(())
	}

	/// Create the network described by `instance`, registering the names of
	/// its variables in `var_names`.
	fn build(&self, instance: &Instance, var_names: &Mutex<Vec<Ustr>>) -> Result<Network, CliError> {
		let mut net = Network::new(instance.ub);
		for decl in &instance.variables {
			let domain = RangeList::from_iter(decl.domain.iter().map(|&(lo, hi)| lo..=hi));
			let var = net.new_var(decl.name.as_str(), &domain);
			if let Ok(mut names) = var_names.lock() {
				names.push(decl.name);
			}
			for &(val, cost) in &decl.costs {
				net.set_unary_cost(var, val, cost)?;
			}
		}
		let lookup = |name: Ustr| -> Result<VarRef, CliError> {
			net.var_by_name(name.as_str())
				.ok_or(CliError::UnknownVariable(name))
		};
		let mut builders = Vec::with_capacity(instance.knapsacks.len());
		for decl in &instance.knapsacks {
			let mut builder = KnapsackBuilder::new(decl.capacity).with_config(self.config.clone());
			for (name, weights) in &decl.weights {
				builder = builder.with_var(lookup(*name)?, weights.iter().copied());
			}
			for group in &decl.amo {
				let group = group
					.iter()
					.map(|&(name, lit)| Ok((lookup(name)?, lit)))
					.collect::<Result<Vec<_>, CliError>>()?;
				builder = builder.with_amo(group);
			}
			builders.push(builder);
		}
		for builder in builders {
			let cf = net.add_knapsack(builder)?;
			debug!(cf = cf.index(), "knapsack added");
		}
		Ok(net)
	}

	/// Print the lower bound, the domains, and the connected cost functions.
	fn report(&mut self, net: &Network) -> Result<(), CliError> {
		let form = if self.original {
			DumpForm::Original
		} else {
			DumpForm::Current
		};
		let dump = if self.cfn {
			net.dump_cfn(form)?
		} else {
			net.dump(form)?
		};
		writeln!(self.stdout, "lower bound: {}", net.lower_bound())?;
		writeln!(self.stdout, "upper bound: {}", net.upper_bound())?;
		writeln!(self.stdout, "domains:")?;
		write!(self.stdout, "{}", net.dump_domains()?)?;
		writeln!(self.stdout, "cost functions:")?;
		write!(self.stdout, "{dump}")?;
		Ok(())
	}

	/// Raise the interrupt flag once the time limit has passed.
	fn start_timer(limit: Duration, interrupt: Arc<AtomicBool>) {
		let _ = thread::spawn(move || {
			thread::sleep(limit);
			interrupt.store(true, Ordering::SeqCst);
		});
	}
}

impl TryFrom<Arguments> for Cli<io::Stdout, fn() -> io::Stderr> {
	type Error = CliError;

	fn try_from(mut args: Arguments) -> Result<Self, Self::Error> {
		let mut verbose = 0;
		while args.contains(["-v", "--verbose"]) {
			verbose += 1;
		}

		let mut config = KnapsackConfig::default();
		if let Some(epsilon) = args.opt_value_from_str("--epsilon")? {
			config = config.with_epsilon(epsilon);
		}
		if let Some(cadence) = args.opt_value_from_fn("--dp", parse_dp_cadence)? {
			config = config.with_dp_cadence(cadence);
		}
		if args.contains("--bound-only") {
			config = config.with_consistency(ConsistencyLevel::Bound);
		}
		if let Some(size) = args.opt_value_from_str("--nary-size")? {
			config = config.with_nary_projection_size(size);
		}
		if args.contains("--full-eac") {
			config = config.with_full_eac(true);
		}

		let cli: Self = Cli {
			cfn: args.contains("--cfn"),
			original: args.contains("--original"),
			time_limit: args.opt_value_from_fn(["-t", "--time-limit"], parse_time_limit)?,
			verbose,
			config,
			path: args.free_from_os_str(parse_path)?,
			stdout: io::stdout(),
			stderr: io::stderr,
			ansi_color: true,
		};

		let remaining = args.finish();
		if remaining.is_empty() {
			Ok(cli)
		} else {
			Err(CliError::UnexpectedArgument(
				remaining
					.iter()
					.map(|s| s.to_string_lossy())
					.collect::<Vec<_>>()
					.join(" "),
			))
		}
	}
}

/// Parse the cadence of the dynamic programming: `never`, `node`, or a number
/// of search nodes.
fn parse_dp_cadence(s: &str) -> Result<DpCadence, String> {
	match s {
		"never" => Ok(DpCadence::Never),
		"node" => Ok(DpCadence::EveryNode),
		_ => s
			.parse()
			.map(DpCadence::EveryNth)
			.map_err(|_| format!("invalid dynamic programming cadence `{s}`")),
	}
}

/// Parse a path from the command line.
fn parse_path(s: &OsStr) -> Result<PathBuf, &'static str> {
	if s.is_empty() {
		return Err("empty path");
	}
	Ok(PathBuf::from(s))
}

/// Parse a time limit in the syntax of `humantime`, e.g. `1m 30s`.
fn parse_time_limit(s: &str) -> Result<Duration, humantime::DurationError> {
	s.parse::<humantime::Duration>().map(Into::into)
}
