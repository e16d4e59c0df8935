//! Binary entry point of `cfn-softknap`.

#![expect(
	unused_crate_dependencies,
	reason = "dependencies are used by the library target"
)]

use std::process::ExitCode;

use cfn_softknap::Cli;
use pico_args::Arguments;

/// The help message displayed when `--help` is given.
const HELP: &str = "\
USAGE
  cfn-softknap [OPTIONS] INSTANCE.json

Propagate the knapsack cost functions of a cost function network at the root
of the search, and print the lower bound, the domains, and the cost functions.

OPTIONS
  -h, --help              Print this help message
  -v, --verbose           Increase the verbosity of the log messages
  -t, --time-limit TIME   Stop propagation after TIME (e.g. `10s`, `1m 30s`)
  --cfn                   Print the cost functions in the CFN format
  --original              Print the cost functions as they were created
  --epsilon EPS           Tolerance when rounding fractional costs up
  --dp CADENCE            Use dynamic programming: `never`, `node`, or every N nodes
  --bound-only            Only enforce bound consistency
  --nary-size N           Replace knapsacks by tables at N unassigned variables
  --full-eac              Check the greedy solution of the supports after assignments
";

fn main() -> ExitCode {
	let mut args = Arguments::from_env();
	if args.contains(["-h", "--help"]) {
		print!("{HELP}");
		return ExitCode::SUCCESS;
	}

	let cli: Result<Cli<_, _>, _> = args.try_into();
	match cli.and_then(|mut cli| cli.run()) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("cfn-softknap: {err}");
			ExitCode::FAILURE
		}
	}
}
