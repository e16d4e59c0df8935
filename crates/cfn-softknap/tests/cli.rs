//! Tests that run the full command line front end on small instances.

#![expect(
	unused_crate_dependencies,
	reason = "only the front end and the testing dependencies are used in this file"
)]

use std::{ffi::OsString, io};

use cfn_softknap::Cli;
use expect_test::{expect, Expect};
use pico_args::Arguments;

#[derive(Debug, Clone, Copy)]
/// Output stream that immediately discards all data.
struct DummyOutput;

impl io::Write for DummyOutput {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

/// Write `instance` to a file named after `name`, run the front end on it with
/// the additional `flags`, and check the report.
fn check_report(name: &str, instance: &str, flags: &[&str], expect: Expect) {
	let path = std::env::temp_dir().join(format!("cfn-softknap-{name}.json"));
	std::fs::write(&path, instance).unwrap();

	let mut args: Vec<OsString> = flags.iter().map(OsString::from).collect();
	args.push(path.clone().into_os_string());
	let cli: Cli<_, _> = Arguments::from_vec(args).try_into().unwrap();
	let mut out = Vec::new();
	cli.with_stdout(&mut out)
		.with_stderr(|| DummyOutput, false)
		.run()
		.unwrap();
	std::fs::remove_file(&path).unwrap();

	expect.assert_eq(std::str::from_utf8(&out).unwrap());
}

/// Five Boolean variables of weights 1 to 5, of which a total weight of 6 has
/// to be selected.
const LOOSE: &str = r#"{
	"ub": 100,
	"variables": [
		{ "name": "a", "domain": [[0, 1]] },
		{ "name": "b", "domain": [[0, 1]] },
		{ "name": "c", "domain": [[0, 1]] },
		{ "name": "d", "domain": [[0, 1]] },
		{ "name": "e", "domain": [[0, 1]] }
	],
	"knapsacks": [
		{
			"capacity": 6,
			"weights": [
				["a", [[1, 1]]],
				["b", [[1, 2]]],
				["c", [[1, 3]]],
				["d", [[1, 4]]],
				["e", [[1, 5]]]
			]
		}
	]
}"#;

#[test]
fn test_report_wcsp() {
	check_report(
		"wcsp",
		LOOSE,
		&[],
		expect![[r#"
			lower bound: 0
			upper bound: 100
			domains:
			a: 0 1
			b: 0 1
			c: 0 1
			d: 0 1
			e: 0 1
			cost functions:
			5 0 1 2 3 4 -1 knapsackp 6 1 1 1 1 1 2 1 1 3 1 1 4 1 1 5
"#]],
	);
}

#[test]
fn test_report_cfn() {
	check_report(
		"cfn",
		LOOSE,
		&["--cfn", "--original", "-v"],
		expect![[r#"
			lower bound: 0
			upper bound: 100
			domains:
			a: 0 1
			b: 0 1
			c: 0 1
			d: 0 1
			e: 0 1
			cost functions:
			"F_0_1_2_3_4":{"scope":["a","b","c","d","e"],
			"type":"knapsackv",
			"params":{"capacity":6,
				"weightedvalues":[[0,1,1],[1,1,2],[2,1,3],[3,1,4],[4,1,5]]}},
"#]],
	);
}

#[test]
fn test_report_unsatisfiable() {
	check_report(
		"unsat",
		r#"{
			"variables": [
				{ "name": "x", "domain": [[0, 2]], "costs": [[2, 4]] },
				{ "name": "y", "domain": [[0, 1]] }
			],
			"knapsacks": [
				{ "capacity": 5, "weights": [["x", [[1, 1], [2, 2]]], ["y", [[1, 1]]]] }
			]
		}"#,
		&["--bound-only"],
		expect![[r#"
			=====UNSATISFIABLE=====
"#]],
	);
}

#[test]
fn test_unknown_variable() {
	let path = std::env::temp_dir().join("cfn-softknap-unknown.json");
	std::fs::write(
		&path,
		r#"{"variables": [], "knapsacks": [{"capacity": 1, "weights": [["z", [[1, 1]]]]}]}"#,
	)
	.unwrap();
	let cli: Cli<_, _> = Arguments::from_vec(vec![path.clone().into_os_string()])
		.try_into()
		.unwrap();
	let err = cli
		.with_stdout(Vec::new())
		.with_stderr(|| DummyOutput, false)
		.run()
		.unwrap_err();
	std::fs::remove_file(&path).unwrap();
	assert_eq!(err.to_string(), "unknown variable `z`");
}
