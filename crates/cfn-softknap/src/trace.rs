//! Module that contains the implementation of a custom [`tracing::Subscriber`]
//! for `cfn-softknap`.

use std::{
	fmt,
	sync::{Arc, Mutex},
};

use tracing::{
	field::{Field, Visit},
	Level, Subscriber,
};
use tracing_subscriber::{
	field::{MakeVisitor, RecordFields, VisitOutput},
	fmt::{
		format::{DefaultFields, Writer},
		time::uptime,
		FormatFields, MakeWriter,
	},
};
use ustr::Ustr;

/// A [`tracing_subscriber::FormatFields`] implementation that formats the
/// variables of the network according to their names in the instance, and all
/// other fields using a `DefaultFields` formatter.
struct FmtVarFields {
	/// The inner formatter that will be used to format fields that are not
	/// variables.
	fmt: DefaultFields,
	/// The mapping from indexes of variables to their names.
	var_names: Arc<Mutex<Vec<Ustr>>>,
}

/// A visitor wrapper that ensures any fields containing variables are renamed
/// to use their names in the instance.
#[derive(Debug, Clone)]
struct VarNames<'a, V> {
	/// Inner visitor that will be used to format the fields.
	inner: V,
	/// The mapping from indexes of variables to their names.
	var_names: &'a [Ustr],
}

/// Create a [`tracing_subscriber::Subscriber`] specialized for `cfn-softknap`.
///
/// The given subscriber additionally formats variables using the name mapping
/// provided by `var_names`.
pub(crate) fn create_subscriber<W>(
	verbose: u8,
	make_writer: W,
	ansi: bool,
	var_names: Arc<Mutex<Vec<Ustr>>>,
) -> impl Subscriber
where
	W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
	tracing_subscriber::fmt()
		.with_max_level(match verbose {
			0 => Level::INFO,
			1 => Level::DEBUG,
			_ => Level::TRACE, // 2 or more
		})
		.with_writer(make_writer)
		.with_ansi(ansi)
		.with_timer(uptime())
		.map_fmt_fields(|fmt| FmtVarFields::new(fmt, var_names))
		.finish()
}

impl FmtVarFields {
	/// Create a new [`FmtVarFields`] formatter based on the given `fmt`, using
	/// the names in `var_names`.
	fn new(fmt: DefaultFields, var_names: Arc<Mutex<Vec<Ustr>>>) -> Self {
		Self { fmt, var_names }
	}
}

impl<'writer> FormatFields<'writer> for FmtVarFields {
	fn format_fields<R: RecordFields>(&self, writer: Writer<'writer>, fields: R) -> fmt::Result {
		let names = self.var_names.lock().map_err(|_| fmt::Error)?;
		let mut v = VarNames::new(self.fmt.make_visitor(writer), &names);
		fields.record(&mut v);
		v.finish()
	}
}

impl<'a, V> VarNames<'a, V> {
	/// Returns a new visitor that wraps `inner` so that any fields containing
	/// variables are renamed to use their names in the instance.
	fn new(inner: V, var_names: &'a [Ustr]) -> Self {
		VarNames { inner, var_names }
	}
}

impl<V: Visit> VarNames<'_, V> {
	#[inline]
	/// Check if the field should and can be formatted as a variable.
	fn check_var(&mut self, field: &Field, value: u64) -> bool {
		if field.name() == "var" {
			if let Some(name) = self.var_names.get(value as usize) {
				self.inner.record_str(field, name);
				return true;
			}
		}
		false
	}

	#[inline]
	/// Check whether the field should and can be formatted as a list of
	/// variables.
	fn check_vars(&mut self, field: &Field, value: &dyn fmt::Debug) -> bool {
		if field.name() == "vars" {
			let res: Result<Vec<usize>, _> = serde_json::from_str(&format!("{value:?}"));
			if let Ok(vars) = res {
				let names: Vec<String> = vars
					.into_iter()
					.map(|i| match self.var_names.get(i) {
						Some(name) => name.to_string(),
						None => format!("Var({i})"),
					})
					.collect();
				self.inner.record_str(field, &names.join(", "));
				return true;
			}
		}
		false
	}
}

impl<V: Visit> Visit for VarNames<'_, V> {
	#[inline]
	fn record_bool(&mut self, field: &Field, value: bool) {
		self.inner.record_bool(field, value);
	}

	#[inline]
	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		if self.check_vars(field, value) {
			return;
		}
		self.inner.record_debug(field, value);
	}

	#[inline]
	fn record_f64(&mut self, field: &Field, value: f64) {
		self.inner.record_f64(field, value);
	}

	#[inline]
	fn record_i64(&mut self, field: &Field, value: i64) {
		if value >= 0 && self.check_var(field, value as u64) {
			return;
		}
		self.inner.record_i64(field, value);
	}

	fn record_str(&mut self, field: &Field, value: &str) {
		self.inner.record_str(field, value);
	}

	#[inline]
	fn record_u64(&mut self, field: &Field, value: u64) {
		if self.check_var(field, value) {
			return;
		}
		self.inner.record_u64(field, value);
	}
}

impl<T, V: VisitOutput<T>> VisitOutput<T> for VarNames<'_, V> {
	fn finish(self) -> T {
		self.inner.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::{
		io,
		sync::{Arc, Mutex},
	};

	use expect_test::expect;
	use tracing::debug;
	use ustr::ustr;

	use crate::trace::create_subscriber;

	#[derive(Clone, Debug, Default)]
	/// Output stream that keeps everything written to it.
	struct Buffer(Arc<Mutex<Vec<u8>>>);

	impl io::Write for Buffer {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			self.0.lock().unwrap().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	#[test]
	fn test_var_names() {
		let buf = Buffer::default();
		let out = buf.clone();
		let names = Arc::new(Mutex::new(vec![ustr("x"), ustr("y")]));
		let subscriber = create_subscriber(1, move || out.clone(), false, names);
		tracing::subscriber::with_default(subscriber, || {
			debug!(var = 1_usize, val = 3, "assign");
			debug!(var = 7_usize, "unnamed");
			debug!(vars = ?vec![0, 1], "scope");
		});
		let log = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
		// Strip the timestamps.
		let lines: Vec<&str> = log
			.lines()
			.filter_map(|l| l.split_once("DEBUG ").map(|(_, rest)| rest))
			.collect();
		expect![[r#"
			cfn_softknap::trace::tests: assign var="y" val=3
			cfn_softknap::trace::tests: unnamed var=7
			cfn_softknap::trace::tests: scope vars="x, y""#]]
		.assert_eq(&lines.join("\n"));
	}
}
