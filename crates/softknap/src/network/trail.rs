//! Reversible integers of a cost function network.
//!
//! Every change to a [`TrailedInt`] made after the first decision level is
//! recorded on the [`Trail`], so that the network can undo it when the search
//! backtracks.

use std::mem;

use index_vec::IndexVec;
use tracing::trace;

use crate::actions::TrailingActions;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Central storage of the trailed integers of a [`crate::Network`], and of the
/// changes made to them after the first decision level.
pub(crate) struct Trail {
	/// The storage of events that have been trailed.
	///
	/// Note that the trail contains a sequence of integers, but every 3 of these
	/// integers are intended to be read as a [`TrailEvent`].
	trail: Vec<u32>,
	/// The length of the trail when previous decision levels were opened.
	prev_len: Vec<usize>,
	/// The current value of every trailed integer.
	int_value: IndexVec<TrailedInt, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// An event that is recorded such that it can be undone: the assignment of a
/// trailed integer, and the previous value it had.
pub(crate) struct TrailEvent(TrailedInt, i64);

impl Trail {
	/// The number of decision levels that are open.
	pub(crate) fn decision_level(&self) -> usize {
		self.prev_len.len()
	}

	/// Notify the Trail that the search has backtracked to the given level.
	///
	/// Every trailed integer gets back the value it had when `level` was opened.
	pub(crate) fn notify_backtrack(&mut self, level: usize) {
		if level >= self.prev_len.len() {
			return;
		}

		let len = self.prev_len[level];
		self.prev_len.truncate(level);
		debug_assert!(
			len <= self.trail.len(),
			"trail of length {} is shorter than the {len} entries recorded at level {level}",
			self.trail.len()
		);
		let mut undone = 0;
		while self.trail.len() > len {
			let _ = self.undo();
			undone += 1;
		}
		trace!(level, undone, "backtrack trail");
	}

	/// Notify the Trail of a new decision level to which the trail can be
	/// restored.
	pub(crate) fn notify_new_decision_level(&mut self) {
		self.prev_len.push(self.trail.len());
	}

	/// Record the previous value of a trailed integer.
	fn push_trail(&mut self, event: TrailEvent) {
		let pos = self.trail.len();
		self.trail.extend([0; 3]);
		event.write_trail(&mut self.trail[pos..]);
	}

	/// Create a trailed integer whose value is `val` at every decision level.
	pub(crate) fn track_int(&mut self, val: i64) -> TrailedInt {
		self.int_value.push(val)
	}

	/// Restore the value recorded by the most recent event, and return that
	/// event, or `None` when nothing is left to undo.
	fn undo(&mut self) -> Option<TrailEvent> {
		let pos = self.trail.len().checked_sub(3)?;
		let mut raw = [0; 3];
		raw.copy_from_slice(&self.trail[pos..]);
		self.trail.truncate(pos);
		let event = TrailEvent::from_trail(raw);
		self.int_value[event.0] = event.1;
		Some(event)
	}
}

impl TrailingActions for Trail {
	fn get_trailed_int(&self, i: TrailedInt) -> i64 {
		self.int_value[i]
	}

	fn set_trailed_int(&mut self, i: TrailedInt, v: i64) -> i64 {
		if self.int_value[i] == v {
			return v;
		}
		let old = mem::replace(&mut self.int_value[i], v);
		if !self.prev_len.is_empty() {
			self.push_trail(TrailEvent(i, old));
		}
		old
	}
}

impl TrailEvent {
	#[inline]
	/// Decode an event from its three words: the low and high halves of the
	/// value, followed by the raw index of the integer.
	fn from_trail(raw: [u32; 3]) -> Self {
		let high = raw[1] as u64;
		let low = raw[0] as u64;
		TrailEvent(TrailedInt::from_raw(raw[2]), ((high << 32) | low) as i64)
	}

	#[inline]
	/// Encode the event in three words, see [`Self::from_trail`].
	fn write_trail(&self, trail: &mut [u32]) {
		let val = self.1 as u64;
		trail[0] = val as u32;
		trail[1] = (val >> 32) as u32;
		trail[2] = self.0.raw();
	}
}

index_vec::define_index_type! {
	/// Identifies an trailed integer tracked within a [`crate::Network`]
	pub struct TrailedInt = u32;
}

#[cfg(test)]
mod tests {
	use crate::{
		actions::TrailingActions,
		network::trail::{Trail, TrailEvent},
	};

	#[test]
	fn test_trail_event() {
		let mut trail = Trail::default();
		let int_events: Vec<_> = [
			0,
			1,
			-1,
			i64::MAX,
			i64::MIN,
			4084,
			-9967,
			9076,
			-4312,
			1718,
		]
		.into_iter()
		.map(|i| (trail.track_int(0), i))
		.collect();

		for (i, v) in int_events.iter() {
			trail.push_trail(TrailEvent(*i, *v));
		}
		for (i, v) in int_events.iter().rev() {
			let e = trail.undo().unwrap();
			assert_eq!(e, TrailEvent(*i, *v));
			assert_eq!(trail.get_trailed_int(*i), *v);
		}
		assert_eq!(trail.undo(), None);
	}

	#[test]
	fn test_backtrack_levels() {
		let mut trail = Trail::default();
		let a = trail.track_int(3);
		let b = trail.track_int(-7);

		// Changes at the root level are never undone.
		assert_eq!(trail.set_trailed_int(a, 4), 3);

		trail.notify_new_decision_level();
		assert_eq!(trail.set_trailed_int(a, 10), 4);
		assert_eq!(trail.set_trailed_int(b, 0), -7);
		trail.notify_new_decision_level();
		assert_eq!(trail.set_trailed_int(b, 1), 0);
		assert_eq!(trail.set_trailed_int(b, 1), 1);
		assert_eq!(trail.decision_level(), 2);

		trail.notify_backtrack(1);
		assert_eq!(trail.get_trailed_int(a), 10);
		assert_eq!(trail.get_trailed_int(b), 0);
		trail.notify_backtrack(0);
		assert_eq!(trail.get_trailed_int(a), 4);
		assert_eq!(trail.get_trailed_int(b), -7);
		assert_eq!(trail.decision_level(), 0);
	}
}
