//! This module contains the definitions for the priority queue used by
//! [`crate::Network`] to schedule the events sent to its cost functions.

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
/// The priority levels at which events can be scheduled.
pub(crate) enum PriorityLevel {
	/// The lowest priority level, used for the initial propagation of newly
	/// posted cost functions.
	Lowest,
	/// A low level of priority, used for the notification of cost increases.
	Low,
	/// A medium level of priority, used for value removals.
	Medium,
	/// The highest level of priority, used for variable assignments.
	High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A priority queue for network events.
pub(crate) struct PriorityQueue<E> {
	/// Internal storage of the queues for each priority level.
	storage: [Vec<E>; 4],
}

impl<E> PriorityQueue<E> {
	/// Removes all events from the queue.
	pub(crate) fn clear(&mut self) {
		for queue in self.storage.iter_mut() {
			queue.clear();
		}
	}

	/// Inserts an event into the queue at the end of the given priority level.
	pub(crate) fn insert(&mut self, priority: PriorityLevel, elem: E) {
		let i = priority as usize;
		debug_assert!((0..=3).contains(&i));
		self.storage[i].push(elem);
	}

	/// Returns whether no events are waiting in the queue.
	pub(crate) fn is_empty(&self) -> bool {
		self.storage.iter().all(Vec::is_empty)
	}

	/// Pops the highest priority event from the queue.
	pub(crate) fn pop(&mut self) -> Option<E> {
		for queue in self.storage.iter_mut().rev() {
			if !queue.is_empty() {
				return Some(queue.remove(0));
			}
		}
		None
	}
}

impl<E> Default for PriorityQueue<E> {
	fn default() -> Self {
		Self {
			storage: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::network::queue::{PriorityLevel, PriorityQueue};

	#[test]
	fn priority_order() {
		use PriorityLevel::*;
		assert!(High > Medium);
		assert!(Medium > Low);
		assert!(Low > Lowest);
	}

	#[test]
	fn fifo_within_level() {
		let mut queue = PriorityQueue::default();
		queue.insert(PriorityLevel::Low, 1);
		queue.insert(PriorityLevel::High, 2);
		queue.insert(PriorityLevel::Low, 3);
		queue.insert(PriorityLevel::High, 4);
		let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
		assert_eq!(order, vec![2, 4, 1, 3]);
	}
}
