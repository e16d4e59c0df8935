//! Storage of the enumerated variables of a [`crate::Network`], their trailed
//! domains, and their trailed unary cost functions.

use rangelist::RangeList;

use crate::{
	actions::TrailingActions,
	network::trail::{Trail, TrailedInt},
	Cost, Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// An enumerated variable with an explicit (trailed) unary cost for each of
/// its values.
pub(crate) struct Variable {
	/// Name used when printing the variable.
	pub(crate) name: String,
	/// The values of the initial domain, in increasing order.
	pub(crate) values: Vec<Value>,
	/// Whether each value of the initial domain is still available (0 or 1).
	alive: Vec<TrailedInt>,
	/// The unary cost of each value of the initial domain.
	costs: Vec<TrailedInt>,
	/// The number of values that are still available.
	size: TrailedInt,
	/// Index of a value that is believed to have a zero unary cost.
	support: TrailedInt,
	/// Position of the variable in the DAC order.
	pub(crate) dac: usize,
}

impl Variable {
	/// Create a new variable with the given domain, with all unary costs set to
	/// zero.
	pub(crate) fn new(trail: &mut Trail, name: String, domain: &RangeList<Value>, dac: usize) -> Self {
		let values: Vec<Value> = domain.clone().into_iter().flatten().collect();
		let alive = values.iter().map(|_| trail.track_int(1)).collect();
		let costs = values.iter().map(|_| trail.track_int(0)).collect();
		let size = trail.track_int(values.len() as i64);
		let support = trail.track_int(0);
		Self {
			name,
			values,
			alive,
			costs,
			size,
			support,
			dac,
		}
	}

	/// Index of `val` in the initial domain of the variable.
	pub(crate) fn index(&self, val: Value) -> Option<usize> {
		self.values.binary_search(&val).ok()
	}

	/// Whether the value at index `idx` is still available.
	pub(crate) fn alive<T: TrailingActions>(&self, trail: &T, idx: usize) -> bool {
		trail.get_trailed_int(self.alive[idx]) != 0
	}

	/// Whether `val` is still available.
	pub(crate) fn can_be<T: TrailingActions>(&self, trail: &T, val: Value) -> bool {
		self.index(val).is_some_and(|idx| self.alive(trail, idx))
	}

	/// Iterate over the indices of the values that are still available.
	pub(crate) fn alive_indices<'a, T: TrailingActions>(
		&'a self,
		trail: &'a T,
	) -> impl Iterator<Item = usize> + 'a {
		(0..self.values.len()).filter(move |&idx| self.alive(trail, idx))
	}

	/// The values that are still available, in increasing order.
	pub(crate) fn domain<T: TrailingActions>(&self, trail: &T) -> Vec<Value> {
		self.alive_indices(trail).map(|idx| self.values[idx]).collect()
	}

	/// The number of values that are still available.
	pub(crate) fn size<T: TrailingActions>(&self, trail: &T) -> usize {
		trail.get_trailed_int(self.size) as usize
	}

	/// Mark the value at index `idx` as removed, returning whether it was still
	/// available.
	pub(crate) fn remove<T: TrailingActions>(&self, trail: &mut T, idx: usize) -> bool {
		if !self.alive(trail, idx) {
			return false;
		}
		let _ = trail.set_trailed_int(self.alive[idx], 0);
		let size = trail.get_trailed_int(self.size);
		let _ = trail.set_trailed_int(self.size, size - 1);
		true
	}

	/// The unary cost of the value at index `idx`.
	pub(crate) fn cost<T: TrailingActions>(&self, trail: &T, idx: usize) -> Cost {
		trail.get_trailed_int(self.costs[idx])
	}

	/// Change the unary cost of the value at index `idx`, returning the previous
	/// cost.
	pub(crate) fn set_cost<T: TrailingActions>(&self, trail: &mut T, idx: usize, cost: Cost) -> Cost {
		trail.set_trailed_int(self.costs[idx], cost)
	}

	/// The index of the current support value.
	pub(crate) fn support<T: TrailingActions>(&self, trail: &T) -> usize {
		trail.get_trailed_int(self.support) as usize
	}

	/// Change the index of the current support value.
	pub(crate) fn set_support<T: TrailingActions>(&self, trail: &mut T, idx: usize) {
		let _ = trail.set_trailed_int(self.support, idx as i64);
	}
}

#[cfg(test)]
mod tests {
	use rangelist::RangeList;

	use crate::network::{trail::Trail, variable::Variable};

	#[test]
	fn test_domain_removal() {
		let mut trail = Trail::default();
		let x = Variable::new(
			&mut trail,
			"x".to_owned(),
			&RangeList::from_iter([1..=3, 7..=8]),
			0,
		);
		assert_eq!(x.values, vec![1, 2, 3, 7, 8]);
		assert_eq!(x.index(7), Some(3));
		assert_eq!(x.index(5), None);

		trail.notify_new_decision_level();
		assert!(x.remove(&mut trail, 1));
		assert!(!x.remove(&mut trail, 1));
		assert_eq!(x.domain(&trail), vec![1, 3, 7, 8]);
		assert_eq!(x.size(&trail), 4);
		assert!(!x.can_be(&trail, 2));

		trail.notify_backtrack(0);
		assert_eq!(x.size(&trail), 5);
		assert!(x.can_be(&trail, 2));
	}
}
