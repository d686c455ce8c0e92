// Copyright 2025 Irreducible Inc.

//! Liveness bookkeeping for logical buffers.
//!
//! Every tracked buffer carries an inclusive interval of operation indices during which its
//! contents must stay valid. Buffers whose intervals are pairwise disjoint can share one blob;
//! [`LifetimeTracker::compute_groups`] computes that partition.

use std::collections::HashMap;

use getset::{CopyGetters, Getters};
use itertools::Itertools;
use tensormem_utils::ensure;

use crate::{
	buffer::{BufferId, LogicalBuffer},
	error::Error,
};

/// Inclusive range `[start, end]` of operation indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[get_copy = "pub"]
pub struct Lifetime {
	start: usize,
	end: usize,
}

impl Lifetime {
	pub fn new(start: usize, end: usize) -> Result<Self, Error> {
		ensure!(start <= end, Error::InvalidLifetime { start, end });
		Ok(Self { start, end })
	}

	/// A lifetime covering a single operation.
	pub const fn single(op: usize) -> Self {
		Self { start: op, end: op }
	}

	pub const fn overlaps(&self, other: &Self) -> bool {
		self.start <= other.end && other.start <= self.end
	}

	pub const fn contains(&self, op: usize) -> bool {
		self.start <= op && op <= self.end
	}
}

#[derive(Debug, Clone, Copy)]
struct TrackedBuffer {
	buffer: LogicalBuffer,
	lifetime: Lifetime,
}

/// Records buffer lifetimes in registration order.
#[derive(Debug, Default)]
pub struct LifetimeTracker {
	tracked: Vec<TrackedBuffer>,
	index: HashMap<BufferId, usize>,
}

impl LifetimeTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records that `buffer` must stay valid for all operations in `lifetime`.
	pub fn track(&mut self, buffer: LogicalBuffer, lifetime: Lifetime) -> Result<(), Error> {
		ensure!(
			!self.index.contains_key(&buffer.id()),
			Error::DuplicateRegistration {
				buffer: buffer.id()
			}
		);

		self.index.insert(buffer.id(), self.tracked.len());
		self.tracked.push(TrackedBuffer { buffer, lifetime });
		Ok(())
	}

	pub fn lifetime(&self, buffer: BufferId) -> Option<Lifetime> {
		self.index
			.get(&buffer)
			.map(|&position| self.tracked[position].lifetime)
	}

	pub fn len(&self) -> usize {
		self.tracked.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tracked.is_empty()
	}

	/// The largest number of tracked buffers live during one operation.
	///
	/// No partition into lifetime groups can have fewer groups than this.
	pub fn min_group_count(&self) -> usize {
		// Starts sort before ends at the same op since lifetimes are inclusive.
		let events = self
			.tracked
			.iter()
			.flat_map(|tracked| {
				[
					(tracked.lifetime.start, 0, 1isize),
					(tracked.lifetime.end, 1, -1isize),
				]
			})
			.sorted_unstable();

		let mut live = 0isize;
		let mut peak = 0isize;
		for (_, _, delta) in events {
			live += delta;
			peak = peak.max(live);
		}
		peak as usize
	}

	/// Partitions the tracked buffers into groups of pairwise-disjoint lifetimes.
	///
	/// Buffers are visited by lifetime start, ties broken by registration order, and each one is
	/// placed into the first group whose members have all ended before it starts. Visiting in start
	/// order makes first-fit open a new group only when every existing group is live at the new
	/// buffer's start, so the result has exactly [`Self::min_group_count`] groups.
	pub fn compute_groups(&self) -> LifetimeGroups {
		let order = (0..self.tracked.len()).sorted_by_key(|&i| (self.tracked[i].lifetime.start, i));

		let mut groups = Vec::<LifetimeGroup>::new();
		// Latest end op among the members of each group.
		let mut group_ends = Vec::<usize>::new();
		let mut assignment = HashMap::with_capacity(self.tracked.len());

		for position in order {
			let TrackedBuffer { buffer, lifetime } = self.tracked[position];

			let group_index = match group_ends.iter().position(|&end| end < lifetime.start) {
				Some(group_index) => group_index,
				None => {
					groups.push(LifetimeGroup::default());
					group_ends.push(lifetime.end);
					groups.len() - 1
				}
			};

			let group = &mut groups[group_index];
			group.members.push(buffer);
			group.size = group.size.max(buffer.size());
			group_ends[group_index] = group_ends[group_index].max(lifetime.end);
			assignment.insert(buffer.id(), group_index);
		}

		tracing::trace!(
			buffers = self.tracked.len(),
			groups = groups.len(),
			"computed lifetime groups"
		);

		LifetimeGroups { groups, assignment }
	}
}

/// Buffers that may share one blob, in the order they were assigned.
#[derive(Debug, Default, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct LifetimeGroup {
	#[get = "pub"]
	members: Vec<LogicalBuffer>,
	/// Size of the largest member in bytes.
	#[get_copy = "pub"]
	size: usize,
}

impl LifetimeGroup {
	pub fn contains(&self, buffer: BufferId) -> bool {
		self.members.iter().any(|member| member.id() == buffer)
	}
}

/// Result of [`LifetimeTracker::compute_groups`].
#[derive(Debug, Default, Clone)]
pub struct LifetimeGroups {
	groups: Vec<LifetimeGroup>,
	assignment: HashMap<BufferId, usize>,
}

impl LifetimeGroups {
	pub fn len(&self) -> usize {
		self.groups.len()
	}

	pub fn is_empty(&self) -> bool {
		self.groups.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&LifetimeGroup> {
		self.groups.get(index)
	}

	pub fn iter(&self) -> impl Iterator<Item = &LifetimeGroup> {
		self.groups.iter()
	}

	/// Index of the group `buffer` was assigned to.
	pub fn group_of(&self, buffer: BufferId) -> Option<usize> {
		self.assignment.get(&buffer).copied()
	}

	/// Sum of all group sizes, the bytes needed to back every group with its own blob.
	pub fn total_size(&self) -> usize {
		self.groups.iter().map(LifetimeGroup::size).sum()
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use proptest::prelude::*;

	use super::*;

	fn buffer(index: usize, size: usize) -> LogicalBuffer {
		LogicalBuffer::new(BufferId::new(index), size)
	}

	fn lifetime(start: usize, end: usize) -> Lifetime {
		Lifetime::new(start, end).unwrap()
	}

	#[test]
	fn test_invalid_lifetime() {
		assert_matches!(Lifetime::new(3, 2), Err(Error::InvalidLifetime { start: 3, end: 2 }));
		assert_eq!(Lifetime::new(2, 2).unwrap(), Lifetime::single(2));
	}

	#[test]
	fn test_overlap_is_inclusive() {
		assert!(lifetime(0, 2).overlaps(&lifetime(2, 4)));
		assert!(!lifetime(0, 2).overlaps(&lifetime(3, 5)));
		assert!(lifetime(0, 5).overlaps(&lifetime(2, 4)));
		assert!(lifetime(0, 5).contains(5));
		assert!(!lifetime(1, 5).contains(0));
	}

	#[test]
	fn test_duplicate_registration() {
		let mut tracker = LifetimeTracker::new();
		tracker.track(buffer(0, 16), lifetime(0, 1)).unwrap();
		assert_matches!(
			tracker.track(buffer(0, 16), lifetime(4, 5)),
			Err(Error::DuplicateRegistration { buffer }) if buffer == BufferId::new(0)
		);
		assert_eq!(tracker.len(), 1);
		assert_eq!(tracker.lifetime(BufferId::new(0)), Some(lifetime(0, 1)));
	}

	#[test]
	fn test_disjoint_buffers_share_group() {
		let mut tracker = LifetimeTracker::new();
		tracker.track(buffer(0, 100), lifetime(0, 2)).unwrap();
		tracker.track(buffer(1, 50), lifetime(3, 5)).unwrap();

		let groups = tracker.compute_groups();
		assert_eq!(groups.len(), 1);
		assert_eq!(groups.get(0).unwrap().size(), 100);
		assert_eq!(groups.get(0).unwrap().members(), &vec![buffer(0, 100), buffer(1, 50)]);
	}

	#[test]
	fn test_overlapping_buffers_split() {
		let mut tracker = LifetimeTracker::new();
		tracker.track(buffer(0, 100), lifetime(0, 5)).unwrap();
		tracker.track(buffer(1, 50), lifetime(2, 4)).unwrap();

		let groups = tracker.compute_groups();
		assert_eq!(groups.len(), 2);
		assert_eq!(groups.group_of(BufferId::new(0)), Some(0));
		assert_eq!(groups.group_of(BufferId::new(1)), Some(1));
		assert_eq!(groups.total_size(), 150);
	}

	#[test]
	fn test_full_span_buffer_is_alone() {
		let mut tracker = LifetimeTracker::new();
		tracker.track(buffer(0, 8), lifetime(0, 1)).unwrap();
		tracker.track(buffer(1, 8), lifetime(0, 9)).unwrap();
		tracker.track(buffer(2, 8), lifetime(2, 5)).unwrap();
		tracker.track(buffer(3, 8), lifetime(6, 9)).unwrap();

		let groups = tracker.compute_groups();
		let spanning = groups.group_of(BufferId::new(1)).unwrap();
		assert_eq!(groups.get(spanning).unwrap().members(), &vec![buffer(1, 8)]);
		assert_eq!(groups.len(), 2);
	}

	#[test]
	fn test_registration_order_breaks_ties() {
		let mut tracker = LifetimeTracker::new();
		tracker.track(buffer(7, 8), lifetime(4, 5)).unwrap();
		tracker.track(buffer(3, 8), lifetime(0, 1)).unwrap();
		tracker.track(buffer(5, 8), lifetime(0, 3)).unwrap();

		// buf#3 and buf#5 start together; buf#3 was registered first and opens group 0.
		let groups = tracker.compute_groups();
		assert_eq!(groups.group_of(BufferId::new(3)), Some(0));
		assert_eq!(groups.group_of(BufferId::new(5)), Some(1));
		assert_eq!(groups.group_of(BufferId::new(7)), Some(0));
	}

	#[test]
	fn test_start_order_is_optimal() {
		// Visiting these in registration order with first-fit would need three groups.
		let mut tracker = LifetimeTracker::new();
		tracker.track(buffer(0, 8), lifetime(0, 1)).unwrap();
		tracker.track(buffer(1, 8), lifetime(4, 5)).unwrap();
		tracker.track(buffer(2, 8), lifetime(2, 5)).unwrap();
		tracker.track(buffer(3, 8), lifetime(0, 3)).unwrap();

		assert_eq!(tracker.min_group_count(), 2);
		assert_eq!(tracker.compute_groups().len(), 2);
	}

	#[test]
	fn test_empty_tracker() {
		let tracker = LifetimeTracker::new();
		assert!(tracker.is_empty());
		assert_eq!(tracker.min_group_count(), 0);
		assert!(tracker.compute_groups().is_empty());
	}

	fn tracker_from(intervals: &[(usize, usize, usize)]) -> LifetimeTracker {
		let mut tracker = LifetimeTracker::new();
		for (index, &(start, len, size)) in intervals.iter().enumerate() {
			tracker
				.track(buffer(index, size), lifetime(start, start + len))
				.unwrap();
		}
		tracker
	}

	proptest! {
		#[test]
		fn test_groups_separate_overlapping_buffers(
			intervals in prop::collection::vec((0usize..32, 0usize..8, 1usize..1024), 0..48)
		) {
			let tracker = tracker_from(&intervals);
			let groups = tracker.compute_groups();

			for group in groups.iter() {
				for (a, b) in group.members().iter().tuple_combinations() {
					let lifetime_a = tracker.lifetime(a.id()).unwrap();
					let lifetime_b = tracker.lifetime(b.id()).unwrap();
					prop_assert!(!lifetime_a.overlaps(&lifetime_b));
				}
				let largest = group.members().iter().map(|member| member.size()).max();
				prop_assert_eq!(Some(group.size()), largest);
			}

			let assigned: usize = groups.iter().map(|group| group.members().len()).sum();
			prop_assert_eq!(assigned, intervals.len());
		}

		#[test]
		fn test_group_count_is_minimal(
			intervals in prop::collection::vec((0usize..32, 0usize..8, 1usize..1024), 0..48)
		) {
			let tracker = tracker_from(&intervals);
			prop_assert_eq!(tracker.compute_groups().len(), tracker.min_group_count());
		}

		#[test]
		fn test_grouping_is_deterministic(
			intervals in prop::collection::vec((0usize..32, 0usize..8, 1usize..1024), 0..48)
		) {
			let tracker = tracker_from(&intervals);
			let first = tracker.compute_groups();
			let second = tracker.compute_groups();
			prop_assert_eq!(first.groups, second.groups);
		}
	}
}
