// Copyright 2025 Irreducible Inc.

use std::sync::atomic::{AtomicUsize, Ordering};

use derive_more::Display;
use tensormem_utils::ensure;
use tracing::{info, instrument};

use crate::{
	alloc::{Allocator, HostAllocator},
	buffer::{BufferId, LogicalBuffer},
	error::Error,
	lifetime::{Lifetime, LifetimeGroups, LifetimeTracker},
	memory_group::{GroupId, MemoryGroup},
	pool::{BlobRegion, PoolManager},
	tensor::TensorInfo,
};

/// Process-unique identity of a memory manager.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(fmt = "mm#{}", _0)]
pub struct ManagerId(usize);

impl ManagerId {
	fn next() -> Self {
		static NEXT: AtomicUsize = AtomicUsize::new(0);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
	/// Buffers can be declared and managed.
	Configuring,
	/// Blobs are allocated; groups can be acquired.
	Populated,
	/// Populate failed; the manager cannot be used anymore.
	Poisoned,
}

/// Composes a [`LifetimeTracker`] and a [`PoolManager`].
///
/// Usage follows three phases: declare buffers and manage them in [`MemoryGroup`]s, call
/// [`Self::populate`] exactly once, then acquire and release groups around the operations that
/// use their buffers. Any number of managers can coexist, e.g. one for the scratch memory inside
/// layers and one for the tensors passed between layers.
#[derive(Debug)]
pub struct MemoryManager<A: Allocator = HostAllocator> {
	id: ManagerId,
	state: ManagerState,
	/// Size of every declared buffer, indexed by buffer id.
	declared: Vec<usize>,
	groups_created: usize,
	tracker: LifetimeTracker,
	lifetime_groups: Option<LifetimeGroups>,
	pool: PoolManager<A>,
}

impl<A: Allocator> Default for MemoryManager<A> {
	fn default() -> Self {
		Self {
			id: ManagerId::next(),
			state: ManagerState::Configuring,
			declared: Vec::new(),
			groups_created: 0,
			tracker: LifetimeTracker::new(),
			lifetime_groups: None,
			pool: PoolManager::new(),
		}
	}
}

impl<A: Allocator> MemoryManager<A> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn id(&self) -> ManagerId {
		self.id
	}

	pub fn state(&self) -> ManagerState {
		self.state
	}

	pub fn is_populated(&self) -> bool {
		self.state == ManagerState::Populated
	}

	/// Declares a buffer of `size` bytes.
	pub fn declare_buffer(&mut self, size: usize) -> LogicalBuffer {
		let buffer = LogicalBuffer::new(BufferId::new(self.declared.len()), size);
		self.declared.push(size);
		buffer
	}

	/// Declares a buffer large enough for a tensor described by `info`.
	pub fn declare_tensor(&mut self, info: &TensorInfo) -> Result<LogicalBuffer, Error> {
		Ok(self.declare_buffer(info.total_size()?))
	}

	pub(crate) fn next_group_id(&mut self) -> GroupId {
		let id = GroupId::new(self.id, self.groups_created);
		self.groups_created += 1;
		id
	}

	pub(crate) fn track(&mut self, buffer: LogicalBuffer, lifetime: Lifetime) -> Result<(), Error> {
		self.ensure_configuring()?;
		let declared = self
			.declared
			.get(buffer.id().index())
			.copied()
			.ok_or(Error::UnknownBuffer {
				buffer: buffer.id(),
			})?;
		ensure!(
			declared == buffer.size(),
			Error::SizeMismatch {
				buffer: buffer.id(),
				declared,
				size: buffer.size(),
			}
		);

		self.tracker.track(buffer, lifetime)
	}

	fn ensure_configuring(&self) -> Result<(), Error> {
		match self.state {
			ManagerState::Configuring => Ok(()),
			ManagerState::Populated => Err(Error::AlreadyPopulated),
			ManagerState::Poisoned => Err(Error::Unusable),
		}
	}

	fn ensure_populated(&self) -> Result<(), Error> {
		match self.state {
			ManagerState::Populated => Ok(()),
			ManagerState::Configuring => Err(Error::NotPopulated),
			ManagerState::Poisoned => Err(Error::Unusable),
		}
	}

	/// Computes the lifetime groups and allocates one blob per group from `allocator`.
	///
	/// `group_count_hint` is the number of blobs the caller expects. A failed populate leaves the
	/// manager [`ManagerState::Poisoned`] with nothing allocated.
	#[instrument(skip_all, name = "MemoryManager::populate", fields(manager = %self.id))]
	pub fn populate(&mut self, allocator: A, group_count_hint: usize) -> Result<(), Error> {
		self.ensure_configuring()?;

		let groups = self.tracker.compute_groups();
		debug_assert_eq!(groups.len(), self.tracker.min_group_count());

		if let Err(err) = self.pool.populate(allocator, &groups, group_count_hint) {
			self.state = ManagerState::Poisoned;
			return Err(err);
		}

		info!(
			buffers = self.tracker.len(),
			blobs = groups.len(),
			footprint = self.pool.footprint(),
			"populated memory manager"
		);
		self.lifetime_groups = Some(groups);
		self.state = ManagerState::Populated;
		Ok(())
	}

	/// The blob region `buffer` maps to.
	pub fn map(&self, buffer: BufferId) -> Result<BlobRegion, Error> {
		self.ensure_populated()?;
		self.pool.map(buffer)
	}

	/// The grouping computed by [`Self::populate`].
	pub fn lifetime_groups(&self) -> Option<&LifetimeGroups> {
		self.lifetime_groups.as_ref()
	}

	pub fn tracker(&self) -> &LifetimeTracker {
		&self.tracker
	}

	pub fn pool(&self) -> &PoolManager<A> {
		&self.pool
	}

	/// Bytes held by the pool's blobs.
	pub fn footprint(&self) -> usize {
		self.pool.footprint()
	}

	/// Bytes of `buffer`, which must be bound through `group`.
	pub fn buffer(&self, group: &MemoryGroup, buffer: BufferId) -> Result<&[u8], Error> {
		self.check_group(group)?;
		self.pool.memory(group.region(buffer)?)
	}

	pub fn buffer_mut(
		&mut self,
		group: &MemoryGroup,
		buffer: BufferId,
	) -> Result<&mut [u8], Error> {
		self.check_group(group)?;
		self.pool.memory_mut(group.region(buffer)?)
	}

	/// Mutable bytes of several bound buffers at once, in request order.
	///
	/// Buffers sharing a blob cannot be borrowed together and fail with
	/// [`Error::AliasedRegions`].
	pub fn buffers_mut(
		&mut self,
		requests: &[(&MemoryGroup, BufferId)],
	) -> Result<Vec<&mut [u8]>, Error> {
		let regions = requests
			.iter()
			.map(|&(group, buffer)| {
				self.check_group(group)?;
				group.region(buffer)
			})
			.collect::<Result<Vec<_>, _>>()?;

		self.pool.regions_mut(&regions)
	}

	fn check_group(&self, group: &MemoryGroup) -> Result<(), Error> {
		ensure!(group.id().manager() == self.id, Error::ForeignGroup { group: group.id() });
		Ok(())
	}
}
