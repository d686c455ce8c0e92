// Copyright 2025 Irreducible Inc.

use derive_more::Display;
use getset::CopyGetters;
use tensormem_utils::ensure;
use tracing::debug;

use crate::{
	alloc::Allocator,
	buffer::{BufferId, LogicalBuffer},
	error::Error,
	lifetime::Lifetime,
	manager::{ManagerId, MemoryManager},
	pool::BlobRegion,
};

/// Identity of a memory group: the manager it belongs to and its creation index there.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
#[display(fmt = "{}/group#{}", manager, index)]
#[get_copy = "pub"]
pub struct GroupId {
	manager: ManagerId,
	index: usize,
}

impl GroupId {
	pub(crate) const fn new(manager: ManagerId, index: usize) -> Self {
		Self { manager, index }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
	Unbound,
	Bound,
}

/// A set of logical buffers that get bound to pool memory together.
///
/// Buffers are added with [`Self::manage`] while the manager is being configured. After the
/// manager is populated, [`Self::acquire`] binds every managed buffer to its blob region and
/// [`Self::release`] detaches them again. Groups sharing one manager must not be live at
/// overlapping operations; the caller's schedule guarantees that, the group does not check it.
#[derive(Debug)]
pub struct MemoryGroup {
	id: GroupId,
	buffers: Vec<LogicalBuffer>,
	// Parallel to `buffers` while bound, empty otherwise.
	bindings: Vec<BlobRegion>,
	state: BindingState,
}

impl MemoryGroup {
	pub fn new<A: Allocator>(manager: &mut MemoryManager<A>) -> Self {
		Self {
			id: manager.next_group_id(),
			buffers: Vec::new(),
			bindings: Vec::new(),
			state: BindingState::Unbound,
		}
	}

	pub fn id(&self) -> GroupId {
		self.id
	}

	pub fn state(&self) -> BindingState {
		self.state
	}

	pub fn is_bound(&self) -> bool {
		self.state == BindingState::Bound
	}

	/// Managed buffers in the order they were added.
	pub fn buffers(&self) -> &[LogicalBuffer] {
		&self.buffers
	}

	/// Adds `buffer` to the group and records its lifetime with the manager's tracker.
	///
	/// Only valid before the manager is populated.
	pub fn manage<A: Allocator>(
		&mut self,
		manager: &mut MemoryManager<A>,
		buffer: LogicalBuffer,
		lifetime: Lifetime,
	) -> Result<(), Error> {
		ensure!(self.id.manager == manager.id(), Error::ForeignGroup { group: self.id });

		manager.track(buffer, lifetime)?;
		self.buffers.push(buffer);
		Ok(())
	}

	/// Binds every managed buffer to its region of the manager's pool.
	///
	/// Fails without touching the current bindings if the group is already bound.
	pub fn acquire<A: Allocator>(&mut self, manager: &MemoryManager<A>) -> Result<(), Error> {
		ensure!(!self.is_bound(), Error::AlreadyBound { group: self.id });
		ensure!(self.id.manager == manager.id(), Error::ForeignGroup { group: self.id });

		let bindings = self
			.buffers
			.iter()
			.map(|buffer| manager.map(buffer.id()))
			.collect::<Result<Vec<_>, _>>()?;

		debug!(group = %self.id, buffers = bindings.len(), "acquired memory group");
		self.bindings = bindings;
		self.state = BindingState::Bound;
		Ok(())
	}

	/// Detaches every managed buffer from pool memory.
	pub fn release(&mut self) -> Result<(), Error> {
		ensure!(self.is_bound(), Error::NotBound { group: self.id });

		self.bindings.clear();
		self.state = BindingState::Unbound;
		debug!(group = %self.id, "released memory group");
		Ok(())
	}

	/// The region `buffer` is currently bound to.
	pub fn region(&self, buffer: BufferId) -> Result<BlobRegion, Error> {
		let position = self
			.buffers
			.iter()
			.position(|managed| managed.id() == buffer)
			.ok_or(Error::UnmanagedBuffer {
				buffer,
				group: self.id,
			})?;
		ensure!(self.is_bound(), Error::NotBound { group: self.id });

		Ok(self.bindings[position])
	}

	/// Current buffer-to-region bindings; empty while unbound.
	pub fn bindings(&self) -> impl Iterator<Item = (LogicalBuffer, BlobRegion)> + '_ {
		self.buffers.iter().copied().zip(self.bindings.iter().copied())
	}
}
