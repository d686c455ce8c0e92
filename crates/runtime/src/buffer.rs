// Copyright 2025 Irreducible Inc.

use derive_more::Display;
use getset::CopyGetters;

/// Index of a declared buffer within its memory manager.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "buf#{}", _0)]
pub struct BufferId(usize);

impl BufferId {
	pub const fn new(index: usize) -> Self {
		Self(index)
	}

	pub const fn index(self) -> usize {
		self.0
	}
}

/// Storage requirement of one tensor.
///
/// The handle says nothing about where the bytes live. While the memory group managing it is
/// bound, the buffer resolves to a [`BlobRegion`](crate::pool::BlobRegion) of a pool blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct LogicalBuffer {
	#[get_copy = "pub"]
	id: BufferId,
	/// Size in bytes.
	#[get_copy = "pub"]
	size: usize,
}

impl LogicalBuffer {
	pub const fn new(id: BufferId, size: usize) -> Self {
		Self { id, size }
	}
}
