// Copyright 2025 Irreducible Inc.

use crate::{alloc, buffer::BufferId, memory_group::GroupId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("buffer {buffer} is already tracked")]
	DuplicateRegistration { buffer: BufferId },
	#[error("failed to allocate {size} bytes for blob {blob}: {source}")]
	AllocationFailure {
		blob: usize,
		size: usize,
		#[source]
		source: alloc::Error,
	},
	#[error("memory group {group} is already bound")]
	AlreadyBound { group: GroupId },
	#[error("memory group {group} is not bound")]
	NotBound { group: GroupId },
	#[error("lifetime starts at op {start} but ends at op {end}")]
	InvalidLifetime { start: usize, end: usize },
	#[error("memory manager is already populated")]
	AlreadyPopulated,
	#[error("memory manager is not populated")]
	NotPopulated,
	#[error("memory manager failed to populate and is unusable")]
	Unusable,
	#[error("buffer {buffer} is not tracked by this memory manager")]
	UnknownBuffer { buffer: BufferId },
	#[error("buffer {buffer} was declared with {declared} bytes, not {size}")]
	SizeMismatch {
		buffer: BufferId,
		declared: usize,
		size: usize,
	},
	#[error("buffer {buffer} is not managed by memory group {group}")]
	UnmanagedBuffer { buffer: BufferId, group: GroupId },
	#[error("memory group {group} belongs to a different memory manager")]
	ForeignGroup { group: GroupId },
	#[error("region does not lie within blob {blob}")]
	InvalidRegion { blob: usize },
	#[error("more than one requested region lives in blob {blob}")]
	AliasedRegions { blob: usize },
	#[error("tensor size overflows usize")]
	SizeOverflow,
}
