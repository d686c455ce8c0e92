// Copyright 2025 Irreducible Inc.

use std::{collections::HashMap, ops::Range};

use getset::CopyGetters;
use tensormem_utils::{bail, ensure};
use tracing::debug;

use crate::{
	alloc::{Allocator, MemoryBlock},
	buffer::BufferId,
	error::Error,
	lifetime::LifetimeGroups,
};

/// A physical allocation shared by the members of one lifetime group.
#[derive(Debug)]
pub struct Blob {
	block: MemoryBlock,
}

impl Blob {
	/// Size in bytes, the size of the largest buffer mapped into this blob.
	pub fn size(&self) -> usize {
		self.block.len()
	}

	pub fn as_bytes(&self) -> &[u8] {
		self.block.as_bytes()
	}

	pub fn as_bytes_mut(&mut self) -> &mut [u8] {
		self.block.as_bytes_mut()
	}
}

/// Location of a logical buffer inside the pool: blob index and byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
#[get_copy = "pub"]
pub struct BlobRegion {
	blob: usize,
	offset: usize,
	len: usize,
}

impl BlobRegion {
	pub fn range(&self) -> Range<usize> {
		self.offset..self.offset + self.len
	}
}

/// Owns the blobs backing one memory manager and the buffer-to-blob mapping.
///
/// The pool is populated once from a set of lifetime groups and never resized afterwards.
/// Blobs are handed back to the allocator when the pool manager is dropped.
#[derive(Debug)]
pub struct PoolManager<A: Allocator> {
	allocator: Option<A>,
	blobs: Vec<Blob>,
	mapping: HashMap<BufferId, BlobRegion>,
}

impl<A: Allocator> Default for PoolManager<A> {
	fn default() -> Self {
		Self {
			allocator: None,
			blobs: Vec::new(),
			mapping: HashMap::new(),
		}
	}
}

impl<A: Allocator> PoolManager<A> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_populated(&self) -> bool {
		self.allocator.is_some()
	}

	/// Allocates one blob per lifetime group, sized to the group's largest member.
	///
	/// `group_count_hint` only reserves room in the blob table. On an allocation failure the
	/// blobs obtained so far are returned to `allocator` and the pool stays unpopulated.
	pub fn populate(
		&mut self,
		allocator: A,
		groups: &LifetimeGroups,
		group_count_hint: usize,
	) -> Result<(), Error> {
		ensure!(!self.is_populated(), Error::AlreadyPopulated);

		if group_count_hint != groups.len() {
			debug!(
				group_count_hint,
				groups = groups.len(),
				"pool count hint differs from lifetime groups"
			);
		}

		let mut blobs = Vec::with_capacity(group_count_hint.max(groups.len()));
		for (index, group) in groups.iter().enumerate() {
			match allocator.allocate(group.size()) {
				Ok(block) => blobs.push(Blob { block }),
				Err(source) => {
					for blob in blobs {
						allocator.deallocate(blob.block);
					}
					bail!(Error::AllocationFailure {
						blob: index,
						size: group.size(),
						source,
					});
				}
			}
		}

		let mut mapping = HashMap::new();
		for (blob, group) in groups.iter().enumerate() {
			for member in group.members() {
				let region = BlobRegion {
					blob,
					offset: 0,
					len: member.size(),
				};
				mapping.insert(member.id(), region);
			}
		}

		self.allocator = Some(allocator);
		self.blobs = blobs;
		self.mapping = mapping;
		Ok(())
	}

	/// The region `buffer` is bound to while its memory group is acquired.
	pub fn map(&self, buffer: BufferId) -> Result<BlobRegion, Error> {
		ensure!(self.is_populated(), Error::NotPopulated);
		self.mapping
			.get(&buffer)
			.copied()
			.ok_or(Error::UnknownBuffer { buffer })
	}

	pub fn blobs(&self) -> &[Blob] {
		&self.blobs
	}

	/// Total bytes held by the pool.
	pub fn footprint(&self) -> usize {
		self.blobs.iter().map(Blob::size).sum()
	}

	pub fn memory(&self, region: BlobRegion) -> Result<&[u8], Error> {
		self.blobs
			.get(region.blob)
			.and_then(|blob| blob.as_bytes().get(region.range()))
			.ok_or(Error::InvalidRegion { blob: region.blob })
	}

	pub fn memory_mut(&mut self, region: BlobRegion) -> Result<&mut [u8], Error> {
		self.blobs
			.get_mut(region.blob)
			.and_then(|blob| blob.as_bytes_mut().get_mut(region.range()))
			.ok_or(Error::InvalidRegion { blob: region.blob })
	}

	/// Borrows several regions mutably at once, in the order given.
	///
	/// ## Preconditions
	///
	/// - no two regions may live in the same blob
	pub fn regions_mut(&mut self, regions: &[BlobRegion]) -> Result<Vec<&mut [u8]>, Error> {
		for (position, region) in regions.iter().enumerate() {
			let fits = self
				.blobs
				.get(region.blob)
				.is_some_and(|blob| region.range().end <= blob.size());
			ensure!(fits, Error::InvalidRegion { blob: region.blob });
			ensure!(
				regions[..position].iter().all(|other| other.blob != region.blob),
				Error::AliasedRegions { blob: region.blob }
			);
		}

		let mut views: Vec<Option<&mut [u8]>> = regions.iter().map(|_| None).collect();
		for (index, blob) in self.blobs.iter_mut().enumerate() {
			if let Some(position) = regions.iter().position(|region| region.blob == index) {
				views[position] = Some(&mut blob.as_bytes_mut()[regions[position].range()]);
			}
		}

		Ok(views.into_iter().flatten().collect())
	}
}

impl<A: Allocator> Drop for PoolManager<A> {
	fn drop(&mut self) {
		if let Some(allocator) = self.allocator.take() {
			for blob in self.blobs.drain(..) {
				allocator.deallocate(blob.block);
			}
		}
	}
}
