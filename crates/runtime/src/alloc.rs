// Copyright 2025 Irreducible Inc.

use std::sync::Mutex;

use auto_impl::auto_impl;
use tensormem_utils::checked_arithmetics::{checked_align_up, checked_int_div};

/// Alignment in bytes of the storage behind every [`MemoryBlock`].
///
/// Blocks can be reinterpreted as slices of any `bytemuck::Pod` type up to this alignment.
pub const BLOCK_ALIGNMENT: usize = std::mem::align_of::<u64>();

/// Source of the physical memory that backs blobs.
///
/// Methods take `&self`, so one allocator can back several pool managers, either borrowed or
/// behind an `Arc`.
#[auto_impl(&, Box, Arc)]
pub trait Allocator {
	/// Allocates a zero-initialised block of `size` bytes.
	fn allocate(&self, size: usize) -> Result<MemoryBlock, Error>;

	/// Returns a block obtained from [`Self::allocate`].
	fn deallocate(&self, block: MemoryBlock);
}

/// A contiguous, zero-initialised host allocation.
#[derive(Debug)]
pub struct MemoryBlock {
	words: Box<[u64]>,
	len: usize,
}

impl MemoryBlock {
	/// Allocates `len` zeroed bytes, padded to [`BLOCK_ALIGNMENT`].
	pub fn zeroed(len: usize) -> Result<Self, Error> {
		let padded =
			checked_align_up(len, BLOCK_ALIGNMENT).ok_or(Error::SizeOverflow { requested: len })?;
		let words = bytemuck::try_zeroed_slice_box::<u64>(checked_int_div(padded, BLOCK_ALIGNMENT))
			.map_err(|()| Error::HostExhausted { requested: len })?;
		Ok(Self { words, len })
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Number of bytes actually reserved, `len` rounded up to [`BLOCK_ALIGNMENT`].
	pub fn capacity(&self) -> usize {
		self.words.len() * BLOCK_ALIGNMENT
	}

	pub fn as_bytes(&self) -> &[u8] {
		&bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
	}

	pub fn as_bytes_mut(&mut self) -> &mut [u8] {
		&mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
	}
}

/// Unbounded allocator over the host heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
	fn allocate(&self, size: usize) -> Result<MemoryBlock, Error> {
		MemoryBlock::zeroed(size)
	}

	fn deallocate(&self, block: MemoryBlock) {
		drop(block);
	}
}

/// Host heap allocator with a fixed byte budget.
///
/// Every allocation is charged its padded [`MemoryBlock::capacity`]. Deallocation gives the charge
/// back, so the budget of a dropped pool manager is available to the next one.
#[derive(Debug)]
pub struct BoundedAllocator {
	capacity: usize,
	in_use: Mutex<usize>,
}

impl BoundedAllocator {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			in_use: Mutex::new(0),
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Bytes currently handed out.
	pub fn in_use(&self) -> usize {
		*self.in_use.lock().expect("mutex is always available")
	}

	/// Bytes that can still be allocated.
	pub fn remaining(&self) -> usize {
		self.capacity - self.in_use()
	}
}

impl Allocator for BoundedAllocator {
	fn allocate(&self, size: usize) -> Result<MemoryBlock, Error> {
		let charge =
			checked_align_up(size, BLOCK_ALIGNMENT).ok_or(Error::SizeOverflow { requested: size })?;

		let mut in_use = self.in_use.lock().expect("mutex is always available");
		let available = self.capacity - *in_use;
		if charge > available {
			return Err(Error::OutOfMemory {
				requested: size,
				available,
			});
		}

		let block = MemoryBlock::zeroed(size)?;
		*in_use += block.capacity();
		Ok(block)
	}

	fn deallocate(&self, block: MemoryBlock) {
		let mut in_use = self.in_use.lock().expect("mutex is always available");
		*in_use = in_use.saturating_sub(block.capacity());
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("allocator is out of memory: requested {requested} bytes, {available} available")]
	OutOfMemory { requested: usize, available: usize },
	#[error("allocation of {requested} bytes overflows the address space")]
	SizeOverflow { requested: usize },
	#[error("host heap cannot provide {requested} bytes")]
	HostExhausted { requested: usize },
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_host_alloc_is_zeroed() {
		let mut block = HostAllocator.allocate(100).unwrap();
		assert_eq!(block.len(), 100);
		assert_eq!(block.capacity(), 104);
		assert!(block.as_bytes().iter().all(|&byte| byte == 0));

		block.as_bytes_mut()[99] = 7;
		assert_eq!(block.as_bytes()[99], 7);
	}

	#[test]
	fn test_block_alignment() {
		let block = HostAllocator.allocate(24).unwrap();
		assert_eq!(block.as_bytes().as_ptr() as usize % BLOCK_ALIGNMENT, 0);
		let floats: &[f32] = bytemuck::cast_slice(block.as_bytes());
		assert_eq!(floats.len(), 6);
	}

	#[test]
	fn test_host_alloc_failure_is_an_error() {
		assert_matches!(
			HostAllocator.allocate(1 << 60),
			Err(Error::HostExhausted { requested }) if requested == 1 << 60
		);
	}

	#[test]
	fn test_empty_block() {
		let block = HostAllocator.allocate(0).unwrap();
		assert!(block.is_empty());
		assert_eq!(block.capacity(), 0);
	}

	#[test]
	fn test_bounded_alloc() {
		let bounded = BoundedAllocator::new(256);
		let first = bounded.allocate(100).unwrap();
		let _second = bounded.allocate(100).unwrap();
		assert_eq!(bounded.in_use(), 208);
		assert_matches!(
			bounded.allocate(100),
			Err(Error::OutOfMemory {
				requested: 100,
				available: 48
			})
		);

		// Reuse memory
		bounded.deallocate(first);
		assert_eq!(bounded.remaining(), 152);
		assert_eq!(bounded.allocate(100).unwrap().len(), 100);
	}

	#[test]
	fn test_bounded_alloc_overflow() {
		let bounded = BoundedAllocator::new(256);
		assert_matches!(bounded.allocate(usize::MAX), Err(Error::SizeOverflow { .. }));
		assert_eq!(bounded.in_use(), 0);
	}

	#[test]
	fn test_shared_allocator() {
		fn alloc_through<A: Allocator>(allocator: A, size: usize) -> Result<MemoryBlock, Error> {
			allocator.allocate(size)
		}

		let bounded = Arc::new(BoundedAllocator::new(64));
		let _by_ref = alloc_through(&*bounded, 32).unwrap();
		let _by_arc = alloc_through(Arc::clone(&bounded), 32).unwrap();
		assert_eq!(bounded.remaining(), 0);
		assert_matches!(alloc_through(&*bounded, 1), Err(Error::OutOfMemory { .. }));
	}
}
