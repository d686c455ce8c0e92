// Copyright 2025 Irreducible Inc.

//! Lifetime-based pooling of intermediate tensor memory.
//!
//! Tensors that are never live at the same operation can share storage. A [`MemoryManager`]
//! collects the lifetimes of the buffers its [`MemoryGroup`]s manage, partitions them into
//! groups of disjoint lifetimes once, and backs each group with a single blob from an
//! [`Allocator`]. At run time a memory group is acquired before the operations using its
//! buffers and released afterwards.
//!
//! ```
//! use tensormem_runtime::{HostAllocator, Lifetime, MemoryGroup, MemoryManager};
//!
//! let mut manager = MemoryManager::new();
//! let mut group = MemoryGroup::new(&mut manager);
//! let a = manager.declare_buffer(100);
//! let b = manager.declare_buffer(50);
//! group.manage(&mut manager, a, Lifetime::new(0, 2)?)?;
//! group.manage(&mut manager, b, Lifetime::new(3, 5)?)?;
//! manager.populate(HostAllocator, 1)?;
//! assert_eq!(manager.footprint(), 100);
//!
//! group.acquire(&manager)?;
//! manager.buffer_mut(&group, a.id())?.fill(1);
//! group.release()?;
//! # Ok::<(), tensormem_runtime::Error>(())
//! ```

pub mod alloc;
pub mod buffer;
mod error;
pub mod lifetime;
pub mod manager;
pub mod memory_group;
pub mod pool;
pub mod tensor;

pub use alloc::{Allocator, BoundedAllocator, HostAllocator, MemoryBlock};
pub use buffer::{BufferId, LogicalBuffer};
pub use error::Error;
pub use lifetime::{Lifetime, LifetimeGroup, LifetimeGroups, LifetimeTracker};
pub use manager::{ManagerId, ManagerState, MemoryManager};
pub use memory_group::{BindingState, GroupId, MemoryGroup};
pub use pool::{Blob, BlobRegion, PoolManager};
pub use tensor::{DataType, TensorInfo, TensorShape};
