//! Managed buffer memory.
//!
//! Long-running sensor pipelines keep more history than fits in RAM. This
//! crate gives every such history buffer a [`ManagedBuffer`] handle that the
//! [`BufferManager`] can push out to disk while nobody is looking at it, and
//! that transparently comes back the next time it is locked.
//!
//! - [`AllocationPolicy`]: where bytes come from (heap, chunk pool, adopted)
//! - [`ManagedBuffer`], [`BufferLock`], [`BufferLockMut`]: storage and scoped access
//! - [`BufferManager`]: registry, statistics, dump/restore
//! - [`DumpPolicy`]: when to dump automatically (never, always, barrier, valve)
//!
//! # Example
//!
//! ```
//! use tl_memory::{AllocationPolicy, BufferManager, ManagedBuffer};
//!
//! let manager = BufferManager::with_dump_dir(std::env::temp_dir());
//! let mut buffer = ManagedBuffer::new(&manager);
//! buffer.allocate(4, AllocationPolicy::Heap).unwrap();
//! buffer.lock_mut().unwrap().copy_from_slice(b"data");
//!
//! assert!(manager.dump_buffer(buffer.id()).unwrap());
//! assert_eq!(manager.buffer_stats().total_dumped, 4);
//!
//! // Locking restores the contents.
//! assert_eq!(&*buffer.lock().unwrap(), b"data");
//! ```

pub mod buffer;
pub mod dump_policy;
pub mod error;
pub mod manager;
pub mod policy;
pub mod size;
pub mod store;

pub use buffer::{BufferId, BufferLock, BufferLockMut, ManagedBuffer};
pub use dump_policy::{system_free_memory, DumpPolicy, FreeMemoryProbe};
pub use error::MemoryError;
pub use manager::{BufferInfo, BufferManager, BufferStats, ManagerConfig};
pub use policy::{AllocationPolicy, PolicyKind};
pub use size::{format_byte_size, parse_byte_size};
