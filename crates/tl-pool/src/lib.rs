//! Fixed-chunk memory pool for timeline buffers.
//!
//! Timelines hold many buffers of the same size that are created and destroyed
//! at sensor rate. Going to the system allocator for every frame is wasteful,
//! so each timeline owns a [`ChunkPool`] that recycles chunks of one fixed size.
//!
//! ## Memory Flow
//!
//! ```text
//! 1. init_pool_size() fixes the chunk size (once, never changes)
//! 2. allocate() pops a recycled chunk or allocates a fresh one
//! 3. The chunk backs a managed buffer until that buffer is destroyed
//! 4. release() pushes the chunk back on the lock-free free list
//! ```
//!
//! The pool is never exhausted: when the free list is empty a new chunk is
//! allocated. Freed chunks are retained for reuse until the last handle to the
//! pool is dropped.
//!
//! # Example
//!
//! ```
//! use tl_pool::ChunkPool;
//!
//! let pool = ChunkPool::new();
//! pool.init_pool_size(600).unwrap();
//!
//! let chunk = pool.allocate().unwrap();
//! assert_eq!(chunk.len(), 600);
//! pool.release(chunk);
//!
//! // The next allocation reuses the released chunk.
//! let _again = pool.allocate().unwrap();
//! assert_eq!(pool.stats().reused, 1);
//! ```

pub mod chunk_pool;
pub mod error;

pub use chunk_pool::{ChunkPool, PoolStats};
pub use error::PoolError;
