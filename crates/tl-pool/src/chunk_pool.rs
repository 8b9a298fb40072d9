//! Fixed-size chunk recycling.
//!
//! A [`ChunkPool`] is a cheap, cloneable handle. All clones share one free
//! list, so a buffer can return its chunk to the pool that produced it from
//! any thread.

use crate::error::PoolError;
use crossbeam_queue::SegQueue;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Internal state shared by every clone of a [`ChunkPool`].
struct ChunkPoolInner {
    /// Chunk size in bytes, fixed on first configuration
    chunk_size: OnceCell<usize>,
    /// Lock-free queue of recycled chunks
    free_chunks: SegQueue<Vec<u8>>,
    /// Number of chunks handed out and not yet released
    outstanding: AtomicUsize,
    /// Metrics: chunks obtained from the system allocator
    fresh_allocations: AtomicU64,
    /// Metrics: chunks served from the free list
    reused: AtomicU64,
    /// Metrics: chunks handed back through `release`
    releases: AtomicU64,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    /// Configured chunk size (0 if not configured yet)
    pub chunk_size: usize,
    /// Chunks waiting on the free list
    pub free: usize,
    /// Chunks currently in use
    pub outstanding: usize,
    /// Chunks obtained from the system allocator
    pub fresh_allocations: u64,
    /// Chunks served from the free list
    pub reused: u64,
    /// Chunks released back to the pool
    pub releases: u64,
}

impl PoolStats {
    /// Bytes held by the pool, in use or free.
    #[must_use]
    pub fn retained_bytes(&self) -> usize {
        (self.free + self.outstanding) * self.chunk_size
    }

    /// Fraction of allocations served without touching the system allocator.
    #[must_use]
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.fresh_allocations + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

/// Pool of equally sized byte chunks.
///
/// The chunk size is set once with [`init_pool_size`](Self::init_pool_size);
/// re-configuring with the same size is a no-op and any other size is
/// rejected. Allocating before configuration is a programming error.
#[derive(Clone)]
pub struct ChunkPool {
    inner: Arc<ChunkPoolInner>,
}

impl ChunkPool {
    /// Create an unconfigured pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChunkPoolInner {
                chunk_size: OnceCell::new(),
                free_chunks: SegQueue::new(),
                outstanding: AtomicUsize::new(0),
                fresh_allocations: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool already configured for `chunk_size`-byte chunks.
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self, PoolError> {
        let pool = Self::new();
        pool.init_pool_size(chunk_size)?;
        Ok(pool)
    }

    /// Fix the chunk size of this pool.
    ///
    /// # Errors
    ///
    /// - [`PoolError::ZeroChunkSize`] if `chunk_size` is 0
    /// - [`PoolError::ChunkSizeMismatch`] if the pool already uses another size
    pub fn init_pool_size(&self, chunk_size: usize) -> Result<(), PoolError> {
        if chunk_size == 0 {
            return Err(PoolError::ZeroChunkSize);
        }

        match self.inner.chunk_size.set(chunk_size) {
            Ok(()) => {
                info!(
                    chunk_size,
                    chunk_kb = chunk_size as f64 / 1024.0,
                    "ChunkPool configured"
                );
                Ok(())
            }
            Err(_) => {
                let configured = self.configured_chunk_size();
                if configured == chunk_size {
                    Ok(())
                } else {
                    warn!(configured, requested = chunk_size, "ChunkPool resize rejected");
                    Err(PoolError::ChunkSizeMismatch {
                        configured,
                        requested: chunk_size,
                    })
                }
            }
        }
    }

    /// Whether [`init_pool_size`](Self::init_pool_size) has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.chunk_size.get().is_some()
    }

    /// Configured chunk size, if any.
    #[must_use]
    pub fn chunk_size(&self) -> Option<usize> {
        self.inner.chunk_size.get().copied()
    }

    /// Take a chunk of exactly `chunk_size` bytes.
    ///
    /// Recycled chunks keep whatever content they had when released.
    ///
    /// # Panics
    ///
    /// Panics if the pool has not been configured.
    pub fn allocate(&self) -> Result<Vec<u8>, PoolError> {
        let chunk_size = self.configured_chunk_size();
        self.allocate_sized(chunk_size)
    }

    /// Take a chunk and shrink its visible length to `len` bytes.
    ///
    /// The backing capacity is always a full chunk, so the block can later be
    /// grown back up to `chunk_size` without reallocating.
    ///
    /// # Panics
    ///
    /// Panics if the pool has not been configured or `len` exceeds the chunk size.
    pub fn allocate_sized(&self, len: usize) -> Result<Vec<u8>, PoolError> {
        let chunk_size = self.configured_chunk_size();
        assert!(
            len <= chunk_size,
            "requested length {} exceeds chunk size {}",
            len,
            chunk_size
        );

        let mut chunk = match self.inner.free_chunks.pop() {
            Some(chunk) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                chunk
            }
            None => {
                let chunk = Self::fresh_chunk(chunk_size)?;
                self.inner.fresh_allocations.fetch_add(1, Ordering::Relaxed);
                chunk
            }
        };

        chunk.resize(chunk_size, 0);
        chunk.truncate(len);
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(chunk)
    }

    /// Return a chunk to the free list.
    ///
    /// Blocks whose capacity is smaller than the chunk size did not come from
    /// this pool; they are dropped instead of being recycled.
    pub fn release(&self, chunk: Vec<u8>) {
        let Some(chunk_size) = self.chunk_size() else {
            warn!(capacity = chunk.capacity(), "release on unconfigured ChunkPool, dropping block");
            return;
        };

        self.inner.releases.fetch_add(1, Ordering::Relaxed);

        if chunk.capacity() < chunk_size {
            warn!(
                capacity = chunk.capacity(),
                chunk_size, "foreign block released to ChunkPool, dropping"
            );
            return;
        }

        let _ = self
            .inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.inner.free_chunks.push(chunk);
    }

    /// Pre-allocate `count` chunks onto the free list.
    ///
    /// # Panics
    ///
    /// Panics if the pool has not been configured.
    pub fn reserve(&self, count: usize) -> Result<(), PoolError> {
        let chunk_size = self.configured_chunk_size();
        for _ in 0..count {
            let mut chunk = Self::fresh_chunk(chunk_size)?;
            chunk.resize(chunk_size, 0);
            self.inner.fresh_allocations.fetch_add(1, Ordering::Relaxed);
            self.inner.free_chunks.push(chunk);
        }
        debug!(count, chunk_size, "ChunkPool reserved chunks");
        Ok(())
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            chunk_size: self.chunk_size().unwrap_or(0),
            free: self.inner.free_chunks.len(),
            outstanding: self.inner.outstanding.load(Ordering::Acquire),
            fresh_allocations: self.inner.fresh_allocations.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            releases: self.inner.releases.load(Ordering::Relaxed),
        }
    }

    /// Whether two handles share the same free list.
    #[must_use]
    pub fn same_pool(&self, other: &ChunkPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn configured_chunk_size(&self) -> usize {
        match self.inner.chunk_size.get() {
            Some(size) => *size,
            None => panic!("ChunkPool used before init_pool_size"),
        }
    }

    fn fresh_chunk(chunk_size: usize) -> Result<Vec<u8>, PoolError> {
        let mut chunk = Vec::new();
        chunk
            .try_reserve_exact(chunk_size)
            .map_err(|_| PoolError::AllocationFailed { bytes: chunk_size })?;
        Ok(chunk)
    }
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ChunkPool")
            .field("chunk_size", &self.chunk_size())
            .field("free", &stats.free)
            .field("outstanding", &stats.outstanding)
            .finish()
    }
}
