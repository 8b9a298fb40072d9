//! Allocation policies: where a managed buffer's bytes come from and go back to.

use crate::error::MemoryError;
use serde::Serialize;
use std::fmt;
use tl_pool::ChunkPool;

/// Strategy a [`ManagedBuffer`](crate::ManagedBuffer) uses to obtain, resize
/// and free its storage.
///
/// Every policy hands out zero-length-safe `Vec<u8>` blocks; the buffer never
/// frees memory itself.
#[derive(Clone, Default)]
pub enum AllocationPolicy {
    /// General-purpose heap allocation, zero-filled.
    #[default]
    Heap,
    /// Fixed-size chunks from a shared [`ChunkPool`].
    Pool(ChunkPool),
    /// Storage handed over by the caller; restores fall back to the heap.
    Adopted,
    /// No storage at all. Used by destroyed buffers.
    NoOp,
}

/// Serializable tag of an [`AllocationPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// See [`AllocationPolicy::Heap`]
    Heap,
    /// See [`AllocationPolicy::Pool`]
    Pool,
    /// See [`AllocationPolicy::Adopted`]
    Adopted,
    /// See [`AllocationPolicy::NoOp`]
    NoOp,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::Heap => "heap",
            PolicyKind::Pool => "pool",
            PolicyKind::Adopted => "adopted",
            PolicyKind::NoOp => "noop",
        };
        f.write_str(name)
    }
}

impl AllocationPolicy {
    /// Tag describing this policy.
    #[must_use]
    pub fn kind(&self) -> PolicyKind {
        match self {
            AllocationPolicy::Heap => PolicyKind::Heap,
            AllocationPolicy::Pool(_) => PolicyKind::Pool,
            AllocationPolicy::Adopted => PolicyKind::Adopted,
            AllocationPolicy::NoOp => PolicyKind::NoOp,
        }
    }

    /// Obtain a block of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics for [`AllocationPolicy::NoOp`] with a non-zero size, and for a
    /// pool policy when `size` exceeds the pool's chunk size.
    pub fn allocate(&self, size: usize) -> Result<Vec<u8>, MemoryError> {
        match self {
            AllocationPolicy::Heap | AllocationPolicy::Adopted => heap_block(size),
            AllocationPolicy::Pool(pool) => Ok(pool.allocate_sized(size)?),
            AllocationPolicy::NoOp => {
                assert!(size == 0, "no-op allocation policy cannot provide {} bytes", size);
                Ok(Vec::new())
            }
        }
    }

    /// Resize `block` to `new_size` bytes, preserving the common prefix.
    ///
    /// # Panics
    ///
    /// Panics when a pool block would grow beyond the pool's chunk size.
    pub fn reallocate(&self, block: &mut Vec<u8>, new_size: usize) -> Result<(), MemoryError> {
        match self {
            AllocationPolicy::Pool(pool) => {
                let chunk_size = pool.chunk_size().unwrap_or(0);
                assert!(
                    new_size <= chunk_size,
                    "pool block cannot grow to {} bytes (chunk size {})",
                    new_size,
                    chunk_size
                );
                block.resize(new_size, 0);
            }
            _ => {
                if new_size > block.len() {
                    block
                        .try_reserve_exact(new_size - block.len())
                        .map_err(|_| MemoryError::AllocationFailed { bytes: new_size })?;
                }
                block.resize(new_size, 0);
            }
        }
        Ok(())
    }

    /// Give a block back.
    pub fn destroy(&self, block: Vec<u8>) {
        match self {
            AllocationPolicy::Pool(pool) => pool.release(block),
            _ => drop(block),
        }
    }
}

impl fmt::Debug for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationPolicy::Pool(pool) => f.debug_tuple("Pool").field(pool).finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

fn heap_block(size: usize) -> Result<Vec<u8>, MemoryError> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(size)
        .map_err(|_| MemoryError::AllocationFailed { bytes: size })?;
    block.resize(size, 0);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocate_is_zeroed() {
        let block = AllocationPolicy::Heap.allocate(16).unwrap();
        assert_eq!(block, vec![0u8; 16]);
    }

    #[test]
    fn test_heap_reallocate_preserves_prefix() {
        let policy = AllocationPolicy::Heap;
        let mut block = policy.allocate(4).unwrap();
        block.copy_from_slice(&[1, 2, 3, 4]);

        policy.reallocate(&mut block, 6).unwrap();
        assert_eq!(block, vec![1, 2, 3, 4, 0, 0]);

        policy.reallocate(&mut block, 2).unwrap();
        assert_eq!(block, vec![1, 2]);
    }

    #[test]
    fn test_pool_policy_returns_chunks() {
        let pool = ChunkPool::with_chunk_size(8).unwrap();
        let policy = AllocationPolicy::Pool(pool.clone());

        let block = policy.allocate(8).unwrap();
        assert_eq!(pool.stats().outstanding, 1);
        policy.destroy(block);
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    #[should_panic(expected = "cannot grow")]
    fn test_pool_reallocate_beyond_chunk() {
        let policy = AllocationPolicy::Pool(ChunkPool::with_chunk_size(8).unwrap());
        let mut block = policy.allocate(4).unwrap();
        let _ = policy.reallocate(&mut block, 9);
    }

    #[test]
    #[should_panic(expected = "no-op allocation policy")]
    fn test_noop_cannot_allocate() {
        let _ = AllocationPolicy::NoOp.allocate(1);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AllocationPolicy::default().kind(), PolicyKind::Heap);
        assert_eq!(PolicyKind::Pool.to_string(), "pool");
        assert_eq!(format!("{:?}", AllocationPolicy::NoOp), "NoOp");
    }
}
