//! Error types for chunk pool operations.

use thiserror::Error;

/// Errors returned by [`ChunkPool`](crate::ChunkPool).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// A pool cannot hand out empty chunks.
    #[error("Chunk size must be > 0")]
    ZeroChunkSize,

    /// The pool was already configured with a different chunk size.
    #[error("Pool already configured with {configured}-byte chunks (requested {requested})")]
    ChunkSizeMismatch {
        /// Chunk size fixed at first configuration
        configured: usize,
        /// Chunk size passed to the rejected call
        requested: usize,
    },

    /// The system could not provide a fresh chunk.
    #[error("Failed to allocate {bytes} bytes for a pool chunk")]
    AllocationFailed {
        /// Requested chunk size in bytes
        bytes: usize,
    },
}
