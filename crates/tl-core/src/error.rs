//! Error types for timelines.

use thiserror::Error;
use tl_memory::MemoryError;
use tl_pool::PoolError;

/// Errors returned by timeline configuration and buffer creation.
///
/// Misuse (pushing before the pool is configured, pushing a buffer of the
/// wrong layout, out-of-range element indices) is a programming error and
/// panics instead.
#[derive(Error, Debug)]
pub enum TimelineError {
    /// Managed buffer allocation, dump or restore failed.
    #[error("Buffer memory error: {0}")]
    Memory(#[from] MemoryError),

    /// The timeline's chunk pool rejected the request.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Requested frame dimensions exceed supported limits.
    #[error("Frame dimensions {width}x{height} exceed maximum {max_dimension} per dimension")]
    FrameDimensionsTooLarge {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Per-dimension limit
        max_dimension: u32,
    },

    /// Calculating a size overflowed usize.
    #[error("Size overflow while computing {context}")]
    SizeOverflow {
        /// What was being computed
        context: &'static str,
    },

    /// Frame payload exceeds maximum allowed size.
    #[error("Frame size {bytes} bytes exceeds maximum {max_bytes} bytes")]
    FrameTooLarge {
        /// Computed frame size
        bytes: usize,
        /// Limit
        max_bytes: usize,
    },

    /// An element timeline cannot track that many slots.
    #[error("Element count {requested} exceeds maximum {max}")]
    TooManyElements {
        /// Requested slot count
        requested: usize,
        /// Limit
        max: usize,
    },

    /// A layout with a zero-sized dimension was requested.
    #[error("Invalid layout: {0} must be > 0")]
    EmptyLayout(&'static str),
}
