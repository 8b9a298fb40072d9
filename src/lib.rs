//! Buffered timelines of time-stamped sensor data.
//!
//! Facade over the workspace crates plus the ambient pieces shared by the
//! `timeline-soak` binary:
//!
//! - [`tl_pool`]: fixed-chunk pool allocator
//! - [`tl_memory`]: managed buffers, buffer manager and dump policies
//! - [`tl_core`]: timelines of raw buffers, frames and element sets
//! - [`config`]: figment-based configuration
//! - [`tracing_setup`]: subscriber initialization
//! - [`soak`]: producer/consumer harness

pub mod config;
pub mod soak;
pub mod tracing_setup;

pub use tl_core;
pub use tl_memory;
pub use tl_pool;

pub use tl_core::{
    Direction, ElementSlot, ElementTimeline, FrameTimeline, PixelType, Timeline, TimelineBuffer,
    TimelineError, Timestamp,
};
pub use tl_memory::{BufferManager, DumpPolicy, ManagedBuffer, MemoryError};
pub use tl_pool::ChunkPool;
