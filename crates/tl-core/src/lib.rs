//! Buffered timelines of sensor data.
//!
//! A timeline keeps the most recent `maximum_size` time-stamped buffers of one
//! sensor stream. Buffers come from a per-timeline chunk pool and are managed
//! by a [`BufferManager`], so old entries can be dumped to disk and restored
//! transparently on access.
//!
//! - [`Timeline`]: raw byte buffers
//! - [`FrameTimeline`]: image frames (`width` x `height` x `components`)
//! - [`ElementTimeline`]: sparse, fixed-capacity sets of plain-old-data values
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tl_core::{BufferManager, Direction, FrameTimeline, PixelType, Timestamp};
//!
//! let timeline = FrameTimeline::with_manager(BufferManager::new());
//! timeline.init_pool_size(4, 2, PixelType::U8, 1).unwrap();
//!
//! let mut frame = timeline.create_buffer(Timestamp::from_millis(10.0)).unwrap();
//! frame.fill(7).unwrap();
//! timeline.push_object(Arc::new(frame));
//!
//! let found = timeline
//!     .get_closest_object(Timestamp::from_millis(12.0), Direction::Both)
//!     .unwrap();
//! assert_eq!(found.lock().unwrap()[0], 7);
//! ```

pub mod buffer;
pub mod element;
pub mod error;
pub mod frame;
pub mod layout;
pub mod limits;
pub mod timeline;
pub mod timestamp;

pub use buffer::TimelineBuffer;
pub use element::{ElementBuffer, ElementReader, ElementSlot, ElementTimeline};
pub use error::TimelineError;
pub use frame::FrameTimeline;
pub use layout::{BufferLayout, FrameLayout, PixelType};
pub use timeline::{Direction, Timeline};
pub use timestamp::Timestamp;

pub use tl_memory::{BufferManager, BufferStats, DumpPolicy, ManagerConfig};
pub use tl_pool::PoolStats;
