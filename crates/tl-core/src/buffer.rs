//! Time-stamped payload buffers.

use crate::layout::BufferLayout;
use crate::timestamp::Timestamp;
use std::fmt;
use tl_memory::{BufferId, BufferLock, BufferLockMut, ManagedBuffer, MemoryError};

/// One time-stamped object of a timeline.
///
/// Produced by a timeline's `create_buffer`, filled by the producer through
/// [`lock_mut`](Self::lock_mut), then published with `push_object`. Once
/// published it is shared behind an `Arc` and only read through
/// [`lock`](Self::lock); the payload may be dumped to disk in between.
pub struct TimelineBuffer {
    timestamp: Timestamp,
    layout: BufferLayout,
    data: ManagedBuffer,
}

impl TimelineBuffer {
    pub(crate) fn new(timestamp: Timestamp, layout: BufferLayout, data: ManagedBuffer) -> Self {
        Self {
            timestamp,
            layout,
            data,
        }
    }

    /// Key of this object in its timeline.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Payload shape.
    #[must_use]
    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Identity of the backing managed buffer.
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.data.id()
    }

    /// Whether the payload currently lives on disk.
    #[must_use]
    pub fn is_dumped(&self) -> bool {
        self.data.is_dumped()
    }

    /// Backing managed buffer.
    #[must_use]
    pub fn managed(&self) -> &ManagedBuffer {
        &self.data
    }

    /// Shared access to the payload.
    pub fn lock(&self) -> Result<BufferLock<'_>, MemoryError> {
        self.data.lock()
    }

    /// Exclusive access to the payload.
    pub fn lock_mut(&mut self) -> Result<BufferLockMut<'_>, MemoryError> {
        self.data.lock_mut()
    }

    /// Copy `src` to the start of the payload.
    ///
    /// # Panics
    ///
    /// Panics if `src` is larger than the payload.
    pub fn copy_from_slice(&mut self, src: &[u8]) -> Result<(), MemoryError> {
        let mut payload = self.data.lock_mut()?;
        assert!(
            src.len() <= payload.len(),
            "source length {} exceeds buffer size {}",
            src.len(),
            payload.len()
        );
        payload[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Set every payload byte to `value`.
    pub fn fill(&mut self, value: u8) -> Result<(), MemoryError> {
        self.data.lock_mut()?.fill(value);
        Ok(())
    }
}

impl fmt::Debug for TimelineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineBuffer")
            .field("timestamp", &self.timestamp)
            .field("layout", &self.layout)
            .field("buffer", &self.data)
            .finish()
    }
}
