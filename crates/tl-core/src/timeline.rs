//! Bounded, time-ordered collection of managed buffers.
//!
//! A [`Timeline`] maps [`Timestamp`]s to shared [`TimelineBuffer`]s. A producer
//! creates buffers from the timeline's chunk pool, fills them and pushes them;
//! consumers look up exact or closest timestamps and read through buffer locks.
//!
//! ## Capacity
//!
//! After every push the timeline holds at most `maximum_size` entries, keeping
//! the most recent timestamps. Shrinking the capacity with
//! [`set_maximum_size`](Timeline::set_maximum_size) takes effect on the next
//! push.
//!
//! ## Locking
//!
//! The map is guarded by one reader/writer lock: pushes, pops and clears are
//! writers, lookups are readers. Reading the bytes of a returned buffer takes
//! that buffer's own lock, independent of the timeline, so a consumer can keep
//! a buffer alive and readable after it has been evicted.

use crate::buffer::TimelineBuffer;
use crate::error::TimelineError;
use crate::layout::BufferLayout;
use crate::limits::DEFAULT_MAXIMUM_SIZE;
use crate::timestamp::Timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tl_memory::{AllocationPolicy, BufferManager, ManagedBuffer};
use tl_pool::{ChunkPool, PoolStats};
use tracing::{debug, info, trace};

/// Search direction for [`Timeline::get_closest_object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Closest entry at or before the query
    Past,
    /// Closest entry at or after the query
    Future,
    /// Closest entry on either side; equidistant entries resolve to the past one
    #[default]
    Both,
}

struct TimelineState {
    objects: BTreeMap<Timestamp, Arc<TimelineBuffer>>,
    maximum_size: usize,
    pool: Option<ChunkPool>,
    layout: Option<BufferLayout>,
}

impl TimelineState {
    fn expect_allocated(&self) -> (&ChunkPool, BufferLayout) {
        match (&self.pool, self.layout) {
            (Some(pool), Some(layout)) => (pool, layout),
            _ => panic!("timeline pool not initialized"),
        }
    }
}

/// Thread-safe timeline of time-stamped buffers.
pub struct Timeline {
    manager: Arc<BufferManager>,
    state: RwLock<TimelineState>,
}

impl Timeline {
    /// Unallocated timeline registered with the process-wide buffer manager.
    #[must_use]
    pub fn new() -> Self {
        Self::with_manager(Arc::clone(BufferManager::global()))
    }

    /// Unallocated timeline whose buffers register with `manager`.
    #[must_use]
    pub fn with_manager(manager: Arc<BufferManager>) -> Self {
        Self {
            manager,
            state: RwLock::new(TimelineState {
                objects: BTreeMap::new(),
                maximum_size: DEFAULT_MAXIMUM_SIZE,
                pool: None,
                layout: None,
            }),
        }
    }

    /// Builder-style capacity setting.
    ///
    /// # Panics
    ///
    /// Panics if `maximum_size` is 0.
    #[must_use]
    pub fn with_maximum_size(self, maximum_size: usize) -> Self {
        self.set_maximum_size(maximum_size);
        self
    }

    /// Buffer manager the timeline's buffers are registered with.
    #[must_use]
    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Configure raw buffers of `chunk_size` bytes.
    ///
    /// Calling again with another size clears the timeline and installs a
    /// fresh pool; calling with the current size is a no-op.
    pub fn init_pool_size(&self, chunk_size: usize) -> Result<(), TimelineError> {
        self.init_layout(BufferLayout::Raw { chunk_size })
    }

    pub(crate) fn init_layout(&self, layout: BufferLayout) -> Result<(), TimelineError> {
        let dropped = {
            let mut state = self.state.write();
            if state.layout == Some(layout) {
                return Ok(());
            }
            state.pool = Some(ChunkPool::with_chunk_size(layout.chunk_size())?);
            state.layout = Some(layout);
            std::mem::take(&mut state.objects)
        };

        info!(
            chunk_size = layout.chunk_size(),
            layout = ?layout,
            cleared = dropped.len(),
            "timeline pool configured"
        );
        Ok(())
    }

    /// Whether the pool has been configured.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.state.read().pool.is_some()
    }

    /// Configured payload layout.
    #[must_use]
    pub fn layout(&self) -> Option<BufferLayout> {
        self.state.read().layout
    }

    /// Counters of the current pool.
    #[must_use]
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.state.read().pool.as_ref().map(ChunkPool::stats)
    }

    /// Allocate a buffer for `timestamp` from the pool, ready to be filled.
    ///
    /// Recycled chunks are not cleared.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not configured.
    pub fn create_buffer(&self, timestamp: Timestamp) -> Result<TimelineBuffer, TimelineError> {
        let (pool, layout) = {
            let state = self.state.read();
            let (pool, layout) = state.expect_allocated();
            (pool.clone(), layout)
        };

        let mut data = ManagedBuffer::new(&self.manager);
        data.allocate(layout.chunk_size(), AllocationPolicy::Pool(pool))?;
        Ok(TimelineBuffer::new(timestamp, layout, data))
    }

    /// Publish a buffer, replacing any entry at the same timestamp and
    /// evicting the oldest entries beyond the capacity.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not configured or the buffer's layout does not
    /// match the timeline.
    pub fn push_object(&self, buffer: Arc<TimelineBuffer>) {
        let timestamp = buffer.timestamp();
        let mut evicted = Vec::new();
        let (replaced, len) = {
            let mut state = self.state.write();
            let (_, layout) = state.expect_allocated();
            assert!(
                buffer.layout() == layout,
                "pushed buffer layout {:?} does not match timeline layout {:?}",
                buffer.layout(),
                layout
            );

            let replaced = state.objects.insert(timestamp, buffer);
            while state.objects.len() > state.maximum_size {
                if let Some((_, oldest)) = state.objects.pop_first() {
                    evicted.push(oldest);
                }
            }
            (replaced, state.objects.len())
        };

        trace!(
            timestamp = %timestamp,
            replaced = replaced.is_some(),
            evicted = evicted.len(),
            len,
            "object pushed"
        );
        // Evicted buffers are released here, outside the writer lock.
        drop(replaced);
        drop(evicted);
    }

    /// Remove and return the entry at exactly `timestamp`.
    pub fn pop_object(&self, timestamp: Timestamp) -> Option<Arc<TimelineBuffer>> {
        self.state.write().objects.remove(&timestamp)
    }

    /// Entry at exactly `timestamp`.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not configured.
    #[must_use]
    pub fn get_object(&self, timestamp: Timestamp) -> Option<Arc<TimelineBuffer>> {
        let state = self.state.read();
        state.expect_allocated();
        state.objects.get(&timestamp).cloned()
    }

    /// Entry closest to `timestamp` in the given direction.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not configured.
    #[must_use]
    pub fn get_closest_object(
        &self,
        timestamp: Timestamp,
        direction: Direction,
    ) -> Option<Arc<TimelineBuffer>> {
        let state = self.state.read();
        state.expect_allocated();

        let past = state.objects.range(..=timestamp).next_back();
        let future = state.objects.range(timestamp..).next();
        let closest = match direction {
            Direction::Past => past,
            Direction::Future => future,
            Direction::Both => match (past, future) {
                (Some(p), Some(f)) => {
                    if timestamp.distance(*f.0) < timestamp.distance(*p.0) {
                        Some(f)
                    } else {
                        Some(p)
                    }
                }
                (p, f) => p.or(f),
            },
        };
        closest.map(|(_, buffer)| Arc::clone(buffer))
    }

    /// Entry with the largest timestamp.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not configured.
    #[must_use]
    pub fn get_newer_object(&self) -> Option<Arc<TimelineBuffer>> {
        let state = self.state.read();
        state.expect_allocated();
        state.objects.last_key_value().map(|(_, buffer)| Arc::clone(buffer))
    }

    /// Largest timestamp present.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not configured.
    #[must_use]
    pub fn get_newer_timestamp(&self) -> Option<Timestamp> {
        let state = self.state.read();
        state.expect_allocated();
        state.objects.last_key_value().map(|(timestamp, _)| *timestamp)
    }

    /// All timestamps, oldest first.
    #[must_use]
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.state.read().objects.keys().copied().collect()
    }

    /// Remove every entry. Idempotent.
    pub fn clear_timeline(&self) {
        let cleared = std::mem::take(&mut self.state.write().objects);
        if !cleared.is_empty() {
            debug!(cleared = cleared.len(), "timeline cleared");
        }
    }

    /// Change the capacity. Existing surplus entries are evicted by the next push.
    ///
    /// # Panics
    ///
    /// Panics if `maximum_size` is 0.
    pub fn set_maximum_size(&self, maximum_size: usize) {
        assert!(maximum_size > 0, "maximum_size must be > 0");
        self.state.write().maximum_size = maximum_size;
    }

    /// Current capacity.
    #[must_use]
    pub fn maximum_size(&self) -> usize {
        self.state.read().maximum_size
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    /// Whether the timeline has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }

    /// Whether `buffer` has this timeline's layout and could be pushed.
    #[must_use]
    pub fn is_object_valid(&self, buffer: &TimelineBuffer) -> bool {
        self.state.read().layout == Some(buffer.layout())
    }

    /// Replace this timeline with a deep copy of `source`.
    ///
    /// Configuration is copied and every entry's bytes are copied into fresh
    /// buffers from this timeline's own pool.
    pub fn deep_copy(&self, source: &Timeline) -> Result<(), TimelineError> {
        let (layout, maximum_size, entries) = {
            let state = source.state.read();
            let entries: Vec<_> = state.objects.values().cloned().collect();
            (state.layout, state.maximum_size, entries)
        };

        let Some(layout) = layout else {
            let mut state = self.state.write();
            state.objects.clear();
            state.pool = None;
            state.layout = None;
            state.maximum_size = maximum_size;
            return Ok(());
        };

        let pool = ChunkPool::with_chunk_size(layout.chunk_size())?;
        let mut copies = BTreeMap::new();
        for entry in &entries {
            let mut data = ManagedBuffer::new(&self.manager);
            data.allocate(entry.size(), AllocationPolicy::Pool(pool.clone()))?;
            {
                let src = entry.lock()?;
                data.lock_mut()?.copy_from_slice(&src);
            }
            let copy = TimelineBuffer::new(entry.timestamp(), layout, data);
            copies.insert(entry.timestamp(), Arc::new(copy));
        }

        let previous = {
            let mut state = self.state.write();
            state.pool = Some(pool);
            state.layout = Some(layout);
            state.maximum_size = maximum_size;
            std::mem::replace(&mut state.objects, copies)
        };
        debug!(copied = entries.len(), released = previous.len(), "timeline deep copied");
        Ok(())
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Timeline {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        // Never hold both read locks at once, a queued writer would deadlock
        // comparisons running in opposite directions.
        let (maximum_size, layout, keys) = {
            let state = self.state.read();
            (
                state.maximum_size,
                state.layout,
                state.objects.keys().copied().collect::<Vec<_>>(),
            )
        };
        let state = other.state.read();
        maximum_size == state.maximum_size
            && layout == state.layout
            && keys.iter().eq(state.objects.keys())
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Timeline")
            .field("len", &state.objects.len())
            .field("maximum_size", &state.maximum_size)
            .field("layout", &state.layout)
            .finish()
    }
}
