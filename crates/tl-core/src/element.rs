//! Timelines of fixed-capacity, sparsely filled element sets.
//!
//! Each buffer stores up to `max_elements` values of a plain-old-data type `T`
//! plus a 64-bit presence mask. Payload layout:
//!
//! ```text
//! [ mask: u64 ][ element 0 ][ element 1 ] ... [ element max-1 ]
//! ```
//!
//! The mask lives inside the managed payload, so it is dumped and restored
//! together with the elements. Absent slots read as `T::zeroed()`.

use crate::buffer::TimelineBuffer;
use crate::error::TimelineError;
use crate::layout::BufferLayout;
use crate::limits::MAX_ELEMENTS;
use crate::timeline::Timeline;
use crate::timestamp::Timestamp;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tl_memory::{BufferLock, BufferLockMut, BufferManager};

const MASK_BYTES: usize = size_of::<u64>();

fn element_range<T>(index: usize) -> std::ops::Range<usize> {
    let start = MASK_BYTES + index * size_of::<T>();
    start..start + size_of::<T>()
}

fn element_capacity<T>(layout: BufferLayout) -> usize {
    match layout {
        BufferLayout::Elements {
            element_size,
            max_elements,
            ..
        } => {
            assert!(
                element_size == size_of::<T>(),
                "element size {} does not match {}-byte element type",
                element_size,
                size_of::<T>()
            );
            max_elements
        }
        other => panic!("buffer layout {:?} is not an element layout", other),
    }
}

/// Timeline whose buffers each hold up to `max_elements` values of `T`.
///
/// All [`Timeline`] operations are available through `Deref`.
pub struct ElementTimeline<T> {
    timeline: Timeline,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod> ElementTimeline<T> {
    /// Unallocated element timeline on the process-wide buffer manager.
    #[must_use]
    pub fn new() -> Self {
        Self::with_manager(Arc::clone(BufferManager::global()))
    }

    /// Unallocated element timeline on `manager`.
    #[must_use]
    pub fn with_manager(manager: Arc<BufferManager>) -> Self {
        Self {
            timeline: Timeline::with_manager(manager),
            _marker: PhantomData,
        }
    }

    /// Size the pool for `max_elements` slots per buffer.
    ///
    /// # Errors
    ///
    /// Rejects zero slots, zero-sized `T`, and more than [`MAX_ELEMENTS`] slots.
    pub fn init_pool_size(&self, max_elements: usize) -> Result<(), TimelineError> {
        if max_elements == 0 {
            return Err(TimelineError::EmptyLayout("max_elements"));
        }
        if size_of::<T>() == 0 {
            return Err(TimelineError::EmptyLayout("element size"));
        }
        if max_elements > MAX_ELEMENTS {
            return Err(TimelineError::TooManyElements {
                requested: max_elements,
                max: MAX_ELEMENTS,
            });
        }

        let chunk_size = size_of::<T>()
            .checked_mul(max_elements)
            .and_then(|bytes| bytes.checked_add(MASK_BYTES))
            .ok_or(TimelineError::SizeOverflow {
                context: "element buffer size",
            })?;
        self.timeline.init_layout(BufferLayout::Elements {
            element_size: size_of::<T>(),
            max_elements,
            chunk_size,
        })
    }

    /// Slots per buffer (0 if not configured).
    #[must_use]
    pub fn max_element_num(&self) -> usize {
        match self.timeline.layout() {
            Some(BufferLayout::Elements { max_elements, .. }) => max_elements,
            _ => 0,
        }
    }

    /// Bytes per element.
    #[must_use]
    pub fn element_size(&self) -> usize {
        size_of::<T>()
    }

    /// Allocate an empty element set for `timestamp`.
    ///
    /// # Panics
    ///
    /// Panics if the pool is not configured.
    pub fn create_buffer(&self, timestamp: Timestamp) -> Result<ElementBuffer<T>, TimelineError> {
        let mut buffer = self.timeline.create_buffer(timestamp)?;
        buffer.fill(0)?;
        Ok(ElementBuffer::new(buffer))
    }

    /// Publish a filled element set and return the shared handle.
    pub fn push_buffer(&self, buffer: ElementBuffer<T>) -> Arc<TimelineBuffer> {
        let buffer = Arc::new(buffer.into_inner());
        self.timeline.push_object(Arc::clone(&buffer));
        buffer
    }

    /// Typed read access to a buffer of this timeline.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` does not belong to an element timeline of `T`.
    pub fn read<'a>(
        &self,
        buffer: &'a TimelineBuffer,
    ) -> Result<ElementReader<'a, T>, TimelineError> {
        ElementReader::new(buffer)
    }

    /// Underlying timeline.
    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}

impl<T: Pod> Default for ElementTimeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for ElementTimeline<T> {
    type Target = Timeline;

    fn deref(&self) -> &Timeline {
        &self.timeline
    }
}

impl<T> PartialEq for ElementTimeline<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timeline == other.timeline
    }
}

impl<T> std::fmt::Debug for ElementTimeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementTimeline")
            .field("element_size", &size_of::<T>())
            .field("timeline", &self.timeline)
            .finish()
    }
}

/// Element set being filled by a producer, before it is pushed.
pub struct ElementBuffer<T> {
    buffer: TimelineBuffer,
    max_elements: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod> ElementBuffer<T> {
    fn new(buffer: TimelineBuffer) -> Self {
        let max_elements = element_capacity::<T>(buffer.layout());
        Self {
            buffer,
            max_elements,
            _marker: PhantomData,
        }
    }

    /// Timestamp the set will be published under.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.buffer.timestamp()
    }

    /// Store `value` in slot `index` and mark it present.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set_element(&mut self, value: T, index: usize) -> Result<(), TimelineError> {
        self.check_index(index);
        let mut payload = self.buffer.lock_mut()?;
        let mask = read_mask(&payload) | (1u64 << index);
        payload[..MASK_BYTES].copy_from_slice(bytemuck::bytes_of(&mask));
        payload[element_range::<T>(index)].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Mark slot `index` present and edit it in place.
    ///
    /// The slot keeps its current value (zero if it was absent). Edits are
    /// written back when the returned guard drops, and the buffer stays
    /// locked until then.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn add_element(&mut self, index: usize) -> Result<ElementSlot<'_, T>, TimelineError> {
        self.check_index(index);
        let mut payload = self.buffer.lock_mut()?;
        let mask = read_mask(&payload) | (1u64 << index);
        payload[..MASK_BYTES].copy_from_slice(bytemuck::bytes_of(&mask));
        let value = bytemuck::pod_read_unaligned(&payload[element_range::<T>(index)]);
        Ok(ElementSlot {
            payload,
            index,
            current: value,
        })
    }

    /// Mark slot `index` absent and zero it.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn clear_element(&mut self, index: usize) -> Result<(), TimelineError> {
        self.check_index(index);
        let mut payload = self.buffer.lock_mut()?;
        let mask = read_mask(&payload) & !(1u64 << index);
        payload[..MASK_BYTES].copy_from_slice(bytemuck::bytes_of(&mask));
        payload[element_range::<T>(index)].fill(0);
        Ok(())
    }

    /// Typed read access before publishing.
    pub fn reader(&self) -> Result<ElementReader<'_, T>, TimelineError> {
        ElementReader::new(&self.buffer)
    }

    /// Untyped buffer, ready for `Timeline::push_object`.
    #[must_use]
    pub fn into_inner(self) -> TimelineBuffer {
        self.buffer
    }

    fn check_index(&self, index: usize) {
        assert!(
            index < self.max_elements,
            "element index {} out of range (max {})",
            index,
            self.max_elements
        );
    }
}

/// Writable slot handed out by [`ElementBuffer::add_element`].
pub struct ElementSlot<'a, T: Pod> {
    payload: BufferLockMut<'a>,
    index: usize,
    current: T,
}

impl<T: Pod> Deref for ElementSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.current
    }
}

impl<T: Pod> DerefMut for ElementSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.current
    }
}

impl<T: Pod> Drop for ElementSlot<'_, T> {
    fn drop(&mut self) {
        let range = element_range::<T>(self.index);
        self.payload[range].copy_from_slice(bytemuck::bytes_of(&self.current));
    }
}

/// Typed view of an element set, holding a shared buffer lock.
pub struct ElementReader<'a, T> {
    lock: BufferLock<'a>,
    max_elements: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Pod> ElementReader<'a, T> {
    /// Lock `buffer` for typed reading.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` does not hold elements of `T`.
    pub fn new(buffer: &'a TimelineBuffer) -> Result<Self, TimelineError> {
        let max_elements = element_capacity::<T>(buffer.layout());
        Ok(Self {
            lock: buffer.lock()?,
            max_elements,
            _marker: PhantomData,
        })
    }

    /// Presence bitmask; bit `i` is set when slot `i` holds a value.
    #[must_use]
    pub fn mask(&self) -> u64 {
        read_mask(&self.lock)
    }

    /// Whether slot `index` holds a value.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn is_present(&self, index: usize) -> bool {
        self.check_index(index);
        self.mask() & (1u64 << index) != 0
    }

    /// Value in slot `index`, or `T::zeroed()` when absent.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn element(&self, index: usize) -> T {
        if self.is_present(index) {
            bytemuck::pod_read_unaligned(&self.lock[element_range::<T>(index)])
        } else {
            T::zeroed()
        }
    }

    /// Number of present slots.
    #[must_use]
    pub fn present_element_num(&self) -> usize {
        self.mask().count_ones() as usize
    }

    /// Slots per buffer.
    #[must_use]
    pub fn max_element_num(&self) -> usize {
        self.max_elements
    }

    /// Bytes per element.
    #[must_use]
    pub fn element_size(&self) -> usize {
        size_of::<T>()
    }

    /// Present slots in index order.
    pub fn present_elements(&self) -> impl Iterator<Item = (usize, T)> + '_ {
        let mask = self.mask();
        (0..self.max_elements)
            .filter(move |index| mask & (1u64 << index) != 0)
            .map(move |index| {
                let value = bytemuck::pod_read_unaligned(&self.lock[element_range::<T>(index)]);
                (index, value)
            })
    }

    fn check_index(&self, index: usize) {
        assert!(
            index < self.max_elements,
            "element index {} out of range (max {})",
            index,
            self.max_elements
        );
    }
}

fn read_mask(payload: &[u8]) -> u64 {
    bytemuck::pod_read_unaligned(&payload[..MASK_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    type Float3 = [f32; 3];
    type Float4 = [f32; 4];

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Sample {
        id: u32,
        value: f32,
    }

    fn ts(millis: f64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_set_and_get_elements() {
        let timeline = ElementTimeline::<Float3>::with_manager(BufferManager::new());
        timeline.init_pool_size(3).unwrap();
        assert_eq!(timeline.max_element_num(), 3);
        assert_eq!(timeline.element_size(), 12);

        let mut buffer = timeline.create_buffer(ts(1.0)).unwrap();
        buffer.set_element([1.0, 2.0, 3.0], 0).unwrap();
        buffer.set_element([4.0, 5.0, 6.0], 2).unwrap();
        let pushed = timeline.push_buffer(buffer);

        let found = timeline.get_object(ts(1.0)).unwrap();
        assert!(Arc::ptr_eq(&pushed, &found));
        let reader = timeline.read(&found).unwrap();
        assert_eq!(reader.mask(), 0b101);
        assert_eq!(reader.present_element_num(), 2);
        assert_eq!(reader.max_element_num(), 3);
        assert_eq!(reader.element(0), [1.0, 2.0, 3.0]);
        assert!(!reader.is_present(1));
        assert_eq!(reader.element(1), [0.0, 0.0, 0.0]);
        assert_eq!(reader.element(2), [4.0, 5.0, 6.0]);

        let present: Vec<_> = reader.present_elements().map(|(index, _)| index).collect();
        assert_eq!(present, vec![0, 2]);
    }

    #[test]
    fn test_recycled_chunks_start_empty() {
        let timeline = ElementTimeline::<Sample>::with_manager(BufferManager::new());
        timeline.init_pool_size(4).unwrap();

        let mut first = timeline.create_buffer(ts(1.0)).unwrap();
        first.set_element(Sample { id: 1, value: 0.5 }, 3).unwrap();
        drop(first);

        let second = timeline.create_buffer(ts(2.0)).unwrap();
        assert_eq!(timeline.pool_stats().unwrap().reused, 1);
        let reader = second.reader().unwrap();
        assert_eq!(reader.mask(), 0);
        assert_eq!(reader.element(3), Sample::zeroed());
    }

    #[test]
    fn test_add_element_edits_in_place() {
        let timeline = ElementTimeline::<Sample>::with_manager(BufferManager::new());
        timeline.init_pool_size(4).unwrap();

        let mut buffer = timeline.create_buffer(ts(1.0)).unwrap();
        {
            let mut slot = buffer.add_element(2).unwrap();
            assert_eq!(*slot, Sample::zeroed());
            slot.id = 7;
            slot.value = 2.5;
        }
        buffer.add_element(2).unwrap().value += 1.0;
        let _ = buffer.add_element(0).unwrap();

        let reader = buffer.reader().unwrap();
        assert_eq!(reader.mask(), 0b101);
        assert_eq!(reader.element(2), Sample { id: 7, value: 3.5 });
        assert_eq!(reader.element(0), Sample::zeroed());
    }

    #[test]
    fn test_clear_element() {
        let timeline = ElementTimeline::<u16>::with_manager(BufferManager::new());
        timeline.init_pool_size(8).unwrap();

        let mut buffer = timeline.create_buffer(ts(0.0)).unwrap();
        buffer.set_element(7, 5).unwrap();
        buffer.clear_element(5).unwrap();
        let reader = buffer.reader().unwrap();
        assert_eq!(reader.present_element_num(), 0);
        assert_eq!(reader.element(5), 0);
    }

    #[test]
    fn test_mask_survives_dump() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BufferManager::with_dump_dir(dir.path());
        let timeline = ElementTimeline::<Sample>::with_manager(Arc::clone(&manager));
        timeline.init_pool_size(2).unwrap();

        let mut buffer = timeline.create_buffer(ts(1.0)).unwrap();
        buffer.set_element(Sample { id: 9, value: 1.5 }, 1).unwrap();
        let pushed = timeline.push_buffer(buffer);

        assert!(manager.dump_buffer(pushed.id()).unwrap());
        let reader = timeline.read(&pushed).unwrap();
        assert_eq!(reader.mask(), 0b10);
        assert_eq!(reader.element(1), Sample { id: 9, value: 1.5 });
    }

    #[test]
    fn test_object_validity_by_element_type() {
        let manager = BufferManager::new();
        let float3 = ElementTimeline::<Float3>::with_manager(Arc::clone(&manager));
        let float4 = ElementTimeline::<Float4>::with_manager(manager);
        float3.init_pool_size(3).unwrap();
        float4.init_pool_size(3).unwrap();

        let buffer = float4.create_buffer(ts(0.0)).unwrap().into_inner();
        assert!(float4.is_object_valid(&buffer));
        assert!(!float3.is_object_valid(&buffer));
    }

    #[test]
    fn test_init_limits() {
        let timeline = ElementTimeline::<u8>::with_manager(BufferManager::new());
        assert!(matches!(
            timeline.init_pool_size(0),
            Err(TimelineError::EmptyLayout("max_elements"))
        ));
        assert!(matches!(
            timeline.init_pool_size(MAX_ELEMENTS + 1),
            Err(TimelineError::TooManyElements { .. })
        ));
        timeline.init_pool_size(MAX_ELEMENTS).unwrap();
        assert_eq!(timeline.layout().unwrap().chunk_size(), 8 + MAX_ELEMENTS);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_index_out_of_range_panics() {
        let timeline = ElementTimeline::<u8>::with_manager(BufferManager::new());
        timeline.init_pool_size(2).unwrap();
        let mut buffer = timeline.create_buffer(ts(0.0)).unwrap();
        let _ = buffer.set_element(1, 2);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_reader_for_wrong_type_panics() {
        let timeline = ElementTimeline::<u32>::with_manager(BufferManager::new());
        timeline.init_pool_size(2).unwrap();
        let buffer = timeline.create_buffer(ts(0.0)).unwrap().into_inner();
        let _ = ElementReader::<u16>::new(&buffer);
    }
}
