//! Managed byte buffers with scoped locks.
//!
//! A [`ManagedBuffer`] owns a byte region obtained through an
//! [`AllocationPolicy`] and is registered with a [`BufferManager`] for its
//! whole life. While no lock is held the manager may dump the bytes to disk;
//! taking a lock transparently restores them.
//!
//! # Locking
//!
//! Access to the bytes always goes through a guard:
//!
//! - [`BufferLock`] (shared, from `&self`): any number may coexist, on any
//!   thread, including nested on the same thread.
//! - [`BufferLockMut`] (exclusive, from `&mut self`): for filling the buffer.
//!
//! Each guard counts toward [`lock_count`](ManagedBuffer::lock_count) until it
//! is dropped. Allocation, reallocation, destruction and swapping require a
//! lock count of zero; violating that is a programming error and panics.
//!
//! Internal lock order is buffer state first, manager registry second.

use crate::error::MemoryError;
use crate::manager::{BufferManager, SweepTrigger};
use crate::policy::{AllocationPolicy, PolicyKind};
use crate::store::DumpFile;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Process-unique identity of a managed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mutable part of a buffer, guarded by the cell's `RwLock`.
pub(crate) struct BufferState {
    /// Resident bytes; `None` when empty or dumped
    pub(crate) data: Option<Vec<u8>>,
    /// Logical size, kept while dumped
    pub(crate) size: usize,
    pub(crate) policy: AllocationPolicy,
    /// Present exactly while the buffer is dumped
    pub(crate) dump: Option<DumpFile>,
}

impl BufferState {
    pub(crate) fn is_loaded(&self) -> bool {
        self.dump.is_none()
    }

    /// Free resident bytes and drop any dump file.
    fn release(&mut self) {
        if let Some(data) = self.data.take() {
            self.policy.destroy(data);
        }
        self.dump = None;
        self.size = 0;
    }
}

/// Shared core of a buffer. The manager keeps a weak reference to it.
pub(crate) struct BufferCell {
    pub(crate) id: BufferId,
    pub(crate) lock_count: AtomicUsize,
    pub(crate) state: RwLock<BufferState>,
}

impl BufferCell {
    pub(crate) fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }
}

/// Byte buffer whose storage can be dumped to disk while unlocked.
pub struct ManagedBuffer {
    cell: Arc<BufferCell>,
    manager: Arc<BufferManager>,
}

impl ManagedBuffer {
    /// Create an empty buffer registered with `manager`.
    #[must_use]
    pub fn new(manager: &Arc<BufferManager>) -> Self {
        let cell = Arc::new(BufferCell {
            id: BufferId::next(),
            lock_count: AtomicUsize::new(0),
            state: RwLock::new(BufferState {
                data: None,
                size: 0,
                policy: AllocationPolicy::NoOp,
                dump: None,
            }),
        });
        manager.register(&cell);
        Self {
            cell,
            manager: Arc::clone(manager),
        }
    }

    /// Create an empty buffer registered with the process-wide manager.
    #[must_use]
    pub fn new_global() -> Self {
        Self::new(BufferManager::global())
    }

    /// Identity used by the manager.
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.cell.id
    }

    /// Manager this buffer is registered with.
    #[must_use]
    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Logical size in bytes, valid whether loaded or dumped.
    #[must_use]
    pub fn size(&self) -> usize {
        self.cell.state.read_recursive().size
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of live guards.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.cell.lock_count()
    }

    /// Whether the contents currently live on disk.
    #[must_use]
    pub fn is_dumped(&self) -> bool {
        !self.cell.state.read_recursive().is_loaded()
    }

    /// Allocation policy currently in charge of the storage.
    #[must_use]
    pub fn policy_kind(&self) -> PolicyKind {
        self.cell.state.read_recursive().policy.kind()
    }

    /// Replace the contents with `size` fresh bytes from `policy`.
    ///
    /// Any previous storage (resident or dumped) is released first.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is locked.
    pub fn allocate(&mut self, size: usize, policy: AllocationPolicy) -> Result<(), MemoryError> {
        self.assert_unlocked("allocate");
        {
            let mut state = self.cell.state.write();
            state.release();
            state.policy = AllocationPolicy::NoOp;

            match policy.allocate(size) {
                Ok(data) => {
                    state.data = Some(data);
                    state.size = size;
                    state.policy = policy;
                    self.manager.sync(self.cell.id, &state);
                }
                Err(e) => {
                    self.manager.sync(self.cell.id, &state);
                    return Err(e);
                }
            }
        }
        trace!(buffer_id = %self.cell.id, size, "buffer allocated");
        self.manager.sweep(SweepTrigger::Allocate);
        Ok(())
    }

    /// Resize to `size` bytes, preserving the common prefix.
    ///
    /// A dumped buffer is restored straight into the new size.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is locked or was never allocated.
    pub fn reallocate(&mut self, size: usize) -> Result<(), MemoryError> {
        self.assert_unlocked("reallocate");
        {
            let mut state = self.cell.state.write();
            assert!(
                state.data.is_some() || state.dump.is_some(),
                "cannot reallocate buffer {}: nothing allocated",
                self.cell.id
            );

            if state.dump.is_some() {
                self.manager.restore_state(self.cell.id, &mut state, Some(size))?;
            } else {
                let BufferState { data, policy, .. } = &mut *state;
                if let Some(data) = data.as_mut() {
                    policy.reallocate(data, size)?;
                }
                state.size = size;
                self.manager.sync(self.cell.id, &state);
            }
        }
        trace!(buffer_id = %self.cell.id, size, "buffer reallocated");
        self.manager.sweep(SweepTrigger::Allocate);
        Ok(())
    }

    /// Adopt caller-provided storage. The buffer size becomes `data.len()`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is locked.
    pub fn set_buffer(&mut self, data: Vec<u8>, policy: AllocationPolicy) {
        self.assert_unlocked("set_buffer");
        let size = data.len();
        {
            let mut state = self.cell.state.write();
            state.release();
            state.data = Some(data);
            state.size = size;
            state.policy = policy;
            self.manager.sync(self.cell.id, &state);
        }
        trace!(buffer_id = %self.cell.id, size, "buffer adopted");
        self.manager.sweep(SweepTrigger::Allocate);
    }

    /// Release all storage. The buffer stays registered with size 0.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is locked.
    pub fn destroy(&mut self) {
        self.assert_unlocked("destroy");
        let mut state = self.cell.state.write();
        state.release();
        state.policy = AllocationPolicy::NoOp;
        self.manager.sync(self.cell.id, &state);
    }

    /// Exchange contents (size, storage, dump file and policy) with `other`.
    ///
    /// # Panics
    ///
    /// Panics if either buffer is locked.
    pub fn swap(&mut self, other: &mut ManagedBuffer) {
        self.assert_unlocked("swap");
        other.assert_unlocked("swap");

        // Consistent order avoids lock inversion against a concurrent swap.
        let (first, second) = if self.cell.id < other.cell.id {
            (&*self, &*other)
        } else {
            (&*other, &*self)
        };
        let mut a = first.cell.state.write();
        let mut b = second.cell.state.write();
        std::mem::swap(&mut *a, &mut *b);
        first.manager.sync(first.cell.id, &a);
        second.manager.sync(second.cell.id, &b);
    }

    /// Take a shared lock, restoring the contents first if they were dumped.
    ///
    /// # Errors
    ///
    /// Fails if a dumped buffer cannot be read back or re-allocated.
    pub fn lock(&self) -> Result<BufferLock<'_>, MemoryError> {
        self.cell.lock_count.fetch_add(1, Ordering::AcqRel);
        match self.resident_read() {
            Ok(guard) => {
                self.manager.touch(self.cell.id);
                trace!(buffer_id = %self.cell.id, locks = self.lock_count(), "buffer locked");
                Ok(BufferLock {
                    guard: Some(guard),
                    buffer: self,
                })
            }
            Err(e) => {
                self.cell.lock_count.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    /// Take an exclusive lock, restoring the contents first if they were dumped.
    ///
    /// # Errors
    ///
    /// Fails if a dumped buffer cannot be read back or re-allocated.
    pub fn lock_mut(&mut self) -> Result<BufferLockMut<'_>, MemoryError> {
        let this: &ManagedBuffer = self;
        this.cell.lock_count.fetch_add(1, Ordering::AcqRel);
        let mut guard = this.cell.state.write();
        if guard.dump.is_some() {
            if let Err(e) = this.manager.restore_state(this.cell.id, &mut guard, None) {
                drop(guard);
                this.cell.lock_count.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
            this.manager.sweep(SweepTrigger::Restore);
        }
        this.manager.touch(this.cell.id);
        trace!(buffer_id = %this.cell.id, "buffer locked for writing");
        Ok(BufferLockMut {
            guard: Some(guard),
            buffer: this,
        })
    }

    fn resident_read(&self) -> Result<RwLockReadGuard<'_, BufferState>, MemoryError> {
        loop {
            let state = self.cell.state.read_recursive();
            if state.is_loaded() {
                return Ok(state);
            }
            drop(state);

            let mut state = self.cell.state.write();
            if state.dump.is_some() {
                self.manager.restore_state(self.cell.id, &mut state, None)?;
                drop(state);
                self.manager.sweep(SweepTrigger::Restore);
            }
        }
    }

    fn unlock(&self) {
        let previous = self.cell.lock_count.fetch_sub(1, Ordering::AcqRel);
        trace!(buffer_id = %self.cell.id, locks = previous - 1, "buffer unlocked");
        if previous == 1 {
            self.manager.sweep(SweepTrigger::Unlock);
        }
    }

    fn assert_unlocked(&self, operation: &str) {
        let locks = self.lock_count();
        assert!(
            locks == 0,
            "cannot {} buffer {}: {} lock(s) outstanding",
            operation,
            self.cell.id,
            locks
        );
    }
}

impl Drop for ManagedBuffer {
    fn drop(&mut self) {
        let locks = self.lock_count();
        if locks > 0 {
            // A leaked guard may still hold the state lock; leave the storage alone.
            error!(buffer_id = %self.cell.id, locks, "managed buffer dropped while locked");
            self.manager.unregister(self.cell.id);
            if !std::thread::panicking() {
                panic!(
                    "managed buffer {} dropped with {} lock(s) outstanding",
                    self.cell.id, locks
                );
            }
            return;
        }
        self.destroy();
        self.manager.unregister(self.cell.id);
    }
}

impl fmt::Debug for ManagedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedBuffer")
            .field("id", &self.cell.id)
            .field("lock_count", &self.lock_count())
            .finish_non_exhaustive()
    }
}

/// Shared access to a buffer's bytes. Unlocks on drop.
pub struct BufferLock<'a> {
    guard: Option<RwLockReadGuard<'a, BufferState>>,
    buffer: &'a ManagedBuffer,
}

impl<'a> BufferLock<'a> {
    /// The buffer's bytes; empty for an unallocated buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.guard
            .as_ref()
            .and_then(|state| state.data.as_deref().map(|data| &data[..state.size]))
            .unwrap_or(&[])
    }

    /// Buffer being accessed.
    #[must_use]
    pub fn buffer(&self) -> &'a ManagedBuffer {
        self.buffer
    }
}

impl Deref for BufferLock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for BufferLock<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for BufferLock<'_> {
    fn drop(&mut self) {
        // Release the state lock before the sweep can try to dump this buffer.
        self.guard.take();
        self.buffer.unlock();
    }
}

/// Exclusive access to a buffer's bytes. Unlocks on drop.
pub struct BufferLockMut<'a> {
    guard: Option<RwLockWriteGuard<'a, BufferState>>,
    buffer: &'a ManagedBuffer,
}

impl BufferLockMut<'_> {
    /// The buffer's bytes; empty for an unallocated buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.guard
            .as_ref()
            .and_then(|state| state.data.as_deref().map(|data| &data[..state.size]))
            .unwrap_or(&[])
    }

    /// Mutable view of the buffer's bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.guard.as_mut() {
            Some(state) => {
                let size = state.size;
                match state.data.as_mut() {
                    Some(data) => &mut data[..size],
                    None => &mut [],
                }
            }
            None => &mut [],
        }
    }
}

impl Deref for BufferLockMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for BufferLockMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for BufferLockMut<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.buffer.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tl_pool::ChunkPool;

    fn test_manager() -> (tempfile::TempDir, Arc<BufferManager>) {
        let dir = tempfile::tempdir().unwrap();
        let manager = BufferManager::with_dump_dir(dir.path());
        (dir, manager)
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let (_dir, manager) = test_manager();
        let buffer = ManagedBuffer::new(&manager);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.policy_kind(), PolicyKind::NoOp);
        assert!(buffer.lock().unwrap().is_empty());
    }

    #[test]
    fn test_nested_locks_are_counted() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(8, AllocationPolicy::Heap).unwrap();

        let first = buffer.lock().unwrap();
        let second = buffer.lock().unwrap();
        {
            let third = buffer.lock().unwrap();
            assert_eq!(buffer.lock_count(), 3);
            assert_eq!(third.len(), 8);
        }
        assert_eq!(buffer.lock_count(), 2);
        drop(first);
        drop(second);
        assert_eq!(buffer.lock_count(), 0);
    }

    #[test]
    fn test_locks_across_threads() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(16, AllocationPolicy::Heap).unwrap();
        buffer.lock_mut().unwrap().fill(3);

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let guard = buffer.lock().unwrap();
                        assert!(guard.iter().all(|&b| b == 3));
                    }
                });
            }
        });
        assert_eq!(buffer.lock_count(), 0);
    }

    #[test]
    fn test_set_buffer_adopts_storage() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.set_buffer(vec![4, 5, 6], AllocationPolicy::Adopted);

        assert_eq!(buffer.size(), 3);
        assert_eq!(buffer.policy_kind(), PolicyKind::Adopted);
        assert_eq!(&*buffer.lock().unwrap(), &[4, 5, 6]);
        assert_eq!(manager.buffer_stats().total_managed, 3);
    }

    #[test]
    fn test_reallocate_keeps_prefix() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(2, AllocationPolicy::Heap).unwrap();
        buffer.lock_mut().unwrap().copy_from_slice(&[1, 2]);

        buffer.reallocate(4).unwrap();
        assert_eq!(&*buffer.lock().unwrap(), &[1, 2, 0, 0]);
        assert_eq!(manager.buffer_stats().total_managed, 4);
    }

    #[test]
    fn test_reallocate_dumped_buffer() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(4, AllocationPolicy::Heap).unwrap();
        buffer.lock_mut().unwrap().copy_from_slice(&[1, 2, 3, 4]);
        assert!(manager.dump_buffer(buffer.id()).unwrap());

        buffer.reallocate(2).unwrap();
        assert!(!buffer.is_dumped());
        assert_eq!(&*buffer.lock().unwrap(), &[1, 2]);
    }

    #[test]
    #[should_panic(expected = "nothing allocated")]
    fn test_reallocate_unallocated_panics() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        let _ = buffer.reallocate(4);
    }

    #[test]
    fn test_pool_backed_buffer_returns_chunk() {
        let (_dir, manager) = test_manager();
        let pool = ChunkPool::with_chunk_size(32).unwrap();
        {
            let mut buffer = ManagedBuffer::new(&manager);
            buffer.allocate(32, AllocationPolicy::Pool(pool.clone())).unwrap();
            assert_eq!(pool.stats().outstanding, 1);

            // Dumping hands the chunk back, restoring takes one again
            assert!(manager.dump_buffer(buffer.id()).unwrap());
            assert_eq!(pool.stats().outstanding, 0);
            drop(buffer.lock().unwrap());
            assert_eq!(pool.stats().outstanding, 1);
        }
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn test_grown_restore_zeroes_recycled_tail() {
        let (_dir, manager) = test_manager();
        let pool = ChunkPool::with_chunk_size(8).unwrap();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(2, AllocationPolicy::Pool(pool.clone())).unwrap();
        buffer.lock_mut().unwrap().copy_from_slice(&[1, 2]);
        assert!(manager.dump_buffer(buffer.id()).unwrap());

        // Leave a dirty chunk at the head of the free list
        let mut dirty = pool.allocate().unwrap();
        dirty.fill(0xff);
        pool.release(dirty);

        buffer.reallocate(6).unwrap();
        assert_eq!(&*buffer.lock().unwrap(), &[1, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn test_destroy_releases_dump_file() {
        let (dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(8, AllocationPolicy::Heap).unwrap();
        assert!(manager.dump_buffer(buffer.id()).unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        buffer.destroy();
        assert_eq!(buffer.size(), 0);
        assert!(!buffer.is_dumped());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    #[should_panic(expected = "cannot destroy buffer")]
    fn test_destroy_while_locked_panics() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(1, AllocationPolicy::Heap).unwrap();
        let guard = buffer.lock().unwrap();
        // Leak the guard so the buffer stays locked
        std::mem::forget(guard);
        buffer.destroy();
    }

    #[test]
    #[should_panic(expected = "cannot swap buffer")]
    fn test_swap_while_locked_panics() {
        let (_dir, manager) = test_manager();
        let mut a = ManagedBuffer::new(&manager);
        let mut b = ManagedBuffer::new(&manager);
        b.allocate(1, AllocationPolicy::Heap).unwrap();
        std::mem::forget(b.lock().unwrap());
        a.swap(&mut b);
    }

    #[test]
    fn test_swap_exchanges_contents() {
        let (_dir, manager) = test_manager();
        let mut a = ManagedBuffer::new(&manager);
        let mut b = ManagedBuffer::new(&manager);
        a.set_buffer(vec![1], AllocationPolicy::Adopted);
        b.allocate(2, AllocationPolicy::Heap).unwrap();

        a.swap(&mut b);
        assert_eq!(a.size(), 2);
        assert_eq!(a.policy_kind(), PolicyKind::Heap);
        assert_eq!(&*b.lock().unwrap(), &[1]);
        assert_eq!(b.policy_kind(), PolicyKind::Adopted);
    }

    #[test]
    fn test_concurrent_lock_and_dump() {
        let (_dir, manager) = test_manager();
        let mut buffer = ManagedBuffer::new(&manager);
        buffer.allocate(256, AllocationPolicy::Heap).unwrap();
        buffer.lock_mut().unwrap().fill(0xAB);

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    let _ = manager.dump_buffer(buffer.id()).unwrap();
                }
            });
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let guard = buffer.lock().unwrap();
                        assert_eq!(guard.len(), 256);
                        assert!(guard.iter().all(|&b| b == 0xAB));
                    }
                });
            }
        });
        assert_eq!(buffer.lock_count(), 0);
    }

    #[test]
    fn test_buffer_ids_are_unique() {
        let (_dir, manager) = test_manager();
        let a = ManagedBuffer::new(&manager);
        let b = ManagedBuffer::new(&manager);
        assert_ne!(a.id(), b.id());
        assert!(a.id().get() > 0);
        assert_eq!(a.id().to_string(), format!("#{}", a.id().get()));
    }
}
