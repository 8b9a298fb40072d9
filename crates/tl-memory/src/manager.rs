//! Registry of managed buffers and the dump/restore machinery.
//!
//! The [`BufferManager`] tracks every live [`ManagedBuffer`](crate::ManagedBuffer)
//! registered with it: size, residency, allocation policy and recency of use.
//! It answers memory statistics, dumps idle buffers to disk on request or as
//! directed by its [`DumpPolicy`], and restores them when they are locked again.
//!
//! The registry only holds weak references, so a buffer's lifetime is decided
//! by its owner alone. The registry mutex is never held while waiting for a
//! buffer's state lock; dumps take that lock with `try_write` and skip buffers
//! that are busy.

use crate::buffer::{BufferCell, BufferId, BufferState};
use crate::dump_policy::DumpPolicy;
use crate::error::MemoryError;
use crate::policy::PolicyKind;
use crate::store::DumpStore;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

static GLOBAL: Lazy<Arc<BufferManager>> = Lazy::new(BufferManager::new);

/// Aggregate memory figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BufferStats {
    /// Sum of the sizes of all registered buffers
    pub total_managed: usize,
    /// Sum of the sizes of all dumped buffers
    pub total_dumped: usize,
}

impl BufferStats {
    /// Bytes currently held in memory.
    #[must_use]
    pub fn total_resident(&self) -> usize {
        self.total_managed - self.total_dumped
    }
}

/// Point-in-time description of one registered buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferInfo {
    /// Buffer identity
    pub id: BufferId,
    /// Logical size in bytes
    pub size: usize,
    /// `false` while the contents live on disk
    pub loaded: bool,
    /// Allocation policy in charge of the storage
    pub policy: PolicyKind,
    /// Live guards at snapshot time
    pub lock_count: usize,
    /// Logical clock of the last lock or state change
    pub last_access: u64,
    /// Dump file location while dumped
    pub dump_path: Option<PathBuf>,
}

/// Construction options for a [`BufferManager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Directory for dump files (system temp dir if `None`)
    pub dump_dir: Option<PathBuf>,
    /// Initial dump policy
    pub policy: DumpPolicy,
}

/// Why a policy sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepTrigger {
    Allocate,
    Restore,
    Unlock,
    PolicyChange,
}

struct BufferRecord {
    size: usize,
    loaded: bool,
    policy: PolicyKind,
    last_access: u64,
    dump_path: Option<PathBuf>,
    cell: Weak<BufferCell>,
}

struct Registry {
    records: HashMap<BufferId, BufferRecord>,
    policy: DumpPolicy,
    /// Logical clock for least-recently-used ordering
    clock: u64,
}

impl Registry {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Tracks managed buffers and moves idle ones between memory and disk.
pub struct BufferManager {
    registry: Mutex<Registry>,
    store: DumpStore,
}

impl BufferManager {
    /// Manager dumping to the system temp dir with the `never` policy.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_config(ManagerConfig::default())
    }

    /// Manager dumping into `dir`.
    #[must_use]
    pub fn with_dump_dir(dir: impl Into<PathBuf>) -> Arc<Self> {
        Self::with_config(ManagerConfig {
            dump_dir: Some(dir.into()),
            ..ManagerConfig::default()
        })
    }

    /// Manager built from explicit options.
    #[must_use]
    pub fn with_config(config: ManagerConfig) -> Arc<Self> {
        let store = match config.dump_dir {
            Some(dir) => DumpStore::new(dir),
            None => DumpStore::in_temp_dir(),
        };
        info!(dump_dir = %store.dir().display(), policy = %config.policy, "BufferManager created");
        Arc::new(Self {
            registry: Mutex::new(Registry {
                records: HashMap::new(),
                policy: config.policy,
                clock: 0,
            }),
            store,
        })
    }

    /// Process-wide manager used by buffers and timelines created without one.
    #[must_use]
    pub fn global() -> &'static Arc<BufferManager> {
        &GLOBAL
    }

    /// Directory receiving dump files.
    #[must_use]
    pub fn dump_dir(&self) -> &Path {
        self.store.dir()
    }

    /// Number of registered buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.lock().records.len()
    }

    /// Whether no buffer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory totals over all registered buffers.
    #[must_use]
    pub fn buffer_stats(&self) -> BufferStats {
        let registry = self.registry.lock();
        registry
            .records
            .values()
            .fold(BufferStats::default(), |mut stats, record| {
                stats.total_managed += record.size;
                if !record.loaded {
                    stats.total_dumped += record.size;
                }
                stats
            })
    }

    /// Snapshot of one buffer's bookkeeping.
    #[must_use]
    pub fn buffer_info(&self, id: BufferId) -> Option<BufferInfo> {
        let registry = self.registry.lock();
        registry.records.get(&id).map(|record| Self::info(id, record))
    }

    /// Snapshot of every registered buffer, ordered by id.
    #[must_use]
    pub fn buffer_infos(&self) -> Vec<BufferInfo> {
        let registry = self.registry.lock();
        let mut infos: Vec<_> = registry
            .records
            .iter()
            .map(|(id, record)| Self::info(*id, record))
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Currently installed dump policy.
    #[must_use]
    pub fn dump_policy(&self) -> DumpPolicy {
        self.registry.lock().policy.clone()
    }

    /// Install a new dump policy and apply it immediately.
    pub fn set_dump_policy(&self, policy: DumpPolicy) {
        info!(policy = %policy, "dump policy changed");
        self.registry.lock().policy = policy;
        self.sweep(SweepTrigger::PolicyChange);
    }

    /// Move a buffer's contents to disk and free its memory.
    ///
    /// Returns `Ok(false)` without doing anything if the buffer is unknown,
    /// already dumped, empty, locked or busy.
    ///
    /// # Errors
    ///
    /// Fails if the dump file cannot be written; the buffer stays loaded.
    pub fn dump_buffer(&self, id: BufferId) -> Result<bool, MemoryError> {
        let Some(cell) = self.cell(id) else {
            return Ok(false);
        };
        Ok(self.dump_cell(&cell)? > 0)
    }

    /// Bring a dumped buffer back into memory.
    ///
    /// Returns `Ok(false)` if the buffer is unknown or already loaded.
    ///
    /// # Errors
    ///
    /// Fails if memory cannot be allocated or the dump file cannot be read;
    /// the buffer then stays dumped.
    pub fn restore_buffer(&self, id: BufferId) -> Result<bool, MemoryError> {
        let Some(cell) = self.cell(id) else {
            return Ok(false);
        };
        if cell.state.read_recursive().is_loaded() {
            return Ok(false);
        }
        let restored = {
            let mut state = cell.state.write();
            self.restore_state(id, &mut state, None)?
        };
        if restored {
            self.sweep(SweepTrigger::Restore);
        }
        Ok(restored)
    }

    pub(crate) fn register(&self, cell: &Arc<BufferCell>) {
        let mut registry = self.registry.lock();
        let tick = registry.tick();
        registry.records.insert(
            cell.id,
            BufferRecord {
                size: 0,
                loaded: true,
                policy: PolicyKind::NoOp,
                last_access: tick,
                dump_path: None,
                cell: Arc::downgrade(cell),
            },
        );
        trace!(buffer_id = %cell.id, "buffer registered");
    }

    pub(crate) fn unregister(&self, id: BufferId) {
        if self.registry.lock().records.remove(&id).is_some() {
            trace!(buffer_id = %id, "buffer unregistered");
        }
    }

    /// Copy a buffer's state into its record and mark it as recently used.
    pub(crate) fn sync(&self, id: BufferId, state: &BufferState) {
        let mut registry = self.registry.lock();
        let tick = registry.tick();
        if let Some(record) = registry.records.get_mut(&id) {
            record.size = state.size;
            record.loaded = state.is_loaded();
            record.policy = state.policy.kind();
            record.dump_path = state.dump.as_ref().map(|dump| dump.path().to_path_buf());
            record.last_access = tick;
        }
    }

    pub(crate) fn touch(&self, id: BufferId) {
        let mut registry = self.registry.lock();
        let tick = registry.tick();
        if let Some(record) = registry.records.get_mut(&id) {
            record.last_access = tick;
        }
    }

    /// Read a dumped buffer back into freshly allocated memory.
    ///
    /// `resize` restores into a block of a different size, copying the
    /// common prefix. The caller holds the buffer's write lock.
    pub(crate) fn restore_state(
        &self,
        id: BufferId,
        state: &mut BufferState,
        resize: Option<usize>,
    ) -> Result<bool, MemoryError> {
        let Some(dump) = state.dump.take() else {
            return Ok(false);
        };

        let size = resize.unwrap_or(state.size);
        let mut data = match state.policy.allocate(size) {
            Ok(data) => data,
            Err(e) => {
                warn!(buffer_id = %id, size, error = %e, "restore allocation failed");
                state.dump = Some(dump);
                return Err(e);
            }
        };

        let readable = size.min(dump.len());
        if let Err(e) = dump.read_into(&mut data[..readable]) {
            warn!(buffer_id = %id, error = %e, "restore read failed");
            state.policy.destroy(data);
            state.dump = Some(dump);
            return Err(e);
        }
        // Pool blocks are recycled, anything past the dumped bytes is stale.
        data[readable..].fill(0);

        state.data = Some(data);
        state.size = size;
        drop(dump);
        self.sync(id, state);
        debug!(buffer_id = %id, size, "buffer restored");
        Ok(true)
    }

    /// Dump one buffer if it is idle. Returns the number of bytes moved to disk.
    fn dump_cell(&self, cell: &BufferCell) -> Result<usize, MemoryError> {
        if cell.lock_count() > 0 {
            return Ok(0);
        }
        let Some(mut state) = cell.state.try_write() else {
            trace!(buffer_id = %cell.id, "buffer busy, dump skipped");
            return Ok(0);
        };
        // A lock may have been taken between the check above and the write lock.
        if cell.lock_count() > 0 || !state.is_loaded() || state.size == 0 {
            return Ok(0);
        }
        let Some(data) = state.data.take() else {
            return Ok(0);
        };

        let size = state.size;
        let dump = match self.store.write(&data[..size]) {
            Ok(dump) => dump,
            Err(e) => {
                warn!(buffer_id = %cell.id, error = %e, "buffer dump failed");
                state.data = Some(data);
                return Err(e);
            }
        };

        state.policy.destroy(data);
        debug!(buffer_id = %cell.id, size, path = %dump.path().display(), "buffer dumped");
        state.dump = Some(dump);
        self.sync(cell.id, &state);
        Ok(size)
    }

    /// Let the dump policy free memory, least recently used buffers first.
    pub(crate) fn sweep(&self, trigger: SweepTrigger) {
        let (policy, resident) = {
            let registry = self.registry.lock();
            if matches!(registry.policy, DumpPolicy::Never) {
                return;
            }
            let resident: usize = registry
                .records
                .values()
                .filter(|record| record.loaded)
                .map(|record| record.size)
                .sum();
            (registry.policy.clone(), resident as u64)
        };

        let target = policy.bytes_to_free(resident);
        if target == 0 {
            return;
        }

        let mut candidates: Vec<(u64, Arc<BufferCell>)> = {
            let registry = self.registry.lock();
            registry
                .records
                .values()
                .filter(|record| record.loaded && record.size > 0)
                .filter_map(|record| record.cell.upgrade().map(|cell| (record.last_access, cell)))
                .filter(|(_, cell)| cell.lock_count() == 0)
                .collect()
        };
        candidates.sort_by_key(|(last_access, _)| *last_access);

        let mut freed = 0u64;
        let mut dumped = 0usize;
        for (_, cell) in &candidates {
            if freed >= target {
                break;
            }
            match self.dump_cell(cell) {
                Ok(0) => {}
                Ok(bytes) => {
                    freed += bytes as u64;
                    dumped += 1;
                }
                Err(e) => warn!(buffer_id = %cell.id, error = %e, "policy dump failed"),
            }
        }

        if dumped > 0 {
            debug!(?trigger, policy = policy.name(), resident, freed, dumped, "dump policy sweep");
        }
    }

    fn cell(&self, id: BufferId) -> Option<Arc<BufferCell>> {
        self.registry
            .lock()
            .records
            .get(&id)
            .and_then(|record| record.cell.upgrade())
    }

    fn info(id: BufferId, record: &BufferRecord) -> BufferInfo {
        BufferInfo {
            id,
            size: record.size,
            loaded: record.loaded,
            policy: record.policy,
            lock_count: record.cell.upgrade().map_or(0, |cell| cell.lock_count()),
            last_access: record.last_access,
            dump_path: record.dump_path.clone(),
        }
    }
}

impl fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager")
            .field("dump_dir", &self.store.dir())
            .field("buffers", &self.len())
            .field("stats", &self.buffer_stats())
            .finish()
    }
}

impl fmt::Display for BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.buffer_stats();
        let infos = self.buffer_infos();
        writeln!(
            f,
            "BufferManager: {} buffers, {} B managed, {} B dumped, policy {}",
            infos.len(),
            stats.total_managed,
            stats.total_dumped,
            self.dump_policy()
        )?;
        writeln!(f, "{:>8} {:>12} {:>7} {:>8} {:>6}", "id", "size", "loaded", "policy", "locks")?;
        for info in infos {
            writeln!(
                f,
                "{:>8} {:>12} {:>7} {:>8} {:>6}",
                info.id.to_string(),
                info.size,
                info.loaded,
                info.policy.to_string(),
                info.lock_count
            )?;
        }
        Ok(())
    }
}
