//! Dump policies decide how much resident buffer memory to push out to disk.
//!
//! The [`BufferManager`](crate::BufferManager) consults its policy after
//! allocations, restores and final unlocks, and whenever the policy itself is
//! replaced. A policy only answers "how many bytes should be freed now"; the
//! manager picks victims in least-recently-used order among buffers that are
//! loaded, unlocked and non-empty.
//!
//! | Policy  | Parameters                              | Behaviour                         |
//! |---------|-----------------------------------------|-----------------------------------|
//! | never   |                                         | nothing is dumped automatically   |
//! | always  |                                         | every idle buffer is dumped       |
//! | barrier | `barrier`                               | keep resident bytes <= barrier    |
//! | valve   | `min_free_mem`, `hysteresis_offset`     | free memory when the system is low|

use crate::error::MemoryError;
use crate::size::{format_byte_size, parse_byte_size};
use std::fmt;
use std::sync::Arc;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Source of the system's currently free memory, in bytes.
pub type FreeMemoryProbe = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Automatic dumping strategy of a buffer manager.
#[derive(Clone, Default)]
pub enum DumpPolicy {
    /// Never dump automatically.
    #[default]
    Never,
    /// Dump every buffer as soon as it is idle.
    Always,
    /// Keep the total of loaded bytes at or below `barrier`.
    Barrier {
        /// Resident byte budget
        barrier: u64,
    },
    /// Dump when free system memory drops below `min_free_mem`, until
    /// `min_free_mem + hysteresis_offset` bytes would be free again.
    Valve {
        /// Free-memory threshold that opens the valve
        min_free_mem: u64,
        /// Extra bytes freed beyond the threshold
        hysteresis_offset: u64,
        /// Free-memory source
        probe: FreeMemoryProbe,
    },
}

impl DumpPolicy {
    /// Barrier policy with the given byte budget.
    #[must_use]
    pub fn barrier(barrier: u64) -> Self {
        DumpPolicy::Barrier { barrier }
    }

    /// Valve policy reading free memory from the operating system.
    #[must_use]
    pub fn valve(min_free_mem: u64, hysteresis_offset: u64) -> Self {
        Self::valve_with_probe(min_free_mem, hysteresis_offset, Arc::new(system_free_memory))
    }

    /// Valve policy with a custom free-memory source.
    #[must_use]
    pub fn valve_with_probe(
        min_free_mem: u64,
        hysteresis_offset: u64,
        probe: FreeMemoryProbe,
    ) -> Self {
        DumpPolicy::Valve {
            min_free_mem,
            hysteresis_offset,
            probe,
        }
    }

    /// Policy name as used in configuration files.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DumpPolicy::Never => "never",
            DumpPolicy::Always => "always",
            DumpPolicy::Barrier { .. } => "barrier",
            DumpPolicy::Valve { .. } => "valve",
        }
    }

    /// Names of the tunable parameters.
    #[must_use]
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            DumpPolicy::Never | DumpPolicy::Always => &[],
            DumpPolicy::Barrier { .. } => &["barrier"],
            DumpPolicy::Valve { .. } => &["min_free_mem", "hysteresis_offset"],
        }
    }

    /// Current value of a parameter, formatted as a byte size.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        let value = match (self, name) {
            (DumpPolicy::Barrier { barrier }, "barrier") => *barrier,
            (DumpPolicy::Valve { min_free_mem, .. }, "min_free_mem") => *min_free_mem,
            (DumpPolicy::Valve { hysteresis_offset, .. }, "hysteresis_offset") => {
                *hysteresis_offset
            }
            _ => return None,
        };
        Some(format_byte_size(value))
    }

    /// Set a parameter from a byte-size string such as `"512MiB"`.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::UnknownParam`] if the policy has no such parameter
    /// - [`MemoryError::InvalidSize`] if `value` is not a valid size
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), MemoryError> {
        let policy = self.name();
        let slot = match (self, name) {
            (DumpPolicy::Barrier { barrier }, "barrier") => barrier,
            (DumpPolicy::Valve { min_free_mem, .. }, "min_free_mem") => min_free_mem,
            (DumpPolicy::Valve { hysteresis_offset, .. }, "hysteresis_offset") => hysteresis_offset,
            _ => {
                return Err(MemoryError::UnknownParam {
                    policy,
                    name: name.to_string(),
                })
            }
        };
        *slot = parse_byte_size(value)?;
        Ok(())
    }

    /// Bytes that should be freed given `resident` loaded bytes.
    ///
    /// `u64::MAX` means "everything that can be dumped".
    pub(crate) fn bytes_to_free(&self, resident: u64) -> u64 {
        match self {
            DumpPolicy::Never => 0,
            DumpPolicy::Always => u64::MAX,
            DumpPolicy::Barrier { barrier } => resident.saturating_sub(*barrier),
            DumpPolicy::Valve {
                min_free_mem,
                hysteresis_offset,
                probe,
            } => {
                let free = probe();
                if free < *min_free_mem {
                    min_free_mem.saturating_add(*hysteresis_offset) - free
                } else {
                    0
                }
            }
        }
    }
}

impl fmt::Debug for DumpPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpPolicy::Never => f.write_str("Never"),
            DumpPolicy::Always => f.write_str("Always"),
            DumpPolicy::Barrier { barrier } => {
                f.debug_struct("Barrier").field("barrier", barrier).finish()
            }
            DumpPolicy::Valve {
                min_free_mem,
                hysteresis_offset,
                ..
            } => f
                .debug_struct("Valve")
                .field("min_free_mem", min_free_mem)
                .field("hysteresis_offset", hysteresis_offset)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for DumpPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        for name in self.param_names() {
            if let Some(value) = self.param(name) {
                write!(f, " {}={}", name, value)?;
            }
        }
        Ok(())
    }
}

/// Available system memory in bytes, as reported by the operating system.
#[must_use]
pub fn system_free_memory() -> u64 {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
    );
    system.available_memory()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_param_names() {
        assert!(DumpPolicy::Never.param_names().is_empty());
        assert!(DumpPolicy::Always.param_names().is_empty());
        assert_eq!(DumpPolicy::barrier(0).param_names(), &["barrier"]);
        assert_eq!(
            DumpPolicy::valve(0, 0).param_names(),
            &["min_free_mem", "hysteresis_offset"]
        );
    }

    #[test]
    fn test_set_param() {
        let mut policy = DumpPolicy::barrier(0);
        policy.set_param("barrier", "1B").unwrap();
        assert_eq!(policy.param("barrier").as_deref(), Some("1B"));

        policy.set_param("barrier", "2MiB").unwrap();
        assert_eq!(policy.param("barrier").as_deref(), Some("2MiB"));
    }

    #[test]
    fn test_set_param_rejects_negative_and_unknown() {
        let mut policy = DumpPolicy::barrier(7);
        assert!(matches!(
            policy.set_param("barrier", "-1B"),
            Err(MemoryError::InvalidSize { .. })
        ));
        assert!(matches!(
            policy.set_param("min_free_mem", "1B"),
            Err(MemoryError::UnknownParam { policy: "barrier", .. })
        ));
        assert_eq!(policy.param("barrier").as_deref(), Some("7B"));

        assert!(DumpPolicy::Never.set_param("barrier", "1B").is_err());
    }

    #[test]
    fn test_barrier_bytes_to_free() {
        let policy = DumpPolicy::barrier(10);
        assert_eq!(policy.bytes_to_free(4), 0);
        assert_eq!(policy.bytes_to_free(10), 0);
        assert_eq!(policy.bytes_to_free(25), 15);
    }

    #[test]
    fn test_valve_uses_probe_and_hysteresis() {
        let free = Arc::new(AtomicU64::new(100));
        let probe_free = Arc::clone(&free);
        let policy = DumpPolicy::valve_with_probe(
            50,
            20,
            Arc::new(move || probe_free.load(Ordering::SeqCst)),
        );

        assert_eq!(policy.bytes_to_free(1_000), 0);
        free.store(30, Ordering::SeqCst);
        assert_eq!(policy.bytes_to_free(1_000), 40);
    }

    #[test]
    fn test_never_and_always() {
        assert_eq!(DumpPolicy::default().bytes_to_free(u64::MAX), 0);
        assert_eq!(DumpPolicy::Always.bytes_to_free(0), u64::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(DumpPolicy::barrier(2048).to_string(), "barrier barrier=2KiB");
        assert_eq!(
            DumpPolicy::valve(1 << 20, 1).to_string(),
            "valve min_free_mem=1MiB hysteresis_offset=1B"
        );
    }

    #[test]
    fn test_system_free_memory_is_measured() {
        let free = system_free_memory();
        assert!(free > 0);
        assert!(free < u64::MAX);
    }
}
