//! Error types for managed buffer memory.

use std::path::PathBuf;
use thiserror::Error;
use tl_pool::PoolError;

/// Errors returned by managed buffers, the buffer manager and dump policies.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The system could not provide memory for a buffer.
    #[error("Failed to allocate {bytes} bytes")]
    AllocationFailed {
        /// Requested size in bytes
        bytes: usize,
    },

    /// The backing chunk pool refused the request.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Writing or reading a dump file failed.
    #[error("Dump file I/O failed for {path}: {source}")]
    DumpIo {
        /// File being written or read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A dump file did not hold the expected number of bytes.
    #[error("Dump file {path} holds {found} bytes, expected {expected}")]
    DumpSizeMismatch {
        /// File that was read
        path: PathBuf,
        /// Bytes the buffer owned when it was dumped
        expected: usize,
        /// Bytes found on disk
        found: u64,
    },

    /// A dump policy does not know the parameter.
    #[error("Dump policy '{policy}' has no parameter '{name}'")]
    UnknownParam {
        /// Policy name
        policy: &'static str,
        /// Rejected parameter name
        name: String,
    },

    /// A size string could not be parsed.
    #[error("Invalid byte size '{value}': {reason}")]
    InvalidSize {
        /// Rejected input
        value: String,
        /// Why it was rejected
        reason: &'static str,
    },
}

impl MemoryError {
    pub(crate) fn dump_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DumpIo {
            path: path.into(),
            source,
        }
    }
}
