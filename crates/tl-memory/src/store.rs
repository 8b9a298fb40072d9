//! On-disk storage for dumped buffer contents.
//!
//! Each dump is a uniquely named temporary file in the store directory. The
//! file is removed when its [`DumpFile`] handle is dropped, which happens as
//! soon as the buffer has been restored or destroyed.

use crate::error::MemoryError;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

const DUMP_PREFIX: &str = "tl-dump-";
const DUMP_SUFFIX: &str = ".raw";

/// Directory that receives dump files.
#[derive(Debug, Clone)]
pub struct DumpStore {
    dir: PathBuf,
}

/// A buffer's contents parked on disk.
#[derive(Debug)]
pub struct DumpFile {
    file: NamedTempFile,
    len: usize,
}

impl DumpStore {
    /// Store dumps under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store dumps in the system temporary directory.
    #[must_use]
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a fresh dump file.
    pub fn write(&self, bytes: &[u8]) -> Result<DumpFile, MemoryError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| MemoryError::dump_io(&self.dir, e))?;

        let mut file = Builder::new()
            .prefix(DUMP_PREFIX)
            .suffix(DUMP_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| MemoryError::dump_io(&self.dir, e))?;

        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(|e| MemoryError::dump_io(file.path(), e))?;

        Ok(DumpFile {
            file,
            len: bytes.len(),
        })
    }
}

impl DumpFile {
    /// Location on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of bytes that were dumped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the dump holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the first `dest.len()` dumped bytes into `dest`.
    ///
    /// # Errors
    ///
    /// Fails if the file can no longer be read or its length changed since it
    /// was written.
    ///
    /// # Panics
    ///
    /// Panics if `dest` is longer than the dump.
    pub fn read_into(&self, dest: &mut [u8]) -> Result<(), MemoryError> {
        assert!(
            dest.len() <= self.len,
            "restore target of {} bytes exceeds dump of {} bytes",
            dest.len(),
            self.len
        );

        let path = self.path();
        let mut file = File::open(path).map_err(|e| MemoryError::dump_io(path, e))?;
        let found = file
            .metadata()
            .map_err(|e| MemoryError::dump_io(path, e))?
            .len();
        if found != self.len as u64 {
            return Err(MemoryError::DumpSizeMismatch {
                path: path.to_path_buf(),
                expected: self.len,
                found,
            });
        }

        file.read_exact(dest)
            .map_err(|e| MemoryError::dump_io(path, e))
    }
}
