//! Spill directory management.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use quiver_common::utils::error::Result;

use super::file::SpillFile;

/// Creates spill files in one directory and tracks how much was spilled.
///
/// Files are deleted when their [`SpillFile`] handle is dropped, so a
/// cancelled or failed query leaves nothing behind.
pub struct SpillManager {
    dir: PathBuf,
    // Keeps a temporary directory alive when none was configured.
    _temp: Option<tempfile::TempDir>,
    files_created: AtomicUsize,
    bytes_written: AtomicU64,
}

impl SpillManager {
    /// Spills into `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            _temp: None,
            files_created: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }

    /// Spills into a fresh temporary directory removed on drop.
    pub fn temporary() -> Result<Self> {
        let temp = tempfile::Builder::new().prefix("quiver-spill").tempdir()?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
            files_created: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
        })
    }

    /// The spill directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a new spill file named after `purpose`.
    pub fn create_file(&self, purpose: &str) -> Result<SpillFile> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{purpose}-"))
            .suffix(".spill")
            .tempfile_in(&self.dir)?;
        self.files_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(purpose, path = %file.path().display(), "created spill file");
        Ok(SpillFile::new(file))
    }

    /// Records bytes written by a finished file.
    pub(crate) fn record_bytes(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Number of files created so far.
    #[must_use]
    pub fn files_created(&self) -> usize {
        self.files_created.load(Ordering::Relaxed)
    }

    /// Total bytes spilled so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SpillManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillManager")
            .field("dir", &self.dir)
            .field("files_created", &self.files_created())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}
