//! Database configuration.

use std::path::PathBuf;

use thiserror::Error;

pub use quiver_adapters::storage::wal::SyncMode;

/// Errors from [`Config::validate()`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Memory limit must be greater than zero.
    #[error("memory_limit must be greater than zero")]
    ZeroMemoryLimit,
    /// Thread count must be greater than zero.
    #[error("threads must be greater than zero")]
    ZeroThreads,
    /// Morsel size must be greater than zero.
    #[error("morsel_size must be greater than zero")]
    ZeroMorselSize,
    /// WAL flush interval must be greater than zero.
    #[error("wal_flush_interval_ms must be greater than zero")]
    ZeroWalFlushInterval,
    /// A read-only database needs a path to read from.
    #[error("read_only requires a database path")]
    ReadOnlyInMemory,
}

/// Database configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Path to the database directory (None for in-memory only).
    pub path: Option<PathBuf>,

    /// Memory limit in bytes (None for unlimited).
    pub memory_limit: Option<usize>,

    /// Directory for spill files. Defaults to `<path>/spill`, or a
    /// temporary directory for in-memory databases.
    pub spill_path: Option<PathBuf>,

    /// Number of worker threads for query execution.
    pub threads: usize,

    /// How hard commits push the WAL to disk.
    pub sync_mode: SyncMode,

    /// Rejects every write and skips WAL replay repairs.
    pub read_only: bool,

    /// Whether to enable WAL for durability.
    pub wal_enabled: bool,

    /// Background fsync period in [`SyncMode::Normal`], in milliseconds.
    pub wal_flush_interval_ms: u64,

    /// Size at which the WAL moves to a new segment.
    pub wal_segment_size: u64,

    /// How often the background checkpointer wakes up, in milliseconds.
    /// Zero disables it.
    pub checkpoint_interval_ms: u64,

    /// WAL bytes that make the checkpointer take a checkpoint.
    pub checkpoint_wal_threshold: u64,

    /// Takes a final checkpoint when the database closes.
    pub checkpoint_on_close: bool,

    /// Rows per morsel.
    pub morsel_size: usize,

    /// Result chunks buffered between the executor and the cursor.
    pub result_queue_capacity: usize,

    /// Logs every executed plan at info level.
    pub query_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            memory_limit: None,
            spill_path: None,
            threads: num_cpus::get(),
            sync_mode: SyncMode::Normal,
            read_only: false,
            wal_enabled: true,
            wal_flush_interval_ms: 100,
            wal_segment_size: 64 * 1024 * 1024,
            checkpoint_interval_ms: 30_000,
            checkpoint_wal_threshold: 16 * 1024 * 1024,
            checkpoint_on_close: true,
            morsel_size: 2048,
            result_queue_capacity: 8,
            query_logging: false,
        }
    }
}

impl Config {
    /// Creates a new configuration for an in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            wal_enabled: false,
            ..Default::default()
        }
    }

    /// Creates a new configuration for a persistent database.
    #[must_use]
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            wal_enabled: true,
            ..Default::default()
        }
    }

    /// Sets the memory limit.
    #[must_use]
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the spill directory for out-of-core processing.
    #[must_use]
    pub fn with_spill_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.spill_path = Some(path.into());
        self
    }

    /// Sets the WAL sync mode.
    #[must_use]
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Opens the database read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Disables the WAL. Nothing written survives a restart.
    #[must_use]
    pub fn without_wal(mut self) -> Self {
        self.wal_enabled = false;
        self
    }

    /// Sets the background WAL fsync period.
    #[must_use]
    pub fn with_wal_flush_interval_ms(mut self, ms: u64) -> Self {
        self.wal_flush_interval_ms = ms;
        self
    }

    /// Sets the WAL segment size.
    #[must_use]
    pub fn with_wal_segment_size(mut self, bytes: u64) -> Self {
        self.wal_segment_size = bytes;
        self
    }

    /// Sets the checkpointer period; zero disables background checkpoints.
    #[must_use]
    pub fn with_checkpoint_interval_ms(mut self, ms: u64) -> Self {
        self.checkpoint_interval_ms = ms;
        self
    }

    /// Sets the WAL size that triggers a background checkpoint.
    #[must_use]
    pub fn with_checkpoint_wal_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_wal_threshold = bytes;
        self
    }

    /// Leaves the WAL to be replayed on the next open instead of
    /// checkpointing on close.
    #[must_use]
    pub fn without_checkpoint_on_close(mut self) -> Self {
        self.checkpoint_on_close = false;
        self
    }

    /// Sets the rows per morsel.
    #[must_use]
    pub fn with_morsel_size(mut self, rows: usize) -> Self {
        self.morsel_size = rows;
        self
    }

    /// Sets how many result chunks may wait for the cursor.
    #[must_use]
    pub fn with_result_queue_capacity(mut self, chunks: usize) -> Self {
        self.result_queue_capacity = chunks;
        self
    }

    /// Enables query logging.
    #[must_use]
    pub fn with_query_logging(mut self) -> Self {
        self.query_logging = true;
        self
    }

    /// Validates the configuration, returning an error for invalid combinations.
    ///
    /// Called automatically by [`QuiverDB::with_config()`](crate::QuiverDB::with_config).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any setting is invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(limit) = self.memory_limit
            && limit == 0
        {
            return Err(ConfigError::ZeroMemoryLimit);
        }

        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }

        if self.morsel_size == 0 {
            return Err(ConfigError::ZeroMorselSize);
        }

        if self.wal_enabled && self.wal_flush_interval_ms == 0 {
            return Err(ConfigError::ZeroWalFlushInterval);
        }

        if self.read_only && self.path.is_none() {
            return Err(ConfigError::ReadOnlyInMemory);
        }

        Ok(())
    }

    /// The spill directory to use, if any can be derived.
    #[must_use]
    pub fn effective_spill_path(&self) -> Option<PathBuf> {
        self.spill_path
            .clone()
            .or_else(|| self.path.as_ref().map(|p| p.join("spill")))
    }
}

mod num_cpus {
    pub fn get() -> usize {
        std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.path.is_none());
        assert!(config.threads > 0);
        assert_eq!(config.sync_mode, SyncMode::Normal);
        assert_eq!(config.morsel_size, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_in_memory_disables_wal() {
        let config = Config::in_memory();
        assert!(!config.wal_enabled);
        assert!(config.effective_spill_path().is_none());
    }

    #[test]
    fn test_persistent_spill_path() {
        let config = Config::persistent("/tmp/db");
        assert!(config.wal_enabled);
        assert_eq!(
            config.effective_spill_path(),
            Some(PathBuf::from("/tmp/db/spill"))
        );
        let config = config.with_spill_path("/scratch");
        assert_eq!(config.effective_spill_path(), Some(PathBuf::from("/scratch")));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert_eq!(
            Config::in_memory().with_memory_limit(0).validate(),
            Err(ConfigError::ZeroMemoryLimit)
        );
        assert_eq!(
            Config::in_memory().with_threads(0).validate(),
            Err(ConfigError::ZeroThreads)
        );
        assert_eq!(
            Config::in_memory().with_morsel_size(0).validate(),
            Err(ConfigError::ZeroMorselSize)
        );
        assert_eq!(
            Config::persistent("/tmp/db").with_wal_flush_interval_ms(0).validate(),
            Err(ConfigError::ZeroWalFlushInterval)
        );
        assert_eq!(
            Config::in_memory().read_only().validate(),
            Err(ConfigError::ReadOnlyInMemory)
        );
    }

    #[test]
    fn test_builder_chain() {
        let config = Config::persistent("/tmp/db")
            .with_threads(2)
            .with_sync_mode(SyncMode::Full)
            .with_checkpoint_interval_ms(0)
            .with_query_logging();
        assert_eq!(config.threads, 2);
        assert_eq!(config.sync_mode, SyncMode::Full);
        assert_eq!(config.checkpoint_interval_ms, 0);
        assert!(config.query_logging);
    }
}
