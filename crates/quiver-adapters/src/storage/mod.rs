//! Storage backends and the write-ahead log.
//!
//! | Backend | Durability | Use when |
//! | ------- | ---------- | -------- |
//! | [`MemoryBackend`] | None | Tests, in-memory databases |
//! | [`FileBackend`] | fsync on flush | One log-structured key/value file |
//! | [`DirectoryBackend`] | Atomic rename per key | Checkpoint files |
//!
//! The kernel only talks to the [`StorageBackend`] trait. The [`wal`]
//! module journals committed transactions ahead of checkpoints.

pub mod backend;
pub mod wal;

pub use backend::{DirectoryBackend, FileBackend, MemoryBackend, StorageBackend};
