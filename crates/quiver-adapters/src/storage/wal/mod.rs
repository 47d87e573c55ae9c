//! Write-Ahead Log.
//!
//! A transaction's redo records are appended to the log as one unit, ending
//! in its commit record, before its versions become visible. After a crash,
//! [`WalRecovery`] returns the committed transactions that the last
//! checkpoint does not cover, and the engine replays them.
//!
//! | Sync mode | What it does |
//! | --------- | ------------ |
//! | [`Full`](SyncMode::Full) | fsync before a commit returns |
//! | [`Normal`](SyncMode::Normal) | [`WalFlusher`] fsyncs periodically |
//! | [`Off`](SyncMode::Off) | the OS decides |
//!
//! Segments live in `wal/wal_<seq>.log`; each frame is
//! `len:u32 | bincode payload | crc32`. Checkpoints are written by
//! [`CheckpointStore`].

mod checkpoint;
mod flusher;
mod log;
mod record;
mod recovery;

pub use checkpoint::{CheckpointMeta, CheckpointStore};
pub use flusher::{FlusherStats, WalFlusher};
pub use log::{SyncMode, WalConfig, WalManager, WalPosition, list_segments, segment_file_name};
pub use record::WalRecord;
pub use recovery::{RecoveredTransaction, RecoveryStats, WalRecovery};
