//! Segmented WAL files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::Mutex;
use quiver_common::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};

use super::WalRecord;

/// How aggressively committed records are forced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// fsync before every commit returns. A commit that returned survives
    /// power loss.
    Full,
    /// Records reach the OS at commit; a background flusher fsyncs
    /// periodically. A process crash loses nothing, power loss may lose the
    /// last interval.
    #[default]
    Normal,
    /// Records reach the OS at commit and are never fsynced explicitly.
    Off,
}

/// WAL settings.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Durability mode.
    pub sync_mode: SyncMode,
    /// A segment is closed and a new one started once it reaches this size.
    pub segment_size: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Normal,
            segment_size: 64 * 1024 * 1024,
        }
    }
}

/// A position in the log: a segment and a byte offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct WalPosition {
    /// Segment sequence number.
    pub segment: u64,
    /// Byte offset in the segment.
    pub offset: u64,
}

/// File name of segment `seq`.
#[must_use]
pub fn segment_file_name(seq: u64) -> String {
    format!("wal_{seq:08}.log")
}

/// Sequence numbers of the segments in `dir`, ascending.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be read.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(seq) = name
            .strip_prefix("wal_")
            .and_then(|s| s.strip_suffix(".log"))
            .and_then(|s| s.parse::<u64>().ok())
        {
            segments.push(seq);
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

/// Encodes one record as a `len:u32 | payload | crc32` frame.
pub(crate) fn encode_frame(record: &WalRecord, out: &mut Vec<u8>) -> Result<()> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| Error::Serialization(e.to_string()))?;
    out.write_u32::<LittleEndian>(payload.len() as u32)?;
    out.extend_from_slice(&payload);
    out.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    Ok(())
}

struct ActiveSegment {
    seq: u64,
    writer: BufWriter<File>,
    offset: u64,
    dirty: bool,
}

/// Manages the write-ahead log directory.
///
/// Records are appended to the newest segment. Opening the log always
/// starts a fresh segment, so a segment is never appended to after a
/// restart.
pub struct WalManager {
    dir: PathBuf,
    config: WalConfig,
    active: Mutex<Option<ActiveSegment>>,
    records_written: AtomicU64,
    bytes_written: AtomicU64,
    syncs: AtomicU64,
}

impl WalManager {
    /// Opens the WAL directory with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the segment cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(dir, WalConfig::default())
    }

    /// Opens the WAL directory, starting a new segment after the newest
    /// existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the segment cannot be created.
    pub fn with_config(dir: impl AsRef<Path>, config: WalConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let next = list_segments(&dir)?.last().map_or(0, |s| s + 1);
        let segment = Self::create_segment(&dir, next)?;
        tracing::debug!(dir = %dir.display(), segment = next, "opened WAL");
        Ok(Self {
            dir,
            config,
            active: Mutex::new(Some(segment)),
            records_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
        })
    }

    fn create_segment(dir: &Path, seq: u64) -> Result<ActiveSegment> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(segment_file_name(seq)))?;
        let offset = file.metadata()?.len();
        Ok(ActiveSegment {
            seq,
            writer: BufWriter::new(file),
            offset,
            dirty: false,
        })
    }

    /// Appends records as one unit and returns the position after them.
    ///
    /// The records are handed to the OS before this returns; with
    /// [`SyncMode::Full`] they are also fsynced.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails. The caller must treat
    /// the transaction as not committed.
    pub fn append(&self, records: &[WalRecord]) -> Result<WalPosition> {
        let mut buf = Vec::new();
        for record in records {
            encode_frame(record, &mut buf)?;
        }
        let mut guard = self.active.lock();
        let segment = guard
            .as_mut()
            .ok_or_else(|| Error::Internal("WAL is closed".to_string()))?;
        segment.writer.write_all(&buf)?;
        segment.writer.flush()?;
        segment.offset += buf.len() as u64;
        segment.dirty = true;
        if self.config.sync_mode == SyncMode::Full {
            segment.writer.get_ref().sync_data()?;
            segment.dirty = false;
            self.syncs.fetch_add(1, Ordering::Relaxed);
        }
        self.records_written
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        self.bytes_written.fetch_add(buf.len() as u64, Ordering::Relaxed);

        let position = WalPosition {
            segment: segment.seq,
            offset: segment.offset,
        };
        if segment.offset >= self.config.segment_size {
            self.rotate_locked(&mut guard)?;
        }
        Ok(position)
    }

    /// Appends a single record.
    ///
    /// # Errors
    ///
    /// As [`append`](Self::append).
    pub fn log(&self, record: &WalRecord) -> Result<WalPosition> {
        self.append(std::slice::from_ref(record))
    }

    /// Closes the current segment and starts the next. Returns the new
    /// segment's sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if syncing or creating a segment fails.
    pub fn rotate(&self) -> Result<u64> {
        let mut guard = self.active.lock();
        self.rotate_locked(&mut guard)
    }

    fn rotate_locked(&self, active: &mut Option<ActiveSegment>) -> Result<u64> {
        let current = active
            .as_mut()
            .ok_or_else(|| Error::Internal("WAL is closed".to_string()))?;
        current.writer.flush()?;
        if self.config.sync_mode != SyncMode::Off {
            current.writer.get_ref().sync_data()?;
        }
        let next = current.seq + 1;
        let finished = current.seq;
        let finished_size = current.offset;
        *active = Some(Self::create_segment(&self.dir, next)?);
        tracing::info!(finished, size = finished_size, next, "WAL segment rotated");
        Ok(next)
    }

    /// Flushes buffered records to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> Result<()> {
        if let Some(segment) = self.active.lock().as_mut() {
            segment.writer.flush()?;
        }
        Ok(())
    }

    /// fsyncs the active segment if anything was written since the last
    /// sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> Result<()> {
        if let Some(segment) = self.active.lock().as_mut() {
            if segment.dirty {
                segment.writer.flush()?;
                segment.writer.get_ref().sync_data()?;
                segment.dirty = false;
                self.syncs.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Deletes every segment older than `seq`. Returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a segment cannot be removed.
    pub fn remove_segments_before(&self, seq: u64) -> Result<usize> {
        let mut removed = 0;
        for old in list_segments(&self.dir)?.into_iter().filter(|s| *s < seq) {
            fs::remove_file(self.dir.join(segment_file_name(old)))?;
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!(removed, before = seq, "truncated WAL");
        }
        Ok(removed)
    }

    /// Position of the next record.
    #[must_use]
    pub fn position(&self) -> WalPosition {
        self.active
            .lock()
            .as_ref()
            .map(|s| WalPosition {
                segment: s.seq,
                offset: s.offset,
            })
            .unwrap_or_default()
    }

    /// Total size of all segments on disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a segment cannot be inspected.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for seq in list_segments(&self.dir)? {
            total += fs::metadata(self.dir.join(segment_file_name(seq)))?.len();
        }
        Ok(total)
    }

    /// Records appended since opening.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Bytes appended since opening.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// fsyncs performed since opening.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// The configured sync mode.
    #[must_use]
    pub fn sync_mode(&self) -> SyncMode {
        self.config.sync_mode
    }

    /// The WAL directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Syncs and closes the active segment. Later appends fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(&self) -> Result<()> {
        if let Some(mut segment) = self.active.lock().take() {
            segment.writer.flush()?;
            if self.config.sync_mode != SyncMode::Off {
                segment.writer.get_ref().sync_all()?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("dir", &self.dir)
            .field("sync_mode", &self.config.sync_mode)
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::types::{NodeId, TxId};
    use tempfile::tempdir;

    fn create(tx: u64, id: u64) -> WalRecord {
        WalRecord::CreateNode {
            tx_id: TxId::new(tx),
            id: NodeId::new(id),
            labels: vec!["Person".to_string()],
            properties: Vec::new(),
        }
    }

    #[test]
    fn test_append_advances_position() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path()).unwrap();
        let start = wal.position();
        let pos = wal.append(&[create(1, 1), create(1, 2)]).unwrap();
        assert_eq!(pos.segment, start.segment);
        assert!(pos.offset > start.offset);
        assert_eq!(wal.record_count(), 2);
        assert_eq!(wal.total_size().unwrap(), pos.offset);
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = tempdir().unwrap();
        let config = WalConfig {
            sync_mode: SyncMode::Off,
            segment_size: 64,
        };
        let wal = WalManager::with_config(dir.path(), config).unwrap();
        for i in 0..10 {
            wal.log(&create(1, i)).unwrap();
        }
        assert!(list_segments(dir.path()).unwrap().len() > 1);

        let current = wal.position().segment;
        let removed = wal.remove_segments_before(current).unwrap();
        assert!(removed > 0);
        assert_eq!(list_segments(dir.path()).unwrap(), vec![current]);
    }

    #[test]
    fn test_reopen_starts_new_segment() {
        let dir = tempdir().unwrap();
        {
            let wal = WalManager::open(dir.path()).unwrap();
            wal.log(&create(1, 1)).unwrap();
            wal.close().unwrap();
            assert!(wal.log(&create(1, 2)).is_err());
        }
        let wal = WalManager::open(dir.path()).unwrap();
        assert_eq!(wal.position().segment, 1);
        assert_eq!(list_segments(dir.path()).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_full_sync_counts() {
        let dir = tempdir().unwrap();
        let config = WalConfig {
            sync_mode: SyncMode::Full,
            ..WalConfig::default()
        };
        let wal = WalManager::with_config(dir.path(), config).unwrap();
        wal.log(&create(1, 1)).unwrap();
        wal.log(&create(2, 2)).unwrap();
        assert_eq!(wal.sync_count(), 2);
        wal.sync().unwrap();
        assert_eq!(wal.sync_count(), 2);
    }
}
