//! WAL recovery.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use hashbrown::HashMap;
use quiver_common::types::{EpochId, TxId};
use quiver_common::utils::error::{Result, StorageError};

use super::WalRecord;
use super::log::{list_segments, segment_file_name};

/// A committed transaction read back from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredTransaction {
    /// The transaction.
    pub tx_id: TxId,
    /// Its commit epoch.
    pub epoch: EpochId,
    /// Its mutations in log order.
    pub records: Vec<WalRecord>,
}

/// What a recovery pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Segments read.
    pub segments: usize,
    /// Frames decoded.
    pub records: usize,
    /// Committed transactions returned.
    pub committed: usize,
    /// Committed transactions already covered by the checkpoint.
    pub skipped: usize,
    /// Transactions without a commit record, or aborted.
    pub discarded: usize,
    /// Whether an incomplete final frame was dropped.
    pub torn_tail: bool,
}

enum Frame {
    Record(WalRecord, usize),
    End,
    Torn,
}

/// Reads committed transactions from a WAL directory after a crash or
/// clean shutdown.
///
/// The last frame of the newest segment may be incomplete (the process
/// died mid-write); it is dropped and, unless the recovery is read-only,
/// cut off the file. Any other unreadable frame is corruption.
pub struct WalRecovery {
    dir: PathBuf,
    repair: bool,
}

impl WalRecovery {
    /// Creates a recovery handler for the WAL directory `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            repair: true,
        }
    }

    /// Leaves the files untouched, even a torn tail.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.repair = false;
        self
    }

    /// Returns the transactions that committed after `after_epoch`, read
    /// from segments `from_segment` onward, in commit order.
    ///
    /// # Errors
    ///
    /// Returns `StorageCorruption` for a checksum or decode failure
    /// anywhere but the tail of the newest segment, or an I/O error.
    pub fn recover(
        &self,
        from_segment: u64,
        after_epoch: EpochId,
    ) -> Result<(Vec<RecoveredTransaction>, RecoveryStats)> {
        let segments: Vec<u64> = list_segments(&self.dir)?
            .into_iter()
            .filter(|s| *s >= from_segment)
            .collect();
        let mut stats = RecoveryStats::default();
        let mut pending: HashMap<TxId, Vec<WalRecord>> = HashMap::new();
        let mut committed = Vec::new();

        for (i, &seq) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            let path = self.dir.join(segment_file_name(seq));
            let (records, valid_len, torn) = Self::read_segment(&path, is_last)?;
            stats.segments += 1;
            if torn {
                stats.torn_tail = true;
                tracing::warn!(segment = seq, valid_len, "dropping torn WAL tail");
                if self.repair {
                    OpenOptions::new().write(true).open(&path)?.set_len(valid_len)?;
                }
            }
            for record in records {
                stats.records += 1;
                match record {
                    WalRecord::TxCommit { tx_id, epoch } => {
                        let records = pending.remove(&tx_id).unwrap_or_default();
                        if epoch <= after_epoch {
                            stats.skipped += 1;
                        } else {
                            committed.push(RecoveredTransaction {
                                tx_id,
                                epoch,
                                records,
                            });
                        }
                    }
                    WalRecord::TxAbort { tx_id } => {
                        if pending.remove(&tx_id).is_some() {
                            stats.discarded += 1;
                        }
                    }
                    WalRecord::Checkpoint { .. } => {}
                    other => {
                        if let Some(tx_id) = other.tx_id() {
                            pending.entry(tx_id).or_default().push(other);
                        }
                    }
                }
            }
        }
        stats.discarded += pending.len();
        committed.sort_by_key(|t| t.epoch);
        stats.committed = committed.len();
        tracing::debug!(
            segments = stats.segments,
            records = stats.records,
            committed = stats.committed,
            discarded = stats.discarded,
            "WAL read back"
        );
        Ok((committed, stats))
    }

    fn read_segment(path: &Path, is_last: bool) -> Result<(Vec<WalRecord>, u64, bool)> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok((Vec::new(), 0, false));
        }
        let mut buf = Vec::with_capacity(len as usize);
        BufReader::new(file).read_to_end(&mut buf)?;
        let data: &[u8] = &buf;
        let mut records = Vec::new();
        let mut pos = 0;
        loop {
            match Self::read_frame(data, pos, is_last, path)? {
                Frame::Record(record, next) => {
                    records.push(record);
                    pos = next;
                }
                Frame::End => return Ok((records, pos as u64, false)),
                Frame::Torn => return Ok((records, pos as u64, true)),
            }
        }
    }

    fn read_frame(data: &[u8], pos: usize, is_last: bool, path: &Path) -> Result<Frame> {
        let corrupt = |what: &str| {
            StorageError::Corruption(format!("{what} in {} at offset {pos}", path.display()))
        };
        if pos == data.len() {
            return Ok(Frame::End);
        }
        let complete = pos + 4 <= data.len() && {
            let len = LittleEndian::read_u32(&data[pos..]) as usize;
            pos + 4 + len + 4 <= data.len()
        };
        if !complete {
            return if is_last {
                Ok(Frame::Torn)
            } else {
                Err(corrupt("truncated frame").into())
            };
        }
        let len = LittleEndian::read_u32(&data[pos..]) as usize;
        let payload = &data[pos + 4..pos + 4 + len];
        let end = pos + 4 + len + 4;
        let stored = LittleEndian::read_u32(&data[pos + 4 + len..]);
        if crc32fast::hash(payload) != stored {
            // A final frame whose bytes never fully reached the disk.
            if is_last && end == data.len() {
                return Ok(Frame::Torn);
            }
            return Err(corrupt("WAL checksum mismatch").into());
        }
        let (record, _): (WalRecord, _) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| corrupt(&format!("undecodable WAL record ({e})")))?;
        Ok(Frame::Record(record, end))
    }
}
