//! Checkpoint files.
//!
//! A checkpoint stores a [`StoreImage`] as three base files plus a meta
//! record, all through a [`StorageBackend`]:
//!
//! ```text
//! base/nodes.bin       node labels and compressed property columns
//! base/edges.bin       edge endpoints, types and property columns
//! base/adjacency.bin   forward adjacency lists
//! checkpoint.meta      epoch and first WAL segment to replay
//! ```
//!
//! New base files are first written under a `.next` suffix. The meta
//! record is the commit point: once it names the new epoch the staged files
//! are promoted, and an interrupted promotion is finished on the next open.
//! Staged files without a matching meta record are leftovers and removed.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use quiver_common::types::EpochId;
use quiver_common::utils::error::{Error, Result, StorageError};
use quiver_core::graph::lpg::{AdjacencyImage, EdgeImage, NodeImage, StoreImage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::StorageBackend;

const NODES_KEY: &str = "base/nodes.bin";
const EDGES_KEY: &str = "base/edges.bin";
const ADJACENCY_KEY: &str = "base/adjacency.bin";
const META_KEY: &str = "checkpoint.meta";
const STAGED_SUFFIX: &str = ".next";
const BASE_FILES: [&str; 3] = [NODES_KEY, EDGES_KEY, ADJACENCY_KEY];

const MAGIC: &[u8; 4] = b"QVCK";
const FORMAT_VERSION: u32 = 1;
const ENVELOPE: usize = 12;

/// The checkpoint meta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Every transaction committed at or before this epoch is in the base
    /// files.
    pub epoch: EpochId,
    /// First WAL segment recovery must read.
    pub wal_segment: u64,
    /// Base files are still staged under `.next`.
    pub staged: bool,
    /// Total bytes of the three base files.
    pub base_bytes: u64,
}

/// Reads and writes checkpoints through a storage backend.
pub struct CheckpointStore {
    backend: Arc<dyn StorageBackend>,
}

impl CheckpointStore {
    /// Creates a checkpoint store over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// The backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Writes `image` as the checkpoint for `epoch`. Recovery will replay
    /// WAL segments from `wal_segment` on.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend fails. A failed write
    /// leaves the previous checkpoint in effect.
    pub fn write(&self, image: &StoreImage, epoch: EpochId, wal_segment: u64) -> Result<CheckpointMeta> {
        let files = [
            (NODES_KEY, seal(&image.nodes)?),
            (EDGES_KEY, seal(&image.edges)?),
            (ADJACENCY_KEY, seal(&image.adjacency)?),
        ];
        for (key, bytes) in &files {
            self.backend.put(staged_key(key).as_bytes(), bytes)?;
        }
        self.backend.flush()?;

        let mut meta = CheckpointMeta {
            epoch,
            wal_segment,
            staged: true,
            base_bytes: files.iter().map(|(_, b)| b.len() as u64).sum(),
        };
        self.write_meta(&meta)?;
        self.promote()?;
        meta.staged = false;
        self.write_meta(&meta)?;
        tracing::debug!(
            epoch = %epoch,
            wal_segment,
            bytes = meta.base_bytes,
            backend = self.backend.name(),
            "checkpoint written"
        );
        Ok(meta)
    }

    /// Reads the meta record, if a checkpoint exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageCorruption` if the record cannot be decoded.
    pub fn read_meta(&self) -> Result<Option<CheckpointMeta>> {
        self.backend
            .get(META_KEY.as_bytes())?
            .map(|bytes| unseal::<CheckpointMeta>(&bytes, META_KEY))
            .transpose()
    }

    /// Finishes or discards a checkpoint interrupted by a crash. Call
    /// before [`load`](Self::load) when the database is writable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn repair(&self) -> Result<()> {
        match self.read_meta()? {
            Some(mut meta) if meta.staged => {
                tracing::warn!(epoch = %meta.epoch, "finishing interrupted checkpoint");
                self.promote()?;
                meta.staged = false;
                self.write_meta(&meta)
            }
            _ => {
                for key in BASE_FILES {
                    if self.backend.delete(staged_key(key).as_bytes())? {
                        tracing::warn!(key, "removed staged file of an unfinished checkpoint");
                    }
                }
                self.backend.flush()
            }
        }
    }

    /// Loads the latest checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `StorageCorruption` if the meta record exists but a base
    /// file is missing, fails its checksum or cannot be decoded.
    pub fn load(&self) -> Result<Option<(CheckpointMeta, StoreImage)>> {
        let Some(meta) = self.read_meta()? else {
            return Ok(None);
        };
        let read = |key: &str| -> Result<bytes::Bytes> {
            let key = if meta.staged { staged_key(key) } else { key.to_string() };
            self.backend
                .get(key.as_bytes())?
                .ok_or_else(|| StorageError::Corruption(format!("checkpoint file {key} is missing")).into())
        };
        let nodes: NodeImage = unseal(&read(NODES_KEY)?, NODES_KEY)?;
        let edges: EdgeImage = unseal(&read(EDGES_KEY)?, EDGES_KEY)?;
        let adjacency: AdjacencyImage = unseal(&read(ADJACENCY_KEY)?, ADJACENCY_KEY)?;
        Ok(Some((
            meta,
            StoreImage {
                nodes,
                edges,
                adjacency,
            },
        )))
    }

    fn write_meta(&self, meta: &CheckpointMeta) -> Result<()> {
        self.backend.put(META_KEY.as_bytes(), &seal(meta)?)?;
        self.backend.flush()
    }

    fn promote(&self) -> Result<()> {
        for key in BASE_FILES {
            let staged = staged_key(key);
            if let Some(bytes) = self.backend.get(staged.as_bytes())? {
                self.backend.put(key.as_bytes(), &bytes)?;
                self.backend.delete(staged.as_bytes())?;
            }
        }
        self.backend.flush()
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

fn staged_key(key: &str) -> String {
    format!("{key}{STAGED_SUFFIX}")
}

/// `magic | version:u32 | crc32 | bincode payload`
fn seal<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::Serialization(e.to_string()))?;
    let mut out = vec![0; ENVELOPE];
    out[..4].copy_from_slice(MAGIC);
    LittleEndian::write_u32(&mut out[4..8], FORMAT_VERSION);
    LittleEndian::write_u32(&mut out[8..12], crc32fast::hash(&payload));
    out.extend_from_slice(&payload);
    Ok(out)
}

fn unseal<T: DeserializeOwned>(bytes: &[u8], key: &str) -> Result<T> {
    let corrupt = |what: String| -> Error { StorageError::Corruption(format!("{key}: {what}")).into() };
    if bytes.len() < ENVELOPE || &bytes[..4] != MAGIC {
        return Err(corrupt("not a checkpoint file".to_string()));
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let payload = &bytes[ENVELOPE..];
    if crc32fast::hash(payload) != LittleEndian::read_u32(&bytes[8..12]) {
        return Err(corrupt("checksum mismatch".to_string()));
    }
    bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DirectoryBackend, FileBackend, MemoryBackend};
    use quiver_common::mvcc::{Snapshot, WriteSet};
    use quiver_common::types::{PropertyKey, TxId, Value};
    use quiver_core::graph::lpg::LpgStore;
    use tempfile::tempdir;

    fn sample_image() -> StoreImage {
        let store = LpgStore::new();
        let snap = Snapshot::new(EpochId::new(0), TxId::new(1));
        let mut ws = WriteSet::new();
        let a = store
            .create_node(&snap, &mut ws, &["Person"], vec![(PropertyKey::new("age"), Value::Int64(30))])
            .unwrap();
        let b = store.create_node(&snap, &mut ws, &["Person"], vec![]).unwrap();
        store.create_edge(&snap, &mut ws, a, b, "KNOWS", vec![]).unwrap();
        store.commit(TxId::new(1), EpochId::new(1), &ws);
        store.image(&Snapshot::committed(EpochId::new(1)))
    }

    #[test]
    fn test_write_and_load() {
        let store = CheckpointStore::new(Arc::new(MemoryBackend::new()));
        assert!(store.load().unwrap().is_none());
        let image = sample_image();
        store.write(&image, EpochId::new(1), 3).unwrap();

        let (meta, loaded) = store.load().unwrap().unwrap();
        assert_eq!(meta.epoch, EpochId::new(1));
        assert_eq!(meta.wal_segment, 3);
        assert!(!meta.staged);
        assert_eq!(loaded, image);
    }

    #[test]
    fn test_directory_layout() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(DirectoryBackend::open(dir.path()).unwrap());
        CheckpointStore::new(backend)
            .write(&sample_image(), EpochId::new(1), 0)
            .unwrap();
        for file in ["base/nodes.bin", "base/edges.bin", "base/adjacency.bin", "checkpoint.meta"] {
            assert!(dir.path().join(file).exists(), "{file}");
        }
        assert!(!dir.path().join("base/nodes.bin.next").exists());
    }

    #[test]
    fn test_interrupted_promotion_is_finished() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let store = CheckpointStore::new(Arc::clone(&backend));
        let image = sample_image();
        for (key, bytes) in [
            (NODES_KEY, seal(&image.nodes).unwrap()),
            (EDGES_KEY, seal(&image.edges).unwrap()),
            (ADJACENCY_KEY, seal(&image.adjacency).unwrap()),
        ] {
            backend.put(staged_key(key).as_bytes(), &bytes).unwrap();
        }
        let meta = CheckpointMeta {
            epoch: EpochId::new(1),
            wal_segment: 0,
            staged: true,
            base_bytes: 0,
        };
        store.write_meta(&meta).unwrap();

        // Readable before repair, from the staged files.
        assert_eq!(store.load().unwrap().unwrap().1, image);
        store.repair().unwrap();
        assert!(!store.read_meta().unwrap().unwrap().staged);
        assert!(backend.get(NODES_KEY.as_bytes()).unwrap().is_some());
        assert_eq!(store.load().unwrap().unwrap().1, image);
    }

    #[test]
    fn test_leftover_staged_files_are_removed() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let store = CheckpointStore::new(Arc::clone(&backend));
        backend.put(staged_key(NODES_KEY).as_bytes(), b"partial").unwrap();
        store.repair().unwrap();
        assert!(backend.get(staged_key(NODES_KEY).as_bytes()).unwrap().is_none());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_damaged_base_file_is_corruption() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::open(dir.path().join("ckpt.kv")).unwrap());
        let store = CheckpointStore::new(Arc::clone(&backend));
        store.write(&sample_image(), EpochId::new(1), 0).unwrap();

        let mut bytes = backend.get(EDGES_KEY.as_bytes()).unwrap().unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        backend.put(EDGES_KEY.as_bytes(), &bytes).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.is_corruption());
    }
}
