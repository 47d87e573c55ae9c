//! Log-structured single-file backend.
//!
//! Every `put` and `delete` appends a frame to the file:
//!
//! ```text
//! op:u8 | key_len:u32 | value_len:u32 | key | value | crc32
//! ```
//!
//! Opening reads the file back and replays the frames into a sorted map.
//! [`flush`](StorageBackend::flush) rewrites the file with only the live
//! entries once dead frames have accumulated.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use bytes::Bytes;
use parking_lot::RwLock;
use quiver_common::utils::error::{Error, Result, StorageError};

use super::{StorageBackend, closed_error};

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const HEADER: usize = 9;

struct Inner {
    map: BTreeMap<Bytes, Bytes>,
    writer: Option<BufWriter<File>>,
    dead_frames: usize,
}

/// A key/value file that survives restarts.
pub struct FileBackend {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl FileBackend {
    /// Opens or creates the file at `path` and loads its live entries.
    ///
    /// A frame cut short at the end of the file (a write interrupted by a
    /// crash) is dropped and the file truncated before it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, or `StorageCorruption` if a complete frame
    /// fails its checksum.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let (map, dead_frames, valid_len) = Self::load(&file, &path)?;
        if valid_len < file.metadata()?.len() {
            tracing::warn!(path = %path.display(), valid_len, "dropping torn tail of backend file");
            file.set_len(valid_len)?;
        }
        Ok(Self {
            path,
            inner: RwLock::new(Inner {
                map,
                writer: Some(BufWriter::new(file)),
                dead_frames,
            }),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(file: &File, path: &Path) -> Result<(BTreeMap<Bytes, Bytes>, usize, u64)> {
        let mut map = BTreeMap::new();
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok((map, 0, 0));
        }
        let mut buf = Vec::with_capacity(len as usize);
        BufReader::new(file).read_to_end(&mut buf)?;
        let data: &[u8] = &buf;
        let mut pos = 0;
        let mut frames = 0;
        while pos + HEADER <= data.len() {
            let op = data[pos];
            let key_len = LittleEndian::read_u32(&data[pos + 1..]) as usize;
            let value_len = LittleEndian::read_u32(&data[pos + 5..]) as usize;
            let end = pos + HEADER + key_len + value_len;
            if end + 4 > data.len() {
                break;
            }
            let stored = LittleEndian::read_u32(&data[end..]);
            if crc32fast::hash(&data[pos..end]) != stored {
                return Err(StorageError::Corruption(format!(
                    "checksum mismatch in {} at offset {pos}",
                    path.display()
                ))
                .into());
            }
            let key = Bytes::copy_from_slice(&data[pos + HEADER..pos + HEADER + key_len]);
            match op {
                OP_PUT => {
                    let value = Bytes::copy_from_slice(&data[pos + HEADER + key_len..end]);
                    map.insert(key, value);
                }
                OP_DELETE => {
                    map.remove(&key);
                }
                other => {
                    return Err(StorageError::Corruption(format!(
                        "unknown frame op {other} in {} at offset {pos}",
                        path.display()
                    ))
                    .into());
                }
            }
            frames += 1;
            pos = end + 4;
        }
        let dead = frames - map.len();
        Ok((map, dead, pos as u64))
    }

    fn write_frame(writer: &mut BufWriter<File>, op: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(HEADER + key.len() + value.len() + 4);
        frame.push(op);
        frame.write_u32::<LittleEndian>(key.len() as u32)?;
        frame.write_u32::<LittleEndian>(value.len() as u32)?;
        frame.extend_from_slice(key);
        frame.extend_from_slice(value);
        let crc = crc32fast::hash(&frame);
        frame.write_u32::<LittleEndian>(crc)?;
        writer.write_all(&frame)?;
        Ok(())
    }

    /// Rewrites the file with only live entries through a temp file and an
    /// atomic rename.
    fn compact(&self, inner: &mut Inner) -> Result<()> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for (key, value) in &inner.map {
                Self::write_frame(&mut out, OP_PUT, key, value)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        inner.writer = None;
        std::fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        inner.writer = Some(BufWriter::new(file));
        tracing::debug!(path = %self.path.display(), dropped = inner.dead_frames, "compacted backend file");
        inner.dead_frames = 0;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let inner = self.inner.read();
        if inner.writer.is_none() {
            return Err(closed_error("file"));
        }
        Ok(inner.map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        let writer = inner.writer.as_mut().ok_or_else(|| closed_error("file"))?;
        Self::write_frame(writer, OP_PUT, key, value)?;
        let old = inner
            .map
            .insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        if old.is_some() {
            inner.dead_frames += 1;
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut inner = self.inner.write();
        if !inner.map.contains_key(key) {
            return if inner.writer.is_some() { Ok(false) } else { Err(closed_error("file")) };
        }
        let writer = inner.writer.as_mut().ok_or_else(|| closed_error("file"))?;
        Self::write_frame(writer, OP_DELETE, key, &[])?;
        inner.map.remove(key);
        inner.dead_frames += 2;
        Ok(true)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let inner = self.inner.read();
        if inner.writer.is_none() {
            return Err(closed_error("file"));
        }
        Ok(inner
            .map
            .range::<[u8], _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let writer = inner.writer.as_mut().ok_or_else(|| closed_error("file"))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        if inner.dead_frames > 0 && inner.dead_frames >= inner.map.len() {
            self.compact(&mut inner)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(mut writer) = inner.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all().map_err(Error::from)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("keys", &self.inner.read().map.len())
            .finish()
    }
}
