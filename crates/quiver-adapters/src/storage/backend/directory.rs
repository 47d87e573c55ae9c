//! One file per key under a root directory.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use quiver_common::utils::error::{Error, Result};

use super::{StorageBackend, closed_error};

const TMP_SUFFIX: &str = ".tmp";

/// A backend that stores each key as a file named by the key, relative to
/// a root directory (`base/nodes.bin`). Every `put` writes a temp file,
/// fsyncs it and renames it into place, so a reader sees either the old or
/// the new content.
#[derive(Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
    closed: AtomicBool,
}

impl DirectoryBackend {
    /// Opens (creating if needed) the directory at `root`. Leftover temp
    /// files from an interrupted `put` are removed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or read.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let backend = Self {
            root,
            closed: AtomicBool::new(false),
        };
        let mut files = Vec::new();
        backend.walk(&backend.root, &mut files)?;
        for path in files {
            if path.to_string_lossy().ends_with(TMP_SUFFIX) {
                tracing::debug!(path = %path.display(), "removing interrupted write");
                fs::remove_file(&path)?;
            }
        }
        Ok(backend)
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &[u8]) -> Result<PathBuf> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error("directory"));
        }
        let key = std::str::from_utf8(key)
            .map_err(|_| Error::InvalidValue("directory backend keys must be UTF-8".to_string()))?;
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with(TMP_SUFFIX)
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::InvalidValue(format!("invalid directory backend key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl StorageBackend for DirectoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error("directory"));
        }
        let mut files = Vec::new();
        self.walk(&self.root, &mut files)?;
        let mut out = Vec::new();
        for path in files {
            let Some(key) = self.key_of(&path) else {
                continue;
            };
            if key.ends_with(TMP_SUFFIX) || !key.as_bytes().starts_with(prefix) {
                continue;
            }
            out.push((Bytes::from(key.into_bytes()), Bytes::from(fs::read(&path)?)));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error("directory"));
        }
        // Persist renames on platforms that allow syncing a directory.
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.flush()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_directory_backend_conformance() {
        let dir = tempdir().unwrap();
        let backend = DirectoryBackend::open(dir.path()).unwrap();
        super::super::conformance::check(&backend);
    }

    #[test]
    fn test_nested_keys_and_leftover_temp_files() {
        let dir = tempdir().unwrap();
        {
            let backend = DirectoryBackend::open(dir.path()).unwrap();
            backend.put(b"base/nodes.bin", b"nodes").unwrap();
            assert!(dir.path().join("base").join("nodes.bin").exists());
        }
        fs::write(dir.path().join("base").join("edges.bin.tmp"), b"partial").unwrap();

        let backend = DirectoryBackend::open(dir.path()).unwrap();
        assert!(!dir.path().join("base").join("edges.bin.tmp").exists());
        let keys: Vec<_> = backend.scan(b"base/").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Bytes::from_static(b"base/nodes.bin")]);
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let backend = DirectoryBackend::open(dir.path()).unwrap();
        assert!(backend.put(b"../outside", b"x").is_err());
        assert!(backend.put(b"/abs", b"x").is_err());
    }
}
