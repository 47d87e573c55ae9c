//! The storage backend capability set.

mod directory;
mod file;
mod memory;

pub use directory::DirectoryBackend;
pub use file::FileBackend;
pub use memory::MemoryBackend;

use bytes::Bytes;
use quiver_common::utils::error::Result;

/// A byte-oriented key/value store.
///
/// Keys are compared bytewise; [`scan`](Self::scan) returns entries in key
/// order. After [`close`](Self::close) every call fails.
pub trait StorageBackend: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Writes a value, replacing any previous one.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Deletes a key. Returns true if it existed.
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Makes every completed write durable.
    fn flush(&self) -> Result<()>;

    /// Flushes and releases the backend.
    fn close(&self) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

pub(crate) fn closed_error(backend: &str) -> quiver_common::utils::error::Error {
    quiver_common::utils::error::StorageError::Backend(format!("{backend} backend is closed")).into()
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every backend must share.

    use super::StorageBackend;

    pub fn check(backend: &dyn StorageBackend) {
        backend.put(b"node/2", b"bob").unwrap();
        backend.put(b"node/1", b"alice").unwrap();
        backend.put(b"edge/1", b"knows").unwrap();
        assert_eq!(backend.get(b"node/1").unwrap().as_deref(), Some(&b"alice"[..]));
        assert_eq!(backend.get(b"missing").unwrap(), None);

        backend.put(b"node/1", b"alicia").unwrap();
        assert_eq!(backend.get(b"node/1").unwrap().as_deref(), Some(&b"alicia"[..]));

        let nodes = backend.scan(b"node/").unwrap();
        let keys: Vec<&[u8]> = nodes.iter().map(|(k, _)| k.as_ref()).collect();
        assert_eq!(keys, vec![&b"node/1"[..], &b"node/2"[..]]);

        assert!(backend.delete(b"node/2").unwrap());
        assert!(!backend.delete(b"node/2").unwrap());
        assert_eq!(backend.scan(b"node/").unwrap().len(), 1);

        backend.flush().unwrap();
        backend.close().unwrap();
        assert!(backend.get(b"node/1").is_err());
    }
}
