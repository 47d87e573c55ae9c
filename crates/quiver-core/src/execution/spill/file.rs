//! Spill files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use quiver_common::utils::error::{Error, Result};
use tempfile::NamedTempFile;

use super::SpillManager;
use crate::execution::vector::Cell;

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// An append-only file of rows. Each row is one bincode-encoded
/// `Vec<Cell>`; the file is removed when the handle is dropped.
pub struct SpillFile {
    file: NamedTempFile,
    writer: Option<BufWriter<File>>,
    rows: usize,
    bytes: u64,
}

impl SpillFile {
    pub(super) fn new(file: NamedTempFile) -> Self {
        Self {
            file,
            writer: None,
            rows: 0,
            bytes: 0,
        }
    }

    /// Path of the file on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Rows written so far.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Appends a row.
    pub fn write_row(&mut self, row: &[Cell]) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(BufWriter::new(self.file.reopen()?));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Internal("spill writer missing".to_string()));
        };
        let written = bincode::serde::encode_into_std_write(row, writer, config())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.rows += 1;
        self.bytes += written as u64;
        Ok(())
    }

    /// Flushes pending writes and reports the bytes to `manager`.
    pub fn finish(&mut self, manager: &SpillManager) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            manager.record_bytes(self.bytes);
        }
        Ok(())
    }

    /// Reads the rows back in write order. Call [`finish`](Self::finish)
    /// first.
    pub fn reader(&self) -> Result<SpillReader> {
        Ok(SpillReader {
            reader: BufReader::new(self.file.reopen()?),
            remaining: self.rows,
        })
    }
}

/// Iterates the rows of a [`SpillFile`].
pub struct SpillReader {
    reader: BufReader<File>,
    remaining: usize,
}

impl Iterator for SpillReader {
    type Item = Result<Vec<Cell>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(
            bincode::serde::decode_from_std_read(&mut self.reader, config())
                .map_err(|e| Error::Serialization(e.to_string())),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::types::{NodeId, Value};

    #[test]
    fn test_rows_read_back_in_order() {
        let manager = SpillManager::temporary().unwrap();
        let mut file = manager.create_file("test").unwrap();
        for i in 0..100 {
            file.write_row(&[Cell::Node(NodeId::new(i)), Cell::Value(Value::from(format!("row{i}")))])
                .unwrap();
        }
        file.finish(&manager).unwrap();
        assert!(manager.bytes_written() > 0);

        let rows: Vec<Vec<Cell>> = file.reader().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 100);
        assert_eq!(rows[42][0], Cell::Node(NodeId::new(42)));
        assert_eq!(rows[99][1], Cell::Value(Value::from("row99")));
    }
}
