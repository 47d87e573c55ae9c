//! Compressed, immutable column blocks.

use quiver_common::types::{LogicalType, Value};
use serde::{Deserialize, Serialize};

use super::codec::{CompressionCodec, EncodedValues};
use crate::index::zone_map::{CompareOp, ZoneMapEntry};

/// Rows per base block.
pub const BLOCK_SIZE: usize = 1024;

/// A codec-compressed block of up to [`BLOCK_SIZE`] values plus its zone map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBlock {
    values: EncodedValues,
    codec: CompressionCodec,
    zone_map: ZoneMapEntry,
}

impl ColumnBlock {
    /// Encodes a block, choosing the codec from the data.
    #[must_use]
    pub fn encode(values: &[Value]) -> Self {
        let (encoded, codec) = EncodedValues::encode(values);
        Self {
            values: encoded,
            codec,
            zone_map: ZoneMapEntry::build(values),
        }
    }

    /// Returns the value in row `offset`.
    #[inline]
    #[must_use]
    pub fn get(&self, offset: usize) -> Value {
        self.values.get(offset)
    }

    /// Decodes every row.
    #[must_use]
    pub fn decode(&self) -> Vec<Value> {
        self.values.decode()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the block has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Codec chosen for this block.
    #[must_use]
    pub fn codec(&self) -> CompressionCodec {
        self.codec
    }

    /// Zone map of this block.
    #[must_use]
    pub fn zone_map(&self) -> &ZoneMapEntry {
        &self.zone_map
    }

    /// Returns false only if no row can satisfy `x <op> value`.
    #[must_use]
    pub fn might_match(&self, op: CompareOp, value: &Value) -> bool {
        self.zone_map.might_match(op, value)
    }

    /// Type of the stored values.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        self.values.logical_type()
    }

    /// Compressed size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.values.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_compresses_and_prunes() {
        let values: Vec<Value> = (0..BLOCK_SIZE as i64).map(|i| Value::Int64(i % 50)).collect();
        let block = ColumnBlock::encode(&values);
        assert!(matches!(block.codec(), CompressionCodec::BitPacked { bits: 6 }));
        assert_eq!(block.get(123), Value::Int64(23));
        assert!(block.size_bytes() * 8 < BLOCK_SIZE * 8);
        assert!(!block.might_match(CompareOp::Gt, &Value::Int64(49)));
        assert_eq!(block.decode(), values);
    }
}
