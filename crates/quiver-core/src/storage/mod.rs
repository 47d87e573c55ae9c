//! Columnar encodings for property storage.
//!
//! - [`bitvec`] - Bit vectors for booleans and validity masks
//! - [`bitpack`] - Bit-packing and delta bit-packing for integers
//! - [`dictionary`] - Dictionary encoding for low-cardinality strings
//! - [`codec`] - Sample-based codec selection and block encoding
//! - [`column`] - Immutable compressed blocks with zone maps
//!
//! # Compression Strategies
//!
//! | Data Type | Typical Codec |
//! |-----------|---------------|
//! | Sorted integers, timestamps | DeltaBitPacked |
//! | Small-range integers, dates | BitPacked |
//! | Low-cardinality strings | Dictionary |
//! | Booleans | BitVector |
//!
//! ```
//! use quiver_common::types::Value;
//! use quiver_core::storage::ColumnBlock;
//!
//! let values: Vec<Value> = (0..1000).map(|i| Value::Int64(1_000 + i)).collect();
//! let block = ColumnBlock::encode(&values);
//! assert_eq!(block.get(10), Value::Int64(1_010));
//! assert!(block.size_bytes() < 1000 * 8);
//! ```

pub mod bitpack;
pub mod bitvec;
pub mod codec;
pub mod column;
pub mod dictionary;

pub use bitpack::{BitPackedInts, DeltaBitPacked};
pub use bitvec::BitVector;
pub use codec::{CodecSelector, CompressionCodec, EncodedValues, IntKind};
pub use column::{BLOCK_SIZE, ColumnBlock};
pub use dictionary::{DictionaryBuilder, DictionaryEncoding};
