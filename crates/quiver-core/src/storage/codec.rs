//! Codec selection and block value encoding.
//!
//! Every base block of a property column is encoded with the codec that the
//! [`CodecSelector`] estimates to be smallest on a sample of the block.
//!
//! | Codec | Used for |
//! |-------|----------|
//! | BitVector | Booleans |
//! | BitPacked | Integers, dates and timestamps (frame of reference) |
//! | DeltaBitPacked | Non-decreasing integers |
//! | Dictionary | Integers or strings with few distinct values |
//! | None | Floats, lists, maps, mixed blocks |
//!
//! When two codecs are estimated equally small the one that is cheaper to
//! decode wins: BitVector and BitPacked, then DeltaBitPacked, then
//! Dictionary, then None.

use std::sync::Arc;

use quiver_common::types::{Date, LogicalType, Timestamp, Value};
use quiver_common::utils::hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::bitpack::{BitPackedInts, DeltaBitPacked};
use super::bitvec::BitVector;
use super::dictionary::{DictionaryBuilder, DictionaryEncoding};

/// Compression codec identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionCodec {
    /// Raw values.
    None,
    /// Bit packing against the block minimum.
    BitPacked {
        /// Bits per value.
        bits: u8,
    },
    /// Bit-packed gaps of a sorted sequence.
    DeltaBitPacked {
        /// Bits per gap.
        bits: u8,
    },
    /// Distinct values plus packed codes.
    Dictionary,
    /// One bit per boolean.
    BitVector,
}

impl CompressionCodec {
    /// Returns a human-readable name for the codec.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::BitPacked { .. } => "BitPacked",
            Self::DeltaBitPacked { .. } => "DeltaBitPacked",
            Self::Dictionary => "Dictionary",
            Self::BitVector => "BitVector",
        }
    }

    /// Relative decode cost, lower is cheaper.
    #[must_use]
    pub const fn decode_rank(&self) -> u8 {
        match self {
            Self::BitVector | Self::BitPacked { .. } => 0,
            Self::DeltaBitPacked { .. } => 1,
            Self::Dictionary => 2,
            Self::None => 3,
        }
    }
}

/// Picks a codec from a sample of the data.
pub struct CodecSelector;

impl CodecSelector {
    /// Number of leading values inspected.
    pub const SAMPLE_SIZE: usize = 256;

    /// Selects the codec for integer-like values (`i64`, days, micros).
    #[must_use]
    pub fn select_for_integers(values: &[i64]) -> CompressionCodec {
        let sample = &values[..values.len().min(Self::SAMPLE_SIZE)];
        if sample.len() < 8 {
            return CompressionCodec::None;
        }
        let n = sample.len();
        let min = sample.iter().copied().min().unwrap_or(0);
        let max = sample.iter().copied().max().unwrap_or(0);
        let range_bits = BitPackedInts::bits_needed(max.wrapping_sub(min) as u64);

        let mut candidates = vec![
            (CompressionCodec::None, n * 8),
            (
                CompressionCodec::BitPacked { bits: range_bits },
                8 + BitPackedInts::estimate_bytes(n, range_bits),
            ),
        ];
        if sample.windows(2).all(|w| w[0] <= w[1]) {
            let max_gap = sample
                .windows(2)
                .map(|w| w[1].wrapping_sub(w[0]) as u64)
                .max()
                .unwrap_or(0);
            let bits = BitPackedInts::bits_needed(max_gap);
            candidates.push((
                CompressionCodec::DeltaBitPacked { bits },
                8 + BitPackedInts::estimate_bytes(n, bits),
            ));
        }
        let distinct: FxHashSet<i64> = sample.iter().copied().collect();
        let code_bits = BitPackedInts::bits_needed(distinct.len().saturating_sub(1) as u64);
        candidates.push((
            CompressionCodec::Dictionary,
            distinct.len() * 8 + BitPackedInts::estimate_bytes(n, code_bits),
        ));
        Self::cheapest(candidates)
    }

    /// Selects the codec for strings.
    #[must_use]
    pub fn select_for_strings(values: &[&str]) -> CompressionCodec {
        let sample = &values[..values.len().min(Self::SAMPLE_SIZE)];
        if sample.len() < 4 {
            return CompressionCodec::None;
        }
        let raw: usize = sample.iter().map(|s| s.len() + 16).sum();
        let distinct: FxHashSet<&str> = sample.iter().copied().collect();
        let code_bits = BitPackedInts::bits_needed(distinct.len().saturating_sub(1) as u64);
        let dict = distinct.iter().map(|s| s.len() + 16).sum::<usize>()
            + BitPackedInts::estimate_bytes(sample.len(), code_bits);
        Self::cheapest(vec![
            (CompressionCodec::None, raw),
            (CompressionCodec::Dictionary, dict),
        ])
    }

    /// Selects the codec for booleans.
    #[must_use]
    pub fn select_for_booleans(_values: &[bool]) -> CompressionCodec {
        CompressionCodec::BitVector
    }

    fn cheapest(candidates: Vec<(CompressionCodec, usize)>) -> CompressionCodec {
        candidates
            .into_iter()
            .min_by_key(|(codec, size)| (*size, codec.decode_rank()))
            .map_or(CompressionCodec::None, |(codec, _)| codec)
    }
}

/// How integer codes map back to values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntKind {
    /// Plain `Int64`.
    Int64,
    /// Days since epoch.
    Date,
    /// Microseconds since epoch.
    DateTime,
}

impl IntKind {
    fn of(value: &Value) -> Option<(Self, i64)> {
        match value {
            Value::Int64(v) => Some((Self::Int64, *v)),
            Value::Date(d) => Some((Self::Date, i64::from(d.as_days()))),
            Value::DateTime(t) => Some((Self::DateTime, t.as_micros())),
            _ => None,
        }
    }

    fn to_value(self, raw: i64) -> Value {
        match self {
            Self::Int64 => Value::Int64(raw),
            Self::Date => Value::Date(Date::from_days(raw as i32)),
            Self::DateTime => Value::DateTime(Timestamp::from_micros(raw)),
        }
    }

    fn logical_type(self) -> LogicalType {
        match self {
            Self::Int64 => LogicalType::Int64,
            Self::Date => LogicalType::Date,
            Self::DateTime => LogicalType::DateTime,
        }
    }
}

/// The encoded payload of one block.
///
/// Null rows are marked in `validity` (absent when every row is valid) and
/// hold the previous row's value in the payload so sorted runs stay sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodedValues {
    /// Uncompressed values.
    Raw(Vec<Value>),
    /// Booleans.
    Bool {
        /// One bit per row.
        bits: BitVector,
        /// Non-null rows.
        validity: Option<BitVector>,
    },
    /// Integers packed against a frame of reference.
    Int {
        /// How to rebuild values.
        kind: IntKind,
        /// Block minimum.
        frame: i64,
        /// `value - frame` per row.
        packed: BitPackedInts,
        /// Non-null rows.
        validity: Option<BitVector>,
    },
    /// Non-decreasing integers stored as gaps.
    SortedInt {
        /// How to rebuild values.
        kind: IntKind,
        /// Block minimum.
        frame: i64,
        /// `value - frame` per row, delta-encoded.
        deltas: DeltaBitPacked,
        /// Non-null rows.
        validity: Option<BitVector>,
    },
    /// Dictionary-coded strings.
    Dict {
        /// Dictionary and codes.
        dict: DictionaryEncoding,
        /// Non-null rows.
        validity: Option<BitVector>,
    },
    /// Dictionary-coded integers.
    IntDict {
        /// How to rebuild values.
        kind: IntKind,
        /// Distinct values in code order.
        dictionary: Vec<i64>,
        /// Per-row codes.
        codes: BitPackedInts,
        /// Non-null rows.
        validity: Option<BitVector>,
    },
}

impl EncodedValues {
    /// Encodes a block, returning the payload and the codec used.
    #[must_use]
    pub fn encode(values: &[Value]) -> (Self, CompressionCodec) {
        let validity = validity_of(values);
        let non_null = values.iter().find(|v| !v.is_null());

        match non_null {
            Some(Value::Bool(_)) if values.iter().all(|v| v.is_null() || v.as_bool().is_some()) => {
                let bools: Vec<bool> = fill_forward(values, false, Value::as_bool);
                let codec = CodecSelector::select_for_booleans(&bools);
                (
                    Self::Bool {
                        bits: BitVector::from_bools(&bools),
                        validity,
                    },
                    codec,
                )
            }
            Some(first) if IntKind::of(first).is_some() => {
                let Some((kind, _)) = IntKind::of(first) else {
                    return raw(values);
                };
                let same_kind = values
                    .iter()
                    .all(|v| v.is_null() || IntKind::of(v).is_some_and(|(k, _)| k == kind));
                if !same_kind {
                    return raw(values);
                }
                let ints = fill_forward(values, 0, |v| IntKind::of(v).map(|(_, raw)| raw));
                Self::encode_ints(values, kind, &ints, validity)
            }
            Some(Value::String(_)) if values.iter().all(|v| v.is_null() || v.as_str().is_some()) => {
                let empty: Arc<str> = Arc::from("");
                let strings: Vec<Arc<str>> = fill_forward(values, empty, |v| match v {
                    Value::String(s) => Some(Arc::clone(s)),
                    _ => None,
                });
                let refs: Vec<&str> = strings.iter().map(AsRef::as_ref).collect();
                match CodecSelector::select_for_strings(&refs) {
                    CompressionCodec::Dictionary => {
                        let mut builder = DictionaryBuilder::new();
                        for s in &strings {
                            builder.push(s);
                        }
                        (
                            Self::Dict {
                                dict: builder.build(),
                                validity,
                            },
                            CompressionCodec::Dictionary,
                        )
                    }
                    _ => raw(values),
                }
            }
            _ => raw(values),
        }
    }

    fn encode_ints(
        values: &[Value],
        kind: IntKind,
        ints: &[i64],
        validity: Option<BitVector>,
    ) -> (Self, CompressionCodec) {
        let frame = ints.iter().copied().min().unwrap_or(0);
        let offsets: Vec<u64> = ints.iter().map(|&v| v.wrapping_sub(frame) as u64).collect();

        match CodecSelector::select_for_integers(ints) {
            CompressionCodec::DeltaBitPacked { .. } => {
                // The sample was sorted; the whole block may not be.
                if let Some(deltas) = DeltaBitPacked::encode(&offsets) {
                    let bits = deltas.bits();
                    return (
                        Self::SortedInt {
                            kind,
                            frame,
                            deltas,
                            validity,
                        },
                        CompressionCodec::DeltaBitPacked { bits },
                    );
                }
                Self::pack_ints(kind, frame, &offsets, validity)
            }
            CompressionCodec::BitPacked { .. } => Self::pack_ints(kind, frame, &offsets, validity),
            CompressionCodec::Dictionary => {
                let mut dictionary: Vec<i64> = Vec::new();
                let mut lookup = FxHashMap::default();
                let codes: Vec<u64> = ints
                    .iter()
                    .map(|&v| {
                        *lookup.entry(v).or_insert_with(|| {
                            dictionary.push(v);
                            (dictionary.len() - 1) as u64
                        })
                    })
                    .collect();
                (
                    Self::IntDict {
                        kind,
                        dictionary,
                        codes: BitPackedInts::pack(&codes),
                        validity,
                    },
                    CompressionCodec::Dictionary,
                )
            }
            _ => raw(values),
        }
    }

    fn pack_ints(
        kind: IntKind,
        frame: i64,
        offsets: &[u64],
        validity: Option<BitVector>,
    ) -> (Self, CompressionCodec) {
        let packed = BitPackedInts::pack(offsets);
        let bits = packed.bits();
        (
            Self::Int {
                kind,
                frame,
                packed,
                validity,
            },
            CompressionCodec::BitPacked { bits },
        )
    }

    /// Returns the value at row `index`; out-of-range rows read as null.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        if !self.is_valid(index) {
            return Value::Null;
        }
        match self {
            Self::Raw(values) => values.get(index).cloned().unwrap_or(Value::Null),
            Self::Bool { bits, .. } => bits.get(index).map_or(Value::Null, Value::Bool),
            Self::Int {
                kind, frame, packed, ..
            } => packed
                .get(index)
                .map_or(Value::Null, |off| kind.to_value(frame.wrapping_add(off as i64))),
            Self::SortedInt {
                kind, frame, deltas, ..
            } => deltas
                .get(index)
                .map_or(Value::Null, |off| kind.to_value(frame.wrapping_add(off as i64))),
            Self::Dict { dict, .. } => dict
                .get(index)
                .map_or(Value::Null, |s| Value::String(Arc::clone(s))),
            Self::IntDict {
                kind,
                dictionary,
                codes,
                ..
            } => codes
                .get(index)
                .and_then(|c| dictionary.get(c as usize))
                .map_or(Value::Null, |&v| kind.to_value(v)),
        }
    }

    /// Decodes every row.
    #[must_use]
    pub fn decode(&self) -> Vec<Value> {
        match self {
            Self::SortedInt {
                kind,
                frame,
                deltas,
                validity,
            } => deltas
                .decode()
                .into_iter()
                .enumerate()
                .map(|(i, off)| {
                    if validity.as_ref().is_some_and(|v| v.get(i) == Some(false)) {
                        Value::Null
                    } else {
                        kind.to_value(frame.wrapping_add(off as i64))
                    }
                })
                .collect(),
            _ => (0..self.len()).map(|i| self.get(i)).collect(),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Raw(values) => values.len(),
            Self::Bool { bits, .. } => bits.len(),
            Self::Int { packed, .. } => packed.len(),
            Self::SortedInt { deltas, .. } => deltas.len(),
            Self::Dict { dict, .. } => dict.len(),
            Self::IntDict { codes, .. } => codes.len(),
        }
    }

    /// Returns true if the block has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The type of the non-null values, `Any` for raw blocks.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::Raw(_) => LogicalType::Any,
            Self::Bool { .. } => LogicalType::Bool,
            Self::Int { kind, .. } | Self::SortedInt { kind, .. } | Self::IntDict { kind, .. } => {
                kind.logical_type()
            }
            Self::Dict { .. } => LogicalType::String,
        }
    }

    /// Approximate bytes used by the payload.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        let validity_bytes = |v: &Option<BitVector>| v.as_ref().map_or(0, BitVector::size_bytes);
        match self {
            Self::Raw(values) => values.iter().map(Value::estimated_size).sum(),
            Self::Bool { bits, validity } => bits.size_bytes() + validity_bytes(validity),
            Self::Int {
                packed, validity, ..
            } => 8 + packed.size_bytes() + validity_bytes(validity),
            Self::SortedInt {
                deltas, validity, ..
            } => 8 + deltas.size_bytes() + validity_bytes(validity),
            Self::Dict { dict, validity } => dict.size_bytes() + validity_bytes(validity),
            Self::IntDict {
                dictionary,
                codes,
                validity,
                ..
            } => dictionary.len() * 8 + codes.size_bytes() + validity_bytes(validity),
        }
    }

    fn is_valid(&self, index: usize) -> bool {
        let validity = match self {
            Self::Raw(_) => return true,
            Self::Bool { validity, .. }
            | Self::Int { validity, .. }
            | Self::SortedInt { validity, .. }
            | Self::Dict { validity, .. }
            | Self::IntDict { validity, .. } => validity,
        };
        validity.as_ref().is_none_or(|v| v.get(index).unwrap_or(false))
    }
}

fn raw(values: &[Value]) -> (EncodedValues, CompressionCodec) {
    (EncodedValues::Raw(values.to_vec()), CompressionCodec::None)
}

fn validity_of(values: &[Value]) -> Option<BitVector> {
    if values.iter().any(Value::is_null) {
        Some(BitVector::from_bools(
            &values.iter().map(|v| !v.is_null()).collect::<Vec<_>>(),
        ))
    } else {
        None
    }
}

/// Extracts a payload per row, repeating the previous payload for nulls.
/// Leading nulls take the first non-null payload.
fn fill_forward<T: Clone>(
    values: &[Value],
    default: T,
    extract: impl Fn(&Value) -> Option<T>,
) -> Vec<T> {
    let first = values.iter().find_map(&extract).unwrap_or(default);
    let mut last = first;
    values
        .iter()
        .map(|v| {
            if let Some(x) = extract(v) {
                last = x;
            }
            last.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_ints_pick_delta() {
        let values: Vec<i64> = (0..1024).map(|i| 1_000_000 + i * 2).collect();
        assert_eq!(
            CodecSelector::select_for_integers(&values),
            CompressionCodec::DeltaBitPacked { bits: 2 }
        );
    }

    #[test]
    fn test_small_range_picks_bitpacked() {
        let values: Vec<i64> = (0..512).map(|i| 20 + (i * 7919) % 60).collect();
        assert!(matches!(
            CodecSelector::select_for_integers(&values),
            CompressionCodec::BitPacked { .. }
        ));
    }

    #[test]
    fn test_tiny_input_stays_raw() {
        assert_eq!(CodecSelector::select_for_integers(&[1, 2, 3]), CompressionCodec::None);
        assert_eq!(CodecSelector::select_for_strings(&["a"]), CompressionCodec::None);
    }

    #[test]
    fn test_low_cardinality_strings_pick_dictionary() {
        let values: Vec<&str> = (0..300).map(|i| ["red", "green", "blue"][i % 3]).collect();
        assert_eq!(CodecSelector::select_for_strings(&values), CompressionCodec::Dictionary);
        let unique: Vec<String> = (0..300).map(|i| format!("user-{i}")).collect();
        let refs: Vec<&str> = unique.iter().map(String::as_str).collect();
        assert_eq!(CodecSelector::select_for_strings(&refs), CompressionCodec::None);
    }

    #[test]
    fn test_block_with_nulls_decodes_exactly() {
        let mut values: Vec<Value> = (0..100).map(|i| Value::Int64(i * 3)).collect();
        values[0] = Value::Null;
        values[50] = Value::Null;
        let (encoded, codec) = EncodedValues::encode(&values);
        assert!(matches!(codec, CompressionCodec::DeltaBitPacked { .. }));
        assert_eq!(encoded.decode(), values);
        assert_eq!(encoded.get(50), Value::Null);
        assert_eq!(encoded.get(51), Value::Int64(153));
        assert!(encoded.size_bytes() < 100 * 8);
    }

    #[test]
    fn test_dates_keep_their_type() {
        let values: Vec<Value> = (0..64)
            .map(|i| Value::Date(Date::from_days(19_000 + (i % 5))))
            .collect();
        let (encoded, _) = EncodedValues::encode(&values);
        assert_eq!(encoded.logical_type(), LogicalType::Date);
        assert_eq!(encoded.decode(), values);
    }

    #[test]
    fn test_mixed_block_is_raw() {
        let values = vec![Value::Int64(1), Value::from("x"), Value::Float64(2.5)];
        let (encoded, codec) = EncodedValues::encode(&values);
        assert_eq!(codec, CompressionCodec::None);
        assert_eq!(encoded.decode(), values);
    }

    #[test]
    fn test_bools_and_strings() {
        let bools: Vec<Value> = (0..40).map(|i| Value::Bool(i % 2 == 0)).collect();
        let (encoded, codec) = EncodedValues::encode(&bools);
        assert_eq!(codec, CompressionCodec::BitVector);
        assert_eq!(encoded.decode(), bools);

        let strings: Vec<Value> = (0..40)
            .map(|i| if i % 7 == 0 { Value::Null } else { Value::from(["a", "b"][i % 2]) })
            .collect();
        let (encoded, codec) = EncodedValues::encode(&strings);
        assert_eq!(codec, CompressionCodec::Dictionary);
        assert_eq!(encoded.decode(), strings);
    }

    proptest::proptest! {
        #[test]
        fn int_blocks_decode_exactly(
            ints in proptest::collection::vec(
                proptest::option::weighted(0.9, -1_000_000_000_000i64..1_000_000_000_000),
                0..300,
            ),
        ) {
            let values: Vec<Value> = ints.into_iter().map(|v| v.map_or(Value::Null, Value::Int64)).collect();
            let (encoded, _) = EncodedValues::encode(&values);
            proptest::prop_assert_eq!(encoded.len(), values.len());
            proptest::prop_assert_eq!(encoded.decode(), values);
        }

        #[test]
        fn string_blocks_decode_exactly(
            strings in proptest::collection::vec(proptest::option::of("[a-d]{0,3}"), 0..300),
        ) {
            let values: Vec<Value> = strings.into_iter().map(|v| v.map_or(Value::Null, Value::from)).collect();
            let (encoded, _) = EncodedValues::encode(&values);
            proptest::prop_assert_eq!(encoded.decode(), values);
        }
    }
}
