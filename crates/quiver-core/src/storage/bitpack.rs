//! Bit-packing for small unsigned integers.
//!
//! [`BitPackedInts`] stores each value in the minimum number of bits needed
//! for the largest one. [`DeltaBitPacked`] packs the gaps between
//! consecutive values of a non-decreasing sequence instead, which is what
//! makes sorted id and timestamp columns small.

use serde::{Deserialize, Serialize};

/// Values packed at a fixed bit width into 64-bit words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitPackedInts {
    words: Vec<u64>,
    bits: u8,
    len: usize,
}

impl BitPackedInts {
    /// Bits needed to represent `max`. Zero needs zero bits.
    #[must_use]
    pub fn bits_needed(max: u64) -> u8 {
        (64 - max.leading_zeros()) as u8
    }

    /// Packs `values` at the width of the largest one.
    #[must_use]
    pub fn pack(values: &[u64]) -> Self {
        let max = values.iter().copied().max().unwrap_or(0);
        Self::pack_with_bits(values, Self::bits_needed(max))
    }

    /// Packs `values` at a fixed width. Values wider than `bits` are
    /// truncated, so callers must size `bits` from the data.
    #[must_use]
    pub fn pack_with_bits(values: &[u64], bits: u8) -> Self {
        let mut packed = Self {
            words: vec![0; (values.len() * bits as usize).div_ceil(64)],
            bits,
            len: values.len(),
        };
        if bits == 0 {
            return packed;
        }
        let mask = Self::mask(bits);
        for (i, &v) in values.iter().enumerate() {
            let bit = i * bits as usize;
            let (word, offset) = (bit / 64, bit % 64);
            let v = v & mask;
            packed.words[word] |= v << offset;
            if offset + bits as usize > 64 {
                packed.words[word + 1] |= v >> (64 - offset);
            }
        }
        packed
    }

    /// Returns the value at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.len {
            return None;
        }
        if self.bits == 0 {
            return Some(0);
        }
        let bits = self.bits as usize;
        let bit = index * bits;
        let (word, offset) = (bit / 64, bit % 64);
        let mut v = self.words[word] >> offset;
        if offset + bits > 64 {
            v |= self.words[word + 1] << (64 - offset);
        }
        Some(v & Self::mask(self.bits))
    }

    /// Unpacks every value.
    #[must_use]
    pub fn unpack(&self) -> Vec<u64> {
        (0..self.len).filter_map(|i| self.get(i)).collect()
    }

    /// Bit width per value.
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no values are packed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes used by the packed words.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.words.len() * 8
    }

    /// Packed size in bytes of `count` values at `bits` each.
    #[must_use]
    pub fn estimate_bytes(count: usize, bits: u8) -> usize {
        (count * bits as usize).div_ceil(64) * 8
    }

    const fn mask(bits: u8) -> u64 {
        if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
    }
}

/// A non-decreasing sequence stored as its first value plus packed gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBitPacked {
    base: u64,
    deltas: BitPackedInts,
    len: usize,
}

impl DeltaBitPacked {
    /// Encodes a sorted sequence. Returns `None` if it is not sorted.
    #[must_use]
    pub fn encode(values: &[u64]) -> Option<Self> {
        let base = values.first().copied().unwrap_or(0);
        let mut deltas = Vec::with_capacity(values.len().saturating_sub(1));
        for w in values.windows(2) {
            deltas.push(w[1].checked_sub(w[0])?);
        }
        Some(Self {
            base,
            deltas: BitPackedInts::pack(&deltas),
            len: values.len(),
        })
    }

    /// Decodes the full sequence.
    #[must_use]
    pub fn decode(&self) -> Vec<u64> {
        if self.len() == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.len());
        let mut current = self.base;
        out.push(current);
        for d in self.deltas.unpack() {
            current += d;
            out.push(current);
        }
        out
    }

    /// Returns the value at `index` by summing the gaps before it.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.len() {
            return None;
        }
        let gaps: u64 = (0..index).filter_map(|i| self.deltas.get(i)).sum();
        Some(self.base + gaps)
    }

    /// The first value.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Bit width of the packed gaps.
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.deltas.bits()
    }

    /// Number of values, including the base.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes used, including the base.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        8 + self.deltas.size_bytes()
    }
}
