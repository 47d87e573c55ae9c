//! Bit vectors for boolean columns and validity masks.

use serde::{Deserialize, Serialize};

/// A growable, densely packed vector of bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitVector {
    words: Vec<u64>,
    len: usize,
}

impl BitVector {
    /// Creates an empty bit vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bit vector of `len` bits, all set to `value`.
    #[must_use]
    pub fn filled(len: usize, value: bool) -> Self {
        let word = if value { u64::MAX } else { 0 };
        let mut bv = Self {
            words: vec![word; len.div_ceil(64)],
            len,
        };
        bv.clear_tail();
        bv
    }

    /// Packs a slice of booleans.
    #[must_use]
    pub fn from_bools(values: &[bool]) -> Self {
        let mut bv = Self {
            words: Vec::with_capacity(values.len().div_ceil(64)),
            len: 0,
        };
        for &v in values {
            bv.push(v);
        }
        bv
    }

    /// Appends a bit.
    pub fn push(&mut self, value: bool) {
        if self.len % 64 == 0 {
            self.words.push(0);
        }
        if value {
            self.words[self.len / 64] |= 1 << (self.len % 64);
        }
        self.len += 1;
    }

    /// Returns the bit at `index`, or `None` if out of range.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<bool> {
        (index < self.len).then(|| self.words[index / 64] & (1 << (index % 64)) != 0)
    }

    /// Sets the bit at `index`. Out-of-range indexes are ignored.
    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.len {
            return;
        }
        let mask = 1 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Unpacks into booleans.
    #[must_use]
    pub fn to_bools(&self) -> Vec<bool> {
        (0..self.len).map(|i| self.words[i / 64] & (1 << (i % 64)) != 0).collect()
    }

    /// Bytes used by the packed representation.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.words.len() * 8
    }

    fn clear_tail(&mut self) {
        let rem = self.len % 64;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_get() {
        let values: Vec<bool> = (0..130).map(|i| i % 3 == 0).collect();
        let bv = BitVector::from_bools(&values);
        assert_eq!(bv.len(), 130);
        assert_eq!(bv.to_bools(), values);
        assert_eq!(bv.get(129), Some(true));
        assert_eq!(bv.get(130), None);
        assert_eq!(bv.count_ones(), 44);
    }

    #[test]
    fn test_filled_and_set() {
        let mut bv = BitVector::filled(70, true);
        assert_eq!(bv.count_ones(), 70);
        bv.set(3, false);
        assert_eq!(bv.get(3), Some(false));
        assert_eq!(bv.count_ones(), 69);
    }
}
