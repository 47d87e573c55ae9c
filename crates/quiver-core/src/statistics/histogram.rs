//! Equi-depth histograms over property values.

use quiver_common::types::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::index::zone_map::CompareOp;

/// One bucket of an equi-depth histogram. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Smallest value in the bucket.
    pub lower: Value,
    /// Largest value in the bucket.
    pub upper: Value,
    /// Values in the bucket.
    pub count: u64,
    /// Distinct values in the bucket.
    pub distinct: u64,
}

/// An equi-depth histogram: every bucket holds roughly the same number of
/// values, so skewed ranges get narrower buckets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    total: u64,
}

impl Histogram {
    /// Builds a histogram with at most `max_buckets` buckets from non-null
    /// values. Values that cannot be ordered against each other are
    /// ordered by [`Value::total_cmp`].
    #[must_use]
    pub fn build(mut values: Vec<Value>, max_buckets: usize) -> Self {
        values.retain(|v| !v.is_null());
        if values.is_empty() || max_buckets == 0 {
            return Self::default();
        }
        values.sort_by(Value::total_cmp);
        let total = values.len();
        let depth = total.div_ceil(max_buckets).max(1);

        let mut buckets: Vec<HistogramBucket> = Vec::with_capacity(max_buckets);
        let mut start = 0;
        while start < total {
            let mut end = (start + depth).min(total);
            // A value never straddles two buckets
            while end < total && values[end].total_cmp(&values[end - 1]) == Ordering::Equal {
                end += 1;
            }
            let slice = &values[start..end];
            let distinct = 1 + slice
                .windows(2)
                .filter(|w| w[0].total_cmp(&w[1]) != Ordering::Equal)
                .count();
            buckets.push(HistogramBucket {
                lower: slice[0].clone(),
                upper: slice[slice.len() - 1].clone(),
                count: slice.len() as u64,
                distinct: distinct as u64,
            });
            start = end;
        }
        Self {
            buckets,
            total: total as u64,
        }
    }

    /// The buckets in value order.
    #[must_use]
    pub fn buckets(&self) -> &[HistogramBucket] {
        &self.buckets
    }

    /// Number of values summarized.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns true if no values were summarized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Estimated fraction of summarized values satisfying `x <op> value`.
    /// Values inside a bucket are assumed uniformly spread over its
    /// distinct values.
    #[must_use]
    pub fn selectivity(&self, op: CompareOp, value: &Value) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        let eq = self.equal_count(value);
        let below = self.below_count(value);
        let fraction = match op {
            CompareOp::Eq => eq,
            CompareOp::Ne => total - eq,
            CompareOp::Lt => below,
            CompareOp::Le => below + eq,
            CompareOp::Gt => total - below - eq,
            CompareOp::Ge => total - below,
        };
        (fraction / total).clamp(0.0, 1.0)
    }

    fn equal_count(&self, value: &Value) -> f64 {
        self.buckets
            .iter()
            .filter(|b| Self::contains(b, value))
            .map(|b| b.count as f64 / b.distinct.max(1) as f64)
            .sum()
    }

    /// Estimated number of values strictly below `value`.
    fn below_count(&self, value: &Value) -> f64 {
        let mut below = 0.0;
        for bucket in &self.buckets {
            if bucket.upper.total_cmp(value) == Ordering::Less {
                below += bucket.count as f64;
            } else if Self::contains(bucket, value) {
                below += Self::fraction_below(bucket, value) * bucket.count as f64;
            }
        }
        below
    }

    fn contains(bucket: &HistogramBucket, value: &Value) -> bool {
        bucket.lower.total_cmp(value) != Ordering::Greater
            && bucket.upper.total_cmp(value) != Ordering::Less
    }

    /// Position of `value` inside a bucket, excluding the value itself.
    fn fraction_below(bucket: &HistogramBucket, value: &Value) -> f64 {
        if let (Some(lo), Some(hi), Some(v)) =
            (bucket.lower.as_number(), bucket.upper.as_number(), value.as_number())
        {
            if hi > lo {
                let per_value = 1.0 / bucket.distinct.max(1) as f64;
                return ((v - lo) / (hi - lo) - per_value / 2.0).clamp(0.0, 1.0 - per_value);
            }
            return 0.0;
        }
        // Non-numeric: assume the middle of the bucket
        if bucket.lower.total_cmp(value) == Ordering::Equal {
            0.0
        } else {
            0.5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(range: std::ops::Range<i64>) -> Vec<Value> {
        range.map(Value::Int64).collect()
    }

    #[test]
    fn test_equi_depth_buckets() {
        let h = Histogram::build(ints(0..100), 10);
        assert_eq!(h.buckets().len(), 10);
        assert!(h.buckets().iter().all(|b| b.count == 10));
        assert_eq!(h.total(), 100);
    }

    #[test]
    fn test_duplicates_stay_in_one_bucket() {
        let mut values = vec![Value::Int64(7); 50];
        values.extend(ints(0..10));
        let h = Histogram::build(values, 8);
        let holding_seven = h
            .buckets()
            .iter()
            .filter(|b| Histogram::contains(b, &Value::Int64(7)))
            .count();
        assert_eq!(holding_seven, 1);
    }

    #[test]
    fn test_range_selectivity() {
        let h = Histogram::build(ints(0..1000), 20);
        let gt = h.selectivity(CompareOp::Gt, &Value::Int64(750));
        assert!((gt - 0.25).abs() < 0.05, "got {gt}");
        let lt = h.selectivity(CompareOp::Lt, &Value::Int64(100));
        assert!((lt - 0.1).abs() < 0.05, "got {lt}");
        assert_eq!(h.selectivity(CompareOp::Gt, &Value::Int64(5000)), 0.0);
        assert_eq!(h.selectivity(CompareOp::Lt, &Value::Int64(-5)), 0.0);
    }

    #[test]
    fn test_equality_on_skewed_data() {
        let mut values = vec![Value::from("common"); 90];
        values.extend((0..10).map(|i| Value::from(format!("rare{i}"))));
        let h = Histogram::build(values, 4);
        let common = h.selectivity(CompareOp::Eq, &Value::from("common"));
        let rare = h.selectivity(CompareOp::Eq, &Value::from("rare3"));
        assert!(common > 0.5);
        assert!(rare < 0.1);
    }

    #[test]
    fn test_empty() {
        let h = Histogram::build(vec![Value::Null], 4);
        assert!(h.is_empty());
        assert_eq!(h.selectivity(CompareOp::Eq, &Value::Int64(1)), 0.0);
    }
}
