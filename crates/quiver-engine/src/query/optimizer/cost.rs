//! Cost model for query optimization.
//!
//! Costs are estimated per physical operator from input and output
//! cardinalities. Each operator's cost covers only its own work; plan cost
//! is the sum over the tree.

use std::cmp::Ordering;

/// Cost of an operation.
///
/// Represents the estimated resource consumption of executing an operator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cost {
    /// Estimated CPU work units.
    pub cpu: f64,
    /// Estimated I/O (pages read or spilled).
    pub io: f64,
    /// Estimated memory held, in bytes.
    pub memory: f64,
}

impl Cost {
    /// Creates a zero cost.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Creates a cost from CPU work units.
    #[must_use]
    pub fn cpu(cpu: f64) -> Self {
        Self {
            cpu,
            ..Self::default()
        }
    }

    /// Adds I/O cost.
    #[must_use]
    pub fn with_io(mut self, io: f64) -> Self {
        self.io = io;
        self
    }

    /// Adds memory cost.
    #[must_use]
    pub fn with_memory(mut self, memory: f64) -> Self {
        self.memory = memory;
        self
    }

    /// Returns the total weighted cost.
    ///
    /// Uses default weights: CPU=1.0, IO=10.0, Memory=0.0001 per byte.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.cpu + self.io * 10.0 + self.memory * 0.0001
    }

    /// Orders by total cost, then by memory footprint.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let (a, b) = (self.total(), other.total());
        if (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0) {
            self.memory.total_cmp(&other.memory)
        } else {
            a.total_cmp(&b)
        }
    }
}

impl std::ops::Add for Cost {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            cpu: self.cpu + other.cpu,
            io: self.io + other.io,
            memory: self.memory + other.memory,
        }
    }
}

impl std::ops::AddAssign for Cost {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

/// Cost model for estimating operator costs.
#[derive(Debug, Clone)]
pub struct CostModel {
    /// Cost per tuple processed by CPU.
    cpu_tuple_cost: f64,
    /// Cost per hash table insert.
    hash_build_cost: f64,
    /// Cost per hash table lookup.
    hash_lookup_cost: f64,
    /// Cost per comparison in sorting.
    sort_comparison_cost: f64,
    /// Cost per index probe level.
    index_probe_cost: f64,
    /// Average tuple size in bytes.
    avg_tuple_size: f64,
    /// Page size in bytes.
    page_size: f64,
}

impl CostModel {
    /// Creates a new cost model with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu_tuple_cost: 0.01,
            hash_build_cost: 0.03,
            hash_lookup_cost: 0.02,
            sort_comparison_cost: 0.02,
            index_probe_cost: 0.005,
            avg_tuple_size: 100.0,
            page_size: 8192.0,
        }
    }

    fn bytes(&self, rows: f64) -> f64 {
        rows * self.avg_tuple_size
    }

    /// Scanning `rows` base rows.
    #[must_use]
    pub fn scan(&self, rows: f64) -> Cost {
        let pages = self.bytes(rows) / self.page_size;
        Cost::cpu(rows * self.cpu_tuple_cost).with_io(pages)
    }

    /// Seeking `matches` rows through an index over `indexed` rows.
    #[must_use]
    pub fn index_seek(&self, indexed: f64, matches: f64) -> Cost {
        let depth = indexed.max(2.0).log2();
        Cost::cpu(depth * self.index_probe_cost + matches * self.cpu_tuple_cost * 2.0)
    }

    /// Evaluating a predicate over `rows`.
    #[must_use]
    pub fn filter(&self, rows: f64) -> Cost {
        Cost::cpu(rows * self.cpu_tuple_cost * 1.5)
    }

    /// Evaluating `expressions` over `rows`.
    #[must_use]
    pub fn project(&self, rows: f64, expressions: usize) -> Cost {
        Cost::cpu(rows * self.cpu_tuple_cost * expressions.max(1) as f64)
    }

    /// Expanding `input` rows into `output` rows.
    #[must_use]
    pub fn expand(&self, input: f64, output: f64) -> Cost {
        Cost::cpu(input * self.hash_lookup_cost + output * self.cpu_tuple_cost)
    }

    /// Hash join: the build side is held in memory.
    #[must_use]
    pub fn hash_join(&self, build: f64, probe: f64, output: f64) -> Cost {
        Cost::cpu(
            build * self.hash_build_cost
                + probe * self.hash_lookup_cost
                + output * self.cpu_tuple_cost,
        )
        .with_memory(self.bytes(build))
    }

    /// Merge join; unsorted inputs pay for a sort first.
    #[must_use]
    pub fn merge_join(
        &self,
        left: f64,
        right: f64,
        output: f64,
        left_sorted: bool,
        right_sorted: bool,
    ) -> Cost {
        let mut cost = Cost::cpu((left + right) * self.cpu_tuple_cost + output * self.cpu_tuple_cost);
        if !left_sorted {
            cost += self.sort(left);
        }
        if !right_sorted {
            cost += self.sort(right);
        }
        cost
    }

    /// Nested loop: every outer row meets every buffered inner row.
    #[must_use]
    pub fn nested_loop(&self, outer: f64, inner: f64, output: f64) -> Cost {
        Cost::cpu(outer * inner * self.cpu_tuple_cost + output * self.cpu_tuple_cost)
            .with_memory(self.bytes(inner))
    }

    /// Index nested loop: one index probe per outer row.
    #[must_use]
    pub fn index_nested_loop(&self, outer: f64, indexed: f64, output: f64) -> Cost {
        let depth = indexed.max(2.0).log2();
        Cost::cpu(outer * (depth * self.index_probe_cost + self.hash_lookup_cost) + output * self.cpu_tuple_cost)
    }

    /// Hash aggregation of `input` rows into `groups` groups.
    #[must_use]
    pub fn aggregate(&self, input: f64, groups: f64) -> Cost {
        Cost::cpu(input * self.hash_lookup_cost + groups * self.cpu_tuple_cost)
            .with_memory(self.bytes(groups))
    }

    /// Sorting `rows`.
    #[must_use]
    pub fn sort(&self, rows: f64) -> Cost {
        if rows <= 1.0 {
            return Cost::cpu(rows * self.cpu_tuple_cost);
        }
        Cost::cpu(rows * rows.log2() * self.sort_comparison_cost).with_memory(self.bytes(rows))
    }

    /// Deduplicating `rows`.
    #[must_use]
    pub fn distinct(&self, rows: f64, distinct: f64) -> Cost {
        Cost::cpu(rows * self.hash_lookup_cost).with_memory(self.bytes(distinct))
    }

    /// Passing `rows` through a limit or skip.
    #[must_use]
    pub fn limit(&self, rows: f64) -> Cost {
        Cost::cpu(rows * self.cpu_tuple_cost * 0.1)
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_arithmetic() {
        let a = Cost::cpu(10.0).with_io(1.0).with_memory(100.0);
        let b = Cost::cpu(5.0).with_memory(300.0);
        let c = a + b;
        assert!((c.cpu - 15.0).abs() < 1e-9);
        assert!((c.io - 1.0).abs() < 1e-9);
        assert!((c.memory - 400.0).abs() < 1e-9);
        assert!((a.total() - (10.0 + 10.0 + 0.01)).abs() < 1e-9);
    }

    #[test]
    fn test_ties_prefer_less_memory() {
        let lean = Cost::cpu(20.0);
        let heavy = Cost::cpu(10.0).with_memory(100_000.0);
        assert_eq!(lean.compare(&heavy), Ordering::Less);
        assert_eq!(heavy.compare(&lean), Ordering::Greater);
        assert_eq!(Cost::cpu(1.0).compare(&Cost::cpu(2.0)), Ordering::Less);
    }

    #[test]
    fn test_hash_join_cheaper_than_nested_loop_for_large_inputs() {
        let model = CostModel::new();
        let hash = model.hash_join(10_000.0, 10_000.0, 10_000.0);
        let nl = model.nested_loop(10_000.0, 10_000.0, 10_000.0);
        assert!(hash.total() < nl.total());
    }

    #[test]
    fn test_nested_loop_wins_for_tiny_inner() {
        let model = CostModel::new();
        let hash = model.hash_join(1.0, 10_000.0, 20.0);
        let nl = model.nested_loop(10_000.0, 1.0, 20.0);
        assert!(nl.total() < hash.total());
    }

    #[test]
    fn test_merge_join_needs_sorted_inputs_to_win() {
        let model = CostModel::new();
        let hash = model.hash_join(10_000.0, 10_000.0, 10_000.0);
        let sorted = model.merge_join(10_000.0, 10_000.0, 10_000.0, true, true);
        let unsorted = model.merge_join(10_000.0, 10_000.0, 10_000.0, false, false);
        assert!(sorted.total() < hash.total());
        assert!(unsorted.total() > hash.total());
    }

    #[test]
    fn test_index_nested_loop_cheap_for_few_outer_rows() {
        let model = CostModel::new();
        let inl = model.index_nested_loop(10.0, 100_000.0, 10.0);
        let hash = model.hash_join(100_000.0, 10.0, 10.0) + model.scan(100_000.0);
        assert!(inl.total() < hash.total());
    }
}
