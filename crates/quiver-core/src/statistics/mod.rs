//! Statistics collection for cost-based query optimization.
//!
//! This module provides statistics about:
//! - Labels: node counts
//! - Properties: distinct values, min/max, null counts, equi-depth histograms
//! - Relationships: edge type counts and average fan-out

mod collector;
mod histogram;

pub use collector::{ColumnStatistics, EdgeTypeStatistics, LabelStatistics, Statistics};
pub use histogram::{Histogram, HistogramBucket};
