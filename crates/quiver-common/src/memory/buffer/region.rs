//! Memory regions for per-subsystem accounting.

use std::fmt;

/// The subsystem a reservation is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// Node, edge and property storage.
    GraphStorage,
    /// Hash, B-tree and adjacency indexes.
    IndexBuffers,
    /// Operator state: hash tables, sort buffers, aggregates.
    ExecutionBuffers,
    /// Buffers staged for writing to spill files.
    SpillStaging,
}

impl MemoryRegion {
    /// All regions, in stats order.
    pub const ALL: [Self; 4] = [
        Self::GraphStorage,
        Self::IndexBuffers,
        Self::ExecutionBuffers,
        Self::SpillStaging,
    ];

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::GraphStorage => 0,
            Self::IndexBuffers => 1,
            Self::ExecutionBuffers => 2,
            Self::SpillStaging => 3,
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GraphStorage => "graph storage",
            Self::IndexBuffers => "index buffers",
            Self::ExecutionBuffers => "execution buffers",
            Self::SpillStaging => "spill staging",
        };
        f.write_str(name)
    }
}
