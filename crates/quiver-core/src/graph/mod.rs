//! Graph model.
//!
//! - [`lpg`] - The labeled property graph store

pub mod lpg;

/// Which edges of a node to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Edges leaving the node.
    Outgoing,
    /// Edges entering the node.
    Incoming,
    /// Both; a self-loop is reported once per direction.
    Both,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Outgoing => Self::Incoming,
            Self::Incoming => Self::Outgoing,
            Self::Both => Self::Both,
        }
    }
}
