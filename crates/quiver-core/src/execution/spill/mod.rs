//! Spilling operator state to disk.
//!
//! When an operator's memory reservation cannot grow, spill-capable
//! operators (sort, hash join build and probe) write rows to temporary
//! files managed by a [`SpillManager`] and read them back later.
//!
//! - [`SpillManager`] - Owns the spill directory and accounts bytes written
//! - [`SpillFile`] - Append-only file of length-prefixed rows
//! - [`SpillReader`] - Reads the rows of a finished file in write order

mod file;
mod manager;

pub use file::{SpillFile, SpillReader};
pub use manager::SpillManager;
