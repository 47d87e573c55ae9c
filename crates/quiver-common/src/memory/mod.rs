//! Memory accounting.
//!
//! Quiver does not use a custom allocator; instead every subsystem that can
//! grow without bound (bulk inserts, hash tables, sort buffers) reserves its
//! bytes from a shared [`buffer::BufferManager`] first. When the configured
//! limit is reached the reservation fails, and the caller either spills or
//! reports `ResourceExhausted`.

pub mod buffer;

pub use buffer::{BufferManager, MemoryGrant, MemoryRegion, PressureLevel};
