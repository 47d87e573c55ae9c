//! Budgeted memory reservations.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    BufferManager                           │
//! │  ┌──────────────┬──────────────┬──────────────┬──────────┐ │
//! │  │ GraphStorage │ IndexBuffers │ Execution    │ Spill    │ │
//! │  │              │              │ Buffers      │ Staging  │ │
//! │  └──────────────┴──────────────┴──────────────┴──────────┘ │
//! │  Pressure:  < 70% Normal, 70-85% Moderate,                 │
//! │             85-95% High, > 95% Critical                    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ```
//! use quiver_common::memory::{BufferManager, MemoryRegion};
//!
//! let manager = BufferManager::with_budget(1024);
//! let grant = manager.try_allocate(512, MemoryRegion::ExecutionBuffers).unwrap();
//! assert!(manager.try_allocate(1024, MemoryRegion::ExecutionBuffers).is_none());
//! drop(grant);
//! assert_eq!(manager.allocated(), 0);
//! ```

mod grant;
mod manager;
mod region;

pub use grant::MemoryGrant;
pub use manager::{BufferManager, BufferStats, PressureLevel};
pub use region::MemoryRegion;
