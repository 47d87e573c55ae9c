//! # quiver-adapters
//!
//! Adapters layer for Quiver: storage backends, the write-ahead log and
//! plugin interfaces.
//!
//! ## Modules
//!
//! - [`storage`] - Storage backends (memory, file, directory) and the WAL
//! - [`plugins`] - Plugin system and the scalar function registry

pub mod plugins;
pub mod storage;
