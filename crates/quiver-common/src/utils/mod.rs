//! Utility functions and helpers.
//!
//! - [`error`] - The workspace error type
//! - [`hash`] - Fast non-cryptographic hashing for internal maps

pub mod error;
pub mod hash;
