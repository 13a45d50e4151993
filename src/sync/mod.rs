//! Synchronization primitives
//!
//! Contains the blocking mutex.

#[cfg(feature = "mutex")]
pub mod mutex;
