//! Core kernel modules
//!
//! Contains the kernel object, scheduler, events, timers and task management.

pub mod atomic;
pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod event;
pub mod kernel;
pub mod panic;
pub mod prio;
pub mod sched;
pub mod task;
pub mod time;
pub mod types;
