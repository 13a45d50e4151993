//! Preemptible event-driven task kernel for embedded controllers
//!
//! A small, allocation-free kernel providing:
//! - Strict priority scheduling over a fixed task table (priority = task id)
//! - Per-task 32-bit event bitmaps with timed waits
//! - One-shot deadline timers on a 64-bit microsecond clock
//! - A blocking mutex built on events
//! - An opt-in task reset protocol
//! - Context switching for ARM Cortex-M, plus a threaded host port for tests

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(target_arch = "arm"))]
extern crate std;

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
#[cfg(target_arch = "arm")]
mod lang_items;

pub mod core;
pub mod sync;
pub mod port;

// ============ Re-exports ============

pub use crate::core::atomic;
pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::error;
pub use crate::core::error::{OsError, OsResult};
pub use crate::core::event;
pub use crate::core::event::{task_set_event, task_wait_event, task_wait_event_mask, task_wake};
pub use crate::core::kernel;
pub use crate::core::kernel::Kernel;
pub use crate::core::panic;
pub use crate::core::prio;
pub use crate::core::sched;
pub use crate::core::task;
pub use crate::core::task::{Stack, TaskDescriptor};
pub use crate::core::time;
pub use crate::core::types;
pub use crate::core::types::*;

#[cfg(feature = "mutex")]
pub use sync::mutex;
#[cfg(feature = "mutex")]
pub use sync::mutex::Mutex;

#[cfg(feature = "pac")]
pub use stm32_metapac as pac;
