//! Core type definitions for the kernel
//!
//! These types provide strong typing for kernel primitives.

use core::fmt;

use crate::config::CFG_TASK_MAX;

/// Stack element type
pub type OsStkElement = u32;

/// Task event bitmap
pub type EventMask = u32;

/// Microseconds since boot on the kernel clock
pub type Timestamp = u64;

/// Task identifier, which is also the task priority (higher id wins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u8);

impl TaskId {
    /// The idle task, lowest priority and always runnable
    pub const IDLE: TaskId = TaskId(0);

    /// The first entry of the task table
    pub const BOOTSTRAP: TaskId = TaskId(1);

    /// Task id from a raw index, if it fits the id space
    #[inline]
    pub const fn new(raw: usize) -> Option<TaskId> {
        if raw < CFG_TASK_MAX {
            Some(TaskId(raw as u8))
        } else {
            None
        }
    }

    #[inline(always)]
    pub(crate) const fn from_index(raw: usize) -> TaskId {
        TaskId(raw as u8)
    }

    /// Index into per-task tables
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Single-bit mask for the ready/enabled/waiter bitmaps
    #[inline(always)]
    pub const fn bit(self) -> u32 {
        1 << self.0
    }

    #[inline(always)]
    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state of a task as seen from the bitmaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskState {
    /// Task is executing on the CPU
    Running = 0,
    /// Task is runnable and waiting for the CPU
    Ready = 1,
    /// Task is waiting for events
    Blocked = 2,
    /// Task is not in the enabled set
    Disabled = 3,
}

/// Event bits understood by the kernel and its drivers
///
/// Bits 0..15 are free for application use; the upper half is reserved.
pub mod events {
    use super::EventMask;

    /// Deadline expired
    pub const TIMER: EventMask = 1 << 31;
    /// Generic wake-up (`task_wake`)
    pub const WAKE: EventMask = 1 << 30;
    /// Mutex released
    pub const MUTEX: EventMask = 1 << 29;
    /// A task reset the caller was waiting on has completed
    pub const RESET_DONE: EventMask = 1 << 28;
    /// ADC conversion done
    pub const ADC_DONE: EventMask = 1 << 27;
    /// DMA transfer complete
    pub const DMA_TC: EventMask = 1 << 26;
    /// Host command channel ready
    pub const IPC_READY: EventMask = 1 << 25;
    /// PS/2 transfer done
    pub const PS2_DONE: EventMask = 1 << 21;
    /// I2C bus went idle
    pub const I2C_IDLE: EventMask = 1 << 20;
    /// PECI transaction done
    pub const PECI_DONE: EventMask = 1 << 19;
    /// Power-delivery chip woke up
    pub const PD_AWAKE: EventMask = 1 << 18;
    /// Safe to jump to another firmware image
    pub const SYSJUMP_READY: EventMask = 1 << 16;

    /// Number of application event bits
    pub const CUSTOM_BITS: u32 = 16;

    /// Application event bit `n` (0..16)
    #[inline(always)]
    pub const fn custom(n: u32) -> EventMask {
        debug_assert!(n < CUSTOM_BITS);
        1 << n
    }

    /// Bits reserved for the kernel and drivers
    pub const RESERVED: EventMask = !((1 << CUSTOM_BITS) - 1);
}
