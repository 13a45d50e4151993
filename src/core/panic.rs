//! Fatal kernel errors
//!
//! Broken invariants are not returned to the caller. They are logged, written
//! to a record that survives the following reset, and the system restarts.
//! On the host port the record is kept in memory and the task thread panics
//! instead, which halts the simulated core.

use core::fmt;
use core::panic::Location;

use crate::kernel::Kernel;
use crate::types::TaskId;

/// Why the kernel gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PanicReason {
    /// The outgoing task wrote past the bottom of its stack
    StackOverflow = 0x1,
    /// `ready & enabled` was empty at a switch
    NoRunnableTask = 0x2,
    /// The selected task id is not in the table
    BadTaskId = 0x3,
    /// A blocking call was made from an interrupt handler
    BlockingInIsr = 0x4,
    /// A blocking call was made with interrupts masked
    BlockingMasked = 0x5,
    /// A wait could not arm its own deadline
    TimerArmFailed = 0x6,
    /// A blocking call was made before the scheduler started
    NotStarted = 0x7,
    /// CPU fault
    HardFault = 0x10,
}

impl PanicReason {
    fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x1 => PanicReason::StackOverflow,
            0x2 => PanicReason::NoRunnableTask,
            0x3 => PanicReason::BadTaskId,
            0x4 => PanicReason::BlockingInIsr,
            0x5 => PanicReason::BlockingMasked,
            0x6 => PanicReason::TimerArmFailed,
            0x7 => PanicReason::NotStarted,
            0x10 => PanicReason::HardFault,
            _ => return None,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PanicReason::StackOverflow => "stack overflow",
            PanicReason::NoRunnableTask => "no runnable task",
            PanicReason::BadTaskId => "bad task id",
            PanicReason::BlockingInIsr => "blocking call in interrupt",
            PanicReason::BlockingMasked => "blocking call with interrupts masked",
            PanicReason::TimerArmFailed => "wait deadline already armed",
            PanicReason::NotStarted => "blocking call before start",
            PanicReason::HardFault => "hard fault",
        }
    }
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the last fatal error left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PanicRecord {
    pub reason: PanicReason,
    /// Task running (or switched away from) at the time
    pub task: Option<TaskId>,
    /// Source line of the check, or the faulting PC for [`PanicReason::HardFault`]
    pub info: u32,
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task {
            Some(task) => write!(f, "{} (task {}, info 0x{:08x})", self.reason, task, self.info),
            None => write!(f, "{} (info 0x{:08x})", self.reason, self.info),
        }
    }
}

const PANIC_MAGIC: u32 = 0x5041_4e43;
const NO_TASK: u32 = 0xff;

/// Raw layout of the persisted record
#[derive(Clone, Copy)]
#[repr(C)]
struct RawRecord {
    magic: u32,
    reason: u32,
    task: u32,
    info: u32,
}

impl RawRecord {
    const EMPTY: RawRecord = RawRecord { magic: 0, reason: 0, task: 0, info: 0 };

    fn decode(self) -> Option<PanicRecord> {
        if self.magic != PANIC_MAGIC {
            return None;
        }
        Some(PanicRecord {
            reason: PanicReason::from_raw(self.reason)?,
            task: TaskId::new(self.task as usize),
            info: self.info,
        })
    }
}

/// Report a broken kernel invariant and reset
///
/// `task` is the task the failure is charged to.
#[track_caller]
#[cold]
pub fn software_panic(reason: PanicReason, task: TaskId) -> ! {
    let line = Location::caller().line();
    crate::error!("PANIC: {} in task {} at line {}", reason, task, line);
    store::write(RawRecord {
        magic: PANIC_MAGIC,
        reason: reason as u32,
        task: task.index() as u32,
        info: line,
    });
    store::die(reason)
}

/// Record a CPU fault at `pc` and reset
#[cold]
pub fn record_fault(pc: u32) -> ! {
    let task = Kernel::registered().map_or(NO_TASK, |k| k.current_task().index() as u32);
    crate::error!("PANIC: hard fault at pc {:#x}", pc);
    store::write(RawRecord {
        magic: PANIC_MAGIC,
        reason: PanicReason::HardFault as u32,
        task,
        info: pc,
    });
    store::die(PanicReason::HardFault)
}

/// The record left by the last fatal error, if any
pub fn last_panic() -> Option<PanicRecord> {
    store::read().decode()
}

/// Forget the last record
pub fn clear() {
    store::write(RawRecord::EMPTY);
}

#[cfg(target_arch = "arm")]
mod store {
    use core::mem::MaybeUninit;
    use core::ptr::{addr_of, addr_of_mut};

    use super::{PanicReason, RawRecord};
    use crate::port::{ActivePort, Port};

    /// Not touched by the startup code, so it survives a warm reset
    #[link_section = ".uninit.eck_panic"]
    static mut PANIC_RECORD: MaybeUninit<RawRecord> = MaybeUninit::uninit();

    pub(super) fn read() -> RawRecord {
        // SAFETY: every bit pattern is a valid `RawRecord`; the magic word
        // tells a real record from power-on garbage.
        unsafe { addr_of!(PANIC_RECORD).cast::<RawRecord>().read_volatile() }
    }

    pub(super) fn write(record: RawRecord) {
        // SAFETY: single writer, with interrupts about to stop mattering.
        unsafe { addr_of_mut!(PANIC_RECORD).cast::<RawRecord>().write_volatile(record) }
    }

    pub(super) fn die(_reason: PanicReason) -> ! {
        cortex_m::interrupt::disable();
        if ActivePort::debugger_attached() {
            cortex_m::asm::bkpt();
        }
        cortex_m::peripheral::SCB::sys_reset()
    }
}

#[cfg(not(target_arch = "arm"))]
mod store {
    use std::sync::{Mutex, PoisonError};

    use super::{PanicReason, RawRecord};

    static PANIC_RECORD: Mutex<RawRecord> = Mutex::new(RawRecord::EMPTY);

    pub(super) fn read() -> RawRecord {
        *PANIC_RECORD.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn write(record: RawRecord) {
        *PANIC_RECORD.lock().unwrap_or_else(PoisonError::into_inner) = record;
    }

    pub(super) fn die(reason: PanicReason) -> ! {
        std::panic!("kernel panic: {}", reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_decode() {
        let raw = RawRecord {
            magic: PANIC_MAGIC,
            reason: PanicReason::BlockingInIsr as u32,
            task: 3,
            info: 42,
        };
        let rec = raw.decode().unwrap();
        assert_eq!(rec.reason, PanicReason::BlockingInIsr);
        assert_eq!(rec.task, TaskId::new(3));
        assert_eq!(rec.info, 42);
    }

    #[test]
    fn test_garbage_is_no_record() {
        assert_eq!(RawRecord::EMPTY.decode(), None);
        let bad_reason = RawRecord { magic: PANIC_MAGIC, reason: 0x99, task: 1, info: 0 };
        assert_eq!(bad_reason.decode(), None);
    }

    #[test]
    fn test_fault_without_task() {
        let raw = RawRecord {
            magic: PANIC_MAGIC,
            reason: PanicReason::HardFault as u32,
            task: NO_TASK,
            info: 0x0800_1234,
        };
        assert_eq!(raw.decode().unwrap().task, None);
    }
}
