//! Time management module
//!
//! Microsecond time and per-task deadlines. The hardware supplies a 32-bit
//! free-running counter and one comparator ([`ClockSource`]); the kernel
//! extends the counter to 64 bits with a software high word bumped on every
//! counter overflow, and programs the comparator for the soonest deadline.

use core::fmt;

use portable_atomic::{AtomicU32, AtomicU64, Ordering};

use crate::atomic::{atomic_clear_bits, atomic_load, atomic_or};
use crate::config::CFG_TASK_MAX;
use crate::critical::CriticalSection;
use crate::core::cs_cell::CsCell;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::prio::{fls, TaskMask};
use crate::types::{events, TaskId, Timestamp};

/// Hardware timer behind the kernel clock
///
/// `read` is the free-running counter in microseconds. The comparator fires
/// the timer interrupt once the counter reaches the target, and the
/// interrupt handler must call [`Kernel::on_timer_interrupt`], with
/// `overflow = true` when the counter wrapped.
pub trait ClockSource: Sync {
    /// Low 32 bits of the time
    fn read(&self) -> u32;

    /// Program the comparator
    fn set_target(&self, target: u32);

    /// Disarm the comparator
    fn clear_target(&self);

    /// Make the timer interrupt pending now
    fn trigger(&self);

    /// Called in busy-wait loops
    fn relax(&self) {
        core::hint::spin_loop()
    }
}

const NO_DEADLINE: u64 = u64::MAX;

/// Per-task deadlines
pub(crate) struct TimerQueue {
    /// Deadline of each task; only meaningful while its `running` bit is set
    deadlines: CsCell<[Timestamp; CFG_TASK_MAX]>,
    /// Tasks with an armed deadline
    running: AtomicU32,
    /// Software high word of the clock
    high: AtomicU32,
    /// Deadline the comparator is programmed for
    next: AtomicU64,
}

impl TimerQueue {
    pub(crate) const fn new() -> Self {
        TimerQueue {
            deadlines: CsCell::new([0; CFG_TASK_MAX]),
            running: AtomicU32::new(0),
            high: AtomicU32::new(0),
            next: AtomicU64::new(NO_DEADLINE),
        }
    }

    pub(crate) fn reset(&self) {
        let cs = CriticalSection::enter();
        self.deadlines.set(&cs, [0; CFG_TASK_MAX]);
        self.running.store(0, Ordering::Release);
        self.next.store(NO_DEADLINE, Ordering::Release);
    }

    fn deadline(&self, cs: &CriticalSection, id: TaskId) -> Timestamp {
        self.deadlines.with(cs, |d| d[id.index()])
    }

    /// Tasks with an armed deadline
    pub(crate) fn armed(&self) -> TaskMask {
        TaskMask::new(atomic_load(&self.running))
    }
}

/// True once `now` has reached `deadline`
///
/// The comparison is on the signed difference, so it stays right across a
/// wrap of the 64-bit counter.
#[inline]
pub fn timestamp_expired(deadline: Timestamp, now: Timestamp) -> bool {
    now.wrapping_sub(deadline) as i64 >= 0
}

impl Kernel {
    /// Microseconds since the clock started
    pub fn get_time(&self) -> Timestamp {
        let clock = self.clock();
        loop {
            let hi = self.timers.high.load(Ordering::Acquire);
            let lo = clock.read();
            if self.timers.high.load(Ordering::Acquire) == hi {
                return (u64::from(hi) << 32) | u64::from(lo);
            }
        }
    }

    /// True once the clock has reached `deadline`
    #[inline]
    pub fn deadline_passed(&self, deadline: Timestamp) -> bool {
        timestamp_expired(deadline, self.get_time())
    }

    /// Arm a deadline for `task`
    ///
    /// When the deadline passes, [`events::TIMER`] is posted to the task.
    ///
    /// # Returns
    /// * `Err(OsError::Busy)` - The task already has an armed deadline,
    ///   which stays in effect
    /// * `Err(OsError::InvalidTask)` - `task` is not in the table
    pub fn timer_arm(&self, deadline: Timestamp, task: TaskId) -> OsResult<()> {
        self.check_task(task)?;
        let timers = &self.timers;
        {
            let cs = CriticalSection::enter();
            if timers.armed().contains(task) {
                return Err(OsError::Busy);
            }
            timers.deadlines.with(&cs, |d| d[task.index()] = deadline);
            atomic_or(&timers.running, task.bit());
        }

        // Sooner than what the comparator waits for: let the interrupt
        // handler reprogram it.
        let next = timers.next.load(Ordering::Acquire);
        if next == NO_DEADLINE
            || (deadline as i64).wrapping_sub(next as i64) < 0
            || self.deadline_passed(deadline)
        {
            self.clock().trigger();
        }
        Ok(())
    }

    /// Disarm the deadline of `task`, if any
    ///
    /// The comparator is left alone; a stale interrupt finds nothing to do.
    pub fn timer_cancel(&self, task: TaskId) -> OsResult<()> {
        self.check_task(task)?;
        atomic_clear_bits(&self.timers.running, task.bit());
        Ok(())
    }

    /// True while `task` has an armed deadline
    #[inline]
    pub fn timer_armed(&self, task: TaskId) -> bool {
        self.timers.armed().contains(task)
    }

    /// Timer interrupt body
    ///
    /// Expires every deadline that has passed and programs the comparator
    /// for the next one. `overflow` reports a wrap of the 32-bit counter.
    pub fn on_timer_interrupt(&'static self, overflow: bool) {
        let timers = &self.timers;
        let clock = self.clock();
        if overflow {
            timers.high.fetch_add(1, Ordering::AcqRel);
        }

        loop {
            let now = self.get_time();
            let mut next = NO_DEADLINE;

            loop {
                let scanned = atomic_load(&timers.running);
                let mut pending = scanned;
                while let Some(bit) = fls(pending) {
                    pending &= !(1 << bit);
                    let id = TaskId::from_index(bit as usize);
                    let deadline = {
                        let cs = CriticalSection::enter();
                        timers.deadline(&cs, id)
                    };
                    if timestamp_expired(deadline, now) {
                        atomic_clear_bits(&timers.running, id.bit());
                        let _ = self.set_event(id, events::TIMER);
                    } else if deadline >> 32 == now >> 32 && deadline < next {
                        next = deadline;
                    }
                }
                // Timers armed by tasks woken above need a look too.
                if atomic_load(&timers.running) & !scanned == 0 {
                    break;
                }
            }

            timers.next.store(next, Ordering::Release);
            if next == NO_DEADLINE {
                // Nothing due in this epoch; the overflow interrupt comes back.
                clock.clear_target();
                break;
            }
            clock.set_target(next as u32);
            if !self.deadline_passed(next) {
                break;
            }
        }
    }

    /// Soonest armed deadline of any task
    pub fn earliest_deadline(&self) -> Option<Timestamp> {
        let cs = CriticalSection::enter();
        self.timers
            .armed()
            .iter()
            .map(|id| self.timers.deadline(&cs, id))
            .min()
    }

    /// Busy-wait for `us` microseconds
    ///
    /// Usable anywhere, including before start and in interrupt handlers.
    pub fn udelay(&self, us: u32) {
        let clock = self.clock();
        let t0 = clock.read();
        while clock.read().wrapping_sub(t0) < us {
            clock.relax();
        }
    }

    /// Sleep for `us` microseconds
    ///
    /// Other events that arrive meanwhile are kept for the next wait. Falls
    /// back to [`Kernel::udelay`] where blocking is not allowed.
    pub fn usleep(&'static self, us: u32) {
        if us == 0 {
            return;
        }
        if !self.is_started() || !self.can_block() {
            self.udelay(us);
            return;
        }
        self.wait_event_mask(0, us);
    }

    /// Sleep for `ms` milliseconds
    pub fn msleep(&'static self, ms: u32) {
        self.usleep(ms.saturating_mul(1000));
    }

    /// Write the clock and armed deadlines in console form
    pub fn print_timer_info(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let now = self.get_time();
        let next = self.timers.next.load(Ordering::Acquire);
        writeln!(out, "Time:     0x{:016x} us, {}", now, Seconds(now as i64))?;
        if next != NO_DEADLINE {
            let left = next.wrapping_sub(now) as i64;
            writeln!(out, "Deadline: 0x{:016x} -> {} from now", next, Seconds(left))?;
        }
        writeln!(out, "Active timers:")?;
        let cs = CriticalSection::enter();
        for id in self.timers.armed().iter() {
            let deadline = self.timers.deadline(&cs, id);
            let left = deadline.wrapping_sub(now) as i64;
            writeln!(out, "  Tsk {:2}  0x{:016x} -> {}", id.index(), deadline, Seconds(left))?;
        }
        Ok(())
    }
}

/// Microseconds shown as seconds with six decimals
struct Seconds(i64);

impl fmt::Display for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let us = self.0.unsigned_abs();
        write!(f, "{}{}.{:06} s", sign, us / 1_000_000, us % 1_000_000)
    }
}
