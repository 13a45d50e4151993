//! Task events and waits
//!
//! Every task owns a 32-bit event bitmap. Anyone (tasks or interrupt
//! handlers) may set bits; only the owner consumes them, atomically, in
//! [`Kernel::wait_event`] or [`Kernel::wait_event_mask`].

use crate::atomic::{atomic_clear_bits, atomic_or, atomic_take};
use crate::critical::{interrupts_enabled, is_isr_context};
use crate::error::OsResult;
use crate::kernel::{self, Kernel};
use crate::panic::{software_panic, PanicReason};
use crate::port::{ActivePort, Port};
use crate::types::{events, EventMask, TaskId};

impl Kernel {
    /// Post events to a task
    ///
    /// From task context the scheduler runs right away, so a higher task
    /// woken here preempts the caller before this returns. From an interrupt
    /// handler, or with interrupts masked, the task is only marked ready and
    /// the switch happens when the handler returns or interrupts are
    /// re-enabled. Before [`Kernel::start`] the bits are only recorded.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidTask)` - `task` is not in the table
    pub fn set_event(&'static self, task: TaskId, bits: EventMask) -> OsResult<()> {
        self.check_task(task)?;
        if self.is_started() && ActivePort::forward_event(self, task, bits) {
            return Ok(());
        }
        atomic_or(&self.context(task).events, bits);

        if !self.is_started() || is_isr_context() || !interrupts_enabled() {
            atomic_or(&self.ready, task.bit());
            self.reschedule();
        } else {
            self.schedule(false, task.bit());
        }
        Ok(())
    }

    /// Post [`events::WAKE`] to a task
    #[inline]
    pub fn wake(&'static self, task: TaskId) -> OsResult<()> {
        self.set_event(task, events::WAKE)
    }

    /// Wait for any event
    ///
    /// Blocks until the bitmap of the calling task is non-empty, consumes it
    /// and returns it. With `timeout_us > 0` a deadline is armed first and
    /// [`events::TIMER`] is returned when it expires; `0` waits forever.
    ///
    /// Must be called from task context with interrupts enabled.
    pub fn wait_event(&'static self, timeout_us: u32) -> EventMask {
        let me = self.current_task();
        if !self.is_started() {
            software_panic(PanicReason::NotStarted, me);
        }
        if is_isr_context() {
            software_panic(PanicReason::BlockingInIsr, me);
        }
        if !interrupts_enabled() {
            software_panic(PanicReason::BlockingMasked, me);
        }

        if timeout_us > 0 {
            let deadline = self.get_time() + u64::from(timeout_us);
            if self.timer_arm(deadline, me).is_err() {
                software_panic(PanicReason::TimerArmFailed, me);
            }
        }

        let ctx = self.context(me);
        let evt = loop {
            let evt = atomic_take(&ctx.events);
            if evt != 0 {
                break evt;
            }
            self.schedule(true, TaskId::IDLE.bit());
        };

        if timeout_us > 0 {
            let _ = self.timer_cancel(me);
            // Our own deadline may have fired after the wake-up. A deadline
            // armed by the caller with `timer_arm` is left alone.
            atomic_clear_bits(&ctx.events, events::TIMER);
        }
        evt
    }

    /// Wait for events in `mask`
    ///
    /// Like [`Kernel::wait_event`], but other events that arrive meanwhile
    /// are collected and posted back to the caller before returning, so they
    /// are not lost. [`events::TIMER`] is always part of the mask and is set
    /// in the result on timeout.
    pub fn wait_event_mask(&'static self, mask: EventMask, timeout_us: u32) -> EventMask {
        let me = self.current_task();
        let mask = mask | events::TIMER;
        let deadline = self.get_time() + u64::from(timeout_us);
        let mut collected: EventMask = 0;
        let mut remaining = timeout_us;

        while collected & mask == 0 {
            collected |= self.wait_event(remaining);

            if timeout_us > 0 {
                let left = deadline as i64 - self.get_time() as i64;
                if left <= 0 {
                    collected |= events::TIMER;
                    break;
                }
                remaining = left as u32;
            }
        }

        let others = collected & !mask;
        if others != 0 {
            atomic_or(&self.context(me).events, others);
        }
        collected & mask
    }

    /// Pending events of a task, without consuming them
    pub fn peek_events(&self, task: TaskId) -> OsResult<EventMask> {
        self.check_task(task)?;
        Ok(self.context(task).events())
    }
}

// ============ Free-function API ============

/// Post events to a task of the running kernel
pub fn task_set_event(task: TaskId, bits: EventMask) -> OsResult<()> {
    kernel::get()?.set_event(task, bits)
}

/// Post [`events::WAKE`] to a task of the running kernel
pub fn task_wake(task: TaskId) -> OsResult<()> {
    kernel::get()?.wake(task)
}

/// Wait for any event on the running kernel; see [`Kernel::wait_event`]
pub fn task_wait_event(timeout_us: u32) -> OsResult<EventMask> {
    Ok(kernel::get()?.wait_event(timeout_us))
}

/// Wait for masked events on the running kernel; see [`Kernel::wait_event_mask`]
pub fn task_wait_event_mask(mask: EventMask, timeout_us: u32) -> OsResult<EventMask> {
    Ok(kernel::get()?.wait_event_mask(mask, timeout_us))
}

/// Id of the running task
pub fn task_get_current() -> OsResult<TaskId> {
    Ok(kernel::get()?.current_task())
}
