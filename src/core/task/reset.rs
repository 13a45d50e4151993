//! Task reset protocol
//!
//! A task marked [`TaskDescriptor::resettable`](super::TaskDescriptor::resettable)
//! can be restarted from its entry by another task. The target decides when
//! that is safe: between [`Kernel::disable_resets`] and
//! [`Kernel::enable_resets`] it holds its reset lock, and a reset requested
//! meanwhile is queued until the lock is released. The restarted task calls
//! [`Kernel::reset_cleanup`] first thing to tell the requesters it is done.
//!
//! The whole protocol lives in one word per task:
//! bit 31 marks support, bit 30 is the lock, and the low bits are the ids of
//! the tasks waiting to hear the reset finished (bit `CFG_TASK_MAX` stands for
//! requesters that did not want to wait).

use portable_atomic::Ordering;

use crate::atomic::{atomic_clear_bits, atomic_load, atomic_or};
use crate::config::CFG_TASK_MAX;
use crate::critical::CriticalSection;
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::port::{ActivePort, Port};
use crate::prio::fls;
use crate::types::{events, TaskId};

pub(crate) const RESET_SUPPORTED: u32 = 1 << 31;
pub(crate) const RESET_LOCK: u32 = 1 << 30;
const RESET_STATE_MASK: u32 = RESET_SUPPORTED | RESET_LOCK;
const RESET_WAITERS_MASK: u32 = !RESET_STATE_MASK;
pub(crate) const RESET_UNSUPPORTED: u32 = 0;
pub(crate) const RESET_STATE_LOCKED: u32 = RESET_SUPPORTED | RESET_LOCK;
pub(crate) const RESET_STATE_UNLOCKED: u32 = RESET_SUPPORTED;

/// Waiter bit of a requester that does not wait for completion
const ANONYMOUS_WAITER: u32 = 1 << CFG_TASK_MAX;

const _: () = assert!(ANONYMOUS_WAITER < RESET_LOCK);

/// Reset protocol state of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetState {
    /// Not resettable
    Unsupported,
    /// Resets are taken immediately
    Unlocked,
    /// Resets are held off; `waiters` have asked for one
    Locked { waiters: u32 },
}

impl ResetState {
    fn from_raw(raw: u32) -> Self {
        if raw & RESET_SUPPORTED == 0 {
            ResetState::Unsupported
        } else if raw & RESET_LOCK == 0 {
            ResetState::Unlocked
        } else {
            ResetState::Locked { waiters: raw & RESET_WAITERS_MASK }
        }
    }
}

impl Kernel {
    /// Reset protocol state of `id`
    pub fn reset_state(&self, id: TaskId) -> OsResult<ResetState> {
        self.check_task(id)?;
        Ok(ResetState::from_raw(atomic_load(&self.context(id).reset_state)))
    }

    /// Replace the state of `id` with `to` if it is exactly `from`
    fn update_reset_state(&self, id: TaskId, from: u32, to: u32) -> bool {
        let _cs = CriticalSection::enter();
        let state = &self.context(id).reset_state;
        if state.load(Ordering::Acquire) != from {
            return false;
        }
        state.store(to, Ordering::Release);
        true
    }

    fn try_acquire_reset_lock(&self, id: TaskId) -> bool {
        self.update_reset_state(id, RESET_STATE_UNLOCKED, RESET_STATE_LOCKED)
    }

    /// Only succeeds while nobody waits for a reset
    fn try_release_reset_lock(&self, id: TaskId) -> bool {
        self.update_reset_state(id, RESET_STATE_LOCKED, RESET_STATE_UNLOCKED)
    }

    /// Block until another party resets the caller
    fn sleep_until_reset(&'static self) -> ! {
        loop {
            self.wait_event_mask(0, 0);
        }
    }

    /// Allow resets of the calling task again
    ///
    /// If a reset was requested while they were disabled, the caller is
    /// queued for the idle task to reset and does not return.
    pub fn enable_resets(&'static self) {
        let id = self.current_task();
        let state = atomic_load(&self.context(id).reset_state);

        if state == RESET_UNSUPPORTED {
            crate::warn!("enable_resets called from non-resettable task, id: {}", id);
            return;
        }
        if state == RESET_STATE_UNLOCKED {
            crate::warn!("enable_resets called, but resets already enabled, id: {}", id);
            return;
        }
        if self.try_release_reset_lock(id) {
            return;
        }

        // Someone is waiting for us to reset.
        atomic_or(&self.deferred_resets, id.bit());
        self.sleep_until_reset()
    }

    /// Hold off resets of the calling task
    ///
    /// Does not return if a reset of the caller is already under way.
    pub fn disable_resets(&'static self) {
        let id = self.current_task();
        if atomic_load(&self.context(id).reset_state) == RESET_UNSUPPORTED {
            crate::warn!("disable_resets called from non-resettable task, id {}", id);
            return;
        }
        if self.try_acquire_reset_lock(id) {
            return;
        }
        self.sleep_until_reset()
    }

    /// Finish a reset of the calling task
    ///
    /// Resettable tasks call this at the top of their entry. If the task is
    /// starting because it was reset, every requester that waits for it is
    /// sent [`events::RESET_DONE`] and the reset lock is released.
    ///
    /// Returns true if the task was reset.
    pub fn reset_cleanup(&'static self) -> bool {
        let id = self.current_task();
        let state = &self.context(id).reset_state;
        // Only this task clears the lock bit, so the read is stable.
        let cleanup = atomic_load(state) & RESET_LOCK != 0;

        if cleanup {
            while !self.try_release_reset_lock(id) {
                let Some(waiter) = fls(atomic_load(state) & RESET_WAITERS_MASK) else {
                    continue;
                };
                // Off the list before the waiter runs again; it may ask for
                // another reset and land back on it.
                atomic_clear_bits(state, 1 << waiter);
                if let Some(task) = TaskId::new(waiter as usize) {
                    self.set_event(task, events::RESET_DONE).ok();
                }
            }
        }
        cleanup
    }

    /// Restart `id` from its entry
    ///
    /// If the task has resets enabled it is reset right away. Otherwise the
    /// request is recorded and the task resets itself when it next enables
    /// resets; with `wait` the caller blocks until then.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidTask)` - `id` is not in the table
    /// * `Err(OsError::InvalidArgument)` - `id` is the calling task
    /// * `Err(OsError::ResetUnsupported)` - `id` is not resettable
    pub fn reset(&'static self, id: TaskId, wait: bool) -> OsResult<()> {
        self.check_task(id)?;
        let current = self.current_task();
        if id == current {
            return Err(OsError::InvalidArgument);
        }
        let state = &self.context(id).reset_state;
        if atomic_load(state) == RESET_UNSUPPORTED {
            return Err(OsError::ResetUnsupported);
        }

        let waiter = if wait { current.bit() } else { ANONYMOUS_WAITER };
        let resets_disabled = {
            let _cs = CriticalSection::enter();
            let s = state.load(Ordering::Acquire);
            let locked = s & RESET_LOCK != 0;
            let s = if locked { s | waiter } else { s | RESET_LOCK };
            state.store(s, Ordering::Release);
            locked
        };

        if !resets_disabled {
            self.do_task_reset(id);
            self.reschedule();
        } else if wait {
            self.wait_event_mask(events::RESET_DONE, 0);
        }
        Ok(())
    }

    /// Rebuild the frame of `id` and make it ready. The caller holds the
    /// task's reset lock.
    fn do_task_reset(&'static self, id: TaskId) {
        let _ = self.timer_cancel(id);
        let _cs = CriticalSection::enter();
        self.init_task_context(id);
        ActivePort::task_reset(self, id);
        atomic_or(&self.ready, id.bit());
        crate::debug!("task {} reset", id);
    }

    /// Perform the resets queued by tasks that released their lock with
    /// requesters waiting. Runs on the idle task.
    pub(crate) fn service_deferred_resets(&'static self) {
        let mut any = false;
        while let Some(bit) = fls(atomic_load(&self.deferred_resets)) {
            atomic_clear_bits(&self.deferred_resets, 1 << bit);
            self.do_task_reset(TaskId::from_index(bit as usize));
            any = true;
        }
        if any {
            self.reschedule();
        }
    }
}
