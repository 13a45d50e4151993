//! Blocking mutex built on task events
//!
//! A lock word plus a bitmap of the tasks waiting for it. Contended lockers
//! sleep on [`events::MUTEX`]; unlock wakes every waiter and lets them race
//! for the lock again, the highest priority one first. There is no priority
//! inheritance and no recursion.

use core::marker::PhantomData;

use portable_atomic::{AtomicU32, Ordering};

use crate::atomic::{atomic_clear_bits, atomic_compare_exchange, atomic_load, atomic_or};
use crate::critical::{is_isr_context, CriticalSection};
use crate::kernel::{self, Kernel};
use crate::panic::{software_panic, PanicReason};
use crate::prio::fls;
use crate::types::{events, TaskId};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 2;

/// Mutex over data owned by the caller
///
/// Meant for `static`s. Lock and unlock act on the running kernel; before
/// the scheduler starts there is only one flow of control and both are
/// no-ops.
pub struct Mutex {
    lock: AtomicU32,
    waiters: AtomicU32,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            lock: AtomicU32::new(UNLOCKED),
            waiters: AtomicU32::new(0),
        }
    }

    fn started_kernel() -> Option<&'static Kernel> {
        kernel::get().ok().filter(|k| k.is_started())
    }

    /// Take the lock without blocking
    ///
    /// Returns true if the lock was free. Always true before start.
    pub fn try_lock(&self) -> bool {
        if Self::started_kernel().is_none() {
            return true;
        }
        atomic_compare_exchange(&self.lock, UNLOCKED, LOCKED).is_ok()
    }

    /// Take the lock, sleeping while another task holds it
    ///
    /// Must not be called from an interrupt handler.
    pub fn lock(&self) {
        let Some(kernel) = Self::started_kernel() else {
            return;
        };
        let me = kernel.current_task();
        if is_isr_context() {
            software_panic(PanicReason::BlockingInIsr, me);
        }

        atomic_or(&self.waiters, me.bit());
        while atomic_compare_exchange(&self.lock, UNLOCKED, LOCKED).is_err() {
            kernel.wait_event_mask(events::MUTEX, 0);
        }
        atomic_clear_bits(&self.waiters, me.bit());
    }

    /// Release the lock and wake every waiter
    pub fn unlock(&self) {
        let Some(kernel) = Self::started_kernel() else {
            return;
        };

        // Releasing and snapshotting the waiters must not be split by a
        // switch, or a waiter that queued in between would sleep forever.
        let mut waiters = {
            let _cs = CriticalSection::enter();
            let waiters = atomic_load(&self.waiters);
            self.lock.store(UNLOCKED, Ordering::Release);
            waiters
        };

        while let Some(bit) = fls(waiters) {
            waiters &= !(1 << bit);
            kernel.set_event(TaskId::from_index(bit as usize), events::MUTEX).ok();
        }

        // A wakeup meant for an earlier wait may still be pending.
        atomic_clear_bits(&kernel.context(kernel.current_task()).events, events::MUTEX);
    }

    /// Take the lock for the lifetime of the returned guard
    pub fn lock_guard(&self) -> MutexGuard<'_> {
        self.lock();
        MutexGuard { mutex: self, _not_send: PhantomData }
    }

    /// True while some task holds the lock
    #[inline]
    pub fn is_locked(&self) -> bool {
        atomic_load(&self.lock) != UNLOCKED
    }

    /// Tasks queued on the lock
    #[inline]
    pub fn waiters(&self) -> u32 {
        atomic_load(&self.waiters)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Unlocks its [`Mutex`] when dropped
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    // Must be dropped by the task that locked.
    _not_send: PhantomData<*const ()>,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
