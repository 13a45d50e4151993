//! Scheduler module
//!
//! Strict priority scheduling over two bitmaps: `ready` (has work) and
//! `enabled` (allowed to run). The highest task id in `ready & enabled` runs;
//! idle (id 0) is always in both, so the choice is never empty.

use portable_atomic::Ordering;

use crate::atomic::{atomic_clear_bits, atomic_load, atomic_or};
use crate::critical::{interrupts_enabled, is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::panic::{software_panic, PanicReason};
use crate::port::{ActivePort, Port};
use crate::prio::{self, TaskMask};
use crate::types::TaskId;

impl Kernel {
    /// Main scheduling point
    ///
    /// Drops the caller from the ready set if `deschedule_self` is set and it
    /// has no pending events, adds the tasks in `wake`, then switches to the
    /// highest runnable task if that is not the caller. Both bitmap updates
    /// happen with interrupts masked, so an event posted after the caller
    /// found its bitmap empty puts it straight back in the ready set.
    pub(crate) fn schedule(&'static self, deschedule_self: bool, wake: u32) {
        ActivePort::preemption_point(self);
        self.stats.schedule_calls.fetch_add(1, Ordering::Relaxed);
        {
            let _cs = CriticalSection::enter();
            let me = self.current_task();
            if deschedule_self && self.context(me).events() == 0 {
                atomic_clear_bits(&self.ready, me.bit());
            }
            atomic_or(&self.ready, wake);
        }
        self.reschedule();
    }

    /// Request a switch if a higher task than the current one is runnable
    pub(crate) fn reschedule(&'static self) {
        if !self.is_started() {
            return;
        }
        let next = prio::select(atomic_load(&self.ready), atomic_load(&self.enabled));
        if next != Some(self.current_task()) {
            ActivePort::request_switch(self);
        }
    }

    /// Pick the next task and swap stack pointers
    ///
    /// Runs inside the switch handler with interrupts masked. `cur_sp` is the
    /// outgoing task's stack pointer, or 0 on the very first switch when
    /// there is nothing to save. Returns the stack pointer to resume.
    pub(crate) fn switch_context(&self, cur_sp: usize) -> usize {
        let cur = self.current_task();
        let now = self.get_time();
        let last = self.stats.last_switch_us.swap(now, Ordering::Relaxed);

        if cur_sp != 0 {
            let ctx = self.context(cur);
            ctx.saved_sp.store(cur_sp, Ordering::Release);
            ctx.charge(now.wrapping_sub(last));

            if self.enabled_mask().contains(cur) && !self.stack_region(cur).canary_intact() {
                crate::error!("Stack overflow in {} task!", self.task_name(cur));
                software_panic(PanicReason::StackOverflow, cur);
            }
        }

        let next = match prio::select(atomic_load(&self.ready), atomic_load(&self.enabled)) {
            Some(next) => next,
            None => software_panic(PanicReason::NoRunnableTask, cur),
        };
        if next.index() >= self.task_count() {
            software_panic(PanicReason::BadTaskId, next);
        }

        if next != cur {
            self.stats.context_switches.fetch_add(1, Ordering::Relaxed);
        }
        self.set_current(next);
        self.context(next).saved_sp()
    }

    /// Body of the idle task
    pub(crate) fn idle_loop(&'static self) -> ! {
        loop {
            #[cfg(feature = "task-reset")]
            self.service_deferred_resets();
            ActivePort::idle_wait(self);
        }
    }

    /// Tasks with work to do
    #[inline]
    pub fn ready_mask(&self) -> TaskMask {
        TaskMask::new(atomic_load(&self.ready))
    }

    /// Tasks allowed to run
    #[inline]
    pub fn enabled_mask(&self) -> TaskMask {
        TaskMask::new(atomic_load(&self.enabled))
    }

    #[inline]
    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.enabled_mask().contains(id)
    }

    /// Mark every task ready and enabled
    ///
    /// Called once by the bootstrap task when the board is set up. Switches
    /// to the highest task right away when called with interrupts enabled.
    pub fn enable_all(&'static self) {
        let all = TaskMask::first(self.task_count()).bits();
        {
            let _cs = CriticalSection::enter();
            atomic_or(&self.enabled, all);
            atomic_or(&self.ready, all);
        }
        crate::debug!("sched: all tasks enabled");
        if interrupts_enabled() && !is_isr_context() {
            self.schedule(false, 0);
        }
    }

    /// Allow a task to run
    ///
    /// The task is picked only once it is also ready (it has pending events,
    /// or has not started yet and `enable_all` marked it).
    pub fn enable(&'static self, id: TaskId) -> OsResult<()> {
        self.check_task(id)?;
        atomic_or(&self.enabled, id.bit());
        if self.can_block() {
            self.reschedule();
        }
        Ok(())
    }

    /// Stop a task from being picked
    ///
    /// Disabling the running task from task context switches away at once.
    ///
    /// # Returns
    /// * `Err(OsError::InvalidArgument)` - The idle task cannot be disabled
    pub fn disable(&'static self, id: TaskId) -> OsResult<()> {
        self.check_task(id)?;
        if id.is_idle() {
            return Err(OsError::InvalidArgument);
        }
        atomic_clear_bits(&self.enabled, id.bit());
        if self.can_block() && id == self.current_task() {
            self.schedule(false, 0);
        }
        Ok(())
    }
}
