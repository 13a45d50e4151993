//! The kernel object: task table, scheduler bitmaps, timers and port state
//!
//! A [`Kernel`] is built in a `static` with [`Kernel::new`], prepared with
//! [`Kernel::init`] and handed the CPU with [`Kernel::start`]. The started
//! kernel is registered so exception handlers and the free-function API can
//! find it.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::config::{CFG_IDLE_STACK_WORDS, CFG_TASK_MAX};
use crate::critical::{interrupts_enabled, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::port::{ActivePort, ArchState, Clock, Port};
use crate::prio::TaskMask;
use crate::task::{Stack, StackRegion, TaskContext, TaskDescriptor};
use crate::time::TimerQueue;
use crate::types::TaskId;

#[cfg(feature = "task-reset")]
use crate::task::reset::{RESET_STATE_UNLOCKED, RESET_UNSUPPORTED};

// ============ Kernel State Structures ============

/// Scheduler counters
pub(crate) struct SchedStats {
    pub(crate) context_switches: AtomicU32,
    pub(crate) schedule_calls: AtomicU32,
    pub(crate) last_switch_us: AtomicU64,
    pub(crate) start_time_us: AtomicU64,
}

impl SchedStats {
    const fn new() -> Self {
        Self {
            context_switches: AtomicU32::new(0),
            schedule_calls: AtomicU32::new(0),
            last_switch_us: AtomicU64::new(0),
            start_time_us: AtomicU64::new(0),
        }
    }
}

/// Snapshot of the scheduler counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KernelStats {
    /// Switches that changed the running task
    pub context_switches: u32,
    /// Calls into the scheduler from task context
    pub schedule_calls: u32,
    /// Clock time when the scheduler started
    pub start_time_us: u64,
}

/// Scheduler context
pub struct Kernel {
    tasks: &'static [TaskDescriptor],
    clock: &'static Clock,
    contexts: [TaskContext; CFG_TASK_MAX],
    idle_stack: Stack<CFG_IDLE_STACK_WORDS>,
    /// Tasks with work to do
    pub(crate) ready: AtomicU32,
    /// Tasks allowed to run
    pub(crate) enabled: AtomicU32,
    current: AtomicU32,
    initialized: AtomicBool,
    started: AtomicBool,
    pub(crate) timers: TimerQueue,
    /// Tasks waiting for the idle task to reset them
    #[cfg(feature = "task-reset")]
    pub(crate) deferred_resets: AtomicU32,
    pub(crate) stats: SchedStats,
    arch: ArchState,
}

impl Kernel {
    /// Build a kernel over a static task table and clock
    ///
    /// Task ids are assigned in table order starting at 1 (id 0 is the idle
    /// task); the first entry is the bootstrap task, the only one besides
    /// idle that runs before [`Kernel::enable_all`].
    pub const fn new(tasks: &'static [TaskDescriptor], clock: &'static Clock) -> Self {
        Kernel {
            tasks,
            clock,
            contexts: [const { TaskContext::new() }; CFG_TASK_MAX],
            idle_stack: Stack::new(),
            ready: AtomicU32::new(0),
            enabled: AtomicU32::new(0),
            current: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
            started: AtomicBool::new(false),
            timers: TimerQueue::new(),
            #[cfg(feature = "task-reset")]
            deferred_resets: AtomicU32::new(0),
            stats: SchedStats::new(),
            arch: ActivePort::INIT_STATE,
        }
    }

    /// Validate the task table and build every startup frame
    ///
    /// # Returns
    /// * `Err(OsError::OsRunning)` - Scheduler already started
    /// * `Err(OsError::TooManyTasks)` - Table does not fit the id space
    /// * `Err(OsError::StackSizeInvalid)` - A stack is too small or misaligned
    pub fn init(&'static self) -> OsResult<()> {
        if self.is_started() {
            return Err(OsError::OsRunning);
        }
        if self.tasks.len() + 1 > CFG_TASK_MAX {
            return Err(OsError::TooManyTasks);
        }
        Self::validate_stack(&self.idle_stack.region())?;
        for desc in self.tasks {
            Self::validate_stack(&desc.stack)?;
        }

        self.timers.reset();
        for i in 0..self.task_count() {
            let id = TaskId::from_index(i);
            let ctx = self.context(id);
            ctx.events.store(0, Ordering::Release);
            ctx.runtime_us.store(0, Ordering::Relaxed);
            #[cfg(feature = "task-reset")]
            {
                let resettable = self.descriptor(id).is_some_and(|d| d.resettable);
                let state = if resettable { RESET_STATE_UNLOCKED } else { RESET_UNSUPPORTED };
                ctx.reset_state.store(state, Ordering::Release);
            }
            self.init_task_context(id);
        }

        let boot = if self.tasks.is_empty() {
            TaskMask::EMPTY.with(TaskId::IDLE)
        } else {
            TaskMask::EMPTY.with(TaskId::IDLE).with(TaskId::BOOTSTRAP)
        };
        self.ready.store(boot.bits(), Ordering::Release);
        self.enabled.store(boot.bits(), Ordering::Release);
        self.current.store(TaskId::IDLE.index() as u32, Ordering::Release);

        self.initialized.store(true, Ordering::Release);
        crate::debug!("kernel: {} tasks initialized", self.task_count());
        Ok(())
    }

    /// Start scheduling
    ///
    /// On hardware this does not return: the boot context is abandoned and
    /// the bootstrap task runs. On the host port it returns once the task
    /// threads are running.
    ///
    /// # Returns
    /// * `Err(OsError::OsNotInit)` - [`Kernel::init`] was not called
    /// * `Err(OsError::OsRunning)` - Already started
    pub fn start(&'static self) -> OsResult<()> {
        if !self.is_initialized() {
            return Err(OsError::OsNotInit);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(OsError::OsRunning);
        }
        let now = self.get_time();
        self.stats.start_time_us.store(now, Ordering::Relaxed);
        self.stats.last_switch_us.store(now, Ordering::Relaxed);
        Self::register(self);
        crate::info!("kernel: scheduler started");
        ActivePort::start(self)
    }

    // ============ Accessors ============

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// True once [`Kernel::start`] has been called
    #[inline(always)]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Number of task ids in use, idle included
    #[inline(always)]
    pub fn task_count(&self) -> usize {
        self.tasks.len() + 1
    }

    /// Id of the running task (idle before start)
    #[inline(always)]
    pub fn current_task(&self) -> TaskId {
        TaskId::from_index(self.current.load(Ordering::Acquire) as usize)
    }

    #[inline(always)]
    pub(crate) fn set_current(&self, id: TaskId) {
        self.current.store(id.index() as u32, Ordering::Release);
    }

    /// Runtime context of a task. `id` must be in range.
    #[inline(always)]
    pub fn context(&self, id: TaskId) -> &TaskContext {
        &self.contexts[id.index()]
    }

    /// Table entry of a task; `None` for idle and out-of-range ids
    #[inline]
    pub fn descriptor(&self, id: TaskId) -> Option<&'static TaskDescriptor> {
        match id.index() {
            0 => None,
            i => self.tasks.get(i - 1),
        }
    }

    /// Stack of a task. `id` must be in range.
    pub fn stack_region(&self, id: TaskId) -> StackRegion {
        match self.descriptor(id) {
            Some(desc) => desc.stack,
            None => self.idle_stack.region(),
        }
    }

    #[inline(always)]
    pub(crate) fn clock(&self) -> &'static Clock {
        self.clock
    }

    #[inline(always)]
    pub(crate) fn arch(&self) -> &ArchState {
        &self.arch
    }

    /// Error unless `id` names a task of this kernel
    #[inline]
    pub fn check_task(&self, id: TaskId) -> OsResult<()> {
        if id.index() < self.task_count() {
            Ok(())
        } else {
            Err(OsError::InvalidTask)
        }
    }

    /// Task id from a raw number, checked against this kernel's table
    pub fn task_id(&self, raw: usize) -> OsResult<TaskId> {
        let id = TaskId::new(raw).ok_or(OsError::InvalidTask)?;
        self.check_task(id)?;
        Ok(id)
    }

    /// Scheduler counters
    pub fn stats(&self) -> KernelStats {
        KernelStats {
            context_switches: self.stats.context_switches.load(Ordering::Relaxed),
            schedule_calls: self.stats.schedule_calls.load(Ordering::Relaxed),
            start_time_us: self.stats.start_time_us.load(Ordering::Relaxed),
        }
    }

    /// True if the idle task has background work queued
    pub(crate) fn has_deferred_work(&self) -> bool {
        #[cfg(feature = "task-reset")]
        {
            self.deferred_resets.load(Ordering::Acquire) != 0
        }
        #[cfg(not(feature = "task-reset"))]
        {
            false
        }
    }

    /// Assert task context with interrupts enabled, as blocking calls need
    #[inline]
    pub(crate) fn can_block(&self) -> bool {
        !is_isr_context() && interrupts_enabled()
    }

    // ============ Interrupt controller ============

    pub fn enable_irq(&self, irq: u16) {
        ActivePort::enable_irq(self, irq)
    }

    pub fn disable_irq(&self, irq: u16) {
        ActivePort::disable_irq(self, irq)
    }

    pub fn clear_pending_irq(&self, irq: u16) {
        ActivePort::clear_pending_irq(self, irq)
    }

    pub fn is_irq_pending(&self, irq: u16) -> bool {
        ActivePort::is_irq_pending(self, irq)
    }

    /// Software-trigger an interrupt line
    pub fn trigger_irq(&self, irq: u16) {
        ActivePort::trigger_irq(self, irq)
    }

    pub fn set_irq_priority(&self, irq: u16, prio: u8) {
        ActivePort::set_irq_priority(self, irq, prio)
    }

    // ============ Registration ============

    /// The kernel running on this CPU, once started
    #[inline]
    pub fn registered() -> Option<&'static Kernel> {
        registry::get()
    }

    fn register(kernel: &'static Kernel) {
        registry::set(kernel)
    }
}

/// The kernel running on this CPU
///
/// # Returns
/// * `Err(OsError::OsNotRunning)` - No kernel has been started
pub fn get() -> OsResult<&'static Kernel> {
    Kernel::registered().ok_or(OsError::OsNotRunning)
}

/// Microseconds on the running kernel's clock (0 before start)
pub fn timestamp_now() -> u64 {
    match Kernel::registered() {
        Some(kernel) => kernel.get_time(),
        None => 0,
    }
}

#[cfg(target_arch = "arm")]
mod registry {
    use portable_atomic::{AtomicPtr, Ordering};

    use super::Kernel;

    /// The location of the one started [`Kernel`], for PendSV and the
    /// free-function API
    static KERNEL_PTR: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

    pub(super) fn get() -> Option<&'static Kernel> {
        let ptr = KERNEL_PTR.load(Ordering::Acquire);
        // SAFETY: only ever set from a `&'static Kernel`.
        unsafe { ptr.as_ref() }
    }

    pub(super) fn set(kernel: &'static Kernel) {
        KERNEL_PTR.store(kernel as *const Kernel as *mut Kernel, Ordering::Release);
    }
}

/// On the host several kernels run side by side (one per test); each task
/// thread knows its own.
#[cfg(not(target_arch = "arm"))]
mod registry {
    use super::Kernel;

    pub(super) fn get() -> Option<&'static Kernel> {
        crate::port::host::bound_kernel()
    }

    pub(super) fn set(_kernel: &'static Kernel) {}
}
