//! Task management module
//!
//! Tasks are declared once, in a static table handed to [`Kernel::new`]. This
//! module owns the table entry type, task stacks, startup frames and the
//! task list diagnostics.

mod tcb;
#[cfg(feature = "task-reset")]
pub mod reset;

pub use tcb::TaskContext;

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr;

use crate::config::{CFG_STACK_CANARY, CFG_STK_SIZE_MIN};
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::port::{ActivePort, Port};
use crate::types::{OsStkElement, TaskId, TaskState};

/// Task entry point function type
///
/// Receives the kernel it runs on and the argument from its table entry.
/// Returning is allowed; the task then sleeps forever.
pub type TaskEntry = fn(&'static Kernel, usize);

/// A task stack of `WORDS` 32-bit words.
///
/// Stacks are aligned on 8-byte boundaries, as required by AAPCS.
#[repr(C, align(8))]
pub struct Stack<const WORDS: usize> {
    contents: UnsafeCell<[OsStkElement; WORDS]>,
}

impl<const WORDS: usize> Stack<WORDS> {
    pub const fn new() -> Self {
        Self {
            contents: UnsafeCell::new([0; WORDS]),
        }
    }

    /// Pointer and size of this stack
    pub const fn region(&self) -> StackRegion {
        StackRegion {
            base: self.contents.get() as *mut OsStkElement,
            words: WORDS,
        }
    }
}

// SAFETY: the kernel is the only writer, and only while building a frame for
// a task that is not running.
unsafe impl<const WORDS: usize> Sync for Stack<WORDS> {}

impl<const WORDS: usize> Default for Stack<WORDS> {
    fn default() -> Self {
        Stack::new()
    }
}

/// Location of one task stack
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    base: *mut OsStkElement,
    words: usize,
}

impl StackRegion {
    /// Lowest word of the stack (where the canary lives)
    #[inline(always)]
    pub fn base(&self) -> *mut OsStkElement {
        self.base
    }

    /// Size in words
    #[inline(always)]
    pub fn words(&self) -> usize {
        self.words
    }

    /// Size in bytes
    #[inline(always)]
    pub fn bytes(&self) -> usize {
        self.words * core::mem::size_of::<OsStkElement>()
    }

    /// One past the highest word, rounded down to 8 bytes
    #[inline]
    pub fn top(&self) -> *mut OsStkElement {
        let end = self.base as usize + self.bytes();
        (end & !7) as *mut OsStkElement
    }

    /// True if the lowest word still holds the canary
    #[inline]
    pub fn canary_intact(&self) -> bool {
        unsafe { ptr::read_volatile(self.base) == CFG_STACK_CANARY }
    }

    /// Bytes touched so far, found by scanning up from the base for the first
    /// word that is no longer the canary
    pub fn bytes_used(&self, sp: usize) -> usize {
        let mut unused = 0;
        let mut p = self.base;
        while (p as usize) < sp && unused < self.words {
            if unsafe { ptr::read_volatile(p) } != CFG_STACK_CANARY {
                break;
            }
            unused += 1;
            p = unsafe { p.add(1) };
        }
        self.bytes() - unused * core::mem::size_of::<OsStkElement>()
    }

    /// Fill every word below `frame` with the canary
    ///
    /// # Safety
    /// The task owning this stack must not be running, and `frame` must lie
    /// inside the region.
    pub(crate) unsafe fn fill_canary(&self, frame: *mut OsStkElement) {
        let mut p = self.base;
        while p < frame {
            unsafe {
                ptr::write_volatile(p, CFG_STACK_CANARY);
                p = p.add(1);
            }
        }
    }

    /// Overwrite the canary word (test hook for overflow detection)
    ///
    /// # Safety
    /// Corrupts the stack guard; the next switch away from the task is fatal.
    pub unsafe fn smash_canary(&self) {
        unsafe { ptr::write_volatile(self.base, !CFG_STACK_CANARY) }
    }
}

/// One entry of the static task table
pub struct TaskDescriptor {
    pub(crate) name: &'static str,
    pub(crate) entry: TaskEntry,
    pub(crate) arg: usize,
    pub(crate) stack: StackRegion,
    pub(crate) resettable: bool,
}

// SAFETY: descriptors are immutable; the stack pointer is only dereferenced
// by the kernel that owns the table.
unsafe impl Sync for TaskDescriptor {}

impl TaskDescriptor {
    /// Declare a task
    ///
    /// # Example
    /// ```ignore
    /// static BLINK_STACK: Stack<256> = Stack::new();
    /// static TASKS: [TaskDescriptor; 1] = [
    ///     TaskDescriptor::new("BLINK", blink_task, 0, &BLINK_STACK),
    /// ];
    /// ```
    pub const fn new<const WORDS: usize>(
        name: &'static str,
        entry: TaskEntry,
        arg: usize,
        stack: &'static Stack<WORDS>,
    ) -> Self {
        TaskDescriptor {
            name,
            entry,
            arg,
            stack: stack.region(),
            resettable: false,
        }
    }

    /// Opt this task into the reset protocol
    pub const fn resettable(mut self) -> Self {
        self.resettable = true;
        self
    }

    #[inline(always)]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline(always)]
    pub fn stack(&self) -> StackRegion {
        self.stack
    }

    #[inline(always)]
    pub fn is_resettable(&self) -> bool {
        self.resettable
    }
}

/// Snapshot of one task, for diagnostics
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: &'static str,
    pub state: TaskState,
    pub ready: bool,
    pub events: u32,
    pub runtime_us: u64,
    pub stack_used: usize,
    pub stack_size: usize,
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:4} {} {:<16} {:08x} {:4}.{:06}  {:3}/{:3}",
            self.id.index(),
            if self.ready { 'R' } else { ' ' },
            self.name,
            self.events,
            self.runtime_us / 1_000_000,
            self.runtime_us % 1_000_000,
            self.stack_used,
            self.stack_size,
        )
    }
}

pub(crate) const IDLE_NAME: &str = "<< idle >>";

impl Kernel {
    /// Check a table stack before building its frame
    pub(crate) fn validate_stack(stack: &StackRegion) -> OsResult<()> {
        if stack.base().is_null() || stack.words() < CFG_STK_SIZE_MIN {
            return Err(OsError::StackSizeInvalid);
        }
        if (stack.base() as usize) & 7 != 0 {
            return Err(OsError::StackSizeInvalid);
        }
        Ok(())
    }

    /// Build the startup frame for `id` and point its saved SP at it
    ///
    /// The event bitmap is left untouched.
    pub(crate) fn init_task_context(&'static self, id: TaskId) {
        let stack = self.stack_region(id);
        // SAFETY: `id` is not running (boot, or a reset of another task).
        let sp = unsafe { ActivePort::init_frame(stack, self, id) };
        self.context(id).set_frame(sp);
    }

    /// Body shared by every task: run the entry, then the exit trap
    pub(crate) fn run_task(&'static self, id: TaskId) -> ! {
        self.context(id).starts.fetch_add(1, portable_atomic::Ordering::Relaxed);
        if id.is_idle() {
            self.idle_loop();
        }
        if let Some(desc) = self.descriptor(id) {
            (desc.entry)(self, desc.arg);
        }
        self.exit_trap(id)
    }

    /// Where a returning task ends up: log once and sleep forever
    pub(crate) fn exit_trap(&'static self, id: TaskId) -> ! {
        crate::warn!("Task {} ({}) exited!", id, self.task_name(id));
        loop {
            self.wait_event(0);
        }
    }

    /// Name of a task, `"<< idle >>"` for the idle task
    pub fn task_name(&self, id: TaskId) -> &'static str {
        match self.descriptor(id) {
            Some(desc) => desc.name,
            None => IDLE_NAME,
        }
    }

    /// Snapshot of one task
    pub fn task_info(&self, id: TaskId) -> OsResult<TaskInfo> {
        self.check_task(id)?;
        let ctx = self.context(id);
        let stack = self.stack_region(id);
        let ready = self.ready_mask().contains(id);
        let state = if !self.enabled_mask().contains(id) {
            TaskState::Disabled
        } else if self.is_started() && self.current_task() == id {
            TaskState::Running
        } else if ready {
            TaskState::Ready
        } else {
            TaskState::Blocked
        };
        Ok(TaskInfo {
            id,
            name: self.task_name(id),
            state,
            ready,
            events: ctx.events(),
            runtime_us: ctx.runtime_us(),
            stack_used: stack.bytes_used(ctx.saved_sp()),
            stack_size: stack.bytes(),
        })
    }

    /// Iterate snapshots of every task, idle first
    pub fn tasks(&self) -> impl Iterator<Item = TaskInfo> + '_ {
        (0..self.task_count()).filter_map(move |i| self.task_info(TaskId::from_index(i)).ok())
    }

    /// Write the task table in console form
    pub fn print_task_list<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "Task Ready Name         Events      Time (s)  StkUsed")?;
        for info in self.tasks() {
            writeln!(out, "{}", info)?;
        }
        Ok(())
    }
}
