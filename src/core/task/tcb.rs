//! Per-task runtime context
//!
//! Everything the kernel mutates about a task at run time. The static half
//! (name, entry, stack) lives in [`TaskDescriptor`](super::TaskDescriptor).

use portable_atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Task context block
///
/// All fields are atomics: events are posted from interrupts, the saved stack
/// pointer is written by the switch handler, and the reset state is changed
/// by compare-and-swap from any task.
pub struct TaskContext {
    /// Stack pointer saved at the last switch away from this task
    pub(crate) saved_sp: AtomicUsize,
    /// Stack pointer of the startup frame
    pub(crate) initial_sp: AtomicUsize,
    /// Pending event bitmap
    pub(crate) events: AtomicU32,
    /// Accumulated run time in microseconds
    pub(crate) runtime_us: AtomicU64,
    /// Reset protocol state (see `task::reset`)
    pub(crate) reset_state: AtomicU32,
    /// Number of times this task has been (re)started from its entry
    pub(crate) starts: AtomicU32,
}

impl TaskContext {
    pub const fn new() -> Self {
        TaskContext {
            saved_sp: AtomicUsize::new(0),
            initial_sp: AtomicUsize::new(0),
            events: AtomicU32::new(0),
            runtime_us: AtomicU64::new(0),
            reset_state: AtomicU32::new(0),
            starts: AtomicU32::new(0),
        }
    }

    /// Pending events, without consuming them
    #[inline(always)]
    pub fn events(&self) -> u32 {
        self.events.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn saved_sp(&self) -> usize {
        self.saved_sp.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn initial_sp(&self) -> usize {
        self.initial_sp.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn runtime_us(&self) -> u64 {
        self.runtime_us.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::Relaxed)
    }

    /// Point the task at a freshly built startup frame
    pub(crate) fn set_frame(&self, sp: usize) {
        self.initial_sp.store(sp, Ordering::Release);
        self.saved_sp.store(sp, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn charge(&self, us: u64) {
        self.runtime_us.fetch_add(us, Ordering::Relaxed);
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}
