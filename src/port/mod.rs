//! Port layer - CPU-specific implementations
//!
//! Everything the kernel needs from the CPU goes through [`Port`]: building
//! a startup frame, requesting a context switch, waiting for interrupts and
//! driving the interrupt controller. `ActivePort` is the implementation for
//! the build target.

use crate::error::OsResult;
use crate::kernel::Kernel;
use crate::task::StackRegion;
use crate::types::{EventMask, TaskId};

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::CortexM as ActivePort;

#[cfg(not(target_arch = "arm"))]
pub mod host;

#[cfg(not(target_arch = "arm"))]
pub use host::HostPort as ActivePort;

/// Per-kernel state kept by the active port
pub type ArchState = <ActivePort as Port>::State;

/// Clock type the kernel is built against on this target
#[cfg(target_arch = "arm")]
pub type Clock = dyn crate::time::ClockSource;

#[cfg(not(target_arch = "arm"))]
pub type Clock = host::SimClock;

/// CPU services used by the kernel
pub trait Port {
    /// Port state embedded in every [`Kernel`]
    type State: Sync;

    /// Initial value of [`Port::State`]
    const INIT_STATE: Self::State;

    /// Write the startup frame for `id` at the top of `stack` and fill the
    /// rest with the canary. Returns the stack pointer to restore from.
    ///
    /// # Safety
    /// Task `id` must not be running.
    unsafe fn init_frame(stack: StackRegion, kernel: &'static Kernel, id: TaskId) -> usize;

    /// Hand the CPU to the first task. Only returns on ports where the boot
    /// context keeps running alongside the tasks.
    fn start(kernel: &'static Kernel) -> OsResult<()>;

    /// Ask for a switch to the highest ready task. Deferred until interrupts
    /// are enabled and no handler is active.
    fn request_switch(kernel: &'static Kernel);

    /// Sleep until something happens (body of the idle task)
    fn idle_wait(kernel: &'static Kernel);

    /// Point at the start of every scheduling call where pending interrupts
    /// may be taken
    #[inline(always)]
    fn preemption_point(_kernel: &'static Kernel) {}

    /// Take over an event posted from outside the CPU the kernel runs on
    ///
    /// Returns true if the port will deliver it itself. Only the host port
    /// has such callers: threads that are not task threads.
    #[inline(always)]
    fn forward_event(_kernel: &'static Kernel, _task: TaskId, _bits: EventMask) -> bool {
        false
    }

    /// Task `id` got a fresh startup frame
    #[inline(always)]
    fn task_reset(_kernel: &'static Kernel, _id: TaskId) {}

    /// True if a debugger is attached (idle then avoids deep sleep)
    fn debugger_attached() -> bool;

    fn enable_irq(kernel: &Kernel, irq: u16);
    fn disable_irq(kernel: &Kernel, irq: u16);
    fn clear_pending_irq(kernel: &Kernel, irq: u16);
    fn is_irq_pending(kernel: &Kernel, irq: u16) -> bool;
    fn trigger_irq(kernel: &Kernel, irq: u16);
    fn set_irq_priority(kernel: &Kernel, irq: u16, prio: u8);
}
