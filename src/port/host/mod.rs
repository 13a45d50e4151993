//! Host port: runs the kernel on OS threads
//!
//! Each task (idle included) gets its own thread, and a baton guarantees only
//! the thread of the current task makes progress, just like a single core.
//! Interrupts are closures queued with [`Kernel::raise_interrupt`] and run on
//! whichever task thread holds the baton, at the next preemption point or in
//! the idle loop. Time is virtual ([`SimClock`]): it only moves when the idle
//! task skips ahead to the next deadline or a busy-wait spins.
//!
//! Critical sections only mask the calling thread. Once the kernel runs, a
//! thread that is not a task thread must reach it through
//! [`Kernel::raise_interrupt`]; [`Kernel::set_event`] and [`Kernel::wake`]
//! from such a thread are forwarded that way automatically.

mod clock;

pub use clock::SimClock;

use std::boxed::Box;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::string::ToString;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::critical::{self, interrupts_enabled, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::task::StackRegion;
use crate::types::{EventMask, TaskId};

/// Simulated interrupt handler
pub type Isr = Box<dyn FnOnce(&'static Kernel) + Send>;

/// Interrupt lines of the simulated NVIC
const NVIC_LINES: u16 = 256;
const NVIC_WORDS: usize = NVIC_LINES as usize / 32;

/// Words reserved at the top of a host stack to stand in for a frame
const FRAME_WORDS: usize = 16;

/// Unwind payload that sends a task thread back to its entry
struct TaskRestart;

/// The host port
pub struct HostPort;

struct Cpu {
    /// Task whose thread may run
    running: Option<usize>,
    /// Raised, not yet delivered interrupts
    irqs: VecDeque<Isr>,
    /// Tasks that must restart from their entry when next resumed
    restart: u32,
    /// A task died with a panic; the simulated core is stopped
    halted: bool,
}

/// Per-kernel host state
pub struct HostState {
    cpu: Mutex<Cpu>,
    wake: Condvar,
    switch_pending: AtomicBool,
    nvic_enabled: [AtomicU32; NVIC_WORDS],
    nvic_pending: [AtomicU32; NVIC_WORDS],
}

impl HostState {
    const fn new() -> Self {
        HostState {
            cpu: Mutex::new(Cpu {
                running: None,
                irqs: VecDeque::new(),
                restart: 0,
                halted: false,
            }),
            wake: Condvar::new(),
            switch_pending: AtomicBool::new(false),
            nvic_enabled: [const { AtomicU32::new(0) }; NVIC_WORDS],
            nvic_pending: [const { AtomicU32::new(0) }; NVIC_WORDS],
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cpu> {
        self.cpu.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `id` holds the baton; returns true if it must restart
    fn wait_turn(&self, id: TaskId) -> bool {
        let mut cpu = self.lock();
        while cpu.halted || cpu.running != Some(id.index()) {
            cpu = self.wake.wait(cpu).unwrap_or_else(PoisonError::into_inner);
        }
        let restart = cpu.restart & id.bit() != 0;
        cpu.restart &= !id.bit();
        restart
    }

    fn pass_baton(&self, to: TaskId) {
        let mut cpu = self.lock();
        cpu.running = Some(to.index());
        self.wake.notify_all();
    }

    fn pop_irq(&self) -> Option<Isr> {
        self.lock().irqs.pop_front()
    }

    fn halt(&self) {
        let mut cpu = self.lock();
        cpu.halted = true;
        cpu.running = None;
        self.wake.notify_all();
    }
}

std::thread_local! {
    /// Kernel and task this thread runs
    static BOUND: Cell<Option<(&'static Kernel, TaskId)>> = const { Cell::new(None) };
    /// Kernel whose switch was requested while this thread had interrupts masked
    static DEFERRED: Cell<Option<&'static Kernel>> = const { Cell::new(None) };
}

/// Kernel bound to the calling thread, if it is a task thread
pub(crate) fn bound_kernel() -> Option<&'static Kernel> {
    BOUND.with(|b| b.get()).map(|(kernel, _)| kernel)
}

fn bound_to(kernel: &'static Kernel) -> bool {
    bound_kernel().is_some_and(|k| core::ptr::eq(k, kernel))
}

/// Interrupts were just re-enabled on this thread: take a deferred switch
pub(crate) fn on_unmask() {
    if let Some(kernel) = DEFERRED.with(|d| d.take()) {
        if kernel.arch().switch_pending.load(Ordering::Acquire) {
            HostPort::request_switch(kernel);
        }
    }
}

fn task_thread(kernel: &'static Kernel, id: TaskId) {
    BOUND.with(|b| b.set(Some((kernel, id))));
    let state = kernel.arch();
    loop {
        // A restart requested before the first run changes nothing.
        let _ = state.wait_turn(id);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| kernel.run_task(id)));
        let Err(payload) = outcome else {
            continue;
        };
        critical::reset_context();
        if payload.is::<TaskRestart>() {
            continue;
        }
        // Anything else is a fatal error on the simulated core.
        state.halt();
        return;
    }
}

/// Run every queued interrupt, then take a pending switch like an exception
/// return would. Returns true if anything ran.
fn take_interrupts(kernel: &'static Kernel) -> bool {
    let state = kernel.arch();
    let mut handled = false;
    loop {
        if let Some(isr) = state.pop_irq() {
            critical::with_isr(|| isr(kernel));
        } else if let Some(overflow) = kernel.clock().take_irq() {
            critical::with_isr(|| kernel.on_timer_interrupt(overflow));
        } else {
            break;
        }
        handled = true;
    }
    if state.switch_pending.load(Ordering::Acquire) {
        switch(kernel);
    }
    handled
}

/// Perform a switch on the calling (current task's) thread
fn switch(kernel: &'static Kernel) {
    let state = kernel.arch();
    state.switch_pending.store(false, Ordering::Release);
    let from = kernel.current_task();
    kernel.switch_context(kernel.context(from).saved_sp());
    let next = kernel.current_task();
    if next == from {
        return;
    }
    state.pass_baton(next);
    if state.wait_turn(from) {
        panic::resume_unwind(Box::new(TaskRestart));
    }
}

impl Port for HostPort {
    type State = HostState;
    const INIT_STATE: HostState = HostState::new();

    unsafe fn init_frame(stack: StackRegion, _kernel: &'static Kernel, _id: TaskId) -> usize {
        unsafe {
            let frame = stack.top().sub(FRAME_WORDS);
            for i in 0..FRAME_WORDS {
                frame.add(i).write(0);
            }
            stack.fill_canary(frame);
            frame as usize
        }
    }

    fn start(kernel: &'static Kernel) -> OsResult<()> {
        // Same choice the first switch would make on hardware
        kernel.switch_context(0);
        kernel.arch().pass_baton(kernel.current_task());
        for i in 0..kernel.task_count() {
            let id = TaskId::from_index(i);
            thread::Builder::new()
                .name(kernel.task_name(id).to_string())
                .spawn(move || task_thread(kernel, id))
                .map_err(|_| OsError::OsNotInit)?;
        }
        Ok(())
    }

    fn request_switch(kernel: &'static Kernel) {
        let state = kernel.arch();
        if is_isr_context() || !interrupts_enabled() {
            state.switch_pending.store(true, Ordering::Release);
            if !is_isr_context() {
                DEFERRED.with(|d| d.set(Some(kernel)));
            }
            return;
        }
        if !bound_to(kernel) {
            // Not a task of this kernel; the next preemption point picks it up.
            state.switch_pending.store(true, Ordering::Release);
            let _cpu = state.lock();
            state.wake.notify_all();
            return;
        }
        switch(kernel);
    }

    fn idle_wait(kernel: &'static Kernel) {
        let state = kernel.arch();
        loop {
            if take_interrupts(kernel) {
                return;
            }
            if kernel.has_deferred_work() {
                return;
            }
            if let Some(deadline) = kernel.earliest_deadline() {
                // Nothing else can happen before the next deadline.
                kernel.clock().advance_toward(deadline);
                continue;
            }
            let cpu = state.lock();
            if cpu.irqs.is_empty() && !state.switch_pending.load(Ordering::Acquire) {
                drop(state.wake.wait(cpu).unwrap_or_else(PoisonError::into_inner));
            }
        }
    }

    fn preemption_point(kernel: &'static Kernel) {
        if is_isr_context() || !interrupts_enabled() || !bound_to(kernel) {
            return;
        }
        take_interrupts(kernel);
    }

    fn forward_event(kernel: &'static Kernel, task: TaskId, bits: EventMask) -> bool {
        if bound_to(kernel) {
            return false;
        }
        kernel.raise_interrupt(move |k| {
            let _ = k.set_event(task, bits);
        });
        true
    }

    fn task_reset(kernel: &'static Kernel, id: TaskId) {
        kernel.arch().lock().restart |= id.bit();
    }

    fn debugger_attached() -> bool {
        false
    }

    fn enable_irq(kernel: &Kernel, irq: u16) {
        if let Some((word, bit)) = nvic_slot(irq) {
            kernel.arch().nvic_enabled[word].fetch_or(bit, Ordering::AcqRel);
        }
    }

    fn disable_irq(kernel: &Kernel, irq: u16) {
        if let Some((word, bit)) = nvic_slot(irq) {
            kernel.arch().nvic_enabled[word].fetch_and(!bit, Ordering::AcqRel);
        }
    }

    fn clear_pending_irq(kernel: &Kernel, irq: u16) {
        if let Some((word, bit)) = nvic_slot(irq) {
            kernel.arch().nvic_pending[word].fetch_and(!bit, Ordering::AcqRel);
        }
    }

    fn is_irq_pending(kernel: &Kernel, irq: u16) -> bool {
        nvic_slot(irq)
            .is_some_and(|(word, bit)| kernel.arch().nvic_pending[word].load(Ordering::Acquire) & bit != 0)
    }

    fn trigger_irq(kernel: &Kernel, irq: u16) {
        if let Some((word, bit)) = nvic_slot(irq) {
            kernel.arch().nvic_pending[word].fetch_or(bit, Ordering::AcqRel);
        }
    }

    fn set_irq_priority(_kernel: &Kernel, _irq: u16, _prio: u8) {}
}

/// Word and bit of an NVIC line; `None` past the last line
#[inline]
fn nvic_slot(irq: u16) -> Option<(usize, u32)> {
    (irq < NVIC_LINES).then(|| ((irq / 32) as usize, 1 << (irq % 32)))
}

impl Kernel {
    /// Queue a simulated interrupt handler
    ///
    /// The handler runs in interrupt context on the simulated core, at the
    /// next preemption point or as soon as the idle task is scheduled.
    pub fn raise_interrupt(&'static self, isr: impl FnOnce(&'static Kernel) + Send + 'static) {
        let state = self.arch();
        let mut cpu = state.lock();
        cpu.irqs.push_back(Box::new(isr));
        state.wake.notify_all();
    }

    /// True once a task died with a panic and the simulated core stopped
    pub fn is_halted(&self) -> bool {
        self.arch().lock().halted
    }

    /// True if the simulated NVIC line is enabled
    pub fn is_irq_enabled(&self, irq: u16) -> bool {
        nvic_slot(irq)
            .is_some_and(|(word, bit)| self.arch().nvic_enabled[word].load(Ordering::Acquire) & bit != 0)
    }
}
