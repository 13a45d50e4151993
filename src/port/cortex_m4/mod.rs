//! Cortex-M4 port implementation
//!
//! Provides context switching via the PendSV exception handler. PendSV runs
//! at the lowest priority, so a switch requested from an interrupt handler
//! is taken on exit from the last nested handler.

use core::arch::{asm, naked_asm};
use core::mem::size_of;

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::{DCB, NVIC, SCB};

use crate::config::{CFG_IRQ_STACK_WORDS, CFG_PENDSV_PRIO};
use crate::critical::CriticalSection;
use crate::error::OsResult;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::task::StackRegion;
use crate::types::TaskId;

/// Interrupt stack for MSP
#[no_mangle]
static mut INTERRUPT_STACK: [u64; CFG_IRQ_STACK_WORDS / 2] = [0; CFG_IRQ_STACK_WORDS / 2];

/// Thread mode, PSP, no FPU context
const INITIAL_EXC_RETURN: u32 = 0xFFFF_FFFD;

/// Only the Thumb bit set
const INITIAL_XPSR: u32 = 0x0100_0000;

/// The Cortex-M port
pub struct CortexM;

/// Raw NVIC line number
#[derive(Clone, Copy)]
struct Irq(u16);

unsafe impl InterruptNumber for Irq {
    #[inline(always)]
    fn number(self) -> u16 {
        self.0
    }
}

/// Task frame as laid out on the process stack
///
/// The first nine words are pushed by PendSV, the rest by the hardware on
/// exception entry.
#[repr(C, align(4))]
struct TaskFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

const FRAME_WORDS: usize = size_of::<TaskFrame>() / size_of::<u32>();

impl Port for CortexM {
    type State = ();
    const INIT_STATE: () = ();

    unsafe fn init_frame(stack: StackRegion, kernel: &'static Kernel, id: TaskId) -> usize {
        unsafe {
            let frame = stack.top().sub(FRAME_WORDS) as *mut TaskFrame;
            frame.write(TaskFrame {
                r4: 0x0404_0404,
                r5: 0x0505_0505,
                r6: 0x0606_0606,
                r7: 0x0707_0707,
                r8: 0x0808_0808,
                r9: 0x0909_0909,
                r10: 0x1010_1010,
                r11: 0x1111_1111,
                exc_return: INITIAL_EXC_RETURN,
                r0: kernel as *const Kernel as u32,
                r1: id.index() as u32,
                r2: 0,
                r3: 0,
                r12: 0,
                lr: task_exit_trap as *const () as u32,
                pc: (task_trampoline as *const () as u32) | 1,
                xpsr: INITIAL_XPSR,
            });
            stack.fill_canary(frame as *mut u32);
            frame as usize
        }
    }

    #[allow(static_mut_refs)]
    fn start(_kernel: &'static Kernel) -> OsResult<()> {
        unsafe {
            let mut scb = cortex_m::Peripherals::steal().SCB;
            scb.set_priority(SystemHandler::PendSV, CFG_PENDSV_PRIO);

            // Switch MSP to the dedicated interrupt stack; this context is
            // abandoned once the first task runs.
            let msp_top = INTERRUPT_STACK.as_ptr() as u32
                + core::mem::size_of_val(&INTERRUPT_STACK) as u32;
            asm!("msr msp, {0}", in(reg) msp_top);
            // PSP == 0 tells PendSV there is no outgoing task to save.
            asm!("msr psp, {0}", in(reg) 0);

            cortex_m::interrupt::enable();
        }
        SCB::set_pendsv();
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[inline(always)]
    fn request_switch(_kernel: &'static Kernel) {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn idle_wait(kernel: &'static Kernel) {
        // Mask first: an interrupt that queues a deferred reset between the
        // check and WFI still wakes the core.
        let _cs = CriticalSection::enter();
        if kernel.has_deferred_work() {
            return;
        }
        if !Self::debugger_attached() {
            cortex_m::asm::wfi();
        }
    }

    #[inline]
    fn debugger_attached() -> bool {
        DCB::is_debugger_attached()
    }

    fn enable_irq(_kernel: &Kernel, irq: u16) {
        unsafe { NVIC::unmask(Irq(irq)) }
    }

    fn disable_irq(_kernel: &Kernel, irq: u16) {
        NVIC::mask(Irq(irq))
    }

    fn clear_pending_irq(_kernel: &Kernel, irq: u16) {
        NVIC::unpend(Irq(irq))
    }

    fn is_irq_pending(_kernel: &Kernel, irq: u16) -> bool {
        NVIC::is_pending(Irq(irq))
    }

    fn trigger_irq(_kernel: &Kernel, irq: u16) {
        NVIC::pend(Irq(irq))
    }

    fn set_irq_priority(_kernel: &Kernel, irq: u16, prio: u8) {
        unsafe {
            let mut nvic = cortex_m::Peripherals::steal().NVIC;
            nvic.set_priority(Irq(irq), prio);
        }
    }
}

/// First instruction of every task: `r0` holds the kernel, `r1` the id
extern "C" fn task_trampoline(kernel: &'static Kernel, id: usize) -> ! {
    kernel.run_task(TaskId::from_index(id))
}

/// Link register of every startup frame
extern "C" fn task_exit_trap() -> ! {
    match Kernel::registered() {
        Some(kernel) => kernel.exit_trap(kernel.current_task()),
        None => loop {
            cortex_m::asm::wfi();
        },
    }
}

/// Called from PendSV: saves the outgoing SP (0 if none) and returns the SP
/// of the task to resume
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn eck_switch_context(cur_sp: usize) -> usize {
    match Kernel::registered() {
        Some(kernel) => kernel.switch_context(cur_sp),
        None => cur_sp,
    }
}

/// PendSV exception handler - performs full context switch
///
/// 1. Save R4-R11, LR to the outgoing task's PSP (skipped on the first switch)
/// 2. Let the kernel pick the next task and hand back its SP
/// 3. Restore R4-R11, LR from the new task's stack
/// 4. Exception return
#[cfg(not(target_abi = "eabihf"))]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "mrs r0, psp",
        "cbz r0, 1f",
        "stmdb r0!, {{r4-r11, lr}}",
        "1:",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "cpsie i",
        "bx lr",
        switch = sym eck_switch_context,
    );
}

/// PendSV exception handler for cores with an FPU
///
/// Same as the soft-float handler, plus the high FPU registers whenever the
/// EXC_RETURN in LR says the task had an FPU context (bit 4 clear).
#[cfg(target_abi = "eabihf")]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // Workaround https://github.com/rust-lang/rust/issues/127269
        ".fpu vfpv3",
        "cpsid i",
        "mrs r0, psp",
        "cbz r0, 1f",
        "tst lr, #0x10",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "stmdb r0!, {{r4-r11, lr}}",
        "1:",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",
        "cpsie i",
        "bx lr",
        switch = sym eck_switch_context,
    );
}
