//! Compile-time configuration for the kernel
//!
//! These constants control the resource limits of the kernel.

/// Maximum number of task ids, idle included.
///
/// Bits 29..31 of the reset state word are taken by the anonymous waiter and
/// the lock/supported flags, so every task id must fit below bit 29.
pub const CFG_TASK_MAX: usize = 29;

/// Minimum task stack size, in words
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Idle task stack size, in words
pub const CFG_IDLE_STACK_WORDS: usize = 128;

/// Interrupt (main) stack size, in words
pub const CFG_IRQ_STACK_WORDS: usize = 512;

/// Pattern written over unused stack, checked at the stack base on every switch
pub const CFG_STACK_CANARY: u32 = 0xdead_d00d;

/// PendSV priority (lowest, so switches happen after every other handler)
pub const CFG_PENDSV_PRIO: u8 = 0xF0;

/// Priority suggested for the clock source interrupt
pub const CFG_TIMER_IRQ_PRIO: u8 = 0x20;
