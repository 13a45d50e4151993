//! Mutex contention between three workers
//!
//! Each worker takes the lock, bumps a shared counter, holds the lock across
//! a short sleep so the others pile up behind it, then releases. The lowest
//! worker reports how many times each task got in.

#![no_std]
#![no_main]

#[path = "board/mod.rs"]
mod board;

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use eckernel::{Kernel, Mutex, Stack, TaskDescriptor};

static LOCK: Mutex = Mutex::new();
static TOTAL: AtomicU32 = AtomicU32::new(0);
static PER_TASK: [AtomicU32; 3] = [const { AtomicU32::new(0) }; 3];

static BOOT_STACK: Stack<256> = Stack::new();
static WORKER_STACKS: [Stack<256>; 3] = [const { Stack::new() }; 3];

static TASKS: [TaskDescriptor; 4] = [
    TaskDescriptor::new("BOOT", boot_task, 0, &BOOT_STACK),
    TaskDescriptor::new("W_LOW", worker_task, 0, &WORKER_STACKS[0]),
    TaskDescriptor::new("W_MID", worker_task, 1, &WORKER_STACKS[1]),
    TaskDescriptor::new("W_HIGH", worker_task, 2, &WORKER_STACKS[2]),
];

static KERNEL: Kernel = Kernel::new(&TASKS, &board::CLOCK);

fn boot_task(kernel: &'static Kernel, _: usize) {
    kernel.enable_all();
}

fn worker_task(kernel: &'static Kernel, slot: usize) {
    loop {
        {
            let _guard = LOCK.lock_guard();
            let n = TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
            PER_TASK[slot].fetch_add(1, Ordering::Relaxed);
            kernel.usleep(200);
            if slot == 0 && n % 64 == 0 {
                info!(
                    "mutex: {} total, low {} mid {} high {}, waiters {:#x}",
                    n,
                    PER_TASK[0].load(Ordering::Relaxed),
                    PER_TASK[1].load(Ordering::Relaxed),
                    PER_TASK[2].load(Ordering::Relaxed),
                    LOCK.waiters()
                );
            }
        }
        // Give lower workers a chance at the lock
        kernel.msleep(1 + slot as u32);
    }
}

#[entry]
fn main() -> ! {
    board::CLOCK.init();

    KERNEL.init().expect("kernel init failed");
    KERNEL.start().expect("kernel start failed");

    loop {
        cortex_m::asm::wfi();
    }
}
