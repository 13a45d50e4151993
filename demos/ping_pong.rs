//! Ping-pong over task events
//!
//! PING and PONG bounce a custom event back and forth. PONG is resettable:
//! every few seconds MONITOR restarts it, and PING sees one round time out
//! while that happens.

#![no_std]
#![no_main]

#[path = "board/mod.rs"]
mod board;

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::{info, warn};
use eckernel::types::events;
use eckernel::{Kernel, Stack, TaskDescriptor, TaskId};

const EVENT_PING: u32 = events::custom(0);
const EVENT_PONG: u32 = events::custom(1);

const PING: TaskId = task(2);
const PONG: TaskId = task(3);

const fn task(raw: usize) -> TaskId {
    match TaskId::new(raw) {
        Some(id) => id,
        None => panic!("task id out of range"),
    }
}

static ROUNDS: AtomicU32 = AtomicU32::new(0);

static BOOT_STACK: Stack<256> = Stack::new();
static PING_STACK: Stack<256> = Stack::new();
static PONG_STACK: Stack<256> = Stack::new();
static MONITOR_STACK: Stack<256> = Stack::new();

static TASKS: [TaskDescriptor; 4] = [
    TaskDescriptor::new("BOOT", boot_task, 0, &BOOT_STACK),
    TaskDescriptor::new("PING", ping_task, 0, &PING_STACK),
    TaskDescriptor::new("PONG", pong_task, 0, &PONG_STACK).resettable(),
    TaskDescriptor::new("MONITOR", monitor_task, 0, &MONITOR_STACK),
];

static KERNEL: Kernel = Kernel::new(&TASKS, &board::CLOCK);

fn boot_task(kernel: &'static Kernel, _: usize) {
    kernel.enable_all();
}

fn ping_task(kernel: &'static Kernel, _: usize) {
    loop {
        let _ = kernel.set_event(PONG, EVENT_PING);
        let got = kernel.wait_event_mask(EVENT_PONG, 10_000);
        if got & EVENT_PONG == 0 {
            warn!("ping: no answer");
            kernel.msleep(1);
            continue;
        }
        let n = ROUNDS.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 10_000 == 0 {
            info!("ping: {} rounds", n);
        }
    }
}

fn pong_task(kernel: &'static Kernel, _: usize) {
    if kernel.reset_cleanup() {
        info!("pong: restarted");
    }
    loop {
        let got = kernel.wait_event_mask(EVENT_PING, 0);
        // Hold resets off while answering so PING never loses a reply
        kernel.disable_resets();
        if got & EVENT_PING != 0 {
            let _ = kernel.set_event(PING, EVENT_PONG);
        }
        kernel.enable_resets();
    }
}

fn monitor_task(kernel: &'static Kernel, _: usize) {
    loop {
        kernel.msleep(5000);
        match kernel.reset(PONG, true) {
            Ok(()) => info!("monitor: pong reset after {} rounds", ROUNDS.load(Ordering::Relaxed)),
            Err(e) => warn!("monitor: reset failed: {}", e),
        }
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
