//! Blink Example - LED blinking on STM32F401
//!
//! The bootstrap task releases the others; one toggles the LED on PA5, the
//! other reports the clock once a second.

#![no_std]
#![no_main]

#[path = "board/mod.rs"]
mod board;

use cortex_m_rt::entry;
use defmt::info;
use eckernel::{Kernel, Stack, TaskDescriptor};

static BOOT_STACK: Stack<256> = Stack::new();
static BLINK_STACK: Stack<256> = Stack::new();
static HEARTBEAT_STACK: Stack<256> = Stack::new();

static TASKS: [TaskDescriptor; 3] = [
    TaskDescriptor::new("BOOT", boot_task, 0, &BOOT_STACK),
    TaskDescriptor::new("HEARTBEAT", heartbeat_task, 0, &HEARTBEAT_STACK),
    TaskDescriptor::new("BLINK", blink_task, 500, &BLINK_STACK),
];

static KERNEL: Kernel = Kernel::new(&TASKS, &board::CLOCK);

fn boot_task(kernel: &'static Kernel, _: usize) {
    info!("boot: enabling tasks");
    kernel.enable_all();
}

fn blink_task(kernel: &'static Kernel, half_period_ms: usize) {
    info!("Blink task started");
    let mut on = false;
    loop {
        on = !on;
        board::led_set(on);
        kernel.msleep(half_period_ms as u32);
    }
}

fn heartbeat_task(kernel: &'static Kernel, _: usize) {
    loop {
        // Nobody else sends us events, so this always times out
        let events = kernel.wait_event(1_000_000);
        info!("heartbeat: {=u64:us} events {:#x}", kernel.get_time(), events);
    }
}

#[entry]
fn main() -> ! {
    board::led_init();
    board::CLOCK.init();

    KERNEL.init().expect("kernel init failed");
    info!("Starting kernel");
    KERNEL.start().expect("kernel start failed");

    loop {
        cortex_m::asm::wfi();
    }
}
