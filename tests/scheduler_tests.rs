//! Whole-kernel scenarios on the host port
//!
//! Every test builds its own kernel, task table and virtual clock, starts it
//! and watches the task threads from the test thread. Time is virtual, so
//! timeouts are exact.

use std::string::String;
use std::sync::Mutex as StdMutex;
use std::thread;
use std::time::{Duration, Instant};

use eckernel::port::host::SimClock;
use eckernel::types::{events, TaskId};
use eckernel::{Kernel, OsError, Stack, TaskDescriptor};

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn push(log: &StdMutex<Vec<String>>, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn snapshot(log: &StdMutex<Vec<String>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn id(raw: usize) -> TaskId {
    TaskId::new(raw).unwrap()
}

#[test]
fn test_start_requires_init() {
    static CLOCK: SimClock = SimClock::new();
    static TASKS: [TaskDescriptor; 0] = [];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    assert_eq!(KERNEL.start(), Err(OsError::OsNotInit));
    assert!(!KERNEL.is_started());
}

#[test]
fn test_init_rejects_small_stack() {
    fn entry(_: &'static Kernel, _: usize) {}
    static CLOCK: SimClock = SimClock::new();
    static STACK: Stack<16> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("TINY", entry, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    assert_eq!(KERNEL.init(), Err(OsError::StackSizeInvalid));
    assert!(!KERNEL.is_initialized());
}

#[test]
fn test_boot_state_and_task_lookup() {
    fn entry(_: &'static Kernel, _: usize) {}
    static CLOCK: SimClock = SimClock::new();
    static STACK_A: Stack<128> = Stack::new();
    static STACK_B: Stack<128> = Stack::new();
    static TASKS: [TaskDescriptor; 2] = [
        TaskDescriptor::new("BOOT", entry, 0, &STACK_A),
        TaskDescriptor::new("OTHER", entry, 0, &STACK_B),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    assert_eq!(KERNEL.task_count(), 3);
    // Only idle and the bootstrap task run before enable_all
    assert_eq!(KERNEL.ready_mask().bits(), 0b011);
    assert_eq!(KERNEL.enabled_mask().bits(), 0b011);
    assert_eq!(KERNEL.task_name(TaskId::IDLE), "<< idle >>");
    assert_eq!(KERNEL.task_name(id(2)), "OTHER");
    assert_eq!(KERNEL.task_id(2), Ok(id(2)));
    assert_eq!(KERNEL.task_id(3), Err(OsError::InvalidTask));
    assert_eq!(KERNEL.disable(TaskId::IDLE), Err(OsError::InvalidArgument));

    for i in 0..3 {
        let ctx = KERNEL.context(id(i));
        assert_eq!(ctx.saved_sp(), ctx.initial_sp());
        assert!(KERNEL.stack_region(id(i)).canary_intact());
    }
}

#[test]
fn test_set_event_before_start_is_recorded() {
    fn entry(_: &'static Kernel, _: usize) {}
    static CLOCK: SimClock = SimClock::new();
    static STACK_A: Stack<128> = Stack::new();
    static STACK_B: Stack<128> = Stack::new();
    static TASKS: [TaskDescriptor; 2] = [
        TaskDescriptor::new("BOOT", entry, 0, &STACK_A),
        TaskDescriptor::new("OTHER", entry, 0, &STACK_B),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.set_event(id(2), events::custom(4)).unwrap();
    assert_eq!(KERNEL.peek_events(id(2)), Ok(events::custom(4)));
    assert!(KERNEL.ready_mask().contains(id(2)));
    // Still not enabled
    assert!(!KERNEL.is_enabled(id(2)));
    assert_eq!(KERNEL.set_event(id(9), events::WAKE), Err(OsError::InvalidTask));
}

#[test]
fn test_timer_arm_is_exclusive_per_task() {
    fn entry(_: &'static Kernel, _: usize) {}
    static CLOCK: SimClock = SimClock::new();
    static STACK_A: Stack<128> = Stack::new();
    static STACK_B: Stack<128> = Stack::new();
    static TASKS: [TaskDescriptor; 2] = [
        TaskDescriptor::new("BOOT", entry, 0, &STACK_A),
        TaskDescriptor::new("OTHER", entry, 0, &STACK_B),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    assert_eq!(KERNEL.earliest_deadline(), None);

    KERNEL.timer_arm(500, id(1)).unwrap();
    assert_eq!(KERNEL.timer_arm(300, id(1)), Err(OsError::Busy));
    // The first deadline stays in effect
    assert_eq!(KERNEL.earliest_deadline(), Some(500));

    KERNEL.timer_arm(200, id(2)).unwrap();
    assert_eq!(KERNEL.earliest_deadline(), Some(200));

    let mut info = String::new();
    KERNEL.print_timer_info(&mut info).unwrap();
    assert!(info.contains("Active timers:"));
    assert!(info.contains("Tsk  1"));
    assert!(info.contains("Tsk  2"));

    KERNEL.timer_cancel(id(2)).unwrap();
    assert_eq!(KERNEL.earliest_deadline(), Some(500));
    KERNEL.timer_cancel(id(1)).unwrap();
    KERNEL.timer_arm(300, id(1)).unwrap();
    assert_eq!(KERNEL.earliest_deadline(), Some(300));

    assert_eq!(KERNEL.timer_arm(10, id(7)), Err(OsError::InvalidTask));
}

#[test]
fn test_irq_helpers() {
    static CLOCK: SimClock = SimClock::new();
    static TASKS: [TaskDescriptor; 0] = [];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.enable_irq(5);
    assert!(KERNEL.is_irq_enabled(5));
    KERNEL.disable_irq(5);
    assert!(!KERNEL.is_irq_enabled(5));

    KERNEL.trigger_irq(40);
    assert!(KERNEL.is_irq_pending(40));
    KERNEL.clear_pending_irq(40);
    assert!(!KERNEL.is_irq_pending(40));

    // Lines past the controller do not alias onto real ones
    KERNEL.trigger_irq(256 + 40);
    assert!(!KERNEL.is_irq_pending(40));
    assert!(!KERNEL.is_irq_pending(256 + 40));
    KERNEL.enable_irq(255);
    assert!(KERNEL.is_irq_enabled(255));
    KERNEL.enable_irq(300);
    assert!(!KERNEL.is_irq_enabled(300));
    assert!(!KERNEL.is_irq_enabled(300 - 256));
}

#[test]
fn test_highest_task_runs_first() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        push(&LOG, "boot");
        kernel.enable_all();
        push(&LOG, "boot after enable_all");
    }
    fn worker(_: &'static Kernel, arg: usize) {
        push(&LOG, format!("worker {}", arg));
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static STACK_3: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 3] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("LOW", worker, 2, &STACK_2),
        TaskDescriptor::new("HIGH", worker, 3, &STACK_3),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 4));
    assert_eq!(
        snapshot(&LOG),
        vec!["boot", "worker 3", "worker 2", "boot after enable_all"]
    );

    // Everybody sleeps in the exit trap: idle takes over
    assert!(wait_until(|| KERNEL.current_task() == TaskId::IDLE));
    assert_eq!(KERNEL.ready_mask().bits() & !1, 0);
    assert!(KERNEL.stats().context_switches >= 4);
    assert_eq!(KERNEL.context(id(3)).starts(), 1);
}

#[test]
fn test_event_posted_before_deschedule_is_not_lost() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        let me = kernel.current_task();
        let switches = kernel.stats().context_switches;
        // Delivered at the scheduling point inside the wait, after the
        // bitmap was found empty
        kernel.raise_interrupt(move |k| {
            k.set_event(me, events::custom(1)).unwrap();
        });
        let evt = kernel.wait_event(0);
        push(&LOG, format!("{:#x}", evt));
        // The wait never blocked
        push(&LOG, format!("{}", kernel.stats().context_switches - switches));
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("BOOT", boot, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 2));
    assert_eq!(snapshot(&LOG), vec!["0x2", "0"]);
}

#[test]
fn test_interrupt_wakes_blocked_task() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        let evt = kernel.wait_event(0);
        push(&LOG, format!("{:#x}", evt));
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("BOOT", boot, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    // Idle fallback: the only task is blocked
    assert!(wait_until(|| KERNEL.current_task() == TaskId::IDLE));
    assert!(!KERNEL.ready_mask().contains(TaskId::BOOTSTRAP));

    KERNEL.raise_interrupt(|k| {
        k.wake(TaskId::BOOTSTRAP).unwrap();
    });
    assert!(wait_until(|| snapshot(&LOG).len() == 1));
    assert_eq!(snapshot(&LOG)[0], format!("{:#x}", events::WAKE));
}

#[test]
fn test_timeouts_are_exact() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        let t0 = kernel.get_time();
        let evt = kernel.wait_event(1000);
        let t1 = kernel.get_time();
        push(&LOG, format!("wait {:#x} {}", evt, t1 - t0));

        kernel.usleep(250);
        let t2 = kernel.get_time();
        push(&LOG, format!("usleep {}", t2 - t1));

        kernel.msleep(2);
        let t3 = kernel.get_time();
        push(&LOG, format!("msleep {}", t3 - t2));

        kernel.udelay(40);
        let t4 = kernel.get_time();
        push(&LOG, format!("udelay {}", t4 - t3));
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("BOOT", boot, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 4));
    assert_eq!(
        snapshot(&LOG),
        vec![
            format!("wait {:#x} 1000", events::TIMER),
            String::from("usleep 250"),
            String::from("msleep 2000"),
            String::from("udelay 40"),
        ]
    );
}

#[test]
fn test_timeout_across_counter_overflow() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        let t0 = kernel.get_time();
        let evt = kernel.wait_event(300);
        let t1 = kernel.get_time();
        push(&LOG, format!("{:#x} {} {}", evt, t0, t1));
    }

    const START: u64 = (1 << 32) - 100;
    static CLOCK: SimClock = SimClock::starting_at(START);
    static STACK: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("BOOT", boot, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 1));
    assert_eq!(
        snapshot(&LOG)[0],
        format!("{:#x} {} {}", events::TIMER, START, START + 300)
    );
}

#[test]
fn test_raw_deadline_with_untimed_wait() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        let me = kernel.current_task();
        let t0 = kernel.get_time();
        kernel.timer_arm(t0 + 500, me).unwrap();
        kernel.raise_interrupt(move |k| {
            k.set_event(me, events::custom(1)).unwrap();
        });

        // An untimed wait must not touch a deadline it did not arm
        let first = kernel.wait_event(0);
        push(&LOG, format!("{:#x} {}", first, kernel.timer_armed(me)));

        let second = kernel.wait_event(0);
        push(&LOG, format!("{:#x} {}", second, kernel.get_time() - t0));
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("BOOT", boot, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 2));
    assert_eq!(
        snapshot(&LOG),
        vec![String::from("0x2 true"), format!("{:#x} 500", events::TIMER)]
    );
}

#[test]
fn test_idle_runs_when_everything_disabled() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        kernel.enable_all();
        push(&LOG, "boot disabling");
        kernel.disable(TaskId::new(2).unwrap()).unwrap();
        kernel.disable(kernel.current_task()).unwrap();
        push(&LOG, "boot ran while disabled");
    }
    fn worker(kernel: &'static Kernel, _: usize) {
        loop {
            kernel.wait_event(0);
        }
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 2] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("WORKER", worker, 0, &STACK_2),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| KERNEL.current_task() == TaskId::IDLE && snapshot(&LOG).len() == 1));
    assert_eq!(KERNEL.enabled_mask().bits(), 1);
    assert!(!KERNEL.is_halted());

    // Events still reach disabled tasks, but only idle runs
    KERNEL.raise_interrupt(|k| {
        k.wake(TaskId::BOOTSTRAP).unwrap();
        k.wake(TaskId::new(2).unwrap()).unwrap();
    });
    assert!(wait_until(|| KERNEL.ready_mask().contains(id(2))));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(KERNEL.current_task(), TaskId::IDLE);
    assert_eq!(snapshot(&LOG), vec!["boot disabling"]);
    assert!(!KERNEL.is_halted());
}

#[test]
fn test_wake_from_foreign_thread() {
    use core::sync::atomic::{AtomicU32, Ordering};

    const ROUNDS: u32 = 200;
    static WAKEUPS: AtomicU32 = AtomicU32::new(0);

    fn boot(kernel: &'static Kernel, _: usize) {
        loop {
            if kernel.wait_event(0) & events::WAKE != 0 {
                WAKEUPS.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("BOOT", boot, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    // Each wake from the test thread races the task going back to sleep
    for round in 1..=ROUNDS {
        KERNEL.wake(TaskId::BOOTSTRAP).unwrap();
        assert!(
            wait_until(|| WAKEUPS.load(Ordering::SeqCst) == round),
            "wakeup {} lost",
            round
        );
    }
    assert!(!KERNEL.is_halted());
}

#[test]
fn test_wait_mask_keeps_other_events() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        let me = kernel.current_task();
        kernel.raise_interrupt(move |k| {
            k.set_event(me, events::custom(2)).unwrap();
        });
        kernel.raise_interrupt(move |k| {
            k.set_event(me, events::custom(1)).unwrap();
        });
        let got = kernel.wait_event_mask(events::custom(1), 0);
        let pending = kernel.peek_events(me).unwrap();
        let next = kernel.wait_event(0);
        push(&LOG, format!("{:#x} {:#x} {:#x}", got, pending, next));

        // A masked wait that times out reports TIMER only
        let got = kernel.wait_event_mask(events::custom(3), 100);
        push(&LOG, format!("{:#x}", got));
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 1] = [TaskDescriptor::new("BOOT", boot, 0, &STACK)];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 2));
    assert_eq!(
        snapshot(&LOG),
        vec![String::from("0x2 0x4 0x4"), format!("{:#x}", events::TIMER)]
    );
}

#[test]
fn test_disable_and_enable() {
    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        kernel.enable_all();
        let worker = TaskId::new(2).unwrap();
        kernel.disable(worker).unwrap();
        kernel.wake(worker).unwrap();
        push(&LOG, "boot woke disabled worker");
        kernel.enable(worker).unwrap();
        push(&LOG, "boot done");
    }
    fn worker(kernel: &'static Kernel, _: usize) {
        loop {
            let evt = kernel.wait_event(0);
            push(&LOG, format!("worker {:#x}", evt));
        }
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 2] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("WORKER", worker, 0, &STACK_2),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 3));
    assert_eq!(
        snapshot(&LOG),
        vec![
            String::from("boot woke disabled worker"),
            format!("worker {:#x}", events::WAKE),
            String::from("boot done"),
        ]
    );
}

#[cfg(feature = "mutex")]
#[test]
fn test_mutex_exclusion() {
    use core::sync::atomic::{AtomicU32, Ordering};
    use eckernel::Mutex;

    const ROUNDS: u32 = 20;
    static LOCK: Mutex = Mutex::new();
    static INSIDE: AtomicU32 = AtomicU32::new(0);
    static MAX_INSIDE: AtomicU32 = AtomicU32::new(0);
    static TOTAL: AtomicU32 = AtomicU32::new(0);
    static DONE: AtomicU32 = AtomicU32::new(0);

    fn contend(kernel: &'static Kernel) {
        for _ in 0..ROUNDS {
            LOCK.lock();
            let n = INSIDE.fetch_add(1, Ordering::SeqCst) + 1;
            MAX_INSIDE.fetch_max(n, Ordering::SeqCst);
            // Sleep while holding the lock so everybody else piles up
            kernel.usleep(10);
            TOTAL.fetch_add(1, Ordering::SeqCst);
            INSIDE.fetch_sub(1, Ordering::SeqCst);
            LOCK.unlock();
        }
        DONE.fetch_add(1, Ordering::SeqCst);
    }
    fn boot(kernel: &'static Kernel, _: usize) {
        kernel.enable_all();
        contend(kernel);
    }
    fn worker(kernel: &'static Kernel, _: usize) {
        contend(kernel);
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static STACK_3: Stack<256> = Stack::new();
    static STACK_4: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 4] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("W2", worker, 0, &STACK_2),
        TaskDescriptor::new("W3", worker, 0, &STACK_3),
        TaskDescriptor::new("W4", worker, 0, &STACK_4),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| DONE.load(Ordering::SeqCst) == 4));
    assert_eq!(TOTAL.load(Ordering::SeqCst), 4 * ROUNDS);
    assert_eq!(MAX_INSIDE.load(Ordering::SeqCst), 1);
    assert!(wait_until(|| !LOCK.is_locked() && LOCK.waiters() == 0));
    assert!(!KERNEL.is_halted());
}

#[cfg(feature = "mutex")]
#[test]
fn test_stray_mutex_event_does_not_grant_lock() {
    use eckernel::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());
    static LOCK: Mutex = Mutex::new();
    static LOCKED_AT: AtomicU64 = AtomicU64::new(0);

    const LOW: usize = 2;
    const HIGH: usize = 3;

    fn boot(kernel: &'static Kernel, _: usize) {
        kernel.enable_all();
    }
    fn low(kernel: &'static Kernel, _: usize) {
        LOCK.lock();
        LOCKED_AT.store(kernel.get_time(), Ordering::SeqCst);
        kernel.set_event(id(HIGH), events::custom(0)).unwrap();
        kernel.usleep(100);
        push(&LOG, "low unlocking");
        LOCK.unlock();
    }
    fn high(kernel: &'static Kernel, _: usize) {
        kernel.wait_event_mask(events::custom(0), 0);
        // A leftover wakeup from some earlier unlock
        kernel.set_event(kernel.current_task(), events::MUTEX).unwrap();
        LOCK.lock();
        let held_for = kernel.get_time() - LOCKED_AT.load(Ordering::SeqCst);
        push(&LOG, format!("high acquired after {}", held_for));
        LOCK.unlock();
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static STACK_3: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 3] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("LOW", low, 0, &STACK_2),
        TaskDescriptor::new("HIGH", high, 0, &STACK_3),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 2));
    assert_eq!(snapshot(&LOG), vec!["low unlocking", "high acquired after 100"]);
    assert!(wait_until(|| !LOCK.is_locked() && LOCK.waiters() == 0));
    assert!(!KERNEL.is_halted());
}

#[cfg(feature = "task-reset")]
#[test]
fn test_reset_round_trip() {
    use eckernel::task::reset::ResetState;

    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        let worker = TaskId::new(2).unwrap();
        kernel.enable_all();

        push(&LOG, format!("{:?}", kernel.reset(kernel.current_task(), false)));
        push(&LOG, format!("{:?}", kernel.reset(TaskId::IDLE, false)));

        kernel.disable(worker).unwrap();
        kernel.set_event(worker, events::custom(5)).unwrap();
        kernel.reset(worker, false).unwrap();
        let ctx = kernel.context(worker);
        push(&LOG, format!("fresh frame {}", ctx.saved_sp() == ctx.initial_sp()));
        kernel.enable(worker).unwrap();
        push(&LOG, format!("{:?}", kernel.reset_state(worker)));
    }
    fn worker(kernel: &'static Kernel, _: usize) {
        let was_reset = kernel.reset_cleanup();
        let me = kernel.current_task();
        push(
            &LOG,
            format!("worker start {} {:#x}", was_reset, kernel.peek_events(me).unwrap()),
        );
        loop {
            kernel.wait_event(0);
        }
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 2] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("WORKER", worker, 0, &STACK_2).resettable(),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    assert_eq!(KERNEL.reset_state(id(2)), Ok(ResetState::Unlocked));
    assert_eq!(KERNEL.reset_state(id(1)), Ok(ResetState::Unsupported));
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 6));
    assert_eq!(
        snapshot(&LOG),
        vec![
            String::from("worker start false 0x0"),
            String::from("Err(InvalidArgument)"),
            String::from("Err(ResetUnsupported)"),
            String::from("fresh frame true"),
            String::from("worker start true 0x20"),
            String::from("Ok(Unlocked)"),
        ]
    );
    assert_eq!(KERNEL.context(id(2)).starts(), 2);
    assert!(!KERNEL.is_halted());
}

#[cfg(feature = "task-reset")]
#[test]
fn test_deferred_reset_notifies_waiter() {
    use eckernel::task::reset::ResetState;

    static LOG: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

    fn boot(kernel: &'static Kernel, _: usize) {
        kernel.enable_all();
    }
    // Resettable, holds off resets until woken
    fn worker(kernel: &'static Kernel, _: usize) {
        let was_reset = kernel.reset_cleanup();
        push(&LOG, format!("worker start {}", was_reset));
        kernel.disable_resets();
        kernel.set_event(TaskId::new(3).unwrap(), events::custom(1)).unwrap();
        kernel.wait_event(0);
        kernel.enable_resets();
        push(&LOG, "worker not reset");
    }
    fn controller(kernel: &'static Kernel, _: usize) {
        let worker = TaskId::new(2).unwrap();
        kernel.wait_event(0);
        kernel.wake(worker).unwrap();
        kernel.reset(worker, true).unwrap();
        push(&LOG, "controller reset done");
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static STACK_3: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 3] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("WORKER", worker, 0, &STACK_2).resettable(),
        TaskDescriptor::new("CTRL", controller, 0, &STACK_3),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();

    assert!(wait_until(|| snapshot(&LOG).len() == 3));
    assert_eq!(
        snapshot(&LOG),
        vec!["worker start false", "controller reset done", "worker start true"]
    );
    assert_eq!(KERNEL.context(id(2)).starts(), 2);
    // The restarted worker disabled resets again and nobody waits
    assert!(wait_until(|| KERNEL.reset_state(id(2)) == Ok(ResetState::Locked { waiters: 0 })));
}

#[test]
fn test_task_list_output() {
    fn boot(kernel: &'static Kernel, _: usize) {
        kernel.enable_all();
    }
    fn sleeper(kernel: &'static Kernel, _: usize) {
        kernel.wait_event(0);
    }

    static CLOCK: SimClock = SimClock::new();
    static STACK_1: Stack<256> = Stack::new();
    static STACK_2: Stack<256> = Stack::new();
    static TASKS: [TaskDescriptor; 2] = [
        TaskDescriptor::new("BOOT", boot, 0, &STACK_1),
        TaskDescriptor::new("SLEEPER", sleeper, 0, &STACK_2),
    ];
    static KERNEL: Kernel = Kernel::new(&TASKS, &CLOCK);

    KERNEL.init().unwrap();
    KERNEL.start().unwrap();
    assert!(wait_until(|| KERNEL.current_task() == TaskId::IDLE));

    let mut out = String::new();
    KERNEL.print_task_list(&mut out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "Task Ready Name         Events      Time (s)  StkUsed");
    assert!(lines[1].contains("<< idle >>"));
    assert!(lines[2].contains("BOOT"));
    assert!(lines[3].contains("SLEEPER"));

    let infos: Vec<_> = KERNEL.tasks().collect();
    assert_eq!(infos.len(), 3);
    assert_eq!(infos[0].state, eckernel::types::TaskState::Running);
    assert_eq!(infos[2].state, eckernel::types::TaskState::Blocked);
    assert_eq!(infos[2].stack_size, 1024);
    assert_eq!(KERNEL.task_info(id(3)).map(|i| i.id), Err(OsError::InvalidTask));
}
