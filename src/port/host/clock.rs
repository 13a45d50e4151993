//! Virtual microsecond clock for the host port

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::time::ClockSource;

struct SimTime {
    /// Full 64-bit virtual time
    now: u64,
    /// High word already reported through an overflow interrupt
    epoch: u64,
    /// Comparator, in the low 32 bits of the current epoch
    target: Option<u32>,
    /// Interrupt forced by software
    forced: bool,
}

/// A 32-bit free-running counter over virtual time
///
/// Time only advances when asked to: by the idle task skipping to the next
/// deadline, by busy-waits, or explicitly with [`SimClock::advance`].
pub struct SimClock {
    time: Mutex<SimTime>,
}

impl SimClock {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Clock whose counter starts at `us` (use values close to `1 << 32`
    /// to exercise the overflow path)
    pub const fn starting_at(us: u64) -> Self {
        SimClock {
            time: Mutex::new(SimTime {
                now: us,
                epoch: us >> 32,
                target: None,
                forced: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimTime> {
        self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current virtual time
    pub fn now(&self) -> u64 {
        self.lock().now
    }

    /// Move time forward by `us`
    pub fn advance(&self, us: u64) {
        self.lock().now += us;
    }

    /// Skip ahead to `deadline`, stopping at the next counter wrap
    pub(crate) fn advance_toward(&self, deadline: u64) {
        let mut t = self.lock();
        let wrap = (t.epoch + 1) << 32;
        let to = deadline.min(wrap);
        if to <= t.now {
            t.forced = true;
        } else {
            t.now = to;
        }
    }

    /// Consume a pending clock interrupt; `Some(true)` means counter overflow
    pub(crate) fn take_irq(&self) -> Option<bool> {
        let mut t = self.lock();
        if t.now >> 32 > t.epoch {
            t.epoch += 1;
            return Some(true);
        }
        if t.forced {
            t.forced = false;
            return Some(false);
        }
        match t.target {
            Some(target) if t.now as u32 >= target => {
                t.target = None;
                Some(false)
            }
            _ => None,
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SimClock {
    fn read(&self) -> u32 {
        self.lock().now as u32
    }

    fn set_target(&self, target: u32) {
        self.lock().target = Some(target);
    }

    fn clear_target(&self) {
        self.lock().target = None;
    }

    fn trigger(&self) {
        self.lock().forced = true;
    }

    fn relax(&self) {
        self.advance(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_fires_once() {
        let clock = SimClock::new();
        clock.set_target(100);
        assert_eq!(clock.take_irq(), None);
        clock.advance_toward(100);
        assert_eq!(clock.read(), 100);
        assert_eq!(clock.take_irq(), Some(false));
        assert_eq!(clock.take_irq(), None);
    }

    #[test]
    fn test_advance_stops_at_wrap() {
        let clock = SimClock::starting_at((1 << 32) - 10);
        clock.advance_toward((1 << 32) + 50);
        assert_eq!(clock.now(), 1 << 32);
        assert_eq!(clock.read(), 0);
        assert_eq!(clock.take_irq(), Some(true));
        assert_eq!(clock.take_irq(), None);
    }

    #[test]
    fn test_passed_deadline_forces_interrupt() {
        let clock = SimClock::starting_at(500);
        clock.advance_toward(400);
        assert_eq!(clock.now(), 500);
        assert_eq!(clock.take_irq(), Some(false));
    }
}
