//! Critical section protected cell
//!
//! Zero-overhead wrapper for data that is only touched with interrupts masked.

use core::cell::UnsafeCell;

use crate::critical::CriticalSection;

/// A cell that can only be accessed within a critical section.
///
/// The guard proves interrupts are masked on this (single) core, so no
/// other context can observe the value while the closure runs. Closures must
/// not re-enter the same cell.
pub struct CsCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Mutate the inner value under the critical section
    #[inline(always)]
    pub fn with<R>(&self, _cs: &CriticalSection, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: interrupts are masked and callers never nest on one cell.
        f(unsafe { &mut *self.0.get() })
    }
}

impl<T: Copy> CsCell<T> {
    /// Replace the inner value
    #[inline(always)]
    pub fn set(&self, _cs: &CriticalSection, value: T) {
        unsafe { *self.0.get() = value }
    }
}
