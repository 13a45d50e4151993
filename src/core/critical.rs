//! Critical section handling
//!
//! Provides interrupt masking primitives for protecting shared kernel state.
//! Sections nest: dropping a guard restores the mask state seen at entry.

/// RAII guard for critical sections
///
/// When this guard is created, interrupts are disabled.
/// When it is dropped, interrupts are restored to their previous state.
pub struct CriticalSection {
    was_enabled: bool,
}

impl CriticalSection {
    /// Enter a critical section by disabling interrupts.
    ///
    /// Returns a guard that will restore interrupt state when dropped.
    #[inline(always)]
    pub fn enter() -> Self {
        CriticalSection { was_enabled: arch::mask() }
    }

    /// True if interrupts were enabled when this section was entered
    #[inline(always)]
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        arch::unmask(self.was_enabled);
    }
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    arch::in_isr()
}

/// Check if interrupts are currently enabled
#[inline]
pub fn interrupts_enabled() -> bool {
    arch::enabled()
}

#[cfg(target_arch = "arm")]
mod arch {
    use cortex_m::register::primask;

    #[inline(always)]
    pub(super) fn mask() -> bool {
        let was_enabled = primask::read().is_active();
        cortex_m::interrupt::disable();
        was_enabled
    }

    #[inline(always)]
    pub(super) fn unmask(was_enabled: bool) {
        if was_enabled {
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    #[inline(always)]
    pub(super) fn enabled() -> bool {
        primask::read().is_active()
    }

    #[inline]
    pub(super) fn in_isr() -> bool {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }
}

/// Host model: each simulated CPU context (task thread) carries its own mask
/// depth, and simulated interrupt handlers run with the ISR flag raised.
#[cfg(not(target_arch = "arm"))]
mod arch {
    use std::cell::Cell;

    std::thread_local! {
        static MASK_DEPTH: Cell<u32> = const { Cell::new(0) };
        static IN_ISR: Cell<bool> = const { Cell::new(false) };
    }

    #[inline]
    pub(super) fn mask() -> bool {
        MASK_DEPTH.with(|d| {
            let depth = d.get();
            d.set(depth + 1);
            depth == 0
        })
    }

    #[inline]
    pub(super) fn unmask(was_enabled: bool) {
        MASK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
        if was_enabled && !in_isr() {
            crate::port::host::on_unmask();
        }
    }

    #[inline]
    pub(super) fn enabled() -> bool {
        MASK_DEPTH.with(|d| d.get() == 0)
    }

    #[inline]
    pub(super) fn in_isr() -> bool {
        IN_ISR.with(|f| f.get())
    }

    /// Run `f` as an interrupt handler on the calling thread
    pub(crate) fn with_isr<R>(f: impl FnOnce() -> R) -> R {
        let prev = IN_ISR.with(|flag| flag.replace(true));
        let r = f();
        IN_ISR.with(|flag| flag.set(prev));
        r
    }

    /// Forget any mask state left behind by an unwound task
    pub(crate) fn reset_context() {
        MASK_DEPTH.with(|d| d.set(0));
        IN_ISR.with(|f| f.set(false));
    }
}

#[cfg(not(target_arch = "arm"))]
pub(crate) use arch::{reset_context, with_isr};

#[cfg(all(test, not(target_arch = "arm")))]
mod tests {
    use super::*;

    #[test]
    fn test_nesting_restores_outer_state() {
        assert!(interrupts_enabled());
        {
            let outer = CriticalSection::enter();
            assert!(outer.was_enabled());
            assert!(!interrupts_enabled());
            {
                let inner = CriticalSection::enter();
                assert!(!inner.was_enabled());
            }
            assert!(!interrupts_enabled());
        }
        assert!(interrupts_enabled());
    }

    #[test]
    fn test_isr_flag() {
        assert!(!is_isr_context());
        with_isr(|| assert!(is_isr_context()));
        assert!(!is_isr_context());
    }
}
