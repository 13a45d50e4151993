//! Word-sized atomic bit operations
//!
//! Every bitmap the kernel shares between task and interrupt context (ready,
//! enabled, events, armed timers, reset state) goes through these helpers.
//! `portable-atomic` supplies the 64-bit variants on cores without them.

use portable_atomic::{AtomicU32, Ordering};

/// Set `bits`, returning the previous value
#[inline(always)]
pub fn atomic_or(word: &AtomicU32, bits: u32) -> u32 {
    word.fetch_or(bits, Ordering::AcqRel)
}

/// Clear `bits`, returning the previous value
#[inline(always)]
pub fn atomic_clear_bits(word: &AtomicU32, bits: u32) -> u32 {
    word.fetch_and(!bits, Ordering::AcqRel)
}

/// Take the whole word, leaving zero behind
#[inline(always)]
pub fn atomic_take(word: &AtomicU32) -> u32 {
    word.swap(0, Ordering::AcqRel)
}

/// Read the word
#[inline(always)]
pub fn atomic_load(word: &AtomicU32) -> u32 {
    word.load(Ordering::Acquire)
}

/// Replace `current` with `new` if the word still holds `current`
///
/// Returns the value actually observed on failure.
#[inline(always)]
pub fn atomic_compare_exchange(word: &AtomicU32, current: u32, new: u32) -> Result<u32, u32> {
    word.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
}
