//! Priority bitmap for O(1) highest-runnable lookup
//!
//! One bit per task; the task id is the priority, so the most significant set
//! bit names the task to run. Leverages the CLZ (Count Leading Zeros)
//! instruction for the lookup.

use crate::types::TaskId;

/// A set of tasks, one bit per task id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskMask(pub u32);

impl TaskMask {
    pub const EMPTY: TaskMask = TaskMask(0);

    #[inline(always)]
    pub const fn new(bits: u32) -> Self {
        TaskMask(bits)
    }

    /// Mask with ids `0..count` set
    #[inline]
    pub const fn first(count: usize) -> Self {
        if count >= 32 {
            TaskMask(u32::MAX)
        } else {
            TaskMask((1u32 << count) - 1)
        }
    }

    #[inline(always)]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn contains(self, id: TaskId) -> bool {
        self.0 & id.bit() != 0
    }

    #[inline(always)]
    pub const fn with(self, id: TaskId) -> Self {
        TaskMask(self.0 | id.bit())
    }

    #[inline(always)]
    pub const fn without(self, id: TaskId) -> Self {
        TaskMask(self.0 & !id.bit())
    }

    /// Highest task id in the set
    #[inline]
    pub const fn highest(self) -> Option<TaskId> {
        match fls(self.0) {
            Some(bit) => Some(TaskId::from_index(bit as usize)),
            None => None,
        }
    }

    /// Iterate the set from highest to lowest id
    #[inline]
    pub fn iter(self) -> TaskMaskIter {
        TaskMaskIter(self.0)
    }
}

/// Index of the most significant set bit
#[inline(always)]
pub const fn fls(value: u32) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(31 - value.leading_zeros())
    }
}

/// Pick the task to run: highest id that is both ready and enabled
#[inline(always)]
pub const fn select(ready: u32, enabled: u32) -> Option<TaskId> {
    TaskMask(ready & enabled).highest()
}

/// Iterator over a [`TaskMask`], highest id first
pub struct TaskMaskIter(u32);

impl Iterator for TaskMaskIter {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let bit = fls(self.0)?;
        self.0 &= !(1 << bit);
        Some(TaskId::from_index(bit as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mask() {
        assert!(TaskMask::EMPTY.is_empty());
        assert_eq!(TaskMask::EMPTY.highest(), None);
        assert_eq!(select(0, u32::MAX), None);
    }

    #[test]
    fn test_insert_remove() {
        let id5 = TaskId::new(5).unwrap();
        let id3 = TaskId::new(3).unwrap();

        let m = TaskMask::EMPTY.with(id5);
        assert!(m.contains(id5));
        assert!(!m.contains(id3));
        assert_eq!(m.highest(), Some(id5));

        let m = m.with(id3);
        assert_eq!(m.highest(), Some(id5));

        let m = m.without(id5);
        assert_eq!(m.highest(), Some(id3));
        assert!(m.without(id3).is_empty());
    }

    #[test]
    fn test_enabled_filters_ready() {
        assert_eq!(select(0b1110, 0b0110), TaskId::new(2));
        assert_eq!(select(0b1000, 0b0111), None);
        assert_eq!(select(0b1001, 0b0001), Some(TaskId::IDLE));
    }

    #[test]
    fn test_iter_high_to_low() {
        let ids: [usize; 3] = [28, 4, 0];
        let m = TaskMask::new((1 << 28) | (1 << 4) | 1);
        for (got, want) in m.iter().zip(ids.iter()) {
            assert_eq!(got.index(), *want);
        }
        assert_eq!(m.iter().count(), 3);
    }

    #[test]
    fn test_first() {
        assert_eq!(TaskMask::first(0).bits(), 0);
        assert_eq!(TaskMask::first(3).bits(), 0b111);
        assert_eq!(TaskMask::first(32).bits(), u32::MAX);
    }
}
