use std::fmt;
use std::ops::Range;

/// Round `value` up to a multiple of `alignment` (> 0), saturating near `u64::MAX`.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    value
        .checked_next_multiple_of(alignment)
        .unwrap_or(u64::MAX / alignment * alignment)
}

/// Bump allocator handing out offsets inside one segment of a staging resource.
#[derive(Clone)]
pub(crate) struct BufferArena {
    segment: Range<u64>,
    next: u64,
}

impl BufferArena {
    /// Offsets are handed out from `[base, base + capacity)`.
    pub fn new(base: u64, capacity: u64) -> Self {
        Self {
            segment: base..base.saturating_add(capacity),
            next: base,
        }
    }

    pub fn reset(&mut self) {
        self.next = self.segment.start;
    }

    pub fn capacity(&self) -> u64 {
        self.segment.end - self.segment.start
    }

    pub fn remaining(&self) -> u64 {
        self.segment.end.saturating_sub(self.next)
    }

    /// Reserve `size` bytes at the first `alignment` multiple at or past both the bump pointer
    /// and `min_offset`. On failure nothing is reserved.
    pub fn alloc(&mut self, size: u64, alignment: u64, min_offset: u64) -> Option<u64> {
        let offset = align_up(self.next.max(min_offset), alignment.max(1));
        let end = offset.checked_add(size).filter(|&end| end <= self.segment.end)?;
        self.next = end;
        Some(offset)
    }
}

impl fmt::Debug for BufferArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferArena")
            .field("segment", &self.segment)
            .field("used", &(self.next - self.segment.start))
            .finish()
    }
}
