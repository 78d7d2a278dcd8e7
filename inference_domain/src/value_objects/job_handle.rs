//! Job handle identity.
//!
//! A `jobHandle` is a 32-bit key identifying a loaded pipeline instance to
//! external clients. The high bit is always set so the handle space is
//! disjoint from other integer identifiers a transport layer might hand out
//! (connection ids, stream tags); allocation is monotonic with wraparound
//! that preserves the high bit.

use std::sync::atomic::{AtomicU32, Ordering};

/// Marks the handle space: `jobHandle`s always carry this bit.
pub const HANDLE_START_INDEX: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct JobHandle(u32);

impl JobHandle {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw | HANDLE_START_INDEX)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic allocator for `JobHandle`s, keeping the high bit set across
/// wraparound the way the original `fetchIncrementHandleIndex` does.
#[derive(Debug, Default)]
pub struct JobHandleAllocator {
    counter: AtomicU32,
}

impl JobHandleAllocator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    pub fn allocate(&self) -> JobHandle {
        let next = self.counter.fetch_add(1, Ordering::Relaxed);
        JobHandle::from_raw(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_always_carry_the_high_bit() {
        let alloc = JobHandleAllocator::new();
        for _ in 0..4 {
            let h = alloc.allocate();
            assert_eq!(h.as_u32() & HANDLE_START_INDEX, HANDLE_START_INDEX);
        }
    }

    #[test]
    fn handles_are_monotonic() {
        let alloc = JobHandleAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(b.as_u32() > a.as_u32());
    }

    #[test]
    fn wraparound_preserves_high_bit() {
        let alloc = JobHandleAllocator {
            counter: AtomicU32::new(u32::MAX),
        };
        let h = alloc.allocate();
        assert_eq!(h.as_u32() & HANDLE_START_INDEX, HANDLE_START_INDEX);
    }
}
