//! Frame, stream, and node identity value objects.

use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing within a (pipeline, streamId) pair; assigned by
/// input-producing nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct FrameId(pub u64);

/// Identifies a logical stream within a multi-stream pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Worker assignment under `BatchingWithStream`: worker *k* sees every
    /// blob whose `streamId % streamNum == k`.
    pub fn worker_index(self, stream_num: u32) -> u32 {
        if stream_num == 0 {
            0
        } else {
            self.0 % stream_num
        }
    }
}

/// Instance name of a Node within a pipeline (unique per pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NodeName(pub String);

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Monotonic `frameId` generator for one (pipeline, streamId) pair.
#[derive(Debug, Default)]
pub struct FrameIdAllocator {
    next: AtomicU64,
}

impl FrameIdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(0) }
    }

    pub fn allocate(&self) -> FrameId {
        FrameId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_worker_assignment_is_modular() {
        assert_eq!(StreamId(7).worker_index(3), 1);
        assert_eq!(StreamId(9).worker_index(3), 0);
    }

    #[test]
    fn frame_ids_are_strictly_increasing() {
        let alloc = FrameIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(a.0 < b.0);
    }
}
