//! Value objects: small, immutable, identity-by-value types shared across
//! the domain model.

pub mod ids;
pub mod job_handle;

pub use ids::{FrameId, FrameIdAllocator, NodeName, StreamId};
pub use job_handle::{JobHandle, JobHandleAllocator, HANDLE_START_INDEX};
