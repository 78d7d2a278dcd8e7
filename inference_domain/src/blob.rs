//! Blob: the unit of data traversing the graph.

use std::sync::Arc;

use crate::buffer::{Buffer, Tag};
use crate::value_objects::{FrameId, StreamId};

#[derive(Debug, Clone)]
pub struct Blob {
    pub frame_id: FrameId,
    pub stream_id: StreamId,
    pub buffers: Vec<Buffer>,
    pub tag: Tag,
}

/// Blobs are shared: a Blob exists while at least one queue or worker holds
/// a reference. `Arc` is the natural Rust expression
/// of that ownership model.
pub type BlobRef = Arc<Blob>;

impl Blob {
    pub fn new(frame_id: FrameId, stream_id: StreamId, buffers: Vec<Buffer>, tag: Tag) -> Self {
        Self {
            frame_id,
            stream_id,
            buffers,
            tag,
        }
    }

    pub fn is_end_of_request(&self) -> bool {
        self.tag == Tag::EndOfRequest
    }

    /// Builds a modified copy with one buffer replaced, then wraps it for
    /// forwarding. Blobs already in flight are shared (`Arc<Blob>`), so
    /// in-place mutation is not available once sent; a worker that needs to
    /// alter a blob it is forwarding (e.g. to mark a foreign-stream buffer
    /// dropped) clones, mutates the clone, and forwards the new reference.
    pub fn with_buffer_replaced(&self, index: usize, buffer: Buffer) -> BlobRef {
        let mut clone = self.clone();
        clone.buffers[index] = buffer;
        Arc::new(clone)
    }

    pub fn into_ref(self) -> BlobRef {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_request_detection() {
        let b = Blob::new(FrameId(0), StreamId(0), vec![], Tag::EndOfRequest);
        assert!(b.is_end_of_request());
    }
}
