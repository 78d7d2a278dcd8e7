//! BatchCollector: per-Node strategy deciding which blobs form one
//! invocation of `process(batchIdx)`. `getBatchedInput` is the
//! single entry point by which a worker consumes inputs — it never reads
//! ports directly.

use std::time::Duration;

use crate::blob::BlobRef;
use crate::error::PipelineError;
use crate::node::NodeEvent;
use crate::queue::Queue;
use crate::value_objects::StreamId;

/// A blob observed from a foreign stream under `BatchingWithStream`. The
/// blob itself is marked `drop` with cleared ROIs by the collector; the
/// caller is responsible for forwarding it via `sendOutput` to preserve
/// ordering, and for logging the corresponding `NodeEvent`.
pub struct StreamViolation {
    pub expected: u32,
    pub actual: u32,
    pub blob: BlobRef,
}

impl StreamViolation {
    pub fn as_event(&self) -> NodeEvent {
        NodeEvent::StreamConsistencyViolation {
            expected: self.expected,
            actual: self.actual,
        }
    }
}

#[derive(Default)]
pub struct BatchedInput {
    pub blobs: Vec<BlobRef>,
    pub violations: Vec<StreamViolation>,
}

pub trait BatchCollector: Send {
    /// Pulls the next batch for worker `batch_idx` from the given input
    /// ports (identified by queue index into `queues`).
    fn get_batched_input(
        &mut self,
        batch_idx: u32,
        port_indices: &[u32],
        queues: &[Queue<BlobRef>],
        timeout: Duration,
    ) -> Result<BatchedInput, PipelineError>;
}

/// Every `process(batchIdx)` call may pull from any combination of input
/// ports; batch composition is opaque to the Node.
#[derive(Default)]
pub struct DefaultBatchCollector;

impl BatchCollector for DefaultBatchCollector {
    fn get_batched_input(
        &mut self,
        _batch_idx: u32,
        port_indices: &[u32],
        queues: &[Queue<BlobRef>],
        timeout: Duration,
    ) -> Result<BatchedInput, PipelineError> {
        let mut blobs = Vec::new();
        for &port in port_indices {
            if let Some(queue) = queues.get(port as usize) {
                if let Some(blob) = queue.try_pop() {
                    blobs.push(blob);
                }
            }
        }
        if blobs.is_empty() {
            // Nothing ready yet; wait on the first port so the worker
            // doesn't busy-spin.
            if let Some(&port) = port_indices.first() {
                if let Some(queue) = queues.get(port as usize) {
                    blobs.push(queue.pop(timeout)?);
                }
            }
        }
        Ok(BatchedInput {
            blobs,
            violations: Vec::new(),
        })
    }
}

/// The engine partitions workers by `streamId`: worker *k* sees, in order,
/// every Blob whose `streamId % streamNum == k`. The only correct policy for
/// stateful nodes.
pub struct StreamBatchCollector {
    worker_index: u32,
    stream_num: u32,
    bound_stream: Option<StreamId>,
}

impl StreamBatchCollector {
    pub fn new(worker_index: u32, stream_num: u32) -> Self {
        Self {
            worker_index,
            stream_num,
            bound_stream: None,
        }
    }
}

impl BatchCollector for StreamBatchCollector {
    /// Scans every port for a ready blob before blocking, so a fusion node
    /// with more than one input port (e.g. `MediaRadarOutput`) is not starved
    /// of whichever port isn't listed first.
    fn get_batched_input(
        &mut self,
        _batch_idx: u32,
        port_indices: &[u32],
        queues: &[Queue<BlobRef>],
        timeout: Duration,
    ) -> Result<BatchedInput, PipelineError> {
        let first_port = *port_indices.first().ok_or_else(|| PipelineError::internal("no input port"))?;

        let blob = 'ready: {
            for &port in port_indices {
                if let Some(queue) = queues.get(port as usize) {
                    if let Some(blob) = queue.try_pop() {
                        break 'ready blob;
                    }
                }
            }
            let queue = queues.get(first_port as usize).ok_or_else(|| PipelineError::internal("input port out of range"))?;
            queue.pop(timeout)?
        };
        let expected_worker = blob.stream_id.worker_index(self.stream_num);

        let foreign = expected_worker != self.worker_index
            || self.bound_stream.is_some_and(|bound| bound != blob.stream_id);

        if foreign {
            let violation = StreamViolation {
                expected: self.bound_stream.map(|s| s.0).unwrap_or(self.worker_index),
                actual: blob.stream_id.0,
                blob: mark_foreign_blob_for_forwarding(&blob),
            };
            return Ok(BatchedInput {
                blobs: Vec::new(),
                violations: vec![violation],
            });
        }

        self.bound_stream.get_or_insert(blob.stream_id);
        Ok(BatchedInput {
            blobs: vec![blob],
            violations: Vec::new(),
        })
    }
}

/// Marks every buffer of a foreign-stream blob `drop` with cleared ROIs
/// before it is handed back for forwarding.
fn mark_foreign_blob_for_forwarding(blob: &BlobRef) -> BlobRef {
    use crate::blob::Blob;
    let marked = Blob {
        frame_id: blob.frame_id,
        stream_id: blob.stream_id,
        tag: blob.tag,
        buffers: blob.buffers.iter().map(|b| b.cleared_and_dropped()).collect(),
    };
    marked.into_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;
    use crate::buffer::Tag;
    use crate::value_objects::FrameId;

    fn blob(stream: u32, frame: u64) -> BlobRef {
        Blob::new(FrameId(frame), StreamId(stream), vec![], Tag::Normal).into_ref()
    }

    #[test]
    fn stream_collector_accepts_own_stream() {
        let queues = vec![Queue::new(4)];
        queues[0].push(blob(1, 0), Duration::from_millis(10)).unwrap();
        let mut collector = StreamBatchCollector::new(1, 3);
        let batch = collector.get_batched_input(1, &[0], &queues, Duration::from_millis(10)).unwrap();
        assert_eq!(batch.blobs.len(), 1);
        assert!(batch.violations.is_empty());
    }

    #[test]
    fn stream_collector_flags_foreign_stream() {
        let queues = vec![Queue::new(4)];
        queues[0].push(blob(2, 0), Duration::from_millis(10)).unwrap();
        let mut collector = StreamBatchCollector::new(1, 3);
        let batch = collector.get_batched_input(1, &[0], &queues, Duration::from_millis(10)).unwrap();
        assert!(batch.blobs.is_empty());
        assert_eq!(batch.violations.len(), 1);
        assert!(batch.violations[0].blob.buffers.is_empty());
    }
}
