// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stateful nodes: maintain per-stream state across frames, so they require
//! the `BatchingWithStream` policy (a worker sees one stream monotonically).
//! Both classes keep their state in the NodeWorker instance
//! itself rather than in the Blob/Buffer, since `Node::prepare`'s default
//! rewrite guarantees one worker per stream once `threadNumPerBatch == 1`.

use std::sync::Arc;
use std::time::Duration;

use inference_domain::meta::SendController;
use inference_domain::{BatchingConfig, BlobRef, Node, NodeName, NodeWorker, PipelineError, TrackingStatus, WorkerContext};

use super::common::config_u32;

/// Assigns and carries forward a `trackingId` per ROI across frames of the
/// same stream; a ROI lost for more than `MaxMissedFrames` is marked `Dead`
/// rather than `Lost`.
pub struct Tracker {
    name: NodeName,
    total_thread_num: u32,
    batching: BatchingConfig,
    max_missed_frames: u32,
}

impl Tracker {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self {
            name,
            total_thread_num,
            batching: BatchingConfig::default(),
            max_missed_frames: 5,
        }
    }
}

struct TrackerWorker {
    max_missed_frames: u32,
    next_tracking_id: u64,
    missed_since_seen: u32,
}

impl NodeWorker for TrackerWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for blob in inputs {
            let mut owned = (*blob).clone();
            for buffer in owned.buffers.iter_mut() {
                if let Some(controller) = buffer.meta.get::<Arc<SendController>>().cloned() {
                    controller.release(1);
                    buffer.meta.remove::<Arc<SendController>>();
                }
                if buffer.drop {
                    continue;
                }
                if buffer.rois.is_empty() {
                    self.missed_since_seen += 1;
                    continue;
                }
                self.missed_since_seen = 0;
                for roi in buffer.rois.iter_mut() {
                    if roi.tracking_id.is_none() {
                        roi.tracking_id = Some(self.next_tracking_id);
                        self.next_tracking_id += 1;
                        roi.tracking_status = TrackingStatus::New;
                    } else if self.missed_since_seen > self.max_missed_frames {
                        roi.tracking_status = TrackingStatus::Dead;
                    } else {
                        roi.tracking_status = TrackingStatus::Tracked;
                    }
                }
            }
            ctx.send_output(owned.into_ref(), 0, Duration::from_millis(200))?;
        }
        Ok(())
    }

    fn rearm(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.next_tracking_id = 0;
        self.missed_since_seen = 0;
    }
}

impl Node for Tracker {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "Tracker"
    }
    fn total_thread_num(&self) -> u32 {
        self.total_thread_num
    }
    fn batching(&self) -> &BatchingConfig {
        &self.batching
    }
    fn batching_mut(&mut self) -> &mut BatchingConfig {
        &mut self.batching
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.max_missed_frames = config_u32(config, "MaxMissedFrames", 5);
        Ok(())
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(TrackerWorker {
            max_missed_frames: self.max_missed_frames,
            next_tracking_id: 0,
            missed_since_seen: 0,
        })
    }
}

/// Keeps, per stream, only the `TopK` highest-quality ROIs of a frame,
/// marking the rest `ignore_flags` so downstream fusion nodes skip them.
pub struct ObjectSelect {
    name: NodeName,
    total_thread_num: u32,
    batching: BatchingConfig,
    top_k: u32,
}

impl ObjectSelect {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self {
            name,
            total_thread_num,
            batching: BatchingConfig::default(),
            top_k: 1,
        }
    }
}

struct ObjectSelectWorker {
    top_k: usize,
}

impl NodeWorker for ObjectSelectWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for blob in inputs {
            let mut owned = (*blob).clone();
            for buffer in owned.buffers.iter_mut() {
                if buffer.drop || buffer.rois.len() <= self.top_k {
                    continue;
                }
                let mut ranked: Vec<usize> = (0..buffer.rois.len()).collect();
                ranked.sort_by(|&a, &b| {
                    let qa = buffer.rois[a].quality.unwrap_or(0.0);
                    let qb = buffer.rois[b].quality.unwrap_or(0.0);
                    qb.partial_cmp(&qa).unwrap_or(std::cmp::Ordering::Equal)
                });
                let keep: std::collections::HashSet<usize> = ranked.into_iter().take(self.top_k).collect();
                buffer.rois = buffer
                    .rois
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| keep.contains(idx))
                    .map(|(_, roi)| roi.clone())
                    .collect();
            }
            ctx.send_output(owned.into_ref(), 0, Duration::from_millis(200))?;
        }
        Ok(())
    }
}

impl Node for ObjectSelect {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "ObjectSelect"
    }
    fn total_thread_num(&self) -> u32 {
        self.total_thread_num
    }
    fn batching(&self) -> &BatchingConfig {
        &self.batching
    }
    fn batching_mut(&mut self) -> &mut BatchingConfig {
        &mut self.batching
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.top_k = config_u32(config, "TopK", 1);
        Ok(())
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(ObjectSelectWorker { top_k: self.top_k.max(1) as usize })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_domain::{Blob, Buffer, FrameId, Roi, StreamId, Tag};
    use std::sync::Mutex;

    struct CollectingContext {
        sent: Mutex<Vec<BlobRef>>,
    }
    impl WorkerContext for CollectingContext {
        fn send_output(&self, blob: BlobRef, _out_port_idx: u32, _timeout: Duration) -> Result<(), PipelineError> {
            self.sent.lock().unwrap().push(blob);
            Ok(())
        }
        fn hold_depleting(&self) {}
        fn release_depleting(&self) {}
        fn emit_event(&self, _event: inference_domain::NodeEvent) {}
    }

    #[test]
    fn tracker_assigns_a_new_id_then_carries_it_forward() {
        let node = Tracker::new(NodeName("trk".into()), 1);
        let mut worker = node.create_node_worker();
        let ctx = CollectingContext { sent: Mutex::new(Vec::new()) };

        let mut b1 = Buffer::from_view(FrameId(0), b"x", 0, 0, Vec::new());
        b1.rois.push(Roi::default());
        let blob1 = Blob::new(FrameId(0), StreamId(0), vec![b1], Tag::Normal).into_ref();
        worker.process(0, vec![blob1], &ctx).unwrap();

        let mut b2 = Buffer::from_view(FrameId(1), b"x", 0, 0, Vec::new());
        let mut roi2 = Roi::default();
        roi2.tracking_id = ctx.sent.lock().unwrap()[0].buffers[0].rois[0].tracking_id;
        b2.rois.push(roi2);
        let blob2 = Blob::new(FrameId(1), StreamId(0), vec![b2], Tag::Normal).into_ref();
        worker.process(0, vec![blob2], &ctx).unwrap();

        let sent = ctx.sent.lock().unwrap();
        assert_eq!(sent[0].buffers[0].rois[0].tracking_status, TrackingStatus::New);
        assert_eq!(sent[1].buffers[0].rois[0].tracking_status, TrackingStatus::Tracked);
    }

    #[test]
    fn object_select_keeps_only_top_k_by_quality() {
        let mut node = ObjectSelect::new(NodeName("sel".into()), 1);
        node.configure_by_string("TopK=(1)").unwrap();
        let mut worker = node.create_node_worker();
        let ctx = CollectingContext { sent: Mutex::new(Vec::new()) };

        let mut buffer = Buffer::from_view(FrameId(0), b"x", 0, 0, Vec::new());
        let mut low = Roi::default();
        low.quality = Some(0.2);
        let mut high = Roi::default();
        high.quality = Some(0.9);
        buffer.rois.push(low);
        buffer.rois.push(high);
        let blob = Blob::new(FrameId(0), StreamId(0), vec![buffer], Tag::Normal).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();

        let sent = ctx.sent.lock().unwrap();
        assert_eq!(sent[0].buffers[0].rois.len(), 1);
        assert_eq!(sent[0].buffers[0].rois[0].quality, Some(0.9));
    }
}
