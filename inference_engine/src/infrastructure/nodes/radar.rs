// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Radar-chain nodes: single-producer/consumer per stream, no ROI. The
//! DSP math behind each stage (clustering, tracking) is opaque and
//! out of scope; these implementations carry `PointClouds`/
//! `TrackerOutput` meta through the chain so a fusion node has a real,
//! structurally correct payload to report.

use std::sync::Arc;
use std::time::Duration;

use inference_domain::meta::{PointClouds, RadarConfig, SendController, TrackerOutput};
use inference_domain::{BatchingConfig, BlobRef, Buffer, Node, NodeName, NodeWorker, PipelineError, Roi, TrackingStatus, WorkerContext};

use super::common::{config_f32, config_string, config_u32, TransformNode};

fn radar_config_from_string(config: &str) -> RadarConfig {
    RadarConfig {
        radar_config_path: config_string(config, "RadarConfigPath", ""),
        media_port: config_u32(config, "MediaPort", 0) as u16,
        radar_port: config_u32(config, "RadarPort", 0) as u16,
        wait_time: config_u32(config, "WaitTime", 0),
        data_source: config_string(config, "DataSource", "local"),
        radar_index: config_u32(config, "RadarIndex", 0),
        frame_rate: config_f32(config, "FrameRate", 0.0),
    }
}

/// Seeds `RadarConfig` into every frame's meta so downstream stages see the
/// configuration the pipeline was built with; actual sample normalization is
/// a vendor DSP concern out of scope.
pub struct RadarPreProcessing {
    name: NodeName,
    total_thread_num: u32,
    batching: BatchingConfig,
    config: RadarConfig,
}

impl RadarPreProcessing {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self {
            name,
            total_thread_num,
            batching: BatchingConfig::default(),
            config: RadarConfig::default(),
        }
    }
}

struct RadarPreProcessingWorker {
    config: RadarConfig,
}

impl NodeWorker for RadarPreProcessingWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for blob in inputs {
            let mut owned = (*blob).clone();
            for buffer in owned.buffers.iter_mut() {
                buffer.meta.set(self.config.clone());
            }
            ctx.send_output(owned.into_ref(), 0, Duration::from_millis(200))?;
            if self.config.frame_rate > 0.0 {
                std::thread::sleep(Duration::from_secs_f32(1.0 / self.config.frame_rate));
            }
        }
        Ok(())
    }
}

impl Node for RadarPreProcessing {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "RadarPreProcessing"
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
        self.config = radar_config_from_string(config);
        Ok(())
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(RadarPreProcessingWorker { config: self.config.clone() })
    }
}

/// Produces a point-cloud meta entry per frame — the radar analogue of
/// `Detection`.
pub struct RadarDetection(TransformNode);

impl RadarDetection {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self(TransformNode::new(
            "RadarDetection",
            name,
            total_thread_num,
            Arc::new(|buffer: &mut Buffer| {
                let mut clouds = buffer.meta.get::<PointClouds>().cloned().unwrap_or_default();
                if clouds.points.is_empty() {
                    clouds.points.push((0.0, 0.0, 0.0));
                }
                buffer.meta.set(clouds);
                if buffer.rois.is_empty() {
                    buffer.rois.push(Roi::default());
                }
            }),
        ))
    }
}

impl Node for RadarDetection {
    fn name(&self) -> &NodeName {
        self.0.name()
    }
    fn class_name(&self) -> &'static str {
        "RadarDetection"
    }
    fn total_thread_num(&self) -> u32 {
        self.0.total_thread_num()
    }
    fn batching(&self) -> &BatchingConfig {
        self.0.batching()
    }
    fn batching_mut(&mut self) -> &mut BatchingConfig {
        self.0.batching_mut()
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.0.configure_by_string(config)
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        self.0.create_node_worker()
    }
}

/// Groups nearby radar detections into a single cluster per frame; the
/// clustering algorithm itself is out of scope, so this halves the point
/// count as a structural stand-in for merging.
pub struct RadarClustering(TransformNode);

impl RadarClustering {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self(TransformNode::new(
            "RadarClustering",
            name,
            total_thread_num,
            Arc::new(|buffer: &mut Buffer| {
                if let Some(clouds) = buffer.meta.get::<PointClouds>().cloned() {
                    let clustered = PointClouds {
                        points: clouds.points.into_iter().step_by(2).collect(),
                    };
                    buffer.meta.set(clustered);
                }
            }),
        ))
    }
}

impl Node for RadarClustering {
    fn name(&self) -> &NodeName {
        self.0.name()
    }
    fn class_name(&self) -> &'static str {
        "RadarClustering"
    }
    fn total_thread_num(&self) -> u32 {
        self.0.total_thread_num()
    }
    fn batching(&self) -> &BatchingConfig {
        self.0.batching()
    }
    fn batching_mut(&mut self) -> &mut BatchingConfig {
        self.0.batching_mut()
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.0.configure_by_string(config)
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        self.0.create_node_worker()
    }
}

/// Assigns a `TrackerOutput` (tracking id, status, velocity) per frame.
/// Unlike the media-side `Tracker`, the radar tracker keeps no persistent
/// per-stream map here — a real DSP tracker's state is opaque and
/// would live behind whatever vendor radar backend implements it.
pub struct RadarTracking(TransformNode);

impl RadarTracking {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self(TransformNode::new(
            "RadarTracking",
            name,
            total_thread_num,
            Arc::new(|buffer: &mut Buffer| {
                if let Some(controller) = buffer.meta.get::<Arc<SendController>>().cloned() {
                    controller.release(1);
                    buffer.meta.remove::<Arc<SendController>>();
                }
                buffer.meta.set(TrackerOutput {
                    tracking_id: buffer.frame_id.0,
                    status: TrackingStatus::Tracked,
                    velocity_x: 0.0,
                    velocity_y: 0.0,
                });
            }),
        ))
    }
}

impl Node for RadarTracking {
    fn name(&self) -> &NodeName {
        self.0.name()
    }
    fn class_name(&self) -> &'static str {
        "RadarTracking"
    }
    fn total_thread_num(&self) -> u32 {
        self.0.total_thread_num()
    }
    fn batching(&self) -> &BatchingConfig {
        self.0.batching()
    }
    fn batching_mut(&mut self) -> &mut BatchingConfig {
        self.0.batching_mut()
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.0.configure_by_string(config)
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        self.0.create_node_worker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_domain::{Blob, StreamId, Tag};
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
    fn preprocessing_seeds_radar_config_from_configure_string() {
        let mut node = RadarPreProcessing::new(NodeName("pre".into()), 1);
        node.configure_by_string("MediaPort=(5000);RadarPort=(5001)").unwrap();
        let mut worker = node.create_node_worker();
        let ctx = CollectingContext { sent: Mutex::new(Vec::new()) };
        let buffer = Buffer::from_view(inference_domain::FrameId(0), b"x", 0, 0, Vec::new());
        let blob = Blob::new(inference_domain::FrameId(0), StreamId(0), vec![buffer], Tag::Normal).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();
        let sent = ctx.sent.lock().unwrap();
        let config = sent[0].buffers[0].meta.get::<RadarConfig>().unwrap();
        assert_eq!(config.media_port, 5000);
        assert_eq!(config.radar_port, 5001);
    }

    #[test]
    fn clustering_reduces_point_count() {
        let node = RadarClustering::new(NodeName("clu".into()), 1);
        let mut worker = node.create_node_worker();
        let ctx = CollectingContext { sent: Mutex::new(Vec::new()) };
        let mut buffer = Buffer::from_view(inference_domain::FrameId(0), b"x", 0, 0, Vec::new());
        buffer.meta.set(PointClouds {
            points: vec![(0.0, 0.0, 0.0); 4],
        });
        let blob = Blob::new(inference_domain::FrameId(0), StreamId(0), vec![buffer], Tag::Normal).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();
        let sent = ctx.sent.lock().unwrap();
        let clouds = sent[0].buffers[0].meta.get::<PointClouds>().unwrap();
        assert_eq!(clouds.points.len(), 2);
    }
}
