// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Inference-like nodes: consume frames with ROIs, write results into
//! `HceDatabaseMeta`. The actual model inference backends are
//! out of scope; each class is a deterministic stand-in
//! that produces a structurally correct result so downstream fusion/output
//! nodes have something real to report.

use std::sync::Arc;

use inference_domain::meta::{ClassificationObject, HceDatabaseMeta};
use inference_domain::{Buffer, Detection as DetectionResult, Node, NodeName, NodeWorker, PipelineError, Roi};

use super::common::{config_f32, TransformNode};

/// Produces the initial ROI for a frame that doesn't already carry one.
/// Frames the input node marked `drop` (decode failure) or whose URI
/// requested a miss (`"no-roi"`) are forwarded with no ROI.
pub struct Detection {
    name: NodeName,
    inner: TransformNode,
}

impl Detection {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        let inner = TransformNode::new(
            "Detection",
            name.clone(),
            total_thread_num,
            Arc::new(|buffer: &mut Buffer| {
                if buffer.drop || !buffer.rois.is_empty() {
                    return;
                }
                let media_uri = buffer.meta.get::<HceDatabaseMeta>().map(|m| m.media_uri.clone()).unwrap_or_default();
                if media_uri.contains("no-roi") {
                    return;
                }
                buffer.rois.push(Roi::new(inference_domain::Rect {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                }));
                if let Some(roi) = buffer.rois.last_mut() {
                    roi.detection = Some(DetectionResult {
                        label: "object".into(),
                        id: 0,
                        confidence: 0.87,
                    });
                }
            }),
        );
        Self { name, inner }
    }
}

impl Node for Detection {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "Detection"
    }
    fn total_thread_num(&self) -> u32 {
        self.inner.total_thread_num()
    }
    fn batching(&self) -> &inference_domain::BatchingConfig {
        self.inner.batching()
    }
    fn batching_mut(&mut self) -> &mut inference_domain::BatchingConfig {
        self.inner.batching_mut()
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.inner.configure_by_string(config)
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        self.inner.create_node_worker()
    }
}

/// Writes a class label plus confidence into `HceDatabaseMeta.attribute_result`
/// for every ROI a frame carries.
pub struct Classification {
    name: NodeName,
    total_thread_num: u32,
    batching: inference_domain::BatchingConfig,
    class_name: String,
}

impl Classification {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self {
            name,
            total_thread_num,
            batching: inference_domain::BatchingConfig::default(),
            class_name: "unclassified".into(),
        }
    }
}

struct ClassificationWorker {
    class_name: String,
}

impl NodeWorker for ClassificationWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<inference_domain::BlobRef>, ctx: &dyn inference_domain::WorkerContext) -> Result<(), PipelineError> {
        use std::time::Duration;
        for blob in inputs {
            let mut owned = (*blob).clone();
            for (idx, buffer) in owned.buffers.iter_mut().enumerate() {
                if buffer.drop {
                    continue;
                }
                let mut meta = buffer.meta.get::<HceDatabaseMeta>().cloned().unwrap_or_default();
                meta.attribute_result.insert(
                    idx,
                    ClassificationObject {
                        label: self.class_name.clone(),
                        class_id: 1,
                        confidence: 0.75,
                    },
                );
                buffer.meta.set(meta);
                for roi in buffer.rois.iter_mut() {
                    roi.classification_label = Some(self.class_name.clone());
                }
            }
            ctx.send_output(owned.into_ref(), 0, Duration::from_millis(200))?;
        }
        Ok(())
    }
}

impl Node for Classification {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "Classification"
    }
    fn total_thread_num(&self) -> u32 {
        self.total_thread_num
    }
    fn batching(&self) -> &inference_domain::BatchingConfig {
        &self.batching
    }
    fn batching_mut(&mut self) -> &mut inference_domain::BatchingConfig {
        &mut self.batching
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.class_name = super::common::config_string(config, "ClassName", "unclassified");
        Ok(())
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(ClassificationWorker {
            class_name: self.class_name.clone(),
        })
    }
}

/// Attaches a synthetic feature-vector Blob to every ROI. The descriptor itself is a deterministic stand-in;
/// real embedding models are out of scope.
pub struct FeatureExtraction {
    name: NodeName,
    inner: TransformNode,
}

impl FeatureExtraction {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        let inner = TransformNode::new(
            "FeatureExtraction",
            name.clone(),
            total_thread_num,
            Arc::new(|buffer: &mut Buffer| {
                if buffer.drop {
                    return;
                }
                for roi in buffer.rois.iter_mut() {
                    let samples = inference_domain::TypedSamples::F32(Arc::new(vec![0.0; 128]));
                    let feature_buf = Buffer::from_typed_samples(buffer.frame_id, samples);
                    let feature_blob = inference_domain::Blob::new(buffer.frame_id, inference_domain::StreamId(0), vec![feature_buf], buffer.tag);
                    roi.feature_vector = Some(feature_blob.into_ref());
                }
            }),
        );
        Self { name, inner }
    }
}

impl Node for FeatureExtraction {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "FeatureExtraction"
    }
    fn total_thread_num(&self) -> u32 {
        self.inner.total_thread_num()
    }
    fn batching(&self) -> &inference_domain::BatchingConfig {
        self.inner.batching()
    }
    fn batching_mut(&mut self) -> &mut inference_domain::BatchingConfig {
        self.inner.batching_mut()
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.inner.configure_by_string(config)
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        self.inner.create_node_worker()
    }
}

/// Scores every ROI's image quality into `HceDatabaseMeta.quality_result`.
pub struct ObjectQuality {
    name: NodeName,
    total_thread_num: u32,
    batching: inference_domain::BatchingConfig,
    min_quality: f32,
}

impl ObjectQuality {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        Self {
            name,
            total_thread_num,
            batching: inference_domain::BatchingConfig::default(),
            min_quality: 0.5,
        }
    }
}

struct ObjectQualityWorker {
    min_quality: f32,
}

impl NodeWorker for ObjectQualityWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<inference_domain::BlobRef>, ctx: &dyn inference_domain::WorkerContext) -> Result<(), PipelineError> {
        use std::time::Duration;
        for blob in inputs {
            let mut owned = (*blob).clone();
            for buffer in owned.buffers.iter_mut() {
                if buffer.drop {
                    continue;
                }
                let score = 0.9f32.max(self.min_quality);
                buffer.quality_score_into_meta(score);
            }
            ctx.send_output(owned.into_ref(), 0, Duration::from_millis(200))?;
        }
        Ok(())
    }
}

impl Node for ObjectQuality {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "ObjectQuality"
    }
    fn total_thread_num(&self) -> u32 {
        self.total_thread_num
    }
    fn batching(&self) -> &inference_domain::BatchingConfig {
        &self.batching
    }
    fn batching_mut(&mut self) -> &mut inference_domain::BatchingConfig {
        &mut self.batching
    }
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
        self.min_quality = config_f32(config, "MinQuality", 0.5);
        Ok(())
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(ObjectQualityWorker { min_quality: self.min_quality })
    }
}

trait QualityMetaExt {
    fn quality_score_into_meta(&mut self, score: f32);
}

impl QualityMetaExt for Buffer {
    fn quality_score_into_meta(&mut self, score: f32) {
        let mut meta = self.meta.get::<HceDatabaseMeta>().cloned().unwrap_or_default();
        for idx in 0..self.rois.len().max(1) {
            meta.quality_result.insert(idx, score);
        }
        self.meta.set(meta);
        for roi in self.rois.iter_mut() {
            roi.quality = Some(score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_domain::{Blob, StreamId, Tag};
    use std::time::Duration;

    struct CollectingContext {
        sent: std::sync::Mutex<Vec<inference_domain::BlobRef>>,
    }
    impl inference_domain::WorkerContext for CollectingContext {
        fn send_output(&self, blob: inference_domain::BlobRef, _out_port_idx: u32, _timeout: Duration) -> Result<(), PipelineError> {
            self.sent.lock().unwrap().push(blob);
            Ok(())
        }
        fn hold_depleting(&self) {}
        fn release_depleting(&self) {}
        fn emit_event(&self, _event: inference_domain::NodeEvent) {}
    }

    #[test]
    fn detection_adds_a_roi_when_absent() {
        let node = Detection::new(NodeName("det".into()), 1);
        let mut worker = node.create_node_worker();
        let ctx = CollectingContext { sent: Default::default() };
        let buffer = Buffer::from_view(inference_domain::FrameId(0), b"x", 0, 0, Vec::new());
        let blob = Blob::new(inference_domain::FrameId(0), StreamId(0), vec![buffer], Tag::Normal).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();
        let sent = ctx.sent.lock().unwrap();
        assert_eq!(sent[0].buffers[0].rois.len(), 1);
    }

    #[test]
    fn classification_writes_attribute_result_per_roi() {
        let mut node = Classification::new(NodeName("cls".into()), 1);
        node.configure_by_string("ClassName=(car)").unwrap();
        let mut worker = node.create_node_worker();
        let ctx = CollectingContext { sent: Default::default() };
        let mut buffer = Buffer::from_view(inference_domain::FrameId(0), b"x", 0, 0, Vec::new());
        buffer.rois.push(inference_domain::Roi::default());
        let blob = Blob::new(inference_domain::FrameId(0), StreamId(0), vec![buffer], Tag::Normal).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();
        let sent = ctx.sent.lock().unwrap();
        let meta = sent[0].buffers[0].meta.get::<HceDatabaseMeta>().unwrap();
        assert_eq!(meta.attribute_result[&0].label, "car");
    }
}
