// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Fusion/output nodes: ResponseNodes that report results via `emitOutput`/
//! `emitFinish` instead of an outgoing queue. All eight
//! classes are always run with one worker and one thread per batch under
//! `BatchingWithStream`, so a node's `ResponseAccumulator` sees exactly one
//! producer per stream.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use inference_domain::meta::{HceDatabaseMeta, PointClouds, RadarConfig, SendController, TrackerOutput};
use inference_domain::{
    BatchingConfig, BatchingPolicy, Blob, BlobRef, Buffer, Node, NodeName, NodeWorker, PipelineError, Response, ResponseAccumulator,
    WorkerContext,
};

fn accumulator_for(slot: &Mutex<Option<Arc<ResponseAccumulator>>>, stream_num: u32) -> Arc<ResponseAccumulator> {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(Arc::new(ResponseAccumulator::new(stream_num.max(1))));
    }
    guard.as_ref().unwrap().clone()
}

/// Assembles `{status, message, responses}` from whatever a buffer's ROIs
/// and meta entries carry. `responses` is left empty here — no
/// output class in scope attaches binary snapshot payloads to the live
/// stream; `LLResultSinkFile`/`RadarPCLSinkFile` persist those to disk
/// instead.
fn response_from_blob(blob: &Blob, class_name: &str) -> Response {
    for buffer in &blob.buffers {
        release_send_controller(buffer);
    }
    let per_buffer: Vec<serde_json::Value> = blob.buffers.iter().map(|b| buffer_to_json(b)).collect();
    let message = serde_json::json!({
        "class": class_name,
        "frameId": blob.frame_id.0,
        "streamId": blob.stream_id.0,
        "endOfRequest": blob.is_end_of_request(),
        "buffers": per_buffer,
    })
    .to_string();
    Response::ok(message)
}

/// Final-message performance summary emitted once per request, right
/// before `emitFinish`, so callers see aggregated per-node timing alongside
/// the frame results without needing a separate RPC.
fn performance_response(report: String) -> Response {
    Response::ok(serde_json::json!({ "performanceReport": report }).to_string())
}

/// Output nodes are the end of the line for a frame: if neither `Tracker`
/// nor `RadarTracking` sat upstream of this node to release the producer's
/// `SendController` slot already, this is the last chance to do it.
fn release_send_controller(buffer: &Buffer) {
    if let Some(controller) = buffer.meta.get::<Arc<SendController>>() {
        controller.release(1);
    }
}

fn buffer_to_json(buffer: &Buffer) -> serde_json::Value {
    let media_uri = buffer.meta.get::<HceDatabaseMeta>().map(|m| m.media_uri.clone());
    let point_clouds = buffer.meta.get::<PointClouds>().map(|p| p.points.clone());
    let tracker = buffer.meta.get::<TrackerOutput>().copied().map(|t| {
        serde_json::json!({
            "trackingId": t.tracking_id,
            "status": format!("{:?}", t.status),
            "velocityX": t.velocity_x,
            "velocityY": t.velocity_y,
        })
    });
    let radar_config = buffer.meta.get::<RadarConfig>().map(|c| {
        serde_json::json!({
            "radarIndex": c.radar_index,
            "frameRate": c.frame_rate,
        })
    });
    serde_json::json!({
        "mediaUri": media_uri,
        "dropped": buffer.drop,
        "rois": buffer.rois,
        "pointClouds": point_clouds,
        "tracker": tracker,
        "radarConfig": radar_config,
    })
}

/// Shared state for the six pure fan-in/emit classes. They differ only in
/// `class_name`; the worker logic is identical.
struct ResponseOutputNode {
    name: NodeName,
    class_name: &'static str,
    total_thread_num: u32,
    batching: BatchingConfig,
    accumulator: Mutex<Option<Arc<ResponseAccumulator>>>,
}

impl ResponseOutputNode {
    fn new(class_name: &'static str, name: NodeName, total_thread_num: u32) -> Self {
        Self {
            name,
            class_name,
            total_thread_num,
            batching: BatchingConfig::default(),
            accumulator: Mutex::new(None),
        }
    }
}

struct ResponseOutputWorker {
    class_name: &'static str,
    accumulator: Arc<ResponseAccumulator>,
}

impl NodeWorker for ResponseOutputWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for blob in inputs {
            self.accumulator.emit_output(response_from_blob(&blob, self.class_name));
            if blob.is_end_of_request() {
                self.accumulator.add_emit_finish_flag();
                if self.accumulator.is_emit_finish() {
                    self.accumulator.emit_output(performance_response(ctx.performance_report()));
                    self.accumulator.emit_finish();
                }
            }
        }
        Ok(())
    }
}

impl Node for ResponseOutputNode {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        self.class_name
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
    fn configure_by_string(&mut self, _config: &str) -> Result<(), PipelineError> {
        Ok(())
    }
    /// Fusion/output nodes are always `BatchingWithStream`, one worker, one
    /// thread per batch, regardless of the default rewrite rule.
    fn prepare(&mut self) -> Result<(), PipelineError> {
        self.batching.policy = BatchingPolicy::BatchingWithStream;
        self.batching.thread_num_per_batch = 1;
        Ok(())
    }
    fn response_accumulator(&self) -> Option<Arc<ResponseAccumulator>> {
        Some(accumulator_for(&self.accumulator, self.batching.stream_num))
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(ResponseOutputWorker {
            class_name: self.class_name,
            accumulator: accumulator_for(&self.accumulator, self.batching.stream_num),
        })
    }
}

macro_rules! response_output_class {
    ($ty:ident, $class:literal) => {
        #[doc = concat!("Fusion/output node: ", $class, ".")]
        pub struct $ty(ResponseOutputNode);

        impl $ty {
            pub fn new(name: NodeName, total_thread_num: u32) -> Self {
                Self(ResponseOutputNode::new($class, name, total_thread_num))
            }
        }

        impl Node for $ty {
            fn name(&self) -> &NodeName {
                self.0.name()
            }
            fn class_name(&self) -> &'static str {
                self.0.class_name()
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
            fn prepare(&mut self) -> Result<(), PipelineError> {
                self.0.prepare()
            }
            fn response_accumulator(&self) -> Option<Arc<ResponseAccumulator>> {
                self.0.response_accumulator()
            }
            fn create_node_worker(&self) -> Box<dyn NodeWorker> {
                self.0.create_node_worker()
            }
        }
    };
}

response_output_class!(MediaRadarOutput, "MediaRadarOutput");
response_output_class!(Media4COutput, "Media4COutput");
response_output_class!(MediaOutput, "MediaOutput");
response_output_class!(RadarOutput, "RadarOutput");
response_output_class!(LLOutput, "LLOutput");
response_output_class!(RadarDetectionOutput, "RadarDetectionOutput");

fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Writes one `results.csv` row per frame under
/// `/opt/hce-core/output_logs/resultsink/pipeline_<name>_results_<timestamp>/`,
/// plus a `snapshots/<frameId>.jpg` placeholder for video runs, in addition
/// to the normal `emitOutput`/`emitFinish` ResponseNode behavior. The header
/// row is the union of observed column keys and is rewritten in place
/// whenever a new column appears.
pub struct LLResultSinkFile {
    name: NodeName,
    total_thread_num: u32,
    batching: BatchingConfig,
    accumulator: Mutex<Option<Arc<ResponseAccumulator>>>,
    run_dir: PathBuf,
}

impl LLResultSinkFile {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        let run_dir = PathBuf::from("/opt/hce-core/output_logs/resultsink").join(format!("pipeline_{}_results_{}", name.0, unix_timestamp()));
        Self {
            name,
            total_thread_num,
            batching: BatchingConfig::default(),
            accumulator: Mutex::new(None),
            run_dir,
        }
    }
}

struct CsvSinkWorker {
    accumulator: Arc<ResponseAccumulator>,
    run_dir: PathBuf,
    columns: BTreeSet<String>,
}

impl CsvSinkWorker {
    fn row_for(&mut self, frame_id: u64, buffer: &Buffer) -> HashMap<String, String> {
        let mut row = HashMap::new();
        row.insert("frameId".into(), frame_id.to_string());
        if let Some(meta) = buffer.meta.get::<HceDatabaseMeta>() {
            row.insert("mediaUri".into(), meta.media_uri.clone());
        }
        if let Some(roi) = buffer.rois.first() {
            if let Some(detection) = &roi.detection {
                row.insert("label".into(), detection.label.clone());
                row.insert("confidence".into(), detection.confidence.to_string());
            }
            if let Some(label) = &roi.classification_label {
                row.insert("classification".into(), label.clone());
            }
        }
        self.columns.extend(row.keys().cloned());
        row
    }

    /// Rewrites `results.csv` in place: the header is always the full
    /// observed column union, so a late-appearing attribute column doesn't
    /// orphan earlier rows.
    fn append_row(&self, row: &HashMap<String, String>) -> std::io::Result<()> {
        fs::create_dir_all(&self.run_dir)?;
        let csv_path = self.run_dir.join("results.csv");
        let mut existing_rows: Vec<HashMap<String, String>> = Vec::new();
        if let Ok(contents) = fs::read_to_string(&csv_path) {
            let mut lines = contents.lines();
            if let Some(header) = lines.next() {
                let header_cols: Vec<&str> = header.split(',').collect();
                for line in lines {
                    let mut parsed = HashMap::new();
                    for (col, value) in header_cols.iter().zip(line.split(',')) {
                        if !value.is_empty() {
                            parsed.insert(col.to_string(), value.to_string());
                        }
                    }
                    existing_rows.push(parsed);
                }
            }
        }
        existing_rows.push(row.clone());

        let columns: Vec<&String> = self.columns.iter().collect();
        let mut file = fs::File::create(&csv_path)?;
        writeln!(file, "{}", columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(","))?;
        for existing in &existing_rows {
            let line: Vec<String> = columns.iter().map(|c| existing.get(*c).cloned().unwrap_or_default()).collect();
            writeln!(file, "{}", line.join(","))?;
        }
        Ok(())
    }

    fn write_snapshot_placeholder(&self, frame_id: u64) -> std::io::Result<()> {
        let snapshots = self.run_dir.join("snapshots");
        fs::create_dir_all(&snapshots)?;
        fs::write(snapshots.join(format!("{frame_id}.jpg")), [])
    }
}

impl NodeWorker for CsvSinkWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for blob in inputs {
            for buffer in &blob.buffers {
                if buffer.drop {
                    continue;
                }
                let row = self.row_for(blob.frame_id.0, buffer);
                if self.append_row(&row).is_err() {
                    self.accumulator.emit_output(Response::with_status(-1, "failed to write results.csv"));
                    continue;
                }
                let _ = self.write_snapshot_placeholder(blob.frame_id.0);
            }
            self.accumulator.emit_output(response_from_blob(&blob, "LLResultSinkFile"));
            if blob.is_end_of_request() {
                self.accumulator.add_emit_finish_flag();
                if self.accumulator.is_emit_finish() {
                    self.accumulator.emit_output(performance_response(ctx.performance_report()));
                    self.accumulator.emit_finish();
                }
            }
        }
        Ok(())
    }
}

impl Node for LLResultSinkFile {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "LLResultSinkFile"
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
    fn configure_by_string(&mut self, _config: &str) -> Result<(), PipelineError> {
        Ok(())
    }
    fn prepare(&mut self) -> Result<(), PipelineError> {
        self.batching.policy = BatchingPolicy::BatchingWithStream;
        self.batching.thread_num_per_batch = 1;
        Ok(())
    }
    fn response_accumulator(&self) -> Option<Arc<ResponseAccumulator>> {
        Some(accumulator_for(&self.accumulator, self.batching.stream_num))
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(CsvSinkWorker {
            accumulator: accumulator_for(&self.accumulator, self.batching.stream_num),
            run_dir: self.run_dir.clone(),
            columns: BTreeSet::new(),
        })
    }
}

/// Writes each frame's clustered point cloud to
/// `/opt/hce-core/output_logs/resultsink/pipeline_<name>_radar_<timestamp>/points_<frameId>.txt`
/// in addition to the normal ResponseNode emit path.
pub struct RadarPCLSinkFile {
    name: NodeName,
    total_thread_num: u32,
    batching: BatchingConfig,
    accumulator: Mutex<Option<Arc<ResponseAccumulator>>>,
    run_dir: PathBuf,
}

impl RadarPCLSinkFile {
    pub fn new(name: NodeName, total_thread_num: u32) -> Self {
        let run_dir = PathBuf::from("/opt/hce-core/output_logs/resultsink").join(format!("pipeline_{}_radar_{}", name.0, unix_timestamp()));
        Self {
            name,
            total_thread_num,
            batching: BatchingConfig::default(),
            accumulator: Mutex::new(None),
            run_dir,
        }
    }
}

struct PclSinkWorker {
    accumulator: Arc<ResponseAccumulator>,
    run_dir: PathBuf,
}

impl PclSinkWorker {
    fn write_points(&self, frame_id: u64, clouds: &PointClouds) -> std::io::Result<()> {
        fs::create_dir_all(&self.run_dir)?;
        let mut file = fs::File::create(self.run_dir.join(format!("points_{frame_id}.txt")))?;
        for (x, y, z) in &clouds.points {
            writeln!(file, "{x} {y} {z}")?;
        }
        Ok(())
    }
}

impl NodeWorker for PclSinkWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for blob in inputs {
            for buffer in &blob.buffers {
                if let Some(clouds) = buffer.meta.get::<PointClouds>() {
                    let _ = self.write_points(blob.frame_id.0, clouds);
                }
            }
            self.accumulator.emit_output(response_from_blob(&blob, "RadarPCLSinkFile"));
            if blob.is_end_of_request() {
                self.accumulator.add_emit_finish_flag();
                if self.accumulator.is_emit_finish() {
                    self.accumulator.emit_output(performance_response(ctx.performance_report()));
                    self.accumulator.emit_finish();
                }
            }
        }
        Ok(())
    }
}

impl Node for RadarPCLSinkFile {
    fn name(&self) -> &NodeName {
        &self.name
    }
    fn class_name(&self) -> &'static str {
        "RadarPCLSinkFile"
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
    fn configure_by_string(&mut self, _config: &str) -> Result<(), PipelineError> {
        Ok(())
    }
    fn prepare(&mut self) -> Result<(), PipelineError> {
        self.batching.policy = BatchingPolicy::BatchingWithStream;
        self.batching.thread_num_per_batch = 1;
        Ok(())
    }
    fn response_accumulator(&self) -> Option<Arc<ResponseAccumulator>> {
        Some(accumulator_for(&self.accumulator, self.batching.stream_num))
    }
    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(PclSinkWorker {
            accumulator: accumulator_for(&self.accumulator, self.batching.stream_num),
            run_dir: self.run_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_domain::{FrameId, Roi, StreamId, Tag};
    use std::sync::atomic::{AtomicU32, Ordering};
    use inference_domain::EmitListener;

    struct NoopContext;
    impl WorkerContext for NoopContext {
        fn send_output(&self, _blob: BlobRef, _out_port_idx: u32, _timeout: std::time::Duration) -> Result<(), PipelineError> {
            Ok(())
        }
        fn hold_depleting(&self) {}
        fn release_depleting(&self) {}
        fn emit_event(&self, _event: inference_domain::NodeEvent) {}
    }

    struct CountingListener {
        emits: AtomicU32,
        finishes: AtomicU32,
    }
    impl EmitListener for CountingListener {
        fn on_emit(&self, _response: &Response) {
            self.emits.fetch_add(1, Ordering::SeqCst);
        }
        fn on_finish(&self) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn response_accumulator_is_some_and_stable_across_calls() {
        let mut node = MediaOutput::new(NodeName("out".into()), 1);
        node.prepare().unwrap();
        let a = node.response_accumulator().unwrap();
        let b = node.response_accumulator().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn end_of_request_triggers_finish_once_stream_num_reached() {
        let mut node = MediaOutput::new(NodeName("out".into()), 1);
        node.batching_mut().stream_num = 1;
        node.prepare().unwrap();
        let accumulator = node.response_accumulator().unwrap();
        let listener = Arc::new(CountingListener {
            emits: AtomicU32::new(0),
            finishes: AtomicU32::new(0),
        });
        let trait_obj: Arc<dyn EmitListener> = listener.clone();
        accumulator.register_emit_listener(Arc::downgrade(&trait_obj));

        let mut worker = node.create_node_worker();
        let ctx = NoopContext;
        let mut buffer = Buffer::from_view(FrameId(0), b"x", 0, 0, Vec::new());
        buffer.rois.push(Roi::default());
        let blob = Blob::new(FrameId(0), StreamId(0), vec![buffer], Tag::EndOfRequest).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();

        // One emit for the frame result, one for the performance-report summary.
        assert_eq!(listener.emits.load(Ordering::SeqCst), 2);
        assert_eq!(listener.finishes.load(Ordering::SeqCst), 1);
    }
}
