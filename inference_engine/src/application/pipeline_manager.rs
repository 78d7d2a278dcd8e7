// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! PipelineManager: process-wide controller of pipeline instances, task
//! queueing, weight budgeting, and idle timeouts. One instance per transport
//! (HTTP, gRPC) — each holds its own worklist and weight budget.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use inference_domain::{Blob, Buffer, JobHandle, JobHandleAllocator, NodeName, Pipeline, PipelineError, StreamId, Tag};

use crate::application::node_registry::NodeRegistry;
use crate::application::pipeline_parser::PipelineParser;
use crate::application::task::{CommHandle, Task};
use crate::infrastructure::metrics::MetricsService;

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub max_concurrent_workload: u32,
    pub max_pipeline_lifetime: Duration,
    pub pool_size: u32,
    pub queue_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workload: 64,
            max_pipeline_lifetime: Duration::from_secs(30),
            pool_size: 4,
            queue_capacity: 64,
        }
    }
}

struct ManagedPipeline {
    pipeline: Arc<Pipeline>,
    config: String,
    suggested_weight: u32,
    stream_num: u32,
    heartbeat: Instant,
}

/// Process-wide singleton per transport.
pub struct PipelineManager {
    config: ManagerConfig,
    registry: Arc<NodeRegistry>,
    metrics: Arc<MetricsService>,
    /// Distinguishes this manager's weight gauges from a sibling transport's
    /// (e.g. "http" vs "grpc") in the shared Prometheus registry.
    label: String,
    pipelines: Mutex<HashMap<JobHandle, ManagedPipeline>>,
    weight_used: AtomicU32,
    handle_alloc: JobHandleAllocator,
    queue: Mutex<VecDeque<Task>>,
    queue_cv: Condvar,
    /// Advances on every watchdog tick; `GET /healthz` reports healthy iff
    /// this counter has moved since the last check.
    health_check: AtomicU64,
    shutdown: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineManager {
    pub fn new(config: ManagerConfig, registry: Arc<NodeRegistry>, metrics: Arc<MetricsService>, label: impl Into<String>) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            registry,
            metrics,
            label: label.into(),
            pipelines: Mutex::new(HashMap::new()),
            weight_used: AtomicU32::new(0),
            handle_alloc: JobHandleAllocator::new(),
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            health_check: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        });

        let mut threads = manager.threads.lock().unwrap();
        for idx in 0..manager.config.pool_size.max(1) {
            let mgr = manager.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("pipeline-manager-scheduler-{idx}"))
                    .spawn(move || mgr.scheduler_loop())
                    .expect("failed to spawn scheduler thread"),
            );
        }
        let mgr = manager.clone();
        threads.push(
            std::thread::Builder::new()
                .name("pipeline-manager-watchdog".into())
                .spawn(move || mgr.watchdog_loop())
                .expect("failed to spawn watchdog thread"),
        );
        drop(threads);

        manager
    }

    pub fn health_check_counter(&self) -> u64 {
        self.health_check.load(Ordering::SeqCst)
    }

    pub fn submit(&self, task: Task) {
        self.queue.lock().unwrap().push_back(task);
        self.queue_cv.notify_one();
    }

    /// Stops every active pipeline and joins the scheduler/watchdog threads.
    /// Idempotent, mirroring `Pipeline::stop()`'s contract.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue_cv.notify_all();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
        let pipelines: HashMap<JobHandle, ManagedPipeline> = std::mem::take(&mut *self.pipelines.lock().unwrap());
        for (_, managed) in pipelines {
            let _ = managed.pipeline.stop();
        }
    }

    fn scheduler_loop(self: Arc<Self>) {
        loop {
            let task = {
                let mut queue = self.queue.lock().unwrap();
                loop {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(task) = queue.pop_front() {
                        break task;
                    }
                    let (guard, timeout) = self.queue_cv.wait_timeout(queue, Duration::from_millis(200)).unwrap();
                    queue = guard;
                    let _ = timeout;
                }
            };
            self.dispatch(task);
        }
    }

    fn dispatch(self: &Arc<Self>, task: Task) {
        match task {
            Task::Load {
                pipeline_config,
                suggested_weight,
                stream_num,
                comm,
            } => self.handle_load(pipeline_config, suggested_weight, stream_num, comm),
            Task::Run { media_uris, job_handle, comm } => self.handle_run(media_uris, job_handle, comm),
            Task::Unload { job_handle, comm } => self.handle_unload(job_handle, comm),
            Task::AutoRun {
                media_uris,
                pipeline_config,
                suggested_weight,
                stream_num,
                comm,
            } => self.handle_auto_run(media_uris, pipeline_config, suggested_weight, stream_num, comm),
        }
    }

    fn try_acquire_weight(&self, weight: u32) -> bool {
        let mut current = self.weight_used.load(Ordering::SeqCst);
        loop {
            if current.saturating_add(weight) > self.config.max_concurrent_workload {
                return false;
            }
            match self.weight_used.compare_exchange(current, current + weight, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    self.report_weight(current + weight);
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn release_weight(&self, weight: u32) {
        let remaining = self.weight_used.fetch_sub(weight, Ordering::SeqCst) - weight;
        self.report_weight(remaining);
        self.queue_cv.notify_all();
    }

    fn report_weight(&self, in_use: u32) {
        self.metrics.set_manager_weight(&self.label, in_use as i64, self.config.max_concurrent_workload as i64);
    }

    fn handle_load(self: &Arc<Self>, pipeline_config: String, suggested_weight: u32, stream_num: u32, comm: CommHandle) {
        if stream_num < 1 {
            comm.reply.reply_load(Err(PipelineError::bad_request("streamNum must be >= 1")));
            return;
        }
        if !self.try_acquire_weight(suggested_weight) {
            // Re-enqueue at the tail to avoid livelocking behind an
            // unsatisfiable head.
            self.submit(Task::Load {
                pipeline_config,
                suggested_weight,
                stream_num,
                comm,
            });
            return;
        }

        match self.build_pipeline(&pipeline_config, stream_num) {
            Ok(pipeline) => {
                let handle = self.handle_alloc.allocate();
                self.pipelines.lock().unwrap().insert(
                    handle,
                    ManagedPipeline {
                        pipeline,
                        config: pipeline_config,
                        suggested_weight,
                        stream_num,
                        heartbeat: Instant::now(),
                    },
                );
                info!(job_handle = %handle, "pipeline loaded");
                comm.reply.reply_load(Ok(handle));
            }
            Err(err) => {
                // Possibly-buggy source behaviour, flagged not normalised
                //: weight is released on build failure but the
                // handle space itself is not reclaimed, since no handle was
                // ever allocated for a failed Load.
                self.release_weight(suggested_weight);
                warn!(error = %err, "pipeline build failed");
                comm.reply.reply_load(Err(err));
            }
        }
    }

    fn build_pipeline(&self, pipeline_config: &str, stream_num: u32) -> Result<Arc<Pipeline>, PipelineError> {
        let parser = PipelineParser::new(&self.registry).with_observer(self.metrics.clone());
        let pipeline = parser.parse(pipeline_config, stream_num, self.config.queue_capacity)?;
        pipeline.prepare()?;
        let pipeline = Arc::new(pipeline);
        pipeline.start()?;
        Ok(pipeline)
    }

    fn handle_run(&self, media_uris: Vec<String>, job_handle: JobHandle, comm: CommHandle) {
        if media_uris.is_empty() {
            comm.reply.reply_run_error(PipelineError::bad_request("mediaUri list is empty"));
            return;
        }

        let mut pipelines = self.pipelines.lock().unwrap();
        let Some(managed) = pipelines.get_mut(&job_handle) else {
            drop(pipelines);
            comm.reply.reply_run_error(PipelineError::HandleNotFound);
            return;
        };

        if media_uris.len() < managed.stream_num as usize {
            drop(pipelines);
            comm.reply
                .reply_run_error(PipelineError::bad_request("streamNum exceeds mediaUri count"));
            return;
        }

        managed.heartbeat = Instant::now();
        let pipeline = managed.pipeline.clone();
        let stream_num = managed.stream_num;
        drop(pipelines);

        attach_listener(&pipeline, &comm);
        feed_segments(&pipeline, &media_uris, stream_num);
    }

    fn handle_unload(&self, job_handle: JobHandle, comm: CommHandle) {
        let managed = self.pipelines.lock().unwrap().remove(&job_handle);
        match managed {
            Some(managed) => {
                let _ = managed.pipeline.stop();
                self.release_weight(managed.suggested_weight);
                info!(job_handle = %job_handle, "pipeline unloaded");
                comm.reply.reply_unload(Ok(()));
            }
            None => comm.reply.reply_unload(Err(PipelineError::HandleNotFound)),
        }
    }

    fn handle_auto_run(self: &Arc<Self>, media_uris: Vec<String>, pipeline_config: String, suggested_weight: u32, stream_num: u32, comm: CommHandle) {
        if self.try_acquire_weight(suggested_weight) {
            match self.build_pipeline(&pipeline_config, stream_num) {
                Ok(pipeline) => {
                    let handle = self.handle_alloc.allocate();
                    self.pipelines.lock().unwrap().insert(
                        handle,
                        ManagedPipeline {
                            pipeline: pipeline.clone(),
                            config: pipeline_config,
                            suggested_weight,
                            stream_num,
                            heartbeat: Instant::now(),
                        },
                    );
                    attach_listener(&pipeline, &comm);
                    feed_segments(&pipeline, &media_uris, stream_num);
                }
                Err(err) => {
                    self.release_weight(suggested_weight);
                    comm.reply.reply_run_error(err);
                }
            }
            return;
        }

        // No budget: reuse the existing pipeline with an identical config
        // and the oldest heartbeat.
        let reuse = {
            let pipelines = self.pipelines.lock().unwrap();
            pipelines
                .iter()
                .filter(|(_, managed)| managed.config == pipeline_config)
                .min_by_key(|(_, managed)| managed.heartbeat)
                .map(|(handle, managed)| (*handle, managed.pipeline.clone(), managed.stream_num))
        };

        match reuse {
            Some((handle, pipeline, stream_num)) => {
                if let Some(managed) = self.pipelines.lock().unwrap().get_mut(&handle) {
                    managed.heartbeat = Instant::now();
                }
                attach_listener(&pipeline, &comm);
                feed_segments(&pipeline, &media_uris, stream_num);
            }
            None => {
                // Neither a fresh build nor a reusable pipeline; re-enqueue
                //.
                self.submit(Task::AutoRun {
                    media_uris,
                    pipeline_config,
                    suggested_weight,
                    stream_num,
                    comm,
                });
            }
        }
    }

    fn watchdog_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(5));
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            self.health_check.fetch_add(1, Ordering::SeqCst);
            self.metrics.record_watchdog_tick();
            self.metrics.set_active_pipelines(self.pipelines.lock().unwrap().len() as i64);

            let expired: Vec<(JobHandle, Arc<Pipeline>, u32)> = {
                let pipelines = self.pipelines.lock().unwrap();
                pipelines
                    .iter()
                    .filter(|(_, managed)| managed.heartbeat.elapsed() > self.config.max_pipeline_lifetime)
                    .map(|(handle, managed)| (*handle, managed.pipeline.clone(), managed.suggested_weight))
                    .collect()
            };

            for (handle, pipeline, weight) in expired {
                warn!(job_handle = %handle, "pipeline idle timeout, stopping");
                let _ = pipeline.stop();
                self.pipelines.lock().unwrap().remove(&handle);
                self.release_weight(weight);
            }

            self.metrics.set_active_pipelines(self.pipelines.lock().unwrap().len() as i64);
        }
    }
}

/// Registers the connection's listener on every response-bearing node in
/// the pipeline.
fn attach_listener(pipeline: &Arc<Pipeline>, comm: &CommHandle) {
    for name in pipeline.node_names().cloned().collect::<Vec<_>>() {
        if let Some(accumulator) = pipeline.response_accumulator(&name) {
            accumulator.register_emit_listener(Arc::downgrade(&comm.listener));
        }
    }
}

/// Splits `media_uris` into `stream_num` contiguous segments and pushes one
/// Blob per segment into each source node's port 0, with `streamId =
/// segmentIndex`.
///
/// A run's `mediaUris` is ordered as repeating groups of one URI per sensor
/// when more than one source node is configured with a `sensorIndex`
/// (`MediaIndex`/`RadarIndex`) — a combined video+radar pipeline shares one
/// feed this way. Each source only ever sees the slice at its own index; a
/// pipeline with a single source (the common case) has `sensor_count == 1`
/// and every source gets the full list, matching prior behaviour.
fn feed_segments(pipeline: &Arc<Pipeline>, media_uris: &[String], stream_num: u32) {
    let sources = pipeline.source_nodes_with_sensor_index();
    let sensor_count = sources.iter().filter_map(|(_, idx)| *idx).max().map(|m| m as usize + 1).unwrap_or(1).max(1);

    for (source, sensor_index) in sources {
        let slot = sensor_index.unwrap_or(0) as usize;
        let uris: Vec<&String> = if sensor_count > 1 {
            media_uris.iter().skip(slot).step_by(sensor_count).collect()
        } else {
            media_uris.iter().collect()
        };
        send_segments(pipeline, &source, &uris, stream_num);
    }
}

fn send_segments(pipeline: &Arc<Pipeline>, source: &NodeName, uris: &[&String], stream_num: u32) {
    let n = uris.len();
    let stream_num = stream_num.max(1) as usize;
    let chunk = n / stream_num;

    for i in 0..stream_num {
        let start = i * chunk;
        let end = if i == stream_num - 1 { n } else { (i + 1) * chunk };
        let segment: Vec<String> = uris[start..end].iter().map(|s| (*s).clone()).collect();
        let payload = segment.join("\n").into_bytes();
        let buffer = Buffer::from_owned(inference_domain::FrameId(i as u64), payload, || {}, 0, 0, Vec::new());
        let blob = Blob::new(inference_domain::FrameId(i as u64), StreamId(i as u32), vec![buffer], Tag::Normal).into_ref();
        let _ = pipeline.send_to_port(blob, source, 0, Duration::from_millis(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_split_matches_spec_formula() {
        let uris: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let stream_num = 3usize;
        let chunk = uris.len() / stream_num;
        let mut sizes = Vec::new();
        for i in 0..stream_num {
            let start = i * chunk;
            let end = if i == stream_num - 1 { uris.len() } else { (i + 1) * chunk };
            sizes.push(end - start);
        }
        assert_eq!(sizes, vec![3, 3, 4]);
    }

    #[test]
    fn feed_segments_demuxes_by_sensor_index_across_sources() {
        use inference_domain::{EmitListener, Response};
        use std::sync::Mutex as StdMutex;

        const TWO_SOURCE_PIPELINE: &str = r#"{
            "Nodes": [
                {"Node Class Name": "LocalMultiSensorInput", "Node Name": "video_in", "Thread Number": 1, "Is Source Node": true, "Configure String": "MediaIndex=(0)"},
                {"Node Class Name": "VideoDecoder", "Node Name": "radar_in", "Thread Number": 1, "Is Source Node": true, "Configure String": "MediaIndex=(1)"},
                {"Node Class Name": "LLOutput", "Node Name": "video_out", "Thread Number": 1, "Configure String": ""},
                {"Node Class Name": "LLOutput", "Node Name": "radar_out", "Thread Number": 1, "Configure String": ""}
            ],
            "Links": [
                {"Previous Node": "video_in", "Previous Node Port": 0, "Next Node": "video_out", "Next Node Port": 0},
                {"Previous Node": "radar_in", "Previous Node Port": 0, "Next Node": "radar_out", "Next Node Port": 0}
            ]
        }"#;

        let registry = NodeRegistry::with_builtin_nodes();
        let parser = PipelineParser::new(&registry);
        let pipeline = parser.parse(TWO_SOURCE_PIPELINE, 1, 16).unwrap();
        pipeline.prepare().unwrap();
        let pipeline = Arc::new(pipeline);
        pipeline.start().unwrap();

        struct CollectingListener {
            uris: StdMutex<Vec<String>>,
        }
        impl EmitListener for CollectingListener {
            fn on_emit(&self, response: &Response) {
                let value: serde_json::Value = serde_json::from_str(&response.message).unwrap();
                if let Some(buffers) = value.get("buffers").and_then(|b| b.as_array()) {
                    for buffer in buffers {
                        if let Some(uri) = buffer.get("mediaUri").and_then(|u| u.as_str()) {
                            self.uris.lock().unwrap().push(uri.to_string());
                        }
                    }
                }
            }
            fn on_finish(&self) {}
        }

        let video_listener = Arc::new(CollectingListener { uris: StdMutex::new(Vec::new()) });
        let radar_listener = Arc::new(CollectingListener { uris: StdMutex::new(Vec::new()) });
        let video_trait: Arc<dyn EmitListener> = video_listener.clone();
        let radar_trait: Arc<dyn EmitListener> = radar_listener.clone();
        pipeline
            .response_accumulator(&NodeName("video_out".into()))
            .unwrap()
            .register_emit_listener(Arc::downgrade(&video_trait));
        pipeline
            .response_accumulator(&NodeName("radar_out".into()))
            .unwrap()
            .register_emit_listener(Arc::downgrade(&radar_trait));

        let media_uris: Vec<String> = (0..6).map(|i| format!("uri{i}")).collect();
        feed_segments(&pipeline, &media_uris, 1);

        for _ in 0..200 {
            if video_listener.uris.lock().unwrap().len() == 3 && radar_listener.uris.lock().unwrap().len() == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(*video_listener.uris.lock().unwrap(), vec!["uri0", "uri2", "uri4"]);
        assert_eq!(*radar_listener.uris.lock().unwrap(), vec!["uri1", "uri3", "uri5"]);

        let _ = pipeline.stop();
    }

    #[test]
    fn weight_accounting_never_overshoots() {
        let registry = Arc::new(NodeRegistry::with_builtin_nodes());
        let metrics = Arc::new(MetricsService::new().unwrap());
        let manager = PipelineManager::new(
            ManagerConfig {
                max_concurrent_workload: 2,
                ..Default::default()
            },
            registry,
            metrics,
            "test",
        );
        assert!(manager.try_acquire_weight(2));
        assert!(!manager.try_acquire_weight(1));
        manager.release_weight(2);
        assert!(manager.try_acquire_weight(1));
        manager.shutdown();
    }
}
