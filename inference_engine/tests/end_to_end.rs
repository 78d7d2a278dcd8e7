// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end scenarios against a real `PipelineManager` and in-process
//! node implementations, no media decoding and no network sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use inference_domain::{EmitListener, JobHandle, PipelineError, Response};

use inference_engine::application::node_registry::NodeRegistry;
use inference_engine::application::pipeline_manager::{ManagerConfig, PipelineManager};
use inference_engine::application::task::{CommHandle, Task, TaskReply};
use inference_engine::infrastructure::metrics::MetricsService;

const SIMPLE_PIPELINE: &str = r#"{
    "Nodes": [
        {"Node Class Name": "LocalMultiSensorInput", "Node Name": "in", "Thread Number": 1, "Is Source Node": true, "Configure String": "InputCapacity=4;Stride=1"},
        {"Node Class Name": "LLOutput", "Node Name": "out", "Thread Number": 1, "Configure String": ""}
    ],
    "Links": [
        {"Previous Node": "in", "Previous Node Port": 0, "Next Node": "out", "Next Node Port": 0}
    ]
}"#;

struct CapturingReply {
    run_result: Mutex<Option<Result<(), PipelineError>>>,
    load_result: Mutex<Option<Result<JobHandle, PipelineError>>>,
}

impl CapturingReply {
    fn new() -> Self {
        Self {
            run_result: Mutex::new(None),
            load_result: Mutex::new(None),
        }
    }
}

impl TaskReply for CapturingReply {
    fn reply_load(&self, result: Result<JobHandle, PipelineError>) {
        *self.load_result.lock().unwrap() = Some(result);
    }
    fn reply_unload(&self, _result: Result<(), PipelineError>) {}
    fn reply_run_error(&self, error: PipelineError) {
        *self.run_result.lock().unwrap() = Some(Err(error));
    }
}

struct CapturingListener {
    responses: Mutex<Vec<Response>>,
    finished: Mutex<bool>,
}

impl CapturingListener {
    fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            finished: Mutex::new(false),
        }
    }
}

impl EmitListener for CapturingListener {
    fn on_emit(&self, response: &Response) {
        self.responses.lock().unwrap().push(response.clone());
    }
    fn on_finish(&self) {
        *self.finished.lock().unwrap() = true;
    }
}

fn manager() -> Arc<PipelineManager> {
    let registry = Arc::new(NodeRegistry::with_builtin_nodes());
    let metrics = Arc::new(MetricsService::new().unwrap());
    PipelineManager::new(ManagerConfig::default(), registry, metrics, "test")
}

fn load(manager: &Arc<PipelineManager>, config: &str) -> JobHandle {
    let reply = Arc::new(CapturingReply::new());
    let comm = CommHandle {
        reply: reply.clone() as Arc<dyn TaskReply>,
        listener: Arc::new(CapturingListener::new()) as Arc<dyn EmitListener>,
    };
    manager.submit(Task::Load {
        pipeline_config: config.to_string(),
        suggested_weight: 1,
        stream_num: 1,
        comm,
    });

    for _ in 0..200 {
        if let Some(result) = reply.load_result.lock().unwrap().take() {
            return result.expect("pipeline load failed");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("load never replied");
}

fn wait_for_finish(listener: &Arc<CapturingListener>) {
    for _ in 0..200 {
        if *listener.finished.lock().unwrap() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("run never finished");
}

/// Scenario 1: load, run 32 URIs with `streamNum=1`, unload.
#[test]
fn load_run_unload_returns_one_result_per_frame() {
    let manager = manager();
    let handle = load(&manager, SIMPLE_PIPELINE);

    let media_uris: Vec<String> = (0..32).map(|i| format!("file:///frame-{i}.jpg")).collect();
    let listener = Arc::new(CapturingListener::new());
    let comm = CommHandle {
        reply: Arc::new(CapturingReply::new()) as Arc<dyn TaskReply>,
        listener: listener.clone() as Arc<dyn EmitListener>,
    };
    manager.submit(Task::Run {
        media_uris,
        job_handle: handle,
        comm,
    });
    wait_for_finish(&listener);

    // 32 frame results plus the trailing performance-report summary.
    assert_eq!(listener.responses.lock().unwrap().len(), 33);

    let unload_reply = Arc::new(CapturingReply::new());
    let comm = CommHandle {
        reply: unload_reply as Arc<dyn TaskReply>,
        listener: Arc::new(CapturingListener::new()) as Arc<dyn EmitListener>,
    };
    manager.submit(Task::Unload { job_handle: handle, comm });
    manager.shutdown();
}

/// Scenario 5: one corrupt URI among nine valid ones still
/// produces ten ordered results and the pipeline stays `running`.
#[test]
fn decode_failure_reports_status_without_stalling_the_pipeline() {
    let manager = manager();
    let handle = load(&manager, SIMPLE_PIPELINE);

    let mut media_uris: Vec<String> = (0..9).map(|i| format!("file:///ok-{i}.jpg")).collect();
    media_uris.insert(4, "file:///decode-fail.jpg".to_string());

    let listener = Arc::new(CapturingListener::new());
    let comm = CommHandle {
        reply: Arc::new(CapturingReply::new()) as Arc<dyn TaskReply>,
        listener: listener.clone() as Arc<dyn EmitListener>,
    };
    manager.submit(Task::Run {
        media_uris,
        job_handle: handle,
        comm,
    });
    wait_for_finish(&listener);

    let responses = listener.responses.lock().unwrap();
    // 10 frame results plus the trailing performance-report summary.
    assert_eq!(responses.len(), 11);

    manager.shutdown();
}

/// Scenario 3: an idle pipeline is stopped and removed by the
/// watchdog once `maxPipelineLifetime` elapses, and a later Run against its
/// handle reports `HandleNotFound`.
#[test]
fn idle_pipeline_is_reaped_by_the_watchdog() {
    let registry = Arc::new(NodeRegistry::with_builtin_nodes());
    let config = ManagerConfig {
        max_pipeline_lifetime: Duration::from_millis(1),
        ..ManagerConfig::default()
    };
    let metrics = Arc::new(MetricsService::new().unwrap());
    let manager = PipelineManager::new(config, registry, metrics, "test");
    let handle = load(&manager, SIMPLE_PIPELINE);

    // The watchdog wakes on a 5s tick; give it two ticks of headroom.
    std::thread::sleep(Duration::from_secs(11));

    let reply = Arc::new(CapturingReply::new());
    let comm = CommHandle {
        reply: reply.clone() as Arc<dyn TaskReply>,
        listener: Arc::new(CapturingListener::new()) as Arc<dyn EmitListener>,
    };
    manager.submit(Task::Run {
        media_uris: vec!["file:///frame-0.jpg".to_string()],
        job_handle: handle,
        comm,
    });

    for _ in 0..200 {
        if reply.run_result.lock().unwrap().is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let result = reply.run_result.lock().unwrap().take().expect("run never replied");
    assert!(matches!(result, Err(PipelineError::HandleNotFound)));

    manager.shutdown();
}
