// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! HTTP frontend: JSON over HTTP/1.1 via `axum`. `/run`
//! holds the connection open until the pipeline's `ResponseAccumulator`
//! calls `on_finish`, then replies with the accumulated frame results in a
//! single JSON body.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

use inference_domain::{EmitListener, JobHandle, PipelineError, Response};

use crate::application::node_registry::NodeRegistry;
use crate::application::pipeline_manager::PipelineManager;
use crate::application::task::{CommHandle, Task, TaskReply};

#[derive(Clone)]
pub struct HttpState {
    pub manager: Arc<PipelineManager>,
    pub run_timeout: Duration,
}

impl HttpState {
    pub fn new(manager: Arc<PipelineManager>, run_timeout: Duration) -> Self {
        Self { manager, run_timeout }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/load_pipeline", post(load_pipeline))
        .route("/unload_pipeline", post(unload_pipeline))
        .route("/run", post(run))
        .route("/healthz", get(healthz))
        .with_state(state)
}

// --- /load_pipeline ---

#[derive(Debug, Deserialize)]
struct LoadRequest {
    #[serde(rename = "pipelineConfig")]
    pipeline_config: String,
    #[serde(rename = "suggestedWeight", default = "default_weight")]
    suggested_weight: u32,
    #[serde(rename = "streamNum", default = "default_stream_num")]
    stream_num: u32,
}

fn default_weight() -> u32 {
    1
}

fn default_stream_num() -> u32 {
    1
}

#[derive(Debug, Serialize)]
struct LoadResponse {
    description: String,
    request: &'static str,
    handle: Option<JobHandle>,
}

struct LoadReply {
    tx: Mutex<Option<oneshot::Sender<Result<JobHandle, PipelineError>>>>,
}

impl TaskReply for LoadReply {
    fn reply_load(&self, result: Result<JobHandle, PipelineError>) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }
    fn reply_unload(&self, _result: Result<(), PipelineError>) {
        unreachable!("LoadReply only handles Task::Load outcomes")
    }
    fn reply_run_error(&self, _error: PipelineError) {
        unreachable!("LoadReply only handles Task::Load outcomes")
    }
}

struct NullListener;
impl EmitListener for NullListener {
    fn on_emit(&self, _response: &Response) {}
    fn on_finish(&self) {}
}

async fn load_pipeline(State(state): State<HttpState>, Json(body): Json<LoadRequest>) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();
    let comm = CommHandle {
        reply: Arc::new(LoadReply { tx: Mutex::new(Some(tx)) }),
        listener: Arc::new(NullListener),
    };
    state.manager.submit(Task::Load {
        pipeline_config: body.pipeline_config,
        suggested_weight: body.suggested_weight,
        stream_num: body.stream_num,
        comm,
    });

    match rx.await {
        Ok(Ok(handle)) => (
            axum::http::StatusCode::OK,
            Json(LoadResponse {
                description: "ok".into(),
                request: "load_pipeline",
                handle: Some(handle),
            }),
        ),
        Ok(Err(err)) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(LoadResponse {
                description: err.to_string(),
                request: "load_pipeline",
                handle: None,
            }),
        ),
        Err(_) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(LoadResponse {
                description: "manager dropped the reply channel".into(),
                request: "load_pipeline",
                handle: None,
            }),
        ),
    }
}

// --- /unload_pipeline ---

#[derive(Debug, Deserialize)]
struct UnloadRequest {
    handle: JobHandle,
}

#[derive(Debug, Serialize)]
struct UnloadResponse {
    description: String,
    request: &'static str,
    handle: JobHandle,
}

struct UnloadReply {
    tx: Mutex<Option<oneshot::Sender<Result<(), PipelineError>>>>,
}

impl TaskReply for UnloadReply {
    fn reply_load(&self, _result: Result<JobHandle, PipelineError>) {
        unreachable!("UnloadReply only handles Task::Unload outcomes")
    }
    fn reply_unload(&self, result: Result<(), PipelineError>) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }
    fn reply_run_error(&self, _error: PipelineError) {
        unreachable!("UnloadReply only handles Task::Unload outcomes")
    }
}

async fn unload_pipeline(State(state): State<HttpState>, Json(body): Json<UnloadRequest>) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();
    let comm = CommHandle {
        reply: Arc::new(UnloadReply { tx: Mutex::new(Some(tx)) }),
        listener: Arc::new(NullListener),
    };
    state.manager.submit(Task::Unload { job_handle: body.handle, comm });

    let description = match rx.await {
        Ok(Ok(())) => "ok".to_string(),
        Ok(Err(err)) => err.to_string(),
        Err(_) => "manager dropped the reply channel".to_string(),
    };
    Json(UnloadResponse {
        description,
        request: "unload_pipeline",
        handle: body.handle,
    })
}

// --- /run ---

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(rename = "mediaUri")]
    media_uri: Vec<String>,
    handle: Option<JobHandle>,
    #[serde(rename = "pipelineConfig")]
    pipeline_config: Option<String>,
    #[serde(rename = "suggestedWeight", default = "default_weight")]
    suggested_weight: u32,
    #[serde(rename = "streamNum", default = "default_stream_num")]
    stream_num: u32,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    result: Vec<Response>,
    latency: f64,
    frames: usize,
}

/// Accumulates `emitOutput` calls for one `/run` request and signals
/// completion (success or early rejection) through a single oneshot, since
/// `TaskReply::reply_run_error` and `EmitListener::on_finish` are two
/// different call sites racing for the same outcome.
struct RunHandler {
    responses: Mutex<Vec<Response>>,
    done: Mutex<Option<oneshot::Sender<Result<(), PipelineError>>>>,
}

impl RunHandler {
    fn new(done: oneshot::Sender<Result<(), PipelineError>>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            done: Mutex::new(Some(done)),
        }
    }
}

impl TaskReply for RunHandler {
    fn reply_load(&self, _result: Result<JobHandle, PipelineError>) {
        unreachable!("RunHandler only handles Task::Run/AutoRun outcomes")
    }
    fn reply_unload(&self, _result: Result<(), PipelineError>) {
        unreachable!("RunHandler only handles Task::Run/AutoRun outcomes")
    }
    fn reply_run_error(&self, error: PipelineError) {
        if let Some(tx) = self.done.lock().unwrap().take() {
            let _ = tx.send(Err(error));
        }
    }
}

impl EmitListener for RunHandler {
    fn on_emit(&self, response: &Response) {
        self.responses.lock().unwrap().push(response.clone());
    }
    fn on_finish(&self) {
        if let Some(tx) = self.done.lock().unwrap().take() {
            let _ = tx.send(Ok(()));
        }
    }
}

async fn run(State(state): State<HttpState>, Json(body): Json<RunRequest>) -> impl IntoResponse {
    let frames = body.media_uri.len();
    let started = Instant::now();

    let (tx, rx) = oneshot::channel();
    let handler = Arc::new(RunHandler::new(tx));
    let comm = CommHandle {
        reply: handler.clone() as Arc<dyn TaskReply>,
        listener: handler.clone() as Arc<dyn EmitListener>,
    };

    let task = match (body.handle, body.pipeline_config) {
        (Some(job_handle), _) => Task::Run {
            media_uris: body.media_uri,
            job_handle,
            comm,
        },
        (None, Some(pipeline_config)) => Task::AutoRun {
            media_uris: body.media_uri,
            pipeline_config,
            suggested_weight: body.suggested_weight,
            stream_num: body.stream_num,
            comm,
        },
        (None, None) => {
            return Json(RunResponse {
                result: vec![Response::with_status(-1, "either handle or pipelineConfig is required")],
                latency: started.elapsed().as_secs_f64(),
                frames,
            });
        }
    };
    state.manager.submit(task);

    match tokio::time::timeout(state.run_timeout, rx).await {
        Ok(Ok(Ok(()))) => Json(RunResponse {
            result: handler.responses.lock().unwrap().clone(),
            latency: started.elapsed().as_secs_f64(),
            frames,
        }),
        Ok(Ok(Err(err))) => Json(RunResponse {
            result: vec![Response::with_status(err.status_code(), err.to_string())],
            latency: started.elapsed().as_secs_f64(),
            frames,
        }),
        Ok(Err(_)) => Json(RunResponse {
            result: vec![Response::with_status(-1, "manager dropped the reply channel")],
            latency: started.elapsed().as_secs_f64(),
            frames,
        }),
        Err(_) => {
            warn!(frames, "run request timed out waiting for pipeline completion");
            Json(RunResponse {
                result: vec![Response::with_status(-5, "Pipeline timeout")],
                latency: started.elapsed().as_secs_f64(),
                frames,
            })
        }
    }
}

// --- /healthz ---

async fn healthz(State(state): State<HttpState>) -> impl IntoResponse {
    static LAST_SEEN: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(u64::MAX);
    let current = state.manager.health_check_counter();
    let previous = LAST_SEEN.swap(current, std::sync::atomic::Ordering::SeqCst);
    if previous != u64::MAX && current == previous {
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    } else {
        axum::http::StatusCode::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline_manager::ManagerConfig;

    #[tokio::test]
    async fn load_then_unload_round_trips_through_http_handlers() {
        let registry = Arc::new(NodeRegistry::with_builtin_nodes());
        let metrics = Arc::new(crate::infrastructure::metrics::MetricsService::new().unwrap());
        let manager = PipelineManager::new(ManagerConfig::default(), registry, metrics, "test");
        let state = HttpState::new(manager.clone(), Duration::from_secs(5));

        let pipeline_json = r#"{
            "Nodes": [
                {"Node Class Name": "LocalMultiSensorInput", "Node Name": "in", "Thread Number": 1, "Is Source Node": true, "Configure String": ""},
                {"Node Class Name": "LLOutput", "Node Name": "out", "Thread Number": 1, "Configure String": ""}
            ],
            "Links": [
                {"Previous Node": "in", "Previous Node Port": 0, "Next Node": "out", "Next Node Port": 0}
            ]
        }"#;

        let load_response = load_pipeline(
            State(state.clone()),
            Json(LoadRequest {
                pipeline_config: pipeline_json.to_string(),
                suggested_weight: 1,
                stream_num: 1,
            }),
        )
        .await
        .into_response();
        assert_eq!(load_response.status(), axum::http::StatusCode::OK);

        manager.shutdown();
    }
}
