// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! gRPC frontend: one bidirectional-streaming `Run` RPC per
//! connection. Each inbound `AiRequest` is dispatched to the
//! `PipelineManager` concurrently with reading the next one — `tokio::spawn`
//! plus a single outbound `mpsc::Sender` stands in for a per-connection
//! `writeInProgress` flag: the channel itself serialises writes onto the
//! wire, so no `Write` is ever issued while another is in flight.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response as GrpcResponse, Status, Streaming};
use tracing::{info_span, warn, Instrument};

use inference_domain::{EmitListener, JobHandle, PipelineError, Response};

use crate::application::pipeline_manager::PipelineManager;
use crate::application::task::{CommHandle, Task, TaskReply};

#[allow(clippy::enum_variant_names)]
pub mod proto {
    tonic::include_proto!("ai_inference");
}

use proto::run_server::Run;
pub use proto::run_server::RunServer;
use proto::{AiRequest, AiResponse, ResponseDataProto};

/// Assigns a per-connection uid so concurrent connections' logs can be told
/// apart. tonic gives each `Run` call its own task and channel, so the uid
/// here is carried for tracing only rather than for demultiplexing a shared
/// completion queue.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_uid: AtomicU32,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> u32 {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct AiInferenceService {
    manager: Arc<PipelineManager>,
    connections: Arc<ConnectionRegistry>,
}

impl AiInferenceService {
    pub fn new(manager: Arc<PipelineManager>) -> Self {
        Self {
            manager,
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }
}

fn response_to_proto(response: &Response) -> AiResponse {
    AiResponse {
        status: response.status,
        message: response.message.clone(),
        responses: response
            .responses
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    ResponseDataProto {
                        string_data: value.string_data.clone(),
                        length: value.length,
                        binary_data: value.binary_data.clone(),
                    },
                )
            })
            .collect(),
    }
}

/// Streams every `emitOutput` straight onto the connection's outbound
/// channel and relays load/unload/run-rejection replies the same way. The
/// handler's lifetime is just the `Arc` held by the manager's task queue and
/// the pipeline's `ResponseAccumulator`; nothing in this module waits on it
/// directly.
struct GrpcHandler {
    tx: mpsc::Sender<Result<AiResponse, Status>>,
}

impl GrpcHandler {
    fn new(tx: mpsc::Sender<Result<AiResponse, Status>>) -> Self {
        Self { tx }
    }
}

impl TaskReply for GrpcHandler {
    fn reply_load(&self, result: Result<JobHandle, PipelineError>) {
        let msg = match result {
            Ok(handle) => AiResponse {
                status: 0,
                message: handle.as_u32().to_string(),
                responses: Default::default(),
            },
            Err(err) => AiResponse {
                status: err.status_code(),
                message: err.to_string(),
                responses: Default::default(),
            },
        };
        let _ = self.tx.blocking_send(Ok(msg));
    }

    fn reply_unload(&self, result: Result<(), PipelineError>) {
        let msg = match result {
            Ok(()) => AiResponse {
                status: 0,
                message: "ok".into(),
                responses: Default::default(),
            },
            Err(err) => AiResponse {
                status: err.status_code(),
                message: err.to_string(),
                responses: Default::default(),
            },
        };
        let _ = self.tx.blocking_send(Ok(msg));
    }

    fn reply_run_error(&self, error: PipelineError) {
        let _ = self.tx.blocking_send(Ok(AiResponse {
            status: error.status_code(),
            message: error.to_string(),
            responses: Default::default(),
        }));
    }
}

impl EmitListener for GrpcHandler {
    fn on_emit(&self, response: &Response) {
        let _ = self.tx.blocking_send(Ok(response_to_proto(response)));
    }

    fn on_finish(&self) {}
}

fn dispatch(manager: &Arc<PipelineManager>, tx: mpsc::Sender<Result<AiResponse, Status>>, request: AiRequest) {
    let handler = Arc::new(GrpcHandler::new(tx));
    let comm = CommHandle {
        reply: handler.clone() as Arc<dyn TaskReply>,
        listener: handler.clone() as Arc<dyn EmitListener>,
    };

    let target = request.target.as_deref().unwrap_or("run");
    let task = match target {
        "load_pipeline" => Task::Load {
            pipeline_config: request.pipeline_config.unwrap_or_default(),
            suggested_weight: request.suggested_weight.unwrap_or(1),
            stream_num: request.stream_num.unwrap_or(1),
            comm,
        },
        "unload_pipeline" => match request.handle {
            Some(raw) => Task::Unload {
                job_handle: JobHandle::from_raw(raw),
                comm,
            },
            None => {
                handler.reply_run_error(PipelineError::bad_request("unload_pipeline requires handle"));
                return;
            }
        },
        _ => match request.handle {
            Some(raw) => Task::Run {
                media_uris: request.media_uri,
                job_handle: JobHandle::from_raw(raw),
                comm,
            },
            None => Task::AutoRun {
                media_uris: request.media_uri,
                pipeline_config: request.pipeline_config.unwrap_or_default(),
                suggested_weight: request.suggested_weight.unwrap_or(1),
                stream_num: request.stream_num.unwrap_or(1),
                comm,
            },
        },
    };
    manager.submit(task);
}

#[tonic::async_trait]
impl Run for AiInferenceService {
    type RunStream = Pin<Box<dyn Stream<Item = Result<AiResponse, Status>> + Send + 'static>>;

    async fn run(&self, request: Request<Streaming<AiRequest>>) -> Result<GrpcResponse<Self::RunStream>, Status> {
        let uid = self.connections.allocate();
        let span = info_span!("grpc_connection", uid);
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(32);
        let manager = self.manager.clone();

        tokio::spawn(
            async move {
                loop {
                    match inbound.message().await {
                        Ok(Some(req)) => {
                            let manager = manager.clone();
                            let tx = tx.clone();
                            tokio::task::spawn_blocking(move || dispatch(&manager, tx, req));
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "gRPC connection read error");
                            break;
                        }
                    }
                }
            }
            .instrument(span),
        );

        Ok(GrpcResponse::new(Box::pin(ReceiverStream::new(rx))))
    }
}
