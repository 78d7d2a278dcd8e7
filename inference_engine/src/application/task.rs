// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Tasks submitted to a `PipelineManager`, and the transport-side
//! handle a frontend attaches so the manager can reply without knowing
//! whether it is talking to an HTTP connection or a gRPC stream.

use std::sync::Arc;

use inference_domain::{EmitListener, JobHandle, PipelineError};

/// Transport-agnostic reply sink for task-level outcomes (the `200
/// {jobHandle}` / `400` / `500` replies a frontend sends back, as distinct
/// from the per-frame `EmitListener` callbacks a Run submission also
/// carries).
pub trait TaskReply: Send + Sync {
    fn reply_load(&self, result: Result<JobHandle, PipelineError>);
    fn reply_unload(&self, result: Result<(), PipelineError>);
    /// Immediate rejection of a Run/AutoRun submission (e.g. `HandleNotFound`,
    /// `BadRequest`) before any frame is fed to the pipeline.
    fn reply_run_error(&self, error: PipelineError);
}

/// One external connection's full reply surface: the task-level reply sink
/// plus the `EmitListener` the pipeline's ResponseNode will call back on a
/// successful Run.
#[derive(Clone)]
pub struct CommHandle {
    pub reply: Arc<dyn TaskReply>,
    pub listener: Arc<dyn EmitListener>,
}

/// Tagged union of work a `PipelineManager` scheduler thread dispatches.
pub enum Task {
    Load {
        pipeline_config: String,
        suggested_weight: u32,
        stream_num: u32,
        comm: CommHandle,
    },
    Run {
        media_uris: Vec<String>,
        job_handle: JobHandle,
        comm: CommHandle,
    },
    Unload {
        job_handle: JobHandle,
        comm: CommHandle,
    },
    AutoRun {
        media_uris: Vec<String>,
        pipeline_config: String,
        suggested_weight: u32,
        stream_num: u32,
        comm: CommHandle,
    },
}
