// /////////////////////////////////////////////////////////////////////////////
// Optimized Adaptive Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! Error taxonomy for the pipeline orchestration engine. Per-frame failures
//! (`DecodeFailure`, `NoRoiDetected`, `StreamConsistencyViolation`, `Fatal`)
//! are carried as response status codes by the caller and never stop a
//! running pipeline; only `BuildFailure`/`InvalidConfiguration`/
//! `InvalidTransition` surface as `Result::Err` to a caller.

use thiserror::Error;

/// Domain-specific errors for the pipeline orchestration engine.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("handle does not exist")]
    HandleNotFound,

    #[error("pipeline build failed: {0}")]
    BuildFailure(String),

    #[error("capacity exceeded")]
    CapacityExceeded,

    #[error("stream consistency violation: worker bound to stream {expected}, saw {actual}")]
    StreamConsistencyViolation { expected: u32, actual: u32 },

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("no roi detected")]
    NoRoiDetected,

    #[error("pipeline timeout")]
    Timeout,

    #[error("fatal worker error: {0}")]
    Fatal(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn build_failure(msg: impl Into<String>) -> Self {
        Self::BuildFailure(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Per-frame/per-task errors that are reported as a status code and do
    /// not terminate the owning pipeline or scheduler.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::CapacityExceeded
                | PipelineError::DecodeFailure(_)
                | PipelineError::NoRoiDetected
                | PipelineError::StreamConsistencyViolation { .. }
                | PipelineError::Fatal(_)
                | PipelineError::Timeout
        )
    }

    /// Error taxonomy category, used for metrics labelling.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::BadRequest(_) => "bad_request",
            PipelineError::HandleNotFound => "handle_not_found",
            PipelineError::BuildFailure(_) => "build_failure",
            PipelineError::CapacityExceeded => "capacity_exceeded",
            PipelineError::StreamConsistencyViolation { .. } => "stream_consistency_violation",
            PipelineError::DecodeFailure(_) => "decode_failure",
            PipelineError::NoRoiDetected => "no_roi_detected",
            PipelineError::Timeout => "timeout",
            PipelineError::Fatal(_) => "fatal",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
            PipelineError::InvalidConfiguration(_) => "configuration",
            PipelineError::Io(_) => "io",
            PipelineError::Serialization(_) => "serialization",
            PipelineError::Internal(_) => "internal",
        }
    }

    /// Status code used on the HTTP/gRPC response envelope.
    pub fn status_code(&self) -> i32 {
        match self {
            PipelineError::NoRoiDetected => 1,
            PipelineError::DecodeFailure(_) => -2,
            PipelineError::Timeout => -5,
            _ => -1,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
