// /////////////////////////////////////////////////////////////////////////////
// Optimized Adaptive Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Inference Domain
//!
//! Core domain model for the pipeline orchestration engine: the data types
//! that flow through a pipeline (`Blob`, `Buffer`, `Roi`, the heterogeneous
//! meta bag), the processing-stage abstraction (`Node`, `NodeWorker`,
//! `BatchCollector`), the `Pipeline` aggregate that wires them into a runnable
//! graph, and the output-side `ResponseNode` contract.
//!
//! This crate has no knowledge of HTTP, gRPC, or configuration file formats —
//! those are `inference_engine` and `inference_bootstrap` concerns. It pulls
//! in only what the model itself needs: `serde` for the wire-adjacent value
//! types, `thiserror` for its error taxonomy, and `crossbeam` for its queues.

pub mod batch_collector;
pub mod blob;
pub mod buffer;
pub mod error;
pub mod meta;
pub mod node;
pub mod pipeline;
pub mod queue;
pub mod response;
pub mod roi;
pub mod state;
pub mod value_objects;

pub use batch_collector::{BatchCollector, BatchedInput, DefaultBatchCollector, StreamBatchCollector, StreamViolation};
pub use blob::{Blob, BlobRef};
pub use buffer::{Buffer, BufferPayload, DeviceSurfaceHandle, Tag, TypedSamples};
pub use error::PipelineError;
pub use meta::MetaBag;
pub use node::{BatchingConfig, BatchingPolicy, Node, NodeEvent, NodeWorker, WorkerContext};
pub use pipeline::{Link, Pipeline, PipelineBuilder, PipelineObserver};
pub use queue::Queue;
pub use response::{EmitListener, Response, ResponseAccumulator, ResponseData};
pub use roi::{Detection, Rect, Roi, TrackingStatus};
pub use state::PipelineState;
pub use value_objects::{FrameId, FrameIdAllocator, JobHandle, JobHandleAllocator, NodeName, StreamId, HANDLE_START_INDEX};
