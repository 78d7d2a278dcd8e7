// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Inference Engine
//!
//! The application, infrastructure, and presentation layers built on top of
//! `inference_domain`'s runtime: a JSON pipeline parser, a node class
//! registry, a `PipelineManager` that owns lifecycle/scheduling/weight
//! budgeting for a transport, the concrete `Node`/`NodeWorker`
//! implementations for every class the core supports, and the HTTP and gRPC
//! frontends that translate wire requests into manager tasks.
//!
//! `inference_domain` supplies the node-agnostic runtime (queues, batching,
//! the pipeline state machine, the worker scheduling loop); this crate
//! supplies everything that needs to know concrete node classes and wire
//! formats.

pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use application::node_registry::NodeRegistry;
pub use application::pipeline_manager::{ManagerConfig, PipelineManager};
pub use application::pipeline_parser::PipelineParser;
pub use application::task::Task;
