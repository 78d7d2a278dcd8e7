// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared plumbing for the concrete Node classes: Configure-String field
//! lookup and a generic stateless per-buffer transform node used by the
//! inference-like and radar classes.

use std::sync::Arc;
use std::time::Duration;

use inference_domain::node::parse_configure_string;
use inference_domain::{BatchingConfig, Blob, BlobRef, Buffer, Node, NodeName, NodeWorker, PipelineError, WorkerContext};

pub fn config_u32(config: &str, key: &str, default: u32) -> u32 {
    parse_configure_string(config)
        .into_iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(default)
}

pub fn config_f32(config: &str, key: &str, default: f32) -> f32 {
    parse_configure_string(config)
        .into_iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(default)
}

/// Like `config_u32`, but `None` when the key is absent rather than
/// defaulting, so callers can tell "not configured" from "configured as 0".
pub fn config_opt_u32(config: &str, key: &str) -> Option<u32> {
    parse_configure_string(config).into_iter().find(|(k, _)| k == key).and_then(|(_, v)| v.parse().ok())
}

pub fn config_string(config: &str, key: &str, default: &str) -> String {
    parse_configure_string(config)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
        .unwrap_or_else(|| default.to_string())
}

/// Per-buffer mutation applied by a `TransformNode`'s worker. Runs once per
/// `Buffer` in a batch; nodes that need cross-frame state (`Tracker`,
/// `ObjectSelect`, `RadarTracking`) are not expressed this way (see
/// `stateful.rs`).
pub type BufferTransform = Arc<dyn Fn(&mut Buffer) + Send + Sync>;

/// A Node whose entire behaviour is "apply this transform to every buffer of
/// every incoming blob, forward the result to port 0". Concrete classes
/// differ only in `class_name` and the transform they install.
pub struct TransformNode {
    name: NodeName,
    class_name: &'static str,
    total_thread_num: u32,
    batching: BatchingConfig,
    transform: BufferTransform,
}

impl TransformNode {
    pub fn new(class_name: &'static str, name: NodeName, total_thread_num: u32, transform: BufferTransform) -> Self {
        Self {
            name,
            class_name,
            total_thread_num,
            batching: BatchingConfig::default(),
            transform,
        }
    }
}

struct TransformWorker {
    transform: BufferTransform,
}

impl NodeWorker for TransformWorker {
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for blob in inputs {
            let mut owned: Blob = (*blob).clone();
            for buffer in owned.buffers.iter_mut() {
                (self.transform)(buffer);
            }
            ctx.send_output(owned.into_ref(), 0, Duration::from_millis(200))?;
        }
        Ok(())
    }
}

impl Node for TransformNode {
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

    fn create_node_worker(&self) -> Box<dyn NodeWorker> {
        Box::new(TransformWorker {
            transform: self.transform.clone(),
        })
    }
}
