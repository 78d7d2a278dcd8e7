//! Node and NodeWorker: the processing-stage abstraction.

use std::time::Duration;

use std::sync::Arc;

use crate::blob::BlobRef;
use crate::error::PipelineError;
use crate::response::ResponseAccumulator;
use crate::value_objects::NodeName;

/// Batching policy carried by every Node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchingPolicy {
    /// Every `process(batchIdx)` call may pull from any combination of
    /// input ports; batch composition is opaque to the Node.
    Default,
    /// The engine partitions workers by `streamId`: worker *k* sees, in
    /// order, every Blob whose `streamId % streamNum == k`. The only
    /// correct policy for stateful nodes.
    BatchingWithStream,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchingConfig {
    pub policy: BatchingPolicy,
    pub batch_size: u32,
    pub stream_num: u32,
    pub thread_num_per_batch: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            policy: BatchingPolicy::Default,
            batch_size: 1,
            stream_num: 1,
            thread_num_per_batch: 1,
        }
    }
}

/// Events a NodeWorker fires through its `WorkerContext`.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Timestamp { stage: String },
    StreamConsistencyViolation { expected: u32, actual: u32 },
    Warning(String),
}

/// Capabilities a running NodeWorker needs from its owning Pipeline, without
/// the domain layer knowing about Pipeline's internals. Concrete
/// implementations live in the application layer (`inference_engine`).
pub trait WorkerContext: Send + Sync {
    fn send_output(&self, blob: BlobRef, out_port_idx: u32, timeout: Duration) -> Result<(), PipelineError>;
    fn hold_depleting(&self);
    fn release_depleting(&self);
    fn emit_event(&self, event: NodeEvent);

    /// Aggregated per-node timing collected by the owning pipeline so far.
    /// Output nodes call this when they emit their terminal response, so a
    /// `Run`'s final message can carry a performance summary alongside the
    /// frame results. Test doubles that don't need this can ignore it.
    fn performance_report(&self) -> String {
        String::new()
    }
}

/// The runnable instance of a Node; the engine instantiates
/// `total_thread_num` workers per Node.
pub trait NodeWorker: Send {
    fn init(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn process_by_first_run(&mut self, batch_idx: u32, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        let _ = (batch_idx, ctx);
        Ok(())
    }

    /// Invoked repeatedly while running. `batch_idx` identifies the
    /// worker's slot under the batching policy and is stable across calls
    /// on the same worker.
    fn process(&mut self, batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError>;

    fn process_by_last_run(&mut self, batch_idx: u32, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        let _ = (batch_idx, ctx);
        Ok(())
    }

    fn rearm(&mut self) {}
    fn reset(&mut self) {}
}

/// Static description of a processing stage.
pub trait Node: Send + Sync {
    fn name(&self) -> &NodeName;
    fn class_name(&self) -> &'static str;
    fn total_thread_num(&self) -> u32;
    fn is_source(&self) -> bool {
        false
    }
    fn batching(&self) -> &BatchingConfig;
    fn batching_mut(&mut self) -> &mut BatchingConfig;

    /// The input-stream slot a source node was configured to read (from its
    /// `MediaIndex`/`RadarIndex` Configure-String field), when a run's
    /// `mediaUris` is demultiplexed across more than one source node sharing
    /// a single capture feed. `None` for non-source nodes and for sources
    /// that don't participate in demultiplexing.
    fn sensor_index(&self) -> Option<u32> {
        None
    }

    /// Parses a key/value configuration; callable only in `idle`.
    fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError>;

    fn validate_configuration(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Finalizes batching policy and any per-node state. The default
    /// rewrites the policy to `BatchingWithStream` when
    /// `threadNumPerBatch == 1`.
    fn prepare(&mut self) -> Result<(), PipelineError> {
        let cfg = self.batching_mut();
        if cfg.thread_num_per_batch == 1 {
            cfg.policy = BatchingPolicy::BatchingWithStream;
        }
        Ok(())
    }

    fn create_node_worker(&self) -> Box<dyn NodeWorker>;

    /// Non-`None` for a ResponseNode: its own
    /// `ResponseAccumulator`, sized from `batching().stream_num` once
    /// `prepare()` has run. `Pipeline::prepare` registers it automatically
    /// so frontends can look it up by node name without the application
    /// layer threading accumulators through node construction by hand.
    fn response_accumulator(&self) -> Option<Arc<ResponseAccumulator>> {
        None
    }

    fn rearm(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Parses `key=value(v);key=value(v);...` configure strings.
pub fn parse_configure_string(s: &str) -> Vec<(String, String)> {
    s.split(';')
        .filter(|part| !part.trim().is_empty())
        .filter_map(|part| {
            let part = part.trim();
            let eq = part.find('=')?;
            let key = part[..eq].trim().to_string();
            let mut value = part[eq + 1..].trim();
            if value.starts_with('(') && value.ends_with(')') {
                value = &value[1..value.len() - 1];
            }
            Some((key, value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        let parsed = parse_configure_string("RadarIndex=(0);TopK=(5)");
        assert_eq!(parsed, vec![("RadarIndex".to_string(), "0".to_string()), ("TopK".to_string(), "5".to_string())]);
    }

    #[test]
    fn default_prepare_switches_single_threaded_nodes_to_stream_affinity() {
        #[derive(Default)]
        struct Dummy {
            name: NodeName,
            batching: BatchingConfig,
        }
        impl Node for Dummy {
            fn name(&self) -> &NodeName {
                &self.name
            }
            fn class_name(&self) -> &'static str {
                "Dummy"
            }
            fn total_thread_num(&self) -> u32 {
                1
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
                unimplemented!()
            }
        }
        impl Default for NodeName {
            fn default() -> Self {
                NodeName("dummy".into())
            }
        }

        let mut node = Dummy::default();
        node.batching.thread_num_per_batch = 1;
        node.prepare().unwrap();
        assert_eq!(node.batching().policy, BatchingPolicy::BatchingWithStream);
    }
}
