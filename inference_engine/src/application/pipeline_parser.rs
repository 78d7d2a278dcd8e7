// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! PipelineParser: deterministic translator from a JSON description to a
//! constructed Pipeline. Parsing is atomic — any failure leaves
//! no partially built pipeline behind; `PipelineBuilder::build` already
//! gives us that for link wiring, so this layer only needs to avoid doing
//! anything irreversible before `build()` is called.

use std::sync::Arc;

use serde::Deserialize;

use inference_domain::{Link, NodeName, Pipeline, PipelineBuilder, PipelineError, PipelineObserver};

use crate::application::node_registry::NodeRegistry;

#[derive(Debug, Deserialize)]
struct NodeSpec {
    #[serde(rename = "Node Class Name")]
    class_name: String,
    #[serde(rename = "Node Name")]
    node_name: String,
    #[serde(rename = "Thread Number")]
    thread_number: u32,
    #[serde(rename = "Is Source Node", default)]
    #[allow(dead_code)]
    is_source_node: bool,
    #[serde(rename = "Configure String", default)]
    configure_string: String,
}

#[derive(Debug, Deserialize)]
struct LinkSpec {
    #[serde(rename = "Previous Node")]
    previous_node: String,
    #[serde(rename = "Previous Node Port")]
    previous_node_port: u32,
    #[serde(rename = "Next Node")]
    next_node: String,
    #[serde(rename = "Next Node Port")]
    next_node_port: u32,
}

#[derive(Debug, Deserialize)]
struct PipelineSpec {
    #[serde(rename = "Nodes")]
    nodes: Vec<NodeSpec>,
    #[serde(rename = "Links")]
    links: Vec<LinkSpec>,
}

pub struct PipelineParser<'a> {
    registry: &'a NodeRegistry,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl<'a> PipelineParser<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry, observer: None }
    }

    /// Attaches a `PipelineObserver` (e.g. `MetricsService`) to every
    /// `Pipeline` this parser builds.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Builds a `Pipeline` from the JSON `{Nodes, Links}` document.
    /// `stream_num` is the Load-time parameter (outside the JSON document
    /// itself); it is applied to every
    /// node's `BatchingConfig.stream_num` so `prepare()`'s default policy
    /// rewrite and any `BatchingWithStream` node route correctly for this
    /// pipeline instance.
    pub fn parse(&self, json: &str, stream_num: u32, queue_capacity: usize) -> Result<Pipeline, PipelineError> {
        let spec: PipelineSpec = serde_json::from_str(json).map_err(|e| PipelineError::build_failure(format!("invalid pipeline JSON: {e}")))?;

        if spec.nodes.is_empty() {
            return Err(PipelineError::build_failure("pipeline has no nodes"));
        }

        let mut builder = PipelineBuilder::new("pipeline").queue_capacity(queue_capacity);
        if let Some(observer) = &self.observer {
            builder = builder.observer(observer.clone());
        }

        for node_spec in &spec.nodes {
            let name = NodeName(node_spec.node_name.clone());
            let (mut node, input_ports) = self
                .registry
                .create(&node_spec.class_name, name.clone(), node_spec.thread_number)
                .ok_or_else(|| PipelineError::build_failure(format!("unknown node class '{}'", node_spec.class_name)))?;

            node.configure_by_string(&node_spec.configure_string)?;
            node.validate_configuration()?;
            node.batching_mut().stream_num = stream_num.max(1);

            builder = builder.add_node(node, input_ports);
        }

        for link in &spec.links {
            builder = builder.add_link(Link {
                src_node: NodeName(link.previous_node.clone()),
                src_port: link.previous_node_port,
                dst_node: NodeName(link.next_node.clone()),
                dst_port: link.next_node_port,
            });
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_PIPELINE: &str = r#"
    {
        "Nodes": [
            {"Node Class Name": "LocalMultiSensorInput", "Node Name": "in", "Thread Number": 1, "Is Source Node": true, "Configure String": "InputCapacity=(4);Stride=(1)"},
            {"Node Class Name": "Detection", "Node Name": "det", "Thread Number": 1, "Configure String": ""},
            {"Node Class Name": "LLOutput", "Node Name": "out", "Thread Number": 1, "Configure String": ""}
        ],
        "Links": [
            {"Previous Node": "in", "Previous Node Port": 0, "Next Node": "det", "Next Node Port": 0},
            {"Previous Node": "det", "Previous Node Port": 0, "Next Node": "out", "Next Node Port": 0}
        ]
    }
    "#;

    #[test]
    fn parses_a_well_formed_pipeline() {
        let registry = NodeRegistry::with_builtin_nodes();
        let parser = PipelineParser::new(&registry);
        let pipeline = parser.parse(SIMPLE_PIPELINE, 1, 16).unwrap();
        assert_eq!(pipeline.node_names().count(), 3);
    }

    #[test]
    fn unknown_class_fails_atomically() {
        let registry = NodeRegistry::with_builtin_nodes();
        let parser = PipelineParser::new(&registry);
        let json = SIMPLE_PIPELINE.replace("Detection", "NotARealClass");
        assert!(parser.parse(&json, 1, 16).is_err());
    }

    #[test]
    fn malformed_json_fails() {
        let registry = NodeRegistry::with_builtin_nodes();
        let parser = PipelineParser::new(&registry);
        assert!(parser.parse("not json", 1, 16).is_err());
    }
}
