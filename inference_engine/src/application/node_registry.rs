// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Node class registry: a map from class-name string to factory closure
//!. Registration
//! happens once, at `NodeRegistry::with_builtin_nodes()`; the parser looks
//! up the factory and constructs a Node with `totalThreadNum` as the single
//! constructor argument, per the uniform-factory-signature design note.

use std::collections::HashMap;

use inference_domain::{Node, NodeName};

use crate::infrastructure::nodes;

/// A registered class: the number of input ports a Node of this class
/// exposes (fixed per class) plus the factory itself.
struct Registration {
    input_ports: u32,
    make: Box<dyn Fn(NodeName, u32) -> Box<dyn Node> + Send + Sync>,
}

#[derive(Default)]
pub struct NodeRegistry {
    classes: HashMap<&'static str, Registration>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class_name: &'static str, input_ports: u32, make: F)
    where
        F: Fn(NodeName, u32) -> Box<dyn Node> + Send + Sync + 'static,
    {
        self.classes.insert(
            class_name,
            Registration {
                input_ports,
                make: Box::new(make),
            },
        );
    }

    pub fn create(&self, class_name: &str, name: NodeName, total_thread_num: u32) -> Option<(Box<dyn Node>, u32)> {
        let reg = self.classes.get(class_name)?;
        Some(((reg.make)(name, total_thread_num), reg.input_ports))
    }

    pub fn is_registered(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    /// Every concrete class in scope.
    pub fn with_builtin_nodes() -> Self {
        let mut registry = Self::new();

        registry.register("LocalMultiSensorInput", 1, |n, t| Box::new(nodes::input::LocalMultiSensorInput::new(n, t)));
        registry.register("VideoDecoder", 1, |n, t| Box::new(nodes::input::VideoDecoder::new(n, t)));
        registry.register("JpegDecoder", 1, |n, t| Box::new(nodes::input::JpegDecoder::new(n, t)));

        registry.register("Detection", 1, |n, t| Box::new(nodes::inference::Detection::new(n, t)));
        registry.register("Classification", 1, |n, t| Box::new(nodes::inference::Classification::new(n, t)));
        registry.register("FeatureExtraction", 1, |n, t| Box::new(nodes::inference::FeatureExtraction::new(n, t)));
        registry.register("ObjectQuality", 1, |n, t| Box::new(nodes::inference::ObjectQuality::new(n, t)));

        registry.register("Tracker", 1, |n, t| Box::new(nodes::stateful::Tracker::new(n, t)));
        registry.register("ObjectSelect", 1, |n, t| Box::new(nodes::stateful::ObjectSelect::new(n, t)));

        registry.register("RadarPreProcessing", 1, |n, t| Box::new(nodes::radar::RadarPreProcessing::new(n, t)));
        registry.register("RadarDetection", 1, |n, t| Box::new(nodes::radar::RadarDetection::new(n, t)));
        registry.register("RadarClustering", 1, |n, t| Box::new(nodes::radar::RadarClustering::new(n, t)));
        registry.register("RadarTracking", 1, |n, t| Box::new(nodes::radar::RadarTracking::new(n, t)));

        registry.register("MediaRadarOutput", 2, |n, t| Box::new(nodes::output::MediaRadarOutput::new(n, t)));
        registry.register("Media4COutput", 1, |n, t| Box::new(nodes::output::Media4COutput::new(n, t)));
        registry.register("MediaOutput", 1, |n, t| Box::new(nodes::output::MediaOutput::new(n, t)));
        registry.register("RadarOutput", 1, |n, t| Box::new(nodes::output::RadarOutput::new(n, t)));
        registry.register("LLOutput", 1, |n, t| Box::new(nodes::output::LLOutput::new(n, t)));
        registry.register("LLResultSinkFile", 1, |n, t| Box::new(nodes::output::LLResultSinkFile::new(n, t)));
        registry.register("RadarDetectionOutput", 1, |n, t| Box::new(nodes::output::RadarDetectionOutput::new(n, t)));
        registry.register("RadarPCLSinkFile", 1, |n, t| Box::new(nodes::output::RadarPCLSinkFile::new(n, t)));

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_spec_class_is_registered() {
        let registry = NodeRegistry::with_builtin_nodes();
        for class in [
            "LocalMultiSensorInput",
            "VideoDecoder",
            "JpegDecoder",
            "Detection",
            "Classification",
            "FeatureExtraction",
            "ObjectQuality",
            "Tracker",
            "ObjectSelect",
            "RadarPreProcessing",
            "RadarDetection",
            "RadarClustering",
            "RadarTracking",
            "MediaRadarOutput",
            "Media4COutput",
            "MediaOutput",
            "RadarOutput",
            "LLOutput",
            "LLResultSinkFile",
            "RadarDetectionOutput",
            "RadarPCLSinkFile",
        ] {
            assert!(registry.is_registered(class), "{class} not registered");
        }
    }

    #[test]
    fn unknown_class_is_not_registered() {
        let registry = NodeRegistry::with_builtin_nodes();
        assert!(!registry.is_registered("NotARealClass"));
    }
}
