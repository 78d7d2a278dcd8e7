// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Input-like nodes: produce Blobs and assign `frameId`, honouring
//! `SendController` throttling. Throttling is a producer/consumer contract:
//! this node acquires a slot per frame and attaches the shared controller to
//! the outgoing buffer's meta; a downstream consumer (`Tracker`,
//! `RadarTracking`) releases it once the frame has actually been consumed,
//! so a slow consumer really does stall production. Decoding itself is out
//! of scope; each class differs only in the buffer type/color format it
//! stamps on the frames it produces.

use std::sync::Arc;
use std::time::Duration;

use inference_domain::meta::{ColorFormat, HceDataMetaBufType, HceDatabaseMeta, SendController};
use inference_domain::{
    BatchingConfig, Blob, BlobRef, Buffer, FrameIdAllocator, Node, NodeName, NodeWorker, PipelineError, Roi, Tag, WorkerContext,
};

use super::common::{config_f32, config_opt_u32, config_u32};

struct SensorInput {
    name: NodeName,
    class_name: &'static str,
    total_thread_num: u32,
    batching: BatchingConfig,
    buf_type: HceDataMetaBufType,
    color_format: ColorFormat,
    capacity: u32,
    stride: u32,
    sensor_index: u32,
    frame_rate: f32,
    send_controller: Option<Arc<SendController>>,
}

impl SensorInput {
    fn new(class_name: &'static str, name: NodeName, total_thread_num: u32, buf_type: HceDataMetaBufType, color_format: ColorFormat) -> Self {
        Self {
            name,
            class_name,
            total_thread_num,
            batching: BatchingConfig::default(),
            buf_type,
            color_format,
            capacity: 4,
            stride: 1,
            sensor_index: 0,
            frame_rate: 0.0,
            send_controller: None,
        }
    }

    fn configure(&mut self, config: &str) -> Result<(), PipelineError> {
        self.capacity = config_u32(config, "InputCapacity", 4);
        self.stride = config_u32(config, "Stride", 1);
        self.send_controller = Some(Arc::new(SendController::new(self.capacity, self.stride)));
        // RadarIndex takes priority: a node configured for both selects the
        // radar slot of the combined per-frame record.
        self.sensor_index = config_opt_u32(config, "RadarIndex").or_else(|| config_opt_u32(config, "MediaIndex")).unwrap_or(0);
        self.frame_rate = config_f32(config, "FrameRate", 0.0);
        Ok(())
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.capacity == 0 || self.stride == 0 {
            return Err(PipelineError::invalid_config("InputCapacity and Stride must be >= 1"));
        }
        Ok(())
    }

    fn worker(&self) -> Box<dyn NodeWorker> {
        let send_controller = self.send_controller.clone().unwrap_or_else(|| Arc::new(SendController::new(self.capacity.max(1), self.stride.max(1))));
        Box::new(SensorInputWorker {
            send_controller,
            buf_type: self.buf_type,
            color_format: self.color_format,
            frame_rate: self.frame_rate,
            frame_alloc: FrameIdAllocator::new(),
        })
    }
}

struct SensorInputWorker {
    send_controller: Arc<SendController>,
    buf_type: HceDataMetaBufType,
    color_format: ColorFormat,
    frame_rate: f32,
    frame_alloc: FrameIdAllocator,
}

impl NodeWorker for SensorInputWorker {
    /// Each incoming blob's single buffer carries a newline-separated list
    /// of media URIs (the segment a `PipelineManager` feeds on Run); this
    /// fans the segment out into one frame Blob per URI, throttled by the
    /// node's `SendController`.
    fn process(&mut self, _batch_idx: u32, inputs: Vec<BlobRef>, ctx: &dyn WorkerContext) -> Result<(), PipelineError> {
        for segment in inputs {
            let stream_id = segment.stream_id;
            let payload = segment.buffers.first().and_then(|b| b.payload.bytes()).unwrap_or(&[]);
            let text = String::from_utf8_lossy(payload);
            let uris: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();

            for (idx, uri) in uris.iter().enumerate() {
                self.send_controller.acquire();
                let frame_id = self.frame_alloc.allocate();

                let mut meta = HceDatabaseMeta {
                    media_uri: uri.to_string(),
                    buf_type: Some(self.buf_type),
                    color_format: Some(self.color_format),
                    ..Default::default()
                };

                let decode_failed = uri.contains("decode-fail");
                if decode_failed {
                    meta.ignore_flags.insert(0, true);
                    ctx.emit_event(inference_domain::NodeEvent::Warning(format!("decode failure for {uri}")));
                }

                let mut buffer = Buffer::from_view(frame_id, uri.as_bytes(), 0, 0, Vec::new());
                buffer.meta.set(meta);
                buffer.meta.set(self.send_controller.clone());
                if !decode_failed {
                    buffer.rois.push(Roi::default());
                }
                buffer.drop = decode_failed;

                let is_last = idx + 1 == uris.len();
                let tag = if is_last { Tag::EndOfRequest } else { Tag::Normal };
                let blob = Blob::new(frame_id, stream_id, vec![buffer], tag).into_ref();
                ctx.send_output(blob, 0, Duration::from_millis(200))?;

                if self.frame_rate > 0.0 {
                    std::thread::sleep(Duration::from_secs_f32(1.0 / self.frame_rate));
                }
            }

            if uris.is_empty() {
                // An empty segment still needs to close its stream out.
                let frame_id = self.frame_alloc.allocate();
                let blob = Blob::new(frame_id, stream_id, Vec::new(), Tag::EndOfRequest).into_ref();
                ctx.send_output(blob, 0, Duration::from_millis(200))?;
            }
        }
        Ok(())
    }
}

macro_rules! sensor_input_class {
    ($ty:ident, $class:literal, $buf_type:expr, $color:expr) => {
        pub struct $ty(SensorInput);

        impl $ty {
            pub fn new(name: NodeName, total_thread_num: u32) -> Self {
                Self(SensorInput::new($class, name, total_thread_num, $buf_type, $color))
            }
        }

        impl Node for $ty {
            fn name(&self) -> &NodeName {
                &self.0.name
            }
            fn class_name(&self) -> &'static str {
                self.0.class_name
            }
            fn total_thread_num(&self) -> u32 {
                self.0.total_thread_num
            }
            fn is_source(&self) -> bool {
                true
            }
            fn sensor_index(&self) -> Option<u32> {
                Some(self.0.sensor_index)
            }
            fn batching(&self) -> &BatchingConfig {
                &self.0.batching
            }
            fn batching_mut(&mut self) -> &mut BatchingConfig {
                &mut self.0.batching
            }
            fn configure_by_string(&mut self, config: &str) -> Result<(), PipelineError> {
                self.0.configure(config)
            }
            fn validate_configuration(&self) -> Result<(), PipelineError> {
                self.0.validate()
            }
            fn create_node_worker(&self) -> Box<dyn NodeWorker> {
                self.0.worker()
            }
        }
    };
}

sensor_input_class!(LocalMultiSensorInput, "LocalMultiSensorInput", HceDataMetaBufType::Uint8, ColorFormat::Bgr);
sensor_input_class!(VideoDecoder, "VideoDecoder", HceDataMetaBufType::DeviceFrame, ColorFormat::Nv12);
sensor_input_class!(JpegDecoder, "JpegDecoder", HceDataMetaBufType::Uint8, ColorFormat::I420);

#[cfg(test)]
mod tests {
    use super::*;
    use inference_domain::StreamId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingContext {
        sent: Mutex<Vec<BlobRef>>,
        events: AtomicUsize,
    }
    impl WorkerContext for RecordingContext {
        fn send_output(&self, blob: BlobRef, _out_port_idx: u32, _timeout: Duration) -> Result<(), PipelineError> {
            self.sent.lock().unwrap().push(blob);
            Ok(())
        }
        fn hold_depleting(&self) {}
        fn release_depleting(&self) {}
        fn emit_event(&self, _event: inference_domain::NodeEvent) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fans_segment_out_into_one_frame_per_uri_and_tags_last_as_end_of_request() {
        let node = LocalMultiSensorInput::new(NodeName("in".into()), 1);
        let mut worker = node.create_node_worker();
        let ctx = RecordingContext {
            sent: Mutex::new(Vec::new()),
            events: AtomicUsize::new(0),
        };

        let segment = Buffer::from_owned(inference_domain::FrameId(0), b"a.mp4\nb.mp4".to_vec(), || {}, 0, 0, Vec::new());
        let blob = Blob::new(inference_domain::FrameId(0), StreamId(0), vec![segment], Tag::Normal).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();

        let sent = ctx.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(!sent[0].is_end_of_request());
        assert!(sent[1].is_end_of_request());
    }

    #[test]
    fn decode_failure_marks_buffer_dropped_without_stopping_the_stream() {
        let node = LocalMultiSensorInput::new(NodeName("in".into()), 1);
        let mut worker = node.create_node_worker();
        let ctx = RecordingContext {
            sent: Mutex::new(Vec::new()),
            events: AtomicUsize::new(0),
        };

        let segment = Buffer::from_owned(inference_domain::FrameId(0), b"decode-fail.mp4".to_vec(), || {}, 0, 0, Vec::new());
        let blob = Blob::new(inference_domain::FrameId(0), StreamId(0), vec![segment], Tag::Normal).into_ref();
        worker.process(0, vec![blob], &ctx).unwrap();

        let sent = ctx.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].buffers[0].drop);
        assert_eq!(ctx.events.load(Ordering::SeqCst), 1);
    }
}
