//! Concrete meta types carried through the pipeline.

use std::collections::HashMap;
use std::time::Instant;

use crate::roi::TrackingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HceDataMetaBufType {
    Unknown,
    String,
    Uint8,
    /// Renamed from the original `MFX_FRAME` to stay vendor-neutral.
    DeviceFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColorFormat {
    Bgr,
    Nv12,
    Bgrx,
    Gray,
    I420,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassificationObject {
    pub label: String,
    pub class_id: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectAssociate {
    /// Index of the ROI this object is associated to, or `-1` if none.
    pub associated_to: i64,
}

impl Default for ObjectAssociate {
    fn default() -> Self {
        Self { associated_to: -1 }
    }
}

/// Per-frame database of inference results, keyed by ROI index.
#[derive(Debug, Clone, Default)]
pub struct HceDatabaseMeta {
    pub media_uri: String,
    pub timestamp: Option<std::time::SystemTime>,
    pub capture_source_id: u32,
    pub local_file_path: Option<String>,
    pub buf_type: Option<HceDataMetaBufType>,
    pub color_format: Option<ColorFormat>,
    pub scale_height: f32,
    pub scale_width: f32,
    pub attribute_result: HashMap<usize, ClassificationObject>,
    pub lpr_result: HashMap<usize, String>,
    pub object_associate_result: HashMap<usize, ObjectAssociate>,
    pub quality_result: HashMap<usize, f32>,
    pub ignore_flags: HashMap<usize, bool>,
    pub radar_params: Option<RadarConfig>,
}

impl HceDatabaseMeta {
    pub fn reset_all_results(&mut self) {
        self.attribute_result.clear();
        self.lpr_result.clear();
        self.object_associate_result.clear();
        self.quality_result.clear();
        self.ignore_flags.clear();
    }
}

/// Per-stage monotonic timestamps for latency accounting.
#[derive(Debug, Clone, Default)]
pub struct TimeStamp {
    records: Vec<(String, Instant)>,
}

impl TimeStamp {
    pub fn record(&mut self, stage: impl Into<String>) {
        self.records.push((stage.into(), Instant::now()));
    }

    pub fn records(&self) -> &[(String, Instant)] {
        &self.records
    }

    pub fn latency_since_first(&self) -> Option<std::time::Duration> {
        let first = self.records.first()?.1;
        let last = self.records.last()?.1;
        Some(last.duration_since(first))
    }
}

/// Start/end markers for one inference invocation, used by
/// `reportPerformanceDataToString`.
#[derive(Debug, Clone)]
pub struct InferenceTimeStamp {
    pub stage: String,
    pub start: Instant,
    pub end: Option<Instant>,
}

impl InferenceTimeStamp {
    pub fn start_now(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            start: Instant::now(),
            end: None,
        }
    }

    pub fn finish(&mut self) {
        self.end = Some(Instant::now());
    }

    pub fn duration(&self) -> Option<std::time::Duration> {
        self.end.map(|e| e.duration_since(self.start))
    }
}

/// Shared throttling handle used by input nodes to bound in-flight frames.
#[derive(Debug, Clone)]
pub struct SendController {
    pub capacity: u32,
    pub stride: u32,
    pub control_type: String,
    inner: std::sync::Arc<(std::sync::Mutex<u32>, std::sync::Condvar)>,
}

impl SendController {
    pub fn new(capacity: u32, stride: u32) -> Self {
        Self::with_control_type(capacity, stride, "Video")
    }

    pub fn with_control_type(capacity: u32, stride: u32, control_type: impl Into<String>) -> Self {
        Self {
            capacity,
            stride,
            control_type: control_type.into(),
            inner: std::sync::Arc::new((std::sync::Mutex::new(0), std::sync::Condvar::new())),
        }
    }

    /// Producer-side throttle: blocks while `count >= capacity * stride`,
    /// then increments `count`.
    pub fn acquire(&self) {
        let (lock, cvar) = &*self.inner;
        let limit = self.capacity.saturating_mul(self.stride);
        let mut count = lock.lock().unwrap();
        while *count >= limit {
            count = cvar.wait(count).unwrap();
        }
        *count += 1;
    }

    /// Consumer-side release: decrements `count` and wakes any waiting
    /// producer. The stride amortises wake-ups at high frame rates; callers
    /// that process in batches of `stride` frames may call this once per
    /// batch with `n = stride`.
    pub fn release(&self, n: u32) {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock().unwrap();
        *count = count.saturating_sub(n);
        cvar.notify_all();
    }

    pub fn count(&self) -> u32 {
        *self.inner.0.lock().unwrap()
    }
}

/// Radar-chain specific payload: a single tracked radar object. The DSP
/// math that produces it is out of scope here; this is just the carrier.
#[derive(Debug, Clone, Copy)]
pub struct TrackerOutput {
    pub tracking_id: u64,
    pub status: TrackingStatus,
    pub velocity_x: f32,
    pub velocity_y: f32,
}

/// Radar configuration parameters referenced by Configure-string fields.
#[derive(Debug, Clone, Default)]
pub struct RadarConfig {
    pub radar_config_path: String,
    pub media_port: u16,
    pub radar_port: u16,
    pub wait_time: u32,
    pub data_source: String,
    /// This stage's slot in a combined radar/media feed (`RadarIndex`).
    pub radar_index: u32,
    /// Per-stage throttle in Hz (`FrameRate`); `0.0` means unthrottled.
    pub frame_rate: f32,
}

/// Radar-chain point cloud payload.
#[derive(Debug, Clone, Default)]
pub struct PointClouds {
    pub points: Vec<(f32, f32, f32)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_controller_never_exceeds_capacity_times_stride() {
        let sc = SendController::new(2, 3);
        for _ in 0..6 {
            sc.acquire();
            assert!(sc.count() <= sc.capacity * sc.stride);
        }
    }

    #[test]
    fn hce_database_meta_reset_clears_result_maps() {
        let mut meta = HceDatabaseMeta::default();
        meta.attribute_result.insert(
            0,
            ClassificationObject {
                label: "car".into(),
                class_id: 1,
                confidence: 0.9,
            },
        );
        meta.quality_result.insert(0, 0.5);
        meta.reset_all_results();
        assert!(meta.attribute_result.is_empty());
        assert!(meta.quality_result.is_empty());
    }
}
