//! Region of interest: the per-detection annotation carried by a Buffer.

use crate::blob::BlobRef;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Tracking lifecycle of a ROI across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TrackingStatus {
    New,
    Tracked,
    Lost,
    Dead,
    None,
}

impl Default for TrackingStatus {
    fn default() -> Self {
        TrackingStatus::None
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Detection {
    pub label: String,
    pub id: u32,
    pub confidence: f32,
}

/// Rectangle in pixel coords, detection label/id/confidence, tracking id and
/// status, optional classification label, optional feature-vector blob, and
/// an optional per-ROI quality score.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Roi {
    pub rect: Option<Rect>,
    pub detection: Option<Detection>,
    pub tracking_id: Option<u64>,
    pub tracking_status: TrackingStatus,
    pub classification_label: Option<String>,
    #[serde(skip)]
    pub feature_vector: Option<BlobRef>,
    pub quality: Option<f32>,
}

impl Roi {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect: Some(rect),
            ..Default::default()
        }
    }

    /// Clears detection-derived state, keeping the ROI's rect. Used when a
    /// `StreamConsistencyViolation` or `Fatal` error forces a buffer to be
    /// forwarded without its annotations.
    pub fn cleared(&self) -> Self {
        Self {
            rect: self.rect,
            ..Default::default()
        }
    }
}
