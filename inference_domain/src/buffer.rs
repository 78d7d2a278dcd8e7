//! Buffer: one typed payload within a Blob.

use std::sync::Arc;

use crate::meta::MetaBag;
use crate::roi::Roi;
use crate::value_objects::FrameId;

/// Tag carried by both Blobs and Buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Tag {
    Normal,
    EndOfRequest,
}

/// Opaque handle to a device-resident surface (e.g. a GPU/VPU frame). The
/// orchestration engine never interprets the handle; concrete decoder/device
/// nodes are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSurfaceHandle(pub u64);

/// A typed sample vector, e.g. complex radar samples.
#[derive(Debug, Clone)]
pub enum TypedSamples {
    F32(Arc<Vec<f32>>),
    Complex32(Arc<Vec<(f32, f32)>>),
}

/// Runs a release action exactly once when the last owning `Arc` is dropped.
struct OwnedPayload {
    bytes: Vec<u8>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for OwnedPayload {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for OwnedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedPayload").field("len", &self.bytes.len()).finish()
    }
}

#[derive(Debug, Clone)]
pub enum BufferPayload {
    /// Opaque byte span owned by the buffer with a custom release action.
    Owned(Arc<OwnedPayload>),
    /// Typed vector payload, e.g. complex samples for the radar chain.
    Typed(TypedSamples),
    /// A device-surface handle; the engine only carries it.
    DeviceSurface(DeviceSurfaceHandle),
}

impl BufferPayload {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            BufferPayload::Owned(owned) => Some(&owned.bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Buffer {
    pub payload: BufferPayload,
    pub frame_id: FrameId,
    pub width: u32,
    pub height: u32,
    pub stride: Vec<u32>,
    pub drop: bool,
    pub tag: Tag,
    pub rois: Vec<Roi>,
    pub meta: MetaBag,
}

impl Buffer {
    /// Factory accepting an owned payload plus a release action, run exactly
    /// once when the last reference to the buffer is dropped.
    pub fn from_owned(
        frame_id: FrameId,
        bytes: Vec<u8>,
        release: impl FnOnce() + Send + 'static,
        width: u32,
        height: u32,
        stride: Vec<u32>,
    ) -> Self {
        Self {
            payload: BufferPayload::Owned(Arc::new(OwnedPayload {
                bytes,
                release: Some(Box::new(release)),
            })),
            frame_id,
            width,
            height,
            stride,
            drop: false,
            tag: Tag::Normal,
            rois: Vec::new(),
            meta: MetaBag::new(),
        }
    }

    /// Factory accepting a borrowed view plus a size; the view is copied
    /// into the buffer's own storage since Rust ownership gives the
    /// producing node no lifetime over which to hold a borrow.
    pub fn from_view(frame_id: FrameId, data: &[u8], width: u32, height: u32, stride: Vec<u32>) -> Self {
        Self::from_owned(frame_id, data.to_vec(), || {}, width, height, stride)
    }

    pub fn from_typed_samples(frame_id: FrameId, samples: TypedSamples) -> Self {
        Self {
            payload: BufferPayload::Typed(samples),
            frame_id,
            width: 0,
            height: 0,
            stride: Vec::new(),
            drop: false,
            tag: Tag::Normal,
            rois: Vec::new(),
            meta: MetaBag::new(),
        }
    }

    pub fn from_device_surface(frame_id: FrameId, handle: DeviceSurfaceHandle, width: u32, height: u32) -> Self {
        Self {
            payload: BufferPayload::DeviceSurface(handle),
            frame_id,
            width,
            height,
            stride: Vec::new(),
            drop: false,
            tag: Tag::Normal,
            rois: Vec::new(),
            meta: MetaBag::new(),
        }
    }

    /// Returns a copy of this buffer marked `drop` with its ROIs cleared,
    /// used by `StreamConsistencyViolation`/`Fatal` handling to forward a
    /// buffer without its annotations while preserving downstream ordering.
    pub fn cleared_and_dropped(&self) -> Self {
        let mut clone = self.clone();
        clone.drop = true;
        clone.rois = self.rois.iter().map(Roi::cleared).collect();
        clone
    }
}
