//! Shared domain models for the fungen workspace.
//!
//! This crate centralizes lightweight data structures used across the decoder,
//! funscript engine, and pipeline crates. Keep it backend-agnostic and avoid
//! heavy dependencies so every crate can depend on it cheaply.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type FrameResult<T> = Result<T, FrameError>;

pub const MIN_POS: u8 = 0;
pub const MAX_POS: u8 = 100;
pub const NEUTRAL_POS: u8 = 50;

/// A single control point on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub at: u64,
    pub pos: u8,
}

impl Action {
    pub fn new(at: u64, pos: u8) -> Self {
        Self {
            at,
            pos: pos.min(MAX_POS),
        }
    }

    /// Builds an action from an unclamped integer position.
    pub fn clamped(at: u64, pos: i64) -> Self {
        Self {
            at,
            pos: clamp_pos(pos),
        }
    }
}

pub fn clamp_pos(value: i64) -> u8 {
    value.clamp(i64::from(MIN_POS), i64::from(MAX_POS)) as u8
}

/// Rounds half to even and clamps into the position range.
pub fn round_pos(value: f64) -> u8 {
    if !value.is_finite() {
        return NEUTRAL_POS;
    }
    value.round_ties_even().clamp(f64::from(MIN_POS), f64::from(MAX_POS)) as u8
}

/// Luma-only frame handed from the decoder to the optical-flow tracker.
#[derive(Clone)]
pub struct GrayFrame {
    width: u32,
    height: u32,
    stride: usize,
    frame_index: Option<u64>,
    timestamp: Option<Duration>,
    data: Arc<[u8]>,
}

impl fmt::Debug for GrayFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrayFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

impl GrayFrame {
    pub fn from_owned(
        width: u32,
        height: u32,
        stride: usize,
        timestamp: Option<Duration>,
        data: Vec<u8>,
    ) -> FrameResult<Self> {
        if stride < width as usize {
            return Err(FrameError::InvalidFrame {
                reason: format!("stride {stride} is narrower than width {width}"),
            });
        }
        let required =
            stride
                .checked_mul(height as usize)
                .ok_or_else(|| FrameError::InvalidFrame {
                    reason: "calculated luma plane length overflowed".into(),
                })?;
        if data.len() < required {
            return Err(FrameError::InvalidFrame {
                reason: format!(
                    "insufficient luma bytes: got {} expected at least {}",
                    data.len(),
                    required
                ),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            timestamp,
            data: Arc::from(data.into_boxed_slice()),
            frame_index: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Visible pixels of one row, without stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize]
    }

    pub fn frame_index(&self) -> Option<u64> {
        self.frame_index
    }

    pub fn with_frame_index(mut self, index: Option<u64>) -> Self {
        self.frame_index = index;
        self
    }

    pub fn set_frame_index(&mut self, index: Option<u64>) {
        self.frame_index = index;
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("backend {backend} is not supported in this build")]
    Unsupported { backend: &'static str },

    #[error("{backend} backend failed: {message}")]
    BackendFailure {
        backend: &'static str,
        message: String,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn unsupported(backend: &'static str) -> Self {
        Self::Unsupported { backend }
    }

    pub fn backend_failure(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendFailure {
            backend,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

pub const NOT_RELEVANT: &str = "Not Relevant";
pub const CLOSE_UP: &str = "Close Up";

/// Contiguous frame span classified by dominant position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSegment {
    pub start_frame_id: u64,
    pub end_frame_id: u64,
    pub major_position: String,
    #[serde(default)]
    pub segment_type: String,
    #[serde(default)]
    pub source: String,
}

impl VideoSegment {
    pub fn new(start_frame_id: u64, end_frame_id: u64, major_position: impl Into<String>) -> Self {
        Self {
            start_frame_id,
            end_frame_id,
            major_position: major_position.into(),
            segment_type: "SexAct".to_string(),
            source: "stage2".to_string(),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.end_frame_id
            .saturating_sub(self.start_frame_id)
            .saturating_add(1)
    }

    pub fn contains_frame(&self, frame_id: u64) -> bool {
        (self.start_frame_id..=self.end_frame_id).contains(&frame_id)
    }

    pub fn is_excluded_from_flow(&self) -> bool {
        self.major_position == NOT_RELEVANT || self.major_position == CLOSE_UP
    }

    pub fn is_hand_or_mouth(&self) -> bool {
        matches!(
            self.major_position.as_str(),
            "Handjob" | "Blowjob" | "Handjob / Blowjob"
        )
    }

    /// Contact classes whose boxes widen the tracking ROI for this category.
    pub fn relevant_contact_classes(&self) -> &'static [&'static str] {
        match self.major_position.as_str() {
            "Cowgirl / Missionary" => &["pussy"],
            "Rev. Cowgirl / Doggy" => &["butt"],
            "Handjob / Blowjob" => &["face", "hand"],
            "Boobjob" => &["breast", "hand"],
            "Footjob" => &["foot"],
            _ => &[],
        }
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} (F{}-{})",
            self.major_position, self.start_frame_id, self.end_frame_id
        )
    }
}

/// Axis-aligned box in `x1, y1, x2, y2` pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn lerp(&self, other: &BoundingBox, t: f32) -> BoundingBox {
        BoundingBox {
            x1: self.x1 + (other.x1 - self.x1) * t,
            y1: self.y1 + (other.y1 - self.y1) * t,
            x2: self.x2 + (other.x2 - self.x2) * t,
            y2: self.y2 + (other.y2 - self.y2) * t,
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(value: [f32; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(value: BoundingBox) -> Self {
        [value.x1, value.y1, value.x2, value.y2]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedBox {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub track_id: Option<i64>,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockedObjectState {
    #[serde(default)]
    pub active: bool,
    #[serde(default, rename = "box")]
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactBox {
    pub class_name: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    #[default]
    Undetermined,
    Thrusting,
    Riding,
}

impl MotionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionMode::Undetermined => "undetermined",
            MotionMode::Thrusting => "thrusting",
            MotionMode::Riding => "riding",
        }
    }
}

/// Per-frame stage 2 annotation, later augmented by stage 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObject {
    pub frame_id: u64,
    #[serde(default)]
    pub yolo_boxes: Vec<TrackedBox>,
    #[serde(default, rename = "atr_locked_penis_state")]
    pub locked_object: LockedObjectState,
    #[serde(default, rename = "atr_detected_contact_boxes")]
    pub contact_boxes: Vec<ContactBox>,
    #[serde(default)]
    pub motion_mode: MotionMode,
}

impl FrameObject {
    /// Stand-in for a frame stage 2 never annotated.
    pub fn placeholder(frame_id: u64) -> Self {
        Self {
            frame_id,
            yolo_boxes: Vec::new(),
            locked_object: LockedObjectState::default(),
            contact_boxes: Vec::new(),
            motion_mode: MotionMode::Undetermined,
        }
    }

    pub fn track(&self, track_id: i64) -> Option<&TrackedBox> {
        self.yolo_boxes
            .iter()
            .find(|tracked| tracked.track_id == Some(track_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_frame_rejects_short_buffers() {
        let err = GrayFrame::from_owned(4, 4, 4, None, vec![0; 8]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrame { .. }));

        let err = GrayFrame::from_owned(8, 2, 4, None, vec![0; 64]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrame { .. }));
    }

    #[test]
    fn gray_frame_row_skips_padding() {
        let data = vec![1, 2, 3, 0, 4, 5, 6, 0];
        let frame = GrayFrame::from_owned(3, 2, 4, None, data)
            .unwrap()
            .with_frame_index(Some(7));
        assert_eq!(frame.row(1), &[4, 5, 6]);
        assert_eq!(frame.frame_index(), Some(7));
    }

    #[test]
    fn position_helpers_clamp() {
        assert_eq!(Action::clamped(0, -5).pos, 0);
        assert_eq!(Action::clamped(0, 250).pos, 100);
        assert_eq!(round_pos(49.5), 50);
        assert_eq!(round_pos(48.5), 48);
        assert_eq!(round_pos(f64::NAN), NEUTRAL_POS);
    }

    #[test]
    fn segments_classify_flow_relevance() {
        let relevant = VideoSegment::new(10, 20, "Cowgirl / Missionary");
        assert!(!relevant.is_excluded_from_flow());
        assert_eq!(relevant.relevant_contact_classes(), &["pussy"]);
        assert_eq!(relevant.frame_count(), 11);
        assert_eq!(relevant.display_name(), "Cowgirl / Missionary (F10-20)");

        assert!(VideoSegment::new(0, 5, NOT_RELEVANT).is_excluded_from_flow());
        assert!(VideoSegment::new(0, 5, CLOSE_UP).is_excluded_from_flow());
        assert!(VideoSegment::new(0, 5, "Handjob / Blowjob").is_hand_or_mouth());
    }

    #[test]
    fn frame_object_uses_overlay_field_names() {
        let json = r#"{
            "frame_id": 3,
            "yolo_boxes": [{"bbox": [1.0, 2.0, 3.0, 4.0], "track_id": 9, "class_name": "penis", "confidence": 0.8}],
            "atr_locked_penis_state": {"active": true, "box": [0.0, 0.0, 10.0, 20.0]},
            "atr_detected_contact_boxes": [{"class_name": "hand", "box": [1.0, 1.0, 2.0, 2.0]}]
        }"#;
        let frame: FrameObject = serde_json::from_str(json).unwrap();
        assert!(frame.locked_object.active);
        assert_eq!(frame.locked_object.bbox.unwrap().height(), 20.0);
        assert_eq!(frame.track(9).unwrap().bbox.y2, 4.0);
        assert_eq!(frame.motion_mode, MotionMode::Undetermined);

        let encoded = serde_json::to_value(&frame).unwrap();
        assert!(encoded.get("atr_detected_contact_boxes").is_some());
    }
}
