//! Frame-by-frame motion trackers.
//!
//! [`BaseTracker`] is the pluggable seam for live tracking; [`RoiTracker`]
//! implements it and also exposes the per-segment controls Stage 3 drives
//! directly.

pub mod flow;
pub mod roi;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use fungen_types::{BoundingBox, FrameObject, GrayFrame, MotionMode, VideoSegment, clamp_pos};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use flow::{FlowEstimate, Patch, block_flow};
use roi::{Roi, calculate_combined_roi, clamp_vr_roi, smooth_roi_transition};

/// Position units per pixel of smoothed per-frame motion.
const FLOW_GAIN: f64 = 10.0;
const VR_ASPECT_RATIO: f64 = 1.9;
/// Below this many pixels per frame neither half of the patch is said to lead.
const MOTION_MODE_MIN_DY: f64 = 0.2;
const MOTION_MODE_DOMINANCE: f64 = 1.2;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker initialization failed: {0}")]
    Initialization(String),
    #[error("tracker processing failed: {0}")]
    Processing(String),
    #[error("invalid tracker settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum VideoType {
    #[default]
    #[serde(rename = "auto")]
    #[value(name = "auto")]
    Auto,
    #[serde(rename = "2d")]
    #[value(name = "2d")]
    Flat,
    #[serde(rename = "vr")]
    #[value(name = "vr")]
    Vr,
}

impl VideoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::Auto => "auto",
            VideoType::Flat => "2d",
            VideoType::Vr => "vr",
        }
    }

    /// Resolves `Auto` from the frame aspect ratio.
    pub fn is_vr(&self, aspect_ratio: Option<f64>) -> bool {
        match self {
            VideoType::Vr => true,
            VideoType::Flat => false,
            VideoType::Auto => aspect_ratio.is_some_and(|ratio| ratio >= VR_ASPECT_RATIO),
        }
    }
}

impl FromStr for VideoType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub roi_padding: i32,
    pub roi_update_interval: u64,
    pub roi_smoothing_factor: f64,
    pub flow_history_window_smooth: usize,
    pub output_delay_frames: u64,
    pub sensitivity: f64,
    pub base_amplification: f64,
    pub video_type: VideoType,
    /// Extra gain per segment category, keyed by position name.
    pub class_amplification: BTreeMap<String, f64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            roi_padding: 20,
            roi_update_interval: 3,
            roi_smoothing_factor: 0.6,
            flow_history_window_smooth: 3,
            output_delay_frames: 0,
            sensitivity: 1.0,
            base_amplification: 1.0,
            video_type: VideoType::Auto,
            class_amplification: BTreeMap::new(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.flow_history_window_smooth == 0 {
            return Err(TrackerError::InvalidSettings(
                "flow_history_window_smooth must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.roi_smoothing_factor) {
            return Err(TrackerError::InvalidSettings(format!(
                "roi_smoothing_factor {} is outside 0..=1",
                self.roi_smoothing_factor
            )));
        }
        if self.sensitivity <= 0.0 || self.base_amplification <= 0.0 {
            return Err(TrackerError::InvalidSettings(
                "sensitivity and base_amplification must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Frames the emitted signal trails the video by.
    pub fn total_delay_frames(&self) -> f64 {
        let window = self.flow_history_window_smooth;
        let automatic = if window > 1 {
            (window - 1) as f64 / 2.0
        } else {
            0.0
        };
        self.output_delay_frames as f64 + automatic
    }

    pub fn delay_ms(&self, fps: f64) -> f64 {
        if fps > 0.0 {
            self.total_delay_frames() / fps * 1000.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerMetadata {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub version: &'static str,
    pub requires_roi: bool,
    pub supports_dual_axis: bool,
}

/// What a tracker needs to know about the video before the first frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerContext {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl TrackerContext {
    pub fn aspect_ratio(&self) -> Option<f64> {
        (self.height > 0).then(|| f64::from(self.width) / f64::from(self.height))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedAction {
    pub at: u64,
    pub primary: u8,
    pub secondary: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerDebugInfo {
    pub roi: Option<Roi>,
    pub flow: Option<FlowEstimate>,
    pub motion_mode: MotionMode,
}

#[derive(Debug, Clone)]
pub struct TrackerResult {
    pub processed_frame: GrayFrame,
    pub action_log: Vec<TrackedAction>,
    pub debug_info: TrackerDebugInfo,
    pub status_message: Option<String>,
}

pub trait BaseTracker: Send {
    fn metadata(&self) -> TrackerMetadata;

    fn initialize(&mut self, context: &TrackerContext) -> Result<(), TrackerError>;

    fn start_tracking(&mut self) -> Result<(), TrackerError>;

    fn stop_tracking(&mut self) -> Result<(), TrackerError>;

    fn is_tracking(&self) -> bool;

    fn process_frame(
        &mut self,
        frame: &GrayFrame,
        frame_time_ms: u64,
        frame_index: Option<u64>,
    ) -> Result<TrackerResult, TrackerError>;

    /// Trackers that accept a user ROI override this.
    fn set_roi(&mut self, _roi: Roi) -> bool {
        false
    }
}

/// Optical-flow tracker confined to a region around the reference object.
#[derive(Debug)]
pub struct RoiTracker {
    config: TrackerConfig,
    roi: Option<Roi>,
    prev_patch: Option<Patch>,
    primary_history: VecDeque<f64>,
    secondary_history: VecDeque<f64>,
    internal_frame_counter: u64,
    interaction_class: Option<String>,
    motion_mode: MotionMode,
    last_flow: Option<FlowEstimate>,
    is_vr: bool,
    initialized: bool,
    tracking_active: bool,
}

impl RoiTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Self {
            config,
            roi: None,
            prev_patch: None,
            primary_history: VecDeque::new(),
            secondary_history: VecDeque::new(),
            internal_frame_counter: 0,
            interaction_class: None,
            motion_mode: MotionMode::Undetermined,
            last_flow: None,
            is_vr: false,
            initialized: false,
            tracking_active: false,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn roi(&self) -> Option<Roi> {
        self.roi
    }

    pub fn motion_mode(&self) -> MotionMode {
        self.motion_mode
    }

    pub fn is_vr(&self) -> bool {
        self.is_vr
    }

    /// Forgets everything learned from the previous segment.
    pub fn reset_for_segment(&mut self, segment: &VideoSegment) {
        self.internal_frame_counter = 0;
        self.prev_patch = None;
        self.roi = None;
        self.primary_history.clear();
        self.secondary_history.clear();
        self.motion_mode = MotionMode::Undetermined;
        self.last_flow = None;
        self.interaction_class = Some(segment.major_position.clone());
    }

    pub fn needs_roi_update(&self) -> bool {
        self.roi.is_none()
            || (self.config.roi_update_interval > 0
                && self.internal_frame_counter % self.config.roi_update_interval == 0)
    }

    /// Rebuilds the ROI from a frame annotation. Boxes are given in model
    /// input space and scaled by `scale` into frame pixels. Leaves the ROI
    /// alone when the reference object is not locked.
    pub fn update_roi(
        &mut self,
        frame_width: u32,
        frame_height: u32,
        annotation: &FrameObject,
        segment: &VideoSegment,
        scale: (f32, f32),
    ) {
        let locked = &annotation.locked_object;
        let Some(bbox) = locked.bbox.filter(|_| locked.active) else {
            return;
        };
        let scale_box = |b: &BoundingBox| {
            BoundingBox::new(b.x1 * scale.0, b.y1 * scale.1, b.x2 * scale.0, b.y2 * scale.1)
        };
        let reference = Roi::from_box(&scale_box(&bbox));
        if reference.is_empty() {
            return;
        }
        let relevant = segment.relevant_contact_classes();
        let interacting: Vec<Roi> = annotation
            .contact_boxes
            .iter()
            .filter(|contact| relevant.contains(&contact.class_name.as_str()))
            .map(|contact| Roi::from_box(&scale_box(&contact.bbox)))
            .collect();
        let mut candidate = calculate_combined_roi(
            frame_width,
            frame_height,
            &reference,
            &interacting,
            self.config.roi_padding,
        );
        if self.is_vr {
            candidate = clamp_vr_roi(&candidate, reference.w, segment.is_hand_or_mouth(), frame_width);
        }
        let smoothed = smooth_roi_transition(self.roi.as_ref(), &candidate, self.config.roi_smoothing_factor);
        trace!(?smoothed, "roi updated");
        self.roi = Some(smoothed);
    }

    fn class_multiplier(&self) -> f64 {
        self.interaction_class
            .as_ref()
            .and_then(|class| self.config.class_amplification.get(class))
            .copied()
            .unwrap_or(1.0)
    }

    fn push_history(history: &mut VecDeque<f64>, value: f64, window: usize) -> f64 {
        history.push_back(value);
        while history.len() > window {
            history.pop_front();
        }
        history.iter().sum::<f64>() / history.len() as f64
    }

    fn classify_motion(flow: &FlowEstimate) -> MotionMode {
        let upper = flow.upper_dy.abs();
        let lower = flow.lower_dy.abs();
        if upper.max(lower) < MOTION_MODE_MIN_DY {
            MotionMode::Undetermined
        } else if lower > upper * MOTION_MODE_DOMINANCE {
            MotionMode::Thrusting
        } else if upper > lower * MOTION_MODE_DOMINANCE {
            MotionMode::Riding
        } else {
            MotionMode::Undetermined
        }
    }

    /// Runs flow on the current ROI and returns `(primary, secondary)`
    /// positions. Both are neutral when there is no usable ROI patch.
    pub fn track_patch(&mut self, frame: &GrayFrame) -> (u8, u8) {
        let Some(patch) = self.roi.filter(|roi| !roi.is_empty()).and_then(|roi| Patch::extract(frame, &roi))
        else {
            self.prev_patch = None;
            return (50, 50);
        };

        let flow = self.prev_patch.as_ref().and_then(|prev| block_flow(prev, &patch));
        self.prev_patch = Some(patch);
        self.last_flow = flow;
        let Some(flow) = flow else {
            return (50, 50);
        };

        let window = self.config.flow_history_window_smooth;
        let dy = Self::push_history(&mut self.primary_history, flow.dy, window);
        let dx = Self::push_history(&mut self.secondary_history, flow.dx, window);
        self.motion_mode = Self::classify_motion(&flow);

        let gain = FLOW_GAIN * self.config.base_amplification * self.class_multiplier() * self.config.sensitivity;
        let primary = clamp_pos((50.0 - dy * gain).round() as i64);
        let secondary = clamp_pos((50.0 + dx * gain).round() as i64);
        (primary, secondary)
    }

    pub fn advance(&mut self) {
        self.internal_frame_counter += 1;
    }
}

impl BaseTracker for RoiTracker {
    fn metadata(&self) -> TrackerMetadata {
        TrackerMetadata {
            name: "roi_tracker",
            display_name: "ROI Optical Flow",
            description: "Block-matching optical flow inside a region of interest",
            category: "offline",
            version: "1.0.0",
            requires_roi: true,
            supports_dual_axis: true,
        }
    }

    fn initialize(&mut self, context: &TrackerContext) -> Result<(), TrackerError> {
        if context.width == 0 || context.height == 0 {
            return Err(TrackerError::Initialization(format!(
                "invalid frame size {}x{}",
                context.width, context.height
            )));
        }
        self.is_vr = self.config.video_type.is_vr(context.aspect_ratio());
        self.initialized = true;
        debug!(vr = self.is_vr, width = context.width, height = context.height, "tracker initialized");
        Ok(())
    }

    fn start_tracking(&mut self) -> Result<(), TrackerError> {
        if !self.initialized {
            return Err(TrackerError::Initialization("start_tracking before initialize".into()));
        }
        self.tracking_active = true;
        Ok(())
    }

    fn stop_tracking(&mut self) -> Result<(), TrackerError> {
        self.tracking_active = false;
        Ok(())
    }

    fn is_tracking(&self) -> bool {
        self.tracking_active
    }

    fn process_frame(
        &mut self,
        frame: &GrayFrame,
        frame_time_ms: u64,
        frame_index: Option<u64>,
    ) -> Result<TrackerResult, TrackerError> {
        if !self.initialized {
            return Err(TrackerError::Processing("tracker is not initialized".into()));
        }
        let (primary, secondary) = self.track_patch(frame);
        self.advance();
        let action_log = if self.tracking_active {
            vec![TrackedAction {
                at: frame_time_ms,
                primary,
                secondary,
            }]
        } else {
            Vec::new()
        };
        let status_message = self
            .roi
            .is_none()
            .then(|| format!("no ROI set (frame {})", frame_index.unwrap_or_default()));
        Ok(TrackerResult {
            processed_frame: frame.clone(),
            action_log,
            debug_info: TrackerDebugInfo {
                roi: self.roi,
                flow: self.last_flow,
                motion_mode: self.motion_mode,
            },
            status_message,
        })
    }

    fn set_roi(&mut self, roi: Roi) -> bool {
        if roi.is_empty() {
            return false;
        }
        self.roi = Some(roi);
        self.prev_patch = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fungen_types::{ContactBox, LockedObjectState};

    fn frame(width: u32, height: u32, offset: i64) -> GrayFrame {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                let sy = (y - offset) as u64;
                let h = (x as u64).wrapping_mul(0x9E37_79B9).wrapping_add(sy.wrapping_mul(0x85EB_CA6B));
                data.push(((h ^ (h >> 13)) & 0xFF) as u8);
            }
        }
        GrayFrame::from_owned(width, height, width as usize, None, data).unwrap()
    }

    fn locked_annotation(bbox: BoundingBox) -> FrameObject {
        let mut annotation = FrameObject::placeholder(0);
        annotation.locked_object = LockedObjectState {
            active: true,
            bbox: Some(bbox),
        };
        annotation
    }

    #[test]
    fn delay_accounts_for_smoothing_window() {
        let config = TrackerConfig {
            flow_history_window_smooth: 5,
            output_delay_frames: 1,
            ..TrackerConfig::default()
        };
        assert_eq!(config.total_delay_frames(), 3.0);
        assert_eq!(config.delay_ms(30.0), 100.0);
        assert_eq!(config.delay_ms(0.0), 0.0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let config = TrackerConfig {
            flow_history_window_smooth: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(RoiTracker::new(config), Err(TrackerError::InvalidSettings(_))));
    }

    #[test]
    fn downward_motion_lowers_primary_position() {
        let mut tracker = RoiTracker::new(TrackerConfig::default()).unwrap();
        tracker
            .initialize(&TrackerContext {
                width: 160,
                height: 120,
                fps: 30.0,
            })
            .unwrap();
        assert!(tracker.set_roi(Roi::new(16, 16, 128, 88)));

        assert_eq!(tracker.track_patch(&frame(160, 120, 0)), (50, 50));
        let (primary, secondary) = tracker.track_patch(&frame(160, 120, 2));
        assert_eq!(primary, 30);
        assert_eq!(secondary, 50);
    }

    #[test]
    fn missing_roi_yields_neutral_and_drops_history() {
        let mut tracker = RoiTracker::new(TrackerConfig::default()).unwrap();
        assert_eq!(tracker.track_patch(&frame(64, 64, 0)), (50, 50));
        assert!(tracker.needs_roi_update());
    }

    #[test]
    fn roi_combines_relevant_contacts_only() {
        let mut tracker = RoiTracker::new(TrackerConfig {
            roi_padding: 0,
            ..TrackerConfig::default()
        })
        .unwrap();
        let segment = VideoSegment::new(0, 10, "Cowgirl / Missionary");
        tracker.reset_for_segment(&segment);

        let mut annotation = locked_annotation(BoundingBox::new(100.0, 100.0, 150.0, 200.0));
        annotation.contact_boxes = vec![
            ContactBox {
                class_name: "pussy".into(),
                bbox: BoundingBox::new(90.0, 180.0, 160.0, 240.0),
            },
            ContactBox {
                class_name: "face".into(),
                bbox: BoundingBox::new(0.0, 0.0, 20.0, 20.0),
            },
        ];
        tracker.update_roi(640, 640, &annotation, &segment, (1.0, 1.0));
        assert_eq!(tracker.roi(), Some(Roi::new(90, 100, 70, 140)));

        let inactive = FrameObject::placeholder(1);
        tracker.update_roi(640, 640, &inactive, &segment, (1.0, 1.0));
        assert_eq!(tracker.roi(), Some(Roi::new(90, 100, 70, 140)));
    }

    #[test]
    fn vr_detection_uses_aspect_ratio() {
        assert!(VideoType::Auto.is_vr(Some(2.0)));
        assert!(!VideoType::Auto.is_vr(Some(16.0 / 9.0)));
        assert!(VideoType::Vr.is_vr(None));
        assert_eq!("2D".parse::<VideoType>(), Ok(VideoType::Flat));
    }

    #[test]
    fn live_processing_logs_actions_only_while_tracking() {
        let mut tracker = RoiTracker::new(TrackerConfig::default()).unwrap();
        let context = TrackerContext {
            width: 64,
            height: 64,
            fps: 30.0,
        };
        tracker.initialize(&context).unwrap();
        let idle = tracker.process_frame(&frame(64, 64, 0), 0, Some(0)).unwrap();
        assert!(idle.action_log.is_empty());
        assert!(idle.status_message.is_some());

        tracker.start_tracking().unwrap();
        let active = tracker.process_frame(&frame(64, 64, 0), 33, Some(1)).unwrap();
        assert_eq!(
            active.action_log,
            vec![TrackedAction {
                at: 33,
                primary: 50,
                secondary: 50
            }]
        );
    }
}
