//! Seams for the detection and segmentation stages.
//!
//! Inference runtimes live outside this crate; anything that can turn a
//! video into a Stage 1 artifact or a segment list plugs in here.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use fungen_types::{Action, FrameError, FrameObject, VideoSegment};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::events::StageReporter;
use crate::timeline::FrameRange;

/// Per-frame Stage 2 annotations, keyed by frame id.
pub type FrameObjectMap = BTreeMap<u64, FrameObject>;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage module is unavailable: {0}")]
    Unavailable(String),
    #[error("stage {stage} failed: {message}")]
    Failed { stage: u8, message: String },
    #[error("cancelled")]
    Cancelled,
    #[error("stage {stage} panicked: {message}")]
    Panicked { stage: u8, message: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("overlay {path}: {message}")]
    Overlay { path: PathBuf, message: String },
    #[error(transparent)]
    Decoder(#[from] FrameError),
}

impl StageError {
    pub fn failed(stage: u8, message: impl Into<String>) -> Self {
        StageError::Failed {
            stage,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn overlay(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        StageError::Overlay {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}

/// Problems detected before a background thread is spawned.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("no video loaded")]
    NoVideoLoaded,
    #[error("an analysis is already running")]
    AlreadyRunning,
    #[error("{0} module is unavailable")]
    ModuleUnavailable(&'static str),
    #[error("model file not found: {path}")]
    ModelMissing { path: PathBuf },
    #[error("failed to spawn analysis thread: {0}")]
    ThreadSpawn(#[source] io::Error),
    #[error("no Stage 2 overlay data is loaded")]
    NoOverlayData,
}

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub video_path: PathBuf,
    pub det_model: Option<PathBuf>,
    pub pose_model: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub yolo_input_size: u32,
    pub hwaccel: Option<String>,
    pub frame_range: Option<FrameRange>,
    pub output_path: PathBuf,
    pub producers: usize,
    pub consumers: usize,
    /// Set for runs that only measure Stage 1 throughput.
    pub autotune: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutput {
    pub output_path: PathBuf,
    pub max_fps: f64,
}

/// Stage 1: raw per-frame detections written to a msgpack artifact.
pub trait DetectionModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the configured model files must exist before a run starts.
    fn requires_model(&self) -> bool {
        true
    }

    fn detect(
        &self,
        request: &DetectionRequest,
        reporter: &StageReporter,
        cancel: &CancellationToken,
    ) -> Result<DetectionOutput, StageError>;
}

#[derive(Debug, Clone)]
pub struct SegmentationRequest {
    pub video_path: PathBuf,
    pub stage1_path: PathBuf,
    pub overlay_path: PathBuf,
    /// Produce funscript actions directly (2-stage mode).
    pub generate_actions: bool,
    pub yolo_input_size: u32,
    pub range: Option<FrameRange>,
    /// The Stage 1 artifact itself only covers `range`.
    pub ranged_data_source: bool,
    pub fps: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentationOutput {
    pub segments: Vec<VideoSegment>,
    pub primary_actions: Vec<Action>,
    pub secondary_actions: Vec<Action>,
    pub frame_objects: FrameObjectMap,
}

/// Stage 2: contact analysis, segmentation and the overlay artifact.
pub trait SegmentationModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Implementations write the overlay to `request.overlay_path`.
    fn segment(
        &self,
        request: &SegmentationRequest,
        reporter: &StageReporter,
        cancel: &CancellationToken,
    ) -> Result<SegmentationOutput, StageError>;
}
