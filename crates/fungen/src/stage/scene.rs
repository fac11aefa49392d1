//! Cut detection on decoded luma frames.

use fungen_decoder::{DynFrameSource, GrayFrame};
use fungen_types::VideoSegment;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::processor::modules::StageError;

pub const SCENE_SEGMENT_TYPE: &str = "Scene";
pub const SCENE_SOURCE: &str = "scene_detection";

/// Every `SAMPLE_STEP`th pixel on every `SAMPLE_STEP`th row is compared.
const SAMPLE_STEP: u32 = 4;

pub trait SceneDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(
        &self,
        source: DynFrameSource,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Vec<VideoSegment>, StageError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LumaSceneDetector {
    /// Mean absolute luma difference (0-255) that marks a cut.
    pub threshold: f64,
    /// Shortest scene, in frames, before another cut is accepted.
    pub min_scene_len: u64,
}

impl Default for LumaSceneDetector {
    fn default() -> Self {
        Self {
            threshold: 27.0,
            min_scene_len: 15,
        }
    }
}

impl LumaSceneDetector {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

fn mean_abs_diff(prev: &GrayFrame, curr: &GrayFrame) -> Option<f64> {
    if prev.width() != curr.width() || prev.height() != curr.height() {
        return None;
    }
    let mut total = 0u64;
    let mut samples = 0u64;
    for y in (0..curr.height()).step_by(SAMPLE_STEP as usize) {
        let (a, b) = (prev.row(y), curr.row(y));
        for x in (0..curr.width() as usize).step_by(SAMPLE_STEP as usize) {
            total += u64::from(a[x].abs_diff(b[x]));
            samples += 1;
        }
    }
    (samples > 0).then(|| total as f64 / samples as f64)
}

/// Turns cut frames into chapters covering `[0, total_frames)`.
pub fn scenes_from_cuts(cuts: &[u64], total_frames: u64) -> Vec<VideoSegment> {
    let mut bounds = Vec::with_capacity(cuts.len() + 2);
    bounds.push(0);
    bounds.extend(cuts.iter().copied().filter(|&cut| cut > 0 && cut < total_frames));
    bounds.push(total_frames);
    bounds.dedup();
    bounds
        .windows(2)
        .filter(|pair| pair[1] > pair[0])
        .enumerate()
        .map(|(index, pair)| {
            let mut segment = VideoSegment::new(pair[0], pair[1] - 1, format!("Scene {}", index + 1));
            segment.segment_type = SCENE_SEGMENT_TYPE.to_string();
            segment.source = SCENE_SOURCE.to_string();
            segment
        })
        .collect()
}

impl SceneDetector for LumaSceneDetector {
    fn name(&self) -> &'static str {
        "luma"
    }

    fn detect(
        &self,
        source: DynFrameSource,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Vec<VideoSegment>, StageError>> {
        let detector = *self;
        Box::pin(async move {
            let total = source
                .metadata()
                .calculate_total_frames()
                .ok_or_else(|| StageError::failed(0, "video frame count unknown"))?;
            let mut stream = source.stream_frames(0, total, cancel.clone());
            let mut cuts = Vec::new();
            let mut prev: Option<GrayFrame> = None;
            let mut scene_start = 0u64;
            let mut seen = 0u64;

            while let Some(item) = stream.next().await {
                if cancel.is_cancelled() {
                    return Err(StageError::Cancelled);
                }
                let frame = item?;
                let frame_id = frame.frame_index().unwrap_or(seen);
                seen += 1;
                if let Some(diff) = prev.as_ref().and_then(|prev| mean_abs_diff(prev, &frame))
                    && diff > detector.threshold
                    && frame_id - scene_start >= detector.min_scene_len
                {
                    debug!(frame_id, diff, "scene cut");
                    cuts.push(frame_id);
                    scene_start = frame_id;
                }
                prev = Some(frame);
            }
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }

            let scenes = scenes_from_cuts(&cuts, seen);
            info!(scenes = scenes.len(), frames = seen, "scene detection finished");
            Ok(scenes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fungen_decoder::{FrameSource, FrameStream, VideoMetadata};
    use futures_util::stream;

    /// Flat frames whose brightness changes at the given frames.
    struct Slideshow {
        total: u64,
        cuts: Vec<u64>,
    }

    impl Slideshow {
        fn level(&self, index: u64) -> u8 {
            let scene = self.cuts.iter().filter(|&&cut| cut <= index).count();
            if scene % 2 == 0 { 30 } else { 200 }
        }
    }

    impl FrameSource for Slideshow {
        fn backend(&self) -> &'static str {
            "slideshow"
        }

        fn metadata(&self) -> VideoMetadata {
            VideoMetadata {
                fps: Some(30.0),
                width: Some(16),
                height: Some(8),
                total_frames: Some(self.total),
                ..VideoMetadata::default()
            }
        }

        fn stream_frames(&self, start: u64, count: u64, _cancel: CancellationToken) -> FrameStream {
            let frames: Vec<_> = (start..start + count)
                .map(|index| {
                    GrayFrame::from_owned(16, 8, 16, None, vec![self.level(index); 128])
                        .map(|frame| frame.with_frame_index(Some(index)))
                })
                .collect();
            stream::iter(frames).boxed()
        }
    }

    #[test]
    fn cuts_become_contiguous_chapters() {
        let scenes = scenes_from_cuts(&[40, 100], 150);
        let spans: Vec<_> = scenes.iter().map(|s| (s.start_frame_id, s.end_frame_id)).collect();
        assert_eq!(spans, vec![(0, 39), (40, 99), (100, 149)]);
        assert!(scenes.iter().all(|s| s.segment_type == "Scene" && s.source == "scene_detection"));
        assert_eq!(scenes_from_cuts(&[], 0), Vec::new());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn luma_detector_finds_hard_cuts_and_respects_min_length() {
        let source = Arc::new(Slideshow {
            total: 90,
            cuts: vec![30, 35, 60],
        });
        let scenes = LumaSceneDetector::default()
            .detect(source, CancellationToken::new())
            .await
            .unwrap();
        let spans: Vec<_> = scenes.iter().map(|s| (s.start_frame_id, s.end_frame_id)).collect();
        assert_eq!(spans, vec![(0, 29), (30, 59), (60, 89)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_detection_reports_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = Arc::new(Slideshow { total: 10, cuts: vec![] });
        let result = LumaSceneDetector::default().detect(source, cancel).await;
        assert!(matches!(result, Err(StageError::Cancelled)));
    }
}
