//! Stage modules that reuse artifacts produced by an earlier full run.

use fungen_types::{Action, VideoSegment, round_pos};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::processor::cache::{read_overlay, read_segments, segments_path_beside};
use crate::processor::events::{StageReporter, StepProgress};
use crate::processor::modules::{
    DetectionModule, DetectionOutput, DetectionRequest, FrameObjectMap, SegmentationModule,
    SegmentationOutput, SegmentationRequest, StageError,
};
use crate::timeline::FrameRange;

/// Stage 1 that only accepts an existing detection artifact.
#[derive(Debug, Default, Clone, Copy)]
pub struct CachedDetection;

impl DetectionModule for CachedDetection {
    fn name(&self) -> &'static str {
        "cached-detection"
    }

    fn requires_model(&self) -> bool {
        false
    }

    fn detect(
        &self,
        request: &DetectionRequest,
        reporter: &StageReporter,
        cancel: &CancellationToken,
    ) -> Result<DetectionOutput, StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        if !request.output_path.exists() {
            return Err(StageError::Unavailable(format!(
                "no detection runtime; missing cached artifact {}",
                request.output_path.display()
            )));
        }
        reporter.stage1_status("Running S1...", "Reusing cached detections");
        info!(path = %request.output_path.display(), "reusing stage 1 artifact");
        Ok(DetectionOutput {
            output_path: request.output_path.clone(),
            max_fps: 0.0,
        })
    }
}

/// Stage 2 that reloads an overlay and its chapter list from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlayReplaySegmentation;

impl OverlayReplaySegmentation {
    /// Locked-box height mapped onto 0-100 against the tallest box seen;
    /// secondary follows the box centre across the model input width.
    fn actions_from_locked_box(frames: &FrameObjectMap, fps: f64, yolo_input_size: u32) -> (Vec<Action>, Vec<Action>) {
        if fps <= 0.0 || yolo_input_size == 0 {
            return (Vec::new(), Vec::new());
        }
        let locked: Vec<_> = frames
            .iter()
            .filter_map(|(&frame_id, frame)| {
                let state = &frame.locked_object;
                state.bbox.filter(|bbox| state.active && !bbox.is_empty()).map(|bbox| (frame_id, bbox))
            })
            .collect();
        let tallest = locked.iter().map(|(_, bbox)| bbox.height()).fold(0.0f32, f32::max);
        if tallest <= 0.0 {
            return (Vec::new(), Vec::new());
        }
        let width = yolo_input_size as f64;
        locked
            .iter()
            .map(|(frame_id, bbox)| {
                let at = (*frame_id as f64 / fps * 1000.0).round() as u64;
                let primary = round_pos(f64::from(bbox.height() / tallest) * 100.0);
                let center = (f64::from(bbox.x1) + f64::from(bbox.x2)) / 2.0;
                let secondary = round_pos(center / width * 100.0);
                (Action::new(at, primary), Action::new(at, secondary))
            })
            .unzip()
    }

    fn in_range(range: Option<FrameRange>, segment: &VideoSegment) -> bool {
        range.is_none_or(|range| range.overlaps(segment))
    }
}

impl SegmentationModule for OverlayReplaySegmentation {
    fn name(&self) -> &'static str {
        "overlay-replay"
    }

    fn segment(
        &self,
        request: &SegmentationRequest,
        reporter: &StageReporter,
        cancel: &CancellationToken,
    ) -> Result<SegmentationOutput, StageError> {
        reporter.stage2_progress(StepProgress::new(0, 3, "Loading overlay"), StepProgress::new(0, 1, ""));
        let mut frames = read_overlay(&request.overlay_path)?;
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        reporter.stage2_progress(StepProgress::new(1, 3, "Loading chapters"), StepProgress::new(1, 1, ""));
        let segments_path = segments_path_beside(&request.overlay_path, &request.video_path);
        let mut segments = if segments_path.exists() {
            read_segments(&segments_path)?
        } else {
            warn!(path = %segments_path.display(), "no chapter list beside overlay");
            Vec::new()
        };
        segments.retain(|segment| Self::in_range(request.range, segment));
        if let Some(range) = request.range {
            frames.retain(|&frame_id, _| (range.start..=range.end).contains(&frame_id));
        }
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let (primary_actions, secondary_actions) = if request.generate_actions {
            reporter.stage2_progress(StepProgress::new(2, 3, "Generating actions"), StepProgress::new(0, 1, ""));
            Self::actions_from_locked_box(&frames, request.fps, request.yolo_input_size)
        } else {
            (Vec::new(), Vec::new())
        };
        reporter.stage2_progress(StepProgress::new(3, 3, "Done"), StepProgress::new(1, 1, ""));
        info!(frames = frames.len(), segments = segments.len(), "replayed stage 2 overlay");

        Ok(SegmentationOutput {
            segments,
            primary_actions,
            secondary_actions,
            frame_objects: frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use assert_matches::assert_matches;
    use fungen_types::{BoundingBox, FrameObject, LockedObjectState};
    use tempfile::tempdir;

    use crate::processor::cache::{overlay_path, segments_path, stage1_path, write_overlay, write_segments};
    use crate::processor::events::event_channel;

    fn detection_request(output_path: PathBuf) -> DetectionRequest {
        DetectionRequest {
            video_path: PathBuf::from("clip.mp4"),
            det_model: None,
            pose_model: None,
            confidence_threshold: 0.4,
            yolo_input_size: 640,
            hwaccel: None,
            frame_range: None,
            output_path,
            producers: 1,
            consumers: 1,
            autotune: false,
        }
    }

    #[test]
    fn cached_detection_needs_existing_artifact() {
        let dir = tempdir().unwrap();
        let path = stage1_path(dir.path(), "clip.mp4".as_ref());
        let (tx, _rx) = event_channel();
        let reporter = StageReporter::new(tx);
        let cancel = CancellationToken::new();

        let missing = CachedDetection.detect(&detection_request(path.clone()), &reporter, &cancel);
        assert_matches!(missing, Err(StageError::Unavailable(_)));

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"cached").unwrap();
        let output = CachedDetection.detect(&detection_request(path.clone()), &reporter, &cancel).unwrap();
        assert_eq!(output.output_path, path);
    }

    #[test]
    fn replay_filters_by_range_and_builds_actions() {
        let dir = tempdir().unwrap();
        let video = PathBuf::from("clip.mp4");
        let overlay = overlay_path(dir.path(), &video);
        let frames: FrameObjectMap = (0..60u64)
            .map(|frame_id| {
                let mut frame = FrameObject::placeholder(frame_id);
                let height = if frame_id % 2 == 0 { 200.0 } else { 100.0 };
                frame.locked_object = LockedObjectState {
                    active: true,
                    bbox: Some(BoundingBox::new(300.0, 100.0, 340.0, 100.0 + height)),
                };
                (frame_id, frame)
            })
            .collect();
        write_overlay(&overlay, &frames).unwrap();
        write_segments(
            &segments_path(dir.path(), &video),
            &[VideoSegment::new(0, 19, "Boobjob"), VideoSegment::new(20, 59, "Footjob")],
        )
        .unwrap();

        let request = SegmentationRequest {
            video_path: video.clone(),
            stage1_path: stage1_path(dir.path(), &video),
            overlay_path: overlay,
            generate_actions: true,
            yolo_input_size: 640,
            range: Some(FrameRange::new(30, 39)),
            ranged_data_source: false,
            fps: 30.0,
        };
        let (tx, _rx) = event_channel();
        let output = OverlayReplaySegmentation
            .segment(&request, &StageReporter::new(tx), &CancellationToken::new())
            .unwrap();

        assert_eq!(output.segments.len(), 1);
        assert_eq!(output.segments[0].major_position, "Footjob");
        assert_eq!(output.frame_objects.len(), 10);
        assert_eq!(output.primary_actions.len(), 10);
        assert_eq!(output.primary_actions[0], Action::new(1000, 100));
        assert_eq!(output.primary_actions[1].pos, 50);
        assert!(output.secondary_actions.iter().all(|a| a.pos == 50));
    }
}
