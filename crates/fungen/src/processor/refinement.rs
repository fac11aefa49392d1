//! Re-derives one chapter's primary axis from a single tracked box.

use std::collections::BTreeMap;

use fungen_funscript::signal::percentile;
use fungen_types::{Action, TrackedBox, VideoSegment, round_pos};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::modules::FrameObjectMap;

const INTERPOLATED: &str = "Interpolated";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Width of the centered window used for local rescaling.
    pub window_ms: u64,
    /// Local percentile spread below which a point is left as is.
    pub min_local_range: f64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            window_ms: 4000,
            min_local_range: 5.0,
        }
    }
}

/// Boxes for `track_id` on every chapter frame, with gaps filled by linear
/// interpolation where both neighbours are known.
pub fn build_track(
    frames: &FrameObjectMap,
    chapter: &VideoSegment,
    track_id: i64,
) -> BTreeMap<u64, TrackedBox> {
    let known: BTreeMap<u64, &TrackedBox> = frames
        .range(chapter.start_frame_id..=chapter.end_frame_id)
        .filter_map(|(&frame_id, frame)| frame.track(track_id).map(|tracked| (frame_id, tracked)))
        .collect();

    let mut track = BTreeMap::new();
    for frame_id in chapter.start_frame_id..=chapter.end_frame_id {
        if let Some(tracked) = known.get(&frame_id) {
            track.insert(frame_id, (*tracked).clone());
            continue;
        }
        let prev = known.range(..frame_id).next_back();
        let next = known.range(frame_id + 1..).next();
        let (Some((&prev_id, prev_box)), Some((&next_id, next_box))) = (prev, next) else {
            continue;
        };
        let t = (frame_id - prev_id) as f32 / (next_id - prev_id) as f32;
        track.insert(
            frame_id,
            TrackedBox {
                bbox: prev_box.bbox.lerp(&next_box.bbox, t),
                track_id: Some(track_id),
                class_name: prev_box.class_name.clone(),
                confidence: prev_box.confidence,
                status: Some(INTERPOLATED.to_string()),
            },
        );
    }
    track
}

/// Box bottom edge mapped onto 0-100, higher meaning closer to the top.
pub fn raw_actions(track: &BTreeMap<u64, TrackedBox>, fps: f64, yolo_input_size: u32) -> Vec<Action> {
    if fps <= 0.0 || yolo_input_size == 0 {
        return Vec::new();
    }
    track
        .iter()
        .map(|(&frame_id, tracked)| {
            let distance = 100.0 - f64::from(tracked.bbox.y2) / f64::from(yolo_input_size) * 100.0;
            let at = (frame_id as f64 / fps * 1000.0).round() as u64;
            Action::new(at, distance.clamp(0.0, 100.0) as u8)
        })
        .collect()
}

/// Rescales each point against the 10th/90th percentile of its neighbours.
pub fn amplify_locally(actions: &[Action], config: &RefinementConfig) -> Vec<Action> {
    let half = config.window_ms as f64 / 2.0;
    actions
        .iter()
        .map(|action| {
            let center = action.at as f64;
            let start = actions.partition_point(|a| (a.at as f64) < center - half);
            let end = actions.partition_point(|a| (a.at as f64) <= center + half);
            let local: Vec<f64> = actions[start..end].iter().map(|a| f64::from(a.pos)).collect();
            let (Some(low), Some(high)) = (percentile(&local, 10.0), percentile(&local, 90.0)) else {
                return *action;
            };
            let range = high - low;
            if range < config.min_local_range {
                return *action;
            }
            let normalized = ((f64::from(action.pos) - low) / range).clamp(0.0, 1.0);
            Action::new(action.at, round_pos(normalized * 100.0))
        })
        .collect()
}

/// Full refinement of one chapter. `None` when the track never appears.
pub fn refine_chapter(
    frames: &FrameObjectMap,
    chapter: &VideoSegment,
    track_id: i64,
    fps: f64,
    yolo_input_size: u32,
    config: &RefinementConfig,
) -> Option<Vec<Action>> {
    let track = build_track(frames, chapter, track_id);
    if track.is_empty() {
        warn!(track_id, chapter = %chapter.display_name(), "track not found in chapter; refinement skipped");
        return None;
    }
    let raw = raw_actions(&track, fps, yolo_input_size);
    if raw.is_empty() {
        return None;
    }
    debug!(track_id, points = raw.len(), "refining chapter");
    Some(amplify_locally(&raw, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fungen_types::{BoundingBox, FrameObject};

    fn frame_with_track(frame_id: u64, track_id: i64, y2: f32) -> FrameObject {
        let mut frame = FrameObject::placeholder(frame_id);
        frame.yolo_boxes.push(TrackedBox {
            bbox: BoundingBox::new(0.0, y2 - 50.0, 40.0, y2),
            track_id: Some(track_id),
            class_name: "penis".to_string(),
            confidence: 0.9,
            status: None,
        });
        frame
    }

    #[test]
    fn interpolates_only_between_known_frames() {
        let mut frames = FrameObjectMap::new();
        frames.insert(2, frame_with_track(2, 5, 100.0));
        frames.insert(6, frame_with_track(6, 5, 300.0));
        frames.insert(4, frame_with_track(4, 9, 640.0));

        let chapter = VideoSegment::new(0, 8, "Handjob / Blowjob");
        let track = build_track(&frames, &chapter, 5);
        assert_eq!(track.keys().copied().collect::<Vec<_>>(), vec![2, 3, 4, 5, 6]);
        assert_eq!(track[&4].bbox.y2, 200.0);
        assert_eq!(track[&4].status.as_deref(), Some("Interpolated"));
        assert_eq!(track[&2].status, None);
    }

    #[test]
    fn positions_come_from_box_bottom() {
        let mut track = BTreeMap::new();
        track.insert(30, frame_with_track(30, 1, 480.0).yolo_boxes.remove(0));
        track.insert(45, frame_with_track(45, 1, 700.0).yolo_boxes.remove(0));
        let actions = raw_actions(&track, 30.0, 640);
        assert_eq!(actions, vec![Action::new(1000, 25), Action::new(1500, 0)]);
    }

    #[test]
    fn local_amplification_stretches_and_skips_flat_windows() {
        let config = RefinementConfig::default();
        let wave: Vec<Action> = (0..20)
            .map(|i| Action::new(i * 100, if i % 2 == 0 { 40 } else { 60 }))
            .collect();
        let amplified = amplify_locally(&wave, &config);
        assert!(amplified.iter().all(|a| a.pos == 0 || a.pos == 100));

        let flat: Vec<Action> = (0..10).map(|i| Action::new(i * 100, 50 + (i % 2) as u8)).collect();
        assert_eq!(amplify_locally(&flat, &config), flat);
    }

    #[test]
    fn unknown_track_yields_nothing() {
        let mut frames = FrameObjectMap::new();
        frames.insert(0, frame_with_track(0, 1, 100.0));
        let chapter = VideoSegment::new(0, 10, "Boobjob");
        assert!(refine_chapter(&frames, &chapter, 42, 30.0, 640, &RefinementConfig::default()).is_none());
    }
}
