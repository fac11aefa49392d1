use std::time::{Duration, Instant};

use fungen_decoder::DynFrameSource;
use fungen_funscript::DualAxisFunscript;
use fungen_types::{Action, FrameObject, VideoSegment};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::processor::events::{Stage3Progress, StageReporter};
use crate::processor::modules::{FrameObjectMap, StageError};
use crate::tracker::{BaseTracker, RoiTracker, TrackerConfig, TrackerContext};

const PROGRESS_EVERY_FRAMES: u64 = 10;

/// Returns whether the tracker shut down cleanly. A failed stop is logged
/// and does not discard the actions already collected.
fn stop_tracker(tracker: &mut dyn BaseTracker) -> bool {
    match tracker.stop_tracking() {
        Ok(()) => true,
        Err(err) => {
            warn!(tracker = tracker.metadata().name, error = %err, "failed to stop tracker");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage3Config {
    pub warmup_frames: u64,
    pub fps: f64,
    /// Side length of the model input space the Stage 2 boxes are expressed in.
    pub yolo_input_size: u32,
    pub min_interval_ms: u64,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stage3Output {
    pub primary: Vec<Action>,
    pub secondary: Vec<Action>,
    pub frames_processed: u64,
}

struct RunClock {
    started: Instant,
    last_frame: Option<Instant>,
    instant_fps: f64,
    processed: u64,
    estimated_total: u64,
}

impl RunClock {
    fn new(estimated_total: u64) -> Self {
        Self {
            started: Instant::now(),
            last_frame: None,
            instant_fps: 0.0,
            processed: 0,
            estimated_total,
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_frame {
            let delta = now.duration_since(last).as_secs_f64();
            if delta > 0.001 {
                self.instant_fps = 1.0 / delta;
            }
        }
        self.last_frame = Some(now);
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn eta(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        let average = if elapsed > 1.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        };
        let remaining = self.estimated_total.saturating_sub(self.processed);
        if average > 0.0 && remaining > 0 {
            remaining as f64 / average
        } else {
            0.0
        }
    }
}

/// Turns the relevant Stage 2 segments into primary/secondary motion by
/// running the ROI tracker over each segment's frames.
pub struct Stage3OpticalFlowProcessor {
    source: DynFrameSource,
    config: Stage3Config,
}

impl Stage3OpticalFlowProcessor {
    pub fn new(source: DynFrameSource, config: Stage3Config) -> Self {
        Self { source, config }
    }

    fn processing_start(&self, segment: &VideoSegment) -> u64 {
        segment.start_frame_id.saturating_sub(self.config.warmup_frames)
    }

    /// Frames streamed across all relevant segments, warmup included.
    pub fn estimated_total_frames(&self, segments: &[VideoSegment]) -> u64 {
        let total = segments
            .iter()
            .filter(|segment| !segment.is_excluded_from_flow())
            .map(|segment| segment.end_frame_id - self.processing_start(segment).min(segment.end_frame_id) + 1)
            .sum::<u64>();
        if total == 0 {
            segments.len() as u64
        } else {
            total
        }
    }

    fn frame_time_ms(&self, frame_id: u64) -> f64 {
        if self.config.fps > 0.0 {
            (frame_id as f64 / self.config.fps * 1000.0).round()
        } else {
            0.0
        }
    }

    /// Processes `segments` in order. Motion modes are written back into
    /// `frames` for every annotated frame the tracker saw.
    pub async fn process_segments(
        &self,
        segments: &[VideoSegment],
        frames: &mut FrameObjectMap,
        reporter: &StageReporter,
        cancel: &CancellationToken,
    ) -> Result<Stage3Output, StageError> {
        let relevant_total = segments
            .iter()
            .filter(|segment| !segment.is_excluded_from_flow())
            .count();
        if relevant_total == 0 {
            info!("no relevant segments for optical flow");
            return Ok(Stage3Output::default());
        }

        let metadata = self.source.metadata();
        let mut tracker = RoiTracker::new(self.config.tracker.clone())
            .map_err(|err| StageError::failed(3, err.to_string()))?;
        tracker
            .initialize(&TrackerContext {
                width: metadata.width.unwrap_or(self.config.yolo_input_size),
                height: metadata.height.unwrap_or(self.config.yolo_input_size),
                fps: self.config.fps,
            })
            .map_err(|err| StageError::failed(3, err.to_string()))?;
        tracker
            .start_tracking()
            .map_err(|err| StageError::failed(3, err.to_string()))?;

        let delay_ms = self.config.tracker.delay_ms(self.config.fps);
        let yolo = self.config.yolo_input_size.max(1) as f32;
        let mut script = DualAxisFunscript::with_min_interval(self.config.min_interval_ms);
        let mut clock = RunClock::new(self.estimated_total_frames(segments));
        let mut relevant_index = 0usize;

        for (position, segment) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("stage 3 stopped before segment {}", position + 1);
                return Err(StageError::Cancelled);
            }
            if segment.is_excluded_from_flow() {
                continue;
            }
            relevant_index += 1;
            let name = segment.display_name();
            info!("processing segment {relevant_index}/{relevant_total}: {name}");
            tracker.reset_for_segment(segment);

            let start = self.processing_start(segment);
            let count = segment.end_frame_id - start.min(segment.end_frame_id) + 1;
            let segment_len = segment.frame_count();
            let report = |chunk_index: u64, clock: &RunClock| {
                reporter.stage3_progress(Stage3Progress {
                    chapter_index: relevant_index,
                    chapter_total: relevant_total,
                    chapter_name: name.clone(),
                    chunk_index,
                    chunk_total: segment_len,
                    overall_processed: clock.processed,
                    overall_total: clock.estimated_total,
                    fps: clock.instant_fps,
                    elapsed: clock.elapsed(),
                    eta: clock.eta(),
                    segment_position: position + 1,
                });
            };

            let mut stream = self.source.stream_frames(start, count, cancel.clone());
            let mut offset = 0u64;
            while let Some(item) = stream.next().await {
                if cancel.is_cancelled() {
                    info!("stage 3 stopped while streaming {name}");
                    return Err(StageError::Cancelled);
                }
                let frame = item?;
                let frame_id = frame.frame_index().unwrap_or(start + offset);
                offset += 1;
                clock.tick();

                if tracker.needs_roi_update() {
                    let scale = (frame.width() as f32 / yolo, frame.height() as f32 / yolo);
                    match frames.get(&frame_id) {
                        Some(annotation) => {
                            tracker.update_roi(frame.width(), frame.height(), annotation, segment, scale)
                        }
                        None => {
                            warn!(frame_id, "no stage 2 annotation for frame; using placeholder");
                            let placeholder = FrameObject::placeholder(frame_id);
                            tracker.update_roi(frame.width(), frame.height(), &placeholder, segment, scale);
                        }
                    }
                }

                let (primary, secondary) = tracker.track_patch(&frame);
                if tracker.roi().is_some()
                    && let Some(annotation) = frames.get_mut(&frame_id)
                {
                    annotation.motion_mode = tracker.motion_mode();
                }

                if segment.contains_frame(frame_id) {
                    let adjusted = (self.frame_time_ms(frame_id) - delay_ms).round().max(0.0) as u64;
                    script.add_action(adjusted, Some(i64::from(primary)), Some(i64::from(secondary)));
                }

                tracker.advance();
                clock.processed += 1;

                if segment.contains_frame(frame_id) {
                    let in_segment = frame_id - segment.start_frame_id + 1;
                    if in_segment % PROGRESS_EVERY_FRAMES == 0 || in_segment == segment_len {
                        report(in_segment, &clock);
                    }
                }
            }
            report(segment_len, &clock);
        }

        stop_tracker(&mut tracker);
        info!(
            primary = script.primary_actions().len(),
            frames = clock.processed,
            "optical flow finished"
        );
        Ok(Stage3Output {
            primary: script.primary_actions().to_vec(),
            secondary: script.secondary_actions().to_vec(),
            frames_processed: clock.processed,
        })
    }
}
