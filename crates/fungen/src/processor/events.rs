//! Messages posted by background analysis threads and drained on the
//! owning thread by [`crate::processor::AppStageProcessor::process_gui_events`].

use std::path::PathBuf;
use std::time::Duration;

use fungen_types::{Action, VideoSegment};
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

use crate::timeline::FrameRange;

pub type EventSender = UnboundedSender<StageEvent>;
pub type EventReceiver = UnboundedReceiver<StageEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    unbounded_channel()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage1Progress {
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub elapsed: Duration,
    pub avg_fps: f64,
    pub instant_fps: f64,
    /// Seconds remaining; not finite while still estimating.
    pub eta: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepProgress {
    pub current: i64,
    pub total: u64,
    pub name: String,
}

impl StepProgress {
    pub fn new(current: i64, total: u64, name: impl Into<String>) -> Self {
        Self {
            current,
            total,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage3Progress {
    pub chapter_index: usize,
    pub chapter_total: usize,
    pub chapter_name: String,
    pub chunk_index: u64,
    pub chunk_total: u64,
    pub overall_processed: u64,
    pub overall_total: u64,
    pub fps: f64,
    pub elapsed: Duration,
    pub eta: f64,
    /// 1-based index into the unfiltered segment list.
    pub segment_position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage2Results {
    pub segments: Vec<VideoSegment>,
    pub primary: Vec<Action>,
    pub secondary: Vec<Action>,
    pub was_ranged: bool,
    pub range: Option<FrameRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage3Results {
    pub primary: Vec<Action>,
    pub secondary: Vec<Action>,
    pub range: Option<FrameRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Completed,
    Aborted,
    Failed,
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Stage1Progress(Stage1Progress),
    Stage1Status {
        status: String,
        label: String,
    },
    Stage1Completed {
        elapsed: String,
        rate: String,
    },
    QueueUpdate {
        frame_queue: usize,
        result_queue: usize,
    },
    Stage2DualProgress {
        main: StepProgress,
        sub: StepProgress,
    },
    Stage2Status {
        status: String,
        label: String,
    },
    Stage2Completed {
        elapsed: String,
    },
    Stage2Results(Box<Stage2Results>),
    SegmentsOnly(Vec<VideoSegment>),
    LoadOverlay(PathBuf),
    Stage3Progress(Stage3Progress),
    Stage3Status {
        status: String,
        label: String,
    },
    Stage3Completed {
        elapsed: String,
        rate: String,
    },
    Stage3Results(Box<Stage3Results>),
    AnalysisMessage {
        status: AnalysisStatus,
        message: String,
        stage: Option<u8>,
    },
    RefinementCompleted {
        chapter: VideoSegment,
        actions: Vec<Action>,
    },
    SceneDetectionFinished {
        scenes: Vec<VideoSegment>,
    },
    /// Posted by third-party stage modules; logged and otherwise ignored.
    External {
        kind: String,
        payload: Value,
    },
}

/// Cloneable handle stage code uses to report back to the owning thread.
#[derive(Debug, Clone)]
pub struct StageReporter {
    sender: EventSender,
    stage2_main_steps: Option<u64>,
}

impl StageReporter {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender,
            stage2_main_steps: None,
        }
    }

    /// Rescales Stage 2 main-step progress onto a fixed number of steps.
    pub fn with_stage2_main_steps(mut self, steps: Option<u64>) -> Self {
        self.stage2_main_steps = steps;
        self
    }

    pub fn send(&self, event: StageEvent) {
        if self.sender.send(event).is_err() {
            debug!("event receiver dropped; discarding stage event");
        }
    }

    pub fn stage1_progress(&self, progress: Stage1Progress) {
        self.send(StageEvent::Stage1Progress(progress));
    }

    pub fn stage1_status(&self, status: impl Into<String>, label: impl Into<String>) {
        self.send(StageEvent::Stage1Status {
            status: status.into(),
            label: label.into(),
        });
    }

    pub fn queue_update(&self, frame_queue: usize, result_queue: usize) {
        self.send(StageEvent::QueueUpdate {
            frame_queue,
            result_queue,
        });
    }

    /// Reports Stage 2 progress.
    ///
    /// A main step with a name but no numeric progress is reported as
    /// `(-1, 0, name)` so the status board keeps its label without a bar.
    pub fn stage2_progress(&self, main: StepProgress, sub: StepProgress) {
        let main = match self.stage2_main_steps {
            Some(steps) if main.total > 0 && main.current >= 0 => {
                let scaled = (main.current as f64 / main.total as f64 * steps as f64) as i64;
                StepProgress::new(scaled.min(steps as i64), steps, main.name)
            }
            _ => main,
        };
        self.send(StageEvent::Stage2DualProgress { main, sub });
    }

    pub fn stage2_step(&self, name: impl Into<String>, sub: StepProgress) {
        self.send(StageEvent::Stage2DualProgress {
            main: StepProgress::new(-1, 0, name),
            sub,
        });
    }

    pub fn stage2_status(&self, status: impl Into<String>, label: impl Into<String>) {
        self.send(StageEvent::Stage2Status {
            status: status.into(),
            label: label.into(),
        });
    }

    pub fn stage3_progress(&self, progress: Stage3Progress) {
        self.send(StageEvent::Stage3Progress(progress));
    }

    pub fn stage3_status(&self, status: impl Into<String>, label: impl Into<String>) {
        self.send(StageEvent::Stage3Status {
            status: status.into(),
            label: label.into(),
        });
    }

    pub fn message(&self, status: AnalysisStatus, message: impl Into<String>, stage: Option<u8>) {
        self.send(StageEvent::AnalysisMessage {
            status,
            message: message.into(),
            stage,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn three_stage_reporter_rescales_main_step() {
        let (tx, mut rx) = event_channel();
        let reporter = StageReporter::new(tx).with_stage2_main_steps(Some(3));
        reporter.stage2_progress(StepProgress::new(4, 6, "Tracking"), StepProgress::new(1, 2, "x"));
        reporter.stage2_progress(StepProgress::new(6, 6, "Done"), StepProgress::new(2, 2, "x"));

        assert_matches!(
            rx.try_recv(),
            Ok(StageEvent::Stage2DualProgress { main, .. }) if main == StepProgress::new(2, 3, "Tracking")
        );
        assert_matches!(
            rx.try_recv(),
            Ok(StageEvent::Stage2DualProgress { main, .. }) if main.current == 3 && main.total == 3
        );
    }

    #[test]
    fn named_step_has_no_numeric_progress() {
        let (tx, mut rx) = event_channel();
        StageReporter::new(tx).stage2_step("Saving", StepProgress::new(0, 1, "Starting"));
        assert_matches!(
            rx.try_recv(),
            Ok(StageEvent::Stage2DualProgress { main, .. }) if main.current == -1 && main.name == "Saving"
        );
    }

    #[test]
    fn sending_after_receiver_drop_is_silent() {
        let (tx, rx) = event_channel();
        drop(rx);
        StageReporter::new(tx).stage1_status("Running S1...", "");
    }
}
