//! Body of the pipeline thread: Stage 1, Stage 2 and optionally Stage 3,
//! each reporting through a [`StageReporter`] and stopping at the first
//! failure or cancellation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use fungen_decoder::DynFrameSource;
use fungen_types::VideoSegment;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cache::{Stage1Plan, segments_path_beside, write_overlay, write_segments};
use super::events::{AnalysisStatus, Stage2Results, Stage3Results, StageEvent, StageReporter};
use super::modules::{
    DetectionModule, DetectionRequest, FrameObjectMap, SegmentationModule, SegmentationOutput,
    SegmentationRequest, StageError,
};
use super::routing::TrackerMode;
use super::state::SharedRunState;
use super::status::format_hms;
use crate::stage::{Stage3Config, Stage3OpticalFlowProcessor};
use crate::timeline::FrameRange;

const STAGE2_MAIN_STEPS: u64 = 3;

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// A throughput run with a frame-range override ends after Stage 1.
    StoppedAfterStage1 { max_fps: f64 },
    /// Stage 2 found nothing Stage 3 could work on.
    NothingToDo,
    Aborted { stage: u8 },
    Failed { stage: u8, message: String },
}

/// Everything the pipeline thread needs, captured when the run starts.
pub(crate) struct RunContext {
    pub video_path: PathBuf,
    pub source: DynFrameSource,
    pub fps: f64,
    pub tracker_mode: TrackerMode,
    pub detection: Arc<dyn DetectionModule>,
    pub segmentation: Arc<dyn SegmentationModule>,
    pub stage1_plan: Stage1Plan,
    pub detection_request: DetectionRequest,
    pub overlay_path: PathBuf,
    pub yolo_input_size: u32,
    /// Frames results are confined to, if any.
    pub range: Option<FrameRange>,
    pub stage3: Stage3Config,
    pub reporter: StageReporter,
    pub cancel: CancellationToken,
    pub state: SharedRunState,
}

/// Cleanup that runs however the thread exits.
pub(crate) struct RunGuard {
    state: SharedRunState,
    frame_range_override: Arc<Mutex<Option<FrameRange>>>,
    completion: Option<oneshot::Sender<RunOutcome>>,
    frames: FrameObjectMap,
    outcome: RunOutcome,
}

impl RunGuard {
    pub fn new(
        state: SharedRunState,
        frame_range_override: Arc<Mutex<Option<FrameRange>>>,
        completion: Option<oneshot::Sender<RunOutcome>>,
    ) -> Self {
        Self {
            state,
            frame_range_override,
            completion,
            frames: FrameObjectMap::new(),
            outcome: RunOutcome::Failed {
                stage: 0,
                message: "pipeline thread exited early".to_string(),
            },
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            info!(frames = self.frames.len(), "Clearing Stage 2 data map from memory");
            self.frames.clear();
        }
        *self
            .frame_range_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.state.finish();
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(self.outcome.clone());
        }
    }
}

pub(crate) fn run_full_analysis(ctx: RunContext, mut guard: RunGuard) {
    let outcome = run_stages(&ctx, &mut guard.frames);
    match &outcome {
        RunOutcome::Failed { stage, message } => error!(stage, "analysis failed: {message}"),
        RunOutcome::Aborted { stage } => warn!(stage, "analysis aborted"),
        other => info!(outcome = ?other, "analysis finished"),
    }
    guard.outcome = outcome;
}

fn run_stages(ctx: &RunContext, frames: &mut FrameObjectMap) -> RunOutcome {
    let max_fps = match run_stage1(ctx) {
        Ok(max_fps) => max_fps,
        Err(outcome) => return outcome,
    };
    if ctx.detection_request.autotune {
        info!(max_fps, "frame range override set; stopping after stage 1");
        return RunOutcome::StoppedAfterStage1 { max_fps };
    }

    let output = match run_stage2(ctx) {
        Ok(output) => output,
        Err(outcome) => return outcome,
    };

    if !ctx.tracker_mode.is_three_stage() {
        ctx.reporter.send(StageEvent::Stage2Results(Box::new(Stage2Results {
            segments: output.segments,
            primary: output.primary_actions,
            secondary: output.secondary_actions,
            was_ranged: ctx.range.is_some(),
            range: ctx.range,
        })));
        ctx.reporter.message(
            AnalysisStatus::Completed,
            format!("{} analysis completed successfully.", ctx.tracker_mode.label()),
            None,
        );
        return RunOutcome::Completed;
    }

    *frames = output.frame_objects;
    run_stage3(ctx, output.segments, frames)
}

/// Runs `work`, turning a panic into a stage failure.
fn guarded<T>(stage: u8, work: impl FnOnce() -> Result<T, StageError>) -> Result<T, StageError> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        Err(StageError::Panicked {
            stage,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

/// Marks the stages after `failed` as skipped.
fn skip_downstream(ctx: &RunContext, failed: u8) {
    let reason = format!("S{failed} Failed/Aborted");
    if failed < 2 {
        ctx.reporter.stage2_status("Skipped", reason.clone());
    }
    if failed < 3 && ctx.tracker_mode.is_three_stage() {
        ctx.reporter.stage3_status("Skipped", reason);
    }
}

fn aborted(ctx: &RunContext, stage: u8) -> RunOutcome {
    ctx.reporter.message(
        AnalysisStatus::Aborted,
        format!("Stage {stage} aborted by user."),
        Some(stage),
    );
    skip_downstream(ctx, stage);
    RunOutcome::Aborted { stage }
}

fn failed(ctx: &RunContext, stage: u8, message: String) -> RunOutcome {
    ctx.reporter
        .message(AnalysisStatus::Failed, message.clone(), Some(stage));
    skip_downstream(ctx, stage);
    RunOutcome::Failed { stage, message }
}

fn run_stage1(ctx: &RunContext) -> Result<f64, RunOutcome> {
    ctx.state.set_stage(1);
    let plan = &ctx.stage1_plan;
    if !plan.should_run {
        info!(path = %plan.path.display(), "reusing stage 1 output");
        ctx.reporter.send(StageEvent::Stage1Completed {
            elapsed: "00:00:00 (Cached)".to_string(),
            rate: "Cached".to_string(),
        });
        return Ok(0.0);
    }

    ctx.reporter.stage1_status("Running S1...", "Initializing S1...");
    let started = Instant::now();
    let result = guarded(1, || {
        ctx.detection
            .detect(&ctx.detection_request, &ctx.reporter, &ctx.cancel)
    });
    match result {
        Err(StageError::Cancelled) => {
            ctx.reporter.stage1_status("S1 Aborted by user.", "");
            Err(aborted(ctx, 1))
        }
        _ if ctx.cancel.is_cancelled() => {
            ctx.reporter.stage1_status("S1 Aborted by user.", "");
            Err(aborted(ctx, 1))
        }
        Ok(output) if !output.output_path.exists() => {
            ctx.reporter.stage1_status("S1 Failed (no output file).", "");
            Err(failed(
                ctx,
                1,
                format!("Stage 1 produced no output at {}", output.output_path.display()),
            ))
        }
        Ok(output) => {
            ctx.reporter.stage1_status(
                format!("S1 Completed. Output: {}", file_name(&output.output_path)),
                "",
            );
            ctx.reporter.send(StageEvent::Stage1Completed {
                elapsed: format_hms(started.elapsed()),
                rate: format!("{:.2} FPS", output.max_fps),
            });
            Ok(output.max_fps)
        }
        Err(err) => {
            ctx.reporter.stage1_status(format!("S1 Error - {err}"), "");
            Err(failed(ctx, 1, format!("Stage 1 failed: {err}")))
        }
    }
}

fn run_stage2(ctx: &RunContext) -> Result<SegmentationOutput, RunOutcome> {
    if ctx.cancel.is_cancelled() {
        ctx.reporter.stage2_status("S2 Aborted by user.", "");
        return Err(aborted(ctx, 2));
    }
    ctx.state.set_stage(2);
    let three_stage = ctx.tracker_mode.is_three_stage();
    ctx.reporter.stage2_status("Running S2...", "Initializing S2...");

    let reporter = ctx
        .reporter
        .clone()
        .with_stage2_main_steps(three_stage.then_some(STAGE2_MAIN_STEPS));
    let request = SegmentationRequest {
        video_path: ctx.video_path.clone(),
        stage1_path: ctx.stage1_plan.path.clone(),
        overlay_path: ctx.overlay_path.clone(),
        generate_actions: !three_stage,
        yolo_input_size: ctx.yolo_input_size,
        range: ctx.range,
        ranged_data_source: ctx.stage1_plan.ranged,
        fps: ctx.fps,
    };
    let started = Instant::now();
    let result = guarded(2, || ctx.segmentation.segment(&request, &reporter, &ctx.cancel));
    let output = match result {
        Err(StageError::Cancelled) => {
            ctx.reporter.stage2_status("S2 Aborted by user.", "");
            return Err(aborted(ctx, 2));
        }
        _ if ctx.cancel.is_cancelled() => {
            ctx.reporter.stage2_status("S2 Aborted by user.", "");
            return Err(aborted(ctx, 2));
        }
        Err(err) => {
            ctx.reporter.stage2_status(format!("S2 Failed: {err}"), "");
            return Err(failed(ctx, 2, format!("Stage 2 failed: {err}")));
        }
        Ok(output) => output,
    };

    if !output.frame_objects.is_empty() {
        if let Err(err) = write_overlay(&ctx.overlay_path, &output.frame_objects) {
            warn!("failed to write overlay: {err}");
        }
    }
    if ctx.range.is_none() {
        let segments_path = segments_path_beside(&ctx.overlay_path, &ctx.video_path);
        if let Err(err) = write_segments(&segments_path, &output.segments) {
            warn!("failed to write segment list: {err}");
        }
    }

    let status = if three_stage {
        "S2 Segmentation Completed."
    } else {
        "S2 Completed. Results Processed."
    };
    ctx.reporter.stage2_status(status, "");
    ctx.reporter.send(StageEvent::Stage2Completed {
        elapsed: format_hms(started.elapsed()),
    });
    if ctx.overlay_path.exists() {
        ctx.reporter
            .send(StageEvent::LoadOverlay(ctx.overlay_path.clone()));
    }
    info!(segments = output.segments.len(), "stage 2 finished");
    Ok(output)
}

fn run_stage3(ctx: &RunContext, segments: Vec<VideoSegment>, frames: &mut FrameObjectMap) -> RunOutcome {
    ctx.reporter.send(StageEvent::SegmentsOnly(segments.clone()));
    let relevant: Vec<VideoSegment> = segments
        .into_iter()
        .filter(|segment| !segment.is_excluded_from_flow())
        .filter(|segment| ctx.range.is_none_or(|range| range.overlaps(segment)))
        .collect();
    if relevant.is_empty() {
        ctx.reporter.stage3_status("Skipped", "No relevant segments");
        ctx.reporter.message(
            AnalysisStatus::Info,
            "No relevant segments in range for Stage 3.",
            Some(3),
        );
        return RunOutcome::NothingToDo;
    }
    if ctx.cancel.is_cancelled() {
        ctx.reporter.stage3_status("S3 Aborted by user.", "");
        return aborted(ctx, 3);
    }

    ctx.state.set_stage(3);
    ctx.reporter
        .stage3_status("Running Stage 3 (Optical Flow)...", "");
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            ctx.reporter.stage3_status(format!("S3 Failed: {err}"), "");
            return failed(ctx, 3, format!("failed to start stage 3 runtime: {err}"));
        }
    };

    let processor = Stage3OpticalFlowProcessor::new(ctx.source.clone(), ctx.stage3.clone());
    let started = Instant::now();
    let result = guarded(3, || {
        runtime.block_on(processor.process_segments(&relevant, &mut *frames, &ctx.reporter, &ctx.cancel))
    });
    let output = match result {
        Err(StageError::Cancelled) => {
            ctx.reporter.stage3_status("S3 Aborted by user.", "");
            return aborted(ctx, 3);
        }
        Err(err) => {
            ctx.reporter.stage3_status(format!("S3 Failed: {err}"), "");
            return failed(ctx, 3, format!("Stage 3 failed: {err}"));
        }
        Ok(output) => output,
    };

    let elapsed = started.elapsed();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        output.frames_processed as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    ctx.reporter.send(StageEvent::Stage3Results(Box::new(Stage3Results {
        primary: output.primary,
        secondary: output.secondary,
        range: ctx.range,
    })));
    ctx.reporter.send(StageEvent::Stage3Completed {
        elapsed: format_hms(elapsed),
        rate: format!("{rate:.1} FPS"),
    });

    match write_overlay(&ctx.overlay_path, frames) {
        Ok(()) => ctx
            .reporter
            .send(StageEvent::LoadOverlay(ctx.overlay_path.clone())),
        Err(err) => warn!("failed to rewrite overlay with motion modes: {err}"),
    }
    ctx.reporter.message(
        AnalysisStatus::Completed,
        format!("{} analysis completed successfully.", ctx.tracker_mode.label()),
        None,
    );
    RunOutcome::Completed
}
