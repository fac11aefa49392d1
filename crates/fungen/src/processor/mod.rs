//! The staged analysis orchestrator.
//!
//! Heavy work runs on background threads; everything that touches the
//! timeline happens in [`AppStageProcessor::process_gui_events`] on the
//! owning thread.

pub mod cache;
pub mod events;
pub mod modules;
pub mod refinement;
pub mod routing;
pub mod run;
pub mod state;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fungen_decoder::DynFrameSource;
use fungen_funscript::document::save_dual;
use fungen_types::VideoSegment;
use tokio::sync::oneshot;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::settings::{EffectiveSettings, Stage1Settings, Stage3Settings};
use crate::stage::{LumaSceneDetector, SceneDetector, Stage3Config};
use crate::timeline::{FrameRange, FunscriptTimeline};
use cache::{overlay_path, plan_stage1, read_overlay};
use events::{AnalysisStatus, EventReceiver, EventSender, StageEvent, StageReporter, event_channel};
use modules::{DetectionModule, DetectionRequest, FrameObjectMap, SegmentationModule, StartError};
use refinement::{RefinementConfig, refine_chapter};
use routing::{ChapterPolicy, OutputTarget, ResultSource, RoutingPolicy, TrackerMode, TrackingAxisMode};
use run::{RunContext, RunGuard, RunOutcome, run_full_analysis};
use state::SharedRunState;
use status::StatusBoard;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);
const FALLBACK_FPS: f64 = 30.0;

/// Orchestrator settings taken from [`EffectiveSettings`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub output_folder: PathBuf,
    pub tracker_mode: TrackerMode,
    pub tracking_axis_mode: TrackingAxisMode,
    pub output_target: OutputTarget,
    pub force_rerun_stage1: bool,
    pub chapter_policy: ChapterPolicy,
    pub stage1: Stage1Settings,
    pub stage3: Stage3Settings,
    pub min_interval_ms: u64,
    pub refinement: RefinementConfig,
    pub scene_detection: LumaSceneDetector,
}

impl ProcessorConfig {
    pub fn from_settings(settings: &EffectiveSettings) -> Self {
        Self {
            output_folder: settings.output_folder.clone(),
            tracker_mode: settings.tracker_mode,
            tracking_axis_mode: settings.tracking_axis_mode,
            output_target: settings.output_target,
            force_rerun_stage1: settings.force_rerun_stage1,
            chapter_policy: settings.chapter_policy,
            stage1: settings.stage1.clone(),
            stage3: settings.stage3.clone(),
            min_interval_ms: settings.min_interval_ms,
            refinement: settings.refinement,
            scene_detection: settings.scene_detection,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_settings(&EffectiveSettings::default())
    }
}

/// Per-run knobs for [`AppStageProcessor::start_full_analysis`].
#[derive(Debug, Default)]
pub struct AnalysisOptions {
    /// Restricts Stage 1 to these frames and stops after it.
    pub frame_range_override: Option<FrameRange>,
    pub producers: Option<usize>,
    pub consumers: Option<usize>,
    /// Fired once the pipeline thread has fully unwound.
    pub completion: Option<oneshot::Sender<RunOutcome>>,
}

struct LoadedVideo {
    path: PathBuf,
    source: DynFrameSource,
    fps: f64,
}

struct BackgroundJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundJob {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

fn job_running(job: &Option<BackgroundJob>) -> bool {
    job.as_ref().is_some_and(BackgroundJob::is_running)
}

/// Default Stage 1 worker counts for the available parallelism.
pub fn default_worker_counts(cpus: usize) -> (usize, usize) {
    if cpus > 4 {
        let half = cpus / 2;
        let producers = half.saturating_sub(2).clamp(1, 5);
        let consumers = (half + 2).clamp(1, 9);
        (producers, consumers)
    } else {
        (1, 1)
    }
}

pub struct AppStageProcessor {
    config: ProcessorConfig,
    detection: Option<Arc<dyn DetectionModule>>,
    segmentation: Option<Arc<dyn SegmentationModule>>,
    scene_detector: Arc<dyn SceneDetector>,
    video: Option<LoadedVideo>,
    timeline: FunscriptTimeline,
    status: StatusBoard,
    overlay: Option<Arc<FrameObjectMap>>,
    output_path: Option<PathBuf>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    run_state: SharedRunState,
    frame_range_override: Arc<Mutex<Option<FrameRange>>>,
    stage_thread: Option<JoinHandle<()>>,
    refinement_job: Option<BackgroundJob>,
    scene_job: Option<BackgroundJob>,
}

impl AppStageProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let (events_tx, events_rx) = event_channel();
        let scene_detector: Arc<dyn SceneDetector> = Arc::new(config.scene_detection);
        let timeline = FunscriptTimeline::new(FALLBACK_FPS, 0, config.min_interval_ms);
        Self {
            config,
            detection: None,
            segmentation: None,
            scene_detector,
            video: None,
            timeline,
            status: StatusBoard::default(),
            overlay: None,
            output_path: None,
            events_tx,
            events_rx,
            run_state: SharedRunState::new(),
            frame_range_override: Arc::new(Mutex::new(None)),
            stage_thread: None,
            refinement_job: None,
            scene_job: None,
        }
    }

    pub fn with_modules(
        mut self,
        detection: Arc<dyn DetectionModule>,
        segmentation: Arc<dyn SegmentationModule>,
    ) -> Self {
        self.detection = Some(detection);
        self.segmentation = Some(segmentation);
        self
    }

    pub fn with_scene_detector(mut self, detector: Arc<dyn SceneDetector>) -> Self {
        self.scene_detector = detector;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Makes `path` the current video. The timeline is rebuilt for its
    /// frame rate and length; chapters and actions start empty.
    pub fn load_video(&mut self, path: impl Into<PathBuf>, source: DynFrameSource) {
        let path = path.into();
        let metadata = source.metadata();
        let fps = match metadata.fps {
            Some(fps) if fps > 0.0 => fps,
            _ => {
                warn!(path = %path.display(), "video fps unknown; assuming {FALLBACK_FPS}");
                FALLBACK_FPS
            }
        };
        let total_frames = metadata.calculate_total_frames().unwrap_or(0);
        info!(path = %path.display(), fps, total_frames, "loaded video");
        self.timeline = FunscriptTimeline::new(fps, total_frames, self.config.min_interval_ms);
        self.overlay = None;
        self.status.reset();
        self.video = Some(LoadedVideo { path, source, fps });
    }

    pub fn video_path(&self) -> Option<&Path> {
        self.video.as_ref().map(|video| video.path.as_path())
    }

    pub fn timeline(&self) -> &FunscriptTimeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut FunscriptTimeline {
        &mut self.timeline
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Stage 2 annotations of the last run, if loaded.
    pub fn overlay(&self) -> Option<&FrameObjectMap> {
        self.overlay.as_deref()
    }

    /// Where completed analyses are saved. Nothing is written when unset.
    pub fn set_output_path(&mut self, path: Option<PathBuf>) {
        self.output_path = path;
    }

    /// 0 idle, 1-3 running that stage, -1 aborting.
    pub fn current_analysis_stage(&self) -> i8 {
        self.run_state.stage_code()
    }

    /// The frame range the running analysis is restricted to. Cleared when
    /// the pipeline thread unwinds.
    pub fn frame_range_override(&self) -> Option<FrameRange> {
        *self
            .frame_range_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_analysis_running(&self) -> bool {
        self.run_state.is_active()
    }

    pub fn is_refinement_running(&self) -> bool {
        job_running(&self.refinement_job)
    }

    pub fn is_scene_detection_running(&self) -> bool {
        job_running(&self.scene_job)
    }

    fn ensure_model(path: Option<&Path>, required: bool) -> Result<(), StartError> {
        match path {
            Some(path) if !path.exists() => Err(StartError::ModelMissing {
                path: path.to_path_buf(),
            }),
            None if required => Err(StartError::ModelMissing {
                path: PathBuf::new(),
            }),
            _ => Ok(()),
        }
    }

    /// Validates the setup and spawns the Stage 1 → 2 → 3 pipeline thread.
    pub fn start_full_analysis(&mut self, options: AnalysisOptions) -> Result<(), StartError> {
        let Some(video) = self.video.as_ref() else {
            error!("cannot start analysis: no video loaded");
            return Err(StartError::NoVideoLoaded);
        };
        if self.run_state.is_active()
            || job_running(&self.refinement_job)
            || job_running(&self.scene_job)
        {
            warn!("analysis already running; start request ignored");
            return Err(StartError::AlreadyRunning);
        }
        let detection = self
            .detection
            .clone()
            .ok_or(StartError::ModuleUnavailable("detection"))?;
        let segmentation = self
            .segmentation
            .clone()
            .ok_or(StartError::ModuleUnavailable("segmentation"))?;
        let stage1 = &self.config.stage1;
        if detection.requires_model() {
            Self::ensure_model(stage1.det_model.as_deref(), true)?;
            Self::ensure_model(stage1.pose_model.as_deref(), false)?;
        }

        let override_range = options.frame_range_override;
        let plan = plan_stage1(
            &self.config.output_folder,
            &video.path,
            override_range,
            self.timeline.scripting_range(),
            self.config.force_rerun_stage1,
        );
        let range = override_range.or_else(|| self.timeline.effective_scripting_range());

        self.status.reset_stages();
        self.status.last_message = None;
        if plan.should_run {
            self.status.stage1.status = "Queued...".to_string();
        } else {
            let file = plan
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.status.stage1.status = format!("Using existing: {file}");
            self.status.stage1.progress = 1.0;
        }
        self.status.stage2.status = "Queued...".to_string();
        if self.config.tracker_mode.is_three_stage() {
            self.status.stage3.status = "Queued...".to_string();
        }

        let cpus = thread::available_parallelism().map_or(1, |count| count.get());
        let (default_producers, default_consumers) = default_worker_counts(cpus);
        let producers = options
            .producers
            .or(stage1.producers)
            .unwrap_or(default_producers)
            .max(1);
        let consumers = options
            .consumers
            .or(stage1.consumers)
            .unwrap_or(default_consumers)
            .max(1);

        let cancel = CancellationToken::new();
        if !self.run_state.try_start(cancel.clone()) {
            return Err(StartError::AlreadyRunning);
        }
        *self
            .frame_range_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = override_range;

        let detection_request = DetectionRequest {
            video_path: video.path.clone(),
            det_model: stage1.det_model.clone(),
            pose_model: stage1.pose_model.clone(),
            confidence_threshold: stage1.confidence_threshold,
            yolo_input_size: stage1.yolo_input_size,
            hwaccel: stage1.hwaccel.clone(),
            frame_range: override_range,
            output_path: plan.path.clone(),
            producers,
            consumers,
            autotune: override_range.is_some(),
        };
        let ctx = RunContext {
            video_path: video.path.clone(),
            source: video.source.clone(),
            fps: video.fps,
            tracker_mode: self.config.tracker_mode,
            detection,
            segmentation,
            stage1_plan: plan,
            detection_request,
            overlay_path: overlay_path(&self.config.output_folder, &video.path),
            yolo_input_size: stage1.yolo_input_size,
            range,
            stage3: Stage3Config {
                warmup_frames: self.config.stage3.warmup_frames,
                fps: video.fps,
                yolo_input_size: stage1.yolo_input_size,
                min_interval_ms: self.config.min_interval_ms,
                tracker: self.config.stage3.tracker.clone(),
            },
            reporter: StageReporter::new(self.events_tx.clone()),
            cancel,
            state: self.run_state.clone(),
        };
        let guard = RunGuard::new(
            self.run_state.clone(),
            Arc::clone(&self.frame_range_override),
            options.completion,
        );

        info!(
            video = %ctx.video_path.display(),
            mode = self.config.tracker_mode.as_str(),
            producers,
            consumers,
            "starting full analysis"
        );
        let handle = thread::Builder::new()
            .name("fungen-pipeline".to_string())
            .spawn(move || run_full_analysis(ctx, guard))
            .map_err(|err| {
                self.run_state.finish();
                StartError::ThreadSpawn(err)
            })?;
        self.stage_thread = Some(handle);
        Ok(())
    }

    /// Cancels the full run, or scene detection when no run is alive.
    pub fn abort_stage_processing(&mut self) {
        if self.run_state.abort() {
            info!("abort requested for analysis pipeline");
        } else if let Some(job) = self.scene_job.as_ref().filter(|job| job.is_running()) {
            info!("abort requested for scene detection");
            job.cancel.cancel();
        } else {
            info!("No analysis pipeline running to abort.");
        }
    }

    /// Drains queued events and applies them. Never blocks; returns the
    /// number of events handled.
    pub fn process_gui_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        self.reap_jobs();
        handled
    }

    fn reap_jobs(&mut self) {
        if self.refinement_job.as_ref().is_some_and(|job| !job.is_running()) {
            self.refinement_job = None;
        }
        if self.scene_job.as_ref().is_some_and(|job| !job.is_running()) {
            self.scene_job = None;
        }
        if self
            .stage_thread
            .as_ref()
            .is_some_and(JoinHandle::is_finished)
            && let Some(handle) = self.stage_thread.take()
            && handle.join().is_err()
        {
            error!("pipeline thread panicked outside a stage");
        }
    }

    fn range_bounds(&self, range: Option<FrameRange>) -> Option<(u64, u64)> {
        range.map(|range| {
            (
                self.timeline.frame_to_ms(range.start),
                self.timeline.frame_to_ms(range.end),
            )
        })
    }

    fn routing(&self) -> RoutingPolicy {
        RoutingPolicy::new(self.config.tracking_axis_mode, self.config.output_target)
    }

    fn apply_segments(&mut self, segments: Vec<VideoSegment>) {
        if self.config.chapter_policy.replaces_chapters() {
            info!(count = segments.len(), "replacing chapters with computed segments");
            self.timeline.set_chapters(segments);
        } else if self.timeline.chapters().is_empty() {
            info!(count = segments.len(), "no existing chapters; using computed segments");
            self.timeline.set_chapters(segments);
        } else {
            info!(
                kept = self.timeline.chapters().len(),
                discarded = segments.len(),
                "keeping existing chapters"
            );
        }
    }

    fn handle_event(&mut self, event: StageEvent) {
        match event {
            StageEvent::Stage1Progress(progress) => self.status.stage1.apply_progress(&progress),
            StageEvent::Stage1Status { status, label } => {
                self.status.stage1.status = status;
                self.status.stage1.label = label;
            }
            StageEvent::Stage1Completed { elapsed, rate } => {
                let stage1 = &mut self.status.stage1;
                stage1.time_elapsed = elapsed;
                stage1.fps = rate;
                stage1.progress = 1.0;
                stage1.eta = "Done".to_string();
            }
            StageEvent::QueueUpdate {
                frame_queue,
                result_queue,
            } => {
                self.status.stage1.frame_queue = frame_queue;
                self.status.stage1.result_queue = result_queue;
            }
            StageEvent::Stage2DualProgress { main, sub } => {
                self.status.stage2.apply_progress(&main, &sub);
            }
            StageEvent::Stage2Status { status, label } => {
                self.status.stage2.status = status;
                self.status.stage2.main_label = label;
            }
            StageEvent::Stage2Completed { elapsed } => {
                self.status.stage2.time_elapsed = elapsed;
                self.status.stage2.main_progress = 1.0;
            }
            StageEvent::Stage2Results(results) => {
                let results = *results;
                self.apply_segments(results.segments);
                let bounds = if results.was_ranged {
                    self.range_bounds(results.range)
                } else {
                    None
                };
                self.routing()
                    .route(ResultSource::Stage2, results.primary, results.secondary)
                    .apply(&mut self.timeline, bounds, ResultSource::Stage2);
            }
            StageEvent::SegmentsOnly(segments) => self.apply_segments(segments),
            StageEvent::LoadOverlay(path) => match read_overlay(&path) {
                Ok(frames) => {
                    debug!(path = %path.display(), frames = frames.len(), "loaded overlay");
                    self.overlay = Some(Arc::new(frames));
                }
                Err(err) => warn!("failed to load overlay: {err}"),
            },
            StageEvent::Stage3Progress(progress) => self.status.stage3.apply_progress(&progress),
            StageEvent::Stage3Status { status, label } => {
                self.status.stage3.status = status;
                self.status.stage3.chapter_label = label;
            }
            StageEvent::Stage3Completed { elapsed, rate } => {
                let stage3 = &mut self.status.stage3;
                stage3.time_elapsed = elapsed;
                stage3.fps = rate;
                stage3.overall_progress = 1.0;
                stage3.chapter_progress = 1.0;
                stage3.eta = "Done".to_string();
            }
            StageEvent::Stage3Results(results) => {
                let results = *results;
                let bounds = self.range_bounds(results.range);
                self.routing()
                    .route(ResultSource::Stage3, results.primary, results.secondary)
                    .apply(&mut self.timeline, bounds, ResultSource::Stage3);
                self.status.stage3.status = "Stage 3 Completed.".to_string();
            }
            StageEvent::AnalysisMessage {
                status,
                message,
                stage,
            } => self.handle_message(status, message, stage),
            StageEvent::RefinementCompleted { chapter, actions } => {
                info!(chapter = %chapter.display_name(), points = actions.len(), "applying refinement");
                self.timeline.apply_interactive_refinement(&chapter, &actions);
                self.status.last_message = Some(format!("Refined {}", chapter.display_name()));
            }
            StageEvent::SceneDetectionFinished { scenes } => {
                info!(scenes = scenes.len(), "scene detection finished");
                self.status.scenes.status = "Completed".to_string();
                self.status.scenes.scenes_found = scenes.len();
                self.timeline.set_chapters(scenes);
            }
            StageEvent::External { kind, payload } => {
                warn!(kind, payload = %payload, "unhandled external stage event");
            }
        }
    }

    fn handle_message(&mut self, status: AnalysisStatus, message: String, stage: Option<u8>) {
        let scene_job_alive = self.scene_job.is_some();
        match status {
            AnalysisStatus::Completed => {
                info!("{message}");
                if stage.is_none() && !scene_job_alive {
                    self.save_output();
                }
                self.status.last_message = Some(message);
            }
            AnalysisStatus::Aborted => {
                warn!("{message}");
                if stage.is_none() && scene_job_alive {
                    self.status.scenes.status = "Aborted".to_string();
                }
                self.status.last_message = Some(
                    stage.map_or(message, |stage| format!("S{stage} Aborted.")),
                );
            }
            AnalysisStatus::Failed => {
                error!("{message}");
                if stage.is_none() && scene_job_alive {
                    self.status.scenes.status = "Failed".to_string();
                }
                self.status.last_message = Some(
                    stage.map_or(message, |stage| format!("S{stage} Failed.")),
                );
            }
            AnalysisStatus::Info => {
                info!("{message}");
                self.status.last_message = Some(message);
            }
        }
    }

    fn save_output(&self) {
        let Some(path) = self.output_path.as_deref() else {
            return;
        };
        match save_dual(self.timeline.script(), path) {
            Ok(written) => {
                for file in written {
                    info!(path = %file.display(), "saved funscript");
                }
            }
            Err(err) => error!(path = %path.display(), "failed to save funscript: {err}"),
        }
    }

    /// Refines one chapter from the loaded overlay on a background thread.
    pub fn start_interactive_refinement_analysis(
        &mut self,
        chapter: VideoSegment,
        track_id: i64,
    ) -> Result<(), StartError> {
        let Some(video) = self.video.as_ref() else {
            return Err(StartError::NoVideoLoaded);
        };
        if self.run_state.is_active()
            || job_running(&self.refinement_job)
            || job_running(&self.scene_job)
        {
            warn!("another analysis is running; refinement request ignored");
            return Err(StartError::AlreadyRunning);
        }
        let frames = self.overlay.clone().ok_or(StartError::NoOverlayData)?;

        let fps = video.fps;
        let yolo_input_size = self.config.stage1.yolo_input_size;
        let config = self.config.refinement;
        let reporter = StageReporter::new(self.events_tx.clone());
        let cancel = CancellationToken::new();
        let job_cancel = cancel.clone();
        info!(chapter = %chapter.display_name(), track_id, "starting interactive refinement");
        let handle = thread::Builder::new()
            .name("fungen-refinement".to_string())
            .spawn(move || {
                let refined =
                    refine_chapter(&frames, &chapter, track_id, fps, yolo_input_size, &config);
                if cancel.is_cancelled() {
                    reporter.message(AnalysisStatus::Aborted, "Refinement aborted.", None);
                    return;
                }
                match refined {
                    Some(actions) => reporter.send(StageEvent::RefinementCompleted { chapter, actions }),
                    None => reporter.message(
                        AnalysisStatus::Info,
                        format!("Track {track_id} not found in {}.", chapter.display_name()),
                        None,
                    ),
                }
            })
            .map_err(StartError::ThreadSpawn)?;
        self.refinement_job = Some(BackgroundJob {
            cancel: job_cancel,
            handle,
        });
        Ok(())
    }

    /// Detects scene cuts on a background thread and replaces the chapters
    /// with one chapter per scene.
    pub fn start_scene_detection_analysis(&mut self, threshold: Option<f64>) -> Result<(), StartError> {
        let Some(video) = self.video.as_ref() else {
            return Err(StartError::NoVideoLoaded);
        };
        if self.run_state.is_active()
            || job_running(&self.refinement_job)
            || job_running(&self.scene_job)
        {
            warn!("another analysis is running; scene detection request ignored");
            return Err(StartError::AlreadyRunning);
        }

        let detector: Arc<dyn SceneDetector> = match threshold {
            Some(threshold) => Arc::new(LumaSceneDetector {
                threshold,
                ..self.config.scene_detection
            }),
            None => Arc::clone(&self.scene_detector),
        };
        let source = video.source.clone();
        let reporter = StageReporter::new(self.events_tx.clone());
        let cancel = CancellationToken::new();
        let job_cancel = cancel.clone();
        self.status.scenes.status = "Running...".to_string();
        self.status.scenes.scenes_found = 0;
        info!(detector = detector.name(), "starting scene detection");

        let handle = thread::Builder::new()
            .name("fungen-scenes".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        reporter.message(
                            AnalysisStatus::Failed,
                            format!("Scene detection failed: {err}"),
                            None,
                        );
                        return;
                    }
                };
                match runtime.block_on(detector.detect(source, cancel.clone())) {
                    Ok(_) if cancel.is_cancelled() => {
                        reporter.message(AnalysisStatus::Aborted, "Scene detection aborted.", None);
                    }
                    Ok(scenes) => reporter.send(StageEvent::SceneDetectionFinished { scenes }),
                    Err(err) if err.is_cancelled() => {
                        reporter.message(AnalysisStatus::Aborted, "Scene detection aborted.", None);
                    }
                    Err(err) => reporter.message(
                        AnalysisStatus::Failed,
                        format!("Scene detection failed: {err}"),
                        None,
                    ),
                }
            })
            .map_err(|err| {
                self.status.scenes.status = "Failed".to_string();
                StartError::ThreadSpawn(err)
            })?;
        self.scene_job = Some(BackgroundJob {
            cancel: job_cancel,
            handle,
        });
        Ok(())
    }

    /// Cancels every background thread and waits up to five seconds for
    /// the pipeline thread to exit.
    pub fn shutdown_app_threads(&mut self) {
        self.run_state.abort();
        for job in [self.refinement_job.as_ref(), self.scene_job.as_ref()]
            .into_iter()
            .flatten()
        {
            job.cancel.cancel();
        }

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        let handles = [
            self.stage_thread.take(),
            self.refinement_job.take().map(|job| job.handle),
            self.scene_job.take().map(|job| job.handle),
        ];
        for handle in handles.into_iter().flatten() {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(SHUTDOWN_POLL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("background thread panicked during shutdown");
                }
            } else {
                warn!("background thread did not exit within {SHUTDOWN_TIMEOUT:?}; detaching");
            }
        }
        self.process_gui_events();
    }
}

impl Drop for AppStageProcessor {
    fn drop(&mut self) {
        if self.stage_thread.is_some() || self.refinement_job.is_some() || self.scene_job.is_some() {
            self.shutdown_app_threads();
        }
    }
}
