use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fungen::backend::{DecoderPlan, display_available_backends, open_source};
use fungen::cli::{AnalyzeArgs, Command, FilterArgs, PluginArgs, ScenesArgs, StatsArgs, parse_cli};
use fungen::edit::{apply_edit, params_from_pairs, preview_edit, selection_for};
use fungen::processor::cache::funscript_path;
use fungen::processor::modules::{StageError, StartError};
use fungen::processor::run::RunOutcome;
use fungen::processor::{AnalysisOptions, AppStageProcessor, ProcessorConfig};
use fungen::settings::{ConfigError, EffectiveSettings, resolve_settings};
use fungen::stage::progress::{PipelineProgress, spinner};
use fungen::stage::{CachedDetection, LumaSceneDetector, OverlayReplaySegmentation, SceneDetector};
use fungen::timeline::{FrameRange, ScriptingRange};
use fungen_decoder::FrameError;
use fungen_funscript::document::{load_dual, save_dual};
use fungen_funscript::{Axis, AxisSelection, FunscriptError, PluginError, PluginRegistry};
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Decoder(#[from] FrameError),
    #[error(transparent)]
    Funscript(#[from] FunscriptError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Start(#[from] StartError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("analysis {0}")]
    Analysis(String),
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fungen=info,fungen_funscript=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), CliError> {
    init_tracing();
    let (cli, sources) = parse_cli();
    let settings = resolve_settings(&cli, &sources)?;

    match cli.command {
        Command::Analyze(args) => run_analyze(&settings, args).await,
        Command::Filter(args) => run_filter(&settings, args),
        Command::Plugin(args) => run_plugin(&settings, args),
        Command::Stats(args) => run_stats(&settings, args),
        Command::Scenes(args) => run_scenes(&settings, args).await,
        Command::Backends => {
            display_available_backends();
            Ok(())
        }
    }
}

async fn run_analyze(settings: &EffectiveSettings, args: AnalyzeArgs) -> Result<(), CliError> {
    let plan = DecoderPlan::from_settings(settings, &args.video)?;
    let source = open_source(&plan)?;

    let mut processor = AppStageProcessor::new(ProcessorConfig::from_settings(settings))
        .with_modules(Arc::new(CachedDetection), Arc::new(OverlayReplaySegmentation));
    processor.load_video(args.video.clone(), source);
    if let Some(script) = args.script.as_deref() {
        *processor.timeline_mut().script_mut() = load_dual(script, settings.min_interval_ms)?;
        info!(path = %script.display(), "loaded starting funscript");
    }
    if let Some(range) = args.range {
        processor
            .timeline_mut()
            .set_scripting_range(Some(ScriptingRange::new(range.start, range.end)));
    }
    let last_frame = processor.timeline().total_frames().saturating_sub(1);
    let frame_range_override = args
        .frame_range
        .map(|span| FrameRange::new(span.start, span.end.unwrap_or(last_frame)));
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| funscript_path(&settings.output_folder, &args.video));
    if frame_range_override.is_none() {
        processor.set_output_path(Some(output.clone()));
    }

    let (completion_tx, mut completion_rx) = oneshot::channel();
    processor.start_full_analysis(AnalysisOptions {
        frame_range_override,
        producers: args.producers,
        consumers: args.consumers,
        completion: Some(completion_tx),
    })?;

    let mut progress = PipelineProgress::new(settings.tracker_mode.is_three_stage());
    let mut ticker = tokio::time::interval(EVENT_POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut aborting = false;
    let outcome = loop {
        tokio::select! {
            result = &mut completion_rx => break result.ok(),
            _ = &mut ctrl_c, if !aborting => {
                warn!("interrupt received; aborting analysis");
                processor.abort_stage_processing();
                aborting = true;
            }
            _ = ticker.tick() => {
                processor.process_gui_events();
                progress.render(processor.status());
            }
        }
    };
    processor.process_gui_events();
    progress.finish(processor.status());

    match outcome {
        Some(RunOutcome::Completed) => {
            println!("wrote {}", output.display());
            Ok(())
        }
        Some(RunOutcome::StoppedAfterStage1 { max_fps }) => {
            println!("stage 1 peak throughput: {max_fps:.2} FPS");
            Ok(())
        }
        Some(RunOutcome::NothingToDo) => {
            println!("no relevant segments to analyze");
            Ok(())
        }
        Some(RunOutcome::Aborted { stage }) => Err(CliError::Analysis(format!("aborted in stage {stage}"))),
        Some(RunOutcome::Failed { stage, message }) => {
            Err(CliError::Analysis(format!("failed in stage {stage}: {message}")))
        }
        None => Err(CliError::Analysis("thread exited without reporting".to_string())),
    }
}

fn run_filter(settings: &EffectiveSettings, args: FilterArgs) -> Result<(), CliError> {
    let mut script = load_dual(&args.input, settings.min_interval_ms)?;
    let params = params_from_pairs(&args.params);
    let selection = selection_for(args.time_range);
    let axes: AxisSelection = args.axis.into();

    if args.preview {
        let report = preview_edit(
            &script,
            args.filter,
            axes,
            &params,
            &selection,
            &settings.speed_limiter,
        )?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let changed = apply_edit(
        &mut script,
        args.filter,
        axes,
        &params,
        &selection,
        &settings.speed_limiter,
    )?;
    if !changed {
        warn!(filter = ?args.filter, "filter left the script unchanged");
    }
    let output = args.output.as_deref().unwrap_or(args.input.as_path());
    write_script(&script, output)
}

fn run_plugin(settings: &EffectiveSettings, args: PluginArgs) -> Result<(), CliError> {
    let registry = PluginRegistry::with_builtin();
    let plugin = registry.get(&args.name)?;
    let mut script = load_dual(&args.input, settings.min_interval_ms)?;
    let params = params_from_pairs(&args.params);
    let axes: AxisSelection = args.axis.into();

    if args.preview {
        let preview = plugin.get_preview(&script, axes, &params);
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }
    plugin.transform(&mut script, axes, &params)?;
    let output = args.output.as_deref().unwrap_or(args.input.as_path());
    write_script(&script, output)
}

fn write_script(script: &fungen_funscript::DualAxisFunscript, output: &Path) -> Result<(), CliError> {
    for path in save_dual(script, output)? {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn run_stats(settings: &EffectiveSettings, args: StatsArgs) -> Result<(), CliError> {
    let script = load_dual(&args.input, settings.min_interval_ms)?;
    let report = json!({
        "primary": script.get_actions_statistics(Axis::Primary),
        "secondary": script.get_actions_statistics(Axis::Secondary),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_scenes(settings: &EffectiveSettings, args: ScenesArgs) -> Result<(), CliError> {
    let plan = DecoderPlan::from_settings(settings, &args.video)?;
    let source = open_source(&plan)?;
    let detector = match args.threshold {
        Some(threshold) => LumaSceneDetector {
            threshold,
            ..settings.scene_detection
        },
        None => settings.scene_detection,
    };

    let bar = spinner("scenes");
    bar.set_message(format!("{} detector", detector.name()));
    let cancel = CancellationToken::new();
    let mut detection = detector.detect(source, cancel.clone());
    let result = tokio::select! {
        result = &mut detection => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received; stopping scene detection");
            cancel.cancel();
            detection.await
        }
    };
    match result {
        Ok(scenes) => {
            bar.finish_with_message(format!("{} scenes", scenes.len()));
            println!("{}", serde_json::to_string_pretty(&scenes)?);
            Ok(())
        }
        Err(err) => {
            bar.abandon_with_message(err.to_string());
            Err(err.into())
        }
    }
}
