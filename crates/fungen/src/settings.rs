use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::{BaseDirs, ProjectDirs};
use fungen_funscript::SpeedLimiterConfig;
use fungen_funscript::store::DEFAULT_MIN_INTERVAL_MS;
use serde::Deserialize;

use crate::cli::{AnalyzeArgs, CliArgs, CliSources, Command};
use crate::processor::refinement::RefinementConfig;
use crate::processor::routing::{ChapterPolicy, OutputTarget, TrackerMode, TrackingAxisMode};
use crate::stage::scene::LumaSceneDetector;
use crate::tracker::TrackerConfig;

const DEFAULT_OUTPUT_FOLDER: &str = "output";
const DEFAULT_CONFIDENCE: f32 = 0.4;
const DEFAULT_YOLO_INPUT_SIZE: u32 = 640;
const DEFAULT_WARMUP_FRAMES: u64 = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    output: OutputFileConfig,
    pipeline: PipelineFileConfig,
    stage1: Stage1FileConfig,
    stage3: Stage3FileConfig,
    speed_limiter: Option<SpeedLimiterConfig>,
    funscript: FunscriptFileConfig,
    refinement: Option<RefinementConfig>,
    scene_detection: SceneFileConfig,
    decoder: DecoderFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutputFileConfig {
    folder: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PipelineFileConfig {
    tracker_mode: Option<String>,
    tracking_axis_mode: Option<String>,
    single_axis_output_target: Option<String>,
    force_rerun_stage1: Option<bool>,
    chapter_policy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Stage1FileConfig {
    det_model: Option<String>,
    pose_model: Option<String>,
    confidence_threshold: Option<f32>,
    yolo_input_size: Option<u32>,
    producers: Option<usize>,
    consumers: Option<usize>,
    hwaccel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Stage3FileConfig {
    warmup_frames: Option<u64>,
    #[serde(flatten)]
    tracker: TrackerConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FunscriptFileConfig {
    min_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SceneFileConfig {
    threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DecoderFileConfig {
    backend: Option<String>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage1Settings {
    pub det_model: Option<PathBuf>,
    pub pose_model: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub yolo_input_size: u32,
    pub producers: Option<usize>,
    pub consumers: Option<usize>,
    pub hwaccel: Option<String>,
}

impl Default for Stage1Settings {
    fn default() -> Self {
        Self {
            det_model: None,
            pose_model: None,
            confidence_threshold: DEFAULT_CONFIDENCE,
            yolo_input_size: DEFAULT_YOLO_INPUT_SIZE,
            producers: None,
            consumers: None,
            hwaccel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage3Settings {
    pub warmup_frames: u64,
    pub tracker: TrackerConfig,
}

impl Default for Stage3Settings {
    fn default() -> Self {
        Self {
            warmup_frames: DEFAULT_WARMUP_FRAMES,
            tracker: TrackerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub backend: Option<String>,
    pub channel_capacity: Option<usize>,
    pub output_folder: PathBuf,
    pub tracker_mode: TrackerMode,
    pub tracking_axis_mode: TrackingAxisMode,
    pub output_target: OutputTarget,
    pub force_rerun_stage1: bool,
    pub chapter_policy: ChapterPolicy,
    pub stage1: Stage1Settings,
    pub stage3: Stage3Settings,
    pub speed_limiter: SpeedLimiterConfig,
    pub min_interval_ms: u64,
    pub refinement: RefinementConfig,
    pub scene_detection: LumaSceneDetector,
    pub config_dir: Option<PathBuf>,
}

impl Default for EffectiveSettings {
    fn default() -> Self {
        Self {
            backend: None,
            channel_capacity: None,
            output_folder: PathBuf::from(DEFAULT_OUTPUT_FOLDER),
            tracker_mode: TrackerMode::default(),
            tracking_axis_mode: TrackingAxisMode::default(),
            output_target: OutputTarget::default(),
            force_rerun_stage1: false,
            chapter_policy: ChapterPolicy::default(),
            stage1: Stage1Settings::default(),
            stage3: Stage3Settings::default(),
            speed_limiter: SpeedLimiterConfig::default(),
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            refinement: RefinementConfig::default(),
            scene_detection: LumaSceneDetector::default(),
            config_dir: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(f, "invalid value '{}' for '{}' in {}", value, field, path.display())
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
            ConfigError::NotFound { .. } => None,
        }
    }
}

pub fn resolve_settings(cli: &CliArgs, sources: &CliSources) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

fn read_config(path: PathBuf) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    Ok((config, Some(path)))
}

fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        let path = path.to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        return read_config(path);
    }

    if let Some(project_path) = project_config_path()
        && project_path.exists()
    {
        return read_config(project_path);
    }

    match default_config_path() {
        Some(default_path) if default_path.exists() => read_config(default_path),
        _ => Ok((FileConfig::default(), None)),
    }
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let config_dir = config_path
        .as_ref()
        .and_then(|path| path.parent().map(|dir| dir.to_path_buf()));
    let defaults = EffectiveSettings::default();

    let FileConfig {
        output,
        pipeline,
        stage1,
        stage3,
        speed_limiter,
        funscript,
        refinement,
        scene_detection,
        decoder,
    } = file;

    let backend = normalize_string(cli.backend.clone()).or_else(|| normalize_string(decoder.backend));

    let channel_capacity = decoder.channel_capacity;
    if channel_capacity == Some(0) {
        return Err(invalid(&config_path, "decoder.channel_capacity", "0"));
    }

    let analyze = match &cli.command {
        Command::Analyze(args) => Some(args),
        _ => None,
    };

    let mut output_folder = normalize_string(output.folder)
        .and_then(|value| resolve_path_from_config(value, config_dir.as_deref()))
        .unwrap_or(defaults.output_folder);
    if let Some(folder) = analyze.and_then(|args| args.output_folder.clone())
        && sources.output_folder_from_cli
    {
        output_folder = expand_pathbuf(folder);
    }

    let mut tracker_mode = parse_enum::<TrackerMode>(pipeline.tracker_mode, &config_path, "pipeline.tracker_mode")?
        .unwrap_or(defaults.tracker_mode);
    let mut tracking_axis_mode =
        parse_enum::<TrackingAxisMode>(pipeline.tracking_axis_mode, &config_path, "pipeline.tracking_axis_mode")?
            .unwrap_or(defaults.tracking_axis_mode);
    let mut output_target = parse_enum::<OutputTarget>(
        pipeline.single_axis_output_target,
        &config_path,
        "pipeline.single_axis_output_target",
    )?
    .unwrap_or(defaults.output_target);
    let mut chapter_policy =
        parse_enum::<ChapterPolicy>(pipeline.chapter_policy, &config_path, "pipeline.chapter_policy")?
            .unwrap_or(defaults.chapter_policy);
    let mut force_rerun_stage1 = pipeline.force_rerun_stage1.unwrap_or(false);

    if let Some(args) = analyze {
        apply_analyze_overrides(
            args,
            sources,
            &mut tracker_mode,
            &mut tracking_axis_mode,
            &mut output_target,
        );
        force_rerun_stage1 |= args.force_stage1;
        if args.overwrite_chapters {
            chapter_policy = ChapterPolicy::Overwrite;
        }
    }

    let stage1 = Stage1Settings {
        det_model: normalize_string(stage1.det_model)
            .and_then(|value| resolve_path_from_config(value, config_dir.as_deref())),
        pose_model: normalize_string(stage1.pose_model)
            .and_then(|value| resolve_path_from_config(value, config_dir.as_deref())),
        confidence_threshold: stage1.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE),
        yolo_input_size: stage1.yolo_input_size.unwrap_or(DEFAULT_YOLO_INPUT_SIZE),
        producers: analyze.and_then(|args| args.producers).or(stage1.producers),
        consumers: analyze.and_then(|args| args.consumers).or(stage1.consumers),
        hwaccel: normalize_string(stage1.hwaccel),
    };
    if !(0.0..=1.0).contains(&stage1.confidence_threshold) {
        return Err(invalid(
            &config_path,
            "stage1.confidence_threshold",
            stage1.confidence_threshold,
        ));
    }
    if stage1.yolo_input_size == 0 {
        return Err(invalid(&config_path, "stage1.yolo_input_size", 0));
    }
    for (field, value) in [("stage1.producers", stage1.producers), ("stage1.consumers", stage1.consumers)] {
        if value == Some(0) {
            return Err(invalid(&config_path, field, 0));
        }
    }

    let stage3 = Stage3Settings {
        warmup_frames: stage3.warmup_frames.unwrap_or(DEFAULT_WARMUP_FRAMES),
        tracker: stage3.tracker,
    };
    if let Err(err) = stage3.tracker.validate() {
        return Err(invalid(&config_path, "stage3", err));
    }

    let min_interval_ms = funscript.min_interval_ms.unwrap_or(DEFAULT_MIN_INTERVAL_MS);

    let mut scene = defaults.scene_detection;
    if let Some(threshold) = scene_detection.threshold {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(invalid(&config_path, "scene_detection.threshold", threshold));
        }
        scene.threshold = threshold;
    }
    if let Command::Scenes(args) = &cli.command
        && let Some(threshold) = args.threshold
    {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(invalid(&None, "threshold", threshold));
        }
        scene.threshold = threshold;
    }

    Ok(EffectiveSettings {
        backend,
        channel_capacity,
        output_folder,
        tracker_mode,
        tracking_axis_mode,
        output_target,
        force_rerun_stage1,
        chapter_policy,
        stage1,
        stage3,
        speed_limiter: speed_limiter.unwrap_or_default(),
        min_interval_ms,
        refinement: refinement.unwrap_or_default(),
        scene_detection: scene,
        config_dir,
    })
}

fn apply_analyze_overrides(
    args: &AnalyzeArgs,
    sources: &CliSources,
    tracker_mode: &mut TrackerMode,
    tracking_axis_mode: &mut TrackingAxisMode,
    output_target: &mut OutputTarget,
) {
    if sources.mode_from_cli {
        *tracker_mode = args.mode;
    }
    if sources.axis_from_cli {
        *tracking_axis_mode = args.axis;
    }
    if sources.target_from_cli {
        *output_target = args.target;
    }
}

fn invalid(path: &Option<PathBuf>, field: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        path: path.clone(),
        field,
        value: value.to_string(),
    }
}

fn parse_enum<T: FromStr>(
    value: Option<String>,
    path: &Option<PathBuf>,
    field: &'static str,
) -> Result<Option<T>, ConfigError> {
    normalize_string(value)
        .map(|value| T::from_str(&value).map_err(|_| invalid(path, field, value)))
        .transpose()
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "fungen", "fungen").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("fungen.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn expand_pathbuf(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_home_path(s),
        None => path,
    }
}

fn resolve_path_from_config(value: String, base: Option<&Path>) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_home_path(trimmed);
    match base {
        Some(base) if !expanded.is_absolute() => Some(base.join(expanded)),
        _ => Some(expanded),
    }
}

fn expand_home_path(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().to_path_buf();
        }
    } else if let Some(stripped) = value.strip_prefix("~/")
        && let Some(base) = BaseDirs::new()
    {
        return base.home_dir().join(stripped);
    }
    PathBuf::from(value)
}
