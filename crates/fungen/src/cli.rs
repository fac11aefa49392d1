use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use fungen_funscript::AxisSelection;

use crate::processor::routing::{OutputTarget, TrackerMode, TrackingAxisMode};

/// Transforms runnable from `fungen filter`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FilterName {
    Sg,
    Rdp,
    Peaks,
    Amp,
    Keyframe,
    SpeedLimiter,
    Resample,
    Invert,
    Threshold,
    Scale,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum AxisArg {
    Primary,
    Secondary,
    Both,
}

impl From<AxisArg> for AxisSelection {
    fn from(value: AxisArg) -> Self {
        match value {
            AxisArg::Primary => AxisSelection::Primary,
            AxisArg::Secondary => AxisSelection::Secondary,
            AxisArg::Both => AxisSelection::Both,
        }
    }
}

/// `start:end` frame or millisecond span; the end may be left open.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Span {
    pub start: u64,
    pub end: Option<u64>,
}

pub fn parse_span(value: &str) -> Result<Span, String> {
    let (start, end) = value
        .split_once(':')
        .ok_or_else(|| format!("expected <start>:<end>, got '{value}'"))?;
    let start = start
        .trim()
        .parse::<u64>()
        .map_err(|err| format!("invalid start '{start}': {err}"))?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse::<u64>().map_err(|err| format!("invalid end '{end}': {err}"))?),
    };
    if let Some(end) = end
        && end < start
    {
        return Err(format!("end {end} is before start {start}"));
    }
    Ok(Span { start, end })
}

/// `key=value`; values parse as JSON when possible and fall back to strings.
pub fn parse_param(value: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{value}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{value}'"));
    }
    let raw = raw.trim();
    let parsed = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), parsed))
}

#[derive(Debug, Default)]
pub struct CliSources {
    pub mode_from_cli: bool,
    pub axis_from_cli: bool,
    pub target_from_cli: bool,
    pub output_folder_from_cli: bool,
}

impl CliSources {
    pub(crate) fn from_matches(matches: &ArgMatches) -> Self {
        let Some(analyze) = matches.subcommand_matches("analyze") else {
            return Self::default();
        };
        Self {
            mode_from_cli: value_from_cli(analyze, "mode"),
            axis_from_cli: value_from_cli(analyze, "axis"),
            target_from_cli: value_from_cli(analyze, "target"),
            output_folder_from_cli: value_from_cli(analyze, "output_folder"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Parser)]
#[command(
    name = "fungen",
    about = "Generate and edit funscripts from video motion analysis",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Lock decoding to a specific backend implementation
    #[arg(short = 'b', long = "backend", global = true)]
    pub backend: Option<String>,

    /// Override the configuration file path
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the staged analysis pipeline on a video
    Analyze(AnalyzeArgs),
    /// Apply one transform to a funscript
    Filter(FilterArgs),
    /// Run a registered transformation plugin
    Plugin(PluginArgs),
    /// Print action statistics for both axes as JSON
    Stats(StatsArgs),
    /// Detect scene cuts and print the chapter list
    Scenes(ScenesArgs),
    /// Print the list of available decoding backends
    Backends,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Input video path
    pub video: PathBuf,

    /// Confine results to a frame span, e.g. 300:900 or 300:
    #[arg(long = "range", value_parser = parse_span)]
    pub range: Option<Span>,

    /// Run Stage 1 only on this frame span and stop (throughput measurement)
    #[arg(long = "frame-range", value_parser = parse_span)]
    pub frame_range: Option<Span>,

    /// Ignore any cached Stage 1 output
    #[arg(long = "force-stage1")]
    pub force_stage1: bool,

    /// Replace existing chapters with the newly computed segments
    #[arg(long = "overwrite-chapters")]
    pub overwrite_chapters: bool,

    #[arg(long = "mode", id = "mode", value_enum, default_value_t = TrackerMode::ThreeStage)]
    pub mode: TrackerMode,

    #[arg(long = "axis", id = "axis", value_enum, default_value_t = TrackingAxisMode::Both)]
    pub axis: TrackingAxisMode,

    /// Timeline that receives single-axis output
    #[arg(long = "target", id = "target", value_enum, default_value_t = OutputTarget::Primary)]
    pub target: OutputTarget,

    /// Directory for cached artifacts
    #[arg(long = "output-folder", id = "output_folder")]
    pub output_folder: Option<PathBuf>,

    /// Final funscript path; defaults to the artifact folder
    #[arg(long = "output", short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Existing funscript to start from; its chapters are not stored
    #[arg(long = "script", value_name = "FILE")]
    pub script: Option<PathBuf>,

    #[arg(long = "producers")]
    pub producers: Option<usize>,

    #[arg(long = "consumers")]
    pub consumers: Option<usize>,
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    /// Primary funscript; a sibling `.roll.funscript` is loaded as the secondary axis
    pub input: PathBuf,

    #[arg(long = "filter", value_enum)]
    pub filter: FilterName,

    /// Filter parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, serde_json::Value)>,

    #[arg(long = "axis", value_enum, default_value_t = AxisArg::Primary)]
    pub axis: AxisArg,

    /// Restrict the transform to a millisecond span
    #[arg(long = "time-range", value_parser = parse_span)]
    pub time_range: Option<Span>,

    /// Print the would-be result summary instead of writing
    #[arg(long = "preview")]
    pub preview: bool,

    #[arg(long = "output", short = 'o', value_name = "FILE", required_unless_present = "preview")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PluginArgs {
    pub input: PathBuf,

    #[arg(long = "name")]
    pub name: String,

    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, serde_json::Value)>,

    #[arg(long = "axis", value_enum, default_value_t = AxisArg::Both)]
    pub axis: AxisArg,

    #[arg(long = "preview")]
    pub preview: bool,

    /// Defaults to overwriting the input
    #[arg(long = "output", short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct ScenesArgs {
    pub video: PathBuf,

    /// Mean luma difference that marks a cut
    #[arg(long = "threshold")]
    pub threshold: Option<f64>,
}
