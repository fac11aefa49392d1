//! Dual-axis funscript action store and the transforms that edit it.
//!
//! Every mutating transform on [`DualAxisFunscript`] is backed by a pure
//! function in [`transforms`], which is also what
//! [`DualAxisFunscript::calculate_filter_preview`] runs against a copy.

pub mod axis;
pub mod document;
pub mod error;
pub mod plugins;
pub mod preview;
pub mod selection;
pub mod signal;
pub mod speed_limiter;
pub mod stats;
pub mod store;
pub mod transforms;

pub use axis::{Axis, AxisSelection};
pub use document::FunscriptDocument;
pub use error::{FunscriptError, PluginError};
pub use fungen_types::Action;
pub use plugins::{FunscriptPlugin, KeyframePlugin, ParamKind, ParamMap, ParamSpec, PluginRegistry};
pub use preview::{Filter, FilterKind};
pub use selection::Selection;
pub use signal::PeakParams;
pub use speed_limiter::SpeedLimiterConfig;
pub use stats::ActionStatistics;
pub use store::{BatchAction, DualAxisFunscript};
