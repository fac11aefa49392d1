use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FunscriptError {
    #[error("clamp value must be 0 or 100, got {0}")]
    InvalidClampValue(i64),

    #[error("unknown axis '{0}', expected primary or secondary")]
    InvalidAxis(String),

    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("failed to access funscript file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse funscript {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl FunscriptError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("parameter '{name}' expects {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("parameter '{name}' = {value} is outside {bound}")]
    OutOfRange {
        name: String,
        value: f64,
        bound: String,
    },

    #[error("unsupported axis '{0}'")]
    UnsupportedAxis(String),
}
