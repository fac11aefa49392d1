use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::FunscriptError;
use crate::plugins::ParamMap;
use crate::signal::PeakParams;
use crate::speed_limiter::SpeedLimiterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    SavitzkyGolay,
    Rdp,
    Peaks,
    Amplify,
    Keyframe,
    SpeedLimiter,
    Resample,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::SavitzkyGolay => "sg",
            FilterKind::Rdp => "rdp",
            FilterKind::Peaks => "peaks",
            FilterKind::Amplify => "amp",
            FilterKind::Keyframe => "keyframe",
            FilterKind::SpeedLimiter => "speed_limiter",
            FilterKind::Resample => "resample",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = FunscriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sg" | "savgol" => Ok(FilterKind::SavitzkyGolay),
            "rdp" => Ok(FilterKind::Rdp),
            "peaks" => Ok(FilterKind::Peaks),
            "amp" | "amplify" => Ok(FilterKind::Amplify),
            "keyframe" | "keyframes" => Ok(FilterKind::Keyframe),
            "speed_limiter" => Ok(FilterKind::SpeedLimiter),
            "resample" => Ok(FilterKind::Resample),
            other => Err(FunscriptError::UnknownFilter(other.to_string())),
        }
    }
}

/// A filter with its parameters resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    SavitzkyGolay { window_length: usize, polyorder: usize },
    Rdp { epsilon: f64 },
    Peaks(PeakParams),
    Amplify { scale_factor: f64, center_value: f64 },
    Keyframe { position_tolerance: f64, time_tolerance_ms: u64 },
    SpeedLimiter(SpeedLimiterConfig),
    Resample { rate_ms: u64 },
}

impl Filter {
    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::SavitzkyGolay { .. } => FilterKind::SavitzkyGolay,
            Filter::Rdp { .. } => FilterKind::Rdp,
            Filter::Peaks(_) => FilterKind::Peaks,
            Filter::Amplify { .. } => FilterKind::Amplify,
            Filter::Keyframe { .. } => FilterKind::Keyframe,
            Filter::SpeedLimiter(_) => FilterKind::SpeedLimiter,
            Filter::Resample { .. } => FilterKind::Resample,
        }
    }

    /// Builds a filter from loosely typed parameters, falling back to defaults.
    pub fn from_params(kind: FilterKind, params: &ParamMap) -> Result<Self, FunscriptError> {
        let filter = match kind {
            FilterKind::SavitzkyGolay => Filter::SavitzkyGolay {
                window_length: uint(params, "window_length", 7)? as usize,
                polyorder: uint(params, "polyorder", 3)? as usize,
            },
            FilterKind::Rdp => Filter::Rdp {
                epsilon: float(params, "epsilon", 1.0)?,
            },
            FilterKind::Peaks => Filter::Peaks(PeakParams {
                height: optional_float(params, "height")?,
                threshold: optional_float(params, "threshold")?,
                distance: optional_float(params, "distance")?,
                prominence: optional_float(params, "prominence")?,
                width: optional_float(params, "width")?,
            }),
            FilterKind::Amplify => Filter::Amplify {
                scale_factor: float(params, "scale_factor", 1.0)?,
                center_value: float(params, "center_value", 50.0)?,
            },
            FilterKind::Keyframe => Filter::Keyframe {
                position_tolerance: float(params, "position_tolerance", 10.0)?,
                time_tolerance_ms: uint(params, "time_tolerance_ms", 50)?,
            },
            FilterKind::SpeedLimiter => {
                let defaults = SpeedLimiterConfig::default();
                Filter::SpeedLimiter(SpeedLimiterConfig {
                    min_interval: uint(params, "min_interval", defaults.min_interval)?,
                    vibe_amount: int(params, "vibe_amount", defaults.vibe_amount)?,
                    speed_threshold: float(params, "speed_threshold", defaults.speed_threshold)?,
                    ..defaults
                })
            }
            FilterKind::Resample => Filter::Resample {
                rate_ms: uint(params, "resample_rate_ms", 50)?,
            },
        };
        Ok(filter)
    }
}

fn optional_float(params: &ParamMap, name: &str) -> Result<Option<f64>, FunscriptError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| FunscriptError::invalid_parameter(name, "expected a number")),
    }
}

fn float(params: &ParamMap, name: &str, default: f64) -> Result<f64, FunscriptError> {
    Ok(optional_float(params, name)?.unwrap_or(default))
}

fn int(params: &ParamMap, name: &str, default: i64) -> Result<i64, FunscriptError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| FunscriptError::invalid_parameter(name, "expected an integer")),
    }
}

fn uint(params: &ParamMap, name: &str, default: u64) -> Result<u64, FunscriptError> {
    let value = int(params, name, default as i64)?;
    u64::try_from(value)
        .map_err(|_| FunscriptError::invalid_parameter(name, "expected a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn params(value: Value) -> ParamMap {
        match value {
            Value::Object(map) => map,
            _ => ParamMap::new(),
        }
    }

    #[test]
    fn defaults_fill_missing_parameters() {
        let filter = Filter::from_params(FilterKind::SavitzkyGolay, &ParamMap::new()).unwrap();
        assert_eq!(
            filter,
            Filter::SavitzkyGolay {
                window_length: 7,
                polyorder: 3
            }
        );

        let filter = Filter::from_params(
            FilterKind::SpeedLimiter,
            &params(json!({"speed_threshold": 250})),
        )
        .unwrap();
        assert_matches!(filter, Filter::SpeedLimiter(cfg) if cfg.speed_threshold == 250.0 && cfg.min_interval == 60);
    }

    #[test]
    fn rejects_wrong_types() {
        let err = Filter::from_params(FilterKind::Rdp, &params(json!({"epsilon": "big"})));
        assert_matches!(err, Err(FunscriptError::InvalidParameter { name, .. }) if name == "epsilon");

        let err = Filter::from_params(FilterKind::Resample, &params(json!({"resample_rate_ms": -5})));
        assert_matches!(err, Err(FunscriptError::InvalidParameter { .. }));
    }

    #[test]
    fn parses_filter_names() {
        assert_eq!("speed-limiter".parse::<FilterKind>().unwrap(), FilterKind::SpeedLimiter);
        assert_eq!("SG".parse::<FilterKind>().unwrap(), FilterKind::SavitzkyGolay);
        assert_matches!("median".parse::<FilterKind>(), Err(FunscriptError::UnknownFilter(_)));
    }
}
