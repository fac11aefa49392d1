//! Offline funscript edits behind `fungen filter`.

use fungen_funscript::stats::ActionStatistics;
use fungen_funscript::{
    Action, Axis, AxisSelection, DualAxisFunscript, Filter, FilterKind, FunscriptError, ParamMap,
    Selection, SpeedLimiterConfig,
};
use serde_json::{Value, json};
use tracing::info;

use crate::cli::{FilterName, Span};

const DEFAULT_LOWER_THRESH: i64 = 10;
const DEFAULT_UPPER_THRESH: i64 = 90;

pub fn params_from_pairs(pairs: &[(String, Value)]) -> ParamMap {
    pairs.iter().cloned().collect()
}

/// A millisecond span as a selection; an open end runs to the last action.
pub fn selection_for(span: Option<Span>) -> Selection {
    span.map_or(Selection::All, |span| {
        Selection::time_range(span.start, span.end.unwrap_or(u64::MAX))
    })
}

/// The store filter behind `name`, if it is one.
pub fn filter_kind(name: FilterName) -> Option<FilterKind> {
    match name {
        FilterName::Sg => Some(FilterKind::SavitzkyGolay),
        FilterName::Rdp => Some(FilterKind::Rdp),
        FilterName::Peaks => Some(FilterKind::Peaks),
        FilterName::Amp => Some(FilterKind::Amplify),
        FilterName::Keyframe => Some(FilterKind::Keyframe),
        FilterName::SpeedLimiter => Some(FilterKind::SpeedLimiter),
        FilterName::Resample => Some(FilterKind::Resample),
        FilterName::Invert | FilterName::Threshold | FilterName::Scale => None,
    }
}

fn int_param(params: &ParamMap, name: &str, default: i64) -> Result<i64, FunscriptError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| FunscriptError::invalid_parameter(name, "expected an integer")),
    }
}

/// Speed-limiter parameters start from the configured limiter; the
/// device thresholds that have no parameter are kept from it as well.
fn resolve_filter(
    kind: FilterKind,
    params: &ParamMap,
    limiter: &SpeedLimiterConfig,
) -> Result<Filter, FunscriptError> {
    if kind != FilterKind::SpeedLimiter {
        return Filter::from_params(kind, params);
    }
    let mut merged = params.clone();
    merged
        .entry("min_interval")
        .or_insert_with(|| json!(limiter.min_interval));
    merged
        .entry("vibe_amount")
        .or_insert_with(|| json!(limiter.vibe_amount));
    merged
        .entry("speed_threshold")
        .or_insert_with(|| json!(limiter.speed_threshold));
    match Filter::from_params(kind, &merged)? {
        Filter::SpeedLimiter(parsed) => Ok(Filter::SpeedLimiter(SpeedLimiterConfig {
            min_interval: parsed.min_interval,
            vibe_amount: parsed.vibe_amount,
            speed_threshold: parsed.speed_threshold,
            ..*limiter
        })),
        other => Ok(other),
    }
}

fn apply_to_axis(
    script: &mut DualAxisFunscript,
    axis: Axis,
    name: FilterName,
    params: &ParamMap,
    selection: &Selection,
    limiter: &SpeedLimiterConfig,
) -> Result<bool, FunscriptError> {
    let changed = match name {
        FilterName::Invert => script.invert_points_values(axis, selection),
        FilterName::Threshold => script.clamp_points_thresholded(
            axis,
            int_param(params, "lower_thresh", DEFAULT_LOWER_THRESH)?,
            int_param(params, "upper_thresh", DEFAULT_UPPER_THRESH)?,
            selection,
        ),
        FilterName::Scale => script.scale_points_to_range(
            axis,
            int_param(params, "output_min", 0)?,
            int_param(params, "output_max", 100)?,
            selection,
        ),
        other => {
            let Some(kind) = filter_kind(other) else {
                return Ok(false);
            };
            let filter = resolve_filter(kind, params, limiter)?;
            script.apply_filter(axis, &filter, selection)
        }
    };
    Ok(changed)
}

/// Applies `name` to every axis in `axes`. Returns whether anything changed.
pub fn apply_edit(
    script: &mut DualAxisFunscript,
    name: FilterName,
    axes: AxisSelection,
    params: &ParamMap,
    selection: &Selection,
    limiter: &SpeedLimiterConfig,
) -> Result<bool, FunscriptError> {
    let mut changed = false;
    for &axis in axes.axes() {
        let axis_changed = apply_to_axis(script, axis, name, params, selection, limiter)?;
        info!(axis = %axis, filter = ?name, changed = axis_changed, "applied edit");
        changed |= axis_changed;
    }
    Ok(changed)
}

fn preview_actions(
    script: &DualAxisFunscript,
    axis: Axis,
    name: FilterName,
    params: &ParamMap,
    selection: &Selection,
    limiter: &SpeedLimiterConfig,
) -> Result<Option<Vec<Action>>, FunscriptError> {
    match filter_kind(name) {
        Some(kind) if kind != FilterKind::SpeedLimiter => {
            script.calculate_filter_preview(axis, kind, params, selection)
        }
        _ => {
            let mut copy = script.clone();
            let changed = apply_to_axis(&mut copy, axis, name, params, selection, limiter)?;
            Ok(changed.then(|| copy.actions(axis).to_vec()))
        }
    }
}

/// Before/after statistics per axis without touching `script`.
pub fn preview_edit(
    script: &DualAxisFunscript,
    name: FilterName,
    axes: AxisSelection,
    params: &ParamMap,
    selection: &Selection,
    limiter: &SpeedLimiterConfig,
) -> Result<Value, FunscriptError> {
    let mut report = serde_json::Map::new();
    for &axis in axes.axes() {
        let after = preview_actions(script, axis, name, params, selection, limiter)?;
        report.insert(
            axis.as_str().to_string(),
            json!({
                "before": script.get_actions_statistics(axis),
                "after": after.as_deref().map(ActionStatistics::from_actions),
            }),
        );
    }
    Ok(Value::Object(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(points: &[(u64, u8)]) -> DualAxisFunscript {
        let mut script = DualAxisFunscript::with_min_interval(0);
        script.set_actions(
            Axis::Primary,
            points.iter().map(|&(at, pos)| Action::new(at, pos)).collect(),
        );
        script
    }

    #[test]
    fn threshold_uses_named_bounds() {
        let mut fs = script(&[(0, 5), (100, 50), (200, 95)]);
        let params = params_from_pairs(&[
            ("lower_thresh".to_string(), json!(10)),
            ("upper_thresh".to_string(), json!(90)),
        ]);
        let changed = apply_edit(
            &mut fs,
            FilterName::Threshold,
            AxisSelection::Primary,
            &params,
            &Selection::All,
            &SpeedLimiterConfig::default(),
        )
        .unwrap();
        assert!(changed);
        let positions: Vec<u8> = fs.actions(Axis::Primary).iter().map(|a| a.pos).collect();
        assert_eq!(positions, vec![0, 50, 100]);
    }

    #[test]
    fn preview_leaves_script_untouched() {
        let fs = script(&[(0, 10), (100, 90), (200, 10), (300, 90)]);
        let before = fs.actions(Axis::Primary).to_vec();
        let report = preview_edit(
            &fs,
            FilterName::Invert,
            AxisSelection::Primary,
            &ParamMap::new(),
            &Selection::All,
            &SpeedLimiterConfig::default(),
        )
        .unwrap();
        assert_eq!(fs.actions(Axis::Primary), before.as_slice());
        assert!(report["primary"]["after"].is_object());
    }

    #[test]
    fn configured_limiter_thresholds_survive_params() {
        let limiter = SpeedLimiterConfig {
            flat_travel_limit: 30,
            ..SpeedLimiterConfig::default()
        };
        let params = params_from_pairs(&[("speed_threshold".to_string(), json!(250.0))]);
        let Filter::SpeedLimiter(config) =
            resolve_filter(FilterKind::SpeedLimiter, &params, &limiter).unwrap()
        else {
            panic!("expected speed limiter");
        };
        assert_eq!(config.speed_threshold, 250.0);
        assert_eq!(config.flat_travel_limit, 30);
        assert_eq!(config.min_interval, limiter.min_interval);
    }

    #[test]
    fn open_span_runs_to_end() {
        assert_eq!(
            selection_for(Some(Span { start: 500, end: None })),
            Selection::time_range(500, u64::MAX)
        );
        assert_eq!(selection_for(None), Selection::All);
    }
}
