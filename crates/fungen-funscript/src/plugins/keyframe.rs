use serde_json::{Value, json};
use tracing::{info, warn};

use super::{FunscriptPlugin, ParamKind, ParamMap, ParamSpec, selection_param};
use crate::axis::AxisSelection;
use crate::error::PluginError;
use crate::store::DualAxisFunscript;
use crate::transforms;

const MIN_POINTS: usize = 3;

/// Reduces each axis to its significant peaks and valleys.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyframePlugin;

struct KeyframeParams {
    position_tolerance: f64,
    time_tolerance_ms: u64,
}

impl KeyframeParams {
    fn from_validated(validated: &ParamMap) -> Self {
        Self {
            position_tolerance: validated
                .get("position_tolerance")
                .and_then(Value::as_f64)
                .unwrap_or(10.0),
            time_tolerance_ms: validated
                .get("time_tolerance_ms")
                .and_then(Value::as_u64)
                .unwrap_or(50),
        }
    }
}

impl FunscriptPlugin for KeyframePlugin {
    fn name(&self) -> &'static str {
        "Keyframes"
    }

    fn description(&self) -> &'static str {
        "Simplifies to significant peaks and valleys using keyframe analysis"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn parameters_schema(&self) -> Vec<(&'static str, ParamSpec)> {
        vec![
            (
                "position_tolerance",
                ParamSpec::new(
                    ParamKind::Int,
                    "Minimum position change to keep a point (0-100 scale)",
                )
                .with_default(10)
                .with_range(1.0, 50.0),
            ),
            (
                "time_tolerance_ms",
                ParamSpec::new(ParamKind::Int, "Minimum time between keyframes in milliseconds")
                    .with_default(50)
                    .with_range(10.0, 1000.0),
            ),
            (
                "selected_indices",
                ParamSpec::new(
                    ParamKind::IndexList,
                    "Specific action indices to simplify (all points when omitted)",
                ),
            ),
        ]
    }

    fn transform(
        &self,
        script: &mut DualAxisFunscript,
        axes: AxisSelection,
        params: &ParamMap,
    ) -> Result<(), PluginError> {
        let validated = self.validate_parameters(params)?;
        if !self.supported_axes().contains(&axes) {
            return Err(PluginError::UnsupportedAxis(axes.to_string()));
        }
        let KeyframeParams {
            position_tolerance,
            time_tolerance_ms,
        } = KeyframeParams::from_validated(&validated);
        let selection = selection_param(&validated, "selected_indices");

        for &axis in axes.axes() {
            let original = script.actions(axis).len();
            if original < MIN_POINTS {
                warn!(axis = %axis, points = original, "not enough points for keyframe simplification");
                continue;
            }
            script.simplify_to_keyframes(axis, position_tolerance, time_tolerance_ms, &selection);
            let remaining = script.actions(axis).len();
            let reduction = (original - remaining.min(original)) as f64 / original as f64 * 100.0;
            info!(
                axis = %axis,
                "{original} -> {remaining} points ({reduction:.1}% reduction)"
            );
        }
        Ok(())
    }

    fn get_preview(&self, script: &DualAxisFunscript, axes: AxisSelection, params: &ParamMap) -> Value {
        let validated = match self.validate_parameters(params) {
            Ok(validated) => validated,
            Err(err) => return json!({ "error": err.to_string() }),
        };
        let KeyframeParams {
            position_tolerance,
            time_tolerance_ms,
        } = KeyframeParams::from_validated(&validated);
        let selection = selection_param(&validated, "selected_indices");

        let mut preview = json!({
            "filter_type": "Keyframe Simplification",
            "parameters": Value::Object(validated),
        });
        for &axis in axes.axes() {
            let actions = script.actions(axis);
            if actions.is_empty() {
                continue;
            }
            let span = selection.span(actions, 1);
            let to_analyze = span.map_or(0, |(start, end)| end - start + 1);
            let report = match span {
                Some((start, end)) if to_analyze >= MIN_POINTS => {
                    let estimated = transforms::keyframe_segment(
                        &actions[start..=end],
                        position_tolerance,
                        time_tolerance_ms,
                    )
                    .len();
                    let reduction = (1.0 - estimated as f64 / to_analyze as f64) * 100.0;
                    json!({
                        "total_points": actions.len(),
                        "points_to_analyze": to_analyze,
                        "estimated_keyframes": estimated,
                        "estimated_reduction_percent": (reduction * 10.0).round() / 10.0,
                        "can_apply": true,
                        "position_tolerance": position_tolerance,
                        "time_tolerance_ms": time_tolerance_ms,
                    })
                }
                _ => json!({
                    "total_points": actions.len(),
                    "points_to_analyze": to_analyze,
                    "can_apply": false,
                    "error": "Not enough points for keyframe analysis",
                }),
            };
            preview[format!("{axis}_axis")] = report;
        }
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;

    fn zigzag_with_noise() -> DualAxisFunscript {
        let mut script = DualAxisFunscript::with_min_interval(0);
        for (at, pos) in [(0, 0), (100, 100), (120, 97), (140, 100), (300, 0), (400, 100)] {
            script.add_action(at, Some(pos), None);
        }
        script
    }

    #[test]
    fn transform_reduces_primary_only() {
        let mut script = zigzag_with_noise();
        script.add_action(0, None, Some(50));
        KeyframePlugin
            .transform(&mut script, AxisSelection::Both, &ParamMap::new())
            .unwrap();
        let positions: Vec<u8> = script.actions(Axis::Primary).iter().map(|a| a.pos).collect();
        assert_eq!(positions, vec![0, 100, 0, 100]);
        assert_eq!(script.actions(Axis::Secondary).len(), 1);
    }

    #[test]
    fn transform_rejects_out_of_range_tolerance() {
        let mut script = zigzag_with_noise();
        let params = json!({"position_tolerance": 80}).as_object().cloned().unwrap();
        let err = KeyframePlugin.transform(&mut script, AxisSelection::Primary, &params);
        assert!(matches!(err, Err(PluginError::OutOfRange { .. })));
        assert_eq!(script.actions(Axis::Primary).len(), 6);
    }

    #[test]
    fn preview_reports_estimate_per_axis() {
        let mut script = zigzag_with_noise();
        script.add_action(0, None, Some(50));
        let preview = KeyframePlugin.get_preview(&script, AxisSelection::Both, &ParamMap::new());

        assert_eq!(preview["filter_type"], "Keyframe Simplification");
        let primary = &preview["primary_axis"];
        assert_eq!(primary["points_to_analyze"], 6);
        assert_eq!(primary["estimated_keyframes"], 4);
        assert_eq!(primary["estimated_reduction_percent"], 33.3);
        assert_eq!(primary["can_apply"], true);

        let secondary = &preview["secondary_axis"];
        assert_eq!(secondary["can_apply"], false);
        assert_eq!(secondary["error"], "Not enough points for keyframe analysis");
        assert_eq!(zigzag_with_noise().actions(Axis::Primary), script.actions(Axis::Primary));
    }

    #[test]
    fn preview_surfaces_validation_errors() {
        let script = zigzag_with_noise();
        let params = json!({"unknown": 1}).as_object().cloned().unwrap();
        let preview = KeyframePlugin.get_preview(&script, AxisSelection::Primary, &params);
        assert!(preview["error"].as_str().unwrap().contains("unknown"));
    }
}
