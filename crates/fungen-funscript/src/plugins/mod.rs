//! Stateless transformation plugins with a validated parameter schema.

pub mod keyframe;

pub use keyframe::KeyframePlugin;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::axis::AxisSelection;
use crate::error::PluginError;
use crate::selection::Selection;
use crate::store::DualAxisFunscript;

pub type ParamMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    IndexList,
}

impl ParamKind {
    fn expected(&self) -> &'static str {
        match self {
            ParamKind::Int => "an integer",
            ParamKind::Float => "a number",
            ParamKind::Bool => "a boolean",
            ParamKind::IndexList => "a list of non-negative integers",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn new(kind: ParamKind, description: &'static str) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            min: None,
            max: None,
            description,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn check(&self, name: &str, value: &Value) -> Result<Value, PluginError> {
        let mismatch = || PluginError::TypeMismatch {
            name: name.to_string(),
            expected: self.kind.expected(),
        };
        let numeric = match self.kind {
            ParamKind::Bool => return value.as_bool().map(Value::Bool).ok_or_else(mismatch),
            ParamKind::IndexList => {
                let items = value.as_array().ok_or_else(mismatch)?;
                let indices = items
                    .iter()
                    .map(|item| item.as_u64().ok_or_else(mismatch))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Value::from(indices));
            }
            ParamKind::Int => value
                .as_i64()
                .map(|v| v as f64)
                .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0))
                .ok_or_else(mismatch)?,
            ParamKind::Float => value.as_f64().ok_or_else(mismatch)?,
        };
        if let Some(min) = self.min
            && numeric < min
        {
            return Err(PluginError::OutOfRange {
                name: name.to_string(),
                value: numeric,
                bound: format!(">= {min}"),
            });
        }
        if let Some(max) = self.max
            && numeric > max
        {
            return Err(PluginError::OutOfRange {
                name: name.to_string(),
                value: numeric,
                bound: format!("<= {max}"),
            });
        }
        Ok(match self.kind {
            ParamKind::Int => Value::from(numeric as i64),
            _ => Value::from(numeric),
        })
    }
}

/// Checks `params` against `schema` and fills in defaults.
pub fn validate(schema: &[(&'static str, ParamSpec)], params: &ParamMap) -> Result<ParamMap, PluginError> {
    if let Some(unknown) = params
        .keys()
        .find(|key| !schema.iter().any(|(name, _)| name == key))
    {
        return Err(PluginError::UnknownParameter(unknown.clone()));
    }
    let mut validated = ParamMap::new();
    for (name, spec) in schema {
        match params.get(*name).filter(|value| !value.is_null()) {
            Some(value) => {
                validated.insert(name.to_string(), spec.check(name, value)?);
            }
            None if spec.required => return Err(PluginError::MissingParameter(name.to_string())),
            None => {
                if let Some(default) = &spec.default {
                    validated.insert(name.to_string(), default.clone());
                }
            }
        }
    }
    Ok(validated)
}

/// Turns a validated index-list parameter into a selection; absent means all.
pub fn selection_param(validated: &ParamMap, name: &str) -> Selection {
    match validated.get(name).and_then(Value::as_array) {
        Some(items) => Selection::indices(items.iter().filter_map(Value::as_u64).map(|i| i as usize)),
        None => Selection::All,
    }
}

pub trait FunscriptPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn version(&self) -> &'static str;

    fn parameters_schema(&self) -> Vec<(&'static str, ParamSpec)>;

    fn supported_axes(&self) -> &'static [AxisSelection] {
        &[AxisSelection::Primary, AxisSelection::Secondary, AxisSelection::Both]
    }

    fn validate_parameters(&self, params: &ParamMap) -> Result<ParamMap, PluginError> {
        validate(&self.parameters_schema(), params)
    }

    /// Edits `script` in place on the selected axes.
    fn transform(
        &self,
        script: &mut DualAxisFunscript,
        axes: AxisSelection,
        params: &ParamMap,
    ) -> Result<(), PluginError>;

    /// Describes what `transform` would do without touching `script`.
    fn get_preview(&self, script: &DualAxisFunscript, axes: AxisSelection, params: &ParamMap) -> Value;
}

impl std::fmt::Debug for dyn FunscriptPlugin + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FunscriptPlugin").field(&self.name()).finish()
    }
}

/// Plugins addressable by name.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn FunscriptPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(KeyframePlugin));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn FunscriptPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FunscriptPlugin>, PluginError> {
        self.plugins
            .get(name)
            .or_else(|| {
                self.plugins
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, plugin)| plugin)
            })
            .cloned()
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn schema() -> Vec<(&'static str, ParamSpec)> {
        vec![
            (
                "tolerance",
                ParamSpec::new(ParamKind::Int, "tolerance").with_default(10).with_range(1.0, 50.0),
            ),
            ("scale", ParamSpec::new(ParamKind::Float, "scale").required()),
            ("indices", ParamSpec::new(ParamKind::IndexList, "indices")),
        ]
    }

    fn params(value: Value) -> ParamMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn fills_defaults_and_keeps_given_values() {
        let validated = validate(&schema(), &params(json!({"scale": 1.5}))).unwrap();
        assert_eq!(validated.get("tolerance"), Some(&json!(10)));
        assert_eq!(validated.get("scale"), Some(&json!(1.5)));
        assert!(!validated.contains_key("indices"));
    }

    #[test]
    fn reports_each_failure_kind() {
        assert_matches!(
            validate(&schema(), &params(json!({}))),
            Err(PluginError::MissingParameter(name)) if name == "scale"
        );
        assert_matches!(
            validate(&schema(), &params(json!({"scale": 1, "bogus": 2}))),
            Err(PluginError::UnknownParameter(name)) if name == "bogus"
        );
        assert_matches!(
            validate(&schema(), &params(json!({"scale": 1, "tolerance": 99}))),
            Err(PluginError::OutOfRange { .. })
        );
        assert_matches!(
            validate(&schema(), &params(json!({"scale": 1, "tolerance": 2.5}))),
            Err(PluginError::TypeMismatch { .. })
        );
        assert_matches!(
            validate(&schema(), &params(json!({"scale": 1, "indices": [1, -2]}))),
            Err(PluginError::TypeMismatch { .. })
        );
    }

    #[test]
    fn index_list_becomes_selection() {
        let validated = validate(&schema(), &params(json!({"scale": 1, "indices": [3, 1]}))).unwrap();
        assert_eq!(selection_param(&validated, "indices"), Selection::indices([3, 1]));
        assert_eq!(selection_param(&validated, "missing"), Selection::All);
    }

    #[test]
    fn registry_looks_up_builtin_case_insensitively() {
        let registry = PluginRegistry::with_builtin();
        assert_eq!(registry.get("keyframes").unwrap().name(), "Keyframes");
        assert_matches!(registry.get("Nope"), Err(PluginError::UnknownPlugin(_)));
    }
}
