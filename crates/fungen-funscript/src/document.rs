use std::fs;
use std::path::{Path, PathBuf};

use fungen_types::Action;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::axis::Axis;
use crate::error::FunscriptError;
use crate::store::DualAxisFunscript;

/// On-disk `.funscript` JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunscriptDocument {
    pub version: String,
    pub inverted: bool,
    pub range: u32,
    pub author: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub actions: Vec<Action>,
}

impl Default for FunscriptDocument {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            inverted: false,
            range: 100,
            author: "FunGen".to_string(),
            metadata: serde_json::Map::new(),
            actions: Vec::new(),
        }
    }
}

impl FunscriptDocument {
    pub fn from_actions(actions: &[Action]) -> Self {
        Self {
            actions: actions.to_vec(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, FunscriptError> {
        let bytes = fs::read(path).map_err(|source| FunscriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut document: Self =
            serde_json::from_slice(&bytes).map_err(|source| FunscriptError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        document.actions.sort_by_key(|action| action.at);
        for action in &mut document.actions {
            action.pos = action.pos.min(100);
        }
        debug!(path = %path.display(), points = document.actions.len(), "loaded funscript");
        Ok(document)
    }

    pub fn save(&self, path: &Path) -> Result<(), FunscriptError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| FunscriptError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_vec(self).map_err(|source| FunscriptError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| FunscriptError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `<dir>/<stem>.roll.funscript` beside the primary file.
pub fn roll_path(primary: &Path) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    primary.with_file_name(format!("{stem}.roll.funscript"))
}

/// Loads the primary file and, when present, its roll companion.
pub fn load_dual(primary: &Path, min_interval_ms: u64) -> Result<DualAxisFunscript, FunscriptError> {
    let mut script = DualAxisFunscript::with_min_interval(min_interval_ms);
    script.set_actions(Axis::Primary, FunscriptDocument::load(primary)?.actions);
    let roll = roll_path(primary);
    if roll.is_file() {
        script.set_actions(Axis::Secondary, FunscriptDocument::load(&roll)?.actions);
    }
    Ok(script)
}

/// Writes the primary axis, and the secondary one only if it has points.
pub fn save_dual(script: &DualAxisFunscript, primary: &Path) -> Result<Vec<PathBuf>, FunscriptError> {
    let mut written = vec![primary.to_path_buf()];
    FunscriptDocument::from_actions(script.primary_actions()).save(primary)?;
    if !script.secondary_actions().is_empty() {
        let roll = roll_path(primary);
        FunscriptDocument::from_actions(script.secondary_actions()).save(&roll)?;
        written.push(roll);
    }
    info!(
        path = %primary.display(),
        primary = script.primary_actions().len(),
        secondary = script.secondary_actions().len(),
        "saved funscript"
    );
    Ok(written)
}
