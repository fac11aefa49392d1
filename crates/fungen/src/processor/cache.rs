//! On-disk artifact layout: Stage 1 detections, the Stage 2 overlay and the
//! chapter list all live under `<output folder>/<video stem>/`.

use std::fs;
use std::path::{Path, PathBuf};

use fungen_types::{FrameObject, VideoSegment};
use tracing::{debug, info};

use super::modules::{FrameObjectMap, StageError};
use crate::timeline::{FrameRange, ScriptingRange};

const STAGE1_SUFFIX: &str = ".msgpack";
const OVERLAY_SUFFIX: &str = "_stage2_overlay.msgpack";
const SEGMENTS_SUFFIX: &str = "_segments.json";
const FUNSCRIPT_SUFFIX: &str = ".funscript";

fn video_stem(video: &Path) -> String {
    video
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

/// `<folder>/<stem>/<stem><suffix>`.
pub fn artifact_path(output_folder: &Path, video: &Path, suffix: &str) -> PathBuf {
    let stem = video_stem(video);
    output_folder.join(&stem).join(format!("{stem}{suffix}"))
}

pub fn stage1_path(output_folder: &Path, video: &Path) -> PathBuf {
    artifact_path(output_folder, video, STAGE1_SUFFIX)
}

pub fn overlay_path(output_folder: &Path, video: &Path) -> PathBuf {
    artifact_path(output_folder, video, OVERLAY_SUFFIX)
}

pub fn segments_path(output_folder: &Path, video: &Path) -> PathBuf {
    artifact_path(output_folder, video, SEGMENTS_SUFFIX)
}

/// Chapter list stored next to another artifact of the same video.
pub fn segments_path_beside(artifact: &Path, video: &Path) -> PathBuf {
    artifact.with_file_name(format!("{}{SEGMENTS_SUFFIX}", video_stem(video)))
}

pub fn funscript_path(output_folder: &Path, video: &Path) -> PathBuf {
    artifact_path(output_folder, video, FUNSCRIPT_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage1Plan {
    pub path: PathBuf,
    pub should_run: bool,
    /// The artifact only covers part of the video.
    pub ranged: bool,
}

/// Decides which Stage 1 artifact a run reads and whether it must be produced.
pub fn plan_stage1(
    output_folder: &Path,
    video: &Path,
    frame_range_override: Option<FrameRange>,
    scripting_range: Option<ScriptingRange>,
    force_rerun: bool,
) -> Stage1Plan {
    let full = stage1_path(output_folder, video);
    let plan = if let Some(range) = frame_range_override {
        Stage1Plan {
            path: artifact_path(
                output_folder,
                video,
                &format!("_range_{}-{}{STAGE1_SUFFIX}", range.start, range.end),
            ),
            should_run: true,
            ranged: true,
        }
    } else if let Some(range) = scripting_range {
        if full.exists() && !force_rerun {
            Stage1Plan {
                path: full,
                should_run: false,
                ranged: false,
            }
        } else {
            let end = range
                .end_frame
                .map_or_else(|| "end".to_string(), |end| end.to_string());
            let path = artifact_path(
                output_folder,
                video,
                &format!("_range_{}-{end}{STAGE1_SUFFIX}", range.start_frame),
            );
            let should_run = force_rerun || !path.exists();
            Stage1Plan {
                path,
                should_run,
                ranged: true,
            }
        }
    } else {
        let should_run = force_rerun || !full.exists();
        Stage1Plan {
            path: full,
            should_run,
            ranged: false,
        }
    };
    debug!(path = %plan.path.display(), run = plan.should_run, ranged = plan.ranged, "planned stage 1");
    plan
}

fn ensure_parent(path: &Path) -> Result<(), StageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| StageError::io(parent, err))?;
    }
    Ok(())
}

/// Serializes the annotation map as a frame-ordered list.
pub fn write_overlay(path: &Path, frames: &FrameObjectMap) -> Result<(), StageError> {
    let ordered: Vec<&FrameObject> = frames.values().collect();
    let bytes = rmp_serde::to_vec_named(&ordered).map_err(|err| StageError::overlay(path, err))?;
    ensure_parent(path)?;
    fs::write(path, bytes).map_err(|err| StageError::io(path, err))?;
    info!(path = %path.display(), frames = frames.len(), "wrote stage 2 overlay");
    Ok(())
}

pub fn read_overlay(path: &Path) -> Result<FrameObjectMap, StageError> {
    let bytes = fs::read(path).map_err(|err| StageError::io(path, err))?;
    let frames: Vec<FrameObject> =
        rmp_serde::from_slice(&bytes).map_err(|err| StageError::overlay(path, err))?;
    Ok(frames
        .into_iter()
        .map(|frame| (frame.frame_id, frame))
        .collect())
}

pub fn write_segments(path: &Path, segments: &[VideoSegment]) -> Result<(), StageError> {
    let json = serde_json::to_vec_pretty(segments)
        .map_err(|err| StageError::failed(2, format!("encode segments: {err}")))?;
    ensure_parent(path)?;
    fs::write(path, json).map_err(|err| StageError::io(path, err))
}

pub fn read_segments(path: &Path) -> Result<Vec<VideoSegment>, StageError> {
    let bytes = fs::read(path).map_err(|err| StageError::io(path, err))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| StageError::failed(2, format!("{}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fungen_types::{BoundingBox, LockedObjectState, MotionMode};
    use tempfile::tempdir;

    #[test]
    fn canonical_plan_runs_only_when_missing_or_forced() {
        let dir = tempdir().unwrap();
        let video = Path::new("/videos/scene.mp4");
        let plan = plan_stage1(dir.path(), video, None, None, false);
        assert_eq!(plan.path, dir.path().join("scene").join("scene.msgpack"));
        assert!(plan.should_run);

        fs::create_dir_all(plan.path.parent().unwrap()).unwrap();
        fs::write(&plan.path, b"x").unwrap();
        assert!(!plan_stage1(dir.path(), video, None, None, false).should_run);
        assert!(plan_stage1(dir.path(), video, None, None, true).should_run);
    }

    #[test]
    fn override_always_runs_with_distinct_name() {
        let dir = tempdir().unwrap();
        let video = Path::new("clip.mkv");
        let full = stage1_path(dir.path(), video);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, b"x").unwrap();

        let plan = plan_stage1(dir.path(), video, Some(FrameRange::new(100, 400)), None, false);
        assert_eq!(plan.path, dir.path().join("clip").join("clip_range_100-400.msgpack"));
        assert!(plan.should_run);
        assert!(plan.ranged);
    }

    #[test]
    fn scripting_range_prefers_existing_full_cache() {
        let dir = tempdir().unwrap();
        let video = Path::new("clip.mkv");
        let range = Some(ScriptingRange::new(30, None));

        let plan = plan_stage1(dir.path(), video, None, range, false);
        assert_eq!(plan.path, dir.path().join("clip").join("clip_range_30-end.msgpack"));
        assert!(plan.should_run);

        let full = stage1_path(dir.path(), video);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, b"x").unwrap();
        let plan = plan_stage1(dir.path(), video, None, range, false);
        assert_eq!(plan.path, full);
        assert!(!plan.should_run);
        assert!(!plan.ranged);
    }

    #[test]
    fn overlay_round_trips_through_msgpack() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("overlay.msgpack");
        let mut frames = FrameObjectMap::new();
        let mut frame = FrameObject::placeholder(7);
        frame.locked_object = LockedObjectState {
            active: true,
            bbox: Some(BoundingBox::new(10.0, 20.0, 30.0, 40.0)),
        };
        frame.motion_mode = MotionMode::Riding;
        frames.insert(7, frame);
        frames.insert(3, FrameObject::placeholder(3));

        write_overlay(&path, &frames).unwrap();
        let loaded = read_overlay(&path).unwrap();
        assert_eq!(loaded, frames);
    }

    #[test]
    fn missing_overlay_is_io_error() {
        let dir = tempdir().unwrap();
        let err = read_overlay(&dir.path().join("absent.msgpack")).unwrap_err();
        assert!(matches!(err, StageError::Io { .. }));
    }
}
