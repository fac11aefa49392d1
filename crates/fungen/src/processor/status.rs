use std::time::Duration;

use super::events::{Stage1Progress, Stage3Progress, StepProgress};

pub const NOT_RUN: &str = "Not run.";
const ZERO_TIME: &str = "00:00:00";
const NOT_AVAILABLE: &str = "N/A";
const CALCULATING: &str = "Calculating...";
const DONE: &str = "Done";

pub fn format_hms(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn format_eta_seconds(seconds: f64) -> String {
    format_hms(Duration::from_secs_f64(seconds.max(0.0)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage1Status {
    pub status: String,
    pub label: String,
    pub progress: f64,
    pub time_elapsed: String,
    pub fps: String,
    pub eta: String,
    pub frame_queue: usize,
    pub result_queue: usize,
}

impl Default for Stage1Status {
    fn default() -> Self {
        Self {
            status: NOT_RUN.to_string(),
            label: String::new(),
            progress: 0.0,
            time_elapsed: ZERO_TIME.to_string(),
            fps: "0 FPS".to_string(),
            eta: NOT_AVAILABLE.to_string(),
            frame_queue: 0,
            result_queue: 0,
        }
    }
}

impl Stage1Status {
    pub fn apply_progress(&mut self, progress: &Stage1Progress) {
        self.progress = if progress.total > 0 {
            progress.current as f64 / progress.total as f64
        } else {
            0.0
        };
        self.label = progress.message.clone();
        self.time_elapsed = format_hms(progress.elapsed);
        self.fps = format!("{:.0} FPS", progress.avg_fps);
        self.eta = if !progress.eta.is_finite() {
            CALCULATING.to_string()
        } else if progress.eta > 0.0 {
            format_eta_seconds(progress.eta)
        } else {
            DONE.to_string()
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage2Status {
    pub status: String,
    pub main_label: String,
    pub main_progress: f64,
    pub sub_label: String,
    pub sub_progress: f64,
    pub time_elapsed: String,
}

impl Default for Stage2Status {
    fn default() -> Self {
        Self {
            status: NOT_RUN.to_string(),
            main_label: String::new(),
            main_progress: 0.0,
            sub_label: String::new(),
            sub_progress: 0.0,
            time_elapsed: ZERO_TIME.to_string(),
        }
    }
}

impl Stage2Status {
    pub fn apply_progress(&mut self, main: &StepProgress, sub: &StepProgress) {
        if main.current >= 0 && main.total > 0 {
            self.main_progress = main.current as f64 / main.total as f64;
            self.main_label = format!("{} ({}/{})", main.name, main.current, main.total);
        } else {
            self.main_label = main.name.clone();
        }
        if sub.total > 0 {
            self.sub_progress = sub.current.max(0) as f64 / sub.total as f64;
            self.sub_label = format!("{} ({}/{})", sub.name, sub.current, sub.total);
        } else {
            self.sub_progress = 0.0;
            self.sub_label = sub.name.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage3Status {
    pub status: String,
    pub chapter_label: String,
    pub chapter_progress: f64,
    pub overall_label: String,
    pub overall_progress: f64,
    pub time_elapsed: String,
    pub fps: String,
    pub eta: String,
}

impl Default for Stage3Status {
    fn default() -> Self {
        Self {
            status: NOT_RUN.to_string(),
            chapter_label: String::new(),
            chapter_progress: 0.0,
            overall_label: String::new(),
            overall_progress: 0.0,
            time_elapsed: ZERO_TIME.to_string(),
            fps: "0 FPS".to_string(),
            eta: NOT_AVAILABLE.to_string(),
        }
    }
}

impl Stage3Status {
    pub fn apply_progress(&mut self, progress: &Stage3Progress) {
        self.chapter_label = format!(
            "Chapter: {}/{} ({})",
            progress.chapter_index, progress.chapter_total, progress.chapter_name
        );
        self.chapter_progress = if progress.chunk_total > 0 {
            progress.chunk_index as f64 / progress.chunk_total as f64
        } else {
            0.0
        };
        self.overall_label = format!(
            "Overall S3: {}/{}",
            progress.overall_processed, progress.overall_total
        );
        self.overall_progress = if progress.overall_total > 0 {
            (progress.overall_processed as f64 / progress.overall_total as f64).min(1.0)
        } else {
            0.0
        };
        self.time_elapsed = format_hms(progress.elapsed);
        self.fps = format!("{:.1} FPS", progress.fps);
        let chunk_done = progress.chunk_total > 0 && progress.chunk_index >= progress.chunk_total;
        self.eta = if progress.eta.is_finite() && progress.eta > 1.0 && !chunk_done {
            format_eta_seconds(progress.eta)
        } else {
            DONE.to_string()
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneStatus {
    pub status: String,
    pub scenes_found: usize,
}

impl Default for SceneStatus {
    fn default() -> Self {
        Self {
            status: NOT_RUN.to_string(),
            scenes_found: 0,
        }
    }
}

/// Human-readable per-stage state shown by whatever renders progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusBoard {
    pub stage1: Stage1Status,
    pub stage2: Stage2Status,
    pub stage3: Stage3Status,
    pub scenes: SceneStatus,
    pub last_message: Option<String>,
}

impl StatusBoard {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn reset_stages(&mut self) {
        self.stage1 = Stage1Status::default();
        self.stage2 = Stage2Status::default();
        self.stage3 = Stage3Status::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage1(eta: f64) -> Stage1Progress {
        Stage1Progress {
            current: 50,
            total: 200,
            message: "Detecting".to_string(),
            elapsed: Duration::from_secs(3725),
            avg_fps: 41.6,
            instant_fps: 40.0,
            eta,
        }
    }

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_hms(Duration::ZERO), "00:00:00");
    }

    #[test]
    fn stage1_eta_states() {
        let mut status = Stage1Status::default();
        status.apply_progress(&stage1(f64::INFINITY));
        assert_eq!(status.eta, "Calculating...");
        assert_eq!(status.fps, "42 FPS");
        assert_eq!(status.progress, 0.25);
        status.apply_progress(&stage1(61.0));
        assert_eq!(status.eta, "00:01:01");
        status.apply_progress(&stage1(0.0));
        assert_eq!(status.eta, "Done");
    }

    #[test]
    fn stage2_labels_include_counts() {
        let mut status = Stage2Status::default();
        status.apply_progress(&StepProgress::new(2, 3, "Segmenting"), &StepProgress::new(5, 10, "Frames"));
        assert_eq!(status.main_label, "Segmenting (2/3)");
        assert_eq!(status.sub_label, "Frames (5/10)");
        assert_eq!(status.sub_progress, 0.5);

        status.apply_progress(&StepProgress::new(-1, 0, "Saving"), &StepProgress::new(0, 0, ""));
        assert_eq!(status.main_label, "Saving");
    }

    #[test]
    fn stage3_eta_done_at_chunk_end() {
        let mut progress = Stage3Progress {
            chapter_index: 1,
            chapter_total: 2,
            chapter_name: "Cowgirl / Missionary (F0-99)".to_string(),
            chunk_index: 50,
            chunk_total: 100,
            overall_processed: 50,
            overall_total: 200,
            fps: 30.26,
            elapsed: Duration::from_secs(2),
            eta: 5.0,
            segment_position: 1,
        };
        let mut status = Stage3Status::default();
        status.apply_progress(&progress);
        assert_eq!(status.chapter_label, "Chapter: 1/2 (Cowgirl / Missionary (F0-99))");
        assert_eq!(status.overall_label, "Overall S3: 50/200");
        assert_eq!(status.fps, "30.3 FPS");
        assert_eq!(status.eta, "00:00:05");

        progress.chunk_index = 100;
        status.apply_progress(&progress);
        assert_eq!(status.eta, "Done");
    }
}
