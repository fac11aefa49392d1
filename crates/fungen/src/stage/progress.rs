use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::processor::status::{NOT_RUN, StatusBoard};

const BAR_UNITS: u64 = 1000;

/// Terminal outcome inferred from a stage's status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageOutcome {
    Pending,
    Running,
    Finished,
    Failed,
}

fn classify(status: &str) -> StageOutcome {
    if status == NOT_RUN || status.starts_with("Queued") {
        StageOutcome::Pending
    } else if status.contains("Aborted")
        || status.contains("Failed")
        || status.contains("Error")
        || status.starts_with("Skipped")
    {
        StageOutcome::Failed
    } else if status.contains("Completed") || status.starts_with("Using existing") {
        StageOutcome::Finished
    } else {
        StageOutcome::Running
    }
}

struct StageBar {
    bar: ProgressBar,
    finished: bool,
}

impl StageBar {
    fn new(multi: &MultiProgress, label: &'static str) -> Self {
        let bar = multi.add(ProgressBar::new(BAR_UNITS));
        bar.set_style(bar_style());
        bar.set_prefix(label);
        Self {
            bar,
            finished: false,
        }
    }

    fn update(&mut self, status: &str, progress: f64, detail: String) {
        if self.finished {
            return;
        }
        match classify(status) {
            StageOutcome::Pending => self.bar.set_message(status.to_string()),
            StageOutcome::Running => {
                self.bar.set_position((progress.clamp(0.0, 1.0) * BAR_UNITS as f64) as u64);
                self.bar.set_message(detail);
            }
            StageOutcome::Finished => self.finish_if_needed(status),
            StageOutcome::Failed => self.fail_with_reason(status),
        }
    }

    fn finish_if_needed(&mut self, status: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.bar.set_position(BAR_UNITS);
        self.bar.finish_with_message(status.to_string());
    }

    fn fail_with_reason(&mut self, reason: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.bar.abandon_with_message(reason.to_string());
    }

    fn close(&mut self, status: &str) {
        match classify(status) {
            StageOutcome::Failed => self.fail_with_reason(status),
            StageOutcome::Pending => {
                if !self.finished {
                    self.finished = true;
                    self.bar.finish_and_clear();
                }
            }
            _ => self.finish_if_needed(status),
        }
    }
}

/// One bar per pipeline stage, driven from [`StatusBoard`] snapshots.
pub struct PipelineProgress {
    stage1: StageBar,
    stage2: StageBar,
    stage3: Option<StageBar>,
}

impl PipelineProgress {
    pub fn new(three_stage: bool) -> Self {
        let multi = MultiProgress::new();
        let stage1 = StageBar::new(&multi, "S1 detect ");
        let stage2 = StageBar::new(&multi, "S2 segment");
        let stage3 = three_stage.then(|| StageBar::new(&multi, "S3 flow   "));
        Self {
            stage1,
            stage2,
            stage3,
        }
    }

    pub fn render(&mut self, board: &StatusBoard) {
        let s1 = &board.stage1;
        self.stage1.update(
            &s1.status,
            s1.progress,
            format!("{} • {} • eta {} • q {}/{}", s1.label, s1.fps, s1.eta, s1.frame_queue, s1.result_queue),
        );
        let s2 = &board.stage2;
        self.stage2.update(
            &s2.status,
            s2.main_progress,
            format!("{} • {}", s2.main_label, s2.sub_label),
        );
        if let Some(stage3) = self.stage3.as_mut() {
            let s3 = &board.stage3;
            stage3.update(
                &s3.status,
                s3.overall_progress,
                format!("{} • {} • {} • eta {}", s3.chapter_label, s3.overall_label, s3.fps, s3.eta),
            );
        }
    }

    /// Settles every bar once the run has ended.
    pub fn finish(&mut self, board: &StatusBoard) {
        self.render(board);
        self.stage1.close(&board.stage1.status);
        self.stage2.close(&board.stage2.status);
        if let Some(stage3) = self.stage3.as_mut() {
            stage3.close(&board.stage3.status);
        }
    }
}

/// Spinner for work without a known length, such as scene detection.
pub fn spinner(label: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(spinner_style());
    bar.set_prefix(label);
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    bar
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} {bar:40.cyan/blue} {percent:>3.bold}% [{elapsed_precise:.dim}] {msg:.yellow}",
    )
    .expect("invalid stage bar template")
    .progress_chars("█▉▊▋▌▍▎▏ ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} {spinner:.cyan.bold} [{elapsed_precise:.dim}] {msg:.yellow}")
        .expect("invalid spinner template")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_map_to_outcomes() {
        assert_eq!(classify("Not run."), StageOutcome::Pending);
        assert_eq!(classify("Queued..."), StageOutcome::Pending);
        assert_eq!(classify("Running S1..."), StageOutcome::Running);
        assert_eq!(classify("S1 Completed. Output: clip.msgpack"), StageOutcome::Finished);
        assert_eq!(classify("Using existing: clip.msgpack"), StageOutcome::Finished);
        assert_eq!(classify("S2 Aborted by user."), StageOutcome::Failed);
        assert_eq!(classify("S1 Error - boom"), StageOutcome::Failed);
        assert_eq!(classify("Skipped"), StageOutcome::Failed);
    }

    #[test]
    fn finished_bars_ignore_later_updates() {
        let mut progress = PipelineProgress::new(true);
        let mut board = StatusBoard::default();
        board.stage1.status = "S1 Completed. Output: a.msgpack".to_string();
        progress.render(&board);
        assert!(progress.stage1.finished);
        board.stage1.status = "Running S1...".to_string();
        progress.render(&board);
        assert!(progress.stage1.bar.is_finished());
        progress.finish(&board);
        assert!(progress.stage2.finished);
    }
}
