use fungen_funscript::{Axis, AxisSelection, DualAxisFunscript};
use fungen_types::{Action, VideoSegment};
use tracing::{debug, info};

const MAX_UNDO_DEPTH: usize = 50;

/// Inclusive frame span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: u64,
    pub end: u64,
}

impl FrameRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, segment: &VideoSegment) -> bool {
        segment.start_frame_id.max(self.start) <= segment.end_frame_id.min(self.end)
    }
}

/// User-selected part of the video that analysis results are confined to.
///
/// An open end runs to the last frame of the video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptingRange {
    pub start_frame: u64,
    pub end_frame: Option<u64>,
}

impl ScriptingRange {
    pub fn new(start_frame: u64, end_frame: Option<u64>) -> Self {
        Self {
            start_frame,
            end_frame,
        }
    }

    pub fn resolve(&self, total_frames: u64) -> FrameRange {
        let last = total_frames.saturating_sub(1);
        FrameRange::new(self.start_frame, self.end_frame.unwrap_or(last))
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    label: String,
    actions: Vec<Action>,
}

/// The live editing state the pipeline writes into: both axes, chapters,
/// per-axis undo history and the scripting range.
#[derive(Debug, Clone)]
pub struct FunscriptTimeline {
    script: DualAxisFunscript,
    chapters: Vec<VideoSegment>,
    primary_history: Vec<Snapshot>,
    secondary_history: Vec<Snapshot>,
    scripting_range: Option<ScriptingRange>,
    fps: f64,
    total_frames: u64,
}

impl Default for FunscriptTimeline {
    fn default() -> Self {
        Self::new(30.0, 0, fungen_funscript::store::DEFAULT_MIN_INTERVAL_MS)
    }
}

impl FunscriptTimeline {
    pub fn new(fps: f64, total_frames: u64, min_interval_ms: u64) -> Self {
        Self {
            script: DualAxisFunscript::with_min_interval(min_interval_ms),
            chapters: Vec::new(),
            primary_history: Vec::new(),
            secondary_history: Vec::new(),
            scripting_range: None,
            fps,
            total_frames,
        }
    }

    pub fn script(&self) -> &DualAxisFunscript {
        &self.script
    }

    /// Direct access for interactive edits. Callers that want the edit to be
    /// undoable should go through [`FunscriptTimeline::record_undo`] first.
    pub fn script_mut(&mut self) -> &mut DualAxisFunscript {
        &mut self.script
    }

    pub fn chapters(&self) -> &[VideoSegment] {
        &self.chapters
    }

    pub fn set_chapters(&mut self, chapters: Vec<VideoSegment>) {
        debug!(count = chapters.len(), "replacing chapters");
        self.chapters = chapters;
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn scripting_range(&self) -> Option<ScriptingRange> {
        self.scripting_range
    }

    pub fn set_scripting_range(&mut self, range: Option<ScriptingRange>) {
        self.scripting_range = range;
    }

    /// The scripting range with its open end filled in.
    pub fn effective_scripting_range(&self) -> Option<FrameRange> {
        self.scripting_range
            .map(|range| range.resolve(self.total_frames))
    }

    pub fn frame_to_ms(&self, frame: u64) -> u64 {
        if self.fps <= 0.0 {
            return 0;
        }
        (frame as f64 / self.fps * 1000.0).round() as u64
    }

    pub fn duration_ms(&self) -> u64 {
        match self.total_frames {
            0 => 0,
            total => self.frame_to_ms(total - 1),
        }
    }

    /// Saves the current state of `axis` so the next [`FunscriptTimeline::undo`] restores it.
    pub fn record_undo(&mut self, axis: Axis, label: impl Into<String>) {
        let snapshot = Snapshot {
            label: label.into(),
            actions: self.script.actions(axis).to_vec(),
        };
        let history = self.history_mut(axis);
        history.push(snapshot);
        if history.len() > MAX_UNDO_DEPTH {
            history.remove(0);
        }
    }

    pub fn undo(&mut self, axis: Axis) -> Option<String> {
        let snapshot = self.history_mut(axis).pop()?;
        self.script.set_actions(axis, snapshot.actions);
        info!(axis = %axis, label = %snapshot.label, "undid edit");
        Some(snapshot.label)
    }

    pub fn undo_depth(&self, axis: Axis) -> usize {
        match axis {
            Axis::Primary => self.primary_history.len(),
            Axis::Secondary => self.secondary_history.len(),
        }
    }

    /// Replaces `axis` wholesale and forgets its undo history.
    pub fn clear_timeline_history_and_set_new_baseline(
        &mut self,
        axis: Axis,
        actions: Vec<Action>,
        label: &str,
    ) {
        self.history_mut(axis).clear();
        let count = actions.len();
        self.script.set_actions(axis, actions);
        info!(axis = %axis, points = count, label, "set new baseline");
    }

    /// Replaces the points of `axis` inside `[start_ms, end_ms]` with the
    /// given actions that fall in that window. Points outside are kept and
    /// the previous state stays undoable. Injected points closer than the
    /// minimum interval to a kept neighbour, or to each other, are dropped.
    pub fn clear_actions_in_range_and_inject_new(
        &mut self,
        axis: Axis,
        actions: &[Action],
        start_ms: u64,
        end_ms: u64,
        label: &str,
    ) {
        self.record_undo(axis, label);
        let removed =
            self.script
                .clear_actions_in_time_range(start_ms, end_ms, AxisSelection::from(axis));
        let min_interval = self.script.min_interval_ms();
        let mut merged = self.script.actions(axis).to_vec();
        let mut last_at = merged.iter().rev().find(|a| a.at < start_ms).map(|a| a.at);
        let next_at = merged.iter().find(|a| a.at > end_ms).map(|a| a.at);

        let mut window: Vec<Action> = actions
            .iter()
            .filter(|action| (start_ms..=end_ms).contains(&action.at))
            .copied()
            .collect();
        window.sort_by_key(|action| action.at);

        let before = merged.len();
        for action in window {
            let after_prev = last_at.is_none_or(|prev| action.at - prev >= min_interval);
            let before_next = next_at.is_none_or(|next| next - action.at >= min_interval);
            if after_prev && before_next {
                last_at = Some(action.at);
                merged.push(action);
            }
        }
        let injected = merged.len() - before;
        self.script.set_actions(axis, merged);
        info!(axis = %axis, start_ms, end_ms, removed, injected, label, "patched range");
    }

    /// Writes refined actions for one chapter onto the primary axis.
    pub fn apply_interactive_refinement(&mut self, chapter: &VideoSegment, actions: &[Action]) {
        let start_ms = self.frame_to_ms(chapter.start_frame_id);
        let end_ms = self.frame_to_ms(chapter.end_frame_id);
        self.clear_actions_in_range_and_inject_new(
            Axis::Primary,
            actions,
            start_ms,
            end_ms,
            "Interactive Refinement",
        );
    }

    fn history_mut(&mut self, axis: Axis) -> &mut Vec<Snapshot> {
        match axis {
            Axis::Primary => &mut self.primary_history,
            Axis::Secondary => &mut self.secondary_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline_with_points() -> FunscriptTimeline {
        let mut timeline = FunscriptTimeline::new(10.0, 100, 0);
        for (at, pos) in [(0, 10), (500, 20), (1000, 30), (1500, 40)] {
            timeline.script_mut().add_action(at, Some(pos), Some(50));
        }
        timeline
    }

    #[test]
    fn frame_to_ms_rounds_and_handles_zero_fps() {
        let timeline = FunscriptTimeline::new(29.97, 300, 20);
        assert_eq!(timeline.frame_to_ms(1), 33);
        assert_eq!(timeline.frame_to_ms(299), 9977);
        assert_eq!(FunscriptTimeline::new(0.0, 10, 20).frame_to_ms(5), 0);
    }

    #[test]
    fn scripting_range_open_end_resolves_to_last_frame() {
        let mut timeline = FunscriptTimeline::new(30.0, 300, 20);
        assert_eq!(timeline.effective_scripting_range(), None);
        timeline.set_scripting_range(Some(ScriptingRange::new(10, None)));
        assert_eq!(timeline.effective_scripting_range(), Some(FrameRange::new(10, 299)));
    }

    #[test]
    fn range_patch_keeps_outside_points_and_is_undoable() {
        let mut timeline = timeline_with_points();
        let injected = [Action::new(600, 90), Action::new(2000, 5)];
        timeline.clear_actions_in_range_and_inject_new(Axis::Primary, &injected, 400, 1100, "patch");

        let positions: Vec<(u64, u8)> = timeline
            .script()
            .primary_actions()
            .iter()
            .map(|a| (a.at, a.pos))
            .collect();
        assert_eq!(positions, vec![(0, 10), (600, 90), (1500, 40)]);
        assert_eq!(timeline.script().secondary_actions().len(), 4);

        assert_eq!(timeline.undo(Axis::Primary).as_deref(), Some("patch"));
        assert_eq!(timeline.script().primary_actions().len(), 4);
        assert_eq!(timeline.undo(Axis::Primary), None);
    }

    #[test]
    fn baseline_reset_clears_history() {
        let mut timeline = timeline_with_points();
        timeline.record_undo(Axis::Secondary, "edit");
        timeline.clear_timeline_history_and_set_new_baseline(
            Axis::Secondary,
            vec![Action::new(100, 70)],
            "Stage 2 (Secondary)",
        );
        assert_eq!(timeline.undo_depth(Axis::Secondary), 0);
        assert_eq!(timeline.script().secondary_actions(), &[Action::new(100, 70)]);
        assert_eq!(timeline.script().primary_actions().len(), 4);
    }

    #[test]
    fn refinement_targets_chapter_window_on_primary() {
        let mut timeline = timeline_with_points();
        let chapter = VideoSegment::new(4, 11, "Handjob / Blowjob");
        timeline.apply_interactive_refinement(&chapter, &[Action::new(700, 100)]);
        let ats: Vec<u64> = timeline.script().primary_actions().iter().map(|a| a.at).collect();
        assert_eq!(ats, vec![0, 700, 1500]);
    }

    #[test]
    fn range_patch_keeps_min_interval_at_both_edges() {
        let mut timeline = FunscriptTimeline::new(10.0, 100, 20);
        for (at, pos) in [(0, 10), (390, 20), (1110, 30)] {
            timeline.script_mut().add_action(at, Some(pos), None);
        }
        let injected = [
            Action::new(400, 90),
            Action::new(410, 80),
            Action::new(430, 70),
            Action::new(800, 60),
            Action::new(1095, 50),
        ];
        timeline.clear_actions_in_range_and_inject_new(Axis::Primary, &injected, 400, 1100, "patch");

        let ats: Vec<u64> = timeline.script().primary_actions().iter().map(|a| a.at).collect();
        assert_eq!(ats, vec![0, 390, 410, 430, 800, 1110]);
        assert!(ats.windows(2).all(|pair| pair[1] - pair[0] >= 20));
    }
}
