use fungen_types::{Action, NEUTRAL_POS, clamp_pos, round_pos};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::axis::{Axis, AxisSelection};
use crate::error::FunscriptError;
use crate::plugins::ParamMap;
use crate::preview::{Filter, FilterKind};
use crate::selection::{Selection, time_range_indices};
use crate::signal::PeakParams;
use crate::speed_limiter::{self, SpeedLimiterConfig};
use crate::stats::ActionStatistics;
use crate::transforms;

pub const DEFAULT_MIN_INTERVAL_MS: u64 = 20;

/// One entry of [`DualAxisFunscript::add_actions_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAction {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub primary_pos: Option<i64>,
    #[serde(default)]
    pub secondary_pos: Option<i64>,
}

/// Two time-ordered action tracks plus their last-timestamp caches.
///
/// All mutation goes through methods so the lists stay sorted, clamped and
/// spaced by `min_interval_ms` (when insertion enforcement applies).
#[derive(Debug, Clone, PartialEq)]
pub struct DualAxisFunscript {
    primary: Vec<Action>,
    secondary: Vec<Action>,
    min_interval_ms: u64,
    last_timestamp_primary: u64,
    last_timestamp_secondary: u64,
}

impl Default for DualAxisFunscript {
    fn default() -> Self {
        Self::new()
    }
}

impl DualAxisFunscript {
    pub fn new() -> Self {
        Self::with_min_interval(DEFAULT_MIN_INTERVAL_MS)
    }

    pub fn with_min_interval(min_interval_ms: u64) -> Self {
        Self {
            primary: Vec::new(),
            secondary: Vec::new(),
            min_interval_ms,
            last_timestamp_primary: 0,
            last_timestamp_secondary: 0,
        }
    }

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval_ms
    }

    pub fn set_min_interval_ms(&mut self, min_interval_ms: u64) {
        self.min_interval_ms = min_interval_ms;
    }

    pub fn actions(&self, axis: Axis) -> &[Action] {
        match axis {
            Axis::Primary => &self.primary,
            Axis::Secondary => &self.secondary,
        }
    }

    pub fn primary_actions(&self) -> &[Action] {
        &self.primary
    }

    pub fn secondary_actions(&self) -> &[Action] {
        &self.secondary
    }

    pub fn last_timestamp(&self, axis: Axis) -> u64 {
        match axis {
            Axis::Primary => self.last_timestamp_primary,
            Axis::Secondary => self.last_timestamp_secondary,
        }
    }

    fn list_mut(&mut self, axis: Axis) -> &mut Vec<Action> {
        match axis {
            Axis::Primary => &mut self.primary,
            Axis::Secondary => &mut self.secondary,
        }
    }

    fn refresh_last_timestamp(&mut self, axis: Axis) {
        let last = self.actions(axis).last().map_or(0, |action| action.at);
        match axis {
            Axis::Primary => self.last_timestamp_primary = last,
            Axis::Secondary => self.last_timestamp_secondary = last,
        }
    }

    /// Replaces an axis wholesale. The list is sorted but not re-spaced.
    pub fn set_actions(&mut self, axis: Axis, mut actions: Vec<Action>) {
        actions.sort_by_key(|action| action.at);
        *self.list_mut(axis) = actions;
        self.refresh_last_timestamp(axis);
    }

    /// Inserts or overwrites a point on each axis whose position is given.
    pub fn add_action(
        &mut self,
        timestamp_ms: u64,
        primary_pos: Option<i64>,
        secondary_pos: Option<i64>,
    ) {
        let min_interval = self.min_interval_ms;
        if let Some(pos) = primary_pos {
            insert_spaced(&mut self.primary, timestamp_ms, pos, min_interval);
            self.refresh_last_timestamp(Axis::Primary);
        }
        if let Some(pos) = secondary_pos {
            insert_spaced(&mut self.secondary, timestamp_ms, pos, min_interval);
            self.refresh_last_timestamp(Axis::Secondary);
        }
    }

    /// Adds many points with spacing suspended, then compacts each axis once.
    pub fn add_actions_batch(&mut self, entries: &[BatchAction]) {
        if entries.is_empty() {
            return;
        }
        let min_interval = self.min_interval_ms;
        self.min_interval_ms = 0;
        for entry in entries {
            self.add_action(entry.timestamp_ms, entry.primary_pos, entry.secondary_pos);
        }
        self.min_interval_ms = min_interval;
        if min_interval > 0 {
            compact(&mut self.primary, min_interval);
            compact(&mut self.secondary, min_interval);
        }
        self.refresh_last_timestamp(Axis::Primary);
        self.refresh_last_timestamp(Axis::Secondary);
        debug!(entries = entries.len(), "added action batch");
    }

    pub fn reset_to_neutral(&mut self, timestamp_ms: u64) {
        self.add_action(timestamp_ms, Some(100), Some(i64::from(NEUTRAL_POS)));
    }

    /// Interpolated position at `time_ms`, holding the end values outside the track.
    pub fn get_value(&self, time_ms: u64, axis: Axis) -> u8 {
        let actions = self.actions(axis);
        let (Some(first), Some(last)) = (actions.first(), actions.last()) else {
            return NEUTRAL_POS;
        };
        let index = actions.partition_point(|action| action.at < time_ms);
        if index == 0 {
            return first.pos;
        }
        if index == actions.len() {
            return last.pos;
        }
        let (before, after) = (actions[index - 1], actions[index]);
        if after.at == time_ms {
            return after.pos;
        }
        let span = after.at - before.at;
        if span == 0 {
            return before.pos;
        }
        let progress = (time_ms - before.at) as f64 / span as f64;
        round_pos(f64::from(before.pos) + (f64::from(after.pos) - f64::from(before.pos)) * progress)
    }

    pub fn get_latest_value(&self, axis: Axis) -> u8 {
        self.actions(axis).last().map_or(NEUTRAL_POS, |action| action.pos)
    }

    pub fn find_next_jump_frame(&self, current_frame: u64, fps: f64, axis: Axis) -> Option<u64> {
        if fps <= 0.0 {
            return None;
        }
        let current_ms = current_frame as f64 * 1000.0 / fps;
        self.actions(axis)
            .iter()
            .filter(|action| action.at as f64 > current_ms)
            .map(|action| (action.at as f64 * fps / 1000.0) as u64)
            .find(|frame| *frame > current_frame)
    }

    pub fn find_prev_jump_frame(&self, current_frame: u64, fps: f64, axis: Axis) -> Option<u64> {
        if fps <= 0.0 {
            return None;
        }
        let current_ms = current_frame as f64 * 1000.0 / fps;
        let mut candidate = None;
        for action in self.actions(axis) {
            if action.at as f64 >= current_ms {
                break;
            }
            let frame = (action.at as f64 * fps / 1000.0) as u64;
            if frame < current_frame {
                candidate = Some(frame);
            }
        }
        candidate
    }

    pub fn get_actions_statistics(&self, axis: Axis) -> ActionStatistics {
        ActionStatistics::from_actions(self.actions(axis))
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        self.secondary.clear();
        self.last_timestamp_primary = 0;
        self.last_timestamp_secondary = 0;
    }

    /// Removes the selected points. `Selection::All` empties the axis.
    pub fn clear_points(&mut self, axes: AxisSelection, selection: &Selection) -> usize {
        let mut removed = 0;
        for &axis in axes.axes() {
            let list = self.list_mut(axis);
            let before = list.len();
            match selection {
                Selection::All => list.clear(),
                _ => {
                    let doomed = selection.point_indices(list);
                    let mut cursor = 0;
                    let mut index = 0;
                    list.retain(|_| {
                        let drop = doomed.get(cursor) == Some(&index);
                        if drop {
                            cursor += 1;
                        }
                        index += 1;
                        !drop
                    });
                }
            }
            removed += before - self.actions(axis).len();
            self.refresh_last_timestamp(axis);
        }
        if removed > 0 {
            info!(axes = %axes, removed, "cleared points");
        }
        removed
    }

    /// Removes every point with `start_ms <= at <= end_ms`.
    pub fn clear_actions_in_time_range(
        &mut self,
        start_ms: u64,
        end_ms: u64,
        axes: AxisSelection,
    ) -> usize {
        let mut removed = 0;
        for &axis in axes.axes() {
            let list = self.list_mut(axis);
            if let Some((start, end)) = time_range_indices(list, start_ms, end_ms) {
                list.drain(start..=end);
                removed += end - start + 1;
            }
            self.refresh_last_timestamp(axis);
        }
        debug!(axes = %axes, start_ms, end_ms, removed, "cleared time range");
        removed
    }

    /// Moves every point by `delta_ms`, never past zero.
    pub fn shift_points_time(&mut self, axis: Axis, delta_ms: i64) -> bool {
        let list = self.list_mut(axis);
        let Some(first) = list.first() else {
            return false;
        };
        let first_at = i64::try_from(first.at).unwrap_or(i64::MAX);
        let delta = delta_ms.max(-first_at);
        if delta == 0 {
            if delta_ms != 0 {
                warn!(axis = %axis, delta_ms, "shift would move points before zero; ignored");
            }
            return false;
        }
        for action in list.iter_mut() {
            action.at = action.at.saturating_add_signed(delta);
        }
        list.sort_by_key(|action| action.at);
        self.refresh_last_timestamp(axis);
        info!(axis = %axis, delta_ms = delta, "shifted points");
        true
    }

    pub fn apply_savitzky_golay(
        &mut self,
        axis: Axis,
        window_length: usize,
        polyorder: usize,
        selection: &Selection,
    ) -> bool {
        self.apply_filter(
            axis,
            &Filter::SavitzkyGolay {
                window_length,
                polyorder,
            },
            selection,
        )
    }

    pub fn simplify_rdp(&mut self, axis: Axis, epsilon: f64, selection: &Selection) -> bool {
        self.apply_filter(axis, &Filter::Rdp { epsilon }, selection)
    }

    pub fn find_peaks_and_valleys(
        &mut self,
        axis: Axis,
        params: &PeakParams,
        selection: &Selection,
    ) -> bool {
        self.apply_filter(axis, &Filter::Peaks(*params), selection)
    }

    pub fn simplify_to_keyframes(
        &mut self,
        axis: Axis,
        position_tolerance: f64,
        time_tolerance_ms: u64,
        selection: &Selection,
    ) -> bool {
        self.apply_filter(
            axis,
            &Filter::Keyframe {
                position_tolerance,
                time_tolerance_ms,
            },
            selection,
        )
    }

    pub fn apply_peak_preserving_resample(
        &mut self,
        axis: Axis,
        resample_rate_ms: u64,
        selection: &Selection,
    ) -> bool {
        self.apply_filter(
            axis,
            &Filter::Resample {
                rate_ms: resample_rate_ms,
            },
            selection,
        )
    }

    pub fn amplify_points_values(
        &mut self,
        axis: Axis,
        scale_factor: f64,
        center_value: f64,
        selection: &Selection,
    ) -> bool {
        self.apply_filter(
            axis,
            &Filter::Amplify {
                scale_factor,
                center_value,
            },
            selection,
        )
    }

    /// Runs the device-compatibility passes over the whole axis.
    pub fn apply_speed_limiter(&mut self, axis: Axis, config: &SpeedLimiterConfig) -> bool {
        self.apply_filter(axis, &Filter::SpeedLimiter(*config), &Selection::All)
    }

    pub fn clamp_points_thresholded(
        &mut self,
        axis: Axis,
        lower_thresh: i64,
        upper_thresh: i64,
        selection: &Selection,
    ) -> bool {
        let result = transforms::map_positions(self.actions(axis), selection, |pos| {
            transforms::threshold(pos, lower_thresh, upper_thresh)
        });
        self.commit(axis, "threshold clamp", result)
    }

    /// Forces every selected point to 0 or 100.
    pub fn clamp_points_values(
        &mut self,
        axis: Axis,
        value: i64,
        selection: &Selection,
    ) -> Result<bool, FunscriptError> {
        if value != 0 && value != 100 {
            warn!(axis = %axis, value, "clamp value must be 0 or 100");
            return Err(FunscriptError::InvalidClampValue(value));
        }
        let result = transforms::map_positions(self.actions(axis), selection, |_| value);
        Ok(self.commit(axis, "clamp", result))
    }

    pub fn invert_points_values(&mut self, axis: Axis, selection: &Selection) -> bool {
        let result =
            transforms::map_positions(self.actions(axis), selection, |pos| 100 - i64::from(pos));
        self.commit(axis, "invert", result)
    }

    pub fn scale_points_to_range(
        &mut self,
        axis: Axis,
        output_min: i64,
        output_max: i64,
        selection: &Selection,
    ) -> bool {
        let result =
            transforms::scale_to_range(self.actions(axis), selection, output_min, output_max);
        self.commit(axis, "percentile rescale", result)
    }

    /// Applies `filter` in place. Returns whether the axis was replaced.
    pub fn apply_filter(&mut self, axis: Axis, filter: &Filter, selection: &Selection) -> bool {
        let result = run_filter(self.actions(axis), filter, selection);
        self.commit(axis, filter.kind().as_str(), result)
    }

    /// Runs `kind` against a copy of the axis and returns the would-be result.
    ///
    /// `Ok(None)` means the filter has nothing to work on for this selection.
    pub fn calculate_filter_preview(
        &self,
        axis: Axis,
        kind: FilterKind,
        params: &ParamMap,
        selection: &Selection,
    ) -> Result<Option<Vec<Action>>, FunscriptError> {
        let filter = Filter::from_params(kind, params)?;
        let actions = self.actions(axis);
        if actions.len() < 2 {
            return Ok(None);
        }
        if kind != FilterKind::SpeedLimiter
            && let Selection::Indices(indices) = selection
            && !indices.is_empty()
            && selection.point_indices(actions).len() < 2
        {
            return Ok(None);
        }
        let preview = match kind {
            FilterKind::Keyframe | FilterKind::Resample => {
                Some(run_filter(actions, &filter, selection).unwrap_or_else(|| actions.to_vec()))
            }
            _ => run_filter(actions, &filter, selection),
        };
        Ok(preview)
    }

    fn commit(&mut self, axis: Axis, operation: &str, result: Option<Vec<Action>>) -> bool {
        let Some(actions) = result else {
            warn!(axis = %axis, operation, "transform not applicable to selection; skipped");
            return false;
        };
        let before = self.actions(axis).len();
        let after = actions.len();
        *self.list_mut(axis) = actions;
        self.refresh_last_timestamp(axis);
        info!(axis = %axis, operation, before, after, "applied transform");
        true
    }
}

/// Shared by the mutating and preview paths.
fn run_filter(actions: &[Action], filter: &Filter, selection: &Selection) -> Option<Vec<Action>> {
    match filter {
        Filter::SavitzkyGolay {
            window_length,
            polyorder,
        } => transforms::savitzky_golay(actions, selection, *window_length, *polyorder),
        Filter::Rdp { epsilon } => transforms::rdp(actions, selection, *epsilon),
        Filter::Peaks(params) => transforms::peaks_and_valleys(actions, selection, params),
        Filter::Amplify {
            scale_factor,
            center_value,
        } => transforms::map_positions(actions, selection, |pos| {
            transforms::amplify(pos, *scale_factor, *center_value)
        }),
        Filter::Keyframe {
            position_tolerance,
            time_tolerance_ms,
        } => transforms::keyframes(actions, selection, *position_tolerance, *time_tolerance_ms),
        Filter::SpeedLimiter(config) => {
            if actions.is_empty() {
                return None;
            }
            let outcome = speed_limiter::limit_speed(actions, config);
            debug!(
                removed = outcome.removed,
                vibrated = outcome.vibrated,
                capped = outcome.capped,
                "speed limiter passes"
            );
            Some(outcome.actions)
        }
        Filter::Resample { rate_ms } => {
            transforms::peak_preserving_resample(actions, selection, *rate_ms)
        }
    }
}

/// Overwrites an exact timestamp, otherwise inserts when the predecessor is
/// far enough away, then re-spaces the list.
fn insert_spaced(list: &mut Vec<Action>, timestamp_ms: u64, pos: i64, min_interval: u64) {
    let pos = clamp_pos(pos);
    let index = list.partition_point(|action| action.at < timestamp_ms);
    let changed = match list.get_mut(index) {
        Some(existing) if existing.at == timestamp_ms => {
            let changed = existing.pos != pos;
            existing.pos = pos;
            changed
        }
        _ => {
            let spaced = index == 0 || timestamp_ms - list[index - 1].at >= min_interval;
            if spaced {
                list.insert(index, Action::new(timestamp_ms, pos));
            }
            spaced
        }
    };
    if changed && min_interval > 0 {
        compact(list, min_interval);
    }
}

/// Keeps the first point of every `min_interval` window.
fn compact(list: &mut Vec<Action>, min_interval: u64) {
    let mut last_kept: Option<u64> = None;
    list.retain(|action| match last_kept {
        Some(last) if action.at - last < min_interval => false,
        _ => {
            last_kept = Some(action.at);
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn script(points: &[(u64, i64)]) -> DualAxisFunscript {
        let mut fs = DualAxisFunscript::with_min_interval(0);
        for &(at, pos) in points {
            fs.add_action(at, Some(pos), None);
        }
        fs
    }

    fn positions(fs: &DualAxisFunscript, axis: Axis) -> Vec<u8> {
        fs.actions(axis).iter().map(|a| a.pos).collect()
    }

    #[test]
    fn add_action_rejects_points_inside_min_interval() {
        let mut fs = DualAxisFunscript::new();
        fs.add_action(0, Some(50), None);
        fs.add_action(10, Some(60), None);
        assert_eq!(fs.primary_actions(), &[Action::new(0, 50)]);

        fs.add_action(25, Some(60), None);
        assert_eq!(
            fs.primary_actions(),
            &[Action::new(0, 50), Action::new(25, 60)]
        );
        assert_eq!(fs.last_timestamp(Axis::Primary), 25);
        assert!(fs.secondary_actions().is_empty());
    }

    #[test]
    fn add_action_overwrites_same_timestamp_and_clamps() {
        let mut fs = DualAxisFunscript::new();
        fs.add_action(100, Some(40), Some(-5));
        fs.add_action(100, Some(140), None);
        assert_eq!(fs.primary_actions(), &[Action::new(100, 100)]);
        assert_eq!(fs.secondary_actions(), &[Action::new(100, 0)]);
    }

    #[test]
    fn insertion_before_a_close_successor_drops_the_successor() {
        let mut fs = DualAxisFunscript::new();
        fs.add_action(0, Some(0), None);
        fs.add_action(40, Some(100), None);
        fs.add_action(25, Some(30), None);
        let times: Vec<u64> = fs.primary_actions().iter().map(|a| a.at).collect();
        assert_eq!(times, vec![0, 25]);
    }

    #[test]
    fn batch_suspends_spacing_then_compacts() {
        let mut fs = DualAxisFunscript::new();
        fs.add_actions_batch(&[
            BatchAction { timestamp_ms: 0, primary_pos: Some(0), secondary_pos: Some(50) },
            BatchAction { timestamp_ms: 5, primary_pos: Some(100), secondary_pos: None },
            BatchAction { timestamp_ms: 30, primary_pos: Some(20), secondary_pos: Some(60) },
        ]);
        let times: Vec<u64> = fs.primary_actions().iter().map(|a| a.at).collect();
        assert_eq!(times, vec![0, 30]);
        assert_eq!(fs.secondary_actions().len(), 2);
        assert_eq!(fs.min_interval_ms(), DEFAULT_MIN_INTERVAL_MS);
        assert_eq!(fs.last_timestamp(Axis::Secondary), 30);
    }

    #[test]
    fn get_value_interpolates_and_holds_ends() {
        let fs = script(&[(100, 0), (200, 100)]);
        assert_eq!(fs.get_value(0, Axis::Primary), 0);
        assert_eq!(fs.get_value(150, Axis::Primary), 50);
        assert_eq!(fs.get_value(200, Axis::Primary), 100);
        assert_eq!(fs.get_value(900, Axis::Primary), 100);
        assert_eq!(fs.get_value(150, Axis::Secondary), NEUTRAL_POS);
        assert_eq!(fs.get_latest_value(Axis::Secondary), NEUTRAL_POS);
    }

    #[test]
    fn jump_frames_skip_points_on_the_current_frame() {
        let fs = script(&[(0, 0), (1010, 50), (1020, 60), (2000, 100)]);
        // frame 30 at 30 fps is 1000 ms; 1010 and 1020 both land on frame 30.
        assert_eq!(fs.find_next_jump_frame(30, 30.0, Axis::Primary), Some(60));
        assert_eq!(fs.find_prev_jump_frame(60, 30.0, Axis::Primary), Some(30));
        assert_eq!(fs.find_prev_jump_frame(30, 30.0, Axis::Primary), Some(0));
        assert_eq!(fs.find_next_jump_frame(60, 30.0, Axis::Primary), None);
        assert_eq!(fs.find_next_jump_frame(0, 0.0, Axis::Primary), None);
    }

    #[test]
    fn thresholded_clamp_gates_extremes() {
        let mut fs = script(&[(0, 5), (1, 50), (2, 95)]);
        assert!(fs.clamp_points_thresholded(Axis::Primary, 10, 90, &Selection::All));
        assert_eq!(positions(&fs, Axis::Primary), vec![0, 50, 100]);
    }

    #[test]
    fn clamp_values_only_accepts_extremes() {
        let mut fs = script(&[(0, 20), (100, 30), (200, 40)]);
        assert_matches!(
            fs.clamp_points_values(Axis::Primary, 50, &Selection::All),
            Err(FunscriptError::InvalidClampValue(50))
        );
        assert!(fs
            .clamp_points_values(Axis::Primary, 100, &Selection::indices([0, 2]))
            .unwrap());
        assert_eq!(positions(&fs, Axis::Primary), vec![100, 30, 100]);
    }

    #[test]
    fn invert_and_amplify_touch_only_the_selection() {
        let mut fs = script(&[(0, 20), (100, 60), (200, 70)]);
        fs.invert_points_values(Axis::Primary, &Selection::time_range(50, 250));
        assert_eq!(positions(&fs, Axis::Primary), vec![20, 40, 30]);

        fs.amplify_points_values(Axis::Primary, 2.0, 50.0, &Selection::All);
        assert_eq!(positions(&fs, Axis::Primary), vec![0, 30, 10]);
    }

    #[test]
    fn shift_never_goes_below_zero() {
        let mut fs = script(&[(100, 0), (300, 100)]);
        assert!(fs.shift_points_time(Axis::Primary, -500));
        let times: Vec<u64> = fs.primary_actions().iter().map(|a| a.at).collect();
        assert_eq!(times, vec![0, 200]);
        assert!(!fs.shift_points_time(Axis::Primary, -10));
        assert_eq!(fs.last_timestamp(Axis::Primary), 200);
    }

    #[test]
    fn clears_by_selection_and_time_range() {
        let mut fs = script(&[(0, 0), (100, 10), (200, 20), (300, 30)]);
        fs.add_action(100, None, Some(50));
        assert_eq!(fs.clear_points(AxisSelection::Primary, &Selection::indices([1, 3, 9])), 2);
        assert_eq!(positions(&fs, Axis::Primary), vec![0, 20]);

        assert_eq!(fs.clear_actions_in_time_range(0, 150, AxisSelection::Both), 2);
        assert_eq!(positions(&fs, Axis::Primary), vec![20]);
        assert!(fs.secondary_actions().is_empty());
        assert_eq!(fs.last_timestamp(Axis::Secondary), 0);
    }

    #[test]
    fn preview_matches_apply_without_mutating() {
        let mut fs = script(&[(0, 0), (100, 100), (120, 97), (140, 100), (300, 0), (400, 100)]);
        let original = fs.clone();
        let preview = fs
            .calculate_filter_preview(Axis::Primary, FilterKind::Keyframe, &ParamMap::new(), &Selection::All)
            .unwrap()
            .unwrap();
        assert_eq!(fs, original);

        assert!(fs.simplify_to_keyframes(Axis::Primary, 10.0, 50, &Selection::All));
        assert_eq!(fs.primary_actions(), preview.as_slice());
    }

    #[test]
    fn preview_returns_none_for_thin_selections() {
        let fs = script(&[(0, 0), (100, 100), (200, 0)]);
        let params = ParamMap::new();
        assert_eq!(
            fs.calculate_filter_preview(Axis::Primary, FilterKind::Rdp, &params, &Selection::indices([1]))
                .unwrap(),
            None
        );
        assert_eq!(
            fs.calculate_filter_preview(Axis::Primary, FilterKind::SavitzkyGolay, &params, &Selection::All)
                .unwrap(),
            None
        );
        let capped = fs
            .calculate_filter_preview(
                Axis::Primary,
                FilterKind::SpeedLimiter,
                json!({"speed_threshold": 200.0}).as_object().unwrap(),
                &Selection::indices([1]),
            )
            .unwrap()
            .unwrap();
        assert_eq!(capped[1].pos, 20);
    }

    #[test]
    fn flat_selection_rescales_to_midpoint() {
        let mut fs = script(&[(0, 30), (100, 30), (200, 30)]);
        assert!(fs.scale_points_to_range(Axis::Primary, 0, 100, &Selection::All));
        assert_eq!(positions(&fs, Axis::Primary), vec![50, 50, 50]);
    }

    #[test]
    fn reset_to_neutral_writes_both_axes() {
        let mut fs = DualAxisFunscript::new();
        fs.reset_to_neutral(500);
        assert_eq!(fs.primary_actions(), &[Action::new(500, 100)]);
        assert_eq!(fs.secondary_actions(), &[Action::new(500, 50)]);
    }
}
