//! Pure transforms over one axis.
//!
//! Each function takes the current action list and returns the full new list,
//! or `None` when the transform does not apply (too few points, window larger
//! than the segment, empty selection). The store swaps the result in; the
//! preview path returns it untouched.

use fungen_types::{Action, NEUTRAL_POS, clamp_pos, round_pos};

use crate::selection::Selection;
use crate::signal::{self, PeakParams};

/// Odd window of at least one sample, and a polynomial order below it.
pub fn normalize_savgol(window_length: usize, polyorder: usize) -> (usize, usize) {
    let window = if window_length % 2 == 0 {
        window_length + 1
    } else {
        window_length
    };
    (window, polyorder.min(window - 1))
}

pub fn savitzky_golay(
    actions: &[Action],
    selection: &Selection,
    window_length: usize,
    polyorder: usize,
) -> Option<Vec<Action>> {
    let indices = selection.filter_indices(actions);
    if indices.is_empty() {
        return None;
    }
    let (window, poly) = normalize_savgol(window_length, polyorder);
    if indices.len() < window {
        return None;
    }
    let positions: Vec<f64> = indices.iter().map(|&i| f64::from(actions[i].pos)).collect();
    let smoothed = signal::savgol_filter(&positions, window, poly)?;
    let mut out = actions.to_vec();
    for (&index, value) in indices.iter().zip(smoothed) {
        out[index].pos = round_pos(value);
    }
    Some(out)
}

pub fn rdp(actions: &[Action], selection: &Selection, epsilon: f64) -> Option<Vec<Action>> {
    let (start, end) = selection.span(actions, 2)?;
    let segment = &actions[start..=end];
    let points: Vec<(f64, f64)> = segment
        .iter()
        .map(|a| (a.at as f64, f64::from(a.pos)))
        .collect();
    let mut simplified: Vec<Action> = signal::rdp_keep_indices(&points, epsilon)
        .into_iter()
        .map(|i| segment[i])
        .collect();
    if simplified.len() >= 2 && simplified.first() == simplified.last() {
        simplified.pop();
    }
    Some(splice(actions, start, end, simplified))
}

pub fn peaks_and_valleys(
    actions: &[Action],
    selection: &Selection,
    params: &PeakParams,
) -> Option<Vec<Action>> {
    if actions.len() < 3 {
        return None;
    }
    let (start, end) = selection.span(actions, 3)?;
    let segment = &actions[start..=end];
    let positions: Vec<f64> = segment.iter().map(|a| f64::from(a.pos)).collect();
    let inverted: Vec<f64> = positions.iter().map(|p| 100.0 - p).collect();

    let mut keep = vec![false; segment.len()];
    keep[0] = true;
    keep[segment.len() - 1] = true;
    for index in signal::find_peaks(&positions, params)
        .into_iter()
        .chain(signal::find_peaks(&inverted, params))
    {
        keep[index] = true;
    }
    let reduced = segment
        .iter()
        .zip(keep)
        .filter_map(|(action, keep)| keep.then_some(*action))
        .collect();
    Some(splice(actions, start, end, reduced))
}

/// Interior indices of strict peaks and valleys; a flat-topped extremum
/// contributes its midpoint.
pub fn extremum_indices(segment: &[Action]) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::new();
    if segment.len() < 3 {
        return out;
    }
    let last = segment.len() - 1;
    for i in 1..last {
        let prev = segment[i - 1].pos;
        let curr = segment[i].pos;
        let next = segment[i + 1].pos;
        if (curr > prev && curr > next) || (curr < prev && curr < next) {
            out.push(i);
        } else if curr == next && curr != prev {
            let mut j = i;
            while j < last && segment[j].pos == curr {
                j += 1;
            }
            let after = segment[j].pos;
            if (curr > prev && curr > after) || (curr < prev && curr < after) {
                let mid = (i + j - 1) / 2;
                if out.last() != Some(&mid) {
                    out.push(mid);
                }
            }
        }
    }
    out
}

/// Reduces a segment to its significant peaks and valleys.
pub fn keyframe_segment(
    segment: &[Action],
    position_tolerance: f64,
    time_tolerance_ms: u64,
) -> Vec<Action> {
    if segment.len() < 3 {
        return segment.to_vec();
    }
    let mut extrema = Vec::with_capacity(segment.len());
    extrema.push(segment[0]);
    extrema.extend(extremum_indices(segment).into_iter().map(|i| segment[i]));
    extrema.push(segment[segment.len() - 1]);

    // Significance changes whenever a neighbour goes away, so rescore every round.
    while extrema.len() > 2 {
        let mut weakest: Option<(usize, f64)> = None;
        for i in 1..extrema.len() - 1 {
            let score = significance(&extrema[i - 1], &extrema[i], &extrema[i + 1]);
            if weakest.is_none_or(|(_, min)| score < min) {
                weakest = Some((i, score));
            }
        }
        match weakest {
            Some((index, score)) if score < position_tolerance => {
                extrema.remove(index);
            }
            _ => break,
        }
    }

    if time_tolerance_ms == 0 || extrema.len() < 2 {
        return extrema;
    }
    let neutral = i16::from(NEUTRAL_POS);
    let mut spaced: Vec<Action> = vec![extrema[0]];
    for candidate in extrema.into_iter().skip(1) {
        let Some(last) = spaced.last_mut() else {
            break;
        };
        if candidate.at.saturating_sub(last.at) >= time_tolerance_ms {
            spaced.push(candidate);
        } else if (i16::from(candidate.pos) - neutral).abs() > (i16::from(last.pos) - neutral).abs()
        {
            *last = candidate;
        }
    }
    spaced
}

fn significance(prev: &Action, curr: &Action, next: &Action) -> f64 {
    let duration = next.at as f64 - prev.at as f64;
    if duration <= 0.0 {
        return f64::INFINITY;
    }
    let progress = (curr.at as f64 - prev.at as f64) / duration;
    let projected = f64::from(prev.pos) + progress * (f64::from(next.pos) - f64::from(prev.pos));
    (f64::from(curr.pos) - projected).abs()
}

pub fn keyframes(
    actions: &[Action],
    selection: &Selection,
    position_tolerance: f64,
    time_tolerance_ms: u64,
) -> Option<Vec<Action>> {
    if actions.len() < 3 {
        return None;
    }
    let (start, end) = selection.span(actions, 3)?;
    let reduced = keyframe_segment(&actions[start..=end], position_tolerance, time_tolerance_ms);
    Some(splice(actions, start, end, reduced))
}

/// Regenerates points at `rate_ms` between extrema using cosine easing.
pub fn peak_preserving_resample(
    actions: &[Action],
    selection: &Selection,
    rate_ms: u64,
) -> Option<Vec<Action>> {
    if actions.len() < 3 || rate_ms == 0 {
        return None;
    }
    let (start, end) = selection.span(actions, 3)?;
    let segment = &actions[start..=end];

    let mut anchors = vec![segment[0]];
    for index in extremum_indices(segment) {
        if anchors.last() != Some(&segment[index]) {
            anchors.push(segment[index]);
        }
    }
    let last = segment[segment.len() - 1];
    if anchors.last() != Some(&last) {
        anchors.push(last);
    }

    let mut resampled = vec![anchors[0]];
    for pair in anchors.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if to.at <= from.at {
            continue;
        }
        let duration = (to.at - from.at) as f64;
        let delta = f64::from(to.pos) - f64::from(from.pos);
        let mut t = from.at + rate_ms;
        while t < to.at {
            let progress = (t - from.at) as f64 / duration;
            let eased = (1.0 - (progress * std::f64::consts::PI).cos()) / 2.0;
            resampled.push(Action::new(t, round_pos(f64::from(from.pos) + eased * delta)));
            t += rate_ms;
        }
        if resampled.last().is_none_or(|a| a.at < to.at) {
            resampled.push(to);
        }
    }
    Some(splice(actions, start, end, resampled))
}

/// Rescales the selection so its 10th..90th percentile band spans `[output_min, output_max]`.
pub fn scale_to_range(
    actions: &[Action],
    selection: &Selection,
    output_min: i64,
    output_max: i64,
) -> Option<Vec<Action>> {
    if actions.len() < 2 {
        return None;
    }
    let indices = selection.point_indices(actions);
    if indices.len() < 2 {
        return None;
    }
    let positions: Vec<f64> = indices.iter().map(|&i| f64::from(actions[i].pos)).collect();
    let low = signal::percentile(&positions, 10.0)?;
    let high = signal::percentile(&positions, 90.0)?;
    let range = high - low;
    let target = (output_max - output_min) as f64;

    let mut out = actions.to_vec();
    if range <= 0.0 {
        let flat = round_pos(output_min as f64 + target / 2.0);
        for &index in &indices {
            out[index].pos = flat;
        }
        return Some(out);
    }
    for &index in &indices {
        let normalized = ((f64::from(out[index].pos) - low) / range).clamp(0.0, 1.0);
        out[index].pos = round_pos(output_min as f64 + normalized * target);
    }
    Some(out)
}

/// Applies `op` to each selected position, clamping the result.
pub fn map_positions(
    actions: &[Action],
    selection: &Selection,
    op: impl Fn(u8) -> i64,
) -> Option<Vec<Action>> {
    let indices = selection.point_indices(actions);
    if indices.is_empty() {
        return None;
    }
    let mut out = actions.to_vec();
    for index in indices {
        out[index].pos = clamp_pos(op(out[index].pos));
    }
    Some(out)
}

pub fn amplify(pos: u8, scale_factor: f64, center_value: f64) -> i64 {
    let value = center_value + (f64::from(pos) - center_value) * scale_factor;
    i64::from(round_pos(value))
}

pub fn threshold(pos: u8, lower: i64, upper: i64) -> i64 {
    let pos = i64::from(pos);
    if pos < lower {
        0
    } else if pos > upper {
        100
    } else {
        pos
    }
}

/// `actions[..start] + replacement + actions[end + 1..]`.
pub fn splice(actions: &[Action], start: usize, end: usize, replacement: Vec<Action>) -> Vec<Action> {
    let mut out = Vec::with_capacity(start + replacement.len() + actions.len() - end - 1);
    out.extend_from_slice(&actions[..start]);
    out.extend(replacement);
    out.extend_from_slice(&actions[end + 1..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(points: &[(u64, u8)]) -> Vec<Action> {
        points.iter().map(|&(at, pos)| Action::new(at, pos)).collect()
    }

    fn positions(actions: &[Action]) -> Vec<u8> {
        actions.iter().map(|a| a.pos).collect()
    }

    #[test]
    fn savgol_window_is_forced_odd() {
        assert_eq!(normalize_savgol(6, 3), (7, 3));
        assert_eq!(normalize_savgol(5, 9), (5, 4));
        assert_eq!(normalize_savgol(0, 2), (1, 0));
    }

    #[test]
    fn savgol_skips_segments_shorter_than_window() {
        let input = actions(&[(0, 10), (100, 90), (200, 10), (300, 90)]);
        assert!(savitzky_golay(&input, &Selection::All, 7, 3).is_none());
    }

    #[test]
    fn savgol_only_rewrites_selected_indices() {
        let input = actions(&[
            (0, 0),
            (100, 100),
            (200, 0),
            (300, 100),
            (400, 0),
            (500, 100),
            (600, 0),
        ]);
        let out = savitzky_golay(&input, &Selection::indices([0, 2, 4]), 3, 1).unwrap();
        assert_eq!(positions(&out), vec![0, 100, 0, 100, 0, 100, 0]);

        let out = savitzky_golay(&input, &Selection::indices([1, 2, 3]), 3, 0).unwrap();
        assert_eq!(out[1].pos, 67);
        assert_eq!(out[2].pos, 67);
        assert_eq!(out[3].pos, 67);
        assert_eq!(out[0], input[0]);
        assert_eq!(out[4], input[4]);
    }

    #[test]
    fn rdp_keeps_prefix_and_suffix() {
        let input = actions(&[(0, 0), (100, 10), (200, 20), (300, 30), (400, 90), (500, 0)]);
        let out = rdp(&input, &Selection::indices([1, 3]), 1.0).unwrap();
        assert_eq!(
            out,
            actions(&[(0, 0), (100, 10), (300, 30), (400, 90), (500, 0)])
        );
    }

    #[test]
    fn peaks_keep_endpoints_and_extrema() {
        let input = actions(&[(0, 50), (100, 80), (200, 70), (300, 20), (400, 30), (500, 60)]);
        let out = peaks_and_valleys(&input, &Selection::All, &PeakParams::default()).unwrap();
        assert_eq!(positions(&out), vec![50, 80, 20, 60]);
    }

    #[test]
    fn extremum_indices_resolve_plateau_midpoint() {
        let input = actions(&[(0, 10), (100, 90), (200, 90), (300, 90), (400, 10), (500, 40)]);
        assert_eq!(extremum_indices(&input), vec![2, 4]);

        let shoulder = actions(&[(0, 10), (100, 20), (200, 20), (300, 30)]);
        assert!(extremum_indices(&shoulder).is_empty());
    }

    #[test]
    fn keyframes_drop_insignificant_wiggles() {
        let input = actions(&[
            (0, 0),
            (100, 100),
            (120, 97),
            (140, 100),
            (300, 0),
            (400, 100),
        ]);
        let out = keyframe_segment(&input, 10.0, 50);
        assert_eq!(positions(&out), vec![0, 100, 0, 100]);
    }

    #[test]
    fn keyframe_time_tolerance_prefers_far_from_neutral() {
        let input = actions(&[(0, 50), (100, 10), (120, 95), (300, 50)]);
        let out = keyframe_segment(&input, 1.0, 50);
        assert_eq!(out, actions(&[(0, 50), (120, 95), (300, 50)]));
    }

    #[test]
    fn resample_eases_between_anchors() {
        let input = actions(&[(0, 0), (50, 40), (100, 100), (200, 0)]);
        let out = peak_preserving_resample(&input, &Selection::All, 25).unwrap();
        let times: Vec<u64> = out.iter().map(|a| a.at).collect();
        assert_eq!(times, vec![0, 25, 50, 75, 100, 125, 150, 175, 200]);
        assert_eq!(out[2].pos, 50);
        assert_eq!(out[4].pos, 100);
        assert_eq!(out[6].pos, 50);
    }

    #[test]
    fn scale_maps_flat_selection_to_midpoint() {
        let input = actions(&[(0, 30), (100, 30), (200, 30)]);
        let out = scale_to_range(&input, &Selection::All, 0, 100).unwrap();
        assert_eq!(positions(&out), vec![50, 50, 50]);
    }

    #[test]
    fn scale_clips_outside_percentile_band() {
        let input = actions(&[(0, 0), (100, 40), (200, 50), (300, 60), (400, 100)]);
        let out = scale_to_range(&input, &Selection::All, 0, 100).unwrap();
        assert_eq!(positions(&out), vec![0, 35, 50, 65, 100]);
    }

    #[test]
    fn threshold_is_a_hard_gate() {
        let input = actions(&[(0, 5), (1, 50), (2, 95)]);
        let out = map_positions(&input, &Selection::All, |p| threshold(p, 10, 90)).unwrap();
        assert_eq!(positions(&out), vec![0, 50, 100]);
    }

    #[test]
    fn amplify_rounds_half_to_even_and_clamps() {
        assert_eq!(amplify(60, 1.25, 50.0), 62);
        assert_eq!(amplify(90, 2.0, 50.0), 100);
        assert_eq!(amplify(10, 2.0, 50.0), 0);
    }
}
