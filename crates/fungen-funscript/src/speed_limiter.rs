use fungen_types::{Action, clamp_pos};
use serde::{Deserialize, Serialize};

/// Device-compatibility pass over a whole axis.
///
/// The flat-motion thresholds are tuned for a specific playback device and
/// are kept configurable rather than folded into the algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedLimiterConfig {
    pub min_interval: u64,
    pub vibe_amount: i64,
    pub speed_threshold: f64,
    pub flat_travel_limit: i64,
    pub vibe_interval_limit: u64,
    pub vibe_min_interval_cutoff: u64,
    pub oscillation_threshold: i64,
}

impl Default for SpeedLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: 60,
            vibe_amount: 10,
            speed_threshold: 500.0,
            flat_travel_limit: 16,
            vibe_interval_limit: 135,
            vibe_min_interval_cutoff: 134,
            oscillation_threshold: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedLimitOutcome {
    pub actions: Vec<Action>,
    pub removed: usize,
    pub vibrated: usize,
    pub capped: usize,
}

impl SpeedLimitOutcome {
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.vibrated > 0 || self.capped > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Flat,
}

fn direction(from: i64, to: i64) -> Direction {
    match to.cmp(&from) {
        std::cmp::Ordering::Greater => Direction::Up,
        std::cmp::Ordering::Less => Direction::Down,
        std::cmp::Ordering::Equal => Direction::Flat,
    }
}

/// Runs interval removal, flat-section vibration and speed capping, in that order.
pub fn limit_speed(actions: &[Action], config: &SpeedLimiterConfig) -> SpeedLimitOutcome {
    let (kept, removed) = remove_short_intervals(actions, config.min_interval);
    let mut working: Vec<(u64, i64)> = kept.iter().map(|a| (a.at, i64::from(a.pos))).collect();
    let vibrated = insert_vibrations(&mut working, config);
    let capped = cap_speed(&mut working, config.speed_threshold);
    SpeedLimitOutcome {
        actions: working
            .into_iter()
            .map(|(at, pos)| Action::clamped(at, pos))
            .collect(),
        removed,
        vibrated,
        capped,
    }
}

fn remove_short_intervals(actions: &[Action], min_interval: u64) -> (Vec<Action>, usize) {
    let Some(last) = actions.last() else {
        return (Vec::new(), 0);
    };
    let mut kept = vec![*last];
    let mut last_at = last.at;
    let mut removed = 0;
    for action in actions.iter().rev().skip(1) {
        if action.at.abs_diff(last_at) < min_interval {
            removed += 1;
        } else {
            kept.push(*action);
            last_at = action.at;
        }
    }
    kept.sort_by_key(|action| action.at);
    (kept, removed)
}

fn insert_vibrations(actions: &mut [(u64, i64)], config: &SpeedLimiterConfig) -> usize {
    if actions.len() <= 2 {
        return 0;
    }
    let mut modified = 0;
    let mut last_action_at = actions[0].0;
    let mut last_vibe: Option<Direction> = None;
    let mut unmodified_last = 0i64;

    for i in 1..actions.len() {
        let (at, pos) = actions[i];
        let last_pos = actions[i - 1].1;
        let next_pos = actions.get(i + 1).map(|(_, p)| *p);

        let travel = (pos - unmodified_last).abs();
        let unmodified_direction = direction(unmodified_last, pos);
        let last_direction = direction(last_pos, pos);
        let next_direction = next_pos.map_or(Direction::Flat, |next| direction(pos, next));

        let already_vibing = next_pos.is_some_and(|next| {
            unmodified_direction != next_direction
                && ((pos - unmodified_last).abs() > config.oscillation_threshold
                    || (pos - next).abs() > config.oscillation_threshold)
        });
        let next_travel = next_pos.map(|next| (next - pos).abs());
        let interval = at.saturating_sub(last_action_at);
        unmodified_last = pos;

        let flat = travel < config.flat_travel_limit
            && next_travel.is_some_and(|t| t < config.flat_travel_limit);
        let mut new_pos = pos;
        if flat
            && interval < config.vibe_interval_limit
            && !already_vibing
            && config.min_interval <= config.vibe_min_interval_cutoff
        {
            let vibe = last_vibe.unwrap_or(if last_direction == Direction::Up || pos < 6 {
                Direction::Down
            } else if last_direction == Direction::Down || pos > 94 {
                Direction::Up
            } else if pos < 50 {
                Direction::Down
            } else {
                Direction::Up
            });
            if vibe == Direction::Down {
                new_pos += config.vibe_amount;
                last_vibe = Some(Direction::Up);
            } else {
                new_pos -= config.vibe_amount;
                last_vibe = Some(Direction::Down);
            }
            modified += 1;
        } else {
            last_vibe = None;
        }
        last_action_at = at;
        actions[i].1 = i64::from(clamp_pos(new_pos));
    }
    modified
}

fn cap_speed(actions: &mut [(u64, i64)], speed_threshold: f64) -> usize {
    let mut capped = 0;
    for i in 1..actions.len() {
        let (prev_at, prev_pos) = actions[i - 1];
        let (at, pos) = actions[i];
        let dt = at.saturating_sub(prev_at) as f64 / 1000.0;
        if dt == 0.0 {
            continue;
        }
        let speed = (pos - prev_pos).abs() as f64 / dt;
        if speed > speed_threshold {
            capped += 1;
            let allowed = speed_threshold * dt;
            let target = if pos > prev_pos {
                prev_pos as f64 + allowed
            } else {
                prev_pos as f64 - allowed
            };
            actions[i].1 = i64::from(clamp_pos(target as i64));
        }
    }
    capped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(points: &[(u64, u8)]) -> Vec<Action> {
        points.iter().map(|&(at, pos)| Action::new(at, pos)).collect()
    }

    #[test]
    fn removes_points_closer_than_min_interval_from_the_end() {
        let input = actions(&[(0, 0), (30, 100), (100, 0), (130, 100), (200, 0)]);
        let config = SpeedLimiterConfig {
            speed_threshold: 10_000.0,
            min_interval: 60,
            vibe_min_interval_cutoff: 0,
            ..Default::default()
        };
        let outcome = limit_speed(&input, &config);
        let times: Vec<u64> = outcome.actions.iter().map(|a| a.at).collect();
        assert_eq!(times, vec![30, 130, 200]);
        assert_eq!(outcome.removed, 2);
    }

    #[test]
    fn caps_speed_left_to_right() {
        let input = actions(&[(0, 0), (100, 100), (200, 0)]);
        let config = SpeedLimiterConfig {
            speed_threshold: 200.0,
            min_interval: 0,
            vibe_min_interval_cutoff: 0,
            ..Default::default()
        };
        let outcome = limit_speed(&input, &config);
        assert_eq!(outcome.actions[1].pos, 20);
        assert_eq!(outcome.actions[2].pos, 0);
        assert_eq!(outcome.capped, 1);
    }

    #[test]
    fn flat_runs_alternate_vibration_direction() {
        let input = actions(&[(0, 50), (100, 52), (200, 50), (300, 52), (400, 50)]);
        let config = SpeedLimiterConfig {
            min_interval: 60,
            ..Default::default()
        };
        let outcome = limit_speed(&input, &config);
        assert_eq!(outcome.vibrated, 2);
        let positions: Vec<u8> = outcome.actions.iter().map(|a| a.pos).collect();
        assert_eq!(positions, vec![50, 52, 40, 62, 50]);
    }

    #[test]
    fn untouched_when_nothing_to_do() {
        let input = actions(&[(0, 0), (500, 100)]);
        let outcome = limit_speed(&input, &SpeedLimiterConfig::default());
        assert!(!outcome.changed());
        assert_eq!(outcome.actions, input);
    }
}
