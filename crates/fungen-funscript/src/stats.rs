use fungen_types::Action;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionStatistics {
    pub num_points: usize,
    pub duration_scripted_s: f64,
    pub avg_speed_pos_per_s: f64,
    pub avg_intensity_percent: f64,
    pub min_pos: i32,
    pub max_pos: i32,
    pub avg_interval_ms: f64,
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
    pub total_travel_dist: u64,
    pub num_strokes: u64,
}

impl Default for ActionStatistics {
    fn default() -> Self {
        Self {
            num_points: 0,
            duration_scripted_s: 0.0,
            avg_speed_pos_per_s: 0.0,
            avg_intensity_percent: 0.0,
            min_pos: -1,
            max_pos: -1,
            avg_interval_ms: 0.0,
            min_interval_ms: -1.0,
            max_interval_ms: -1.0,
            total_travel_dist: 0,
            num_strokes: 0,
        }
    }
}

impl ActionStatistics {
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut stats = Self::default();
        if actions.is_empty() {
            return stats;
        }
        stats.num_points = actions.len();
        stats.min_pos = actions.iter().map(|a| i32::from(a.pos)).min().unwrap_or(-1);
        stats.max_pos = actions.iter().map(|a| i32::from(a.pos)).max().unwrap_or(-1);
        if actions.len() < 2 {
            return stats;
        }

        let first = actions[0].at;
        let last = actions[actions.len() - 1].at;
        stats.duration_scripted_s = last.saturating_sub(first) as f64 / 1000.0;

        let mut travel = 0u64;
        let mut moving_ms = 0u64;
        let mut intervals = Vec::with_capacity(actions.len() - 1);
        let mut reversals = 0u64;
        let mut last_direction = 0i8;
        for pair in actions.windows(2) {
            let delta_pos = u64::from(pair[0].pos.abs_diff(pair[1].pos));
            let delta_ms = pair[1].at.saturating_sub(pair[0].at);
            travel += delta_pos;
            if delta_ms > 0 {
                intervals.push(delta_ms);
                if delta_pos > 0 {
                    moving_ms += delta_ms;
                }
            }
            let direction = match pair[1].pos.cmp(&pair[0].pos) {
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
            };
            if direction != 0 {
                if last_direction != 0 && direction != last_direction {
                    reversals += 1;
                }
                last_direction = direction;
            }
        }

        stats.total_travel_dist = travel;
        stats.num_strokes = match (reversals, travel) {
            (0, 0) => 0,
            (0, _) => 1,
            (n, _) => n,
        };
        if moving_ms > 0 {
            stats.avg_speed_pos_per_s = travel as f64 / (moving_ms as f64 / 1000.0);
        }
        stats.avg_intensity_percent = travel as f64 / (actions.len() - 1) as f64;
        if let (Some(min), Some(max)) = (intervals.iter().min(), intervals.iter().max()) {
            stats.avg_interval_ms =
                intervals.iter().sum::<u64>() as f64 / intervals.len() as f64;
            stats.min_interval_ms = *min as f64;
            stats.max_interval_ms = *max as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_single_point_defaults() {
        let empty = ActionStatistics::from_actions(&[]);
        assert_eq!(empty.min_pos, -1);
        assert_eq!(empty.min_interval_ms, -1.0);

        let single = ActionStatistics::from_actions(&[Action::new(100, 42)]);
        assert_eq!(single.num_points, 1);
        assert_eq!((single.min_pos, single.max_pos), (42, 42));
        assert_eq!(single.num_strokes, 0);
    }

    #[test]
    fn counts_travel_and_reversals() {
        let actions = [
            Action::new(0, 0),
            Action::new(500, 100),
            Action::new(1000, 100),
            Action::new(1500, 0),
            Action::new(1700, 50),
        ];
        let stats = ActionStatistics::from_actions(&actions);
        assert_eq!(stats.total_travel_dist, 250);
        assert_eq!(stats.num_strokes, 2);
        assert_eq!(stats.duration_scripted_s, 1.7);
        assert_eq!(stats.avg_speed_pos_per_s, 250.0 / 1.2);
        assert_eq!(stats.avg_intensity_percent, 62.5);
        assert_eq!(stats.avg_interval_ms, 425.0);
        assert_eq!((stats.min_interval_ms, stats.max_interval_ms), (200.0, 500.0));
    }

    #[test]
    fn monotonic_motion_is_one_stroke() {
        let actions = [Action::new(0, 0), Action::new(100, 50), Action::new(200, 90)];
        assert_eq!(ActionStatistics::from_actions(&actions).num_strokes, 1);
    }
}
