use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use fungen_funscript::Axis;
use fungen_types::Action;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::timeline::FunscriptTimeline;

/// Which computed axes are written back into the timelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrackingAxisMode {
    #[default]
    Both,
    Vertical,
    Horizontal,
}

impl TrackingAxisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingAxisMode::Both => "both",
            TrackingAxisMode::Vertical => "vertical",
            TrackingAxisMode::Horizontal => "horizontal",
        }
    }
}

impl FromStr for TrackingAxisMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

impl fmt::Display for TrackingAxisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeline that receives single-axis output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputTarget {
    #[default]
    Primary,
    Secondary,
}

impl OutputTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputTarget::Primary => "primary",
            OutputTarget::Secondary => "secondary",
        }
    }

    pub fn axis(&self) -> Axis {
        match self {
            OutputTarget::Primary => Axis::Primary,
            OutputTarget::Secondary => Axis::Secondary,
        }
    }
}

impl FromStr for OutputTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

/// What happens to user chapters when segmentation produces new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChapterPolicy {
    #[default]
    Preserve,
    Overwrite,
}

impl ChapterPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterPolicy::Preserve => "preserve",
            ChapterPolicy::Overwrite => "overwrite",
        }
    }

    pub fn replaces_chapters(&self) -> bool {
        matches!(self, ChapterPolicy::Overwrite)
    }
}

impl FromStr for ChapterPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum TrackerMode {
    #[value(name = "2-stage")]
    #[serde(rename = "2-stage")]
    TwoStage,
    #[default]
    #[value(name = "3-stage")]
    #[serde(rename = "3-stage")]
    ThreeStage,
}

impl TrackerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerMode::TwoStage => "2-stage",
            TrackerMode::ThreeStage => "3-stage",
        }
    }

    pub fn is_three_stage(&self) -> bool {
        matches!(self, TrackerMode::ThreeStage)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrackerMode::TwoStage => "AI CV (2-Stage)",
            TrackerMode::ThreeStage => "AI CV (3-Stage)",
        }
    }
}

impl FromStr for TrackerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Stage2,
    Stage3,
}

impl ResultSource {
    fn label(&self) -> &'static str {
        match self {
            ResultSource::Stage2 => "Stage 2",
            ResultSource::Stage3 => "Stage 3",
        }
    }
}

/// Actions destined for each timeline. `None` leaves that timeline untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedActions {
    pub primary: Option<Vec<Action>>,
    pub secondary: Option<Vec<Action>>,
}

impl RoutedActions {
    fn single(target: OutputTarget, actions: Vec<Action>) -> Self {
        match target {
            OutputTarget::Primary => Self {
                primary: Some(actions),
                secondary: None,
            },
            OutputTarget::Secondary => Self {
                primary: None,
                secondary: Some(actions),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }

    /// Writes the routed axes into `timeline`.
    ///
    /// With `bounds` only `[start_ms, end_ms]` is replaced; otherwise each
    /// routed axis gets a new baseline.
    pub fn apply(
        self,
        timeline: &mut FunscriptTimeline,
        bounds: Option<(u64, u64)>,
        source: ResultSource,
    ) {
        for (axis, actions) in [
            (Axis::Primary, self.primary),
            (Axis::Secondary, self.secondary),
        ] {
            let Some(actions) = actions else {
                debug!(axis = %axis, "timeline left untouched by routing");
                continue;
            };
            let label = format!("{} ({})", source.label(), axis_label(axis));
            match bounds {
                Some((start_ms, end_ms)) => timeline.clear_actions_in_range_and_inject_new(
                    axis, &actions, start_ms, end_ms, &label,
                ),
                None => timeline.clear_timeline_history_and_set_new_baseline(axis, actions, &label),
            }
        }
    }
}

fn axis_label(axis: Axis) -> &'static str {
    match axis {
        Axis::Primary => "Primary",
        Axis::Secondary => "Secondary",
    }
}

/// Maps computed primary/secondary output onto the two timelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingPolicy {
    pub mode: TrackingAxisMode,
    pub target: OutputTarget,
}

impl RoutingPolicy {
    pub fn new(mode: TrackingAxisMode, target: OutputTarget) -> Self {
        Self { mode, target }
    }

    pub fn route(
        &self,
        source: ResultSource,
        primary: Vec<Action>,
        secondary: Vec<Action>,
    ) -> RoutedActions {
        let routed = match self.mode {
            TrackingAxisMode::Both => RoutedActions {
                primary: Some(primary),
                secondary: Some(secondary),
            },
            TrackingAxisMode::Vertical => RoutedActions::single(self.target, primary),
            TrackingAxisMode::Horizontal => match source {
                ResultSource::Stage2 => {
                    info!("stage 2 has no horizontal signal; timelines left untouched");
                    RoutedActions::default()
                }
                ResultSource::Stage3 => RoutedActions::single(self.target, secondary),
            },
        };
        debug!(
            mode = self.mode.as_str(),
            target = self.target.as_str(),
            source = source.label(),
            "routed stage output"
        );
        routed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(pos: u8) -> Vec<Action> {
        vec![Action::new(0, pos), Action::new(500, pos)]
    }

    #[test]
    fn both_mode_routes_each_axis_to_its_timeline() {
        let routed = RoutingPolicy::new(TrackingAxisMode::Both, OutputTarget::Secondary).route(
            ResultSource::Stage3,
            actions(10),
            actions(90),
        );
        assert_eq!(routed.primary, Some(actions(10)));
        assert_eq!(routed.secondary, Some(actions(90)));
    }

    #[test]
    fn vertical_mode_sends_primary_output_to_target() {
        let routed = RoutingPolicy::new(TrackingAxisMode::Vertical, OutputTarget::Secondary)
            .route(ResultSource::Stage2, actions(10), actions(90));
        assert_eq!(routed.primary, None);
        assert_eq!(routed.secondary, Some(actions(10)));
    }

    #[test]
    fn horizontal_mode_only_applies_to_stage3() {
        let policy = RoutingPolicy::new(TrackingAxisMode::Horizontal, OutputTarget::Primary);
        assert!(policy.route(ResultSource::Stage2, actions(10), actions(90)).is_empty());
        let routed = policy.route(ResultSource::Stage3, actions(10), actions(90));
        assert_eq!(routed.primary, Some(actions(90)));
        assert_eq!(routed.secondary, None);
    }

    #[test]
    fn vertical_secondary_leaves_primary_timeline_unchanged() {
        let mut timeline = FunscriptTimeline::new(30.0, 300, 0);
        timeline.script_mut().add_action(100, Some(42), Some(7));
        let before = timeline.script().primary_actions().to_vec();

        RoutingPolicy::new(TrackingAxisMode::Vertical, OutputTarget::Secondary)
            .route(ResultSource::Stage2, actions(80), actions(20))
            .apply(&mut timeline, None, ResultSource::Stage2);

        assert_eq!(timeline.script().primary_actions(), before.as_slice());
        assert_eq!(timeline.script().secondary_actions(), actions(80).as_slice());
    }

    #[test]
    fn mode_names_parse_case_insensitively() {
        assert_eq!("Vertical".parse::<TrackingAxisMode>(), Ok(TrackingAxisMode::Vertical));
        assert_eq!("2-stage".parse::<TrackerMode>(), Ok(TrackerMode::TwoStage));
        assert_eq!("OVERWRITE".parse::<ChapterPolicy>(), Ok(ChapterPolicy::Overwrite));
        assert!("diagonal".parse::<TrackingAxisMode>().is_err());
    }
}
