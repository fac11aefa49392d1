use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FunscriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Primary,
    Secondary,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Primary => "primary",
            Axis::Secondary => "secondary",
        }
    }

    pub fn other(&self) -> Axis {
        match self {
            Axis::Primary => Axis::Secondary,
            Axis::Secondary => Axis::Primary,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = FunscriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Axis::Primary),
            "secondary" => Ok(Axis::Secondary),
            other => Err(FunscriptError::InvalidAxis(other.to_string())),
        }
    }
}

/// One axis or both, for operations that may span the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisSelection {
    Primary,
    Secondary,
    #[default]
    Both,
}

impl AxisSelection {
    pub fn axes(&self) -> &'static [Axis] {
        match self {
            AxisSelection::Primary => &[Axis::Primary],
            AxisSelection::Secondary => &[Axis::Secondary],
            AxisSelection::Both => &[Axis::Primary, Axis::Secondary],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AxisSelection::Primary => "primary",
            AxisSelection::Secondary => "secondary",
            AxisSelection::Both => "both",
        }
    }
}

impl From<Axis> for AxisSelection {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::Primary => AxisSelection::Primary,
            Axis::Secondary => AxisSelection::Secondary,
        }
    }
}

impl fmt::Display for AxisSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AxisSelection {
    type Err = FunscriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(AxisSelection::Both),
            other => Axis::from_str(other).map(AxisSelection::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_axis_names() {
        assert_eq!("Primary".parse::<Axis>().unwrap(), Axis::Primary);
        assert_eq!(" secondary ".parse::<Axis>().unwrap(), Axis::Secondary);
        assert!(matches!(
            "roll".parse::<Axis>(),
            Err(FunscriptError::InvalidAxis(name)) if name == "roll"
        ));
        assert_eq!("both".parse::<AxisSelection>().unwrap(), AxisSelection::Both);
        assert_eq!(
            "secondary".parse::<AxisSelection>().unwrap().axes(),
            &[Axis::Secondary]
        );
    }
}
