//! Two-channel ear routing
//!
//! Every source passes through one stereo mixing stage whose left and right
//! gains are chosen by the session's ear mode. The gains are resolved when a
//! source is scheduled; changing the mode later never affects sources that
//! are already scheduled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which ear(s) receive the stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarMode {
    Left,
    Right,
    #[default]
    Both,
}

impl EarMode {
    /// Per-channel gains `[left, right]` for this mode
    pub fn channel_gains(self) -> [f32; 2] {
        match self {
            EarMode::Left => [1.0, 0.0],
            EarMode::Right => [0.0, 1.0],
            EarMode::Both => [1.0, 1.0],
        }
    }
}

impl fmt::Display for EarMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EarMode::Left => "left",
            EarMode::Right => "right",
            EarMode::Both => "both",
        };
        f.write_str(name)
    }
}

impl FromStr for EarMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(EarMode::Left),
            "right" | "r" => Ok(EarMode::Right),
            "both" | "b" => Ok(EarMode::Both),
            other => Err(format!("unknown ear mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_gains() {
        assert_eq!(EarMode::Left.channel_gains(), [1.0, 0.0]);
        assert_eq!(EarMode::Right.channel_gains(), [0.0, 1.0]);
        assert_eq!(EarMode::Both.channel_gains(), [1.0, 1.0]);
    }

    #[test]
    fn test_default_is_both() {
        assert_eq!(EarMode::default(), EarMode::Both);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("LEFT".parse::<EarMode>().unwrap(), EarMode::Left);
        assert_eq!("r".parse::<EarMode>().unwrap(), EarMode::Right);
        assert!("centre".parse::<EarMode>().is_err());
        assert_eq!(EarMode::Both.to_string(), "both");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&EarMode::Right).unwrap();
        assert_eq!(json, "\"right\"");
        let mode: EarMode = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(mode, EarMode::Left);
    }
}
