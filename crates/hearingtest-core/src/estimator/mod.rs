//! Threshold estimators
//!
//! Each estimator owns its state for one session, turns the subject's
//! responses into the next stimulus parameter, and reports a final
//! [`ThresholdEstimate`]:
//! - Ascending level search in dB HL ([`level`])
//! - Fixed-schedule digits-in-noise SNR ([`snr`])
//! - Coarse-to-fine frequency ceiling sweep ([`sweep`])
//! - Two-interval gap detection staircase ([`gap`])

pub mod gap;
pub mod interpret;
pub mod level;
pub mod snr;
pub mod staircase;
pub mod sweep;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of a threshold value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    DbHl,
    DbSnr,
    Hertz,
    Milliseconds,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Unit::DbHl => "dB HL",
            Unit::DbSnr => "dB SNR",
            Unit::Hertz => "Hz",
            Unit::Milliseconds => "ms",
        };
        f.write_str(symbol)
    }
}

/// How much the estimate can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Normal,
    /// Fallback value (too few reversals, clamped run, early quit)
    Low,
}

/// Final result of one estimator run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEstimate {
    /// `None` when the run produced no usable value ("undetermined")
    pub value: Option<f64>,
    pub unit: Unit,
    pub confidence: Confidence,
}

impl ThresholdEstimate {
    pub fn normal(value: f64, unit: Unit) -> Self {
        Self {
            value: Some(value),
            unit,
            confidence: Confidence::Normal,
        }
    }

    pub fn low(value: f64, unit: Unit) -> Self {
        Self {
            value: Some(value),
            unit,
            confidence: Confidence::Low,
        }
    }

    pub fn undetermined(unit: Unit) -> Self {
        Self {
            value: None,
            unit,
            confidence: Confidence::Low,
        }
    }

    pub fn is_determined(&self) -> bool {
        self.value.is_some()
    }
}

impl fmt::Display for ThresholdEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) => write!(f, "{v:.1} {}", self.unit)?,
            None => write!(f, "undetermined ({})", self.unit)?,
        }
        if self.confidence == Confidence::Low {
            f.write_str(" [low confidence]")?;
        }
        Ok(())
    }
}
