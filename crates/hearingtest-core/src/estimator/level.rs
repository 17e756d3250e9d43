//! Ascending level search for a dB HL threshold
//!
//! A 1 kHz tone starts at a low physical level and rises by a fixed step
//! after every "not heard". The first "heard" ends the run. A step that would
//! reach full scale is clamped to exactly 0 dBFS and also ends the run.
//! The threshold is the final level minus the RETSPL of the output device.

use crate::audio::signal::dbfs_to_amp;
use crate::error::{HearingTestError, Result};
use crate::estimator::staircase::{StepDirection, StepOutcome};
use crate::estimator::{ThresholdEstimate, Unit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calibration constant used when no calibration was performed
pub const DEFAULT_SPL_AT_FULL_SCALE: f64 = 100.0;

/// Linear gain of the tone played during calibration
pub const CALIBRATION_TONE_GAIN: f32 = 0.1;

/// Output transducer class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// In-ear earphones
    InsertEarphone,
    /// Over-ear headphones
    Circumaural,
    /// On-ear headphones
    #[default]
    SupraAural,
}

impl DeviceClass {
    /// Reference equivalent threshold SPL at 1 kHz
    pub fn retspl(self) -> f64 {
        match self {
            DeviceClass::InsertEarphone => 2.0,
            DeviceClass::Circumaural => 4.0,
            DeviceClass::SupraAural => 7.5,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::InsertEarphone => "insert_earphone",
            DeviceClass::Circumaural => "circumaural",
            DeviceClass::SupraAural => "supra_aural",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert_earphone" | "earphones" | "inear" => Ok(DeviceClass::InsertEarphone),
            "circumaural" | "overear" => Ok(DeviceClass::Circumaural),
            "supra_aural" | "onear" => Ok(DeviceClass::SupraAural),
            other => Err(format!("unknown device class: {other}")),
        }
    }
}

/// Mapping between digital level and sound pressure level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// dB SPL produced by a 0 dBFS signal
    pub spl_at_full_scale: f64,
    pub device: DeviceClass,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            spl_at_full_scale: DEFAULT_SPL_AT_FULL_SCALE,
            device: DeviceClass::default(),
        }
    }
}

impl Calibration {
    /// Derive the constant from a measured calibration tone
    ///
    /// # Arguments
    /// * `dbfs_played` - Digital level of the calibration tone
    /// * `spl_measured` - Level read on a sound level meter
    /// * `device` - Transducer the tone was played through
    pub fn from_measurement(dbfs_played: f64, spl_measured: f64, device: DeviceClass) -> Result<Self> {
        if !(dbfs_played.is_finite() && spl_measured.is_finite()) {
            return Err(HearingTestError::invalid(
                "calibration measurement must be finite",
            ));
        }
        Ok(Self {
            spl_at_full_scale: spl_measured - dbfs_played,
            device,
        })
    }

    pub fn spl_to_dbfs(&self, spl: f64) -> f64 {
        spl - self.spl_at_full_scale
    }

    pub fn dbfs_to_spl(&self, dbfs: f64) -> f64 {
        dbfs + self.spl_at_full_scale
    }

    /// Linear amplitude that produces `spl`
    pub fn spl_to_amp(&self, spl: f64) -> f64 {
        dbfs_to_amp(self.spl_to_dbfs(spl))
    }
}

/// Ascending yes/no level search
#[derive(Debug, Clone)]
pub struct LevelStaircase {
    calibration: Calibration,
    step_db: f64,
    current_spl: f64,
    levels_visited: Vec<f64>,
    finished: bool,
    heard: bool,
    clamped: bool,
}

impl LevelStaircase {
    /// Start a search
    ///
    /// A start level at or above full scale is clamped to full scale.
    ///
    /// # Errors
    /// `InvalidParameter` if the step is not positive or the start is not finite.
    pub fn new(start_spl: f64, step_db: f64, calibration: Calibration) -> Result<Self> {
        if !(step_db.is_finite() && step_db > 0.0) {
            return Err(HearingTestError::invalid(format!(
                "level step must be positive, got {step_db}"
            )));
        }
        if !start_spl.is_finite() {
            return Err(HearingTestError::invalid("start level must be finite"));
        }

        let full_scale = calibration.dbfs_to_spl(0.0);
        let current_spl = start_spl.min(full_scale);

        Ok(Self {
            calibration,
            step_db,
            current_spl,
            levels_visited: vec![current_spl],
            finished: false,
            heard: false,
            clamped: current_spl < start_spl,
        })
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Level of the next tone in dB SPL
    pub fn current_spl(&self) -> f64 {
        self.current_spl
    }

    /// Linear amplitude of the next tone
    pub fn current_amplitude(&self) -> f64 {
        self.calibration.spl_to_amp(self.current_spl)
    }

    /// Every level presented so far, in order
    pub fn levels_visited(&self) -> &[f64] {
        &self.levels_visited
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the run ended at full scale without a "heard"
    pub fn was_clamped(&self) -> bool {
        self.clamped && !self.heard
    }

    /// Feed one yes/no answer for the tone at the current level
    ///
    /// Answers after the run has finished are ignored and return `Held`.
    pub fn respond(&mut self, heard: bool) -> StepOutcome {
        if self.finished {
            return StepOutcome::Held;
        }
        if heard {
            self.heard = true;
            self.finished = true;
            tracing::info!(spl = self.current_spl, "Tone heard, level search finished");
            return StepOutcome::Held;
        }

        let proposed = self.current_spl + self.step_db;
        if self.calibration.spl_to_dbfs(proposed) >= 0.0 {
            self.current_spl = self.calibration.dbfs_to_spl(0.0);
            self.levels_visited.push(self.current_spl);
            self.finished = true;
            self.clamped = true;
            tracing::warn!(spl = self.current_spl, "Level reached full scale, search finished");
            return StepOutcome::Clamped(StepDirection::Up);
        }

        self.current_spl = proposed;
        self.levels_visited.push(proposed);
        tracing::debug!(spl = proposed, "Level raised");
        StepOutcome::Stepped(StepDirection::Up)
    }

    /// Threshold in dB HL once the run has finished
    pub fn threshold_db_hl(&self) -> Option<f64> {
        self.finished
            .then(|| self.current_spl - self.calibration.device.retspl())
    }

    pub fn estimate(&self) -> ThresholdEstimate {
        match self.threshold_db_hl() {
            Some(v) if self.heard => ThresholdEstimate::normal(v, Unit::DbHl),
            Some(v) => ThresholdEstimate::low(v, Unit::DbHl),
            None => ThresholdEstimate::undetermined(Unit::DbHl),
        }
    }
}
