//! Session configuration
//!
//! One [`SessionConfig`] is built per session and handed to the sequencer and
//! the player at construction. It is stored as JSON; missing fields take
//! their defaults so older files keep loading.

use crate::audio::routing::EarMode;
use crate::error::{HearingTestError, Result};
use crate::estimator::gap::GapParams;
use crate::estimator::level::Calibration;
use crate::estimator::snr::SnrSchedule;
use crate::estimator::sweep::SweepParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_inter_trial_pause_ms() -> u64 {
    450
}

fn default_lead_in_sec() -> f64 {
    0.02
}

/// dB HL level search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub start_spl: f64,
    pub step_db: f64,
    pub frequency_hz: f64,
    pub tone_duration_sec: f64,
    pub fade_ms: f64,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            start_spl: 0.0,
            step_db: 2.5,
            frequency_hz: 1000.0,
            tone_duration_sec: 1.0,
            fade_ms: 5.0,
        }
    }
}

/// Digits-in-noise
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnrConfig {
    #[serde(flatten)]
    pub schedule: SnrSchedule,
    /// Noise before the digits start
    pub noise_lead_sec: f64,
    /// Noise after the digits end
    pub noise_tail_sec: f64,
    /// Ramp on the noise and the digits
    pub fade_ms: f64,
}

impl Default for SnrConfig {
    fn default() -> Self {
        Self {
            schedule: SnrSchedule::default(),
            noise_lead_sec: 0.5,
            noise_tail_sec: 0.5,
            fade_ms: 5.0,
        }
    }
}

/// Frequency ceiling sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    #[serde(flatten)]
    pub params: SweepParams,
    pub tone_gain: f32,
    pub tone_duration_sec: f64,
    pub fade_ms: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            params: SweepParams::default(),
            tone_gain: 0.25,
            tone_duration_sec: 1.0,
            fade_ms: 5.0,
        }
    }
}

/// Two-interval gap detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    #[serde(flatten)]
    pub params: GapParams,
    pub interval_sec: f64,
    pub isi_sec: f64,
    pub fade_ms: f64,
    /// Gap centre as a fraction of the interval
    pub gap_position: f64,
    /// Ramp into and out of the gap instead of stepping
    pub use_fades: bool,
    pub noise_sample_rate: u32,
    pub noise_cutoff_hz: f64,
    pub gain: f32,
    /// Delay before the first interval
    pub lead_in_sec: f64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            params: GapParams::default(),
            interval_sec: 0.5,
            isi_sec: 0.5,
            fade_ms: 1.0,
            gap_position: 0.5,
            use_fades: true,
            noise_sample_rate: 50000,
            noise_cutoff_hz: 5000.0,
            gain: 0.1,
            lead_in_sec: 0.2,
        }
    }
}

/// Configuration for one test session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Ear(s) receiving the stimuli
    #[serde(default)]
    pub ear_mode: EarMode,
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Delay between "now" and the start of a single-interval stimulus
    #[serde(default = "default_lead_in_sec")]
    pub lead_in_sec: f64,
    /// Pause after each answered trial
    #[serde(default = "default_inter_trial_pause_ms")]
    pub inter_trial_pause_ms: u64,
    #[serde(default)]
    pub level: LevelConfig,
    #[serde(default)]
    pub snr: SnrConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub gap: GapConfig,
    /// Result of a calibration step; `None` uses the default constant
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ear_mode: EarMode::default(),
            sample_rate: default_sample_rate(),
            lead_in_sec: default_lead_in_sec(),
            inter_trial_pause_ms: default_inter_trial_pause_ms(),
            level: LevelConfig::default(),
            snr: SnrConfig::default(),
            sweep: SweepConfig::default(),
            gap: GapConfig::default(),
            calibration: None,
        }
    }
}

impl SessionConfig {
    /// Load config from `path`, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to `path`, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HearingTestError::Config(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HearingTestError::Config(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| HearingTestError::Config(e.to_string()))?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Calibration to use, substituting the default when none was measured
    pub fn calibration_or_default(&self) -> Calibration {
        match self.calibration {
            Some(calibration) => calibration,
            None => {
                let fallback = Calibration::default();
                tracing::warn!(
                    spl_at_full_scale = fallback.spl_at_full_scale,
                    device = %fallback.device,
                    "No calibration provided, using default constant"
                );
                fallback
            }
        }
    }

    pub fn inter_trial_pause(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.inter_trial_pause_ms)
    }
}
