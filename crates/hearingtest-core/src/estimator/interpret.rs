//! Numeric result bands
//!
//! Maps a threshold onto the coarse categories shown to the subject. Only the
//! category is produced here; wording is left to the presentation layer.

use serde::{Deserialize, Serialize};

/// Degree of hearing loss for a dB HL threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HearingCategory {
    Normal,
    Mild,
    Moderate,
    ModeratelySevere,
}

/// Band for a dB HL threshold, with the age range it is typical for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbHlBand {
    pub category: HearingCategory,
    pub typical_age_from: u32,
    /// `None` for the open-ended top band
    pub typical_age_to: Option<u32>,
}

/// Upper threshold limit, category and typical ages of each dB HL band
const DB_HL_BANDS: [(f64, HearingCategory, u32, u32); 7] = [
    (15.0, HearingCategory::Normal, 0, 19),
    (20.0, HearingCategory::Normal, 20, 29),
    (25.0, HearingCategory::Normal, 30, 39),
    (30.0, HearingCategory::Mild, 40, 49),
    (35.0, HearingCategory::Mild, 50, 59),
    (40.0, HearingCategory::Mild, 60, 69),
    (50.0, HearingCategory::Moderate, 70, 79),
];

pub fn db_hl_band(threshold_db_hl: f64) -> DbHlBand {
    DB_HL_BANDS
        .iter()
        .find(|(limit, ..)| threshold_db_hl <= *limit)
        .map(|&(_, category, from, to)| DbHlBand {
            category,
            typical_age_from: from,
            typical_age_to: Some(to),
        })
        .unwrap_or(DbHlBand {
            category: HearingCategory::ModeratelySevere,
            typical_age_from: 80,
            typical_age_to: None,
        })
}

/// Speech-in-noise performance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechInNoiseCategory {
    Normal,
    Inefficient,
    Poor,
}

pub fn speech_in_noise_category(best_snr_db: f64) -> SpeechInNoiseCategory {
    if best_snr_db <= -5.55 {
        SpeechInNoiseCategory::Normal
    } else if best_snr_db <= -3.8 {
        SpeechInNoiseCategory::Inefficient
    } else {
        SpeechInNoiseCategory::Poor
    }
}

/// Whether a result warrants seeing a professional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    NoConcern,
    Consult,
}

pub fn frequency_ceiling_advice(ceiling_hz: f64) -> Advice {
    if ceiling_hz <= 8000.0 {
        Advice::Consult
    } else {
        Advice::NoConcern
    }
}

pub fn gap_threshold_advice(gap_ms: f64) -> Advice {
    if gap_ms < 8.0 {
        Advice::NoConcern
    } else {
        Advice::Consult
    }
}

/// Category attached to a finished session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Interpretation {
    Level(DbHlBand),
    SpeechInNoise { category: SpeechInNoiseCategory },
    FrequencyCeiling { advice: Advice },
    Gap { advice: Advice },
}
