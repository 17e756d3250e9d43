//! Digits-in-noise SNR run
//!
//! The masking noise gets louder on a fixed schedule, one step per round,
//! whatever the subject answers. Each round's SNR is the pre-measured digit
//! level minus the noise level at that round's gain. The score is the lowest
//! SNR among correctly repeated triplets.

use crate::error::{HearingTestError, Result};
use crate::estimator::{ThresholdEstimate, Unit};
use serde::{Deserialize, Serialize};

/// Fixed noise-gain schedule and the pre-measured asset levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnrSchedule {
    /// Noise gain in round 1
    pub base_gain: f64,
    /// Gain added per round
    pub increment: f64,
    pub rounds: u32,
    /// RMS level of the digit recordings, dBFS
    pub signal_rms_dbfs: f64,
    /// RMS level of the noise recording at unit gain, dBFS
    pub noise_rms_dbfs: f64,
}

impl Default for SnrSchedule {
    fn default() -> Self {
        Self {
            base_gain: 3.0,
            increment: 0.5,
            rounds: 10,
            signal_rms_dbfs: -20.0,
            noise_rms_dbfs: -29.29,
        }
    }
}

impl SnrSchedule {
    /// Check the schedule produces strictly increasing positive gains
    pub fn validate(&self) -> Result<()> {
        if !(self.base_gain.is_finite() && self.base_gain > 0.0) {
            return Err(HearingTestError::invalid(format!(
                "base noise gain must be positive, got {}",
                self.base_gain
            )));
        }
        if !(self.increment.is_finite() && self.increment > 0.0) {
            return Err(HearingTestError::invalid(format!(
                "noise gain increment must be positive, got {}",
                self.increment
            )));
        }
        if self.rounds == 0 {
            return Err(HearingTestError::invalid("round count must be at least 1"));
        }
        Ok(())
    }

    /// Noise gain for a 1-based round number
    pub fn gain_for_round(&self, round: u32) -> f64 {
        self.base_gain + f64::from(round.saturating_sub(1)) * self.increment
    }

    /// SNR in dB when the noise plays at `gain`
    pub fn snr_for_gain(&self, gain: f64) -> f64 {
        let noise_dbfs = self.noise_rms_dbfs + 20.0 * gain.log10();
        self.signal_rms_dbfs - noise_dbfs
    }

    pub fn snr_for_round(&self, round: u32) -> f64 {
        self.snr_for_gain(self.gain_for_round(round))
    }
}

/// Outcome of one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: u32,
    pub noise_gain: f64,
    pub snr_db: f64,
    pub presented: String,
    pub entered: String,
    pub correct: bool,
}

/// State of one digits-in-noise run
#[derive(Debug, Clone)]
pub struct SnrRun {
    schedule: SnrSchedule,
    results: Vec<RoundResult>,
    stopped_early: bool,
}

impl SnrRun {
    pub fn new(schedule: SnrSchedule) -> Result<Self> {
        schedule.validate()?;
        Ok(Self {
            schedule,
            results: Vec::new(),
            stopped_early: false,
        })
    }

    pub fn schedule(&self) -> &SnrSchedule {
        &self.schedule
    }

    /// 1-based number of the round to present next
    pub fn next_round(&self) -> Option<u32> {
        if self.is_finished() {
            None
        } else {
            Some(self.results.len() as u32 + 1)
        }
    }

    /// Noise gain for the round to present next
    pub fn current_gain(&self) -> Option<f64> {
        self.next_round().map(|r| self.schedule.gain_for_round(r))
    }

    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    pub fn is_finished(&self) -> bool {
        self.stopped_early || self.results.len() as u32 >= self.schedule.rounds
    }

    /// Record the answer for the current round
    ///
    /// Correctness is an exact string match between the presented and the
    /// entered code. Returns `None` when the run has already finished.
    pub fn record(&mut self, presented: &str, entered: &str) -> Option<&RoundResult> {
        let round = self.next_round()?;
        let noise_gain = self.schedule.gain_for_round(round);
        let result = RoundResult {
            round,
            noise_gain,
            snr_db: self.schedule.snr_for_gain(noise_gain),
            presented: presented.to_string(),
            entered: entered.to_string(),
            correct: presented == entered,
        };
        tracing::info!(
            round,
            gain = noise_gain,
            snr = result.snr_db,
            correct = result.correct,
            "Digits round recorded"
        );
        self.results.push(result);
        self.results.last()
    }

    /// End the run before all rounds were played
    pub fn stop_early(&mut self) {
        if !self.is_finished() {
            tracing::info!(rounds = self.results.len(), "Digits run stopped early");
            self.stopped_early = true;
        }
    }

    /// Lowest SNR among correct rounds
    pub fn best_snr(&self) -> Option<f64> {
        self.results
            .iter()
            .filter(|r| r.correct)
            .map(|r| r.snr_db)
            .reduce(f64::min)
    }

    pub fn estimate(&self) -> ThresholdEstimate {
        match self.best_snr() {
            Some(snr) => ThresholdEstimate::normal(snr, Unit::DbSnr),
            None => ThresholdEstimate::undetermined(Unit::DbSnr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gain_schedule() {
        let s = SnrSchedule::default();
        assert_relative_eq!(s.gain_for_round(1), 3.0);
        assert_relative_eq!(s.gain_for_round(2), 3.5);
        assert_relative_eq!(s.gain_for_round(10), 7.5);
        for r in 1..20 {
            assert!(s.gain_for_round(r + 1) > s.gain_for_round(r));
        }
    }

    #[test]
    fn test_snr_decreases_with_gain() {
        let s = SnrSchedule::default();
        let mut prev = f64::INFINITY;
        for i in 1..50 {
            let snr = s.snr_for_gain(i as f64 * 0.25);
            assert!(snr < prev);
            prev = snr;
        }
    }

    #[test]
    fn test_snr_at_unit_gain() {
        let s = SnrSchedule::default();
        assert_relative_eq!(s.snr_for_gain(1.0), 9.29, epsilon = 1e-9);
        let expected = -20.0 - (-29.29 + 20.0 * 3f64.log10());
        assert_relative_eq!(s.snr_for_round(1), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_best_snr_is_minimum_correct() {
        let mut run = SnrRun::new(SnrSchedule::default()).unwrap();
        run.record("123", "123");
        run.record("456", "456");
        run.record("789", "780");
        assert_relative_eq!(run.best_snr().unwrap(), run.schedule().snr_for_round(2));
    }

    #[test]
    fn test_no_correct_rounds_undetermined() {
        let mut run = SnrRun::new(SnrSchedule::default()).unwrap();
        run.record("123", "321");
        assert_eq!(run.best_snr(), None);
        assert!(!run.estimate().is_determined());
    }

    #[test]
    fn test_fixed_length_run() {
        let schedule = SnrSchedule {
            rounds: 2,
            ..SnrSchedule::default()
        };
        let mut run = SnrRun::new(schedule).unwrap();
        assert_eq!(run.next_round(), Some(1));
        run.record("111", "111");
        run.record("222", "000");
        assert!(run.is_finished());
        assert!(run.record("333", "333").is_none());
        assert_eq!(run.results().len(), 2);
    }

    #[test]
    fn test_stop_early() {
        let mut run = SnrRun::new(SnrSchedule::default()).unwrap();
        run.record("111", "111");
        run.stop_early();
        assert!(run.is_finished());
        assert_eq!(run.next_round(), None);
        assert!(run.best_snr().is_some());
    }

    #[test]
    fn test_rejects_bad_schedule() {
        let bad = SnrSchedule {
            increment: 0.0,
            ..SnrSchedule::default()
        };
        assert!(SnrRun::new(bad).is_err());
    }
}
