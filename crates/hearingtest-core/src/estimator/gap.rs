//! Two-interval gap detection staircase
//!
//! Each trial plays two noise bursts, one of which contains a silent gap. The
//! gap length follows a 2-down/1-up multiplicative staircase and the run
//! stops after a fixed number of trials.

use crate::error::{HearingTestError, Result};
use crate::estimator::staircase::{StaircaseState, StepOutcome};
use crate::estimator::{ThresholdEstimate, Unit};
use serde::{Deserialize, Serialize};

/// Staircase parameters, gap lengths in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapParams {
    pub start_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub step_down_factor: f64,
    pub step_up_factor: f64,
    pub trials: u32,
    /// Reversals averaged for the final estimate
    pub reversals_to_average: usize,
    /// Fewer reversals than this yields a low-confidence fallback
    pub min_reversals: usize,
}

impl Default for GapParams {
    fn default() -> Self {
        Self {
            start_ms: 25.0,
            min_ms: 1.0,
            max_ms: 200.0,
            step_down_factor: 0.8,
            step_up_factor: 1.25,
            trials: 24,
            reversals_to_average: 4,
            min_reversals: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GapStaircase {
    params: GapParams,
    state: StaircaseState,
    trials_done: u32,
    values: Vec<f64>,
}

impl GapStaircase {
    pub fn new(params: GapParams) -> Result<Self> {
        if params.trials == 0 {
            return Err(HearingTestError::invalid("trial count must be at least 1"));
        }
        if params.min_reversals == 0 || params.reversals_to_average < params.min_reversals {
            return Err(HearingTestError::invalid(format!(
                "need 1 <= min reversals <= reversals averaged, got {} / {}",
                params.min_reversals, params.reversals_to_average
            )));
        }
        let state = StaircaseState::new(
            params.start_ms,
            params.step_up_factor,
            params.step_down_factor,
            (params.min_ms, params.max_ms),
        )?;
        Ok(Self {
            params,
            values: vec![state.current_value()],
            state,
            trials_done: 0,
        })
    }

    pub fn params(&self) -> &GapParams {
        &self.params
    }

    pub fn state(&self) -> &StaircaseState {
        &self.state
    }

    /// Gap length for the next trial
    pub fn current_gap_ms(&self) -> f64 {
        self.state.current_value()
    }

    pub fn trial_count(&self) -> u32 {
        self.trials_done
    }

    pub fn is_finished(&self) -> bool {
        self.trials_done >= self.params.trials
    }

    /// Gap value after each trial, starting with the initial value
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Feed whether the subject picked the interval with the gap
    ///
    /// Responses after the last trial are ignored and return `Held`.
    pub fn respond(&mut self, correct: bool) -> StepOutcome {
        if self.is_finished() {
            return StepOutcome::Held;
        }
        let outcome = self.state.update(correct);
        self.trials_done += 1;
        self.values.push(self.state.current_value());
        tracing::debug!(
            trial = self.trials_done,
            correct,
            gap_ms = self.state.current_value(),
            consecutive = self.state.consecutive_correct(),
            "Gap trial"
        );
        outcome
    }

    /// Mean of the last reversals, or the current value flagged low-confidence
    pub fn estimate(&self) -> ThresholdEstimate {
        let reversals = self.state.reversal_values();
        if reversals.len() >= self.params.min_reversals {
            let count = reversals.len().min(self.params.reversals_to_average);
            if let Some(mean) = self.state.mean_of_last_reversals(count) {
                return ThresholdEstimate::normal(mean, Unit::Milliseconds);
            }
        }
        ThresholdEstimate::low(self.current_gap_ms(), Unit::Milliseconds)
    }
}
