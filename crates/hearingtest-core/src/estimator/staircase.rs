//! Multiplicative up/down staircase with reversal tracking
//!
//! Two consecutive correct responses step the value down by the down-factor;
//! any incorrect response steps it up by the up-factor and resets the
//! consecutive-correct counter. Values are clamped to the configured bounds.
//!
//! A reversal is recorded when a step's direction differs from the direction
//! of the most recent earlier step. The recorded value is the value after the
//! reversing step.

use crate::error::{HearingTestError, Result};
use serde::{Deserialize, Serialize};

/// Consecutive correct responses needed for a down step
pub const CORRECT_TO_STEP_DOWN: u32 = 2;

/// Direction of a staircase step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    Up,
    Down,
}

/// What one update did to the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Correct response counted, no step yet
    Held,
    /// Value moved by the full factor
    Stepped(StepDirection),
    /// Value moved but was limited by a bound
    Clamped(StepDirection),
}

/// State of one staircase run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaircaseState {
    current_value: f64,
    consecutive_correct: u32,
    last_direction: Option<StepDirection>,
    reversal_values: Vec<f64>,
    step_up_factor: f64,
    step_down_factor: f64,
    bounds: (f64, f64),
}

impl StaircaseState {
    /// Create a staircase
    ///
    /// # Arguments
    /// * `start` - Initial value, clamped into `bounds`
    /// * `step_up_factor` - Multiplier after an incorrect response (> 1)
    /// * `step_down_factor` - Multiplier after enough correct responses (in (0, 1))
    /// * `bounds` - Inclusive `(min, max)`, with `0 < min <= max`
    pub fn new(
        start: f64,
        step_up_factor: f64,
        step_down_factor: f64,
        bounds: (f64, f64),
    ) -> Result<Self> {
        let (min, max) = bounds;
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min <= max) {
            return Err(HearingTestError::invalid(format!(
                "staircase bounds must satisfy 0 < min <= max, got [{min}, {max}]"
            )));
        }
        if !(step_up_factor.is_finite() && step_up_factor > 1.0) {
            return Err(HearingTestError::invalid(format!(
                "up factor must be greater than 1, got {step_up_factor}"
            )));
        }
        if !(step_down_factor > 0.0 && step_down_factor < 1.0) {
            return Err(HearingTestError::invalid(format!(
                "down factor must be within (0, 1), got {step_down_factor}"
            )));
        }
        if !start.is_finite() {
            return Err(HearingTestError::invalid("start value must be finite"));
        }

        Ok(Self {
            current_value: start.clamp(min, max),
            consecutive_correct: 0,
            last_direction: None,
            reversal_values: Vec::new(),
            step_up_factor,
            step_down_factor,
            bounds,
        })
    }

    pub fn current_value(&self) -> f64 {
        self.current_value
    }

    pub fn consecutive_correct(&self) -> u32 {
        self.consecutive_correct
    }

    pub fn last_direction(&self) -> Option<StepDirection> {
        self.last_direction
    }

    pub fn reversal_values(&self) -> &[f64] {
        &self.reversal_values
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    /// Apply one response
    pub fn update(&mut self, correct: bool) -> StepOutcome {
        if correct {
            self.consecutive_correct += 1;
            if self.consecutive_correct < CORRECT_TO_STEP_DOWN {
                return StepOutcome::Held;
            }
            self.consecutive_correct = 0;
            self.step(StepDirection::Down)
        } else {
            self.consecutive_correct = 0;
            self.step(StepDirection::Up)
        }
    }

    fn step(&mut self, direction: StepDirection) -> StepOutcome {
        let factor = match direction {
            StepDirection::Up => self.step_up_factor,
            StepDirection::Down => self.step_down_factor,
        };
        let proposed = self.current_value * factor;
        let next = proposed.clamp(self.bounds.0, self.bounds.1);

        if self.last_direction.is_some_and(|last| last != direction) {
            self.reversal_values.push(next);
            tracing::debug!(value = next, ?direction, "Staircase reversal");
        }
        self.last_direction = Some(direction);
        self.current_value = next;

        if next == proposed {
            StepOutcome::Stepped(direction)
        } else {
            StepOutcome::Clamped(direction)
        }
    }

    /// Mean of the last `count` reversal values, if at least `count` exist
    pub fn mean_of_last_reversals(&self, count: usize) -> Option<f64> {
        if count == 0 || self.reversal_values.len() < count {
            return None;
        }
        let tail = &self.reversal_values[self.reversal_values.len() - count..];
        Some(tail.iter().sum::<f64>() / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn staircase() -> StaircaseState {
        StaircaseState::new(25.0, 1.25, 0.8, (1.0, 200.0)).unwrap()
    }

    #[test]
    fn test_two_correct_step_down() {
        let mut s = staircase();
        assert_eq!(s.update(true), StepOutcome::Held);
        assert_eq!(s.consecutive_correct(), 1);
        assert_relative_eq!(s.current_value(), 25.0);
        assert_eq!(s.update(true), StepOutcome::Stepped(StepDirection::Down));
        assert_relative_eq!(s.current_value(), 20.0);
        assert_eq!(s.consecutive_correct(), 0);
    }

    #[test]
    fn test_incorrect_steps_up_and_resets() {
        let mut s = staircase();
        s.update(true);
        assert_eq!(s.update(false), StepOutcome::Stepped(StepDirection::Up));
        assert_relative_eq!(s.current_value(), 31.25);
        assert_eq!(s.consecutive_correct(), 0);
    }

    #[test]
    fn test_reversal_only_on_direction_change() {
        let mut s = staircase();
        s.update(false); // up, no previous direction
        s.update(false); // up again
        assert!(s.reversal_values().is_empty());
        s.update(true);
        s.update(true); // down: reversal
        assert_eq!(s.reversal_values().len(), 1);
        s.update(true); // held
        s.update(true); // down again
        assert_eq!(s.reversal_values().len(), 1);
        s.update(false); // up: reversal
        assert_eq!(s.reversal_values().len(), 2);
    }

    #[test]
    fn test_reversal_value_is_post_step() {
        let mut s = staircase();
        s.update(true);
        s.update(true); // 20
        s.update(false); // 25, reversal
        assert_relative_eq!(s.reversal_values()[0], 25.0);
    }

    #[test]
    fn test_clamps_at_bounds() {
        let mut s = StaircaseState::new(180.0, 1.25, 0.8, (1.0, 200.0)).unwrap();
        assert_eq!(s.update(false), StepOutcome::Clamped(StepDirection::Up));
        assert_relative_eq!(s.current_value(), 200.0);

        let mut s = StaircaseState::new(1.1, 1.25, 0.8, (1.0, 200.0)).unwrap();
        s.update(true);
        assert_eq!(s.update(true), StepOutcome::Clamped(StepDirection::Down));
        assert_relative_eq!(s.current_value(), 1.0);
    }

    #[test]
    fn test_mean_of_last_reversals() {
        let mut s = staircase();
        assert_eq!(s.mean_of_last_reversals(1), None);
        s.update(false); // 31.25
        s.update(true);
        s.update(true); // 25, reversal
        s.update(false); // 31.25, reversal
        assert_relative_eq!(s.mean_of_last_reversals(2).unwrap(), 28.125);
        assert_eq!(s.mean_of_last_reversals(3), None);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(StaircaseState::new(25.0, 0.9, 0.8, (1.0, 200.0)).is_err());
        assert!(StaircaseState::new(25.0, 1.25, 1.2, (1.0, 200.0)).is_err());
        assert!(StaircaseState::new(25.0, 1.25, 0.8, (0.0, 200.0)).is_err());
        assert!(StaircaseState::new(25.0, 1.25, 0.8, (50.0, 10.0)).is_err());
    }

    #[test]
    fn test_start_clamped_into_bounds() {
        let s = StaircaseState::new(500.0, 1.25, 0.8, (1.0, 200.0)).unwrap();
        assert_relative_eq!(s.current_value(), 200.0);
    }
}
