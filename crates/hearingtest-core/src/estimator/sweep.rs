//! Frequency ceiling sweep
//!
//! The subject moves a tone up and down in coarse steps until it becomes
//! inaudible. That opens a bracket between the last audible frequency and the
//! first inaudible one, which is then searched in fine steps. Stepping is
//! driven by explicit advance/retreat controls, not forced-choice answers.

use crate::error::{HearingTestError, Result};
use crate::estimator::{ThresholdEstimate, Unit};
use serde::{Deserialize, Serialize};

/// Sweep limits and step sizes in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepParams {
    pub start_hz: f64,
    pub floor_hz: f64,
    pub ceiling_hz: f64,
    /// Coarse steps change size at this frequency
    pub boundary_hz: f64,
    /// Coarse step below the boundary
    pub low_step_hz: f64,
    /// Coarse step at and above the boundary
    pub high_step_hz: f64,
    pub fine_step_hz: f64,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            start_hz: 2000.0,
            floor_hz: 2000.0,
            ceiling_hz: 20000.0,
            boundary_hz: 6000.0,
            low_step_hz: 1000.0,
            high_step_hz: 500.0,
            fine_step_hz: 100.0,
        }
    }
}

/// Sweep phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum SweepPhase {
    Coarse,
    /// Fine search inside `[low_hz, high_hz]`
    Fine { low_hz: f64, high_hz: f64 },
    Done { estimate_hz: f64 },
}

/// State of one ceiling sweep
#[derive(Debug, Clone)]
pub struct FrequencySweep {
    params: SweepParams,
    current_hz: f64,
    phase: SweepPhase,
    last_audible_hz: Option<f64>,
    visited: Vec<f64>,
}

impl FrequencySweep {
    /// # Errors
    /// `InvalidParameter` unless `0 < floor <= start <= ceiling` and all steps
    /// are positive.
    pub fn new(params: SweepParams) -> Result<Self> {
        let p = &params;
        if !(p.floor_hz > 0.0 && p.floor_hz <= p.start_hz && p.start_hz <= p.ceiling_hz) {
            return Err(HearingTestError::invalid(format!(
                "sweep needs 0 < floor <= start <= ceiling, got {} / {} / {}",
                p.floor_hz, p.start_hz, p.ceiling_hz
            )));
        }
        if !(p.low_step_hz > 0.0 && p.high_step_hz > 0.0 && p.fine_step_hz > 0.0) {
            return Err(HearingTestError::invalid("sweep steps must be positive"));
        }
        Ok(Self {
            current_hz: params.start_hz,
            params,
            phase: SweepPhase::Coarse,
            last_audible_hz: None,
            visited: vec![params.start_hz],
        })
    }

    pub fn params(&self) -> &SweepParams {
        &self.params
    }

    /// Frequency of the tone to play now
    pub fn current_hz(&self) -> f64 {
        self.current_hz
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    /// Every frequency the sweep moved to, in order
    pub fn visited(&self) -> &[f64] {
        &self.visited
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, SweepPhase::Done { .. })
    }

    fn coarse_up_step(&self, hz: f64) -> f64 {
        if hz < self.params.boundary_hz {
            self.params.low_step_hz
        } else {
            self.params.high_step_hz
        }
    }

    fn coarse_down_step(&self, hz: f64) -> f64 {
        if hz <= self.params.boundary_hz {
            self.params.low_step_hz
        } else {
            self.params.high_step_hz
        }
    }

    fn move_to(&mut self, hz: f64) -> f64 {
        if hz != self.current_hz {
            self.current_hz = hz;
            self.visited.push(hz);
        }
        self.current_hz
    }

    /// Step up; the current frequency counts as audible
    pub fn advance(&mut self) -> f64 {
        match self.phase {
            SweepPhase::Coarse => {
                let from = self.current_hz;
                let to = (from + self.coarse_up_step(from)).min(self.params.ceiling_hz);
                if to > from {
                    self.last_audible_hz = Some(from);
                }
                self.move_to(to)
            }
            SweepPhase::Fine { high_hz, .. } => {
                let to = (self.current_hz + self.params.fine_step_hz).min(high_hz);
                self.move_to(to)
            }
            SweepPhase::Done { .. } => self.current_hz,
        }
    }

    /// Step down
    pub fn retreat(&mut self) -> f64 {
        match self.phase {
            SweepPhase::Coarse => {
                let from = self.current_hz;
                let to = (from - self.coarse_down_step(from)).max(self.params.floor_hz);
                if self.last_audible_hz.is_some_and(|a| a >= to) {
                    self.last_audible_hz = None;
                }
                self.move_to(to)
            }
            SweepPhase::Fine { low_hz, .. } => {
                let to = (self.current_hz - self.params.fine_step_hz).max(low_hz);
                self.move_to(to)
            }
            SweepPhase::Done { .. } => self.current_hz,
        }
    }

    /// The current tone can no longer be heard
    ///
    /// In the coarse phase this opens the fine bracket, starting at its low
    /// edge. In the fine phase it ends the sweep.
    pub fn mark_inaudible(&mut self) -> SweepPhase {
        match self.phase {
            SweepPhase::Coarse => {
                let high = self.current_hz;
                if high <= self.params.floor_hz {
                    self.phase = SweepPhase::Done {
                        estimate_hz: self.params.floor_hz,
                    };
                    tracing::info!(hz = high, "Inaudible at sweep floor");
                    return self.phase;
                }
                let low = self
                    .last_audible_hz
                    .filter(|&a| a < high)
                    .unwrap_or_else(|| (high - self.coarse_down_step(high)).max(self.params.floor_hz));
                self.phase = SweepPhase::Fine {
                    low_hz: low,
                    high_hz: high,
                };
                self.move_to(low);
                tracing::debug!(low, high, "Fine bracket opened");
            }
            SweepPhase::Fine { low_hz, .. } => {
                let stop = self.current_hz;
                let estimate_hz = if stop > low_hz {
                    stop - self.params.fine_step_hz
                } else {
                    stop
                };
                self.phase = SweepPhase::Done { estimate_hz };
                tracing::info!(stop, estimate = estimate_hz, "Frequency sweep finished");
            }
            SweepPhase::Done { .. } => {}
        }
        self.phase
    }

    /// Highest audible frequency once the sweep is done
    pub fn estimate_hz(&self) -> Option<f64> {
        match self.phase {
            SweepPhase::Done { estimate_hz } => Some(estimate_hz),
            _ => None,
        }
    }

    pub fn estimate(&self) -> ThresholdEstimate {
        match self.estimate_hz() {
            Some(hz) => ThresholdEstimate::normal(hz, Unit::Hertz),
            None => ThresholdEstimate::undetermined(Unit::Hertz),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep() -> FrequencySweep {
        FrequencySweep::new(SweepParams::default()).unwrap()
    }

    #[test]
    fn test_coarse_steps_change_at_boundary() {
        let mut s = sweep();
        let visited: Vec<f64> = (0..6).map(|_| s.advance()).collect();
        assert_eq!(visited, vec![3000.0, 4000.0, 5000.0, 6000.0, 6500.0, 7000.0]);
    }

    #[test]
    fn test_retreat_steps() {
        let mut s = sweep();
        for _ in 0..5 {
            s.advance(); // 6500
        }
        assert_eq!(s.retreat(), 6000.0);
        assert_eq!(s.retreat(), 5000.0);
        assert_eq!(s.retreat(), 4000.0);
    }

    #[test]
    fn test_bounds_respected() {
        let mut s = sweep();
        assert_eq!(s.retreat(), 2000.0);
        let params = SweepParams {
            start_hz: 19800.0,
            ..SweepParams::default()
        };
        let mut s = FrequencySweep::new(params).unwrap();
        assert_eq!(s.advance(), 20000.0);
        assert_eq!(s.advance(), 20000.0);
    }

    #[test]
    fn test_fine_phase_brackets() {
        let mut s = sweep();
        for _ in 0..5 {
            s.advance(); // 6500
        }
        let phase = s.mark_inaudible();
        assert_eq!(
            phase,
            SweepPhase::Fine {
                low_hz: 6000.0,
                high_hz: 6500.0
            }
        );
        assert_eq!(s.current_hz(), 6000.0);

        s.advance();
        s.advance();
        assert_eq!(s.current_hz(), 6200.0);
        s.mark_inaudible();
        assert_eq!(s.estimate_hz(), Some(6100.0));
        assert!(s.is_finished());
    }

    #[test]
    fn test_fine_phase_capped_at_bracket() {
        let mut s = sweep();
        s.advance(); // 3000
        s.mark_inaudible();
        for _ in 0..20 {
            s.advance();
        }
        assert_eq!(s.current_hz(), 3000.0);
        s.retreat();
        for _ in 0..20 {
            s.retreat();
        }
        assert_eq!(s.current_hz(), 2000.0);
    }

    #[test]
    fn test_inaudible_at_bracket_floor() {
        let mut s = sweep();
        s.advance();
        s.advance(); // 4000
        s.mark_inaudible(); // fine at 3000
        s.mark_inaudible();
        assert_eq!(s.estimate_hz(), Some(3000.0));
    }

    #[test]
    fn test_inaudible_at_floor_ends() {
        let mut s = sweep();
        let phase = s.mark_inaudible();
        assert_eq!(phase, SweepPhase::Done { estimate_hz: 2000.0 });
    }

    #[test]
    fn test_bracket_after_retreat() {
        let mut s = sweep();
        s.advance();
        s.advance();
        s.advance(); // 5000, last audible 4000
        s.retreat(); // 4000: last audible no longer below
        s.mark_inaudible();
        assert_eq!(
            s.phase(),
            SweepPhase::Fine {
                low_hz: 3000.0,
                high_hz: 4000.0
            }
        );
    }

    #[test]
    fn test_invalid_params() {
        let params = SweepParams {
            start_hz: 1000.0,
            ..SweepParams::default()
        };
        assert!(FrequencySweep::new(params).is_err());
    }
}
