//! Trial records
//!
//! Append-only log of every answered trial in a session.

use crate::session::input::{Interval, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One answered trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// 1-based position in the session
    pub index: u32,
    /// Stimulus parameter presented (level, noise gain, frequency or gap)
    pub parameter: f64,
    /// Interval carrying the signal in two-interval designs
    pub interval_order: Option<Interval>,
    pub response: Response,
    pub correct: bool,
    pub timestamp: DateTime<Utc>,
}

/// Ordered, append-only trial log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialLog {
    trials: Vec<Trial>,
}

impl TrialLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trial and return it
    ///
    /// # Arguments
    /// * `parameter` - Stimulus parameter that was presented
    /// * `interval_order` - Signal interval for two-interval trials
    /// * `response` - What the subject answered
    /// * `correct` - Whether the answer counts as correct
    pub fn record(
        &mut self,
        parameter: f64,
        interval_order: Option<Interval>,
        response: Response,
        correct: bool,
    ) -> &Trial {
        let trial = Trial {
            index: self.trials.len() as u32 + 1,
            parameter,
            interval_order,
            response,
            correct,
            timestamp: Utc::now(),
        };
        self.trials.push(trial);
        &self.trials[self.trials.len() - 1]
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn last(&self) -> Option<&Trial> {
        self.trials.last()
    }

    /// Number of correct trials
    pub fn correct_count(&self) -> usize {
        self.trials.iter().filter(|t| t.correct).count()
    }

    /// Stimulus parameters in presentation order
    pub fn parameters(&self) -> Vec<f64> {
        self.trials.iter().map(|t| t.parameter).collect()
    }

    pub fn into_trials(self) -> Vec<Trial> {
        self.trials
    }
}
