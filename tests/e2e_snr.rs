//! E2E tests for the digits-in-noise SNR run

use approx::assert_relative_eq;
use async_trait::async_trait;
use hearingtest::audio::assets::{DigitSource, SyntheticDigits};
use hearingtest::audio::signal::Buffer;
use hearingtest::estimator::snr::{SnrRun, SnrSchedule};
use hearingtest::session::procedure::SnrProcedure;
use hearingtest::session::{InputEvent, MemorySink, Response, ResponseSource};
use hearingtest::{OfflineBackend, Result, Sequencer, SessionConfig};
use std::cell::RefCell;
use std::rc::Rc;

/// Rounds 1 and 2 correct, round 3 wrong: the best SNR is the hardest
/// correct round, round 2
#[test]
fn test_snr_scenario_best_is_hardest_correct_round() {
    let schedule = SnrSchedule {
        base_gain: 3.0,
        increment: 0.5,
        ..SnrSchedule::default()
    };
    let mut run = SnrRun::new(schedule).unwrap();
    run.record("123", "123");
    run.record("456", "456");
    run.record("789", "788");

    assert_relative_eq!(run.best_snr().unwrap(), schedule.snr_for_round(2));
    assert!(run.best_snr().unwrap() < schedule.snr_for_round(1));
    assert!(run.results()[2].snr_db < run.results()[1].snr_db);
}

#[test]
fn test_snr_depends_only_on_round() {
    let schedule = SnrSchedule::default();
    let mut all_wrong = SnrRun::new(schedule).unwrap();
    let mut all_right = SnrRun::new(schedule).unwrap();
    for _ in 0..schedule.rounds {
        all_wrong.record("111", "222");
        all_right.record("111", "111");
    }
    for (a, b) in all_wrong.results().iter().zip(all_right.results()) {
        assert_eq!(a.snr_db, b.snr_db);
        assert_eq!(a.noise_gain, b.noise_gain);
    }
    for pair in all_right.results().windows(2) {
        assert!(pair[1].snr_db < pair[0].snr_db);
    }
    assert!(!all_wrong.estimate().is_determined());
}

/// Digit source that remembers the last triplet it was asked for
struct Spy {
    inner: SyntheticDigits,
    last: Rc<RefCell<String>>,
}

impl DigitSource for Spy {
    fn triplet(&mut self, digits: &str) -> Result<Buffer> {
        *self.last.borrow_mut() = digits.to_string();
        self.inner.triplet(digits)
    }

    fn noise(&mut self) -> Result<Buffer> {
        self.inner.noise()
    }
}

/// Response source answering from what the spy saw
struct Listener {
    last: Rc<RefCell<String>>,
    /// Whether to repeat each round's triplet correctly; quits afterwards
    plan: Vec<bool>,
    round: usize,
}

#[async_trait(?Send)]
impl ResponseSource for Listener {
    async fn next_event(&mut self) -> Option<InputEvent> {
        let event = match self.plan.get(self.round) {
            None => InputEvent::Quit,
            Some(&correct) => {
                let heard = self.last.borrow().clone();
                let answer = if correct {
                    heard
                } else {
                    let n: u32 = heard.parse().unwrap_or(0);
                    format!("{:03}", (n + 1) % 1000)
                };
                InputEvent::Response(Response::Digits(answer))
            }
        };
        self.round += 1;
        Some(event)
    }

    fn discard_pending(&mut self) -> usize {
        0
    }
}

#[tokio::test]
async fn test_snr_session_scenario() {
    let config = SessionConfig {
        inter_trial_pause_ms: 0,
        ..SessionConfig::default()
    };
    let last = Rc::new(RefCell::new(String::new()));
    let spy = Spy {
        inner: SyntheticDigits::new(48000, -20.0, -29.29, 5),
        last: last.clone(),
    };
    let listener = Listener {
        last,
        plan: vec![true, true, false],
        round: 0,
    };

    let mut sequencer = Sequencer::new(OfflineBackend::new(48000), listener, config.clone())
        .with_seed(9)
        .with_digits(Box::new(spy));
    let mut procedure = SnrProcedure::new(sequencer.config()).unwrap();
    let record = sequencer
        .run(&mut procedure, &mut MemorySink::new())
        .await
        .unwrap();

    assert!(!record.completed);
    let correct: Vec<bool> = record.trials.iter().map(|t| t.correct).collect();
    assert_eq!(correct, vec![true, true, false]);
    let gains: Vec<f64> = record.trials.iter().map(|t| t.parameter).collect();
    assert_eq!(gains, vec![3.0, 3.5, 4.0]);
    assert_relative_eq!(
        record.estimate.value.unwrap(),
        config.snr.schedule.snr_for_round(2)
    );

    // noise first, digits 0.5 s in, noise outlasting the digits by 0.5 s
    let sources = sequencer.player().backend().records();
    let (noise, digits) = (&sources[0], &sources[1]);
    assert_relative_eq!(noise.start_time, config.lead_in_sec, epsilon = 1e-9);
    assert_relative_eq!(digits.start_time, noise.start_time + 0.5, epsilon = 1e-9);
    assert_relative_eq!(noise.stop_time, digits.stop_time + 0.5, epsilon = 1e-3);
    assert!(sources[2].start_time >= noise.stop_time);
}
