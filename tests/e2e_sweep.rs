//! E2E tests for the high-frequency ceiling sweep

use hearingtest::estimator::interpret::{Advice, Interpretation};
use hearingtest::estimator::sweep::{FrequencySweep, SweepParams, SweepPhase};
use hearingtest::session::input::SweepControl;
use hearingtest::session::procedure::SweepProcedure;
use hearingtest::session::{MemorySink, Response, ScriptedResponses};
use hearingtest::{OfflineBackend, Sequencer, SessionConfig};

/// Steps are 1000 Hz up to 6000 Hz and 500 Hz from there on
#[test]
fn test_sweep_step_changes_at_boundary() {
    let mut sweep = FrequencySweep::new(SweepParams::default()).unwrap();
    let mut path = vec![sweep.current_hz()];
    while sweep.current_hz() < 6200.0 {
        path.push(sweep.advance());
    }
    assert_eq!(path, vec![2000.0, 3000.0, 4000.0, 5000.0, 6000.0, 6500.0]);

    let steps: Vec<f64> = path.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(steps, vec![1000.0, 1000.0, 1000.0, 1000.0, 500.0]);
}

#[test]
fn test_sweep_capped_at_ceiling() {
    let mut sweep = FrequencySweep::new(SweepParams::default()).unwrap();
    for _ in 0..100 {
        sweep.advance();
    }
    assert_eq!(sweep.current_hz(), 20000.0);
    assert_eq!(sweep.phase(), SweepPhase::Coarse);
}

#[test]
fn test_fine_phase_bounded_to_bracket() {
    let mut sweep = FrequencySweep::new(SweepParams::default()).unwrap();
    for _ in 0..5 {
        sweep.advance();
    }
    assert_eq!(sweep.current_hz(), 6500.0);
    sweep.mark_inaudible();
    assert_eq!(
        sweep.phase(),
        SweepPhase::Fine {
            low_hz: 6000.0,
            high_hz: 6500.0
        }
    );
    assert_eq!(sweep.current_hz(), 6000.0);

    sweep.retreat();
    assert_eq!(sweep.current_hz(), 6000.0);
    for _ in 0..10 {
        sweep.advance();
    }
    assert_eq!(sweep.current_hz(), 6500.0);
    sweep.mark_inaudible();
    assert_eq!(sweep.estimate_hz(), Some(6400.0));
}

#[tokio::test]
async fn test_sweep_session() {
    let config = SessionConfig {
        inter_trial_pause_ms: 0,
        ..SessionConfig::default()
    };
    let responses = ScriptedResponses::from_iter(
        [
            SweepControl::Up,
            SweepControl::Up,
            SweepControl::Inaudible,
            SweepControl::Up,
            SweepControl::Up,
            SweepControl::Inaudible,
        ]
        .map(Response::Sweep),
    );
    let mut sequencer = Sequencer::new(OfflineBackend::new(48000), responses, config);
    let mut procedure = SweepProcedure::new(sequencer.config()).unwrap();
    let record = sequencer
        .run(&mut procedure, &mut MemorySink::new())
        .await
        .unwrap();

    assert!(record.completed);
    let presented: Vec<f64> = record.trials.iter().map(|t| t.parameter).collect();
    assert_eq!(presented, vec![2000.0, 3000.0, 4000.0, 3000.0, 3100.0, 3200.0]);
    assert_eq!(record.estimate.value, Some(3100.0));
    assert_eq!(
        record.interpretation,
        Some(Interpretation::FrequencyCeiling {
            advice: Advice::Consult
        })
    );
}
