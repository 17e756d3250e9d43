//! E2E tests for the ascending dB HL level search
//!
//! Covers the staircase on its own and a full session through the sequencer
//! on the virtual-clock backend.

use approx::assert_relative_eq;
use hearingtest::estimator::interpret::{HearingCategory, Interpretation};
use hearingtest::estimator::level::{Calibration, DeviceClass, LevelStaircase};
use hearingtest::estimator::staircase::{StepDirection, StepOutcome};
use hearingtest::session::procedure::LevelProcedure;
use hearingtest::session::{MemorySink, Response, ScriptedResponses};
use hearingtest::{Confidence, EarMode, OfflineBackend, Sequencer, SessionConfig, TestKind};

fn quiet_config() -> SessionConfig {
    SessionConfig {
        inter_trial_pause_ms: 0,
        ..SessionConfig::default()
    }
}

/// Three "no" then "yes" from 0 dB SPL in 2.5 dB steps on supra-aural phones
#[test]
fn test_level_scenario_threshold_zero() {
    let cal = Calibration {
        spl_at_full_scale: 100.0,
        device: DeviceClass::SupraAural,
    };
    let mut staircase = LevelStaircase::new(0.0, 2.5, cal).unwrap();
    for _ in 0..3 {
        staircase.respond(false);
    }
    staircase.respond(true);

    assert_eq!(staircase.levels_visited(), &[0.0, 2.5, 5.0, 7.5]);
    assert_eq!(staircase.current_spl(), 7.5);
    assert_relative_eq!(staircase.threshold_db_hl().unwrap(), 0.0);
    assert_eq!(staircase.estimate().confidence, Confidence::Normal);
}

/// Level = start + step x misses, for every number of misses below full scale
#[test]
fn test_level_is_start_plus_steps() {
    for misses in 0..20 {
        let mut staircase = LevelStaircase::new(10.0, 2.5, Calibration::default()).unwrap();
        for _ in 0..misses {
            staircase.respond(false);
        }
        staircase.respond(true);
        assert_relative_eq!(staircase.current_spl(), 10.0 + 2.5 * misses as f64);
    }
}

/// Reaching full scale clamps to 0 dBFS and ends the run
#[test]
fn test_level_clamps_at_full_scale_and_stops() {
    let cal = Calibration {
        spl_at_full_scale: 90.0,
        device: DeviceClass::Circumaural,
    };
    let mut staircase = LevelStaircase::new(85.0, 2.5, cal).unwrap();
    assert_eq!(staircase.respond(false), StepOutcome::Stepped(StepDirection::Up));
    assert_eq!(staircase.respond(false), StepOutcome::Clamped(StepDirection::Up));
    assert!(staircase.is_finished());
    assert_eq!(staircase.current_spl(), 90.0);
    assert_relative_eq!(staircase.current_amplitude(), 1.0);

    // a pending "heard" no longer changes anything
    assert_eq!(staircase.respond(true), StepOutcome::Held);
    let estimate = staircase.estimate();
    assert_relative_eq!(estimate.value.unwrap(), 86.0);
    assert_eq!(estimate.confidence, Confidence::Low);
}

#[tokio::test]
async fn test_level_session_records_every_trial() {
    let responses = ScriptedResponses::from_iter([
        Response::Heard(false),
        Response::Heard(false),
        Response::Heard(false),
        Response::Heard(true),
    ]);
    let mut config = quiet_config();
    config.ear_mode = EarMode::Left;
    config.calibration = Some(Calibration {
        spl_at_full_scale: 100.0,
        device: DeviceClass::SupraAural,
    });

    let mut sequencer = Sequencer::new(OfflineBackend::new(48000), responses, config);
    let mut procedure = LevelProcedure::new(sequencer.config()).unwrap();
    let mut sink = MemorySink::new();
    let record = sequencer.run(&mut procedure, &mut sink).await.unwrap();

    assert_eq!(record.kind, TestKind::Level);
    assert_eq!(record.ear_mode, EarMode::Left);
    assert!(record.completed);
    let levels: Vec<f64> = record.trials.iter().map(|t| t.parameter).collect();
    assert_eq!(levels, vec![0.0, 2.5, 5.0, 7.5]);
    let answers: Vec<bool> = record.trials.iter().map(|t| t.correct).collect();
    assert_eq!(answers, vec![false, false, false, true]);
    assert_relative_eq!(record.estimate.value.unwrap(), 0.0);

    let Some(Interpretation::Level(band)) = record.interpretation else {
        panic!("expected a dB HL band");
    };
    assert_eq!(band.category, HearingCategory::Normal);
    assert_eq!(band.typical_age_from, 0);

    // each tone is louder than the last and only reaches the left ear
    let sources = sequencer.player().backend().records();
    assert_eq!(sources.len(), 4);
    let peaks: Vec<f32> = sources
        .iter()
        .map(|s| s.samples.iter().map(|x| x.abs()).fold(0.0, f32::max))
        .collect();
    for pair in peaks.windows(2) {
        assert!(pair[1] > pair[0]);
    }
    assert!(sources.iter().all(|s| s.channel_gains == [1.0, 0.0]));
    assert_eq!(sink.records().len(), 1);
}
