//! Hearingtest - adaptive hearing self-tests
//!
//! This library re-exports the test engine, stimulus scheduling and session
//! control from `hearingtest-core`.

pub use hearingtest_core::audio;
pub use hearingtest_core::config;
pub use hearingtest_core::estimator;
pub use hearingtest_core::session;

pub use hearingtest_core::{
    procedure_for, Confidence, EarMode, HearingTestError, OfflineBackend, PlaybackBackend,
    Procedure, Result, ResultSink, Sequencer, SessionConfig, SessionRecord, StimulusPlayer, TestKind,
    ThresholdEstimate, Unit,
};
pub use hearingtest_core::{DEFAULT_SAMPLE_RATE, VERSION};

#[cfg(feature = "device")]
pub use hearingtest_core::AudioEngine;
