//! Hearingtest Core - Adaptive psychoacoustic test engine
//!
//! This library provides the threshold-search procedures behind the hearingtest
//! self-tests (dB HL level search, digits-in-noise SNR, high-frequency ceiling,
//! temporal gap detection) together with the stimulus synthesis and
//! sample-accurate scheduling those procedures depend on.

pub mod audio;
pub mod config;
pub mod error;
pub mod estimator;
pub mod session;

pub use audio::offline::OfflineBackend;
pub use audio::player::{PlaybackBackend, PlaybackHandle, StimulusPlayer};
pub use audio::routing::EarMode;
pub use audio::signal::Buffer;
pub use config::SessionConfig;
pub use error::{HearingTestError, Result};
pub use estimator::{Confidence, ThresholdEstimate, Unit};
pub use session::procedure::{procedure_for, Procedure, TestKind};
pub use session::result::{ResultSink, SessionRecord};
pub use session::sequencer::Sequencer;

#[cfg(feature = "device")]
pub use audio::engine::AudioEngine;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default output sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
