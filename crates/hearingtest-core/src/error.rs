//! Error taxonomy for the test engine

use thiserror::Error;

/// Result type alias using [`HearingTestError`]
pub type Result<T> = std::result::Result<T, HearingTestError>;

/// Errors surfaced by synthesis, scheduling and session control
///
/// Out-of-phase responses and staircase clamping are not errors; they are
/// reported as values by the sequencer and the estimators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HearingTestError {
    /// Malformed synthesis or envelope request; fatal to that call only
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The playback backend refused or failed to schedule a source
    #[error("Playback unavailable: {0}")]
    PlaybackUnavailable(String),

    /// The session was cancelled while playback or input was pending
    #[error("Session cancelled")]
    Cancelled,

    /// A stimulus asset could not be loaded
    #[error("Asset error: {0}")]
    Asset(String),

    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),
}

impl HearingTestError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
