//! Unified error handling for the track-recorder library.
//!
//! Every fallible operation returns [`Result`] with [`RecorderError`].
//! Sequencing errors (`AlreadyRecording`, `NoActiveSession`) are surfaced
//! directly to the caller and never retried internally. `LocationUnavailable`
//! is retryable by the user (re-request the checkpoint once a fix exists).
//! `Persistence` reports a durable write that did not complete; during
//! `stop()` it blocks finalization until a retry succeeds.

use thiserror::Error;

/// Unified error type for recorder operations.
#[derive(Debug, Clone, Error)]
pub enum RecorderError {
    /// `start` was called while a session is already active.
    #[error("a recording session is already active (track '{track_id}')")]
    AlreadyRecording { track_id: String },

    /// An operation requiring an active session was called while idle.
    #[error("no active recording session")]
    NoActiveSession,

    /// No position fix could be obtained from the location source.
    #[error("current position unavailable")]
    LocationUnavailable,

    /// A durable write did not complete.
    #[error("persistence error: {message}")]
    Persistence { message: String },

    /// Export was requested for a track that is still recording.
    #[error("track '{track_id}' is still recording")]
    TrackStillRecording { track_id: String },

    /// The requested track does not exist in the archive.
    #[error("track '{track_id}' not found in archive")]
    NotFound { track_id: String },
}

impl RecorderError {
    /// Shorthand for a [`RecorderError::Persistence`] with the given message.
    pub fn persistence(message: impl Into<String>) -> Self {
        RecorderError::Persistence {
            message: message.into(),
        }
    }
}

/// Result type alias for recorder operations.
pub type Result<T> = std::result::Result<T, RecorderError>;

impl From<rusqlite::Error> for RecorderError {
    fn from(err: rusqlite::Error) -> Self {
        RecorderError::persistence(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RecorderError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RecorderError::persistence(format!("point stream encode: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for RecorderError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RecorderError::persistence(format!("point stream decode: {}", err))
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::persistence(format!("settings encode/decode: {}", err))
    }
}
