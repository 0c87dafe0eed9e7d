//! Sampling policy: decides whether a proposed point source produces a
//! recorded track point for the current session.
//!
//! The policy performs no distance/time filtering of its own. In automatic
//! mode, upstream delivery is already throttled by the thresholds the engine
//! passes to [`LocationSource::subscribe`](crate::location::LocationSource::subscribe),
//! so every delivered fix is accepted. In manual mode, autonomous fixes never
//! become points; only checkpoint creation does.

use crate::{RecordingMode, RecordingSettings};

/// Per-session sampling policy, captured from the settings at session start
/// and fixed for the session's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
    mode: RecordingMode,
}

impl SamplingPolicy {
    /// Capture the policy for a session starting under `settings`.
    pub fn for_session(settings: &RecordingSettings) -> Self {
        Self {
            mode: settings.mode,
        }
    }

    /// Whether an autonomously delivered fix becomes a track point.
    pub fn accepts_delivered_fix(&self) -> bool {
        self.mode == RecordingMode::Automatic
    }

    /// Whether checkpoint creation also appends a visible track point.
    pub fn checkpoint_appends_point(&self) -> bool {
        self.mode == RecordingMode::Manual
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }
}
