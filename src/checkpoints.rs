//! Checkpoint construction.
//!
//! A checkpoint is a user-annotated point of interest bound to the active
//! track by id but stored in its own collection, independent of how many
//! track points the sampling policy has produced. In manual mode the same
//! fix also yields the track's next visible point; both records are built
//! up front so a failed write never leaves a half-constructed pair.

use crate::{generate_id, Checkpoint, Fix, TrackPoint};

/// Build a checkpoint for `track_id` from a position fix.
pub fn from_fix(track_id: &str, fix: &Fix, note: Option<&str>, photo: Option<&str>) -> Checkpoint {
    Checkpoint {
        id: generate_id("checkpoint"),
        track_id: track_id.to_string(),
        latitude: fix.latitude,
        longitude: fix.longitude,
        elevation: fix.elevation,
        timestamp: fix.timestamp,
        note: note.map(str::to_string),
        photo: photo.map(str::to_string),
        visible: true,
    }
}

/// Build the manual-mode track point that mirrors a checkpoint, carrying the
/// same annotation.
pub fn point_from_fix(fix: &Fix, note: Option<&str>, photo: Option<&str>) -> TrackPoint {
    TrackPoint {
        comment: note.map(str::to_string),
        photo: photo.map(str::to_string),
        ..TrackPoint::from_fix(fix)
    }
}
