//! # Track Recorder
//!
//! Crash-safe recording engine for GPS tracks.
//!
//! This library provides:
//! - A session state machine owning the single in-progress track
//! - Incremental snapshot persistence, so an interrupted session resumes
//!   after a process restart
//! - Checkpoints (annotated points of interest) tied to the active track
//! - Derived metrics on stop: distance, duration, elevation gain
//! - Export of finalized tracks to GPX, KML and CSV
//!
//! ## Quick Start
//!
//! ```rust
//! use track_recorder::{Fix, MemoryStore, ScriptedLocationSource, SessionEngine};
//!
//! let mut engine =
//!     SessionEngine::new(MemoryStore::new(), ScriptedLocationSource::new()).unwrap();
//! engine.start("Morning loop", "").unwrap();
//!
//! // The host feeds position fixes as the platform delivers them.
//! engine.accept_sample(Fix::new(47.3769, 8.5417, Some(408.0), 1_700_000_000_000));
//! engine.accept_sample(Fix::new(47.3780, 8.5430, Some(410.0), 1_700_000_005_000));
//!
//! let track = engine.stop().unwrap();
//! assert_eq!(track.points.len(), 2);
//! assert!(!track.is_recording);
//! assert!(track.distance.unwrap() > 0.0);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{RecorderError, Result};

// Geodesic calculations (distance, elevation gain)
pub mod geo_utils;
pub use geo_utils::{cumulative_distance, elevation_gain, haversine_distance};

// Sampling policy (automatic vs manual point acceptance)
pub mod policy;
pub use policy::SamplingPolicy;

// Checkpoint construction
pub mod checkpoints;

// Location source seam (position fixes, subscriptions)
pub mod location;
pub use location::{Fix, LocationSource, ScriptedLocationSource, SubscriptionId};

// Durable session store (active-session slot, archive, checkpoints, settings)
pub mod store;
pub use store::{MemoryStore, SessionStore, SqliteStore};

// Session state machine (the single owner of the active track)
pub mod session;
pub use session::{LiveStats, SessionEngine};

// Export encoders for finalized tracks
pub mod export;
pub use export::{to_csv, to_gpx, to_kml};

// ============================================================================
// Core Types
// ============================================================================

/// A single timestamped position sample belonging to a track's path.
///
/// Immutable once appended; a track's point order is append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Elevation in meters, when the fix carried one.
    pub elevation: Option<f64>,
    /// Free-form annotation (manual-mode checkpoint points carry the note).
    pub comment: Option<String>,
    /// Reference to an attached photo (opaque to the engine).
    pub photo: Option<String>,
}

impl TrackPoint {
    /// Create a bare track point.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            elevation: None,
            comment: None,
            photo: None,
        }
    }

    /// Build a track point from a delivered position fix.
    pub fn from_fix(fix: &Fix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp,
            elevation: fix.elevation,
            comment: None,
            photo: None,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box over a track's points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from track points. `None` for an empty slice.
    pub fn from_points(points: &[TrackPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Center point of the bounds, as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// One recorded outdoor session: a point sequence plus metadata and, once
/// stopped, derived metrics.
///
/// Invariants maintained by [`SessionEngine`](session::SessionEngine):
/// - `is_recording == true` exactly while `end_time` is unset, and at most
///   one track is recording system-wide.
/// - `points` is append-only while recording and frozen afterwards.
/// - `distance` / `duration` / `elevation_gain` are unset while recording and
///   set exactly once on stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Opaque unique identifier, generated at session start.
    pub id: String,
    pub name: String,
    pub description: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds; set exactly once when the session stops.
    pub end_time: Option<i64>,
    pub points: Vec<TrackPoint>,
    pub is_recording: bool,
    /// Total distance in meters over `points`, computed on stop.
    pub distance: Option<f64>,
    /// `end_time - start_time` in milliseconds, computed on stop. A session
    /// with no points still gets an explicit duration.
    pub duration: Option<i64>,
    /// Cumulative positive elevation gain in meters; only set when elevation
    /// recording was enabled for the session.
    pub elevation_gain: Option<f64>,
}

impl Track {
    /// Create a fresh recording track with no points.
    pub fn new(id: String, name: &str, description: &str, start_time: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            start_time,
            end_time: None,
            points: Vec::new(),
            is_recording: true,
            distance: None,
            duration: None,
            elevation_gain: None,
        }
    }

    /// Bounding box over the recorded points, for map framing.
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.points)
    }
}

/// A user-annotated point of interest, linked to a track by id but stored in
/// its own collection, independent of the sampling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Opaque unique identifier.
    pub id: String,
    /// Id of the owning track.
    pub track_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub note: Option<String>,
    /// Reference to an attached photo (opaque to the engine).
    pub photo: Option<String>,
    /// Whether the checkpoint is shown on the map.
    pub visible: bool,
}

/// How track points are acquired during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Points are appended from periodic location deliveries.
    Automatic,
    /// Points are appended only via explicit checkpoint creation.
    Manual,
}

/// Process-wide recording configuration.
///
/// Read by the engine at session start and held fixed for that session;
/// changes mid-session only affect future sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub mode: RecordingMode,
    /// Minimum distance in meters between autonomous fixes (>= 0). Passed to
    /// the location source at subscription time.
    pub min_distance_meters: f64,
    /// Minimum time in seconds between autonomous fixes (>= 0). Passed to
    /// the location source at subscription time.
    pub min_time_seconds: u32,
    /// When false, the finalized track gets no elevation-gain metric.
    pub record_elevation: bool,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            mode: RecordingMode::Automatic,
            min_distance_meters: 10.0,
            min_time_seconds: 5,
            record_elevation: true,
        }
    }
}

// ============================================================================
// Id Generation
// ============================================================================

/// Generate an opaque id of the form `{prefix}_{epoch_millis}_{suffix:05}`.
/// The suffix is a process-local counter so ids created within the same
/// millisecond stay unique.
pub(crate) fn generate_id(prefix: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix = COUNTER.fetch_add(1, Ordering::Relaxed) % 100_000;

    format!("{}_{}_{:05}", prefix, ts, suffix)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> Vec<TrackPoint> {
        (0..5)
            .map(|i| TrackPoint::new(47.3769 + i as f64 * 0.001, 8.5417, 1_700_000_000_000 + i))
            .collect()
    }

    #[test]
    fn test_track_point_validation() {
        assert!(TrackPoint::new(47.3769, 8.5417, 0).is_valid());
        assert!(!TrackPoint::new(91.0, 0.0, 0).is_valid());
        assert!(!TrackPoint::new(0.0, 181.0, 0).is_valid());
        assert!(!TrackPoint::new(f64::NAN, 0.0, 0).is_valid());
    }

    #[test]
    fn test_track_point_from_fix() {
        let fix = Fix::new(47.3769, 8.5417, Some(408.0), 1_700_000_000_000);
        let point = TrackPoint::from_fix(&fix);
        assert_eq!(point.latitude, 47.3769);
        assert_eq!(point.elevation, Some(408.0));
        assert_eq!(point.timestamp, 1_700_000_000_000);
        assert!(point.comment.is_none());
    }

    #[test]
    fn test_bounds_from_points() {
        let bounds = Bounds::from_points(&sample_points()).unwrap();
        assert_eq!(bounds.min_lat, 47.3769);
        assert_eq!(bounds.max_lat, 47.3769 + 4.0 * 0.001);
        assert_eq!(bounds.min_lng, 8.5417);

        assert!(Bounds::from_points(&[]).is_none());
    }

    #[test]
    fn test_new_track_is_recording() {
        let track = Track::new(generate_id("track"), "Morning loop", "", 1_700_000_000_000);
        assert!(track.is_recording);
        assert!(track.end_time.is_none());
        assert!(track.points.is_empty());
        assert!(track.distance.is_none());
        assert!(track.duration.is_none());
        assert!(track.elevation_gain.is_none());
    }

    #[test]
    fn test_generated_ids_unique() {
        let a = generate_id("track");
        let b = generate_id("track");
        assert_ne!(a, b);
        assert!(a.starts_with("track_"));
    }

    #[test]
    fn test_settings_serde_round_trip() {
        let settings = RecordingSettings {
            mode: RecordingMode::Manual,
            min_distance_meters: 25.0,
            min_time_seconds: 30,
            record_elevation: false,
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"manual\""));
        let back: RecordingSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
