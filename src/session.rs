//! Session state machine.
//!
//! [`SessionEngine`] is the single owner of the active track. It mediates
//! every mutation (start, sample acceptance, checkpoints, stop), consults the
//! sampling policy and the geodesic calculator, and synchronously persists a
//! full snapshot after each mutation so a process restart never loses more
//! than the most recent uncommitted command.
//!
//! ## Concurrency
//!
//! All mutating methods take `&mut self`: the engine itself is the
//! single-writer discipline. Hosts that receive location fixes on another
//! thread wrap the engine in a `Mutex` and forward one fix at a time; because
//! every mutation completes its snapshot write before returning, lock order
//! is persistence order, and a `stop()` racing a sample delivery observes the
//! sample's write settled.

use log::{debug, info, warn};

use crate::checkpoints;
use crate::error::{RecorderError, Result};
use crate::geo_utils;
use crate::location::{Fix, LocationSource, SubscriptionId};
use crate::policy::SamplingPolicy;
use crate::store::SessionStore;
use crate::{generate_id, Checkpoint, RecordingMode, RecordingSettings, Track, TrackPoint};

/// In-memory state of the one recording session.
///
/// The settings are captured at session start and stay fixed for the
/// session; later settings writes only affect future sessions.
struct ActiveSession {
    track: Track,
    settings: RecordingSettings,
    subscription: Option<SubscriptionId>,
}

/// Live view of the in-progress session, for recording screens.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStats {
    pub point_count: u32,
    /// Meters over the points recorded so far.
    pub distance_m: f64,
    /// Milliseconds since the session started.
    pub elapsed_ms: i64,
}

/// The track recording session engine.
///
/// Owns the durable store and the location source; holds the single active
/// track as explicit state rather than a process-wide global. Constructing
/// an engine recovers an interrupted session from the store's active-session
/// snapshot.
pub struct SessionEngine<S, L> {
    store: S,
    location: L,
    active: Option<ActiveSession>,
}

impl<S: SessionStore, L: LocationSource> SessionEngine<S, L> {
    /// Create an engine over the given collaborators, resuming an
    /// interrupted session if the store holds an active snapshot.
    pub fn new(store: S, location: L) -> Result<Self> {
        let mut engine = Self {
            store,
            location,
            active: None,
        };
        engine.recover()?;
        Ok(engine)
    }

    /// Resume from the persisted active-session snapshot, if any.
    ///
    /// Nothing is replayed from the archive; samples lost between the last
    /// durable snapshot and the crash stay lost (at-least-once durability).
    fn recover(&mut self) -> Result<()> {
        let Some(track) = self.store.read_active_session()? else {
            return Ok(());
        };

        info!(
            "[SessionEngine] resuming interrupted session '{}' ({} points)",
            track.id,
            track.points.len()
        );

        // The snapshot format carries only the track, so the session settings
        // are re-read from the store on resume.
        let settings = self.store.read_settings()?.unwrap_or_default();
        let subscription = if settings.mode == RecordingMode::Automatic {
            Some(
                self.location
                    .subscribe(settings.min_distance_meters, settings.min_time_seconds),
            )
        } else {
            None
        };

        self.active = Some(ActiveSession {
            track,
            settings,
            subscription,
        });
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Begin a new recording session.
    ///
    /// Fails with [`RecorderError::AlreadyRecording`] while a session is
    /// active. The fresh snapshot is durably written before the in-memory
    /// transition; a stale snapshot from an unclean shutdown is replaced by
    /// that single-key write, never deleted first.
    pub fn start(&mut self, name: &str, description: &str) -> Result<()> {
        if let Some(session) = &self.active {
            return Err(RecorderError::AlreadyRecording {
                track_id: session.track.id.clone(),
            });
        }

        let settings = self.store.read_settings()?.unwrap_or_default();
        let track = Track::new(generate_id("track"), name, description, now_ms());
        self.store.write_active_session(&track)?;

        let subscription = if settings.mode == RecordingMode::Automatic {
            Some(
                self.location
                    .subscribe(settings.min_distance_meters, settings.min_time_seconds),
            )
        } else {
            None
        };

        info!(
            "[SessionEngine] started session '{}' in {:?} mode",
            track.id, settings.mode
        );

        self.active = Some(ActiveSession {
            track,
            settings,
            subscription,
        });
        Ok(())
    }

    /// Feed a delivered position fix into the engine.
    ///
    /// Returns `true` when the fix was appended as a track point. Fixes that
    /// arrive while no session is recording are discarded (delivery racing a
    /// stop is expected, not an error), as are autonomous fixes in manual
    /// mode. Consecutive identical coordinates are kept as distinct points.
    ///
    /// A failed snapshot write is logged and the appended point retained in
    /// memory; snapshots are full-state rewrites, so the next successful
    /// write carries it forward.
    pub fn accept_sample(&mut self, fix: Fix) -> bool {
        let Some(session) = self.active.as_mut() else {
            debug!("[SessionEngine] fix discarded: no active session");
            return false;
        };

        if !SamplingPolicy::for_session(&session.settings).accepts_delivered_fix() {
            debug!("[SessionEngine] fix discarded: manual mode");
            return false;
        }

        session.track.points.push(TrackPoint::from_fix(&fix));
        if let Err(err) = self.store.write_active_session(&session.track) {
            warn!(
                "[SessionEngine] snapshot write failed after sample append: {}",
                err
            );
        }
        true
    }

    /// Create a checkpoint at the current position.
    ///
    /// Requires an active session and an obtainable fix. In manual mode the
    /// same fix also becomes the track's next visible point, persisted
    /// through the same snapshot path as an automatic sample.
    pub fn add_checkpoint(
        &mut self,
        note: Option<&str>,
        photo: Option<&str>,
    ) -> Result<Checkpoint> {
        let Some(session) = self.active.as_mut() else {
            return Err(RecorderError::NoActiveSession);
        };

        let fix = self
            .location
            .current_fix()
            .ok_or(RecorderError::LocationUnavailable)?;

        // Both records are built before any write; a failed checkpoint append
        // leaves nothing applied.
        let checkpoint = checkpoints::from_fix(&session.track.id, &fix, note, photo);
        let manual_point = SamplingPolicy::for_session(&session.settings)
            .checkpoint_appends_point()
            .then(|| checkpoints::point_from_fix(&fix, note, photo));

        self.store.append_checkpoint(&checkpoint)?;

        if let Some(point) = manual_point {
            session.track.points.push(point);
            if let Err(err) = self.store.write_active_session(&session.track) {
                warn!(
                    "[SessionEngine] snapshot write failed after checkpoint point: {}",
                    err
                );
            }
        }

        info!(
            "[SessionEngine] checkpoint '{}' added to track '{}'",
            checkpoint.id, session.track.id
        );
        Ok(checkpoint)
    }

    /// Stop the active session and finalize the track.
    ///
    /// Computes the derived metrics, archives the finalized track, then
    /// clears the active-session slot. The two writes are not assumed
    /// atomic together: if either fails the session stays `Recording` (and
    /// subscribed) and `stop()` must be retried; the archive upsert is
    /// idempotent per track id, so a retry after a failed slot clear is safe.
    pub fn stop(&mut self) -> Result<Track> {
        let (finalized, subscription) = {
            let Some(session) = self.active.as_ref() else {
                return Err(RecorderError::NoActiveSession);
            };

            let end_time = now_ms();
            let mut finalized = session.track.clone();
            finalized.end_time = Some(end_time);
            finalized.is_recording = false;
            finalized.duration = Some(end_time - finalized.start_time);
            finalized.distance = Some(geo_utils::cumulative_distance(&finalized.points));
            finalized.elevation_gain = session
                .settings
                .record_elevation
                .then(|| geo_utils::elevation_gain(&finalized.points));

            (finalized, session.subscription)
        };

        self.store.append_to_archive(&finalized)?;
        self.store.clear_active_session()?;

        if let Some(id) = subscription {
            self.location.unsubscribe(id);
        }
        self.active = None;

        info!(
            "[SessionEngine] stopped track '{}': {} points, {:.1} m",
            finalized.id,
            finalized.points.len(),
            finalized.distance.unwrap_or(0.0)
        );
        Ok(finalized)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Replace the process-wide recording settings.
    ///
    /// Takes effect for future sessions; an active session keeps the
    /// settings captured at its start.
    pub fn update_settings(&mut self, settings: RecordingSettings) -> Result<()> {
        self.store.write_settings(&settings)
    }

    /// The currently stored recording settings (defaults if never written).
    pub fn settings(&mut self) -> Result<RecordingSettings> {
        Ok(self.store.read_settings()?.unwrap_or_default())
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// The in-progress track, if a session is active.
    pub fn active_track(&self) -> Option<&Track> {
        self.active.as_ref().map(|session| &session.track)
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Live metrics over the in-progress session.
    pub fn live_stats(&self) -> Option<LiveStats> {
        let session = self.active.as_ref()?;
        Some(LiveStats {
            point_count: session.track.points.len() as u32,
            distance_m: geo_utils::cumulative_distance(&session.track.points),
            elapsed_ms: now_ms() - session.track.start_time,
        })
    }

    /// Direct store access, for archive listing/deletion and test hooks.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable store access.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Mutable location-source access, for scripted fix queues in tests.
    pub fn location_mut(&mut self) -> &mut L {
        &mut self.location
    }

    /// Tear the engine down without touching persisted state, returning its
    /// collaborators. The durable snapshot survives, so a new engine over
    /// the same store resumes the session.
    pub fn into_parts(self) -> (S, L) {
        (self.store, self.location)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Tests
// ============================================================================
