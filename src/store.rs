//! Durable session store.
//!
//! The engine persists through the [`SessionStore`] trait:
//!
//! - a single-slot **active session** snapshot, rewritten in full after every
//!   mutation so a process restart resumes from the last durable state
//! - the **archive** of finalized tracks
//! - the **checkpoint** collection, keyed by owning track
//! - the process-wide **recording settings**
//!
//! Each operation is atomic at the single-key granularity listed; no
//! cross-key transaction is assumed by callers, which is why archive writes
//! are idempotent upserts (a retried `stop()` re-appends the same track id
//! without duplicating it).
//!
//! [`SqliteStore`] is the production backend; [`MemoryStore`] backs tests
//! and can inject write failures.

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{RecorderError, Result};
use crate::{Checkpoint, RecordingSettings, Track, TrackPoint};

/// Storage interface consumed by the session engine.
///
/// All operations are atomic per key; last write wins.
pub trait SessionStore {
    /// Read the single in-progress session snapshot, if one exists.
    fn read_active_session(&mut self) -> Result<Option<Track>>;
    /// Replace the in-progress session snapshot with the given track.
    fn write_active_session(&mut self, track: &Track) -> Result<()>;
    /// Remove the in-progress session snapshot.
    fn clear_active_session(&mut self) -> Result<()>;

    /// Upsert a finalized track into the archive.
    fn append_to_archive(&mut self, track: &Track) -> Result<()>;
    /// All archived tracks, most recently started first.
    fn list_archive(&mut self) -> Result<Vec<Track>>;
    /// A single archived track by id.
    fn get_archived(&mut self, track_id: &str) -> Result<Option<Track>>;
    /// Delete an archived track and its checkpoints wholesale.
    fn remove_from_archive(&mut self, track_id: &str) -> Result<()>;

    /// All stored checkpoints.
    fn read_checkpoints(&mut self) -> Result<Vec<Checkpoint>>;
    /// Checkpoints belonging to one track, oldest first.
    fn checkpoints_for_track(&mut self, track_id: &str) -> Result<Vec<Checkpoint>>;
    /// Append one checkpoint.
    fn append_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()>;

    /// Read the stored recording settings, if any were ever written.
    fn read_settings(&mut self) -> Result<Option<RecordingSettings>>;
    /// Replace the stored recording settings.
    fn write_settings(&mut self, settings: &RecordingSettings) -> Result<()>;
}

// ============================================================================
// SQLite Store
// ============================================================================

/// SQLite-backed session store.
///
/// Track metadata lives in columns; the point stream is a MessagePack BLOB.
/// The active session and the settings each occupy a single checked row, so
/// a rewrite is one atomic `INSERT OR REPLACE`.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        debug!("[SqliteStore] opened database at {}", db_path);
        Ok(Self { db })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- The single in-progress session snapshot
            CREATE TABLE IF NOT EXISTS active_session (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                track_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                points BLOB NOT NULL,
                point_count INTEGER NOT NULL
            );

            -- Finalized tracks
            CREATE TABLE IF NOT EXISTS tracks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                points BLOB NOT NULL,
                point_count INTEGER NOT NULL,
                distance REAL,
                duration INTEGER,
                elevation_gain REAL
            );

            -- Checkpoints, stored independently of track points
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                track_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                elevation REAL,
                timestamp INTEGER NOT NULL,
                note TEXT,
                photo TEXT,
                visible INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_track
            ON checkpoints(track_id);

            -- Process-wide recording settings (single row, JSON)
            CREATE TABLE IF NOT EXISTS settings (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                data TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn decode_points(blob: &[u8]) -> Result<Vec<TrackPoint>> {
        Ok(rmp_serde::from_slice(blob)?)
    }
}

impl SessionStore for SqliteStore {
    fn read_active_session(&mut self) -> Result<Option<Track>> {
        let row = self
            .db
            .query_row(
                "SELECT track_id, name, description, start_time, points
                 FROM active_session WHERE slot = 0",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, description, start_time, blob)) = row else {
            return Ok(None);
        };

        Ok(Some(Track {
            id,
            name,
            description,
            start_time,
            end_time: None,
            points: Self::decode_points(&blob)?,
            is_recording: true,
            distance: None,
            duration: None,
            elevation_gain: None,
        }))
    }

    fn write_active_session(&mut self, track: &Track) -> Result<()> {
        let points = rmp_serde::to_vec(&track.points)?;
        self.db.execute(
            "INSERT OR REPLACE INTO active_session
             (slot, track_id, name, description, start_time, points, point_count)
             VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                track.id,
                track.name,
                track.description,
                track.start_time,
                points,
                track.points.len() as i64,
            ],
        )?;
        Ok(())
    }

    fn clear_active_session(&mut self) -> Result<()> {
        self.db
            .execute("DELETE FROM active_session WHERE slot = 0", [])?;
        Ok(())
    }

    fn append_to_archive(&mut self, track: &Track) -> Result<()> {
        let points = rmp_serde::to_vec(&track.points)?;
        self.db.execute(
            "INSERT OR REPLACE INTO tracks
             (id, name, description, start_time, end_time, points, point_count,
              distance, duration, elevation_gain)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                track.id,
                track.name,
                track.description,
                track.start_time,
                track.end_time,
                points,
                track.points.len() as i64,
                track.distance,
                track.duration,
                track.elevation_gain,
            ],
        )?;
        Ok(())
    }

    fn list_archive(&mut self) -> Result<Vec<Track>> {
        let mut stmt = self.db.prepare(
            "SELECT id, name, description, start_time, end_time, points,
                    distance, duration, elevation_gain
             FROM tracks ORDER BY start_time DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, Option<f64>>(8)?,
            ))
        })?;

        let mut tracks = Vec::new();
        for row in rows {
            let (id, name, description, start_time, end_time, blob, distance, duration, gain) =
                row?;
            tracks.push(Track {
                id,
                name,
                description,
                start_time,
                end_time,
                points: Self::decode_points(&blob)?,
                is_recording: false,
                distance,
                duration,
                elevation_gain: gain,
            });
        }
        Ok(tracks)
    }

    fn get_archived(&mut self, track_id: &str) -> Result<Option<Track>> {
        let row = self
            .db
            .query_row(
                "SELECT id, name, description, start_time, end_time, points,
                        distance, duration, elevation_gain
                 FROM tracks WHERE id = ?1",
                params![track_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                        row.get::<_, Option<f64>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, Option<f64>>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, description, start_time, end_time, blob, distance, duration, gain)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(Track {
            id,
            name,
            description,
            start_time,
            end_time,
            points: Self::decode_points(&blob)?,
            is_recording: false,
            distance,
            duration,
            elevation_gain: gain,
        }))
    }

    fn remove_from_archive(&mut self, track_id: &str) -> Result<()> {
        let deleted = self
            .db
            .execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        if deleted == 0 {
            return Err(RecorderError::NotFound {
                track_id: track_id.to_string(),
            });
        }
        self.db.execute(
            "DELETE FROM checkpoints WHERE track_id = ?1",
            params![track_id],
        )?;
        Ok(())
    }

    fn read_checkpoints(&mut self) -> Result<Vec<Checkpoint>> {
        let mut stmt = self.db.prepare(
            "SELECT id, track_id, latitude, longitude, elevation, timestamp,
                    note, photo, visible
             FROM checkpoints ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map([], checkpoint_from_row)?;
        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(row?);
        }
        Ok(checkpoints)
    }

    fn checkpoints_for_track(&mut self, track_id: &str) -> Result<Vec<Checkpoint>> {
        let mut stmt = self.db.prepare(
            "SELECT id, track_id, latitude, longitude, elevation, timestamp,
                    note, photo, visible
             FROM checkpoints WHERE track_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![track_id], checkpoint_from_row)?;
        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(row?);
        }
        Ok(checkpoints)
    }

    fn append_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO checkpoints
             (id, track_id, latitude, longitude, elevation, timestamp, note, photo, visible)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                checkpoint.id,
                checkpoint.track_id,
                checkpoint.latitude,
                checkpoint.longitude,
                checkpoint.elevation,
                checkpoint.timestamp,
                checkpoint.note,
                checkpoint.photo,
                checkpoint.visible,
            ],
        )?;
        Ok(())
    }

    fn read_settings(&mut self) -> Result<Option<RecordingSettings>> {
        let json = self
            .db
            .query_row("SELECT data FROM settings WHERE slot = 0", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write_settings(&mut self, settings: &RecordingSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.db.execute(
            "INSERT OR REPLACE INTO settings (slot, data) VALUES (0, ?1)",
            params![json],
        )?;
        Ok(())
    }
}

fn checkpoint_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get(0)?,
        track_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        elevation: row.get(4)?,
        timestamp: row.get(5)?,
        note: row.get(6)?,
        photo: row.get(7)?,
        visible: row.get(8)?,
    })
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory session store for tests and examples.
///
/// Writes can be made to fail on demand to exercise the engine's
/// persistence-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    active: Option<Track>,
    archive: Vec<Track>,
    checkpoints: Vec<Checkpoint>,
    settings: Option<RecordingSettings>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until reset.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// The current active-session snapshot, as a reader would see it.
    pub fn active_snapshot(&self) -> Option<&Track> {
        self.active.as_ref()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            Err(RecorderError::persistence("simulated write failure"))
        } else {
            Ok(())
        }
    }
}

impl SessionStore for MemoryStore {
    fn read_active_session(&mut self) -> Result<Option<Track>> {
        Ok(self.active.clone())
    }

    fn write_active_session(&mut self, track: &Track) -> Result<()> {
        self.check_writable()?;
        self.active = Some(track.clone());
        Ok(())
    }

    fn clear_active_session(&mut self) -> Result<()> {
        self.check_writable()?;
        self.active = None;
        Ok(())
    }

    fn append_to_archive(&mut self, track: &Track) -> Result<()> {
        self.check_writable()?;
        self.archive.retain(|t| t.id != track.id);
        self.archive.push(track.clone());
        Ok(())
    }

    fn list_archive(&mut self) -> Result<Vec<Track>> {
        let mut tracks = self.archive.clone();
        tracks.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(tracks)
    }

    fn get_archived(&mut self, track_id: &str) -> Result<Option<Track>> {
        Ok(self.archive.iter().find(|t| t.id == track_id).cloned())
    }

    fn remove_from_archive(&mut self, track_id: &str) -> Result<()> {
        self.check_writable()?;
        let before = self.archive.len();
        self.archive.retain(|t| t.id != track_id);
        if self.archive.len() == before {
            return Err(RecorderError::NotFound {
                track_id: track_id.to_string(),
            });
        }
        self.checkpoints.retain(|cp| cp.track_id != track_id);
        Ok(())
    }

    fn read_checkpoints(&mut self) -> Result<Vec<Checkpoint>> {
        Ok(self.checkpoints.clone())
    }

    fn checkpoints_for_track(&mut self, track_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .iter()
            .filter(|cp| cp.track_id == track_id)
            .cloned()
            .collect())
    }

    fn append_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.check_writable()?;
        self.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn read_settings(&mut self) -> Result<Option<RecordingSettings>> {
        Ok(self.settings.clone())
    }

    fn write_settings(&mut self, settings: &RecordingSettings) -> Result<()> {
        self.check_writable()?;
        self.settings = Some(settings.clone());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generate_id, RecordingMode};

    fn recording_track(start_time: i64) -> Track {
        let mut track = Track::new(generate_id("track"), "Morning loop", "", start_time);
        track.points.push(TrackPoint {
            elevation: Some(408.0),
            ..TrackPoint::new(47.3769, 8.5417, start_time)
        });
        track
    }

    fn finalized_track(start_time: i64) -> Track {
        let mut track = recording_track(start_time);
        track.is_recording = false;
        track.end_time = Some(start_time + 60_000);
        track.duration = Some(60_000);
        track.distance = Some(0.0);
        track
    }

    fn checkpoint_for(track_id: &str, timestamp: i64) -> Checkpoint {
        Checkpoint {
            id: generate_id("checkpoint"),
            track_id: track_id.to_string(),
            latitude: 47.38,
            longitude: 8.54,
            elevation: None,
            timestamp,
            note: Some("bridge".to_string()),
            photo: None,
            visible: true,
        }
    }

    #[test]
    fn test_sqlite_active_session_round_trip() {
        let mut store = SqliteStore::in_memory().expect("in-memory store");
        assert!(store.read_active_session().unwrap().is_none());

        let track = recording_track(1_700_000_000_000);
        store.write_active_session(&track).unwrap();

        let restored = store.read_active_session().unwrap().unwrap();
        assert_eq!(restored.id, track.id);
        assert_eq!(restored.points, track.points);
        assert!(restored.is_recording);
        assert!(restored.end_time.is_none());

        store.clear_active_session().unwrap();
        assert!(store.read_active_session().unwrap().is_none());
    }

    #[test]
    fn test_sqlite_active_session_rewrite_replaces() {
        let mut store = SqliteStore::in_memory().expect("in-memory store");
        let mut track = recording_track(1_700_000_000_000);
        store.write_active_session(&track).unwrap();

        track
            .points
            .push(TrackPoint::new(47.3780, 8.5430, 1_700_000_005_000));
        store.write_active_session(&track).unwrap();

        let restored = store.read_active_session().unwrap().unwrap();
        assert_eq!(restored.points.len(), 2);
    }

    #[test]
    fn test_sqlite_archive_ordering_and_lookup() {
        let mut store = SqliteStore::in_memory().expect("in-memory store");
        let older = finalized_track(1_700_000_000_000);
        let newer = finalized_track(1_700_100_000_000);
        store.append_to_archive(&older).unwrap();
        store.append_to_archive(&newer).unwrap();

        let archive = store.list_archive().unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive[0].id, newer.id);
        assert_eq!(archive[1].id, older.id);

        let fetched = store.get_archived(&older.id).unwrap().unwrap();
        assert_eq!(fetched.duration, Some(60_000));
        assert!(!fetched.is_recording);
        assert!(store.get_archived("missing").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_archive_upsert_is_idempotent() {
        let mut store = SqliteStore::in_memory().expect("in-memory store");
        let track = finalized_track(1_700_000_000_000);
        store.append_to_archive(&track).unwrap();
        store.append_to_archive(&track).unwrap();
        assert_eq!(store.list_archive().unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_remove_deletes_track_and_checkpoints() {
        let mut store = SqliteStore::in_memory().expect("in-memory store");
        let track = finalized_track(1_700_000_000_000);
        store.append_to_archive(&track).unwrap();
        store
            .append_checkpoint(&checkpoint_for(&track.id, 1_700_000_010_000))
            .unwrap();
        store
            .append_checkpoint(&checkpoint_for("other_track", 1_700_000_020_000))
            .unwrap();

        store.remove_from_archive(&track.id).unwrap();
        assert!(store.list_archive().unwrap().is_empty());
        assert!(store.checkpoints_for_track(&track.id).unwrap().is_empty());
        // Unrelated checkpoints survive
        assert_eq!(store.read_checkpoints().unwrap().len(), 1);

        let err = store.remove_from_archive(&track.id).unwrap_err();
        assert!(matches!(err, RecorderError::NotFound { .. }));
    }

    #[test]
    fn test_sqlite_checkpoints_per_track() {
        let mut store = SqliteStore::in_memory().expect("in-memory store");
        store
            .append_checkpoint(&checkpoint_for("track_a", 200))
            .unwrap();
        store
            .append_checkpoint(&checkpoint_for("track_a", 100))
            .unwrap();
        store
            .append_checkpoint(&checkpoint_for("track_b", 150))
            .unwrap();

        let for_a = store.checkpoints_for_track("track_a").unwrap();
        assert_eq!(for_a.len(), 2);
        // Oldest first
        assert_eq!(for_a[0].timestamp, 100);
        assert_eq!(for_a[1].timestamp, 200);
        assert_eq!(store.read_checkpoints().unwrap().len(), 3);
    }

    #[test]
    fn test_sqlite_settings_round_trip() {
        let mut store = SqliteStore::in_memory().expect("in-memory store");
        assert!(store.read_settings().unwrap().is_none());

        let settings = RecordingSettings {
            mode: RecordingMode::Manual,
            min_distance_meters: 50.0,
            min_time_seconds: 60,
            record_elevation: false,
        };
        store.write_settings(&settings).unwrap();
        assert_eq!(store.read_settings().unwrap().unwrap(), settings);

        let updated = RecordingSettings::default();
        store.write_settings(&updated).unwrap();
        assert_eq!(store.read_settings().unwrap().unwrap(), updated);
    }

    #[test]
    fn test_memory_store_write_failure_injection() {
        let mut store = MemoryStore::new();
        let track = recording_track(1_700_000_000_000);
        store.write_active_session(&track).unwrap();

        store.set_fail_writes(true);
        let err = store.write_active_session(&track).unwrap_err();
        assert!(matches!(err, RecorderError::Persistence { .. }));
        // Reads keep working, last durable state intact
        assert_eq!(store.read_active_session().unwrap().unwrap().id, track.id);

        store.set_fail_writes(false);
        store.clear_active_session().unwrap();
        assert!(store.read_active_session().unwrap().is_none());
    }
}
