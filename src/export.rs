//! Export encoders for finalized tracks.
//!
//! Pure, stateless formatting over an already-finalized [`Track`]: GPX 1.1
//! (checkpoints as waypoints), KML and CSV. Tracks that are still recording
//! are refused; the point stream only becomes immutable on stop.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{RecorderError, Result};
use crate::{Checkpoint, Track};

/// Render a finalized track (and its checkpoints) as a GPX 1.1 document.
///
/// Checkpoints become `<wpt>` entries, track points become `<trkpt>` entries
/// in a single segment. Checkpoints not belonging to the track are skipped.
pub fn to_gpx(track: &Track, checkpoints: &[Checkpoint]) -> Result<String> {
    ensure_finalized(track)?;

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<gpx version=\"1.1\" creator=\"track-recorder\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
    );

    out.push_str("  <metadata>\n");
    out.push_str(&format!("    <name>{}</name>\n", xml_escape(&track.name)));
    if !track.description.is_empty() {
        out.push_str(&format!(
            "    <desc>{}</desc>\n",
            xml_escape(&track.description)
        ));
    }
    out.push_str(&format!("    <time>{}</time>\n", iso8601(track.start_time)));
    out.push_str("  </metadata>\n");

    for cp in checkpoints.iter().filter(|cp| cp.track_id == track.id) {
        out.push_str(&format!(
            "  <wpt lat=\"{}\" lon=\"{}\">\n",
            cp.latitude, cp.longitude
        ));
        if let Some(elevation) = cp.elevation {
            out.push_str(&format!("    <ele>{}</ele>\n", elevation));
        }
        out.push_str(&format!("    <time>{}</time>\n", iso8601(cp.timestamp)));
        if let Some(note) = &cp.note {
            out.push_str(&format!("    <name>{}</name>\n", xml_escape(note)));
        }
        out.push_str("  </wpt>\n");
    }

    out.push_str("  <trk>\n");
    out.push_str(&format!("    <name>{}</name>\n", xml_escape(&track.name)));
    out.push_str("    <trkseg>\n");
    for point in &track.points {
        out.push_str(&format!(
            "      <trkpt lat=\"{}\" lon=\"{}\">\n",
            point.latitude, point.longitude
        ));
        if let Some(elevation) = point.elevation {
            out.push_str(&format!("        <ele>{}</ele>\n", elevation));
        }
        out.push_str(&format!(
            "        <time>{}</time>\n",
            iso8601(point.timestamp)
        ));
        out.push_str("      </trkpt>\n");
    }
    out.push_str("    </trkseg>\n");
    out.push_str("  </trk>\n");
    out.push_str("</gpx>\n");
    Ok(out)
}

/// Render a finalized track as a KML document with a single line string.
pub fn to_kml(track: &Track) -> Result<String> {
    ensure_finalized(track)?;

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n");
    out.push_str("  <Document>\n");
    out.push_str(&format!("    <name>{}</name>\n", xml_escape(&track.name)));
    if !track.description.is_empty() {
        out.push_str(&format!(
            "    <description>{}</description>\n",
            xml_escape(&track.description)
        ));
    }
    out.push_str("    <Placemark>\n");
    out.push_str(&format!(
        "      <name>{}</name>\n",
        xml_escape(&track.name)
    ));
    out.push_str("      <LineString>\n");
    out.push_str("        <tessellate>1</tessellate>\n");
    out.push_str("        <coordinates>\n");
    for point in &track.points {
        // KML coordinate order is lon,lat[,ele]
        match point.elevation {
            Some(elevation) => out.push_str(&format!(
                "          {},{},{}\n",
                point.longitude, point.latitude, elevation
            )),
            None => out.push_str(&format!(
                "          {},{}\n",
                point.longitude, point.latitude
            )),
        }
    }
    out.push_str("        </coordinates>\n");
    out.push_str("      </LineString>\n");
    out.push_str("    </Placemark>\n");
    out.push_str("  </Document>\n");
    out.push_str("</kml>\n");
    Ok(out)
}

/// Render a finalized track's points as CSV.
///
/// Columns: latitude, longitude, elevation (empty when missing), ISO 8601
/// time, comment.
pub fn to_csv(track: &Track) -> Result<String> {
    ensure_finalized(track)?;

    let mut out = String::from("latitude,longitude,elevation,time,comment\n");
    for point in &track.points {
        let elevation = point
            .elevation
            .map(|e| e.to_string())
            .unwrap_or_default();
        let comment = point
            .comment
            .as_deref()
            .map(csv_escape)
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            point.latitude,
            point.longitude,
            elevation,
            iso8601(point.timestamp),
            comment
        ));
    }
    Ok(out)
}

fn ensure_finalized(track: &Track) -> Result<()> {
    if track.is_recording {
        return Err(RecorderError::TrackStillRecording {
            track_id: track.id.clone(),
        });
    }
    Ok(())
}

fn iso8601(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(time) => time.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => String::new(),
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generate_id, TrackPoint};

    fn finalized_track() -> Track {
        let mut track = Track::new(
            generate_id("track"),
            "Lunch & Loop",
            "short <test> run",
            1_700_000_000_000,
        );
        track.points.push(TrackPoint {
            elevation: Some(408.0),
            ..TrackPoint::new(47.3769, 8.5417, 1_700_000_000_000)
        });
        track.points.push(TrackPoint {
            comment: Some("bench, lakeside".to_string()),
            ..TrackPoint::new(47.3780, 8.5430, 1_700_000_005_000)
        });
        track.is_recording = false;
        track.end_time = Some(1_700_000_060_000);
        track.duration = Some(60_000);
        track.distance = Some(150.0);
        track
    }

    fn checkpoint_for(track: &Track) -> Checkpoint {
        Checkpoint {
            id: generate_id("checkpoint"),
            track_id: track.id.clone(),
            latitude: 47.3775,
            longitude: 8.5420,
            elevation: Some(410.0),
            timestamp: 1_700_000_002_000,
            note: Some("viewpoint".to_string()),
            photo: None,
            visible: true,
        }
    }

    #[test]
    fn test_exports_refuse_recording_track() {
        let mut track = finalized_track();
        track.is_recording = true;

        assert!(matches!(
            to_gpx(&track, &[]).unwrap_err(),
            RecorderError::TrackStillRecording { .. }
        ));
        assert!(to_kml(&track).is_err());
        assert!(to_csv(&track).is_err());
    }

    #[test]
    fn test_gpx_structure() {
        let track = finalized_track();
        let cp = checkpoint_for(&track);
        let gpx = to_gpx(&track, &[cp]).unwrap();

        assert!(gpx.starts_with("<?xml"));
        assert!(gpx.contains("version=\"1.1\""));
        assert_eq!(gpx.matches("<trkpt").count(), 2);
        assert_eq!(gpx.matches("<wpt").count(), 1);
        assert!(gpx.contains("<name>viewpoint</name>"));
        assert!(gpx.contains("<ele>408</ele>"));
        assert!(gpx.contains("2023-11-14T22:13:20+00:00") || gpx.contains("2023-11-14T22:13:20Z"));
        // Escaped metadata
        assert!(gpx.contains("Lunch &amp; Loop"));
        assert!(gpx.contains("short &lt;test&gt; run"));
    }

    #[test]
    fn test_gpx_skips_foreign_checkpoints() {
        let track = finalized_track();
        let mut foreign = checkpoint_for(&track);
        foreign.track_id = "some_other_track".to_string();

        let gpx = to_gpx(&track, &[foreign]).unwrap();
        assert_eq!(gpx.matches("<wpt").count(), 0);
    }

    #[test]
    fn test_kml_coordinates_are_lon_lat() {
        let track = finalized_track();
        let kml = to_kml(&track).unwrap();
        assert!(kml.contains("8.5417,47.3769,408"));
        // Second point has no elevation
        assert!(kml.contains("8.543,47.378\n"));
    }

    #[test]
    fn test_csv_rows_and_quoting() {
        let track = finalized_track();
        let csv = to_csv(&track).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "latitude,longitude,elevation,time,comment");
        assert!(lines[1].starts_with("47.3769,8.5417,408,"));
        // Comma-bearing comment is quoted
        assert!(lines[2].ends_with("\"bench, lakeside\""));
        // Missing elevation leaves the column empty
        assert!(lines[2].contains(",,") || lines[2].split(',').nth(2) == Some(""));
    }
}
