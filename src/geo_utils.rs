//! Geodesic calculations over recorded points.
//!
//! Pure functions, no side effects:
//! - Great-circle distance between two points (haversine)
//! - Cumulative distance along a point sequence
//! - Cumulative positive elevation gain

use crate::TrackPoint;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points using the haversine
/// formula.
///
/// Deterministic and symmetric; `haversine_distance(a, a) == 0`.
pub fn haversine_distance(a: &TrackPoint, b: &TrackPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Total distance in meters along a point sequence.
///
/// Sum of consecutive-pair distances; 0 for fewer than two points.
pub fn cumulative_distance(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

/// Cumulative positive elevation gain in meters over a point sequence.
///
/// Only ascents count: descents contribute nothing. A sample without an
/// elevation reading is treated as 0 m for that pair rather than being
/// dropped, which can miscount gain around sensor gaps; callers that care
/// should filter before calling.
pub fn elevation_gain(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| {
            let prev = pair[0].elevation.unwrap_or(0.0);
            let next = pair[1].elevation.unwrap_or(0.0);
            (next - prev).max(0.0)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> TrackPoint {
        TrackPoint::new(lat, lng, 0)
    }

    fn point_at_elevation(elevation: Option<f64>) -> TrackPoint {
        TrackPoint {
            elevation,
            ..TrackPoint::new(47.0, 8.0, 0)
        }
    }

    #[test]
    fn test_distance_identity() {
        let a = point(51.5074, -0.1278);
        assert_eq!(haversine_distance(&a, &a), 0.0);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = point(51.5074, -0.1278);
        let b = point(48.8566, 2.3522);
        let ab = haversine_distance(&a, &b);
        let ba = haversine_distance(&b, &a);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        let d = haversine_distance(&point(0.0, 0.0), &point(0.0, 1.0));
        // ~111.32 km, within 1%
        assert!((d - 111_320.0).abs() < 111_320.0 * 0.01, "got {}", d);
    }

    #[test]
    fn test_cumulative_distance_trivial_cases() {
        assert_eq!(cumulative_distance(&[]), 0.0);
        assert_eq!(cumulative_distance(&[point(47.0, 8.0)]), 0.0);
    }

    #[test]
    fn test_cumulative_distance_monotone_under_append() {
        let track: Vec<TrackPoint> = (0..10)
            .map(|i| point(47.0 + i as f64 * 0.001, 8.0))
            .collect();

        let mut previous = 0.0;
        for n in 1..=track.len() {
            let d = cumulative_distance(&track[..n]);
            assert!(d >= previous);
            previous = d;
        }
    }

    #[test]
    fn test_elevation_gain_ascent_only() {
        let ascent: Vec<TrackPoint> = [0.0, 10.0, 20.0]
            .iter()
            .map(|e| point_at_elevation(Some(*e)))
            .collect();
        assert_eq!(elevation_gain(&ascent), 20.0);

        let dip: Vec<TrackPoint> = [10.0, 0.0, 10.0]
            .iter()
            .map(|e| point_at_elevation(Some(*e)))
            .collect();
        assert_eq!(elevation_gain(&dip), 10.0);
    }

    #[test]
    fn test_elevation_gain_missing_reading_counts_as_zero() {
        let points = vec![
            point_at_elevation(Some(5.0)),
            point_at_elevation(None),
            point_at_elevation(Some(3.0)),
        ];
        // 5 -> 0 contributes nothing, 0 -> 3 contributes 3
        assert_eq!(elevation_gain(&points), 3.0);
    }

    #[test]
    fn test_elevation_gain_too_few_points() {
        assert_eq!(elevation_gain(&[]), 0.0);
        assert_eq!(elevation_gain(&[point_at_elevation(Some(100.0))]), 0.0);
    }
}
