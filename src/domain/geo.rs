//! Spherical distance and point-in-polygon primitives
//!
//! Polygon tests run on a local equirectangular projection centered at the
//! sample, which is accurate to well under a meter at geofence scales
//! (hundreds of meters) and keeps the ray cast in plain planar math.

use crate::domain::types::LatLng;

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates (haversine)
pub fn haversine_m(a: LatLng, b: LatLng) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Project `p` onto a tangent plane centered at `origin`.
/// Returns (east_m, north_m).
fn project_local(origin: LatLng, p: LatLng) -> (f64, f64) {
    let east = (p.lon - origin.lon).to_radians() * origin.lat.to_radians().cos() * EARTH_RADIUS_M;
    let north = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (east, north)
}

/// Ray-casting point-in-polygon test.
///
/// The ring is implicitly closed; points exactly on an edge may land on
/// either side, which is why callers pair this with a boundary-distance
/// margin check.
pub fn point_in_ring(point: LatLng, ring: &[LatLng]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    // Cast a ray along +x from the origin (the projected point).
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = project_local(point, ring[i]);
        let (xj, yj) = project_local(point, ring[j]);

        let crosses = (yi > 0.0) != (yj > 0.0);
        if crosses {
            let x_at_zero = xi + (0.0 - yi) / (yj - yi) * (xj - xi);
            if x_at_zero > 0.0 {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Minimum distance in meters from `point` to the polygon boundary.
pub fn distance_to_ring_m(point: LatLng, ring: &[LatLng]) -> f64 {
    if ring.is_empty() {
        return f64::INFINITY;
    }

    let mut min_d = f64::INFINITY;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = project_local(point, ring[j]);
        let b = project_local(point, ring[i]);
        let d = point_segment_distance((0.0, 0.0), a, b);
        if d < min_d {
            min_d = d;
        }
        j = i;
    }
    min_d
}

/// Distance from point `p` to segment `ab` in the projected plane
fn point_segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (px, py) = p;
    let (ax, ay) = a;
    let (bx, by) = b;

    let abx = bx - ax;
    let aby = by - ay;
    let len_sq = abx * abx + aby * aby;

    let t = if len_sq <= f64::EPSILON {
        0.0
    } else {
        (((px - ax) * abx + (py - ay) * aby) / len_sq).clamp(0.0, 1.0)
    };

    let cx = ax + t * abx;
    let cy = ay + t * aby;
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero() {
        let p = LatLng::new(64.128, -21.9);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_longitude_at_equator() {
        let a = LatLng::new(0.0, 0.0);
        let b = LatLng::new(0.0, 1.0);
        let d = haversine_m(a, b);
        // One degree of longitude at the equator is ~111.2 km
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn test_haversine_short_distance() {
        // ~200m north of origin: 200 / 111_195 degrees of latitude
        let a = LatLng::new(0.0, 0.0);
        let b = LatLng::new(200.0 / 111_195.0, 0.0);
        let d = haversine_m(a, b);
        assert!((d - 200.0).abs() < 0.5, "got {d}");
    }

    fn unit_square() -> Vec<LatLng> {
        // ~1.1km square around the origin
        vec![
            LatLng::new(-0.005, -0.005),
            LatLng::new(-0.005, 0.005),
            LatLng::new(0.005, 0.005),
            LatLng::new(0.005, -0.005),
        ]
    }

    #[test]
    fn test_point_in_ring_center() {
        assert!(point_in_ring(LatLng::new(0.0, 0.0), &unit_square()));
    }

    #[test]
    fn test_point_in_ring_outside() {
        assert!(!point_in_ring(LatLng::new(0.02, 0.0), &unit_square()));
        assert!(!point_in_ring(LatLng::new(0.0, -0.02), &unit_square()));
    }

    #[test]
    fn test_point_in_ring_degenerate() {
        let two = [LatLng::new(0.0, 0.0), LatLng::new(0.0, 1.0)];
        assert!(!point_in_ring(LatLng::new(0.0, 0.5), &two));
    }

    #[test]
    fn test_distance_to_ring_from_center() {
        // Center of the square is ~556m from each edge (0.005 deg of latitude)
        let d = distance_to_ring_m(LatLng::new(0.0, 0.0), &unit_square());
        assert!((d - 556.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_distance_to_ring_outside_point() {
        // 0.01 deg north of the north edge: ~556m away
        let d = distance_to_ring_m(LatLng::new(0.01, 0.0), &unit_square());
        assert!((d - 556.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_point_segment_distance_projection_clamp() {
        // Point beyond segment end clamps to the endpoint
        let d = point_segment_distance((2.0, 1.0), (0.0, 0.0), (1.0, 0.0));
        assert!((d - 2f64.sqrt()).abs() < 1e-9);
    }
}
