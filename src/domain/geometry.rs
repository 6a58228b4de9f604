//! Geometry kernel: great-circle distance and point-in-polygon containment
//!
//! Pure functions over `GeoPoint` degrees. No I/O, no state.
//!
//! Boundary conventions:
//! - Checkpoints are inclusive: a point exactly `radius_m` from the center is inside.
//! - Polygon edges follow the half-open crossing rule of `point_in_polygon`. For
//!   axis-aligned edges this places points on the south and west edges inside and
//!   points on the north and east edges outside. The same rule applies to every
//!   ring, so a point on a hole's edge follows it too.

use crate::domain::types::{Checkpoint, GeoPoint, Sector};
use thiserror::Error;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Reasons a zone definition cannot be evaluated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("ring {ring} has {vertices} distinct vertices, need at least 3")]
    TooFewVertices { ring: usize, vertices: usize },

    #[error("polygon has no rings")]
    NoRings,

    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid radius: {0}")]
    InvalidRadius(f64),
}

/// Great-circle distance in meters (haversine, atan2 form)
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push h slightly outside [0, 1] for antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Even-odd ray casting over a single ring (x = lng, y = lat)
///
/// The ring need not repeat its first vertex. A point is counted when a ray
/// cast toward increasing longitude crosses an edge whose latitude span is
/// half-open `[min, max)`; no edge is special-cased.
pub fn point_in_polygon(point: GeoPoint, ring: &[GeoPoint]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }

    let (x, y) = (point.lng, point.lat);
    let mut inside = false;
    let mut j = n - 1;

    for i in 0..n {
        let (xi, yi) = (ring[i].lng, ring[i].lat);
        let (xj, yj) = (ring[j].lng, ring[j].lat);

        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

#[inline]
fn check_coordinate(lat: f64, lng: f64) -> Result<(), GeometryError> {
    let valid = lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng);
    if valid {
        Ok(())
    } else {
        Err(GeometryError::InvalidCoordinate { lat, lng })
    }
}

/// Validated circular zone geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl Circle {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, GeometryError> {
        check_coordinate(checkpoint.lat, checkpoint.lng)?;
        if !checkpoint.radius_m.is_finite() || checkpoint.radius_m < 0.0 {
            return Err(GeometryError::InvalidRadius(checkpoint.radius_m));
        }
        Ok(Self {
            center: GeoPoint::new(checkpoint.lat, checkpoint.lng),
            radius_m: checkpoint.radius_m,
        })
    }

    /// Returns (inside, distance_m). Inclusive at the radius.
    #[inline]
    pub fn contains(&self, point: GeoPoint) -> (bool, f64) {
        let distance = distance_meters(point, self.center);
        (distance <= self.radius_m, distance)
    }
}

/// Validated polygon: one outer ring and zero or more holes
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    outer: Vec<GeoPoint>,
    holes: Vec<Vec<GeoPoint>>,
}

impl Polygon {
    /// Build from `[lng, lat]` rings; ring 0 is the boundary, the rest are holes
    pub fn from_rings(rings: &[Vec<[f64; 2]>]) -> Result<Self, GeometryError> {
        let mut parsed = Vec::with_capacity(rings.len());
        for (idx, ring) in rings.iter().enumerate() {
            parsed.push(Self::parse_ring(idx, ring)?);
        }

        let mut parsed = parsed.into_iter();
        let outer = parsed.next().ok_or(GeometryError::NoRings)?;
        Ok(Self { outer, holes: parsed.collect() })
    }

    pub fn from_sector(sector: &Sector) -> Result<Self, GeometryError> {
        Self::from_rings(&sector.polygon)
    }

    fn parse_ring(idx: usize, ring: &[[f64; 2]]) -> Result<Vec<GeoPoint>, GeometryError> {
        let mut points = Vec::with_capacity(ring.len());
        for &pair in ring {
            check_coordinate(pair[1], pair[0])?;
            points.push(GeoPoint::from_lng_lat(pair));
        }

        // Explicitly closed rings carry a duplicate of the first vertex
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }

        if points.len() < 3 {
            return Err(GeometryError::TooFewVertices { ring: idx, vertices: points.len() });
        }
        Ok(points)
    }

    /// Inside the outer ring and not inside any hole
    pub fn contains(&self, point: GeoPoint) -> bool {
        point_in_polygon(point, &self.outer)
            && !self.holes.iter().any(|hole| point_in_polygon(point, hole))
    }

    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(26.90, -105.80),
            GeoPoint::new(26.90, -105.70),
            GeoPoint::new(26.80, -105.70),
            GeoPoint::new(26.80, -105.80),
        ]
    }

    #[test]
    fn test_distance_identity() {
        let p = GeoPoint::new(26.9, -105.8);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        // One degree of latitude along a meridian
        let d = distance_meters(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        let expected = EARTH_RADIUS_M * 1.0_f64.to_radians();
        assert!((d - expected).abs() < 1e-6, "got {d}, expected {expected}");
    }

    #[test]
    fn test_distance_antipodal_is_half_circumference() {
        let d = distance_meters(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 180.0));
        let half = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!(d.is_finite());
        assert!((d - half).abs() < 1e-3);

        let poles = distance_meters(GeoPoint::new(90.0, 0.0), GeoPoint::new(-90.0, 0.0));
        assert!((poles - half).abs() < 1e-3);
    }

    #[test]
    fn test_distance_near_identical_points() {
        let a = GeoPoint::new(26.9, -105.8);
        let b = GeoPoint::new(26.9 + 1e-9, -105.8);
        let d = distance_meters(a, b);
        assert!(d.is_finite());
        assert!(d > 0.0 && d < 0.001);
    }

    #[test]
    fn test_square_sector_containment() {
        let ring = square();
        assert!(point_in_polygon(GeoPoint::new(26.85, -105.75), &ring));
        assert!(!point_in_polygon(GeoPoint::new(26.85, -105.65), &ring));
    }

    #[test]
    fn test_edge_rule_is_half_open() {
        let ring = square();
        // West and south edges are inside
        assert!(point_in_polygon(GeoPoint::new(26.85, -105.80), &ring));
        assert!(point_in_polygon(GeoPoint::new(26.80, -105.75), &ring));
        // East and north edges are outside
        assert!(!point_in_polygon(GeoPoint::new(26.85, -105.70), &ring));
        assert!(!point_in_polygon(GeoPoint::new(26.90, -105.75), &ring));
    }

    #[test]
    fn test_closed_ring_same_as_open_ring() {
        let open = square();
        let mut closed = open.clone();
        closed.push(open[0]);
        for p in [GeoPoint::new(26.85, -105.75), GeoPoint::new(26.95, -105.75)] {
            assert_eq!(point_in_polygon(p, &open), point_in_polygon(p, &closed));
        }
    }

    #[test]
    fn test_degenerate_ring_contains_nothing() {
        let ring = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_polygon(GeoPoint::new(0.5, 0.5), &ring));
    }

    #[test]
    fn test_polygon_with_hole() {
        let outer = vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        let hole = vec![[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]];
        let polygon = Polygon::from_rings(&[outer, hole]).unwrap();

        assert_eq!(polygon.hole_count(), 1);
        assert!(polygon.contains(GeoPoint::new(2.0, 2.0)));
        assert!(!polygon.contains(GeoPoint::new(5.0, 5.0)));
        assert!(!polygon.contains(GeoPoint::new(11.0, 5.0)));
    }

    #[test]
    fn test_polygon_rejects_malformed_rings() {
        assert_eq!(Polygon::from_rings(&[]), Err(GeometryError::NoRings));

        let closed_triangle_missing_vertex = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]];
        assert!(matches!(
            Polygon::from_rings(&[closed_triangle_missing_vertex]),
            Err(GeometryError::TooFewVertices { ring: 0, vertices: 2 })
        ));

        let out_of_range = vec![[0.0, 0.0], [1.0, 95.0], [1.0, 1.0]];
        assert!(matches!(
            Polygon::from_rings(&[out_of_range]),
            Err(GeometryError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_circle_boundary_inclusive() {
        let cp = Checkpoint::new("cp1", "Gate", 26.9, -105.8, 100.0);
        let circle = Circle::from_checkpoint(&cp).unwrap();
        let edge = GeoPoint::new(26.9 + 0.0005, -105.8);
        let exact = distance_meters(edge, circle.center);

        let at_radius = Circle { radius_m: exact, ..circle };
        assert!(at_radius.contains(edge).0);
        let just_inside = Circle { radius_m: exact - 1e-6, ..circle };
        assert!(!just_inside.contains(edge).0);
    }

    #[test]
    fn test_circle_rejects_bad_radius() {
        let mut cp = Checkpoint::new("cp1", "Gate", 26.9, -105.8, -1.0);
        assert_eq!(Circle::from_checkpoint(&cp), Err(GeometryError::InvalidRadius(-1.0)));
        cp.radius_m = f64::INFINITY;
        assert!(Circle::from_checkpoint(&cp).is_err());
    }

    proptest! {
        #[test]
        fn prop_distance_symmetric(
            lat1 in -90.0f64..=90.0, lng1 in -180.0f64..=180.0,
            lat2 in -90.0f64..=90.0, lng2 in -180.0f64..=180.0,
        ) {
            let a = GeoPoint::new(lat1, lng1);
            let b = GeoPoint::new(lat2, lng2);
            let ab = distance_meters(a, b);
            let ba = distance_meters(b, a);
            prop_assert!(ab.is_finite());
            prop_assert!((ab - ba).abs() < 1e-6, "ab={} ba={}", ab, ba);
        }

        #[test]
        fn prop_distance_identity(lat in -90.0f64..=90.0, lng in -180.0f64..=180.0) {
            let p = GeoPoint::new(lat, lng);
            prop_assert_eq!(distance_meters(p, p), 0.0);
        }

        #[test]
        fn prop_containment_deterministic(lat in 26.7f64..27.0, lng in -105.9f64..-105.6) {
            let ring = square();
            let p = GeoPoint::new(lat, lng);
            prop_assert_eq!(point_in_polygon(p, &ring), point_in_polygon(p, &ring));
        }
    }
}
