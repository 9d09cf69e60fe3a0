// 📐 Geometry - Closed union over the shapes the registry publishes
//
// Planar math runs in the geometry's native coordinate units (lon/lat
// degrees for this feed). Distances that leave this module for humans
// (tolerances, zoom) go through the great-circle arc distance instead.

use crate::error::RecordError;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Mean radius of the Earth in kilometers
pub const EARTH_MEAN_RADIUS_KM: f64 = 6371.0;

/// Absolute slack when deciding whether a point sits on a segment
const BOUNDARY_EPSILON: f64 = 1e-12;

// ============================================================================
// COORDINATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    /// Longitude (or easting)
    pub x: f64,
    /// Latitude (or northing)
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Coord { x, y }
    }

    /// Planar euclidean distance in native units
    pub fn distance(&self, other: &Coord) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Great-circle distance in kilometers, treating x/y as lon/lat degrees
    pub fn arc_distance_km(&self, other: &Coord) -> f64 {
        arc_distance_km(self.y, self.x, other.y, other.x)
    }
}

/// Great-circle distance using the spherical law of cosines.
///
/// The longitude delta is taken as an absolute value so that
/// `arc_distance_km(a, b) == arc_distance_km(b, a)` holds bit for bit.
pub fn arc_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).abs().to_radians();

    let cosine = phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * delta_lambda.cos();

    // Rounding can push identical points just past 1.0
    EARTH_MEAN_RADIUS_KM * cosine.clamp(-1.0, 1.0).acos()
}

// ============================================================================
// POLYGON
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    pub interiors: Vec<Vec<Coord>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>, interiors: Vec<Vec<Coord>>) -> Self {
        Polygon { exterior, interiors }
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Coord>> {
        std::iter::once(&self.exterior).chain(self.interiors.iter())
    }

    /// Unsigned area (holes subtracted) and area-weighted centroid
    fn area_and_centroid(&self) -> Option<(f64, Coord)> {
        let (exterior_area, exterior_centroid) = ring_area_centroid(&self.exterior)?;

        let mut area = exterior_area;
        let mut moment_x = exterior_area * exterior_centroid.x;
        let mut moment_y = exterior_area * exterior_centroid.y;

        for hole in &self.interiors {
            if let Some((hole_area, hole_centroid)) = ring_area_centroid(hole) {
                area -= hole_area;
                moment_x -= hole_area * hole_centroid.x;
                moment_y -= hole_area * hole_centroid.y;
            }
        }

        if area <= 0.0 {
            return None;
        }
        Some((area, Coord::new(moment_x / area, moment_y / area)))
    }

    /// Inside, or on any ring
    pub fn contains_or_touches(&self, point: &Coord) -> bool {
        if self.rings().any(|ring| ring_touches(ring, point)) {
            return true;
        }
        ring_contains(&self.exterior, point)
            && !self.interiors.iter().any(|hole| ring_contains(hole, point))
    }
}

/// Shoelace area and centroid of one ring. Computed relative to the first
/// vertex to keep precision with large coordinates.
fn ring_area_centroid(ring: &[Coord]) -> Option<(f64, Coord)> {
    let origin = *ring.first()?;
    let n = ring.len();

    let mut twice_area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let (ax, ay) = (a.x - origin.x, a.y - origin.y);
        let (bx, by) = (b.x - origin.x, b.y - origin.y);
        let cross = ax * by - bx * ay;
        twice_area += cross;
        cx += (ax + bx) * cross;
        cy += (ay + by) * cross;
    }

    if twice_area == 0.0 || !twice_area.is_finite() {
        return None;
    }
    let centroid = Coord::new(
        origin.x + cx / (3.0 * twice_area),
        origin.y + cy / (3.0 * twice_area),
    );
    Some(((twice_area / 2.0).abs(), centroid))
}

/// Even-odd ray casting
fn ring_contains(ring: &[Coord], point: &Coord) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn ring_touches(ring: &[Coord], point: &Coord) -> bool {
    let n = ring.len();
    (0..n).any(|i| on_segment(&ring[i], &ring[(i + 1) % n], point))
}

fn on_segment(a: &Coord, b: &Coord, p: &Coord) -> bool {
    if a == p || b == p {
        return true;
    }
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > BOUNDARY_EPSILON * a.distance(b).max(1.0) {
        return false;
    }
    p.x >= a.x.min(b.x) - BOUNDARY_EPSILON
        && p.x <= a.x.max(b.x) + BOUNDARY_EPSILON
        && p.y >= a.y.min(b.y) - BOUNDARY_EPSILON
        && p.y <= a.y.max(b.y) + BOUNDARY_EPSILON
}

// ============================================================================
// ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min: Coord,
    pub max: Coord,
}

impl Envelope {
    /// Corner to corner great-circle distance in kilometers
    pub fn diagonal_km(&self) -> f64 {
        self.min.arc_distance_km(&self.max)
    }
}

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedKind {
    LineString,
    MultiLineString,
    GeometryCollection,
}

impl UnsupportedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsupportedKind::LineString => "LineString",
            UnsupportedKind::MultiLineString => "MultiLineString",
            UnsupportedKind::GeometryCollection => "GeometryCollection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
    /// Parsed far enough to know we don't handle it
    Unsupported(UnsupportedKind),
}

impl Geometry {
    /// Parse a GeoJSON geometry object
    pub fn from_geojson(json: &Json) -> Result<Geometry, RecordError> {
        let kind = json
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| RecordError::InvalidGeometry("missing geometry type".to_string()))?;

        let coordinates = || {
            json.get("coordinates")
                .ok_or_else(|| RecordError::InvalidGeometry(format!("{} without coordinates", kind)))
        };

        match kind {
            "Point" => Ok(Geometry::Point(parse_position(coordinates()?)?)),
            "MultiPoint" => Ok(Geometry::MultiPoint(parse_positions(coordinates()?)?)),
            "Polygon" => Ok(Geometry::Polygon(parse_polygon(coordinates()?)?)),
            "MultiPolygon" => {
                let polygons = as_array(coordinates()?)?
                    .iter()
                    .map(parse_polygon)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Geometry::MultiPolygon(polygons))
            }
            "LineString" => Ok(Geometry::Unsupported(UnsupportedKind::LineString)),
            "MultiLineString" => Ok(Geometry::Unsupported(UnsupportedKind::MultiLineString)),
            "GeometryCollection" => Ok(Geometry::Unsupported(UnsupportedKind::GeometryCollection)),
            other => Err(RecordError::InvalidGeometry(format!("unknown geometry type '{}'", other))),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::Unsupported(kind) => kind.as_str(),
        }
    }

    /// Every vertex, rings included, in declaration order
    pub fn vertices(&self) -> Vec<Coord> {
        match self {
            Geometry::Point(c) => vec![*c],
            Geometry::MultiPoint(points) => points.clone(),
            Geometry::Polygon(p) => p.rings().flatten().copied().collect(),
            Geometry::MultiPolygon(ps) => ps.iter().flat_map(|p| p.rings().flatten().copied()).collect(),
            Geometry::Unsupported(_) => Vec::new(),
        }
    }

    /// Area-weighted centroid for polygons, mean position for points.
    /// Degenerate (zero-area) polygons fall back to the vertex mean.
    pub fn centroid(&self) -> Option<Coord> {
        match self {
            Geometry::Point(c) => Some(*c),
            Geometry::MultiPoint(points) => mean(points),
            Geometry::Polygon(p) => p
                .area_and_centroid()
                .map(|(_, c)| c)
                .or_else(|| mean(&self.vertices())),
            Geometry::MultiPolygon(ps) => {
                let mut area = 0.0;
                let mut moment = Coord::new(0.0, 0.0);
                for (a, c) in ps.iter().filter_map(Polygon::area_and_centroid) {
                    area += a;
                    moment.x += a * c.x;
                    moment.y += a * c.y;
                }
                if area > 0.0 {
                    Some(Coord::new(moment.x / area, moment.y / area))
                } else {
                    mean(&self.vertices())
                }
            }
            Geometry::Unsupported(_) => None,
        }
    }

    /// Inside or on the boundary
    pub fn contains_or_touches(&self, point: &Coord) -> bool {
        match self {
            Geometry::Point(c) => c == point,
            Geometry::MultiPoint(points) => points.contains(point),
            Geometry::Polygon(p) => p.contains_or_touches(point),
            Geometry::MultiPolygon(ps) => ps.iter().any(|p| p.contains_or_touches(point)),
            Geometry::Unsupported(_) => false,
        }
    }

    pub fn envelope(&self) -> Option<Envelope> {
        let vertices = self.vertices();
        let first = *vertices.first()?;
        let mut env = Envelope { min: first, max: first };
        for v in &vertices[1..] {
            env.min.x = env.min.x.min(v.x);
            env.min.y = env.min.y.min(v.y);
            env.max.x = env.max.x.max(v.x);
            env.max.y = env.max.y.max(v.y);
        }
        Some(env)
    }
}

fn mean(points: &[Coord]) -> Option<Coord> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
    Some(Coord::new(sx / n, sy / n))
}

// ============================================================================
// GEOJSON COORDINATE PARSING
// ============================================================================

fn as_array(json: &Json) -> Result<&Vec<Json>, RecordError> {
    json.as_array()
        .ok_or_else(|| RecordError::InvalidGeometry(format!("expected array, found {}", json)))
}

fn parse_position(json: &Json) -> Result<Coord, RecordError> {
    let position = as_array(json)?;
    match (
        position.first().and_then(Json::as_f64),
        position.get(1).and_then(Json::as_f64),
    ) {
        (Some(x), Some(y)) => Ok(Coord::new(x, y)),
        _ => Err(RecordError::InvalidGeometry(format!("invalid position {}", json))),
    }
}

fn parse_positions(json: &Json) -> Result<Vec<Coord>, RecordError> {
    as_array(json)?.iter().map(parse_position).collect()
}

fn parse_polygon(json: &Json) -> Result<Polygon, RecordError> {
    let mut rings = as_array(json)?
        .iter()
        .map(parse_positions)
        .collect::<Result<Vec<_>, _>>()?;
    if rings.is_empty() {
        return Err(RecordError::InvalidGeometry("polygon without rings".to_string()));
    }
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(x0: f64, y0: f64, side: f64) -> Vec<Coord> {
        vec![
            Coord::new(x0, y0),
            Coord::new(x0 + side, y0),
            Coord::new(x0 + side, y0 + side),
            Coord::new(x0, y0 + side),
            Coord::new(x0, y0),
        ]
    }

    #[test]
    fn test_square_centroid() {
        let geometry = Geometry::Polygon(Polygon::new(square(0.0, 0.0, 2.0), vec![]));
        let c = geometry.centroid().unwrap();
        assert!((c.x - 1.0).abs() < 1e-12);
        assert!((c.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_hole_shifts_centroid() {
        // 4x4 square with a 2x2 hole in the right half
        let geometry = Geometry::Polygon(Polygon::new(
            square(0.0, 0.0, 4.0),
            vec![square(2.0, 1.0, 2.0)],
        ));
        let c = geometry.centroid().unwrap();
        // (16*2 - 4*3) / 12
        assert!((c.x - 20.0 / 12.0).abs() < 1e-12);
        assert!((c.y - 2.0).abs() < 1e-12);
        assert!(!geometry.contains_or_touches(&Coord::new(3.0, 2.0)));
        assert!(geometry.contains_or_touches(&Coord::new(2.0, 2.0)));
    }

    #[test]
    fn test_contains_or_touches() {
        let polygon = Polygon::new(square(0.0, 0.0, 1.0), vec![]);
        assert!(polygon.contains_or_touches(&Coord::new(0.5, 0.5)));
        assert!(polygon.contains_or_touches(&Coord::new(1.0, 0.5)));
        assert!(polygon.contains_or_touches(&Coord::new(0.0, 0.0)));
        assert!(!polygon.contains_or_touches(&Coord::new(1.5, 0.5)));
    }

    #[test]
    fn test_envelope_and_vertices() {
        let geometry = Geometry::MultiPolygon(vec![
            Polygon::new(square(0.0, 0.0, 1.0), vec![]),
            Polygon::new(square(5.0, 5.0, 1.0), vec![]),
        ]);
        assert_eq!(geometry.vertices().len(), 10);
        let env = geometry.envelope().unwrap();
        assert_eq!(env.min, Coord::new(0.0, 0.0));
        assert_eq!(env.max, Coord::new(6.0, 6.0));
    }

    #[test]
    fn test_arc_distance_is_symmetric() {
        let a = Coord::new(18.0686, 59.3293);
        let b = Coord::new(11.9746, 57.7089);
        assert_eq!(a.arc_distance_km(&b), b.arc_distance_km(&a));
        // Stockholm - Gothenburg is roughly 400 km
        let d = a.arc_distance_km(&b);
        assert!(d > 380.0 && d < 410.0, "distance {}", d);
    }

    #[test]
    fn test_arc_distance_same_point_is_below_a_meter() {
        let a = Coord::new(15.123456, 60.654321);
        let d = a.arc_distance_km(&a);
        assert!(d.is_finite());
        assert!(d < 0.001, "distance {}", d);
    }

    #[test]
    fn test_parse_geojson_kinds() {
        let point = Geometry::from_geojson(&json!({"type": "Point", "coordinates": [15.0, 60.0, 12.0]})).unwrap();
        assert_eq!(point, Geometry::Point(Coord::new(15.0, 60.0)));

        let polygon = Geometry::from_geojson(&json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        }))
        .unwrap();
        assert_eq!(polygon.kind_name(), "Polygon");

        let line = Geometry::from_geojson(&json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]})).unwrap();
        assert_eq!(line, Geometry::Unsupported(UnsupportedKind::LineString));

        assert!(Geometry::from_geojson(&json!({"type": "Point", "coordinates": ["a", 1]})).is_err());
    }
}
