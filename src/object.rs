//! Stored object model.
//!
//! An object is either an opaque string or a spatial value: a bare point
//! (optionally with z), a bounding rectangle, a circle, or a parsed GeoJSON
//! geometry/feature. Spatial objects expose a bounding rectangle and exact
//! predicates; strings live only in the value index.

use std::sync::Arc;

use geo::{Contains, Coord, Geometry, Intersects, Point, Rect, Relate, coord};
use geojson::GeoJson;
use serde_json::json;

use crate::error::{Error, Result};
use crate::geom;

/// A GeoJSON-backed value: the original text plus the parsed geometry.
/// Features and collections keep their raw form for output while predicates
/// run against the flattened geometry.
#[derive(Debug, Clone)]
pub struct GeoObject {
    pub raw: Arc<str>,
    pub geom: Geometry<f64>,
    pub bbox: Option<Rect<f64>>,
    pub num_points: usize,
}

#[derive(Debug, Clone)]
pub enum ObjectValue {
    String(Arc<str>),
    Point { x: f64, y: f64, z: Option<f64> },
    Rect(Rect<f64>),
    Circle { center: Point<f64>, meters: f64 },
    Geo(Arc<GeoObject>),
}

/// One keyed entry in a collection: id, value, and the columnar field slots
/// the object has touched.
#[derive(Debug, Clone)]
pub struct Object {
    pub id: Arc<str>,
    pub value: ObjectValue,
    pub fields: Vec<f64>,
}

impl Object {
    pub fn new(id: Arc<str>, value: ObjectValue) -> Self {
        Self {
            id,
            value,
            fields: Vec::new(),
        }
    }

    /// Contribution to the collection weight counter.
    pub fn weight(&self) -> u64 {
        let string_len = match &self.value {
            ObjectValue::String(s) => s.len(),
            ObjectValue::Geo(g) => g.raw.len(),
            _ => 0,
        };
        (self.value.num_points() as u64) * 16
            + string_len as u64
            + (self.fields.len() as u64) * 8
            + self.id.len() as u64
    }
}

impl ObjectValue {
    pub fn from_geojson(raw: &str) -> Result<Self> {
        let parsed: GeoJson = raw
            .parse()
            .map_err(|_| Error::InvalidArgument(raw.to_string()))?;
        let collection = geojson::quick_collection(&parsed)
            .map_err(|_| Error::InvalidArgument(raw.to_string()))?;
        let geom: Geometry<f64> = if collection.len() == 1 {
            collection.into_iter().next().unwrap()
        } else {
            Geometry::GeometryCollection(collection)
        };
        let bbox = geo::BoundingRect::bounding_rect(&geom);
        let num_points = geo::CoordsIter::coords_count(&geom);
        Ok(ObjectValue::Geo(Arc::new(GeoObject {
            raw: Arc::from(raw),
            geom,
            bbox,
            num_points,
        })))
    }

    pub fn is_spatial(&self) -> bool {
        !matches!(self, ObjectValue::String(_))
    }

    /// Bounding rectangle in lon/lat degrees. None for strings and for
    /// geometries with empty bounds, which are excluded from the index.
    pub fn rect(&self) -> Option<Rect<f64>> {
        match self {
            ObjectValue::String(_) => None,
            ObjectValue::Point { x, y, .. } => {
                Some(Rect::new(coord! { x: *x, y: *y }, coord! { x: *x, y: *y }))
            }
            ObjectValue::Rect(r) => Some(*r),
            ObjectValue::Circle { center, meters } => Some(geom::circle_rect(*center, *meters)),
            ObjectValue::Geo(g) => g.bbox,
        }
    }

    pub fn num_points(&self) -> usize {
        match self {
            ObjectValue::String(_) => 0,
            ObjectValue::Point { .. } => 1,
            ObjectValue::Rect(_) => 2,
            ObjectValue::Circle { .. } => 1,
            ObjectValue::Geo(g) => g.num_points,
        }
    }

    pub fn center(&self) -> Point<f64> {
        match self {
            ObjectValue::String(_) => Point::new(0.0, 0.0),
            ObjectValue::Point { x, y, .. } => Point::new(*x, *y),
            ObjectValue::Rect(r) => r.center().into(),
            ObjectValue::Circle { center, .. } => *center,
            ObjectValue::Geo(g) => match g.bbox {
                Some(r) => r.center().into(),
                None => Point::new(0.0, 0.0),
            },
        }
    }

    /// The canonical string form: the raw string for string objects, the
    /// GeoJSON serialization otherwise.
    pub fn string_form(&self) -> Arc<str> {
        match self {
            ObjectValue::String(s) => s.clone(),
            ObjectValue::Geo(g) => g.raw.clone(),
            other => Arc::from(other.to_json().to_string()),
        }
    }

    /// GeoJSON representation as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ObjectValue::String(s) => json!(s.as_ref()),
            ObjectValue::Point { x, y, z } => match z {
                Some(z) => json!({"type": "Point", "coordinates": [x, y, z]}),
                None => json!({"type": "Point", "coordinates": [x, y]}),
            },
            ObjectValue::Rect(r) => {
                let (min, max) = (r.min(), r.max());
                json!({"type": "Polygon", "coordinates": [[
                    [min.x, min.y], [max.x, min.y], [max.x, max.y], [min.x, max.y], [min.x, min.y]
                ]]})
            }
            ObjectValue::Circle { center, meters } => {
                let poly = geom::circle_polygon(*center, *meters);
                let ring: Vec<[f64; 2]> = poly.exterior().coords().map(|c| [c.x, c.y]).collect();
                json!({"type": "Polygon", "coordinates": [ring]})
            }
            ObjectValue::Geo(g) => serde_json::from_str(&g.raw)
                .unwrap_or_else(|_| json!(g.raw.as_ref())),
        }
    }

    /// Concrete geometry used by the exact predicate checks. Circles become
    /// polygon rings; strings have no geometry.
    pub fn to_geometry(&self) -> Option<Geometry<f64>> {
        match self {
            ObjectValue::String(_) => None,
            ObjectValue::Point { x, y, .. } => Some(Geometry::Point(Point::new(*x, *y))),
            ObjectValue::Rect(r) => Some(Geometry::Polygon(r.to_polygon())),
            ObjectValue::Circle { center, meters } => {
                Some(Geometry::Polygon(geom::circle_polygon(*center, *meters)))
            }
            ObjectValue::Geo(g) => Some(g.geom.clone()),
        }
    }

    /// True when `self` lies entirely inside `area` (boundary inclusive).
    pub fn within(&self, area: &ObjectValue) -> bool {
        if !self.is_spatial() || !area.is_spatial() {
            return false;
        }
        // circle areas get the exact distance treatment for points
        if let ObjectValue::Circle { center, meters } = area
            && let ObjectValue::Point { x, y, .. } = self
        {
            return geom::geodesic_distance(*center, Point::new(*x, *y)) <= *meters;
        }
        // rect areas reduce to coordinate comparison on the candidate bounds
        if let ObjectValue::Rect(r) = area {
            return match self.rect() {
                Some(b) => {
                    b.min().x >= r.min().x
                        && b.min().y >= r.min().y
                        && b.max().x <= r.max().x
                        && b.max().y <= r.max().y
                }
                None => false,
            };
        }
        let (Some(a), Some(b)) = (self.to_geometry(), area.to_geometry()) else {
            return false;
        };
        a.relate(&b).is_coveredby()
    }

    /// True when `self` and `area` share at least one point.
    pub fn intersects(&self, area: &ObjectValue) -> bool {
        if !self.is_spatial() || !area.is_spatial() {
            return false;
        }
        if let ObjectValue::Circle { center, meters } = area {
            return self.distance_to_point(*center) <= *meters;
        }
        if let ObjectValue::Circle { center, meters } = self {
            return area.distance_to_point(*center) <= *meters;
        }
        let (Some(a), Some(b)) = (self.to_geometry(), area.to_geometry()) else {
            return false;
        };
        a.intersects(&b)
    }

    /// True when `self` entirely contains `other`.
    pub fn contains(&self, other: &ObjectValue) -> bool {
        other.within(self)
    }

    /// Geodesic meters from `p` to the nearest point of this value.
    /// Zero when `p` is inside an areal value.
    pub fn distance_to_point(&self, p: Point<f64>) -> f64 {
        match self {
            ObjectValue::String(_) => f64::INFINITY,
            ObjectValue::Point { x, y, .. } => geom::geodesic_distance(p, Point::new(*x, *y)),
            ObjectValue::Rect(r) => {
                if r.contains(&p) || r.to_polygon().relate(&p).is_covers() {
                    0.0
                } else {
                    geom::point_rect_distance(p, r)
                }
            }
            ObjectValue::Circle { center, meters } => {
                (geom::geodesic_distance(p, *center) - meters).max(0.0)
            }
            ObjectValue::Geo(g) => geometry_distance(&g.geom, p),
        }
    }
}

/// Geodesic meters from `p` to the nearest point of `geom`.
fn geometry_distance(geom: &Geometry<f64>, p: Point<f64>) -> f64 {
    match geom {
        Geometry::Point(q) => geom::geodesic_distance(p, *q),
        Geometry::MultiPoint(mp) => mp
            .iter()
            .map(|q| geom::geodesic_distance(p, *q))
            .fold(f64::INFINITY, f64::min),
        Geometry::Line(line) => segment_distance(p, line.start, line.end),
        Geometry::LineString(ls) => linestring_distance(p, ls.coords()),
        Geometry::MultiLineString(mls) => mls
            .iter()
            .map(|ls| linestring_distance(p, ls.coords()))
            .fold(f64::INFINITY, f64::min),
        Geometry::Polygon(poly) => polygon_distance(p, poly),
        Geometry::MultiPolygon(mp) => mp
            .iter()
            .map(|poly| polygon_distance(p, poly))
            .fold(f64::INFINITY, f64::min),
        Geometry::Rect(r) => {
            if r.contains(&p) {
                0.0
            } else {
                geom::point_rect_distance(p, r)
            }
        }
        Geometry::Triangle(t) => polygon_distance(p, &t.to_polygon()),
        Geometry::GeometryCollection(gc) => gc
            .iter()
            .map(|g| geometry_distance(g, p))
            .fold(f64::INFINITY, f64::min),
    }
}

fn polygon_distance(p: Point<f64>, poly: &geo::Polygon<f64>) -> f64 {
    if poly.contains(&p) || poly.relate(&p).is_covers() {
        return 0.0;
    }
    linestring_distance(p, poly.exterior().coords())
}

fn linestring_distance<'a, I>(p: Point<f64>, coords: I) -> f64
where
    I: Iterator<Item = &'a Coord<f64>>,
{
    let mut prev: Option<Coord<f64>> = None;
    let mut best = f64::INFINITY;
    for c in coords {
        if let Some(a) = prev {
            best = best.min(segment_distance(p, a, *c));
        } else {
            best = best.min(geom::geodesic_distance(p, Point::new(c.x, c.y)));
        }
        prev = Some(*c);
    }
    best
}

/// Nearest approach of `p` to segment a-b: project in a locally-scaled
/// planar frame, then measure geodesically to the projected point.
fn segment_distance(p: Point<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let scale = p.y().to_radians().cos().max(1e-9);
    let (px, py) = (p.x() * scale, p.y());
    let (ax, ay) = (a.x * scale, a.y);
    let (bx, by) = (b.x * scale, b.y);
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    };
    let closest = Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t);
    geom::geodesic_distance(p, closest)
}
