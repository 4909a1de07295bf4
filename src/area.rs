//! Query area grammar.
//!
//! WITHIN/INTERSECTS/TEST targets and fence predicates are built from the
//! token stream: POINT, CIRCLE, SECTOR, BOUNDS, OBJECT, TILE, QUADKEY,
//! HASH, or GET (reuse a stored object). Everything reduces to an
//! [`ObjectValue`] so the predicate code has a single shape to test against.

use std::sync::Arc;

use geo::{Point, Polygon, Rect, coord};
use serde_json::json;

use crate::error::{Error, Result};
use crate::geom;
use crate::object::{GeoObject, ObjectValue};

/// Lookup used by `GET key id` areas; the caller decides where objects
/// come from (live database during queries, a snapshot during tests).
pub type ObjectLookup<'a> = &'a dyn Fn(&str, &str) -> Option<ObjectValue>;

pub fn parse_f64(s: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| Error::InvalidArgument(s.to_string()))
}

fn next<'a>(args: &'a [String], pos: &mut usize) -> Result<&'a str> {
    let arg = args.get(*pos).ok_or_else(|| Error::InvalidArgument("".to_string()))?;
    *pos += 1;
    Ok(arg)
}

/// Parse one area starting at `args[*pos]`, advancing `pos` past it.
pub fn parse_area(args: &[String], pos: &mut usize, lookup: ObjectLookup) -> Result<ObjectValue> {
    let kind = next(args, pos)?.to_uppercase();
    match kind.as_str() {
        "POINT" => {
            let lat = parse_f64(next(args, pos)?)?;
            let lon = parse_f64(next(args, pos)?)?;
            Ok(ObjectValue::Point {
                x: lon,
                y: lat,
                z: None,
            })
        }
        "CIRCLE" => {
            let lat = parse_f64(next(args, pos)?)?;
            let lon = parse_f64(next(args, pos)?)?;
            let meters = parse_f64(next(args, pos)?)?;
            Ok(ObjectValue::Circle {
                center: Point::new(lon, lat),
                meters,
            })
        }
        "SECTOR" => {
            let lat = parse_f64(next(args, pos)?)?;
            let lon = parse_f64(next(args, pos)?)?;
            let meters = parse_f64(next(args, pos)?)?;
            let b1_raw = next(args, pos)?.to_string();
            let b1 = parse_f64(&b1_raw)?;
            let b2 = parse_f64(next(args, pos)?)?;
            if b1 == b2 {
                return Err(Error::EqualBearings(b1_raw));
            }
            let poly = geom::sector_polygon(Point::new(lon, lat), meters, b1, b2);
            Ok(polygon_value(poly))
        }
        "BOUNDS" => {
            let min_lat = parse_f64(next(args, pos)?)?;
            let min_lon = parse_f64(next(args, pos)?)?;
            let max_lat = parse_f64(next(args, pos)?)?;
            let max_lon = parse_f64(next(args, pos)?)?;
            Ok(ObjectValue::Rect(Rect::new(
                coord! { x: min_lon, y: min_lat },
                coord! { x: max_lon, y: max_lat },
            )))
        }
        "OBJECT" => ObjectValue::from_geojson(next(args, pos)?),
        "TILE" => {
            let x = next(args, pos)?
                .parse()
                .map_err(|_| Error::InvalidArgument(args[*pos - 1].clone()))?;
            let y = next(args, pos)?
                .parse()
                .map_err(|_| Error::InvalidArgument(args[*pos - 1].clone()))?;
            let z = next(args, pos)?
                .parse()
                .map_err(|_| Error::InvalidArgument(args[*pos - 1].clone()))?;
            Ok(ObjectValue::Rect(geom::tile_rect(x, y, z)?))
        }
        "QUADKEY" => {
            let key = next(args, pos)?;
            let (x, y, z) = geom::quadkey_tile(key)?;
            Ok(ObjectValue::Rect(geom::tile_rect(x, y, z)?))
        }
        "HASH" => {
            let hash = next(args, pos)?;
            Ok(ObjectValue::Rect(geom::geohash_rect(hash)?))
        }
        "GET" => {
            let key = next(args, pos)?;
            let id = next(args, pos)?;
            match lookup(key, id) {
                Some(value) => Ok(value),
                None => Err(Error::KeyNotFound),
            }
        }
        other => Err(Error::InvalidArgument(other.to_string())),
    }
}

/// Wrap a computed polygon as a stored-style value so predicates treat it
/// like any parsed geometry.
pub fn polygon_value(poly: Polygon<f64>) -> ObjectValue {
    let ring: Vec<[f64; 2]> = poly.exterior().coords().map(|c| [c.x, c.y]).collect();
    let raw = json!({"type": "Polygon", "coordinates": [ring]}).to_string();
    let geom = geo::Geometry::Polygon(poly);
    let bbox = geo::BoundingRect::bounding_rect(&geom);
    let num_points = geo::CoordsIter::coords_count(&geom);
    ObjectValue::Geo(Arc::new(GeoObject {
        raw: Arc::from(raw.as_str()),
        geom,
        bbox,
        num_points,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lookup(_: &str, _: &str) -> Option<ObjectValue> {
        None
    }

    fn parse(tokens: &[&str]) -> Result<ObjectValue> {
        let args: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        let mut pos = 0;
        let v = parse_area(&args, &mut pos, &no_lookup)?;
        assert_eq!(pos, args.len(), "all tokens consumed");
        Ok(v)
    }

    #[test]
    fn point_is_lat_lon_order() {
        let v = parse(&["POINT", "33", "-115"]).unwrap();
        match v {
            ObjectValue::Point { x, y, .. } => {
                assert_eq!(x, -115.0);
                assert_eq!(y, 33.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bounds_is_min_max_lat_lon() {
        let v = parse(&["BOUNDS", "10", "20", "30", "40"]).unwrap();
        match v {
            ObjectValue::Rect(r) => {
                assert_eq!(r.min().y, 10.0);
                assert_eq!(r.min().x, 20.0);
                assert_eq!(r.max().y, 30.0);
                assert_eq!(r.max().x, 40.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sector_rejects_equal_bearings() {
        let err = parse(&["SECTOR", "33", "-115", "1000", "90", "90"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "equal bearings (90 == 90), use CIRCLE instead"
        );
        assert!(parse(&["SECTOR", "33", "-115", "1000", "0", "90"]).is_ok());
    }

    #[test]
    fn tile_and_quadkey_agree() {
        let t = parse(&["TILE", "3", "6", "4"]).unwrap();
        let (x, y, z) = geom::quadkey_tile("0231").unwrap();
        assert_eq!((x, y, z), (3, 6, 4));
        let q = parse(&["QUADKEY", "0231"]).unwrap();
        match (t, q) {
            (ObjectValue::Rect(a), ObjectValue::Rect(b)) => assert_eq!(a, b),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn object_area_parses_geojson() {
        let v = parse(&[
            "OBJECT",
            r#"{"type":"Polygon","coordinates":[[[0,0],[10,0],[10,10],[0,10],[0,0]]]}"#,
        ])
        .unwrap();
        assert!(v.is_spatial());
    }

    #[test]
    fn get_area_uses_lookup() {
        let args: Vec<String> = ["GET", "fleet", "truck1"].iter().map(|s| s.to_string()).collect();
        let mut pos = 0;
        let found = parse_area(&args, &mut pos, &|key, id| {
            (key == "fleet" && id == "truck1").then_some(ObjectValue::Point {
                x: 1.0,
                y: 2.0,
                z: None,
            })
        });
        assert!(found.is_ok());

        let mut pos = 0;
        let missing = parse_area(&args, &mut pos, &no_lookup);
        assert!(matches!(missing, Err(Error::KeyNotFound)));
    }
}
