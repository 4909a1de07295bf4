//! Geodesic and planar geometry helpers.
//!
//! Distances between objects are geodesic meters on the WGS84 ellipsoid
//! (Vincenty). The spatial index orders candidates by an equirectangular
//! lower bound which is cheap and never overestimates at query scales;
//! exact distances are always recomputed before anything is emitted.

use geo::{Coord, Point, Polygon, Rect, coord};

use crate::error::{Error, Result};

/// WGS84 semi-major axis in meters
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 semi-minor axis in meters
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// Mean earth radius in meters, used by the haversine fallback
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Vertices used when a circle participates in polygon predicates
const CIRCLE_STEPS: usize = 64;

/// Haversine great-circle distance in meters.
///
/// Used as the fallback when Vincenty fails to converge (near-antipodal
/// points) and for cheap interior estimates.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Geodesic distance in meters between two lon/lat points on WGS84
/// (Vincenty inverse formula).
pub fn geodesic_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    let (lon1, lat1) = (a.x(), a.y());
    let (lon2, lat2) = (b.x(), b.y());
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }

    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut iterations = 0;
    let (sin_sigma, cos_sigma, sigma, cos_sq_alpha, cos_2sigma_m) = loop {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return 0.0; // coincident
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0 // equatorial line
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m
                            + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
        iterations += 1;
        if (lambda - prev).abs() < 1e-12 {
            break (sin_sigma, cos_sigma, sigma, cos_sq_alpha, cos_2sigma_m);
        }
        if iterations >= 200 {
            // near-antipodal, fall back to the spherical estimate
            return haversine_distance(lat1, lon1, lat2, lon2);
        }
    };

    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let a_coef = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b_coef = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = b_coef
        * sin_sigma
        * (cos_2sigma_m
            + b_coef / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                    - b_coef / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

    WGS84_B * a_coef * (sigma - delta_sigma)
}

/// Destination point given origin, initial bearing (degrees clockwise from
/// north) and distance in meters (Vincenty direct formula).
pub fn geodesic_destination(origin: Point<f64>, bearing_deg: f64, meters: f64) -> Point<f64> {
    if meters == 0.0 {
        return origin;
    }
    let (lon1, lat1) = (origin.x().to_radians(), origin.y().to_radians());
    let alpha1 = bearing_deg.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

    let tan_u1 = (1.0 - WGS84_F) * lat1.tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;
    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let a_coef = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b_coef = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let mut sigma = meters / (WGS84_B * a_coef);
    let mut cos_2sigma_m;
    let mut iterations = 0;
    loop {
        cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        let (sin_sigma, cos_sigma) = sigma.sin_cos();
        let delta_sigma = b_coef
            * sin_sigma
            * (cos_2sigma_m
                + b_coef / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                        - b_coef / 6.0
                            * cos_2sigma_m
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
        let prev = sigma;
        sigma = meters / (WGS84_B * a_coef) + delta_sigma;
        iterations += 1;
        if (sigma - prev).abs() < 1e-12 || iterations >= 200 {
            break;
        }
    }

    let (sin_sigma, cos_sigma) = sigma.sin_cos();
    let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - WGS84_F) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * WGS84_F
            * sin_alpha
            * (sigma
                + c * sin_sigma
                    * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
    let lon2 = lon1 + l;

    Point::new(normalize_lon(lon2.to_degrees()), lat2.to_degrees())
}

fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Equirectangular distance in meters from a lon/lat point to the nearest
/// point of a rectangle. Zero when the point is inside.
pub fn point_rect_distance(p: Point<f64>, rect: &Rect<f64>) -> f64 {
    let cx = p.x().clamp(rect.min().x, rect.max().x);
    let cy = p.y().clamp(rect.min().y, rect.max().y);
    equirectangular(p.y(), p.x(), cy, cx)
}

/// Cheap meters estimate between two lon/lat points. Underestimates slightly
/// relative to the geodesic, which is what an index ordering bound needs.
pub fn equirectangular(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let mean_lat = ((lat1 + lat2) / 2.0).to_radians();
    let x = (lon2 - lon1).to_radians() * mean_lat.cos();
    let y = (lat2 - lat1).to_radians();
    (x * x + y * y).sqrt() * EARTH_RADIUS_M
}

/// Outer bounding rectangle of a circle, in degrees.
pub fn circle_rect(center: Point<f64>, meters: f64) -> Rect<f64> {
    let north = geodesic_destination(center, 0.0, meters);
    let east = geodesic_destination(center, 90.0, meters);
    let south = geodesic_destination(center, 180.0, meters);
    let west = geodesic_destination(center, 270.0, meters);
    Rect::new(
        coord! { x: west.x(), y: south.y() },
        coord! { x: east.x(), y: north.y() },
    )
}

/// Approximate a geodesic circle as a polygon ring.
pub fn circle_polygon(center: Point<f64>, meters: f64) -> Polygon<f64> {
    let mut ring: Vec<Coord<f64>> = Vec::with_capacity(CIRCLE_STEPS + 1);
    for i in 0..CIRCLE_STEPS {
        let bearing = 360.0 * i as f64 / CIRCLE_STEPS as f64;
        let p = geodesic_destination(center, bearing, meters);
        ring.push(coord! { x: p.x(), y: p.y() });
    }
    ring.push(ring[0]);
    Polygon::new(ring.into(), vec![])
}

/// A pie-slice polygon from `bearing1` clockwise to `bearing2`.
/// Equal bearings are rejected upstream; a full circle is CIRCLE's job.
pub fn sector_polygon(center: Point<f64>, meters: f64, bearing1: f64, bearing2: f64) -> Polygon<f64> {
    let b1 = bearing1.rem_euclid(360.0);
    let mut b2 = bearing2.rem_euclid(360.0);
    if b2 <= b1 {
        b2 += 360.0;
    }
    let span = b2 - b1;
    let steps = (span / 6.0).ceil().max(1.0) as usize;

    let mut ring: Vec<Coord<f64>> = Vec::with_capacity(steps + 3);
    ring.push(coord! { x: center.x(), y: center.y() });
    for i in 0..=steps {
        let bearing = b1 + span * i as f64 / steps as f64;
        let p = geodesic_destination(center, bearing, meters);
        ring.push(coord! { x: p.x(), y: p.y() });
    }
    ring.push(ring[0]);
    Polygon::new(ring.into(), vec![])
}

/// Lon/lat bounds of an XYZ web-mercator tile.
pub fn tile_rect(x: u32, y: u32, z: u32) -> Result<Rect<f64>> {
    if z > 30 || x >= (1u32 << z.min(30)) || y >= (1u32 << z.min(30)) {
        return Err(Error::InvalidArgument(format!("{x} {y} {z}")));
    }
    let n = (1u64 << z) as f64;
    let lon_min = x as f64 / n * 360.0 - 180.0;
    let lon_max = (x as f64 + 1.0) / n * 360.0 - 180.0;
    let lat_of = |ty: f64| -> f64 {
        let v = std::f64::consts::PI * (1.0 - 2.0 * ty / n);
        v.sinh().atan().to_degrees()
    };
    let lat_max = lat_of(y as f64);
    let lat_min = lat_of(y as f64 + 1.0);
    Ok(Rect::new(
        coord! { x: lon_min, y: lat_min },
        coord! { x: lon_max, y: lat_max },
    ))
}

/// Decode a Bing-style quadkey into its tile coordinates.
pub fn quadkey_tile(key: &str) -> Result<(u32, u32, u32)> {
    if key.is_empty() || key.len() > 30 {
        return Err(Error::InvalidArgument(key.to_string()));
    }
    let mut x = 0u32;
    let mut y = 0u32;
    for ch in key.chars() {
        x <<= 1;
        y <<= 1;
        match ch {
            '0' => {}
            '1' => x |= 1,
            '2' => y |= 1,
            '3' => {
                x |= 1;
                y |= 1;
            }
            _ => return Err(Error::InvalidArgument(key.to_string())),
        }
    }
    Ok((x, y, key.len() as u32))
}

/// Lon/lat bounds of a geohash cell.
pub fn geohash_rect(hash: &str) -> Result<Rect<f64>> {
    geohash::decode_bbox(hash).map_err(|_| Error::InvalidArgument(hash.to_string()))
}

/// Encode a lon/lat point as a geohash of the given precision.
pub fn geohash_encode(p: Point<f64>, precision: usize) -> Result<String> {
    geohash::encode(coord! { x: p.x(), y: p.y() }, precision.clamp(1, 12))
        .map_err(|_| Error::InvalidArgument("hash".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // WGS84 reference arcs: one degree of latitude at the equator and one
    // degree of longitude along the equator.
    #[test]
    fn geodesic_reference_arcs() {
        let d = geodesic_distance(Point::new(0.0, 0.0), Point::new(0.0, 1.0));
        assert!((d - 110_574.39).abs() < 0.5, "meridian arc was {d}");

        let d = geodesic_distance(Point::new(0.0, 0.0), Point::new(1.0, 0.0));
        assert!((d - 111_319.49).abs() < 0.5, "equator arc was {d}");
    }

    #[test]
    fn geodesic_zero_and_symmetry() {
        let a = Point::new(-115.0, 33.0);
        let b = Point::new(-116.2, 33.4);
        assert_eq!(geodesic_distance(a, a), 0.0);
        let ab = geodesic_distance(a, b);
        let ba = geodesic_distance(b, a);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn destination_round_trips_distance() {
        let origin = Point::new(13.37, 52.52);
        for bearing in [0.0, 45.0, 133.7, 270.0] {
            let p = geodesic_destination(origin, bearing, 25_000.0);
            let d = geodesic_distance(origin, p);
            assert!((d - 25_000.0).abs() < 0.01, "bearing {bearing}: {d}");
        }
    }

    #[test]
    fn haversine_close_to_geodesic_at_short_range() {
        let a = Point::new(-115.0, 33.0);
        let b = Point::new(-115.1, 33.1);
        let h = haversine_distance(33.0, -115.0, 33.1, -115.1);
        let g = geodesic_distance(a, b);
        // spherical vs ellipsoidal stay within ~0.6% of each other
        assert!((h - g).abs() / g < 0.006);
    }

    #[test]
    fn rect_distance_zero_inside() {
        let rect = Rect::new(coord! { x: -1.0, y: -1.0 }, coord! { x: 1.0, y: 1.0 });
        assert_eq!(point_rect_distance(Point::new(0.5, 0.5), &rect), 0.0);
        assert!(point_rect_distance(Point::new(2.0, 0.0), &rect) > 100_000.0);
    }

    #[test]
    fn circle_rect_contains_circle_polygon() {
        let center = Point::new(-115.0, 33.0);
        let rect = circle_rect(center, 5_000.0);
        let poly = circle_polygon(center, 5_000.0);
        for c in poly.exterior().coords() {
            assert!(c.x >= rect.min().x - 1e-9 && c.x <= rect.max().x + 1e-9);
            assert!(c.y >= rect.min().y - 1e-9 && c.y <= rect.max().y + 1e-9);
        }
    }

    #[test]
    fn tile_zero_is_the_world() {
        let r = tile_rect(0, 0, 0).unwrap();
        assert!((r.min().x - -180.0).abs() < 1e-9);
        assert!((r.max().x - 180.0).abs() < 1e-9);
        assert!(r.max().y > 85.0 && r.min().y < -85.0);
    }

    #[test]
    fn quadkey_matches_tile() {
        // quadkey "0231" resolves to a z=4 tile
        let (x, y, z) = quadkey_tile("0231").unwrap();
        assert_eq!(z, 4);
        let direct = tile_rect(x, y, z).unwrap();
        let via = tile_rect(x, y, 4).unwrap();
        assert_eq!(direct, via);
        assert!(quadkey_tile("04").is_err());
    }

    #[test]
    fn geohash_round_trip() {
        let p = Point::new(-115.172_8, 36.114_7);
        let hash = geohash_encode(p, 9).unwrap();
        let rect = geohash_rect(&hash).unwrap();
        assert!(rect.min().x <= p.x() && p.x() <= rect.max().x);
        assert!(rect.min().y <= p.y() && p.y() <= rect.max().y);
    }
}
