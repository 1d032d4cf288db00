//! Coordinate transformation between the registered reference systems
//!
//! Only WGS 84 (EPSG:4326) and Web Mercator (EPSG:3857) are supported, using
//! the closed form spherical Mercator equations. Any other pair of codes is
//! rejected instead of approximated.
//!
//! Also home to the geodesic helpers used on captured positions: haversine
//! distance, initial bearing, bounding box folds and degree/minute/second
//! formatting.

use crate::gpkg_wkb;
use crate::model::Feature;
use crate::result::{Error, Result};
use crate::srs::{self, SpatialRefSys};
use crate::types::{BoundingBox, GPKGPoint};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Sphere radius in metres, shared by Web Mercator and the distance formula.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

fn registered(code: i64) -> Result<&'static SpatialRefSys> {
    srs::lookup(code).ok_or(Error::UnknownSrs(code))
}

fn check_bounds(p: &GPKGPoint, system: &SpatialRefSys) -> Result<()> {
    // NaN and infinities never satisfy the comparisons in `contains`
    if system.contains(p.x, p.y) {
        Ok(())
    } else {
        Err(Error::OutOfBounds {
            x: p.x,
            y: p.y,
            srs_id: system.id,
        })
    }
}

/// Transforms a point from `source` to `target`.
///
/// Identical codes return the point untouched. When `validate` is set the
/// input is checked against the source bounds and the result against the
/// target bounds. Altitude is carried through unchanged.
pub fn transform_point(p: &GPKGPoint, source: i64, target: i64, validate: bool) -> Result<GPKGPoint> {
    if source == target {
        return Ok(*p);
    }
    let [from, to] = srs::supported_codes();
    let forward = match (source, target) {
        (s, t) if s == from && t == to => true,
        (s, t) if s == to && t == from => false,
        _ => {
            return Err(Error::UnsupportedTransform {
                source_srs: source,
                target_srs: target,
            })
        }
    };
    if validate {
        check_bounds(p, registered(source)?)?;
    }
    let (x, y) = if forward {
        geographic_to_mercator(p.x, p.y)
    } else {
        mercator_to_geographic(p.x, p.y)
    };
    let out = GPKGPoint { x, y, z: p.z };
    if validate {
        check_bounds(&out, registered(target)?)?;
    }
    Ok(out)
}

/// Transforms every point, keeping input order. The input is left untouched.
pub fn transform_points(
    points: &[GPKGPoint],
    source: i64,
    target: i64,
    validate: bool,
) -> Result<Vec<GPKGPoint>> {
    points
        .iter()
        .map(|p| transform_point(p, source, target, validate))
        .collect()
}

/// Returns copies of `features` with their geometries moved to `target`.
///
/// Features without a geometry are copied as they are.
pub fn transform_feature_geometries(
    features: &[Feature],
    source: i64,
    target: i64,
    validate: bool,
) -> Result<Vec<Feature>> {
    features
        .iter()
        .map(|f| {
            if f.geometry.is_empty() || source == target {
                return Ok(f.clone());
            }
            let p = transform_point(&f.point()?, source, target, validate)?;
            Ok(Feature {
                geometry: gpkg_wkb::encode(&p),
                ..f.clone()
            })
        })
        .collect()
}

#[inline]
fn geographic_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * PI / 180.0 * EARTH_RADIUS;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

#[inline]
fn mercator_to_geographic(x: f64, y: f64) -> (f64, f64) {
    let lon = x / EARTH_RADIUS * 180.0 / PI;
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0) * 180.0 / PI;
    (lon, lat)
}

/// Transforms a box by projecting all four corners and enclosing the results.
///
/// Projecting only two opposite corners under-estimates the envelope once the
/// projection bends lines of constant coordinate.
pub fn transform_bounds(b: &BoundingBox, source: i64, target: i64) -> Result<BoundingBox> {
    let corners = transform_points(&b.corners(), source, target, false)?;
    Ok(corners[1..]
        .iter()
        .fold(BoundingBox::from_point(&corners[0]), |acc, p| expand_bounds(&acc, p)))
}

/// Great circle distance in metres using the haversine formula.
pub fn calculate_distance(p1: &GPKGPoint, p2: &GPKGPoint) -> f64 {
    let lat1 = p1.y.to_radians();
    let lat2 = p2.y.to_radians();
    let d_lat = (p2.y - p1.y).to_radians();
    let d_lon = (p2.x - p1.x).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS * c
}

/// Initial bearing from `p1` towards `p2` in degrees, normalised to [0, 360).
pub fn calculate_bearing(p1: &GPKGPoint, p2: &GPKGPoint) -> f64 {
    let lat1 = p1.y.to_radians();
    let lat2 = p2.y.to_radians();
    let d_lon = (p2.x - p1.x).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative angles
    if bearing >= 360.0 {
        0.0
    } else {
        bearing
    }
}

pub fn is_point_in_bounds(p: &GPKGPoint, b: &BoundingBox) -> bool {
    p.x >= b.min_x && p.x <= b.max_x && p.y >= b.min_y && p.y <= b.max_y
}

/// Smallest box holding both `b` and `p`.
pub fn expand_bounds(b: &BoundingBox, p: &GPKGPoint) -> BoundingBox {
    BoundingBox::new(
        b.min_x.min(p.x),
        b.min_y.min(p.y),
        b.max_x.max(p.x),
        b.max_y.max(p.y),
    )
}

/// Tight bounds of all points, `None` when there are none.
pub fn create_bounds_from_points(points: &[GPKGPoint]) -> Option<BoundingBox> {
    let (first, rest) = points.split_first()?;
    Some(
        rest.iter()
            .fold(BoundingBox::from_point(first), |b, p| expand_bounds(&b, p)),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    fn letter(&self) -> char {
        match self {
            Hemisphere::North => 'N',
            Hemisphere::South => 'S',
            Hemisphere::East => 'E',
            Hemisphere::West => 'W',
        }
    }

    fn sign(&self) -> f64 {
        match self {
            Hemisphere::North | Hemisphere::East => 1.0,
            Hemisphere::South | Hemisphere::West => -1.0,
        }
    }
}

/// A coordinate in degrees, minutes and seconds.
///
/// The sign lives in the hemisphere: latitudes below zero are south,
/// longitudes below zero are west.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dms {
    pub degrees: u32,
    pub minutes: u32,
    pub seconds: f64,
    pub hemisphere: Hemisphere,
}

pub fn to_dms(decimal: f64, axis: Axis) -> Dms {
    let hemisphere = match (axis, decimal < 0.0) {
        (Axis::Latitude, false) => Hemisphere::North,
        (Axis::Latitude, true) => Hemisphere::South,
        (Axis::Longitude, false) => Hemisphere::East,
        (Axis::Longitude, true) => Hemisphere::West,
    };
    let abs = decimal.abs();
    let mut degrees = abs.trunc() as u32;
    let minutes_full = (abs - degrees as f64) * 60.0;
    let mut minutes = minutes_full.trunc() as u32;
    let mut seconds = (minutes_full - minutes as f64) * 60.0;
    // keep 59.99999 from printing as 60
    if seconds >= 59.999_999_5 {
        seconds = 0.0;
        minutes += 1;
    }
    if minutes >= 60 {
        minutes -= 60;
        degrees += 1;
    }
    Dms {
        degrees,
        minutes,
        seconds,
        hemisphere,
    }
}

pub fn from_dms(dms: &Dms) -> f64 {
    let abs = dms.degrees as f64 + dms.minutes as f64 / 60.0 + dms.seconds / 3600.0;
    abs * dms.hemisphere.sign()
}

impl fmt::Display for Dms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}°{}'{:.2}\"{}",
            self.degrees,
            self.minutes,
            self.seconds,
            self.hemisphere.letter()
        )
    }
}

impl FromStr for Dms {
    type Err = Error;

    /// Parses the `Display` form, e.g. `33°55'31.20"S`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidCoordinate(format!("'{}' is not a DMS coordinate", s));
        let s = s.trim();
        let hemisphere = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
            Some('N') => Hemisphere::North,
            Some('S') => Hemisphere::South,
            Some('E') => Hemisphere::East,
            Some('W') => Hemisphere::West,
            _ => return Err(bad()),
        };
        let body = &s[..s.len() - 1];
        let (deg, rest) = body.split_once('°').ok_or_else(bad)?;
        let (min, rest) = rest.split_once('\'').ok_or_else(bad)?;
        let sec = rest.trim_end_matches('"');
        Ok(Dms {
            degrees: deg.trim().parse().map_err(|_| bad())?,
            minutes: min.trim().parse().map_err(|_| bad())?,
            seconds: sec.trim().parse().map_err(|_| bad())?,
            hemisphere,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn identity_is_exact() {
        let p = GPKGPoint::with_z(18.4241, -33.9249, 7.0);
        assert_eq!(transform_point(&p, 4326, 4326, true).unwrap(), p);
        assert_eq!(transform_point(&p, 9999, 9999, true).unwrap(), p);
    }

    #[test]
    fn known_mercator_values() {
        let p = transform_point(&GPKGPoint::new(180.0, 0.0), 4326, 3857, true).unwrap();
        assert!(close(p.x, srs::WEB_MERCATOR_EXTENT, 1e-6));
        assert!(close(p.y, 0.0, 1e-6));

        // Johannesburg
        let p = transform_point(&GPKGPoint::new(28.0473, -26.2041), 4326, 3857, true).unwrap();
        assert!(close(p.x, 3_122_211.154, 0.01), "x was {}", p.x);
        assert!(close(p.y, -3_024_381.641, 0.01), "y was {}", p.y);
    }

    #[test]
    fn out_of_bounds_source_rejected() {
        let err = transform_point(&GPKGPoint::new(200.0, 0.0), 4326, 3857, true).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { srs_id: 4326, .. }));
    }

    #[test]
    fn pole_fails_target_bounds() {
        let err = transform_point(&GPKGPoint::new(0.0, 89.9), 4326, 3857, true).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { srs_id: 3857, .. }));
    }

    #[test]
    fn unvalidated_transform_skips_bounds() {
        assert!(transform_point(&GPKGPoint::new(200.0, 0.0), 4326, 3857, false).is_ok());
    }

    #[test]
    fn unsupported_pair() {
        let err = transform_point(&GPKGPoint::new(1.0, 1.0), 4326, 9999, true).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedTransform {
                source_srs: 4326,
                target_srs: 9999
            }
        ));
    }

    #[test]
    fn feature_transform_returns_new_features() {
        let features = vec![
            Feature::new(1, &GPKGPoint::new(180.0, 0.0)),
            Feature {
                id: 2,
                geometry: Vec::new(),
                properties: Default::default(),
            },
        ];
        let out = transform_feature_geometries(&features, 4326, 3857, true).unwrap();
        assert_eq!(out.len(), 2);
        assert!(close(out[0].point().unwrap().x, srs::WEB_MERCATOR_EXTENT, 1e-6));
        assert!(out[1].geometry.is_empty());
        // input untouched
        assert_eq!(features[0].point().unwrap().x, 180.0);
    }

    #[test]
    fn bounds_use_all_corners() {
        let b = BoundingBox::new(-10.0, -20.0, 10.0, 20.0);
        assert_eq!(
            b.corners(),
            [
                GPKGPoint::new(-10.0, -20.0),
                GPKGPoint::new(-10.0, 20.0),
                GPKGPoint::new(10.0, -20.0),
                GPKGPoint::new(10.0, 20.0),
            ]
        );

        // Mercator maps each axis on its own, so the envelope of the four
        // projected corners equals the box of the two projected extremes
        let m = transform_bounds(&b, 4326, 3857).unwrap();
        let projected = transform_points(&b.corners(), 4326, 3857, true).unwrap();
        let enclosing = create_bounds_from_points(&projected).unwrap();
        assert_eq!(m, enclosing);
        let lo = transform_point(&GPKGPoint::new(-10.0, -20.0), 4326, 3857, true).unwrap();
        let hi = transform_point(&GPKGPoint::new(10.0, 20.0), 4326, 3857, true).unwrap();
        assert!(close(m.min_x, lo.x, 1e-6) && close(m.min_y, lo.y, 1e-6));
        assert!(close(m.max_x, hi.x, 1e-6) && close(m.max_y, hi.y, 1e-6));
    }

    #[test]
    fn distance_and_bearing() {
        let p = GPKGPoint::new(28.0, -26.0);
        assert_eq!(calculate_distance(&p, &p), 0.0);

        let a = GPKGPoint::new(0.0, 0.0);
        let b = GPKGPoint::new(1.0, 0.0);
        assert!(close(calculate_bearing(&a, &b), 90.0, 1e-9));
        assert!(close(calculate_bearing(&b, &a), 270.0, 1e-9));
        // one degree of arc on the 6378137 m sphere
        assert!(close(calculate_distance(&a, &b), 111_319.49, 0.01));
    }

    #[test]
    fn bearing_due_north_is_zero() {
        let a = GPKGPoint::new(10.0, 0.0);
        let b = GPKGPoint::new(10.0, 1.0);
        let bearing = calculate_bearing(&a, &b);
        assert!((0.0..360.0).contains(&bearing));
        assert!(close(bearing, 0.0, 1e-9));
    }

    #[test]
    fn bounds_helpers() {
        assert!(create_bounds_from_points(&[]).is_none());
        let pts = [
            GPKGPoint::new(2.0, -1.0),
            GPKGPoint::new(-3.0, 4.0),
            GPKGPoint::new(0.5, 0.5),
        ];
        let b = create_bounds_from_points(&pts).unwrap();
        assert_eq!(b, BoundingBox::new(-3.0, -1.0, 2.0, 4.0));
        assert!(is_point_in_bounds(&GPKGPoint::new(2.0, 4.0), &b));
        assert!(!is_point_in_bounds(&GPKGPoint::new(2.1, 4.0), &b));
        let grown = expand_bounds(&b, &GPKGPoint::new(10.0, 10.0));
        assert_eq!(grown, BoundingBox::new(-3.0, -1.0, 10.0, 10.0));
    }

    #[test]
    fn dms_sign_convention() {
        let lat = to_dms(-33.925, Axis::Latitude);
        assert_eq!(lat.hemisphere, Hemisphere::South);
        assert_eq!((lat.degrees, lat.minutes), (33, 55));
        assert!(close(lat.seconds, 30.0, 1e-6));
        assert!(close(from_dms(&lat), -33.925, 1e-9));

        let lon = to_dms(18.5, Axis::Longitude);
        assert_eq!(lon.hemisphere, Hemisphere::East);
        assert_eq!(lon.to_string(), "18°30'0.00\"E");
        assert_eq!(to_dms(-0.5, Axis::Longitude).hemisphere, Hemisphere::West);
    }

    #[test]
    fn dms_parses_display_form() {
        let dms: Dms = "33°55'30.00\"S".parse().unwrap();
        assert!(close(from_dms(&dms), -33.925, 1e-9));
        assert!("33 55 30".parse::<Dms>().is_err());
    }

    proptest! {
        #[test]
        fn mercator_round_trip(x in -180.0f64..=180.0, y in -85.0f64..=85.0) {
            let p = GPKGPoint::new(x, y);
            let m = transform_point(&p, 4326, 3857, true).unwrap();
            let back = transform_point(&m, 3857, 4326, true).unwrap();
            prop_assert!(close(back.x, x, 1e-9));
            prop_assert!(close(back.y, y, 1e-9));
        }
    }
}
