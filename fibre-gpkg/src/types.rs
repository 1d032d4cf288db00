use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point position, optionally carrying an altitude.
///
/// For geographic systems `x` is the longitude and `y` the latitude, both in
/// decimal degrees. For projected systems both are in the system's linear unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GPKGPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl GPKGPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        GPKGPoint { x, y, z: None }
    }

    pub const fn with_z(x: f64, y: f64, z: f64) -> Self {
        GPKGPoint { x, y, z: Some(z) }
    }

    /// The value decoded from an empty geometry blob.
    ///
    /// Indistinguishable from a genuine point at the origin.
    pub const fn origin() -> Self {
        GPKGPoint::new(0.0, 0.0)
    }

    pub fn has_z(&self) -> bool {
        self.z.is_some()
    }
}

impl From<geo_types::Point<f64>> for GPKGPoint {
    fn from(p: geo_types::Point<f64>) -> Self {
        GPKGPoint::new(p.x(), p.y())
    }
}

impl From<GPKGPoint> for geo_types::Point<f64> {
    fn from(p: GPKGPoint) -> Self {
        geo_types::Point::new(p.x, p.y)
    }
}

/// An axis aligned envelope, matching the min/max columns of `gpkg_contents`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Degenerate box holding a single point.
    pub fn from_point(p: &GPKGPoint) -> Self {
        BoundingBox::new(p.x, p.y, p.x, p.y)
    }

    /// The whole WGS 84 world, used as the extent of an empty layer.
    pub const fn world() -> Self {
        BoundingBox::new(-180.0, -90.0, 180.0, 90.0)
    }

    pub fn corners(&self) -> [GPKGPoint; 4] {
        [
            GPKGPoint::new(self.min_x, self.min_y),
            GPKGPoint::new(self.min_x, self.max_y),
            GPKGPoint::new(self.max_x, self.min_y),
            GPKGPoint::new(self.max_x, self.max_y),
        ]
    }
}

impl From<BoundingBox> for geo_types::Rect<f64> {
    fn from(b: BoundingBox) -> Self {
        geo_types::Rect::new(
            geo_types::coord! { x: b.min_x, y: b.min_y },
            geo_types::coord! { x: b.max_x, y: b.max_y },
        )
    }
}

impl From<geo_types::Rect<f64>> for BoundingBox {
    fn from(r: geo_types::Rect<f64>) -> Self {
        BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y)
    }
}

/// WKB geometry type codes (ISO flavour, Z variants add 1000).
///
/// Only the point types can be encoded or decoded, the rest are named so that
/// decoding reports them precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    PointZ,
}

impl GeometryType {
    pub fn code(&self) -> u32 {
        match self {
            GeometryType::Point => 1,
            GeometryType::LineString => 2,
            GeometryType::Polygon => 3,
            GeometryType::MultiPoint => 4,
            GeometryType::MultiLineString => 5,
            GeometryType::MultiPolygon => 6,
            GeometryType::GeometryCollection => 7,
            GeometryType::PointZ => 1001,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let t = match code {
            1 => GeometryType::Point,
            2 => GeometryType::LineString,
            3 => GeometryType::Polygon,
            4 => GeometryType::MultiPoint,
            5 => GeometryType::MultiLineString,
            6 => GeometryType::MultiPolygon,
            7 => GeometryType::GeometryCollection,
            1001 => GeometryType::PointZ,
            _ => return None,
        };
        Some(t)
    }

    /// Name used in `gpkg_geometry_columns.geometry_type_name`.
    pub fn gpkg_name(&self) -> &'static str {
        match self {
            GeometryType::Point | GeometryType::PointZ => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
            GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }
}

/// A single property value, one variant per SQLite storage class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(b as i64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    #[inline]
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        };
        Ok(out)
    }
}

impl FromSql for Value {
    #[inline]
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_cover_all_four() {
        let b = BoundingBox::new(0.0, 1.0, 2.0, 3.0);
        let corners = b.corners();
        assert!(corners.contains(&GPKGPoint::new(0.0, 3.0)));
        assert!(corners.contains(&GPKGPoint::new(2.0, 1.0)));
    }

    #[test]
    fn rect_conversion_keeps_extent() {
        let b = BoundingBox::new(-10.0, -5.0, 10.0, 5.0);
        let r: geo_types::Rect<f64> = b.into();
        assert_eq!(BoundingBox::from(r), b);
    }

    #[test]
    fn geometry_codes() {
        assert_eq!(GeometryType::from_code(1001), Some(GeometryType::PointZ));
        assert_eq!(GeometryType::PointZ.gpkg_name(), "POINT");
        assert_eq!(GeometryType::from_code(17), None);
    }

    #[test]
    fn value_from_json_is_untagged() {
        let v: Vec<Value> = serde_json::from_str(r#"[null, 3, 2.5, "a"]"#).unwrap();
        assert_eq!(
            v,
            vec![
                Value::Null,
                Value::Integer(3),
                Value::Real(2.5),
                Value::Text("a".into())
            ]
        );
    }

    #[test]
    fn bool_maps_to_integer() {
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(None::<String>), Value::Null);
    }
}
