use crate::result::{Error, Result};
use crate::types::*;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use std::io::{Cursor, Write};

/// Byte order marker + geometry type code.
const WKB_HEADER_LEN: usize = 5;

/// Length of a 2D point in WKB.
pub const WKB_POINT_LEN: usize = WKB_HEADER_LEN + 16;

/// Length of a point with altitude in WKB.
pub const WKB_POINT_Z_LEN: usize = WKB_HEADER_LEN + 24;

/// Encodes a point as little endian WKB.
///
/// The type code is 1 for a plain point and 1001 when the point carries an
/// altitude, so a 2D point is always exactly 21 bytes.
pub fn encode(point: &GPKGPoint) -> Vec<u8> {
    let (code, len) = match point.z {
        Some(_) => (GeometryType::PointZ.code(), WKB_POINT_Z_LEN),
        None => (GeometryType::Point.code(), WKB_POINT_LEN),
    };
    let mut buf = vec![0u8; len];
    buf[0] = 1;
    LittleEndian::write_u32(&mut buf[1..WKB_HEADER_LEN], code);
    LittleEndian::write_f64(&mut buf[WKB_HEADER_LEN..WKB_HEADER_LEN + 8], point.x);
    LittleEndian::write_f64(&mut buf[WKB_HEADER_LEN + 8..WKB_HEADER_LEN + 16], point.y);
    if let Some(z) = point.z {
        LittleEndian::write_f64(&mut buf[WKB_HEADER_LEN + 16..], z);
    }
    buf
}

/// Decodes a WKB point.
///
/// An empty buffer decodes to the origin rather than failing, callers must
/// treat (0, 0) as possibly meaning "no geometry recorded".
pub fn decode(bytes: &[u8]) -> Result<GPKGPoint> {
    if bytes.is_empty() {
        return Ok(GPKGPoint::origin());
    }
    if bytes.len() < WKB_HEADER_LEN {
        return Err(Error::GeomDecodeError(format!(
            "buffer of {} bytes is shorter than the WKB header",
            bytes.len()
        )));
    }
    let mut rdr = Cursor::new(bytes);
    GPKGPoint::read_from_wkb(&mut rdr)
}

pub(crate) trait FullWKB: Sized {
    fn write_as_wkb(&self, w: &mut impl Write) -> Result<()>;
    fn read_from_wkb(r: &mut Cursor<&[u8]>) -> Result<Self>;
}

impl FullWKB for GPKGPoint {
    fn write_as_wkb(&self, w: &mut impl Write) -> Result<()> {
        // we will always write as little endian
        w.write_u8(1)?;
        match self.z {
            Some(z) => {
                w.write_u32::<LittleEndian>(GeometryType::PointZ.code())?;
                w.write_f64::<LittleEndian>(self.x)?;
                w.write_f64::<LittleEndian>(self.y)?;
                w.write_f64::<LittleEndian>(z)?;
            }
            None => {
                w.write_u32::<LittleEndian>(GeometryType::Point.code())?;
                w.write_f64::<LittleEndian>(self.x)?;
                w.write_f64::<LittleEndian>(self.y)?;
            }
        }
        Ok(())
    }

    fn read_from_wkb(r: &mut Cursor<&[u8]>) -> Result<Self> {
        match r.read_u8()? {
            0 => read_point::<BigEndian>(r),
            1 => read_point::<LittleEndian>(r),
            other => Err(Error::GeomDecodeError(format!(
                "invalid byte order marker {}",
                other
            ))),
        }
    }
}

fn read_point<T: ByteOrder>(r: &mut Cursor<&[u8]>) -> Result<GPKGPoint> {
    let code = r.read_u32::<T>()?;
    let (needed, has_z) = match GeometryType::from_code(code) {
        Some(GeometryType::Point) => (WKB_POINT_LEN, false),
        Some(GeometryType::PointZ) => (WKB_POINT_Z_LEN, true),
        _ => return Err(Error::UnsupportedGeometryType(code)),
    };
    let available = r.get_ref().len();
    if available < needed {
        return Err(Error::GeomDecodeError(format!(
            "geometry type {} needs {} bytes, got {}",
            code, needed, available
        )));
    }
    let x = r.read_f64::<T>()?;
    let y = r.read_f64::<T>()?;
    let z = if has_z { Some(r.read_f64::<T>()?) } else { None };
    Ok(GPKGPoint { x, y, z })
}

enum EnvelopeType {
    Missing,
    XY,
    XYZ,
    XYM,
    XYZM,
}

impl EnvelopeType {
    fn len(&self) -> usize {
        match self {
            EnvelopeType::Missing => 0,
            EnvelopeType::XY => 32,
            EnvelopeType::XYZ | EnvelopeType::XYM => 48,
            EnvelopeType::XYZM => 64,
        }
    }
}

struct GPKGGeomFlags {
    extended: bool,
    empty_geom: bool,
    little_endian: bool,
    envelope: EnvelopeType,
}

impl GPKGGeomFlags {
    // https://www.geopackage.org/spec130/#flags_layout
    fn from_byte(b: u8) -> Result<Self> {
        let extended = ((b >> 5) & 1) > 0;
        let empty_geom = ((b >> 4) & 1) > 0;
        let little_endian = (b & 1) > 0;
        let envelope = match (b >> 1) & 0b111 {
            0 => EnvelopeType::Missing,
            1 => EnvelopeType::XY,
            2 => EnvelopeType::XYZ,
            3 => EnvelopeType::XYM,
            4 => EnvelopeType::XYZM,
            other => {
                return Err(Error::GeomDecodeError(format!(
                    "invalid envelope indicator {}",
                    other
                )))
            }
        };
        Ok(GPKGGeomFlags {
            extended,
            empty_geom,
            little_endian,
            envelope,
        })
    }

    fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        let envelope_val = match self.envelope {
            EnvelopeType::Missing => 0,
            EnvelopeType::XY => 1,
            EnvelopeType::XYZ => 2,
            EnvelopeType::XYM => 3,
            EnvelopeType::XYZM => 4,
        };
        flags |= (self.extended as u8) << 5;
        flags |= (self.empty_geom as u8) << 4;
        flags |= envelope_val << 1;
        flags |= self.little_endian as u8;

        flags
    }
}

/// A feature geometry as stored in a GeoPackage: the standard binary header
/// followed by the WKB body.
///
/// An empty `wkb` marks an empty geometry. It is written with the empty flag
/// set and a NaN point body, as the GeoPackage encoding requires.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPackageGeometry {
    pub srs_id: i32,
    pub wkb: Vec<u8>,
}

impl GeoPackageGeometry {
    pub fn new(srs_id: i32, wkb: Vec<u8>) -> Self {
        GeoPackageGeometry { srs_id, wkb }
    }

    /// Encodes the header and body according to the GeoPackage
    /// [specification](https://www.geopackage.org/spec130/#gpb_spec)
    pub fn to_gpb(&self) -> Result<Vec<u8>> {
        let empty = self.wkb.is_empty();
        let point = match empty {
            true => None,
            false => Some(
                decode(&self.wkb).map_err(|e| Error::GeomEncodeError(e.to_string()))?,
            ),
        };
        let flags = GPKGGeomFlags {
            extended: false,
            empty_geom: empty,
            little_endian: true,
            envelope: if empty {
                EnvelopeType::Missing
            } else {
                EnvelopeType::XY
            },
        };
        let mut out: Vec<u8> = Vec::with_capacity(8 + 32 + self.wkb.len());
        // magic number that is GP in ASCII
        out.extend_from_slice(&[0x47, 0x50]);
        // version number, 0 means version 1
        out.push(0);
        out.push(flags.to_byte());
        out.write_i32::<LittleEndian>(self.srs_id)?;
        match point {
            Some(p) => {
                // envelope order is minx, maxx, miny, maxy
                out.write_f64::<LittleEndian>(p.x)?;
                out.write_f64::<LittleEndian>(p.x)?;
                out.write_f64::<LittleEndian>(p.y)?;
                out.write_f64::<LittleEndian>(p.y)?;
                out.extend_from_slice(&self.wkb);
            }
            None => {
                GPKGPoint::new(f64::NAN, f64::NAN).write_as_wkb(&mut out)?;
            }
        }
        Ok(out)
    }

    pub fn from_gpb(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::GeomDecodeError(format!(
                "GeoPackage geometry header needs 8 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0..2] != [0x47, 0x50] {
            return Err(Error::GeomDecodeError(
                "missing GeoPackage geometry magic".to_owned(),
            ));
        }
        let flags = GPKGGeomFlags::from_byte(bytes[3])?;
        let srs_id = match flags.little_endian {
            true => LittleEndian::read_i32(&bytes[4..8]),
            false => BigEndian::read_i32(&bytes[4..8]),
        };
        if flags.empty_geom {
            return Ok(GeoPackageGeometry::new(srs_id, Vec::new()));
        }
        let geom_start = 8 + flags.envelope.len();
        if bytes.len() < geom_start {
            return Err(Error::GeomDecodeError(format!(
                "GeoPackage geometry of {} bytes is shorter than its envelope",
                bytes.len()
            )));
        }
        Ok(GeoPackageGeometry::new(srs_id, bytes[geom_start..].to_vec()))
    }
}

impl ToSql for GeoPackageGeometry {
    #[inline]
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_gpb().map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(e))
        })?))
    }
}

impl FromSql for GeoPackageGeometry {
    #[inline]
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bytes = value.as_blob()?;
        GeoPackageGeometry::from_gpb(bytes)
            .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}
