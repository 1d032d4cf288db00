use crate::types::BoundingBox;
use std::borrow::Cow;

/// Represents a spatial reference system as it appears in the GeoPackage [specification](https://www.geopackage.org/spec130/#gpkg_spatial_ref_sys_cols)
///
/// Registry entries are `'static` constants. Rows parsed from a container own
/// their strings and carry no bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialRefSys {
    pub name: Cow<'static, str>,
    pub id: i64,
    pub organization: Cow<'static, str>,
    pub organization_coordsys_id: i64,
    pub definition: Cow<'static, str>,
    pub description: Cow<'static, str>,
    /// Valid coordinate range in the system's own units.
    pub bounds: Option<BoundingBox>,
}

impl SpatialRefSys {
    /// Whether the point lies inside the declared bounds, edges included.
    ///
    /// Edges get a tolerance of [`EDGE_TOLERANCE`] relative to their
    /// magnitude, so a point projected onto an edge and back still fits.
    /// Systems without bounds accept everything.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let within = |v: f64, lo: f64, hi: f64| {
            v >= lo - lo.abs() * EDGE_TOLERANCE && v <= hi + hi.abs() * EDGE_TOLERANCE
        };
        match &self.bounds {
            Some(b) => within(x, b.min_x, b.max_x) && within(y, b.min_y, b.max_y),
            None => true,
        }
    }
}

/// Half the circumference of the WGS 84 sphere used by Web Mercator,
/// 20 037 508.3427892 m.
pub const WEB_MERCATOR_EXTENT: f64 = std::f64::consts::PI * 6_378_137.0;

pub const EDGE_TOLERANCE: f64 = 1e-12;

pub mod defaults {
    use super::{SpatialRefSys, WEB_MERCATOR_EXTENT};
    use crate::types::BoundingBox;
    use std::borrow::Cow::Borrowed;

    pub const WGS84: SpatialRefSys = SpatialRefSys {
        name: Borrowed("WGS 84 geodetic"),
        id: 4326,
        organization: Borrowed("EPSG"),
        organization_coordsys_id: 4326,
        definition: Borrowed("GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4326\"]]"),
        description: Borrowed("longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"),
        bounds: Some(BoundingBox::new(-180.0, -90.0, 180.0, 90.0)),
    };
    pub const WEB_MERCATOR: SpatialRefSys = SpatialRefSys {
        name: Borrowed("WGS 84 / Pseudo-Mercator"),
        id: 3857,
        organization: Borrowed("EPSG"),
        organization_coordsys_id: 3857,
        definition: Borrowed("PROJCS[\"WGS 84 / Pseudo-Mercator\",GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4326\"]],PROJECTION[\"Mercator_1SP\"],PARAMETER[\"central_meridian\",0],PARAMETER[\"scale_factor\",1],PARAMETER[\"false_easting\",0],PARAMETER[\"false_northing\",0],UNIT[\"metre\",1,AUTHORITY[\"EPSG\",\"9001\"]],AXIS[\"Easting\",EAST],AXIS[\"Northing\",NORTH],EXTENSION[\"PROJ4\",\"+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +wktext +no_defs\"],AUTHORITY[\"EPSG\",\"3857\"]]"),
        description: Borrowed("spherical Mercator projection used by web map tiles, coordinates in metres"),
        bounds: Some(BoundingBox::new(
            -WEB_MERCATOR_EXTENT,
            -WEB_MERCATOR_EXTENT,
            WEB_MERCATOR_EXTENT,
            WEB_MERCATOR_EXTENT,
        )),
    };
    pub const GEOGRAPHIC: SpatialRefSys = SpatialRefSys {
        name: Borrowed("undefined geographic SRS"),
        id: 0,
        organization: Borrowed("NONE"),
        organization_coordsys_id: 0,
        definition: Borrowed("undefined"),
        description: Borrowed("undefined geographic coordinate reference system"),
        bounds: None,
    };
    pub const CARTESIAN: SpatialRefSys = SpatialRefSys {
        name: Borrowed("undefined cartesian SRS"),
        id: -1,
        organization: Borrowed("NONE"),
        organization_coordsys_id: -1,
        definition: Borrowed("undefined"),
        description: Borrowed("undefined cartesian coordinate reference system"),
        bounds: None,
    };
}

/// Every system the registry knows, including the two undefined systems the
/// GeoPackage standard requires in each file.
pub static REGISTRY: [SpatialRefSys; 4] = [
    defaults::WGS84,
    defaults::WEB_MERCATOR,
    defaults::CARTESIAN,
    defaults::GEOGRAPHIC,
];

/// The default system for captured data.
pub const DEFAULT_SRS_ID: i64 = 4326;

pub fn lookup(id: i64) -> Option<&'static SpatialRefSys> {
    REGISTRY.iter().find(|srs| srs.id == id)
}

/// Codes between which coordinates can be transformed.
pub fn supported_codes() -> [i64; 2] {
    [defaults::WGS84.id, defaults::WEB_MERCATOR.id]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_required_systems() {
        assert_eq!(lookup(4326).unwrap().name, "WGS 84 geodetic");
        assert_eq!(lookup(3857).unwrap().organization, "EPSG");
        assert!(lookup(-1).is_some());
        assert!(lookup(0).is_some());
        assert!(lookup(27700).is_none());
    }

    #[test]
    fn bounds_are_inclusive() {
        let wgs = lookup(4326).unwrap();
        assert!(wgs.contains(180.0, -90.0));
        assert!(!wgs.contains(180.0001, 0.0));
        let merc = lookup(3857).unwrap();
        assert!(merc.contains(WEB_MERCATOR_EXTENT, 0.0));
        assert!(!merc.contains(0.0, 2.1e7));
    }

    #[test]
    fn transformable_codes_are_registered() {
        assert_eq!(supported_codes(), [4326, 3857]);
        assert!(supported_codes().iter().all(|c| lookup(*c).is_some()));
    }

    #[test]
    fn undefined_systems_accept_anything() {
        assert!(defaults::CARTESIAN.contains(1e12, -1e12));
    }
}
