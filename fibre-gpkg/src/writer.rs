//! Builds home drop GeoPackages from captured records.

use crate::container::{self, format_timestamp};
use crate::gpkg_wkb;
use crate::model::*;
use crate::result::{Error, Result};
use crate::schema::{self, HomeDropRecord, GEOMETRY_COLUMN, PRIMARY_KEY_COLUMN};
use crate::sql::spatial_index_sql;
use crate::srs::{self, defaults::WGS84, DEFAULT_SRS_ID};
use crate::transform::{create_bounds_from_points, transform_feature_geometries};
use crate::types::{BoundingBox, GPKGPoint, GeometryType, Value};
use crate::validate::validate;
use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_TABLE_NAME: &str = "home_drops";
pub const DEFAULT_LAYER_NAME: &str = "Home Drops";
pub const DEFAULT_ORGANIZATION: &str = "Fibre Field Operations";
const DEFAULT_DESCRIPTION: &str = "Home drop installations captured in the field";

pub const ISO_19115_URI: &str = "http://www.isotc211.org/2005/gmd";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub table_name: String,
    /// `gpkg_contents.identifier`, the name desktop tools show for the layer.
    pub layer_name: Option<String>,
    pub description: Option<String>,
    /// EPSG code of the stored geometries. Records are always WGS 84.
    pub target_crs: i64,
    pub include_metadata: bool,
    pub create_spatial_index: bool,
    /// Applied to every feature after the fixed columns, replacing values of
    /// the same name. Unknown names become extra columns.
    pub custom_attributes: IndexMap<String, Value>,
    /// Contact organisation named in the dataset metadata.
    pub organization: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            table_name: DEFAULT_TABLE_NAME.to_owned(),
            layer_name: None,
            description: None,
            target_crs: DEFAULT_SRS_ID,
            include_metadata: true,
            create_spatial_index: false,
            custom_attributes: IndexMap::new(),
            organization: DEFAULT_ORGANIZATION.to_owned(),
        }
    }
}

/// The result of a write.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPackageOutput {
    pub bytes: Vec<u8>,
    /// R-Tree statements to run against the file, when a spatial index was
    /// requested.
    pub spatial_index_sql: Option<String>,
    /// Validator warnings. They never stop a write.
    pub warnings: Vec<String>,
}

/// Maps records into a validated [`Database`] without serializing it.
///
/// Feature order follows record order and ids start at 1.
///
/// With no records the extent is the whole world in the target system:
/// (-180, -90, 180, 90) for EPSG:4326, but the Web Mercator square for
/// EPSG:3857 so that it stays in the units of the declared `srs_id`.
pub fn build_database(records: &[HomeDropRecord], options: &WriteOptions) -> Result<Database> {
    let srs = srs::lookup(options.target_crs).ok_or(Error::UnknownSrs(options.target_crs))?;
    let now = Utc::now().trunc_subsecs(3);

    let mut columns = schema::home_drop_columns();
    for (name, value) in &options.custom_attributes {
        if !columns.iter().any(|c| &c.name == name) {
            columns.push(Column::new(name, schema::infer_column_type(value)));
        }
    }

    let mut features = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let location = match record.location {
            Some(l) => GPKGPoint {
                x: l.longitude,
                y: l.latitude,
                z: l.altitude,
            },
            None => {
                warn!(record = %record.id, "record has no location, writing it at the origin");
                GPKGPoint::origin()
            }
        };
        if !WGS84.contains(location.x, location.y) {
            return Err(Error::OutOfBounds {
                x: location.x,
                y: location.y,
                srs_id: WGS84.id,
            });
        }
        let mut properties = record.to_properties(now)?;
        for (name, value) in &options.custom_attributes {
            properties.insert(name.clone(), value.clone());
        }
        features.push(Feature {
            id: i as i64 + 1,
            geometry: gpkg_wkb::encode(&location),
            properties,
        });
    }
    let features = transform_feature_geometries(&features, DEFAULT_SRS_ID, srs.id, true)?;
    let points = features
        .iter()
        .map(Feature::point)
        .collect::<Result<Vec<GPKGPoint>>>()?;

    // always recomputed from what was encoded
    let extent = create_bounds_from_points(&points)
        .or(srs.bounds)
        .unwrap_or_else(BoundingBox::world);
    debug!(features = features.len(), ?extent, "mapped records");

    let with_z = points.iter().filter(|p| p.has_z()).count();
    let z = match with_z {
        0 => MZOptions::Prohibited,
        n if n == points.len() => MZOptions::Mandatory,
        _ => MZOptions::Optional,
    };

    let table_name = options.table_name.clone();
    let mut db = Database {
        tables: vec![Table {
            name: table_name.clone(),
            columns,
            geometry_column: Some(GEOMETRY_COLUMN.to_owned()),
            spatial_index: options.create_spatial_index,
            features,
            constraints: Vec::new(),
        }],
        spatial_ref_systems: vec![srs.clone()],
        geometry_columns: vec![GeometryColumn {
            table_name: table_name.clone(),
            column_name: GEOMETRY_COLUMN.to_owned(),
            geometry_type: if z == MZOptions::Mandatory {
                GeometryType::PointZ
            } else {
                GeometryType::Point
            },
            srs_id: srs.id,
            z,
            m: MZOptions::Prohibited,
        }],
        contents: vec![Contents {
            table_name: table_name.clone(),
            data_type: GPKGDataType::Features,
            identifier: options
                .layer_name
                .clone()
                .unwrap_or_else(|| DEFAULT_LAYER_NAME.to_owned()),
            description: options
                .description
                .clone()
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_owned()),
            last_change: now,
            bounds: Some(extent),
            srs_id: Some(srs.id),
        }],
        metadata: Vec::new(),
        extensions: Vec::new(),
    };

    if options.include_metadata {
        let entry = MetadataEntry {
            id: db.next_metadata_id(),
            scope: MetadataScope::Dataset,
            standard_uri: ISO_19115_URI.to_owned(),
            mime_type: "text/xml".to_owned(),
            content: dataset_metadata_xml(&db.contents[0], &options.organization, now),
            target: MetadataTarget::GeoPackage,
            timestamp: now,
        };
        db.metadata.push(entry);
        db.declare_extension(Extension::metadata());
    }
    if options.create_spatial_index {
        db.declare_extension(Extension::rtree(&table_name, GEOMETRY_COLUMN));
    }

    let report = validate(&db);
    for w in &report.warnings {
        warn!(warning = %w, "validation warning");
    }
    report.into_result()?;
    Ok(db)
}

/// Writes `records` into GeoPackage bytes.
///
/// Any failure is reported as [`Error::WriteError`] wrapping its cause,
/// except validation failures which list every violation.
pub fn write_geopackage(records: &[HomeDropRecord], options: &WriteOptions) -> Result<GeoPackageOutput> {
    let db = build_database(records, options).map_err(Error::write)?;
    let bytes = container::serialize_database(&db).map_err(Error::write)?;
    let output = GeoPackageOutput {
        bytes,
        spatial_index_sql: index_sql(options),
        warnings: validate(&db).warnings,
    };
    info!(
        table = %options.table_name,
        features = records.len(),
        bytes = output.bytes.len(),
        "wrote GeoPackage"
    );
    Ok(output)
}

/// Writes `records` into a new GeoPackage file at `path`.
///
/// Returns the R-Tree statements when a spatial index was requested.
pub fn write_geopackage_to_path<P: AsRef<Path>>(
    records: &[HomeDropRecord],
    options: &WriteOptions,
    path: P,
) -> Result<Option<String>> {
    let db = build_database(records, options).map_err(Error::write)?;
    container::write_database_to_path(&db, &path).map_err(Error::write)?;
    info!(path = %path.as_ref().display(), features = records.len(), "wrote GeoPackage");
    Ok(index_sql(options))
}

fn index_sql(options: &WriteOptions) -> Option<String> {
    options
        .create_spatial_index
        .then(|| spatial_index_sql(&options.table_name, GEOMETRY_COLUMN, PRIMARY_KEY_COLUMN))
}

pub(crate) fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// ISO 19115 dataset description for the whole container.
pub fn dataset_metadata_xml(contents: &Contents, organization: &str, now: DateTime<Utc>) -> String {
    let date = now.format("%Y-%m-%d").to_string();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:fileIdentifier><gco:CharacterString>{id}</gco:CharacterString></gmd:fileIdentifier>
  <gmd:language><gco:CharacterString>eng</gco:CharacterString></gmd:language>
  <gmd:contact>
    <gmd:CI_ResponsibleParty>
      <gmd:organisationName><gco:CharacterString>{org}</gco:CharacterString></gmd:organisationName>
      <gmd:role><gmd:CI_RoleCode codeList="http://www.isotc211.org/2005/resources/Codelist/gmxCodelists.xml#CI_RoleCode" codeListValue="pointOfContact">pointOfContact</gmd:CI_RoleCode></gmd:role>
    </gmd:CI_ResponsibleParty>
  </gmd:contact>
  <gmd:dateStamp><gco:DateTime>{stamp}</gco:DateTime></gmd:dateStamp>
  <gmd:identificationInfo>
    <gmd:MD_DataIdentification>
      <gmd:citation>
        <gmd:CI_Citation>
          <gmd:title><gco:CharacterString>{title}</gco:CharacterString></gmd:title>
          <gmd:date>
            <gmd:CI_Date>
              <gmd:date><gco:Date>{date}</gco:Date></gmd:date>
              <gmd:dateType><gmd:CI_DateTypeCode codeList="http://www.isotc211.org/2005/resources/Codelist/gmxCodelists.xml#CI_DateTypeCode" codeListValue="creation">creation</gmd:CI_DateTypeCode></gmd:dateType>
            </gmd:CI_Date>
          </gmd:date>
        </gmd:CI_Citation>
      </gmd:citation>
      <gmd:abstract><gco:CharacterString>{abstract_}</gco:CharacterString></gmd:abstract>
    </gmd:MD_DataIdentification>
  </gmd:identificationInfo>
</gmd:MD_Metadata>
"#,
        id = uuid::Uuid::new_v4(),
        org = xml_escape(organization),
        stamp = format_timestamp(&now),
        title = xml_escape(&contents.identifier),
        date = date,
        abstract_ = xml_escape(&contents.description),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CapturedLocation, CustomerInfo};
    use crate::srs::WEB_MERCATOR_EXTENT;

    fn record(id: &str, lon: f64, lat: f64) -> HomeDropRecord {
        HomeDropRecord {
            id: id.into(),
            project_id: "P-100".into(),
            status: "captured".into(),
            customer: CustomerInfo {
                name: Some(format!("Customer {}", id)),
                ..Default::default()
            },
            location: Some(CapturedLocation {
                latitude: lat,
                longitude: lon,
                altitude: None,
                accuracy: Some(4.0),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn extent_is_tight() {
        let records = vec![
            record("a", 18.4, -33.9),
            record("b", 28.0, -26.2),
            record("c", 31.0, -29.8),
        ];
        let db = build_database(&records, &WriteOptions::default()).unwrap();
        assert_eq!(
            db.contents[0].bounds,
            Some(BoundingBox::new(18.4, -33.9, 31.0, -26.2))
        );
        assert_eq!(db.contents[0].identifier, DEFAULT_LAYER_NAME);
        assert_eq!(db.geometry_columns[0].z, MZOptions::Prohibited);
        let ids: Vec<i64> = db.tables[0].features.iter().map(|f| f.id).collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[test]
    fn no_records_gives_whole_earth() {
        let db = build_database(&[], &WriteOptions::default()).unwrap();
        assert_eq!(db.contents[0].bounds, Some(BoundingBox::new(-180.0, -90.0, 180.0, 90.0)));
        assert!(db.tables[0].features.is_empty());
    }

    #[test]
    fn no_records_in_mercator_gives_mercator_square() {
        let options = WriteOptions {
            target_crs: 3857,
            ..Default::default()
        };
        let db = build_database(&[], &options).unwrap();
        let e = srs::WEB_MERCATOR_EXTENT;
        assert_eq!(db.contents[0].bounds, Some(BoundingBox::new(-e, -e, e, e)));
        assert_eq!(db.contents[0].srs_id, Some(3857));
    }

    #[test]
    fn missing_location_defaults_to_origin() {
        let mut r = record("a", 10.0, 10.0);
        r.location = None;
        let db = build_database(&[r, record("b", 10.0, 10.0)], &WriteOptions::default()).unwrap();
        assert_eq!(db.tables[0].features.len(), 2);
        assert_eq!(db.tables[0].features[0].point().unwrap(), GPKGPoint::origin());
        assert_eq!(
            db.contents[0].bounds,
            Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0))
        );
    }

    #[test]
    fn mercator_target() {
        let options = WriteOptions {
            target_crs: 3857,
            ..Default::default()
        };
        let db = build_database(&[record("a", 180.0, 0.0)], &options).unwrap();
        assert_eq!(db.spatial_ref_systems[0].id, 3857);
        assert_eq!(db.geometry_columns[0].srs_id, 3857);
        let p = db.tables[0].features[0].point().unwrap();
        assert!((p.x - WEB_MERCATOR_EXTENT).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_location_fails_the_write() {
        let err = write_geopackage(&[record("a", 200.0, 0.0)], &WriteOptions::default()).unwrap_err();
        match err {
            Error::WriteError(cause) => assert!(matches!(*cause, Error::OutOfBounds { .. })),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unknown_crs_fails_the_write() {
        let options = WriteOptions {
            target_crs: 27700,
            ..Default::default()
        };
        assert!(matches!(
            write_geopackage(&[], &options),
            Err(Error::WriteError(_))
        ));
    }

    #[test]
    fn custom_attributes_override_and_extend() {
        let mut custom = IndexMap::new();
        custom.insert("status".to_owned(), Value::from("approved"));
        custom.insert("crew".to_owned(), Value::Integer(4));
        let options = WriteOptions {
            custom_attributes: custom,
            ..Default::default()
        };
        let db = build_database(&[record("a", 1.0, 1.0)], &options).unwrap();
        let table = &db.tables[0];
        assert_eq!(table.column("crew").unwrap().column_type, ColumnType::Integer);
        let f = &table.features[0];
        assert_eq!(f.property("status"), Some(&Value::from("approved")));
        assert_eq!(f.property("crew"), Some(&Value::Integer(4)));
        // overriding keeps the column position
        assert_eq!(f.properties.get_index_of("status"), Some(5));
    }

    #[test]
    fn altitude_sets_z_flag() {
        let mut high = record("a", 1.0, 1.0);
        if let Some(l) = high.location.as_mut() {
            l.altitude = Some(1500.0);
        }
        let db = build_database(&[high.clone()], &WriteOptions::default()).unwrap();
        assert_eq!(db.geometry_columns[0].z, MZOptions::Mandatory);
        assert_eq!(db.geometry_columns[0].geometry_type, GeometryType::PointZ);
        let db = build_database(&[high, record("b", 2.0, 2.0)], &WriteOptions::default()).unwrap();
        assert_eq!(db.geometry_columns[0].z, MZOptions::Optional);
    }

    #[test]
    fn metadata_document() {
        let db = build_database(&[record("a", 1.0, 1.0)], &WriteOptions::default()).unwrap();
        assert_eq!(db.metadata.len(), 1);
        let m = &db.metadata[0];
        assert_eq!(m.target, MetadataTarget::GeoPackage);
        assert!(m.content.contains("<gco:CharacterString>eng</gco:CharacterString>"));
        assert!(m.content.contains(DEFAULT_ORGANIZATION));
        assert!(db.has_extension(METADATA_EXTENSION, None));

        let options = WriteOptions {
            include_metadata: false,
            layer_name: Some("Drops & Poles".into()),
            ..Default::default()
        };
        let db = build_database(&[], &options).unwrap();
        assert!(db.metadata.is_empty());
        assert!(dataset_metadata_xml(&db.contents[0], "A<B", Utc::now()).contains("Drops &amp; Poles"));
    }

    #[test]
    fn spatial_index_is_a_separate_artifact() {
        let options = WriteOptions {
            create_spatial_index: true,
            ..Default::default()
        };
        let out = write_geopackage(&[record("a", 1.0, 1.0)], &options).unwrap();
        let sql = out.spatial_index_sql.unwrap();
        assert!(sql.contains("CREATE VIRTUAL TABLE \"rtree_home_drops_geom\" USING rtree"));
        assert!(!out.bytes.is_empty());

        let plain = write_geopackage(&[record("a", 1.0, 1.0)], &WriteOptions::default()).unwrap();
        assert!(plain.spatial_index_sql.is_none());
    }

    #[test]
    fn writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drops.gpkg");
        let sql = write_geopackage_to_path(&[record("a", 1.0, 1.0)], &WriteOptions::default(), &path).unwrap();
        assert!(sql.is_none());
        assert!(path.exists());
    }
}
