//! Reads home drop GeoPackages back into the container model.
//!
//! Filtering happens after the geometries are decoded, in the coordinate
//! system the table declares. Conversion to `target_crs` runs last and
//! produces new features.

use crate::container::{self, ScratchCopy};
use crate::gpkg_wkb;
use crate::model::*;
use crate::result::{Error, Result};
use crate::srs::{self, DEFAULT_SRS_ID};
use crate::transform::{create_bounds_from_points, transform_point};
use crate::types::{BoundingBox, GPKGPoint, Value};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// The accepted values of one attribute filter key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Matches when the property equals any of the values.
    AnyOf(Vec<Value>),
    /// Text matches as a case-insensitive substring, anything else by
    /// equality.
    Single(Value),
}

impl FilterValue {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FilterValue::AnyOf(values) => values.iter().any(|v| v == value),
            FilterValue::Single(Value::Text(needle)) => match value {
                Value::Text(hay) => hay.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            FilterValue::Single(expected) => expected == value,
        }
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Single(v)
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Single(s.into())
    }
}

impl From<i64> for FilterValue {
    fn from(i: i64) -> Self {
        FilterValue::Single(i.into())
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(values: Vec<Value>) -> Self {
        FilterValue::AnyOf(values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Defaults to the first feature table listed in `gpkg_contents`.
    pub target_table: Option<String>,
    /// Closed box in the table's own coordinate system.
    pub spatial_filter: Option<BoundingBox>,
    /// Every key has to match.
    pub attribute_filter: IndexMap<String, FilterValue>,
    pub target_crs: Option<i64>,
    /// Marks the table as spatially indexed in the returned model.
    pub create_spatial_index: bool,
    /// Fail on undecodable geometries instead of skipping them.
    pub validate_geometry: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            target_table: None,
            spatial_filter: None,
            attribute_filter: IndexMap::new(),
            target_crs: None,
            create_spatial_index: false,
            validate_geometry: true,
        }
    }
}

/// Reads one table of a GeoPackage.
///
/// The returned database holds only that table with its SRS, geometry column,
/// contents row, extensions and metadata. Failures are [`Error::ReadError`]
/// wrapping the cause.
pub fn read_geopackage(bytes: &[u8], options: &ReadOptions) -> Result<Database> {
    let read = || {
        let copy = ScratchCopy::new(bytes)?;
        read_path(copy.path(), options)
    };
    read().map_err(Error::read)
}

pub fn read_geopackage_from_path<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Database> {
    read_path(path.as_ref(), options).map_err(Error::read)
}

/// Names of the feature and attribute tables, in `gpkg_contents` order.
pub fn list_tables(bytes: &[u8]) -> Result<Vec<String>> {
    let list = || {
        let copy = ScratchCopy::new(bytes)?;
        let conn = container::open_checked(copy.path())?;
        container::list_tables(&conn)
    };
    list().map_err(Error::read)
}

fn read_path(path: &Path, options: &ReadOptions) -> Result<Database> {
    let conn = container::open_checked(path)?;
    let table_name = match &options.target_table {
        Some(t) => t.clone(),
        None => container::list_tables(&conn)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TableNotFound("no feature or attribute table".to_owned()))?,
    };
    let db = container::read_database(&conn, Some(&table_name))?;
    debug!(table = %table_name, "located table");
    let db = apply_options(db, &table_name, options)?;
    info!(
        table = %table_name,
        features = db.tables.first().map_or(0, |t| t.features.len()),
        "read GeoPackage"
    );
    Ok(db)
}

fn check_filters(table: &Table, options: &ReadOptions) -> Result<()> {
    for key in options.attribute_filter.keys() {
        if table.column(key).is_none() {
            return Err(Error::InvalidFilter(format!(
                "'{}' is not a column of '{}'",
                key, table.name
            )));
        }
    }
    if let Some(b) = &options.spatial_filter {
        let ordered = b.min_x <= b.max_x && b.min_y <= b.max_y;
        if !ordered {
            return Err(Error::InvalidFilter(format!(
                "bounding box ({}, {}, {}, {}) has its minimum above its maximum",
                b.min_x, b.min_y, b.max_x, b.max_y
            )));
        }
    }
    Ok(())
}

fn attribute_value(table: &Table, feature: &Feature, key: &str) -> Option<Value> {
    match feature.property(key) {
        Some(v) => Some(v.clone()),
        None if table.primary_key().map(|c| c.name.as_str()) == Some(key) => {
            Some(Value::Integer(feature.id))
        }
        None => None,
    }
}

fn apply_options(mut db: Database, table_name: &str, options: &ReadOptions) -> Result<Database> {
    let source_srs = db
        .geometry_column_for(table_name)
        .map(|g| g.srs_id)
        .unwrap_or(DEFAULT_SRS_ID);
    let mut table = db
        .tables
        .pop()
        .ok_or_else(|| Error::TableNotFound(table_name.to_owned()))?;
    check_filters(&table, options)?;

    let has_geometry = table.geometry_column.is_some();
    let mut kept = Vec::with_capacity(table.features.len());
    for feature in std::mem::take(&mut table.features) {
        let point = if has_geometry {
            match gpkg_wkb::decode(&feature.geometry) {
                Ok(p) => Some(p),
                Err(e) if options.validate_geometry => return Err(e),
                Err(e) => {
                    warn!(table = %table.name, feature = feature.id, error = %e, "undecodable geometry");
                    None
                }
            }
        } else {
            None
        };
        if let Some(b) = &options.spatial_filter {
            match point {
                Some(p) if p.x >= b.min_x && p.x <= b.max_x && p.y >= b.min_y && p.y <= b.max_y => {}
                _ => continue,
            }
        }
        let attributes_match = options.attribute_filter.iter().all(|(key, filter)| {
            attribute_value(&table, &feature, key).map_or(false, |v| filter.matches(&v))
        });
        if attributes_match {
            kept.push((feature, point));
        }
    }
    debug!(table = %table.name, kept = kept.len(), "decoded and filtered features");

    let target = options.target_crs.filter(|t| *t != source_srs && has_geometry);
    let Some(target) = target else {
        table.features = kept.into_iter().map(|(f, _)| f).collect();
        return Ok(finish(db, table, options));
    };
    let target_srs = srs::lookup(target).ok_or(Error::UnknownSrs(target))?;
    let mut points = Vec::with_capacity(kept.len());
    let mut features = Vec::with_capacity(kept.len());
    for (f, point) in kept {
        match point {
            // undecodable geometries stay as they were read
            Some(p) if !f.geometry.is_empty() => {
                let p = transform_point(&p, source_srs, target, options.validate_geometry)?;
                points.push(p);
                features.push(Feature {
                    geometry: gpkg_wkb::encode(&p),
                    ..f
                });
            }
            _ => features.push(f),
        }
    }
    table.features = features;
    let bounds = create_bounds_from_points(&points).or(target_srs.bounds);
    for g in db.geometry_columns.iter_mut() {
        g.srs_id = target;
    }
    for c in db.contents.iter_mut() {
        c.srs_id = Some(target);
        c.bounds = bounds;
    }
    db.spatial_ref_systems = vec![target_srs.clone()];
    debug!(from = source_srs, to = target, "converted geometries");
    Ok(finish(db, table, options))
}

fn finish(mut db: Database, mut table: Table, options: &ReadOptions) -> Database {
    if options.create_spatial_index {
        if let Some(geom) = table.geometry_column.clone() {
            table.spatial_index = true;
            db.declare_extension(Extension::rtree(&table.name, &geom));
        }
    }
    db.tables.push(table);
    db
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Interprets free text from GIS editors. Unrecognized text is medium.
    pub fn from_text(text: &str) -> Self {
        let t = text.trim().to_lowercase();
        if t.contains("high") || t.contains("urgent") || t == "1" {
            Priority::High
        } else if t.contains("low") || t == "3" {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// A home drop job as planned in a desktop GIS and handed to field crews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub pole_number: Option<String>,
    pub customer: CustomerContact,
    /// WGS 84. `None` when the feature has no usable geometry.
    pub location: Option<GPKGPoint>,
    pub priority: Priority,
    pub status: Option<String>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Case-insensitive lookup over several candidate column names.
fn lookup<'a>(feature: &'a Feature, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        feature
            .properties
            .iter()
            .find(|(name, v)| name.eq_ignore_ascii_case(key) && !v.is_null())
            .map(|(_, v)| v)
    })
}

fn lookup_text(feature: &Feature, keys: &[&str]) -> Option<String> {
    let text = lookup(feature, keys)?.to_string();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            let date = NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()?;
            Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
        })
}

/// Projects the features of a table onto [`Assignment`]s.
///
/// Column names are matched loosely since desktop editors rename them freely.
/// Locations in Web Mercator are converted back to WGS 84.
pub fn extract_assignments(db: &Database, table_name: Option<&str>) -> Result<Vec<Assignment>> {
    let table = match table_name {
        Some(name) => db.table(name),
        None => db.tables.first(),
    }
    .ok_or_else(|| Error::TableNotFound(table_name.unwrap_or("<first table>").to_owned()))?;
    let srs_id = db
        .geometry_column_for(&table.name)
        .map(|g| g.srs_id)
        .unwrap_or(DEFAULT_SRS_ID);

    let assignments = table
        .features
        .iter()
        .map(|f| {
            let location = if f.geometry.is_empty() {
                None
            } else {
                match f
                    .point()
                    .and_then(|p| transform_point(&p, srs_id, DEFAULT_SRS_ID, false))
                {
                    Ok(p) => Some(p),
                    Err(e) => {
                        warn!(feature = f.id, error = %e, "assignment without location");
                        None
                    }
                }
            };
            Assignment {
                id: lookup_text(f, &["home_drop_id", "assignment_id", "drop_id", "id"])
                    .unwrap_or_else(|| f.id.to_string()),
                pole_number: lookup_text(f, &["pole_number", "pole_id", "pole"]),
                customer: CustomerContact {
                    name: lookup_text(f, &["customer_name", "customer", "name"]),
                    address: lookup_text(f, &["customer_address", "address", "street_address"]),
                    phone: lookup_text(f, &["customer_phone", "phone", "contact_number"]),
                    email: lookup_text(f, &["customer_email", "email"]),
                },
                location,
                priority: lookup_text(f, &["priority", "urgency"])
                    .map(|p| Priority::from_text(&p))
                    .unwrap_or(Priority::Medium),
                status: lookup_text(f, &["status", "state"]),
                scheduled_date: lookup_text(
                    f,
                    &["scheduled_date", "scheduled_at", "due_date", "install_date"],
                )
                .and_then(|d| parse_date(&d)),
                notes: lookup_text(f, &["notes", "comments", "remarks"]),
            }
        })
        .collect();
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CapturedLocation, HomeDropRecord};
    use crate::writer::{write_geopackage, WriteOptions};

    fn records() -> Vec<HomeDropRecord> {
        let statuses = ["pending", "active", "approved", "pending"];
        let priorities = ["High", "low", "whenever", "URGENT"];
        (0..4)
            .map(|i| HomeDropRecord {
                id: format!("HD-{}", i),
                project_id: "P-1".into(),
                status: statuses[i].into(),
                priority: Some(priorities[i].into()),
                location: Some(CapturedLocation {
                    latitude: i as f64 * 5.0,
                    longitude: i as f64 * 5.0,
                    altitude: None,
                    accuracy: None,
                }),
                ..Default::default()
            })
            .collect()
    }

    fn bytes() -> Vec<u8> {
        write_geopackage(&records(), &WriteOptions::default())
            .unwrap()
            .bytes
    }

    #[test]
    fn reads_default_table() {
        let db = read_geopackage(&bytes(), &ReadOptions::default()).unwrap();
        assert_eq!(db.tables.len(), 1);
        assert_eq!(db.tables[0].name, "home_drops");
        assert_eq!(db.tables[0].features.len(), 4);
        assert_eq!(list_tables(&bytes()).unwrap(), ["home_drops"]);
    }

    #[test]
    fn reads_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drops.gpkg");
        std::fs::write(&path, bytes()).unwrap();
        let options = ReadOptions {
            attribute_filter: [("status".to_owned(), FilterValue::from("pending"))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let db = read_geopackage_from_path(&path, &options).unwrap();
        let ids: Vec<i64> = db.tables[0].features.iter().map(|f| f.id).collect();
        assert_eq!(ids, [1, 4]);

        let missing = dir.path().join("absent.gpkg");
        assert!(matches!(
            read_geopackage_from_path(&missing, &ReadOptions::default()),
            Err(Error::ReadError(_))
        ));
    }

    #[test]
    fn spatial_filter_is_closed() {
        let options = ReadOptions {
            spatial_filter: Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            ..Default::default()
        };
        let db = read_geopackage(&bytes(), &options).unwrap();
        let ids: Vec<i64> = db.tables[0].features.iter().map(|f| f.id).collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[test]
    fn attribute_filter_any_of() {
        let mut filter = IndexMap::new();
        filter.insert(
            "status".to_owned(),
            FilterValue::AnyOf(vec!["pending".into(), "active".into()]),
        );
        let options = ReadOptions {
            attribute_filter: filter,
            ..Default::default()
        };
        let db = read_geopackage(&bytes(), &options).unwrap();
        let statuses: Vec<String> = db.tables[0]
            .features
            .iter()
            .map(|f| f.property("status").unwrap().to_string())
            .collect();
        assert_eq!(statuses, ["pending", "active", "pending"]);
    }

    #[test]
    fn text_filter_is_case_insensitive_substring() {
        let mut filter = IndexMap::new();
        filter.insert("home_drop_id".to_owned(), FilterValue::from("hd-"));
        filter.insert("status".to_owned(), FilterValue::from("PEND"));
        let options = ReadOptions {
            attribute_filter: filter,
            ..Default::default()
        };
        let db = read_geopackage(&bytes(), &options).unwrap();
        assert_eq!(db.tables[0].features.len(), 2);
    }

    #[test]
    fn non_text_filter_is_exact() {
        let f = FilterValue::from(5_i64);
        assert!(f.matches(&Value::Integer(5)));
        assert!(!f.matches(&Value::Integer(50)));
        assert!(!f.matches(&Value::from("5")));
    }

    #[test]
    fn filter_from_json() {
        let filter: IndexMap<String, FilterValue> =
            serde_json::from_str(r#"{"status": ["pending", "active"], "vlan_id": 100}"#).unwrap();
        assert!(matches!(filter["status"], FilterValue::AnyOf(_)));
        assert_eq!(filter["vlan_id"], FilterValue::Single(Value::Integer(100)));
    }

    #[test]
    fn invalid_filters_abort() {
        let mut filter = IndexMap::new();
        filter.insert("colour".to_owned(), FilterValue::from("red"));
        let options = ReadOptions {
            attribute_filter: filter,
            ..Default::default()
        };
        match read_geopackage(&bytes(), &options).unwrap_err() {
            Error::ReadError(cause) => assert!(matches!(*cause, Error::InvalidFilter(_))),
            other => panic!("unexpected error {:?}", other),
        }

        let options = ReadOptions {
            spatial_filter: Some(BoundingBox::new(10.0, 0.0, 0.0, 10.0)),
            ..Default::default()
        };
        assert!(read_geopackage(&bytes(), &options).is_err());
    }

    #[test]
    fn missing_table_is_a_read_error() {
        let options = ReadOptions {
            target_table: Some("poles".into()),
            ..Default::default()
        };
        match read_geopackage(&bytes(), &options).unwrap_err() {
            Error::ReadError(cause) => assert!(matches!(*cause, Error::TableNotFound(_))),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn not_a_container() {
        assert!(matches!(
            read_geopackage(b"hello", &ReadOptions::default()),
            Err(Error::ReadError(_))
        ));
        assert!(matches!(
            read_geopackage(&[], &ReadOptions::default()),
            Err(Error::ReadError(_))
        ));
    }

    #[test]
    fn converts_to_mercator_on_read() {
        let options = ReadOptions {
            target_crs: Some(3857),
            ..Default::default()
        };
        let db = read_geopackage(&bytes(), &options).unwrap();
        assert_eq!(db.geometry_columns[0].srs_id, 3857);
        assert_eq!(db.contents[0].srs_id, Some(3857));
        assert_eq!(db.spatial_ref_systems[0].id, 3857);
        let p = db.tables[0].features[1].point().unwrap();
        let expected = transform_point(&GPKGPoint::new(5.0, 5.0), 4326, 3857, true).unwrap();
        assert!((p.x - expected.x).abs() < 1e-6 && (p.y - expected.y).abs() < 1e-6);
    }

    #[test]
    fn spatial_index_flag_on_read() {
        let options = ReadOptions {
            create_spatial_index: true,
            ..Default::default()
        };
        let db = read_geopackage(&bytes(), &options).unwrap();
        assert!(db.tables[0].spatial_index);
        assert!(db.has_extension(RTREE_EXTENSION, Some("home_drops")));
    }

    #[test]
    fn priority_keywords() {
        assert_eq!(Priority::from_text("High"), Priority::High);
        assert_eq!(Priority::from_text(" urgent!"), Priority::High);
        assert_eq!(Priority::from_text("1"), Priority::High);
        assert_eq!(Priority::from_text("3"), Priority::Low);
        assert_eq!(Priority::from_text("LOW"), Priority::Low);
        assert_eq!(Priority::from_text("2"), Priority::Medium);
        assert_eq!(Priority::from_text(""), Priority::Medium);
    }

    #[test]
    fn assignments_from_written_records() {
        let db = read_geopackage(&bytes(), &ReadOptions::default()).unwrap();
        let assignments = extract_assignments(&db, None).unwrap();
        assert_eq!(assignments.len(), 4);
        assert_eq!(assignments[0].id, "HD-0");
        assert_eq!(assignments[0].priority, Priority::High);
        assert_eq!(assignments[1].priority, Priority::Low);
        assert_eq!(assignments[2].priority, Priority::Medium);
        assert_eq!(assignments[3].priority, Priority::High);
        assert_eq!(assignments[2].location, Some(GPKGPoint::new(10.0, 10.0)));
        assert!(extract_assignments(&db, Some("poles")).is_err());
    }

    #[test]
    fn assignments_tolerate_foreign_columns() {
        let mut f = Feature::new(7, &GPKGPoint::new(28.0, -26.0));
        f.properties.insert("Assignment_ID".into(), Value::from("JOB-7"));
        f.properties.insert("Customer".into(), Value::from("N. Dlamini"));
        f.properties.insert("Urgency".into(), Value::Integer(1));
        f.properties.insert("Due_Date".into(), Value::from("2026-11-02"));
        let db = Database {
            tables: vec![Table {
                name: "jobs".into(),
                columns: Vec::new(),
                geometry_column: Some("geom".into()),
                spatial_index: false,
                features: vec![f],
                constraints: Vec::new(),
            }],
            ..Default::default()
        };
        let a = &extract_assignments(&db, Some("jobs")).unwrap()[0];
        assert_eq!(a.id, "JOB-7");
        assert_eq!(a.customer.name.as_deref(), Some("N. Dlamini"));
        assert_eq!(a.priority, Priority::High);
        assert_eq!(
            a.scheduled_date.map(|d| d.format("%Y-%m-%d").to_string()),
            Some("2026-11-02".to_owned())
        );
        assert_eq!(a.location, Some(GPKGPoint::new(28.0, -26.0)));
    }
}
