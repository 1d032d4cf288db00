//! Conversion between a [`Database`] and the bytes of a GeoPackage file.
//!
//! Every call works on its own temporary SQLite file, so nothing is shared
//! between calls.

use crate::gpkg_wkb::GeoPackageGeometry;
use crate::model::*;
use crate::result::{Error, Result};
use crate::sql::table_definitions::*;
use crate::sql::{create_table_sql, parse_column_checks, quote_ident};
use crate::srs::{self, defaults::*, SpatialRefSys};
use crate::types::{BoundingBox, GeometryType, Value};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, DatabaseName, OpenFlags, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// "GPKG" in ASCII.
pub const GPKG_APPLICATION_ID: i64 = 0x4750_4B47;
/// "GP10" and "GP11", written by GeoPackage 1.0 and 1.1 tools.
const LEGACY_APPLICATION_IDS: [i64; 2] = [0x4750_3130, 0x4750_3131];
pub const GPKG_USER_VERSION: i64 = 10300;

const FILE_NAME: &str = "container.gpkg";

/// Serializes a database into the bytes of a GeoPackage file.
pub fn serialize_database(db: &Database) -> Result<Vec<u8>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(FILE_NAME);
    write_database_to_path(db, &path)?;
    let bytes = std::fs::read(&path)?;
    debug!(bytes = bytes.len(), "serialized GeoPackage");
    Ok(bytes)
}

/// GeoPackage bytes copied into a private temporary directory, removed on
/// drop.
pub(crate) struct ScratchCopy {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl ScratchCopy {
    pub(crate) fn new(bytes: &[u8]) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, bytes)?;
        Ok(ScratchCopy { _dir: dir, path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Parses GeoPackage bytes, keeping only `only_table` when given.
pub fn deserialize_database(bytes: &[u8], only_table: Option<&str>) -> Result<Database> {
    let copy = ScratchCopy::new(bytes)?;
    read_database_from_path(copy.path(), only_table)
}

/// Creates a new GeoPackage file at `path` holding `db`.
///
/// Fails if the file already exists.
pub fn write_database_to_path<P: AsRef<Path>>(db: &Database, path: P) -> Result<()> {
    if path.as_ref().exists() {
        return Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.as_ref().display()),
        )));
    }
    let mut conn = Connection::open(path)?;
    conn.pragma_update(Some(DatabaseName::Main), "application_id", GPKG_APPLICATION_ID)?;
    conn.pragma_update(Some(DatabaseName::Main), "user_version", GPKG_USER_VERSION)?;

    let tx = conn.transaction()?;
    tx.execute(CREATE_SPATIAL_REF_SYS_TABLE, [])?;
    tx.execute(CREATE_CONTENTS_TABLE, [])?;
    tx.execute(CREATE_GEOMETRY_COLUMNS_TABLE, [])?;
    tx.execute(CREATE_EXTENSIONS_TABLE, [])?;

    // the three systems every GeoPackage must define, then the model's own
    let required = srs::REGISTRY
        .iter()
        .filter(|s| [WGS84.id, CARTESIAN.id, GEOGRAPHIC.id].contains(&s.id));
    for srs in required.chain(db.spatial_ref_systems.iter()) {
        insert_srs(&tx, srs)?;
    }
    for c in &db.contents {
        insert_contents(&tx, c)?;
    }
    for g in &db.geometry_columns {
        tx.execute(
            "INSERT INTO gpkg_geometry_columns VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                g.table_name,
                g.column_name,
                g.geometry_type.gpkg_name(),
                g.srs_id,
                g.z as i32,
                g.m as i32
            ],
        )?;
    }
    for table in &db.tables {
        write_table(&tx, db, table)?;
    }
    for e in &db.extensions {
        tx.execute(
            "INSERT INTO gpkg_extensions VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                e.table_name,
                e.column_name,
                e.extension_name,
                e.definition,
                e.scope.as_str()
            ],
        )?;
    }
    if !db.metadata.is_empty() || db.has_extension(METADATA_EXTENSION, None) {
        write_metadata(&tx, &db.metadata)?;
    }
    let needs_schema = db.has_extension(SCHEMA_EXTENSION, None)
        || db.tables.iter().any(|t| {
            !t.constraints.is_empty() || t.columns.iter().any(|c| c.comment.is_some())
        });
    if needs_schema {
        write_schema(&tx, &db.tables)?;
    }
    tx.commit()?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

fn insert_srs(conn: &Connection, srs: &SpatialRefSys) -> Result<()> {
    const STMT: &str = "INSERT OR REPLACE INTO gpkg_spatial_ref_sys VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
    conn.execute(
        STMT,
        params![
            srs.name.as_ref(),
            srs.id,
            srs.organization.as_ref(),
            srs.organization_coordsys_id,
            srs.definition.as_ref(),
            srs.description.as_ref(),
        ],
    )?;
    Ok(())
}

fn insert_contents(conn: &Connection, c: &Contents) -> Result<()> {
    let b = c.bounds;
    conn.execute(
        "INSERT INTO gpkg_contents VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            c.table_name,
            c.data_type.as_str(),
            c.identifier,
            c.description,
            format_timestamp(&c.last_change),
            b.map(|b| b.min_x),
            b.map(|b| b.min_y),
            b.map(|b| b.max_x),
            b.map(|b| b.max_y),
            c.srs_id,
        ],
    )?;
    Ok(())
}

fn write_table(conn: &Connection, db: &Database, table: &Table) -> Result<()> {
    let geom = db.geometry_column_for(&table.name);
    conn.execute_batch(&create_table_sql(table, geom))?;

    let pk = table.primary_key().map(|c| c.name.clone());
    let geom_name = table.geometry_column.clone();
    let srs_id = match geom {
        Some(g) => i32::try_from(g.srs_id).map_err(|_| {
            Error::GeomEncodeError(format!(
                "srs id {} does not fit the geometry header",
                g.srs_id
            ))
        })?,
        None => 0,
    };
    let known: HashSet<&str> = table.property_columns().map(|c| c.name.as_str()).collect();

    for feature in &table.features {
        let mut names: Vec<String> = Vec::with_capacity(feature.properties.len() + 2);
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(names.capacity());
        if let Some(pk) = &pk {
            names.push(quote_ident(pk));
            values.push(Box::new(feature.id));
        }
        if let Some(g) = &geom_name {
            names.push(quote_ident(g));
            values.push(Box::new(GeoPackageGeometry::new(
                srs_id,
                feature.geometry.clone(),
            )));
        }
        for (key, value) in &feature.properties {
            if !known.contains(key.as_str()) {
                return Err(Error::UnknownColumn {
                    table: table.name.clone(),
                    column: key.clone(),
                });
            }
            names.push(quote_ident(key));
            values.push(Box::new(value.clone()));
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table.name),
            names.join(", "),
            placeholders
        );
        conn.prepare_cached(&sql)?
            .execute(params_from_iter(values.iter().map(|v| v.as_ref())))?;
    }
    trace!(table = %table.name, features = table.features.len(), "wrote table");
    Ok(())
}

fn write_metadata(conn: &Connection, entries: &[MetadataEntry]) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;
    conn.execute(CREATE_METADATA_REFERENCE_TABLE, [])?;
    for m in entries {
        conn.execute(
            "INSERT INTO gpkg_metadata VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                m.id,
                m.scope.as_str(),
                m.standard_uri,
                m.mime_type,
                m.content
            ],
        )?;
        conn.execute(
            "INSERT INTO gpkg_metadata_reference
                (reference_scope, table_name, column_name, row_id_value, timestamp, md_file_id, md_parent_id)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, NULL)",
            params![
                m.target.reference_scope(),
                m.target.table_name(),
                m.target.column_name(),
                format_timestamp(&m.timestamp),
                m.id
            ],
        )?;
    }
    Ok(())
}

fn write_schema(conn: &Connection, tables: &[Table]) -> Result<()> {
    conn.execute(CREATE_DATA_COLUMNS_TABLE, [])?;
    conn.execute(CREATE_DATA_COLUMN_CONSTRAINTS_TABLE, [])?;
    for table in tables {
        for column in &table.columns {
            let constraint = table.constraints.iter().find(|c| c.column == column.name);
            if column.comment.is_none() && constraint.is_none() {
                continue;
            }
            conn.execute(
                "INSERT INTO gpkg_data_columns VALUES (?1, ?2, ?3, NULL, ?4, NULL, ?5)",
                params![
                    table.name,
                    column.name,
                    column.name,
                    column.comment,
                    constraint.map(|c| c.name.as_str())
                ],
            )?;
        }
        for c in &table.constraints {
            insert_constraint(conn, c)?;
        }
    }
    Ok(())
}

fn insert_constraint(conn: &Connection, c: &Constraint) -> Result<()> {
    const STMT: &str = "INSERT OR IGNORE INTO gpkg_data_column_constraints VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
    let kind = c.kind.type_name();
    match &c.kind {
        ConstraintKind::Range {
            min,
            max,
            min_inclusive,
            max_inclusive,
        } => {
            conn.execute(
                STMT,
                params![
                    c.name,
                    kind,
                    None::<String>,
                    min,
                    min_inclusive,
                    max,
                    max_inclusive,
                    c.description
                ],
            )?;
        }
        ConstraintKind::Enum { values } => {
            for v in values {
                conn.execute(
                    STMT,
                    params![
                        c.name,
                        kind,
                        v,
                        None::<f64>,
                        None::<bool>,
                        None::<f64>,
                        None::<bool>,
                        c.description
                    ],
                )?;
            }
        }
        ConstraintKind::Glob { pattern } => {
            conn.execute(
                STMT,
                params![
                    c.name,
                    kind,
                    pattern,
                    None::<f64>,
                    None::<bool>,
                    None::<f64>,
                    None::<bool>,
                    c.description
                ],
            )?;
        }
    }
    Ok(())
}

/// Timestamps are stored with millisecond precision, as GeoPackage tools
/// expect.
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: Option<String>) -> DateTime<Utc> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Opens an existing GeoPackage read only and parses it.
///
/// Checks the application id, `PRAGMA integrity_check` and
/// `PRAGMA foreign_key_check` before reading anything.
pub fn read_database_from_path<P: AsRef<Path>>(path: P, only_table: Option<&str>) -> Result<Database> {
    let conn = open_checked(path)?;
    let db = read_database(&conn, only_table)?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(db)
}

/// Opens a GeoPackage read only after checking it.
pub(crate) fn open_checked<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    check_geopackage(&conn)?;
    Ok(conn)
}

fn check_geopackage(conn: &Connection) -> Result<()> {
    let application_id: i64 =
        conn.query_row("SELECT * FROM pragma_application_id()", [], |row| row.get(0))?;
    if application_id != GPKG_APPLICATION_ID && !LEGACY_APPLICATION_IDS.contains(&application_id) {
        return Err(Error::NotAGeoPackage(format!(
            "unexpected application id {:#x}",
            application_id
        )));
    }
    let user_version: i64 =
        conn.query_row("SELECT * FROM pragma_user_version()", [], |row| row.get(0))?;
    debug!(user_version, "opened GeoPackage");
    let integrity_check: String =
        conn.query_row("SELECT * FROM pragma_integrity_check()", [], |row| row.get(0))?;
    if integrity_check != "ok" {
        return Err(Error::NotAGeoPackage(format!(
            "integrity check failed: {}",
            integrity_check
        )));
    }
    // use a block to force a drop of stmt and release the borrow
    {
        let mut stmt = conn.prepare("SELECT * FROM pragma_foreign_key_check()")?;
        let mut rows = stmt.query([])?;
        if rows.next()?.is_some() {
            return Err(Error::NotAGeoPackage(
                "foreign key check reported violations".to_owned(),
            ));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Lists the feature and attribute tables registered in `gpkg_contents`.
pub(crate) fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM gpkg_contents WHERE data_type IN ('features', 'attributes') ORDER BY rowid",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

pub(crate) fn read_database(conn: &Connection, only_table: Option<&str>) -> Result<Database> {
    let wanted = |name: &str| only_table.map_or(true, |t| t == name);

    let contents: Vec<Contents> = read_contents(conn)?
        .into_iter()
        .filter(|c| wanted(&c.table_name))
        .collect();
    if let Some(t) = only_table {
        if contents.is_empty() {
            return Err(Error::TableNotFound(t.to_owned()));
        }
    }
    let geometry_columns: Vec<GeometryColumn> = read_geometry_columns(conn)?
        .into_iter()
        .filter(|g| wanted(&g.table_name))
        .collect();

    let mut srs_ids: Vec<i64> = Vec::new();
    for id in contents
        .iter()
        .filter_map(|c| c.srs_id)
        .chain(geometry_columns.iter().map(|g| g.srs_id))
    {
        if !srs_ids.contains(&id) {
            srs_ids.push(id);
        }
    }
    let spatial_ref_systems = srs_ids
        .into_iter()
        .map(|id| read_srs(conn, id))
        .collect::<Result<Vec<_>>>()?;

    let extensions: Vec<Extension> = if table_exists(conn, "gpkg_extensions")? {
        read_extensions(conn)?
            .into_iter()
            .filter(|e| e.table_name.as_deref().map_or(true, wanted))
            .collect()
    } else {
        Vec::new()
    };
    let metadata: Vec<MetadataEntry> = if table_exists(conn, "gpkg_metadata")? {
        read_metadata(conn)?
            .into_iter()
            .filter(|m| m.target.table_name().map_or(true, wanted))
            .collect()
    } else {
        Vec::new()
    };
    let has_schema = table_exists(conn, "gpkg_data_columns")?
        && table_exists(conn, "gpkg_data_column_constraints")?;

    let mut db = Database {
        tables: Vec::new(),
        spatial_ref_systems,
        geometry_columns,
        contents,
        metadata,
        extensions,
    };
    let names: Vec<String> = db
        .contents
        .iter()
        .filter(|c| matches!(c.data_type, GPKGDataType::Features | GPKGDataType::Attributes))
        .map(|c| c.table_name.clone())
        .collect();
    for name in names {
        let table = read_table(conn, &db, &name, has_schema)?;
        db.tables.push(table);
    }
    Ok(db)
}

fn read_contents(conn: &Connection) -> Result<Vec<Contents>> {
    let mut stmt = conn.prepare(
        "SELECT table_name, data_type, identifier, description, last_change,
                min_x, min_y, max_x, max_y, srs_id
         FROM gpkg_contents ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        let data_type: String = row.get(1)?;
        let table_name: String = row.get(0)?;
        let bounds = match (
            row.get::<_, Option<f64>>(5)?,
            row.get::<_, Option<f64>>(6)?,
            row.get::<_, Option<f64>>(7)?,
            row.get::<_, Option<f64>>(8)?,
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => Some(BoundingBox::new(a, b, c, d)),
            _ => None,
        };
        Ok((
            data_type,
            Contents {
                identifier: row
                    .get::<_, Option<String>>(2)?
                    .unwrap_or_else(|| table_name.clone()),
                table_name,
                data_type: GPKGDataType::Attributes,
                description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                last_change: parse_timestamp(row.get(4)?),
                bounds,
                srs_id: row.get(9)?,
            },
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (data_type, mut contents) = row?;
        // tiles and other data types are outside this crate
        match GPKGDataType::parse(&data_type) {
            Some(t) => {
                contents.data_type = t;
                out.push(contents);
            }
            None => debug!(table = %contents.table_name, %data_type, "skipping contents row"),
        }
    }
    Ok(out)
}

fn read_geometry_columns(conn: &Connection) -> Result<Vec<GeometryColumn>> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, geometry_type_name, srs_id, z, m FROM gpkg_geometry_columns",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|(table_name, column_name, type_name, srs_id, z, m)| {
            let z = MZOptions::from_flag(z);
            let geometry_type = match type_name.to_uppercase().as_str() {
                "POINT" if z == MZOptions::Mandatory => GeometryType::PointZ,
                "POINT" => GeometryType::Point,
                "LINESTRING" => GeometryType::LineString,
                "POLYGON" => GeometryType::Polygon,
                "MULTIPOINT" => GeometryType::MultiPoint,
                "MULTILINESTRING" => GeometryType::MultiLineString,
                "MULTIPOLYGON" => GeometryType::MultiPolygon,
                "GEOMETRYCOLLECTION" | "GEOMETRY" => GeometryType::GeometryCollection,
                _ => return Err(Error::NotAGeoPackage(format!(
                    "unknown geometry type '{}' on {}.{}",
                    type_name, table_name, column_name
                ))),
            };
            Ok(GeometryColumn {
                table_name,
                column_name,
                geometry_type,
                srs_id,
                z,
                m: MZOptions::from_flag(m),
            })
        })
        .collect()
}

fn read_srs(conn: &Connection, id: i64) -> Result<SpatialRefSys> {
    let row = conn
        .query_row(
            "SELECT srs_name, srs_id, organization, organization_coordsys_id, definition, description
             FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
            [id],
            |row| {
                Ok(SpatialRefSys {
                    name: row.get::<_, String>(0)?.into(),
                    id: row.get(1)?,
                    organization: row.get::<_, String>(2)?.into(),
                    organization_coordsys_id: row.get(3)?,
                    definition: row.get::<_, String>(4)?.into(),
                    description: row.get::<_, Option<String>>(5)?.unwrap_or_default().into(),
                    bounds: None,
                })
            },
        )
        .optional()?;
    let mut srs = row.ok_or(Error::UnknownSrs(id))?;
    // bounds are not part of the file, take them from the registry
    srs.bounds = srs::lookup(id).and_then(|known| known.bounds);
    Ok(srs)
}

fn read_extensions(conn: &Connection) -> Result<Vec<Extension>> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, extension_name, definition, scope FROM gpkg_extensions ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let scope: String = row.get(4)?;
            Ok(Extension {
                table_name: row.get(0)?,
                column_name: row.get(1)?,
                extension_name: row.get(2)?,
                definition: row.get(3)?,
                scope: if scope == "write-only" {
                    ExtensionScope::WriteOnly
                } else {
                    ExtensionScope::ReadWrite
                },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn read_metadata(conn: &Connection) -> Result<Vec<MetadataEntry>> {
    let has_reference = table_exists(conn, "gpkg_metadata_reference")?;
    let sql = if has_reference {
        "SELECT m.id, m.md_scope, m.md_standard_uri, m.mime_type, m.metadata,
                r.reference_scope, r.table_name, r.column_name, r.timestamp
         FROM gpkg_metadata m
         LEFT JOIN gpkg_metadata_reference r ON r.md_file_id = m.id
         ORDER BY m.id, r.rowid"
    } else {
        "SELECT id, md_scope, md_standard_uri, mime_type, metadata, NULL, NULL, NULL, NULL
         FROM gpkg_metadata ORDER BY id"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| {
            let scope: String = row.get(1)?;
            let reference_scope: Option<String> = row.get(5)?;
            let table: Option<String> = row.get(6)?;
            let column: Option<String> = row.get(7)?;
            let target = match (reference_scope.as_deref(), table, column) {
                (Some("column"), Some(table), Some(column)) => {
                    MetadataTarget::Column { table, column }
                }
                (Some("table" | "row" | "row/col" | "column"), Some(table), _) => {
                    MetadataTarget::Table(table)
                }
                _ => MetadataTarget::GeoPackage,
            };
            Ok(MetadataEntry {
                id: row.get(0)?,
                scope: MetadataScope::parse(&scope),
                standard_uri: row.get(2)?,
                mime_type: row.get(3)?,
                content: row.get(4)?,
                target,
                timestamp: parse_timestamp(row.get(8)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    // one entry per metadata row, keeping its first reference
    let mut seen = HashSet::new();
    Ok(rows.into_iter().filter(|m| seen.insert(m.id)).collect())
}

fn read_table(conn: &Connection, db: &Database, name: &str, has_schema: bool) -> Result<Table> {
    if !table_exists(conn, name)? {
        return Err(Error::TableNotFound(name.to_owned()));
    }
    let geometry_column = db.geometry_column_for(name).map(|g| g.column_name.clone());

    let mut columns = {
        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let rows = stmt
            .query_map([name], |row| {
                let col_name: String = row.get(0)?;
                let decl: String = row.get(1)?;
                let column_type = if geometry_column.as_deref() == Some(col_name.as_str()) {
                    ColumnType::Geometry
                } else {
                    ColumnType::from_declared(&decl)
                };
                Ok(Column {
                    name: col_name,
                    column_type,
                    nullable: row.get::<_, i64>(2)? == 0,
                    unique: false,
                    primary_key: row.get::<_, i64>(4)? > 0,
                    default: row.get(3)?,
                    check_expression: None,
                    comment: None,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    for unique in unique_columns(conn, name)? {
        if let Some(c) = columns.iter_mut().find(|c| c.name == unique) {
            c.unique = true;
        }
    }
    let create_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    if let Some(sql) = create_sql {
        for (col, expr) in parse_column_checks(&sql) {
            if let Some(c) = columns.iter_mut().find(|c| c.name == col) {
                c.check_expression = Some(expr);
            }
        }
    }

    let constraints = if has_schema {
        read_schema(conn, name, &mut columns)?
    } else {
        Vec::new()
    };

    let table = Table {
        name: name.to_owned(),
        geometry_column,
        spatial_index: db.has_extension(RTREE_EXTENSION, Some(name)),
        features: Vec::new(),
        constraints,
        columns,
    };
    let features = read_features(conn, &table)?;
    debug!(table = name, features = features.len(), "read table");
    Ok(Table { features, ..table })
}

fn unique_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1 AND origin = 'u'",
    )?;
    let indexes = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut out = Vec::new();
    for index in indexes {
        let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
        let cols = info
            .query_map([&index], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // multi column UNIQUE constraints are not a column property
        if let [Some(col)] = cols.as_slice() {
            out.push(col.clone());
        }
    }
    Ok(out)
}

fn read_schema(conn: &Connection, table: &str, columns: &mut [Column]) -> Result<Vec<Constraint>> {
    let mut stmt = conn.prepare(
        "SELECT column_name, description, constraint_name FROM gpkg_data_columns WHERE table_name = ?1",
    )?;
    let rows = stmt
        .query_map([table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut constraints = Vec::new();
    for (column, description, constraint_name) in rows {
        if let Some(c) = columns.iter_mut().find(|c| c.name == column) {
            c.comment = description;
        }
        if let Some(name) = constraint_name {
            if let Some(kind) = read_constraint(conn, &name)? {
                constraints.push(Constraint {
                    name,
                    column,
                    kind: kind.0,
                    description: kind.1,
                });
            }
        }
    }
    // keep the order of the table's columns
    constraints.sort_by_key(|c| columns.iter().position(|col| col.name == c.column));
    Ok(constraints)
}

fn read_constraint(conn: &Connection, name: &str) -> Result<Option<(ConstraintKind, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT constraint_type, value, min, min_is_inclusive, max, max_is_inclusive, description
         FROM gpkg_data_column_constraints WHERE constraint_name = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Value>(2)?,
                row.get::<_, Option<bool>>(3)?,
                row.get::<_, Value>(4)?,
                row.get::<_, Option<bool>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let Some(first) = rows.first() else {
        return Ok(None);
    };
    let description = first.6.clone();
    let kind = match first.0.as_str() {
        "range" => ConstraintKind::Range {
            min: first.2.as_f64().unwrap_or(f64::NEG_INFINITY),
            max: first.4.as_f64().unwrap_or(f64::INFINITY),
            min_inclusive: first.3.unwrap_or(true),
            max_inclusive: first.5.unwrap_or(true),
        },
        "enum" => ConstraintKind::Enum {
            values: rows.iter().filter_map(|r| r.1.clone()).collect(),
        },
        "glob" => ConstraintKind::Glob {
            pattern: first.1.clone().unwrap_or_default(),
        },
        _ => return Ok(None),
    };
    Ok(Some((kind, description)))
}

fn read_features(conn: &Connection, table: &Table) -> Result<Vec<Feature>> {
    let pk = table.primary_key().map(|c| c.name.clone());
    let property_names: Vec<String> = table.property_columns().map(|c| c.name.clone()).collect();

    let mut select: Vec<String> = vec![match &pk {
        Some(pk) => quote_ident(pk),
        None => "rowid".to_owned(),
    }];
    select.push(match &table.geometry_column {
        Some(g) => quote_ident(g),
        None => "NULL".to_owned(),
    });
    select.extend(property_names.iter().map(|n| quote_ident(n)));
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        select.join(", "),
        quote_ident(&table.name),
        select[0]
    );

    let mut stmt = conn.prepare(&sql)?;
    let features = stmt
        .query_map([], |row| {
            let geometry = row
                .get::<_, Option<GeoPackageGeometry>>(1)?
                .map(|g| g.wkb)
                .unwrap_or_default();
            let mut properties = indexmap::IndexMap::with_capacity(property_names.len());
            for (i, name) in property_names.iter().enumerate() {
                properties.insert(name.clone(), row.get::<_, Value>(i + 2)?);
            }
            Ok(Feature {
                id: row.get(0)?,
                geometry,
                properties,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GPKGPoint;
    use tempfile::tempdir;

    fn sample_database() -> Database {
        let now = DateTime::parse_from_rfc3339("2026-03-01T08:30:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut f1 = Feature::new(1, &GPKGPoint::new(18.42, -33.92));
        f1.properties.insert("status".into(), Value::from("pending"));
        f1.properties.insert("signal_strength".into(), Value::Integer(87));
        let mut f2 = Feature::new(2, &GPKGPoint::with_z(18.5, -33.9, 12.0));
        f2.properties.insert("status".into(), Value::from("approved"));
        f2.properties.insert("signal_strength".into(), Value::Null);
        let f3 = Feature {
            id: 3,
            geometry: Vec::new(),
            properties: [
                ("status".to_owned(), Value::from("rejected")),
                ("signal_strength".to_owned(), Value::Integer(0)),
            ]
            .into_iter()
            .collect(),
        };
        Database {
            tables: vec![Table {
                name: "home_drops".into(),
                columns: vec![
                    Column::primary_key("fid"),
                    Column::new("geom", ColumnType::Geometry),
                    Column::new("status", ColumnType::Text)
                        .not_null()
                        .default_value("'pending'")
                        .comment("Capture workflow state"),
                    Column::new("signal_strength", ColumnType::Integer)
                        .check("signal_strength BETWEEN 0 AND 100"),
                ],
                geometry_column: Some("geom".into()),
                spatial_index: true,
                features: vec![f1, f2, f3],
                constraints: vec![Constraint {
                    name: "home_drops_status_values".into(),
                    column: "status".into(),
                    kind: ConstraintKind::Enum {
                        values: vec!["pending".into(), "approved".into(), "rejected".into()],
                    },
                    description: Some("Allowed states".into()),
                }],
            }],
            spatial_ref_systems: vec![WGS84],
            geometry_columns: vec![GeometryColumn {
                table_name: "home_drops".into(),
                column_name: "geom".into(),
                geometry_type: GeometryType::Point,
                srs_id: 4326,
                z: MZOptions::Optional,
                m: MZOptions::Prohibited,
            }],
            contents: vec![Contents {
                table_name: "home_drops".into(),
                data_type: GPKGDataType::Features,
                identifier: "Home Drops".into(),
                description: "".into(),
                last_change: now,
                bounds: Some(BoundingBox::new(18.42, -33.92, 18.5, -33.9)),
                srs_id: Some(4326),
            }],
            metadata: vec![MetadataEntry {
                id: 1,
                scope: MetadataScope::Dataset,
                standard_uri: "http://www.isotc211.org/2005/gmd".into(),
                mime_type: "text/xml".into(),
                content: "<gmd:MD_Metadata/>".into(),
                target: MetadataTarget::GeoPackage,
                timestamp: now,
            }],
            extensions: vec![
                Extension::metadata(),
                Extension::schema(),
                Extension::rtree("home_drops", "geom"),
            ],
        }
    }

    #[test]
    fn round_trip_is_lossless() {
        let db = sample_database();
        let bytes = serialize_database(&db).unwrap();
        assert_eq!(&bytes[0..16], b"SQLite format 3\0");
        let back = deserialize_database(&bytes, None).unwrap();
        assert_eq!(back, db);
    }

    #[test]
    fn file_carries_geopackage_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.gpkg");
        write_database_to_path(&sample_database(), &path).unwrap();

        let conn = Connection::open(&path).unwrap();
        let app_id: i64 = conn
            .query_row("SELECT * FROM pragma_application_id()", [], |r| r.get(0))
            .unwrap();
        assert_eq!(app_id, GPKG_APPLICATION_ID);
        let srs_count: i64 = conn
            .query_row("SELECT count(*) FROM gpkg_spatial_ref_sys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(srs_count, 3);
        let blob: Vec<u8> = conn
            .query_row("SELECT geom FROM home_drops WHERE fid = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(&blob[0..2], b"GP");
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("twice.gpkg");
        write_database_to_path(&sample_database(), &path).unwrap();
        assert!(write_database_to_path(&sample_database(), &path).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(deserialize_database(b"definitely not sqlite", None).is_err());
    }

    #[test]
    fn plain_sqlite_is_not_a_geopackage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE t (a INTEGER)", []).unwrap();
        conn.close().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(matches!(
            deserialize_database(&bytes, None),
            Err(Error::NotAGeoPackage(_))
        ));
    }

    #[test]
    fn missing_table_is_reported() {
        let bytes = serialize_database(&sample_database()).unwrap();
        assert!(matches!(
            deserialize_database(&bytes, Some("poles")),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn oversized_srs_id_is_rejected() {
        let mut db = sample_database();
        let big = i64::from(i32::MAX) + 1;
        db.spatial_ref_systems[0].id = big;
        db.geometry_columns[0].srs_id = big;
        db.contents[0].srs_id = Some(big);
        assert!(matches!(
            serialize_database(&db),
            Err(Error::GeomEncodeError(_))
        ));
    }

    #[test]
    fn unknown_property_is_rejected() {
        let mut db = sample_database();
        db.tables[0].features[0]
            .properties
            .insert("colour".into(), Value::from("red"));
        assert!(matches!(
            serialize_database(&db),
            Err(Error::UnknownColumn { .. })
        ));
    }
}
