//! In-memory shape of a GeoPackage container.
//!
//! A [`Database`] is built fresh for every read or write and never shared
//! mutably. Converting it to and from bytes lives in [`crate::container`].

use crate::gpkg_wkb;
use crate::result::Result;
use crate::srs::SpatialRefSys;
use crate::types::{BoundingBox, GPKGPoint, GeometryType, Value};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
    Geometry,
}

impl ColumnType {
    /// Declared type used in table DDL. Geometry columns use the geometry
    /// type name instead, see [`GeometryColumn`].
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
            ColumnType::Geometry => "GEOMETRY",
        }
    }

    /// Maps a declared SQLite type onto a column type using SQLite's affinity
    /// rules.
    pub fn from_declared(decl: &str) -> Self {
        let upper = decl.to_uppercase();
        if upper.contains("INT") || upper == "BOOLEAN" {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.contains("BLOB") {
            ColumnType::Blob
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
        {
            ColumnType::Real
        } else {
            ColumnType::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    /// Default expression as written in the DDL.
    pub default: Option<String>,
    pub check_expression: Option<String>,
    pub comment: Option<String>,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Column {
            name: name.to_owned(),
            column_type,
            nullable: true,
            unique: false,
            primary_key: false,
            default: None,
            check_expression: None,
            comment: None,
        }
    }

    /// The `fid INTEGER PRIMARY KEY AUTOINCREMENT` style key every feature
    /// table carries.
    pub fn primary_key(name: &str) -> Self {
        Column {
            nullable: false,
            primary_key: true,
            ..Column::new(name, ColumnType::Integer)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, expr: &str) -> Self {
        self.default = Some(expr.to_owned());
        self
    }

    pub fn check(mut self, expr: &str) -> Self {
        self.check_expression = Some(expr.to_owned());
        self
    }

    pub fn comment(mut self, text: &str) -> Self {
        self.comment = Some(text.to_owned());
        self
    }
}

/// Whether Z or M values are allowed, per `gpkg_geometry_columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MZOptions {
    Prohibited = 0,
    Mandatory = 1,
    Optional = 2,
}

impl MZOptions {
    pub fn from_flag(v: i64) -> Self {
        match v {
            1 => MZOptions::Mandatory,
            2 => MZOptions::Optional,
            _ => MZOptions::Prohibited,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryColumn {
    pub table_name: String,
    pub column_name: String,
    pub geometry_type: GeometryType,
    pub srs_id: i64,
    pub z: MZOptions,
    pub m: MZOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: i64,
    /// Bare WKB, see [`crate::gpkg_wkb`]. Empty means no geometry recorded.
    pub geometry: Vec<u8>,
    pub properties: IndexMap<String, Value>,
}

impl Feature {
    pub fn new(id: i64, point: &GPKGPoint) -> Self {
        Feature {
            id,
            geometry: gpkg_wkb::encode(point),
            properties: IndexMap::new(),
        }
    }

    pub fn point(&self) -> Result<GPKGPoint> {
        gpkg_wkb::decode(&self.geometry)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConstraintKind {
    Range {
        min: f64,
        max: f64,
        min_inclusive: bool,
        max_inclusive: bool,
    },
    Enum {
        values: Vec<String>,
    },
    Glob {
        pattern: String,
    },
}

impl ConstraintKind {
    /// The value stored in `gpkg_data_column_constraints.constraint_type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConstraintKind::Range { .. } => "range",
            ConstraintKind::Enum { .. } => "enum",
            ConstraintKind::Glob { .. } => "glob",
        }
    }
}

/// A descriptive constraint on a column.
///
/// Stored through the GeoPackage schema extension for desktop editors. It is
/// not enforced when writing features.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub column: String,
    pub kind: ConstraintKind,
    pub description: Option<String>,
}

impl Constraint {
    /// The equivalent SQL CHECK clause.
    pub fn check_sql(&self) -> String {
        let col = &self.column;
        match &self.kind {
            ConstraintKind::Range {
                min,
                max,
                min_inclusive,
                max_inclusive,
            } => {
                let lo = if *min_inclusive { ">=" } else { ">" };
                let hi = if *max_inclusive { "<=" } else { "<" };
                format!("CHECK ({col} {lo} {min} AND {col} {hi} {max})")
            }
            ConstraintKind::Enum { values } => {
                let quoted: Vec<String> = values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect();
                format!("CHECK ({col} IN ({}))", quoted.join(", "))
            }
            ConstraintKind::Glob { pattern } => {
                format!("CHECK ({col} GLOB '{}')", pattern.replace('\'', "''"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub geometry_column: Option<String>,
    pub spatial_index: bool,
    pub features: Vec<Feature>,
    pub constraints: Vec<Constraint>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Columns whose values live in [`Feature::properties`].
    pub fn property_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| !c.primary_key && c.column_type != ColumnType::Geometry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GPKGDataType {
    Features,
    Attributes,
}

impl GPKGDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GPKGDataType::Features => "features",
            GPKGDataType::Attributes => "attributes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "features" => Some(GPKGDataType::Features),
            "attributes" => Some(GPKGDataType::Attributes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contents {
    pub table_name: String,
    pub data_type: GPKGDataType,
    pub identifier: String,
    pub description: String,
    pub last_change: DateTime<Utc>,
    pub bounds: Option<BoundingBox>,
    pub srs_id: Option<i64>,
}

/// `gpkg_metadata.md_scope` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataScope {
    Undefined,
    Dataset,
    FeatureType,
    Feature,
    AttributeType,
    Attribute,
    Schema,
    Software,
    Style,
}

impl MetadataScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataScope::Undefined => "undefined",
            MetadataScope::Dataset => "dataset",
            MetadataScope::FeatureType => "featureType",
            MetadataScope::Feature => "feature",
            MetadataScope::AttributeType => "attributeType",
            MetadataScope::Attribute => "attribute",
            MetadataScope::Schema => "schema",
            MetadataScope::Software => "software",
            MetadataScope::Style => "style",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "dataset" => MetadataScope::Dataset,
            "featureType" => MetadataScope::FeatureType,
            "feature" => MetadataScope::Feature,
            "attributeType" => MetadataScope::AttributeType,
            "attribute" => MetadataScope::Attribute,
            "schema" => MetadataScope::Schema,
            "software" => MetadataScope::Software,
            "style" => MetadataScope::Style,
            _ => MetadataScope::Undefined,
        }
    }
}

/// What a metadata entry describes, per `gpkg_metadata_reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataTarget {
    GeoPackage,
    Table(String),
    Column { table: String, column: String },
}

impl MetadataTarget {
    pub fn reference_scope(&self) -> &'static str {
        match self {
            MetadataTarget::GeoPackage => "geopackage",
            MetadataTarget::Table(_) => "table",
            MetadataTarget::Column { .. } => "column",
        }
    }

    pub fn table_name(&self) -> Option<&str> {
        match self {
            MetadataTarget::GeoPackage => None,
            MetadataTarget::Table(t) => Some(t),
            MetadataTarget::Column { table, .. } => Some(table),
        }
    }

    pub fn column_name(&self) -> Option<&str> {
        match self {
            MetadataTarget::Column { column, .. } => Some(column),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub id: i64,
    pub scope: MetadataScope,
    pub standard_uri: String,
    pub mime_type: String,
    pub content: String,
    pub target: MetadataTarget,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionScope {
    ReadWrite,
    WriteOnly,
}

impl ExtensionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionScope::ReadWrite => "read-write",
            ExtensionScope::WriteOnly => "write-only",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub extension_name: String,
    pub definition: String,
    pub scope: ExtensionScope,
}

pub const METADATA_EXTENSION: &str = "gpkg_metadata";
pub const SCHEMA_EXTENSION: &str = "gpkg_schema";
pub const RTREE_EXTENSION: &str = "gpkg_rtree_index";

impl Extension {
    pub fn metadata() -> Self {
        Extension {
            table_name: None,
            column_name: None,
            extension_name: METADATA_EXTENSION.to_owned(),
            definition: "http://www.geopackage.org/spec130/#extension_metadata".to_owned(),
            scope: ExtensionScope::ReadWrite,
        }
    }

    pub fn schema() -> Self {
        Extension {
            table_name: None,
            column_name: None,
            extension_name: SCHEMA_EXTENSION.to_owned(),
            definition: "http://www.geopackage.org/spec130/#extension_schema".to_owned(),
            scope: ExtensionScope::ReadWrite,
        }
    }

    pub fn rtree(table: &str, column: &str) -> Self {
        Extension {
            table_name: Some(table.to_owned()),
            column_name: Some(column.to_owned()),
            extension_name: RTREE_EXTENSION.to_owned(),
            definition: "http://www.geopackage.org/spec130/#extension_rtree".to_owned(),
            scope: ExtensionScope::WriteOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Database {
    pub tables: Vec<Table>,
    pub spatial_ref_systems: Vec<SpatialRefSys>,
    pub geometry_columns: Vec<GeometryColumn>,
    pub contents: Vec<Contents>,
    pub metadata: Vec<MetadataEntry>,
    pub extensions: Vec<Extension>,
}

impl Database {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contents_for(&self, table: &str) -> Option<&Contents> {
        self.contents.iter().find(|c| c.table_name == table)
    }

    pub fn geometry_column_for(&self, table: &str) -> Option<&GeometryColumn> {
        self.geometry_columns.iter().find(|g| g.table_name == table)
    }

    pub fn srs(&self, id: i64) -> Option<&SpatialRefSys> {
        self.spatial_ref_systems.iter().find(|s| s.id == id)
    }

    /// Whether an extension is declared, either for the whole container or
    /// for `table` when given.
    pub fn has_extension(&self, name: &str, table: Option<&str>) -> bool {
        self.extensions.iter().any(|e| {
            e.extension_name == name
                && match table {
                    Some(t) => e.table_name.as_deref() == Some(t),
                    None => true,
                }
        })
    }

    /// Adds an extension unless an identical declaration exists.
    pub fn declare_extension(&mut self, ext: Extension) {
        let exists = self.extensions.iter().any(|e| {
            e.extension_name == ext.extension_name
                && e.table_name == ext.table_name
                && e.column_name == ext.column_name
        });
        if !exists {
            self.extensions.push(ext);
        }
    }

    pub fn next_metadata_id(&self) -> i64 {
        self.metadata.iter().map(|m| m.id).max().unwrap_or(0) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_follow_affinity() {
        assert_eq!(ColumnType::from_declared("MEDIUMINT"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("VARCHAR(40)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("DOUBLE"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("DATETIME"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("BOOLEAN"), ColumnType::Integer);
    }

    #[test]
    fn constraint_check_sql() {
        let range = Constraint {
            name: "signal_strength_range".into(),
            column: "signal_strength".into(),
            kind: ConstraintKind::Range {
                min: 0.0,
                max: 100.0,
                min_inclusive: true,
                max_inclusive: true,
            },
            description: None,
        };
        assert_eq!(
            range.check_sql(),
            "CHECK (signal_strength >= 0 AND signal_strength <= 100)"
        );
        let en = Constraint {
            name: "priority_values".into(),
            column: "priority".into(),
            kind: ConstraintKind::Enum {
                values: vec!["high".into(), "o'clock".into()],
            },
            description: None,
        };
        assert_eq!(en.check_sql(), "CHECK (priority IN ('high', 'o''clock'))");
    }

    #[test]
    fn extensions_are_not_duplicated() {
        let mut db = Database::default();
        db.declare_extension(Extension::metadata());
        db.declare_extension(Extension::metadata());
        db.declare_extension(Extension::rtree("home_drops", "geom"));
        assert_eq!(db.extensions.len(), 2);
        assert!(db.has_extension(RTREE_EXTENSION, Some("home_drops")));
        assert!(!db.has_extension(RTREE_EXTENSION, Some("poles")));
    }
}
