//! Desktop GIS extras for an assembled container.
//!
//! Adds default point styles, attribute form configuration and descriptive
//! column constraints so a GeoPackage opens ready to edit. Feature data is
//! never touched.
//!
//! Styles and widgets are picked by name. Rules are evaluated top to bottom
//! and the first match wins:
//!
//! | table name (lowercase, `_` `-` and spaces removed) | style        |
//! |----------------------------------------------------|--------------|
//! | contains `assignment`                              | assignment   |
//! | contains `homedrop`                                | home drop    |
//! | anything else                                      | generic      |
//!
//! | column                                           | widget              |
//! |--------------------------------------------------|---------------------|
//! | name contains `status` or `priority`             | value map           |
//! | name contains `date` or `time`, or ends in `_at` | date time picker    |
//! | INTEGER named like a score                       | range 0 to 100      |
//! | INTEGER containing `approved` or `activated`     | check box           |
//! | anything else                                    | text, multiline for |
//! |                                                  | `notes` / `reason`  |

use crate::model::*;
use crate::result::Result;
use crate::schema;
use crate::writer::xml_escape;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SLD_URI: &str = "http://www.opengis.net/sld";
pub const FORM_URI: &str = "https://qgis.org/attribute-form";
pub const PROJECT_URI: &str = "https://json-schema.org/draft/2020-12/schema";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityOptions {
    pub include_styles: bool,
    pub include_forms: bool,
    pub include_constraints: bool,
    pub project_metadata: Option<ProjectMetadata>,
}

impl Default for CompatibilityOptions {
    fn default() -> Self {
        CompatibilityOptions {
            include_styles: true,
            include_forms: true,
            include_constraints: true,
            project_metadata: None,
        }
    }
}

/// Project level information stored as JSON for the whole container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMetadata {
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<String>,
    pub author: Option<String>,
    pub organization: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EditWidget {
    ValueMap { values: Vec<String> },
    DateTime { display_format: String, calendar_popup: bool },
    Range { min: i64, max: i64, step: i64 },
    CheckBox { checked: String, unchecked: String },
    TextEdit { multiline: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub alias: String,
    pub widget: EditWidget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormConfig {
    pub table: String,
    pub layout: String,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSymbol {
    pub name: &'static str,
    pub shape: &'static str,
    pub fill: &'static str,
    pub stroke: &'static str,
    pub size: f64,
}

pub const ASSIGNMENT_SYMBOL: PointSymbol = PointSymbol {
    name: "assignment",
    shape: "triangle",
    fill: "#ff8c00",
    stroke: "#000000",
    size: 10.0,
};
pub const HOME_DROP_SYMBOL: PointSymbol = PointSymbol {
    name: "home drop",
    shape: "circle",
    fill: "#1e90ff",
    stroke: "#ffffff",
    size: 8.0,
};
pub const GENERIC_SYMBOL: PointSymbol = PointSymbol {
    name: "generic",
    shape: "square",
    fill: "#808080",
    stroke: "#000000",
    size: 6.0,
};

const STYLE_RULES: &[(&str, PointSymbol)] = &[
    ("assignment", ASSIGNMENT_SYMBOL),
    ("homedrop", HOME_DROP_SYMBOL),
];

/// The default symbol for a table.
pub fn symbol_for_table(table: &str) -> PointSymbol {
    let key: String = table
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .collect();
    STYLE_RULES
        .iter()
        .find(|(needle, _)| key.contains(needle))
        .map(|(_, symbol)| *symbol)
        .unwrap_or(GENERIC_SYMBOL)
}

type WidgetRule = (fn(&str, ColumnType) -> bool, fn(&str) -> EditWidget);

const WIDGET_RULES: &[WidgetRule] = &[
    (is_enumerated, value_map),
    (is_temporal, date_time),
    (is_score, score_range),
    (is_flag, check_box),
];

fn is_enumerated(name: &str, _: ColumnType) -> bool {
    name.contains("status") || name.contains("priority")
}

fn is_temporal(name: &str, _: ColumnType) -> bool {
    name.contains("date") || name.contains("time") || name.ends_with("_at")
}

fn is_score(name: &str, column_type: ColumnType) -> bool {
    column_type == ColumnType::Integer
        && ["score", "strength", "quality", "percent"]
            .iter()
            .any(|n| name.contains(n))
}

fn is_flag(name: &str, column_type: ColumnType) -> bool {
    column_type == ColumnType::Integer && (name.contains("approved") || name.contains("activated"))
}

fn value_map(name: &str) -> EditWidget {
    let values = schema::enumerated_values(name).unwrap_or(schema::STATUS_VALUES);
    EditWidget::ValueMap {
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

fn date_time(_: &str) -> EditWidget {
    EditWidget::DateTime {
        display_format: "yyyy-MM-dd HH:mm:ss".to_owned(),
        calendar_popup: true,
    }
}

fn score_range(_: &str) -> EditWidget {
    EditWidget::Range {
        min: 0,
        max: 100,
        step: 1,
    }
}

fn check_box(_: &str) -> EditWidget {
    EditWidget::CheckBox {
        checked: "1".to_owned(),
        unchecked: "0".to_owned(),
    }
}

/// The edit widget recommended for a column.
pub fn widget_for_column(column: &Column) -> EditWidget {
    let name = column.name.to_lowercase();
    WIDGET_RULES
        .iter()
        .find(|(applies, _)| applies(&name, column.column_type))
        .map(|(_, widget)| widget(&name))
        .unwrap_or_else(|| EditWidget::TextEdit {
            multiline: name.contains("notes") || name.contains("reason"),
        })
}

fn alias(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn form_config(table: &Table) -> FormConfig {
    FormConfig {
        table: table.name.clone(),
        layout: "auto".to_owned(),
        fields: table
            .property_columns()
            .map(|c| FormField {
                name: c.name.clone(),
                alias: alias(&c.name),
                widget: widget_for_column(c),
            })
            .collect(),
    }
}

/// Styled Layer Descriptor with a single point rule.
pub fn style_sld(layer: &str, symbol: &PointSymbol) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<StyledLayerDescriptor version="1.1.0" xmlns="http://www.opengis.net/sld" xmlns:se="http://www.opengis.net/se">
  <NamedLayer>
    <se:Name>{layer}</se:Name>
    <UserStyle>
      <se:Name>{name}</se:Name>
      <se:FeatureTypeStyle>
        <se:Rule>
          <se:Name>{name}</se:Name>
          <se:PointSymbolizer>
            <se:Graphic>
              <se:Mark>
                <se:WellKnownName>{shape}</se:WellKnownName>
                <se:Fill><se:SvgParameter name="fill">{fill}</se:SvgParameter></se:Fill>
                <se:Stroke><se:SvgParameter name="stroke">{stroke}</se:SvgParameter></se:Stroke>
              </se:Mark>
              <se:Size>{size}</se:Size>
            </se:Graphic>
          </se:PointSymbolizer>
        </se:Rule>
      </se:FeatureTypeStyle>
    </UserStyle>
  </NamedLayer>
</StyledLayerDescriptor>
"#,
        layer = xml_escape(layer),
        name = symbol.name,
        shape = symbol.shape,
        fill = symbol.fill,
        stroke = symbol.stroke,
        size = symbol.size,
    )
}

/// Descriptive constraints for score and enumerated columns that have none.
pub fn suggested_constraints(table: &Table) -> Vec<Constraint> {
    table
        .property_columns()
        .filter(|c| !table.constraints.iter().any(|k| k.column == c.name))
        .filter_map(|c| {
            let name = c.name.to_lowercase();
            if is_score(&name, c.column_type) {
                Some(Constraint {
                    name: format!("{}_{}_range", table.name, c.name),
                    column: c.name.clone(),
                    kind: ConstraintKind::Range {
                        min: 0.0,
                        max: 100.0,
                        min_inclusive: true,
                        max_inclusive: true,
                    },
                    description: Some(format!("{} between 0 and 100", alias(&c.name))),
                })
            } else if is_enumerated(&name, c.column_type) {
                let values = schema::enumerated_values(&name)?;
                Some(Constraint {
                    name: format!("{}_{}_values", table.name, c.name),
                    column: c.name.clone(),
                    kind: ConstraintKind::Enum {
                        values: values.iter().map(|v| v.to_string()).collect(),
                    },
                    description: Some(format!("Allowed {} values", alias(&c.name))),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Returns an enriched copy of `db`.
pub fn apply_compatibility(db: &Database, options: &CompatibilityOptions) -> Result<Database> {
    let mut out = db.clone();
    let now = Utc::now().trunc_subsecs(3);

    out.declare_extension(Extension::metadata());
    out.declare_extension(Extension::schema());
    for g in &db.geometry_columns {
        out.declare_extension(Extension::rtree(&g.table_name, &g.column_name));
    }
    for table in out.tables.iter_mut() {
        if table.geometry_column.is_some() {
            table.spatial_index = true;
        }
    }

    let mut entries = Vec::new();
    for table in &out.tables {
        if options.include_styles && table.geometry_column.is_some() {
            let symbol = symbol_for_table(&table.name);
            debug!(table = %table.name, style = symbol.name, "adding style");
            entries.push((
                MetadataScope::Style,
                SLD_URI,
                "text/xml",
                style_sld(&table.name, &symbol),
                MetadataTarget::Table(table.name.clone()),
            ));
        }
        if options.include_forms {
            entries.push((
                MetadataScope::FeatureType,
                FORM_URI,
                "application/json",
                serde_json::to_string_pretty(&form_config(table))?,
                MetadataTarget::Table(table.name.clone()),
            ));
        }
    }
    if let Some(project) = &options.project_metadata {
        entries.push((
            MetadataScope::Dataset,
            PROJECT_URI,
            "application/json",
            serde_json::to_string_pretty(project)?,
            MetadataTarget::GeoPackage,
        ));
    }
    // an earlier pass's entry for the same target is refreshed in place
    for (scope, uri, mime, content, target) in entries {
        let existing = out
            .metadata
            .iter()
            .position(|m| m.standard_uri == uri && m.target == target);
        let entry = MetadataEntry {
            id: existing.map_or_else(|| out.next_metadata_id(), |i| out.metadata[i].id),
            scope,
            standard_uri: uri.to_owned(),
            mime_type: mime.to_owned(),
            content,
            target,
            timestamp: now,
        };
        match existing {
            Some(i) => out.metadata[i] = entry,
            None => out.metadata.push(entry),
        }
    }

    if options.include_constraints {
        for table in out.tables.iter_mut() {
            let added = suggested_constraints(table);
            debug!(table = %table.name, constraints = added.len(), "adding constraints");
            table.constraints.extend(added);
        }
    }
    Ok(out)
}

/// Suggestions for making a container friendlier to desktop tools.
pub fn validate_compatibility(db: &Database) -> Vec<String> {
    let mut recommendations = Vec::new();
    if !db.has_extension(METADATA_EXTENSION, None) {
        recommendations.push("declare the gpkg_metadata extension so styles and forms are found".to_owned());
    }
    for table in &db.tables {
        if table.geometry_column.is_some()
            && !(table.spatial_index || db.has_extension(RTREE_EXTENSION, Some(&table.name)))
        {
            recommendations.push(format!(
                "add a spatial index to '{}' for faster map rendering",
                table.name
            ));
        }
    }
    if db.metadata.is_empty() {
        recommendations.push("add metadata describing the dataset".to_owned());
    }
    recommendations
}
