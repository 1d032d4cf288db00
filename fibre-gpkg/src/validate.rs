use crate::model::{ColumnType, Database};
use crate::result::{Error, Result};

/// Outcome of checking a [`Database`] for structural problems.
///
/// Warnings never make a database invalid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Turns hard errors into [`Error::ValidationError`], listing all of them.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid {
            Ok(self.warnings)
        } else {
            Err(Error::ValidationError {
                errors: self.errors,
            })
        }
    }
}

pub fn validate(db: &Database) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if db.tables.is_empty() {
        errors.push("GeoPackage has no tables".to_owned());
    }
    if db.spatial_ref_systems.is_empty() {
        errors.push("GeoPackage has no spatial reference systems".to_owned());
    }
    if db.geometry_columns.is_empty() {
        warnings.push("GeoPackage declares no geometry columns".to_owned());
    }

    for (i, table) in db.tables.iter().enumerate() {
        if table.name.trim().is_empty() {
            errors.push(format!("table at position {} has no name", i));
            continue;
        }
        if table.columns.is_empty() {
            errors.push(format!("table '{}' has no columns", table.name));
        }
        if let Some(geom) = &table.geometry_column {
            let matching = table
                .columns
                .iter()
                .any(|c| &c.name == geom && c.column_type == ColumnType::Geometry);
            if !matching {
                errors.push(format!(
                    "table '{}' declares geometry column '{}' but has no GEOMETRY column with that name",
                    table.name, geom
                ));
            }
        }
        if table.primary_key().is_none() {
            warnings.push(format!("table '{}' has no primary key column", table.name));
        }
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}
