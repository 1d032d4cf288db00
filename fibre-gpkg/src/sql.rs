use crate::model::{ColumnType, GeometryColumn, Table};

pub(crate) mod table_definitions {
    pub const CREATE_SPATIAL_REF_SYS_TABLE: &str = "CREATE TABLE gpkg_spatial_ref_sys (
        srs_name TEXT NOT NULL,
        srs_id INTEGER NOT NULL PRIMARY KEY,
        organization TEXT NOT NULL,
        organization_coordsys_id INTEGER NOT NULL,
        definition TEXT NOT NULL,
        description TEXT
    )";

    pub const CREATE_CONTENTS_TABLE: &str = "CREATE TABLE gpkg_contents (
        table_name TEXT NOT NULL PRIMARY KEY,
        data_type TEXT NOT NULL,
        identifier TEXT UNIQUE,
        description TEXT DEFAULT '',
        last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
        min_x DOUBLE,
        min_y DOUBLE,
        max_x DOUBLE,
        max_y DOUBLE,
        srs_id INTEGER,
        CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
    )";

    pub const CREATE_GEOMETRY_COLUMNS_TABLE: &str = "CREATE TABLE gpkg_geometry_columns (
        table_name TEXT NOT NULL,
        column_name TEXT NOT NULL,
        geometry_type_name TEXT NOT NULL,
        srs_id INTEGER NOT NULL,
        z TINYINT NOT NULL,
        m TINYINT NOT NULL,
        CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
        CONSTRAINT uk_gc_table_name UNIQUE (table_name),
        CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
        CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
    )";

    pub const CREATE_EXTENSIONS_TABLE: &str = "CREATE TABLE gpkg_extensions (
        table_name TEXT,
        column_name TEXT,
        extension_name TEXT NOT NULL,
        definition TEXT NOT NULL,
        scope TEXT NOT NULL,
        CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
    )";

    pub const CREATE_METADATA_TABLE: &str = "CREATE TABLE gpkg_metadata (
        id INTEGER CONSTRAINT m_pk PRIMARY KEY ASC NOT NULL,
        md_scope TEXT NOT NULL DEFAULT 'dataset',
        md_standard_uri TEXT NOT NULL,
        mime_type TEXT NOT NULL DEFAULT 'text/xml',
        metadata TEXT NOT NULL DEFAULT ''
    )";

    pub const CREATE_METADATA_REFERENCE_TABLE: &str = "CREATE TABLE gpkg_metadata_reference (
        reference_scope TEXT NOT NULL,
        table_name TEXT,
        column_name TEXT,
        row_id_value INTEGER,
        timestamp DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
        md_file_id INTEGER NOT NULL,
        md_parent_id INTEGER,
        CONSTRAINT crmr_mfi_fk FOREIGN KEY (md_file_id) REFERENCES gpkg_metadata(id),
        CONSTRAINT crmr_mpi_fk FOREIGN KEY (md_parent_id) REFERENCES gpkg_metadata(id)
    )";

    pub const CREATE_DATA_COLUMNS_TABLE: &str = "CREATE TABLE gpkg_data_columns (
        table_name TEXT NOT NULL,
        column_name TEXT NOT NULL,
        name TEXT,
        title TEXT,
        description TEXT,
        mime_type TEXT,
        constraint_name TEXT,
        CONSTRAINT pk_gdc PRIMARY KEY (table_name, column_name),
        CONSTRAINT gdc_tn UNIQUE (table_name, name)
    )";

    pub const CREATE_DATA_COLUMN_CONSTRAINTS_TABLE: &str =
        "CREATE TABLE gpkg_data_column_constraints (
        constraint_name TEXT NOT NULL,
        constraint_type TEXT NOT NULL,
        value TEXT,
        min NUMERIC,
        min_is_inclusive BOOLEAN,
        max NUMERIC,
        max_is_inclusive BOOLEAN,
        description TEXT,
        CONSTRAINT gdcc_ntv UNIQUE (constraint_name, constraint_type, value)
    )";
}

/// Quotes an identifier for use in SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds the `CREATE TABLE` statement for a user table.
///
/// Geometry columns are declared with their geometry type name, as the
/// GeoPackage standard asks, falling back to `GEOMETRY`.
pub fn create_table_sql(table: &Table, geom: Option<&GeometryColumn>) -> String {
    let defs: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let decl = match c.column_type {
                ColumnType::Geometry => geom
                    .filter(|g| g.column_name == c.name)
                    .map(|g| g.geometry_type.gpkg_name())
                    .unwrap_or("GEOMETRY"),
                other => other.sql_name(),
            };
            let mut def = format!("{} {}", quote_ident(&c.name), decl);
            if c.primary_key {
                def.push_str(" PRIMARY KEY");
                if c.column_type == ColumnType::Integer {
                    def.push_str(" AUTOINCREMENT");
                }
            }
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if c.unique && !c.primary_key {
                def.push_str(" UNIQUE");
            }
            if let Some(d) = &c.default {
                def.push_str(&format!(" DEFAULT {}", d));
            }
            if let Some(check) = &c.check_expression {
                def.push_str(&format!(" CHECK ({})", check));
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(&table.name),
        defs.join(",\n    ")
    )
}

/// Recovers the CHECK expression of every column from a `CREATE TABLE`
/// statement, keyed by column name.
///
/// Table level constraints (`CONSTRAINT ...`, `PRIMARY KEY (...)`, etc.) are
/// skipped.
pub fn parse_column_checks(create_sql: &str) -> Vec<(String, String)> {
    let (Some(open), Some(close)) = (create_sql.find('('), create_sql.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let body = &create_sql[open + 1..close];

    let mut defs = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in body.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') | (None, '`') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            (None, ',') if depth == 0 => {
                defs.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    defs.push(&body[start..]);

    defs.into_iter()
        .filter_map(|def| {
            let def = def.trim();
            let name = leading_identifier(def)?;
            let upper_first = name.to_uppercase();
            if def.starts_with(|c: char| c.is_ascii_alphabetic())
                && ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"]
                    .contains(&upper_first.as_str())
            {
                return None;
            }
            let expr = check_expression(def)?;
            Some((name, expr))
        })
        .collect()
}

fn leading_identifier(def: &str) -> Option<String> {
    split_identifier(def).map(|(name, _)| name)
}

/// Splits a column definition into its name and the remainder.
fn split_identifier(def: &str) -> Option<(String, &str)> {
    match def.chars().next()? {
        q @ ('"' | '`' | '[') => {
            let close = if q == '[' { ']' } else { q };
            let rest = &def[1..];
            let end = rest.find(close)?;
            Some((rest[..end].to_owned(), &rest[end + 1..]))
        }
        _ => {
            let end = def.find(char::is_whitespace).unwrap_or(def.len());
            Some((def[..end].to_owned(), &def[end..]))
        }
    }
}

fn check_expression(def: &str) -> Option<String> {
    let (_, rest) = split_identifier(def)?;
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    for (at, ch) in rest.char_indices() {
        let outside = quote.is_none();
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"' | '`') => quote = Some(ch),
            _ => {}
        }
        let word_start = !prev.map_or(false, |c| c.is_alphanumeric() || c == '_');
        prev = Some(ch);
        let keyword = rest
            .get(at..at + "CHECK".len())
            .map_or(false, |w| w.eq_ignore_ascii_case("CHECK"));
        if !(outside && word_start && keyword) {
            continue;
        }
        let after = rest[at + "CHECK".len()..].trim_start();
        if after.starts_with('(') {
            return balanced_parens(after);
        }
    }
    None
}

/// The text inside the parenthesis group `s` starts with.
fn balanced_parens(s: &str) -> Option<String> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, ch) in s.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[1..i].trim().to_owned());
                }
            }
            _ => {}
        }
    }
    None
}

/// Statements creating and maintaining the R-Tree spatial index of one
/// geometry column, following the GeoPackage R-Tree extension.
///
/// Delivered as text for the consuming application to run. The `ST_*`
/// functions are provided by GeoPackage aware SQLite hosts.
pub fn spatial_index_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    let rtree = quote_ident(&format!("rtree_{}_{}", table, geom_column));
    let trigger = |suffix: &str| quote_ident(&format!("rtree_{}_{}_{}", table, geom_column, suffix));
    let t = quote_ident(table);
    let c = quote_ident(geom_column);
    let i = quote_ident(id_column);
    let values = |row: &str| {
        format!(
            "{row}.{i}, ST_MinX({row}.{c}), ST_MaxX({row}.{c}), ST_MinY({row}.{c}), ST_MaxY({row}.{c})"
        )
    };

    let statements = [
        format!("CREATE VIRTUAL TABLE {rtree} USING rtree(id, minx, maxx, miny, maxy);"),
        format!(
            "INSERT OR REPLACE INTO {rtree} SELECT {i}, ST_MinX({c}), ST_MaxX({c}), ST_MinY({c}), ST_MaxY({c}) FROM {t} WHERE {c} NOT NULL AND NOT ST_IsEmpty({c});"
        ),
        format!(
            "CREATE TRIGGER {} AFTER INSERT ON {t} WHEN (NEW.{c} NOT NULL AND NOT ST_IsEmpty(NEW.{c}))\nBEGIN\n  INSERT OR REPLACE INTO {rtree} VALUES ({});\nEND;",
            trigger("insert"),
            values("NEW")
        ),
        format!(
            "CREATE TRIGGER {} AFTER UPDATE OF {c} ON {t} WHEN OLD.{i} = NEW.{i} AND (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))\nBEGIN\n  INSERT OR REPLACE INTO {rtree} VALUES ({});\nEND;",
            trigger("update1"),
            values("NEW")
        ),
        format!(
            "CREATE TRIGGER {} AFTER UPDATE OF {c} ON {t} WHEN OLD.{i} = NEW.{i} AND (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))\nBEGIN\n  DELETE FROM {rtree} WHERE id = OLD.{i};\nEND;",
            trigger("update2")
        ),
        format!(
            "CREATE TRIGGER {} AFTER UPDATE ON {t} WHEN OLD.{i} != NEW.{i} AND (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))\nBEGIN\n  DELETE FROM {rtree} WHERE id = OLD.{i};\n  INSERT OR REPLACE INTO {rtree} VALUES ({});\nEND;",
            trigger("update3"),
            values("NEW")
        ),
        format!(
            "CREATE TRIGGER {} AFTER UPDATE ON {t} WHEN OLD.{i} != NEW.{i} AND (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))\nBEGIN\n  DELETE FROM {rtree} WHERE id IN (OLD.{i}, NEW.{i});\nEND;",
            trigger("update4")
        ),
        format!(
            "CREATE TRIGGER {} AFTER DELETE ON {t} WHEN OLD.{c} NOT NULL\nBEGIN\n  DELETE FROM {rtree} WHERE id = OLD.{i};\nEND;",
            trigger("delete")
        ),
    ];
    statements.join("\n\n")
}
