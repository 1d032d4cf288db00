//! GeoPackage exchange for fibre home drop installations.
//!
//! Field captured [`HomeDropRecord`]s are written into a single point layer
//! that desktop GIS tools open directly, and GeoPackages coming back from the
//! office are read into a [`Database`] for filtering or turned into
//! [`Assignment`]s for the crews.
//!
//! Every call works on its own scratch copy of the bytes, so nothing is
//! shared between calls.
//!
//! ```ignore
//! use fibre_gpkg::{read_geopackage, write_geopackage, ReadOptions, WriteOptions};
//!
//! let out = write_geopackage(&records, &WriteOptions::default())?;
//! let db = read_geopackage(&out.bytes, &ReadOptions::default())?;
//! assert_eq!(db.tables[0].features.len(), records.len());
//! ```
pub mod compat;
pub mod container;
pub mod gpkg_wkb;
pub mod model;
pub mod reader;
mod result;
pub mod schema;
mod sql;
pub mod srs;
pub mod transform;
pub mod types;
pub mod validate;
pub mod writer;

#[doc(inline)]
pub use compat::{apply_compatibility, validate_compatibility, CompatibilityOptions};
#[doc(inline)]
pub use model::Database;
#[doc(inline)]
pub use reader::{extract_assignments, list_tables, read_geopackage, Assignment, ReadOptions};
pub use result::{Error, Result};
#[doc(inline)]
pub use schema::HomeDropRecord;
#[doc(inline)]
pub use writer::{write_geopackage, GeoPackageOutput, WriteOptions};
