/// The result returned by many methods within the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error decoding WKB geometry: {0}")]
    GeomDecodeError(String),
    #[error("Error encoding GeoPackage geometry: {0}")]
    GeomEncodeError(String),
    #[error("Unsupported WKB geometry type {0}")]
    UnsupportedGeometryType(u32),
    #[error("Point ({x}, {y}) is outside the bounds of EPSG:{srs_id}")]
    OutOfBounds { x: f64, y: f64, srs_id: i64 },
    #[error("No transform available from EPSG:{source_srs} to EPSG:{target_srs}")]
    UnsupportedTransform { source_srs: i64, target_srs: i64 },
    #[error("Spatial reference system {0} is not registered")]
    UnknownSrs(i64),
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),
    #[error("Table '{0}' was not found in the GeoPackage")]
    TableNotFound(String),
    #[error("Table '{table}' has no column named '{column}'")]
    UnknownColumn { table: String, column: String },
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    #[error("Source is not a GeoPackage: {0}")]
    NotAGeoPackage(String),
    #[error("Failed to read GeoPackage: {0}")]
    ReadError(#[source] Box<Error>),
    #[error("GeoPackage failed validation: {}", .errors.join("; "))]
    ValidationError { errors: Vec<String> },
    #[error("Failed to write GeoPackage: {0}")]
    WriteError(#[source] Box<Error>),
    #[error("Error when accessing the SQLite database")]
    SQLiteError(#[from] rusqlite::Error),
    #[error("I/O error while moving GeoPackage bytes")]
    IoError(#[from] std::io::Error),
    #[error("Error encoding JSON")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn read(cause: Error) -> Self {
        match cause {
            already @ Error::ReadError(_) => already,
            other => Error::ReadError(Box::new(other)),
        }
    }

    pub(crate) fn write(cause: Error) -> Self {
        match cause {
            already @ (Error::WriteError(_) | Error::ValidationError { .. }) => already,
            other => Error::WriteError(Box::new(other)),
        }
    }
}
