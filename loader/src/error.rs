//! Error types for the polygon parts loader.
//!
//! One error type per layer:
//!
//! - [`HeaderError`] - header line rejected before any row is read
//! - [`ContentError`] - a data row failed validation
//! - [`GeometryError`] - a geometry cell could not be decomposed
//! - [`StorageError`] - the storage sink refused an operation
//! - [`ConfigError`] - configuration could not be built
//! - [`ClientError`] - a downstream HTTP collaborator failed
//! - [`LoadError`] - top-level error of a whole-file load
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::fields::Field;

// =============================================================================
// Header Errors
// =============================================================================

/// Errors while mapping the header line.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// Header not in the field catalog.
    #[error("Failed validation of headers \"{header}\" -- unsupported header")]
    Unsupported { header: String },

    /// Required headers missing.
    #[error("Failed validation of headers -- missing headers: {}", join_fields(.fields))]
    Missing { fields: Vec<Field> },

    /// No header line at all.
    #[error("Failed validation of headers -- input has no header line")]
    Empty,
}

// =============================================================================
// Content Validation Errors
// =============================================================================

/// Errors found while checking one data row.
///
/// Row numbers are 1-based and count data rows only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContentError {
    /// Required cell absent or empty.
    #[error("Failed validation of field \"{field}\" at row {row} -- missing a mandatory field")]
    MissingField { field: Field, row: usize },

    /// Value outside a closed domain.
    #[error("Failed validation of field \"{field}\" at row {row} -- value should be one of: {accepted}")]
    InvalidDomain {
        field: Field,
        row: usize,
        value: String,
        accepted: String,
    },

    /// Value is not a number.
    #[error("Failed validation of field \"{field}\" at row {row} -- value should be a number, got '{value}'")]
    InvalidNumber {
        field: Field,
        row: usize,
        value: String,
    },

    /// Value is not a date.
    #[error("Failed validation of field \"{field}\" at row {row} -- value should be a date, got '{value}'")]
    InvalidDate {
        field: Field,
        row: usize,
        value: String,
    },

    /// Geometry tag is not POLYGON or MULTIPOLYGON.
    #[error("Failed validation of field \"geom\" at row {row} -- Only MULTIPOLYGON and POLYGON geometry types are supported, got '{found}'")]
    UnsupportedGeometryType { row: usize, found: String },
}

impl ContentError {
    /// Row the error was found in.
    pub fn row(&self) -> usize {
        match self {
            ContentError::MissingField { row, .. }
            | ContentError::InvalidDomain { row, .. }
            | ContentError::InvalidNumber { row, .. }
            | ContentError::InvalidDate { row, .. }
            | ContentError::UnsupportedGeometryType { row, .. } => *row,
        }
    }
}

// =============================================================================
// Geometry Errors
// =============================================================================

/// Errors during geometry decomposition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Malformed geometry text.
    #[error("Failed to parse geometry at row {row}: {message}")]
    Parse { row: usize, message: String },

    /// Parsed, but neither a polygon nor a multipolygon.
    #[error("Only MULTIPOLYGON and POLYGON geometry types are supported, got {kind} at row {row}")]
    Unsupported { row: usize, kind: String },

    /// Polygon without an exterior ring, or multipolygon without members.
    #[error("Empty {kind} geometry at row {row}")]
    Empty { row: usize, kind: String },
}

impl GeometryError {
    pub fn row(&self) -> usize {
        match self {
            GeometryError::Parse { row, .. }
            | GeometryError::Unsupported { row, .. }
            | GeometryError::Empty { row, .. } => *row,
        }
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors from the storage sink.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Constraint violation, connectivity, or any other database failure.
    #[error("{0}")]
    Database(#[from] sqlx::Error),

    /// A record could not be encoded for the sink.
    #[error("Could not encode polygon part: {0}")]
    Encode(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable holds a value of the wrong shape.
    #[error("Invalid value for {key}: '{value}' ({message})")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    /// Schema, procedure, or type name is not a plain identifier.
    #[error("Invalid SQL identifier for {key}: '{value}'")]
    InvalidIdentifier { key: String, value: String },

    /// Variable required by the selected command is not set.
    #[error("Missing configuration: {0}")]
    Missing(String),

    /// TLS material could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// Client Errors
// =============================================================================

/// Errors from downstream HTTP collaborators.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Non-success status.
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Body did not match the expected shape.
    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    /// Lookup returned nothing.
    #[error("Not found: {0}")]
    NotFound(String),
}

// =============================================================================
// Publish Errors
// =============================================================================

/// Errors while publishing one catalog layer.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Layer with id: {catalog_id} has no footprint")]
    MissingFootprint { catalog_id: String },

    #[error("Layer with id: {catalog_id} is neither a Polygon nor a MultiPolygon ({kind})")]
    UnsupportedFootprint { catalog_id: String, kind: String },

    /// Footprint file could not be read.
    #[error(transparent)]
    Input(#[from] LoadError),

    /// Footprint file row rejected. Row numbers count data rows from 1.
    #[error("Error on row {row}: {message}")]
    Row { row: usize, message: String },
}

// =============================================================================
// Load Errors (top-level)
// =============================================================================

/// Top-level error of a whole-file load.
///
/// This is the error returned by [`crate::transform::pipeline::Loader::load_file`].
/// Any variant means the transaction was rolled back.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Input file could not be read.
    #[error("Cannot read input: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited text is malformed.
    #[error("Invalid CSV at line {line}: {message}")]
    Csv { line: u64, message: String },

    /// Header line rejected.
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// Row failed validation.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// Row geometry could not be decomposed.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Storage failure while processing a row.
    #[error("Failed processing polygon part at row {row} -- {source}")]
    Storage {
        row: usize,
        #[source]
        source: StorageError,
    },

    /// Storage failure outside the row loop (connect, recompute, commit).
    #[error("Storage error: {0}")]
    Session(#[source] StorageError),

    /// Anything else, with row context.
    #[error("Unexpected failure at row {row} -- {message}")]
    Unexpected { row: usize, message: String },

    /// Configuration rejected.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run interrupted by a signal.
    #[error("Processing cancelled")]
    Cancelled,
}

impl From<csv::Error> for LoadError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(io) => LoadError::Io(io),
            kind => LoadError::Csv {
                line,
                message: csv_kind_message(&kind),
            },
        }
    }
}

fn csv_kind_message(kind: &csv::ErrorKind) -> String {
    match kind {
        csv::ErrorKind::Utf8 { err, .. } => format!("invalid UTF-8: {}", err),
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {} fields, found {}", expected_len, len),
        other => format!("{:?}", other),
    }
}

fn join_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type for whole-file loads.
pub type LoadResult<T> = Result<T, LoadError>;
