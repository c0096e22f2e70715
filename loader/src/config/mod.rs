//! Loader configuration.
//!
//! Everything the loader needs is carried by one [`LoaderConfig`] value that
//! is passed to the constructors; nothing is read from ambient state once it
//! is built. [`LoaderConfig::from_env`] reads the process environment, which
//! the binary seeds from `.env` at startup; [`LoaderConfig::from_lookup`]
//! takes any lookup function, which keeps it testable.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{ConfigError, ConfigResult};
use crate::fields::HeaderPolicy;
use crate::parser::Delimiter;

// =============================================================================
// Policies
// =============================================================================

/// What to do with a row that fails validation or geometry decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowPolicy {
    /// Fail the whole file.
    #[default]
    Abort,
    /// Log the row, record it in the summary and continue.
    Skip,
}

/// Text encoding of the geometry bound to the insert call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFormat {
    #[default]
    GeoJson,
    Wkt,
}

/// Per-file ingestion behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub header_policy: HeaderPolicy,
    pub row_policy: RowPolicy,
    /// Mirror an unsupplied range bound from its counterpart.
    pub fill_missing_bounds: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            header_policy: HeaderPolicy::Reject,
            row_policy: RowPolicy::Abort,
            fill_missing_bounds: true,
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvConfig {
    pub delimiter: Delimiter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslConfig {
    pub enabled: bool,
    pub reject_unauthorized: bool,
    pub ca: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub cert: Option<PathBuf>,
}

/// Database connection and routine names.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub schema: String,
    pub insert_procedure: String,
    pub part_record_type: String,
    /// Aggregate recompute routine, `None` when disabled.
    pub update_procedure: Option<String>,
    pub geometry_format: GeometryFormat,
    pub ssl: SslConfig,
    pub pool_min: u32,
    pub pool_max: u32,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("schema", &self.schema)
            .field("insert_procedure", &self.insert_procedure)
            .field("part_record_type", &self.part_record_type)
            .field("update_procedure", &self.update_procedure)
            .field("geometry_format", &self.geometry_format)
            .field("ssl", &self.ssl)
            .field("pool_min", &self.pool_min)
            .field("pool_max", &self.pool_max)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            schema: "polygon_parts".to_string(),
            insert_procedure: "insert_part".to_string(),
            part_record_type: "insert_part_record".to_string(),
            update_procedure: Some("update_polygon_parts".to_string()),
            geometry_format: GeometryFormat::GeoJson,
            ssl: SslConfig::default(),
            pool_min: 0,
            pool_max: 1,
        }
    }
}

/// Base URLs of the downstream services used by `publish`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientUrls {
    pub raster_catalog: Option<String>,
    pub geoserver_api: Option<String>,
    pub polygon_parts_manager: Option<String>,
}

impl ClientUrls {
    /// URL of a service, or [`ConfigError::Missing`] naming its variable.
    pub fn require<'a>(url: &'a Option<String>, key: &str) -> ConfigResult<&'a str> {
        url.as_deref()
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }
}

// =============================================================================
// Loader Config
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub csv: CsvConfig,
    pub db: DbConfig,
    pub ingest: IngestOptions,
    pub clients: ClientUrls,
}

impl LoaderConfig {
    /// Build from the process environment as it is.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = DbConfig::default();

        let delimiter = match vars.get("CSV_DELIMITER") {
            None => Delimiter::default(),
            Some(v) if v.eq_ignore_ascii_case("auto") => Delimiter::Auto,
            Some(v) if v == "\\t" => Delimiter::Char('\t'),
            Some(v) => {
                let mut chars = v.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii() => Delimiter::Char(c),
                    _ => return Err(invalid("CSV_DELIMITER", &v, "expected one ASCII character or 'auto'")),
                }
            }
        };

        let db = DbConfig {
            host: vars.string("PGHOST", &defaults.host),
            port: vars.parsed("PGPORT", defaults.port)?,
            database: vars.string("PGDATABASE", &defaults.database),
            user: vars.string("PGUSER", &defaults.user),
            password: vars.raw("PGPASSWORD").unwrap_or_default(),
            schema: vars.identifier("DB_SCHEMA", &defaults.schema)?,
            insert_procedure: vars.identifier("DB_INSERT_PART_PROCEDURE", &defaults.insert_procedure)?,
            part_record_type: vars.identifier("DB_PART_RECORD_TYPE", &defaults.part_record_type)?,
            update_procedure: match vars.raw("DB_UPDATE_PARTS_PROCEDURE") {
                None => defaults.update_procedure.clone(),
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(check_identifier("DB_UPDATE_PARTS_PROCEDURE", v.trim())?),
            },
            geometry_format: match vars.get("DB_GEOMETRY_FORMAT").map(|v| v.to_lowercase()) {
                None => GeometryFormat::GeoJson,
                Some(v) if v == "geojson" => GeometryFormat::GeoJson,
                Some(v) if v == "wkt" => GeometryFormat::Wkt,
                Some(v) => return Err(invalid("DB_GEOMETRY_FORMAT", &v, "expected 'geojson' or 'wkt'")),
            },
            ssl: SslConfig {
                enabled: vars.flag("DB_SSL_ENABLED", false)?,
                reject_unauthorized: vars.flag("DB_SSL_REJECT_UNAUTHORIZED", false)?,
                ca: vars.get("DB_SSL_CA").map(PathBuf::from),
                key: vars.get("DB_SSL_KEY").map(PathBuf::from),
                cert: vars.get("DB_SSL_CERT").map(PathBuf::from),
            },
            pool_min: vars.parsed("DB_POOL_MIN", defaults.pool_min)?,
            pool_max: vars.parsed("DB_POOL_MAX", defaults.pool_max)?,
        };

        if db.pool_max == 0 || db.pool_min > db.pool_max {
            return Err(invalid(
                "DB_POOL_MAX",
                &db.pool_max.to_string(),
                "must be at least 1 and not below DB_POOL_MIN",
            ));
        }

        let ingest = IngestOptions {
            header_policy: match vars.get("INGEST_UNKNOWN_HEADERS").map(|v| v.to_lowercase()) {
                None => HeaderPolicy::Reject,
                Some(v) if v == "reject" => HeaderPolicy::Reject,
                Some(v) if v == "ignore" => HeaderPolicy::Ignore,
                Some(v) => return Err(invalid("INGEST_UNKNOWN_HEADERS", &v, "expected 'reject' or 'ignore'")),
            },
            row_policy: match vars.get("INGEST_INVALID_ROWS").map(|v| v.to_lowercase()) {
                None => RowPolicy::Abort,
                Some(v) if v == "abort" => RowPolicy::Abort,
                Some(v) if v == "skip" => RowPolicy::Skip,
                Some(v) => return Err(invalid("INGEST_INVALID_ROWS", &v, "expected 'abort' or 'skip'")),
            },
            fill_missing_bounds: vars.flag("INGEST_FILL_MISSING_BOUNDS", true)?,
        };

        let clients = ClientUrls {
            raster_catalog: vars.get("RASTER_CATALOG_URL").map(trim_slash),
            geoserver_api: vars.get("GEOSERVER_API_URL").map(trim_slash),
            polygon_parts_manager: vars.get("POLYGON_PARTS_MANAGER_URL").map(trim_slash),
        };

        Ok(Self {
            csv: CsvConfig { delimiter },
            db,
            ingest,
            clients,
        })
    }
}

/// Validate a schema, routine, or type name.
pub fn check_identifier(key: &str, value: &str) -> ConfigResult<String> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidIdentifier {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    /// Trimmed value; empty counts as unset.
    fn get(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn identifier(&self, key: &str, default: &str) -> ConfigResult<String> {
        check_identifier(key, &self.string(key, default))
    }

    fn parsed<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|e: T::Err| invalid(key, &v, &e.to_string())),
        }
    }

    fn flag(&self, key: &str, default: bool) -> ConfigResult<bool> {
        match self.get(key).map(|v| v.to_lowercase()).as_deref() {
            None => Ok(default),
            Some("true" | "1" | "yes") => Ok(true),
            Some("false" | "0" | "no") => Ok(false),
            Some(other) => Err(invalid(key, other, "expected a boolean")),
        }
    }
}

fn invalid(key: &str, value: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
