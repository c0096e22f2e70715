//! PostgreSQL part store.
//!
//! Each record goes through the configured insert routine as one composite
//! value:
//!
//! ```sql
//! CALL polygon_parts.insert_part(($1, ..., $20)::"polygon_parts".insert_part_record)
//! ```
//!
//! The session's backend pid is recorded when a sink opens, so
//! [`PgPartStore::cancel`] can interrupt a running statement from a separate
//! connection.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{Connection, Postgres, Transaction};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::config::{DbConfig, GeometryFormat};
use crate::error::{StorageError, StorageResult};
use crate::fields::Field;
use crate::geometry;
use crate::models::PartRecord;

use super::{PartSink, PartStore};

/// Order in which the insert routine expects its fields.
pub const INSERT_FIELD_ORDER: [Field; 20] = [
    Field::RecordId,
    Field::ProductId,
    Field::ProductName,
    Field::ProductVersion,
    Field::SourceDateStartUtc,
    Field::SourceDateEndUtc,
    Field::MinResolutionDegree,
    Field::MaxResolutionDegree,
    Field::MinResolutionMeter,
    Field::MaxResolutionMeter,
    Field::MinHorizontalAccuracyCe90,
    Field::MaxHorizontalAccuracyCe90,
    Field::Sensors,
    Field::Region,
    Field::Classification,
    Field::Description,
    Field::Geom,
    Field::ImageName,
    Field::ProductType,
    Field::SrsName,
];

const NO_BACKEND: i32 = 0;

/// Statements derived from the configured names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartStatements {
    pub search_path: String,
    pub insert: String,
    pub recompute: Option<String>,
}

impl PartStatements {
    /// Names are expected to be validated identifiers.
    pub fn new(db: &DbConfig) -> Self {
        let placeholders = (1..=INSERT_FIELD_ORDER.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(",");

        Self {
            search_path: format!("SET search_path TO {}, public", db.schema),
            insert: format!(
                "CALL {schema}.{procedure}(({placeholders})::\"{schema}\".{record_type})",
                schema = db.schema,
                procedure = db.insert_procedure,
                placeholders = placeholders,
                record_type = db.part_record_type,
            ),
            recompute: db
                .update_procedure
                .as_ref()
                .map(|procedure| format!("CALL {}.{}()", db.schema, procedure)),
        }
    }
}

/// Pooled PostgreSQL store.
pub struct PgPartStore {
    pool: PgPool,
    options: PgConnectOptions,
    statements: Arc<PartStatements>,
    geometry_format: GeometryFormat,
    backend_pid: Arc<AtomicI32>,
}

impl PgPartStore {
    /// Connect a pool sized by the configuration.
    pub async fn connect(db: &DbConfig) -> StorageResult<Self> {
        let options = connect_options(db);
        let pool = PgPoolOptions::new()
            .min_connections(db.pool_min)
            .max_connections(db.pool_max)
            .connect_with(options.clone())
            .await?;

        tracing::debug!(
            host = %db.host,
            database = %db.database,
            schema = %db.schema,
            "connected to part store"
        );

        Ok(Self {
            pool,
            options,
            statements: Arc::new(PartStatements::new(db)),
            geometry_format: db.geometry_format,
            backend_pid: Arc::new(AtomicI32::new(NO_BACKEND)),
        })
    }

    /// Backend pid of the open sink, if any.
    pub fn backend_pid(&self) -> Option<i32> {
        match self.backend_pid.load(Ordering::SeqCst) {
            NO_BACKEND => None,
            pid => Some(pid),
        }
    }
}

#[async_trait]
impl PartStore for PgPartStore {
    type Sink = PgPartSink;

    async fn begin(&self) -> StorageResult<PgPartSink> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&self.statements.search_path)
            .execute(&mut *tx)
            .await?;

        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await?;
        self.backend_pid.store(pid, Ordering::SeqCst);

        Ok(PgPartSink {
            tx,
            statements: Arc::clone(&self.statements),
            geometry_format: self.geometry_format,
            backend_pid: Arc::clone(&self.backend_pid),
        })
    }

    async fn cancel(&self) -> StorageResult<bool> {
        let Some(pid) = self.backend_pid() else {
            return Ok(false);
        };

        let mut admin = PgConnection::connect_with(&self.options).await?;
        let cancelled: bool = sqlx::query_scalar("SELECT pg_cancel_backend($1)")
            .bind(pid)
            .fetch_one(&mut admin)
            .await?;
        admin.close().await?;

        tracing::warn!(pid, cancelled, "requested cancel of running statement");
        Ok(cancelled)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Open transaction on one pooled connection.
pub struct PgPartSink {
    tx: Transaction<'static, Postgres>,
    statements: Arc<PartStatements>,
    geometry_format: GeometryFormat,
    backend_pid: Arc<AtomicI32>,
}

impl PgPartSink {
    fn encode_geometry(&self, record: &PartRecord) -> StorageResult<String> {
        match self.geometry_format {
            GeometryFormat::Wkt => Ok(geometry::to_wkt(&record.geom)),
            GeometryFormat::GeoJson => serde_json::to_string(&geometry::to_geojson(&record.geom))
                .map_err(|e| StorageError::Encode(e.to_string())),
        }
    }

    fn release(&self) {
        self.backend_pid.store(NO_BACKEND, Ordering::SeqCst);
    }
}

#[async_trait]
impl PartSink for PgPartSink {
    async fn insert_part(&mut self, record: &PartRecord) -> StorageResult<()> {
        let geom = self.encode_geometry(record)?;

        sqlx::query(&self.statements.insert)
            .bind(&record.record_id)
            .bind(&record.product_id)
            .bind(&record.product_name)
            .bind(&record.product_version)
            .bind(record.source_date_start)
            .bind(record.source_date_end)
            .bind(record.min_resolution_degree)
            .bind(record.max_resolution_degree)
            .bind(record.min_resolution_meter)
            .bind(record.max_resolution_meter)
            .bind(record.min_horizontal_accuracy_ce90)
            .bind(record.max_horizontal_accuracy_ce90)
            .bind(&record.sensors)
            .bind(&record.region)
            .bind(record.classification.map(|c| c.level()))
            .bind(&record.description)
            .bind(geom)
            .bind(&record.image_name)
            .bind(record.product_type.as_str())
            .bind(&record.srs_name)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn recompute_parts(&mut self) -> StorageResult<()> {
        if let Some(sql) = self.statements.recompute.as_deref() {
            sqlx::query(sql).execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn commit(self) -> StorageResult<()> {
        self.release();
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StorageResult<()> {
        self.release();
        self.tx.rollback().await?;
        Ok(())
    }
}

fn connect_options(db: &DbConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .database(&db.database)
        .username(&db.user)
        .password(&db.password);

    options = match (db.ssl.enabled, db.ssl.reject_unauthorized) {
        (false, _) => options.ssl_mode(PgSslMode::Disable),
        (true, false) => options.ssl_mode(PgSslMode::Require),
        (true, true) => options.ssl_mode(PgSslMode::VerifyFull),
    };

    if let Some(ca) = &db.ssl.ca {
        options = options.ssl_root_cert(ca);
    }
    if let Some(cert) = &db.ssl.cert {
        options = options.ssl_client_cert(cert);
    }
    if let Some(key) = &db.ssl.key {
        options = options.ssl_client_key(key);
    }

    options
}
