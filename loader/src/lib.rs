//! # Parts Loader - imagery footprint CSV ingestion
//!
//! Loads delimited files describing imagery footprints into polygon parts
//! storage. A file is loaded whole or not at all: every row goes through one
//! transaction that commits only after the last row and the aggregate
//! recompute succeed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐
//! │ CSV File │──▶│  Header  │──▶│  Validate  │──▶│ Decompose  │──▶│   Sink   │
//! │          │   │  Mapper  │   │  row       │   │ + records  │   │ (1 tx)   │
//! └──────────┘   └──────────┘   └────────────┘   └────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use parts_loader::{Loader, LoaderConfig, PgPartStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LoaderConfig::from_env().unwrap();
//!     let store = PgPartStore::connect(&config.db).await.unwrap();
//!     let summary = Loader::new(store, &config).load_file("parts.csv").await.unwrap();
//!     println!("{}", summary);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`fields`] - Field catalog and header mapping
//! - [`parser`] - Delimited-text reading
//! - [`validation`] - Row validation
//! - [`geometry`] - Polygon decomposition and encoding
//! - [`models`] - Part records and closed domains
//! - [`transform`] - Record transformation and the transactional loader
//! - [`storage`] - Storage sink traits and PostgreSQL store
//! - [`report`] - Processing summary and log helpers
//! - [`config`] - Environment configuration
//! - [`clients`] - Downstream HTTP services
//! - [`publish`] - Catalog-driven and footprint-file publishing

// Core modules
pub mod error;
pub mod fields;
pub mod models;

// Parsing
pub mod parser;

// Validation
pub mod validation;

// Geometry
pub mod geometry;

// Transformation
pub mod transform;

// Storage
pub mod storage;

// Reporting
pub mod report;

// Configuration
pub mod config;

// Downstream services
pub mod clients;
pub mod publish;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ClientError, ConfigError, ContentError, GeometryError, HeaderError, LoadError, LoadResult, PublishError,
    StorageError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use fields::{map_headers, Field, HeaderIndex, HeaderPolicy};
pub use models::{Classification, PartRecord, ProductType};

// =============================================================================
// Re-exports - Parsing and validation
// =============================================================================

pub use parser::{detect_delimiter, CsvInput, Delimiter, RawRow};
pub use validation::{parse_utc, validate_row};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::{check_file, check_input, prepare_row, CheckReport, LoadState, Loader};

// =============================================================================
// Re-exports - Storage
// =============================================================================

pub use storage::{PartSink, PartStore, PgPartStore};

// =============================================================================
// Re-exports - Config and reporting
// =============================================================================

pub use config::{GeometryFormat, IngestOptions, LoaderConfig, RowPolicy};
pub use report::{ProcessingSummary, SkippedRow};

// =============================================================================
// Re-exports - Publishing
// =============================================================================

pub use publish::footprints::read_footprint_parts;
pub use publish::{LayerOutcome, PublishSummary, Publisher};
