//! Transactional loader.
//!
//! Streams the rows of one file through validation, geometry decomposition
//! and record building, and persists every record inside a single
//! transaction. The file is loaded completely or not at all.
//!
//! ```text
//! Idle ─▶ HeaderMapped ─▶ Streaming(1) ─▶ … ─▶ Streaming(n) ─▶ Finalizing ─▶ Committed
//!                              │                    │              │
//!                              └────── error ───────┴──────────────┴──▶ RolledBack
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use parts_loader::{Loader, LoaderConfig, PgPartStore};
//!
//! let config = LoaderConfig::from_env()?;
//! let store = PgPartStore::connect(&config.db).await?;
//! let summary = Loader::new(store, &config).load_file("parts.csv").await?;
//! println!("{}", summary);
//! ```

use serde::Serialize;
use std::future::Future;
use std::io::Read;
use std::path::Path;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{IngestOptions, LoaderConfig, RowPolicy};
use crate::error::{ContentError, LoadError, LoadResult, StorageError};
use crate::fields::{map_headers, Field, HeaderIndex};
use crate::geometry;
use crate::models::PartRecord;
use crate::parser::{CsvInput, Delimiter, RawRow};
use crate::report::logs::{log_info, log_success, log_warning};
use crate::report::ProcessingSummary;
use crate::storage::{PartSink, PartStore};
use crate::transform::record::RowAttributes;
use crate::validation::validate_row;

/// Progress of one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    HeaderMapped,
    Streaming { row: usize },
    Finalizing,
    Committed,
    RolledBack,
}

impl LoadState {
    fn advance(&mut self, next: LoadState) {
        tracing::trace!(from = ?*self, to = ?next, "load state");
        *self = next;
    }
}

/// Result of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub records: Vec<PartRecord>,
    pub summary: ProcessingSummary,
}

// =============================================================================
// Loader
// =============================================================================

/// Whole-file loader over a [`PartStore`].
///
/// The store is closed when a load finishes, whatever the outcome, so a
/// loader serves one file.
pub struct Loader<S: PartStore> {
    store: S,
    delimiter: Delimiter,
    options: IngestOptions,
}

impl<S: PartStore> Loader<S> {
    pub fn new(store: S, config: &LoaderConfig) -> Self {
        Self::with_options(store, config.csv.delimiter, config.ingest)
    }

    pub fn with_options(store: S, delimiter: Delimiter, options: IngestOptions) -> Self {
        Self {
            store,
            delimiter,
            options,
        }
    }

    /// Load a file.
    pub async fn load_file<P: AsRef<Path>>(&self, path: P) -> LoadResult<ProcessingSummary> {
        let path = path.as_ref();
        log_info(format!("Start processing file: {}", path.display()));
        self.load_input(CsvInput::open(path, self.delimiter)).await
    }

    /// Load from any reader.
    pub async fn load_reader<R: Read + Send + 'static>(&self, reader: R) -> LoadResult<ProcessingSummary> {
        self.load_input(CsvInput::from_reader(reader, self.delimiter))
            .await
    }

    /// Load a file, giving up when `shutdown` resolves first.
    ///
    /// On shutdown the running statement is cancelled, the open transaction
    /// is rolled back, the store is closed and [`LoadError::Cancelled`] is
    /// returned.
    pub async fn load_file_until<P, F>(&self, path: P, shutdown: F) -> LoadResult<ProcessingSummary>
    where
        P: AsRef<Path>,
        F: Future<Output = ()>,
    {
        let path = path.as_ref();
        log_info(format!("Start processing file: {}", path.display()));
        self.load_input_until(CsvInput::open(path, self.delimiter), shutdown)
            .await
    }

    /// Load from any reader, giving up when `shutdown` resolves first.
    pub async fn load_reader_until<R, F>(&self, reader: R, shutdown: F) -> LoadResult<ProcessingSummary>
    where
        R: Read + Send + 'static,
        F: Future<Output = ()>,
    {
        self.load_input_until(CsvInput::from_reader(reader, self.delimiter), shutdown)
            .await
    }

    async fn load_input_until<F>(&self, input: LoadResult<CsvInput>, shutdown: F) -> LoadResult<ProcessingSummary>
    where
        F: Future<Output = ()>,
    {
        let mut load = Box::pin(self.load_input(input));
        let outcome = tokio::select! {
            result = &mut load => Some(result),
            _ = shutdown => None,
        };

        match outcome {
            Some(result) => result,
            None => {
                log_warning("Shutdown requested, cancelling load");
                if let Err(e) = self.store.cancel().await {
                    log_warning(format!("Could not cancel running statement: {}", e));
                }
                // Dropping the load drops its sink, which rolls the transaction back.
                drop(load);
                self.store.close().await;
                Err(LoadError::Cancelled)
            }
        }
    }

    async fn load_input(&self, input: LoadResult<CsvInput>) -> LoadResult<ProcessingSummary> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("load", %run_id);

        let result = self.run(input, run_id).instrument(span).await;
        self.store.close().await;

        match &result {
            Ok(summary) => log_success(format!("Processing finished ({} rows)", summary.rows_processed)),
            Err(e) => tracing::debug!(%run_id, error = %e, "load failed"),
        }
        result
    }

    async fn run(&self, input: LoadResult<CsvInput>, run_id: Uuid) -> LoadResult<ProcessingSummary> {
        let mut state = LoadState::Idle;
        let mut input = input?;

        let index = map_headers(input.headers(), self.options.header_policy)?;
        state.advance(LoadState::HeaderMapped);

        let mut sink = self.store.begin().await.map_err(LoadError::Session)?;
        let mut summary = ProcessingSummary::new(run_id);

        let streamed = self
            .stream(&mut input, &index, &mut sink, &mut summary, &mut state)
            .await;

        let finalized = match streamed {
            Ok(()) => {
                state.advance(LoadState::Finalizing);
                sink.recompute_parts().await.map_err(LoadError::Session)
            }
            Err(e) => Err(e),
        };

        match finalized {
            Ok(()) => match sink.commit().await {
                Ok(()) => {
                    state.advance(LoadState::Committed);
                    Ok(summary)
                }
                Err(e) => {
                    state.advance(LoadState::RolledBack);
                    Err(LoadError::Session(e))
                }
            },
            Err(e) => {
                if let Err(rollback) = sink.rollback().await {
                    log_warning(format!("Rollback failed: {}", rollback));
                }
                state.advance(LoadState::RolledBack);
                Err(e)
            }
        }
    }

    async fn stream(
        &self,
        input: &mut CsvInput,
        index: &HeaderIndex,
        sink: &mut S::Sink,
        summary: &mut ProcessingSummary,
        state: &mut LoadState,
    ) -> LoadResult<()> {
        while let Some(raw) = input.next_row()? {
            state.advance(LoadState::Streaming { row: raw.number });

            let records = match prepare_row(&raw, index, &self.options) {
                Ok(records) => records,
                Err(e) if self.options.row_policy == RowPolicy::Skip => {
                    log_warning(format!("Skipping row {}: {}", raw.number, e));
                    summary.record_skip(raw.number, e.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };

            let count = records.len();
            for (i, record) in records.iter().enumerate() {
                tracing::debug!(row = raw.number, polygon = i + 1, of = count, "inserting polygon part");
                sink.insert_part(record)
                    .await
                    .map_err(|e| row_storage_error(raw.number, e))?;
            }
            summary.record_row(count);
        }
        Ok(())
    }
}

// =============================================================================
// Row processing
// =============================================================================

/// Validate, decompose and transform one row into its records.
pub fn prepare_row(raw: &RawRow, index: &HeaderIndex, options: &IngestOptions) -> LoadResult<Vec<PartRecord>> {
    let row = raw.number;
    validate_row(&raw.cells, index, row)?;

    let geom = index
        .value(&raw.cells, Field::Geom)
        .ok_or(ContentError::MissingField {
            field: Field::Geom,
            row,
        })?;
    let polygons = geometry::decompose(geom, row)?;
    let attributes = RowAttributes::from_row(&raw.cells, index, row, options.fill_missing_bounds)?;

    Ok(polygons
        .into_iter()
        .map(|polygon| attributes.to_record(polygon))
        .collect())
}

fn row_storage_error(row: usize, err: StorageError) -> LoadError {
    match err {
        StorageError::Encode(message) => LoadError::Unexpected { row, message },
        source => LoadError::Storage { row, source },
    }
}

// =============================================================================
// Dry run
// =============================================================================

/// Run every stage except storage over a file.
pub fn check_file<P: AsRef<Path>>(path: P, delimiter: Delimiter, options: &IngestOptions) -> LoadResult<CheckReport> {
    check_input(CsvInput::open(path, delimiter)?, options)
}

/// Run every stage except storage over an open input.
pub fn check_input(mut input: CsvInput, options: &IngestOptions) -> LoadResult<CheckReport> {
    let index = map_headers(input.headers(), options.header_policy)?;
    let mut summary = ProcessingSummary::new(Uuid::new_v4());
    let mut records = Vec::new();

    while let Some(raw) = input.next_row()? {
        match prepare_row(&raw, &index, options) {
            Ok(row_records) => {
                summary.record_row(row_records.len());
                records.extend(row_records);
            }
            Err(e) if options.row_policy == RowPolicy::Skip => {
                summary.record_skip(raw.number, e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    Ok(CheckReport { records, summary })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeaderError;
    use crate::fields::HeaderPolicy;
    use crate::storage::memory::MemoryStore;
    use std::io::{Cursor, Write};

    const HEADER: &str = "recordId,productType,srsName,maxResolutionMeter,maxResolutionDegree,sourceDateEndUTC,geom";
    const POLYGON: &str = "\"POLYGON((0 0,0 1,1 1,1 0,0 0))\"";

    fn row(id: &str, product_type: &str, geom: &str) -> String {
        format!("{},{},EPSG:4326,0.5,0.00001,2023-01-01,{}", id, product_type, geom)
    }

    fn csv(rows: &[String]) -> Cursor<Vec<u8>> {
        let mut text = String::from(HEADER);
        for r in rows {
            text.push('\n');
            text.push_str(r);
        }
        text.push('\n');
        Cursor::new(text.into_bytes())
    }

    fn loader(store: &MemoryStore, options: IngestOptions) -> Loader<MemoryStore> {
        Loader::with_options(store.clone(), Delimiter::Char(','), options)
    }

    #[tokio::test]
    async fn test_single_row_end_to_end() {
        let store = MemoryStore::new();
        let summary = loader(&store, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", POLYGON)]))
            .await
            .unwrap();

        assert_eq!(summary.rows_processed, 1);
        assert_eq!(summary.polygons_processed, 1);

        let committed = store.committed();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].record_id, "A1");
        assert_eq!(committed[0].min_resolution_meter, Some(0.5));
        assert_eq!(committed[0].geom.exterior().0.len(), 5);
        assert_eq!(store.recomputes(), 1);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_row_rolls_back_whole_file() {
        let store = MemoryStore::new();
        let rows: Vec<String> = (1..=100)
            .map(|i| {
                let product_type = if i == 50 { "Satellite" } else { "Orthophoto" };
                row(&format!("R{}", i), product_type, POLYGON)
            })
            .collect();

        let err = loader(&store, IngestOptions::default())
            .load_reader(csv(&rows))
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Content(ref c) if c.row() == 50));
        assert!(store.committed().is_empty());
        assert_eq!(store.rollbacks(), 1);
        assert_eq!(store.recomputes(), 0);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_polygon_count_includes_multipolygon_parts() {
        let store = MemoryStore::new();
        let multi = "\"MULTIPOLYGON(((0 0,0 1,1 1,1 0,0 0)),((5 5,5 6,6 6,6 5,5 5)),((10 0,10 1,11 1,11 0,10 0)))\"";
        let summary = loader(&store, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", POLYGON), row("A2", "RasterMap", multi)]))
            .await
            .unwrap();

        assert_eq!(summary.rows_processed, 2);
        assert_eq!(summary.polygons_processed, 4);
        assert_eq!(store.committed().len(), 4);
        assert!(store.committed()[1..].iter().all(|r| r.record_id == "A2"));
    }

    #[tokio::test]
    async fn test_overlapping_parts_stored_merged() {
        let store = MemoryStore::new();
        let multi = "\"MULTIPOLYGON(((0 0,0 2,2 2,2 0,0 0)),((1 1,1 3,3 3,3 1,1 1)),((10 10,10 11,11 11,11 10,10 10)))\"";
        let summary = loader(&store, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", multi)]))
            .await
            .unwrap();
        assert_eq!(summary.polygons_processed, 2);
    }

    #[tokio::test]
    async fn test_column_order_does_not_change_records() {
        let first = MemoryStore::new();
        loader(&first, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", POLYGON)]))
            .await
            .unwrap();

        let permuted = format!(
            "geom,recordId,sourceDateEndUTC,srsName,maxResolutionDegree,productType,maxResolutionMeter\n{},A1,2023-01-01,EPSG:4326,0.00001,Orthophoto,0.5\n",
            POLYGON
        );
        let second = MemoryStore::new();
        loader(&second, IngestOptions::default())
            .load_reader(Cursor::new(permuted.into_bytes()))
            .await
            .unwrap();

        assert_eq!(first.committed(), second.committed());
    }

    #[tokio::test]
    async fn test_storage_error_names_row() {
        let store = MemoryStore::failing_on_insert(3);
        let multi = "\"MULTIPOLYGON(((0 0,0 1,1 1,1 0,0 0)),((5 5,5 6,6 6,6 5,5 5)))\"";
        let err = loader(&store, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", multi), row("A2", "Orthophoto", POLYGON)]))
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Storage { row: 2, .. }));
        assert!(err.to_string().starts_with("Failed processing polygon part at row 2 --"));
        assert!(store.committed().is_empty());
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_empty_multipolygon_fails_row() {
        let store = MemoryStore::new();
        let err = loader(&store, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", "MULTIPOLYGON EMPTY")]))
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Geometry(ref g) if g.row() == 1));
        assert!(err.to_string().contains("row 1"));
        assert!(store.committed().is_empty());
        assert_eq!(store.rollbacks(), 1);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_recompute_failure_rolls_back() {
        let store = MemoryStore::failing_on_recompute();
        let err = loader(&store, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", POLYGON), row("A2", "Orthophoto", POLYGON)]))
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Session(_)));
        assert!(store.committed().is_empty());
        assert_eq!(store.recomputes(), 1);
        assert_eq!(store.rollbacks(), 1);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_nothing_visible() {
        let store = MemoryStore::failing_on_commit();
        let err = loader(&store, IngestOptions::default())
            .load_reader(csv(&[row("A1", "Orthophoto", POLYGON)]))
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Session(_)));
        assert!(err.to_string().contains("could not serialize access"));
        assert!(store.committed().is_empty());
        assert_eq!(store.recomputes(), 1);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_load() {
        let store = MemoryStore::stalling_on_insert(2);
        let rows = [
            row("A1", "Orthophoto", POLYGON),
            row("A2", "Orthophoto", POLYGON),
            row("A3", "Orthophoto", POLYGON),
        ];
        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(20));
        let err = loader(&store, IngestOptions::default())
            .load_reader_until(csv(&rows), shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Cancelled));
        assert_eq!(err.to_string(), "Processing cancelled");
        assert_eq!(store.cancels(), 1);
        assert!(store.committed().is_empty());
        assert_eq!(store.recomputes(), 0);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_load_until_without_shutdown_commits() {
        let store = MemoryStore::new();
        let summary = loader(&store, IngestOptions::default())
            .load_reader_until(csv(&[row("A1", "Orthophoto", POLYGON)]), std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.rows_processed, 1);
        assert_eq!(store.committed().len(), 1);
        assert_eq!(store.cancels(), 0);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_skip_policy_continues() {
        let store = MemoryStore::new();
        let options = IngestOptions {
            row_policy: RowPolicy::Skip,
            ..IngestOptions::default()
        };
        let summary = loader(&store, options)
            .load_reader(csv(&[
                row("A1", "Orthophoto", POLYGON),
                row("A2", "Orthophoto", "\"LINESTRING(0 0,1 1)\""),
                row("A3", "Orthophoto", POLYGON),
            ]))
            .await
            .unwrap();

        assert_eq!(summary.rows_processed, 2);
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.skipped[0].row, 2);
        let ids: Vec<String> = store.committed().into_iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec!["A1", "A3"]);
    }

    #[tokio::test]
    async fn test_skip_policy_does_not_cover_storage_errors() {
        let store = MemoryStore::failing_on_insert(1);
        let options = IngestOptions {
            row_policy: RowPolicy::Skip,
            ..IngestOptions::default()
        };
        let err = loader(&store, options)
            .load_reader(csv(&[row("A1", "Orthophoto", POLYGON)]))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Storage { row: 1, .. }));
    }

    #[tokio::test]
    async fn test_header_error_before_any_row() {
        let store = MemoryStore::new();
        let text = "recordId,productType,geom,color\nA1,Orthophoto,POLYGON EMPTY,red\n";
        let err = loader(&store, IngestOptions::default())
            .load_reader(Cursor::new(text.as_bytes().to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Header(HeaderError::Unsupported { ref header }) if header == "color"));
        assert_eq!(store.rollbacks(), 0);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_ignored_headers() {
        let store = MemoryStore::new();
        let options = IngestOptions {
            header_policy: HeaderPolicy::Ignore,
            ..IngestOptions::default()
        };
        let text = format!("{},color\n{},red\n", HEADER, row("A1", "Orthophoto", POLYGON));
        let summary = loader(&store, options)
            .load_reader(Cursor::new(text.into_bytes()))
            .await
            .unwrap();
        assert_eq!(summary.rows_processed, 1);
    }

    #[tokio::test]
    async fn test_load_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        writeln!(file, "{}", row("A1", "orthphoto", POLYGON)).unwrap();
        file.flush().unwrap();

        let store = MemoryStore::new();
        let summary = loader(&store, IngestOptions::default())
            .load_file(file.path())
            .await
            .unwrap();
        assert_eq!(summary.polygons_processed, 1);
        assert_eq!(store.committed()[0].product_type.as_str(), "Orthophoto");
    }

    #[tokio::test]
    async fn test_missing_file_still_closes_store() {
        let store = MemoryStore::new();
        let err = loader(&store, IngestOptions::default())
            .load_file("/nonexistent/parts.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
        assert!(store.is_closed());
    }

    #[test]
    fn test_check_input_dry_run() {
        let multi = "\"MULTIPOLYGON(((0 0,0 1,1 1,1 0,0 0)),((5 5,5 6,6 6,6 5,5 5)))\"";
        let input = CsvInput::from_reader(
            csv(&[row("A1", "Orthophoto", POLYGON), row("A2", "Orthophoto", multi)]),
            Delimiter::Char(','),
        )
        .unwrap();

        let report = check_input(input, &IngestOptions::default()).unwrap();
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.summary.rows_processed, 2);
        assert_eq!(report.summary.polygons_processed, 3);
    }

    #[test]
    fn test_check_file_reports_first_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        writeln!(file, "{}", row("A1", "Orthophoto", POLYGON)).unwrap();
        writeln!(file, "A2,Orthophoto,,0.5,0.00001,2023-01-01,{}", POLYGON).unwrap();
        file.flush().unwrap();

        let err = check_file(file.path(), Delimiter::Char(','), &IngestOptions::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed validation of field \"srsName\" at row 2 -- missing a mandatory field"
        );
    }
}
