//! Run reporting.
//!
//! - [`ProcessingSummary`] - row and polygon counters of one load
//! - [`logs`] - progress log helpers

pub mod logs;

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// A row left out under the skip policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub row: usize,
    pub message: String,
}

/// Counters of one run.
///
/// Created when the run starts and only touched by the loop that reads the
/// rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub run_id: Uuid,
    /// Data rows turned into records.
    pub rows_processed: usize,
    /// Records produced (one per polygon).
    pub polygons_processed: usize,
    pub rows_skipped: usize,
    pub skipped: Vec<SkippedRow>,
}

impl ProcessingSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            rows_processed: 0,
            polygons_processed: 0,
            rows_skipped: 0,
            skipped: Vec::new(),
        }
    }

    /// Count one processed row and its polygons.
    pub fn record_row(&mut self, polygons: usize) {
        self.rows_processed += 1;
        self.polygons_processed += polygons;
    }

    pub fn record_skip(&mut self, row: usize, message: impl Into<String>) {
        self.rows_skipped += 1;
        self.skipped.push(SkippedRow {
            row,
            message: message.into(),
        });
    }
}

impl fmt::Display for ProcessingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total rows processed: {}", self.rows_processed)?;
        write!(f, "Polygons processed: {}", self.polygons_processed)?;
        if self.rows_skipped > 0 {
            write!(f, "\nRows skipped: {}", self.rows_skipped)?;
        }
        Ok(())
    }
}
