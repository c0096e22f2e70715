//! Storage sink.
//!
//! A [`PartStore`] hands out one [`PartSink`] per load. The sink is a single
//! open transaction: every record of the file goes through it, and nothing
//! is visible to other sessions until [`PartSink::commit`] returns.
//!
//! ```text
//! store.begin() ──▶ sink.insert_part() × N ──▶ sink.recompute_parts()
//!                                                   │
//!                        sink.rollback() ◀── error ─┴─ ok ──▶ sink.commit()
//! ```
//!
//! Dropping a sink without committing rolls it back.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::PartRecord;

pub use postgres::{PgPartStore, INSERT_FIELD_ORDER};

/// Source of transactional sinks.
#[async_trait]
pub trait PartStore: Send + Sync {
    type Sink: PartSink;

    /// Open a session and start a transaction.
    async fn begin(&self) -> StorageResult<Self::Sink>;

    /// Ask the server to cancel the statement currently running in the open
    /// sink, if any. Returns whether a cancel request was delivered.
    async fn cancel(&self) -> StorageResult<bool>;

    /// Release every pooled connection.
    async fn close(&self);
}

/// One open transaction.
#[async_trait]
pub trait PartSink: Send + Sized {
    async fn insert_part(&mut self, record: &PartRecord) -> StorageResult<()>;

    /// Run the aggregate recompute routine, if one is configured.
    async fn recompute_parts(&mut self) -> StorageResult<()>;

    async fn commit(self) -> StorageResult<()>;

    async fn rollback(self) -> StorageResult<()>;
}
