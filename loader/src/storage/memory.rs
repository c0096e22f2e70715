//! In-memory part store for tests.
//!
//! Records inserted through a sink stay private to it until commit, which
//! mirrors transaction visibility closely enough to test atomicity.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{StorageError, StorageResult};
use crate::models::PartRecord;

use super::{PartSink, PartStore};

#[derive(Debug, Default)]
struct Shared {
    committed: Mutex<Vec<PartRecord>>,
    inserts: AtomicUsize,
    recomputes: AtomicUsize,
    rollbacks: AtomicUsize,
    cancels: AtomicUsize,
    closed: AtomicBool,
}

/// Injected failures, copied into every sink.
#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    /// Fail the insert with this 1-based sequence number.
    fail_on_insert: Option<usize>,
    /// Never complete the insert with this 1-based sequence number.
    stall_on_insert: Option<usize>,
    fail_on_recompute: bool,
    fail_on_commit: bool,
}

/// Test store with optional failure injection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    faults: Faults,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_insert(n: usize) -> Self {
        Self::with_faults(Faults {
            fail_on_insert: Some(n),
            ..Faults::default()
        })
    }

    pub fn stalling_on_insert(n: usize) -> Self {
        Self::with_faults(Faults {
            stall_on_insert: Some(n),
            ..Faults::default()
        })
    }

    pub fn failing_on_recompute() -> Self {
        Self::with_faults(Faults {
            fail_on_recompute: true,
            ..Faults::default()
        })
    }

    pub fn failing_on_commit() -> Self {
        Self::with_faults(Faults {
            fail_on_commit: true,
            ..Faults::default()
        })
    }

    fn with_faults(faults: Faults) -> Self {
        Self {
            shared: Arc::default(),
            faults,
        }
    }

    /// Records visible after commit.
    pub fn committed(&self) -> Vec<PartRecord> {
        self.shared
            .committed
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn recomputes(&self) -> usize {
        self.shared.recomputes.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.shared.cancels.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

pub struct MemorySink {
    shared: Arc<Shared>,
    faults: Faults,
    pending: Vec<PartRecord>,
}

fn injected(message: String) -> StorageError {
    StorageError::Database(sqlx::Error::Protocol(message))
}

#[async_trait]
impl PartStore for MemoryStore {
    type Sink = MemorySink;

    async fn begin(&self) -> StorageResult<MemorySink> {
        Ok(MemorySink {
            shared: Arc::clone(&self.shared),
            faults: self.faults,
            pending: Vec::new(),
        })
    }

    async fn cancel(&self) -> StorageResult<bool> {
        self.shared.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(self.faults.stall_on_insert.is_some())
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PartSink for MemorySink {
    async fn insert_part(&mut self, record: &PartRecord) -> StorageResult<()> {
        let n = self.shared.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.faults.fail_on_insert == Some(n) {
            return Err(injected(format!(
                "duplicate key value violates unique constraint (insert {})",
                n
            )));
        }
        if self.faults.stall_on_insert == Some(n) {
            std::future::pending::<()>().await;
        }
        self.pending.push(record.clone());
        Ok(())
    }

    async fn recompute_parts(&mut self) -> StorageResult<()> {
        self.shared.recomputes.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_on_recompute {
            return Err(injected("recompute routine failed".to_string()));
        }
        Ok(())
    }

    async fn commit(self) -> StorageResult<()> {
        if self.faults.fail_on_commit {
            return Err(injected("could not serialize access".to_string()));
        }
        let mut committed = self
            .shared
            .committed
            .lock()
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        committed.extend(self.pending);
        Ok(())
    }

    async fn rollback(self) -> StorageResult<()> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
