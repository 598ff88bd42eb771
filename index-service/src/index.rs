//! Grouping-key anchor index.
//!
//! The backing table is created lazily on first use. Exactly one creation
//! attempt runs at a time: the first caller performs it while concurrent
//! callers wait on the same lock. Once it succeeds every later call takes the
//! atomic fast path. A failed attempt resets the state so the next caller
//! (including any that were waiting) retries instead of blocking forever.

use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;

use crate::error::IndexError;
use crate::error::Result;
use crate::table::AnchorTable;
use crate::table::IndexEntry;

const NOT_STARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

/// Observable state of the lazy table creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    NotStarted,
    InProgress,
    Done,
}

pub struct AnchorIndex {
    table: Arc<dyn AnchorTable>,
    partition_key: String,
    init_state: AtomicU8,
    init_lock: Mutex<()>,
}

impl AnchorIndex {
    pub fn new(table: Arc<dyn AnchorTable>, partition_key: impl Into<String>) -> Self {
        Self {
            table,
            partition_key: partition_key.into(),
            init_state: AtomicU8::new(NOT_STARTED),
            init_lock: Mutex::new(()),
        }
    }

    pub fn init_state(&self) -> InitState {
        match self.init_state.load(Ordering::Acquire) {
            DONE => InitState::Done,
            IN_PROGRESS => InitState::InProgress,
            _ => InitState::NotStarted,
        }
    }

    /// Make sure the backing table exists.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if self.init_state.load(Ordering::Acquire) == DONE {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.init_state.load(Ordering::Acquire) == DONE {
            return Ok(());
        }

        self.init_state.store(IN_PROGRESS, Ordering::Release);
        match self.table.create_if_not_exists().await {
            Ok(()) => {
                self.init_state.store(DONE, Ordering::Release);
                tracing::info!(table = self.table.name(), "anchor table ready");
                Ok(())
            }
            Err(e) => {
                self.init_state.store(NOT_STARTED, Ordering::Release);
                tracing::error!(table = self.table.name(), "anchor table creation failed: {e}");
                Err(e)
            }
        }
    }

    /// Record that `anchor_id` was created under `grouping_key`.
    ///
    /// Appending an existing pair stores a second entry.
    pub async fn append(&self, grouping_key: &str, anchor_id: &str) -> Result<()> {
        if grouping_key.is_empty() {
            return Err(IndexError::InvalidEntry(
                "grouping key must not be empty".to_string(),
            ));
        }
        if anchor_id.is_empty() {
            return Err(IndexError::InvalidEntry(
                "anchor id must not be empty".to_string(),
            ));
        }

        self.ensure_initialized().await?;

        let entry = IndexEntry {
            partition_key: self.partition_key.clone(),
            anchor_id: anchor_id.to_string(),
            grouping_key: grouping_key.to_string(),
        };
        self.table.insert(&entry).await?;
        tracing::info!(anchor_id, grouping_key, "anchor id appended");
        Ok(())
    }

    /// Every anchor id ever appended under `grouping_key`, in no particular
    /// order. All pages are read before returning.
    pub async fn lookup(&self, grouping_key: &str) -> Result<Vec<String>> {
        if grouping_key.is_empty() {
            return Err(IndexError::NotFound {
                grouping_key: String::new(),
            });
        }

        self.ensure_initialized().await?;

        let mut anchor_ids = Vec::new();
        let mut continuation = None;
        loop {
            let segment = self
                .table
                .query_segment(&self.partition_key, grouping_key, continuation)
                .await?;
            anchor_ids.extend(segment.entries.into_iter().map(|e| e.anchor_id));
            continuation = segment.continuation;
            if continuation.is_none() {
                break;
            }
        }

        if anchor_ids.is_empty() {
            return Err(IndexError::NotFound {
                grouping_key: grouping_key.to_string(),
            });
        }

        tracing::debug!(grouping_key, count = anchor_ids.len(), "anchor ids looked up");
        Ok(anchor_ids)
    }
}
