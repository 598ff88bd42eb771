//! Backing tables for the anchor index.
//!
//! A table holds one row per appended entry. Rows live under a partition
//! key (the service uses a single shared partition), are keyed by anchor id,
//! and carry the grouping key they were reported under. Duplicate
//! `(grouping_key, anchor_id)` pairs are stored as separate rows.
//!
//! Queries return segments of at most `page_size` rows plus a continuation
//! token while more rows may follow.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryAnchorTable;
pub use sqlite::SqliteAnchorTable;

use crate::config::StorageBackend;
use crate::config::StorageConfig;
use crate::error::IndexError;
use crate::error::Result;

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub partition_key: String,
    /// Row key.
    pub anchor_id: String,
    pub grouping_key: String,
}

/// Opaque resume point for a paginated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub entries: Vec<IndexEntry>,
    pub continuation: Option<ContinuationToken>,
}

#[async_trait]
pub trait AnchorTable: Send + Sync {
    /// Table name, for logging.
    fn name(&self) -> &str;

    /// Create the backing table if it does not exist yet.
    async fn create_if_not_exists(&self) -> Result<()>;

    /// Insert one row. Never merges with existing rows.
    async fn insert(&self, entry: &IndexEntry) -> Result<()>;

    /// Fetch the next segment of rows under `partition_key` whose grouping
    /// key equals `grouping_key`, resuming after `continuation` when given.
    async fn query_segment(
        &self,
        partition_key: &str,
        grouping_key: &str,
        continuation: Option<ContinuationToken>,
    ) -> Result<Segment>;
}

/// Open the table described by `config`. Creation is deferred to the index's
/// first use.
pub fn open_table(config: &StorageConfig) -> Result<Arc<dyn AnchorTable>> {
    validate_table_name(&config.table)?;
    match config.backend {
        StorageBackend::Sqlite => Ok(Arc::new(SqliteAnchorTable::open(
            &config.path,
            &config.table,
            config.page_size,
        )?)),
        StorageBackend::Memory => Ok(Arc::new(MemoryAnchorTable::new(
            &config.table,
            config.page_size,
        ))),
    }
}

/// Table names follow cloud table rules: 3-63 ASCII alphanumerics, leading letter.
pub fn validate_table_name(name: &str) -> Result<()> {
    let valid_len = (3..=63).contains(&name.len());
    let leading_letter = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    let alphanumeric = name.chars().all(|c| c.is_ascii_alphanumeric());
    if valid_len && leading_letter && alphanumeric {
        Ok(())
    } else {
        Err(IndexError::storage(format!("invalid table name: {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert!(validate_table_name("AnchorCache").is_ok());
        assert!(validate_table_name("abc").is_ok());
        assert!(validate_table_name("ab").is_err());
        assert!(validate_table_name("1anchors").is_err());
        assert!(validate_table_name("anchor_cache").is_err());
        assert!(validate_table_name("x\"; DROP").is_err());
    }
}
