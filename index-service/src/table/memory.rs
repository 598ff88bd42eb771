//! Process-local table. Rows are lost on restart.
//!
//! Behaves like a remote table otherwise: it must be created before use and
//! pages its query results.

use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;

use super::AnchorTable;
use super::ContinuationToken;
use super::IndexEntry;
use super::Segment;
use crate::error::IndexError;
use crate::error::Result;

pub struct MemoryAnchorTable {
    name: String,
    page_size: usize,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    created: bool,
    rows: Vec<IndexEntry>,
}

impl MemoryAnchorTable {
    pub fn new(name: &str, page_size: usize) -> Self {
        Self {
            name: name.to_string(),
            page_size: page_size.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Total rows across all partitions.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn missing(&self) -> IndexError {
        IndexError::storage(format!("table {} does not exist", self.name))
    }
}

#[async_trait]
impl AnchorTable for MemoryAnchorTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> Result<()> {
        self.lock().created = true;
        Ok(())
    }

    async fn insert(&self, entry: &IndexEntry) -> Result<()> {
        let mut state = self.lock();
        if !state.created {
            return Err(self.missing());
        }
        state.rows.push(entry.clone());
        Ok(())
    }

    async fn query_segment(
        &self,
        partition_key: &str,
        grouping_key: &str,
        continuation: Option<ContinuationToken>,
    ) -> Result<Segment> {
        let state = self.lock();
        if !state.created {
            return Err(self.missing());
        }

        let start = match continuation {
            Some(token) => token.as_str().parse::<usize>().map_err(|e| {
                IndexError::storage_with_source(
                    format!("invalid continuation token {:?}", token.as_str()),
                    e,
                )
            })?,
            None => 0,
        };

        let mut entries = Vec::new();
        let mut last_position = None;
        for (position, row) in state.rows.iter().enumerate().skip(start) {
            if row.partition_key == partition_key && row.grouping_key == grouping_key {
                entries.push(row.clone());
                last_position = Some(position);
                if entries.len() == self.page_size {
                    break;
                }
            }
        }

        let continuation = match last_position {
            Some(position) if entries.len() == self.page_size => {
                Some(ContinuationToken::new((position + 1).to_string()))
            }
            _ => None,
        };

        Ok(Segment {
            entries,
            continuation,
        })
    }
}
