//! SQLite-backed table.
//!
//! Blocking SQLite calls run on the blocking thread pool so request tasks
//! never stall the runtime.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::params;

use super::AnchorTable;
use super::ContinuationToken;
use super::IndexEntry;
use super::Segment;
use super::validate_table_name;
use crate::error::IndexError;
use crate::error::Result;

pub struct SqliteAnchorTable {
    conn: Arc<Mutex<Connection>>,
    name: String,
    page_size: usize,
}

impl SqliteAnchorTable {
    /// Open (or create) the database file. The table itself is created by
    /// [`AnchorTable::create_if_not_exists`].
    pub fn open(path: &Path, name: &str, page_size: usize) -> Result<Self> {
        validate_table_name(name)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexError::storage_with_source(
                    format!("failed to create db directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            IndexError::storage_with_source(format!("failed to open db at {}", path.display()), e)
        })?;
        tracing::debug!(path = %path.display(), table = name, "opened anchor table database");
        Ok(Self::from_connection(conn, name, page_size))
    }

    pub fn open_in_memory(name: &str, page_size: usize) -> Result<Self> {
        validate_table_name(name)?;
        let conn = Connection::open_in_memory()
            .map_err(|e| IndexError::storage_with_source("failed to open in-memory db", e))?;
        Ok(Self::from_connection(conn, name, page_size))
    }

    fn from_connection(conn: Connection, name: &str, page_size: usize) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            name: name.to_string(),
            page_size: page_size.max(1),
        }
    }

    async fn with_connection<F, T>(&self, what: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await
        .map_err(|e| IndexError::storage(format!("{what}: task join error: {e}")))?
        .map_err(|e| IndexError::storage_with_source(what, e))
    }
}

#[async_trait]
impl AnchorTable for SqliteAnchorTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> Result<()> {
        // Name is validated alphanumeric, so interpolation is safe.
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{name}" (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                partition_key TEXT NOT NULL,
                row_key TEXT NOT NULL,
                grouping_key TEXT NOT NULL,
                anchor_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS "{name}_by_group"
                ON "{name}" (partition_key, grouping_key, seq);
            "#,
            name = self.name
        );
        self.with_connection("failed to create anchor table", move |conn| {
            conn.execute_batch(&sql)
        })
        .await
    }

    async fn insert(&self, entry: &IndexEntry) -> Result<()> {
        let sql = format!(
            r#"INSERT INTO "{}" (partition_key, row_key, grouping_key, anchor_id)
               VALUES (?1, ?2, ?3, ?2)"#,
            self.name
        );
        let entry = entry.clone();
        self.with_connection("failed to insert anchor entry", move |conn| {
            conn.execute(
                &sql,
                params![entry.partition_key, entry.anchor_id, entry.grouping_key],
            )
            .map(|_| ())
        })
        .await
    }

    async fn query_segment(
        &self,
        partition_key: &str,
        grouping_key: &str,
        continuation: Option<ContinuationToken>,
    ) -> Result<Segment> {
        let after_seq = match continuation {
            Some(token) => token.as_str().parse::<i64>().map_err(|e| {
                IndexError::storage_with_source(
                    format!("invalid continuation token {:?}", token.as_str()),
                    e,
                )
            })?,
            None => 0,
        };

        let sql = format!(
            r#"SELECT seq, anchor_id FROM "{}"
               WHERE partition_key = ?1 AND grouping_key = ?2 AND seq > ?3
               ORDER BY seq
               LIMIT ?4"#,
            self.name
        );
        let page_size = self.page_size;
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let partition_key = partition_key.to_string();
        let grouping_key = grouping_key.to_string();

        self.with_connection("failed to query anchor entries", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![partition_key, grouping_key, after_seq, limit],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )?;

            let mut entries = Vec::new();
            let mut last_seq = None;
            for row in rows {
                let (seq, anchor_id) = row?;
                last_seq = Some(seq);
                entries.push(IndexEntry {
                    partition_key: partition_key.clone(),
                    anchor_id,
                    grouping_key: grouping_key.clone(),
                });
            }

            let continuation = match last_seq {
                Some(seq) if entries.len() == page_size => {
                    Some(ContinuationToken::new(seq.to_string()))
                }
                _ => None,
            };
            Ok(Segment {
                entries,
                continuation,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(grouping_key: &str, anchor_id: &str) -> IndexEntry {
        IndexEntry {
            partition_key: "shared".to_string(),
            anchor_id: anchor_id.to_string(),
            grouping_key: grouping_key.to_string(),
        }
    }

    async fn collect_ids(table: &SqliteAnchorTable, grouping_key: &str) -> (Vec<String>, usize) {
        let mut ids = Vec::new();
        let mut pages = 0;
        let mut token = None;
        loop {
            let segment = table
                .query_segment("shared", grouping_key, token)
                .await
                .unwrap();
            pages += 1;
            ids.extend(segment.entries.into_iter().map(|e| e.anchor_id));
            token = segment.continuation;
            if token.is_none() {
                break;
            }
        }
        (ids, pages)
    }

    #[tokio::test]
    async fn query_before_create_is_a_storage_error() {
        let table = SqliteAnchorTable::open_in_memory("AnchorCache", 10).unwrap();
        let err = table.query_segment("shared", "k", None).await.unwrap_err();
        assert!(matches!(err, IndexError::Storage { .. }), "{err}");
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let table = SqliteAnchorTable::open_in_memory("AnchorCache", 10).unwrap();
        table.create_if_not_exists().await.unwrap();
        table.create_if_not_exists().await.unwrap();
    }

    #[tokio::test]
    async fn duplicates_are_separate_rows() {
        let table = SqliteAnchorTable::open_in_memory("AnchorCache", 10).unwrap();
        table.create_if_not_exists().await.unwrap();
        table.insert(&entry("k", "a")).await.unwrap();
        table.insert(&entry("k", "a")).await.unwrap();

        let (ids, _) = collect_ids(&table, "k").await;
        assert_eq!(ids, vec!["a".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn paginates_by_page_size() {
        let table = SqliteAnchorTable::open_in_memory("AnchorCache", 2).unwrap();
        table.create_if_not_exists().await.unwrap();
        for id in ["a", "b", "c", "d", "e"] {
            table.insert(&entry("k", id)).await.unwrap();
            table.insert(&entry("noise", id)).await.unwrap();
        }

        let (ids, pages) = collect_ids(&table, "k").await;
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("anchors.db");

        {
            let table = SqliteAnchorTable::open(&path, "AnchorCache", 10).unwrap();
            table.create_if_not_exists().await.unwrap();
            table.insert(&entry("k", "a")).await.unwrap();
        }

        let table = SqliteAnchorTable::open(&path, "AnchorCache", 10).unwrap();
        table.create_if_not_exists().await.unwrap();
        let (ids, _) = collect_ids(&table, "k").await;
        assert_eq!(ids, vec!["a"]);
    }
}
