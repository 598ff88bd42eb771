#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests for the index HTTP endpoint.
//!
//! Each test starts the real router on an ephemeral port and talks to it
//! over HTTP.

use std::collections::BTreeSet;
use std::sync::Arc;

use anchorshare_index_service::AnchorIndex;
use anchorshare_index_service::table::AnchorTable;
use anchorshare_index_service::table::MemoryAnchorTable;
use anchorshare_index_service::table::SqliteAnchorTable;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use tokio::sync::oneshot;

struct TestServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(table: Arc<dyn AnchorTable>) -> Self {
        let index = Arc::new(AnchorIndex::new(table, "shared"));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(anchorshare_index_service::http::serve(
            listener,
            index,
            async move {
                let _ = rx.await;
            },
        ));
        Self {
            base_url: format!("http://{addr}/api/anchors"),
            shutdown: Some(tx),
            handle,
        }
    }

    async fn post(&self, body: &str) -> StatusCode {
        reqwest::Client::new()
            .post(&self.base_url)
            .body(body.to_string())
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn get(&self, grouping_key: &str) -> (StatusCode, Option<Vec<String>>) {
        let resp = reqwest::get(format!("{}/{grouping_key}", self.base_url))
            .await
            .unwrap();
        let status = resp.status();
        if status == StatusCode::OK {
            (status, Some(resp.json().await.unwrap()))
        } else {
            let body = resp.text().await.unwrap();
            assert!(body.is_empty(), "error responses have no body: {body:?}");
            (status, None)
        }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

fn memory_table(page_size: usize) -> Arc<dyn AnchorTable> {
    Arc::new(MemoryAnchorTable::new("AnchorCache", page_size))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_then_get_includes_anchor() {
    let server = TestServer::start(memory_table(10)).await;

    let resp = reqwest::Client::new()
        .post(&server.base_url)
        .body("abc|xyz")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().is_empty());

    let (status, ids) = server.get("xyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids.unwrap(), vec!["abc".to_string()]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_group_is_404() {
    let server = TestServer::start(memory_table(10)).await;
    assert_eq!(server.get("nobody").await, (StatusCode::NOT_FOUND, None));
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_posts_are_rejected_without_mutation() {
    let server = TestServer::start(memory_table(10)).await;
    assert_eq!(server.post("first|xyz").await, StatusCode::OK);

    for body in ["abc", "", "   ", "a|b|xyz", "|xyz", "abc|"] {
        assert_eq!(
            server.post(body).await,
            StatusCode::BAD_REQUEST,
            "body {body:?} should be rejected"
        );
    }

    let (_, ids) = server.get("xyz").await;
    assert_eq!(ids.unwrap(), vec!["first".to_string()]);
    assert_eq!(server.get("b").await.0, StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_follows_pagination_and_keeps_duplicates() {
    let server = TestServer::start(memory_table(2)).await;

    let mut expected = Vec::new();
    for i in 0..7 {
        let id = format!("anchor-{i}");
        assert_eq!(server.post(&format!("{id}|team")).await, StatusCode::OK);
        expected.push(id);
    }
    assert_eq!(server.post("anchor-3|team").await, StatusCode::OK);
    expected.push("anchor-3".to_string());

    let (status, ids) = server.get("team").await;
    assert_eq!(status, StatusCode::OK);
    let mut ids = ids.unwrap();
    ids.sort();
    expected.sort();
    assert_eq!(ids, expected);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grouping_keys_are_percent_decoded() {
    let server = TestServer::start(memory_table(10)).await;
    assert_eq!(server.post("abc|team one").await, StatusCode::OK);

    let (status, ids) = server.get("team%20one").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids.unwrap(), vec!["abc".to_string()]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_entries_survive_service_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anchor-cache.db");

    let table = Arc::new(SqliteAnchorTable::open(&path, "AnchorCache", 2).unwrap());
    let server = TestServer::start(table).await;
    let ids: BTreeSet<String> = (0..5).map(|i| format!("id-{i}")).collect();
    for id in &ids {
        assert_eq!(server.post(&format!("{id}|lab")).await, StatusCode::OK);
    }
    server.stop().await;

    let table = Arc::new(SqliteAnchorTable::open(&path, "AnchorCache", 2).unwrap());
    let server = TestServer::start(table).await;
    let (status, found) = server.get("lab").await;
    assert_eq!(status, StatusCode::OK);
    let found: BTreeSet<String> = found.unwrap().into_iter().collect();
    assert_eq!(found, ids);
    server.stop().await;
}
