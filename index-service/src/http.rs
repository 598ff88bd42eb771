//! HTTP surface of the index.
//!
//! ```text
//! GET  /api/anchors/{grouping_key}  200 JSON array of ids | 404 | 500
//! POST /api/anchors  "{anchor_id}|{grouping_key}"  200 | 400 | 500
//! ```
//!
//! Error responses carry no body.

use std::future::Future;
use std::sync::Arc;

use anchorshare_protocol::ANCHORS_ROUTE;
use anchorshare_protocol::AnchorPost;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use tokio::net::TcpListener;

use crate::error::IndexError;
use crate::index::AnchorIndex;

pub fn router(index: Arc<AnchorIndex>) -> Router {
    Router::new()
        .route(&format!("{ANCHORS_ROUTE}/:grouping_key"), get(get_anchor_ids))
        .route(ANCHORS_ROUTE, post(post_anchor_id))
        .with_state(index)
}

/// Serve the index on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    index: Arc<AnchorIndex>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("anchor index listening on http://{addr}{ANCHORS_ROUTE}");
    axum::serve(listener, router(index))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn get_anchor_ids(
    State(index): State<Arc<AnchorIndex>>,
    Path(grouping_key): Path<String>,
) -> Response {
    match index.lookup(&grouping_key).await {
        Ok(anchor_ids) => (StatusCode::OK, Json(anchor_ids)).into_response(),
        Err(IndexError::NotFound { .. }) => {
            tracing::debug!(grouping_key, "no anchors for grouping key");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => error_status(&e).into_response(),
    }
}

async fn post_anchor_id(State(index): State<Arc<AnchorIndex>>, body: String) -> Response {
    let post = match AnchorPost::parse(&body) {
        Ok(post) => post,
        Err(e) => {
            tracing::warn!("rejected anchor post: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match index.append(&post.grouping_key, &post.anchor_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_status(&e).into_response(),
    }
}

fn error_status(err: &IndexError) -> StatusCode {
    match err {
        IndexError::NotFound { .. } => StatusCode::NOT_FOUND,
        IndexError::InvalidEntry(reason) => {
            tracing::warn!("invalid index entry: {reason}");
            StatusCode::BAD_REQUEST
        }
        IndexError::Storage { .. } => {
            tracing::error!("index storage failure: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
