//! HTTP client for the grouping-key index endpoint.

use anchorshare_protocol::AnchorPost;
use anchorshare_protocol::WireFormatError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;

use crate::config::ClientConfig;

#[derive(Debug, thiserror::Error)]
pub enum IndexApiError {
    /// No anchors were ever reported under this key. Expected for a new group.
    #[error("no anchors for grouping key {grouping_key:?}")]
    NotFound { grouping_key: String },

    #[error("index endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("index request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unreadable index response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("cannot encode anchor post: {0}")]
    Malformed(#[from] WireFormatError),
}

impl IndexApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Operations the coordinator needs from the index.
#[async_trait]
pub trait AnchorIndexApi: Send + Sync {
    async fn lookup(&self, grouping_key: &str) -> Result<Vec<String>, IndexApiError>;

    async fn append(&self, grouping_key: &str, anchor_id: &str) -> Result<(), IndexApiError>;
}

/// [`AnchorIndexApi`] over the index service's HTTP endpoint.
pub struct SharingServiceClient {
    client: Client,
    base_url: String,
}

impl SharingServiceClient {
    pub fn new(config: &ClientConfig) -> Result<Self, IndexApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(IndexApiError::Transport)?;
        Ok(Self::with_client(client, &config.sharing_service_url))
    }

    /// `base_url` is the collection URL, e.g. `http://host/api/anchors`.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AnchorIndexApi for SharingServiceClient {
    async fn lookup(&self, grouping_key: &str) -> Result<Vec<String>, IndexApiError> {
        let url = format!("{}/{}", self.base_url, urlencoding::encode(grouping_key));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(IndexApiError::Transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(IndexApiError::NotFound {
                grouping_key: grouping_key.to_string(),
            }),
            status if status.is_success() => {
                response.json().await.map_err(IndexApiError::Decode)
            }
            status => Err(IndexApiError::Status {
                status: status.as_u16(),
            }),
        }
    }

    async fn append(&self, grouping_key: &str, anchor_id: &str) -> Result<(), IndexApiError> {
        let body = AnchorPost::new(anchor_id, grouping_key)?.encode();
        let response = self
            .client
            .post(&self.base_url)
            .body(body)
            .send()
            .await
            .map_err(IndexApiError::Transport)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(IndexApiError::Status {
                status: status.as_u16(),
            })
        }
    }
}
