//! Boundary to the cloud anchor service.
//!
//! The service persists anchors and locates them again in the physical
//! environment. How it recognizes a location is its own business; this
//! module only fixes the two calls the client needs.

use std::collections::HashMap;
use std::time::Duration;

use anchorshare_protocol::LocateStatus;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::record::PoseHandle;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("anchor creation failed: {0}")]
    CreateFailed(String),

    #[error("watcher creation failed: {0}")]
    WatcherFailed(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// A located anchor, as reported by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedAnchor {
    pub identifier: String,
    pub pose: PoseHandle,
    /// App properties stored with the anchor at creation.
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorLocatedEvent {
    pub identifier: String,
    pub status: LocateStatus,
    /// Present only when `status` is [`LocateStatus::Located`].
    pub anchor: Option<LocatedAnchor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    AnchorLocated(AnchorLocatedEvent),
    /// No more events will follow for this watcher.
    LocateCompleted,
}

#[async_trait]
pub trait CloudAnchorService: Send + Sync {
    /// Persist the anchor at `pose` with `properties`, returning its id.
    async fn create_anchor(
        &self,
        pose: PoseHandle,
        properties: &HashMap<String, String>,
    ) -> Result<String, CloudError>;

    /// Start locating `identifiers`. Events arrive on the returned channel
    /// until [`WatcherEvent::LocateCompleted`] or the sender is dropped.
    async fn create_watcher(
        &self,
        identifiers: &[String],
    ) -> Result<mpsc::Receiver<WatcherEvent>, CloudError>;
}
