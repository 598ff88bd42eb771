//! `anchorshare-client`: device-side anchor sharing.
//!
//! [`AnchorSharingCoordinator`] saves marked points to the cloud anchor
//! service once the perception session is ready, reports them to the
//! grouping-key index, and locates the group's anchors when the session
//! stabilizes. The cloud service is reached through [`CloudAnchorService`];
//! [`ScriptedCloudService`] is a deterministic stand-in for it.

pub mod cloud;
pub mod config;
pub mod coordinator;
pub mod index_client;
pub mod record;
pub mod scripted;
pub mod watcher;

pub use cloud::CloudAnchorService;
pub use cloud::CloudError;
pub use config::ClientConfig;
pub use coordinator::AnchorSharingCoordinator;
pub use coordinator::CoordinatorError;
pub use coordinator::CoordinatorEvent;
pub use coordinator::SessionEvent;
pub use index_client::AnchorIndexApi;
pub use index_client::IndexApiError;
pub use index_client::SharingServiceClient;
pub use record::AnchorRecord;
pub use record::PoseHandle;
pub use scripted::ScriptedCloudService;
