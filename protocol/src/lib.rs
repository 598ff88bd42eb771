//! Wire contract shared by the grouping-key index service and its clients.
//!
//! The index endpoint speaks a deliberately small protocol:
//!
//! ```text
//! GET  /api/anchors/{grouping_key}   -> 200 ["id1","id2",...] | 404
//! POST /api/anchors   "{anchor_id}|{grouping_key}"   -> 200 | 400
//! ```

pub mod anchor_post;
pub mod locate;

pub use anchor_post::AnchorPost;
pub use anchor_post::WireFormatError;
pub use anchor_post::validate_grouping_key;
pub use locate::LocateStatus;

/// Route under which the index endpoint is mounted.
pub const ANCHORS_ROUTE: &str = "/api/anchors";

/// App property key under which an anchor's note is stored in the cloud service.
pub const NOTE_PROPERTY_KEY: &str = "note";

/// Most identifiers a single watcher may be asked to locate.
pub const MAX_WATCHER_IDS: usize = 10;
