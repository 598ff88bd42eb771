//! `anchorshare-index-service`: grouping-key anchor index.
//!
//! Maps a caller-chosen grouping key to every anchor id ever reported under
//! it. Entries are append-only; lookups follow backing-table pagination to
//! the end before answering.
//!
//! The HTTP surface lives in [`http`]; [`index::AnchorIndex`] owns the lazy
//! table creation and the lookup/append contract; [`table`] holds the
//! backing stores.

pub mod config;
pub mod error;
pub mod http;
pub mod index;
pub mod table;

pub use error::IndexError;
pub use error::Result;
pub use index::AnchorIndex;
