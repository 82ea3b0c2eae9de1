//! SQLite persistence for the wallet session and the submission journal.
//!
//! The session lives in a small key-value table written synchronously so
//! that persisted state always mirrors memory. Journal writes go through a
//! dedicated writer thread and never block a flow.

pub mod journal;
pub mod kv;
pub mod schema;
pub mod types;
pub mod writer;

pub use journal::{recent_submissions, unsettled_submissions};
pub use kv::{KeyValueStore, MemoryStore, SqliteStore};
pub use types::{SubmissionRecord, SubmissionStatus};
pub use writer::{create_storage_channel, StorageChannel};
