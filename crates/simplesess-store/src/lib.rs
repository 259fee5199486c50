//! Durable record store for simplesess, backed by SQLite.
//!
//! Records live in a single options-style table keyed by the rendered
//! session record key, so databases written by earlier deployments with the
//! same key layout can be opened directly.

mod error;
mod sqlite;

pub use error::{Result, StoreError};
pub use sqlite::SqliteRecordStore;
