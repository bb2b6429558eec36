//! SQLite backend for the WebSub subscription store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. The schema keeps lease state
//! in one mutable table; activity is a view computed against `datetime('now')`
//! at query time, so a lease crossing its expiry instant goes inactive
//! without any write.

mod encode;
mod schema;
mod store;

pub use store::SqliteStore;
pub use websub_core::{Result, StoreError};
