//! Core database infrastructure
//!
//! - `SqliteDriver`: opens and configures SQLite connections from a URL
//! - `TrackingManager`: tracking tables, applied-changeset rows and the migration lock

mod connection;
mod schema;

pub use connection::{SqliteDriver, SqliteTarget};
pub use schema::{
    AppliedChangeSet, ExecType, LockGuard, LockInfo, TrackingDefinitions, TrackingManager,
};
