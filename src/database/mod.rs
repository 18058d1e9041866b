//! Database module
//!
//! The bundled SQLite backend for the migration runner:
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # URL parsing, SqliteDriver
//! │   └── schema      # DATABASECHANGELOG / DATABASECHANGELOGLOCK management
//! │
//! └── engine          # SqliteEngine: update, sync, status, validate, locks
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use bootmigrate::database::SqliteDriver;
//! use bootmigrate::{MigrationConfig, MigrationRunner};
//!
//! let config = MigrationConfig::load(None, &[])?;
//! let report = MigrationRunner::new(config, SqliteDriver::new()).run()?;
//! ```

pub mod core;
pub mod engine;

// =============================================================================
// SQLite Types
// =============================================================================

pub use core::{
    AppliedChangeSet, ExecType, LockGuard, LockInfo, SqliteDriver, SqliteTarget,
    TrackingDefinitions, TrackingManager,
};

pub use engine::SqliteEngine;
