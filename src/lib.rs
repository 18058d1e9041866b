#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! bootmigrate - schema migrations on application startup
//!
//! bootmigrate runs a changelog-driven migration engine once while an application
//! boots. Everything it does is driven by flat configuration properties
//! (`liquibase.*`, `db.*`), so it can be switched on, pointed at a database and told
//! which migration actions to perform without code changes.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `cli` (default) | The `bootmigrate` binary | `clap`, `tracing-subscriber` |
//!
//! The library itself (runner, engine, SQLite backend) is always available:
//!
//! ```toml
//! bootmigrate = { version = "0.3", default-features = false }
//! ```
//!
//! # Architecture
//!
//! - **[`config`]**: flat key/value configuration, loading from file and environment,
//!   validation into a [`MigrationPlan`]
//! - **[`action`]**: the migration actions and their dispatch table
//! - **[`resource`]**: classpath and filesystem resource resolution
//! - **[`properties`]**: changelog parameter files
//! - **[`engine`]**: the engine and driver traits, formatted-SQL changelogs
//! - **[`database`]**: the SQLite driver and engine
//! - **[`runner`]**: the startup algorithm
//! - **[`hook`]**: startup hooks for host applications
//!
//! # Configuration
//!
//! | key | default | |
//! |-----|---------|---|
//! | `liquibase.active` | `false` | only a case-insensitive `true` enables migrations |
//! | `liquibase.actions` | required | comma-separated, e.g. `validate,update` |
//! | `liquibase.changelog` | `mainchangelog.xml` | root changelog resource |
//! | `liquibase.properties` | `liquibase.properties` | optional changelog parameters |
//! | `liquibase.scanner` | `jar` | `jar` (classpath roots) or `src` (application path) |
//! | `liquibase.contexts` | | context filter |
//! | `liquibase.classpath` | `conf` | search roots for the `jar` scanner |
//! | `liquibase.validate.failfast` | `false` | make VALIDATE failures fatal |
//! | `db.url`, `db.user`, `db.pass` | | database connection |
//! | `application.path` | `.` | application base directory |
//! | `application.tmpdir` | OS temp dir | where STATUS reports are written |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bootmigrate::{MigrationConfig, MigrationRunner, SqliteDriver};
//!
//! let config = MigrationConfig::from_iter([
//!     ("liquibase.active", "true"),
//!     ("liquibase.actions", "validate,update"),
//!     ("liquibase.changelog", "db/changelog.sql"),
//!     ("db.url", "sqlite:app.db"),
//! ]);
//!
//! let report = MigrationRunner::new(config, SqliteDriver::new()).run()?;
//! println!("performed {:?}", report.performed);
//! ```
//!
//! ## As a startup hook
//!
//! ```rust,ignore
//! use bootmigrate::hook::{start_all, StartupHook};
//!
//! let mut migrations = MigrationRunner::new(MigrationConfig::load(None, &[])?, SqliteDriver::new());
//! start_all(&mut [&mut migrations as &mut dyn StartupHook])?;
//! ```

pub mod action;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod hook;
pub mod properties;
pub mod resource;
pub mod runner;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{ConnectionSettings, MigrationConfig, MigrationPlan, ScanMode};

// =============================================================================
// Actions and runner
// =============================================================================

pub use action::Action;
pub use hook::{start_all, StartupHook};
pub use runner::{MigrationRunner, RunReport};

// =============================================================================
// Engine and database
// =============================================================================

pub use database::{SqliteDriver, SqliteEngine};
pub use engine::{ChangeLog, ChangeSet, DatabaseDriver, MigrationEngine};

// =============================================================================
// Errors
// =============================================================================

pub use error::{ConfigError, EngineError, MigrationError, Result, ValidationFailure};
