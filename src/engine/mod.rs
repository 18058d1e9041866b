//! Migration engine boundary
//!
//! The runner never touches changelogs, locks or checksums itself. It opens a
//! connection through a [`DatabaseDriver`], asks the driver for a [`MigrationEngine`]
//! bound to that connection, and invokes one engine operation per action.

pub mod changelog;

use std::io::Write;

use crate::config::ConnectionSettings;
use crate::error::EngineError;
use crate::resource::ResourceResolver;

pub use changelog::{ChangeLog, ChangeSet};

/// Operations a migration engine offers to the startup runner
pub trait MigrationEngine {
    /// Register a named changelog parameter (`${key}` in changeset bodies)
    fn set_changelog_parameter(&mut self, key: &str, value: &str);

    /// Describe currently held migration locks
    fn report_locks(&mut self, out: &mut dyn Write) -> Result<(), EngineError>;

    /// Clear the migration lock regardless of who holds it
    fn force_release_locks(&mut self) -> Result<(), EngineError>;

    /// Mark pending changesets as applied without executing them
    fn changelog_sync(&mut self, contexts: Option<&str>) -> Result<(), EngineError>;

    /// Write a pending-change report
    fn report_status(
        &mut self,
        verbose: bool,
        contexts: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<(), EngineError>;

    /// Execute all pending changesets
    fn update(&mut self, contexts: Option<&str>) -> Result<(), EngineError>;

    /// Discard stored checksums
    fn clear_checksums(&mut self) -> Result<(), EngineError>;

    /// Check changelog integrity; failures come back as [`EngineError::Validation`]
    fn validate(&mut self) -> Result<(), EngineError>;
}

/// Opens connections and binds engines to them
///
/// The runner owns the connection for the whole run: it calls [`connect`] once,
/// lends the connection to [`engine`], and hands it back to [`close`] exactly once.
///
/// [`connect`]: DatabaseDriver::connect
/// [`engine`]: DatabaseDriver::engine
/// [`close`]: DatabaseDriver::close
pub trait DatabaseDriver {
    type Connection;

    fn connect(&self, settings: &ConnectionSettings) -> Result<Self::Connection, EngineError>;

    fn engine<'c>(
        &self,
        conn: &'c Self::Connection,
        settings: &ConnectionSettings,
        changelog: &str,
        resolver: Box<dyn ResourceResolver>,
    ) -> Result<Box<dyn MigrationEngine + 'c>, EngineError>;

    fn close(&self, conn: Self::Connection) -> Result<(), EngineError>;
}
