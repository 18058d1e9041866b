//! SQLite connection management
//!
//! Connection URLs follow the usual JDBC-ish shapes:
//! `sqlite:app.db`, `sqlite://var/app.db`, `jdbc:sqlite:app.db`, `sqlite::memory:`.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::config::ConnectionSettings;
use crate::database::engine::SqliteEngine;
use crate::engine::{DatabaseDriver, MigrationEngine};
use crate::error::EngineError;
use crate::resource::ResourceResolver;

/// Where a SQLite URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

impl SqliteTarget {
    /// Parse a connection URL
    pub fn from_url(url: &str) -> Result<Self, EngineError> {
        let unsupported = || EngineError::UnsupportedUrl(url.to_string());

        let rest = url.strip_prefix("jdbc:").unwrap_or(url);
        let rest = rest.strip_prefix("sqlite:").ok_or_else(unsupported)?;

        if rest == ":memory:" || rest == "//:memory:" {
            return Ok(SqliteTarget::Memory);
        }

        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            return Err(unsupported());
        }
        Ok(SqliteTarget::File(PathBuf::from(path)))
    }
}

/// Driver for SQLite databases
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    busy_timeout: Duration,
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a statement waits on a locked database file before failing
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Configure a freshly opened connection
    fn configure(&self, conn: &Connection) -> Result<(), EngineError> {
        conn.busy_timeout(self.busy_timeout)?;

        // Enable foreign keys
        conn.execute("PRAGMA foreign_keys=ON", [])?;

        Ok(())
    }
}

impl DatabaseDriver for SqliteDriver {
    type Connection = Connection;

    fn connect(&self, settings: &ConnectionSettings) -> Result<Connection, EngineError> {
        let url = settings.url.as_deref().ok_or(EngineError::MissingUrl)?;
        let target = SqliteTarget::from_url(url)?;

        info!("Migrate DB: {}", settings.display_target());

        let conn = match &target {
            SqliteTarget::Memory => Connection::open_in_memory(),
            SqliteTarget::File(path) => Connection::open(path),
        }
        .map_err(|source| EngineError::Connect {
            url: url.to_string(),
            source,
        })?;

        self.configure(&conn)?;
        Ok(conn)
    }

    fn engine<'c>(
        &self,
        conn: &'c Connection,
        settings: &ConnectionSettings,
        changelog: &str,
        resolver: Box<dyn ResourceResolver>,
    ) -> Result<Box<dyn MigrationEngine + 'c>, EngineError> {
        let database = settings.url.clone().unwrap_or_default();
        Ok(Box::new(SqliteEngine::new(conn, database, changelog, resolver)))
    }

    fn close(&self, conn: Connection) -> Result<(), EngineError> {
        conn.close().map_err(|(_, e)| EngineError::Database(e))
    }
}
