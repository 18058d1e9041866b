//! Error types for bootmigrate.
//!
//! Everything fatal reaches the caller as a [`MigrationError`]. Engine and I/O failures
//! are wrapped in [`MigrationError::Setup`] with the original cause kept as `source()`.

use thiserror::Error;

/// Result type alias using the crate-level error
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Fatal outcome of a startup migration run
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Configuration is unusable; raised before any connection is opened
    #[error("invalid migration configuration: {0}")]
    Config(#[from] ConfigError),

    /// Connection, engine or I/O failure while migrating
    #[error("migration setup failed: {0}")]
    Setup(#[source] EngineError),
}

impl From<EngineError> for MigrationError {
    fn from(e: EngineError) -> Self {
        MigrationError::Setup(e)
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(e: std::io::Error) -> Self {
        MigrationError::Setup(EngineError::Io(e))
    }
}

/// Configuration problems detected while building a migration plan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no valid action found for migration operation (liquibase.actions is not set)")]
    MissingActions,

    #[error("liquibase.actions does not name any action")]
    EmptyActions,

    #[error("unknown migration action '{0}'")]
    UnknownAction(String),

    #[error("no valid scanner found for migration operation: '{0}'")]
    UnknownScanner(String),

    #[error("failed to load configuration: {0}")]
    Source(String),
}

/// Failures reported by a database driver or migration engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("db.url is not set")]
    MissingUrl,

    #[error("unsupported database url '{0}'")]
    UnsupportedUrl(String),

    #[error("cannot connect to '{url}': {source}")]
    Connect {
        url: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("resource '{0}' not found")]
    MissingResource(String),

    #[error("resource '{path}' is ambiguous: {count} matches")]
    AmbiguousResource { path: String, count: usize },

    #[error("changelog '{path}' line {line}: {message}")]
    Changelog {
        path: String,
        line: usize,
        message: String,
    },

    #[error("changelog include cycle through '{0}'")]
    IncludeCycle(String),

    #[error("could not acquire change log lock, currently locked by {locked_by} since {granted}")]
    LockHeld { locked_by: String, granted: String },

    #[error("changeset {changeset} failed: {source}")]
    ChangeSet {
        changeset: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{0}")]
    Validation(ValidationFailure),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether this error is a changelog validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

/// Problems found while validating a changelog against the database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationFailure {
    pub duplicate_changesets: Vec<String>,
    pub checksum_mismatches: Vec<String>,
}

impl ValidationFailure {
    pub fn is_empty(&self) -> bool {
        self.duplicate_changesets.is_empty() && self.checksum_mismatches.is_empty()
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed:")?;
        if !self.duplicate_changesets.is_empty() {
            write!(
                f,
                " {} duplicate change set(s) [{}]",
                self.duplicate_changesets.len(),
                self.duplicate_changesets.join(", ")
            )?;
        }
        if !self.checksum_mismatches.is_empty() {
            write!(
                f,
                " {} change set(s) check sum changed [{}]",
                self.checksum_mismatches.len(),
                self.checksum_mismatches.join(", ")
            )?;
        }
        Ok(())
    }
}
