//! SQLite migration engine
//!
//! Runs formatted-SQL changelogs against a borrowed [`Connection`]. The engine never
//! opens or closes the connection; it only creates the tracking tables on demand and
//! takes the migration lock around writes.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::database::core::{AppliedChangeSet, TrackingManager};
use crate::engine::{ChangeLog, ChangeSet, MigrationEngine};
use crate::error::{EngineError, ValidationFailure};
use crate::resource::ResourceResolver;

/// Migration engine bound to one SQLite connection and one changelog
pub struct SqliteEngine<'c> {
    conn: &'c Connection,
    database: String,
    changelog: String,
    resolver: Box<dyn ResourceResolver>,
    parameters: BTreeMap<String, String>,
}

impl<'c> SqliteEngine<'c> {
    pub fn new(
        conn: &'c Connection,
        database: impl Into<String>,
        changelog: impl Into<String>,
        resolver: Box<dyn ResourceResolver>,
    ) -> Self {
        Self {
            conn,
            database: database.into(),
            changelog: changelog.into(),
            resolver,
            parameters: BTreeMap::new(),
        }
    }

    /// Registered changelog parameters
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    fn tracking(&self) -> TrackingManager<'c> {
        TrackingManager::new(self.conn)
    }

    fn load_changelog(&self) -> Result<ChangeLog, EngineError> {
        let log = ChangeLog::load(&self.changelog, self.resolver.as_ref())?;
        debug!(
            "loaded {} change set(s) from [{}] via {}",
            log.changesets.len(),
            self.changelog,
            self.resolver.describe()
        );
        Ok(log)
    }

    fn lock_owner() -> String {
        format!("bootmigrate (pid {})", std::process::id())
    }

    /// Run one changeset and record it, atomically
    fn execute(&self, cs: &ChangeSet, checksum: &str, rerun: bool) -> Result<(), EngineError> {
        info!("running change set [{}]", cs.identifier());

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&cs.sql(&self.parameters))
            .map_err(|source| EngineError::ChangeSet {
                changeset: cs.identifier(),
                source,
            })?;

        let tracking = TrackingManager::new(&tx);
        if rerun {
            tracking.record_rerun(cs, checksum)?;
        } else {
            tracking.record(cs, checksum)?;
        }

        tx.commit()?;
        Ok(())
    }
}

/// Duplicate identifiers and changed checksums of applied changesets
fn check(log: &ChangeLog, applied: &HashMap<String, AppliedChangeSet>) -> ValidationFailure {
    let mut failure = ValidationFailure {
        duplicate_changesets: log.duplicates(),
        checksum_mismatches: Vec::new(),
    };

    for cs in &log.changesets {
        if cs.run_on_change {
            continue;
        }
        let Some(stored) = applied
            .get(&cs.identifier())
            .and_then(|row| row.md5sum.as_deref())
        else {
            continue;
        };
        let current = cs.checksum();
        if stored != current {
            failure.checksum_mismatches.push(format!(
                "{} was: {} but is now: {}",
                cs.identifier(),
                stored,
                current
            ));
        }
    }

    failure
}

/// Changesets matching the filter that have never been applied
fn pending<'l>(
    log: &'l ChangeLog,
    applied: &HashMap<String, AppliedChangeSet>,
    contexts: Option<&str>,
) -> Vec<&'l ChangeSet> {
    log.changesets
        .iter()
        .filter(|cs| cs.matches_contexts(contexts))
        .filter(|cs| !applied.contains_key(&cs.identifier()))
        .collect()
}

impl MigrationEngine for SqliteEngine<'_> {
    fn set_changelog_parameter(&mut self, key: &str, value: &str) {
        self.parameters.insert(key.to_string(), value.to_string());
    }

    fn report_locks(&mut self, out: &mut dyn Write) -> Result<(), EngineError> {
        writeln!(out, "Database change log lock for {}", self.database)?;
        match self.tracking().current_lock()? {
            Some(lock) => writeln!(out, " - {} at {}", lock.locked_by, lock.granted)?,
            None => writeln!(out, " - No locks")?,
        }
        Ok(())
    }

    fn force_release_locks(&mut self) -> Result<(), EngineError> {
        let tracking = self.tracking();
        tracking.initialize()?;
        tracking.release()?;
        info!("released change log lock on {}", self.database);
        Ok(())
    }

    fn changelog_sync(&mut self, contexts: Option<&str>) -> Result<(), EngineError> {
        let log = self.load_changelog()?;
        let tracking = self.tracking();
        tracking.initialize()?;

        let lock = tracking.acquire(&Self::lock_owner())?;
        let applied = tracking.applied()?;
        let todo = pending(&log, &applied, contexts);
        for cs in &todo {
            tracking.record(cs, &cs.checksum())?;
        }
        lock.release()?;

        info!("marked {} change set(s) as applied", todo.len());
        Ok(())
    }

    fn report_status(
        &mut self,
        verbose: bool,
        contexts: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<(), EngineError> {
        let log = self.load_changelog()?;
        let applied = self.tracking().applied()?;
        let todo = pending(&log, &applied, contexts);

        writeln!(
            out,
            "{} change sets have not been applied to {}",
            todo.len(),
            self.database
        )?;
        if verbose {
            for cs in todo {
                writeln!(out, "     {}", cs.identifier())?;
            }
        }
        Ok(())
    }

    fn update(&mut self, contexts: Option<&str>) -> Result<(), EngineError> {
        let log = self.load_changelog()?;
        let tracking = self.tracking();
        tracking.initialize()?;

        let lock = tracking.acquire(&Self::lock_owner())?;
        let applied = tracking.applied()?;

        let failure = check(&log, &applied);
        if !failure.is_empty() {
            return Err(EngineError::Validation(failure));
        }

        let mut ran = 0;
        for cs in log.changesets.iter().filter(|cs| cs.matches_contexts(contexts)) {
            let checksum = cs.checksum();
            match applied.get(&cs.identifier()) {
                None => {
                    self.execute(cs, &checksum, false)?;
                    ran += 1;
                }
                Some(row) => {
                    let changed = row.md5sum.as_deref().is_some_and(|m| m != checksum);
                    if cs.run_always || (cs.run_on_change && changed) {
                        self.execute(cs, &checksum, true)?;
                        ran += 1;
                    } else if row.md5sum.is_none() {
                        tracking.set_checksum(cs, &checksum)?;
                    }
                }
            }
        }

        lock.release()?;
        info!("{} change set(s) applied to {}", ran, self.database);
        Ok(())
    }

    fn clear_checksums(&mut self) -> Result<(), EngineError> {
        let tracking = self.tracking();
        tracking.initialize()?;

        let lock = tracking.acquire(&Self::lock_owner())?;
        let cleared = tracking.clear_checksums()?;
        lock.release()?;

        info!("cleared {} check sum(s)", cleared);
        Ok(())
    }

    fn validate(&mut self) -> Result<(), EngineError> {
        let log = self.load_changelog()?;
        let applied = self.tracking().applied()?;

        let failure = check(&log, &applied);
        if failure.is_empty() {
            info!("changelog [{}] is valid", self.changelog);
            Ok(())
        } else {
            Err(EngineError::Validation(failure))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::FilesystemResolver;
    use tempfile::TempDir;

    const MAIN: &str = r#"--liquibase formatted sql

--changeset alice:1
CREATE TABLE ${table} (id INTEGER PRIMARY KEY, name TEXT);

--changeset alice:2 context:test
INSERT INTO ${table} (id, name) VALUES (1, 'fixture');

--changeset bob:3 runAlways:true
CREATE TABLE IF NOT EXISTS heartbeat (n INTEGER);
INSERT INTO heartbeat (n) VALUES (1);
"#;

    fn workspace(main: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.sql"), main).unwrap();
        dir
    }

    fn engine<'c>(conn: &'c Connection, dir: &TempDir) -> SqliteEngine<'c> {
        let mut engine = SqliteEngine::new(
            conn,
            "sqlite::memory:",
            "main.sql",
            Box::new(FilesystemResolver::new(dir.path())),
        );
        engine.set_changelog_parameter("table", "people");
        engine
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_update_applies_pending_once() {
        let dir = workspace(MAIN);
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = engine(&conn, &dir);

        engine.update(None).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM people"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM DATABASECHANGELOG"), 3);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM heartbeat"), 1);

        // second run only re-runs the runAlways changeset
        engine.update(None).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM people"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM heartbeat"), 2);
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM DATABASECHANGELOG WHERE EXECTYPE = 'RERAN'"
            ),
            1
        );
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM DATABASECHANGELOGLOCK WHERE LOCKED = 1"
            ),
            0
        );
    }

    #[test]
    fn test_update_respects_contexts() {
        let dir = workspace(MAIN);
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = engine(&conn, &dir);

        engine.update(Some("prod")).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM people"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM DATABASECHANGELOG"), 2);

        let mut status = Vec::new();
        engine.report_status(true, Some("test"), &mut status).unwrap();
        let status = String::from_utf8(status).unwrap();
        assert!(status.starts_with("1 change sets have not been applied to sqlite::memory:"));
        assert!(status.contains("     main.sql::2::alice"));
    }

    #[test]
    fn test_failed_changeset_rolls_back_and_unlocks() {
        let dir = workspace(
            "--liquibase formatted sql\n--changeset a:1\nCREATE TABLE t (id INTEGER);\n--changeset a:2\nINSERT INTO missing VALUES (1);\n",
        );
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = engine(&conn, &dir);

        let err = engine.update(None).unwrap_err();
        assert!(matches!(err, EngineError::ChangeSet { ref changeset, .. } if changeset == "main.sql::2::a"));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM DATABASECHANGELOG"), 1);
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM DATABASECHANGELOGLOCK WHERE LOCKED = 1"
            ),
            0
        );
    }

    #[test]
    fn test_sync_records_without_executing() {
        let dir = workspace(MAIN);
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = engine(&conn, &dir);

        engine.changelog_sync(None).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM DATABASECHANGELOG"), 3);
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'people'"
            ),
            0
        );
    }

    #[test]
    fn test_validate_detects_changed_checksum() {
        let dir = workspace(MAIN);
        let conn = Connection::open_in_memory().unwrap();
        engine(&conn, &dir).update(None).unwrap();

        std::fs::write(
            dir.path().join("main.sql"),
            MAIN.replace("name TEXT", "name TEXT NOT NULL"),
        )
        .unwrap();

        let mut engine = engine(&conn, &dir);
        let err = engine.validate().unwrap_err();
        match err {
            EngineError::Validation(failure) => {
                assert_eq!(failure.checksum_mismatches.len(), 1);
                assert!(failure.checksum_mismatches[0].starts_with("main.sql::1::alice"));
            }
            other => panic!("unexpected error: {}", other),
        }

        // update refuses to run on an invalid changelog
        assert!(engine.update(None).unwrap_err().is_validation());

        // clearing checksums accepts the new definition
        engine.clear_checksums().unwrap();
        engine.validate().unwrap();
        engine.update(None).unwrap();
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM DATABASECHANGELOG WHERE MD5SUM IS NULL"
            ),
            0
        );
    }

    #[test]
    fn test_validate_detects_duplicates() {
        let dir = workspace(
            "--liquibase formatted sql\n--changeset a:1\nSELECT 1;\n--changeset a:1\nSELECT 2;\n",
        );
        let conn = Connection::open_in_memory().unwrap();
        let err = engine(&conn, &dir).validate().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_locks() {
        let dir = workspace(MAIN);
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = engine(&conn, &dir);

        let mut out = Vec::new();
        engine.report_locks(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Database change log lock for sqlite::memory:\n - No locks\n"
        );

        let tracking = TrackingManager::new(&conn);
        tracking.initialize().unwrap();
        std::mem::forget(tracking.acquire("other-host").unwrap());

        assert!(matches!(
            engine.update(None),
            Err(EngineError::LockHeld { .. })
        ));

        let mut out = Vec::new();
        engine.report_locks(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains(" - other-host at "));

        engine.force_release_locks().unwrap();
        engine.update(None).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM people"), 1);
    }
}
