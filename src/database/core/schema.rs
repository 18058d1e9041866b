//! Tracking tables
//!
//! Applied changesets are recorded in `DATABASECHANGELOG`; the single row of
//! `DATABASECHANGELOGLOCK` serializes writers across processes.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::engine::ChangeSet;
use crate::error::EngineError;

/// Tracking table definitions
pub struct TrackingDefinitions;

impl TrackingDefinitions {
    pub const CHANGELOG_TABLE_NAME: &'static str = "DATABASECHANGELOG";
    pub const LOCK_TABLE_NAME: &'static str = "DATABASECHANGELOGLOCK";

    /// SQL for creating the changelog table
    pub const CHANGELOG_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS DATABASECHANGELOG (
            ID TEXT NOT NULL,
            AUTHOR TEXT NOT NULL,
            FILENAME TEXT NOT NULL,
            DATEEXECUTED TEXT NOT NULL,
            ORDEREXECUTED INTEGER NOT NULL,
            EXECTYPE TEXT NOT NULL,
            MD5SUM TEXT,
            DESCRIPTION TEXT,
            CONTEXTS TEXT,
            PRIMARY KEY (ID, AUTHOR, FILENAME)
        );
    "#;

    /// SQL for creating the lock table
    pub const LOCK_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS DATABASECHANGELOGLOCK (
            ID INTEGER PRIMARY KEY CHECK (ID = 1),
            LOCKED INTEGER NOT NULL DEFAULT 0,
            LOCKGRANTED TEXT,
            LOCKEDBY TEXT
        );
    "#;

    pub const LOCK_ROW: &'static str =
        "INSERT OR IGNORE INTO DATABASECHANGELOGLOCK (ID, LOCKED) VALUES (1, 0)";
}

/// How a changeset row came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecType {
    Executed,
    Reran,
}

impl ExecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecType::Executed => "EXECUTED",
            ExecType::Reran => "RERAN",
        }
    }
}

/// A row of `DATABASECHANGELOG`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChangeSet {
    pub id: String,
    pub author: String,
    pub file: String,
    pub date_executed: String,
    pub order_executed: i64,
    pub exec_type: String,
    pub md5sum: Option<String>,
}

impl AppliedChangeSet {
    pub fn identifier(&self) -> String {
        format!("{}::{}::{}", self.file, self.id, self.author)
    }
}

/// Holder of the migration lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub locked_by: String,
    pub granted: String,
}

/// Access to the tracking tables over a borrowed connection
#[derive(Clone, Copy)]
pub struct TrackingManager<'a> {
    conn: &'a Connection,
}

impl<'a> TrackingManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create both tables and the lock row if missing
    pub fn initialize(&self) -> Result<(), EngineError> {
        self.conn.execute(TrackingDefinitions::CHANGELOG_TABLE, [])?;
        self.conn.execute(TrackingDefinitions::LOCK_TABLE, [])?;
        self.conn.execute(TrackingDefinitions::LOCK_ROW, [])?;
        Ok(())
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool, EngineError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Applied changesets keyed by identifier
    pub fn applied(&self) -> Result<HashMap<String, AppliedChangeSet>, EngineError> {
        if !self.table_exists(TrackingDefinitions::CHANGELOG_TABLE_NAME)? {
            return Ok(HashMap::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT ID, AUTHOR, FILENAME, DATEEXECUTED, ORDEREXECUTED, EXECTYPE, MD5SUM
             FROM DATABASECHANGELOG ORDER BY ORDEREXECUTED",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AppliedChangeSet {
                id: row.get(0)?,
                author: row.get(1)?,
                file: row.get(2)?,
                date_executed: row.get(3)?,
                order_executed: row.get(4)?,
                exec_type: row.get(5)?,
                md5sum: row.get(6)?,
            })
        })?;

        let mut applied = HashMap::new();
        for row in rows {
            let row = row?;
            applied.insert(row.identifier(), row);
        }
        Ok(applied)
    }

    fn next_order(&self) -> Result<i64, EngineError> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(ORDEREXECUTED), 0) + 1 FROM DATABASECHANGELOG",
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    /// Insert a row for a changeset run for the first time (or synced)
    pub fn record(&self, cs: &ChangeSet, checksum: &str) -> Result<(), EngineError> {
        let order = self.next_order()?;
        let contexts = (!cs.contexts.is_empty()).then(|| cs.contexts.join(","));
        self.conn.execute(
            "INSERT INTO DATABASECHANGELOG
                (ID, AUTHOR, FILENAME, DATEEXECUTED, ORDEREXECUTED, EXECTYPE, MD5SUM, DESCRIPTION, CONTEXTS)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                cs.id,
                cs.author,
                cs.file,
                now(),
                order,
                ExecType::Executed.as_str(),
                checksum,
                cs.describe(),
                contexts,
            ],
        )?;
        Ok(())
    }

    /// Update the row of a changeset that ran again
    pub fn record_rerun(&self, cs: &ChangeSet, checksum: &str) -> Result<(), EngineError> {
        let order = self.next_order()?;
        self.conn.execute(
            "UPDATE DATABASECHANGELOG
             SET DATEEXECUTED = ?1, ORDEREXECUTED = ?2, EXECTYPE = ?3, MD5SUM = ?4
             WHERE ID = ?5 AND AUTHOR = ?6 AND FILENAME = ?7",
            params![
                now(),
                order,
                ExecType::Reran.as_str(),
                checksum,
                cs.id,
                cs.author,
                cs.file,
            ],
        )?;
        Ok(())
    }

    /// Store a recomputed checksum
    pub fn set_checksum(&self, cs: &ChangeSet, checksum: &str) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE DATABASECHANGELOG SET MD5SUM = ?1 WHERE ID = ?2 AND AUTHOR = ?3 AND FILENAME = ?4",
            params![checksum, cs.id, cs.author, cs.file],
        )?;
        Ok(())
    }

    /// Null every stored checksum, returning the number of rows touched
    pub fn clear_checksums(&self) -> Result<usize, EngineError> {
        Ok(self
            .conn
            .execute("UPDATE DATABASECHANGELOG SET MD5SUM = NULL", [])?)
    }

    /// Current lock holder, if the lock is taken
    pub fn current_lock(&self) -> Result<Option<LockInfo>, EngineError> {
        if !self.table_exists(TrackingDefinitions::LOCK_TABLE_NAME)? {
            return Ok(None);
        }

        let lock = self
            .conn
            .query_row(
                "SELECT COALESCE(LOCKEDBY, 'unknown'), COALESCE(LOCKGRANTED, 'unknown')
                 FROM DATABASECHANGELOGLOCK WHERE ID = 1 AND LOCKED = 1",
                [],
                |row| {
                    Ok(LockInfo {
                        locked_by: row.get(0)?,
                        granted: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(lock)
    }

    /// Take the lock, failing if someone else holds it
    pub fn acquire(&self, owner: &str) -> Result<LockGuard<'a>, EngineError> {
        let updated = self.conn.execute(
            "UPDATE DATABASECHANGELOGLOCK SET LOCKED = 1, LOCKGRANTED = ?1, LOCKEDBY = ?2
             WHERE ID = 1 AND LOCKED = 0",
            params![now(), owner],
        )?;

        if updated == 0 {
            let holder = self.current_lock()?.unwrap_or(LockInfo {
                locked_by: "unknown".to_string(),
                granted: "unknown".to_string(),
            });
            return Err(EngineError::LockHeld {
                locked_by: holder.locked_by,
                granted: holder.granted,
            });
        }

        Ok(LockGuard {
            manager: *self,
            released: false,
        })
    }

    /// Clear the lock regardless of its holder
    pub fn release(&self) -> Result<(), EngineError> {
        self.conn.execute(
            "UPDATE DATABASECHANGELOGLOCK SET LOCKED = 0, LOCKGRANTED = NULL, LOCKEDBY = NULL
             WHERE ID = 1",
            [],
        )?;
        Ok(())
    }
}

/// Releases the migration lock when dropped
pub struct LockGuard<'a> {
    manager: TrackingManager<'a>,
    released: bool,
}

impl LockGuard<'_> {
    /// Release now and report failures
    pub fn release(mut self) -> Result<(), EngineError> {
        self.released = true;
        self.manager.release()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.manager.release() {
            warn!("problem releasing change log lock: {}", e);
        }
    }
}

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChangeLog;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys=ON", []).unwrap();
        conn
    }

    fn changeset(id: &str) -> ChangeSet {
        let content = format!("--liquibase formatted sql\n--changeset tester:{}\nSELECT 1;\n", id);
        ChangeLog::parse("main.sql", &content)
            .unwrap()
            .changesets
            .remove(0)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = create_test_db();
        let manager = TrackingManager::new(&conn);

        assert!(!manager.table_exists("DATABASECHANGELOG").unwrap());
        manager.initialize().unwrap();
        manager.initialize().unwrap();
        assert!(manager.table_exists("DATABASECHANGELOG").unwrap());
        assert!(manager.table_exists("DATABASECHANGELOGLOCK").unwrap());
    }

    #[test]
    fn test_applied_without_tables() {
        let conn = create_test_db();
        let manager = TrackingManager::new(&conn);
        assert!(manager.applied().unwrap().is_empty());
        assert_eq!(manager.current_lock().unwrap(), None);
    }

    #[test]
    fn test_record_and_rerun() {
        let conn = create_test_db();
        let manager = TrackingManager::new(&conn);
        manager.initialize().unwrap();

        let first = changeset("1");
        let second = changeset("2");
        manager.record(&first, "aaa").unwrap();
        manager.record(&second, "bbb").unwrap();

        let applied = manager.applied().unwrap();
        assert_eq!(applied.len(), 2);
        let row = &applied["main.sql::1::tester"];
        assert_eq!(row.order_executed, 1);
        assert_eq!(row.exec_type, "EXECUTED");
        assert_eq!(row.md5sum.as_deref(), Some("aaa"));

        manager.record_rerun(&first, "ccc").unwrap();
        let applied = manager.applied().unwrap();
        let row = &applied["main.sql::1::tester"];
        assert_eq!(row.order_executed, 3);
        assert_eq!(row.exec_type, "RERAN");
        assert_eq!(row.md5sum.as_deref(), Some("ccc"));
    }

    #[test]
    fn test_clear_and_set_checksum() {
        let conn = create_test_db();
        let manager = TrackingManager::new(&conn);
        manager.initialize().unwrap();

        let cs = changeset("1");
        manager.record(&cs, "aaa").unwrap();
        assert_eq!(manager.clear_checksums().unwrap(), 1);
        assert_eq!(manager.applied().unwrap()["main.sql::1::tester"].md5sum, None);

        manager.set_checksum(&cs, "ddd").unwrap();
        assert_eq!(
            manager.applied().unwrap()["main.sql::1::tester"]
                .md5sum
                .as_deref(),
            Some("ddd")
        );
    }

    #[test]
    fn test_lock_guard() {
        let conn = create_test_db();
        let manager = TrackingManager::new(&conn);
        manager.initialize().unwrap();

        {
            let _guard = manager.acquire("first").unwrap();
            let holder = manager.current_lock().unwrap().unwrap();
            assert_eq!(holder.locked_by, "first");

            let err = manager.acquire("second").err().unwrap();
            assert!(matches!(err, EngineError::LockHeld { locked_by, .. } if locked_by == "first"));
        }

        // dropped guard released the lock
        assert_eq!(manager.current_lock().unwrap(), None);

        let guard = manager.acquire("third").unwrap();
        guard.release().unwrap();
        assert_eq!(manager.current_lock().unwrap(), None);
    }

    #[test]
    fn test_force_release() {
        let conn = create_test_db();
        let manager = TrackingManager::new(&conn);
        manager.initialize().unwrap();

        let guard = manager.acquire("stale").unwrap();
        std::mem::forget(guard);
        assert!(manager.current_lock().unwrap().is_some());

        manager.release().unwrap();
        assert_eq!(manager.current_lock().unwrap(), None);
    }
}
