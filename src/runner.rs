//! Startup migration runner
//!
//! [`MigrationRunner::run`] validates the configuration, opens one connection through
//! the driver, registers changelog parameters, performs the configured actions in order
//! and closes the connection again, whatever happened in between.

use std::io::{self, Write};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::action::{Action, ActionContext, ActionOutcome};
use crate::config::{ConnectionSettings, MigrationConfig, MigrationPlan, KEY_ACTIVE};
use crate::engine::{DatabaseDriver, MigrationEngine};
use crate::error::{EngineError, MigrationError, ValidationFailure};
use crate::properties;

/// Outcome of one startup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Migrations were not active; nothing was opened or performed
    pub skipped: bool,
    pub performed: Vec<Action>,
    /// STATUS report files, in the order they were written
    pub status_reports: Vec<PathBuf>,
    /// VALIDATE failures that were logged instead of aborting the run
    pub validation_failures: Vec<ValidationFailure>,
    /// Number of changelog parameters registered from the properties file
    pub parameters: usize,
}

impl RunReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Runs the configured migration actions against one database
pub struct MigrationRunner<D: DatabaseDriver> {
    config: MigrationConfig,
    driver: D,
    lock_out: Box<dyn Write>,
}

impl<D: DatabaseDriver> MigrationRunner<D> {
    /// Create a runner; LIST_LOCKS output goes to stdout
    pub fn new(config: MigrationConfig, driver: D) -> Self {
        Self {
            config,
            driver,
            lock_out: Box::new(io::stdout()),
        }
    }

    /// Send LIST_LOCKS output somewhere other than stdout
    pub fn with_lock_output(mut self, out: impl Write + 'static) -> Self {
        self.lock_out = Box::new(out);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Execute one startup run
    ///
    /// Configuration errors are reported before anything is opened, even when
    /// migrations are inactive. Once a connection is open it is closed exactly once;
    /// a failure to close is logged and never replaces the run's own error.
    pub fn run(&mut self) -> Result<RunReport, MigrationError> {
        let plan = self.config.plan()?;

        if !plan.active {
            info!(
                "Auto update flag [{}] != true => skipping structural update",
                self.config.get(KEY_ACTIVE).unwrap_or("<unset>")
            );
            return Ok(RunReport::skipped());
        }

        info!("Auto update flag found and positive => let's get on with changelog update");
        debug!("migration plan:\n{}", plan.summary());

        let guard = ConnectionGuard::open(&self.driver, &plan.connection)?;
        let result = migrate(&self.driver, guard.connection()?, &plan, &mut *self.lock_out);
        guard.close();

        result
    }
}

fn migrate<D: DatabaseDriver>(
    driver: &D,
    conn: &D::Connection,
    plan: &MigrationPlan,
    lock_out: &mut dyn Write,
) -> Result<RunReport, MigrationError> {
    let mut engine = driver.engine(conn, &plan.connection, &plan.changelog, plan.resolver())?;

    let mut report = RunReport {
        parameters: register_parameters(engine.as_mut(), plan)?,
        ..Default::default()
    };

    let mut ctx = ActionContext {
        engine: engine.as_mut(),
        contexts: plan.contexts.as_deref(),
        status_dir: &plan.status_dir,
        lock_out,
        fail_on_validation: plan.fail_on_validation,
    };

    for action in &plan.actions {
        info!("Dealing with op [{}]", action);
        match action.perform(&mut ctx)? {
            ActionOutcome::Done => {}
            ActionOutcome::StatusWritten(path) => report.status_reports.push(path),
            ActionOutcome::ValidationFailed(failure) => report.validation_failures.push(failure),
        }
        info!("op [{}] performed", action);
        report.performed.push(*action);
    }

    Ok(report)
}

/// Feed the optional properties file to the engine as changelog parameters
fn register_parameters(
    engine: &mut dyn MigrationEngine,
    plan: &MigrationPlan,
) -> Result<usize, MigrationError> {
    let resolver = plan.resolver();
    let Some(stream) = resolver.resolve_first(&plan.properties)? else {
        info!("Could not find properties file [{}]", plan.properties);
        return Ok(0);
    };

    let props = properties::load(stream)?;
    for (key, value) in &props {
        info!("found parameter [{}] / [{}] for changelog update", key, value);
        engine.set_changelog_parameter(key, value);
    }
    Ok(props.len())
}

/// Owns the open connection and closes it exactly once
struct ConnectionGuard<'d, D: DatabaseDriver> {
    driver: &'d D,
    conn: Option<D::Connection>,
}

impl<'d, D: DatabaseDriver> ConnectionGuard<'d, D> {
    fn open(driver: &'d D, settings: &ConnectionSettings) -> Result<Self, EngineError> {
        let conn = driver.connect(settings)?;
        Ok(Self {
            driver,
            conn: Some(conn),
        })
    }

    fn connection(&self) -> Result<&D::Connection, EngineError> {
        self.conn
            .as_ref()
            .ok_or_else(|| EngineError::Other("database connection already closed".to_string()))
    }

    fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self.driver.close(conn) {
                warn!("problem closing connection: {}", e);
            }
        }
    }
}

impl<D: DatabaseDriver> Drop for ConnectionGuard<'_, D> {
    fn drop(&mut self) {
        self.release();
    }
}
