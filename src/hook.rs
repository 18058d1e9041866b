//! Application startup hooks
//!
//! A host application registers its startup components as [`StartupHook`]s and calls
//! [`start_all`] once while booting. The first failing hook aborts the boot.

use tracing::{error, info};

use crate::engine::DatabaseDriver;
use crate::error::MigrationError;
use crate::runner::MigrationRunner;

/// Component notified once when the application starts
pub trait StartupHook {
    fn name(&self) -> &str;

    fn on_application_start(&mut self) -> Result<(), MigrationError>;
}

impl<D: DatabaseDriver> StartupHook for MigrationRunner<D> {
    fn name(&self) -> &str {
        "migrations"
    }

    fn on_application_start(&mut self) -> Result<(), MigrationError> {
        let report = self.run()?;
        if !report.skipped {
            info!(
                "{} migration action(s) performed, {} validation failure(s) ignored",
                report.performed.len(),
                report.validation_failures.len()
            );
        }
        Ok(())
    }
}

/// Start hooks in order, stopping at the first failure
pub fn start_all(hooks: &mut [&mut dyn StartupHook]) -> Result<(), MigrationError> {
    for hook in hooks.iter_mut() {
        info!("starting [{}]", hook.name());
        if let Err(e) = hook.on_application_start() {
            error!("[{}] failed to start: {}", hook.name(), e);
            return Err(e);
        }
    }
    Ok(())
}
