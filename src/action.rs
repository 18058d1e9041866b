//! Migration actions and their dispatch table
//!
//! Actions come from the comma-separated `liquibase.actions` setting and run in the
//! order they are listed. Each variant maps to exactly one handler function in
//! [`Action::handler`].

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{error, info};

use crate::engine::MigrationEngine;
use crate::error::{ConfigError, EngineError, ValidationFailure};

/// One migration sub-command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ListLocks,
    ReleaseLocks,
    Sync,
    Status,
    Update,
    ClearChecksums,
    Validate,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::ListLocks,
        Action::ReleaseLocks,
        Action::Sync,
        Action::Status,
        Action::Update,
        Action::ClearChecksums,
        Action::Validate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::ListLocks => "LIST_LOCKS",
            Action::ReleaseLocks => "RELEASE_LOCKS",
            Action::Sync => "SYNC",
            Action::Status => "STATUS",
            Action::Update => "UPDATE",
            Action::ClearChecksums => "CLEAR_CHECKSUMS",
            Action::Validate => "VALIDATE",
        }
    }

    /// Handler function for this action
    pub fn handler(self) -> ActionHandler {
        match self {
            Action::ListLocks => list_locks,
            Action::ReleaseLocks => release_locks,
            Action::Sync => sync,
            Action::Status => status,
            Action::Update => update,
            Action::ClearChecksums => clear_checksums,
            Action::Validate => validate,
        }
    }

    /// Run this action against the engine in `ctx`
    pub fn perform(self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
        (self.handler())(ctx)
    }

    /// Parse a comma-separated action list, keeping the given order
    ///
    /// Items are trimmed and empty items are skipped. The list must name at least one
    /// action.
    pub fn parse_list(s: &str) -> Result<Vec<Action>, ConfigError> {
        let actions = s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(Action::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        if actions.is_empty() {
            return Err(ConfigError::EmptyActions);
        }
        Ok(actions)
    }
}

impl FromStr for Action {
    type Err = ConfigError;

    /// Case-insensitive; underscores and dashes are optional (`listLocks`, `LIST_LOCKS`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_uppercase();

        Action::ALL
            .into_iter()
            .find(|action| action.name().replace('_', "") == normalized)
            .ok_or_else(|| ConfigError::UnknownAction(s.trim().to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Everything a handler may touch while performing one action
pub struct ActionContext<'a> {
    pub engine: &'a mut dyn MigrationEngine,
    /// Context filter passed through to the engine
    pub contexts: Option<&'a str>,
    /// Directory receiving STATUS report files
    pub status_dir: &'a Path,
    /// Sink for LIST_LOCKS output (stdout when run from the host)
    pub lock_out: &'a mut dyn Write,
    /// Treat a VALIDATE failure as fatal instead of logging it
    pub fail_on_validation: bool,
}

/// What a successfully handled action produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    StatusWritten(PathBuf),
    ValidationFailed(ValidationFailure),
}

pub type ActionHandler = fn(&mut ActionContext<'_>) -> Result<ActionOutcome, EngineError>;

fn list_locks(ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
    ctx.engine.report_locks(&mut *ctx.lock_out)?;
    ctx.lock_out.flush()?;
    Ok(ActionOutcome::Done)
}

fn release_locks(ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
    ctx.engine.force_release_locks()?;
    Ok(ActionOutcome::Done)
}

fn sync(ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
    ctx.engine.changelog_sync(ctx.contexts)?;
    Ok(ActionOutcome::Done)
}

fn status(ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
    std::fs::create_dir_all(ctx.status_dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix("liquibase")
        .suffix(".status")
        .tempfile_in(ctx.status_dir)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        ctx.engine
            .report_status(true, ctx.contexts, &mut writer)?;
        writer.flush()?;
    }

    let (_file, path) = tmp.keep().map_err(|e| EngineError::Io(e.error))?;
    info!("status dumped into file [{}]", path.display());
    Ok(ActionOutcome::StatusWritten(path))
}

fn update(ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
    ctx.engine.update(ctx.contexts)?;
    Ok(ActionOutcome::Done)
}

fn clear_checksums(ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
    ctx.engine.clear_checksums()?;
    Ok(ActionOutcome::Done)
}

fn validate(ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, EngineError> {
    match ctx.engine.validate() {
        Ok(()) => Ok(ActionOutcome::Done),
        Err(EngineError::Validation(failure)) if !ctx.fail_on_validation => {
            error!("changelog validation error: {}", failure);
            Ok(ActionOutcome::ValidationFailed(failure))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_str() {
        assert_eq!("update".parse::<Action>().unwrap(), Action::Update);
        assert_eq!("LISTLOCKS".parse::<Action>().unwrap(), Action::ListLocks);
        assert_eq!("list_locks".parse::<Action>().unwrap(), Action::ListLocks);
        assert_eq!("releaseLocks".parse::<Action>().unwrap(), Action::ReleaseLocks);
        assert_eq!(
            "clear-checksums".parse::<Action>().unwrap(),
            Action::ClearChecksums
        );
        assert_eq!(
            "rollback".parse::<Action>(),
            Err(ConfigError::UnknownAction("rollback".to_string()))
        );
    }

    #[test]
    fn test_parse_list_keeps_order() {
        let actions = Action::parse_list("validate, update ,STATUS").unwrap();
        assert_eq!(
            actions,
            vec![Action::Validate, Action::Update, Action::Status]
        );

        let repeated = Action::parse_list("update,update").unwrap();
        assert_eq!(repeated, vec![Action::Update, Action::Update]);
    }

    #[test]
    fn test_parse_list_rejects_empty_and_unknown() {
        assert_eq!(Action::parse_list(""), Err(ConfigError::EmptyActions));
        assert_eq!(Action::parse_list(" , ,"), Err(ConfigError::EmptyActions));
        assert_eq!(
            Action::parse_list("update,bogus"),
            Err(ConfigError::UnknownAction("bogus".to_string()))
        );
    }

    #[test]
    fn test_display_round_trips_name() {
        for action in Action::ALL {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
    }
}
