use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use bootmigrate::*;
use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.bootmigrate.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Override a configuration key, e.g. -D liquibase.actions=status,update
    #[clap(short = 'D', value_name = "KEY=VALUE", value_parser = parse_override)]
    define: Vec<(String, String)>,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured migration actions (default).
    Run,

    /// Validate the configuration and print the resulting plan as JSON.
    Plan {
        /// Pretty-print JSON output
        #[clap(long)]
        pretty: bool,
    },
}

fn parse_override(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    let config = MigrationConfig::load(cli.config.as_deref(), &cli.define)
        .context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let report = MigrationRunner::new(config, SqliteDriver::new()).run()?;
            for path in &report.status_reports {
                println!("status report: {}", path.display());
            }
            if !report.validation_failures.is_empty() {
                eprintln!(
                    "{} validation failure(s) were ignored",
                    report.validation_failures.len()
                );
            }
        }
        Commands::Plan { pretty } => {
            let plan = config.plan()?;
            let output = match pretty {
                true => serde_json::to_string_pretty(&plan)?,
                false => serde_json::to_string(&plan)?,
            };
            println!("{}", output);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(match cli.debug {
            true => Level::DEBUG,
            false => Level::INFO,
        })
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
