//! Minimal stand-in for the Tobira backend used by the harness test suites.
//!
//! It accepts the same command-line surface the harness drives
//! (`serve --config`, `db reset`, `search-index update|clear`, each with
//! `-c <config>`) and keeps its data in a JSON file next to the config.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tobira_harness_config::{DocumentError, TobiraConfig};
use tobira_harness_e2e::{Store, StoreError, serve};

#[derive(Debug, Parser)]
#[command(name = "tobira", about = "Test stand-in for the Tobira backend")]
struct Cli {
    /// Configuration document.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: StubCommand,
}

#[derive(Debug, Subcommand)]
enum StubCommand {
    /// Serve the line protocol on the configured port.
    Serve,
    /// Database maintenance.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Search index maintenance.
    SearchIndex {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Debug, Subcommand)]
enum DbAction {
    /// Remove every row.
    Reset {
        #[arg(long = "yes-absolutely-clear-db")]
        confirmed: bool,
    },
}

#[derive(Debug, Subcommand)]
enum IndexAction {
    /// Build the index from stored rows.
    Update,
    /// Drop the index.
    Clear {
        #[arg(long = "yes-absolutely-clear-index")]
        confirmed: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum StubError {
    #[error("missing -c/--config")]
    MissingConfig,
    #[error("refusing to {action} without {flag}")]
    Unconfirmed {
        action: &'static str,
        flag: &'static str,
    },
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] DocumentError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io failure: {0}")]
    Io(#[from] io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr().lock(), "tobira-stub: {error}"));
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<(), StubError> {
    let config_path = cli.config.ok_or(StubError::MissingConfig)?;
    let text = fs::read_to_string(&config_path).map_err(|source| StubError::Read {
        path: config_path.clone(),
        source,
    })?;
    let config = TobiraConfig::from_toml(&text)?;
    let store = Store::beside(&config_path);
    match cli.command {
        StubCommand::Serve => Ok(serve(config.http.port, store)?),
        StubCommand::Db {
            action: DbAction::Reset { confirmed },
        } => {
            confirm(confirmed, "reset the database", "--yes-absolutely-clear-db")?;
            Ok(store.update(|state| state.rows.clear())?)
        }
        StubCommand::SearchIndex {
            action: IndexAction::Update,
        } => Ok(store.update(|state| state.indexed = true)?),
        StubCommand::SearchIndex {
            action: IndexAction::Clear { confirmed },
        } => {
            confirm(confirmed, "clear the index", "--yes-absolutely-clear-index")?;
            Ok(store.update(|state| state.indexed = false)?)
        }
    }
}

const fn confirm(
    confirmed: bool,
    action: &'static str,
    flag: &'static str,
) -> Result<(), StubError> {
    if confirmed {
        Ok(())
    } else {
        Err(StubError::Unconfirmed { action, flag })
    }
}
