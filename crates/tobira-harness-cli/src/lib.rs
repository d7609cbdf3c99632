//! Operator runtime for the Tobira UI test harness.
//!
//! The binary lets a developer inspect what a worker would be given
//! (`config`, `slot`), hold a worker environment open outside a test run
//! (`worker`), and reset a running worker (`reset`). Leading configuration
//! flags are handled by `ortho_config`; the remaining tokens are parsed by
//! `clap`. IO streams are injected so the runtime can be driven from tests.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tobira_harness::{resolve_worker_index, telemetry};

mod cli;
mod commands;
mod config;
mod errors;
mod shutdown;

use cli::{Cli, CliCommand};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
pub(crate) use errors::AppError;
use shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with(args, stdout, stderr, &OrthoConfigLoader, &SystemShutdownSignal)
}

pub(crate) fn run_with<I, W, E, L, S>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
    shutdown: &S,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
    S: ShutdownSignal,
{
    match execute(args, stdout, loader, shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) if error.is_informational() => {
            drop(write!(stdout, "{error}"));
            ExitCode::SUCCESS
        }
        Err(error) => {
            drop(writeln!(stderr, "tobira-harness: {error}"));
            ExitCode::FAILURE
        }
    }
}

fn execute<I, W, L, S>(args: I, stdout: &mut W, loader: &L, shutdown: &S) -> Result<(), AppError>
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = Cli::try_parse_from(split.command_arguments).map_err(AppError::CliUsage)?;
    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;
    let index = resolve_worker_index(cli.command.index())?;

    match cli.command {
        CliCommand::Config(_) => commands::print_config(&config, index, stdout),
        CliCommand::Slot(_) => commands::print_slot(&config, index, stdout),
        CliCommand::Worker(_) => commands::hold_worker(&config, index, stdout, shutdown),
        CliCommand::Reset { search_index, .. } => {
            commands::reset(&config, index, search_index, stdout)
        }
    }
}
