//! Subcommand implementations.

use std::io::Write;

use tobira_harness::{
    AdminCommand, BinaryCommandRunner, CommandRunner, ConfigSynthesizer, ResetCoordinator,
    WorkerEnvironment, WorkerLayout, WorkerSlot,
};
use tobira_harness_config::HarnessConfig;
use tracing::info;

use crate::AppError;
use crate::shutdown::{ShutdownListener, ShutdownSignal};

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::commands");

fn slot_for(config: &HarnessConfig, index: u32) -> Result<WorkerSlot, AppError> {
    Ok(WorkerLayout::from_config(config).slot(index)?)
}

/// Writes the configuration document the worker's backend would receive.
pub(crate) fn print_config<W: Write>(
    config: &HarnessConfig,
    index: u32,
    stdout: &mut W,
) -> Result<(), AppError> {
    let slot = slot_for(config, index)?;
    let document = ConfigSynthesizer::new(config).render(&slot)?;
    stdout.write_all(document.as_bytes())?;
    Ok(())
}

/// Writes the resources derived for the worker, one `key = value` per line.
pub(crate) fn print_slot<W: Write>(
    config: &HarnessConfig,
    index: u32,
    stdout: &mut W,
) -> Result<(), AppError> {
    let slot = slot_for(config, index)?;
    writeln!(stdout, "index = {}", slot.index())?;
    writeln!(stdout, "port = {}", slot.port())?;
    writeln!(stdout, "database = {}", slot.db_name())?;
    writeln!(stdout, "index_prefix = {}", slot.index_prefix())?;
    writeln!(stdout, "work_dir = {}", slot.work_dir())?;
    writeln!(stdout, "config_path = {}", slot.config_path())?;
    writeln!(stdout, "base_url = {}", slot.base_url())?;
    Ok(())
}

/// Acquires the worker environment and holds it until `shutdown` fires.
///
/// The listener is armed before acquisition. A signal that arrives while the
/// environment is being set up releases it and is picked up here without
/// ever announcing `ready`.
pub(crate) fn hold_worker<W, S>(
    config: &HarnessConfig,
    index: u32,
    stdout: &mut W,
    shutdown: &S,
) -> Result<(), AppError>
where
    W: Write,
    S: ShutdownSignal,
{
    let listener = shutdown.listen()?;
    let environment = WorkerEnvironment::acquire(index, config)?;
    let pending = listener.pending();
    if pending.is_none() {
        writeln!(stdout, "ready {}", environment.base_url())?;
        stdout.flush()?;
    }
    let signal = pending.map_or_else(|| listener.wait(), Ok)?;

    info!(target: CLI_TARGET, worker = index, signal, "releasing worker environment");
    let report = environment.release();
    if report.is_clean() {
        Ok(())
    } else {
        Err(AppError::UncleanRelease {
            index,
            issues: report.issues().len(),
        })
    }
}

/// Resets the database of a running worker, optionally clearing its index.
pub(crate) fn reset<W: Write>(
    config: &HarnessConfig,
    index: u32,
    search_index: bool,
    stdout: &mut W,
) -> Result<(), AppError> {
    let slot = slot_for(config, index)?;
    let runner = BinaryCommandRunner::from_config(config);
    ResetCoordinator::begin(&slot, &runner).finish()?;
    if search_index {
        runner.run(&slot, &AdminCommand::search_index_clear())?;
    }
    writeln!(stdout, "reset worker {index}")?;
    Ok(())
}
