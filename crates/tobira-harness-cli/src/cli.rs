//! CLI argument definitions for the operator binary.

use clap::{Args, Parser, Subcommand};

/// Operator interface for per-worker Tobira test environments.
#[derive(Parser, Debug)]
#[command(
    name = "tobira-harness",
    about = "Inspect and drive per-worker Tobira test environments",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// The action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Worker selection shared by every subcommand.
#[derive(Args, Debug, Clone, Copy)]
pub(crate) struct WorkerArgs {
    /// Worker index; falls back to `TOBIRA_HARNESS_WORKER_INDEX`, then
    /// `NEXTEST_TEST_GLOBAL_SLOT`, then `0`.
    #[arg(long, short = 'i')]
    pub(crate) index: Option<u32>,
}

/// Structured subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub(crate) enum CliCommand {
    /// Prints the configuration document written for the worker.
    Config(WorkerArgs),
    /// Prints the worker's port, database, work directory and base URL.
    Slot(WorkerArgs),
    /// Starts the worker environment and holds it until a signal arrives.
    Worker(WorkerArgs),
    /// Resets the worker database of a running environment.
    Reset {
        /// Worker selection.
        #[command(flatten)]
        worker: WorkerArgs,
        /// Also clear the search index.
        #[arg(long)]
        search_index: bool,
    },
}

impl CliCommand {
    /// Worker index requested on the command line, if any.
    pub(crate) const fn index(self) -> Option<u32> {
        match self {
            Self::Config(worker) | Self::Slot(worker) | Self::Worker(worker) => worker.index,
            Self::Reset { worker, .. } => worker.index,
        }
    }
}
