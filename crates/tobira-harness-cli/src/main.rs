//! CLI entrypoint for the Tobira UI test harness.
//!
//! The binary delegates to [`tobira_harness_cli::run`], which loads
//! configuration, parses the subcommand and writes results to the process
//! streams.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tobira_harness_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
