//! Administrative subcommands run against a worker's configuration.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tobira_harness_config::HarnessConfig;
use tracing::{debug, warn};

use crate::process::millis;
use crate::slot::WorkerSlot;

pub(crate) const COMMAND_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::command");

const CONFIG_FLAG: &str = "-c";

/// How long stderr may stay open after the command exited.
const STDERR_GRACE: Duration = Duration::from_millis(250);

/// Arguments of one administrative subcommand, without the config flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    args: Vec<String>,
}

impl AdminCommand {
    /// Builds a command from raw arguments.
    #[must_use]
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `db reset --yes-absolutely-clear-db`
    #[must_use]
    pub fn db_reset() -> Self {
        Self::new(["db", "reset", "--yes-absolutely-clear-db"])
    }

    /// `search-index update`
    #[must_use]
    pub fn search_index_update() -> Self {
        Self::new(["search-index", "update"])
    }

    /// `search-index clear --yes-absolutely-clear-index`
    #[must_use]
    pub fn search_index_clear() -> Self {
        Self::new(["search-index", "clear", "--yes-absolutely-clear-index"])
    }

    /// Arguments in invocation order.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Errors raised by a [`CommandRunner`].
///
/// Each variant carries the full command line so failures name exactly what
/// was run.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The subprocess could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Polling the subprocess failed.
    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        /// Rendered command line.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The subprocess ran past its budget and was killed.
    #[error("`{command}` timed out after {timeout_ms} ms")]
    Timeout {
        /// Rendered command line.
        command: String,
        /// Budget in milliseconds.
        timeout_ms: u64,
    },
    /// The subprocess exited unsuccessfully.
    #[error("`{command}` failed ({status}){}", stderr_suffix(.stderr))]
    NonZeroExit {
        /// Rendered command line.
        command: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured standard error, trimmed.
        stderr: String,
    },
}

impl CommandError {
    /// Command line that failed.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. }
            | Self::Wait { command, .. }
            | Self::Timeout { command, .. }
            | Self::NonZeroExit { command, .. } => command,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Runs administrative subcommands against a worker's backend.
///
/// Implementations block until the subcommand has finished; callers depend
/// on its effects being visible afterwards.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` with the slot's configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the command cannot be run or exits
    /// unsuccessfully.
    fn run(&self, slot: &WorkerSlot, command: &AdminCommand) -> Result<(), CommandError>;
}

/// [`CommandRunner`] spawning the slot's backend binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryCommandRunner {
    timeout: Duration,
    poll_interval: Duration,
}

impl BinaryCommandRunner {
    /// Builds a runner with an explicit per-command budget.
    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Builds a runner from the harness configuration.
    #[must_use]
    pub const fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.command_timeout(), config.poll_interval())
    }

    fn wait(&self, child: &mut Child, command: &str) -> Result<ExitStatus, CommandError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let status = child.try_wait().map_err(|source| CommandError::Wait {
                command: command.to_owned(),
                source,
            })?;
            if let Some(exit) = status {
                return Ok(exit);
            }
            if Instant::now() >= deadline {
                warn!(
                    target: COMMAND_TARGET,
                    command,
                    timeout_ms = millis(self.timeout),
                    "command timed out, killing process"
                );
                drop(child.kill());
                drop(child.wait());
                return Err(CommandError::Timeout {
                    command: command.to_owned(),
                    timeout_ms: millis(self.timeout),
                });
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl CommandRunner for BinaryCommandRunner {
    fn run(&self, slot: &WorkerSlot, command: &AdminCommand) -> Result<(), CommandError> {
        let rendered = render(slot, command);
        debug!(
            target: COMMAND_TARGET,
            worker = slot.index(),
            "Running: tobira{} {}",
            slot.index(),
            command
        );

        let started = Instant::now();
        let mut child = Command::new(slot.binary_path())
            .args(command.args())
            .arg(CONFIG_FLAG)
            .arg(slot.config_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        let stderr = StderrCapture::spawn(child.stderr.take());
        let status = self.wait(&mut child, &rendered)?;
        let captured = stderr.collect(STDERR_GRACE);

        debug!(
            target: COMMAND_TARGET,
            command = %rendered,
            %status,
            elapsed_ms = millis(started.elapsed()),
            "command finished"
        );
        if status.success() {
            return Ok(());
        }
        Err(CommandError::NonZeroExit {
            command: rendered,
            status,
            stderr: captured.trim().to_owned(),
        })
    }
}

/// Stderr collected on a helper thread so a chatty child never blocks on a
/// full pipe.
///
/// A process the command left behind may keep the pipe open indefinitely.
/// The reader is then abandoned and whatever arrived so far is reported.
struct StderrCapture {
    text: Arc<Mutex<String>>,
    finished: Receiver<()>,
}

impl StderrCapture {
    fn spawn(stderr: Option<impl Read + Send + 'static>) -> Self {
        let text = Arc::new(Mutex::new(String::new()));
        let (done, finished) = mpsc::channel();
        if let Some(reader) = stderr {
            let sink = Arc::clone(&text);
            thread::spawn(move || {
                for line in BufReader::new(reader).lines().map_while(Result::ok) {
                    let mut buffer = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
                drop(done.send(()));
            });
        }
        Self { text, finished }
    }

    /// Waits at most `grace` for the end of the stream, then returns what
    /// was read.
    fn collect(self, grace: Duration) -> String {
        drop(self.finished.recv_timeout(grace));
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn render(slot: &WorkerSlot, command: &AdminCommand) -> String {
    format!(
        "{} {} {CONFIG_FLAG} {}",
        slot.binary_path(),
        command,
        slot.config_path()
    )
}
