//! Failures raised while supervising a backend process.

use std::io;
use std::process::ExitStatus;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced while starting a backend.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The backend log file could not be opened.
    #[error("failed to open backend log '{path}': {source}")]
    Log {
        /// Log file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The binary could not be spawned.
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        /// Binary that was launched.
        binary: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Something already listens on the slot's port.
    #[error("port {port} is already in use")]
    PortInUse {
        /// Port that was found open before spawning.
        port: u16,
    },
    /// The backend exited before its port became reachable.
    #[error("backend exited before listening on port {port} ({status})")]
    Exited {
        /// Port the backend was expected to bind.
        port: u16,
        /// Exit status reported by the OS.
        status: ExitStatus,
    },
    /// The port did not become reachable in time.
    #[error("port {port} not reachable after {timeout_ms} ms")]
    Timeout {
        /// Port that was polled.
        port: u16,
        /// Poll budget in milliseconds.
        timeout_ms: u64,
    },
    /// Polling the child for an exit status failed.
    #[error("failed to monitor backend process: {source}")]
    Monitor {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the port failed with an error that does not mean "not yet".
    #[error("failed to connect to port {port}: {source}")]
    Connect {
        /// Port that was checked.
        port: u16,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced while stopping a backend.
#[derive(Debug, Error)]
pub enum StopError {
    /// Delivering `SIGTERM` failed for a reason other than the process being
    /// gone.
    #[error("failed to signal backend pid {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Errno reported by `kill(2)`.
        #[source]
        source: Errno,
    },
    /// Waiting for or killing the child failed.
    #[error("failed to reap backend pid {pid}: {source}")]
    Reap {
        /// Target process.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
