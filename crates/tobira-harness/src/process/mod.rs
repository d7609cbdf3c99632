//! Launching, watching and stopping worker backends.

use std::time::Duration;

mod errors;
mod reachability;
mod supervisor;

pub use errors::{StopError, SupervisorError};
pub use reachability::port_is_reachable;
pub use supervisor::{ProcessSupervisor, RunningProcess};
pub(crate) use supervisor::millis;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Time a backend gets to exit after `SIGTERM` before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// File in the worker directory receiving the backend's stdout and stderr.
pub const SERVE_LOG_FILE: &str = "serve.log";
