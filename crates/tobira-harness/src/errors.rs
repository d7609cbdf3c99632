//! Setup and teardown failures of a worker environment.

use std::fmt;
use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;
use tobira_harness_config::DocumentError;

use crate::database::{DatabaseError, DatabaseName};
use crate::process::{StopError, SupervisorError};
use crate::slot::SlotError;

/// Resource whose preparation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupResource {
    /// Deriving the slot itself.
    Slot,
    /// The worker directory.
    Directory,
    /// The configuration document.
    Config,
    /// The worker database.
    Database,
    /// The backend process.
    Process,
    /// The backend's listening port.
    Port,
}

impl fmt::Display for SetupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Slot => "slot",
            Self::Directory => "directory",
            Self::Config => "config",
            Self::Database => "database",
            Self::Process => "process",
            Self::Port => "port",
        };
        f.write_str(label)
    }
}

/// Fatal failures while acquiring a worker environment.
///
/// Every variant names the worker index; [`SetupError::resource`] names the
/// resource that could not be prepared.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The slot could not be derived.
    #[error("worker {index}: {source}")]
    Slot {
        /// Worker index.
        index: u32,
        /// Underlying error.
        #[source]
        source: SlotError,
    },
    /// The worker directory could not be created.
    #[error("worker {index}: failed to create directory '{path}': {source}")]
    Directory {
        /// Worker index.
        index: u32,
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configuration document could not be rendered.
    #[error("worker {index}: {source}")]
    RenderConfig {
        /// Worker index.
        index: u32,
        /// Underlying error.
        #[source]
        source: DocumentError,
    },
    /// The configuration document could not be written.
    #[error("worker {index}: failed to write config '{path}': {source}")]
    WriteConfig {
        /// Worker index.
        index: u32,
        /// Config path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The worker database could not be prepared.
    #[error("worker {index}: {source}")]
    Database {
        /// Worker index.
        index: u32,
        /// Underlying error.
        #[source]
        source: DatabaseError,
    },
    /// The backend could not be started or never became reachable.
    #[error("worker {index}: {source}")]
    Process {
        /// Worker index.
        index: u32,
        /// Underlying error.
        #[source]
        source: SupervisorError,
    },
    /// A termination signal released the environment while it was being
    /// acquired.
    #[error("worker {index}: interrupted during setup")]
    Interrupted {
        /// Worker index.
        index: u32,
    },
}

impl SetupError {
    /// Worker whose setup failed.
    #[must_use]
    pub const fn index(&self) -> u32 {
        match self {
            Self::Slot { index, .. }
            | Self::Directory { index, .. }
            | Self::RenderConfig { index, .. }
            | Self::WriteConfig { index, .. }
            | Self::Database { index, .. }
            | Self::Process { index, .. }
            | Self::Interrupted { index } => *index,
        }
    }

    /// Resource that could not be prepared.
    #[must_use]
    pub const fn resource(&self) -> SetupResource {
        match self {
            Self::Slot { .. } => SetupResource::Slot,
            Self::Directory { .. } => SetupResource::Directory,
            Self::RenderConfig { .. } | Self::WriteConfig { .. } => SetupResource::Config,
            Self::Database { .. } => SetupResource::Database,
            Self::Process {
                source:
                    SupervisorError::PortInUse { .. }
                    | SupervisorError::Timeout { .. }
                    | SupervisorError::Connect { .. },
                ..
            } => SetupResource::Port,
            Self::Process { .. } | Self::Interrupted { .. } => SetupResource::Process,
        }
    }
}

/// A teardown step that did not complete cleanly.
///
/// Issues are logged and collected but never escalated.
#[derive(Debug, Error)]
pub enum TeardownIssue {
    /// The backend could not be stopped cleanly.
    #[error("worker {index}: {source}")]
    Process {
        /// Worker index.
        index: u32,
        /// Underlying error.
        #[source]
        source: StopError,
    },
    /// The worker database could not be dropped.
    #[error("worker {index}: failed to drop '{database}': {source}")]
    Database {
        /// Worker index.
        index: u32,
        /// Database name.
        database: DatabaseName,
        /// Underlying error.
        #[source]
        source: DatabaseError,
    },
    /// The worker directory could not be removed.
    #[error("worker {index}: failed to remove '{path}': {source}")]
    Directory {
        /// Worker index.
        index: u32,
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Outcome of releasing an environment.
#[derive(Debug, Default)]
pub struct TeardownReport {
    issues: Vec<TeardownIssue>,
}

impl TeardownReport {
    /// Whether every step completed cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Problems encountered, in teardown order.
    #[must_use]
    pub fn issues(&self) -> &[TeardownIssue] {
        &self.issues
    }

    pub(crate) fn push(&mut self, issue: TeardownIssue) {
        self.issues.push(issue);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::timeout(
        SupervisorError::Timeout { port: 3102, timeout_ms: 30_000 },
        SetupResource::Port
    )]
    #[case::taken(SupervisorError::PortInUse { port: 3102 }, SetupResource::Port)]
    #[case::spawn(
        SupervisorError::Spawn {
            binary: Utf8PathBuf::from("/missing"),
            source: io::Error::from(io::ErrorKind::NotFound),
        },
        SetupResource::Process
    )]
    fn process_failures_name_the_resource(
        #[case] source: SupervisorError,
        #[case] expected: SetupResource,
    ) {
        let error = SetupError::Process { index: 2, source };
        assert_eq!(error.resource(), expected);
        assert_eq!(error.index(), 2);
    }

    #[rstest]
    fn messages_name_the_worker() {
        let error = SetupError::Directory {
            index: 7,
            path: Utf8PathBuf::from("/tmp/_tobira/process7"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        let message = error.to_string();
        assert!(message.starts_with("worker 7:"), "{message}");
        assert!(message.contains("process7"), "{message}");
        assert_eq!(error.resource(), SetupResource::Directory);
        assert_eq!(SetupResource::Port.to_string(), "port");
    }

    #[rstest]
    fn interrupted_setup_names_the_worker() {
        let error = SetupError::Interrupted { index: 4 };
        assert_eq!(error.index(), 4);
        assert_eq!(error.resource(), SetupResource::Process);
        assert_eq!(error.to_string(), "worker 4: interrupted during setup");
    }

    #[rstest]
    fn empty_report_is_clean() {
        let report = TeardownReport::default();
        assert!(report.is_clean());
        assert!(report.issues().is_empty());
    }
}
