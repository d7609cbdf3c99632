//! Error types for the operator CLI.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tobira_harness::telemetry::TelemetryError;
use tobira_harness::{CommandError, SetupError, ShutdownError, SlotError};
use tobira_harness_config::DocumentError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("failed to render worker configuration: {0}")]
    Render(#[from] DocumentError),
    #[error("failed to set up worker environment: {0}")]
    Setup(#[from] SetupError),
    #[error("administrative command failed: {0}")]
    Command(#[from] CommandError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    #[error("worker {index} released with {issues} teardown issue(s)")]
    UncleanRelease { index: u32, issues: usize },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl AppError {
    /// Clap renders its own help and version output; those are not failures.
    pub(crate) fn is_informational(&self) -> bool {
        matches!(
            self,
            Self::CliUsage(error) if !error.use_stderr()
        )
    }
}
