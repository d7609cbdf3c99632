//! Harness log output.
//!
//! Test binaries and the operator CLI share one global subscriber writing to
//! stderr. Whoever initialises first wins; later calls report the format
//! that is actually in effect.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use tobira_harness_config::{HarnessConfig, LogFormat};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Format chosen by the first successful [`initialise`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Concrete format of the installed subscriber; never `auto`.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter directives do not parse.
    #[error("invalid log filter '{directives}': {reason}")]
    Filter {
        /// Directives as configured.
        directives: String,
        /// Parser message.
        reason: String,
    },
    /// Another global subscriber was installed outside the harness.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on the first call.
///
/// `auto` resolves against stderr: compact lines on a terminal, JSON
/// otherwise.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for unparsable directives and
/// [`TelemetryError::Subscriber`] when a foreign subscriber is already
/// installed. A failed call leaves nothing installed, so a later call may
/// try again.
pub fn initialise(config: &HarnessConfig) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            let format = config.log_format().resolve(io::stderr().is_terminal());
            install(parse_filter(config.log_filter())?, format)?;
            Ok(format)
        })
        .map(|&format| TelemetryHandle { format })
}

fn parse_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives).map_err(|error| TelemetryError::Filter {
        directives: directives.to_owned(),
        reason: error.to_string(),
    })
}

fn install(filter: EnvFilter, format: LogFormat) -> Result<(), TelemetryError> {
    let ansi = io::stderr().is_terminal();
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact | LogFormat::Auto => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn invalid_filters_name_the_directives() {
        let error = parse_filter("tobira_harness=loudest").expect_err("filter must be rejected");
        let TelemetryError::Filter { directives, .. } = &error else {
            panic!("unexpected error: {error}");
        };
        assert_eq!(directives, "tobira_harness=loudest");
        assert!(error.to_string().starts_with("invalid log filter"), "{error}");
    }

    #[rstest]
    #[case::targets("tobira_harness::process=debug,warn")]
    #[case::off("off")]
    fn documented_filters_parse(#[case] directives: &str) {
        assert!(parse_filter(directives).is_ok());
    }
}
