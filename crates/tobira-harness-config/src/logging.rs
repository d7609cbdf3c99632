//! Output format of the harness's own log lines.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How harness log lines are rendered on stderr.
///
/// `auto` lets the telemetry layer decide once it knows whether stderr is a
/// terminal: developers running tests locally get compact lines, CI log
/// collectors get JSON.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Compact on a terminal, JSON otherwise.
    #[default]
    Auto,
    /// One JSON object per event.
    Json,
    /// Human-readable single line output.
    Compact,
}

impl LogFormat {
    /// Concrete format for a stream that is (or is not) a terminal.
    ///
    /// Explicit choices are returned unchanged.
    #[must_use]
    pub const fn resolve(self, terminal: bool) -> Self {
        match self {
            Self::Auto if terminal => Self::Compact,
            Self::Auto => Self::Json,
            explicit => explicit,
        }
    }
}

/// Error returned when a log format name is not recognised.
pub type LogFormatParseError = strum::ParseError;
