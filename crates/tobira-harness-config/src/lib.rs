//! Configuration shared by the Tobira UI test harness and its operator CLI.
//!
//! [`HarnessConfig`] describes how per-worker environments are laid out: the
//! first port handed out, the database naming scheme, the administrative
//! PostgreSQL connection, and where the backend binary and scratch directories
//! live. Values are layered by `ortho_config` in the usual order: built-in
//! defaults, then a configuration file (`--config-path` or
//! `TOBIRA_HARNESS_CONFIG_PATH`), then `TOBIRA_HARNESS_*` environment
//! variables, then command-line flags.
//!
//! The [`document`] module holds the typed configuration document written for
//! every backend instance.

mod defaults;
pub mod document;
mod logging;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_ADMIN_DATABASE_URL, DEFAULT_BASE_PORT, DEFAULT_COMMAND_TIMEOUT_MS,
    DEFAULT_DATABASE_PASSWORD, DEFAULT_DATABASE_PREFIX, DEFAULT_DATABASE_USER, DEFAULT_LOG_FILTER,
    DEFAULT_OUTPUT_DIR, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STARTUP_TIMEOUT_MS,
    DEFAULT_TOBIRA_BINARY, default_admin_database_url, default_auth_mode, default_base_port,
    default_command_timeout_ms, default_database_password, default_database_prefix,
    default_database_user, default_log_filter, default_log_filter_string, default_log_format,
    default_output_dir, default_poll_interval_ms, default_root_path, default_startup_timeout_ms,
    default_tobira_binary,
};
pub use document::{AuthMode, DocumentError, TobiraConfig};
pub use logging::{LogFormat, LogFormatParseError};

/// Layered configuration for the test harness.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TOBIRA_HARNESS")]
pub struct HarnessConfig {
    /// Port of worker `0`; worker `i` listens on `base_port + i`.
    #[ortho_config(default = DEFAULT_BASE_PORT)]
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Stem of worker database names and search index prefixes.
    #[ortho_config(default = default_database_prefix())]
    #[serde(default = "default_database_prefix")]
    pub database_prefix: String,
    /// Connection string used for `drop database` / `create database`.
    #[ortho_config(default = default_admin_database_url())]
    #[serde(default = "default_admin_database_url")]
    pub admin_database_url: String,
    /// Role embedded in worker configuration documents.
    #[ortho_config(default = default_database_user())]
    #[serde(default = "default_database_user")]
    pub database_user: String,
    /// Password embedded in worker configuration documents.
    #[ortho_config(default = default_database_password())]
    #[serde(default = "default_database_password")]
    pub database_password: String,
    /// Backend binary; relative paths resolve against `root_path`.
    #[ortho_config(default = default_tobira_binary())]
    #[serde(default = "default_tobira_binary")]
    pub tobira_binary: Utf8PathBuf,
    /// Repository root. Theme assets are looked up beneath it.
    #[ortho_config(default = default_root_path())]
    #[serde(default = "default_root_path")]
    pub root_path: Utf8PathBuf,
    /// Directory for worker scratch space; relative paths resolve against
    /// `root_path`.
    #[ortho_config(default = default_output_dir())]
    #[serde(default = "default_output_dir")]
    pub output_dir: Utf8PathBuf,
    /// Bound on the port reachability poll, in milliseconds.
    #[ortho_config(default = DEFAULT_STARTUP_TIMEOUT_MS)]
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Interval between port reachability checks, in milliseconds.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_MS)]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on a single administrative subcommand, in milliseconds.
    #[ortho_config(default = DEFAULT_COMMAND_TIMEOUT_MS)]
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Authentication mode written into worker configurations.
    #[ortho_config(default = default_auth_mode())]
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    /// `tracing` filter expression for the harness.
    #[ortho_config(default = default_log_filter_string())]
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for harness logs.
    #[ortho_config(default = default_log_format())]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            database_prefix: default_database_prefix(),
            admin_database_url: default_admin_database_url(),
            database_user: default_database_user(),
            database_password: default_database_password(),
            tobira_binary: default_tobira_binary(),
            root_path: default_root_path(),
            output_dir: default_output_dir(),
            startup_timeout_ms: default_startup_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            auth_mode: default_auth_mode(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl HarnessConfig {
    /// Port handed to worker `0`.
    #[must_use]
    pub const fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Stem of worker database names.
    #[must_use]
    pub fn database_prefix(&self) -> &str {
        &self.database_prefix
    }

    /// Administrative connection string.
    #[must_use]
    pub fn admin_database_url(&self) -> &str {
        &self.admin_database_url
    }

    /// Repository root.
    #[must_use]
    pub fn root_path(&self) -> &Utf8Path {
        &self.root_path
    }

    /// Backend binary with relative paths anchored at the repository root.
    #[must_use]
    pub fn resolved_binary(&self) -> Utf8PathBuf {
        anchor(&self.root_path, &self.tobira_binary)
    }

    /// Directory that receives one `process{index}` folder per worker.
    #[must_use]
    pub fn workers_dir(&self) -> Utf8PathBuf {
        anchor(&self.root_path, &self.output_dir).join("_tobira")
    }

    /// Bound on the port reachability poll.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Interval between port reachability checks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bound on a single administrative subcommand.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Authentication mode written into worker configurations.
    #[must_use]
    pub const fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn anchor(root: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
