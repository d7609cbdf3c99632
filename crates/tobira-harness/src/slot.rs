//! Deterministic per-worker resource allocation.
//!
//! Every resource a worker owns is derived from its index and a handful of
//! fixed base values, so two workers with different indices can never collide
//! on a port, a database name, or a working directory. Nothing is negotiated
//! at runtime.

use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tobira_harness_config::HarnessConfig;

use crate::database::{DatabaseName, DatabaseNameError};

/// Environment variable naming the worker index explicitly.
pub const WORKER_INDEX_ENV_VAR: &str = "TOBIRA_HARNESS_WORKER_INDEX";

/// Slot variable exported by `cargo nextest` for each running test.
pub const NEXTEST_SLOT_ENV_VAR: &str = "NEXTEST_TEST_GLOBAL_SLOT";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Fixed base values from which every [`WorkerSlot`] is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLayout {
    base_port: u16,
    database_prefix: String,
    workers_dir: Utf8PathBuf,
    binary_path: Utf8PathBuf,
}

impl WorkerLayout {
    /// Builds a layout from explicit base values.
    #[must_use]
    pub fn new(
        base_port: u16,
        database_prefix: impl Into<String>,
        workers_dir: impl Into<Utf8PathBuf>,
        binary_path: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            base_port,
            database_prefix: database_prefix.into(),
            workers_dir: workers_dir.into(),
            binary_path: binary_path.into(),
        }
    }

    /// Derives the layout from the harness configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.base_port(),
            config.database_prefix(),
            config.workers_dir(),
            config.resolved_binary(),
        )
    }

    /// Computes the slot owned by worker `index`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::PortOverflow`] when `base_port + index` does not
    /// fit a TCP port and [`SlotError::DatabaseName`] when the prefix does not
    /// yield a valid database identifier.
    pub fn slot(&self, index: u32) -> Result<WorkerSlot, SlotError> {
        let port = u16::try_from(index)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or(SlotError::PortOverflow {
                base_port: self.base_port,
                index,
            })?;
        let db_name = DatabaseName::new(format!("{}{index}", self.database_prefix))?;
        let work_dir = self.workers_dir.join(format!("process{index}"));
        let config_path = work_dir.join(CONFIG_FILE_NAME);
        Ok(WorkerSlot {
            index,
            port,
            work_dir,
            config_path,
            binary_path: self.binary_path.clone(),
            db_name,
        })
    }
}

/// Resources owned by one worker for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSlot {
    index: u32,
    port: u16,
    work_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
    binary_path: Utf8PathBuf,
    db_name: DatabaseName,
}

impl WorkerSlot {
    /// Worker index assigned by the test runner.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// HTTP port of the worker's backend.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Scratch directory removed on release.
    #[must_use]
    pub fn work_dir(&self) -> &Utf8Path {
        &self.work_dir
    }

    /// Location of the synthesised configuration document.
    #[must_use]
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Backend binary used for `serve` and administrative commands.
    #[must_use]
    pub fn binary_path(&self) -> &Utf8Path {
        &self.binary_path
    }

    /// Dedicated database of this worker.
    #[must_use]
    pub const fn db_name(&self) -> &DatabaseName {
        &self.db_name
    }

    /// Search index namespace of this worker. It shares the database name so
    /// both namespaces stay disjoint across workers.
    #[must_use]
    pub fn index_prefix(&self) -> &str {
        self.db_name.as_str()
    }

    /// Externally reachable base URL of the worker's backend.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// Picks the worker index: an explicit value wins, then
/// [`WORKER_INDEX_ENV_VAR`], then [`NEXTEST_SLOT_ENV_VAR`], then `0`.
///
/// # Errors
///
/// Returns [`SlotError::InvalidIndex`] when a consulted variable does not hold
/// a non-negative integer.
pub fn resolve_worker_index(explicit: Option<u32>) -> Result<u32, SlotError> {
    if let Some(index) = explicit {
        return Ok(index);
    }
    for variable in [WORKER_INDEX_ENV_VAR, NEXTEST_SLOT_ENV_VAR] {
        if let Some(value) = env::var_os(variable) {
            let text = value.to_string_lossy();
            return text
                .trim()
                .parse::<u32>()
                .map_err(|_| SlotError::InvalidIndex {
                    variable,
                    value: text.into_owned(),
                });
        }
    }
    Ok(0)
}

/// Errors raised while deriving a worker slot.
#[derive(Debug, Error)]
pub enum SlotError {
    /// `base_port + index` is not a valid TCP port.
    #[error("port range exhausted: base port {base_port} cannot host worker {index}")]
    PortOverflow {
        /// Configured base port.
        base_port: u16,
        /// Requested worker index.
        index: u32,
    },
    /// The database prefix yields an invalid identifier.
    #[error(transparent)]
    DatabaseName(#[from] DatabaseNameError),
    /// An index variable held something other than an integer.
    #[error("{variable} must hold a worker index, got '{value}'")]
    InvalidIndex {
        /// Variable that was consulted.
        variable: &'static str,
        /// Raw value.
        value: String,
    },
}
