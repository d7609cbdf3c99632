//! Per-worker isolation for Tobira UI tests.
//!
//! Each parallel test worker owns a [`WorkerEnvironment`]: a dedicated
//! backend process on its own port, its own database, its own search index
//! prefix and its own scratch directory, all derived from the worker index.
//! Per-test fixtures ([`ResetCoordinator`], [`SearchIndexActivator`]) run
//! administrative subcommands against that environment through a
//! [`CommandRunner`]. Acquired environments are also released when the
//! process receives a termination signal (see [`shutdown`]).
//!
//! ```rust,no_run
//! use tobira_harness::{HarnessConfig, WorkerEnvironment};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::default();
//! let environment = WorkerEnvironment::acquire(0, &config)?;
//! {
//!     let reset = environment.reset_coordinator();
//!     // ... drive the UI against environment.base_url() ...
//!     reset.finish()?;
//! }
//! let report = environment.release();
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod database;
pub mod environment;
pub mod errors;
pub mod fixtures;
pub mod process;
pub mod reporter;
pub mod shutdown;
pub mod slot;
pub mod synthesis;
pub mod telemetry;

pub use command::{AdminCommand, BinaryCommandRunner, CommandError, CommandRunner};
pub use database::{
    DatabaseAdmin, DatabaseError, DatabaseName, DatabaseNameError, DatabaseProvisioner,
    PostgresAdmin,
};
pub use environment::{EnvironmentDeps, WorkerEnvironment};
pub use errors::{SetupError, SetupResource, TeardownIssue, TeardownReport};
pub use fixtures::{ResetCoordinator, ResetOutcome, SearchIndexActivator};
pub use process::{ProcessSupervisor, RunningProcess, StopError, SupervisorError};
pub use reporter::{LifecycleReporter, StructuredReporter};
pub use shutdown::{ShutdownError, Subscription};
pub use slot::{SlotError, WorkerLayout, WorkerSlot, resolve_worker_index};
pub use synthesis::ConfigSynthesizer;
pub use tobira_harness_config::{HarnessConfig, TobiraConfig};
