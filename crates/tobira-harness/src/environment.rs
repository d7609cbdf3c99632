//! One isolated backend environment per test worker.
//!
//! [`WorkerEnvironment::acquire`] composes the other components in a fixed
//! order: create the worker directory, write the configuration document,
//! recreate the database, then start the backend and wait for its port. When
//! it returns, the backend is reachable at [`WorkerEnvironment::base_url`].
//!
//! Release runs the steps in reverse. It happens either through
//! [`WorkerEnvironment::release`] or, on every other exit path including
//! panics and failed acquisition, through `Drop`. A termination signal
//! releases the environment from the [`crate::shutdown`] listener instead.
//! Teardown problems are logged and collected in a [`TeardownReport`] but
//! never escalated.

use std::fmt;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tobira_harness_config::HarnessConfig;
use tracing::warn;

use crate::command::{AdminCommand, BinaryCommandRunner, CommandError, CommandRunner};
use crate::database::{DatabaseAdmin, DatabaseProvisioner, PostgresAdmin};
use crate::errors::{SetupError, TeardownIssue, TeardownReport};
use crate::fixtures::{ResetCoordinator, SearchIndexActivator};
use crate::process::{ProcessSupervisor, RunningProcess};
use crate::reporter::{LifecycleReporter, StructuredReporter};
use crate::shutdown::{self, Registration, Releasable};
use crate::slot::{WorkerLayout, WorkerSlot};
use crate::synthesis::ConfigSynthesizer;

const ENVIRONMENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::environment");

/// Collaborators injected into [`WorkerEnvironment::acquire_with`].
pub struct EnvironmentDeps<D, R> {
    /// Administrative database access.
    pub admin: D,
    /// Runner for administrative subcommands.
    pub runner: R,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn LifecycleReporter>,
}

impl EnvironmentDeps<PostgresAdmin, BinaryCommandRunner> {
    /// Production collaborators derived from `config`.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            admin: PostgresAdmin::new(config.admin_database_url()),
            runner: BinaryCommandRunner::from_config(config),
            reporter: Arc::new(StructuredReporter::new()),
        }
    }
}

/// A worker's directory, configuration, database and running backend.
pub struct WorkerEnvironment<D = PostgresAdmin, R = BinaryCommandRunner>
where
    D: DatabaseAdmin + 'static,
    R: CommandRunner,
{
    slot: WorkerSlot,
    runner: R,
    resources: Arc<Mutex<Resources<D>>>,
    registration: Registration,
}

/// Everything teardown needs, shared with the signal listener.
struct Resources<D> {
    slot: WorkerSlot,
    provisioner: DatabaseProvisioner<D>,
    supervisor: ProcessSupervisor,
    reporter: Arc<dyn LifecycleReporter>,
    process: Option<RunningProcess>,
    workdir_ready: bool,
    database_ready: bool,
    released: bool,
}

impl WorkerEnvironment {
    /// Acquires the environment of worker `index` against PostgreSQL and the
    /// configured backend binary.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] naming the worker and the failed resource.
    /// Steps that already completed are reversed before returning.
    pub fn acquire(index: u32, config: &HarnessConfig) -> Result<Self, SetupError> {
        Self::acquire_with(index, config, EnvironmentDeps::from_config(config))
    }
}

impl<D, R> WorkerEnvironment<D, R>
where
    D: DatabaseAdmin + 'static,
    R: CommandRunner,
{
    /// Acquires the environment of worker `index` with injected
    /// collaborators.
    ///
    /// The environment is registered with the signal listener before any
    /// resource exists, so a termination signal during setup still reverses
    /// the steps that completed.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] naming the worker and the failed resource.
    /// Steps that already completed are reversed before returning.
    pub fn acquire_with(
        index: u32,
        config: &HarnessConfig,
        deps: EnvironmentDeps<D, R>,
    ) -> Result<Self, SetupError> {
        let slot = match WorkerLayout::from_config(config).slot(index) {
            Ok(slot) => slot,
            Err(source) => {
                let error = SetupError::Slot { index, source };
                deps.reporter.setup_failed(&error);
                return Err(error);
            }
        };
        if let Err(error) = shutdown::install() {
            warn!(
                target: ENVIRONMENT_TARGET,
                worker = index,
                %error,
                "termination signals will not release this environment"
            );
        }
        let resources = Arc::new(Mutex::new(Resources {
            slot: slot.clone(),
            provisioner: DatabaseProvisioner::new(deps.admin),
            supervisor: ProcessSupervisor::from_config(config),
            reporter: deps.reporter,
            process: None,
            workdir_ready: false,
            database_ready: false,
            released: false,
        }));
        let weak_resources = Arc::downgrade(&resources);
        let listener_handle: Weak<dyn Releasable> = weak_resources;
        let environment = Self {
            slot,
            runner: deps.runner,
            registration: shutdown::register(listener_handle),
            resources,
        };
        let synthesizer = ConfigSynthesizer::new(config);
        match environment.setup(&synthesizer) {
            Ok(()) => Ok(environment),
            Err(error) => {
                environment.lock().reporter.setup_failed(&error);
                // Dropping reverses whatever was completed.
                drop(environment);
                Err(error)
            }
        }
    }

    fn setup(&self, synthesizer: &ConfigSynthesizer) -> Result<(), SetupError> {
        self.step(|resources| resources.prepare_workspace(synthesizer))?;
        self.step(Resources::prepare_database)?;
        self.step(Resources::start_backend)
    }

    /// Runs one setup step unless a signal already released the resources.
    fn step(
        &self,
        action: impl FnOnce(&mut Resources<D>) -> Result<(), SetupError>,
    ) -> Result<(), SetupError> {
        let mut resources = self.lock();
        if resources.released {
            return Err(SetupError::Interrupted {
                index: self.slot.index(),
            });
        }
        action(&mut resources)
    }

    fn lock(&self) -> MutexGuard<'_, Resources<D>> {
        lock_resources(&self.resources)
    }

    /// Resources owned by this worker.
    #[must_use]
    pub const fn slot(&self) -> &WorkerSlot {
        &self.slot
    }

    /// Base URL of the worker's backend.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.slot.base_url()
    }

    /// Process identifier of the running backend.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().process.as_ref().map(RunningProcess::pid)
    }

    /// Whether the environment was released, by [`Self::release`] or by a
    /// termination signal.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    /// Runner shared by every fixture of this environment.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs an administrative subcommand against this worker's
    /// configuration and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the command cannot be run or exits
    /// unsuccessfully.
    pub fn run_command(&self, command: &AdminCommand) -> Result<(), CommandError> {
        self.runner.run(&self.slot, command)
    }

    /// Starts the per-test reset fixture.
    #[must_use]
    pub fn reset_coordinator(&self) -> ResetCoordinator<'_, R> {
        ResetCoordinator::begin(&self.slot, &self.runner)
    }

    /// Builds the search index for the duration of one test.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when `search-index update` fails.
    pub fn activate_search_index(&self) -> Result<SearchIndexActivator<'_, R>, CommandError> {
        SearchIndexActivator::activate(&self.slot, &self.runner)
    }

    /// Stops the backend, drops the database and removes the worker
    /// directory.
    ///
    /// The report is empty when a termination signal already released the
    /// environment; its issues were logged at that point.
    #[must_use = "teardown issues are only visible in the report"]
    pub fn release(self) -> TeardownReport {
        self.lock().teardown()
    }
}

fn lock_resources<D>(resources: &Mutex<Resources<D>>) -> MutexGuard<'_, Resources<D>> {
    resources.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: DatabaseAdmin> Resources<D> {
    fn prepare_workspace(&mut self, synthesizer: &ConfigSynthesizer) -> Result<(), SetupError> {
        let index = self.slot.index();
        let work_dir = self.slot.work_dir();
        fs::create_dir_all(work_dir).map_err(|source| SetupError::Directory {
            index,
            path: work_dir.to_path_buf(),
            source,
        })?;
        self.workdir_ready = true;

        let document = synthesizer
            .render(&self.slot)
            .map_err(|source| SetupError::RenderConfig { index, source })?;
        let config_path = self.slot.config_path();
        fs::write(config_path, document).map_err(|source| SetupError::WriteConfig {
            index,
            path: config_path.to_path_buf(),
            source,
        })?;
        self.reporter.workspace_prepared(&self.slot);
        Ok(())
    }

    fn prepare_database(&mut self) -> Result<(), SetupError> {
        let index = self.slot.index();
        self.provisioner
            .prepare(self.slot.db_name())
            .map_err(|source| SetupError::Database { index, source })?;
        self.database_ready = true;
        self.reporter.database_prepared(&self.slot);
        Ok(())
    }

    fn start_backend(&mut self) -> Result<(), SetupError> {
        let index = self.slot.index();
        self.reporter.backend_starting(&self.slot);
        let process = self
            .supervisor
            .start(&self.slot)
            .map_err(|source| SetupError::Process { index, source })?;
        self.reporter
            .backend_ready(&self.slot, process.pid(), process.started_at().elapsed());
        self.process = Some(process);
        Ok(())
    }

    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.released {
            return report;
        }
        self.released = true;
        let index = self.slot.index();

        if let Some(process) = self.process.take() {
            if let Err(source) = self.supervisor.stop(process) {
                self.record(&mut report, TeardownIssue::Process { index, source });
            }
        }

        if self.database_ready {
            self.database_ready = false;
            let database = self.slot.db_name().clone();
            if let Err(source) = self.provisioner.teardown(&database) {
                self.record(
                    &mut report,
                    TeardownIssue::Database {
                        index,
                        database,
                        source,
                    },
                );
            }
        }

        if self.workdir_ready {
            self.workdir_ready = false;
            let work_dir = self.slot.work_dir();
            match fs::remove_dir_all(work_dir) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    let path = work_dir.to_path_buf();
                    self.record(&mut report, TeardownIssue::Directory { index, path, source });
                }
            }
        }

        self.reporter.released(&self.slot, report.is_clean());
        report
    }

    fn record(&self, report: &mut TeardownReport, issue: TeardownIssue) {
        self.reporter.teardown_issue(&issue);
        report.push(issue);
    }
}

impl<D: DatabaseAdmin> Releasable for Mutex<Resources<D>> {
    fn release_on_signal(&self) {
        drop(lock_resources(self).teardown());
    }
}

impl<D, R> Drop for WorkerEnvironment<D, R>
where
    D: DatabaseAdmin + 'static,
    R: CommandRunner,
{
    fn drop(&mut self) {
        drop(self.lock().teardown());
    }
}

impl<D, R> fmt::Debug for WorkerEnvironment<D, R>
where
    D: DatabaseAdmin + 'static,
    R: CommandRunner,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources = self.lock();
        f.debug_struct("WorkerEnvironment")
            .field("slot", &self.slot)
            .field("pid", &resources.process.as_ref().map(RunningProcess::pid))
            .field("released", &resources.released)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}
