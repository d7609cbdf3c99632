//! Shared fixtures for the harness integration suites.

use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;
use tobira_harness::{
    BinaryCommandRunner, DatabaseAdmin, DatabaseError, DatabaseName, EnvironmentDeps,
    HarnessConfig, LifecycleReporter, SetupError, TeardownIssue, WorkerSlot,
};

/// Path of the stand-in backend built alongside these tests.
pub const STUB_BINARY: &str = env!("CARGO_BIN_EXE_tobira-stub");

/// Returns a port nothing listens on right now.
pub fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port")
        .port()
}

/// Scratch repository root plus a harness configuration pointing into it.
pub struct Sandbox {
    pub dir: TempDir,
    pub config: HarnessConfig,
}

impl Sandbox {
    /// Configuration whose worker `index` gets a currently free port.
    pub fn for_worker(index: u32) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        let offset = u16::try_from(index).expect("small index");
        let base_port = free_port()
            .checked_sub(offset)
            .expect("ephemeral port above index");
        let config = stub_config(root, base_port);
        Self { dir, config }
    }

    /// Same sandbox with a different backend binary.
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.config.tobira_binary = Utf8PathBuf::from(binary);
        self
    }
}

/// Harness configuration rooted at `root` that launches the stub backend.
pub fn stub_config(root: Utf8PathBuf, base_port: u16) -> HarnessConfig {
    HarnessConfig {
        base_port,
        root_path: root,
        tobira_binary: Utf8PathBuf::from(STUB_BINARY),
        startup_timeout_ms: 10_000,
        command_timeout_ms: 10_000,
        ..HarnessConfig::default()
    }
}

/// In-memory stand-in for the administrative PostgreSQL connection.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdmin {
    databases: Arc<Mutex<BTreeSet<String>>>,
    fail_create: bool,
}

impl MemoryAdmin {
    /// Admin whose `create database` always fails.
    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    /// Whether `name` currently exists.
    pub fn contains(&self, name: &str) -> bool {
        self.databases.lock().expect("admin mutex").contains(name)
    }
}

impl DatabaseAdmin for MemoryAdmin {
    fn drop_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
        self.databases
            .lock()
            .expect("admin mutex")
            .remove(name.as_str());
        Ok(())
    }

    fn create_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
        if self.fail_create {
            return Err(DatabaseError::Create {
                name: name.clone(),
                source: "permission denied to create database".into(),
            });
        }
        self.databases
            .lock()
            .expect("admin mutex")
            .insert(name.as_str().to_owned());
        Ok(())
    }
}

/// Lifecycle events captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    WorkspacePrepared(u32),
    DatabasePrepared(u32),
    BackendStarting(u32),
    BackendReady(u32),
    SetupFailed(String),
    TeardownIssue(String),
    Released { index: u32, clean: bool },
}

/// Records lifecycle events for assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("reporter mutex poisoned").clone()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .expect("reporter mutex poisoned")
            .push(event);
    }
}

impl LifecycleReporter for RecordingReporter {
    fn workspace_prepared(&self, slot: &WorkerSlot) {
        self.record(LifecycleEvent::WorkspacePrepared(slot.index()));
    }

    fn database_prepared(&self, slot: &WorkerSlot) {
        self.record(LifecycleEvent::DatabasePrepared(slot.index()));
    }

    fn backend_starting(&self, slot: &WorkerSlot) {
        self.record(LifecycleEvent::BackendStarting(slot.index()));
    }

    fn backend_ready(&self, slot: &WorkerSlot, _pid: u32, _elapsed: Duration) {
        self.record(LifecycleEvent::BackendReady(slot.index()));
    }

    fn setup_failed(&self, error: &SetupError) {
        self.record(LifecycleEvent::SetupFailed(error.to_string()));
    }

    fn teardown_issue(&self, issue: &TeardownIssue) {
        self.record(LifecycleEvent::TeardownIssue(issue.to_string()));
    }

    fn released(&self, slot: &WorkerSlot, clean: bool) {
        self.record(LifecycleEvent::Released {
            index: slot.index(),
            clean,
        });
    }
}

/// Collaborators backed by [`MemoryAdmin`] and the real command runner.
pub fn deps(
    config: &HarnessConfig,
    admin: &MemoryAdmin,
    reporter: &Arc<RecordingReporter>,
) -> EnvironmentDeps<MemoryAdmin, BinaryCommandRunner> {
    EnvironmentDeps {
        admin: admin.clone(),
        runner: BinaryCommandRunner::from_config(config),
        reporter: Arc::clone(reporter) as Arc<dyn LifecycleReporter>,
    }
}

/// Sends one line-protocol request to a stub backend and returns the reply.
pub fn query(port: u16, line: &str) -> String {
    tobira_harness_e2e::request(port, line).expect("backend reply")
}
