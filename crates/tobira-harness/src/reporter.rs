//! Structured reporting for worker environment lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{SetupError, TeardownIssue};
use crate::process::millis;
use crate::slot::WorkerSlot;

pub(crate) const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked once the worker directory and configuration exist.
    fn workspace_prepared(&self, slot: &WorkerSlot);

    /// Invoked after the worker database was recreated.
    fn database_prepared(&self, slot: &WorkerSlot);

    /// Invoked before the backend is spawned.
    fn backend_starting(&self, slot: &WorkerSlot);

    /// Invoked once the backend's port accepts connections.
    fn backend_ready(&self, slot: &WorkerSlot, pid: u32, elapsed: Duration);

    /// Invoked when acquisition fails.
    fn setup_failed(&self, error: &SetupError);

    /// Invoked for every teardown step that did not complete cleanly.
    fn teardown_issue(&self, issue: &TeardownIssue);

    /// Invoked after every teardown step ran.
    fn released(&self, slot: &WorkerSlot, clean: bool);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter + ?Sized,
{
    fn workspace_prepared(&self, slot: &WorkerSlot) {
        (**self).workspace_prepared(slot);
    }

    fn database_prepared(&self, slot: &WorkerSlot) {
        (**self).database_prepared(slot);
    }

    fn backend_starting(&self, slot: &WorkerSlot) {
        (**self).backend_starting(slot);
    }

    fn backend_ready(&self, slot: &WorkerSlot, pid: u32, elapsed: Duration) {
        (**self).backend_ready(slot, pid, elapsed);
    }

    fn setup_failed(&self, error: &SetupError) {
        (**self).setup_failed(error);
    }

    fn teardown_issue(&self, issue: &TeardownIssue) {
        (**self).teardown_issue(issue);
    }

    fn released(&self, slot: &WorkerSlot, clean: bool) {
        (**self).released(slot, clean);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredReporter;

impl StructuredReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredReporter {
    fn workspace_prepared(&self, slot: &WorkerSlot) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "workspace_prepared",
            worker = slot.index(),
            work_dir = %slot.work_dir(),
            config = %slot.config_path(),
            "worker directory prepared"
        );
    }

    fn database_prepared(&self, slot: &WorkerSlot) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "database_prepared",
            worker = slot.index(),
            database = %slot.db_name(),
            "worker database prepared"
        );
    }

    fn backend_starting(&self, slot: &WorkerSlot) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "backend_starting",
            worker = slot.index(),
            port = slot.port(),
            binary = %slot.binary_path(),
            "starting backend"
        );
    }

    fn backend_ready(&self, slot: &WorkerSlot, pid: u32, elapsed: Duration) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "backend_ready",
            worker = slot.index(),
            pid,
            base_url = %slot.base_url(),
            elapsed_ms = millis(elapsed),
            "backend ready"
        );
    }

    fn setup_failed(&self, error: &SetupError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "setup_failed",
            worker = error.index(),
            resource = %error.resource(),
            error = %error,
            "worker setup failed"
        );
    }

    fn teardown_issue(&self, issue: &TeardownIssue) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "teardown_issue",
            error = %issue,
            "teardown step did not complete cleanly"
        );
    }

    fn released(&self, slot: &WorkerSlot, clean: bool) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "released",
            worker = slot.index(),
            clean,
            "worker environment released"
        );
    }
}
