//! Database reset after each test case.

use std::cell::Cell;

use tracing::debug;

use super::fail_from_drop;
use crate::command::{AdminCommand, COMMAND_TARGET, CommandError, CommandRunner};
use crate::slot::WorkerSlot;

/// What [`ResetCoordinator::finish`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// `db reset` ran.
    Reset,
    /// The test opted out; nothing ran.
    Skipped,
}

/// Resets the worker database once the test case is over.
///
/// The reset is the default. A test that does not write anything may call
/// [`ResetCoordinator::suppress_reset`] to skip it.
#[derive(Debug)]
pub struct ResetCoordinator<'a, R: CommandRunner> {
    slot: &'a WorkerSlot,
    runner: &'a R,
    should_reset: Cell<bool>,
    finished: bool,
}

impl<'a, R: CommandRunner> ResetCoordinator<'a, R> {
    /// Starts the fixture for one test case.
    #[must_use]
    pub const fn begin(slot: &'a WorkerSlot, runner: &'a R) -> Self {
        Self {
            slot,
            runner,
            should_reset: Cell::new(true),
            finished: false,
        }
    }

    /// Skips the reset after this test case.
    pub fn suppress_reset(&self) {
        self.should_reset.set(false);
    }

    /// Long-form opt-out, kept so call sites state the reason.
    pub fn reset_not_necessary_i_do_not_modify_anything(&self) {
        self.suppress_reset();
    }

    /// Whether the reset will run.
    #[must_use]
    pub fn should_reset(&self) -> bool {
        self.should_reset.get()
    }

    /// Ends the test case, resetting the database unless suppressed.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when `db reset` fails.
    pub fn finish(mut self) -> Result<ResetOutcome, CommandError> {
        self.finished = true;
        self.complete()
    }

    fn complete(&self) -> Result<ResetOutcome, CommandError> {
        if !self.should_reset.get() {
            debug!(
                target: COMMAND_TARGET,
                worker = self.slot.index(),
                "reset suppressed by test"
            );
            return Ok(ResetOutcome::Skipped);
        }
        self.runner.run(self.slot, &AdminCommand::db_reset())?;
        Ok(ResetOutcome::Reset)
    }
}

impl<R: CommandRunner> Drop for ResetCoordinator<'_, R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(error) = self.complete() {
            fail_from_drop("database reset", &error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use mockall::predicate::eq;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::command::MockCommandRunner;
    use crate::slot::WorkerLayout;

    #[fixture]
    fn slot() -> WorkerSlot {
        WorkerLayout::new(3100, "tobira_ui_test_", "/tmp/_tobira", "/bin/tobira")
            .slot(0)
            .expect("slot")
    }

    fn failing() -> CommandError {
        CommandError::Timeout {
            command: "tobira db reset".to_owned(),
            timeout_ms: 1,
        }
    }

    #[rstest]
    fn resets_by_default(slot: WorkerSlot) {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq(slot.clone()), eq(AdminCommand::db_reset()))
            .times(1)
            .returning(|_, _| Ok(()));
        let coordinator = ResetCoordinator::begin(&slot, &runner);
        assert!(coordinator.should_reset());
        assert_eq!(coordinator.finish().expect("reset"), ResetOutcome::Reset);
    }

    #[rstest]
    fn suppressed_reset_never_runs(slot: WorkerSlot) {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(0);
        let coordinator = ResetCoordinator::begin(&slot, &runner);
        coordinator.reset_not_necessary_i_do_not_modify_anything();
        assert!(!coordinator.should_reset());
        assert_eq!(coordinator.finish().expect("skip"), ResetOutcome::Skipped);
    }

    #[rstest]
    fn dropping_the_guard_resets(slot: WorkerSlot) {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_, _| Ok(()));
        drop(ResetCoordinator::begin(&slot, &runner));
    }

    #[rstest]
    fn reset_runs_when_the_test_body_panics(slot: WorkerSlot) {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_, _| Err(failing()));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _coordinator = ResetCoordinator::begin(&slot, &runner);
            panic!("test body failed");
        }));
        assert!(outcome.is_err());
    }

    #[rstest]
    fn failing_reset_is_returned_from_finish(slot: WorkerSlot) {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_, _| Err(failing()));
        let error = ResetCoordinator::begin(&slot, &runner)
            .finish()
            .expect_err("reset must fail");
        assert!(matches!(error, CommandError::Timeout { .. }));
    }

    #[rstest]
    fn failing_reset_on_drop_fails_the_test(slot: WorkerSlot) {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_, _| Err(failing()));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            drop(ResetCoordinator::begin(&slot, &runner));
        }));
        assert!(outcome.is_err(), "drop must panic on a failed reset");
    }
}
