//! Per-test fixtures bound to an already running worker environment.
//!
//! Both fixtures are scope guards. Their teardown command runs when the
//! guard is finished explicitly or, failing that, when it is dropped. A drop
//! during unwinding only logs a failing teardown command; outside of a panic
//! the failure panics so the current test case fails instead of leaving the
//! next one with unknown state.

mod reset;
mod search_index;

use std::thread;

use tracing::warn;

use crate::command::{COMMAND_TARGET, CommandError};

pub use reset::{ResetCoordinator, ResetOutcome};
pub use search_index::SearchIndexActivator;

fn fail_from_drop(fixture: &str, error: &CommandError) {
    if thread::panicking() {
        warn!(
            target: COMMAND_TARGET,
            fixture,
            error = %error,
            "fixture teardown failed while unwinding"
        );
        return;
    }
    panic!("{fixture} teardown failed: {error}");
}
