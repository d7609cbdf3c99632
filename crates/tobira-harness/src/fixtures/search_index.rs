//! Search index built for the duration of one test case.

use super::fail_from_drop;
use crate::command::{AdminCommand, CommandError, CommandRunner};
use crate::slot::WorkerSlot;

/// Keeps the worker's search index populated until it is deactivated or
/// dropped, at which point `search-index clear` runs.
#[derive(Debug)]
pub struct SearchIndexActivator<'a, R: CommandRunner> {
    slot: &'a WorkerSlot,
    runner: &'a R,
    active: bool,
}

impl<'a, R: CommandRunner> SearchIndexActivator<'a, R> {
    /// Runs `search-index update` and returns the guard.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the update fails. No clear is issued in
    /// that case.
    pub fn activate(slot: &'a WorkerSlot, runner: &'a R) -> Result<Self, CommandError> {
        runner.run(slot, &AdminCommand::search_index_update())?;
        Ok(Self {
            slot,
            runner,
            active: true,
        })
    }

    /// Clears the search index.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when `search-index clear` fails.
    pub fn deactivate(mut self) -> Result<(), CommandError> {
        self.active = false;
        self.clear()
    }

    fn clear(&self) -> Result<(), CommandError> {
        self.runner
            .run(self.slot, &AdminCommand::search_index_clear())
    }
}

impl<R: CommandRunner> Drop for SearchIndexActivator<'_, R> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(error) = self.clear() {
            fail_from_drop("search index", &error);
        }
    }
}
