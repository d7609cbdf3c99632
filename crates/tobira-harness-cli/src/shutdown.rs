//! Holding a worker until the operator stops it.
//!
//! Signal handling itself lives in [`tobira_harness::shutdown`]: on a
//! termination signal it releases the held environment first and only then
//! wakes the command waiting here.

use tobira_harness::{ShutdownError, Subscription, shutdown};

/// Source of the operator's stop request.
pub(crate) trait ShutdownSignal {
    /// Listener returned by [`ShutdownSignal::listen`].
    type Listener: ShutdownListener;

    /// Starts listening. Called before anything is acquired.
    fn listen(&self) -> Result<Self::Listener, ShutdownError>;
}

/// An armed listener.
pub(crate) trait ShutdownListener {
    /// Signal already received, without blocking.
    fn pending(&self) -> Option<i32>;

    /// Blocks until a signal arrives.
    fn wait(&self) -> Result<i32, ShutdownError>;
}

/// Listens for `SIGTERM`, `SIGINT`, `SIGQUIT` and `SIGHUP`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    type Listener = Subscription;

    fn listen(&self) -> Result<Subscription, ShutdownError> {
        shutdown::subscribe()
    }
}

impl ShutdownListener for Subscription {
    fn pending(&self) -> Option<i32> {
        Self::pending(self)
    }

    fn wait(&self) -> Result<i32, ShutdownError> {
        Self::wait(self)
    }
}
