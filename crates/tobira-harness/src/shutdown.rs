//! Releasing worker environments on termination signals.
//!
//! `Drop` does not run when a test binary is interrupted, so every acquired
//! environment registers itself here. The first acquisition starts a
//! listener thread for `SIGTERM`, `SIGINT`, `SIGQUIT` and `SIGHUP`. When one
//! arrives, each registered environment is torn down. The signal is then
//! passed on to every live [`Subscription`]; without one, the process ends
//! the way the signal would have ended it.

use std::collections::BTreeMap;
use std::io;
use std::process;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

use once_cell::sync::OnceCell;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use signal_hook::low_level;
use thiserror::Error;
use tracing::{debug, info, warn};

const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");

/// Signals that release every registered environment.
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

static LISTENER: OnceCell<()> = OnceCell::new();
static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    next_id: 0,
    environments: BTreeMap::new(),
    subscribers: Vec::new(),
});

/// Something the signal listener can tear down from its own thread.
pub(crate) trait Releasable: Send + Sync {
    fn release_on_signal(&self);
}

struct Registry {
    next_id: u64,
    environments: BTreeMap<u64, Weak<dyn Releasable>>,
    subscribers: Vec<Sender<i32>>,
}

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors reported while listening for termination signals.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing the signal handlers or their listener thread failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The listener went away before delivering a signal.
    #[error("signal listener stopped before a termination signal arrived")]
    Disconnected,
}

/// Starts the signal listener unless it is already running.
///
/// # Errors
///
/// Returns [`ShutdownError::Install`] when the handlers cannot be
/// registered. A later call tries again.
pub fn install() -> Result<(), ShutdownError> {
    LISTENER.get_or_try_init(listen).map(|&()| ())
}

fn listen() -> Result<(), ShutdownError> {
    let mut signals =
        Signals::new(TERMINATION_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
    thread::Builder::new()
        .name("tobira-harness-signals".to_owned())
        .spawn(move || {
            for signal in signals.forever() {
                if !dispatch(signal) {
                    terminate(signal);
                }
            }
        })
        .map(drop)
        .map_err(|source| ShutdownError::Install { source })
}

/// Releases every registered environment, then hands `signal` to the
/// subscribers. Returns whether any subscriber took it.
fn dispatch(signal: i32) -> bool {
    let environments = std::mem::take(&mut registry().environments);
    info!(
        target: SHUTDOWN_TARGET,
        signal,
        environments = environments.len(),
        "termination signal received, releasing worker environments"
    );
    for environment in environments.into_values().filter_map(|weak| weak.upgrade()) {
        environment.release_on_signal();
    }
    let mut guard = registry();
    guard
        .subscribers
        .retain(|subscriber| subscriber.send(signal).is_ok());
    !guard.subscribers.is_empty()
}

fn terminate(signal: i32) -> ! {
    debug!(target: SHUTDOWN_TARGET, signal, "no subscriber, terminating");
    if let Err(error) = low_level::emulate_default_handler(signal) {
        warn!(target: SHUTDOWN_TARGET, signal, %error, "failed to restore default disposition");
    }
    // Reached when the default disposition does not end the process.
    process::exit(128_i32.saturating_add(signal))
}

/// Keeps an environment known to the signal listener until dropped.
#[derive(Debug)]
pub(crate) struct Registration {
    id: u64,
}

pub(crate) fn register(environment: Weak<dyn Releasable>) -> Registration {
    let mut guard = registry();
    let id = guard.next_id;
    guard.next_id = id.wrapping_add(1);
    guard.environments.insert(id, environment);
    Registration { id }
}

impl Drop for Registration {
    fn drop(&mut self) {
        registry().environments.remove(&self.id);
    }
}

/// Delivery of termination signals to a caller that outlives them.
///
/// While at least one subscription is alive, a signal releases the
/// registered environments and is then delivered here instead of ending the
/// process.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<i32>,
}

/// Starts the listener and subscribes to termination signals.
///
/// Subscribe before acquiring an environment so that no signal arriving
/// during setup falls through to the default disposition.
///
/// # Errors
///
/// Returns [`ShutdownError::Install`] when the listener cannot be started.
pub fn subscribe() -> Result<Subscription, ShutdownError> {
    install()?;
    Ok(add_subscriber())
}

fn add_subscriber() -> Subscription {
    let (sender, receiver) = mpsc::channel();
    registry().subscribers.push(sender);
    Subscription { receiver }
}

impl Subscription {
    /// Blocks until a termination signal was handled and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Disconnected`] if the listener is gone.
    pub fn wait(&self) -> Result<i32, ShutdownError> {
        self.receiver
            .recv()
            .map_err(|_| ShutdownError::Disconnected)
    }

    /// Signal handled since subscribing, if any, without blocking.
    #[must_use]
    pub fn pending(&self) -> Option<i32> {
        self.receiver.try_recv().ok()
    }
}
