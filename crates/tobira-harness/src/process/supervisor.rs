//! Spawns backends and waits for their ports.

use std::fs::File;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tobira_harness_config::HarnessConfig;
use tracing::{debug, info, warn};

use super::errors::{StopError, SupervisorError};
use super::reachability::port_is_reachable;
use super::{DEFAULT_STOP_GRACE, PROCESS_TARGET, SERVE_LOG_FILE};
use crate::slot::WorkerSlot;

const CONNECT_HOST: &str = "localhost";
const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A backend spawned by [`ProcessSupervisor::start`].
///
/// The handle owns the child process. Dropping it without calling
/// [`ProcessSupervisor::stop`] kills the child outright so no backend
/// outlives its environment.
#[derive(Debug)]
pub struct RunningProcess {
    child: Option<Child>,
    pid: u32,
    slot: WorkerSlot,
    started_at: Instant,
}

impl RunningProcess {
    /// OS process identifier.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Slot the backend was launched from.
    #[must_use]
    pub const fn slot(&self) -> &WorkerSlot {
        &self.slot
    }

    /// Instant the process was spawned.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if matches!(child.try_wait(), Ok(None)) {
            warn!(
                target: PROCESS_TARGET,
                pid = self.pid,
                worker = self.slot.index(),
                "killing backend that was never stopped"
            );
            drop(child.kill());
        }
        drop(child.wait());
    }
}

/// Starts backends with `serve --config` and stops them again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSupervisor {
    startup_timeout: Duration,
    poll_interval: Duration,
    stop_grace: Duration,
}

impl ProcessSupervisor {
    /// Builds a supervisor with explicit timings.
    #[must_use]
    pub const fn new(startup_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            startup_timeout,
            poll_interval,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Builds a supervisor using the configured startup timeout and poll
    /// interval.
    #[must_use]
    pub const fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.startup_timeout(), config.poll_interval())
    }

    /// Overrides the time granted between `SIGTERM` and `SIGKILL`.
    #[must_use]
    pub const fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    /// Spawns `{binary} serve --config {config}` and waits until the slot's
    /// port accepts connections.
    ///
    /// The backend's stdout and stderr are appended to a log file inside the
    /// worker directory, which must already exist.
    ///
    /// The port must be free before the child is spawned: a listener that
    /// is already there would otherwise be mistaken for the new backend.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::PortInUse`] without spawning when the port
    /// already accepts connections, [`SupervisorError::Exited`] as soon as
    /// the child dies, [`SupervisorError::Timeout`] when the port stays
    /// closed for the whole startup budget, and spawn or connection failures
    /// otherwise. The child is killed before any error is returned.
    pub fn start(&self, slot: &WorkerSlot) -> Result<RunningProcess, SupervisorError> {
        let port = slot.port();
        if reachable(port)? {
            warn!(target: PROCESS_TARGET, port, worker = slot.index(), "port already taken");
            return Err(SupervisorError::PortInUse { port });
        }

        let log_path = slot.work_dir().join(SERVE_LOG_FILE);
        let log = File::create(&log_path).map_err(|source| SupervisorError::Log {
            path: log_path.clone(),
            source,
        })?;
        let log_for_stderr = log.try_clone().map_err(|source| SupervisorError::Log {
            path: log_path.clone(),
            source,
        })?;

        debug!(
            target: PROCESS_TARGET,
            binary = %slot.binary_path(),
            config = %slot.config_path(),
            port = slot.port(),
            "spawning backend"
        );
        let child = Command::new(slot.binary_path())
            .arg("serve")
            .arg("--config")
            .arg(slot.config_path())
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_for_stderr)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                binary: slot.binary_path().to_path_buf(),
                source,
            })?;

        let mut process = RunningProcess {
            pid: child.id(),
            child: Some(child),
            slot: slot.clone(),
            started_at: Instant::now(),
        };
        // On error `process` is dropped, which kills the child.
        self.wait_for_port(&mut process)?;
        info!(
            target: PROCESS_TARGET,
            pid = process.pid,
            port = slot.port(),
            elapsed_ms = millis(process.started_at.elapsed()),
            "backend reachable"
        );
        Ok(process)
    }

    fn wait_for_port(&self, process: &mut RunningProcess) -> Result<(), SupervisorError> {
        let port = process.slot.port();
        let deadline = process.started_at + self.startup_timeout;
        loop {
            // Check the child first so a crash is reported instead of a timeout.
            let exited = process
                .try_exit_status()
                .map_err(|source| SupervisorError::Monitor { source })?;
            if let Some(status) = exited {
                return Err(SupervisorError::Exited { port, status });
            }
            if reachable(port)? {
                // Only a listener outliving a live child counts as the backend.
                let exited_meanwhile = process
                    .try_exit_status()
                    .map_err(|source| SupervisorError::Monitor { source })?;
                return exited_meanwhile.map_or(Ok(()), |status| {
                    Err(SupervisorError::Exited { port, status })
                });
            }
            if Instant::now() >= deadline {
                return Err(SupervisorError::Timeout {
                    port,
                    timeout_ms: millis(self.startup_timeout),
                });
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Sends `SIGTERM`, waits up to the grace period, then kills and reaps.
    ///
    /// A process that already exited is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StopError`] when signalling or reaping fails. The handle is
    /// consumed either way and its drop makes a last attempt to kill the
    /// child.
    pub fn stop(&self, mut process: RunningProcess) -> Result<(), StopError> {
        let pid = process.pid;
        let Some(child) = process.child.as_mut() else {
            return Ok(());
        };
        terminate(pid)?;
        let deadline = Instant::now() + self.stop_grace;
        loop {
            let reaped = child
                .try_wait()
                .map_err(|source| StopError::Reap { pid, source })?;
            if let Some(status) = reaped {
                debug!(target: PROCESS_TARGET, pid, %status, "backend exited");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
        warn!(
            target: PROCESS_TARGET,
            pid,
            grace_ms = millis(self.stop_grace),
            "backend ignored SIGTERM, killing"
        );
        child
            .kill()
            .and_then(|()| child.wait())
            .map(drop)
            .map_err(|source| StopError::Reap { pid, source })
    }
}

fn reachable(port: u16) -> Result<bool, SupervisorError> {
    port_is_reachable(CONNECT_HOST, port, CONNECT_TIMEOUT)
        .map_err(|source| SupervisorError::Connect { port, source })
}

fn terminate(pid: u32) -> Result<(), StopError> {
    let Ok(raw) = i32::try_from(pid) else {
        // Unrepresentable pids cannot be signalled; the kill fallback reaps.
        return Ok(());
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(StopError::Signal { pid, source }),
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::TcpListener;
    use std::os::unix::fs::PermissionsExt;

    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::slot::WorkerLayout;

    fn free_port() -> u16 {
        TcpListener::bind(("127.0.0.1", 0))
            .and_then(|listener| listener.local_addr())
            .expect("ephemeral port")
            .port()
    }

    fn root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir")
    }

    /// Writes an executable shell script standing in for the backend.
    fn script(dir: &TempDir, body: &str) -> Utf8PathBuf {
        let path = root(dir).join("fake-tobira");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    fn slot_with_binary(dir: &TempDir, binary: impl Into<Utf8PathBuf>) -> WorkerSlot {
        let slot = WorkerLayout::new(free_port(), "tobira_ui_test_", root(dir), binary)
            .slot(0)
            .expect("slot");
        fs::create_dir_all(slot.work_dir()).expect("work dir");
        slot
    }

    /// Spawns the slot binary without waiting for any port.
    fn running(slot: WorkerSlot) -> RunningProcess {
        let child = Command::new(slot.binary_path())
            .stdin(Stdio::null())
            .spawn()
            .expect("spawn backend");
        RunningProcess {
            pid: child.id(),
            child: Some(child),
            slot,
            started_at: Instant::now(),
        }
    }

    #[rstest]
    fn missing_binary_reports_spawn_failure() {
        let dir = TempDir::new().expect("temp dir");
        let slot = slot_with_binary(&dir, "/nonexistent/tobira");
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1), Duration::from_millis(10));
        let error = supervisor.start(&slot).expect_err("spawn must fail");
        assert!(matches!(error, SupervisorError::Spawn { .. }));
    }

    #[rstest]
    fn early_exit_is_reported_before_timeout() {
        let dir = TempDir::new().expect("temp dir");
        let slot = slot_with_binary(&dir, script(&dir, "exit 3"));
        let supervisor = ProcessSupervisor::new(Duration::from_secs(30), Duration::from_millis(10));
        let started = Instant::now();
        let error = supervisor.start(&slot).expect_err("backend must exit");
        assert!(matches!(error, SupervisorError::Exited { .. }), "{error}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[rstest]
    fn silent_backend_times_out() {
        let dir = TempDir::new().expect("temp dir");
        let slot = slot_with_binary(&dir, script(&dir, "exec sleep 30"));
        let supervisor =
            ProcessSupervisor::new(Duration::from_millis(200), Duration::from_millis(10));
        let error = supervisor.start(&slot).expect_err("port must stay closed");
        assert!(
            matches!(error, SupervisorError::Timeout { timeout_ms: 200, .. }),
            "{error}"
        );
    }

    #[rstest]
    fn occupied_port_is_refused_before_spawning() {
        let dir = TempDir::new().expect("temp dir");
        let marker = root(&dir).join("spawned");
        let body = format!("touch '{marker}'\nexec sleep 30");
        let slot = slot_with_binary(&dir, script(&dir, &body));
        let listener = TcpListener::bind(("127.0.0.1", slot.port())).expect("bind slot port");
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5), Duration::from_millis(10));
        let error = supervisor.start(&slot).expect_err("taken port must be refused");
        assert!(
            matches!(error, SupervisorError::PortInUse { port } if port == slot.port()),
            "{error}"
        );
        assert!(!marker.exists(), "backend must not be spawned");
        drop(listener);
    }

    #[rstest]
    fn stop_reaps_a_running_backend() {
        let dir = TempDir::new().expect("temp dir");
        let slot = slot_with_binary(&dir, script(&dir, "exec sleep 30"));
        let process = running(slot);
        let pid = i32::try_from(process.pid()).expect("pid fits i32");
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5), Duration::from_millis(10));
        supervisor.stop(process).expect("stop");
        assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
    }

    #[rstest]
    fn stubborn_backend_is_killed_after_the_grace_period() {
        let dir = TempDir::new().expect("temp dir");
        let body = "trap '' TERM\nwhile :; do sleep 1; done";
        let slot = slot_with_binary(&dir, script(&dir, body));
        let process = running(slot);
        let pid = i32::try_from(process.pid()).expect("pid fits i32");
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5), Duration::from_millis(10))
            .with_stop_grace(Duration::from_millis(200));
        let started = Instant::now();
        supervisor.stop(process).expect("stop");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
    }

    #[rstest]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
