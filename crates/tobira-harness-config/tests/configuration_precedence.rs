//! Behavioural coverage for layered configuration loading.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::{fixture, rstest};
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use tobira_harness_config::{
    AuthMode, DEFAULT_BASE_PORT, HarnessConfig, default_log_filter, default_log_format,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<HarnessConfig>>,
    error: RefCell<Option<String>>,
    _env_lock: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_lock = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("tobira-harness")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_lock: env_lock,
        }
    }

    fn write_config(&self, contents: &str) {
        let path = self.temp_dir.path().join("tobira-harness.toml");
        if let Err(error) = fs::write(&path, contents) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is unsafe under edition 2024; `ENV_MUTEX`
        // serialises access and `Drop` restores the previous value.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) -> HarnessConfig {
        if self.loaded.borrow().is_none() && self.error.borrow().is_none() {
            let args = self.cli_args.borrow().clone();
            match HarnessConfig::load_from_iter(args) {
                Ok(config) => *self.loaded.borrow_mut() = Some(config),
                Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
            }
        }
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(previous) => unsafe { std::env::set_var(&key, previous) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the base port to \"{port}\"")]
fn given_configuration_file(harness: &Harness, port: String) {
    harness.write_config(&format!("base_port = {port}\n"));
}

#[given("the environment overrides the base port to \"{port}\"")]
fn given_environment_override(harness: &Harness, port: String) {
    harness.set_env("TOBIRA_HARNESS_BASE_PORT", &port);
}

#[when("the CLI sets the base port to \"{port}\"")]
fn when_cli_override(harness: &Harness, port: String) {
    harness.push_cli_arg("--base-port");
    harness.push_cli_arg(port);
}

#[then("loading the configuration resolves the base port to \"{port}\"")]
fn then_resolved_port(harness: &Harness, port: String) {
    let expected: u16 = match port.parse() {
        Ok(port) => port,
        Err(error) => panic!("invalid expected port '{port}': {error}"),
    };
    assert_eq!(harness.load().base_port(), expected);
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[rstest]
fn defaults_apply_without_overrides(harness: Harness) {
    let config = harness.load();
    assert_eq!(config.base_port(), DEFAULT_BASE_PORT);
    assert_eq!(config.database_prefix(), "tobira_ui_test_");
    assert_eq!(config.auth_mode(), AuthMode::LoginProxy);
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
}

#[rstest]
fn file_values_apply_when_nothing_overrides_them(harness: Harness) {
    harness.write_config(
        "database_prefix = \"tobira_ci_\"\nauth_mode = \"full-auth-proxy\"\nstartup_timeout_ms = 5000\n",
    );
    let config = harness.load();
    assert_eq!(config.database_prefix(), "tobira_ci_");
    assert_eq!(config.auth_mode(), AuthMode::FullAuthProxy);
    assert_eq!(config.startup_timeout_ms, 5000);
}

#[rstest]
fn environment_beats_file(harness: Harness) {
    harness.write_config("base_port = 4000\n");
    harness.set_env("TOBIRA_HARNESS_BASE_PORT", "4100");
    assert_eq!(harness.load().base_port(), 4100);
}
