//! Malformed configuration sources must abort loading.

use std::ffi::OsString;
use std::fs;

use ortho_config::OrthoConfig;
use tempfile::TempDir;
use tobira_harness_config::HarnessConfig;

#[test]
fn malformed_config_file_is_reported() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("tobira-harness.toml");
    fs::write(&path, "base_port = \"not a number\"\n").expect("write malformed config");

    let args = vec![
        OsString::from("tobira-harness"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    assert!(
        HarnessConfig::load_from_iter(args).is_err(),
        "a non-numeric port must not load"
    );
}

#[test]
fn out_of_range_port_flag_is_rejected() {
    let args = vec![
        OsString::from("tobira-harness"),
        OsString::from("--base-port"),
        OsString::from("70000"),
    ];
    assert!(HarnessConfig::load_from_iter(args).is_err());
}
