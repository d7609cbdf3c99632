//! Configuration loading helpers for the operator CLI.
//!
//! Leading configuration flags are routed to `ortho_config`; everything from
//! the first unrecognised token onwards belongs to the subcommand parser.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use tobira_harness_config::HarnessConfig;

use crate::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `HarnessConfig`.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--base-port",
    "--database-prefix",
    "--admin-database-url",
    "--database-user",
    "--database-password",
    "--tobira-binary",
    "--root-path",
    "--output-dir",
    "--startup-timeout-ms",
    "--poll-interval-ms",
    "--command-timeout-ms",
    "--auth-mode",
    "--log-filter",
    "--log-format",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration for the CLI.
    ///
    /// Configuration flags must precede the subcommand; later occurrences are
    /// handed to the subcommand parser and rejected there.
    fn load(&self, args: &[OsString]) -> Result<HarnessConfig, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<HarnessConfig, AppError> {
        HarnessConfig::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Stop;
    }
    let (flag, has_inline_value) = text
        .split_once('=')
        .map_or((&*text, false), |(flag, _)| (flag, true));
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments split between the configuration loader and the subcommand
/// parser. Both halves keep the program name.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit::default();
    };

    let mut config_arguments = vec![program.clone()];
    let mut remaining = rest.iter();
    let mut command_arguments = vec![program.clone()];
    while let Some(argument) = remaining.next() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                if needs_value {
                    config_arguments.extend(remaining.next().cloned());
                }
            }
            FlagAction::Stop => {
                command_arguments.push(argument.clone());
                break;
            }
        }
    }
    command_arguments.extend(remaining.cloned());

    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case("--base-port", FlagAction::Include { needs_value: true })]
    #[case("worker", FlagAction::Stop)]
    #[case("--index", FlagAction::Stop)]
    fn classifies_flags(#[case] argument: &str, #[case] expected: FlagAction) {
        assert_eq!(classify(OsStr::new(argument)), expected);
    }

    #[rstest]
    fn leading_configuration_flags_are_split_off() {
        let split = split_config_arguments(&os(&[
            "tobira-harness",
            "--base-port",
            "4000",
            "--log-format=compact",
            "slot",
            "--index",
            "2",
        ]));
        assert_eq!(
            split.config_arguments,
            os(&["tobira-harness", "--base-port", "4000", "--log-format=compact"])
        );
        assert_eq!(
            split.command_arguments,
            os(&["tobira-harness", "slot", "--index", "2"])
        );
    }

    #[rstest]
    fn flags_after_the_subcommand_stay_with_it() {
        let split = split_config_arguments(&os(&["tobira-harness", "slot", "--base-port", "1"]));
        assert_eq!(split.config_arguments, os(&["tobira-harness"]));
        assert_eq!(
            split.command_arguments,
            os(&["tobira-harness", "slot", "--base-port", "1"])
        );
    }

    #[rstest]
    fn empty_arguments_split_to_nothing() {
        assert_eq!(split_config_arguments(&[]), ConfigArgumentSplit::default());
    }
}
