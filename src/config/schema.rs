//! Configuration schema definitions for partest.
//!
//! This module defines the types deserialized from `partest.toml`. Every
//! field has a default, so an empty file (or no file at all) is a valid
//! configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── PartestConfig          - Partitioning and execution settings
//! └── FrameworkConfig        - Tagged enum selecting the test framework
//!     ├── Rspec              - RSpec specs
//!     ├── Cucumber           - Cucumber features
//!     ├── Test               - test-unit / minitest files
//!     └── Generic            - Any command with a `{files}` placeholder
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::executor::OutputMode;
use crate::framework::{FrameworkError, FrameworkKind};
use crate::partition::GroupBy;

/// Root configuration structure for partest.
///
/// # TOML Structure
///
/// ```toml
/// [partest]
/// processes = 4
/// group_by = "runtime"
/// runtime_log = "tmp/parallel_runtime_rspec.log"
/// single = ["spec/features/"]
///
/// [partest.env]
/// RAILS_ENV = "test"
///
/// [framework]
/// type = "rspec"
/// test_options = "--format progress"
/// ```
///
/// # Example
///
/// ```
/// use partest::config::{Config, FrameworkConfig};
///
/// let config: Config = toml::from_str(r#"
///     [partest]
///     processes = 2
///
///     [framework]
///     type = "cucumber"
/// "#).unwrap();
///
/// assert_eq!(config.partest.processes, Some(2));
/// assert!(matches!(config.framework, FrameworkConfig::Cucumber(_)));
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Partitioning and execution settings.
    #[serde(default)]
    pub partest: PartestConfig,

    /// Which test framework runs each group, and how.
    #[serde(default)]
    pub framework: FrameworkConfig,
}

/// Partitioning and execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `processes` | number of CPUs |
/// | `group_by` | `default` |
/// | `runtime_log` | framework-specific (`tmp/parallel_runtime_*.log`) |
/// | `output` | `stream` |
/// | `shell` | `/bin/sh` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartestConfig {
    /// Number of groups, and so of concurrent subprocesses.
    pub processes: Option<usize>,

    /// How files are weighted before packing.
    #[serde(default)]
    pub group_by: GroupBy,

    /// Recorded runtimes, one `path:seconds` entry per line.
    pub runtime_log: Option<PathBuf>,

    /// With `group_by = "runtime"`, the largest share (0-100) of files that
    /// may lack a recorded runtime before partitioning is refused.
    pub allowed_missing_percent: Option<f64>,

    /// Regexes whose matching files must all run in the same group.
    #[serde(default)]
    pub single: Vec<String>,

    /// Keep groups holding `single` files free of any other file.
    #[serde(default)]
    pub isolate: bool,

    /// Directories or files to search when none are given on the command line.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Only run files whose path matches this regex.
    pub pattern: Option<String>,

    /// Skip files whose path matches this regex.
    pub exclude_pattern: Option<String>,

    /// How subprocess output reaches the terminal.
    #[serde(default)]
    pub output: OutputMode,

    /// Shell used to run each group's command.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Directory every subprocess starts in.
    pub working_dir: Option<PathBuf>,

    /// Run subprocesses under `nice`.
    #[serde(default)]
    pub nice: bool,

    /// Capture stderr together with stdout.
    #[serde(default)]
    pub combine_stderr: bool,

    /// Hand out `TEST_ENV_NUMBER=1` to the first process instead of a
    /// blank value.
    #[serde(default)]
    pub first_is_one: bool,

    /// Kill the remaining groups as soon as one fails.
    #[serde(default)]
    pub fail_fast: bool,

    /// Wall-clock limit for the whole batch, in seconds.
    pub timeout_secs: Option<u64>,

    /// Extra variables for every subprocess. `TEST_ENV_NUMBER` and
    /// `PARALLEL_TEST_GROUPS` can't be overridden here.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for PartestConfig {
    fn default() -> Self {
        Self {
            processes: None,
            group_by: GroupBy::default(),
            runtime_log: None,
            allowed_missing_percent: None,
            single: Vec::new(),
            isolate: false,
            paths: Vec::new(),
            pattern: None,
            exclude_pattern: None,
            output: OutputMode::default(),
            shell: default_shell(),
            working_dir: None,
            nice: false,
            combine_stderr: false,
            first_is_one: false,
            fail_fast: false,
            timeout_secs: None,
            env: BTreeMap::new(),
        }
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

/// Test framework configuration.
///
/// A tagged enum selected by the `type` field.
///
/// | Type | Files | Runs |
/// |------|-------|------|
/// | `rspec` | `*_spec.rb` | `rspec` |
/// | `cucumber` | `*.feature` | `cucumber` |
/// | `test` | `*_test.rb`, `test_*.rb` | `ruby -Itest` |
/// | `generic` | configurable | `command` with `{files}` replaced |
///
/// # Example
///
/// ```toml
/// [framework]
/// type = "generic"
/// command = "pytest -q {files}"
/// file_pattern = "test_.*\\.py$"
/// result_pattern = "\\d+ (passed|failed)"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameworkConfig {
    Rspec(RubyFrameworkConfig),
    Cucumber(RubyFrameworkConfig),
    #[serde(rename = "test")]
    TestUnit(RubyFrameworkConfig),
    Generic(GenericFrameworkConfig),
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self::Rspec(RubyFrameworkConfig::default())
    }
}

impl FrameworkConfig {
    /// Default configuration for `kind`.
    pub fn for_kind(kind: FrameworkKind) -> Self {
        match kind {
            FrameworkKind::Rspec => Self::Rspec(RubyFrameworkConfig::default()),
            FrameworkKind::Cucumber => Self::Cucumber(RubyFrameworkConfig::default()),
            FrameworkKind::TestUnit => Self::TestUnit(RubyFrameworkConfig::default()),
            FrameworkKind::Generic => Self::Generic(GenericFrameworkConfig::default()),
        }
    }

    pub fn kind(&self) -> FrameworkKind {
        match self {
            Self::Rspec(_) => FrameworkKind::Rspec,
            Self::Cucumber(_) => FrameworkKind::Cucumber,
            Self::TestUnit(_) => FrameworkKind::TestUnit,
            Self::Generic(_) => FrameworkKind::Generic,
        }
    }

    /// Switches to framework `name`, keeping the current settings if it is
    /// already the selected one.
    pub fn select(self, name: &str) -> Result<Self, FrameworkError> {
        let kind = FrameworkKind::from_str(name)?;
        if kind == self.kind() {
            Ok(self)
        } else {
            Ok(Self::for_kind(kind))
        }
    }

    /// Replaces the pass-through options of whichever framework is selected.
    pub fn set_test_options(&mut self, options: String) {
        match self {
            Self::Rspec(c) | Self::Cucumber(c) | Self::TestUnit(c) => c.test_options = Some(options),
            Self::Generic(c) => c.test_options = Some(options),
        }
    }
}

/// Settings for the Ruby frameworks (`rspec`, `cucumber`, `test`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RubyFrameworkConfig {
    /// Executable to run, e.g. `bin/rspec`. Defaults to the framework's own
    /// executable, prefixed with `bundle exec` when a `Gemfile` is present.
    pub command: Option<String>,

    /// Options passed through to the framework verbatim.
    pub test_options: Option<String>,
}

/// Settings for an arbitrary test command.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenericFrameworkConfig {
    /// Command template. `{files}` is replaced with the group's quoted
    /// file list and `{options}` with `test_options`; without a `{files}`
    /// placeholder the files are appended.
    #[serde(default)]
    pub command: String,

    pub test_options: Option<String>,

    /// Regex selecting test files during discovery.
    pub file_pattern: Option<String>,

    /// Regex selecting result lines in the output.
    pub result_pattern: Option<String>,

    /// Word used for a test file in the header line.
    pub noun: Option<String>,

    /// Default runtime log location.
    pub runtime_log: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.partest.processes, None);
        assert_eq!(config.partest.group_by, GroupBy::Default);
        assert_eq!(config.partest.shell, "/bin/sh");
        assert_eq!(config.partest.output, OutputMode::Stream);
        assert!(matches!(config.framework, FrameworkConfig::Rspec(_)));
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            [partest]
            processes = 3
            group_by = "filesize"
            runtime_log = "tmp/runtime.log"
            allowed_missing_percent = 20.0
            single = ["spec/features/"]
            isolate = true
            output = "rewrite"
            nice = true
            combine_stderr = true
            first_is_one = true
            fail_fast = true
            timeout_secs = 600

            [partest.env]
            RAILS_ENV = "test"

            [framework]
            type = "test"
            test_options = "-v"
            "#,
        )
        .unwrap();

        let partest = &config.partest;
        assert_eq!(partest.processes, Some(3));
        assert_eq!(partest.group_by, GroupBy::Filesize);
        assert_eq!(partest.single, vec!["spec/features/"]);
        assert!(partest.isolate);
        assert_eq!(partest.output, OutputMode::Rewrite);
        assert_eq!(partest.timeout_secs, Some(600));
        assert_eq!(partest.env.get("RAILS_ENV").map(String::as_str), Some("test"));

        let FrameworkConfig::TestUnit(framework) = &config.framework else {
            panic!("expected test-unit framework");
        };
        assert_eq!(framework.test_options.as_deref(), Some("-v"));
    }

    #[test]
    fn test_generic_framework() {
        let config: Config = toml::from_str(
            r#"
            [framework]
            type = "generic"
            command = "pytest -q {files}"
            result_pattern = "\\d+ passed"
            "#,
        )
        .unwrap();

        let FrameworkConfig::Generic(framework) = &config.framework else {
            panic!("expected generic framework");
        };
        assert_eq!(framework.command, "pytest -q {files}");
        assert_eq!(framework.result_pattern.as_deref(), Some(r"\d+ passed"));
    }

    #[test]
    fn test_unknown_framework_type_is_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [framework]
            type = "jasmine"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_select_keeps_settings_for_same_kind() {
        let mut config = FrameworkConfig::default();
        config.set_test_options("--fail-fast".to_string());

        let same = config.clone().select("rspec").unwrap();
        let FrameworkConfig::Rspec(rspec) = same else {
            panic!("expected rspec");
        };
        assert_eq!(rspec.test_options.as_deref(), Some("--fail-fast"));

        let other = config.select("cucumber").unwrap();
        assert_eq!(other.kind(), FrameworkKind::Cucumber);
        assert!(FrameworkConfig::default().select("nope").is_err());
    }
}
