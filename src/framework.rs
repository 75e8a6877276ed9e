//! Test framework adapters.
//!
//! A [`TestFramework`] knows three things about a test tool: which files
//! are its tests, how to turn a group of files into one shell command, and
//! which output lines carry its result counts. Partitioning and execution
//! never look further into the framework than this.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TestFramework                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  file_pattern() ─────────► discovery                         │
//! │                                                              │
//! │  build_command(&group, &context) ──► "rspec a_spec.rb ..."   │
//! │                                          │                   │
//! │                                          ▼ (one subprocess)  │
//! │  is_result_line(line) ───► report::summary                   │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Frameworks
//!
//! | Kind | Implementation | Files |
//! |------|----------------|-------|
//! | `rspec` | [`rspec::RspecFramework`] | `*_spec.rb` |
//! | `cucumber` | [`cucumber::CucumberFramework`] | `*.feature` |
//! | `test` | [`test_unit::TestUnitFramework`] | `*_test.rb`, `test_*.rb` |
//! | `generic` | [`generic::GenericFramework`] | configurable |
//!
//! Frameworks are picked by [`FrameworkKind`] and built with [`create`].

pub mod cucumber;
pub mod generic;
pub mod rspec;
pub mod test_unit;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;

use crate::config::FrameworkConfig;
use crate::executor::ExecutionContext;
use crate::partition::Group;
use crate::report::SummaryStyle;

/// Result type for framework operations.
pub type FrameworkResult<T> = Result<T, FrameworkError>;

/// Errors raised while selecting or configuring a framework.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    /// No framework is registered under this name.
    #[error("Unknown framework '{0}', expected one of: rspec, cucumber, test, generic")]
    UnknownFramework(String),

    /// The framework needs a command template and none was configured.
    #[error("The {0} framework requires a command")]
    MissingCommand(String),

    /// A configured file or result pattern is not a valid regex.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// The registered frameworks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkKind {
    Rspec,
    Cucumber,
    TestUnit,
    Generic,
}

impl FrameworkKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rspec => "rspec",
            Self::Cucumber => "cucumber",
            Self::TestUnit => "test",
            Self::Generic => "generic",
        }
    }
}

impl FromStr for FrameworkKind {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rspec" => Ok(Self::Rspec),
            "cucumber" => Ok(Self::Cucumber),
            "test" | "test-unit" | "test_unit" => Ok(Self::TestUnit),
            "generic" => Ok(Self::Generic),
            other => Err(FrameworkError::UnknownFramework(other.to_string())),
        }
    }
}

impl fmt::Display for FrameworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Adapter between partest and one test tool.
///
/// Implementations must be pure: building a command or classifying a line
/// never touches the filesystem or any shared state.
pub trait TestFramework: Send + Sync {
    fn kind(&self) -> FrameworkKind;

    /// Word for one test file in the header line ("spec", "feature").
    fn noun(&self) -> &str;

    /// Matches the files discovery should pick up inside a directory.
    fn file_pattern(&self) -> &Regex;

    /// Where to look when no paths are given.
    fn default_paths(&self) -> Vec<PathBuf>;

    /// Default location of the runtime log for this framework.
    fn runtime_log(&self) -> PathBuf;

    /// The shell command running every file of `group`.
    fn build_command(&self, group: &Group, context: &ExecutionContext) -> String;

    /// Whether `line` (ANSI codes already stripped) is a result line.
    fn is_result_line(&self, line: &str) -> bool;

    /// How matched result lines are combined.
    fn summary_style(&self) -> SummaryStyle {
        SummaryStyle::Flat
    }
}

/// Builds the framework selected by `config`.
///
/// # Errors
///
/// Fails when a generic framework has no command or one of its patterns
/// doesn't compile.
pub fn create(config: &FrameworkConfig) -> FrameworkResult<Box<dyn TestFramework>> {
    Ok(match config {
        FrameworkConfig::Rspec(c) => Box::new(rspec::RspecFramework::new(c)),
        FrameworkConfig::Cucumber(c) => Box::new(cucumber::CucumberFramework::new(c)),
        FrameworkConfig::TestUnit(c) => Box::new(test_unit::TestUnitFramework::new(c)),
        FrameworkConfig::Generic(c) => Box::new(generic::GenericFramework::new(c)?),
    })
}

/// The group's files, shell-quoted and space-separated.
pub fn quoted_files(group: &Group) -> String {
    shell_words::join(group.paths())
}

/// Joins command fragments with single spaces, skipping empty ones.
pub(crate) fn join_command(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves the executable of a Ruby tool: the configured one, else
/// `bundle exec <name>` inside a Bundler project, else `<name>`.
pub(crate) fn ruby_executable(configured: Option<&str>, name: &str) -> String {
    match configured {
        Some(executable) => executable.to_string(),
        None if Path::new("Gemfile").exists() => format!("bundle exec {}", name),
        None => name.to_string(),
    }
}

pub(crate) fn compile(pattern: &str) -> FrameworkResult<Regex> {
    Regex::new(pattern).map_err(|source| FrameworkError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
