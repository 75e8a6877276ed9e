//! RSpec support.
//!
//! Runs `rspec <options> <files>` and picks up the closing
//! `N examples, N failures[, N pending]` line of each group.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::{FrameworkKind, TestFramework, join_command, quoted_files, ruby_executable};
use crate::config::RubyFrameworkConfig;
use crate::executor::ExecutionContext;
use crate::partition::Group;

static SPEC_FILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_spec\.rb$").unwrap());

static RESULT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+ examples?, \d+ failures?").unwrap());

pub struct RspecFramework {
    executable: String,
    test_options: Option<String>,
}

impl RspecFramework {
    pub fn new(config: &RubyFrameworkConfig) -> Self {
        Self {
            executable: ruby_executable(config.command.as_deref(), "rspec"),
            test_options: config.test_options.clone(),
        }
    }
}

impl TestFramework for RspecFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::Rspec
    }

    fn noun(&self) -> &str {
        "spec"
    }

    fn file_pattern(&self) -> &Regex {
        &SPEC_FILE
    }

    fn default_paths(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("spec")]
    }

    fn runtime_log(&self) -> PathBuf {
        PathBuf::from("tmp/parallel_runtime_rspec.log")
    }

    fn build_command(&self, group: &Group, _context: &ExecutionContext) -> String {
        join_command(&[
            self.executable.as_str(),
            self.test_options.as_deref().unwrap_or_default(),
            quoted_files(group).as_str(),
        ])
    }

    fn is_result_line(&self, line: &str) -> bool {
        RESULT_LINE.is_match(line)
    }
}
