//! test-unit and minitest support.
//!
//! Neither tool accepts a list of files on its command line, so each group
//! becomes a small Ruby program requiring its files in one interpreter:
//!
//! ```text
//! ruby -Itest -e '%w[test/a_test.rb test/b_test.rb].each { |f| require %{./#{f}} }' -- <options>
//! ```

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::{FrameworkKind, TestFramework, join_command};
use crate::config::RubyFrameworkConfig;
use crate::executor::ExecutionContext;
use crate::partition::Group;

static TEST_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:_test\.rb|(?:^|/)test_[^/]*\.rb)$").unwrap());

// "0 failures, 0 errors" but not "1) Failure:".
static RESULT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+ failures?\b(?:[^:]|$)").unwrap());

pub struct TestUnitFramework {
    executable: String,
    test_options: Option<String>,
}

impl TestUnitFramework {
    pub fn new(config: &RubyFrameworkConfig) -> Self {
        Self {
            executable: config.command.clone().unwrap_or_else(|| "ruby".to_string()),
            test_options: config.test_options.clone(),
        }
    }

    fn require_script(group: &Group) -> String {
        format!(
            "%w[{}].each {{ |f| require %{{./#{{f}}}} }}",
            group.paths().join(" ")
        )
    }
}

impl TestFramework for TestUnitFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::TestUnit
    }

    fn noun(&self) -> &str {
        "test"
    }

    fn file_pattern(&self) -> &Regex {
        &TEST_FILE
    }

    fn default_paths(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("test")]
    }

    fn runtime_log(&self) -> PathBuf {
        PathBuf::from("tmp/parallel_runtime_test.log")
    }

    fn build_command(&self, group: &Group, _context: &ExecutionContext) -> String {
        let script = shell_words::quote(&Self::require_script(group)).into_owned();
        let mut command = join_command(&[self.executable.as_str(), "-Itest", "-e", script.as_str()]);
        if let Some(options) = self.test_options.as_deref()
            && !options.trim().is_empty()
        {
            command = join_command(&[command.as_str(), "--", options]);
        }
        command
    }

    fn is_result_line(&self, line: &str) -> bool {
        RESULT_LINE.is_match(line)
    }
}
