//! Cucumber support.
//!
//! Cucumber closes each run with two independent result lines, one for
//! scenarios and one for steps:
//!
//! ```text
//! 3 scenarios (1 failed, 2 passed)
//! 12 steps (1 failed, 1 skipped, 10 passed)
//! ```
//!
//! The two are summed separately, see [`SummaryStyle::Categorized`].

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::{FrameworkKind, TestFramework, join_command, quoted_files, ruby_executable};
use crate::config::RubyFrameworkConfig;
use crate::executor::ExecutionContext;
use crate::partition::Group;
use crate::report::SummaryStyle;

static FEATURE_FILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.feature$").unwrap());

static RESULT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+ (steps?|scenarios?)\b").unwrap());

const CATEGORIES: [&str; 2] = ["scenario", "step"];

const STATUS_ORDER: [&str; 6] = ["failed", "flaky", "undefined", "skipped", "pending", "passed"];

pub struct CucumberFramework {
    executable: String,
    test_options: Option<String>,
}

impl CucumberFramework {
    pub fn new(config: &RubyFrameworkConfig) -> Self {
        Self {
            executable: ruby_executable(config.command.as_deref(), "cucumber"),
            test_options: config.test_options.clone(),
        }
    }
}

impl TestFramework for CucumberFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::Cucumber
    }

    fn noun(&self) -> &str {
        "feature"
    }

    fn file_pattern(&self) -> &Regex {
        &FEATURE_FILE
    }

    fn default_paths(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("features")]
    }

    fn runtime_log(&self) -> PathBuf {
        PathBuf::from("tmp/parallel_runtime_cucumber.log")
    }

    fn build_command(&self, group: &Group, _context: &ExecutionContext) -> String {
        join_command(&[
            self.executable.as_str(),
            self.test_options.as_deref().unwrap_or_default(),
            quoted_files(group).as_str(),
        ])
    }

    fn is_result_line(&self, line: &str) -> bool {
        RESULT_LINE.is_match(line.trim_start())
    }

    fn summary_style(&self) -> SummaryStyle {
        SummaryStyle::Categorized {
            categories: CATEGORIES.iter().map(|c| c.to_string()).collect(),
            order: STATUS_ORDER.iter().map(|s| s.to_string()).collect(),
        }
    }
}
