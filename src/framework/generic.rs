//! Any test tool driven by a command template.
//!
//! The template may use these placeholders:
//!
//! | Placeholder | Replaced with |
//! |-------------|---------------|
//! | `{files}` | the group's files, shell-quoted |
//! | `{options}` | `test_options` |
//! | `{env_number}` | the process's `TEST_ENV_NUMBER` |
//!
//! Without `{files}` the file list is appended to the command.
//!
//! ```toml
//! [framework]
//! type = "generic"
//! command = "pytest -q {options} {files}"
//! file_pattern = "(^|/)test_[^/]*\\.py$"
//! result_pattern = "\\d+ (passed|failed)"
//! noun = "module"
//! ```

use std::path::PathBuf;

use regex::Regex;

use super::{FrameworkError, FrameworkKind, FrameworkResult, TestFramework, compile, join_command, quoted_files};
use crate::config::GenericFrameworkConfig;
use crate::executor::ExecutionContext;
use crate::partition::Group;

const DEFAULT_FILE_PATTERN: &str = r"_test\.\w+$";
const DEFAULT_RESULT_PATTERN: &str = r"\d+ (?:tests?|examples?), \d+ failures?";
const DEFAULT_RUNTIME_LOG: &str = "tmp/parallel_runtime.log";

pub struct GenericFramework {
    command: String,
    test_options: String,
    file_pattern: Regex,
    result_pattern: Regex,
    noun: String,
    runtime_log: PathBuf,
}

impl GenericFramework {
    /// # Errors
    ///
    /// Fails if `command` is blank or a pattern is not a valid regex.
    pub fn new(config: &GenericFrameworkConfig) -> FrameworkResult<Self> {
        if config.command.trim().is_empty() {
            return Err(FrameworkError::MissingCommand(
                FrameworkKind::Generic.to_string(),
            ));
        }

        Ok(Self {
            command: config.command.clone(),
            test_options: config.test_options.clone().unwrap_or_default(),
            file_pattern: compile(config.file_pattern.as_deref().unwrap_or(DEFAULT_FILE_PATTERN))?,
            result_pattern: compile(
                config
                    .result_pattern
                    .as_deref()
                    .unwrap_or(DEFAULT_RESULT_PATTERN),
            )?,
            noun: config.noun.clone().unwrap_or_else(|| "file".to_string()),
            runtime_log: config
                .runtime_log
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_LOG)),
        })
    }
}

impl TestFramework for GenericFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::Generic
    }

    fn noun(&self) -> &str {
        &self.noun
    }

    fn file_pattern(&self) -> &Regex {
        &self.file_pattern
    }

    fn default_paths(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("test")]
    }

    fn runtime_log(&self) -> PathBuf {
        self.runtime_log.clone()
    }

    fn build_command(&self, group: &Group, context: &ExecutionContext) -> String {
        let files = quoted_files(group);
        let command = self
            .command
            .replace("{options}", &self.test_options)
            .replace("{env_number}", &context.env_number());

        if command.contains("{files}") {
            join_command(&[command.replace("{files}", &files).as_str()])
        } else {
            join_command(&[command.as_str(), files.as_str()])
        }
    }

    fn is_result_line(&self, line: &str) -> bool {
        self.result_pattern.is_match(line)
    }
}
