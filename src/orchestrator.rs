//! Running a whole test suite.
//!
//! ```text
//!   files ──► partition() ──► Vec<Group> ──► Executor::run_all ──► Vec<ProcessResult>
//!                                  │                 │                      │
//!                          only_group filter   TestFramework::        FinalReport::build
//!                                              build_command               │
//!                                                                          ▼
//!                                                                      Reporter
//! ```
//!
//! The [`Orchestrator`] owns everything one invocation needs: the framework
//! adapter, partitioning and execution settings, the output serializer and
//! the reporter. Nothing outlives it.
//!
//! # Example
//!
//! ```no_run
//! use partest::config::FrameworkConfig;
//! use partest::executor::RunOptions;
//! use partest::framework;
//! use partest::orchestrator::Orchestrator;
//! use partest::partition::PartitionOptions;
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let framework = framework::create(&FrameworkConfig::default())?;
//!     let orchestrator = Orchestrator::new(framework, PartitionOptions::default(), RunOptions::default());
//!
//!     let files = vec!["spec/a_spec.rb".to_string(), "spec/b_spec.rb".to_string()];
//!     let result = orchestrator.run(&files, 2, None).await?;
//!
//!     std::process::exit(result.exit_code());
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::executor::{Executor, Job, ProcessResult, RunOptions};
use crate::framework::TestFramework;
use crate::output::OutputSerializer;
use crate::partition::{self, Group, PartitionError, PartitionOptions, PartitionResult};
use crate::report::{FinalReport, NullReporter, Reporter, SummaryStyle};

/// Everything a finished run produced.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every group exited with status 0 |
/// | 1 | At least one group exited non-zero, was killed, or failed to start |
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Number of groups in the partition, including any not selected.
    pub num_processes: usize,

    /// Whether the first process was numbered `1`.
    pub first_is_one: bool,

    /// One result per group that was run, in group order.
    pub results: Vec<ProcessResult>,

    pub report: FinalReport,
}

impl RunResult {
    /// Success is decided by exit statuses alone, never by the summary.
    pub fn success(&self) -> bool {
        !self.report.failed
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    pub fn failed_groups(&self) -> impl Iterator<Item = &ProcessResult> {
        self.results.iter().filter(|r| !r.success())
    }
}

/// Converts 1-based group numbers, as given on the command line, into
/// 0-based indices.
///
/// # Errors
///
/// Fails if a number is 0 or larger than `num_groups`. This is checked
/// before anything is spawned.
pub fn select_groups(only_group: &[usize], num_groups: usize) -> PartitionResult<Vec<usize>> {
    only_group
        .iter()
        .map(|&number| {
            if number == 0 || number > num_groups {
                Err(PartitionError::InvalidConfiguration(format!(
                    "group {} does not exist, there are {} groups",
                    number, num_groups
                )))
            } else {
                Ok(number - 1)
            }
        })
        .collect()
}

/// Coordinates one run: partition, execute, aggregate, report.
pub struct Orchestrator {
    framework: Box<dyn TestFramework>,
    partition: PartitionOptions,
    options: RunOptions,
    output: Arc<OutputSerializer>,
    reporter: Arc<dyn Reporter>,
}

impl Orchestrator {
    /// Creates an orchestrator writing to stdout with no reporter.
    ///
    /// If `partition.runtime_log` is unset, the framework's default log
    /// location is used.
    pub fn new(
        framework: Box<dyn TestFramework>,
        partition: PartitionOptions,
        options: RunOptions,
    ) -> Self {
        Self {
            framework,
            partition,
            options,
            output: Arc::new(OutputSerializer::stdout(0)),
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_output(mut self, output: Arc<OutputSerializer>) -> Self {
        self.output = output;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn framework(&self) -> &dyn TestFramework {
        self.framework.as_ref()
    }

    /// The runtime log consulted when partitioning.
    pub fn runtime_log(&self) -> PathBuf {
        self.partition
            .runtime_log
            .clone()
            .unwrap_or_else(|| self.framework.runtime_log())
    }

    fn executor(&self) -> Executor {
        Executor::new(self.options.clone())
            .with_output(Arc::clone(&self.output))
            .with_reporter(Arc::clone(&self.reporter))
    }

    /// Partitions `files` into `num_processes` groups without running them.
    pub fn groups(&self, files: &[String], num_processes: usize) -> PartitionResult<Vec<Group>> {
        let options = PartitionOptions {
            runtime_log: Some(self.runtime_log()),
            ..self.partition.clone()
        };
        partition::partition(files, num_processes, &options)
    }

    /// Runs `files` in `num_processes` groups.
    ///
    /// `only_group` holds 1-based group numbers; when given, only those
    /// groups run but every group keeps the identity it has in the full
    /// partition.
    ///
    /// # Errors
    ///
    /// Fails before spawning anything if partitioning fails or a selected
    /// group doesn't exist. Failing test processes are not errors, see
    /// [`RunResult::success`].
    pub async fn run(
        &self,
        files: &[String],
        num_processes: usize,
        only_group: Option<&[usize]>,
    ) -> anyhow::Result<RunResult> {
        let start = Instant::now();

        let groups = self.groups(files, num_processes)?;
        let selected = only_group
            .map(|only| select_groups(only, groups.len()))
            .transpose()?;

        if files.is_empty() {
            warn!("No test files found");
        }

        let (running, running_files) = match &selected {
            Some(indices) => (
                indices.len(),
                indices.iter().map(|&i| groups[i].len()).sum(),
            ),
            None => (groups.len(), files.len()),
        };
        debug!(
            "Running {} {}s in {} processes",
            running_files,
            self.framework.noun(),
            running
        );
        self.reporter.on_run_start(running, running_files).await;

        let results = self
            .executor()
            .run_all(&groups, selected.as_deref(), |group, context| {
                self.framework.build_command(group, context)
            })
            .await;

        let report = FinalReport::build(
            &results,
            |line| self.framework.is_result_line(line),
            &self.framework.summary_style(),
            start.elapsed(),
        );

        self.finish(groups.len(), results, report).await
    }

    /// Runs `command` once per process, each with its own identity.
    ///
    /// `only_group` selects 1-based process numbers as in [`run`](Self::run).
    pub async fn exec(
        &self,
        command: &str,
        num_processes: usize,
        only_group: Option<&[usize]>,
    ) -> anyhow::Result<RunResult> {
        let start = Instant::now();

        if num_processes == 0 {
            return Err(PartitionError::InvalidConfiguration(
                "number of processes must be at least 1".to_string(),
            )
            .into());
        }
        let indices = match only_group {
            Some(only) => select_groups(only, num_processes)?,
            None => (0..num_processes).collect(),
        };

        let executor = self.executor();
        let jobs = indices
            .iter()
            .map(|&i| Job {
                context: executor.context(i, num_processes),
                command: Some(command.to_string()),
            })
            .collect();

        self.reporter.on_run_start(indices.len(), 0).await;
        let results = executor.run_commands(jobs).await;

        let report = FinalReport::build(&results, |_| false, &SummaryStyle::Flat, start.elapsed());
        self.finish(num_processes, results, report).await
    }

    async fn finish(
        &self,
        num_processes: usize,
        results: Vec<ProcessResult>,
        report: FinalReport,
    ) -> anyhow::Result<RunResult> {
        let result = RunResult {
            num_processes,
            first_is_one: self.options.first_is_one,
            results,
            report,
        };

        self.reporter.on_run_complete(&result).await;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenericFrameworkConfig;
    use crate::executor::OutputMode;
    use crate::framework::generic::GenericFramework;
    use crate::partition::GroupBy;

    fn orchestrator(command: &str) -> Orchestrator {
        let framework = GenericFramework::new(&GenericFrameworkConfig {
            command: command.to_string(),
            ..Default::default()
        })
        .unwrap();

        Orchestrator::new(
            Box::new(framework),
            PartitionOptions {
                group_by: GroupBy::Found,
                ..Default::default()
            },
            RunOptions {
                output: OutputMode::Silent,
                ..Default::default()
            },
        )
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_select_groups() {
        assert_eq!(select_groups(&[1, 3], 3).unwrap(), vec![0, 2]);
        assert!(select_groups(&[0], 3).is_err());
        assert!(select_groups(&[4], 3).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_aggregates_groups() {
        let orchestrator = orchestrator(r#"sh -c 'echo "$# tests, 0 failures"' sh {files}"#);

        let result = orchestrator
            .run(&files(&["a", "b", "c", "d", "e"]), 2, None)
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.report.summary.as_deref(), Some("0 failures, 5 tests"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_any_failing_group_fails_the_run() {
        let orchestrator = orchestrator(r#"case "{files}" in *b*) exit 2;; esac; echo {files}"#);

        let result = orchestrator
            .run(&files(&["a", "b", "c"]), 3, None)
            .await
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.exit_code(), 1);
        assert_eq!(result.failed_groups().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_only_group_out_of_range_spawns_nothing() {
        let orchestrator = orchestrator("touch should-not-exist {files}");

        let err = orchestrator
            .run(&files(&["a", "b"]), 2, Some(&[3]))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("group 3 does not exist"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_only_group_runs_selected_groups() {
        let orchestrator = orchestrator("echo $TEST_ENV_NUMBER {files}");

        let result = orchestrator
            .run(&files(&["a", "b", "c"]), 3, Some(&[2]))
            .await
            .unwrap();

        assert_eq!(result.num_processes, 3);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].stdout, "2 b\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_more_processes_than_files() {
        let orchestrator = orchestrator("echo {files}");

        let result = orchestrator.run(&files(&["a"]), 3, None).await.unwrap();

        assert!(result.success());
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.results[1].command, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_sets_identity() {
        let orchestrator = orchestrator("true");

        let result = orchestrator
            .exec("echo \"[$TEST_ENV_NUMBER/$PARALLEL_TEST_GROUPS]\"", 3, None)
            .await
            .unwrap();

        let outputs: Vec<&str> = result.results.iter().map(|r| r.stdout.as_str()).collect();
        assert_eq!(outputs, vec!["[/3]\n", "[2/3]\n", "[3/3]\n"]);
        assert!(result.success());
        assert_eq!(result.report.summary, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_rejects_zero_processes() {
        assert!(orchestrator("true").exec("true", 0, None).await.is_err());
    }
}
