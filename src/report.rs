//! Run reporting.
//!
//! A [`Reporter`] is notified at the boundaries of a run: before any group
//! starts, as each group starts and completes, and once everything is done.
//! The executor calls it directly, so reporting needs no hooks inside the
//! test frameworks themselves.

pub mod summary;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::executor::{ENV_NUMBER_VAR, ExecutionContext, GROUP_COUNT_VAR, OutputMode, ProcessResult};
use crate::orchestrator::RunResult;
use crate::output::OutputSerializer;

pub use summary::{FinalReport, SummaryStyle};

/// Receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once groups are known, before anything is spawned.
    async fn on_run_start(&self, num_processes: usize, num_files: usize);

    /// Called right before a group's subprocess is spawned.
    async fn on_group_start(&self, context: &ExecutionContext, command: &str);

    /// Called when a group's subprocess has exited or been killed.
    async fn on_group_complete(&self, result: &ProcessResult);

    /// Called after every group has completed.
    async fn on_run_complete(&self, result: &RunResult);
}

/// A reporter that does nothing.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_start(&self, _num_processes: usize, _num_files: usize) {}
    async fn on_group_start(&self, _context: &ExecutionContext, _command: &str) {}
    async fn on_group_complete(&self, _result: &ProcessResult) {}
    async fn on_run_complete(&self, _result: &RunResult) {}
}

/// A reporter that forwards every event to several reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_run_start(&self, num_processes: usize, num_files: usize) {
        for reporter in &self.reporters {
            reporter.on_run_start(num_processes, num_files).await;
        }
    }

    async fn on_group_start(&self, context: &ExecutionContext, command: &str) {
        for reporter in &self.reporters {
            reporter.on_group_start(context, command).await;
        }
    }

    async fn on_group_complete(&self, result: &ProcessResult) {
        for reporter in &self.reporters {
            reporter.on_group_complete(result).await;
        }
    }

    async fn on_run_complete(&self, result: &RunResult) {
        for reporter in &self.reporters {
            reporter.on_run_complete(result).await;
        }
    }
}

/// Formats a command with the identity variables it ran with, so it can be
/// pasted into a shell to rerun that group alone.
pub fn rerun_line(env_number: &str, num_processes: usize, command: &str) -> String {
    format!(
        "{}={} {}={} {}",
        ENV_NUMBER_VAR,
        shell_words::quote(env_number),
        GROUP_COUNT_VAR,
        num_processes,
        command
    )
}

/// Terminal reporter: header, optional command echo, final summary.
///
/// All text goes through the run's [`OutputSerializer`] so it never lands
/// in the middle of a subprocess's line.
pub struct ConsoleReporter {
    output: Arc<OutputSerializer>,
    verbose: bool,
    noun: String,
    mode: OutputMode,
    progress: Mutex<Option<indicatif::ProgressBar>>,
}

impl ConsoleReporter {
    /// Creates a console reporter. `noun` names a test file in the header
    /// ("spec", "feature", "test").
    pub fn new(
        output: Arc<OutputSerializer>,
        noun: impl Into<String>,
        mode: OutputMode,
        verbose: bool,
    ) -> Self {
        Self {
            output,
            verbose,
            noun: noun.into(),
            mode,
            progress: Mutex::new(None),
        }
    }

    fn styled_summary(&self, report: &FinalReport, summary: &str) -> String {
        if report.count("failure") > 0 || report.count("failed") > 0 || report.count("error") > 0 {
            console::style(summary).red().to_string()
        } else if report.count("pending") > 0 || report.count("skipped") > 0 {
            console::style(summary).yellow().to_string()
        } else {
            console::style(summary).green().to_string()
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_start(&self, num_processes: usize, num_files: usize) {
        if num_files > 0 {
            let per_process = num_files / num_processes.max(1);
            self.output.print_line(&format!(
                "{} processes for {} {}s, ~ {} {}s per process",
                num_processes, num_files, self.noun, per_process, self.noun
            ));
        }

        if self.mode == OutputMode::Silent {
            let pb = indicatif::ProgressBar::new(num_processes as u64);
            pb.set_style(
                indicatif::ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} groups")
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            if let Ok(mut progress) = self.progress.lock() {
                *progress = Some(pb);
            }
        }
    }

    async fn on_group_start(&self, context: &ExecutionContext, command: &str) {
        if self.verbose {
            self.output.print_line(&rerun_line(
                &context.env_number(),
                context.num_processes,
                command,
            ));
        }
    }

    async fn on_group_complete(&self, _result: &ProcessResult) {
        if let Ok(progress) = self.progress.lock()
            && let Some(pb) = progress.as_ref()
        {
            pb.inc(1);
        }
    }

    async fn on_run_complete(&self, result: &RunResult) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }

        if self.mode == OutputMode::Silent {
            let mut outputs: Vec<&ProcessResult> = result.results.iter().collect();
            outputs.sort_by_key(|r| r.process_index);
            for r in outputs {
                self.output.print_completed(&r.stdout);
            }
        }

        let report = &result.report;
        self.output.print_line("");
        if let Some(summary) = &report.summary {
            for line in summary.lines() {
                self.output.print_line(&self.styled_summary(report, line));
            }
            self.output.print_line("");
        }
        self.output.print_line(&report.timing_line());

        if report.failed {
            self.output.print_line("");
            self.output
                .print_line(&console::style("Tests have failures.").red().bold().to_string());

            let failed: Vec<&ProcessResult> = result.failed_groups().collect();
            if !failed.is_empty() {
                self.output.print_line("Rerun failed groups with:");
                for r in failed {
                    if let Some(command) = &r.command {
                        let env_number =
                            crate::executor::env_number(r.process_index, result.first_is_one);
                        self.output.print_line(&format!(
                            "  {}",
                            rerun_line(&env_number, result.num_processes, command)
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_support::SharedBuffer;
    use std::time::Duration;

    fn run_result(results: Vec<ProcessResult>, summary: Option<&str>) -> RunResult {
        let failed = summary::any_failed(&results);
        RunResult {
            num_processes: 3,
            first_is_one: false,
            results,
            report: FinalReport {
                summary: summary.map(str::to_string),
                counts: Default::default(),
                failed,
                duration: Duration::from_secs(2),
            },
        }
    }

    fn process(index: usize, command: &str, exit_status: i32) -> ProcessResult {
        ProcessResult {
            process_index: index,
            command: Some(command.to_string()),
            stdout: String::new(),
            exit_status,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_rerun_line() {
        assert_eq!(
            rerun_line("", 4, "rspec a_spec.rb"),
            "TEST_ENV_NUMBER='' PARALLEL_TEST_GROUPS=4 rspec a_spec.rb"
        );
        assert_eq!(
            rerun_line("3", 4, "rspec b_spec.rb"),
            "TEST_ENV_NUMBER=3 PARALLEL_TEST_GROUPS=4 rspec b_spec.rb"
        );
    }

    #[tokio::test]
    async fn test_console_header_and_summary() {
        let buffer = SharedBuffer::default();
        let output = Arc::new(OutputSerializer::new(0, Box::new(buffer.clone())));
        let reporter = ConsoleReporter::new(output, "spec", OutputMode::Stream, false);

        reporter.on_run_start(2, 5).await;
        reporter
            .on_run_complete(&run_result(
                vec![process(0, "rspec a", 0), process(1, "rspec b", 0)],
                Some("5 examples, 0 failures"),
            ))
            .await;

        let contents = console::strip_ansi_codes(&buffer.contents()).to_string();
        assert!(contents.starts_with("2 processes for 5 specs, ~ 2 specs per process\n"));
        assert!(contents.contains("5 examples, 0 failures\n"));
        assert!(contents.contains("Took 2.00 seconds\n"));
        assert!(!contents.contains("Rerun"));
    }

    #[tokio::test]
    async fn test_console_lists_failed_groups() {
        let buffer = SharedBuffer::default();
        let output = Arc::new(OutputSerializer::new(0, Box::new(buffer.clone())));
        let reporter = ConsoleReporter::new(output, "spec", OutputMode::Stream, false);

        reporter
            .on_run_complete(&run_result(
                vec![
                    process(0, "rspec a", 0),
                    process(2, "rspec c", 1),
                    ProcessResult::empty(1),
                ],
                None,
            ))
            .await;

        let contents = console::strip_ansi_codes(&buffer.contents()).to_string();
        assert!(contents.contains("Tests have failures."));
        assert!(contents.contains("  TEST_ENV_NUMBER=3 PARALLEL_TEST_GROUPS=3 rspec c\n"));
        assert!(!contents.contains("rspec a"));
    }

    #[tokio::test]
    async fn test_silent_mode_prints_output_after_completion() {
        let buffer = SharedBuffer::default();
        let output = Arc::new(OutputSerializer::new(0, Box::new(buffer.clone())));
        let reporter = ConsoleReporter::new(output, "spec", OutputMode::Silent, false);

        let mut second = process(1, "rspec b", 1);
        second.stdout = "F\n1 example, 1 failure\n".to_string();
        let mut first = process(0, "rspec a", 0);
        first.stdout = ".\n1 example, 0 failures\n".to_string();

        reporter.on_group_complete(&second).await;
        reporter.on_group_complete(&first).await;
        assert_eq!(buffer.contents(), "");

        reporter
            .on_run_complete(&run_result(vec![second, first], Some("2 examples, 1 failure")))
            .await;

        let contents = console::strip_ansi_codes(&buffer.contents()).to_string();
        assert!(contents.starts_with(".\n1 example, 0 failures\nF\n1 example, 1 failure\n"));
        let summary_at = contents.find("2 examples, 1 failure").unwrap();
        assert!(summary_at > contents.find("F\n").unwrap());
    }

    #[tokio::test]
    async fn test_stream_mode_does_not_repeat_output() {
        let buffer = SharedBuffer::default();
        let output = Arc::new(OutputSerializer::new(0, Box::new(buffer.clone())));
        let reporter = ConsoleReporter::new(output, "spec", OutputMode::Stream, false);

        let mut result = process(0, "rspec a", 0);
        result.stdout = "already streamed\n".to_string();
        reporter.on_run_complete(&run_result(vec![result], None)).await;

        assert!(!buffer.contents().contains("already streamed"));
    }
}
