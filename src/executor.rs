//! Concurrent execution of test groups as subprocesses.
//!
//! The executor launches one subprocess per group, all at once, and waits
//! for every one of them. Concurrency is exactly the number of groups being
//! run: the partitioner already decided how much parallelism there is.
//!
//! ```text
//!   Vec<Group> ──► Job { ExecutionContext, command } ──► process::run ──► ProcessResult
//!                        │                                   │
//!                        │ TEST_ENV_NUMBER                   │ OutputSerializer
//!                        │ PARALLEL_TEST_GROUPS              ▼
//!                        ▼                                terminal
//!                  child environment
//! ```
//!
//! Failures to spawn or a killed child never surface as errors. They come
//! back as a [`ProcessResult`] with a non-zero exit status so one broken
//! group cannot stop the others from being collected.

pub mod process;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::output::OutputSerializer;
use crate::partition::Group;
use crate::report::{NullReporter, Reporter};

/// Variable carrying the per-process identity.
pub const ENV_NUMBER_VAR: &str = "TEST_ENV_NUMBER";

/// Variable carrying the total number of processes in this invocation.
pub const GROUP_COUNT_VAR: &str = "PARALLEL_TEST_GROUPS";

/// Returns the identity string for `process_index`.
///
/// Index 0 maps to `""` and index `n >= 1` maps to `n + 1`, so identity
/// `"1"` is never handed out. With `first_is_one`, index 0 maps to `"1"`.
///
/// ```
/// use partest::executor::env_number;
///
/// assert_eq!(env_number(0, false), "");
/// assert_eq!(env_number(1, false), "2");
/// assert_eq!(env_number(0, true), "1");
/// ```
pub fn env_number(process_index: usize, first_is_one: bool) -> String {
    if process_index == 0 && !first_is_one {
        String::new()
    } else {
        (process_index + 1).to_string()
    }
}

/// Identity and environment of one subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Zero-based index of the group in the full partition.
    pub process_index: usize,

    /// Total number of groups in the partition, even when only some run.
    pub num_processes: usize,

    /// Extra variables merged into the inherited environment.
    pub env_overrides: BTreeMap<String, String>,

    pub first_is_one: bool,
}

impl ExecutionContext {
    pub fn new(process_index: usize, num_processes: usize) -> Self {
        Self {
            process_index,
            num_processes,
            env_overrides: BTreeMap::new(),
            first_is_one: false,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env_overrides = env;
        self
    }

    pub fn with_first_is_one(mut self, first_is_one: bool) -> Self {
        self.first_is_one = first_is_one;
        self
    }

    /// The value of [`ENV_NUMBER_VAR`] for this process.
    pub fn env_number(&self) -> String {
        env_number(self.process_index, self.first_is_one)
    }

    /// Variables to set on the child, overrides first so the identity
    /// variables always win.
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .env_overrides
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push((ENV_NUMBER_VAR.to_string(), self.env_number()));
        env.push((GROUP_COUNT_VAR.to_string(), self.num_processes.to_string()));
        env
    }
}

/// Outcome of one subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub process_index: usize,

    /// The command that ran, `None` for a group with no files.
    pub command: Option<String>,

    /// Captured stdout (with stderr when combined).
    pub stdout: String,

    pub exit_status: i32,

    pub duration: Duration,
}

impl ProcessResult {
    /// The result of a group with nothing to run.
    pub fn empty(process_index: usize) -> Self {
        Self {
            process_index,
            command: None,
            stdout: String::new(),
            exit_status: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// How subprocess output reaches the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Echo each complete line as it arrives.
    #[default]
    Stream,
    /// Print each group's output in one piece once it completes.
    Serialize,
    /// Keep a live display with one block per group.
    Rewrite,
    /// Print nothing while running, then every group's output in group
    /// order once the whole batch completes.
    Silent,
}

/// Settings shared by every subprocess of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Shell used to run commands (`{shell} -c "{command}"`).
    pub shell: String,

    pub working_dir: Option<PathBuf>,

    /// Variables merged into every child's environment.
    pub env: BTreeMap<String, String>,

    /// Run children under `nice`.
    pub nice: bool,

    /// Redirect stderr into the captured stdout.
    pub combine_stderr: bool,

    pub output: OutputMode,

    pub first_is_one: bool,

    /// Stop all groups once one fails.
    pub fail_fast: bool,

    /// Wall-clock cap for the whole batch.
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            nice: false,
            combine_stderr: false,
            output: OutputMode::default(),
            first_is_one: false,
            fail_fast: false,
            timeout: None,
        }
    }
}

/// A subprocess to launch: its identity and its command, if any.
#[derive(Debug, Clone)]
pub struct Job {
    pub context: ExecutionContext,
    pub command: Option<String>,
}

/// Launches groups as concurrent subprocesses and collects their results.
pub struct Executor {
    options: RunOptions,
    output: Arc<OutputSerializer>,
    reporter: Arc<dyn Reporter>,
}

impl Executor {
    /// Creates an executor writing to stdout.
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            output: Arc::new(OutputSerializer::stdout(0)),
            reporter: Arc::new(NullReporter),
        }
    }

    /// Routes all subprocess output through `output`.
    pub fn with_output(mut self, output: Arc<OutputSerializer>) -> Self {
        self.output = output;
        self
    }

    /// Notifies `reporter` as groups start and complete.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Builds the context for group `process_index` of `num_processes`.
    pub fn context(&self, process_index: usize, num_processes: usize) -> ExecutionContext {
        ExecutionContext::new(process_index, num_processes)
            .with_env(self.options.env.clone())
            .with_first_is_one(self.options.first_is_one)
    }

    /// Runs every group, or only the zero-based indices in `only`.
    ///
    /// Selected groups keep their position in the full partition, so a
    /// group's identity is the same whichever subset is run. Results come
    /// back in the order the groups were selected.
    pub async fn run_all<F>(
        &self,
        groups: &[Group],
        only: Option<&[usize]>,
        command_for: F,
    ) -> Vec<ProcessResult>
    where
        F: Fn(&Group, &ExecutionContext) -> String,
    {
        let num_processes = groups.len();
        let indices: Vec<usize> = match only {
            Some(only) => only
                .iter()
                .copied()
                .filter(|&i| i < num_processes)
                .collect(),
            None => (0..num_processes).collect(),
        };

        let jobs = indices
            .into_iter()
            .map(|i| {
                let context = self.context(i, num_processes);
                let group = &groups[i];
                let command = if group.is_empty() {
                    None
                } else {
                    Some(command_for(group, &context))
                };
                Job { context, command }
            })
            .collect();

        self.run_commands(jobs).await
    }

    /// Runs `jobs` concurrently, one subprocess each.
    pub async fn run_commands(&self, jobs: Vec<Job>) -> Vec<ProcessResult> {
        if jobs.is_empty() {
            return Vec::new();
        }

        info!("Running {} processes", jobs.len());

        let cancel = CancellationToken::new();
        let deadline = self
            .options
            .timeout
            .map(|t| tokio::time::Instant::now() + t);
        let slots: Mutex<Vec<Option<ProcessResult>>> = Mutex::new(vec![None; jobs.len()]);

        // Scoped spawns so the tasks can borrow jobs and self.
        tokio_scoped::scope(|scope| {
            for (slot, job) in jobs.iter().enumerate() {
                let options = &self.options;
                let output = self.output.as_ref();
                let reporter = self.reporter.as_ref();
                let cancel = &cancel;
                let slots = &slots;

                scope.spawn(async move {
                    if let Some(command) = &job.command {
                        reporter.on_group_start(&job.context, command).await;
                    }

                    let result = process::run(job, options, output, cancel, deadline).await;

                    debug!(
                        "Process {} finished with status {} in {:?}",
                        job.context.process_index, result.exit_status, result.duration
                    );

                    if !result.success() && options.fail_fast && !cancel.is_cancelled() {
                        info!(
                            "Process {} failed, stopping remaining processes",
                            job.context.process_index
                        );
                        cancel.cancel();
                    }

                    reporter.on_group_complete(&result).await;

                    store(slots, slot, result);
                });
            }
        });

        let slots = slots.into_inner().unwrap_or_else(|e| e.into_inner());
        slots
            .into_iter()
            .zip(jobs.iter())
            .map(|(result, job)| {
                result.unwrap_or_else(|| process::failed(job, String::new(), process::SPAWN_FAILED))
            })
            .collect()
    }
}

/// Records `result` even if another task panicked while holding the lock.
fn store(slots: &Mutex<Vec<Option<ProcessResult>>>, slot: usize, result: ProcessResult) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    slots[slot] = Some(result);
}
