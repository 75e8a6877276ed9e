//! Running a single group's subprocess.
//!
//! The command runs through the configured shell with the group's identity
//! variables set. Stdout is drained line by line and echoed according to the
//! [`OutputMode`]; the child is killed if the batch is cancelled or runs
//! past its deadline.

use std::process::Stdio;

use futures::{Stream, StreamExt, stream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Job, OutputMode, ProcessResult, RunOptions};
use crate::output::OutputSerializer;

/// Status reported when the subprocess could not be started.
pub const SPAWN_FAILED: i32 = 127;

/// Status reported when the batch deadline killed the subprocess.
pub const TIMED_OUT: i32 = 124;

/// Status reported when fail-fast cancelled the subprocess.
pub const CANCELLED: i32 = 130;

enum Interrupt {
    Cancelled,
    TimedOut,
}

impl Interrupt {
    fn status(&self) -> i32 {
        match self {
            Interrupt::Cancelled => CANCELLED,
            Interrupt::TimedOut => TIMED_OUT,
        }
    }
}

/// Wraps `command` for the shell according to `options`.
///
/// ```text
/// nice:           nice /bin/sh -c '<command>'
/// combine_stderr: { <command>
///                 } 2>&1
/// ```
pub fn shell_command(command: &str, options: &RunOptions) -> String {
    let mut cmd = command.to_string();
    if options.nice {
        cmd = format!(
            "nice {} -c {}",
            shell_words::quote(&options.shell),
            shell_words::quote(&cmd)
        );
    }
    if options.combine_stderr {
        cmd = format!("{{ {}\n}} 2>&1", cmd);
    }
    cmd
}

/// A failed result carrying whatever output was captured.
pub(crate) fn failed(job: &Job, stdout: String, exit_status: i32) -> ProcessResult {
    ProcessResult {
        process_index: job.context.process_index,
        command: job.command.clone(),
        stdout,
        exit_status,
        duration: std::time::Duration::ZERO,
    }
}

/// Runs `job` to completion and captures its output and exit status.
pub async fn run(
    job: &Job,
    options: &RunOptions,
    output: &OutputSerializer,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> ProcessResult {
    let Some(command) = &job.command else {
        return ProcessResult::empty(job.context.process_index);
    };
    let index = job.context.process_index;
    let start = Instant::now();

    if cancel.is_cancelled() {
        return failed(job, String::new(), CANCELLED);
    }

    let mut process = tokio::process::Command::new(&options.shell);
    process.arg("-c").arg(shell_command(command, options));

    if let Some(dir) = &options.working_dir {
        process.current_dir(dir);
    }
    for (key, value) in job.context.environment() {
        process.env(key, value);
    }

    process.stdout(Stdio::piped());
    process.stderr(Stdio::inherit());
    process.kill_on_drop(true);

    debug!("Process {}: {}", index, command);

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to start process {}: {}", index, e);
            return failed(job, String::new(), SPAWN_FAILED);
        }
    };

    let Some(stdout) = child.stdout.take() else {
        warn!("Process {}: stdout not captured", index);
        let _ = child.kill().await;
        return failed(job, String::new(), SPAWN_FAILED);
    };

    let mut lines = Box::pin(lossy_lines(BufReader::new(stdout)));
    let mut captured = String::new();

    let interrupted = loop {
        select! {
            _ = cancel.cancelled() => break Some(Interrupt::Cancelled),
            _ = deadline_reached(deadline) => break Some(Interrupt::TimedOut),
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    captured.push_str(&line);
                    captured.push('\n');
                    match options.output {
                        OutputMode::Stream => output.print_line(&line),
                        OutputMode::Rewrite => output.rewrite(&captured, index),
                        OutputMode::Serialize | OutputMode::Silent => {}
                    }
                }
                Some(Err(e)) => {
                    warn!("Process {}: stopped reading output: {}", index, e);
                    break None;
                }
                None => break None,
            }
        }
    };
    // Close the pipe so a child still writing gets EPIPE instead of blocking.
    drop(lines);

    let exit_status = match interrupted {
        Some(reason) => {
            warn!("Process {} interrupted, killing it", index);
            let _ = child.kill().await;
            reason.status()
        }
        None => {
            let waited = select! {
                _ = cancel.cancelled() => Err(Interrupt::Cancelled),
                _ = deadline_reached(deadline) => Err(Interrupt::TimedOut),
                status = child.wait() => Ok(status),
            };
            match waited {
                Ok(Ok(status)) => exit_code(status),
                Ok(Err(e)) => {
                    warn!("Failed to wait for process {}: {}", index, e);
                    SPAWN_FAILED
                }
                Err(reason) => {
                    let _ = child.kill().await;
                    reason.status()
                }
            }
        }
    };

    if options.output == OutputMode::Serialize {
        output.print_completed(&captured);
    }

    ProcessResult {
        process_index: index,
        command: job.command.clone(),
        stdout: captured,
        exit_status,
        duration: start.elapsed(),
    }
}

/// Lines of `reader` up to EOF, decoded lossily.
///
/// Test output is not always valid UTF-8, so bytes are split on `\n` and
/// invalid sequences become U+FFFD rather than ending the stream. The
/// stream ends early only on an I/O error, which is yielded once.
fn lossy_lines<R>(reader: R) -> impl Stream<Item = std::io::Result<String>>
where
    R: AsyncBufRead + Unpin,
{
    stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::executor::ExecutionContext;
    use crate::output::test_support::SharedBuffer;

    fn job(command: &str) -> Job {
        Job {
            context: ExecutionContext::new(0, 1),
            command: Some(command.to_string()),
        }
    }

    async fn run_with(command: &str, mode: OutputMode, buffer: &SharedBuffer) -> ProcessResult {
        let options = RunOptions {
            output: mode,
            ..Default::default()
        };
        let output = OutputSerializer::new(1, Box::new(buffer.clone()));
        let job = job(command);
        let cancel = CancellationToken::new();
        let running = run(&job, &options, &output, &cancel, None);

        tokio::time::timeout(Duration::from_secs(60), running)
            .await
            .expect("process did not finish")
    }

    #[test]
    fn test_shell_command_plain() {
        assert_eq!(
            shell_command("rspec a_spec.rb", &RunOptions::default()),
            "rspec a_spec.rb"
        );
    }

    #[test]
    fn test_shell_command_nice_and_combined() {
        let options = RunOptions {
            nice: true,
            combine_stderr: true,
            ..Default::default()
        };
        assert_eq!(
            shell_command("rspec a_spec.rb", &options),
            "{ nice /bin/sh -c 'rspec a_spec.rb'\n} 2>&1"
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_following_output() {
        let buffer = SharedBuffer::default();
        let result = run_with(
            "printf 'bad \\377 byte\\n'; echo '1 example, 0 failures'",
            OutputMode::Silent,
            &buffer,
        )
        .await;

        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout, "bad \u{FFFD} byte\n1 example, 0 failures\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_then_large_output_is_drained() {
        let buffer = SharedBuffer::default();
        let result = run_with(
            "printf '\\377\\n'; yes | head -c 200000; echo done",
            OutputMode::Silent,
            &buffer,
        )
        .await;

        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout.lines().filter(|l| *l == "y").count(), 100_000);
        assert!(result.stdout.ends_with("done\n"));
    }

    #[tokio::test]
    async fn test_stream_mode_prints_every_line() {
        let buffer = SharedBuffer::default();
        let result = run_with("seq 1 20000", OutputMode::Stream, &buffer).await;

        let expected: String = (1..=20000).map(|i| format!("{}\n", i)).collect();
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout, expected);
        assert_eq!(buffer.contents(), expected);
    }

    #[tokio::test]
    async fn test_crlf_line_endings_are_trimmed() {
        let buffer = SharedBuffer::default();
        let result = run_with("printf 'one\\r\\ntwo'", OutputMode::Silent, &buffer).await;

        assert_eq!(result.stdout, "one\ntwo\n");
    }
}
