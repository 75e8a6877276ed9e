//! partest CLI - run a test suite in parallel worker processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, debug};
use tracing_subscriber::FmtSubscriber;

use partest::config::{self, Config, PartestConfig};
use partest::discovery::{DiscoveryOptions, find_tests};
use partest::executor::{OutputMode, RunOptions};
use partest::framework::{self, TestFramework};
use partest::orchestrator::Orchestrator;
use partest::output::OutputSerializer;
use partest::partition::{GroupBy, PartitionOptions, PinSet, PinnedPattern};
use partest::report::{ConsoleReporter, MultiReporter};

#[derive(Parser)]
#[command(name = "partest")]
#[command(about = "Run a test suite in parallel worker processes", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: partest.toml, if present]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output: debug logging and the command of every group
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests
    Run {
        #[command(flatten)]
        suite: SuiteArgs,

        #[command(flatten)]
        execution: ExecutionArgs,

        /// Only run these groups (1-based, comma separated)
        #[arg(long, value_delimiter = ',')]
        only_group: Vec<usize>,
    },

    /// Show how files would be grouped, without running anything
    Groups {
        #[command(flatten)]
        suite: SuiteArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one command in every process, each with its own TEST_ENV_NUMBER
    Exec {
        /// Number of processes [default: number of CPUs]
        #[arg(short = 'n', long)]
        processes: Option<usize>,

        /// Only run these processes (1-based, comma separated)
        #[arg(long, value_delimiter = ',')]
        only_group: Vec<usize>,

        #[command(flatten)]
        execution: ExecutionArgs,

        /// Shell command to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Test framework (rspec, cucumber, test, generic)
        #[arg(short = 't', long = "type", default_value = "rspec")]
        framework: String,
    },
}

/// Which files to run and how to group them.
#[derive(Args)]
struct SuiteArgs {
    /// Test files or directories [default: the framework's test directory]
    files: Vec<PathBuf>,

    /// Number of processes [default: number of CPUs]
    #[arg(short = 'n', long)]
    processes: Option<usize>,

    /// Test framework (rspec, cucumber, test, generic)
    #[arg(short = 't', long = "type")]
    framework: Option<String>,

    /// Group by found, filesize, runtime or default
    #[arg(long)]
    group_by: Option<GroupBy>,

    /// Runtime log to balance by
    #[arg(long)]
    runtime_log: Option<PathBuf>,

    /// With --group-by runtime, fail if more than this percentage of files
    /// has no recorded runtime
    #[arg(long)]
    allowed_missing: Option<f64>,

    /// Only run files matching this regex
    #[arg(short, long)]
    pattern: Option<String>,

    /// Skip files matching this regex
    #[arg(long)]
    exclude_pattern: Option<String>,

    /// Run files matching this regex in one shared process (repeatable)
    #[arg(short, long)]
    single: Vec<String>,

    /// Run --single files in processes of their own
    #[arg(short, long)]
    isolate: bool,

    /// Options passed through to the test framework
    #[arg(short = 'o', long)]
    test_options: Option<String>,
}

/// How subprocesses are run.
#[derive(Args)]
struct ExecutionArgs {
    /// Output mode (stream, serialize, rewrite, silent)
    #[arg(long)]
    output: Option<String>,

    /// Print each process's output in one piece when it finishes
    #[arg(long, conflicts_with = "output")]
    serialize_stdout: bool,

    /// Run processes with a lower priority
    #[arg(long)]
    nice: bool,

    /// Capture stderr together with stdout
    #[arg(long)]
    combine_stderr: bool,

    /// Number the first process 1 instead of leaving it blank
    #[arg(long)]
    first_is_one: bool,

    /// Stop all processes as soon as one fails
    #[arg(long)]
    fail_fast: bool,

    /// Kill processes still running after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with test output
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            suite,
            execution,
            only_group,
        } => run_tests(cli.config.as_deref(), suite, execution, only_group, cli.verbose).await,
        Commands::Groups { suite, format } => show_groups(cli.config.as_deref(), suite, &format),
        Commands::Exec {
            processes,
            only_group,
            execution,
            command,
        } => {
            exec_command(
                cli.config.as_deref(),
                processes,
                only_group,
                execution,
                &command.join(" "),
                cli.verbose,
            )
            .await
        }
        Commands::Validate => validate_config(cli.config.as_deref()),
        Commands::Init { framework } => init_config(&framework),
    }
}

async fn run_tests(
    config_path: Option<&Path>,
    suite: SuiteArgs,
    execution: ExecutionArgs,
    only_group: Vec<usize>,
    verbose: bool,
) -> Result<()> {
    let mut config = config::load_or_default(config_path)?;
    apply_suite_args(&mut config, &suite)?;
    apply_execution_args(&mut config.partest, &execution)?;

    let framework = framework::create(&config.framework)?;
    let files = discover(&config.partest, framework.as_ref(), &suite.files)?;
    let num_processes = num_processes(&config.partest);

    let output = Arc::new(OutputSerializer::stdout(num_processes));
    let reporter = create_reporter(&config.partest, framework.as_ref(), &output, verbose);

    let orchestrator = Orchestrator::new(
        framework,
        partition_options(&config.partest)?,
        run_options(&config.partest),
    )
    .with_output(output)
    .with_reporter(Arc::new(reporter));

    let only = (!only_group.is_empty()).then_some(only_group.as_slice());
    let result = orchestrator.run(&files, num_processes, only).await?;
    std::process::exit(result.exit_code());
}

fn show_groups(config_path: Option<&Path>, suite: SuiteArgs, format: &str) -> Result<()> {
    let mut config = config::load_or_default(config_path)?;
    apply_suite_args(&mut config, &suite)?;

    let framework = framework::create(&config.framework)?;
    let files = discover(&config.partest, framework.as_ref(), &suite.files)?;
    let num_processes = num_processes(&config.partest);

    let orchestrator = Orchestrator::new(
        framework,
        partition_options(&config.partest)?,
        run_options(&config.partest),
    );
    let groups = orchestrator.groups(&files, num_processes)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&groups)?;
            println!("{}", json);
        }
        _ => {
            for (i, group) in groups.iter().enumerate() {
                println!(
                    "Group {} ({} files, cost {:.2}):",
                    i + 1,
                    group.len(),
                    group.total_cost
                );
                for path in group.paths() {
                    println!("  {}", path);
                }
            }
        }
    }

    Ok(())
}

async fn exec_command(
    config_path: Option<&Path>,
    processes: Option<usize>,
    only_group: Vec<usize>,
    execution: ExecutionArgs,
    command: &str,
    verbose: bool,
) -> Result<()> {
    let mut config = config::load_or_default(config_path)?;
    if processes.is_some() {
        config.partest.processes = processes;
    }
    apply_execution_args(&mut config.partest, &execution)?;

    let framework = framework::create(&config.framework)?;
    let num_processes = num_processes(&config.partest);

    let output = Arc::new(OutputSerializer::stdout(num_processes));
    let reporter = create_reporter(&config.partest, framework.as_ref(), &output, verbose);

    let orchestrator = Orchestrator::new(
        framework,
        PartitionOptions::default(),
        run_options(&config.partest),
    )
    .with_output(output)
    .with_reporter(Arc::new(reporter));

    let only = (!only_group.is_empty()).then_some(only_group.as_slice());
    let result = orchestrator.exec(command, num_processes, only).await?;
    std::process::exit(result.exit_code());
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let checked = config::load_or_default(config_path).and_then(|config| {
        framework::create(&config.framework)?;
        partition_options(&config.partest)?;
        for pattern in [&config.partest.pattern, &config.partest.exclude_pattern]
            .into_iter()
            .flatten()
        {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid file pattern: {}", pattern))?;
        }
        Ok(config)
    });

    match checked {
        Ok(config) => {
            let partest = &config.partest;
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Processes: {}", num_processes(partest));
            println!("  Group by: {}", partest.group_by);
            println!("  Output: {:?}", partest.output);
            if let Some(timeout) = partest.timeout_secs {
                println!("  Timeout: {}s", timeout);
            }
            if !partest.single.is_empty() {
                println!(
                    "  Single: {}{}",
                    partest.single.join(", "),
                    if partest.isolate { " (isolated)" } else { "" }
                );
            }
            println!("  Framework: {}", config.framework.kind());

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(framework: &str) -> Result<()> {
    let framework_config = match framework {
        "rspec" => {
            r#"[framework]
type = "rspec"
# command = "bin/rspec"
# test_options = "--format progress""#
        }
        "cucumber" => {
            r#"[framework]
type = "cucumber"
# test_options = "--format progress""#
        }
        "test" => {
            r#"[framework]
type = "test""#
        }
        "generic" => {
            r#"[framework]
type = "generic"
command = "./run-tests {options} {files}"
file_pattern = "_test\\.sh$"
result_pattern = "\\d+ tests?, \\d+ failures?""#
        }
        _ => {
            eprintln!(
                "Unknown framework: {}. Use: rspec, cucumber, test, generic",
                framework
            );
            std::process::exit(1);
        }
    };

    let config = format!(
        r#"# partest configuration file

[partest]
# processes = 4
group_by = "default"
# runtime_log = "tmp/parallel_runtime_rspec.log"
# single = ["spec/features/"]
# isolate = false
output = "stream"

[partest.env]
# RAILS_ENV = "test"

{}
"#,
        framework_config
    );

    let path = PathBuf::from(config::DEFAULT_CONFIG_FILE);
    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            config::DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created {}", config::DEFAULT_CONFIG_FILE);
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  partest run");

    Ok(())
}

fn apply_suite_args(config: &mut Config, suite: &SuiteArgs) -> Result<()> {
    if let Some(name) = &suite.framework {
        config.framework = std::mem::take(&mut config.framework).select(name)?;
    }
    if let Some(options) = &suite.test_options {
        config.framework.set_test_options(options.clone());
    }

    let partest = &mut config.partest;
    if suite.processes.is_some() {
        partest.processes = suite.processes;
    }
    if let Some(group_by) = suite.group_by {
        partest.group_by = group_by;
    }
    if suite.runtime_log.is_some() {
        partest.runtime_log = suite.runtime_log.clone();
    }
    if suite.allowed_missing.is_some() {
        partest.allowed_missing_percent = suite.allowed_missing;
    }
    if suite.pattern.is_some() {
        partest.pattern = suite.pattern.clone();
    }
    if suite.exclude_pattern.is_some() {
        partest.exclude_pattern = suite.exclude_pattern.clone();
    }
    if !suite.single.is_empty() {
        partest.single = suite.single.clone();
    }
    partest.isolate |= suite.isolate;

    Ok(())
}

fn apply_execution_args(partest: &mut PartestConfig, execution: &ExecutionArgs) -> Result<()> {
    if let Some(mode) = &execution.output {
        partest.output = parse_output_mode(mode)?;
    }
    if execution.serialize_stdout {
        partest.output = OutputMode::Serialize;
    }
    partest.nice |= execution.nice;
    partest.combine_stderr |= execution.combine_stderr;
    partest.first_is_one |= execution.first_is_one;
    partest.fail_fast |= execution.fail_fast;
    if execution.timeout.is_some() {
        partest.timeout_secs = execution.timeout;
    }
    Ok(())
}

fn parse_output_mode(mode: &str) -> Result<OutputMode> {
    Ok(match mode {
        "stream" => OutputMode::Stream,
        "serialize" => OutputMode::Serialize,
        "rewrite" => OutputMode::Rewrite,
        "silent" => OutputMode::Silent,
        other => bail!(
            "Unknown output mode: {}. Use: stream, serialize, rewrite, silent",
            other
        ),
    })
}

fn num_processes(partest: &PartestConfig) -> usize {
    partest.processes.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

fn discover(
    partest: &PartestConfig,
    framework: &dyn TestFramework,
    files: &[PathBuf],
) -> Result<Vec<String>> {
    let paths = if !files.is_empty() {
        files.to_vec()
    } else if !partest.paths.is_empty() {
        partest.paths.clone()
    } else {
        framework.default_paths()
    };
    debug!("Searching for tests in {:?}", paths);

    let options = DiscoveryOptions::new(framework.file_pattern().clone())
        .with_include(partest.pattern.as_deref())?
        .with_exclude(partest.exclude_pattern.as_deref())?;

    Ok(find_tests(&paths, &options)?)
}

fn partition_options(partest: &PartestConfig) -> Result<PartitionOptions> {
    let patterns = partest
        .single
        .iter()
        .map(|p| PinnedPattern::new(p))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PartitionOptions {
        group_by: partest.group_by,
        runtime_log: partest.runtime_log.as_deref().map(config::expand_path),
        allowed_missing_percent: partest.allowed_missing_percent,
        pins: PinSet::new(patterns, partest.isolate),
    })
}

fn run_options(partest: &PartestConfig) -> RunOptions {
    RunOptions {
        shell: partest.shell.clone(),
        working_dir: partest.working_dir.as_deref().map(config::expand_path),
        env: partest.env.clone(),
        nice: partest.nice,
        combine_stderr: partest.combine_stderr,
        output: partest.output,
        first_is_one: partest.first_is_one,
        fail_fast: partest.fail_fast,
        timeout: partest.timeout_secs.map(Duration::from_secs),
    }
}

fn create_reporter(
    partest: &PartestConfig,
    framework: &dyn TestFramework,
    output: &Arc<OutputSerializer>,
    verbose: bool,
) -> MultiReporter {
    MultiReporter::new().with_reporter(ConsoleReporter::new(
        Arc::clone(output),
        framework.noun(),
        partest.output,
        verbose,
    ))
}
