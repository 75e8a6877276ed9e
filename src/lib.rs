//! partest: run a test suite in parallel worker processes.
//!
//! Test files are split into balanced groups, using recorded runtimes when
//! enough are known and file sizes otherwise. Each group runs in its own
//! subprocess, identified through `TEST_ENV_NUMBER` so tests can pick
//! distinct databases or ports. Outputs are kept from interleaving, and the
//! result lines of every group are summed into one report.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Runtime**: recorded per-file runtimes ([`runtime::RuntimeLog`])
//! - **Partition**: cost assignment and bin-packing into groups ([`partition`])
//! - **Executor**: one subprocess per group ([`executor::Executor`])
//! - **Output**: non-interleaved terminal output ([`output::OutputSerializer`])
//! - **Report**: summing result lines and presenting them ([`report`])
//! - **Framework**: per-tool command lines and result lines ([`framework`])
//!
//! # Example
//!
//! ```no_run
//! use partest::config::load_config;
//! use partest::executor::RunOptions;
//! use partest::framework;
//! use partest::orchestrator::Orchestrator;
//! use partest::partition::PartitionOptions;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("partest.toml"))?;
//!     let framework = framework::create(&config.framework)?;
//!
//!     let orchestrator = Orchestrator::new(framework, PartitionOptions::default(), RunOptions::default());
//!     let result = orchestrator.run(&["spec/a_spec.rb".to_string()], 1, None).await?;
//!
//!     std::process::exit(result.exit_code());
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod executor;
pub mod framework;
pub mod orchestrator;
pub mod output;
pub mod partition;
pub mod report;
pub mod runtime;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use executor::{ExecutionContext, Executor, OutputMode, ProcessResult, RunOptions};
pub use framework::{FrameworkKind, TestFramework};
pub use orchestrator::{Orchestrator, RunResult};
pub use partition::{Group, GroupBy, PartitionError, PartitionOptions, TestItem, partition};
pub use report::{FinalReport, Reporter};
pub use runtime::RuntimeLog;
