//! Partitioning test files into balanced groups.
//!
//! A partition turns a flat list of test file paths into exactly
//! `num_groups` groups, one per worker process. Each file is given a cost
//! (see [`cost`]) and the groups are filled by the packer (see [`packer`]).
//!
//! ```text
//!  paths ──► cost::assign ──► Vec<TestItem> ──► packer::pack ──► Vec<Group>
//!               ▲                                    ▲
//!          RuntimeLog                           PinSet (single/isolate)
//! ```
//!
//! # Example
//!
//! ```
//! use partest::partition::{Group, TestItem, packer::{pack, PinSet}};
//!
//! let items = vec![TestItem::new("a_spec.rb", 3.0), TestItem::new("b_spec.rb", 1.0)];
//! let groups = pack(items, 2, &PinSet::default());
//! assert_eq!(groups.len(), 2);
//! assert_eq!(groups[0].paths(), vec!["a_spec.rb"]);
//! ```

pub mod cost;
pub mod packer;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runtime::RuntimeLog;

pub use packer::{PinSet, PinnedPattern};

/// Result type for partitioning operations.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Errors raised while partitioning. All of them happen before any
/// subprocess is spawned.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Bad grouping mode, zero groups, or an invalid pattern.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A test file could not be sized.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Explicit runtime grouping was requested but the log is too sparse.
    #[error(
        "Runtime log {} does not contain sufficient data to sort {total} test files ({missing} missing), please update or remove it",
        .log.display()
    )]
    InsufficientRuntimeData {
        log: PathBuf,
        missing: usize,
        total: usize,
    },
}

/// A test file with its balancing cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestItem {
    pub path: String,
    pub cost: f64,
}

impl TestItem {
    pub fn new(path: impl Into<String>, cost: f64) -> Self {
        Self {
            path: path.into(),
            cost,
        }
    }
}

/// One group of test files, run by a single subprocess.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub items: Vec<TestItem>,
    pub total_cost: f64,
}

impl Group {
    /// Appends an item and accounts for its cost.
    pub(crate) fn push(&mut self, item: TestItem) {
        self.total_cost += item.cost;
        self.items.push(item);
    }

    /// Sorts items by path. Applied once packing is finished.
    pub(crate) fn sort_by_path(&mut self) {
        self.items.sort_by(|a, b| a.path.cmp(&b.path));
    }

    pub fn paths(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// How files are weighted before packing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// Uniform cost, round-robin in discovery order.
    Found,
    /// Cost is the file size in bytes.
    Filesize,
    /// Cost is the recorded runtime, 1 for unrecorded files.
    Runtime,
    /// Runtime when the log covers enough files, otherwise file size.
    #[default]
    Default,
}

impl FromStr for GroupBy {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "found" => Ok(Self::Found),
            "filesize" => Ok(Self::Filesize),
            "runtime" => Ok(Self::Runtime),
            "default" => Ok(Self::Default),
            other => Err(PartitionError::InvalidConfiguration(format!(
                "unsupported group-by mode '{}', expected one of: found, filesize, runtime, default",
                other
            ))),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Found => "found",
            Self::Filesize => "filesize",
            Self::Runtime => "runtime",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

/// Settings for one [`partition`] call.
#[derive(Debug, Clone, Default)]
pub struct PartitionOptions {
    pub group_by: GroupBy,

    /// Runtime log consulted by `runtime` and `default` grouping.
    pub runtime_log: Option<PathBuf>,

    /// Maximum share (0-100) of files allowed to lack a recorded runtime
    /// when `group_by` is explicitly `runtime`. `None` disables the check.
    pub allowed_missing_percent: Option<f64>,

    pub pins: PinSet,
}

/// Partitions `paths` into exactly `num_groups` groups.
///
/// # Errors
///
/// Fails if `num_groups` is zero, a file can't be sized, or the runtime
/// log is too sparse for explicit runtime grouping.
pub fn partition(
    paths: &[String],
    num_groups: usize,
    options: &PartitionOptions,
) -> PartitionResult<Vec<Group>> {
    if num_groups == 0 {
        return Err(PartitionError::InvalidConfiguration(
            "number of groups must be at least 1".to_string(),
        ));
    }

    let log = match (&options.runtime_log, options.group_by) {
        (Some(path), GroupBy::Runtime | GroupBy::Default) => RuntimeLog::load(path),
        _ => RuntimeLog::default(),
    };

    let mode = cost::resolve_mode(options.group_by, paths, &log);
    if options.group_by == GroupBy::Default {
        match mode {
            GroupBy::Runtime => info!("Using recorded test runtime"),
            _ => info!("Not enough recorded runtime data, grouping by file size"),
        }
    }

    if options.group_by == GroupBy::Runtime
        && let Some(percent) = options.allowed_missing_percent
    {
        let total = paths.len();
        let missing = total - log.coverage(paths);
        if missing as f64 > total as f64 * percent / 100.0 {
            return Err(PartitionError::InsufficientRuntimeData {
                log: options.runtime_log.clone().unwrap_or_default(),
                missing,
                total,
            });
        }
    }

    let items = cost::assign(paths, mode, &log)?;

    let groups = match mode {
        GroupBy::Found => packer::in_groups(items, num_groups, &options.pins),
        _ => packer::pack(items, num_groups, &options.pins),
    };

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_files(dir: &TempDir, files: &[(&str, usize)]) -> Vec<String> {
        files
            .iter()
            .map(|(name, size)| {
                let path = dir.path().join(name);
                std::fs::write(&path, "x".repeat(*size)).unwrap();
                path.to_string_lossy().to_string()
            })
            .collect()
    }

    #[test]
    fn test_group_by_from_str() {
        assert_eq!("found".parse::<GroupBy>().unwrap(), GroupBy::Found);
        assert_eq!("runtime".parse::<GroupBy>().unwrap(), GroupBy::Runtime);
        assert!(matches!(
            "steps".parse::<GroupBy>(),
            Err(PartitionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_groups_is_invalid() {
        let result = partition(&[], 0, &PartitionOptions::default());
        assert!(matches!(
            result,
            Err(PartitionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_partition_by_filesize() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &[("a", 10), ("b", 30), ("c", 20)]);
        let options = PartitionOptions {
            group_by: GroupBy::Filesize,
            ..Default::default()
        };

        let groups = partition(&paths, 2, &options).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].total_cost, 30.0);
        assert_eq!(groups[1].total_cost, 30.0);
        assert_eq!(groups[0].paths(), vec![paths[1].as_str()]);
    }

    #[test]
    fn test_missing_file_aborts_partition() {
        let options = PartitionOptions {
            group_by: GroupBy::Filesize,
            ..Default::default()
        };
        let result = partition(&["does/not/exist_spec.rb".to_string()], 2, &options);
        assert!(matches!(result, Err(PartitionError::Io { .. })));
    }

    #[test]
    fn test_default_falls_back_to_filesize_without_log() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &[("a", 5), ("b", 7)]);
        let options = PartitionOptions {
            runtime_log: Some(dir.path().join("missing.log")),
            ..Default::default()
        };

        let groups = partition(&paths, 1, &options).unwrap();
        assert_eq!(groups[0].total_cost, 12.0);
    }

    #[test]
    fn test_default_uses_runtime_with_enough_coverage() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir, &[("a", 5), ("b", 7), ("c", 1)]);
        let log_path = dir.path().join("runtime.log");
        std::fs::write(&log_path, format!("{}:10\n{}:20\n", paths[0], paths[1])).unwrap();
        let options = PartitionOptions {
            runtime_log: Some(log_path),
            ..Default::default()
        };

        let groups = partition(&paths, 1, &options).unwrap();
        // 10 + 20 + 1 for the unrecorded file
        assert_eq!(groups[0].total_cost, 31.0);
    }

    #[test]
    fn test_explicit_runtime_rejects_sparse_log() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("runtime.log");
        std::fs::write(&log_path, "a:1\n").unwrap();
        let paths: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let options = PartitionOptions {
            group_by: GroupBy::Runtime,
            runtime_log: Some(log_path),
            allowed_missing_percent: Some(50.0),
            ..Default::default()
        };

        let result = partition(&paths, 2, &options);
        assert!(matches!(
            result,
            Err(PartitionError::InsufficientRuntimeData {
                missing: 3,
                total: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_found_mode_round_robins() {
        let paths: Vec<String> = ["d", "c", "b", "a"].iter().map(|s| s.to_string()).collect();
        let options = PartitionOptions {
            group_by: GroupBy::Found,
            ..Default::default()
        };

        let groups = partition(&paths, 2, &options).unwrap();
        assert_eq!(groups[0].paths(), vec!["b", "d"]);
        assert_eq!(groups[1].paths(), vec!["a", "c"]);
    }
}
