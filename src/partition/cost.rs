//! Cost assignment for test files.
//!
//! | Mode | Cost | Order |
//! |------|------|-------|
//! | `filesize` | size in bytes | sorted by path |
//! | `runtime` | recorded seconds, 1 if unrecorded | sorted by path |
//! | `found` | 1 | discovery order |

use std::path::PathBuf;

use super::{GroupBy, PartitionError, PartitionResult, TestItem};
use crate::runtime::RuntimeLog;

/// Cost given to files with no recorded runtime and to every file in
/// `found` mode.
pub const FALLBACK_COST: f64 = 1.0;

/// Minimum share of files with a recorded runtime for `default` grouping
/// to pick runtime costs, as `(numerator, denominator)`.
pub const RUNTIME_COVERAGE: (usize, usize) = (2, 3);

/// Picks the concrete mode for `requested`.
///
/// Only [`GroupBy::Default`] is resolved: it becomes
/// [`GroupBy::Runtime`] when the log covers at least two thirds of `paths`
/// and [`GroupBy::Filesize`] otherwise.
pub fn resolve_mode(requested: GroupBy, paths: &[String], log: &RuntimeLog) -> GroupBy {
    match requested {
        GroupBy::Default => {
            let (num, den) = RUNTIME_COVERAGE;
            let covered = log.coverage(paths);
            if !paths.is_empty() && covered * den >= paths.len() * num {
                GroupBy::Runtime
            } else {
                GroupBy::Filesize
            }
        }
        other => other,
    }
}

/// Produces `(path, cost)` pairs for `paths` under `mode`.
///
/// # Errors
///
/// Returns [`PartitionError::Io`] if a file can't be sized. No partial
/// result is returned.
pub fn assign(paths: &[String], mode: GroupBy, log: &RuntimeLog) -> PartitionResult<Vec<TestItem>> {
    match resolve_mode(mode, paths, log) {
        GroupBy::Found => Ok(paths
            .iter()
            .map(|p| TestItem::new(p.clone(), FALLBACK_COST))
            .collect()),
        GroupBy::Filesize => sorted(paths)
            .into_iter()
            .map(|p| {
                let size = std::fs::metadata(p)
                    .map_err(|source| PartitionError::Io {
                        path: PathBuf::from(p),
                        source,
                    })?
                    .len();
                Ok(TestItem::new(p.clone(), size as f64))
            })
            .collect(),
        GroupBy::Runtime | GroupBy::Default => Ok(sorted(paths)
            .into_iter()
            .map(|p| TestItem::new(p.clone(), log.get(p).unwrap_or(FALLBACK_COST)))
            .collect()),
    }
}

fn sorted(paths: &[String]) -> Vec<&String> {
    let mut sorted: Vec<&String> = paths.iter().collect();
    sorted.sort();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_found_keeps_order_and_uniform_cost() {
        let items = assign(&strings(&["z", "a", "m"]), GroupBy::Found, &RuntimeLog::default())
            .unwrap();

        let paths: Vec<_> = items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["z", "a", "m"]);
        assert!(items.iter().all(|i| i.cost == 1.0));
    }

    #[test]
    fn test_runtime_defaults_missing_to_one() {
        let log = RuntimeLog::parse("b:4.5\n");
        let items = assign(&strings(&["b", "a"]), GroupBy::Runtime, &log).unwrap();

        assert_eq!(items[0], TestItem::new("a", 1.0));
        assert_eq!(items[1], TestItem::new("b", 4.5));
    }

    #[test]
    fn test_filesize_uses_byte_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x_spec.rb");
        std::fs::write(&path, "1234567").unwrap();
        let paths = vec![path.to_string_lossy().to_string()];

        let items = assign(&paths, GroupBy::Filesize, &RuntimeLog::default()).unwrap();
        assert_eq!(items[0].cost, 7.0);
    }

    #[test]
    fn test_resolve_mode_coverage_threshold() {
        let paths = strings(&["a", "b", "c"]);

        let two_of_three = RuntimeLog::parse("a:1\nb:1\n");
        assert_eq!(
            resolve_mode(GroupBy::Default, &paths, &two_of_three),
            GroupBy::Runtime
        );

        let one_of_three = RuntimeLog::parse("a:1\n");
        assert_eq!(
            resolve_mode(GroupBy::Default, &paths, &one_of_three),
            GroupBy::Filesize
        );

        assert_eq!(
            resolve_mode(GroupBy::Found, &paths, &two_of_three),
            GroupBy::Found
        );
    }
}
