//! Recorded per-file runtimes.
//!
//! The runtime log is a plain text file with one `path:seconds` entry per
//! line. It is appended to by framework loggers after each run, so the same
//! path may appear several times; the last occurrence wins.
//!
//! ```text
//! spec/models/user_spec.rb:3.52
//! spec/features/checkout_spec.rb:41.0
//! ```
//!
//! Loading never fails: a missing or unreadable log is treated as "no
//! recorded data", which makes the partitioner fall back to file sizes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Mapping from normalized relative file path to last observed duration in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeLog {
    entries: BTreeMap<String, f64>,
}

impl RuntimeLog {
    /// Loads a runtime log from disk.
    ///
    /// Returns an empty log if the file doesn't exist or can't be read.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("Runtime log {} does not exist", path.display());
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => {
                let log = Self::parse(&content);
                debug!(
                    "Loaded {} runtime entries from {}",
                    log.len(),
                    path.display()
                );
                log
            }
            Err(e) => {
                warn!(
                    "Failed to read runtime log {}, ignoring it: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parses runtime log content. Malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let mut entries = BTreeMap::new();

        for line in content.lines() {
            // Split on the last colon so paths containing colons survive.
            let Some((path, duration)) = line.trim().rsplit_once(':') else {
                continue;
            };
            let path = normalize_path(path);
            if path.is_empty() {
                continue;
            }
            match duration.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    entries.insert(path.to_string(), secs);
                }
                _ => continue,
            }
        }

        Self { entries }
    }

    /// Returns the recorded runtime for `path`, if any.
    pub fn get(&self, path: &str) -> Option<f64> {
        self.entries.get(normalize_path(path)).copied()
    }

    /// Records (or overwrites) the runtime for `path`.
    pub fn insert(&mut self, path: &str, secs: f64) {
        self.entries.insert(normalize_path(path).to_string(), secs);
    }

    /// Number of distinct paths with a recorded runtime.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts how many of `paths` have a recorded runtime.
    pub fn coverage<S: AsRef<str>>(&self, paths: &[S]) -> usize {
        paths
            .iter()
            .filter(|p| self.get(p.as_ref()).is_some())
            .count()
    }

    /// Writes the log back out, one entry per line, sorted by path.
    ///
    /// Rewriting collapses duplicate entries left behind by appends.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut content = String::new();
        for (file, secs) in &self.entries {
            let _ = writeln!(content, "{}:{}", file, secs);
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write runtime log {}", path.display()))?;
        Ok(())
    }
}

/// Strips a leading `./` so `./spec/a_spec.rb` and `spec/a_spec.rb` match.
pub fn normalize_path(path: &str) -> &str {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path
}
