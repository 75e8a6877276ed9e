//! Finding test files.
//!
//! Each path given is either a directory, searched recursively for files
//! matching the framework's file pattern, or anything else, which is taken
//! as-is. Explicitly named files are never filtered: if a user names a file
//! they want it run.
//!
//! ```text
//! spec/                 ──► walk ──► *_spec.rb ──► --pattern ──► --exclude-pattern ─┐
//! spec/models/x_spec.rb ───────────────────────────────────────────────────────────┼──► dedup ──► files
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

/// Result type for discovery.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Filters applied to files found inside directories.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Files a directory search picks up at all.
    pub file_pattern: Regex,

    /// Keep only files matching this.
    pub include: Option<Regex>,

    /// Drop files matching this.
    pub exclude: Option<Regex>,
}

impl DiscoveryOptions {
    pub fn new(file_pattern: Regex) -> Self {
        Self {
            file_pattern,
            include: None,
            exclude: None,
        }
    }

    /// Sets the include filter from a regex string.
    pub fn with_include(mut self, pattern: Option<&str>) -> DiscoveryResult<Self> {
        self.include = pattern.map(compile).transpose()?;
        Ok(self)
    }

    /// Sets the exclude filter from a regex string.
    pub fn with_exclude(mut self, pattern: Option<&str>) -> DiscoveryResult<Self> {
        self.exclude = pattern.map(compile).transpose()?;
        Ok(self)
    }

    fn accepts(&self, path: &str) -> bool {
        self.file_pattern.is_match(path)
            && self.include.as_ref().is_none_or(|re| re.is_match(path))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(path))
    }
}

fn compile(pattern: &str) -> DiscoveryResult<Regex> {
    Regex::new(pattern).map_err(|source| DiscoveryError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Expands `paths` into the list of test files.
///
/// Directory contents come back sorted by path; explicit files keep the
/// position they were given in. A file reached twice is listed once.
///
/// # Errors
///
/// Fails if a directory can't be read.
pub fn find_tests(paths: &[PathBuf], options: &DiscoveryOptions) -> DiscoveryResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            for file in files_in_dir(path)? {
                if options.accepts(&file) && seen.insert(file.clone()) {
                    files.push(file);
                }
            }
        } else {
            let file = path.to_string_lossy().into_owned();
            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
    }

    debug!("Discovered {} test files", files.len());
    Ok(files)
}

fn files_in_dir(dir: &Path) -> DiscoveryResult<Vec<String>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker {
        let entry = entry.map_err(|source| DiscoveryError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_string_lossy().into_owned());
        }
    }

    files.sort();
    Ok(files)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}
