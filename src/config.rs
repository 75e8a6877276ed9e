//! Configuration loading and schema definitions for partest.
//!
//! Configuration comes from an optional TOML file (`partest.toml`); command
//! line flags override it. See [`schema`] for the file format.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "partest.toml";

/// Loads partest configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use partest::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("partest.toml"))?;
/// println!("Processes: {:?}", config.partest.processes);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let path = expand_path(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads partest configuration from a TOML string.
///
/// # Example
///
/// ```
/// use partest::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [partest]
///     processes = 4
///
///     [framework]
///     type = "rspec"
/// "#)?;
///
/// assert_eq!(config.partest.processes, Some(4));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads `path` if given, else `partest.toml` if it exists, else defaults.
///
/// An explicitly named file that is missing is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                load_config(default)
            } else {
                tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                Ok(Config::default())
            }
        }
    }
}

/// Expands a leading `~` to the home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
