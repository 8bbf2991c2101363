//! Library configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Where cgkit finds the kernel tables and the rules file
///
/// Every field has a default, so a JSON document only needs the fields it
/// overrides:
///
/// ```
/// use cgkit_core::Config;
///
/// let config = Config::from_json_str(r#"{ "rules_path": "/tmp/cgrules.conf" }"#).unwrap();
/// assert_eq!(config.rules_path.to_str(), Some("/tmp/cgrules.conf"));
/// assert_eq!(config.mounts_path.to_str(), Some("/proc/mounts"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kernel mount table
    pub mounts_path: PathBuf,

    /// Kernel controller table
    pub cgroups_path: PathBuf,

    /// procfs root, used for `/proc/<pid>/cgroup`
    pub proc_root: PathBuf,

    /// Classification rules file
    pub rules_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mounts_path: PathBuf::from("/proc/mounts"),
            cgroups_path: PathBuf::from("/proc/cgroups"),
            proc_root: PathBuf::from("/proc"),
            rules_path: PathBuf::from("/etc/cgrules.conf"),
        }
    }
}

impl Config {
    /// Create a configuration with the default paths
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another mount table
    #[must_use]
    pub fn with_mounts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_path = path.into();
        self
    }

    /// Use another controller table
    #[must_use]
    pub fn with_cgroups_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cgroups_path = path.into();
        self
    }

    /// Use another procfs root
    #[must_use]
    pub fn with_proc_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_root = path.into();
        self
    }

    /// Use another rules file
    #[must_use]
    pub fn with_rules_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_path = path.into();
        self
    }

    /// Parse a configuration from JSON
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the document is not a valid configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument {
            message: format!("Invalid configuration: {e}"),
        })
    }

    /// Load a configuration from a JSON file
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read, `InvalidArgument` if it does
    /// not parse
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Path of `/proc/<pid>/cgroup`
    #[must_use]
    pub fn proc_cgroup_path(&self, pid: i32) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("cgroup")
    }
}
