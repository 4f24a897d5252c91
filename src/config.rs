//! Daemon configuration.
//!
//! Loaded from a TOML file at startup: this module defines the typed
//! shape and a minimal loader so the daemon is runnable end to end.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{FsalError, FsalResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fsal: FsalSection,
    #[serde(default)]
    pub bundles: BundlesSection,
    pub ondd: OnddSection,
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FsalSection {
    /// Path of the Unix domain socket to bind.
    pub socket: PathBuf,
    /// Ordered list of base directories to index; last entry is the
    /// default transfer destination.
    pub basepaths: Vec<PathBuf>,
    /// Regex patterns; matching paths are excluded from the index.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BundlesSection {
    /// Relative sub-directory under each base that receives bundle
    /// archives.
    #[serde(default = "default_bundles_dir")]
    pub bundles_dir: String,
    /// Allow-list of bundle extensions (without the leading dot).
    #[serde(default)]
    pub bundles_exts: Vec<String>,
}

fn default_bundles_dir() -> String {
    "bundles".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnddSection {
    /// IPC socket of the external notification source.
    pub socket: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse configuration from a TOML file on disk.
    pub fn load(path: &Path) -> FsalResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FsalError::filesystem(path, e))?;
        toml::from_str(&text)
            .map_err(|e| FsalError::Protocol(format!("invalid config at {}: {e}", path.display())))
    }

    /// The last configured base path, used as the default transfer
    /// destination.
    pub fn default_base(&self) -> Option<&Path> {
        self.fsal.basepaths.last().map(PathBuf::as_path)
    }
}
