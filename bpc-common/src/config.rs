//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`BPC_ROOT_FOLDER`, then `BPC_ROOT`)
//! 3. `root_folder` key of the module TOML file
//! 4. OS-dependent compiled default (fallback)
//!
//! Missing TOML files are never fatal: the caller gets defaults and a warning.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Primary root folder environment variable
pub const ROOT_FOLDER_ENV: &str = "BPC_ROOT_FOLDER";
/// Alternative root folder environment variable
pub const ROOT_ENV: &str = "BPC_ROOT";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/bpc
        dirs::data_local_dir()
            .map(|d| d.join("bpc"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/bpc"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/bpc
        dirs::data_dir()
            .map(|d| d.join("bpc"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/bpc"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\bpc
        dirs::data_local_dir()
            .map(|d| d.join("bpc"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\bpc"))
    } else {
        PathBuf::from("./bpc_data")
    }
}

/// Path of the TOML file for a module (`~/.config/bpc/<module>.toml`)
pub fn module_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bpc").join(format!("{}.toml", module_name)))
}

/// Resolves the root folder following the priority order above
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            config_path: module_config_path(module_name),
        }
    }

    /// Command-line override (priority 1)
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    /// Use an explicit TOML file instead of the per-module default
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.config_path = path;
        }
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            debug!(root_folder = %path.display(), "Root folder from command line");
            return path.clone();
        }

        // Priority 2: Environment variables
        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    debug!(root_folder = %path, "Root folder from {}", var);
                    return PathBuf::from(path);
                }
            }
        }

        // Priority 3: TOML config file
        if let Some(config_path) = &self.config_path {
            if let Some(path) = read_root_folder_key(config_path) {
                debug!(root_folder = %path.display(), "Root folder from {}", config_path.display());
                return path;
            }
        }

        // Priority 4: OS-dependent compiled default
        debug!(module = %self.module_name, "Root folder from compiled default");
        CompiledDefaults::for_current_platform().root_folder
    }
}

fn read_root_folder_key(config_path: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(config_path).ok()?;
    match toml::from_str::<toml::Value>(&content) {
        Ok(value) => value
            .get("root_folder")
            .and_then(|v| v.as_str())
            .map(PathBuf::from),
        Err(e) => {
            warn!("Ignoring malformed config {}: {}", config_path.display(), e);
            None
        }
    }
}

/// Creates the root folder and derives the default pools path under it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)
            .map_err(|e| Error::file_io(&self.root_folder, e))
    }

    /// Default exported pools document
    pub fn pools_path(&self) -> PathBuf {
        self.root_folder.join("pools.json")
    }
}

/// Load a TOML file into `T`
///
/// Returns `Ok(None)` when the file does not exist, so callers can fall back
/// to defaults. A file that exists but does not parse is a configuration error.
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Config file not found, using defaults: {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(Error::file_io(path, e)),
    };

    toml::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}
