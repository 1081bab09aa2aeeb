//! Configuration module for watch folders.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `WATCHFOLDER_` and use double
//! underscores to separate nested levels:
//! - `WATCHFOLDER_WATCH__SETTLE_POLL_MS=50` sets `watch.settle_poll_ms`
//! - `WATCHFOLDER_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::watcher::ConflictPolicy;

const ENV_PREFIX: &str = "WATCHFOLDER_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Options shared by every watcher
    #[serde(default)]
    pub watch: WatchOptions,

    /// Task used when no hotkey is involved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_task: Option<TaskProfile>,

    /// Tasks bound to hotkeys, each with its own watch folders
    #[serde(default)]
    pub hotkeys: Vec<HotkeyProfile>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for every module
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `watchfolder::watcher = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Interval between size checks while a new file is still being written
    #[serde(default = "default_settle_poll_ms")]
    pub settle_poll_ms: u64,

    /// Upper bound on the settle wait before the file is processed anyway
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,

    /// How many `name(n).ext` candidates to try before giving up
    #[serde(default = "default_max_conflict_attempts")]
    pub max_conflict_attempts: u32,
}

/// Persisted form of a task configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TaskProfile {
    #[serde(default = "default_task_name")]
    pub name: String,

    /// Master switch for every watch folder of this task
    #[serde(default = "default_false")]
    pub watch_enabled: bool,

    /// Folder that receives moved files
    #[serde(default = "default_destination_folder")]
    pub destination_folder: PathBuf,

    /// chrono format string appended below the destination, e.g. `%Y-%m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder_pattern: Option<String>,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    #[serde(default)]
    pub watch_folders: Vec<WatchFolderConfig>,
}

/// Persisted form of a single watch target.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WatchFolderConfig {
    pub path: PathBuf,

    /// Glob matched against the new file's name
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default = "default_false")]
    pub include_subdirectories: bool,

    #[serde(default = "default_false")]
    pub move_to_destination: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HotkeyProfile {
    /// Key combination, e.g. `Ctrl+Shift+4`
    pub hotkey: String,

    pub task: TaskProfile,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_settle_poll_ms() -> u64 {
    100
}
fn default_settle_timeout_ms() -> u64 {
    5_000
}
fn default_max_conflict_attempts() -> u32 {
    1_000
}
fn default_task_name() -> String {
    "default".to_string()
}
fn default_filter() -> String {
    "*".to_string()
}
fn default_destination_folder() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("watchfolder")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            logging: LoggingConfig::default(),
            watch: WatchOptions::default(),
            default_task: Some(TaskProfile::default()),
            hotkeys: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            settle_poll_ms: default_settle_poll_ms(),
            settle_timeout_ms: default_settle_timeout_ms(),
            max_conflict_attempts: default_max_conflict_attempts(),
        }
    }
}

impl Default for TaskProfile {
    fn default() -> Self {
        Self {
            name: default_task_name(),
            watch_enabled: false,
            destination_folder: default_destination_folder(),
            subfolder_pattern: None,
            conflict_policy: ConflictPolicy::default(),
            watch_folders: Vec::new(),
        }
    }
}

impl WatchFolderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: default_filter(),
            include_subdirectories: false,
            move_to_destination: false,
            enabled: true,
        }
    }
}

impl Settings {
    /// Default location of the settings file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("watchfolder")
            .join("settings.toml")
    }

    /// Load configuration from all sources, using the default file location.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific file, layered over defaults and
    /// under environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore
            // stays part of the field name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file at `path`.
    pub fn init_config_file(
        path: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = path.as_ref().to_path_buf();

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
