//! Error types for watch folders and the arrival pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher and registry operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Failed to load config: {reason}")]
    ConfigError { reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Errors from a single arrival pipeline run.
///
/// These never escape the event they belong to: the watcher logs them and
/// forwards them to the registry's failure hook.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source file vanished before it could be processed: {path}")]
    SourceMissing { path: PathBuf },

    #[error("No free destination name for {path} after {attempts} attempts")]
    ConflictExhausted { path: PathBuf, attempts: u32 },

    #[error("Path has no usable file name: {path}")]
    InvalidFileName { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}
