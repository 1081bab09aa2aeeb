//! Watch folders: directories whose new files are moved into place and
//! handed to the upload pipeline.
//!
//! # Architecture
//!
//! ```text
//! WatchRegistry
//!   - one FolderWatcher per WatchTarget
//!   - synchronized against WatchSources (default task + hotkey tasks)
//!         |
//!   FolderWatcher --subscribe--> WatchBackend (notify)
//!         |
//!   ArrivalPipeline: settle -> move (conflict policy) -> Uploader
//! ```

mod backend;
mod conflict;
mod error;
mod folder;
mod pipeline;
mod registry;
mod target;
mod upload;

pub use backend::{EventHandler, NotifyBackend, Subscription, WatchBackend};
pub use conflict::{ConflictPolicy, Resolution, numbered_name, resolve_destination, resolve_with};
pub use error::{PipelineError, WatchError};
pub use folder::{FolderWatcher, WatcherState};
pub use pipeline::{ArrivalPipeline, FailureHook, PipelineContext};
pub use registry::{
    HotkeyTask, SyncFailure, SyncReport, WatchRegistry, WatchRegistryBuilder, WatchSources,
    WatcherStatus,
};
pub use target::{TaskConfig, TaskSettings, WatchTarget};
pub use upload::{ChannelUploader, UploadRequest, Uploader};
