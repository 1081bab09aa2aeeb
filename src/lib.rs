pub mod config;
pub mod logging;
pub mod watcher;

pub use config::Settings;
pub use watcher::{
    ChannelUploader, FolderWatcher, TaskConfig, UploadRequest, Uploader, WatchError,
    WatchRegistry, WatchSources, WatchTarget, WatcherState,
};
