//! Directory notification backends.
//!
//! A [`WatchBackend`] turns a folder into a [`Subscription`] that reports
//! newly created files. Dropping the subscription releases the OS resource
//! and the handler it captured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::CreateKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};

use super::error::WatchError;

/// Callback invoked with the full path of each created file.
///
/// Runs on a thread chosen by the backend, never the caller's.
pub type EventHandler = Arc<dyn Fn(PathBuf) + Send + Sync>;

/// A live directory subscription. Released on drop.
pub trait Subscription: Send {
    /// Folder this subscription watches.
    fn folder(&self) -> &Path;
}

/// Source of directory subscriptions.
pub trait WatchBackend: Send + Sync {
    /// Start watching `folder`, calling `on_created` for every new file.
    fn subscribe(
        &self,
        folder: &Path,
        recursive: bool,
        on_created: EventHandler,
    ) -> Result<Box<dyn Subscription>, WatchError>;
}

/// Backend over `notify::RecommendedWatcher` (inotify, FSEvents,
/// ReadDirectoryChangesW).
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl NotifyBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Whether a raw event reports a newly created file.
fn is_file_creation(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(kind) if kind != CreateKind::Folder)
}

impl WatchBackend for NotifyBackend {
    fn subscribe(
        &self,
        folder: &Path,
        recursive: bool,
        on_created: EventHandler,
    ) -> Result<Box<dyn Subscription>, WatchError> {
        if !folder.is_dir() {
            return Err(WatchError::PathWatchFailed {
                path: folder.to_path_buf(),
                reason: "not an accessible directory".to_string(),
            });
        }

        let label = folder.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if is_file_creation(&event) => {
                    for path in event.paths {
                        // Some backends report folder creation as CreateKind::Any
                        if !path.is_dir() {
                            on_created(path);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("[watcher] file watch error in {}: {e}", label.display());
                }
            }
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        watcher
            .watch(folder, mode)
            .map_err(|e| WatchError::PathWatchFailed {
                path: folder.to_path_buf(),
                reason: e.to_string(),
            })?;

        crate::debug_event!("watcher", "watching", path = folder);

        Ok(Box::new(NotifySubscription {
            folder: folder.to_path_buf(),
            watcher,
        }))
    }
}

struct NotifySubscription {
    folder: PathBuf,
    watcher: notify::RecommendedWatcher,
}

impl Subscription for NotifySubscription {
    fn folder(&self) -> &Path {
        &self.folder
    }
}

impl Drop for NotifySubscription {
    fn drop(&mut self) {
        // The folder may already be gone; dropping the watcher still frees
        // the handle and the captured callback.
        if let Err(e) = self.watcher.unwatch(&self.folder) {
            crate::debug_event!("watcher", "unwatch failed", path = self.folder, error = e);
        }
        crate::debug_event!("watcher", "released", path = self.folder);
    }
}
