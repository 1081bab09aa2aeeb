//! Shared fixtures for watch folder integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use watchfolder::config::{WatchFolderConfig, WatchOptions};
use watchfolder::watcher::{
    ConflictPolicy, EventHandler, Subscription, TaskConfig, TaskSettings, UploadRequest, Uploader,
    WatchBackend, WatchError, WatchRegistry, WatchTarget,
};

#[derive(Default)]
struct MockState {
    acquired: AtomicUsize,
    released: AtomicUsize,
    next_id: AtomicU64,
    live: Mutex<Vec<(u64, PathBuf, EventHandler)>>,
    history: Mutex<Vec<(PathBuf, EventHandler)>>,
    failing: Mutex<HashSet<PathBuf>>,
}

/// Notification backend that counts acquire/release and emits synthetic events.
#[derive(Default, Clone)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.state.live.lock().len()
    }

    pub fn live_folders(&self) -> HashSet<PathBuf> {
        self.state
            .live
            .lock()
            .iter()
            .map(|(_, folder, _)| folder.clone())
            .collect()
    }

    /// Make subscriptions to `folder` fail until [`MockBackend::allow`].
    pub fn fail_on(&self, folder: &Path) {
        self.state.failing.lock().insert(folder.to_path_buf());
    }

    pub fn allow(&self, folder: &Path) {
        self.state.failing.lock().remove(folder);
    }

    /// Deliver a creation event for `file` to every live subscription on
    /// `folder`. Returns how many handlers were called.
    pub fn emit(&self, folder: &Path, file: &Path) -> usize {
        let handlers: Vec<EventHandler> = self
            .state
            .live
            .lock()
            .iter()
            .filter(|(_, f, _)| f == folder)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();

        for handler in &handlers {
            handler(file.to_path_buf());
        }
        handlers.len()
    }

    /// Every handler ever registered for `folder`, released ones included.
    pub fn handlers_for(&self, folder: &Path) -> Vec<EventHandler> {
        self.state
            .history
            .lock()
            .iter()
            .filter(|(f, _)| f == folder)
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }
}

struct MockSubscription {
    id: u64,
    folder: PathBuf,
    state: Arc<MockState>,
}

impl Subscription for MockSubscription {
    fn folder(&self) -> &Path {
        &self.folder
    }
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        self.state.live.lock().retain(|(id, _, _)| *id != self.id);
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl WatchBackend for MockBackend {
    fn subscribe(
        &self,
        folder: &Path,
        _recursive: bool,
        on_created: EventHandler,
    ) -> Result<Box<dyn Subscription>, WatchError> {
        if self.state.failing.lock().contains(folder) {
            return Err(WatchError::PathWatchFailed {
                path: folder.to_path_buf(),
                reason: "mock failure".to_string(),
            });
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state
            .live
            .lock()
            .push((id, folder.to_path_buf(), Arc::clone(&on_created)));
        self.state
            .history
            .lock()
            .push((folder.to_path_buf(), on_created));
        self.state.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockSubscription {
            id,
            folder: folder.to_path_buf(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Uploader that records every request.
#[derive(Default)]
pub struct Recorder {
    requests: Mutex<Vec<UploadRequest>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.requests.lock().iter().map(|r| r.path.clone()).collect()
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Uploader for Recorder {
    fn upload(&self, request: UploadRequest) {
        self.requests.lock().push(request);
    }
}

pub fn fast_options() -> WatchOptions {
    WatchOptions {
        settle_poll_ms: 0,
        settle_timeout_ms: 0,
        max_conflict_attempts: 10,
    }
}

pub fn registry(backend: &Arc<MockBackend>, uploader: Arc<dyn Uploader>) -> WatchRegistry {
    WatchRegistry::builder()
        .backend(backend.clone())
        .uploader(uploader)
        .options(fast_options())
        .build()
        .unwrap()
}

pub fn task(name: &str, watch_enabled: bool, destination: &Path) -> Arc<TaskConfig> {
    TaskConfig::new(TaskSettings {
        name: name.to_string(),
        watch_enabled,
        destination_folder: destination.to_path_buf(),
        subfolder_pattern: None,
        conflict_policy: ConflictPolicy::Suffix,
    })
}

pub fn target(folder: &Path) -> Arc<WatchTarget> {
    WatchTarget::new(WatchFolderConfig::new(folder))
}

pub fn moving_target(folder: &Path) -> Arc<WatchTarget> {
    let mut config = WatchFolderConfig::new(folder);
    config.move_to_destination = true;
    WatchTarget::new(config)
}
