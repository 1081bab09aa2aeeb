//! Registry of live watch folders.
//!
//! Keeps one [`FolderWatcher`] per registered [`WatchTarget`] and mirrors the
//! target lists of the task configurations it was fed. Additions, removals
//! and state changes are serialized, and a removal returns only after the
//! watcher's subscription has been released.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Settings, WatchOptions};

use super::backend::{NotifyBackend, WatchBackend};
use super::error::WatchError;
use super::folder::{FolderWatcher, WatcherState};
use super::pipeline::{FailureHook, PipelineContext};
use super::target::{TaskConfig, WatchTarget};
use super::upload::Uploader;

/// A task configuration reachable through a hotkey.
#[derive(Debug, Clone)]
pub struct HotkeyTask {
    pub hotkey: String,
    pub task: Arc<TaskConfig>,
}

/// Every task configuration the registry synchronizes against.
#[derive(Debug, Clone, Default)]
pub struct WatchSources {
    pub default_task: Option<Arc<TaskConfig>>,
    pub hotkeys: Vec<HotkeyTask>,
}

impl WatchSources {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_task: settings.default_task.as_ref().map(TaskConfig::from_profile),
            hotkeys: settings
                .hotkeys
                .iter()
                .map(|h| HotkeyTask {
                    hotkey: h.hotkey.clone(),
                    task: TaskConfig::from_profile(&h.task),
                })
                .collect(),
        }
    }

    /// Default task first, then hotkey tasks in order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<TaskConfig>> {
        self.default_task
            .iter()
            .chain(self.hotkeys.iter().map(|h| &h.task))
    }

    /// Write the current task and target lists back into `settings`.
    pub fn store_into(&self, settings: &mut Settings) {
        settings.default_task = self.default_task.as_ref().map(|t| t.to_profile());
        for (profile, hotkey) in settings.hotkeys.iter_mut().zip(&self.hotkeys) {
            if profile.hotkey == hotkey.hotkey {
                profile.task = hotkey.task.to_profile();
            }
        }
    }
}

/// Read-only view of one registered watcher.
#[derive(Debug, Clone)]
pub struct WatcherStatus {
    pub target: Arc<WatchTarget>,
    pub task: String,
    pub folder: PathBuf,
    pub state: WatcherState,
}

/// A target that was registered but could not start watching.
#[derive(Debug)]
pub struct SyncFailure {
    pub folder: PathBuf,
    pub error: WatchError,
}

/// Outcome of [`WatchRegistry::synchronize`].
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Targets registered, dormant ones included.
    pub registered: usize,
    /// Targets that should be watching but failed to subscribe.
    pub failed: Vec<SyncFailure>,
}

/// Authoritative collection of watch folders.
///
/// Mutating operations are serialized by one lock that is held across watcher
/// teardown. The watcher list has its own lock, only ever held for a lookup
/// or an edit, so the read-only views below can be used from an uploader or
/// failure hook while a removal waits for that very callback to finish.
/// Mutating operations must not be called from those callbacks.
pub struct WatchRegistry {
    ops: Mutex<()>,
    watchers: Mutex<Vec<Arc<FolderWatcher>>>,
    backend: Arc<dyn WatchBackend>,
    ctx: Arc<PipelineContext>,
}

impl WatchRegistry {
    /// Create a builder for configuring the registry.
    pub fn builder() -> WatchRegistryBuilder {
        WatchRegistryBuilder::new()
    }

    /// Rebuild every watcher from `sources`.
    ///
    /// All current watchers are released first. A target that fails to
    /// subscribe stays registered but dormant and is listed in the report.
    pub fn synchronize(&self, sources: &WatchSources) -> SyncReport {
        let _ops = self.ops.lock();
        let previous = std::mem::take(&mut *self.watchers.lock());
        for watcher in &previous {
            watcher.dispose();
        }
        drop(previous);

        let mut report = SyncReport::default();
        for task in sources.tasks() {
            for target in task.targets() {
                match self.add_serialized(&target, task) {
                    Ok(true) => report.registered += 1,
                    Ok(false) => {}
                    Err(error) => {
                        report.registered += 1;
                        tracing::warn!("[registry] {error}");
                        report.failed.push(SyncFailure {
                            folder: target.folder().to_path_buf(),
                            error,
                        });
                    }
                }
            }
        }

        let watchers = self.watchers.lock();
        crate::log_event!(
            "registry",
            "synchronized",
            "{} folders, {} watching",
            watchers.len(),
            watchers
                .iter()
                .filter(|w| w.state() == WatcherState::Enabled)
                .count()
        );
        report
    }

    /// Register `target` under `task`.
    ///
    /// Returns `Ok(false)` if this exact target is already registered. The
    /// target is appended to the task's list if missing. If the task is
    /// watching, the new watcher is enabled right away; an enable failure
    /// leaves it registered but dormant and is returned as the error.
    pub fn add(&self, target: &Arc<WatchTarget>, task: &Arc<TaskConfig>) -> Result<bool, WatchError> {
        let _ops = self.ops.lock();
        self.add_serialized(target, task)
    }

    /// Body of `add`; the caller holds `ops`.
    fn add_serialized(
        &self,
        target: &Arc<WatchTarget>,
        task: &Arc<TaskConfig>,
    ) -> Result<bool, WatchError> {
        if self.find(target).is_some() {
            return Ok(false);
        }

        task.ensure_target(target);

        let watcher = Arc::new(FolderWatcher::new(
            Arc::clone(target),
            Arc::clone(task),
            Arc::clone(&self.backend),
            Arc::clone(&self.ctx),
        ));
        self.watchers.lock().push(Arc::clone(&watcher));

        if task.is_target_active(target) {
            watcher.enable()?;
        }
        Ok(true)
    }

    /// Unregister `target`, drop it from its task and release its watcher.
    ///
    /// The watcher leaves the list before teardown starts, so lookups miss it
    /// from then on. Returns once the subscription is released and no
    /// pipeline run for it is in progress, or `false` if the target was not
    /// registered.
    pub fn remove(&self, target: &Arc<WatchTarget>) -> bool {
        let _ops = self.ops.lock();
        let watcher = {
            let mut watchers = self.watchers.lock();
            let Some(index) = watchers.iter().position(|w| w.is_bound_to(target)) else {
                return false;
            };
            watchers.remove(index)
        };

        watcher.task().remove_target(target);
        watcher.dispose();
        crate::log_event!("registry", "removed", path = target.folder());
        true
    }

    /// Start or stop watching `target` to match its current switches.
    ///
    /// A stopped watcher stays registered. Returns `Ok(false)` if the target
    /// was not registered.
    pub fn update_state(&self, target: &Arc<WatchTarget>) -> Result<bool, WatchError> {
        let _ops = self.ops.lock();
        let Some(watcher) = self.find(target) else {
            return Ok(false);
        };

        if watcher.task().is_target_active(target) {
            watcher.enable()?;
        } else {
            watcher.dispose();
        }
        Ok(true)
    }

    /// Release every subscription while keeping registrations and task lists.
    pub fn unregister_all(&self) {
        let _ops = self.ops.lock();
        let watchers = self.watchers.lock().clone();
        let released = watchers.iter().filter(|w| w.dispose()).count();
        if released > 0 {
            crate::log_event!("registry", "released", "{released} folders");
        }
    }

    /// Release all resources. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.unregister_all();
    }

    fn find(&self, target: &Arc<WatchTarget>) -> Option<Arc<FolderWatcher>> {
        self.watchers
            .lock()
            .iter()
            .find(|w| w.is_bound_to(target))
            .cloned()
    }

    /// Snapshot of every registered watcher, in registration order.
    pub fn watchers(&self) -> Vec<WatcherStatus> {
        self.watchers
            .lock()
            .iter()
            .map(|w| WatcherStatus {
                target: Arc::clone(w.target()),
                task: w.task().name(),
                folder: w.folder().to_path_buf(),
                state: w.state(),
            })
            .collect()
    }

    pub fn contains(&self, target: &Arc<WatchTarget>) -> bool {
        self.find(target).is_some()
    }

    pub fn state_of(&self, target: &Arc<WatchTarget>) -> Option<WatcherState> {
        self.find(target).map(|w| w.state())
    }

    pub fn len(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.lock().is_empty()
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builder for constructing a WatchRegistry.
pub struct WatchRegistryBuilder {
    backend: Option<Arc<dyn WatchBackend>>,
    uploader: Option<Arc<dyn Uploader>>,
    options: WatchOptions,
    on_failure: Option<FailureHook>,
}

impl WatchRegistryBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            backend: None,
            uploader: None,
            options: WatchOptions::default(),
            on_failure: None,
        }
    }

    /// Set the notification backend. Defaults to [`NotifyBackend`].
    pub fn backend(mut self, backend: Arc<dyn WatchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the uploader that receives finished arrivals.
    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Set the pipeline options.
    pub fn options(mut self, options: WatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Observe per-event pipeline failures.
    pub fn on_failure(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Build the WatchRegistry.
    pub fn build(self) -> Result<WatchRegistry, WatchError> {
        let uploader = self.uploader.ok_or_else(|| WatchError::InitFailed {
            reason: "Uploader is required".to_string(),
        })?;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(NotifyBackend::new()));

        Ok(WatchRegistry {
            watchers: Mutex::new(Vec::new()),
            ops: Mutex::new(()),
            backend,
            ctx: Arc::new(PipelineContext {
                uploader,
                options: self.options,
                on_failure: self.on_failure,
            }),
        })
    }
}

impl Default for WatchRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
